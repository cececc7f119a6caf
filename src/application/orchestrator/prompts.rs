use serde::Serialize;

use crate::domain::capability::CapabilitySet;
use crate::domain::report::ExecutionReport;

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

pub(super) fn capability_overview(capabilities: &CapabilitySet) -> String {
    format!(
        "Analyze these MCP capabilities and summarize how they could be used for research:\n\n\
         Available capabilities:\n{capabilities}\n\n\
         Explain:\n\
         1. What kinds of research tasks are possible\n\
         2. How the tools could be combined\n\
         3. Any limitations or gaps\n\
         4. Best practices for usage",
        capabilities = pretty(capabilities),
    )
}

pub(super) fn research_plan(query: &str, capabilities: &CapabilitySet) -> String {
    format!(
        "Research query: {query}\n\n\
         Available MCP capabilities:\n{capabilities}\n\n\
         Create a research plan that uses the capabilities above, sequenced so that later \
         steps can build on earlier results.\n\n\
         Reply with a single JSON object and nothing else:\n\
         {{\n\
           \"steps\": [\n\
             {{\"type\": \"tool\", \"name\": \"<tool name>\", \"parameters\": {{...}}, \
         \"fallback\": {{\"type\": \"tool\", \"name\": \"<alternative>\", \"parameters\": {{...}}}}}},\n\
             {{\"type\": \"resource\", \"uri\": \"<resource uri>\"}},\n\
             {{\"type\": \"prompt\", \"name\": \"<prompt name>\", \"arguments\": {{...}}}}\n\
           ]\n\
         }}\n\n\
         The \"fallback\" field is optional and names one alternative invocation to try if \
         the step fails. Only reference capabilities that exist in the list above.",
        capabilities = pretty(capabilities),
    )
}

pub(super) fn result_analysis(report: &ExecutionReport) -> String {
    format!(
        "These are the results of an executed research plan:\n\n{report}\n\n\
         Analyze them and reply with a single JSON object and nothing else:\n\
         {{\n\
           \"findings\": [\"<key finding>\", ...],\n\
           \"recommendations\": [\"<recommended next step>\", ...]\n\
         }}\n\n\
         Base findings only on step data that is actually present; note failed steps as \
         gaps rather than inventing their results.",
        report = pretty(report),
    )
}
