mod parser;
mod prompts;

#[cfg(test)]
mod tests;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::capability::CapabilitySet;
use crate::domain::plan::Plan;
use crate::domain::report::ExecutionReport;
use crate::domain::types::ChatMessage;
use crate::infrastructure::model::{ModelError, ModelProvider, ModelRequest};

pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Result of asking the reasoning service for a plan. A reply that fails to
/// parse against the expected schema is data, not an error: the caller gets
/// the raw text back for diagnosis instead of an aborted query.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Plan(Plan),
    Invalid { error: String, raw_response: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analysis {
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Analysis(Analysis),
    Invalid { error: String, raw_response: String },
}

/// Drives the reasoning service: serializes capabilities and reports into
/// prompt text, asks for JSON-shaped replies, and parses them tolerantly.
pub struct Orchestrator<P: ModelProvider> {
    provider: P,
    model: String,
    max_tokens: u32,
}

impl<P: ModelProvider> Orchestrator<P> {
    pub fn new(provider: P, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn complete(&self, prompt: String) -> Result<String, ModelError> {
        let response = self
            .provider
            .complete(ModelRequest {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                messages: vec![ChatMessage::user(prompt)],
            })
            .await?;
        Ok(response.content)
    }

    /// Free-text overview of what the discovered capabilities are good for.
    pub async fn analyze_capabilities(
        &self,
        capabilities: &CapabilitySet,
    ) -> Result<String, ModelError> {
        debug!(
            tools = capabilities.tools.len(),
            resources = capabilities.resources.len(),
            prompts = capabilities.prompts.len(),
            "Requesting capability overview"
        );
        self.complete(prompts::capability_overview(capabilities))
            .await
    }

    pub async fn plan_research(
        &self,
        query: &str,
        capabilities: &CapabilitySet,
    ) -> Result<PlanOutcome, ModelError> {
        info!("Requesting research plan");
        let content = self
            .complete(prompts::research_plan(query, capabilities))
            .await?;

        let outcome = parser::parse_plan(&content);
        if let PlanOutcome::Invalid { error, .. } = &outcome {
            warn!(%error, "Planner reply did not match the expected schema");
        }
        Ok(outcome)
    }

    pub async fn analyze_results(
        &self,
        report: &ExecutionReport,
    ) -> Result<AnalysisOutcome, ModelError> {
        info!(
            successes = report.metadata.success_count,
            failures = report.metadata.failure_count,
            "Requesting result analysis"
        );
        let content = self.complete(prompts::result_analysis(report)).await?;

        let outcome = parser::parse_analysis(&content);
        if let AnalysisOutcome::Invalid { error, .. } = &outcome {
            warn!(%error, "Analysis reply did not match the expected schema");
        }
        Ok(outcome)
    }
}
