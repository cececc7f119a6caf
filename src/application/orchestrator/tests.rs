use super::*;
use crate::domain::capability::{CapabilitySet, ToolDescriptor};
use crate::domain::plan::{Plan, PlanStep, StepAction};
use crate::domain::report::{ExecutionReport, StepResult, StepStatus};
use crate::infrastructure::model::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
struct ScriptedProvider {
    responses: Arc<Mutex<Vec<String>>>,
    recordings: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(String::from).collect(),
            )),
            recordings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.recordings.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let mut responses = self.responses.lock().await;
        let content = responses.remove(0);
        self.recordings.lock().await.push(request);
        Ok(ModelResponse { content })
    }
}

fn search_capabilities() -> CapabilitySet {
    CapabilitySet {
        tools: vec![ToolDescriptor {
            name: "tavily-search".into(),
            description: Some("Web search".into()),
            input_schema: None,
        }],
        resources: Vec::new(),
        prompts: Vec::new(),
    }
}

#[tokio::test]
async fn plan_request_embeds_query_and_capabilities() {
    let provider = ScriptedProvider::new(vec![r#"{"steps": []}"#]);
    let orchestrator = Orchestrator::new(provider.clone(), "claude-3-opus-20240229");

    let outcome = orchestrator
        .plan_research("rust adoption trends", &search_capabilities())
        .await
        .expect("provider call succeeds");

    assert_eq!(outcome, PlanOutcome::Plan(Plan::default()));

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 1);
    let prompt = &requests[0].messages[0].content;
    assert!(prompt.contains("rust adoption trends"));
    assert!(prompt.contains("tavily-search"));
}

#[tokio::test]
async fn plan_reply_in_code_fence_parses() {
    let provider = ScriptedProvider::new(vec![
        "```json\n{\"steps\": [{\"type\": \"tool\", \"name\": \"tavily-search\", \"parameters\": {\"query\": \"x\"}}]}\n```",
    ]);
    let orchestrator = Orchestrator::new(provider, "claude-3-opus-20240229");

    let outcome = orchestrator
        .plan_research("q", &search_capabilities())
        .await
        .expect("provider call succeeds");

    match outcome {
        PlanOutcome::Plan(plan) => {
            assert_eq!(plan.steps.len(), 1);
            assert_eq!(
                plan.steps[0].action,
                StepAction::Tool {
                    name: "tavily-search".into(),
                    parameters: json!({ "query": "x" }),
                }
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_plan_reply_is_reported_not_raised() {
    let provider = ScriptedProvider::new(vec!["I would start by searching the web."]);
    let orchestrator = Orchestrator::new(provider, "claude-3-opus-20240229");

    let outcome = orchestrator
        .plan_research("q", &search_capabilities())
        .await
        .expect("provider call still succeeds");

    assert_eq!(
        outcome,
        PlanOutcome::Invalid {
            error: "Invalid plan response".into(),
            raw_response: "I would start by searching the web.".into(),
        }
    );
}

#[tokio::test]
async fn plan_reply_without_steps_array_is_invalid() {
    let provider = ScriptedProvider::new(vec![r#"{"actions": []}"#]);
    let orchestrator = Orchestrator::new(provider, "claude-3-opus-20240229");

    let outcome = orchestrator
        .plan_research("q", &search_capabilities())
        .await
        .expect("provider call succeeds");

    assert!(matches!(
        outcome,
        PlanOutcome::Invalid { ref error, .. } if error.contains("steps")
    ));
}

#[tokio::test]
async fn analysis_reply_parses_findings_and_recommendations() {
    let provider = ScriptedProvider::new(vec![
        r#"{"findings": ["rust is growing"], "recommendations": ["check crates.io stats"]}"#,
    ]);
    let orchestrator = Orchestrator::new(provider, "claude-3-opus-20240229");

    let outcome = orchestrator
        .analyze_results(&completed_report())
        .await
        .expect("provider call succeeds");

    assert_eq!(
        outcome,
        AnalysisOutcome::Analysis(Analysis {
            findings: vec!["rust is growing".into()],
            recommendations: vec!["check crates.io stats".into()],
        })
    );
}

#[tokio::test]
async fn malformed_analysis_reply_is_reported_not_raised() {
    let provider = ScriptedProvider::new(vec!["The results look promising."]);
    let orchestrator = Orchestrator::new(provider, "claude-3-opus-20240229");

    let outcome = orchestrator
        .analyze_results(&completed_report())
        .await
        .expect("provider call succeeds");

    assert!(matches!(outcome, AnalysisOutcome::Invalid { ref raw_response, .. }
        if raw_response == "The results look promising."));
}

#[tokio::test]
async fn capability_overview_uses_configured_max_tokens() {
    let provider = ScriptedProvider::new(vec!["These tools support web research."]);
    let orchestrator =
        Orchestrator::new(provider.clone(), "claude-3-opus-20240229").with_max_tokens(512);

    let overview = orchestrator
        .analyze_capabilities(&search_capabilities())
        .await
        .expect("provider call succeeds");

    assert_eq!(overview, "These tools support web research.");
    assert_eq!(provider.requests().await[0].max_tokens, 512);
}

fn completed_report() -> ExecutionReport {
    let mut report = ExecutionReport::begin();
    let mut result = StepResult::begin(PlanStep::new(StepAction::Tool {
        name: "tavily-search".into(),
        parameters: json!({ "query": "rust" }),
    }));
    result.status = StepStatus::Completed;
    result.data = Some(json!({ "hits": 3 }));
    report.record(result);
    report.finish();
    report
}
