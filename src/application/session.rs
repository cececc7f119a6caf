use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::capability::{self, CapabilityClient, DiscoveryError};
use super::executor;
use super::orchestrator::{AnalysisOutcome, Orchestrator, PlanOutcome};
use crate::domain::report::ExecutionReport;
use crate::infrastructure::model::{ModelError, ModelProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Active,
    Closed,
}

/// Everything recorded for one processed query.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub id: Uuid,
    pub query: String,
    pub plan: PlanOutcome,
    pub results: Option<ExecutionReport>,
    pub analysis: Option<AnalysisOutcome>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub active: bool,
    pub current_query: Option<String>,
    pub query_count: usize,
    pub latest_query: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not active")]
    NotActive,
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NotActive => {
                "The session is not active. Restart the console to reconnect.".to_string()
            }
            SessionError::Discovery(err) => {
                format!("Could not reach the capability server: {err}")
            }
            SessionError::Model(err) => err.user_message(),
        }
    }
}

/// Owns one capability client and one orchestrator, and processes one query
/// at a time: discovery, planning, execution, analysis, in that order.
///
/// States move `Uninitialized → Initializing → Active → Closed`; a failed
/// initialization falls back to `Uninitialized` and is not retried here.
pub struct Session<P: ModelProvider> {
    client: Arc<dyn CapabilityClient>,
    orchestrator: Orchestrator<P>,
    state: SessionState,
    current_query: Option<String>,
    records: HashMap<String, QueryRecord>,
    capability_overview: Option<String>,
}

impl<P: ModelProvider> Session<P> {
    pub fn new(client: Arc<dyn CapabilityClient>, orchestrator: Orchestrator<P>) -> Self {
        Self {
            client,
            orchestrator,
            state: SessionState::Uninitialized,
            current_query: None,
            records: HashMap::new(),
            capability_overview: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// First discovery pass plus a one-time capability overview from the
    /// reasoning service. Any failure here is fatal to the session.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Initializing;
        info!("Initializing research session");

        let result = async {
            let capabilities = capability::discover(self.client.as_ref()).await?;
            if capabilities.is_empty() {
                warn!("Capability server exposed no tools, resources, or prompts");
            }
            let overview = self.orchestrator.analyze_capabilities(&capabilities).await?;
            Ok::<String, SessionError>(overview)
        }
        .await;

        match result {
            Ok(overview) => {
                info!("Capability analysis complete");
                self.capability_overview = Some(overview);
                self.state = SessionState::Active;
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Uninitialized;
                Err(err)
            }
        }
    }

    pub fn capability_overview(&self) -> Option<&str> {
        self.capability_overview.as_deref()
    }

    /// Process one query end to end.
    ///
    /// Discovery, planning, and analysis failures propagate. Step failures do
    /// not: they are absorbed into the execution report. A planner reply that
    /// fails to parse skips execution and analysis but still yields a record,
    /// carrying the raw reply for diagnosis.
    pub async fn process_query(&mut self, query: &str) -> Result<QueryRecord, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        self.current_query = Some(query.to_string());

        // Capabilities are refreshed wholesale for every query; servers may
        // change their tool set between queries.
        let capabilities = capability::discover(self.client.as_ref()).await?;
        let plan_outcome = self.orchestrator.plan_research(query, &capabilities).await?;

        let record = match plan_outcome {
            PlanOutcome::Plan(plan) => {
                let report = executor::execute(&plan, self.client.as_ref()).await;
                let analysis = self.orchestrator.analyze_results(&report).await?;
                QueryRecord {
                    id: Uuid::new_v4(),
                    query: query.to_string(),
                    plan: PlanOutcome::Plan(plan),
                    timestamp: report.metadata.started_at,
                    results: Some(report),
                    analysis: Some(analysis),
                }
            }
            invalid => {
                warn!("Skipping execution: planner reply was not a usable plan");
                QueryRecord {
                    id: Uuid::new_v4(),
                    query: query.to_string(),
                    plan: invalid,
                    results: None,
                    analysis: None,
                    timestamp: Utc::now(),
                }
            }
        };

        self.records.insert(query.to_string(), record.clone());
        Ok(record)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            active: self.state == SessionState::Active,
            current_query: self.current_query.clone(),
            query_count: self.records.len(),
            latest_query: self.records.values().map(|r| r.timestamp).max(),
        }
    }

    pub fn close(&mut self) {
        info!("Closing research session");
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::capability::CapabilityError;
    use crate::domain::capability::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
    use crate::domain::report::StepStatus;
    use crate::infrastructure::model::{ModelRequest, ModelResponse};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio::sync::Mutex;

    struct StubServer {
        fail_tools_listing: bool,
    }

    #[async_trait]
    impl CapabilityClient for StubServer {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CapabilityError> {
            if self.fail_tools_listing {
                return Err(CapabilityError::Terminated);
            }
            Ok(vec![ToolDescriptor {
                name: "search".into(),
                description: None,
                input_schema: None,
            }])
        }

        async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, CapabilityError> {
            Ok(Vec::new())
        }

        async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, CapabilityError> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, name: &str, _: Value) -> Result<Value, CapabilityError> {
            Ok(json!({ "called": name }))
        }

        async fn read_resource(&self, uri: &str) -> Result<Value, CapabilityError> {
            Ok(json!({ "uri": uri }))
        }

        async fn get_prompt(&self, name: &str, _: Value) -> Result<Value, CapabilityError> {
            Ok(json!({ "prompt": name }))
        }
    }

    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn complete(&self, _: ModelRequest) -> Result<ModelResponse, ModelError> {
            let mut responses = self.responses.lock().await;
            Ok(ModelResponse {
                content: responses.remove(0),
            })
        }
    }

    fn session_with(
        server: StubServer,
        responses: Vec<&str>,
    ) -> Session<ScriptedProvider> {
        Session::new(
            Arc::new(server),
            Orchestrator::new(ScriptedProvider::new(responses), "claude-3-opus-20240229"),
        )
    }

    #[tokio::test]
    async fn query_flows_through_plan_execute_analyze() {
        let mut session = session_with(
            StubServer {
                fail_tools_listing: false,
            },
            vec![
                "capability overview",
                r#"{"steps": [{"type": "tool", "name": "search", "parameters": {"q": "x"}}]}"#,
                r#"{"findings": ["found it"], "recommendations": []}"#,
            ],
        );

        session.initialize().await.expect("initialization succeeds");
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.capability_overview(), Some("capability overview"));

        let record = session
            .process_query("what is x?")
            .await
            .expect("query succeeds");

        let report = record.results.expect("execution ran");
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].status, StepStatus::Completed);
        match record.analysis.expect("analysis ran") {
            AnalysisOutcome::Analysis(analysis) => {
                assert_eq!(analysis.findings, vec!["found it".to_string()]);
            }
            other => panic!("unexpected analysis: {other:?}"),
        }

        let summary = session.summary();
        assert!(summary.active);
        assert_eq!(summary.query_count, 1);
        assert_eq!(summary.current_query.as_deref(), Some("what is x?"));
        assert!(summary.latest_query.is_some());
    }

    #[tokio::test]
    async fn unparseable_plan_skips_execution_but_returns_a_record() {
        let mut session = session_with(
            StubServer {
                fail_tools_listing: false,
            },
            vec!["overview", "no JSON here, just prose"],
        );

        session.initialize().await.expect("initialization succeeds");
        let record = session
            .process_query("anything")
            .await
            .expect("query itself still succeeds");

        assert!(record.results.is_none());
        assert!(record.analysis.is_none());
        assert!(matches!(record.plan, PlanOutcome::Invalid { ref raw_response, .. }
            if raw_response.contains("prose")));
    }

    #[tokio::test]
    async fn query_before_initialize_is_rejected() {
        let mut session = session_with(
            StubServer {
                fail_tools_listing: false,
            },
            vec![],
        );

        let err = session.process_query("q").await.expect_err("not active");
        assert!(matches!(err, SessionError::NotActive));
    }

    #[tokio::test]
    async fn failed_initialization_returns_to_uninitialized() {
        let mut session = session_with(
            StubServer {
                fail_tools_listing: true,
            },
            vec![],
        );

        let err = session.initialize().await.expect_err("discovery fails");
        assert!(matches!(err, SessionError::Discovery(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn closed_session_rejects_queries() {
        let mut session = session_with(
            StubServer {
                fail_tools_listing: false,
            },
            vec!["overview"],
        );
        session.initialize().await.expect("initialization succeeds");
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.process_query("q").await.is_err());
    }
}
