use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::capability::{CapabilityClient, CapabilityError};
use crate::domain::plan::{Plan, StepAction};
use crate::domain::report::{ExecutionReport, StepResult, StepStatus};

#[derive(Debug, Error)]
enum StepError {
    #[error("unrecognized step action: {0}")]
    UnknownAction(String),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Execute a plan best-effort, one step at a time, in input order.
///
/// A failing step never stops the steps after it; its error is absorbed into
/// the step result. A step with a declared fallback gets exactly one more
/// dispatch after its primary call fails. Whether the plan as a whole is
/// useful is the caller's judgement, not the executor's.
pub async fn execute(plan: &Plan, client: &dyn CapabilityClient) -> ExecutionReport {
    let mut report = ExecutionReport::begin();
    info!(steps = plan.steps.len(), "Executing research plan");

    for (index, step) in plan.steps.iter().enumerate() {
        let mut result = StepResult::begin(step.clone());
        match dispatch(&step.action, client).await {
            Ok(data) => {
                debug!(step = index, action = %step.action.label(), "Step completed");
                result.status = StepStatus::Completed;
                result.data = Some(data);
            }
            Err(err) => {
                warn!(step = index, action = %step.action.label(), %err, "Step failed");
                result.status = StepStatus::Failed;
                result.error = Some(err.to_string());

                if let Some(fallback) = &step.fallback {
                    match dispatch(&fallback.action, client).await {
                        Ok(data) => {
                            info!(
                                step = index,
                                action = %fallback.action.label(),
                                "Fallback recovered failed step"
                            );
                            result.status = StepStatus::CompletedWithFallback;
                            result.fallback_data = Some(data);
                        }
                        Err(fallback_err) => {
                            warn!(
                                step = index,
                                action = %fallback.action.label(),
                                %fallback_err,
                                "Fallback failed as well"
                            );
                            result.fallback_error = Some(fallback_err.to_string());
                        }
                    }
                }
            }
        }

        result.finished_at = Some(Utc::now());
        report.record(result);
    }

    report.finish();
    info!(
        successes = report.metadata.success_count,
        failures = report.metadata.failure_count,
        "Plan execution finished"
    );
    report
}

async fn dispatch(action: &StepAction, client: &dyn CapabilityClient) -> Result<Value, StepError> {
    match action {
        StepAction::Tool { name, parameters } => {
            Ok(client.call_tool(name, parameters.clone()).await?)
        }
        StepAction::Resource { uri } => Ok(client.read_resource(uri).await?),
        StepAction::Prompt { name, arguments } => {
            Ok(client.get_prompt(name, arguments.clone()).await?)
        }
        StepAction::Unrecognized { kind } => Err(StepError::UnknownAction(kind.clone())),
    }
}
