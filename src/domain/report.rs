use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::plan::PlanStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    CompletedWithFallback,
}

/// Outcome of one executed step. Mutable while the executor works on it,
/// immutable once recorded into the report.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: PlanStep,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_error: Option<String>,
}

impl StepResult {
    pub fn begin(step: PlanStep) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            data: None,
            error: None,
            fallback_data: None,
            fallback_error: None,
        }
    }

    /// The payload this step ultimately produced, primary result first.
    pub fn payload(&self) -> Option<&Value> {
        self.data.as_ref().or(self.fallback_data.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success_count: usize,
    /// Counts primary-level failures. A step recovered by its fallback
    /// (`CompletedWithFallback`) still counts here: the primary call failed,
    /// even though recovered data lands in `ExecutionReport::data`.
    pub failure_count: usize,
}

/// Aggregated record of one plan execution. Append-only; never persisted.
///
/// Invariant: once execution completes,
/// `success_count + failure_count == steps.len()`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub steps: Vec<StepResult>,
    pub data: Vec<Value>,
    pub metadata: ReportMetadata,
}

impl ExecutionReport {
    pub fn begin() -> Self {
        Self {
            steps: Vec::new(),
            data: Vec::new(),
            metadata: ReportMetadata {
                started_at: Utc::now(),
                finished_at: None,
                success_count: 0,
                failure_count: 0,
            },
        }
    }

    /// Append a finished step, keeping the counters and the data sequence in
    /// step with it.
    pub fn record(&mut self, result: StepResult) {
        match result.status {
            StepStatus::Completed => self.metadata.success_count += 1,
            _ => self.metadata.failure_count += 1,
        }
        if let Some(payload) = result.payload() {
            self.data.push(payload.clone());
        }
        self.steps.push(result);
    }

    pub fn finish(&mut self) {
        self.metadata.finished_at = Some(Utc::now());
    }

    pub fn all_failed(&self) -> bool {
        !self.steps.is_empty() && self.metadata.success_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::StepAction;
    use serde_json::json;

    fn step(name: &str) -> PlanStep {
        PlanStep::new(StepAction::Tool {
            name: name.into(),
            parameters: json!({}),
        })
    }

    #[test]
    fn counters_track_recorded_statuses() {
        let mut report = ExecutionReport::begin();

        let mut ok = StepResult::begin(step("a"));
        ok.status = StepStatus::Completed;
        ok.data = Some(json!("payload"));
        report.record(ok);

        let mut recovered = StepResult::begin(step("b"));
        recovered.status = StepStatus::CompletedWithFallback;
        recovered.fallback_data = Some(json!("rescued"));
        report.record(recovered);

        let mut failed = StepResult::begin(step("c"));
        failed.status = StepStatus::Failed;
        failed.error = Some("boom".into());
        report.record(failed);

        report.finish();

        assert_eq!(report.metadata.success_count, 1);
        assert_eq!(report.metadata.failure_count, 2);
        assert_eq!(
            report.metadata.success_count + report.metadata.failure_count,
            report.steps.len()
        );
        assert_eq!(report.data, vec![json!("payload"), json!("rescued")]);
        assert!(report.metadata.finished_at.is_some());
    }

    #[test]
    fn payload_prefers_primary_data() {
        let mut result = StepResult::begin(step("a"));
        result.data = Some(json!(1));
        result.fallback_data = Some(json!(2));
        assert_eq!(result.payload(), Some(&json!(1)));
    }
}
