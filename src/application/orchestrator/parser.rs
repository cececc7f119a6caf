use serde_json::Value;

use super::{Analysis, AnalysisOutcome, PlanOutcome};
use crate::domain::plan::Plan;

pub(super) fn parse_plan(content: &str) -> PlanOutcome {
    let Some(value) = extract_json(content) else {
        return PlanOutcome::Invalid {
            error: "Invalid plan response".to_string(),
            raw_response: content.to_string(),
        };
    };

    match Plan::from_value(&value) {
        Ok(plan) => PlanOutcome::Plan(plan),
        Err(err) => PlanOutcome::Invalid {
            error: format!("Invalid plan response: {err}"),
            raw_response: content.to_string(),
        },
    }
}

pub(super) fn parse_analysis(content: &str) -> AnalysisOutcome {
    let Some(value) = extract_json(content) else {
        return AnalysisOutcome::Invalid {
            error: "Invalid analysis response".to_string(),
            raw_response: content.to_string(),
        };
    };

    let Some(object) = value.as_object() else {
        return AnalysisOutcome::Invalid {
            error: "Invalid analysis response: not a JSON object".to_string(),
            raw_response: content.to_string(),
        };
    };

    AnalysisOutcome::Analysis(Analysis {
        findings: string_list(object.get("findings")),
        recommendations: string_list(object.get("recommendations")),
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Pull a JSON object out of a model reply. Models wrap JSON in prose and
/// code fences often enough that plain `from_str` is not sufficient.
fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let stripped = trimmed.trim_start_matches("```json");
        let stripped = stripped.trim_start_matches("```JSON");
        let stripped = stripped.trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            let slice = &stripped[..end];
            if let Ok(value) = serde_json::from_str::<Value>(slice.trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let candidate = &trimmed[start..=end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}
