use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// What a single plan step asks the capability server to do.
///
/// The variant set is closed on purpose: anything the planner emits that does
/// not match one of the three capability kinds lands in `Unrecognized`, which
/// the executor turns into a step-level failure instead of a crash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepAction {
    Tool { name: String, parameters: Value },
    Resource { uri: String },
    Prompt { name: String, arguments: Value },
    Unrecognized { kind: String },
}

impl StepAction {
    /// Short label for logs and rendered reports.
    pub fn label(&self) -> String {
        match self {
            StepAction::Tool { name, .. } => format!("tool:{name}"),
            StepAction::Resource { uri } => format!("resource:{uri}"),
            StepAction::Prompt { name, .. } => format!("prompt:{name}"),
            StepAction::Unrecognized { kind } => format!("unrecognized:{kind}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<PlanStep>>,
}

impl PlanStep {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: PlanStep) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

/// The planner reply parsed as JSON but did not carry the expected shape.
#[derive(Debug, Error, PartialEq)]
pub enum PlanFormatError {
    #[error("plan is not a JSON object")]
    NotAnObject,
    #[error("plan is missing a 'steps' array")]
    MissingSteps,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    /// Validate a planner reply at the boundary.
    ///
    /// The top-level shape (`{"steps": [...]}`) is mandatory; anything else is
    /// a format error the caller reports alongside the raw reply. Individual
    /// steps are parsed tolerantly: a step with a missing or unknown `type`
    /// becomes `StepAction::Unrecognized` so the executor can surface it as a
    /// failed step without aborting the rest of the plan.
    pub fn from_value(value: &Value) -> Result<Self, PlanFormatError> {
        let object = value.as_object().ok_or(PlanFormatError::NotAnObject)?;
        let steps = object
            .get("steps")
            .and_then(Value::as_array)
            .ok_or(PlanFormatError::MissingSteps)?;

        Ok(Self {
            steps: steps
                .iter()
                .map(|entry| parse_step(entry, true))
                .collect(),
        })
    }
}

fn parse_step(value: &Value, allow_fallback: bool) -> PlanStep {
    let Some(object) = value.as_object() else {
        return PlanStep::new(StepAction::Unrecognized {
            kind: "step is not a JSON object".to_string(),
        });
    };

    let action = match object.get("type").and_then(Value::as_str) {
        Some(kind) => parse_action(kind, value),
        None => StepAction::Unrecognized {
            kind: "missing 'type' field".to_string(),
        },
    };

    // Fallbacks are single-level: a fallback's own fallback is ignored.
    let fallback = if allow_fallback {
        object
            .get("fallback")
            .filter(|entry| !entry.is_null())
            .map(|entry| Box::new(parse_step(entry, false)))
    } else {
        None
    };

    PlanStep { action, fallback }
}

fn parse_action(kind: &str, value: &Value) -> StepAction {
    match kind.to_ascii_lowercase().as_str() {
        "tool" => match value.get("name").and_then(Value::as_str) {
            Some(name) => StepAction::Tool {
                name: name.to_string(),
                parameters: step_arguments(value, "parameters"),
            },
            None => StepAction::Unrecognized {
                kind: "tool step without a 'name'".to_string(),
            },
        },
        "resource" => match value.get("uri").and_then(Value::as_str) {
            Some(uri) => StepAction::Resource {
                uri: uri.to_string(),
            },
            None => StepAction::Unrecognized {
                kind: "resource step without a 'uri'".to_string(),
            },
        },
        "prompt" => match value.get("name").and_then(Value::as_str) {
            Some(name) => StepAction::Prompt {
                name: name.to_string(),
                arguments: step_arguments(value, "arguments"),
            },
            None => StepAction::Unrecognized {
                kind: "prompt step without a 'name'".to_string(),
            },
        },
        other => StepAction::Unrecognized {
            kind: format!("unknown step type '{other}'"),
        },
    }
}

/// Planners are inconsistent about `parameters` vs `arguments`; accept either,
/// preferring the canonical key for the step kind.
fn step_arguments(value: &Value, preferred: &str) -> Value {
    let alternate = if preferred == "parameters" {
        "arguments"
    } else {
        "parameters"
    };
    value
        .get(preferred)
        .or_else(|| value.get(alternate))
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_the_three_step_kinds() {
        let plan = Plan::from_value(&json!({
            "steps": [
                { "type": "tool", "name": "search", "parameters": { "q": "rust" } },
                { "type": "resource", "uri": "docs://guide" },
                { "type": "prompt", "name": "summarize", "arguments": { "style": "brief" } }
            ]
        }))
        .expect("valid plan");

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(
            plan.steps[0].action,
            StepAction::Tool {
                name: "search".into(),
                parameters: json!({ "q": "rust" }),
            }
        );
        assert_eq!(
            plan.steps[1].action,
            StepAction::Resource {
                uri: "docs://guide".into(),
            }
        );
        assert_eq!(
            plan.steps[2].action,
            StepAction::Prompt {
                name: "summarize".into(),
                arguments: json!({ "style": "brief" }),
            }
        );
    }

    #[test]
    fn unknown_type_becomes_unrecognized_not_an_error() {
        let plan = Plan::from_value(&json!({
            "steps": [{ "type": "webhook", "name": "notify" }]
        }))
        .expect("plan shape is valid");

        assert_eq!(
            plan.steps[0].action,
            StepAction::Unrecognized {
                kind: "unknown step type 'webhook'".into(),
            }
        );
    }

    #[test]
    fn missing_type_is_surfaced_per_step() {
        let plan = Plan::from_value(&json!({ "steps": [{ "name": "search" }] })).expect("valid");
        assert!(matches!(
            &plan.steps[0].action,
            StepAction::Unrecognized { kind } if kind.contains("missing 'type'")
        ));
    }

    #[test]
    fn fallback_is_parsed_one_level_deep() {
        let plan = Plan::from_value(&json!({
            "steps": [{
                "type": "tool",
                "name": "primary",
                "fallback": {
                    "type": "tool",
                    "name": "secondary",
                    "fallback": { "type": "tool", "name": "tertiary" }
                }
            }]
        }))
        .expect("valid");

        let fallback = plan.steps[0].fallback.as_ref().expect("fallback present");
        assert_eq!(
            fallback.action,
            StepAction::Tool {
                name: "secondary".into(),
                parameters: json!({}),
            }
        );
        assert!(fallback.fallback.is_none(), "nested fallback is ignored");
    }

    #[test]
    fn missing_steps_array_is_a_format_error() {
        assert_eq!(
            Plan::from_value(&json!({ "actions": [] })),
            Err(PlanFormatError::MissingSteps)
        );
        assert_eq!(
            Plan::from_value(&json!("just text")),
            Err(PlanFormatError::NotAnObject)
        );
    }

    #[test]
    fn accepts_arguments_as_alias_for_parameters() {
        let plan = Plan::from_value(&json!({
            "steps": [{ "type": "tool", "name": "search", "arguments": { "q": "x" } }]
        }))
        .expect("valid");
        assert_eq!(
            plan.steps[0].action,
            StepAction::Tool {
                name: "search".into(),
                parameters: json!({ "q": "x" }),
            }
        );
    }
}
