use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::AgentError;

/// Lifecycle of a planned step. Only moves forward:
/// `Pending -> Running -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
        )
    }
}

/// How a step names the element it acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementTarget {
    Index(usize),
    /// A resolvable path as recorded in the snapshot.
    Path(String),
}

impl fmt::Display for ElementTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementTarget::Index(index) => write!(f, "#{index}"),
            ElementTarget::Path(path) => write!(f, "'{path}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollTarget {
    Percent(u8),
    Top,
    Bottom,
    Text { text: String, occurrence: usize },
}

/// One closed action type per variant, each with exactly the fields it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    Navigate { url: String },
    Click { target: ElementTarget },
    Fill { target: ElementTarget, text: String },
    Extract { target: ElementTarget },
    DropdownOptions { target: ElementTarget },
    SelectOption { target: ElementTarget, option: String },
    Scroll { to: ScrollTarget },
    SendKeys { keys: String },
    Wait { seconds: f64 },
    Analyze,
    Screenshot,
    /// A step type the planner produced that this agent does not know.
    Unsupported { kind: String },
}

impl StepAction {
    pub fn name(&self) -> &str {
        match self {
            StepAction::Navigate { .. } => "navigate",
            StepAction::Click { .. } => "click",
            StepAction::Fill { .. } => "fill",
            StepAction::Extract { .. } => "extract",
            StepAction::DropdownOptions { .. } => "dropdown_options",
            StepAction::SelectOption { .. } => "select",
            StepAction::Scroll { .. } => "scroll",
            StepAction::SendKeys { .. } => "send_keys",
            StepAction::Wait { .. } => "wait",
            StepAction::Analyze => "analyze",
            StepAction::Screenshot => "screenshot",
            StepAction::Unsupported { kind } => kind,
        }
    }

    pub fn target(&self) -> Option<&ElementTarget> {
        match self {
            StepAction::Click { target }
            | StepAction::Fill { target, .. }
            | StepAction::Extract { target }
            | StepAction::DropdownOptions { target }
            | StepAction::SelectOption { target, .. } => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub action: StepAction,
    pub description: String,
    pub timeout_ms: Option<u64>,
    pub status: StepStatus,
}

impl TaskStep {
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            action,
            description: String::new(),
            timeout_ms: None,
            status: StepStatus::Pending,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn start(&mut self) -> Result<(), AgentError> {
        self.transition(StepStatus::Running)
    }

    pub fn complete(&mut self) -> Result<(), AgentError> {
        self.transition(StepStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<(), AgentError> {
        self.transition(StepStatus::Failed)
    }

    fn transition(&mut self, next: StepStatus) -> Result<(), AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// One-line human description used in prompts and logs.
    pub fn summary(&self) -> String {
        let head = match &self.action {
            StepAction::Navigate { url } => format!("navigate {url}"),
            StepAction::Click { target } => format!("click {target}"),
            StepAction::Fill { target, text } => format!("fill {target} with \"{text}\""),
            StepAction::Extract { target } => format!("extract {target}"),
            StepAction::DropdownOptions { target } => format!("list options of {target}"),
            StepAction::SelectOption { target, option } => {
                format!("select \"{option}\" in {target}")
            }
            StepAction::Scroll { to } => match to {
                ScrollTarget::Percent(p) => format!("scroll to {p}%"),
                ScrollTarget::Top => "scroll to top".to_string(),
                ScrollTarget::Bottom => "scroll to bottom".to_string(),
                ScrollTarget::Text { text, occurrence } => {
                    format!("scroll to \"{text}\" (occurrence {occurrence})")
                }
            },
            StepAction::SendKeys { keys } => format!("send keys {keys}"),
            StepAction::Wait { seconds } => format!("wait {seconds}s"),
            StepAction::Analyze => "analyze page".to_string(),
            StepAction::Screenshot => "take screenshot".to_string(),
            StepAction::Unsupported { kind } => format!("unsupported step '{kind}'"),
        };
        if self.description.is_empty() {
            head
        } else {
            format!("{head} ({})", self.description)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Proposed,
    Executing,
    Finished,
}

/// The planner's proposal for the current iteration. No steps means done.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: String,
    pub steps: Vec<TaskStep>,
    pub reasoning: Option<String>,
    pub estimated_duration_ms: u64,
    pub status: PlanStatus,
}

impl TaskPlan {
    pub fn new(steps: Vec<TaskStep>) -> Self {
        let estimated_duration_ms = steps.iter().filter_map(|s| s.timeout_ms).sum();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            steps,
            reasoning: None,
            estimated_duration_ms,
            status: PlanStatus::Proposed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of one action registry call. `success == false` always carries a
/// non-empty `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub include_in_memory: bool,
    pub attempts: u32,
}

impl ActionResult {
    pub fn ok(payload: Option<Value>) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            trace: None,
            include_in_memory: true,
            attempts: 1,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "action failed without a message".to_string();
        }
        Self {
            success: false,
            payload: None,
            error: Some(error),
            trace: None,
            include_in_memory: true,
            attempts: 1,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn excluded_from_memory(mut self) -> Self {
        self.include_in_memory = false;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Payload as plain text, if it is a string.
    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Value::as_str)
    }
}
