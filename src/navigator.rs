use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::actions::{ActionRegistry, ActionRequest, ExecOptions};
use crate::config::AgentConfig;
use crate::dom::truncate_chars;
use crate::driver::PageDriver;
use crate::error::AgentError;
use crate::memory::{AgentMemory, MemoryKind, TurnRole};
use crate::types::{ActionResult, ElementTarget, ScrollTarget, StepAction, TaskStep};

enum Unmapped {
    /// The step type has no registry entry.
    Unknown(String),
    /// The step names an element that the current snapshot does not have.
    Unresolved(String),
}

/// Maps planned steps onto registry calls and records every outcome.
pub struct Navigator {
    registry: ActionRegistry,
    payload_limit: usize,
}

impl Navigator {
    pub fn new(registry: ActionRegistry, config: &AgentConfig) -> Self {
        Self {
            registry,
            payload_limit: config.memory.payload_limit,
        }
    }

    /// Execute one step. Action failures come back as a failed
    /// [`ActionResult`]; only an unknown step type is an error. Either way
    /// the outcome is in `memory` before this returns.
    pub async fn execute(
        &self,
        step: &TaskStep,
        driver: &mut PageDriver,
        memory: &mut AgentMemory,
        cancel: &CancellationToken,
    ) -> Result<ActionResult, AgentError> {
        let request = match map_step(step, driver).await {
            Ok(request) => request,
            Err(Unmapped::Unknown(kind)) => {
                let err = AgentError::UnknownStepType(kind);
                warn!(step = %step.id, error = %err, "step rejected");
                self.record(step, &ActionResult::failure(err.to_string()), memory);
                return Err(err);
            }
            Err(Unmapped::Unresolved(reason)) => {
                let result = ActionResult::failure(reason);
                self.record(step, &result, memory);
                return Ok(result);
            }
        };

        debug!(step = %step.id, action = request.kind().name(), "dispatching");
        let options = ExecOptions {
            timeout: step.timeout(),
            cancel: Some(cancel.clone()),
        };
        let result = self.registry.execute(driver, &request, &options).await;
        self.record(step, &result, memory);
        Ok(result)
    }

    fn record(&self, step: &TaskStep, result: &ActionResult, memory: &mut AgentMemory) {
        let mut entry = json!({
            "step": step.summary(),
            "type": step.action.name(),
            "success": result.success,
            "attempts": result.attempts,
        });
        if let Some(error) = &result.error {
            entry["error"] = json!(error);
        }
        if let Some(trace) = &result.trace {
            entry["trace"] = json!(trace);
        }
        if result.include_in_memory {
            if let Some(payload) = &result.payload {
                entry["payload"] = self.clip(payload);
            }
        }
        memory.remember(format!("result:{}", step.id), entry, MemoryKind::Result);

        let observation = match (&result.error, &result.trace) {
            (Some(error), _) => format!("{} failed: {error}", step.summary()),
            (None, Some(trace)) => format!("{} ok: {trace}", step.summary()),
            (None, None) => format!("{} ok", step.summary()),
        };
        memory.append_turn(TurnRole::Observation, observation);
    }

    fn clip(&self, payload: &Value) -> Value {
        match payload {
            Value::String(text) => json!(truncate_chars(text, self.payload_limit)),
            other => {
                let text = other.to_string();
                if text.chars().count() <= self.payload_limit {
                    other.clone()
                } else {
                    json!(truncate_chars(&text, self.payload_limit))
                }
            }
        }
    }
}

async fn map_step(step: &TaskStep, driver: &mut PageDriver) -> Result<ActionRequest, Unmapped> {
    let request = match &step.action {
        StepAction::Navigate { url } => ActionRequest::Navigate { url: url.clone() },
        StepAction::Click { target } => ActionRequest::ClickElement {
            index: resolve(target, driver).await?,
        },
        StepAction::Fill { target, text } => ActionRequest::InputText {
            index: resolve(target, driver).await?,
            text: text.clone(),
        },
        StepAction::Extract { target } => ActionRequest::ExtractText {
            index: resolve(target, driver).await?,
        },
        StepAction::DropdownOptions { target } => ActionRequest::GetDropdownOptions {
            index: resolve(target, driver).await?,
        },
        StepAction::SelectOption { target, option } => ActionRequest::SelectDropdownOption {
            index: resolve(target, driver).await?,
            option: option.clone(),
        },
        StepAction::Scroll { to } => match to {
            ScrollTarget::Percent(percent) => ActionRequest::ScrollToPercent { percent: *percent },
            ScrollTarget::Top => ActionRequest::ScrollToTop,
            ScrollTarget::Bottom => ActionRequest::ScrollToBottom,
            ScrollTarget::Text { text, occurrence } => ActionRequest::ScrollToText {
                text: text.clone(),
                occurrence: *occurrence,
            },
        },
        StepAction::SendKeys { keys } => ActionRequest::SendKeys { keys: keys.clone() },
        StepAction::Wait { seconds } => ActionRequest::Wait { seconds: *seconds },
        StepAction::Analyze => ActionRequest::AnalyzePage,
        StepAction::Screenshot => ActionRequest::TakeScreenshot,
        StepAction::Unsupported { kind } => return Err(Unmapped::Unknown(kind.clone())),
    };
    Ok(request)
}

/// Indices pass through untouched so that staleness is judged by the
/// driver; paths are matched exactly against the current snapshot.
async fn resolve(target: &ElementTarget, driver: &mut PageDriver) -> Result<usize, Unmapped> {
    match target {
        ElementTarget::Index(index) => Ok(*index),
        ElementTarget::Path(path) => {
            let snapshot = driver
                .current_snapshot()
                .await
                .map_err(|e| Unmapped::Unresolved(format!("could not index page to resolve '{path}': {e}")))?;
            snapshot
                .find_by_path(path)
                .map(|record| record.index)
                .ok_or_else(|| {
                    Unmapped::Unresolved(format!(
                        "no element matches '{path}' in snapshot {}",
                        snapshot.pass
                    ))
                })
        }
    }
}
