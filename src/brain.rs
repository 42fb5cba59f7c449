//! Planner: turns the goal plus what the agent has seen so far into the next
//! [`TaskPlan`].

use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::dom::{PageSnapshot, truncate_chars};
use crate::error::AgentError;
use crate::llm::{Completion, CompletionRequest, CompletionService};
use crate::memory::{AgentMemory, MemoryKind, TurnRole};
use crate::types::{ElementTarget, ScrollTarget, StepAction, TaskPlan, TaskStep};

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You control a real Chrome tab by proposing steps as JSON.

Reply with ONE JSON object: {"reasoning": "...", "steps": [ ... ]}
Each step is {"type": ..., "target": ..., "data": ..., "description": "..."}.

Step types:
- {"type":"navigate","target":"https://..."}
- {"type":"click","target":3}
- {"type":"fill","target":3,"data":"text to type"}
- {"type":"extract","target":3}
- {"type":"dropdown_options","target":3}
- {"type":"select","target":3,"data":"option text"}
- {"type":"scroll","data":"50%" | "top" | "bottom" | {"text":"Pricing","occurrence":1}}
- {"type":"send_keys","data":"Enter" | "Control+a Delete"}
- {"type":"wait","data":2}
- {"type":"analyze"}
- {"type":"screenshot"}

Rules:
1. Targets are the [N] element indices from the current page listing. They are only valid for that listing.
2. Only your first step is executed; you will then see the updated page and plan again.
3. Use "description" to say what the step is for, e.g. "submit the search form".
4. If a previous step failed, read its error and try a different approach.
5. When the goal is accomplished, reply with {"steps": []}.
6. Return only JSON. No markdown, no explanation outside the object."#;

const STEP_TYPES: &[&str] = &[
    "navigate",
    "click",
    "fill",
    "extract",
    "dropdown_options",
    "select",
    "scroll",
    "send_keys",
    "wait",
    "analyze",
    "screenshot",
];

/// JSON schema for the structured planning reply.
pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reasoning": {"type": "string"},
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string", "enum": STEP_TYPES},
                        "target": {"type": ["integer", "string", "null"]},
                        "data": {},
                        "description": {"type": "string"},
                        "timeout_ms": {"type": "integer"}
                    },
                    "required": ["type"]
                }
            }
        },
        "required": ["steps"]
    })
}

/// What the planner may look at for one call.
pub struct PlanContext<'a> {
    pub iteration: usize,
    pub snapshot: Option<&'a PageSnapshot>,
    pub memory: &'a mut AgentMemory,
    pub cancel: &'a CancellationToken,
}

pub struct Planner {
    llm: Arc<dyn CompletionService>,
    snapshot_max_chars: usize,
    turn_window: usize,
    result_window: usize,
    stream: bool,
    stream_buffer: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn CompletionService>, config: &AgentConfig) -> Self {
        Self {
            llm,
            snapshot_max_chars: config.snapshot_max_chars,
            turn_window: config.memory.turn_window,
            result_window: config.memory.result_window,
            stream: config.llm.stream,
            stream_buffer: config.llm.stream_buffer,
        }
    }

    pub fn build_prompt(&self, goal: &str, ctx: &PlanContext<'_>) -> String {
        let mut prompt = format!("Goal: {goal}\nIteration: {}\n\n", ctx.iteration);

        prompt.push_str("Current page:\n");
        match ctx.snapshot {
            Some(snapshot) => prompt.push_str(&snapshot.render_for_prompt(self.snapshot_max_chars)),
            None => prompt.push_str("(no indexable page; navigate first)"),
        }
        prompt.push_str("\n\n");

        let results = ctx.memory.recent_by_kind(MemoryKind::Result, self.result_window);
        if !results.is_empty() {
            prompt.push_str("Previous step results (oldest first):\n");
            for entry in results {
                prompt.push_str(&render_result(&entry.value));
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        if let Some(verdict) = ctx.memory.recall_in(MemoryKind::State, "verdict") {
            if verdict.value["valid"] == json!(false) {
                let step = verdict.value["step"].as_str().unwrap_or("step");
                let message = verdict.value["message"].as_str().unwrap_or_default();
                prompt.push_str(&format!("Last step check: {step} is not usable ({message})\n\n"));
            }
        }

        let turns = ctx.memory.recent_turns(self.turn_window);
        if !turns.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for turn in turns {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                    TurnRole::Observation => "observation",
                };
                prompt.push_str(&format!("{role}: {}\n", truncate_chars(&turn.content, 500)));
            }
            prompt.push('\n');
        }

        prompt.push_str("What is the next step? Reply {\"steps\": []} if the goal is already achieved.");
        prompt
    }

    /// Ask for the next plan. The raw reply is logged as an assistant turn
    /// before parsing so that even an unparsable reply is visible next time.
    pub async fn next(&self, goal: &str, ctx: PlanContext<'_>) -> Result<TaskPlan, AgentError> {
        let request = CompletionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt: self.build_prompt(goal, &ctx),
            schema: Some(plan_schema()),
        };
        debug!(iteration = ctx.iteration, chars = request.prompt.len(), "requesting plan");

        let completion = if self.stream {
            Completion::Text(self.streamed(&request, ctx.cancel).await?)
        } else {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(AgentError::Stopped),
                completion = self.llm.complete(&request) => completion?,
            }
        };

        let value = match completion {
            Completion::Structured(value) => {
                ctx.memory.append_turn(TurnRole::Assistant, value.to_string());
                value
            }
            Completion::Text(text) => {
                ctx.memory.append_turn(TurnRole::Assistant, text.clone());
                let json = extract_json(&text)
                    .ok_or_else(|| AgentError::Planning(format!("no JSON in reply: {}", truncate_chars(&text, 200))))?;
                serde_json::from_str(json)
                    .map_err(|e| AgentError::Planning(format!("reply is not valid JSON: {e}")))?
            }
        };

        let plan = plan_from_value(value, ctx.iteration)?;
        info!(iteration = ctx.iteration, steps = plan.steps.len(), "plan received");
        Ok(plan)
    }

    async fn streamed(&self, request: &CompletionRequest, cancel: &CancellationToken) -> Result<String, AgentError> {
        let mut stream = self.llm.stream(request, self.stream_buffer).await?;
        let mut text = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("run stopped while plan was streaming");
                    stream.cancel();
                    return Err(AgentError::Stopped);
                }
                chunk = stream.next_chunk() => match chunk {
                    Some(chunk) => text.push_str(&chunk?),
                    None => break,
                },
            }
        }
        Ok(text)
    }
}

fn render_result(value: &Value) -> String {
    let step = value["step"].as_str().unwrap_or("step");
    if value["success"].as_bool() == Some(true) {
        let mut line = format!("- OK {step}");
        if let Some(trace) = value["trace"].as_str() {
            line.push_str(&format!(" -> {trace}"));
        }
        if let Some(payload) = value.get("payload").filter(|p| !p.is_null()) {
            let text = payload.as_str().map_or_else(|| payload.to_string(), String::from);
            line.push_str(&format!("\n  data: {}", truncate_chars(&text, 300)));
        }
        line
    } else {
        let error = value["error"].as_str().unwrap_or("unknown error");
        format!("- FAILED {step}: {error}")
    }
}

/// Pull the first complete JSON value out of a reply, looking inside a fenced
/// code block when there is one.
pub fn extract_json(raw: &str) -> Option<&str> {
    let body = strip_fences(raw);
    let start = body.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&body[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_fences(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw.trim();
    };
    let inner = raw[open + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    match inner.find("```") {
        Some(close) => inner[..close].trim(),
        None => inner.trim(),
    }
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(rename = "type", alias = "action")]
    kind: String,
    #[serde(default)]
    target: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

pub(crate) fn plan_from_value(value: Value, iteration: usize) -> Result<TaskPlan, AgentError> {
    let single_step = value
        .as_object()
        .is_some_and(|map| !map.contains_key("steps") && map.contains_key("type"));
    let raw: RawPlan = if value.is_array() {
        RawPlan {
            reasoning: None,
            steps: serde_json::from_value(value).map_err(malformed)?,
        }
    } else if single_step {
        RawPlan {
            reasoning: None,
            steps: vec![serde_json::from_value(value).map_err(malformed)?],
        }
    } else if value.is_object() {
        serde_json::from_value(value).map_err(malformed)?
    } else {
        return Err(AgentError::Planning(format!("expected a plan object, got {value}")));
    };

    // Only the first step runs this iteration; later ones are advisory.
    let mut steps = Vec::with_capacity(raw.steps.len());
    for (position, step) in raw.steps.into_iter().enumerate() {
        match into_step(step, iteration, position) {
            Ok(step) => steps.push(step),
            Err(e) if position == 0 => return Err(e),
            Err(e) => debug!(position, error = %e, "dropping malformed later step"),
        }
    }
    let mut plan = TaskPlan::new(steps);
    plan.reasoning = raw.reasoning.filter(|r| !r.trim().is_empty());
    Ok(plan)
}

fn malformed(e: serde_json::Error) -> AgentError {
    AgentError::Planning(format!("malformed plan: {e}"))
}

fn into_step(raw: RawStep, iteration: usize, position: usize) -> Result<TaskStep, AgentError> {
    let kind = raw.kind.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    let action = match kind.as_str() {
        "navigate" | "goto" | "open" => StepAction::Navigate {
            url: first_text(&raw.target, &raw.data)
                .ok_or_else(|| missing(&raw.kind, "a url"))?,
        },
        "click" | "clickelement" => StepAction::Click {
            target: element_target(&raw)?,
        },
        "fill" | "type" | "input" | "inputtext" => StepAction::Fill {
            target: element_target(&raw)?,
            text: raw.data.as_ref().map(value_text).unwrap_or_default(),
        },
        "extract" | "extracttext" => StepAction::Extract {
            target: element_target(&raw)?,
        },
        "dropdown_options" | "getdropdownoptions" | "options" => StepAction::DropdownOptions {
            target: element_target(&raw)?,
        },
        "select" | "select_option" | "selectdropdownoption" => StepAction::SelectOption {
            target: element_target(&raw)?,
            option: raw
                .data
                .as_ref()
                .map(value_text)
                .filter(|o| !o.is_empty())
                .ok_or_else(|| missing(&raw.kind, "an option"))?,
        },
        "scroll" => StepAction::Scroll {
            to: scroll_target(raw.data.as_ref().or(raw.target.as_ref()))
                .ok_or_else(|| missing(&raw.kind, "a scroll position"))?,
        },
        "send_keys" | "sendkeys" | "press" | "press_key" | "keys" => StepAction::SendKeys {
            keys: first_text(&raw.data, &raw.target).ok_or_else(|| missing(&raw.kind, "keys"))?,
        },
        "wait" => StepAction::Wait {
            seconds: raw.data.as_ref().and_then(number).unwrap_or(1.0),
        },
        "analyze" | "analyzepage" => StepAction::Analyze,
        "screenshot" | "takescreenshot" => StepAction::Screenshot,
        _ => StepAction::Unsupported {
            kind: raw.kind.clone(),
        },
    };

    let id = format!("step-{iteration}-{}", position + 1);
    let mut step = TaskStep::new(id, action).with_description(raw.description.unwrap_or_default());
    if let Some(timeout_ms) = raw.timeout_ms.filter(|t| *t > 0) {
        step = step.with_timeout_ms(timeout_ms);
    }
    Ok(step)
}

fn missing(kind: &str, what: &str) -> AgentError {
    AgentError::Planning(format!("step '{kind}' needs {what}"))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn first_text(primary: &Option<Value>, secondary: &Option<Value>) -> Option<String> {
    [primary, secondary]
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().trim_end_matches('s').parse().ok()))
}

fn element_target(raw: &RawStep) -> Result<ElementTarget, AgentError> {
    let target = raw.target.as_ref().ok_or_else(|| missing(&raw.kind, "a target"))?;
    parse_target(target).ok_or_else(|| AgentError::Planning(format!("step '{}' has unusable target {target}", raw.kind)))
}

/// `3`, `"3"` and `"[3]"` are indices; any other non-empty string is a path.
fn parse_target(value: &Value) -> Option<ElementTarget> {
    if let Some(index) = value.as_u64() {
        return usize::try_from(index).ok().map(ElementTarget::Index);
    }
    let text = value.as_str()?.trim();
    let bare = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    if let Ok(index) = bare.parse::<usize>() {
        return Some(ElementTarget::Index(index));
    }
    (!text.is_empty()).then(|| ElementTarget::Path(text.to_string()))
}

fn scroll_target(value: Option<&Value>) -> Option<ScrollTarget> {
    let value = value?;
    if let Some(percent) = value.as_u64() {
        return u8::try_from(percent).ok().map(ScrollTarget::Percent);
    }
    if let Some(text) = value.as_str() {
        let text = text.trim();
        return match text.to_ascii_lowercase().as_str() {
            "" => None,
            "top" => Some(ScrollTarget::Top),
            "bottom" => Some(ScrollTarget::Bottom),
            lower => match lower.trim_end_matches('%').parse::<u8>() {
                Ok(percent) => Some(ScrollTarget::Percent(percent)),
                Err(_) => Some(ScrollTarget::Text {
                    text: text.to_string(),
                    occurrence: 1,
                }),
            },
        };
    }
    if let Some(percent) = value.get("percent") {
        return scroll_target(Some(percent));
    }
    let text = value.get("text")?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    let occurrence = value
        .get("occurrence")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(1);
    Some(ScrollTarget::Text {
        text: text.to_string(),
        occurrence,
    })
}
