//! In-memory stand-ins for the browser and the completion service.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::AgentConfig;
use crate::dom::PageCall;
use crate::error::{CompletionError, DriverError};
use crate::hands::{KeyChord, PageHost};
use crate::llm::{Completion, CompletionRequest, CompletionService};

pub(crate) fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.browser.settle_ms = 0;
    config.browser.navigation_timeout_ms = 2_000;
    config.browser.script_timeout_ms = 2_000;
    config.actions.backoff_ms = 0;
    config.max_iterations = 10;
    config
}

#[derive(Debug, Clone)]
pub(crate) struct FakeElement {
    pub tag: String,
    pub path: String,
    pub text: String,
    pub value: String,
    pub options: Vec<String>,
    pub selected: usize,
    pub attributes: BTreeMap<String, String>,
}

impl FakeElement {
    fn new(tag: &str, path: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            path: path.to_string(),
            text: text.to_string(),
            value: String::new(),
            options: Vec::new(),
            selected: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn heading(path: &str, text: &str) -> Self {
        Self::new("h1", path, text)
    }

    pub fn link(path: &str, text: &str, href: &str) -> Self {
        let mut element = Self::new("a", path, text);
        element.attributes.insert("href".into(), href.into());
        element
    }

    pub fn input(path: &str, name: &str) -> Self {
        let mut element = Self::new("input", path, "");
        element.attributes.insert("type".into(), "text".into());
        element.attributes.insert("name".into(), name.into());
        element
    }

    pub fn button(path: &str, text: &str) -> Self {
        Self::new("button", path, text)
    }

    pub fn select(path: &str, options: &[&str]) -> Self {
        let mut element = Self::new("select", path, "");
        element.options = options.iter().map(|o| o.to_string()).collect();
        element
    }

    fn record(&self, index: usize) -> Value {
        json!({
            "index": index,
            "tag": self.tag,
            "path": self.path,
            "rect": {"x": 0.0, "y": index as f64 * 40.0, "width": 200.0, "height": 30.0},
            "visible": true,
            "interactive": true,
            "text": self.text,
            "attributes": self.attributes,
        })
    }
}

#[derive(Debug, Clone)]
struct FakeDocument {
    title: String,
    elements: Vec<FakeElement>,
}

#[derive(Debug, Default)]
struct FakeState {
    url: String,
    document: Option<FakeDocument>,
    sites: HashMap<String, FakeDocument>,
    last_pass: Option<u64>,
    detached: HashSet<usize>,
    calls: HashMap<String, usize>,
    failures: HashMap<String, u32>,
    pressed: Vec<KeyChord>,
    closes: usize,
    scroll_y: f64,
}

impl FakeState {
    fn record_call(&mut self, name: &str) -> Result<(), DriverError> {
        *self.calls.entry(name.to_string()).or_default() += 1;
        match self.failures.get_mut(name) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(DriverError::Host(format!("injected {name} failure")))
            }
            _ => Ok(()),
        }
    }

    fn elements(&self) -> &[FakeElement] {
        self.document.as_ref().map_or(&[], |d| d.elements.as_slice())
    }

    fn element_mut(&mut self, pass: u64, index: usize) -> Result<&mut FakeElement, Value> {
        if self.last_pass != Some(pass) {
            return Err(refuse("stale", format!("snapshot {pass} is no longer current")));
        }
        if self.detached.contains(&index) {
            return Err(refuse("not_found", format!("element {index} is gone")));
        }
        self.document
            .as_mut()
            .and_then(|d| d.elements.get_mut(index))
            .ok_or_else(|| refuse("not_found", format!("no element {index}")))
    }
}

fn reply(value: Value) -> Value {
    json!({"ok": true, "value": value})
}

fn refuse(code: &str, message: impl Into<String>) -> Value {
    json!({"ok": false, "code": code, "message": message.into()})
}

/// Scripted page host. Clones share state, so a test can keep one handle
/// while the driver owns another.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakePage {
    state: Arc<Mutex<FakeState>>,
}

impl FakePage {
    pub fn new(url: &str, title: &str, elements: Vec<FakeElement>) -> Self {
        let page = Self::default();
        {
            let mut state = page.lock();
            state.url = url.to_string();
            state.document = Some(FakeDocument {
                title: title.to_string(),
                elements,
            });
        }
        page
    }

    pub fn example() -> Self {
        Self::new(
            "https://example.com/",
            "Example Domain",
            vec![
                FakeElement::heading("body > div > h1", "Example Domain"),
                FakeElement::link("#more", "More information...", "https://www.iana.org/domains/example"),
                FakeElement::input("#q", "q"),
            ],
        )
    }

    /// Page served when the host navigates to `url`.
    pub fn with_site(self, url: &str, title: &str, elements: Vec<FakeElement>) -> Self {
        self.lock().sites.insert(
            url.to_string(),
            FakeDocument {
                title: title.to_string(),
                elements,
            },
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `times` calls named `name` throw a host error.
    pub fn fail_times(&self, name: &str, times: u32) {
        self.lock().failures.insert(name.to_string(), times);
    }

    pub fn calls(&self, name: &str) -> usize {
        self.lock().calls.get(name).copied().unwrap_or_default()
    }

    /// Move the tab without going through the driver.
    pub fn set_url(&self, url: &str) {
        self.lock().url = url.to_string();
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    /// Remove an element from the live page; the next index pass drops it.
    pub fn detach(&self, index: usize) {
        self.lock().detached.insert(index);
    }

    pub fn pressed_keys(&self) -> Vec<KeyChord> {
        self.lock().pressed.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.lock().closes
    }

    pub fn value_of(&self, index: usize) -> Option<String> {
        self.lock().elements().get(index).map(|e| e.value.clone())
    }
}

#[async_trait]
impl PageHost for FakePage {
    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.lock().url.clone())
    }

    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.record_call("navigate")?;
        state.url = url.to_string();
        state.document = state.sites.get(url).cloned().or_else(|| {
            Some(FakeDocument {
                title: String::new(),
                elements: Vec::new(),
            })
        });
        state.last_pass = None;
        state.detached.clear();
        state.scroll_y = 0.0;
        Ok(())
    }

    async fn call(&self, call: &PageCall) -> Result<Value, DriverError> {
        let mut state = self.lock();
        state.record_call(call.name())?;
        let answer = match call {
            PageCall::Index { pass, .. } => {
                let detached = std::mem::take(&mut state.detached);
                if let Some(document) = state.document.as_mut() {
                    let mut position = 0;
                    document.elements.retain(|_| {
                        let keep = !detached.contains(&position);
                        position += 1;
                        keep
                    });
                }
                state.last_pass = Some(*pass);
                let (title, elements) = match &state.document {
                    Some(d) => (
                        d.title.clone(),
                        d.elements.iter().enumerate().map(|(i, e)| e.record(i)).collect(),
                    ),
                    None => (String::new(), Vec::new()),
                };
                reply(json!({
                    "pass": pass,
                    "url": state.url,
                    "title": title,
                    "viewport": {"width": 1280.0, "height": 720.0, "scrollX": 0.0,
                                 "scrollY": state.scroll_y, "pageHeight": 2000.0},
                    "elements": Value::Array(elements),
                }))
            }
            PageCall::Click { pass, index } => {
                let clicked = state.element_mut(*pass, *index).map(|element| {
                    let href = (element.tag == "a")
                        .then(|| element.attributes.get("href").cloned())
                        .flatten();
                    (json!({"tag": element.tag, "text": element.text, "path": element.path}), href)
                });
                match clicked {
                    Ok((clicked, href)) => {
                        if let Some(href) = href {
                            state.document = state.sites.get(&href).cloned();
                            state.url = href;
                        }
                        reply(clicked)
                    }
                    Err(refusal) => refusal,
                }
            }
            PageCall::Fill { pass, index, value } => match state.element_mut(*pass, *index) {
                Ok(element) if matches!(element.tag.as_str(), "input" | "textarea") => {
                    element.value = value.clone();
                    reply(json!(value))
                }
                Ok(element) => refuse("invalid", format!("<{}> is not editable", element.tag)),
                Err(refusal) => refusal,
            },
            PageCall::Extract { pass, index, limit } => match state.element_mut(*pass, *index) {
                Ok(element) => {
                    let source = if element.value.is_empty() {
                        &element.text
                    } else {
                        &element.value
                    };
                    reply(json!(source.chars().take(*limit).collect::<String>()))
                }
                Err(refusal) => refusal,
            },
            PageCall::Options { pass, index } => match state.element_mut(*pass, *index) {
                Ok(element) if element.tag == "select" => {
                    let options: Vec<Value> = element
                        .options
                        .iter()
                        .enumerate()
                        .map(|(i, text)| {
                            json!({"index": i, "text": text, "value": text.to_lowercase(),
                                   "selected": i == element.selected})
                        })
                        .collect();
                    reply(Value::Array(options))
                }
                Ok(_) => refuse("invalid", "not a select element"),
                Err(refusal) => refusal,
            },
            PageCall::Select { pass, index, option } => match state.element_mut(*pass, *index) {
                Ok(element) => {
                    let wanted = option.to_lowercase();
                    match element.options.iter().position(|o| o.to_lowercase() == wanted) {
                        Some(position) => {
                            element.selected = position;
                            reply(json!(element.options[position]))
                        }
                        None => refuse("option_not_found", option.clone()),
                    }
                }
                Err(refusal) => refusal,
            },
            PageCall::ScrollPercent(percent) => {
                state.scroll_y = f64::from(*percent) * 20.0;
                reply(json!(state.scroll_y))
            }
            PageCall::ScrollEdge { top } => {
                state.scroll_y = if *top { 0.0 } else { 2000.0 };
                reply(json!(state.scroll_y))
            }
            PageCall::ScrollText { text, occurrence } => {
                let needle = text.to_lowercase();
                let hit = state
                    .elements()
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.text.to_lowercase().contains(&needle))
                    .nth(occurrence.saturating_sub(1))
                    .map(|(i, _)| i);
                match hit {
                    Some(position) => {
                        state.scroll_y = position as f64 * 40.0;
                        reply(json!(state.scroll_y))
                    }
                    None => refuse("text_not_found", text.clone()),
                }
            }
            PageCall::ClearOverlay => reply(Value::Null),
        };
        Ok(answer)
    }

    async fn press_key(&self, chord: &KeyChord) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.record_call("press_key")?;
        state.pressed.push(chord.clone());
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.lock().record_call("screenshot")?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.lock().closes += 1;
        Ok(())
    }
}

/// Completion service replaying canned replies and recording every prompt.
#[derive(Default)]
pub(crate) struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    called: Notify,
    gate: Option<Arc<Notify>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// Reply used once the queue is empty.
    pub fn repeating(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn then_error(self, error: CompletionError) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Err(error));
        self
    }

    /// Hold every reply until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Resolves once a completion has been requested.
    pub async fn wait_for_call(&self) {
        self.called.notified().await;
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.prompt.clone());
        self.called.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match next {
            Some(reply) => reply.map(Completion::Text),
            None => self
                .fallback
                .clone()
                .map(Completion::Text)
                .ok_or_else(|| CompletionError::EmptyResponse("script exhausted".to_string())),
        }
    }
}
