//! Action registry: a closed catalogue of named operations, each wrapping one
//! driver primitive with the shared retry policy and result shape.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ActionConfig;
use crate::driver::PageDriver;
use crate::error::DriverError;
use crate::types::ActionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Navigate,
    ClickElement,
    InputText,
    ExtractText,
    GetDropdownOptions,
    SelectDropdownOption,
    ScrollToPercent,
    ScrollToText,
    ScrollToTop,
    ScrollToBottom,
    SendKeys,
    Wait,
    AnalyzePage,
    TakeScreenshot,
}

impl ActionKind {
    pub const ALL: [ActionKind; 14] = [
        ActionKind::Navigate,
        ActionKind::ClickElement,
        ActionKind::InputText,
        ActionKind::ExtractText,
        ActionKind::GetDropdownOptions,
        ActionKind::SelectDropdownOption,
        ActionKind::ScrollToPercent,
        ActionKind::ScrollToText,
        ActionKind::ScrollToTop,
        ActionKind::ScrollToBottom,
        ActionKind::SendKeys,
        ActionKind::Wait,
        ActionKind::AnalyzePage,
        ActionKind::TakeScreenshot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::ClickElement => "clickElement",
            ActionKind::InputText => "inputText",
            ActionKind::ExtractText => "extractText",
            ActionKind::GetDropdownOptions => "getDropdownOptions",
            ActionKind::SelectDropdownOption => "selectDropdownOption",
            ActionKind::ScrollToPercent => "scrollToPercent",
            ActionKind::ScrollToText => "scrollToText",
            ActionKind::ScrollToTop => "scrollToTop",
            ActionKind::ScrollToBottom => "scrollToBottom",
            ActionKind::SendKeys => "sendKeys",
            ActionKind::Wait => "wait",
            ActionKind::AnalyzePage => "analyzePage",
            ActionKind::TakeScreenshot => "takeScreenshot",
        }
    }
}

/// Concrete parameters for one registry call.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Navigate { url: String },
    ClickElement { index: usize },
    InputText { index: usize, text: String },
    ExtractText { index: usize },
    GetDropdownOptions { index: usize },
    SelectDropdownOption { index: usize, option: String },
    ScrollToPercent { percent: u8 },
    ScrollToText { text: String, occurrence: usize },
    ScrollToTop,
    ScrollToBottom,
    SendKeys { keys: String },
    Wait { seconds: f64 },
    AnalyzePage,
    TakeScreenshot,
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::Navigate { .. } => ActionKind::Navigate,
            ActionRequest::ClickElement { .. } => ActionKind::ClickElement,
            ActionRequest::InputText { .. } => ActionKind::InputText,
            ActionRequest::ExtractText { .. } => ActionKind::ExtractText,
            ActionRequest::GetDropdownOptions { .. } => ActionKind::GetDropdownOptions,
            ActionRequest::SelectDropdownOption { .. } => ActionKind::SelectDropdownOption,
            ActionRequest::ScrollToPercent { .. } => ActionKind::ScrollToPercent,
            ActionRequest::ScrollToText { .. } => ActionKind::ScrollToText,
            ActionRequest::ScrollToTop => ActionKind::ScrollToTop,
            ActionRequest::ScrollToBottom => ActionKind::ScrollToBottom,
            ActionRequest::SendKeys { .. } => ActionKind::SendKeys,
            ActionRequest::Wait { .. } => ActionKind::Wait,
            ActionRequest::AnalyzePage => ActionKind::AnalyzePage,
            ActionRequest::TakeScreenshot => ActionKind::TakeScreenshot,
        }
    }
}

/// One registry entry. Returning `Err` means the primitive threw and the
/// registry may retry; a returned `ActionResult` is final either way.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn retryable(&self) -> bool {
        true
    }

    async fn call(
        &self,
        driver: &mut PageDriver,
        request: &ActionRequest,
    ) -> Result<ActionResult, DriverError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&ActionConfig::default())
    }
}

impl From<&ActionConfig> for RetryPolicy {
    fn from(config: &ActionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Upper bound for each attempt.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ExecOptions {
    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Box<dyn ActionHandler>>,
    policy: RetryPolicy,
}

impl ActionRegistry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            handlers: HashMap::new(),
            policy,
        }
    }

    /// Registry with one handler per [`ActionKind`].
    pub fn with_defaults(policy: RetryPolicy) -> Self {
        let mut registry = Self::new(policy);
        registry.register(ActionKind::Navigate, Navigate);
        registry.register(ActionKind::ClickElement, ClickElement);
        registry.register(ActionKind::InputText, InputText);
        registry.register(ActionKind::ExtractText, ExtractText);
        registry.register(ActionKind::GetDropdownOptions, GetDropdownOptions);
        registry.register(ActionKind::SelectDropdownOption, SelectDropdownOption);
        registry.register(ActionKind::ScrollToPercent, Scroll);
        registry.register(ActionKind::ScrollToText, Scroll);
        registry.register(ActionKind::ScrollToTop, Scroll);
        registry.register(ActionKind::ScrollToBottom, Scroll);
        registry.register(ActionKind::SendKeys, SendKeys);
        registry.register(ActionKind::Wait, Wait);
        registry.register(ActionKind::AnalyzePage, AnalyzePage);
        registry.register(ActionKind::TakeScreenshot, TakeScreenshot);
        registry
    }

    /// Install or replace the handler for `kind`.
    pub fn register(
        &mut self,
        kind: ActionKind,
        handler: impl ActionHandler + 'static,
    ) -> Option<Box<dyn ActionHandler>> {
        self.handlers.insert(kind, Box::new(handler))
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    /// Run one action with retries. Never fails; exhaustion becomes a failed
    /// [`ActionResult`].
    pub async fn execute(
        &self,
        driver: &mut PageDriver,
        request: &ActionRequest,
        options: &ExecOptions,
    ) -> ActionResult {
        let kind = request.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            return ActionResult::failure(format!("no handler registered for {}", kind.name()));
        };
        let max_attempts = if handler.retryable() {
            self.policy.max_retries + 1
        } else {
            1
        };

        let mut attempts = 0;
        let mut last_error = DriverError::Cancelled;
        while attempts < max_attempts {
            if attempts > 0 {
                if options.cancelled() {
                    debug!(action = kind.name(), "cancelled before retry");
                    break;
                }
                let delay = self.policy.delay(attempts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            attempts += 1;

            let outcome = match options.timeout {
                Some(limit) => match tokio::time::timeout(limit, handler.call(driver, request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(DriverError::Timeout {
                        operation: kind.name().to_string(),
                        millis: limit.as_millis() as u64,
                    }),
                },
                None => handler.call(driver, request).await,
            };

            match outcome {
                Ok(result) => return result.with_attempts(attempts),
                Err(err) => {
                    warn!(action = kind.name(), attempt = attempts, error = %err, "action attempt failed");
                    let retryable = err.is_retryable();
                    last_error = err;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        ActionResult::failure(last_error.to_string())
            .with_trace(format!("{} failed after {attempts} attempt(s)", kind.name()))
            .with_attempts(attempts)
    }
}

fn mismatch(kind: ActionKind, request: &ActionRequest) -> DriverError {
    DriverError::InvalidParams(format!("{} cannot run {request:?}", kind.name()))
}

struct Navigate;

#[async_trait]
impl ActionHandler for Navigate {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::Navigate { url } = request else {
            return Err(mismatch(ActionKind::Navigate, request));
        };
        driver.navigate(url).await?;
        Ok(ActionResult::ok(Some(json!({ "url": url }))).with_trace(format!("navigated to {url}")))
    }
}

struct ClickElement;

#[async_trait]
impl ActionHandler for ClickElement {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::ClickElement { index } = request else {
            return Err(mismatch(ActionKind::ClickElement, request));
        };
        let clicked = driver.click(*index).await?;
        let label = clicked["text"].as_str().unwrap_or_default().to_string();
        Ok(ActionResult::ok(Some(clicked)).with_trace(format!("clicked element {index} \"{label}\"")))
    }
}

struct InputText;

#[async_trait]
impl ActionHandler for InputText {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::InputText { index, text } = request else {
            return Err(mismatch(ActionKind::InputText, request));
        };
        let value = driver.fill(*index, text).await?;
        Ok(ActionResult::ok(Some(json!(value))).with_trace(format!("typed \"{text}\" into element {index}")))
    }
}

struct ExtractText;

#[async_trait]
impl ActionHandler for ExtractText {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::ExtractText { index } = request else {
            return Err(mismatch(ActionKind::ExtractText, request));
        };
        let text = driver.extract(*index).await?;
        let chars = text.chars().count();
        Ok(ActionResult::ok(Some(json!(text))).with_trace(format!("extracted {chars} chars from element {index}")))
    }
}

struct GetDropdownOptions;

#[async_trait]
impl ActionHandler for GetDropdownOptions {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::GetDropdownOptions { index } = request else {
            return Err(mismatch(ActionKind::GetDropdownOptions, request));
        };
        let options = driver.dropdown_options(*index).await?;
        let listing = options
            .iter()
            .map(|o| o.text.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        Ok(ActionResult::ok(Some(json!(options)))
            .with_trace(format!("element {index} offers {} option(s): {listing}", options.len())))
    }
}

struct SelectDropdownOption;

#[async_trait]
impl ActionHandler for SelectDropdownOption {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::SelectDropdownOption { index, option } = request else {
            return Err(mismatch(ActionKind::SelectDropdownOption, request));
        };
        let chosen = driver.select_option(*index, option).await?;
        Ok(ActionResult::ok(Some(json!(chosen))).with_trace(format!("selected \"{chosen}\" in element {index}")))
    }
}

/// Shared by the four scroll entries.
struct Scroll;

#[async_trait]
impl ActionHandler for Scroll {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let (offset, trace) = match request {
            ActionRequest::ScrollToPercent { percent } => {
                (driver.scroll_to_percent(*percent).await?, format!("scrolled to {percent}%"))
            }
            ActionRequest::ScrollToText { text, occurrence } => (
                driver.scroll_to_text(text, *occurrence).await?,
                format!("scrolled to \"{text}\" (occurrence {occurrence})"),
            ),
            ActionRequest::ScrollToTop => (driver.scroll_to_top().await?, "scrolled to top".to_string()),
            ActionRequest::ScrollToBottom => {
                (driver.scroll_to_bottom().await?, "scrolled to bottom".to_string())
            }
            other => return Err(mismatch(other.kind(), other)),
        };
        Ok(ActionResult::ok(Some(json!({ "scroll_y": offset }))).with_trace(trace))
    }
}

struct SendKeys;

#[async_trait]
impl ActionHandler for SendKeys {
    async fn call(&self, driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::SendKeys { keys } = request else {
            return Err(mismatch(ActionKind::SendKeys, request));
        };
        let pressed = driver.send_keys(keys).await?;
        Ok(ActionResult::ok(None).with_trace(format!("sent {pressed} key chord(s): {keys}")))
    }
}

const MAX_WAIT_SECS: f64 = 300.0;

struct Wait;

#[async_trait]
impl ActionHandler for Wait {
    fn retryable(&self) -> bool {
        false
    }

    async fn call(&self, _driver: &mut PageDriver, request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let ActionRequest::Wait { seconds } = request else {
            return Err(mismatch(ActionKind::Wait, request));
        };
        if !seconds.is_finite() || *seconds < 0.0 || *seconds > MAX_WAIT_SECS {
            return Err(DriverError::InvalidParams(format!(
                "wait of {seconds}s is outside 0..={MAX_WAIT_SECS}"
            )));
        }
        tokio::time::sleep(Duration::from_secs_f64(*seconds)).await;
        Ok(ActionResult::ok(None).with_trace(format!("waited {seconds}s")))
    }
}

struct AnalyzePage;

#[async_trait]
impl ActionHandler for AnalyzePage {
    async fn call(&self, driver: &mut PageDriver, _request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let snapshot = driver.snapshot().await?;
        let payload = serde_json::to_value(&*snapshot)
            .map_err(|e| DriverError::Script(format!("snapshot not serializable: {e}")))?;
        Ok(ActionResult::ok(Some(payload))
            .with_trace(format!(
                "indexed {} element(s) at {} (pass {})",
                snapshot.len(),
                snapshot.url,
                snapshot.pass
            ))
            .excluded_from_memory())
    }
}

struct TakeScreenshot;

#[async_trait]
impl ActionHandler for TakeScreenshot {
    async fn call(&self, driver: &mut PageDriver, _request: &ActionRequest) -> Result<ActionResult, DriverError> {
        let png = driver.screenshot().await?;
        let size = png.len();
        Ok(ActionResult::ok(Some(json!({ "png_base64": BASE64.encode(png) })))
            .with_trace(format!("captured {size} byte screenshot"))
            .excluded_from_memory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePage, test_config};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    async fn indexed_driver(page: &FakePage) -> PageDriver {
        let mut driver = PageDriver::connect(Arc::new(page.clone()), &test_config())
            .await
            .unwrap();
        driver.snapshot().await.unwrap();
        driver
    }

    /// Fails with a host error for the first `failures` calls.
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ActionHandler for Flaky {
        async fn call(&self, _driver: &mut PageDriver, _request: &ActionRequest) -> Result<ActionResult, DriverError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(DriverError::Host(format!("flaky attempt {n}")))
            } else {
                Ok(ActionResult::ok(None))
            }
        }
    }

    #[test]
    fn every_kind_has_a_default_handler() {
        let registry = ActionRegistry::with_defaults(RetryPolicy::default());
        assert_eq!(registry.kinds().len(), ActionKind::ALL.len());
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn click_succeeds_on_third_attempt() {
        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        page.fail_times("click", 2);

        let registry = ActionRegistry::with_defaults(fast_policy(3));
        let result = registry
            .execute(&mut driver, &ActionRequest::ClickElement { index: 1 }, &ExecOptions::default())
            .await;

        assert!(result.success, "{result:?}");
        assert_eq!(result.attempts, 3);
        assert_eq!(page.calls("click"), 3);
    }

    #[tokio::test]
    async fn always_failing_primitive_runs_max_retries_plus_one_times() {
        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ActionRegistry::new(fast_policy(4));
        registry.register(ActionKind::ClickElement, Flaky {
            failures: u32::MAX,
            calls: calls.clone(),
        });

        let result = registry
            .execute(&mut driver, &ActionRequest::ClickElement { index: 0 }, &ExecOptions::default())
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(result.attempts, 5);
    }

    #[tokio::test]
    async fn returned_failure_is_not_retried() {
        struct Refuses(Arc<AtomicU32>);

        #[async_trait]
        impl ActionHandler for Refuses {
            async fn call(&self, _d: &mut PageDriver, _r: &ActionRequest) -> Result<ActionResult, DriverError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ActionResult::failure("nothing to click"))
            }
        }

        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ActionRegistry::new(fast_policy(3));
        registry.register(ActionKind::ClickElement, Refuses(calls.clone()));

        let result = registry
            .execute(&mut driver, &ActionRequest::ClickElement { index: 0 }, &ExecOptions::default())
            .await;
        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_is_never_retried() {
        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        let registry = ActionRegistry::with_defaults(fast_policy(3));
        let result = registry
            .execute(&mut driver, &ActionRequest::Wait { seconds: -1.0 }, &ExecOptions::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);

        let ok = registry
            .execute(&mut driver, &ActionRequest::Wait { seconds: 0.0 }, &ExecOptions::default())
            .await;
        assert!(ok.success);
    }

    #[tokio::test]
    async fn stale_index_exhausts_retries_as_a_failed_result() {
        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        page.detach(2);

        let registry = ActionRegistry::with_defaults(fast_policy(2));
        let result = registry
            .execute(
                &mut driver,
                &ActionRequest::InputText {
                    index: 2,
                    text: "hello".into(),
                },
                &ExecOptions::default(),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("stale index 2"));
        assert_eq!(page.calls("fill"), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_further_retries() {
        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        page.fail_times("click", 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let registry = ActionRegistry::with_defaults(fast_policy(5));
        let result = registry
            .execute(
                &mut driver,
                &ActionRequest::ClickElement { index: 0 },
                &ExecOptions {
                    timeout: None,
                    cancel: Some(cancel),
                },
            )
            .await;
        assert!(!result.success);
        assert_eq!(page.calls("click"), 1);
    }

    #[tokio::test]
    async fn missing_handler_is_a_failed_result() {
        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        let registry = ActionRegistry::new(fast_policy(1));
        let result = registry
            .execute(&mut driver, &ActionRequest::AnalyzePage, &ExecOptions::default())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("analyzePage"));
    }

    #[tokio::test]
    async fn screenshot_payload_is_kept_out_of_memory() {
        let page = FakePage::example();
        let mut driver = indexed_driver(&page).await;
        let registry = ActionRegistry::with_defaults(fast_policy(0));
        let result = registry
            .execute(&mut driver, &ActionRequest::TakeScreenshot, &ExecOptions::default())
            .await;
        assert!(result.success);
        assert!(!result.include_in_memory);
        assert!(result.payload.unwrap()["png_base64"].as_str().is_some());
    }
}
