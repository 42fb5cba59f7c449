use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::dom::{ElementRecord, IndexOptions, PageCall, PageReply, PageSnapshot};
use crate::error::DriverError;
use crate::hands::{KeyChord, PageHost, is_restricted_url};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub index: usize,
    pub text: String,
    pub value: String,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    navigation: Duration,
    script: Duration,
    settle: Duration,
}

/// Owns the connection to one tab and the latest snapshot of it.
///
/// Index-addressed primitives resolve against the memoized snapshot only.
/// If that snapshot was invalidated, or the page moved to another URL since
/// it was taken, they fail with [`DriverError::StaleIndex`] instead of
/// guessing which element was meant.
pub struct PageDriver {
    host: Arc<dyn PageHost>,
    options: IndexOptions,
    extract_limit: usize,
    timeouts: Timeouts,
    snapshot: Option<Arc<PageSnapshot>>,
    dirty: bool,
    next_pass: u64,
    closed: bool,
}

impl PageDriver {
    pub fn new(host: Arc<dyn PageHost>, config: &AgentConfig) -> Self {
        Self {
            host,
            options: IndexOptions::from(&config.indexer),
            extract_limit: config.indexer.extract_limit,
            timeouts: Timeouts {
                navigation: config.browser.navigation_timeout(),
                script: config.browser.script_timeout(),
                settle: config.browser.settle(),
            },
            snapshot: None,
            dirty: true,
            next_pass: 0,
            closed: false,
        }
    }

    /// Attach to the host tab. Indexing of browser-internal pages is deferred
    /// until a navigation lands somewhere scriptable.
    pub async fn connect(host: Arc<dyn PageHost>, config: &AgentConfig) -> Result<Self, DriverError> {
        let driver = Self::new(host, config);
        let url = driver.host.current_url().await?;
        if is_restricted_url(&url) {
            info!(%url, "tab is on a restricted page; indexing deferred until navigation");
        } else {
            debug!(%url, "connected to tab");
        }
        Ok(driver)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drop the memoized snapshot; the next access re-indexes.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    async fn within<T>(
        operation: &str,
        limit: Duration,
        fut: impl Future<Output = Result<T, DriverError>>,
    ) -> Result<T, DriverError> {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout {
                operation: operation.to_string(),
                millis: limit.as_millis() as u64,
            }),
        }
    }

    async fn page_call(&self, call: PageCall) -> Result<Value, DriverError> {
        self.ensure_open()?;
        let raw = Self::within(call.name(), self.timeouts.script, self.host.call(&call)).await?;
        PageReply::parse(raw)?.into_result(&call)
    }

    async fn settle(&self) {
        if !self.timeouts.settle.is_zero() {
            tokio::time::sleep(self.timeouts.settle).await;
        }
    }

    /// Run a fresh indexing pass and memoize it.
    pub async fn snapshot(&mut self) -> Result<Arc<PageSnapshot>, DriverError> {
        self.ensure_open()?;
        let pass = self.next_pass;
        self.next_pass += 1;

        let url = self.host.current_url().await?;
        let snapshot = if is_restricted_url(&url) {
            debug!(%url, pass, "restricted page, returning empty snapshot");
            PageSnapshot::unindexable(pass, url)
        } else {
            let value = self
                .page_call(PageCall::Index {
                    pass,
                    options: self.options,
                })
                .await?;
            PageSnapshot::from_reply(value, pass)?
        };

        info!(pass, url = %snapshot.url, elements = snapshot.len(), "indexed page");
        let snapshot = Arc::new(snapshot);
        self.snapshot = Some(snapshot.clone());
        self.dirty = false;
        Ok(snapshot)
    }

    /// The memoized snapshot, re-indexing first if it was invalidated.
    pub async fn current_snapshot(&mut self) -> Result<Arc<PageSnapshot>, DriverError> {
        match &self.snapshot {
            Some(snapshot) if !self.dirty => Ok(snapshot.clone()),
            _ => self.snapshot().await,
        }
    }

    /// Resolve an index against the current snapshot, failing fast if stale.
    pub async fn resolve(&mut self, index: usize) -> Result<(u64, ElementRecord), DriverError> {
        self.ensure_open()?;
        let snapshot = match &self.snapshot {
            Some(snapshot) if !self.dirty => snapshot.clone(),
            Some(_) => {
                return Err(DriverError::stale(
                    index,
                    "page changed since the last snapshot; re-index first",
                ));
            }
            None => return Err(DriverError::stale(index, "page has not been indexed yet")),
        };
        if snapshot.restricted {
            return Err(DriverError::RestrictedPage(snapshot.url.clone()));
        }
        let record = snapshot.element(index).cloned().ok_or_else(|| {
            DriverError::stale(index, format!("no element with this index in snapshot {}", snapshot.pass))
        })?;

        let url = self.host.current_url().await?;
        if strip_fragment(&url) != strip_fragment(&snapshot.url) {
            self.invalidate();
            return Err(DriverError::stale(
                index,
                format!("page navigated from {} to {url}", snapshot.url),
            ));
        }
        Ok((snapshot.pass, record))
    }

    pub async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let parsed = url::Url::parse(url).map_err(|_| DriverError::InvalidUrl(url.to_string()))?;
        info!(url = %parsed, "navigating");
        let limit = self.timeouts.navigation;
        let result = Self::within("navigate", limit + Duration::from_secs(1), self.host.navigate(parsed.as_str(), limit)).await;
        self.invalidate();
        result?;
        self.settle().await;
        Ok(())
    }

    pub async fn click(&mut self, index: usize) -> Result<Value, DriverError> {
        let (pass, record) = self.resolve(index).await?;
        debug!(index, path = %record.path, "click");
        let result = self.page_call(PageCall::Click { pass, index }).await;
        if result.is_ok() {
            self.invalidate();
            self.settle().await;
        }
        result
    }

    pub async fn fill(&mut self, index: usize, text: &str) -> Result<String, DriverError> {
        let (pass, record) = self.resolve(index).await?;
        debug!(index, path = %record.path, "fill");
        let value = self
            .page_call(PageCall::Fill {
                pass,
                index,
                value: text.to_string(),
            })
            .await?;
        Ok(value_text(value))
    }

    pub async fn extract(&mut self, index: usize) -> Result<String, DriverError> {
        let (pass, _) = self.resolve(index).await?;
        let value = self
            .page_call(PageCall::Extract {
                pass,
                index,
                limit: self.extract_limit,
            })
            .await?;
        Ok(value_text(value))
    }

    pub async fn dropdown_options(&mut self, index: usize) -> Result<Vec<DropdownOption>, DriverError> {
        let (pass, _) = self.resolve(index).await?;
        let value = self.page_call(PageCall::Options { pass, index }).await?;
        serde_json::from_value(value)
            .map_err(|e| DriverError::Script(format!("malformed dropdown options: {e}")))
    }

    pub async fn select_option(&mut self, index: usize, option: &str) -> Result<String, DriverError> {
        let (pass, _) = self.resolve(index).await?;
        let value = self
            .page_call(PageCall::Select {
                pass,
                index,
                option: option.to_string(),
            })
            .await?;
        self.invalidate();
        Ok(value_text(value))
    }

    pub async fn scroll_to_percent(&mut self, percent: u8) -> Result<f64, DriverError> {
        if percent > 100 {
            return Err(DriverError::InvalidParams(format!(
                "scroll percent {percent} is above 100"
            )));
        }
        self.scroll(PageCall::ScrollPercent(percent)).await
    }

    pub async fn scroll_to_text(&mut self, text: &str, occurrence: usize) -> Result<f64, DriverError> {
        if text.trim().is_empty() || occurrence == 0 {
            return Err(DriverError::InvalidParams(
                "scroll-to-text needs non-empty text and occurrence >= 1".to_string(),
            ));
        }
        self.scroll(PageCall::ScrollText {
            text: text.to_string(),
            occurrence,
        })
        .await
    }

    pub async fn scroll_to_top(&mut self) -> Result<f64, DriverError> {
        self.scroll(PageCall::ScrollEdge { top: true }).await
    }

    pub async fn scroll_to_bottom(&mut self) -> Result<f64, DriverError> {
        self.scroll(PageCall::ScrollEdge { top: false }).await
    }

    async fn scroll(&mut self, call: PageCall) -> Result<f64, DriverError> {
        self.ensure_open()?;
        let url = self.host.current_url().await?;
        if is_restricted_url(&url) {
            return Err(DriverError::RestrictedPage(url));
        }
        let value = self.page_call(call).await?;
        self.invalidate();
        Ok(value.as_f64().unwrap_or_default())
    }

    pub async fn send_keys(&mut self, keys: &str) -> Result<usize, DriverError> {
        self.ensure_open()?;
        let chords = KeyChord::parse_sequence(keys)?;
        for chord in &chords {
            Self::within("send_keys", self.timeouts.script, self.host.press_key(chord)).await?;
        }
        self.invalidate();
        self.settle().await;
        Ok(chords.len())
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.ensure_open()?;
        Self::within("screenshot", self.timeouts.script, self.host.screenshot()).await
    }

    /// Clear the overlay and release the tab. Safe to call repeatedly.
    pub async fn cleanup(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        let scriptable = self.snapshot.as_ref().is_some_and(|s| !s.restricted);
        if scriptable {
            if let Err(e) = self.page_call(PageCall::ClearOverlay).await {
                warn!(error = %e, "could not clear overlay during cleanup");
            }
        }
        self.closed = true;
        self.snapshot = None;
        self.dirty = true;
        self.host.close().await
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
