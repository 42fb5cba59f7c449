use async_trait::async_trait;
use headless_chrome::browser::tab::ModifierKey;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::dom::PageCall;
use crate::error::DriverError;

/// URL prefixes of pages the browser refuses to script.
const RESTRICTED_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "chrome-search://",
    "chrome-untrusted://",
    "devtools://",
    "edge://",
    "about:",
    "view-source:",
    "https://chrome.google.com/webstore",
    "https://chromewebstore.google.com",
];

pub fn is_restricted_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.is_empty() || RESTRICTED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Alt,
    Control,
    Meta,
    Shift,
}

/// One key press with held modifiers, e.g. `Control+Shift+T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: Vec<Modifier>,
    pub key: String,
}

impl KeyChord {
    /// Parses whitespace-separated chords: `"Control+a Delete"`.
    pub fn parse_sequence(raw: &str) -> Result<Vec<KeyChord>, DriverError> {
        let chords = raw
            .split_whitespace()
            .map(KeyChord::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if chords.is_empty() {
            return Err(DriverError::InvalidParams("empty key sequence".to_string()));
        }
        Ok(chords)
    }

    pub fn parse(raw: &str) -> Result<KeyChord, DriverError> {
        let parts: Vec<&str> = raw.split('+').collect();
        let Some((key, modifiers)) = parts.split_last() else {
            return Err(DriverError::InvalidParams(format!("bad key chord '{raw}'")));
        };
        if key.is_empty() {
            return Err(DriverError::InvalidParams(format!(
                "key chord '{raw}' has no key"
            )));
        }
        let modifiers = modifiers
            .iter()
            .map(|m| match m.to_ascii_lowercase().as_str() {
                "alt" | "option" => Ok(Modifier::Alt),
                "control" | "ctrl" => Ok(Modifier::Control),
                "meta" | "command" | "cmd" => Ok(Modifier::Meta),
                "shift" => Ok(Modifier::Shift),
                other => Err(DriverError::InvalidParams(format!(
                    "unknown modifier '{other}' in '{raw}'"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KeyChord {
            modifiers,
            key: normalize_key(key),
        })
    }
}

fn normalize_key(key: &str) -> String {
    match key.to_ascii_lowercase().as_str() {
        "enter" | "return" => "Enter".to_string(),
        "esc" | "escape" => "Escape".to_string(),
        "tab" => "Tab".to_string(),
        "space" => " ".to_string(),
        "backspace" => "Backspace".to_string(),
        "delete" | "del" => "Delete".to_string(),
        "up" | "arrowup" => "ArrowUp".to_string(),
        "down" | "arrowdown" => "ArrowDown".to_string(),
        "left" | "arrowleft" => "ArrowLeft".to_string(),
        "right" | "arrowright" => "ArrowRight".to_string(),
        "pageup" => "PageUp".to_string(),
        "pagedown" => "PageDown".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        _ => key.to_string(),
    }
}

/// What the driver needs from the host browser: one attached tab that can
/// run page scripts, navigate, take input and screenshots.
#[async_trait]
pub trait PageHost: Send + Sync {
    async fn current_url(&self) -> Result<String, DriverError>;

    /// Navigate and wait for the load signal.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Run one helper call in the page context and return the raw reply.
    async fn call(&self, call: &PageCall) -> Result<Value, DriverError>;

    async fn press_key(&self, chord: &KeyChord) -> Result<(), DriverError>;

    /// PNG bytes of the visible viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    /// Release the tab connection. Must tolerate repeated calls.
    async fn close(&self) -> Result<(), DriverError>;
}

struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

/// [`PageHost`] over a real Chrome tab. headless_chrome is blocking, so every
/// call runs on the blocking pool.
pub struct ChromeHost {
    session: Mutex<Option<ChromeSession>>,
}

fn host_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Host(e.to_string())
}

impl ChromeHost {
    /// Attach to a running Chrome if possible, otherwise launch one.
    pub fn launch(config: &BrowserConfig) -> Result<Self, DriverError> {
        if let Some(debug_url) = &config.debug_url {
            info!(%debug_url, "attempting to attach to existing Chrome");
            match Browser::connect(debug_url.clone()) {
                Ok(browser) => {
                    let existing = {
                        let tabs = browser.get_tabs();
                        let tabs = tabs.lock().map_err(host_err)?;
                        tabs.first().cloned()
                    };
                    let tab = match existing {
                        Some(tab) => {
                            info!("attached; reusing first tab");
                            tab
                        }
                        None => browser.new_tab().map_err(host_err)?,
                    };
                    return Ok(Self::from_parts(browser, tab));
                }
                Err(e) => warn!(error = %e, "could not attach, launching Chrome"),
            }
        }

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone(),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(config.idle_browser_timeout_secs),
            ..Default::default()
        };
        let browser = Browser::new(options).map_err(|e| {
            DriverError::Host(format!("browser launch failed: {e}"))
        })?;
        let tab = browser.new_tab().map_err(host_err)?;
        info!("Chrome launched");
        Ok(Self::from_parts(browser, tab))
    }

    fn from_parts(browser: Browser, tab: Arc<Tab>) -> Self {
        Self {
            session: Mutex::new(Some(ChromeSession {
                _browser: browser,
                tab,
            })),
        }
    }

    fn tab(&self) -> Result<Arc<Tab>, DriverError> {
        let guard = self.session.lock().map_err(host_err)?;
        guard
            .as_ref()
            .map(|s| s.tab.clone())
            .ok_or(DriverError::Closed)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, DriverError> + Send + 'static,
    {
        let tab = self.tab()?;
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .map_err(|e| DriverError::Host(format!("browser task panicked: {e}")))?
    }
}

#[async_trait]
impl PageHost for ChromeHost {
    async fn current_url(&self) -> Result<String, DriverError> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| DriverError::Navigation(format!("{url}: {e}")))?;
            if let Err(e) = tab.wait_for_element_with_custom_timeout("body", timeout) {
                debug!(error = %e, "page has no body after load");
            }
            Ok(())
        })
        .await
    }

    async fn call(&self, call: &PageCall) -> Result<Value, DriverError> {
        let script = call.script();
        let name = call.name();
        self.blocking(move |tab| {
            let remote = tab
                .evaluate(&script, false)
                .map_err(|e| DriverError::Script(format!("{name}: {e}")))?;
            let raw = remote
                .value
                .and_then(|v| v.as_str().map(String::from))
                .ok_or_else(|| DriverError::Script(format!("{name}: page returned no value")))?;
            serde_json::from_str(&raw)
                .map_err(|e| DriverError::Script(format!("{name}: bad reply json: {e}")))
        })
        .await
    }

    async fn press_key(&self, chord: &KeyChord) -> Result<(), DriverError> {
        let chord = chord.clone();
        self.blocking(move |tab| {
            let modifiers: Vec<ModifierKey> = chord
                .modifiers
                .iter()
                .map(|m| match m {
                    Modifier::Alt => ModifierKey::Alt,
                    Modifier::Control => ModifierKey::Ctrl,
                    Modifier::Meta => ModifierKey::Meta,
                    Modifier::Shift => ModifierKey::Shift,
                })
                .collect();
            let held = (!modifiers.is_empty()).then_some(modifiers.as_slice());
            tab.press_key_with_modifiers(&chord.key, held)
                .map_err(host_err)?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.blocking(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(host_err)
        })
        .await
    }

    async fn close(&self) -> Result<(), DriverError> {
        let session = self.session.lock().map_err(host_err)?.take();
        if session.is_some() {
            info!("released tab connection");
        }
        Ok(())
    }
}
