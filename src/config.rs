use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

pub const CONFIG_DIR_NAME: &str = "browser-pilot";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_SNAPSHOT_MAX_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Stop early after a successful extract or submit-like step.
    pub early_completion: bool,
    pub snapshot_max_chars: usize,
    pub llm: LlmConfig,
    pub browser: BrowserConfig,
    pub indexer: IndexerConfig,
    pub actions: ActionConfig,
    pub memory: MemoryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            early_completion: true,
            snapshot_max_chars: DEFAULT_SNAPSHOT_MAX_CHARS,
            llm: LlmConfig::default(),
            browser: BrowserConfig::default(),
            indexer: IndexerConfig::default(),
            actions: ActionConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout_ms: u64,
    /// Ask for a schema-constrained response when the provider supports it.
    pub structured_output: bool,
    pub stream: bool,
    /// Capacity of the chunk channel used for streamed completions.
    pub stream_buffer: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.2,
            request_timeout_ms: 60_000,
            structured_output: true,
            stream: false,
            stream_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// DevTools endpoint of an already running Chrome to attach to.
    pub debug_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub navigation_timeout_ms: u64,
    pub script_timeout_ms: u64,
    /// Pause after page-mutating primitives so the page can react.
    pub settle_ms: u64,
    pub idle_browser_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            debug_url: Some("http://127.0.0.1:9222".to_string()),
            chrome_path: None,
            headless: false,
            navigation_timeout_ms: 30_000,
            script_timeout_ms: 10_000,
            settle_ms: 500,
            idle_browser_timeout_secs: 600,
        }
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub highlight: bool,
    pub viewport_only: bool,
    pub max_depth: usize,
    pub text_limit: usize,
    pub extract_limit: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            highlight: true,
            viewport_only: true,
            max_depth: 10,
            text_limit: 100,
            extract_limit: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_age_secs: u64,
    pub max_turns: usize,
    pub turn_window: usize,
    pub result_window: usize,
    /// Longest payload text copied into a memory entry.
    pub payload_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            max_turns: 200,
            turn_window: 10,
            result_window: 10,
            payload_limit: 1000,
        }
    }
}

impl MemoryConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl AgentConfig {
    /// Defaults, then the TOML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path.map(PathBuf::from).or_else(default_config_path) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("PILOT_MODEL") {
            self.llm.model = model;
        }
        if let Some(base_url) = lookup("PILOT_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(debug_url) = lookup("PILOT_DEBUG_URL") {
            self.browser.debug_url = if debug_url.trim().is_empty() {
                None
            } else {
                Some(debug_url)
            };
        }
        if let Some(raw) = lookup("PILOT_MAX_ITERATIONS") {
            self.max_iterations = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PILOT_MAX_ITERATIONS".to_string(),
                reason: format!("'{raw}' is not a number"),
            })?;
        }
        if let Some(raw) = lookup("PILOT_HEADLESS") {
            self.browser.headless = matches!(raw.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("max_iterations", self.max_iterations == 0),
            ("indexer.max_depth", self.indexer.max_depth == 0),
            ("memory.turn_window", self.memory.turn_window == 0),
            ("memory.result_window", self.memory.result_window == 0),
            ("llm.stream_buffer", self.llm.stream_buffer == 0),
        ];
        for (key, invalid) in checks {
            if invalid {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
