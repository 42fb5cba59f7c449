//! Goal-driven browser agent: index the page, ask a model for the next step,
//! execute it against one Chrome tab, remember what happened, repeat.

pub mod actions;
pub mod brain;
pub mod config;
pub mod dom;
pub mod driver;
pub mod error;
pub mod hands;
pub mod llm;
pub mod memory;
pub mod monitor;
pub mod navigator;
pub mod orchestrator;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AgentConfig;
pub use driver::PageDriver;
pub use error::{AgentError, CompletionError, ConfigError, DriverError};
pub use hands::{ChromeHost, PageHost};
pub use llm::{CompletionService, OpenAiClient};
pub use orchestrator::{Orchestrator, RunState, StopHandle, TaskObserver, TaskOutcome, TaskStatus};
