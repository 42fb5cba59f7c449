mod face;
mod logging;

use anyhow::{Context, Result, anyhow};
use browser_pilot::orchestrator::{Orchestrator, TaskOutcome, TaskStatus};
use browser_pilot::{AgentConfig, ChromeHost, OpenAiClient, PageDriver};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use face::{AgentEvent, BroadcastObserver};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "agent", version, about = "Goal-driven browser automation agent")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Launch a headless Chrome instead of attaching to one
    #[arg(long, global = true)]
    headless: bool,

    #[arg(long, global = true)]
    max_iterations: Option<usize>,

    /// Override the completion model
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single goal and print the outcome as JSON
    Run {
        #[arg(required = true)]
        goal: Vec<String>,
    },
    /// Serve the web UI and run goals submitted from it
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

impl Cli {
    fn apply(&self, config: &mut AgentConfig) {
        if self.headless {
            config.browser.headless = true;
            config.browser.debug_url = None;
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = max;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::init_logging(cli.log_json, cli.log_file.as_deref())?;

    let mut config = AgentConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    let llm = Arc::new(OpenAiClient::new(&config.llm)?);

    info!(headless = config.browser.headless, "launching browser");
    let browser = config.browser.clone();
    let host = tokio::task::spawn_blocking(move || ChromeHost::launch(&browser))
        .await
        .map_err(|e| anyhow!("browser launch panicked: {e}"))??;
    let driver = PageDriver::connect(Arc::new(host), &config).await?;

    match cli.command {
        Command::Run { goal } => run_once(driver, llm, config, &goal.join(" ")).await,
        Command::Serve { port } => serve(driver, llm, config, port).await,
    }
}

async fn run_once(driver: PageDriver, llm: Arc<OpenAiClient>, config: AgentConfig, goal: &str) -> Result<()> {
    let orchestrator = Orchestrator::new(driver, llm, config);
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let outcome = orchestrator.run(goal).await;
    if let Err(e) = orchestrator.shutdown().await {
        warn!(error = %e, "browser cleanup failed");
    }
    let outcome = outcome?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn serve(driver: PageDriver, llm: Arc<OpenAiClient>, config: AgentConfig, port: u16) -> Result<()> {
    let (event_tx, _) = broadcast::channel::<AgentEvent>(128);
    let orchestrator = Orchestrator::new(driver, llm, config)
        .with_observer(Arc::new(BroadcastObserver::new(event_tx.clone())));
    let mut goals = face::start_server(port, event_tx.clone(), orchestrator.stop_handle()).await?;

    loop {
        tokio::select! {
            goal = goals.recv() => {
                let Some(goal) = goal else { break };
                let _ = event_tx.send(AgentEvent::Thinking);
                let event = match orchestrator.run(&goal).await {
                    Ok(outcome) => outcome_event(&outcome),
                    Err(e) => {
                        error!(error = %e, "task rejected");
                        AgentEvent::TaskError { message: e.to_string() }
                    }
                };
                let _ = event_tx.send(event);
                let _ = event_tx.send(AgentEvent::Ready);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    orchestrator.shutdown().await?;
    Ok(())
}

fn outcome_event(outcome: &TaskOutcome) -> AgentEvent {
    match outcome.status {
        TaskStatus::Stopped => AgentEvent::TaskStopped {
            steps: outcome.data.len(),
        },
        TaskStatus::Completed if outcome.success => AgentEvent::TaskComplete {
            summary: summarize(outcome),
        },
        _ => AgentEvent::TaskError {
            message: outcome
                .error
                .clone()
                .unwrap_or_else(|| "task failed".to_string()),
        },
    }
}

/// The last extracted text if any, otherwise a step count.
fn summarize(outcome: &TaskOutcome) -> String {
    let extracted = outcome
        .data
        .iter()
        .rev()
        .find_map(|record| record.result.text().map(str::to_string));
    match extracted {
        Some(text) => text,
        None => format!(
            "finished after {} step(s) in {} ms",
            outcome.data.len(),
            outcome.execution_time_ms
        ),
    }
}
