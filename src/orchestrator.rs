//! The agent loop: plan, execute the first step, observe, repeat.

use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{ActionRegistry, RetryPolicy};
use crate::brain::{PlanContext, Planner};
use crate::config::AgentConfig;
use crate::driver::PageDriver;
use crate::error::{AgentError, DriverError};
use crate::llm::CompletionService;
use crate::memory::{AgentMemory, MemoryKind, TurnRole};
use crate::monitor;
use crate::navigator::Navigator;
use crate::types::{ActionResult, PlanStatus, StepAction, TaskPlan, TaskStep};

/// Descriptions that mark a click or fill as the final submit of a task.
const SUBMIT_KEYWORDS: &[&str] = &[
    "submit",
    "sign in",
    "log in",
    "login",
    "place order",
    "checkout",
    "confirm",
];

/// Progress callbacks. All methods default to doing nothing.
pub trait TaskObserver: Send + Sync {
    fn on_plan_created(&self, _plan: &TaskPlan) {}
    fn on_step_start(&self, _iteration: usize, _step: &TaskStep) {}
    fn on_step_complete(&self, _iteration: usize, _step: &TaskStep, _result: &ActionResult) {}
    fn on_step_error(&self, _iteration: usize, _step: &TaskStep, _error: &str) {}
    /// The planner could not produce a usable plan this iteration.
    fn on_planning_error(&self, _iteration: usize, _error: &str) {}
    fn on_progress(&self, _message: &str) {}
}

pub struct NoopObserver;

impl TaskObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planning,
    Executing,
    Validating,
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Stopped,
}

impl From<TaskStatus> for RunState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Completed => RunState::Completed,
            TaskStatus::Failed => RunState::Failed,
            TaskStatus::Stopped => RunState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub iteration: usize,
    pub step: TaskStep,
    pub result: ActionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub success: bool,
    /// Every executed step, including those before a failure or stop.
    pub data: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: usize,
    pub execution_time_ms: u64,
}

/// Requests cooperative cancellation of whatever run is active. Safe to use
/// when nothing is running.
#[derive(Clone)]
pub struct StopHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let token = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !token.is_cancelled() {
            info!("stop requested");
            token.cancel();
        }
    }
}

/// Runs one task at a time against one tab.
pub struct Orchestrator {
    config: AgentConfig,
    planner: Planner,
    navigator: Navigator,
    driver: tokio::sync::Mutex<PageDriver>,
    state: Mutex<RunState>,
    current: Arc<Mutex<CancellationToken>>,
    observer: Arc<dyn TaskObserver>,
}

impl Orchestrator {
    pub fn new(driver: PageDriver, llm: Arc<dyn CompletionService>, config: AgentConfig) -> Self {
        let registry = ActionRegistry::with_defaults(RetryPolicy::from(&config.actions));
        Self {
            planner: Planner::new(llm, &config),
            navigator: Navigator::new(registry, &config),
            driver: tokio::sync::Mutex::new(driver),
            state: Mutex::new(RunState::Idle),
            current: Arc::new(Mutex::new(CancellationToken::new())),
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            current: self.current.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    fn set_state(&self, next: RunState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!(from = ?*state, to = ?next, "run state");
            *state = next;
        }
    }

    /// Execute one task to completion, failure, or stop.
    ///
    /// Returns `Err` only when the run cannot start at all; everything that
    /// goes wrong inside the run is reported in the [`TaskOutcome`].
    pub async fn run(&self, goal: &str) -> Result<TaskOutcome, AgentError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AgentError::EmptyGoal);
        }
        let mut driver = self.driver.try_lock().map_err(|_| AgentError::TaskActive)?;
        if driver.is_closed() {
            return Err(DriverError::Closed.into());
        }

        let cancel = CancellationToken::new();
        *lock(&self.current) = cancel.clone();
        let task_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(%task_id, goal, "task started");

        let mut memory = AgentMemory::new(self.config.memory.max_turns);
        memory.remember("goal", json!(goal), MemoryKind::Context);
        memory.append_turn(TurnRole::User, goal);

        let mut data: Vec<StepRecord> = Vec::new();
        let mut last_error: Option<String> = None;
        let mut ended: Option<TaskStatus> = None;
        let mut iterations = 0;

        for iteration in 1..=self.config.max_iterations {
            memory.cleanup(self.config.memory.max_age());
            if cancel.is_cancelled() {
                ended = Some(TaskStatus::Stopped);
                break;
            }
            iterations = iteration;

            self.set_state(RunState::Planning);
            self.observer.on_progress(&format!("iteration {iteration}: planning"));
            let snapshot = match driver.current_snapshot().await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(%task_id, iteration, error = %e, "could not index page before planning");
                    memory.remember(
                        "page_error",
                        json!({"iteration": iteration, "error": e.to_string()}),
                        MemoryKind::State,
                    );
                    None
                }
            };

            let ctx = PlanContext {
                iteration,
                snapshot: snapshot.as_deref(),
                memory: &mut memory,
                cancel: &cancel,
            };
            let mut plan = match self.planner.next(goal, ctx).await {
                Ok(plan) => plan,
                Err(AgentError::Stopped) => {
                    ended = Some(TaskStatus::Stopped);
                    break;
                }
                Err(err) => {
                    warn!(%task_id, iteration, error = %err, "planning failed");
                    let message = err.to_string();
                    memory.remember(
                        format!("result:planning-{iteration}"),
                        json!({"step": "planning", "success": false, "error": message}),
                        MemoryKind::Result,
                    );
                    self.observer.on_planning_error(iteration, &message);
                    last_error = Some(message);
                    continue;
                }
            };

            plan.status = if plan.is_complete() {
                PlanStatus::Finished
            } else {
                PlanStatus::Executing
            };
            memory.remember("plan", serde_json::to_value(&plan).unwrap_or_default(), MemoryKind::Plan);
            self.observer.on_plan_created(&plan);
            if plan.is_complete() {
                info!(%task_id, iteration, "planner reports the goal is complete");
                ended = Some(TaskStatus::Completed);
                break;
            }

            if plan.steps.len() > 1 {
                debug!(%task_id, discarded = plan.steps.len() - 1, "executing first step only");
            }
            let mut step = plan.steps.swap_remove(0);
            if cancel.is_cancelled() {
                ended = Some(TaskStatus::Stopped);
                break;
            }

            self.set_state(RunState::Executing);
            step.start()?;
            info!(%task_id, iteration, step = %step.summary(), "executing step");
            self.observer.on_step_start(iteration, &step);
            let outcome = self
                .navigator
                .execute(&step, &mut driver, &mut memory, &cancel)
                .await;

            self.set_state(RunState::Validating);
            let result = match outcome {
                Ok(result) => result,
                Err(err) => ActionResult::failure(err.to_string()),
            };
            let verdict = monitor::check(&serde_json::to_value(&result).unwrap_or_default());
            memory.remember(
                "verdict",
                json!({"step": step.summary(), "valid": verdict.valid, "message": verdict.message}),
                MemoryKind::State,
            );
            if !verdict.valid {
                warn!(%task_id, iteration, verdict = %verdict.message, "step result failed validation");
                self.observer
                    .on_progress(&format!("check failed for {}: {}", step.summary(), verdict.message));
            }
            if result.success {
                step.complete()?;
                self.observer.on_step_complete(iteration, &step, &result);
            } else {
                step.fail()?;
                let message = result.error.clone().unwrap_or_default();
                warn!(%task_id, iteration, error = %message, "step failed");
                self.observer.on_step_error(iteration, &step, &message);
                last_error = Some(message);
            }

            let finished = self.config.early_completion && result.success && completes_goal(&step);
            data.push(StepRecord {
                iteration,
                step,
                result,
            });
            if finished {
                info!(%task_id, iteration, "step satisfies the goal, finishing early");
                ended = Some(TaskStatus::Completed);
                break;
            }
        }

        let status = match ended {
            Some(TaskStatus::Stopped) => {
                last_error = Some(AgentError::Stopped.to_string());
                TaskStatus::Stopped
            }
            Some(_) if data.is_empty() => TaskStatus::Completed,
            Some(_) => {
                let results: Vec<_> = data
                    .iter()
                    .map(|r| serde_json::to_value(&r.result).unwrap_or_default())
                    .collect();
                let verdict = monitor::check_all(&results);
                if verdict.valid {
                    TaskStatus::Completed
                } else {
                    last_error = Some(verdict.message);
                    TaskStatus::Failed
                }
            }
            None => {
                let budget = format!("iteration budget of {} exhausted", self.config.max_iterations);
                last_error = Some(match last_error {
                    Some(e) => format!("{budget}; last error: {e}"),
                    None => budget,
                });
                TaskStatus::Failed
            }
        };

        let success = status == TaskStatus::Completed;
        let outcome = TaskOutcome {
            task_id,
            status,
            success,
            data,
            error: if success { None } else { last_error },
            iterations,
            execution_time_ms: started.elapsed().as_millis() as u64,
        };
        self.set_state(status.into());
        info!(
            task_id = %outcome.task_id,
            status = ?outcome.status,
            steps = outcome.data.len(),
            elapsed_ms = outcome.execution_time_ms,
            "task finished"
        );
        self.observer.on_progress(&format!("task {status:?}"));
        Ok(outcome)
    }

    /// Release the tab. Waits for an active run to finish first.
    pub async fn shutdown(&self) -> Result<(), DriverError> {
        self.stop();
        self.driver.lock().await.cleanup().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A successful extract, or a click/fill described as a submit.
fn completes_goal(step: &TaskStep) -> bool {
    match step.action {
        StepAction::Extract { .. } => true,
        StepAction::Click { .. } | StepAction::Fill { .. } => {
            let description = step.description.to_lowercase();
            SUBMIT_KEYWORDS.iter().any(|k| description.contains(k))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeElement, FakePage, ScriptedCompletion, test_config};
    use crate::error::CompletionError;
    use crate::types::StepStatus;
    use std::sync::OnceLock;
    use tokio::sync::Notify;

    const SCROLL_TOP: &str = r#"{"steps": [{"type": "scroll", "data": "top"}]}"#;
    const DONE: &str = r#"{"steps": []}"#;

    async fn orchestrator(page: &FakePage, llm: Arc<ScriptedCompletion>, config: AgentConfig) -> Orchestrator {
        let driver = PageDriver::connect(Arc::new(page.clone()), &config).await.unwrap();
        Orchestrator::new(driver, llm, config)
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        statuses: Mutex<Vec<StepStatus>>,
        plan_statuses: Mutex<Vec<PlanStatus>>,
        progress: Mutex<Vec<String>>,
        stop_after: Option<usize>,
        handle: OnceLock<StopHandle>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            lock(&self.events).clone()
        }
    }

    impl TaskObserver for Recorder {
        fn on_plan_created(&self, plan: &TaskPlan) {
            lock(&self.plan_statuses).push(plan.status);
            lock(&self.events).push(format!("plan:{}", plan.steps.len()));
        }

        fn on_step_start(&self, iteration: usize, step: &TaskStep) {
            lock(&self.statuses).push(step.status);
            lock(&self.events).push(format!("start:{iteration}"));
        }

        fn on_step_complete(&self, iteration: usize, step: &TaskStep, _result: &ActionResult) {
            lock(&self.statuses).push(step.status);
            lock(&self.events).push(format!("complete:{iteration}"));
            if self.stop_after == Some(iteration) {
                if let Some(handle) = self.handle.get() {
                    handle.stop();
                }
            }
        }

        fn on_step_error(&self, iteration: usize, step: &TaskStep, _error: &str) {
            lock(&self.statuses).push(step.status);
            lock(&self.events).push(format!("error:{iteration}"));
        }

        fn on_planning_error(&self, iteration: usize, _error: &str) {
            lock(&self.events).push(format!("planning_error:{iteration}"));
        }

        fn on_progress(&self, message: &str) {
            lock(&self.progress).push(message.to_string());
        }
    }

    #[tokio::test]
    async fn extracting_the_title_completes_the_task() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::new([
            r#"{"steps": [{"type": "extract", "target": 0, "description": "read the heading"}]}"#,
        ]));
        let agent = orchestrator(&page, llm.clone(), test_config()).await;

        let outcome = agent.run("extract the page title").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.data.len(), 1);
        assert_eq!(outcome.data[0].result.text(), Some("Example Domain"));
        assert_eq!(outcome.data[0].step.status, StepStatus::Completed);
        assert!(outcome.error.is_none());
        assert!(llm.prompts()[0].contains("[0] h1 \"Example Domain\""));
        assert_eq!(agent.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn empty_first_plan_is_immediate_success() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::new([DONE]));
        let agent = orchestrator(&page, llm.clone(), test_config()).await;

        let outcome = agent.run("nothing to do").await.unwrap();
        assert!(outcome.success);
        assert!(outcome.data.is_empty());
        assert_eq!(outcome.iterations, 1);
        assert_eq!(llm.prompts().len(), 1);
        assert!(!outcome.task_id.is_empty());
    }

    #[tokio::test]
    async fn stop_between_iterations_keeps_partial_results() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::default().repeating(SCROLL_TOP));
        let recorder = Arc::new(Recorder {
            stop_after: Some(3),
            ..Recorder::default()
        });
        let agent = orchestrator(&page, llm.clone(), test_config())
            .await
            .with_observer(recorder.clone());
        assert!(recorder.handle.set(agent.stop_handle()).is_ok());

        let outcome = agent.run("scroll forever").await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Stopped);
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("stopped by user"));
        let iterations: Vec<usize> = outcome.data.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3]);
        assert_eq!(llm.prompts().len(), 3);
        assert_eq!(agent.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn failed_fill_is_visible_to_the_next_plan() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::new([
            r#"{"steps": [{"type": "fill", "target": 9, "data": "rust"}]}"#,
            DONE,
        ]));
        let recorder = Arc::new(Recorder::default());
        let agent = orchestrator(&page, llm.clone(), test_config())
            .await
            .with_observer(recorder.clone());

        let outcome = agent.run("search for rust").await.unwrap();
        let first = &outcome.data[0].result;
        assert!(!first.success);
        assert!(first.error.as_deref().is_some_and(|e| e.contains("stale index 9")));
        assert_eq!(outcome.data[0].step.status, StepStatus::Failed);

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("FAILED fill #9 with \"rust\": stale index 9"));
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(lock(&recorder.events).contains(&"error:1".to_string()));
    }

    #[tokio::test]
    async fn invalid_step_result_gets_a_recorded_verdict() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::new([
            r#"{"steps": [{"type": "fill", "target": 9, "data": "rust"}]}"#,
            r#"{"steps": [{"type": "extract", "target": 0}]}"#,
        ]));
        let recorder = Arc::new(Recorder::default());
        let agent = orchestrator(&page, llm.clone(), test_config())
            .await
            .with_observer(recorder.clone());

        let outcome = agent.run("search for rust").await.unwrap();
        assert!(outcome.success);

        let progress = lock(&recorder.progress).clone();
        let checks: Vec<_> = progress.iter().filter(|m| m.starts_with("check failed")).collect();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].contains("fill #9 with \"rust\""));
        assert!(checks[0].contains("result carries an error: stale index 9"));

        let prompts = llm.prompts();
        assert!(prompts[1].contains("Last step check: fill #9 with \"rust\" is not usable"));
        assert!(!prompts[0].contains("Last step check"));
    }

    #[tokio::test]
    async fn never_finishing_goal_stops_at_the_iteration_cap() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::default().repeating(SCROLL_TOP));
        let mut config = test_config();
        config.max_iterations = 4;
        let agent = orchestrator(&page, llm.clone(), config).await;

        let outcome = agent.run("loop").await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(!outcome.success);
        assert_eq!(outcome.data.len(), 4);
        assert_eq!(llm.prompts().len(), 4);
        assert!(outcome.error.unwrap().contains("iteration budget of 4 exhausted"));
    }

    #[tokio::test]
    async fn second_run_while_active_is_rejected() {
        let page = FakePage::example();
        let gate = Arc::new(Notify::new());
        let llm = Arc::new(ScriptedCompletion::new([DONE]).gated(gate.clone()));
        let agent = Arc::new(orchestrator(&page, llm.clone(), test_config()).await);

        let first = tokio::spawn({
            let agent = agent.clone();
            async move { agent.run("first").await }
        });
        llm.wait_for_call().await;

        assert!(matches!(agent.run("second").await, Err(AgentError::TaskActive)));
        assert_eq!(agent.state(), RunState::Planning);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(llm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn step_status_only_moves_forward() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::new([
            r#"{"steps": [{"type": "scroll", "data": "bottom"}, {"type": "click", "target": 1}]}"#,
            r#"{"steps": [{"type": "teleport"}]}"#,
            DONE,
        ]));
        let recorder = Arc::new(Recorder::default());
        let agent = orchestrator(&page, llm.clone(), test_config())
            .await
            .with_observer(recorder.clone());

        let outcome = agent.run("wander").await.unwrap();
        assert_eq!(
            recorder.events(),
            vec!["plan:2", "start:1", "complete:1", "plan:1", "start:2", "error:2", "plan:0"]
        );
        assert_eq!(
            *lock(&recorder.statuses),
            vec![StepStatus::Running, StepStatus::Completed, StepStatus::Running, StepStatus::Failed]
        );
        assert_eq!(
            *lock(&recorder.plan_statuses),
            vec![PlanStatus::Executing, PlanStatus::Executing, PlanStatus::Finished]
        );
        // only the first step of the two-step plan ran
        assert_eq!(page.calls("click"), 0);
        assert!(outcome.success);
        assert!(outcome.data[1].result.error.as_deref().unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn planning_errors_are_fed_back_and_the_loop_continues() {
        let page = FakePage::example();
        let llm = Arc::new(
            ScriptedCompletion::new(["I would click the link"])
                .then_error(CompletionError::Api {
                    status: 503,
                    message: "overloaded".into(),
                })
                .repeating(DONE),
        );
        let recorder = Arc::new(Recorder::default());
        let agent = orchestrator(&page, llm.clone(), test_config())
            .await
            .with_observer(recorder.clone());

        let outcome = agent.run("read").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(
            recorder.events(),
            vec!["planning_error:1", "planning_error:2", "plan:0"]
        );
        let prompts = llm.prompts();
        assert!(prompts[1].contains("FAILED planning: planning failed: no JSON in reply"));
        assert!(prompts[2].contains("overloaded"));
    }

    #[tokio::test]
    async fn submit_click_ends_the_run_early() {
        let page = FakePage::new(
            "https://login.test/",
            "Login",
            vec![FakeElement::input("#user", "user"), FakeElement::button("#go", "Sign in")],
        );
        let llm = Arc::new(ScriptedCompletion::new([
            r##"{"steps": [{"type": "click", "target": "#go", "description": "Submit the login form"}]}"##,
        ]));
        let agent = orchestrator(&page, llm.clone(), test_config()).await;

        let outcome = agent.run("log in").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data.len(), 1);
        assert_eq!(page.calls("click"), 1);
        assert_eq!(page.url(), "https://login.test/");
    }

    #[tokio::test]
    async fn stop_without_a_run_is_harmless() {
        let page = FakePage::example();
        let llm = Arc::new(ScriptedCompletion::new([DONE]));
        let agent = orchestrator(&page, llm, test_config()).await;
        agent.stop();
        agent.stop_handle().stop();
        assert_eq!(agent.state(), RunState::Idle);

        let outcome = agent.run("after stop").await.unwrap();
        assert!(outcome.success);
        assert!(matches!(agent.run("  ").await, Err(AgentError::EmptyGoal)));
    }

    #[tokio::test]
    async fn navigation_then_fill_uses_fresh_indices() {
        let page = FakePage::new("chrome://newtab/", "", Vec::new()).with_site(
            "https://search.test/",
            "Search",
            vec![FakeElement::input("#q", "q")],
        );
        let llm = Arc::new(ScriptedCompletion::new([
            r#"{"steps": [{"type": "navigate", "target": "https://search.test/"}]}"#,
            r#"{"steps": [{"type": "fill", "target": 0, "data": "rust"}]}"#,
            DONE,
        ]));
        let agent = orchestrator(&page, llm.clone(), test_config()).await;

        let outcome = agent.run("search rust").await.unwrap();
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(page.value_of(0).as_deref(), Some("rust"));
        let prompts = llm.prompts();
        assert!(prompts[0].contains("cannot be indexed"));
        assert!(prompts[1].contains("[0] input"));
        agent.shutdown().await.unwrap();
        assert_eq!(page.close_calls(), 1);
        assert!(matches!(
            agent.run("again").await,
            Err(AgentError::Driver(DriverError::Closed))
        ));
    }
}
