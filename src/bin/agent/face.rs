use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use browser_pilot::orchestrator::{StopHandle, TaskObserver};
use browser_pilot::types::{ActionResult, TaskPlan, TaskStep};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Events streamed to the browser via SSE.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Plan { steps: Vec<String> },
    StepStart { iteration: usize, description: String },
    StepComplete { iteration: usize, description: String, trace: Option<String> },
    StepError { iteration: usize, description: String, message: String },
    PlanningError { iteration: usize, message: String },
    Progress { message: String },
    TaskComplete { summary: String },
    TaskError { message: String },
    TaskStopped { steps: usize },
    Thinking,
    Ready,
}

impl AgentEvent {
    fn name(&self) -> &'static str {
        match self {
            AgentEvent::Plan { .. } => "plan",
            AgentEvent::StepStart { .. } => "step_start",
            AgentEvent::StepComplete { .. } => "step_complete",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::PlanningError { .. } => "planning_error",
            AgentEvent::Progress { .. } => "progress",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::TaskStopped { .. } => "task_stopped",
            AgentEvent::Thinking => "thinking",
            AgentEvent::Ready => "ready",
        }
    }

    fn to_sse_event(&self) -> Option<Event> {
        match Event::default().event(self.name()).json_data(self) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "dropping unserializable event");
                None
            }
        }
    }
}

/// Forwards orchestrator callbacks to every connected UI.
pub struct BroadcastObserver {
    tx: broadcast::Sender<AgentEvent>,
}

impl BroadcastObserver {
    pub fn new(tx: broadcast::Sender<AgentEvent>) -> Self {
        Self { tx }
    }

    fn emit(&self, event: AgentEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl TaskObserver for BroadcastObserver {
    fn on_plan_created(&self, plan: &TaskPlan) {
        self.emit(AgentEvent::Plan {
            steps: plan.steps.iter().map(TaskStep::summary).collect(),
        });
    }

    fn on_step_start(&self, iteration: usize, step: &TaskStep) {
        self.emit(AgentEvent::StepStart {
            iteration,
            description: step.summary(),
        });
    }

    fn on_step_complete(&self, iteration: usize, step: &TaskStep, result: &ActionResult) {
        self.emit(AgentEvent::StepComplete {
            iteration,
            description: step.summary(),
            trace: result.trace.clone(),
        });
    }

    fn on_step_error(&self, iteration: usize, step: &TaskStep, error: &str) {
        self.emit(AgentEvent::StepError {
            iteration,
            description: step.summary(),
            message: error.to_string(),
        });
    }

    fn on_planning_error(&self, iteration: usize, error: &str) {
        self.emit(AgentEvent::PlanningError {
            iteration,
            message: error.to_string(),
        });
    }

    fn on_progress(&self, message: &str) {
        self.emit(AgentEvent::Progress {
            message: message.to_string(),
        });
    }
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
    stop: StopHandle,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Serve the UI on the first free port starting at `port`. Returns the queue
/// of submitted goals.
pub async fn start_server(
    port: u16,
    event_tx: broadcast::Sender<AgentEvent>,
    stop: StopHandle,
) -> Result<mpsc::Receiver<String>> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let state = Arc::new(AppState {
        cmd_tx,
        event_tx,
        stop,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/stop", post(stop_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for candidate in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await {
            Ok(listener) => {
                bound = Some((listener, candidate));
                break;
            }
            Err(e) => debug!(port = candidate, error = %e, "port busy"),
        }
    }
    let (listener, port) =
        bound.ok_or_else(|| anyhow!("could not bind any port from {port}; is another agent running?"))?;
    info!("web UI running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "web UI server stopped");
        }
    });
    Ok(cmd_rx)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> StatusCode {
    let goal = payload.command.trim().to_string();
    if goal.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    info!(%goal, "goal submitted");
    match state.cmd_tx.send(goal).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.stop.stop();
    StatusCode::ACCEPTED
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|received| match received {
        Ok(event) => event.to_sse_event().map(Ok),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Browser Pilot</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0a0a0f; color: #e0e0e0; font-family: system-ui, sans-serif;
         height: 100vh; display: flex; flex-direction: column; }
  header { padding: 20px 32px; border-bottom: 1px solid #1a1a2e; display: flex; align-items: center; gap: 12px; }
  header h1 { font-size: 19px; font-weight: 600; color: #fff; }
  .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  .dot.busy { background: #f59e0b; animation: pulse 1.5s infinite; }
  @keyframes pulse { 50% { opacity: 0.4; } }
  main { flex: 1; display: flex; flex-direction: column; max-width: 820px; width: 100%;
         margin: 0 auto; padding: 24px 32px; gap: 16px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 8px; }
  .entry { padding: 10px 14px; border-radius: 8px; font-size: 14px; line-height: 1.5; background: #111118; }
  .entry.user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.plan { border-left: 3px solid #8b5cf6; color: #c4b5fd; font-size: 13px; }
  .entry.step { border-left: 3px solid #3b82f6; font-family: monospace; font-size: 13px; }
  .entry.step .num { color: #6366f1; font-weight: 700; margin-right: 8px; }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.done { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .entry.info { border-left: 3px solid #f59e0b; color: #fcd34d; }
  .controls { display: flex; gap: 8px; }
  #cmd { flex: 1; background: #111118; border: 1px solid #222; border-radius: 8px; padding: 12px 16px;
         color: #fff; font-size: 16px; outline: none; }
  #cmd:focus { border-color: #6366f1; }
  #cmd:disabled { opacity: 0.5; }
  button { border: none; border-radius: 8px; padding: 12px 22px; font-size: 15px; font-weight: 600;
           cursor: pointer; color: #fff; background: #6366f1; }
  button#stop { background: #b91c1c; }
  button:disabled { background: #333; cursor: not-allowed; }
</style>
</head>
<body>
  <header><div class="dot" id="status"></div><h1>Browser Pilot</h1></header>
  <main>
    <div id="log"></div>
    <div class="controls">
      <input type="text" id="cmd" placeholder="Describe a goal, e.g. find the price of the cheapest flight" autofocus />
      <button id="send" onclick="send()">Run</button>
      <button id="stop" onclick="stop()" disabled>Stop</button>
    </div>
  </main>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const sendBtn = document.getElementById('send');
  const stopBtn = document.getElementById('stop');
  const dot = document.getElementById('status');
  let busy = false;
  const esc = s => String(s ?? '').replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function add(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    busy = b;
    cmd.disabled = b;
    sendBtn.disabled = b;
    stopBtn.disabled = !b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) cmd.focus();
  }

  async function send() {
    const text = cmd.value.trim();
    if (!text || busy) return;
    cmd.value = '';
    add('user', '<strong>Goal:</strong> ' + esc(text));
    setBusy(true);
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  }

  async function stop() {
    stopBtn.disabled = true;
    await fetch('/stop', {method: 'POST'});
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));

  on('plan', d => add('plan', d.steps.length ? 'Plan: ' + d.steps.map(esc).join(' &rarr; ') : 'Plan: goal reached'));
  on('step_start', d => add('step', '<span class="num">#' + d.iteration + '</span>' + esc(d.description)));
  on('step_complete', d => { if (d.trace) add('step', '<span class="num">ok</span>' + esc(d.trace)); });
  on('step_error', d => add('error', '<strong>Step failed:</strong> ' + esc(d.message)));
  on('planning_error', d => add('error', '<strong>Planning failed (#' + d.iteration + '):</strong> ' + esc(d.message)));
  on('task_complete', d => add('done', '<strong>Done:</strong> ' + esc(d.summary)));
  on('task_error', d => add('error', '<strong>Task failed:</strong> ' + esc(d.message)));
  on('task_stopped', d => add('info', 'Stopped after ' + d.steps + ' step(s).'));
  on('thinking', () => add('info', 'Working...'));
  on('ready', () => setBusy(false));

  add('done', 'Agent ready. Describe a goal to begin.');
</script>
</body>
</html>
"##;
