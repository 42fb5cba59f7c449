use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::CompletionError;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub prompt: String,
    /// JSON schema the response should satisfy, when the provider supports it.
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Structured(Value),
}

impl Completion {
    pub fn into_text(self) -> String {
        match self {
            Completion::Text(text) => text,
            Completion::Structured(value) => value.to_string(),
        }
    }
}

/// Producer half of a [`CompletionStream`].
pub struct StreamSender {
    tx: mpsc::Sender<Result<String, CompletionError>>,
    cancel: CancellationToken,
}

impl StreamSender {
    /// Returns false once the consumer cancelled or went away.
    pub async fn send(&self, chunk: String) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(Ok(chunk)) => sent.is_ok(),
        }
    }

    pub async fn fail(&self, error: CompletionError) {
        let _ = self.tx.send(Err(error)).await;
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Incremental completion delivered over a bounded channel. Cancelling closes
/// the channel and tells the producer to stop.
pub struct CompletionStream {
    rx: mpsc::Receiver<Result<String, CompletionError>>,
    cancel: CancellationToken,
}

impl CompletionStream {
    pub fn channel(capacity: usize) -> (StreamSender, CompletionStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        (
            StreamSender {
                tx,
                cancel: cancel.clone(),
            },
            CompletionStream { rx, cancel },
        )
    }

    pub async fn next_chunk(&mut self) -> Option<Result<String, CompletionError>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    /// Drain the stream into one string.
    pub async fn collect(mut self) -> Result<String, CompletionError> {
        let mut text = String::new();
        while let Some(chunk) = self.next_chunk().await {
            text.push_str(&chunk?);
        }
        if self.cancel.is_cancelled() {
            return Err(CompletionError::Cancelled);
        }
        Ok(text)
    }
}

/// The language-model boundary the planner depends on. Retries, fallbacks
/// and provider selection live behind it.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError>;

    /// Streamed variant. The default delivers the whole completion as one chunk.
    async fn stream(
        &self,
        request: &CompletionRequest,
        buffer: usize,
    ) -> Result<CompletionStream, CompletionError> {
        let completion = self.complete(request).await?;
        let (sender, stream) = CompletionStream::channel(buffer);
        sender.send(completion.into_text()).await;
        Ok(stream)
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    structured_output: bool,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, CompletionError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CompletionError::MissingCredentials("OPENAI_API_KEY not set".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            structured_output: config.structured_output,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": self.temperature,
        });
        if stream {
            body["stream"] = json!(true);
        }
        if let (Some(schema), true) = (&request.schema, self.structured_output) {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "task_plan", "schema": schema, "strict": false},
            });
        }
        body
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, CompletionError> {
        let body = self.body(request, stream);
        debug!(endpoint = %self.endpoint(), model = %self.model, stream, "sending completion request");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        let message = payload["error"]["message"]
            .as_str()
            .unwrap_or("unknown API error")
            .to_string();
        warn!(status = status.as_u16(), %message, "completion API error");
        Err(CompletionError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let response = self.send(request, false).await?;
        let payload: Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CompletionError::EmptyResponse(payload.to_string()))?;
        debug!(content, "completion received");

        if request.schema.is_some() && self.structured_output {
            if let Ok(value) = serde_json::from_str::<Value>(content) {
                return Ok(Completion::Structured(value));
            }
        }
        Ok(Completion::Text(content.to_string()))
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        buffer: usize,
    ) -> Result<CompletionStream, CompletionError> {
        let mut response = self.send(request, true).await?;
        let (sender, stream) = CompletionStream::channel(buffer);
        let cancel = sender.cancellation();

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    next = response.chunk() => next,
                };
                match next {
                    Ok(Some(bytes)) => {
                        lines.extend(&bytes);
                        while let Some(line) = lines.next_line() {
                            match parse_sse_line(&line) {
                                SseLine::Chunk(text) => {
                                    if !sender.send(text).await {
                                        return;
                                    }
                                }
                                SseLine::Done => return,
                                SseLine::Skip => {}
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        sender.fail(e.into()).await;
                        return;
                    }
                }
            }
        });
        Ok(stream)
    }
}

/// Accumulates raw body bytes and hands out complete lines. Decoding waits
/// for the newline so a character split across network chunks stays intact.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.pending.iter().position(|b| *b == b'\n')?;
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => return Some(text.to_string()),
                Err(e) => warn!(error = %e, "skipping non-UTF-8 stream line"),
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Chunk(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(value) => match value["choices"][0]["delta"]["content"].as_str() {
            Some(text) if !text.is_empty() => SseLine::Chunk(text.to_string()),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Skip,
    }
}
