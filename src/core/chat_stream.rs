//! Streaming transport against the generation service.
//!
//! [`ChatStreamService::open`] issues exactly one streaming request and
//! returns a [`StreamHandle`]: a cancellable subscription yielding one
//! cumulative [`ResponseSnapshot`] per received fragment, then a terminal
//! [`StreamEvent::Completed`] or [`StreamEvent::Failed`]. The sequence is
//! finite and not restartable; retrying means opening a fresh stream.

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{
    construct_api_url, format_api_error, ApiMessage, GenerateRequest, GenerateResponse,
    RESPONSE_TEMPERATURE,
};

/// One incremental unit of a streamed response. Either channel may be
/// empty; both are concatenated, never replaced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamDelta {
    pub text: String,
    pub thought: String,
}

#[derive(Clone, Debug)]
enum RawEvent {
    Delta(StreamDelta),
    Error(String),
    End,
}

/// The full accumulated response as of the latest fragment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseSnapshot {
    pub text: String,
    pub thought: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Snapshot(ResponseSnapshot),
    Failed(String),
    Completed,
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_instruction: String,
    pub history: Vec<ApiMessage>,
    pub deep_reasoning: bool,
    pub web_retrieval: bool,
}

pub struct ChatStreamService;

impl ChatStreamService {
    /// Open one stream against the service. The request itself runs on a
    /// spawned task; dropping or cancelling the handle tears it down.
    pub fn open(params: StreamParams) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = run_stream(params, &tx) => {}
                _ = token.cancelled() => {}
            }
        });
        StreamHandle::new(rx, cancel)
    }
}

/// A live response stream plus its growing text and thought buffers.
///
/// Abandoning the handle (drop) cancels the underlying connection; no
/// fragment is applied after that point.
pub struct StreamHandle {
    rx: mpsc::UnboundedReceiver<RawEvent>,
    cancel: CancellationToken,
    snapshot: ResponseSnapshot,
    finished: bool,
}

impl StreamHandle {
    fn new(rx: mpsc::UnboundedReceiver<RawEvent>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            snapshot: ResponseSnapshot::default(),
            finished: false,
        }
    }

    /// Await the next event. Fragments are applied strictly in arrival
    /// order. Returns `None` once the stream has delivered its terminal
    /// event or the connection task went away.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(RawEvent::Delta(delta)) => {
                self.snapshot.text.push_str(&delta.text);
                self.snapshot.thought.push_str(&delta.thought);
                Some(StreamEvent::Snapshot(self.snapshot.clone()))
            }
            Some(RawEvent::Error(message)) => {
                self.finished = true;
                Some(StreamEvent::Failed(message))
            }
            Some(RawEvent::End) => {
                self.finished = true;
                Some(StreamEvent::Completed)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> &ResponseSnapshot {
        &self.snapshot
    }

    #[cfg(test)]
    fn test_pair() -> (mpsc::UnboundedSender<RawEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, CancellationToken::new()))
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn build_request(params: &StreamParams) -> GenerateRequest {
    let mut messages = Vec::with_capacity(params.history.len() + 1);
    if !params.system_instruction.is_empty() {
        messages.push(ApiMessage {
            role: "system".to_string(),
            content: params.system_instruction.clone(),
        });
    }
    messages.extend(params.history.iter().cloned());

    GenerateRequest {
        model: params.model.clone(),
        messages,
        stream: true,
        temperature: RESPONSE_TEMPERATURE,
        reasoning_effort: params.deep_reasoning.then(|| "high".to_string()),
        web_retrieval: params.web_retrieval.then_some(true),
    }
}

async fn run_stream(params: StreamParams, tx: &mpsc::UnboundedSender<RawEvent>) {
    let request = build_request(&params);
    let url = construct_api_url(&params.base_url, "chat/completions");

    let response = params
        .client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", params.api_key))
        .json(&request)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(RawEvent::Error(format_api_error(&e.to_string())));
            let _ = tx.send(RawEvent::End);
            return;
        }
    };

    if !response.status().is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        let _ = tx.send(RawEvent::Error(format_api_error(&error_text)));
        let _ = tx.send(RawEvent::End);
        return;
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(RawEvent::Error(format_api_error(&e.to_string())));
                let _ = tx.send(RawEvent::End);
                return;
            }
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(s) => s.trim().to_string(),
                Err(e) => {
                    debug!("invalid UTF-8 in stream: {e}");
                    buffer.drain(..=newline_pos);
                    continue;
                }
            };
            buffer.drain(..=newline_pos);
            if process_sse_line(&line, tx) {
                return;
            }
        }
    }

    let _ = tx.send(RawEvent::End);
}

/// Handle one SSE line. Returns true when the stream is over.
fn process_sse_line(line: &str, tx: &mpsc::UnboundedSender<RawEvent>) -> bool {
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return false;
    };

    if payload == "[DONE]" {
        let _ = tx.send(RawEvent::End);
        return true;
    }

    match serde_json::from_str::<GenerateResponse>(payload) {
        Ok(response) => {
            if let Some(choice) = response.choices.first() {
                let delta = StreamDelta {
                    text: choice.delta.content.clone().unwrap_or_default(),
                    thought: choice.delta.reasoning.clone().unwrap_or_default(),
                };
                let _ = tx.send(RawEvent::Delta(delta));
            }
            false
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return false;
            }
            let _ = tx.send(RawEvent::Error(format_api_error(payload)));
            let _ = tx.send(RawEvent::End);
            true
        }
    }
}
