//! Agent event stream protocol.
//!
//! One chat request produces a sequence of [`AgentEvent`]s ending in exactly
//! one `done` or `error`. Text arrives as `chunk` deltas keyed by message id;
//! tool invocations arrive as `tool_call` / `tool_result` pairs sharing an id.
//!
//! [`AgentStream`] is the producer half and enforces the single-terminal rule.
//! [`Transcript`] is a reference consumer that folds events into entries.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{Result, VistaError};
use crate::obs;

/// One event on the wire, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Chunk { id: String, delta: String },
    ToolCall { id: String, name: String, args: Value },
    ToolResult { id: String, result: Value },
    Done,
    Error { message: String },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done | AgentEvent::Error { .. })
    }

    /// Correlation id, for the event kinds that carry one.
    pub fn id(&self) -> Option<&str> {
        match self {
            AgentEvent::Chunk { id, .. }
            | AgentEvent::ToolCall { id, .. }
            | AgentEvent::ToolResult { id, .. } => Some(id),
            AgentEvent::Done | AgentEvent::Error { .. } => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Chunk { .. } => "chunk",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::Done => "done",
            AgentEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(VistaError::Input("messages must not be empty".into()));
        }
        Ok(())
    }
}

/// Errors from the producer side of a stream.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream already finished")]
    Finished,

    #[error("consumer disconnected")]
    Disconnected,
}

/// Producer half of one agent response.
///
/// Dropping a stream that never sent a terminal event sends
/// `error{"stream closed"}` on a best-effort basis.
pub struct AgentStream {
    tx: mpsc::Sender<AgentEvent>,
    finished: bool,
    sent: u64,
}

impl AgentStream {
    /// Create a stream and the receiver its events are delivered to.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                finished: false,
                sent: 0,
            },
            rx,
        )
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn send(&mut self, event: AgentEvent) -> std::result::Result<(), StreamError> {
        if self.finished {
            return Err(StreamError::Finished);
        }
        let terminal = event.is_terminal();
        let kind = event.kind();
        if terminal {
            self.finished = true;
        }
        let result = self
            .tx
            .send(event)
            .await
            .map_err(|_| StreamError::Disconnected);
        if result.is_ok() {
            self.sent += 1;
        }
        if terminal {
            obs::emit_agent_stream_finished(self.sent, kind);
        }
        result
    }

    pub async fn chunk(
        &mut self,
        id: &str,
        delta: &str,
    ) -> std::result::Result<(), StreamError> {
        self.send(AgentEvent::Chunk {
            id: id.to_string(),
            delta: delta.to_string(),
        })
        .await
    }

    pub async fn tool_call(
        &mut self,
        id: &str,
        name: &str,
        args: Value,
    ) -> std::result::Result<(), StreamError> {
        self.send(AgentEvent::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        })
        .await
    }

    pub async fn tool_result(
        &mut self,
        id: &str,
        result: Value,
    ) -> std::result::Result<(), StreamError> {
        self.send(AgentEvent::ToolResult {
            id: id.to_string(),
            result,
        })
        .await
    }

    pub async fn done(&mut self) -> std::result::Result<(), StreamError> {
        self.send(AgentEvent::Done).await
    }

    pub async fn error(&mut self, message: &str) -> std::result::Result<(), StreamError> {
        self.send(AgentEvent::Error {
            message: message.to_string(),
        })
        .await
    }
}

impl Drop for AgentStream {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.tx.try_send(AgentEvent::Error {
                message: "stream closed".to_string(),
            });
        }
    }
}

/// Produces the assistant's side of a conversation.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Write events for a reply to `messages` into `stream`.
    ///
    /// Implementations may finish the stream themselves; if they return
    /// without doing so, [`run_chat`] sends `done` (or `error` on `Err`).
    async fn respond(&self, messages: &[ChatMessage], stream: &mut AgentStream) -> Result<()>;
}

/// Drive one backend reply to completion, guaranteeing a terminal event.
pub async fn run_chat(backend: &dyn AgentBackend, messages: &[ChatMessage], mut stream: AgentStream) {
    let outcome = backend.respond(messages, &mut stream).await;
    if stream.is_finished() {
        return;
    }
    let _ = match outcome {
        Ok(()) => stream.done().await,
        Err(e) => stream.error(&e.to_string()).await,
    };
}

/// Reflects the last user message back, with one demonstration tool call.
///
/// Keeps the chat endpoint usable without an external model.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    chunk_size: usize,
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self { chunk_size: 16 }
    }
}

impl EchoBackend {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl AgentBackend for EchoBackend {
    async fn respond(&self, messages: &[ChatMessage], stream: &mut AgentStream) -> Result<()> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .ok_or_else(|| VistaError::Input("no user message to answer".into()))?;

        let tool_id = format!("call_{}", uuid::Uuid::new_v4().simple());
        let disconnected = |_| VistaError::Internal("chat consumer disconnected".into());
        stream
            .tool_call(&tool_id, "count_chars", json!({ "text": last.content }))
            .await
            .map_err(disconnected)?;
        stream
            .tool_result(&tool_id, json!({ "chars": last.content.chars().count() }))
            .await
            .map_err(disconnected)?;

        let msg_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        let chars: Vec<char> = last.content.chars().collect();
        for piece in chars.chunks(self.chunk_size) {
            let delta: String = piece.iter().collect();
            stream.chunk(&msg_id, &delta).await.map_err(disconnected)?;
        }
        stream.done().await.map_err(disconnected)?;
        Ok(())
    }
}

/// A rendered entry in a [`Transcript`].
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Message {
        id: String,
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
        result: Option<Value>,
    },
    /// A `tool_result` whose `tool_call` was never seen (e.g. after reconnect).
    StandaloneResult {
        id: String,
        result: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Done,
    Error(String),
}

/// Consumer-side fold of an event sequence.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    messages: HashMap<String, usize>,
    tool_calls: HashMap<String, usize>,
    terminal: Option<Terminal>,
    ignored: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns `false` if it arrived after the terminal
    /// event and was ignored.
    pub fn apply(&mut self, event: AgentEvent) -> bool {
        if self.terminal.is_some() {
            self.ignored += 1;
            return false;
        }
        match event {
            AgentEvent::Chunk { id, delta } => match self.messages.get(&id) {
                Some(&idx) => {
                    if let Entry::Message { text, .. } = &mut self.entries[idx] {
                        text.push_str(&delta);
                    }
                }
                None => {
                    self.messages.insert(id.clone(), self.entries.len());
                    self.entries.push(Entry::Message { id, text: delta });
                }
            },
            AgentEvent::ToolCall { id, name, args } => {
                self.tool_calls.insert(id.clone(), self.entries.len());
                self.entries.push(Entry::ToolCall {
                    id,
                    name,
                    args,
                    result: None,
                });
            }
            AgentEvent::ToolResult { id, result } => match self.tool_calls.get(&id) {
                Some(&idx) => {
                    if let Entry::ToolCall { result: slot, .. } = &mut self.entries[idx] {
                        *slot = Some(result);
                    }
                }
                None => self.entries.push(Entry::StandaloneResult { id, result }),
            },
            AgentEvent::Done => self.terminal = Some(Terminal::Done),
            AgentEvent::Error { message } => self.terminal = Some(Terminal::Error(message)),
        }
        true
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn message_text(&self, id: &str) -> Option<&str> {
        let idx = *self.messages.get(id)?;
        match &self.entries[idx] {
            Entry::Message { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    /// Events dropped because they followed the terminal event.
    pub fn ignored(&self) -> usize {
        self.ignored
    }
}
