use crate::error::ClientResult;
use crate::stream::DeltaStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

pub const GREETING: &str = "Hello! How can I help you build your app today?";
pub const FAILURE_REPLY: &str = "Sorry, something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn stamped(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            ..Self::new(role, content)
        }
    }
}

/// Remote chat completion, streamed or in one piece.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_reply(&self, history: &[ChatMessage]) -> ClientResult<DeltaStream>;
    async fn reply(&self, history: &[ChatMessage]) -> ClientResult<String>;
}

/// Append-only message history for one chat screen.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::new(MessageRole::Assistant, GREETING)],
        }
    }

    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives turns against a [`ChatBackend`] and records them in a transcript.
#[derive(Clone)]
pub struct ChatSession {
    transcript: Arc<RwLock<Transcript>>,
    backend: Arc<dyn ChatBackend>,
    in_flight: Arc<AtomicBool>,
}

struct TurnGuard(Arc<AtomicBool>);

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self::with_transcript(backend, Transcript::new())
    }

    pub fn with_transcript(backend: Arc<dyn ChatBackend>, transcript: Transcript) -> Self {
        Self {
            transcript: Arc::new(RwLock::new(transcript)),
            backend,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.read().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Send `input` and stream the reply.
    ///
    /// `on_partial` receives the accumulated reply after every delta. Returns the
    /// assistant message that was appended, or `None` when the input was blank or
    /// another turn is still running. Failures become a canned assistant reply.
    pub async fn send<F>(&self, input: &str, mut on_partial: F) -> Option<ChatMessage>
    where
        F: FnMut(&str) + Send,
    {
        let (_guard, history) = self.begin_turn(input)?;

        let reply = match self.backend.stream_reply(&history).await {
            Ok(mut deltas) => {
                let mut accumulated = String::new();
                let mut failure = None;
                while let Some(delta) = deltas.next().await {
                    match delta {
                        Ok(delta) => {
                            accumulated.push_str(&delta);
                            on_partial(&accumulated);
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(accumulated),
                }
            }
            Err(err) => Err(err),
        };
        Some(self.finish_turn(reply))
    }

    /// Send `input` through the non-streaming endpoint.
    pub async fn send_once(&self, input: &str) -> Option<ChatMessage> {
        let (_guard, history) = self.begin_turn(input)?;
        let reply = self.backend.reply(&history).await;
        Some(self.finish_turn(reply))
    }

    fn begin_turn(&self, input: &str) -> Option<(TurnGuard, Vec<ChatMessage>)> {
        if input.trim().is_empty() {
            return None;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("ignoring chat input while a reply is in flight");
            return None;
        }
        let guard = TurnGuard(self.in_flight.clone());
        let mut transcript = self.transcript.write();
        transcript.push(ChatMessage::new(MessageRole::User, input));
        Some((guard, transcript.messages().to_vec()))
    }

    fn finish_turn(&self, reply: ClientResult<String>) -> ChatMessage {
        let message = match reply {
            Ok(content) => ChatMessage::stamped(MessageRole::Assistant, content),
            Err(err) => {
                error!(%err, "chat turn failed");
                ChatMessage::new(MessageRole::Assistant, FAILURE_REPLY)
            }
        };
        self.transcript.write().push(message.clone());
        message
    }
}
