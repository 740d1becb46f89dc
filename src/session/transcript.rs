//! Transcripts carried on the data channel
//!
//! The realtime API sends JSON events over the transport's data channel. Only
//! the transcript-bearing ones matter here; everything else is ignored.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Who spoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub speaker: Speaker,
    pub text: String,
    /// False for incremental deltas
    pub is_final: bool,
}

/// Extract a transcript from one data channel message
///
/// Returns None for messages that carry no transcript, including malformed
/// JSON. Server error events are logged.
pub fn parse_message(text: &str) -> Option<Transcript> {
    let event: Value = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!("Ignoring non-JSON data message: {}", e);
            return None;
        }
    };
    let kind = event.get("type")?.as_str()?;

    let (speaker, field, is_final) = match kind {
        "response.audio_transcript.delta" => (Speaker::Assistant, "delta", false),
        "response.audio_transcript.done" => (Speaker::Assistant, "transcript", true),
        "response.text.delta" => (Speaker::Assistant, "delta", false),
        "response.text.done" => (Speaker::Assistant, "text", true),
        "conversation.item.input_audio_transcription.completed" => {
            (Speaker::User, "transcript", true)
        }
        "error" => {
            let message = event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            tracing::warn!("Realtime API error event: {}", message);
            return None;
        }
        _ => return None,
    };

    let text = event.get(field)?.as_str()?;
    Some(Transcript {
        speaker,
        text: text.to_string(),
        is_final,
    })
}

/// Callback receiving completed transcripts
pub type TranscriptionCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Holds at most one transcription callback; setting replaces the previous one
#[derive(Clone, Default)]
pub struct TranscriptionSlot {
    inner: Arc<RwLock<Option<TranscriptionCallback>>>,
}

impl TranscriptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, callback: TranscriptionCallback) {
        *self.inner.write() = Some(callback);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Invoke the current callback, if any
    pub fn emit(&self, text: &str) {
        let callback = self.inner.read().clone();
        if let Some(callback) = callback {
            callback(text);
        }
    }
}

impl std::fmt::Debug for TranscriptionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}
