//! Event Feed
//!
//! The upstream pipeline pushes one JSON document per message (plus the bare
//! keepalive text `alive`). Three independent producers share the stream:
//!
//! ```text
//! {"audio_url": ..., "message_id": ..., "visemas": [{"visema", "tiempo"}]}
//! {"message_id": ..., "expresiones": [{"expresion", "tiempo", "intensidad"}]}
//! {"sequence": "wave", "keyframes": [...], "message_id": ...}
//! {"error": "...", "type": "error"}
//! ```
//!
//! [`decode_message`] classifies a document; [`EventFeed`] is the transport
//! seam, with an in-process [`ChannelFeed`] and a line-oriented [`LineFeed`]
//! (stdin, files, sockets).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::warn;

use crate::clip::SequenceDescriptor;
use crate::timeline::{ExpressionEvent, VisemaEvent};

/// Keepalive text the pipeline sends between messages
pub const KEEPALIVE: &str = "alive";

/// Errors produced while reading the feed
#[derive(Debug, Error)]
pub enum FeedError {
    /// The document is not a message the engine understands
    #[error("Failed to decode feed message: {0}")]
    Decode(String),

    /// The underlying reader failed
    #[error("Feed I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded upstream message
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    /// Heartbeat, nothing to do
    Keepalive,
    /// Lip-sync cues for an utterance
    Visemas {
        /// Audio the cues are aligned to
        audio_url: Option<String>,
        /// Conversation message the cues belong to
        message_id: Option<String>,
        /// Cues, malformed entries already dropped
        events: Vec<VisemaEvent>,
    },
    /// Facial expression cues for an utterance
    Expressions {
        /// Conversation message the cues belong to
        message_id: Option<String>,
        /// Cues, malformed entries already dropped
        events: Vec<ExpressionEvent>,
    },
    /// A body animation to play, with its descriptor inline
    Animation {
        /// Sequence name
        name: String,
        /// The descriptor as pushed
        descriptor: SequenceDescriptor,
        /// Conversation message the animation belongs to
        message_id: Option<String>,
    },
    /// The pipeline reported a failure
    Error {
        /// Error text
        message: String,
    },
}

impl FeedMessage {
    /// Short label for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Keepalive => "keepalive",
            Self::Visemas { .. } => "visemas",
            Self::Expressions { .. } => "expressions",
            Self::Animation { .. } => "animation",
            Self::Error { .. } => "error",
        }
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Decode every element of a cue array, skipping the ones that do not parse
fn cue_list<T: DeserializeOwned>(value: &Value, field: &str) -> Result<Vec<T>, FeedError> {
    let items = value
        .as_array()
        .ok_or_else(|| FeedError::Decode(format!("'{field}' is not an array")))?;
    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match T::deserialize(item) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(field, index, error = %e, "Dropping malformed cue");
                None
            }
        })
        .collect())
}

/// Classify one upstream document
///
/// # Errors
///
/// Returns `FeedError::Decode` for invalid JSON, non-object documents and
/// objects that match no known message shape.
pub fn decode_message(text: &str) -> Result<FeedMessage, FeedError> {
    let text = text.trim();
    if text == KEEPALIVE {
        return Ok(FeedMessage::Keepalive);
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| FeedError::Decode(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(FeedError::Decode("expected a JSON object".to_string()));
    };
    let message_id = string_field(&object, "message_id");

    if let Some(cues) = object.get("visemas") {
        return Ok(FeedMessage::Visemas {
            audio_url: string_field(&object, "audio_url"),
            message_id,
            events: cue_list(cues, "visemas")?,
        });
    }
    if let Some(cues) = object.get("expresiones") {
        return Ok(FeedMessage::Expressions {
            message_id,
            events: cue_list(cues, "expresiones")?,
        });
    }
    let is_error = object.get("type").and_then(Value::as_str) == Some("error");
    if is_error || object.contains_key("error") {
        return Ok(FeedMessage::Error {
            message: string_field(&object, "error").unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    if let Some(name) = object.get("sequence").and_then(Value::as_str) {
        let name = name.to_string();
        let descriptor = SequenceDescriptor::deserialize(&Value::Object(object))
            .map_err(|e| FeedError::Decode(format!("animation '{name}': {e}")))?;
        return Ok(FeedMessage::Animation {
            name,
            descriptor,
            message_id,
        });
    }

    Err(FeedError::Decode("unrecognized message shape".to_string()))
}

/// Source of upstream messages
#[async_trait]
pub trait EventFeed: Send {
    /// Next message, or `None` once the feed is closed
    ///
    /// # Errors
    ///
    /// A `FeedError::Decode` only concerns the one message; callers may keep
    /// reading. `FeedError::Io` means the transport broke.
    async fn next_message(&mut self) -> Result<Option<FeedMessage>, FeedError>;
}

/// In-process feed over a tokio channel of raw documents
#[derive(Debug)]
pub struct ChannelFeed {
    rx: mpsc::Receiver<String>,
}

impl ChannelFeed {
    /// Create a feed and the sender that drives it
    #[must_use]
    pub fn new_pair(capacity: usize) -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { rx }, tx)
    }

    /// Take the next already-queued message without waiting
    pub fn try_next(&mut self) -> Option<Result<FeedMessage, FeedError>> {
        loop {
            let text = self.rx.try_recv().ok()?;
            if !text.trim().is_empty() {
                return Some(decode_message(&text));
            }
        }
    }
}

#[async_trait]
impl EventFeed for ChannelFeed {
    async fn next_message(&mut self) -> Result<Option<FeedMessage>, FeedError> {
        while let Some(text) = self.rx.recv().await {
            if text.trim().is_empty() {
                continue;
            }
            return decode_message(&text).map(Some);
        }
        Ok(None)
    }
}

/// Feed reading one document per line
#[derive(Debug)]
pub struct LineFeed<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R: AsyncBufRead + Unpin + Send> LineFeed<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// Lines read so far (blank lines included)
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventFeed for LineFeed<R> {
    async fn next_message(&mut self) -> Result<Option<FeedMessage>, FeedError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return decode_message(&line)
                .map(Some)
                .map_err(|e| match e {
                    FeedError::Decode(reason) => {
                        FeedError::Decode(format!("line {}: {reason}", self.line_number))
                    }
                    other => other,
                });
        }
        Ok(None)
    }
}
