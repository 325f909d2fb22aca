//! Conversation channel boundary
//!
//! The transport (messenger delivery, button rendering, voice files) is
//! an external collaborator. The core consumes tagged inbound events and
//! emits plain text through the `ConversationChannel` trait.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::AudioRef;

/// Inbound user event, tagged with the channel identity of the sender.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Text { from: i64, text: String },
    Audio { from: i64, audio: AudioRef },
    /// Receipt photo bytes, already downloaded by the transport.
    Photo {
        from: i64,
        bytes: Vec<u8>,
        filename: Option<String>,
        mime_type: Option<String>,
    },
    /// A structured button press; `data` carries the callback payload
    /// (e.g. "expense:add:CONSUMABLES:<object_id>").
    Choice { from: i64, data: String },
}

impl InboundEvent {
    pub fn from(&self) -> i64 {
        match self {
            InboundEvent::Text { from, .. } => *from,
            InboundEvent::Audio { from, .. } => *from,
            InboundEvent::Photo { from, .. } => *from,
            InboundEvent::Choice { from, .. } => *from,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: i64,
    pub text: String,
}

#[async_trait::async_trait]
pub trait ConversationChannel: Send + Sync {
    async fn send(&self, to: i64, text: &str) -> Result<()>;
}

/// Test double that records every outbound message.
pub struct RecordingChannel {
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub async fn last(&self) -> Option<OutboundMessage> {
        self.sent.lock().await.last().cloned()
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConversationChannel for RecordingChannel {
    async fn send(&self, to: i64, text: &str) -> Result<()> {
        self.sent.lock().await.push(OutboundMessage {
            to,
            text: text.to_string(),
        });
        Ok(())
    }
}
