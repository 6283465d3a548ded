//! Async message bus — decouples channels and the scheduler from the agent core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl InboundMessage {
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// Synthetic message injected by the scheduler (recurring jobs and
    /// one-time tasks that run through the agent).
    pub fn from_scheduler(chat_id: &str, content: String) -> Self {
        Self {
            channel: "scheduler".into(),
            sender_id: "scheduler".into(),
            chat_id: chat_id.to_string(),
            content,
            timestamp: Utc::now(),
            metadata: serde_json::json!({ "source": "scheduler" }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessageType {
    Chat {
        content: String,
        /// Local file paths of images to deliver alongside the text.
        #[serde(default)]
        media: Vec<String>,
    },
    ToolProgress {
        tool_name: String,
        status: String,
        result_preview: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    #[serde(flatten)]
    pub message_type: OutboundMessageType,
}

impl OutboundMessage {
    pub fn chat(channel: String, chat_id: String, content: String, media: Vec<String>) -> Self {
        Self {
            channel,
            chat_id,
            message_type: OutboundMessageType::Chat { content, media },
        }
    }

    pub fn tool_progress(
        channel: String,
        chat_id: String,
        tool_name: String,
        status: String,
        result_preview: String,
    ) -> Self {
        Self {
            channel,
            chat_id,
            message_type: OutboundMessageType::ToolProgress {
                tool_name,
                status,
                result_preview,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

/// Capacity of the internal channels.
const BUS_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            outbound_tx,
        }
    }

    /// Sender handle that channels and the scheduler use to push inbound messages.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Take the inbound receiver (can only be called once — the agent owns it).
    pub fn take_inbound_receiver(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.take()
    }

    /// Subscribe to outbound messages (each channel gets its own receiver).
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound_tx.subscribe()
    }

    /// Clone the outbound sender (needed by the agent loop and tasks).
    pub fn outbound_tx_clone(&self) -> broadcast::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
