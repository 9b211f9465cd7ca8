//! Status/chat channel messages.
//!
//! The front end that carries these is external. The loop only produces
//! `status_update` and `message` frames and accepts `prompt` frames.
//!
//! ```
//! use test_mender::channel::ChannelMessage;
//!
//! let inbound: ChannelMessage =
//!     serde_json::from_str(r#"{"type": "prompt", "content": "status?"}"#).unwrap();
//! assert_eq!(inbound, ChannelMessage::Prompt { content: "status?".into() });
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::health::{HealthReport, HealthStatus};

/// Capacity of the outbound broadcast channel.
pub const CHANNEL_CAPACITY: usize = 64;

/// One frame on the status/chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// Inbound user prompt.
    Prompt {
        /// Prompt text.
        content: String,
    },
    /// Outbound aggregate health.
    StatusUpdate {
        /// Derived from the highest issue severity.
        status: HealthStatus,
        /// Current issue messages.
        alerts: Vec<String>,
    },
    /// Outbound free-form message.
    Message {
        /// Agent or component name.
        sender: String,
        /// Message text.
        content: String,
    },
}

impl ChannelMessage {
    /// Status update for a health report.
    #[must_use]
    pub fn status_update(report: &HealthReport) -> Self {
        Self::StatusUpdate {
            status: report.status,
            alerts: report.alerts(),
        }
    }

    /// Free-form message from `sender`.
    #[must_use]
    pub fn message(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Message {
            sender: sender.into(),
            content: content.into(),
        }
    }
}

/// Sending half of the outbound channel.
pub type StatusSender = broadcast::Sender<ChannelMessage>;

/// Create the outbound channel.
#[must_use]
pub fn status_channel() -> (StatusSender, broadcast::Receiver<ChannelMessage>) {
    broadcast::channel(CHANNEL_CAPACITY)
}

/// Send a frame, ignoring the absence of subscribers.
pub fn publish(sender: Option<&StatusSender>, message: ChannelMessage) {
    if let Some(sender) = sender {
        if sender.send(message).is_err() {
            tracing::trace!("No channel subscribers");
        }
    }
}
