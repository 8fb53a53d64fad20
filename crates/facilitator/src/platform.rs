//! Chat-platform boundary types.
//!
//! The connection/event-delivery layer is an external collaborator; the
//! engine only sees inbound message events and talks back through the
//! [`ChatSink`] trait. Rendering (embeds, markdown, mentions) is the
//! adapter's problem — outbound messages are structured title/body/fields.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound message event from the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel the message was posted in.
    pub channel_id: String,
    /// Stable author identifier.
    pub author_id: String,
    /// Display name as last seen on the platform.
    pub author_display_name: String,
    /// Raw message text.
    pub text: String,
    /// Whether the author is an automated agent (ignored entirely).
    pub from_automated_agent: bool,
    /// When the platform delivered the message.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a participant message with the current time.
    pub fn new(
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        author_display_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            author_id: author_id.into(),
            author_display_name: author_display_name.into(),
            text: text.into(),
            from_automated_agent: false,
            received_at: Utc::now(),
        }
    }
}

/// A named field attached to a structured outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageField {
    pub name: String,
    pub value: String,
}

/// A structured outbound message.
///
/// Plain replies carry only `body`; notices (the embed analog) add a title
/// and optional fields. Adapters decide how to render each shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub title: Option<String>,
    pub body: String,
    pub fields: Vec<MessageField>,
}

impl OutboundMessage {
    /// A plain text reply.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            title: None,
            body: body.into(),
            fields: Vec::new(),
        }
    }

    /// A titled notice.
    pub fn notice(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: body.into(),
            fields: Vec::new(),
        }
    }

    /// Append a named field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(MessageField {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Error surface of the outbound side of the platform adapter.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The adapter failed to deliver the message.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The target user could not be resolved for a direct message.
    #[error("recipient not found: {0}")]
    RecipientNotFound(String),
}

/// Outbound side of the chat platform.
///
/// Delivery failures are logged by callers and never crash a session —
/// user-visible failures are chat replies, not process termination.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Post a message to a channel.
    async fn send_channel(
        &self,
        channel_id: &str,
        message: OutboundMessage,
    ) -> Result<(), PlatformError>;

    /// Send an out-of-band direct message to a user.
    async fn send_direct(&self, user_id: &str, message: OutboundMessage)
        -> Result<(), PlatformError>;
}
