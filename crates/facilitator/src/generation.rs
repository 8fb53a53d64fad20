//! Text-generation boundary.
//!
//! Requests are role-tagged turn lists; responses are display text only and
//! are never parsed further. A generation failure is recovered locally by
//! substituting [`FALLBACK_REPLY`] — the session continues.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reply posted when the generation collaborator fails.
pub const FALLBACK_REPLY: &str =
    "I encountered an issue while processing. Please try again later.";

/// Role of a chat turn sent to the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
}

/// One role-tagged turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }
}

/// Generation failure surface.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The request failed (network, timeout, HTTP status).
    #[error("generation request failed: {0}")]
    Request(String),

    /// The response arrived but carried no usable text.
    #[error("generation response malformed: {0}")]
    Malformed(String),
}

/// External text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate free text from a role-tagged turn list.
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, GenerationError>;
}
