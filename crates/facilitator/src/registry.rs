//! Channel-to-session registry.
//!
//! At most one session exists per channel. The registry hands each inbound
//! event to the owning worker's queue; a worker whose queue is closed has
//! concluded, and the registry prunes it on the next dispatch.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{EngineDeps, SessionEvent, SessionWorker};
use crate::lessons::Lesson;

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a discussion is already active in channel {0}")]
    AlreadyActive(String),
}

struct SessionHandle {
    tx: UnboundedSender<SessionEvent>,
    #[allow(dead_code)]
    join: JoinHandle<()>,
}

/// Owns the live sessions, keyed by channel id.
pub struct SessionRegistry {
    deps: EngineDeps,
    sessions: HashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            sessions: HashMap::new(),
        }
    }

    /// Start a session in `channel_id`. Fails if one is already active
    /// there; a concluded worker does not count as active.
    pub fn start_session(
        &mut self,
        channel_id: &str,
        team_label: &str,
        lesson: Lesson,
    ) -> Result<(), RegistryError> {
        if let Some(handle) = self.sessions.get(channel_id) {
            if !handle.tx.is_closed() {
                return Err(RegistryError::AlreadyActive(channel_id.to_string()));
            }
            self.sessions.remove(channel_id);
        }
        let (tx, join) = SessionWorker::spawn(
            channel_id,
            team_label,
            lesson,
            self.deps.clone(),
        );
        info!(channel = channel_id, team = team_label, "Session registered");
        self.sessions
            .insert(channel_id.to_string(), SessionHandle { tx, join });
        Ok(())
    }

    /// Post `event` to the session in `channel_id`. Returns whether a live
    /// session received it; dead handles are pruned here.
    pub fn dispatch(&mut self, channel_id: &str, event: SessionEvent) -> bool {
        let Some(handle) = self.sessions.get(channel_id) else {
            return false;
        };
        if handle.tx.send(event).is_ok() {
            return true;
        }
        debug!(channel = channel_id, "Pruning concluded session");
        self.sessions.remove(channel_id);
        false
    }

    /// Whether a live session exists in `channel_id`.
    pub fn has_session(&self, channel_id: &str) -> bool {
        self.sessions
            .get(channel_id)
            .is_some_and(|h| !h.tx.is_closed())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|h| !h.tx.is_closed())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Awards, Timings};
    use crate::generation::{ChatTurn, GenerationError, TextGenerator};
    use crate::ledger::{ExperienceLedger, SharedLedger};
    use crate::lessons::LessonProvider;
    use crate::oracle::{InsightOracle, OracleError};
    use crate::platform::{ChatSink, OutboundMessage, PlatformError};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullOracle;
    #[async_trait]
    impl InsightOracle for NullOracle {
        async fn detect(&self, _: &str, _: &[String]) -> Result<Vec<usize>, OracleError> {
            Ok(Vec::new())
        }
    }

    struct NullGenerator;
    #[async_trait]
    impl TextGenerator for NullGenerator {
        async fn generate(&self, _: &[ChatTurn]) -> Result<String, GenerationError> {
            Ok("ok".into())
        }
    }

    struct NullSink;
    #[async_trait]
    impl ChatSink for NullSink {
        async fn send_channel(&self, _: &str, _: OutboundMessage) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn send_direct(&self, _: &str, _: OutboundMessage) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    fn deps() -> EngineDeps {
        EngineDeps {
            oracle: Arc::new(NullOracle),
            generator: Arc::new(NullGenerator),
            sink: Arc::new(NullSink),
            ledger: SharedLedger::new(ExperienceLedger::new()),
            report_recipient: None,
            timings: Timings::default(),
            awards: Awards::default(),
        }
    }

    fn lesson() -> Lesson {
        LessonProvider::default().resolve("default").clone()
    }

    #[tokio::test]
    async fn second_session_in_same_channel_rejected() {
        let mut registry = SessionRegistry::new(deps());
        registry.start_session("c1", "Alpha", lesson()).unwrap();
        let err = registry
            .start_session("c1", "Beta", lesson())
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyActive(c) if c == "c1"));
        assert!(registry.has_session("c1"));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn sessions_in_distinct_channels_are_independent() {
        let mut registry = SessionRegistry::new(deps());
        registry.start_session("c1", "Alpha", lesson()).unwrap();
        registry.start_session("c2", "Beta", lesson()).unwrap();
        assert_eq!(registry.active_count(), 2);
        assert!(!registry.has_session("c3"));
    }

    #[tokio::test]
    async fn dispatch_to_unknown_channel_returns_false() {
        let mut registry = SessionRegistry::new(deps());
        assert!(!registry.dispatch("nowhere", SessionEvent::PromptNext));
    }

    #[tokio::test]
    async fn dispatch_reaches_live_session() {
        let mut registry = SessionRegistry::new(deps());
        registry.start_session("c1", "Alpha", lesson()).unwrap();
        assert!(registry.dispatch("c1", SessionEvent::ManualAdvance));
    }
}
