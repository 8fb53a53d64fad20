//! Operator command surface and inbound message routing.
//!
//! The gateway is the single consumer of platform events. It parses `!`
//! commands, enforces the operator gate, tracks the pending ledger-reset
//! confirmation window, and forwards everything else to the owning session
//! worker via the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::engine::SessionEvent;
use crate::ledger::SharedLedger;
use crate::lessons::LessonProvider;
use crate::platform::{ChatSink, InboundMessage, OutboundMessage};
use crate::registry::{RegistryError, SessionRegistry};
use crate::scheduler::defer;

/// A parsed `!` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Leaderboard,
    StartDiscussion { team_label: String, lesson_id: String },
    ListLessons,
    NextQuestion,
    ResetXp,
}

/// Parse a message into a command. Non-commands and unknown `!` words
/// return `None` and flow through normal message routing.
pub fn parse(text: &str) -> Option<Command> {
    let mut words = text.trim().split_whitespace();
    let head = words.next()?;
    match head.to_ascii_lowercase().as_str() {
        "!help" => Some(Command::Help),
        "!leaderboard" => Some(Command::Leaderboard),
        "!start-discussion" => Some(Command::StartDiscussion {
            team_label: words.next().unwrap_or("Default").to_string(),
            lesson_id: words.next().unwrap_or("default").to_string(),
        }),
        "!list-lessons" => Some(Command::ListLessons),
        "!next-question" => Some(Command::NextQuestion),
        "!reset-xp" => Some(Command::ResetXp),
        _ => None,
    }
}

/// Events consumed by the gateway loop.
#[derive(Debug)]
pub enum GatewayEvent {
    /// A message event from the platform adapter.
    Inbound(InboundMessage),
    /// The reset confirmation window expired.
    ResetWindowElapsed { token: u64 },
}

/// An unconfirmed ledger reset awaiting "confirm".
struct PendingReset {
    author_id: String,
    channel_id: String,
    token: u64,
}

/// Routes platform events to commands and sessions.
pub struct Gateway {
    registry: SessionRegistry,
    lessons: Arc<LessonProvider>,
    ledger: SharedLedger,
    sink: Arc<dyn ChatSink>,
    operator_id: String,
    reset_window: Duration,
    pending_reset: Option<PendingReset>,
    next_token: u64,
    tx: UnboundedSender<GatewayEvent>,
    rx: UnboundedReceiver<GatewayEvent>,
}

impl Gateway {
    /// Build the gateway. The returned sender is the adapter's way in.
    pub fn new(
        registry: SessionRegistry,
        lessons: Arc<LessonProvider>,
        ledger: SharedLedger,
        sink: Arc<dyn ChatSink>,
        operator_id: impl Into<String>,
        reset_window: Duration,
    ) -> (Self, UnboundedSender<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Self {
            registry,
            lessons,
            ledger,
            sink,
            operator_id: operator_id.into(),
            reset_window,
            pending_reset: None,
            next_token: 0,
            tx: tx.clone(),
            rx,
        };
        (gateway, tx)
    }

    /// Consume gateway events until the inbound channel closes.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
        info!("Gateway stopped");
    }

    /// Process one gateway event.
    pub async fn handle(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Inbound(msg) => self.handle_inbound(msg).await,
            GatewayEvent::ResetWindowElapsed { token } => self.expire_reset(token).await,
        }
    }

    async fn handle_inbound(&mut self, msg: InboundMessage) {
        // Automated agents never participate, including the facilitator's
        // own messages echoed back by the platform.
        if msg.from_automated_agent {
            return;
        }

        if let Some(command) = parse(&msg.text) {
            self.handle_command(command, &msg).await;
            return;
        }

        if self.matches_pending_reset(&msg) {
            self.pending_reset = None;
            self.ledger.reset();
            info!(operator = %msg.author_id, "Ledger reset confirmed");
            self.reply(&msg.channel_id, "🔄 All XP has been reset to zero.")
                .await;
            return;
        }

        let channel_id = msg.channel_id.clone();
        self.registry
            .dispatch(&channel_id, SessionEvent::Student(msg));
    }

    fn matches_pending_reset(&self, msg: &InboundMessage) -> bool {
        self.pending_reset.as_ref().is_some_and(|pending| {
            pending.author_id == msg.author_id
                && pending.channel_id == msg.channel_id
                && msg.text.trim().eq_ignore_ascii_case("confirm")
        })
    }

    async fn handle_command(&mut self, command: Command, msg: &InboundMessage) {
        match command {
            Command::Help => self.send_help(&msg.channel_id).await,
            Command::Leaderboard => self.send_leaderboard(&msg.channel_id).await,
            restricted => {
                if msg.author_id != self.operator_id {
                    self.reply(
                        &msg.channel_id,
                        "⛔ Only the instructor can use this command.",
                    )
                    .await;
                    return;
                }
                match restricted {
                    Command::StartDiscussion {
                        team_label,
                        lesson_id,
                    } => self.start_discussion(&msg.channel_id, &team_label, &lesson_id).await,
                    Command::ListLessons => self.send_lesson_list(&msg.channel_id).await,
                    Command::NextQuestion => self.next_question(&msg.channel_id).await,
                    Command::ResetXp => self.request_reset(msg).await,
                    Command::Help | Command::Leaderboard => unreachable!(),
                }
            }
        }
    }

    async fn start_discussion(&mut self, channel_id: &str, team_label: &str, lesson_id: &str) {
        let lesson = self.lessons.resolve(lesson_id).clone();
        match self.registry.start_session(channel_id, team_label, lesson) {
            Ok(()) => {}
            Err(RegistryError::AlreadyActive(_)) => {
                self.reply(
                    channel_id,
                    "⚠️ A discussion is already active in this channel.",
                )
                .await;
            }
        }
    }

    async fn next_question(&mut self, channel_id: &str) {
        if self
            .registry
            .dispatch(channel_id, SessionEvent::ManualAdvance)
        {
            self.reply(channel_id, "⏩ Moving to the next question...")
                .await;
        } else {
            self.reply(channel_id, "There's no active discussion in this channel.")
                .await;
        }
    }

    /// Open a confirmation window; the reset only happens if the same
    /// operator types "confirm" in the same channel before it expires.
    async fn request_reset(&mut self, msg: &InboundMessage) {
        self.next_token += 1;
        let token = self.next_token;
        self.pending_reset = Some(PendingReset {
            author_id: msg.author_id.clone(),
            channel_id: msg.channel_id.clone(),
            token,
        });
        defer(
            self.reset_window,
            &self.tx,
            GatewayEvent::ResetWindowElapsed { token },
        );
        self.reply(
            &msg.channel_id,
            format!(
                "⚠️ Are you sure you want to reset **all** XP? Type `confirm` within {} seconds to proceed.",
                self.reset_window.as_secs()
            ),
        )
        .await;
    }

    async fn expire_reset(&mut self, token: u64) {
        // A newer request supersedes the expired window.
        let matches = self
            .pending_reset
            .as_ref()
            .is_some_and(|p| p.token == token);
        if matches {
            if let Some(pending) = self.pending_reset.take() {
                self.reply(&pending.channel_id, "XP reset cancelled.").await;
            }
        }
    }

    async fn send_help(&self, channel_id: &str) {
        let help = OutboundMessage::notice(
            "📚 Facilitator Commands",
            "Here's what I can do:",
        )
        .field("!help", "Show this message")
        .field("!leaderboard", "Show the XP leaderboard")
        .field(
            "!start-discussion [team] [lesson]",
            "Start a discussion session (instructor only)",
        )
        .field("!list-lessons", "List available lessons (instructor only)")
        .field(
            "!next-question",
            "Skip to the next question (instructor only)",
        )
        .field("!reset-xp", "Reset all XP (instructor only)");
        self.send(channel_id, help).await;
    }

    async fn send_leaderboard(&self, channel_id: &str) {
        if self.ledger.is_empty() {
            self.reply(channel_id, "No XP earned yet! Join a discussion to get started.")
                .await;
            return;
        }
        let lines = self
            .ledger
            .top_n(10)
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let rank = match i {
                    0 => "🥇".to_string(),
                    1 => "🥈".to_string(),
                    2 => "🥉".to_string(),
                    _ => format!("{}.", i + 1),
                };
                format!("{rank} **{}**: {} XP", entry.name, entry.points)
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.send(
            channel_id,
            OutboundMessage::notice("🏆 XP Leaderboard", lines),
        )
        .await;
    }

    async fn send_lesson_list(&self, channel_id: &str) {
        let lines = self
            .lessons
            .all()
            .iter()
            .map(|l| format!("• `{}` - {}", l.id, l.title))
            .collect::<Vec<_>>()
            .join("\n");
        self.send(
            channel_id,
            OutboundMessage::notice("📖 Available Lessons", lines),
        )
        .await;
    }

    async fn reply(&self, channel_id: &str, body: impl Into<String>) {
        self.send(channel_id, OutboundMessage::text(body)).await;
    }

    async fn send(&self, channel_id: &str, message: OutboundMessage) {
        if let Err(e) = self.sink.send_channel(channel_id, message).await {
            warn!(channel = channel_id, "Reply delivery failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Awards, Timings};
    use crate::engine::EngineDeps;
    use crate::generation::{ChatTurn, GenerationError, TextGenerator};
    use crate::ledger::ExperienceLedger;
    use crate::oracle::{InsightOracle, OracleError};
    use crate::platform::PlatformError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse("!help"), Some(Command::Help));
        assert_eq!(parse("  !LEADERBOARD  "), Some(Command::Leaderboard));
        assert_eq!(parse("!list-lessons"), Some(Command::ListLessons));
        assert_eq!(parse("!next-question"), Some(Command::NextQuestion));
        assert_eq!(parse("!reset-xp"), Some(Command::ResetXp));
    }

    #[test]
    fn start_discussion_args_and_defaults() {
        assert_eq!(
            parse("!start-discussion Alpha fractions"),
            Some(Command::StartDiscussion {
                team_label: "Alpha".into(),
                lesson_id: "fractions".into(),
            })
        );
        assert_eq!(
            parse("!start-discussion"),
            Some(Command::StartDiscussion {
                team_label: "Default".into(),
                lesson_id: "default".into(),
            })
        );
    }

    #[test]
    fn non_commands_pass_through() {
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("!unknown-thing"), None);
        assert_eq!(parse(""), None);
    }

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

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, OutboundMessage)>>,
    }

    #[async_trait]
    impl ChatSink for RecordingSink {
        async fn send_channel(
            &self,
            channel_id: &str,
            message: OutboundMessage,
        ) -> Result<(), PlatformError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.to_string(), message));
            Ok(())
        }
        async fn send_direct(&self, _: &str, _: OutboundMessage) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    fn gateway(sink: Arc<RecordingSink>) -> Gateway {
        let ledger = SharedLedger::new(ExperienceLedger::new());
        let deps = EngineDeps {
            oracle: Arc::new(NullOracle),
            generator: Arc::new(NullGenerator),
            sink: sink.clone(),
            ledger: ledger.clone(),
            report_recipient: None,
            timings: Timings::default(),
            awards: Awards::default(),
        };
        let (gateway, _tx) = Gateway::new(
            SessionRegistry::new(deps),
            Arc::new(LessonProvider::default()),
            ledger,
            sink,
            "operator",
            Duration::from_secs(10),
        );
        gateway
    }

    fn inbound(author: &str, text: &str) -> GatewayEvent {
        GatewayEvent::Inbound(InboundMessage::new("c1", author, author, text))
    }

    #[tokio::test]
    async fn operator_commands_rejected_for_students() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.handle(inbound("student", "!reset-xp")).await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.body.contains("Only the instructor"));
    }

    #[tokio::test]
    async fn help_is_unrestricted() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.handle(inbound("student", "!help")).await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0].1.title.as_deref(), Some("📚 Facilitator Commands"));
    }

    #[tokio::test]
    async fn automated_agents_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        let mut msg = InboundMessage::new("c1", "bot", "Bot", "!help");
        msg.from_automated_agent = true;
        gw.handle(GatewayEvent::Inbound(msg)).await;
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_leaderboard_has_friendly_reply() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.handle(inbound("student", "!leaderboard")).await;

        let sent = sink.sent.lock().unwrap();
        assert!(sent[0].1.body.contains("No XP earned yet"));
    }

    #[tokio::test]
    async fn leaderboard_ranks_with_medals() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.ledger.award("a", "Ada", 30, "r");
        gw.ledger.award("b", "Grace", 20, "r");
        gw.handle(inbound("student", "!leaderboard")).await;

        let sent = sink.sent.lock().unwrap();
        let body = &sent[0].1.body;
        assert!(body.contains("🥇 **Ada**: 30 XP"));
        assert!(body.contains("🥈 **Grace**: 20 XP"));
    }

    #[tokio::test]
    async fn reset_requires_confirmation() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.ledger.award("a", "Ada", 30, "r");

        gw.handle(inbound("operator", "!reset-xp")).await;
        assert_eq!(gw.ledger.total_for("a"), 30);

        gw.handle(inbound("operator", "confirm")).await;
        assert_eq!(gw.ledger.total_for("a"), 0);

        let sent = sink.sent.lock().unwrap();
        assert!(sent.last().unwrap().1.body.contains("reset to zero"));
    }

    #[tokio::test]
    async fn confirm_from_someone_else_does_not_reset() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.ledger.award("a", "Ada", 30, "r");

        gw.handle(inbound("operator", "!reset-xp")).await;
        gw.handle(inbound("student", "confirm")).await;
        assert_eq!(gw.ledger.total_for("a"), 30);
    }

    #[tokio::test]
    async fn expired_window_cancels_reset() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.ledger.award("a", "Ada", 30, "r");

        gw.handle(inbound("operator", "!reset-xp")).await;
        gw.handle(GatewayEvent::ResetWindowElapsed { token: 1 }).await;

        // Window closed: confirm no longer applies.
        gw.handle(inbound("operator", "confirm")).await;
        assert_eq!(gw.ledger.total_for("a"), 30);

        let bodies: Vec<String> = sink
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.body.clone())
            .collect();
        assert!(bodies.iter().any(|b| b.contains("XP reset cancelled")));
    }

    #[tokio::test]
    async fn stale_expiry_token_is_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.ledger.award("a", "Ada", 30, "r");

        gw.handle(inbound("operator", "!reset-xp")).await;
        // A stale token from an earlier window must not cancel this one.
        gw.handle(GatewayEvent::ResetWindowElapsed { token: 99 }).await;
        gw.handle(inbound("operator", "confirm")).await;
        assert_eq!(gw.ledger.total_for("a"), 0);
    }

    #[tokio::test]
    async fn next_question_without_session_replies() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.handle(inbound("operator", "!next-question")).await;

        let sent = sink.sent.lock().unwrap();
        assert!(sent[0].1.body.contains("no active discussion"));
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let mut gw = gateway(sink.clone());
        gw.handle(inbound("operator", "!start-discussion Alpha default"))
            .await;
        gw.handle(inbound("operator", "!start-discussion Beta default"))
            .await;

        let sent = sink.sent.lock().unwrap();
        assert!(sent
            .iter()
            .any(|(_, m)| m.body.contains("already active")));
    }
}
