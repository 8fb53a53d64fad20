//! Session engine — the per-channel state machine driving a discussion.
//!
//! Each active channel gets one worker task consuming a [`SessionEvent`]
//! queue. Events for a channel are processed strictly one at a time, so two
//! in-flight messages can never race on session state; timers and deferred
//! pipeline steps post events into the same queue and are re-validated
//! against the session phase and stage index on arrival.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Awards, Timings};
use crate::generation::{TextGenerator, FALLBACK_REPLY};
use crate::ledger::SharedLedger;
use crate::lessons::Lesson;
use crate::oracle::InsightOracle;
use crate::platform::{ChatSink, InboundMessage, OutboundMessage};
use crate::prompts;
use crate::report;
use crate::scheduler::{defer, StageScheduler};
use crate::session::{Session, SessionPhase};

/// Number of leading words revealed when hinting a missed insight.
const HINT_PREVIEW_WORDS: usize = 5;

/// Events consumed by a session worker.
#[derive(Debug)]
pub enum SessionEvent {
    /// A participant message posted in the session's channel.
    Student(InboundMessage),
    /// Prompt the stage at `stage_index`, or conclude past the last one.
    PromptNext,
    /// The stage deadline fired while `stage` was being answered.
    DeadlineElapsed { stage: usize },
    /// Run stage-complete processing (summary) for `stage`.
    SummarizeStage { stage: usize },
    /// Operator forced completion of the current stage.
    ManualAdvance,
}

/// Collaborator handles shared by all session workers.
#[derive(Clone)]
pub struct EngineDeps {
    pub oracle: Arc<dyn InsightOracle>,
    pub generator: Arc<dyn TextGenerator>,
    pub sink: Arc<dyn ChatSink>,
    pub ledger: SharedLedger,
    pub report_recipient: Option<String>,
    pub timings: Timings,
    pub awards: Awards,
}

/// One discussion session bound to one channel.
pub struct SessionWorker {
    channel_id: String,
    session: Session,
    lesson: Lesson,
    deps: EngineDeps,
    scheduler: StageScheduler,
    tx: UnboundedSender<SessionEvent>,
    rx: UnboundedReceiver<SessionEvent>,
}

impl SessionWorker {
    /// Spawn a worker for a fresh session. Returns the event queue handle
    /// and the task handle; the worker exits when the session concludes.
    pub fn spawn(
        channel_id: impl Into<String>,
        team_label: impl Into<String>,
        lesson: Lesson,
        deps: EngineDeps,
    ) -> (UnboundedSender<SessionEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            channel_id: channel_id.into(),
            session: Session::new(lesson.id.clone(), team_label),
            lesson,
            deps,
            scheduler: StageScheduler::new(),
            tx: tx.clone(),
            rx,
        };
        let join = tokio::spawn(worker.run());
        (tx, join)
    }

    async fn run(mut self) {
        info!(
            channel = %self.channel_id,
            lesson = %self.lesson.id,
            team = %self.session.team_label,
            "Discussion session started"
        );
        self.send_introduction().await;
        defer(self.deps.timings.intro_delay, &self.tx, SessionEvent::PromptNext);

        while let Some(event) = self.rx.recv().await {
            match event {
                SessionEvent::Student(msg) => self.handle_student(msg).await,
                SessionEvent::PromptNext => self.handle_prompt_next().await,
                SessionEvent::DeadlineElapsed { stage } => self.handle_deadline(stage).await,
                SessionEvent::SummarizeStage { stage } => self.handle_summarize(stage).await,
                SessionEvent::ManualAdvance => self.handle_manual_advance().await,
            }
            if self.session.phase().is_terminal() {
                break;
            }
        }
        info!(channel = %self.channel_id, "Discussion session ended");
    }

    /// Post to the session's channel, logging delivery failures.
    async fn post(&self, message: OutboundMessage) {
        if let Err(e) = self.deps.sink.send_channel(&self.channel_id, message).await {
            warn!(channel = %self.channel_id, "Channel delivery failed: {e}");
        }
    }

    async fn send_introduction(&self) {
        let goals = if self.lesson.learning_objectives.is_empty() {
            "Explore the ideas together".to_string()
        } else {
            self.lesson
                .learning_objectives
                .iter()
                .map(|o| format!("📐 {o}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let intro = OutboundMessage::notice(
            format!("🔢 Team {} - {} 🧮", self.session.team_label, self.lesson.title),
            format!(
                "**Welcome to our discussion on {}!** Today we'll be exploring some \
interesting math concepts together. Share your ideas, ask questions, and build on \
each other's thinking!",
                self.lesson.title
            ),
        )
        .field("🎯 Learning Goals", goals)
        .field(
            "🏆 XP System",
            format!(
                "✨ **+{} XP** for each mathematical insight you share\n\
📝 **+{} XP** for active participation\n\
🔍 Look for patterns and make connections to earn more XP!",
                self.deps.awards.insight_points, self.deps.awards.participation_points
            ),
        );
        self.post(intro).await;
    }

    /// §4.1 `onParticipantMessage`: participation bookkeeping, oracle query,
    /// scoring, facilitator reply, coverage check.
    async fn handle_student(&mut self, msg: InboundMessage) {
        if self.session.phase() != SessionPhase::Prompted {
            debug!(channel = %self.channel_id, phase = %self.session.phase(), "Message outside prompted phase, ignored");
            return;
        }
        let Some(stage_no) = self.session.answered_stage() else {
            return;
        };
        let stage = self.lesson.discussion_flow[stage_no].clone();
        let expected = stage.expected_insights.len();

        self.session
            .participant_mut(&msg.author_id, &msg.author_display_name)
            .message_count += 1;
        self.session
            .record_student(&msg.author_display_name, &msg.text);

        // Oracle failure is never fatal: zero insights, keep going.
        let detected = match self
            .deps
            .oracle
            .detect(&msg.text, &stage.expected_insights)
            .await
        {
            Ok(indices) => indices,
            Err(e) => {
                warn!(channel = %self.channel_id, "Insight detection failed: {e}");
                Vec::new()
            }
        };

        let covered = self
            .session
            .participant(&msg.author_id)
            .map(|p| p.insights_covered.clone())
            .unwrap_or_default();
        let new_insights: Vec<usize> = detected
            .into_iter()
            .filter(|i| *i < expected && !covered.contains(i))
            .collect();

        if new_insights.is_empty() {
            self.deps.ledger.award(
                &msg.author_id,
                &msg.author_display_name,
                self.deps.awards.participation_points,
                "Active participation",
            );
        } else {
            let descriptions: Vec<&str> = new_insights
                .iter()
                .map(|&i| stage.expected_insights[i].as_str())
                .collect();
            let points = self.deps.awards.insight_points * new_insights.len() as u64;
            let total = self.deps.ledger.award(
                &msg.author_id,
                &msg.author_display_name,
                points,
                format!(
                    "Shared insight(s): {} during \"{}\"",
                    descriptions.join(", "),
                    self.lesson.title
                ),
            );

            let record = self
                .session
                .participant_mut(&msg.author_id, &msg.author_display_name);
            record.insights_covered.extend(new_insights.iter().copied());
            self.session
                .stage_coverage
                .extend(new_insights.iter().copied());

            self.post(
                OutboundMessage::notice(
                    format!("🎉 {} earned XP! 🎉", msg.author_display_name),
                    format!(
                        "✨ **+{points} XP** for sharing insight: *\"{}\"*\n\n📊 Total XP: **{total}**",
                        descriptions[0]
                    ),
                ),
            )
            .await;
        }

        let reply = match self
            .deps
            .generator
            .generate(&prompts::facilitator_reply(
                &self.session.team_label,
                &self.lesson,
                &stage,
                &msg.author_display_name,
                &msg.text,
            ))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(channel = %self.channel_id, "Facilitator reply generation failed: {e}");
                FALLBACK_REPLY.to_string()
            }
        };
        self.post(OutboundMessage::text(reply.clone())).await;
        self.session.record_facilitator(&reply);

        if self.session.stage_covered(expected) {
            // Union across all participants reached full coverage.
            self.scheduler.cancel();
            if let Err(e) = self
                .session
                .advance_phase(SessionPhase::Completing, "all insights covered")
            {
                warn!(channel = %self.channel_id, "{e}");
                return;
            }
            defer(
                self.deps.timings.coverage_summary_delay,
                &self.tx,
                SessionEvent::SummarizeStage { stage: stage_no },
            );
        } else if !self.scheduler.is_armed() {
            if let Err(e) = self.scheduler.arm(
                stage_no,
                self.deps.timings.stage_deadline,
                &self.tx,
                SessionEvent::DeadlineElapsed { stage: stage_no },
            ) {
                warn!(channel = %self.channel_id, "{e}");
            }
        }
    }

    /// Deadline fired: hint at missed insights, then force completion.
    async fn handle_deadline(&mut self, stage_no: usize) {
        if self.session.phase() != SessionPhase::Prompted
            || self.session.answered_stage() != Some(stage_no)
        {
            debug!(channel = %self.channel_id, stage = stage_no, "Stale deadline event discarded");
            return;
        }
        self.scheduler.cancel();

        let stage = &self.lesson.discussion_flow[stage_no];
        let missed: Vec<&String> = stage
            .expected_insights
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.session.stage_coverage.contains(i))
            .map(|(_, text)| text)
            .collect();

        let body = if missed.is_empty() {
            "We've had a great discussion on this question! We covered all the key points!"
                .to_string()
        } else {
            format!(
                "We've had a great discussion on this question! There {} {} more key \
point{} we could have explored:",
                if missed.len() > 1 { "were" } else { "was" },
                missed.len(),
                if missed.len() > 1 { "s" } else { "" }
            )
        };
        let mut hint = OutboundMessage::notice("⏰ Time to move forward!", body);
        if !missed.is_empty() {
            let previews = missed
                .iter()
                .map(|insight| format!("🔍 *\"{}...\"*", insight_preview(insight)))
                .collect::<Vec<_>>()
                .join("\n");
            hint = hint.field("Some hints to consider:", previews);
        }
        self.post(hint).await;

        if let Err(e) = self
            .session
            .advance_phase(SessionPhase::Completing, "stage deadline elapsed")
        {
            warn!(channel = %self.channel_id, "{e}");
            return;
        }
        defer(
            self.deps.timings.post_hint_delay,
            &self.tx,
            SessionEvent::SummarizeStage { stage: stage_no },
        );
    }

    /// Operator bypass: complete the current stage immediately.
    async fn handle_manual_advance(&mut self) {
        if self.session.phase() != SessionPhase::Prompted {
            debug!(channel = %self.channel_id, "Manual advance outside prompted phase, ignored");
            return;
        }
        let Some(stage_no) = self.session.answered_stage() else {
            return;
        };
        self.scheduler.cancel();
        if let Err(e) = self
            .session
            .advance_phase(SessionPhase::Completing, "manual advance")
        {
            warn!(channel = %self.channel_id, "{e}");
            return;
        }
        self.handle_summarize(stage_no).await;
    }

    /// Stage-complete processing: post the discussion summary, then queue
    /// the next prompt.
    async fn handle_summarize(&mut self, stage_no: usize) {
        if self.session.phase() != SessionPhase::Completing
            || self.session.answered_stage() != Some(stage_no)
        {
            debug!(channel = %self.channel_id, stage = stage_no, "Stale summarize event discarded");
            return;
        }
        let stage = &self.lesson.discussion_flow[stage_no];

        let student_lines = self
            .session
            .transcript
            .iter()
            .filter_map(|t| t.name.as_ref().map(|n| format!("{n}: {}", t.content)))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = match self
            .deps
            .generator
            .generate(&prompts::stage_summary(
                &self.session.team_label,
                stage,
                &student_lines,
            ))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(channel = %self.channel_id, "Stage summary generation failed: {e}");
                FALLBACK_REPLY.to_string()
            }
        };

        let covered = stage
            .expected_insights
            .iter()
            .enumerate()
            .filter(|(i, _)| self.session.stage_coverage.contains(i))
            .map(|(_, text)| format!("✓ {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut notice = OutboundMessage::notice("📝 Discussion Summary", summary);
        if !covered.is_empty() {
            notice = notice.field("🧠 Key Concepts Explored", covered);
        }
        self.post(notice).await;

        defer(
            self.deps.timings.next_prompt_delay,
            &self.tx,
            SessionEvent::PromptNext,
        );
    }

    /// §4.1 `advance`: prompt the next stage or conclude.
    async fn handle_prompt_next(&mut self) {
        match self.session.phase() {
            SessionPhase::Introducing | SessionPhase::Completing => {}
            phase => {
                debug!(channel = %self.channel_id, %phase, "Stale prompt event discarded");
                return;
            }
        }

        if self.session.stage_index >= self.lesson.discussion_flow.len() {
            self.conclude().await;
            return;
        }

        let stage = &self.lesson.discussion_flow[self.session.stage_index];
        self.post(OutboundMessage::text(format!(
            "**Question {}:** {}",
            self.session.stage_index + 1,
            stage.question
        )))
        .await;

        self.session.begin_stage();
        if let Err(e) = self
            .session
            .advance_phase(SessionPhase::Prompted, "stage prompted")
        {
            warn!(channel = %self.channel_id, "{e}");
            return;
        }

        let stage_no = self.session.stage_index - 1;
        self.scheduler.cancel();
        if let Err(e) = self.scheduler.arm(
            stage_no,
            self.deps.timings.stage_deadline,
            &self.tx,
            SessionEvent::DeadlineElapsed { stage: stage_no },
        ) {
            warn!(channel = %self.channel_id, "{e}");
        }
    }

    /// Terminal processing: conclusion message, instructor report, phase
    /// transition to `Concluded` (the run loop exits afterwards).
    async fn conclude(&mut self) {
        self.scheduler.cancel();
        if let Err(e) = self
            .session
            .advance_phase(SessionPhase::Concluded, "all stages complete")
        {
            warn!(channel = %self.channel_id, "{e}");
            return;
        }

        let transcript_lines = self
            .session
            .transcript
            .iter()
            .map(|t| {
                format!(
                    "{}: {}",
                    t.name.as_deref().unwrap_or("Facilitator"),
                    t.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prose = match self
            .deps
            .generator
            .generate(&prompts::conclusion(
                &self.session.team_label,
                &self.lesson,
                &transcript_lines,
            ))
            .await
        {
            Ok(prose) => prose,
            Err(e) => {
                warn!(channel = %self.channel_id, "Conclusion generation failed: {e}");
                FALLBACK_REPLY.to_string()
            }
        };

        let stats = report::session_stats(&self.session, &self.lesson);
        let mut notice = OutboundMessage::notice(
            format!("🏁 Conclusion - {}", self.lesson.title),
            prose,
        );
        if !self.lesson.key_takeaways.is_empty() {
            notice = notice.field(
                "🔑 Key Takeaways",
                self.lesson
                    .key_takeaways
                    .iter()
                    .map(|t| format!("📌 {t}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        notice = notice.field(
            "📊 Team Performance",
            format!(
                "✨ **Total Insights Discovered:** {}\n👥 **Active Participants:** {}\n💬 **Total Messages:** {}",
                stats.insights_covered, stats.participant_count, stats.message_count
            ),
        );
        let top = report::top_contributors(&self.session, 3);
        if !top.is_empty() {
            let medals = ["🥇", "🥈", "🥉"];
            notice = notice.field(
                "🏆 Top Contributors",
                top.iter()
                    .enumerate()
                    .map(|(i, c)| {
                        format!(
                            "{} **{}**: {} insight{}, {} message{}",
                            medals[i],
                            c.name,
                            c.insights,
                            if c.insights != 1 { "s" } else { "" },
                            c.messages,
                            if c.messages != 1 { "s" } else { "" },
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        self.post(notice).await;

        report::deliver_instructor_report(
            self.deps.sink.as_ref(),
            self.deps.generator.as_ref(),
            self.deps.report_recipient.as_deref(),
            &self.session,
            &self.lesson,
            &self.deps.ledger,
        )
        .await;
    }
}

/// First words of a missed insight, for partial-reveal hints.
fn insight_preview(insight: &str) -> String {
    insight
        .split_whitespace()
        .take(HINT_PREVIEW_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}
