//! Session data model and phase machine.
//!
//! One session exists per active channel. The phase machine keeps stage
//! progression auditable: every transition is validated against the legal
//! edge set and recorded, so a timer that fires late can be recognized and
//! discarded by re-checking the phase and stage index.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The per-session phases.
///
/// ```text
/// Introducing → Prompted ⇄ Completing
/// Introducing → Concluded          (lesson with no stages)
/// Completing  → Concluded          (last stage summarized)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Introduction sent; first prompt pending.
    Introducing,
    /// A stage prompt is live and contributions are being processed.
    Prompted,
    /// Coverage or deadline reached; stage summary pending.
    Completing,
    /// Terminal. The session is removed from the registry after this.
    Concluded,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Concluded)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Introducing => write!(f, "Introducing"),
            Self::Prompted => write!(f, "Prompted"),
            Self::Completing => write!(f, "Completing"),
            Self::Concluded => write!(f, "Concluded"),
        }
    }
}

fn is_legal_transition(from: SessionPhase, to: SessionPhase) -> bool {
    use SessionPhase::*;
    matches!(
        (from, to),
        (Introducing, Prompted)
            | (Introducing, Concluded)
            | (Prompted, Completing)
            | (Completing, Prompted)
            | (Completing, Concluded)
    )
}

/// Error returned when an illegal phase transition is attempted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal session transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

/// Who produced a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    Student,
    Facilitator,
}

/// One turn in the chronological transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: SpeakerRole,
    /// Display name for student turns; facilitator turns carry none.
    pub name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-participant session record, created lazily on first message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participation {
    pub display_name: String,
    pub message_count: u32,
    /// Insight indices this participant has been credited for. Grows only.
    pub insights_covered: BTreeSet<usize>,
}

/// The live state of one in-progress discussion in one channel.
#[derive(Debug, Clone)]
pub struct Session {
    pub lesson_id: String,
    pub team_label: String,
    pub started_at: DateTime<Utc>,
    phase: SessionPhase,
    /// 0-based index of the *next* stage to prompt; the currently answered
    /// stage is `stage_index - 1` once the first prompt has been sent.
    pub stage_index: usize,
    participants: HashMap<String, Participation>,
    /// Participant ids in first-seen order (report tie-break).
    join_order: Vec<String>,
    /// Union of covered insight indices across all participants for the
    /// current stage; reset on stage advance.
    pub stage_coverage: BTreeSet<usize>,
    pub transcript: Vec<TranscriptEntry>,
}

impl Session {
    pub fn new(lesson_id: impl Into<String>, team_label: impl Into<String>) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            team_label: team_label.into(),
            started_at: Utc::now(),
            phase: SessionPhase::Introducing,
            stage_index: 0,
            participants: HashMap::new(),
            join_order: Vec::new(),
            stage_coverage: BTreeSet::new(),
            transcript: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Attempt a phase transition, validating against the legal edge set.
    pub fn advance_phase(
        &mut self,
        to: SessionPhase,
        reason: &str,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.phase, to) {
            return Err(IllegalTransition {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(from = %self.phase, to = %to, reason, "Session transition");
        self.phase = to;
        Ok(())
    }

    /// The stage currently being answered, if a prompt has been sent.
    pub fn answered_stage(&self) -> Option<usize> {
        self.stage_index.checked_sub(1)
    }

    /// Enter the stage at `stage_index`: bump the index and reset the
    /// per-stage coverage union.
    pub fn begin_stage(&mut self) {
        self.stage_index += 1;
        self.stage_coverage.clear();
    }

    /// The participation record for `participant_id`, created lazily.
    /// Updates the stored display name to the last seen value.
    pub fn participant_mut(
        &mut self,
        participant_id: &str,
        display_name: &str,
    ) -> &mut Participation {
        use std::collections::hash_map::Entry;
        match self.participants.entry(participant_id.to_string()) {
            Entry::Vacant(slot) => {
                self.join_order.push(participant_id.to_string());
                slot.insert(Participation {
                    display_name: display_name.to_string(),
                    message_count: 0,
                    insights_covered: BTreeSet::new(),
                })
            }
            Entry::Occupied(slot) => {
                let record = slot.into_mut();
                record.display_name = display_name.to_string();
                record
            }
        }
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participation> {
        self.participants.get(participant_id)
    }

    /// Participants in first-seen order.
    pub fn participants(&self) -> impl Iterator<Item = (&str, &Participation)> {
        self.join_order.iter().filter_map(move |id| {
            self.participants
                .get(id)
                .map(|p| (id.as_str(), p))
        })
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Total messages across all participants.
    pub fn message_count(&self) -> u32 {
        self.participants.values().map(|p| p.message_count).sum()
    }

    /// Whether the per-stage union covers every expected index.
    ///
    /// Coverage only ever holds indices below `expected` (the oracle
    /// boundary filters), so a length check is equivalent to set equality.
    pub fn stage_covered(&self, expected: usize) -> bool {
        self.stage_coverage.len() >= expected
    }

    pub fn record_student(&mut self, name: &str, content: &str) {
        self.transcript.push(TranscriptEntry {
            role: SpeakerRole::Student,
            name: Some(name.to_string()),
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn record_facilitator(&mut self, content: &str) {
        self.transcript.push(TranscriptEntry {
            role: SpeakerRole::Facilitator,
            name: None,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_introducing() {
        let session = Session::new("lesson", "Team A");
        assert_eq!(session.phase(), SessionPhase::Introducing);
        assert_eq!(session.stage_index, 0);
        assert_eq!(session.answered_stage(), None);
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = Session::new("lesson", "Team A");
        s.advance_phase(SessionPhase::Prompted, "first prompt").unwrap();
        s.advance_phase(SessionPhase::Completing, "coverage reached")
            .unwrap();
        s.advance_phase(SessionPhase::Prompted, "next prompt").unwrap();
        s.advance_phase(SessionPhase::Completing, "deadline").unwrap();
        s.advance_phase(SessionPhase::Concluded, "last stage").unwrap();
        assert!(s.phase().is_terminal());
    }

    #[test]
    fn illegal_transitions_rejected() {
        let mut s = Session::new("lesson", "Team A");
        let err = s
            .advance_phase(SessionPhase::Completing, "skip")
            .unwrap_err();
        assert_eq!(err.from, SessionPhase::Introducing);
        assert_eq!(err.to, SessionPhase::Completing);

        s.advance_phase(SessionPhase::Prompted, "").unwrap();
        s.advance_phase(SessionPhase::Completing, "").unwrap();
        s.advance_phase(SessionPhase::Concluded, "").unwrap();
        assert!(s.advance_phase(SessionPhase::Prompted, "revive").is_err());
    }

    #[test]
    fn empty_lesson_can_conclude_from_introducing() {
        let mut s = Session::new("lesson", "Team A");
        assert!(s.advance_phase(SessionPhase::Concluded, "no stages").is_ok());
    }

    #[test]
    fn begin_stage_resets_coverage_and_bumps_index() {
        let mut s = Session::new("lesson", "Team A");
        s.begin_stage();
        s.stage_coverage.insert(0);
        s.stage_coverage.insert(1);
        assert_eq!(s.answered_stage(), Some(0));
        assert!(s.stage_covered(2));

        s.begin_stage();
        assert_eq!(s.answered_stage(), Some(1));
        assert!(s.stage_coverage.is_empty());
        assert!(!s.stage_covered(1));
        assert!(s.stage_covered(0));
    }

    #[test]
    fn participant_created_lazily_and_name_updates() {
        let mut s = Session::new("lesson", "Team A");
        s.participant_mut("p1", "Ada").message_count += 1;
        s.participant_mut("p2", "Grace").message_count += 1;
        s.participant_mut("p1", "Ada L.").message_count += 1;

        assert_eq!(s.participant_count(), 2);
        assert_eq!(s.message_count(), 3);
        assert_eq!(s.participant("p1").unwrap().display_name, "Ada L.");

        let order: Vec<&str> = s.participants().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["p1", "p2"]);
    }

    #[test]
    fn insight_credit_is_idempotent_per_participant() {
        let mut s = Session::new("lesson", "Team A");
        let p = s.participant_mut("p1", "Ada");
        assert!(p.insights_covered.insert(0));
        assert!(!p.insights_covered.insert(0));
        assert_eq!(p.insights_covered.len(), 1);
    }

    #[test]
    fn transcript_is_chronological_and_append_only() {
        let mut s = Session::new("lesson", "Team A");
        s.record_student("Ada", "first");
        s.record_facilitator("reply");
        s.record_student("Grace", "second");

        assert_eq!(s.transcript.len(), 3);
        assert_eq!(s.transcript[0].role, SpeakerRole::Student);
        assert_eq!(s.transcript[1].role, SpeakerRole::Facilitator);
        assert_eq!(s.transcript[1].name, None);
        assert_eq!(s.transcript[2].name.as_deref(), Some("Grace"));
    }
}
