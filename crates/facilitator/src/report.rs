//! Participation reporting for concluded sessions.
//!
//! Computes aggregate statistics and contributor rankings from a session
//! snapshot plus the ledger, generates instructor-facing prose from the
//! aggregates, and delivers the report out-of-band with the transcript
//! chunked for transport.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::generation::{TextGenerator, FALLBACK_REPLY};
use crate::ledger::SharedLedger;
use crate::lessons::Lesson;
use crate::platform::{ChatSink, OutboundMessage};
use crate::prompts;
use crate::session::{Session, SpeakerRole};

/// Chunk size for transcript delivery.
pub const TRANSCRIPT_CHUNK_LEN: usize = 1900;
/// Transcripts at or under this length are sent whole.
pub const TRANSCRIPT_INLINE_LIMIT: usize = 2000;

/// Aggregate participation statistics for a concluded session.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipationStats {
    pub participant_count: usize,
    pub message_count: u32,
    /// Distinct insight indices covered, summed over the session.
    pub insights_covered: usize,
    /// Expected insights across all stages of the lesson.
    pub total_expected: usize,
    /// Rounded percentage; 0 when nothing was expected.
    pub coverage_percent: u32,
    pub duration_minutes: i64,
}

/// Compute session-level statistics.
pub fn session_stats(session: &Session, lesson: &Lesson) -> ParticipationStats {
    let total_expected = lesson.total_expected_insights();
    let insights_covered = covered_insight_count(session);
    let coverage_percent = if total_expected == 0 {
        0
    } else {
        ((insights_covered as f64 / total_expected as f64) * 100.0).round() as u32
    };
    ParticipationStats {
        participant_count: session.participant_count(),
        message_count: session.message_count(),
        insights_covered,
        total_expected,
        coverage_percent,
        duration_minutes: (Utc::now() - session.started_at).num_minutes(),
    }
}

/// Distinct insight indices credited to anyone during the session.
fn covered_insight_count(session: &Session) -> usize {
    let mut union = std::collections::BTreeSet::new();
    for (_, p) in session.participants() {
        union.extend(p.insights_covered.iter().copied());
    }
    union.len()
}

/// One ranked contributor line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContributorRank {
    pub name: String,
    pub insights: usize,
    pub messages: u32,
}

/// Top `n` contributors: insight count descending, then message count
/// descending, ties broken by first-seen order (stable sort over the
/// join-ordered participant list).
pub fn top_contributors(session: &Session, n: usize) -> Vec<ContributorRank> {
    let mut ranked: Vec<ContributorRank> = session
        .participants()
        .map(|(_, p)| ContributorRank {
            name: p.display_name.clone(),
            insights: p.insights_covered.len(),
            messages: p.message_count,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.insights
            .cmp(&a.insights)
            .then_with(|| b.messages.cmp(&a.messages))
    });
    ranked.truncate(n);
    ranked
}

/// Render the full chronological transcript.
pub fn render_transcript(session: &Session) -> String {
    session
        .transcript
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                SpeakerRole::Student => turn.name.as_deref().unwrap_or("Student"),
                SpeakerRole::Facilitator => "Facilitator",
            };
            format!(
                "[{}] {}: {}",
                turn.timestamp.format("%H:%M:%S"),
                speaker,
                turn.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split `transcript` into contiguous chunks of exactly `chunk_len`
/// characters (the final chunk may be shorter). Concatenating the chunks in
/// order reproduces the input exactly.
pub fn chunk_transcript(transcript: &str, chunk_len: usize) -> Vec<String> {
    if transcript.is_empty() || chunk_len == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = transcript.chars().collect();
    chars
        .chunks(chunk_len)
        .map(|c| c.iter().collect())
        .collect()
}

/// Generate and deliver the instructor report.
///
/// A missing recipient skips delivery silently; delivery failures are
/// logged and never propagate into the conclusion flow.
pub async fn deliver_instructor_report(
    sink: &dyn ChatSink,
    generator: &dyn TextGenerator,
    recipient: Option<&str>,
    session: &Session,
    lesson: &Lesson,
    ledger: &SharedLedger,
) {
    let Some(recipient) = recipient else {
        info!("No report recipient configured, skipping instructor report");
        return;
    };

    let stats = session_stats(session, lesson);
    let student_lines = student_performance_lines(session, ledger);

    let prose = match generator
        .generate(&prompts::instructor_report(
            &session.team_label,
            lesson,
            &stats,
            &student_lines,
        ))
        .await
    {
        Ok(prose) => prose,
        Err(e) => {
            warn!("Report generation failed: {e}");
            FALLBACK_REPLY.to_string()
        }
    };

    let report = OutboundMessage::notice(
        format!(
            "Team {} - {} - Report",
            session.team_label, lesson.title
        ),
        prose,
    )
    .field(
        "Participation Stats",
        format!(
            "Students: {}\nMessages: {}\nInsights: {}/{} ({}%)",
            stats.participant_count,
            stats.message_count,
            stats.insights_covered,
            stats.total_expected,
            stats.coverage_percent
        ),
    )
    .field("Student Performance", student_lines);

    if let Err(e) = sink.send_direct(recipient, report).await {
        warn!(recipient, "Instructor report delivery failed: {e}");
        return;
    }

    let transcript = render_transcript(session);
    if transcript.chars().count() > TRANSCRIPT_INLINE_LIMIT {
        let chunks = chunk_transcript(&transcript, TRANSCRIPT_CHUNK_LEN);
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let msg = OutboundMessage::text(format!(
                "**Transcript ({}/{total}):**\n{chunk}",
                i + 1
            ));
            if let Err(e) = sink.send_direct(recipient, msg).await {
                warn!(recipient, chunk = i + 1, "Transcript chunk delivery failed: {e}");
                return;
            }
        }
    } else if let Err(e) = sink
        .send_direct(
            recipient,
            OutboundMessage::text(format!("**Full Transcript:**\n{transcript}")),
        )
        .await
    {
        warn!(recipient, "Transcript delivery failed: {e}");
    }
}

/// Per-participant lines for the report body and prompt.
fn student_performance_lines(session: &Session, ledger: &SharedLedger) -> String {
    let lines: Vec<String> = session
        .participants()
        .map(|(id, p)| {
            format!(
                "{}: {} msgs, {} insights, {} XP",
                p.display_name,
                p.message_count,
                p.insights_covered.len(),
                ledger.total_for(id)
            )
        })
        .collect();
    if lines.is_empty() {
        "No participants".into()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lessons::LessonProvider;

    fn session_with_participants() -> Session {
        let mut s = Session::new("default", "Alpha");
        {
            let p = s.participant_mut("p1", "Ada");
            p.message_count = 4;
            p.insights_covered.insert(0);
            p.insights_covered.insert(1);
        }
        {
            let p = s.participant_mut("p2", "Grace");
            p.message_count = 6;
            p.insights_covered.insert(1);
        }
        {
            let p = s.participant_mut("p3", "Edsger");
            p.message_count = 6;
            p.insights_covered.insert(0);
        }
        s
    }

    #[test]
    fn stats_union_coverage_and_percent() {
        let provider = LessonProvider::default();
        let lesson = provider.resolve("default");
        let session = session_with_participants();

        let stats = session_stats(&session, lesson);
        assert_eq!(stats.participant_count, 3);
        assert_eq!(stats.message_count, 16);
        // p1 covered {0,1}, p2 {1}, p3 {0}: union is {0,1}.
        assert_eq!(stats.insights_covered, 2);
        assert_eq!(stats.total_expected, 2);
        assert_eq!(stats.coverage_percent, 100);
    }

    #[test]
    fn stats_with_no_expected_insights() {
        let lesson = Lesson {
            id: "empty".into(),
            title: "Empty".into(),
            description: String::new(),
            learning_objectives: vec![],
            discussion_flow: vec![],
            key_takeaways: vec![],
        };
        let stats = session_stats(&Session::new("empty", "A"), &lesson);
        assert_eq!(stats.coverage_percent, 0);
    }

    #[test]
    fn ranking_orders_by_insights_then_messages_then_first_seen() {
        let session = session_with_participants();
        let top = top_contributors(&session, 3);
        // Ada: 2 insights. Grace and Edsger tie at 1 insight / 6 messages;
        // Grace was seen first.
        assert_eq!(top[0].name, "Ada");
        assert_eq!(top[1].name, "Grace");
        assert_eq!(top[2].name, "Edsger");
    }

    #[test]
    fn ranking_truncates() {
        let session = session_with_participants();
        assert_eq!(top_contributors(&session, 2).len(), 2);
        assert_eq!(top_contributors(&session, 10).len(), 3);
    }

    #[test]
    fn chunks_reassemble_exactly() {
        let text: String = "abcdefghij".repeat(500); // 5000 chars
        let chunks = chunk_transcript(&text, TRANSCRIPT_CHUNK_LEN);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), TRANSCRIPT_CHUNK_LEN);
        assert_eq!(chunks[1].chars().count(), TRANSCRIPT_CHUNK_LEN);
        assert_eq!(chunks[2].chars().count(), 5000 - 2 * TRANSCRIPT_CHUNK_LEN);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunking_handles_multibyte_boundaries() {
        let text: String = "π".repeat(4000);
        let chunks = chunk_transcript(&text, TRANSCRIPT_CHUNK_LEN);
        assert_eq!(chunks.concat(), text);
        assert_eq!(chunks[0].chars().count(), TRANSCRIPT_CHUNK_LEN);
    }

    #[test]
    fn empty_transcript_yields_no_chunks() {
        assert!(chunk_transcript("", TRANSCRIPT_CHUNK_LEN).is_empty());
    }

    #[test]
    fn transcript_renders_speaker_names() {
        let mut s = Session::new("default", "Alpha");
        s.record_student("Ada", "I think the decimal moves");
        s.record_facilitator("Great observation!");
        let rendered = render_transcript(&s);
        assert!(rendered.contains("Ada: I think the decimal moves"));
        assert!(rendered.contains("Facilitator: Great observation!"));
    }
}
