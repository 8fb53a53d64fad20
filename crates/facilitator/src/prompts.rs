//! System prompt builders for the facilitation and reporting calls.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever prompt content changes,
//! so a logged response can be traced to the prompt revision that produced
//! it.

use crate::generation::ChatTurn;
use crate::lessons::{Lesson, Stage};
use crate::report::ParticipationStats;

/// Prompt version. Bump on any content change.
pub const PROMPT_VERSION: &str = "1.0.0";

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}

/// Facilitator reply to one student contribution.
///
/// The reply must acknowledge the student by name, weave in follow-ups, and
/// never reveal that insights are being tracked.
pub fn facilitator_reply(
    team_label: &str,
    lesson: &Lesson,
    stage: &Stage,
    student_name: &str,
    message: &str,
) -> Vec<ChatTurn> {
    let system = format!(
        "You are a math discussion facilitator for Team {team_label}, a middle school math group.\n\
Current lesson: \"{title}\"\n\
Current question: \"{question}\"\n\
Expected insights: {insights}\n\
Follow-up questions: {followups}\n\
\n\
Your role is to:\n\
1. Acknowledge student contributions positively\n\
2. Identify when students make points related to the expected insights\n\
3. Guide the discussion toward the learning objectives by asking follow-up questions\n\
4. Encourage participation from students who haven't contributed yet\n\
5. Use an encouraging tone appropriate for middle school students\n\
\n\
The student named {student_name} just said: \"{message}\"\n\
\n\
Respond to them directly, using their name. If they made a point that aligns with an \
expected insight, acknowledge that specifically.\n\
If appropriate, ask one of the follow-up questions or encourage deeper thinking.\n\
Keep your response conversational, encouraging, and under 150 words.\n\
DO NOT mention that you're tracking insights or following a lesson plan.",
        title = lesson.title,
        question = stage.question,
        insights = json_list(&stage.expected_insights),
        followups = json_list(&stage.followup_questions),
    );
    vec![ChatTurn::system(system)]
}

/// System prompt for the insight-detection call; the student message is
/// sent as the user turn.
pub fn insight_detector(candidates: &[String]) -> String {
    format!(
        "You are an insight detector. Analyze if the student's message demonstrates \
understanding of any of the expected insights.\n\
Return ONLY a JSON array of matched insight indices (0-based) or an empty array if no \
insights detected.\n\
Expected insights: {}",
        json_list(candidates)
    )
}

/// Per-stage discussion summary, posted before advancing.
pub fn stage_summary(team_label: &str, stage: &Stage, student_lines: &str) -> Vec<ChatTurn> {
    let system = format!(
        "You are analyzing a math discussion for Team {team_label}.\n\
The current question was: \"{question}\"\n\
Expected insights: {insights}\n\
\n\
Here's what the students have said:\n\
{student_lines}\n\
\n\
Create a brief summary (100-150 words) of key points discussed, highlighting the \
important insights that were shared.\n\
Be encouraging and positive about the students' contributions.\n\
End by smoothly transitioning to the next part of the discussion.",
        question = stage.question,
        insights = json_list(&stage.expected_insights),
    );
    vec![ChatTurn::system(system)]
}

/// Session conclusion posted to the channel after the last stage.
pub fn conclusion(team_label: &str, lesson: &Lesson, transcript: &str) -> Vec<ChatTurn> {
    let system = format!(
        "You are concluding a math discussion for Team {team_label} on the lesson \"{title}\".\n\
Learning objectives were: {objectives}\n\
Key takeaways should include: {takeaways}\n\
\n\
The discussion was:\n\
{transcript}\n\
\n\
Create a thoughtful conclusion (200-250 words) that:\n\
1. Summarizes what the team discussed\n\
2. Highlights the key mathematical concepts they explored\n\
3. Reinforces the intended learning objectives\n\
4. Praises specific insights that came up in discussion\n\
5. Ends with an encouraging statement about applying these concepts\n\
\n\
Be conversational and motivating in your tone, suitable for middle school students.",
        title = lesson.title,
        objectives = json_list(&lesson.learning_objectives),
        takeaways = json_list(&lesson.key_takeaways),
    );
    vec![ChatTurn::system(system)]
}

/// Instructor-facing report prose, generated from aggregated statistics.
pub fn instructor_report(
    team_label: &str,
    lesson: &Lesson,
    stats: &ParticipationStats,
    student_lines: &str,
) -> Vec<ChatTurn> {
    let system = format!(
        "You are creating a teacher report for a math discussion.\n\
Lesson: \"{title}\"\n\
Team: {team_label}\n\
Duration: {duration} minutes\n\
Participating students: {participants}\n\
Total messages: {messages}\n\
Insights covered: {covered}/{expected} ({percent}%)\n\
\n\
Student participation:\n\
{student_lines}\n\
\n\
Write a concise report (300-400 words) for the teacher that:\n\
1. Summarizes the discussion quality and student engagement\n\
2. Highlights which concepts students understood well\n\
3. Identifies any areas where students seemed to struggle\n\
4. Makes recommendations for follow-up teaching\n\
5. Notes any exceptional contributions or misconceptions\n\
\n\
Be professional and objective, focusing on learning outcomes.",
        title = lesson.title,
        duration = stats.duration_minutes,
        participants = stats.participant_count,
        messages = stats.message_count,
        covered = stats.insights_covered,
        expected = stats.total_expected,
        percent = stats.coverage_percent,
    );
    vec![ChatTurn::system(system)]
}
