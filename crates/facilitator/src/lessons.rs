//! Lesson provider — read-only lesson definitions loaded from a JSON file.
//!
//! Lookup never fails: a missing file, a parse error, or an unknown lesson
//! id all fall back to the built-in default lesson so a start command can
//! always proceed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One question/prompt unit within a lesson.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// The prompt posted to the channel when the stage is entered.
    pub question: String,
    /// Ordered insight descriptions the facilitator is watching for.
    /// Insights are identified by 0-based index into this list.
    pub expected_insights: Vec<String>,
    /// Follow-up prompts the facilitator may weave into replies.
    #[serde(default)]
    pub followup_questions: Vec<String>,
}

/// A complete lesson definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    /// Ordered stages; the session walks these front to back.
    pub discussion_flow: Vec<Stage>,
    #[serde(default)]
    pub key_takeaways: Vec<String>,
}

impl Lesson {
    /// Total expected insights across all stages.
    pub fn total_expected_insights(&self) -> usize {
        self.discussion_flow
            .iter()
            .map(|s| s.expected_insights.len())
            .sum()
    }
}

/// On-disk lesson file shape: `{ "lessons": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LessonFile {
    lessons: Vec<Lesson>,
}

/// Provider for lesson definitions.
///
/// Lessons are loaded once at construction; the file is small and sessions
/// resolve their lesson at start, so there is no reload path.
pub struct LessonProvider {
    lessons: Vec<Lesson>,
    source: Option<PathBuf>,
}

impl LessonProvider {
    /// Load lessons from `path`, falling back to the default lesson set on
    /// any read or parse failure.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<LessonFile>(&data) {
                Ok(file) if !file.lessons.is_empty() => {
                    info!(path = %path.display(), count = file.lessons.len(), "Lessons loaded");
                    Self {
                        lessons: file.lessons,
                        source: Some(path.to_path_buf()),
                    }
                }
                Ok(_) => {
                    warn!(path = %path.display(), "Lesson file has no lessons, using default");
                    Self::default()
                }
                Err(e) => {
                    warn!(path = %path.display(), "Lesson file unparsable ({e}), using default");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), "Lesson file unreadable ({e}), using default");
                Self::default()
            }
        }
    }

    /// Build a provider from an in-memory lesson list (tests, fixtures).
    ///
    /// An empty list is replaced with the default lesson so `resolve` always
    /// has a fallback.
    pub fn from_lessons(lessons: Vec<Lesson>) -> Self {
        if lessons.is_empty() {
            return Self::default();
        }
        Self {
            lessons,
            source: None,
        }
    }

    /// Resolve a lesson by id, falling back to the first lesson when the id
    /// is unknown.
    pub fn resolve(&self, lesson_id: &str) -> &Lesson {
        self.lessons
            .iter()
            .find(|l| l.id == lesson_id)
            .unwrap_or_else(|| {
                warn!(lesson_id, "Unknown lesson id, falling back to default");
                &self.lessons[0]
            })
    }

    /// All known lessons, in file order.
    pub fn all(&self) -> &[Lesson] {
        &self.lessons
    }

    /// Where the lessons came from, if loaded from disk.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl Default for LessonProvider {
    fn default() -> Self {
        Self {
            lessons: vec![default_lesson()],
            source: None,
        }
    }
}

/// The built-in placeholder lesson used when no lesson file is available.
fn default_lesson() -> Lesson {
    Lesson {
        id: "default".into(),
        title: "Default Lesson".into(),
        description: "This is a placeholder lesson.".into(),
        learning_objectives: vec![
            "Understand place value".into(),
            "Practice decimal operations".into(),
        ],
        discussion_flow: vec![Stage {
            question: "What patterns do you notice in these decimal multiplication problems?"
                .into(),
            expected_insights: vec![
                "The decimal point moves".into(),
                "Multiplying by 0.1 makes the number smaller".into(),
            ],
            followup_questions: vec![
                "Why does that happen?".into(),
                "Can you explain why multiplying by 0.1 is the same as dividing by 10?".into(),
            ],
        }],
        key_takeaways: vec![
            "Multiplying by 0.1 is equivalent to dividing by 10".into(),
            "Decimal placement follows patterns".into(),
        ],
    }
}
