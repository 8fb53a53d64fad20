//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Reasoning endpoint shared by the insight oracle and text generation.
#[derive(Debug, Clone)]
pub struct ReasoningEndpoint {
    /// Base URL up to the API version segment, e.g. `https://api.deepseek.com/v1`.
    pub url: String,
    pub api_key: String,
    pub model: String,
}

/// Fixed delays baked into the stage pipeline.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Gap between the introduction and the first prompt.
    pub intro_delay: Duration,
    /// Per-stage deadline; firing forces stage completion.
    pub stage_deadline: Duration,
    /// Gap between full coverage and the stage summary, so the last reply
    /// can be read.
    pub coverage_summary_delay: Duration,
    /// Gap between the deadline hint and the stage summary.
    pub post_hint_delay: Duration,
    /// Gap between a stage summary and the next prompt.
    pub next_prompt_delay: Duration,
    /// Window for confirming a ledger reset.
    pub reset_confirm_window: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            intro_delay: Duration::from_secs(5),
            stage_deadline: Duration::from_secs(5 * 60),
            coverage_summary_delay: Duration::from_secs(10),
            post_hint_delay: Duration::from_secs(15),
            next_prompt_delay: Duration::from_secs(5),
            reset_confirm_window: Duration::from_secs(10),
        }
    }
}

/// Point values for the award policy.
#[derive(Debug, Clone)]
pub struct Awards {
    /// Per newly credited insight.
    pub insight_points: u64,
    /// Flat bonus for a contribution with no new insight.
    pub participation_points: u64,
}

impl Default for Awards {
    fn default() -> Self {
        Self {
            insight_points: 10,
            participation_points: 2,
        }
    }
}

/// Top-level facilitator configuration.
#[derive(Debug, Clone)]
pub struct FacilitatorConfig {
    pub reasoning: ReasoningEndpoint,
    /// The one privileged identity allowed to run operator commands.
    pub operator_id: String,
    /// Out-of-band report recipient; `None` skips report delivery.
    pub report_recipient: Option<String>,
    pub lesson_path: PathBuf,
    pub ledger_path: PathBuf,
    pub timings: Timings,
    pub awards: Awards,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        let operator_id = std::env::var("FACILITATOR_OPERATOR_ID").unwrap_or_default();
        let report_recipient = std::env::var("FACILITATOR_REPORT_RECIPIENT")
            .ok()
            .or_else(|| (!operator_id.is_empty()).then(|| operator_id.clone()));
        Self {
            reasoning: ReasoningEndpoint {
                url: std::env::var("FACILITATOR_API_URL")
                    .unwrap_or_else(|_| "https://api.deepseek.com/v1".into()),
                api_key: std::env::var("FACILITATOR_API_KEY").unwrap_or_default(),
                model: std::env::var("FACILITATOR_MODEL")
                    .unwrap_or_else(|_| "deepseek-chat".into()),
            },
            operator_id,
            report_recipient,
            lesson_path: std::env::var("FACILITATOR_LESSON_PATH")
                .unwrap_or_else(|_| "lessons.json".into())
                .into(),
            ledger_path: std::env::var("FACILITATOR_LEDGER_PATH")
                .unwrap_or_else(|_| "participant_xp.json".into())
                .into(),
            timings: Timings::default(),
            awards: Awards::default(),
        }
    }
}

/// Check whether the reasoning endpoint is reachable (GET `{url}/models`).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_match_stage_pipeline() {
        let t = Timings::default();
        assert_eq!(t.stage_deadline, Duration::from_secs(300));
        assert_eq!(t.coverage_summary_delay, Duration::from_secs(10));
        assert_eq!(t.post_hint_delay, Duration::from_secs(15));
        assert_eq!(t.reset_confirm_window, Duration::from_secs(10));
    }

    #[test]
    fn default_awards() {
        let a = Awards::default();
        assert_eq!(a.insight_points, 10);
        assert_eq!(a.participation_points, 2);
    }
}
