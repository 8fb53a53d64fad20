//! Insight oracle boundary.
//!
//! The oracle is queried with a participant message and the current stage's
//! candidate insight descriptions, and answers with the subset judged
//! demonstrated. Its output shape varies in practice, so the strict internal
//! schema (a deduplicated list of valid 0-based indices) is produced by a
//! tolerant parser here; the rest of the engine never sees raw output.

use async_trait::async_trait;

/// Oracle failure surface.
///
/// Callers treat every variant as "no insights detected" — a classification
/// failure never blocks point scoring or errors the session.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The request to the oracle failed (network, timeout, HTTP status).
    #[error("oracle request failed: {0}")]
    Request(String),

    /// The oracle responded but nothing usable could be recovered.
    #[error("oracle response unusable: {0}")]
    Unusable(String),
}

/// External insight-classification service.
#[async_trait]
pub trait InsightOracle: Send + Sync {
    /// Which of `candidates` (by 0-based index) does `message` demonstrate?
    ///
    /// Implementations must return indices already filtered to
    /// `0..candidates.len()`, deduplicated, in ascending order.
    async fn detect(&self, message: &str, candidates: &[String]) -> Result<Vec<usize>, OracleError>;
}

/// Recover insight indices from a raw oracle response.
///
/// Accepted shapes, in order:
/// 1. A JSON array of integers, possibly wrapped in a ``` code fence.
/// 2. Any text containing small integers — a best-effort scan used when the
///    response is not valid JSON.
///
/// Indices outside `0..candidate_count` are dropped; the result is
/// deduplicated and ascending. An unrecoverable response yields an empty
/// vector, never an error.
pub fn recover_indices(raw: &str, candidate_count: usize) -> Vec<usize> {
    let stripped = strip_code_fence(raw);

    let mut found: Vec<usize> = match serde_json::from_str::<Vec<i64>>(stripped) {
        Ok(values) => values
            .into_iter()
            .filter(|&v| v >= 0)
            .map(|v| v as usize)
            .collect(),
        Err(_) => scan_integers(raw),
    };

    found.retain(|&i| i < candidate_count);
    found.sort_unstable();
    found.dedup();
    found
}

/// Remove a surrounding ``` fence (with or without a `json` tag).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Best-effort scan for integers in unstructured text.
fn scan_integers(raw: &str) -> Vec<usize> {
    static INT_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = INT_RE.get_or_init(|| regex::Regex::new(r"\d+").expect("static integer pattern"));
    re.find_iter(raw)
        .filter_map(|m| m.as_str().parse::<usize>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_array() {
        assert_eq!(recover_indices("[0, 2]", 3), vec![0, 2]);
        assert_eq!(recover_indices(" [1] ", 3), vec![1]);
        assert_eq!(recover_indices("[]", 3), Vec::<usize>::new());
    }

    #[test]
    fn parses_fenced_json_array() {
        assert_eq!(recover_indices("```json\n[0, 1]\n```", 2), vec![0, 1]);
        assert_eq!(recover_indices("```\n[1]\n```", 2), vec![1]);
    }

    #[test]
    fn falls_back_to_integer_scan_on_prose() {
        assert_eq!(
            recover_indices("The student demonstrated insights 0 and 2.", 3),
            vec![0, 2]
        );
    }

    #[test]
    fn out_of_range_indices_dropped() {
        assert_eq!(recover_indices("[0, 7]", 2), vec![0]);
        assert_eq!(recover_indices("insights 1 and 9", 2), vec![1]);
    }

    #[test]
    fn negative_values_dropped() {
        assert_eq!(recover_indices("[-1, 1]", 3), vec![1]);
    }

    #[test]
    fn duplicates_collapse() {
        assert_eq!(recover_indices("[1, 1, 0, 0]", 2), vec![0, 1]);
    }

    #[test]
    fn garbage_yields_empty() {
        assert_eq!(recover_indices("no insights here", 3), Vec::<usize>::new());
        assert_eq!(recover_indices("", 3), Vec::<usize>::new());
        assert_eq!(recover_indices("{\"weird\": true}", 0), Vec::<usize>::new());
    }

    #[test]
    fn zero_candidates_always_empty() {
        assert_eq!(recover_indices("[0]", 0), Vec::<usize>::new());
    }
}
