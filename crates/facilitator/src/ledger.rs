//! Experience ledger — cumulative points and contribution history.
//!
//! The ledger favors availability over durability: every award mutates the
//! in-memory state first, then persists the whole ledger best-effort. A
//! failed write is logged and never rolled back; the running process stays
//! authoritative.
//!
//! Entries keep first-award insertion order, which `top_n` uses as the tie
//! break, and the on-disk JSON object preserves that order (serde_json
//! `preserve_order`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One awarded contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub points: u64,
    pub reason: String,
    /// Stored as Unix milliseconds, matching the persisted ledger format.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Per-participant ledger entry.
///
/// `points` is monotonically non-decreasing; `contributions` is append-only.
/// `name` holds the last display name seen at award time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub name: String,
    pub points: u64,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
}

/// The experience ledger.
pub struct ExperienceLedger {
    /// Entries in first-award insertion order.
    entries: Vec<LedgerEntry>,
    /// Participant id → index into `entries`.
    index: HashMap<String, usize>,
    /// Persistence target; `None` disables persistence (tests).
    save_path: Option<PathBuf>,
    /// Ordered writer task; snapshots are queued here so writes cannot
    /// reorder. `None` until [`ExperienceLedger::start_writer`] runs.
    writer: Option<tokio::sync::mpsc::UnboundedSender<String>>,
}

impl ExperienceLedger {
    /// An empty in-memory ledger without persistence.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            save_path: None,
            writer: None,
        }
    }

    /// Load the ledger from `path`. A missing file is not an error — it
    /// initializes empty. An unparsable file is logged and also starts
    /// fresh rather than blocking startup.
    pub fn load(path: &Path) -> Self {
        let mut ledger = Self::new();
        ledger.save_path = Some(path.to_path_buf());

        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => {
                info!(path = %path.display(), "No existing ledger file, starting fresh");
                return ledger;
            }
        };

        match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&data) {
            Ok(map) => {
                for (id, value) in map {
                    match serde_json::from_value::<LedgerEntry>(value) {
                        Ok(entry) => {
                            ledger.index.insert(id, ledger.entries.len());
                            ledger.entries.push(entry);
                        }
                        Err(e) => warn!(id, "Skipping unreadable ledger entry: {e}"),
                    }
                }
                info!(path = %path.display(), entries = ledger.entries.len(), "Ledger loaded");
            }
            Err(e) => {
                warn!(path = %path.display(), "Ledger file unparsable ({e}), starting fresh");
            }
        }
        ledger
    }

    /// Award `points` to a participant, creating the entry on first award.
    ///
    /// Returns the participant's new running total. Persists best-effort.
    pub fn award(
        &mut self,
        participant_id: &str,
        display_name: &str,
        points: u64,
        reason: impl Into<String>,
    ) -> u64 {
        let idx = match self.index.get(participant_id) {
            Some(&idx) => idx,
            None => {
                let idx = self.entries.len();
                self.entries.push(LedgerEntry {
                    id: participant_id.to_string(),
                    name: display_name.to_string(),
                    points: 0,
                    contributions: Vec::new(),
                });
                self.index.insert(participant_id.to_string(), idx);
                idx
            }
        };

        let entry = &mut self.entries[idx];
        entry.name = display_name.to_string();
        entry.points += points;
        entry.contributions.push(Contribution {
            points,
            reason: reason.into(),
            timestamp: Utc::now(),
        });
        let total = entry.points;

        debug!(participant = participant_id, points, total, "Points awarded");
        self.persist();
        total
    }

    /// Atomically replace the ledger with an empty one and persist.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
        info!("Ledger reset");
        self.persist();
    }

    /// Entry for a participant, if any.
    pub fn get(&self, participant_id: &str) -> Option<&LedgerEntry> {
        self.index.get(participant_id).map(|&i| &self.entries[i])
    }

    /// Running total for a participant (0 if absent).
    pub fn total_for(&self, participant_id: &str) -> u64 {
        self.get(participant_id).map(|e| e.points).unwrap_or(0)
    }

    /// Top `n` entries by points descending; ties keep insertion order
    /// (stable sort over the insertion-ordered entry list).
    pub fn top_n(&self, n: usize) -> Vec<LedgerEntry> {
        let mut ranked: Vec<&LedgerEntry> = self.entries.iter().collect();
        ranked.sort_by(|a, b| b.points.cmp(&a.points));
        ranked.into_iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to the persisted shape: a JSON object keyed by participant
    /// id, in insertion order.
    fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        for entry in &self.entries {
            match serde_json::to_value(entry) {
                Ok(value) => {
                    map.insert(entry.id.clone(), value);
                }
                Err(e) => warn!(id = %entry.id, "Skipping unserializable entry: {e}"),
            }
        }
        map
    }

    /// Spawn the ordered writer task. Must run inside a tokio runtime; a
    /// ledger without a writer falls back to synchronous writes.
    ///
    /// Queued snapshots are coalesced — only the newest pending snapshot is
    /// written, which makes persistence idempotent under bursts of awards.
    pub fn start_writer(&mut self) {
        let Some(path) = self.save_path.clone() else {
            return;
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let mut latest = payload;
                while let Ok(next) = rx.try_recv() {
                    latest = next;
                }
                if let Err(e) = tokio::fs::write(&path, latest).await {
                    warn!(path = %path.display(), "Ledger write failed: {e}");
                }
            }
        });
        self.writer = Some(tx);
    }

    /// Best-effort persistence off the caller's critical path.
    ///
    /// Serialization happens under the caller's lock so the snapshot is
    /// consistent; the write itself is queued to the writer task. Failures
    /// are logged, never propagated.
    fn persist(&self) {
        let Some(path) = self.save_path.clone() else {
            return;
        };
        let payload = match serde_json::to_string_pretty(&self.to_json()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Ledger serialization failed: {e}");
                return;
            }
        };

        let payload = if let Some(writer) = &self.writer {
            match writer.send(payload) {
                Ok(()) => return,
                // Writer task is gone; fall through to the synchronous path.
                Err(e) => e.0,
            }
        } else {
            payload
        };
        if let Err(e) = std::fs::write(&path, payload) {
            warn!(path = %path.display(), "Ledger write failed: {e}");
        }
    }
}

impl Default for ExperienceLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the ledger.
///
/// The ledger is the one resource shared across channels; awards from
/// different channel workers are applied as a single read-modify-persist
/// step under this lock.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<ExperienceLedger>>,
}

impl SharedLedger {
    pub fn new(ledger: ExperienceLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExperienceLedger> {
        // A poisoned lock still holds consistent ledger data (mutations are
        // non-panicking appends); recover rather than abort.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn award(
        &self,
        participant_id: &str,
        display_name: &str,
        points: u64,
        reason: impl Into<String>,
    ) -> u64 {
        self.lock().award(participant_id, display_name, points, reason)
    }

    pub fn reset(&self) {
        self.lock().reset()
    }

    pub fn total_for(&self, participant_id: &str) -> u64 {
        self.lock().total_for(participant_id)
    }

    pub fn top_n(&self, n: usize) -> Vec<LedgerEntry> {
        self.lock().top_n(n)
    }

    pub fn entry(&self, participant_id: &str) -> Option<LedgerEntry> {
        self.lock().get(participant_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate_and_history_appends() {
        let mut ledger = ExperienceLedger::new();
        assert_eq!(ledger.award("s1", "Ada", 10, "insight"), 10);
        assert_eq!(ledger.award("s1", "Ada", 2, "participation"), 12);
        assert_eq!(ledger.award("s1", "Ada", 10, "insight"), 22);

        let entry = ledger.get("s1").unwrap();
        assert_eq!(entry.points, 22);
        assert_eq!(entry.contributions.len(), 3);
        assert_eq!(entry.contributions[1].points, 2);
    }

    #[test]
    fn display_name_last_seen_wins() {
        let mut ledger = ExperienceLedger::new();
        ledger.award("s1", "Ada", 10, "insight");
        ledger.award("s1", "Ada L.", 2, "participation");
        assert_eq!(ledger.get("s1").unwrap().name, "Ada L.");
    }

    #[test]
    fn top_n_sorts_desc_and_is_stable_under_ties() {
        let mut ledger = ExperienceLedger::new();
        ledger.award("a", "A", 10, "r");
        ledger.award("b", "B", 20, "r");
        ledger.award("c", "C", 10, "r");
        ledger.award("d", "D", 5, "r");

        let top = ledger.top_n(3);
        let ids: Vec<&str> = top.iter().map(|e| e.id.as_str()).collect();
        // a and c tie at 10; a was inserted first.
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn top_n_truncates() {
        let mut ledger = ExperienceLedger::new();
        ledger.award("a", "A", 1, "r");
        assert_eq!(ledger.top_n(10).len(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut ledger = ExperienceLedger::new();
        ledger.award("a", "A", 10, "r");
        ledger.reset();
        assert!(ledger.is_empty());
        assert_eq!(ledger.total_for("a"), 0);
    }

    #[test]
    fn missing_file_loads_empty() {
        let ledger = ExperienceLedger::load(Path::new("/not/a/real/ledger.json"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn persistence_round_trips_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xp.json");

        {
            // No writer task: writes are synchronous.
            let mut ledger = ExperienceLedger::load(&path);
            ledger.award("zeta", "Z", 10, "first");
            ledger.award("alpha", "A", 10, "second");
            ledger.award("zeta", "Z", 2, "third");
        }

        let restored = ExperienceLedger::load(&path);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.total_for("zeta"), 12);
        assert_eq!(restored.get("zeta").unwrap().contributions.len(), 2);

        // zeta awarded first, so it wins the tie after restore too.
        let top = restored.top_n(2);
        assert_eq!(top[0].id, "zeta");
    }

    #[tokio::test]
    async fn writer_task_flushes_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xp.json");

        let mut ledger = ExperienceLedger::load(&path);
        ledger.start_writer();
        ledger.award("a", "A", 10, "r");
        ledger.award("a", "A", 5, "r");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let restored = ExperienceLedger::load(&path);
        assert_eq!(restored.total_for("a"), 15);
    }

    #[test]
    fn shared_ledger_awards_are_visible_across_clones() {
        let shared = SharedLedger::new(ExperienceLedger::new());
        let other = shared.clone();
        shared.award("s1", "Ada", 10, "insight");
        assert_eq!(other.total_for("s1"), 10);
    }
}
