//! Persisted change-detection ledger and run state.
//!
//! The ledger maps each document path to the fingerprint of the content
//! that was on disk after its last successful processing. Its sole job is
//! to keep unchanged documents from being re-sent to the remote service.
//! Both files tolerate being missing or corrupt: the pipeline must fail
//! safe by reprocessing, never by silently skipping.

use crate::util::sha256_hex;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// What the last attempt at a document produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Transformed (or confirmed unchanged) and recorded.
    Clean,
    /// Retries exhausted; original content left in place. Retried next run.
    Failed,
}

/// Fingerprint of a document at its last processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// SHA-256 of the content currently on disk for this path.
    pub hash: String,
    pub last_processed_epoch_ms: u64,
    /// Hash of the content before transformation, kept for auditing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_hash: Option<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub records: BTreeMap<String, FingerprintRecord>,
}

impl Ledger {
    /// Load the ledger, falling back to empty when missing or unreadable.
    pub fn load(path: &Path) -> Ledger {
        if !path.is_file() {
            return Ledger::default();
        }
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ledger unreadable, starting fresh");
                return Ledger::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(ledger) => ledger,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ledger corrupt, starting fresh");
                Ledger::default()
            }
        }
    }

    /// Persist the ledger as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serialize ledger")?;
        fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Decide whether `content` at `key` needs another remote call.
    ///
    /// True when the path has never been processed, when its content
    /// changed since the recorded fingerprint, when the last attempt
    /// failed, or when the record aged past the refresh window.
    pub fn should_process(
        &self,
        key: &str,
        content: &[u8],
        now_ms: u64,
        refresh_window_ms: Option<u64>,
    ) -> bool {
        let Some(record) = self.records.get(key) else {
            return true;
        };
        if record.outcome == Outcome::Failed {
            return true;
        }
        if record.hash != sha256_hex(content) {
            return true;
        }
        match refresh_window_ms {
            Some(window) => now_ms.saturating_sub(record.last_processed_epoch_ms) >= window,
            None => false,
        }
    }

    /// Record `content` as the processed on-disk state for `key`.
    ///
    /// Call only after the document has been written (or confirmed
    /// unchanged), so the stored hash always matches the bytes on disk.
    pub fn record_processed(
        &mut self,
        key: &str,
        content: &[u8],
        original_hash: Option<String>,
        now_ms: u64,
    ) {
        self.records.insert(
            key.to_string(),
            FingerprintRecord {
                hash: sha256_hex(content),
                last_processed_epoch_ms: now_ms,
                original_hash,
                outcome: Outcome::Clean,
            },
        );
    }

    /// Record an exhausted-retries attempt; the document stays eligible.
    pub fn record_failed(&mut self, key: &str, content: &[u8], now_ms: u64) {
        self.records.insert(
            key.to_string(),
            FingerprintRecord {
                hash: sha256_hex(content),
                last_processed_epoch_ms: now_ms,
                original_hash: None,
                outcome: Outcome::Failed,
            },
        );
    }

    /// Drop records for documents no longer present in the corpus.
    pub fn prune(&mut self, existing: &BTreeSet<String>) {
        self.records.retain(|key, _| existing.contains(key));
    }

    pub fn failed_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.outcome == Outcome::Failed)
            .count()
    }
}

/// Stable ledger key for a relative path: components joined with `/`.
pub fn ledger_key(rel: &Path) -> String {
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Timestamp of the last completed run. Monotonically non-decreasing.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub last_run_epoch_ms: u64,
}

impl RunState {
    /// Load the run state. An unreadable state file fails safe: the
    /// default (never ran) makes the next due check pass.
    pub fn load(path: &Path) -> RunState {
        if !path.is_file() {
            return RunState::default();
        }
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "run state unreadable, running anyway");
                return RunState::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "run state corrupt, running anyway");
                RunState::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serialize run state")?;
        fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn is_due(&self, now_ms: u64, cadence_ms: u64) -> bool {
        self.last_run_epoch_ms == 0 || now_ms.saturating_sub(self.last_run_epoch_ms) >= cadence_ms
    }

    pub fn advance(&mut self, now_ms: u64) {
        self.last_run_epoch_ms = self.last_run_epoch_ms.max(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    #[test]
    fn unknown_path_must_process() {
        let ledger = Ledger::default();
        assert!(ledger.should_process("a.md", b"text", 0, None));
    }

    #[test]
    fn unchanged_content_is_gated() {
        let mut ledger = Ledger::default();
        ledger.record_processed("a.md", b"text", None, 1_000);
        assert!(!ledger.should_process("a.md", b"text", 2_000, Some(7 * DAY_MS)));
        assert!(ledger.should_process("a.md", b"edited", 2_000, Some(7 * DAY_MS)));
    }

    #[test]
    fn refresh_window_expires_clean_records() {
        let mut ledger = Ledger::default();
        ledger.record_processed("a.md", b"text", None, 1_000);
        let later = 1_000 + 7 * DAY_MS;
        assert!(ledger.should_process("a.md", b"text", later, Some(7 * DAY_MS)));
        assert!(!ledger.should_process("a.md", b"text", later - 1, Some(7 * DAY_MS)));
        assert!(!ledger.should_process("a.md", b"text", later, None));
    }

    #[test]
    fn failed_records_stay_eligible() {
        let mut ledger = Ledger::default();
        ledger.record_failed("a.md", b"text", 1_000);
        assert!(ledger.should_process("a.md", b"text", 1_001, Some(7 * DAY_MS)));
        assert_eq!(ledger.failed_count(), 1);
    }

    #[test]
    fn prune_drops_missing_paths() {
        let mut ledger = Ledger::default();
        ledger.record_processed("a.md", b"a", None, 0);
        ledger.record_processed("gone.md", b"b", None, 0);
        let existing: BTreeSet<String> = ["a.md".to_string()].into_iter().collect();
        ledger.prune(&existing);
        assert!(ledger.records.contains_key("a.md"));
        assert!(!ledger.records.contains_key("gone.md"));
    }

    #[test]
    fn ledger_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/ledger.json");
        let mut ledger = Ledger::default();
        ledger.record_processed("notes/a.md", b"text", Some("abc".to_string()), 42);
        ledger.record_failed("notes/b.md", b"other", 43);
        ledger.save(&path).unwrap();

        let loaded = Ledger::load(&path);
        assert_eq!(loaded.records.len(), 2);
        let record = &loaded.records["notes/a.md"];
        assert_eq!(record.hash, crate::util::sha256_hex(b"text"));
        assert_eq!(record.original_hash.as_deref(), Some("abc"));
        assert_eq!(record.last_processed_epoch_ms, 42);
        assert_eq!(loaded.records["notes/b.md"].outcome, Outcome::Failed);
    }

    #[test]
    fn corrupt_ledger_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(Ledger::load(&path).records.is_empty());
    }

    #[test]
    fn ledger_key_uses_forward_slashes() {
        let rel: PathBuf = ["notes", "deep", "a.md"].iter().collect();
        assert_eq!(ledger_key(&rel), "notes/deep/a.md");
    }

    #[test]
    fn run_state_due_and_monotonic() {
        let mut state = RunState::default();
        assert!(state.is_due(0, DAY_MS));
        state.advance(10_000);
        assert!(!state.is_due(10_000 + DAY_MS - 1, DAY_MS));
        assert!(state.is_due(10_000 + DAY_MS, DAY_MS));
        state.advance(5_000);
        assert_eq!(state.last_run_epoch_ms, 10_000);
    }

    #[test]
    fn corrupt_run_state_fails_safe() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run_state.json");
        fs::write(&path, b"??").unwrap();
        let state = RunState::load(&path);
        assert!(state.is_due(crate::util::epoch_ms(), DAY_MS));
    }
}
