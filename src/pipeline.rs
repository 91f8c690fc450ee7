//! Run orchestration: due check, per-file loop, state updates.
//!
//! Documents are processed strictly one at a time; the sequential loop is
//! the rate limiter against the remote endpoint. One bad document must
//! not block the rest of the corpus, but a locator failure aborts the
//! whole run before any state is touched.

use crate::config::PipelineConfig;
use crate::gemini::{transform_with_retry, RetryPolicy, Sleeper, TransformOutcome, Transformer};
use crate::ledger::{ledger_key, Ledger, RunState};
use crate::locate::locate_documents;
use crate::util::{epoch_ms, sha256_hex};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Counts and file lists for one invocation.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// False when the cadence gate decided the run was not due.
    pub ran: bool,
    pub candidates: usize,
    /// Rewritten in place with transformed content.
    pub updated: Vec<String>,
    /// Transformation returned identical bytes; recorded, not written.
    pub unchanged: usize,
    /// Gated by the ledger; transformer never invoked.
    pub skipped_unmodified: usize,
    /// Empty or whitespace-only; nothing to reformat.
    pub skipped_empty: usize,
    /// Per-file I/O errors or exhausted retries; retried next run.
    pub failed: Vec<String>,
}

enum FileOutcome {
    Updated,
    Unchanged,
    SkippedUnmodified,
    SkippedEmpty,
    Failed,
}

/// Execute one scheduled invocation end to end.
///
/// Returns `Ok` with `ran == false` when the cadence has not elapsed.
/// Hard errors before the per-file loop (unreadable corpus) propagate
/// without advancing ledger or run state, so the next trigger retries
/// the whole batch.
pub fn run(
    config: &PipelineConfig,
    transformer: &dyn Transformer,
    sleeper: &dyn Sleeper,
) -> Result<RunSummary> {
    let now_ms = epoch_ms();
    let mut run_state = RunState::load(&config.run_state_path());
    if !config.force && !run_state.is_due(now_ms, config.cadence_ms()) {
        tracing::info!(
            last_run_epoch_ms = run_state.last_run_epoch_ms,
            cadence_hours = config.cadence_hours,
            "run not due, nothing to do"
        );
        return Ok(RunSummary::default());
    }

    let candidates = locate_documents(&config.corpus_root, &config.excluded_prefixes)
        .context("locate corpus documents")?;
    let mut ledger = Ledger::load(&config.ledger_path());
    let policy = RetryPolicy {
        max_attempts: config.max_attempts,
        base_delay_ms: config.base_delay_ms,
        max_jitter_ms: config.max_jitter_ms,
    };

    let mut summary = RunSummary {
        ran: true,
        candidates: candidates.len(),
        ..RunSummary::default()
    };
    tracing::info!(candidates = candidates.len(), "corpus scan complete");

    for rel in &candidates {
        let key = ledger_key(rel);
        match process_document(config, &mut ledger, &policy, transformer, sleeper, rel) {
            Ok(FileOutcome::Updated) => summary.updated.push(key),
            Ok(FileOutcome::Unchanged) => summary.unchanged += 1,
            Ok(FileOutcome::SkippedUnmodified) => summary.skipped_unmodified += 1,
            Ok(FileOutcome::SkippedEmpty) => summary.skipped_empty += 1,
            Ok(FileOutcome::Failed) => summary.failed.push(key),
            Err(err) => {
                // Local I/O trouble on one document; the batch goes on and
                // the ledger stays untouched so this path retries next run.
                tracing::warn!(path = %key, error = %err, "document skipped after error");
                summary.failed.push(key);
            }
        }
    }

    let existing: BTreeSet<String> = candidates.iter().map(|rel| ledger_key(rel)).collect();
    ledger.prune(&existing);

    if !config.dry_run {
        ledger
            .save(&config.ledger_path())
            .context("persist ledger")?;
        run_state.advance(epoch_ms());
        run_state
            .save(&config.run_state_path())
            .context("persist run state")?;
    }

    tracing::info!(
        updated = summary.updated.len(),
        unchanged = summary.unchanged,
        skipped = summary.skipped_unmodified,
        failed = summary.failed.len(),
        dry_run = config.dry_run,
        "run complete"
    );
    Ok(summary)
}

fn process_document(
    config: &PipelineConfig,
    ledger: &mut Ledger,
    policy: &RetryPolicy,
    transformer: &dyn Transformer,
    sleeper: &dyn Sleeper,
    rel: &Path,
) -> Result<FileOutcome> {
    let path = config.corpus_root.join(rel);
    let key = ledger_key(rel);

    let original = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    if original.trim().is_empty() {
        tracing::debug!(path = %key, "skipping empty document");
        return Ok(FileOutcome::SkippedEmpty);
    }

    let now_ms = epoch_ms();
    if !ledger.should_process(&key, original.as_bytes(), now_ms, config.refresh_window_ms()) {
        tracing::debug!(path = %key, "fingerprint unchanged, skipping");
        return Ok(FileOutcome::SkippedUnmodified);
    }

    let original_hash = sha256_hex(original.as_bytes());
    match transform_with_retry(transformer, policy, sleeper, &original) {
        TransformOutcome::Transformed(text) => {
            if text == original {
                // No write: identical output must not churn mtimes, but
                // the record keeps this content from being resent.
                ledger.record_processed(&key, original.as_bytes(), Some(original_hash), now_ms);
                tracing::debug!(path = %key, "transformation returned identical content");
                Ok(FileOutcome::Unchanged)
            } else {
                if !config.dry_run {
                    fs::write(&path, text.as_bytes())
                        .with_context(|| format!("write {}", path.display()))?;
                }
                ledger.record_processed(&key, text.as_bytes(), Some(original_hash), now_ms);
                tracing::info!(path = %key, "document rewritten");
                Ok(FileOutcome::Updated)
            }
        }
        TransformOutcome::GaveUp => {
            // Original bytes stay on disk untouched. The failed record is
            // observability only; the document is retried next run.
            ledger.record_failed(&key, original.as_bytes(), now_ms);
            tracing::warn!(path = %key, "retries exhausted, original content kept");
            Ok(FileOutcome::Failed)
        }
    }
}
