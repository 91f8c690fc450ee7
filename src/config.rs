//! Pipeline configuration and preconditions.
//!
//! Validation runs before any file is touched so precondition failures
//! (missing credential, unreadable corpus root) abort without mutating
//! ledger or run state.

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const LEDGER_FILE: &str = "ledger.json";
pub const RUN_STATE_FILE: &str = "run_state.json";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub corpus_root: PathBuf,
    /// Holds the ledger and run-state files. Defaults to a dot folder
    /// under the corpus root, which the locator skips by construction.
    pub state_dir: PathBuf,
    /// Prefixes relative to the corpus root that are never touched.
    pub excluded_prefixes: Vec<PathBuf>,
    pub model: String,
    pub endpoint: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    /// Re-process unchanged documents after this many days; 0 disables.
    pub refresh_days: u64,
    /// Minimum hours between runs.
    pub cadence_hours: u64,
    pub force: bool,
    pub dry_run: bool,
}

impl PipelineConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE)
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.state_dir.join(RUN_STATE_FILE)
    }

    pub fn refresh_window_ms(&self) -> Option<u64> {
        match self.refresh_days {
            0 => None,
            days => Some(days * 24 * 60 * 60 * 1_000),
        }
    }

    pub fn cadence_ms(&self) -> u64 {
        self.cadence_hours * 60 * 60 * 1_000
    }

    pub fn validate(&self) -> Result<()> {
        if !self.corpus_root.is_dir() {
            return Err(anyhow!(
                "corpus root {} is not a directory",
                self.corpus_root.display()
            ));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(anyhow!("endpoint must be non-empty"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Read the pre-shared credential from the environment. Absence is a
/// fatal precondition failure, reported before anything runs.
pub fn api_key_from_env() -> Result<String> {
    env::var(API_KEY_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("{API_KEY_ENV} is not set; refusing to run"))
}
