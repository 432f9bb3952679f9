use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf, StripPrefixError};

/// Ledger keys of inputs already decrypted.
pub type ProcessedSet = HashSet<String>;

/// Key used for an input path in the ledger and in the processed set.
pub fn ledger_key(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// One discovered input file and where its plaintext goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub input_path: PathBuf,
    pub relative_path: PathBuf,
    pub output_path: PathBuf,
}

impl WorkItem {
    pub fn new(
        input_root: &Path,
        output_root: &Path,
        input_path: PathBuf,
    ) -> Result<Self, StripPrefixError> {
        let relative_path = input_path.strip_prefix(input_root)?.to_path_buf();
        let output_path = output_root.join(&relative_path);
        Ok(Self {
            input_path,
            relative_path,
            output_path,
        })
    }

    pub fn ledger_key(&self) -> String {
        ledger_key(&self.input_path)
    }
}

/// Lifecycle of one run. Variants are ordered; a run only moves forward.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub enum Stage {
    Init,
    LoadingCache,
    Running,
    Draining,
    Flushing,
    Closed,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub elapsed_secs: f64,

    pub discovered: usize,
    pub skipped: usize,
    pub decrypted: usize,
    pub failed: usize,
    pub walk_errors: usize,

    /// ledger lines written / dropped by failed writes during this run
    pub ledger_written: usize,
    pub ledger_lost: usize,

    pub final_stage: Stage,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlanReport {
    pub pending: Vec<PathBuf>,
    pub already_processed: usize,
    pub walk_errors: usize,
}
