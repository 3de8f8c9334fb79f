use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Selects the payload shape and how a batch is weighed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Header-only verification, charged per block
    Light,
    /// Full re-execution, charged per transaction input and output
    Full,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Light => write!(f, "light"),
            Mode::Full => write!(f, "full"),
        }
    }
}

/// One unit of work: a generated batch staged on disk, waiting for the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub height: u64,
    pub step: u64,
    pub mode: Mode,
    pub weight: u64,
    pub staging_file: PathBuf,
    pub execute_scripts: bool,
}

impl Job {
    pub fn new(
        height: u64,
        step: u64,
        mode: Mode,
        weight: u64,
        staging_file: PathBuf,
        execute_scripts: bool,
    ) -> Self {
        Self {
            height,
            step,
            mode,
            weight,
            staging_file,
            execute_scripts,
        }
    }

    /// Staging file path for a `(mode, height, step)` triple under `dir`.
    pub fn staging_path(dir: &Path, mode: Mode, height: u64, step: u64) -> PathBuf {
        dir.join(format!("{}_{}_{}.json", mode, height, step))
    }

    /// Sibling of the staging file holding the formatted tool arguments.
    pub fn arguments_file(&self) -> PathBuf {
        let stem = self
            .staging_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.staging_file
            .with_file_name(format!("{}-arguments.json", stem))
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Job(height='{}', step={}, weight='{}')",
            self.height, self.step, self.weight
        )
    }
}
