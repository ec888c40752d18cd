use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{error::SnapshotError, registry::DEFAULT_WRITE_TIMEOUT};

pub const DEFAULT_STATE_DIR: &str = "enroll.state";
pub const SNAPSHOT_FILE: &str = "catalog.json";

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub state_dir: PathBuf,
    /// How long a seat-count update waits for the registry before reporting contention.
    pub count_write_timeout: Duration,
}

impl LedgerConfig {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            count_write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join(SNAPSHOT_FILE)
    }

    pub fn ensure_dirs(&self) -> Result<(), SnapshotError> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir)?;
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_STATE_DIR))
    }
}
