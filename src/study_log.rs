use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::{Entry, Result};

/// Initial review schedule written for every new study item.
pub const INITIAL_SCHEDULE: &str = "00;0250;0500";

/// Study log location relative to the home directory.
pub const STUDY_LOG_SUFFIX: &str = ".local/share/ccq/zh";

/// Append-only log of entries selected for later review.
///
/// Each line has the form `<unix seconds>|<schedule>|<key>|<definition>`.
#[derive(Debug, Clone)]
pub struct StudyLog {
    path: PathBuf,
}

impl StudyLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StudyLog { path: path.into() }
    }

    /// Log under `$HOME`, or `None` when `HOME` is unset or empty.
    pub fn in_home() -> Option<Self> {
        let home = std::env::var_os("HOME").filter(|h| !h.is_empty())?;
        Some(Self::new(Path::new(&home).join(STUDY_LOG_SUFFIX)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry`, looked up under `key`, with the current time.
    pub fn append(&self, key: &str, entry: &Entry) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.append_at(now, key, entry)
    }

    /// Appends `entry` stamped with `timestamp` (seconds since the epoch).
    pub fn append_at(&self, timestamp: u64, key: &str, entry: &Entry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            create_dir_all(parent)?;
        }
        let line = format!("{timestamp}|{INITIAL_SCHEDULE}|{key}|{}\n", entry.def);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        debug!("appended {key:?} to {}", self.path.display());
        Ok(())
    }
}
