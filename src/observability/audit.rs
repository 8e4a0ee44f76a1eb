/// Filesystem audit trail
///
/// Every mount decision the sandbox takes is recorded as a `(kind, path)`
/// event. The file-backed logger writes them as JSON lines into the private
/// mnt tmpfs so tools inside the sandbox can show what was hidden.
use crate::config::types::{JailError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// One recorded mount decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsEvent {
    pub kind: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

impl FsEvent {
    pub fn new(kind: &str, path: &str) -> Self {
        Self {
            kind: kind.to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink for mount decisions
pub trait FsLogger {
    fn record(&mut self, kind: &str, path: &str);

    /// Events recorded so far, oldest first
    fn events(&self) -> &[FsEvent];

    /// Persist buffered events. Loggers without a backing file do nothing.
    fn flush_to(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// In-memory logger
#[derive(Debug, Default)]
pub struct MemoryLog {
    events: Vec<FsEvent>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: &str, path: &str) -> bool {
        self.events.iter().any(|e| e.kind == kind && e.path == path)
    }
}

impl FsLogger for MemoryLog {
    fn record(&mut self, kind: &str, path: &str) {
        log::debug!("fslogger: {} {}", kind, path);
        self.events.push(FsEvent::new(kind, path));
    }

    fn events(&self) -> &[FsEvent] {
        &self.events
    }
}

/// Buffered logger written out as JSON lines on flush
#[derive(Debug, Default)]
pub struct FsLogFile {
    events: Vec<FsEvent>,
    flushed: usize,
}

impl FsLogFile {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FsLogger for FsLogFile {
    fn record(&mut self, kind: &str, path: &str) {
        log::debug!("fslogger: {} {}", kind, path);
        self.events.push(FsEvent::new(kind, path));
    }

    fn events(&self) -> &[FsEvent] {
        &self.events
    }

    fn flush_to(&mut self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o644)
            .open(path)
            .map_err(|e| {
                JailError::Config(format!("cannot open fs log {}: {}", path.display(), e))
            })?;

        for event in &self.events[self.flushed..] {
            let line = serde_json::to_string(event).map_err(|e| {
                JailError::Config(format!("cannot serialize fs event: {}", e))
            })?;
            writeln!(file, "{}", line)?;
        }
        self.flushed = self.events.len();
        Ok(())
    }
}
