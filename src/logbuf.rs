//! Append-only progress/log buffer owned by the master (spec §4.8).
//!
//! Writes are cheap (just a formatted append); committing to disk is
//! throttled to once per 3 seconds unless a caller forces it, e.g. at
//! shutdown or on a fatal error.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

const COMMIT_INTERVAL: Duration = Duration::from_secs(3);

/// In-memory append-only log, periodically flushed to a named file.
pub struct LogBuffer {
    path: Option<PathBuf>,
    lines: Vec<String>,
    committed_up_to: usize,
    last_commit: Option<Instant>,
}

impl LogBuffer {
    /// A buffer with no backing file; `commit` becomes a no-op until
    /// `set_path` is called. Useful for workers other than the master, or
    /// for tests that only want in-memory inspection.
    pub fn new() -> Self {
        Self {
            path: None,
            lines: Vec::new(),
            committed_up_to: 0,
            last_commit: None,
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// Append a formatted line. Does not touch disk.
    pub fn append(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(target: "progress", "{line}");
        self.lines.push(line);
    }

    /// Persist everything appended since the last commit, subject to the
    /// 3-second throttle unless `force` is set.
    pub fn commit(&mut self, force: bool) -> CoreResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if self.committed_up_to == self.lines.len() {
            return Ok(());
        }
        if !force {
            if let Some(last) = self.last_commit {
                if last.elapsed() < COMMIT_INTERVAL {
                    return Ok(());
                }
            }
        }
        self.flush_to(path)?;
        self.committed_up_to = self.lines.len();
        self.last_commit = Some(Instant::now());
        Ok(())
    }

    fn flush_to(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CoreError::Resource(format!("create log dir {}: {e}", parent.display()))
                })?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| CoreError::Resource(format!("open log {}: {e}", path.display())))?;
        for line in &self.lines[self.committed_up_to..] {
            writeln!(file, "{line}")
                .map_err(|e| CoreError::Resource(format!("write log {}: {e}", path.display())))?;
        }
        Ok(())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttles_commit_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let mut buf = LogBuffer::with_path(&path);
        buf.append("first");
        buf.commit(false).unwrap();
        // First commit always happens because `last_commit` starts as None.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n");

        buf.append("second");
        buf.commit(false).unwrap(); // throttled, too soon
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n");

        buf.commit(true).unwrap(); // forced
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn no_path_is_noop() {
        let mut buf = LogBuffer::new();
        buf.append("line");
        buf.commit(true).unwrap();
    }
}
