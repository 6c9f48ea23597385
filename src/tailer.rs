//! Log tailer (C1) — rotation-aware incremental reader.
//!
//! Polling (seek to last position, read new bytes) rather than inotify:
//! simple, portable, and tolerant of truncate-and-rewrite rotation, which a
//! filesystem-event watcher would otherwise need to special-case.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Tails a single log file, delivering newly appended complete lines.
pub struct LogTailer {
    path: PathBuf,
    position: u64,
    line_buffer: String,
    file: Option<File>,
}

impl LogTailer {
    /// Opens `path` and positions the cursor at end-of-file — only future
    /// activity is in scope; historical lines would raise false alerts.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;
        let position = file
            .metadata()
            .with_context(|| format!("failed to stat log file: {}", path.display()))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            position,
            line_buffer: String::new(),
            file: Some(file),
        })
    }

    /// Returns zero or more complete, newline-stripped lines appended since
    /// the previous call, in order, plus any `EngineLog`-worthy notices
    /// (rotation detected, transient read failure) produced while polling.
    pub fn poll(&mut self) -> Result<(Vec<String>, Vec<String>)> {
        let mut notices = Vec::new();

        let mut file = match self.file.take() {
            Some(f) => f,
            None => match self.reopen() {
                Ok(f) => f,
                Err(err) => {
                    notices.push(format!(
                        "failed to reopen log file {}: {err:#}, will retry",
                        self.path.display()
                    ));
                    return Ok((Vec::new(), notices));
                }
            },
        };

        let file_len = match file.metadata() {
            Ok(m) => m.len(),
            Err(err) => {
                // Transient read failure: close, reopen, retry on next tick.
                self.file = None;
                notices.push(format!(
                    "failed to stat log file {}: {err}, closing and retrying next tick",
                    self.path.display()
                ));
                return Ok((Vec::new(), notices));
            }
        };

        if file_len < self.position {
            self.position = 0;
            self.line_buffer.clear();
            notices.push(format!(
                "log file {} truncated or rotated, resuming from byte 0",
                self.path.display()
            ));
        }

        if let Err(err) = file.seek(SeekFrom::Start(self.position)) {
            // Transient failure: close, reopen, retry on next tick.
            self.file = None;
            notices.push(format!(
                "failed to seek log file {}: {err}, closing and retrying next tick",
                self.path.display()
            ));
            return Ok((Vec::new(), notices));
        }

        let mut new_bytes = Vec::new();
        let n = match file.read_to_end(&mut new_bytes) {
            Ok(n) => n,
            Err(err) => {
                self.file = None;
                notices.push(format!(
                    "failed to read log file {}: {err}, closing and retrying next tick",
                    self.path.display()
                ));
                return Ok((Vec::new(), notices));
            }
        };
        self.position += n as u64;
        self.file = Some(file);

        if n == 0 {
            return Ok((Vec::new(), notices));
        }

        let text = String::from_utf8_lossy(&new_bytes);
        self.line_buffer.push_str(&text);

        let mut lines = Vec::new();
        match self.line_buffer.rfind('\n') {
            Some(last_newline) => {
                for raw in self.line_buffer[..last_newline].split('\n') {
                    let trimmed = raw.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                }
                self.line_buffer = self.line_buffer[last_newline + 1..].to_string();
            }
            None => {
                // No newline at all yet — retain everything, emit nothing.
            }
        }

        Ok((lines, notices))
    }

    fn reopen(&mut self) -> Result<File> {
        File::open(&self.path)
            .with_context(|| format!("failed to reopen log file: {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    fn append(path: &Path, content: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn opens_at_eof_and_ignores_historical_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, "old line 1\nold line 2\n");

        let mut tailer = LogTailer::open(&path).unwrap();
        let (lines, _) = tailer.poll().unwrap();
        assert!(lines.is_empty());

        append(&path, "new line\n");
        let (lines, _) = tailer.poll().unwrap();
        assert_eq!(lines, vec!["new line"]);
    }

    #[test]
    fn partial_line_is_retained_across_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, "");

        let mut tailer = LogTailer::open(&path).unwrap();
        append(&path, "partial without newline");
        let (lines, _) = tailer.poll().unwrap();
        assert!(lines.is_empty());

        append(&path, " completed\n");
        let (lines, _) = tailer.poll().unwrap();
        assert_eq!(lines, vec!["partial without newline completed"]);
    }

    #[test]
    fn no_duplication_under_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, "");

        let mut tailer = LogTailer::open(&path).unwrap();
        let mut all = Vec::new();

        for i in 0..10 {
            append(&path, &format!("line {i}\n"));
            let (lines, _) = tailer.poll().unwrap();
            all.extend(lines);
        }

        let expected: Vec<String> = (0..10).map(|i| format!("line {i}")).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn rotation_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, "x".repeat(1000).as_str());

        let mut tailer = LogTailer::open(&path).unwrap();
        assert_eq!(tailer.position, 1000);

        write_file(&path, ""); // truncate
        append(&path, "[pipeline_data.name=A]|enter\n");

        let (lines, notices) = tailer.poll().unwrap();
        assert_eq!(lines, vec!["[pipeline_data.name=A]|enter"]);
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn empty_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, "");

        let mut tailer = LogTailer::open(&path).unwrap();
        append(&path, "\n   \nreal line\n\n");
        let (lines, _) = tailer.poll().unwrap();
        assert_eq!(lines, vec!["real line"]);
    }

    #[test]
    fn open_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.log");
        assert!(LogTailer::open(&missing).is_err());
    }

    proptest::proptest! {
        #[test]
        fn no_duplication_across_random_chunking(chunks in proptest::collection::vec("[a-zA-Z0-9 ]{0,20}", 0..20)) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("log.txt");
            write_file(&path, "");

            let mut tailer = LogTailer::open(&path).unwrap();
            let mut expected = Vec::new();
            let mut collected = Vec::new();

            for chunk in &chunks {
                append(&path, &format!("{chunk}\n"));
                if !chunk.trim().is_empty() {
                    expected.push(chunk.trim().to_string());
                }
                let (lines, _) = tailer.poll().unwrap();
                collected.extend(lines);
            }

            prop_assert_eq!(collected, expected);
        }
    }
}
