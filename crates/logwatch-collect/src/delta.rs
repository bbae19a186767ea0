//! Incremental reads of a growing local file.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

/// A watched file and how far into it has been consumed.
///
/// The watermark only moves forward, except for a reset to zero when the
/// file shrinks. It always sits just past a `\n` (or at zero), so a partial
/// trailing line is re-read once its terminator arrives.
#[derive(Debug)]
pub struct WatchTarget {
    path: PathBuf,
    source: String,
    watermark: u64,
}

impl WatchTarget {
    /// Track `path` from offset zero.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            watermark: 0,
        }
    }

    /// Track only what is appended from now on, creating the file if needed.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or inspected.
    pub fn starting_at_end(path: impl Into<PathBuf>, source: impl Into<String>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let watermark = file.metadata()?.len();
        Ok(Self {
            path,
            source: source.into(),
            watermark,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub const fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Read the complete lines appended since the last call.
    ///
    /// A file shorter than the watermark was truncated and is read again
    /// from the start. Blank lines are skipped.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or read. The watermark is
    /// left where it was.
    pub fn read_delta(&mut self) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();

        if len < self.watermark {
            tracing::info!(
                path = %self.path.display(),
                watermark = self.watermark,
                len,
                "file truncated, rereading from start"
            );
            self.watermark = 0;
        }
        if len == self.watermark {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.watermark))?;
        let mut reader = BufReader::new(file.take(len - self.watermark));
        let mut lines = Vec::new();
        let mut consumed = 0u64;
        let mut raw = Vec::new();
        loop {
            raw.clear();
            let n = reader.read_until(b'\n', &mut raw)?;
            if n == 0 || raw.last() != Some(&b'\n') {
                break;
            }
            consumed += n as u64;
            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }

        self.watermark += consumed;
        Ok(lines)
    }
}
