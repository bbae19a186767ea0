//! JSON-lines persistence of delivered log events, one file per source.
//!
//! Files rotate by size: `<source>.log` becomes `<source>.log.1`, older
//! copies shift up, and at most `max_files` backups are kept.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use logwatch_core::{LogEvent, StreamEvent, Subscriber};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Rotate once a file reaches this size (100 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;
/// Rotated copies kept per source.
pub const DEFAULT_MAX_FILES: usize = 5;

const EXTENSION: &str = "log";
const TAIL_BLOCK: u64 = 64 * 1024;

/// Archive location and rotation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub dir: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

const fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

const fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}

impl ArchiveConfig {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

/// Per-source append-only archive.
#[derive(Debug)]
pub struct LogArchive {
    config: ArchiveConfig,
    // One lock per source file so appends and rotation never interleave.
    files: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LogArchive {
    /// Open (and create) the archive directory.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open(config: ArchiveConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// File holding `source`'s events.
    #[must_use]
    pub fn path_for(&self, source: &str) -> PathBuf {
        self.config
            .dir
            .join(format!("{}.{EXTENSION}", sanitize(source)))
    }

    fn lock_for(&self, source: &str) -> Arc<Mutex<()>> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.entry(sanitize(source)).or_default().clone()
    }

    /// Append one event, rotating first if the file is full.
    ///
    /// # Errors
    /// Returns error on filesystem or encoding failure.
    pub fn append(&self, event: &LogEvent) -> io::Result<()> {
        let lock = self.lock_for(&event.source);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.path_for(&event.source);
        if rotate_if_needed(&path, self.config.max_bytes, self.config.max_files)? {
            tracing::info!(path = %path.display(), "archive file rotated");
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)
    }

    /// The last `limit` events of one source, oldest first.
    ///
    /// Falls back to the newest rotated copy when the live file holds fewer.
    ///
    /// # Errors
    /// Returns error if a file exists but cannot be read.
    pub fn recent(&self, source: &str, limit: usize) -> io::Result<Vec<LogEvent>> {
        let lock = self.lock_for(source);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.recent_at(&self.path_for(source), limit)
    }

    fn recent_at(&self, path: &Path, limit: usize) -> io::Result<Vec<LogEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut events = parse_lines(tail_lines(path, limit)?);
        if events.len() < limit {
            let older = numbered_path(path, 1);
            let mut backfill = parse_lines(tail_lines(&older, limit - events.len())?);
            backfill.append(&mut events);
            events = backfill;
        }
        Ok(events)
    }

    /// The last `limit` events of every archived source, merged by time.
    ///
    /// # Errors
    /// Returns error if the archive directory cannot be listed.
    pub fn history(&self, limit: usize) -> io::Result<Vec<LogEvent>> {
        let mut merged = Vec::new();
        for entry in fs::read_dir(&self.config.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match self.recent_at(&path, limit) {
                Ok(mut events) => merged.append(&mut events),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable archive: {e}"),
            }
        }
        // Stable, so each source keeps its read order on equal timestamps.
        merged.sort_by_key(|event| event.timestamp);
        Ok(merged)
    }
}

/// Persist every log event delivered through `subscriber` until the hub closes.
pub fn spawn_archiver(archive: Arc<LogArchive>, mut subscriber: Subscriber) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(event) = subscriber.recv().await {
            let StreamEvent::Log(event) = event else {
                continue;
            };
            let archive = archive.clone();
            match tokio::task::spawn_blocking(move || archive.append(&event)).await {
                Ok(Ok(())) => written += 1,
                Ok(Err(e)) => tracing::warn!("archive append failed: {e}"),
                Err(e) => tracing::error!("archive task failed: {e}"),
            }
        }
        tracing::info!(written, "archiver finished");
        written
    })
}

fn sanitize(source: &str) -> String {
    let name: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() { "unnamed".to_string() } else { name }
}

fn parse_lines(lines: Vec<String>) -> Vec<LogEvent> {
    lines
        .iter()
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("skipping malformed archive line: {e}");
                None
            }
        })
        .collect()
}

/// Read the last `limit` non-empty lines of `path` by scanning backwards.
fn tail_lines(path: &Path, limit: usize) -> io::Result<Vec<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();

    let mut start = len;
    let mut tail = Vec::new();
    while start > 0 && tail.iter().filter(|&&b| b == b'\n').count() <= limit {
        let step = TAIL_BLOCK.min(start);
        start -= step;
        file.seek(SeekFrom::Start(start))?;
        let mut block = Vec::new();
        (&mut file).take(step).read_to_end(&mut block)?;
        block.append(&mut tail);
        tail = block;
    }

    let text = String::from_utf8_lossy(&tail);
    let mut lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect();
    // The first line may be cut mid-way when the scan stopped early.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(limit);
    Ok(lines.split_off(skip))
}

fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if size < max_bytes {
        return Ok(false);
    }
    if max_files == 0 {
        fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = numbered_path(path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let from = numbered_path(path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(path, n + 1))?;
        }
    }
    fs::rename(path, numbered_path(path, 1))?;
    Ok(true)
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use logwatch_core::EventHub;

    use super::*;

    fn event(secs: i64, source: &str, content: &str) -> LogEvent {
        LogEvent::at(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(), source, content)
    }

    #[test]
    fn test_recent_returns_last_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::open(ArchiveConfig::new(dir.path())).unwrap();
        for i in 0..10 {
            archive.append(&event(i, "suricata", &format!("alert {i}"))).unwrap();
        }

        let recent = archive.recent("suricata", 3).unwrap();
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["alert 7", "alert 8", "alert 9"]);
        assert!(archive.recent("unknown", 3).unwrap().is_empty());
    }

    #[test]
    fn test_history_merges_sources_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::open(ArchiveConfig::new(dir.path())).unwrap();
        archive.append(&event(1, "suricata", "s1")).unwrap();
        archive.append(&event(4, "suricata", "s4")).unwrap();
        archive.append(&event(2, "dtrace", "d2")).unwrap();
        archive.append(&event(3, "dtrace", "d3")).unwrap();

        let merged = archive.history(50).unwrap();
        let contents: Vec<_> = merged.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["s1", "d2", "d3", "s4"]);
    }

    #[test]
    fn test_rotation_keeps_recent_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArchiveConfig::new(dir.path());
        config.max_bytes = 200;
        config.max_files = 2;
        let archive = LogArchive::open(config).unwrap();

        for i in 0..20 {
            archive.append(&event(i, "s", &format!("line {i}"))).unwrap();
        }
        let live = archive.path_for("s");
        assert!(numbered_path(&live, 1).exists());
        assert!(numbered_path(&live, 2).exists());
        assert!(!numbered_path(&live, 3).exists());

        let recent = archive.recent("s", 4).unwrap();
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["line 16", "line 17", "line 18", "line 19"]);
    }

    #[test]
    fn test_source_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let archive = LogArchive::open(ArchiveConfig::new(dir.path())).unwrap();
        let path = archive.path_for("../etc/passwd");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.file_name().unwrap(), "___etc_passwd.log");
    }

    #[test]
    fn test_tail_lines_spans_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let body: String = (0..20_000).map(|i| format!("row {i}\n")).collect();
        fs::write(&path, body).unwrap();

        let lines = tail_lines(&path, 2).unwrap();
        assert_eq!(lines, ["row 19998", "row 19999"]);
        assert_eq!(tail_lines(&path, 20_000).unwrap().len(), 20_000);
    }

    #[tokio::test]
    async fn test_archiver_persists_until_hub_closes() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(LogArchive::open(ArchiveConfig::new(dir.path())).unwrap());
        let hub = EventHub::new(16);
        let task = spawn_archiver(archive.clone(), hub.subscribe().unwrap());

        hub.publish(event(1, "a", "one").into());
        hub.publish(event(2, "a", "two").into());
        hub.close();

        assert_eq!(task.await.unwrap(), 2);
        assert_eq!(archive.recent("a", 10).unwrap().len(), 2);
    }
}
