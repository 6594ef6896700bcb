//! Polling file watcher.
//!
//! Each registered file keeps a [`WatchState`] with the number of bytes
//! already consumed. A poll reads the bytes appended since then and emits
//! only complete lines; an unterminated tail is left for the next poll.
//!
//! # Rotation detection
//! - identity change (device/inode on unix, e.g. logrotate `create`)
//! - size below the consumed offset (`copytruncate`, `> file`)
//! - head fingerprint change (rewrite that lands on the same size)
//!
//! Any of these resets the offset to 0 and the file is read as a new file.

use crate::config::types::{ReadStart, WatchConfig};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of leading bytes covered by the head fingerprint.
const FINGERPRINT_BYTES: u64 = 1024;

const DEFAULT_DIRECTORY_PATTERN: &str = "*.log";

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// One complete line read from a watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub path: PathBuf,
    pub line: String,
    /// Byte offset of the first byte of the line.
    pub offset: u64,
}

/// Token that changes when a path starts pointing at a different file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    device: u64,
    inode: u64,
}

#[cfg(unix)]
fn get_identity(metadata: &Metadata) -> FileIdentity {
    use std::os::unix::fs::MetadataExt;
    FileIdentity {
        device: metadata.dev(),
        inode: metadata.ino(),
    }
}

#[cfg(not(unix))]
fn get_identity(metadata: &Metadata) -> FileIdentity {
    // No inode here; creation time changes when a file is replaced.
    let created = metadata
        .created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    FileIdentity {
        device: 0,
        inode: created,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    digest: [u8; 32],
}

/// Per-file read bookkeeping. `offset <= size_at_last_poll` always holds.
#[derive(Debug, Clone)]
pub struct WatchState {
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub size_at_last_poll: u64,
    pub offset: u64,
    fingerprint: Option<Fingerprint>,
    missing_since: Option<Instant>,
}

impl WatchState {
    fn new(path: &Path, identity: FileIdentity) -> Self {
        Self {
            path: path.to_path_buf(),
            identity,
            size_at_last_poll: 0,
            offset: 0,
            fingerprint: None,
            missing_since: None,
        }
    }

    fn reset(&mut self, identity: FileIdentity) {
        self.identity = identity;
        self.offset = 0;
        self.size_at_last_poll = 0;
        self.fingerprint = None;
    }
}

#[derive(Debug, Clone)]
enum TargetKind {
    File(PathBuf),
    Directory {
        pattern: String,
        known: BTreeSet<PathBuf>,
    },
}

#[derive(Debug, Clone)]
struct WatchTarget {
    kind: TargetKind,
    poll_interval: Option<Duration>,
    last_polled: Option<Instant>,
}

impl WatchTarget {
    fn is_due(&self, now: Instant, default_interval: Duration) -> bool {
        let interval = self.poll_interval.unwrap_or(default_interval);
        match self.last_polled {
            None => true,
            Some(last) => now.duration_since(last) >= interval,
        }
    }
}

/// Outcome of polling a single path.
enum PathStatus {
    Present,
    Missing,
    Discarded,
}

pub struct FileWatcher {
    config: WatchConfig,
    targets: Vec<WatchTarget>,
    states: HashMap<PathBuf, WatchState>,
}

impl FileWatcher {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            targets: Vec::new(),
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Register a single file. `start` applies only if the file exists now;
    /// a file that shows up later is always read from the beginning.
    pub fn watch_file(
        &mut self,
        path: impl Into<PathBuf>,
        poll_interval: Option<Duration>,
        start: ReadStart,
    ) {
        let path = path.into();
        info!(path = %path.display(), "Watching file");

        if start == ReadStart::End {
            self.seed_at_end(&path);
        }

        self.targets.push(WatchTarget {
            kind: TargetKind::File(path),
            poll_interval,
            last_polled: None,
        });
    }

    /// Register every file under `dir` matching `pattern` (default `*.log`).
    /// The directory is re-scanned each time it is polled.
    pub fn watch_directory(
        &mut self,
        dir: impl AsRef<Path>,
        pattern: Option<&str>,
        poll_interval: Option<Duration>,
        start: ReadStart,
    ) -> Result<(), WatchError> {
        let full_pattern = dir
            .as_ref()
            .join(pattern.unwrap_or(DEFAULT_DIRECTORY_PATTERN))
            .to_string_lossy()
            .into_owned();

        // Validate up front so a bad pattern fails at registration
        glob::Pattern::new(&full_pattern).map_err(|source| WatchError::Glob {
            pattern: full_pattern.clone(),
            source,
        })?;

        info!(pattern = %full_pattern, "Watching directory");

        let known: BTreeSet<PathBuf> = discover(&full_pattern).into_iter().collect();
        if start == ReadStart::End {
            for path in &known {
                self.seed_at_end(path);
            }
        }

        self.targets.push(WatchTarget {
            kind: TargetKind::Directory {
                pattern: full_pattern,
                known,
            },
            poll_interval,
            last_polled: None,
        });
        Ok(())
    }

    /// Smallest interval across all targets; the natural tick for `poll`.
    pub fn tick_interval(&self) -> Duration {
        self.targets
            .iter()
            .filter_map(|t| t.poll_interval)
            .fold(self.config.poll_interval, Duration::min)
    }

    /// Paths that currently have read state.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.states.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn state(&self, path: &Path) -> Option<&WatchState> {
        self.states.get(path)
    }

    /// Visit every due target and return new complete lines, in file order
    /// per path. Errors on individual files are logged and skipped.
    pub fn poll(&mut self) -> Vec<RawLine> {
        let now = Instant::now();
        let default_interval = self.config.poll_interval;
        let mut lines = Vec::new();

        // Targets are taken out so path polling can borrow `self` mutably
        let mut targets = std::mem::take(&mut self.targets);
        for target in targets.iter_mut() {
            if !target.is_due(now, default_interval) {
                continue;
            }
            target.last_polled = Some(now);

            match &mut target.kind {
                TargetKind::File(path) => {
                    self.poll_path(path, now, &mut lines);
                }
                TargetKind::Directory { pattern, known } => {
                    known.extend(discover(pattern));
                    let mut discarded = Vec::new();
                    for path in known.iter() {
                        if let PathStatus::Discarded = self.poll_path(path, now, &mut lines) {
                            discarded.push(path.clone());
                        }
                    }
                    for path in discarded {
                        known.remove(&path);
                    }
                }
            }
        }
        self.targets = targets;

        lines
    }

    fn seed_at_end(&mut self, path: &Path) {
        let Ok(metadata) = fs::metadata(path) else {
            return;
        };
        let Ok(mut file) = File::open(path) else {
            return;
        };
        let mut state = WatchState::new(path, get_identity(&metadata));
        // Start after the last complete line; a half-written tail is read
        // once it is finished.
        state.offset = match end_of_last_line(&mut file, metadata.len()) {
            Ok(offset) => offset,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot seek to end, reading from start");
                0
            }
        };
        state.size_at_last_poll = metadata.len();
        if self.config.fingerprint {
            let offset = state.offset;
            state.fingerprint = compute_fingerprint(&mut file, offset).ok();
        }
        self.states.insert(path.to_path_buf(), state);
    }

    fn poll_path(&mut self, path: &Path, now: Instant, out: &mut Vec<RawLine>) -> PathStatus {
        let metadata = match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                debug!(path = %path.display(), "Not a regular file, skipping");
                return self.mark_missing(path, now);
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "File unavailable, skipping this poll");
                return self.mark_missing(path, now);
            }
        };

        let identity = get_identity(&metadata);
        let size = metadata.len();

        let state = self
            .states
            .entry(path.to_path_buf())
            .or_insert_with(|| WatchState::new(path, identity));
        state.missing_since = None;

        // Opened once per poll; the handle pins this file even if the path is
        // replaced while we read.
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot open file, skipping this poll");
                return PathStatus::Present;
            }
        };

        if state.identity != identity {
            info!(path = %path.display(), "File replaced, reading from start");
            state.reset(identity);
        } else if size < state.offset {
            info!(
                path = %path.display(),
                size,
                offset = state.offset,
                "File truncated, reading from start"
            );
            state.reset(identity);
        } else if self.config.fingerprint {
            if let Some(expected) = &state.fingerprint {
                match compute_fingerprint(&mut file, expected.len) {
                    Ok(actual) if actual != *expected => {
                        info!(path = %path.display(), "File head changed, reading from start");
                        state.reset(identity);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Fingerprint read failed, skipping this poll");
                        return PathStatus::Present;
                    }
                }
            }
        }

        state.size_at_last_poll = size;
        if size > state.offset {
            if let Err(e) = read_new_lines(state, &mut file, size, &self.config, out) {
                warn!(path = %path.display(), error = %e, "Read failed, will retry next poll");
            }
        }

        PathStatus::Present
    }

    fn mark_missing(&mut self, path: &Path, now: Instant) -> PathStatus {
        let Some(state) = self.states.get_mut(path) else {
            return PathStatus::Missing;
        };

        let since = *state.missing_since.get_or_insert(now);
        if now.duration_since(since) >= self.config.missing_grace {
            info!(path = %path.display(), "Path missing past grace period, forgetting read position");
            self.states.remove(path);
            return PathStatus::Discarded;
        }
        PathStatus::Missing
    }
}

/// Read `[offset, size)` (capped by `max_read_bytes`), emit complete lines and
/// advance the offset past the last one.
fn read_new_lines(
    state: &mut WatchState,
    file: &mut File,
    size: u64,
    config: &WatchConfig,
    out: &mut Vec<RawLine>,
) -> std::io::Result<()> {
    let to_read = (size - state.offset).min(config.max_read_bytes.max(1));
    file.seek(SeekFrom::Start(state.offset))?;

    let mut buf = Vec::with_capacity(to_read as usize);
    file.by_ref().take(to_read).read_to_end(&mut buf)?;

    let consumed = match buf.iter().rposition(|&b| b == b'\n') {
        Some(last_newline) => {
            let mut start = 0;
            for (i, &b) in buf[..=last_newline].iter().enumerate() {
                if b == b'\n' {
                    emit_line(state, &buf[start..i], start as u64, config, out);
                    start = i + 1;
                }
            }
            last_newline + 1
        }
        None if buf.len() >= config.max_line_bytes.min(config.max_read_bytes as usize) => {
            warn!(
                path = %state.path.display(),
                bytes = buf.len(),
                "Unterminated line exceeds limit, emitting as-is"
            );
            emit_line(state, &buf, 0, config, out);
            buf.len()
        }
        None => 0,
    };

    state.offset += consumed as u64;

    if config.fingerprint {
        let covered = state.fingerprint.as_ref().map(|f| f.len).unwrap_or(0);
        if covered < FINGERPRINT_BYTES && state.offset > covered {
            state.fingerprint = Some(compute_fingerprint(file, state.offset)?);
        }
    }

    Ok(())
}

fn emit_line(
    state: &WatchState,
    bytes: &[u8],
    relative_offset: u64,
    config: &WatchConfig,
    out: &mut Vec<RawLine>,
) {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    if bytes.is_empty() && config.skip_empty_lines {
        return;
    }

    out.push(RawLine {
        path: state.path.clone(),
        line: String::from_utf8_lossy(bytes).into_owned(),
        offset: state.offset + relative_offset,
    });
}

/// Offset just past the last `\n` before `size`, or 0 when there is none.
fn end_of_last_line(file: &mut File, size: u64) -> std::io::Result<u64> {
    const CHUNK: u64 = 8192;
    let mut end = size;
    let mut buf = Vec::with_capacity(CHUNK as usize);

    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        file.seek(SeekFrom::Start(start))?;
        buf.clear();
        file.by_ref().take(end - start).read_to_end(&mut buf)?;
        if let Some(pos) = buf.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

/// SHA-256 over the first `min(limit, FINGERPRINT_BYTES)` bytes.
fn compute_fingerprint(file: &mut File, limit: u64) -> std::io::Result<Fingerprint> {
    let len = limit.min(FINGERPRINT_BYTES);
    file.seek(SeekFrom::Start(0))?;

    let mut head = Vec::with_capacity(len as usize);
    file.by_ref().take(len).read_to_end(&mut head)?;

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(&head));
    Ok(Fingerprint {
        len: head.len() as u64,
        digest,
    })
}

fn discover(pattern: &str) -> Vec<PathBuf> {
    match glob::glob(pattern) {
        Ok(paths) => {
            let mut paths: Vec<PathBuf> = paths
                .filter_map(Result::ok)
                .filter(|p| p.is_file())
                .collect();
            paths.sort();
            paths
        }
        Err(e) => {
            warn!(pattern, error = %e, "Invalid glob pattern");
            Vec::new()
        }
    }
}
