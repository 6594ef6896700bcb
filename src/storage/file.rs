use super::traits::{RecordFilter, Storage, StorageError};
use crate::record::{LogEntry, Record};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, Default)]
pub struct FileStorageOptions {
    /// Call `sync_data` after every append.
    pub fsync: bool,
}

/// Outcome of reading an existing log at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub loaded: usize,
    pub corrupt: usize,
}

/// Append-only JSON-lines log with an in-memory index.
///
/// Every record is one line. The whole file is read once on open; queries
/// are then served from memory. The file is never compacted.
pub struct FileStorage {
    path: PathBuf,
    options: FileStorageOptions,
    inner: Arc<RwLock<Log>>,
}

struct Log {
    file: File,
    records: Vec<Record>,
    next_id: u64,
    /// The file does not end in a newline; the next append must start one.
    torn_tail: bool,
}

impl FileStorage {
    pub fn open(
        path: impl AsRef<Path>,
        options: FileStorageOptions,
    ) -> Result<(Self, RebuildReport), StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (records, report, torn_tail) = if path.exists() {
            rebuild(&path)?
        } else {
            (Vec::new(), RebuildReport::default(), false)
        };

        if report.corrupt > 0 {
            tracing::warn!(
                path = %path.display(),
                corrupt = report.corrupt,
                loaded = report.loaded,
                "Skipped corrupt lines while rebuilding record log"
            );
        } else {
            tracing::info!(
                path = %path.display(),
                loaded = report.loaded,
                "Rebuilt record log"
            );
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let next_id = records.last().map(|r| r.id + 1).unwrap_or(1);

        let storage = Self {
            path,
            options,
            inner: Arc::new(RwLock::new(Log {
                file,
                records,
                next_id,
                torn_tail,
            })),
        };
        Ok((storage, report))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn rebuild(path: &Path) -> Result<(Vec<Record>, RebuildReport, bool), StorageError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records: Vec<Record> = Vec::new();
    let mut report = RebuildReport::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    let mut torn_tail = false;

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        line_no += 1;
        torn_tail = buf.last() != Some(&b'\n');

        let line = trim_line(&buf);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Record>(line) {
            Ok(record) => {
                let last_id = records.last().map(|r| r.id).unwrap_or(0);
                if record.id <= last_id {
                    tracing::warn!(line = line_no, id = record.id, last_id, "Out-of-order record id");
                    report.corrupt += 1;
                    continue;
                }
                records.push(record);
                report.loaded += 1;
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Unreadable record line");
                report.corrupt += 1;
            }
        }
    }

    Ok((records, report, torn_tail))
}

/// What an append needs from the log file.
trait LogFile: Write {
    fn size(&self) -> std::io::Result<u64>;
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
    fn sync(&mut self) -> std::io::Result<()>;
}

impl LogFile for File {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }
}

#[derive(Debug)]
struct AppendFailure {
    error: std::io::Error,
    /// The file is back at its length before the append.
    rolled_back: bool,
}

/// Write `line` whole or not at all. A failure after bytes reached the file
/// cuts it back, so a record reported as dropped never reappears on rebuild.
fn append<F: LogFile>(file: &mut F, line: &[u8], fsync: bool) -> Result<(), AppendFailure> {
    let before = file.size().map_err(|error| AppendFailure {
        error,
        rolled_back: true,
    })?;

    write_line(file, line, fsync).map_err(|error| {
        let rolled_back = match file.truncate(before) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, len = before, "Could not roll back failed append");
                false
            }
        };
        AppendFailure { error, rolled_back }
    })
}

fn write_line<F: LogFile>(file: &mut F, line: &[u8], fsync: bool) -> std::io::Result<()> {
    file.write_all(line)?;
    file.flush()?;
    if fsync {
        file.sync()?;
    }
    Ok(())
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end > 0 && (buf[end - 1] == b'\n' || buf[end - 1] == b'\r') {
        end -= 1;
    }
    &buf[..end]
}

#[async_trait]
impl Storage for FileStorage {
    async fn store(&self, entry: LogEntry) -> Result<Record, StorageError> {
        let inner = self.inner.clone();
        let fsync = self.options.fsync;

        tokio::task::spawn_blocking(move || -> Result<Record, StorageError> {
            let mut log = inner.write().map_err(|_| StorageError::LockPoisoned)?;

            let record = Record::from_entry(log.next_id, entry);
            // An id is never reused, even when the append below fails.
            log.next_id += 1;

            let mut line = Vec::with_capacity(256);
            if log.torn_tail {
                line.push(b'\n');
            }
            serde_json::to_writer(&mut line, &record)?;
            line.push(b'\n');

            if let Err(failure) = append(&mut log.file, &line, fsync) {
                if !failure.rolled_back {
                    log.torn_tail = true;
                }
                return Err(StorageError::Io(failure.error));
            }

            log.torn_tail = false;
            log.records.push(record.clone());
            Ok(record)
        })
        .await
        .map_err(|e| StorageError::TaskJoin(e.to_string()))?
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        let inner = self.inner.clone();
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Record>, StorageError> {
            let log = inner.read().map_err(|_| StorageError::LockPoisoned)?;
            Ok(filter.select(log.records.iter()))
        })
        .await
        .map_err(|e| StorageError::TaskJoin(e.to_string()))?
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let log = inner.read().map_err(|_| StorageError::LockPoisoned)?;
            Ok(log.records.len())
        })
        .await
        .map_err(|e| StorageError::TaskJoin(e.to_string()))?
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
