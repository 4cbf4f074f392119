//! Append-only chat transcript.
//!
//! One file per server lifetime, named after the server start time:
//! ```text
//! HistoricLog/
//! └── historic-20261019143005.log
//!       2026-10-19 14:30:07 - User1 connected
//!       2026-10-19 14:30:12 - User1: hello
//!       2026-10-19 14:31:40 - User1 disconnected
//! ```
//!
//! Every append is flushed and synced before returning. Volume is a few
//! lines per human action, so there is no buffering.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDateTime};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const SEPARATOR: &str = " - ";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt history line {line}: {content:?}")]
    Corrupt { line: usize, content: String },
}

/// Where the transcript lives.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Directory created on first use. Relative paths resolve against the
    /// working directory.
    pub directory: PathBuf,
    /// File name prefix, followed by `-<start stamp>.log`.
    pub file_prefix: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("HistoricLog"),
            file_prefix: "historic".to_string(),
        }
    }
}

impl HistoryConfig {
    /// Config rooted in a scratch directory.
    pub fn for_testing(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub timestamp: NaiveDateTime,
    pub text: String,
}

impl HistoryRecord {
    pub fn to_line(&self) -> String {
        format!("{}{SEPARATOR}{}", self.timestamp.format(TIMESTAMP_FORMAT), self.text)
    }

    pub fn parse_line(line: &str, line_no: usize) -> Result<Self, HistoryError> {
        let corrupt = || HistoryError::Corrupt {
            line: line_no,
            content: line.to_string(),
        };
        let (stamp, text) = line.split_once(SEPARATOR).ok_or_else(corrupt)?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|_| corrupt())?;
        Ok(Self {
            timestamp,
            text: text.to_string(),
        })
    }
}

/// Transcript writer shared by every connection of one server.
pub struct HistoryLog {
    config: HistoryConfig,
    started_at: DateTime<Local>,
    /// `None` until the first `open()`.
    file: Mutex<Option<File>>,
    total_appended: AtomicU64,
}

impl HistoryLog {
    /// Create a log stamped with the current time. Nothing touches the
    /// disk until [`open`](Self::open) or the first append.
    pub fn new(config: HistoryConfig) -> Self {
        Self::starting_at(config, Local::now())
    }

    pub fn starting_at(config: HistoryConfig, started_at: DateTime<Local>) -> Self {
        Self {
            config,
            started_at,
            file: Mutex::new(None),
            total_appended: AtomicU64::new(0),
        }
    }

    /// Full path of this lifetime's transcript.
    pub fn path(&self) -> PathBuf {
        let name = format!(
            "{}-{}.log",
            self.config.file_prefix,
            self.started_at.format(FILE_STAMP_FORMAT)
        );
        self.config.directory.join(name)
    }

    /// Create the directory and file. Later calls are no-ops.
    pub fn open(&self) -> Result<PathBuf, HistoryError> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        self.open_locked(&mut file)?;
        Ok(self.path())
    }

    fn open_locked(&self, slot: &mut Option<File>) -> Result<(), HistoryError> {
        if slot.is_some() {
            return Ok(());
        }

        let dir = &self.config.directory;
        fs::create_dir_all(dir).map_err(|source| HistoryError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = self.path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| HistoryError::Io {
                path: path.clone(),
                source,
            })?;

        log::info!("History log opened at {}", path.display());
        *slot = Some(file);
        Ok(())
    }

    /// Append one event line and sync it to disk.
    ///
    /// Line breaks inside `text` are flattened to spaces so one event is
    /// always one line.
    pub fn append(&self, text: &str) -> Result<HistoryRecord, HistoryError> {
        let record = HistoryRecord {
            timestamp: Local::now().naive_local(),
            text: text.replace(['\r', '\n'], " "),
        };

        let mut slot = self.file.lock().unwrap_or_else(|e| e.into_inner());
        self.open_locked(&mut slot)?;

        let io_err = |source| HistoryError::Io {
            path: self.path(),
            source,
        };
        if let Some(file) = slot.as_mut() {
            writeln!(file, "{}", record.to_line()).map_err(io_err)?;
            file.flush().map_err(io_err)?;
            file.sync_data().map_err(io_err)?;
        }

        self.total_appended.fetch_add(1, Ordering::Relaxed);
        Ok(record)
    }

    pub fn total_appended(&self) -> u64 {
        self.total_appended.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().map(|f| f.is_some()).unwrap_or(false)
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Read a transcript back in write order.
    pub fn replay(path: &Path) -> Result<Vec<HistoryRecord>, HistoryError> {
        let io_err = |source| HistoryError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.is_empty() {
                continue;
            }
            records.push(HistoryRecord::parse_line(&line, i + 1)?);
        }
        Ok(records)
    }
}
