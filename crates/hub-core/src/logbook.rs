//! Structured event log
//!
//! Rule triggers, actions, timer expiries and loop errors are recorded as
//! JSON objects. Appending is best-effort: a sink never returns an error to
//! the caller, it reports its own failures through `tracing`.

use serde_json::{Map, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Destination for structured events
pub trait LogSink: Send + Sync {
    fn append(&self, event: Value);
}

enum Command {
    Append(Value),
    Flush(mpsc::SyncSender<()>),
    Clear(mpsc::SyncSender<std::io::Result<()>>),
}

/// JSON-lines file log with a `ts` (unix seconds) on every entry.
///
/// File writes happen on a dedicated writer thread so `append` never blocks
/// the async poll loop. Commands are handled in order, so `recent` and
/// `clear` observe every earlier append.
#[derive(Debug)]
pub struct JsonlLogbook {
    path: PathBuf,
    tx: mpsc::Sender<Command>,
}

impl JsonlLogbook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel();
        let writer_path = path.clone();
        if let Err(e) = std::thread::Builder::new()
            .name("logbook-writer".to_string())
            .spawn(move || writer_loop(&writer_path, rx))
        {
            tracing::warn!("Failed to start log writer for {:?}: {}", path, e);
        }
        Self { path, tx }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stamp(event: Value) -> Value {
        let ts = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let mut entry = Map::new();
        entry.insert("ts".to_string(), Value::from(ts));
        match event {
            Value::Object(fields) => entry.extend(fields),
            other => {
                entry.insert("message".to_string(), other);
            }
        }
        Value::Object(entry)
    }

    /// Wait until every earlier append has reached the file. Blocking.
    fn flush(&self) {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Most recent `limit` entries, newest first. Unparsable lines are skipped.
    /// Blocking; call from `spawn_blocking` in async code.
    pub fn recent(&self, limit: usize) -> Vec<Value> {
        self.flush();
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read log file {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        let lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .rev()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    /// Erase all entries. Blocking; call from `spawn_blocking` in async code.
    pub fn clear(&self) -> std::io::Result<()> {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Command::Clear(done_tx))
            .map_err(|_| std::io::Error::other("log writer stopped"))?;
        done_rx
            .recv()
            .map_err(|_| std::io::Error::other("log writer stopped"))?
    }
}

impl LogSink for JsonlLogbook {
    fn append(&self, event: Value) {
        if self.tx.send(Command::Append(Self::stamp(event))).is_err() {
            tracing::warn!("Log writer for {:?} stopped, dropping entry", self.path);
        }
    }
}

fn writer_loop(path: &Path, rx: mpsc::Receiver<Command>) {
    for command in rx {
        match command {
            Command::Append(entry) => {
                if let Err(e) = write_line(path, &entry) {
                    tracing::warn!("Failed to append to log {:?}: {}", path, e);
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Clear(done) => {
                let _ = done.send(truncate(path));
            }
        }
    }
}

fn write_line(path: &Path, entry: &Value) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{entry}")
}

fn truncate(path: &Path) -> std::io::Result<()> {
    match std::fs::File::create(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
