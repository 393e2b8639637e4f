//! Decoupled logging pipeline.
//!
//! Every `log` record is handed to a background thread over an unbounded
//! crossbeam channel and appended to the session's log files:
//!
//! ```text
//! log::info!() / log_parsed!()
//!     |
//! [LogCollector] (Log impl, never blocks)
//!     | crossbeam unbounded
//!     v
//! [persister thread]
//!     |-- <log_dir>/full/<ts>_full.log      every record
//!     `-- <log_dir>/parsed/<ts>_parsed.log  target "parsed" only
//! ```

use chrono::Local;
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Target routed to the parsed (milestone) log.
pub const PARSED_TARGET: &str = "parsed";

/// Upper bound on `wait_for_empty`.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the persister acknowledges once files are synced
    Flush(Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub message: String,
    /// Also written to the parsed log
    pub parsed: bool,
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            parsed: false,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            parsed: true,
            ..LogLine::new(message)
        }
    }

    fn formatted(&self) -> String {
        format!("[{}] {}\n", self.timestamp, self.message)
    }
}

/// Session log files created by one `LogCollector`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionLogs {
    pub full: PathBuf,
    pub parsed: PathBuf,
}

/// `log::Log` implementation persisting records from a background thread
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    level: LevelFilter,
    session: SessionLogs,
}

impl LogCollector {
    /// Create the `full/` and `parsed/` directories, open this session's
    /// files and start the persister thread.
    pub fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, String> {
        let full_dir = log_dir.join("full");
        let parsed_dir = log_dir.join("parsed");
        std::fs::create_dir_all(&full_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&parsed_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let session = SessionLogs {
            full: full_dir.join(format!("{}_full.log", stamp)),
            parsed: parsed_dir.join(format!("{}_parsed.log", stamp)),
        };
        let mut full = open_append(&session.full)?;
        let mut parsed = open_append(&session.parsed)?;

        let (tx, rx) = unbounded::<LogMessage>();

        // OS thread, not a tokio task: records from any runtime or thread reach disk
        std::thread::Builder::new()
            .name("kpm-log-persister".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            let formatted = line.formatted();
                            let _ = full.write_all(formatted.as_bytes());
                            if line.parsed {
                                let _ = parsed.write_all(formatted.as_bytes());
                            }
                        }
                        LogMessage::Flush(ack) => {
                            let _ = full.flush();
                            let _ = parsed.flush();
                            let _ = full.sync_data();
                            let _ = parsed.sync_data();
                            let _ = ack.send(());
                        }
                    }
                }
                let _ = full.flush();
                let _ = parsed.flush();
            })
            .map_err(|e| format!("Failed to spawn log persister: {}", e))?;

        Ok(LogCollector { tx, level, session })
    }

    pub fn session_logs(&self) -> &SessionLogs {
        &self.session
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Register a clone of this collector as the global `log` backend.
    pub fn install_global(&self) -> Result<(), String> {
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| format!("Failed to install logger: {}", e))?;
        log::set_max_level(self.level);
        Ok(())
    }

    /// Send a log line (non-blocking)
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log_line(LogLine::new(message.into()));
    }

    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log_line(LogLine::parsed(message.into()));
    }

    /// Wait until every line sent before this call is on disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (ack_tx, ack_rx) = bounded::<()>(1);
        self.tx
            .send(LogMessage::Flush(ack_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;

        tokio::task::spawn_blocking(move || ack_rx.recv_timeout(FLUSH_TIMEOUT))
            .await
            .map_err(|e| format!("Flush waiter failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = format!("[{}] {}", record.level(), record.args());
        if record.target() == PARSED_TARGET {
            self.log_parsed(message);
        } else {
            self.log_str(message);
        }
    }

    fn flush(&self) {}
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}
