//! Logging backend selection: syslog or a plain file, chosen by the
//! `log` config option and installed as the global `log::Log`
//! implementation.

use std::fs::OpenOptions;
use std::io::Write;

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use syslog::Formatter3164;
use thiserror::Error;

use crate::config::LogSink;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {reason}")]
    OpenFile { path: String, reason: String },
    #[error("failed to connect to syslog: {0}")]
    Syslog(String),
    #[error("a logger is already installed")]
    AlreadyInstalled,
}

/// Appends one timestamped line per record to an open file. Used for
/// the `log = <path>` config form.
struct FileLogger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        let mut file = self.file.lock();
        let _ = writeln!(
            file,
            "{timestamp} {:<5} [{}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = self.file.lock().flush();
    }
}

/// Writes one timestamped line per record straight to stderr. Used for
/// `--foreground` runs that leave `log` unset: there's a terminal right
/// there, so there's no reason to make a local run go find a file or a
/// syslog socket.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        eprintln!(
            "{timestamp} {:<5} [{}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Forwards records to syslog, folding `log`'s levels onto syslog
/// severities; the finer emerg/alert/crit/notice distinctions the
/// config file accepts are not recoverable once folded into a
/// `LevelFilter`, so everything below `Warn` maps to `Notice`.
struct SyslogLogger {
    writer: Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>,
    level: LevelFilter,
}

impl Log for SyslogLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = self.writer.lock();
        let message = record.args().to_string();
        let result = match record.level() {
            log::Level::Error => writer.err(message),
            log::Level::Warn => writer.warning(message),
            log::Level::Info => writer.notice(message),
            log::Level::Debug | log::Level::Trace => writer.debug(message),
        };
        if let Err(err) = result {
            eprintln!("rteval-parserd: syslog write failed: {err}");
        }
    }

    fn flush(&self) {}
}

/// Installs the global logger described by `sink`/`level`. Must be
/// called exactly once, before any worker or producer threads start.
pub fn init(sink: &LogSink, level: LevelFilter) -> Result<(), LoggingError> {
    match sink {
        LogSink::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| LoggingError::OpenFile {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                })?;
            let logger = FileLogger {
                file: Mutex::new(file),
                level,
            };
            log::set_boxed_logger(Box::new(logger)).map_err(|_| LoggingError::AlreadyInstalled)?;
        }
        LogSink::Stderr => {
            let logger = StderrLogger { level };
            log::set_boxed_logger(Box::new(logger)).map_err(|_| LoggingError::AlreadyInstalled)?;
        }
        LogSink::Syslog(facility) => {
            let formatter = Formatter3164 {
                facility: facility.to_syslog_facility(),
                hostname: None,
                process: "rteval-parserd".into(),
                pid: std::process::id(),
            };
            let writer = syslog::unix(formatter).map_err(|err| LoggingError::Syslog(err.to_string()))?;
            let logger = SyslogLogger {
                writer: Mutex::new(writer),
                level,
            };
            log::set_boxed_logger(Box::new(logger)).map_err(|_| LoggingError::AlreadyInstalled)?;
        }
    }
    log::set_max_level(level);
    Ok(())
}
