//! Merged runtime configuration: built-in defaults, overlaid by the INI
//! config file, overlaid by CLI flags.
//!
//! INI parsing reuses the `rust-ini` crate, the same one the teacher
//! codebase used for its own config-file parsing, since `rteval.conf` is
//! INI-shaped.

use std::path::{Path, PathBuf};

use ini::Ini;
use log::LevelFilter;
use thiserror::Error;

use crate::cli::Cli;

pub const DEFAULT_CONFIGFILE: &str = "/etc/rteval.conf";
pub const DEFAULT_PIDFILE: &str = "/var/run/rteval-parserd.pid";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error("config file {path} does not exist")]
    NotFound { path: PathBuf },
    #[error("missing required config value: {0}")]
    MissingRequired(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyslogFacility {
    Daemon,
    User,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl SyslogFacility {
    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "daemon" => Self::Daemon,
            "user" => Self::User,
            "local0" => Self::Local0,
            "local1" => Self::Local1,
            "local2" => Self::Local2,
            "local3" => Self::Local3,
            "local4" => Self::Local4,
            "local5" => Self::Local5,
            "local6" => Self::Local6,
            "local7" => Self::Local7,
            _ => return None,
        })
    }

    pub fn to_syslog_facility(self) -> syslog::Facility {
        match self {
            Self::Daemon => syslog::Facility::LOG_DAEMON,
            Self::User => syslog::Facility::LOG_USER,
            Self::Local0 => syslog::Facility::LOG_LOCAL0,
            Self::Local1 => syslog::Facility::LOG_LOCAL1,
            Self::Local2 => syslog::Facility::LOG_LOCAL2,
            Self::Local3 => syslog::Facility::LOG_LOCAL3,
            Self::Local4 => syslog::Facility::LOG_LOCAL4,
            Self::Local5 => syslog::Facility::LOG_LOCAL5,
            Self::Local6 => syslog::Facility::LOG_LOCAL6,
            Self::Local7 => syslog::Facility::LOG_LOCAL7,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    Syslog(SyslogFacility),
    File(PathBuf),
    Stderr,
}

impl LogSink {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.strip_prefix("syslog:") {
            Some(facility) => SyslogFacility::parse(facility)
                .map(Self::Syslog)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "log",
                    value: value.to_string(),
                }),
            None => Ok(Self::File(PathBuf::from(value))),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::Syslog(SyslogFacility::Daemon)
    }
}

/// Maps the eight syslog-style level names onto `log`'s five-level
/// filter, folding the syslog-only levels onto their nearest neighbour.
pub fn parse_loglevel(value: &str) -> Result<LevelFilter, ConfigError> {
    Ok(match value {
        "emerg" | "alert" | "crit" | "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "notice" | "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        other => {
            return Err(ConfigError::InvalidValue {
                field: "loglevel",
                value: other.to_string(),
            })
        }
    })
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub num_threads: usize,
    pub log: LogSink,
    pub loglevel: LevelFilter,
    pub configfile: PathBuf,
    pub pidfile: PathBuf,
    pub xsltpath: PathBuf,
    pub reportdir: PathBuf,
    pub database_url: String,
}

struct FileValues {
    num_threads: Option<usize>,
    log: Option<String>,
    loglevel: Option<String>,
    pidfile: Option<String>,
    xsltpath: Option<String>,
    reportdir: Option<String>,
}

fn read_file_values(path: &Path) -> Result<FileValues, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
    })?;
    let ini = Ini::load_from_str(&text).map_err(|err| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    let get = |section: Option<&str>, key: &str| -> Option<String> {
        ini.section(section).and_then(|s| s.get(key)).map(str::to_string)
    };

    Ok(FileValues {
        num_threads: get(None, "num_threads").and_then(|v| v.parse().ok()),
        log: get(None, "log"),
        loglevel: get(None, "loglevel"),
        pidfile: get(None, "pidfile"),
        xsltpath: get(Some("xslt"), "xsltpath").or_else(|| get(None, "xsltpath")),
        reportdir: get(Some("config"), "reportdir").or_else(|| get(None, "reportdir")),
    })
}

impl DaemonConfig {
    /// Merge CLI overrides over config-file values over built-in
    /// defaults. A missing config file is tolerated as long as every
    /// required value (`xsltpath`, `reportdir`) is supplied some other
    /// way; a config file that exists but fails to parse is always
    /// fatal.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let configfile = cli
            .configfile
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIGFILE));

        let file_values = match read_file_values(&configfile) {
            Ok(values) => Some(values),
            Err(ConfigError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };

        let num_threads = cli
            .num_threads
            .or_else(|| file_values.as_ref().and_then(|f| f.num_threads))
            .unwrap_or_else(num_cpus::get);

        let log = match cli
            .log
            .clone()
            .or_else(|| file_values.as_ref().and_then(|f| f.log.clone()))
        {
            Some(value) => LogSink::parse(&value)?,
            // `--foreground` with no explicit sink logs to stderr, same as
            // running most daemons with their "stay attached" flag: there's
            // a terminal right there to read from, and nothing external is
            // going to read syslog or a log file back to the caller.
            None if cli.foreground => LogSink::Stderr,
            None => LogSink::default(),
        };

        let loglevel = match cli
            .loglevel
            .clone()
            .or_else(|| file_values.as_ref().and_then(|f| f.loglevel.clone()))
        {
            Some(value) => parse_loglevel(&value)?,
            None => LevelFilter::Info,
        };

        let pidfile = cli
            .pidfile
            .clone()
            .or_else(|| file_values.as_ref().and_then(|f| f.pidfile.clone()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PIDFILE));

        let xsltpath = file_values
            .as_ref()
            .and_then(|f| f.xsltpath.clone())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingRequired("xsltpath"))?;

        let reportdir = file_values
            .as_ref()
            .and_then(|f| f.reportdir.clone())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingRequired("reportdir"))?;

        let database_url = std::env::var("RTEVAL_DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/rteval".to_string());

        Ok(Self {
            num_threads: num_threads.max(1),
            log,
            loglevel,
            configfile,
            pidfile,
            xsltpath,
            reportdir,
            database_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    fn base_cli(configfile: PathBuf) -> Cli {
        Cli {
            num_threads: None,
            log: None,
            loglevel: None,
            configfile: Some(configfile),
            pidfile: None,
            foreground: false,
        }
    }

    #[test]
    fn cli_overrides_file_values() {
        let file = write_conf(
            "num_threads = 4\n[xslt]\nxsltpath = /etc/rteval.d\n[config]\nreportdir = /var/lib/rteval\n",
        );
        let mut cli = base_cli(file.path().to_path_buf());
        cli.num_threads = Some(9);
        let config = DaemonConfig::load(&cli).unwrap();
        assert_eq!(config.num_threads, 9);
    }

    #[test]
    fn file_values_used_when_cli_silent() {
        let file = write_conf(
            "num_threads = 4\n[xslt]\nxsltpath = /etc/rteval.d\n[config]\nreportdir = /var/lib/rteval\n",
        );
        let cli = base_cli(file.path().to_path_buf());
        let config = DaemonConfig::load(&cli).unwrap();
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.xsltpath, PathBuf::from("/etc/rteval.d"));
        assert_eq!(config.reportdir, PathBuf::from("/var/lib/rteval"));
    }

    #[test]
    fn missing_xsltpath_is_an_error() {
        let file = write_conf("[config]\nreportdir = /var/lib/rteval\n");
        let cli = base_cli(file.path().to_path_buf());
        let err = DaemonConfig::load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("xsltpath")));
    }

    #[test]
    fn unparsable_config_file_is_fatal() {
        let file = write_conf("this is not [ini\n=broken");
        let cli = base_cli(file.path().to_path_buf());
        assert!(DaemonConfig::load(&cli).is_err());
    }

    #[test]
    fn syslog_log_sink_parses_facility() {
        assert_eq!(
            LogSink::parse("syslog:local3").unwrap(),
            LogSink::Syslog(SyslogFacility::Local3)
        );
    }

    #[test]
    fn unknown_facility_is_rejected() {
        assert!(LogSink::parse("syslog:bogus").is_err());
    }

    #[test]
    fn foreground_defaults_to_stderr_log_sink() {
        let file = write_conf(
            "[xslt]\nxsltpath = /etc/rteval.d\n[config]\nreportdir = /var/lib/rteval\n",
        );
        let mut cli = base_cli(file.path().to_path_buf());
        cli.foreground = true;
        let config = DaemonConfig::load(&cli).unwrap();
        assert_eq!(config.log, LogSink::Stderr);
    }

    #[test]
    fn foreground_does_not_override_an_explicit_log_sink() {
        let file = write_conf(
            "log = syslog:local2\n[xslt]\nxsltpath = /etc/rteval.d\n[config]\nreportdir = /var/lib/rteval\n",
        );
        let mut cli = base_cli(file.path().to_path_buf());
        cli.foreground = true;
        let config = DaemonConfig::load(&cli).unwrap();
        assert_eq!(config.log, LogSink::Syslog(SyslogFacility::Local2));
    }

    #[test]
    fn file_path_log_sink_parses() {
        assert_eq!(
            LogSink::parse("/var/log/rteval-parserd.log").unwrap(),
            LogSink::File(PathBuf::from("/var/log/rteval-parserd.log"))
        );
    }

    #[test]
    fn loglevel_folds_syslog_only_levels() {
        assert_eq!(parse_loglevel("emerg").unwrap(), LevelFilter::Error);
        assert_eq!(parse_loglevel("notice").unwrap(), LevelFilter::Info);
        assert_eq!(parse_loglevel("debug").unwrap(), LevelFilter::Debug);
        assert!(parse_loglevel("bogus").is_err());
    }
}
