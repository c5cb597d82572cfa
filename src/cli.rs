//! Command-line surface. Every flag is an override for the matching
//! config-file value; leaving a flag unset falls through to the file,
//! then to the built-in default.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "rteval-parserd", about = "Drains the rteval submission queue")]
pub struct Cli {
    /// Number of worker threads. Defaults to the config file value, or
    /// the detected CPU count.
    #[arg(long)]
    pub num_threads: Option<usize>,

    /// Log sink: `syslog:<facility>` or an absolute file path.
    #[arg(long)]
    pub log: Option<String>,

    /// Log level: emerg, alert, crit, error, warn, notice, info, debug.
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Path to the INI config file.
    #[arg(long)]
    pub configfile: Option<PathBuf>,

    /// Path to the PID file.
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// Stay attached to the controlling terminal instead of
    /// daemonising. Daemonisation itself lives outside this crate; the
    /// one thing this flag controls directly is the log sink default,
    /// which becomes stderr instead of syslog when neither `--log` nor
    /// the config file names one.
    #[arg(long, default_value_t = false)]
    pub foreground: bool,
}
