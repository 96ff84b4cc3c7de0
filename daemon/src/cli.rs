//! CLI argument definitions for syslogd.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// syslogd -- UDP syslog ingestion daemon.
///
/// Receives syslog datagrams, parses older/newer format messages, and
/// writes time-partitioned batches to a SQLite or search-engine backend.
#[derive(Parser, Debug)]
#[command(name = "syslogd")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to syslogd.toml configuration file.
    #[arg(short, long, default_value = "/etc/syslogd/syslogd.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}
