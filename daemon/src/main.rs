//! syslogd -- main entry point.
//!
//! Receives syslog datagrams over UDP, parses older (RFC 3164) and newer
//! (RFC 5424) format messages, and writes time-partitioned batches to a
//! SQLite or search-engine backend.
//!
//! # Usage
//!
//! ```text
//! syslogd --config /etc/syslogd/syslogd.toml
//! syslogd --validate    # validate config and exit
//! syslogd --log-level debug --log-format pretty
//! ```

mod cli;
mod health;
mod logging;
mod metrics_server;
mod supervisor;

use anyhow::Result;
use clap::Parser;

use crate::cli::DaemonCli;
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = if cli.config.exists() {
        syslogd_core::config::Config::load(&cli.config)
            .await
            .map_err(|e| {
                anyhow::anyhow!("failed to load config from {}: {}", cli.config.display(), e)
            })?
    } else {
        tracing::warn!(
            path = %cli.config.display(),
            "config file not found, using defaults"
        );
        syslogd_core::config::Config::default()
    };

    if let Some(ref level) = cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.general.log_format = format.clone();
    }
    if let Some(ref pid_file) = cli.pid_file {
        config.general.pid_file = Some(pid_file.clone());
    }

    if cli.validate {
        return match config.validate() {
            Ok(()) => {
                // tracing may not be initialized yet in validate-only mode;
                // use a minimal subscriber just for this one message.
                let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
                tracing::info!("configuration is valid");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("configuration validation failed: {}", e)),
        };
    }

    logging::init_tracing(&config.general)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %cli.config.display(),
        "syslogd starting"
    );

    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }

    let mut supervisor = Supervisor::build_from_config(config).await?;
    supervisor.run().await?;

    tracing::info!("syslogd shut down cleanly");
    Ok(())
}
