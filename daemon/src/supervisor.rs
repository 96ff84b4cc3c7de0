//! Supervisor (§4.5) -- assembly, lifecycle management, and graceful
//! shutdown of the single UDP-receiver -> batcher -> backend pipeline.
//!
//! Configuration load and validation, signal-driven shutdown, and an
//! atomic PID file follow the daemon's established lifecycle shape, with
//! per-module registration replaced by the three fixed roles this daemon
//! runs (§5: "one task per long-lived role").

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use syslogd_core::backend::StorageBackend;
use syslogd_core::config::{Config, Driver};
use syslogd_core::error::BackendError;
use syslogd_core::types::{LogRecord, PartitionKey};
use syslogd_ingest::backend::{SearchBackend, SearchConfig, SqliteBackend};
use syslogd_ingest::batcher::{self, BatcherHandle, ConsumerReport};
use syslogd_ingest::receiver::{self, ReceiverConfig};

use crate::health::{self, ReceiverAlive};

/// Upper bound on how long shutdown may take end to end (§5: "a total
/// wall-clock cap on shutdown guarantees the process exits").
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The configured storage backend, chosen once at startup (§4.5: "instantiate
/// the chosen backend"). An enum rather than `Box<dyn StorageBackend>"
/// because `StorageBackend`'s RPITIT methods are not dyn-compatible; a sum
/// type dispatches with a single `match` per call instead.
enum AnyBackend {
    Sqlite(SqliteBackend),
    Search(SearchBackend),
}

impl StorageBackend for AnyBackend {
    async fn ensure_partition(&mut self, key: PartitionKey) -> Result<(), BackendError> {
        match self {
            Self::Sqlite(b) => b.ensure_partition(key).await,
            Self::Search(b) => b.ensure_partition(key).await,
        }
    }

    async fn write_batch(
        &mut self,
        key: PartitionKey,
        records: Vec<LogRecord>,
    ) -> Result<usize, BackendError> {
        match self {
            Self::Sqlite(b) => b.write_batch(key, records).await,
            Self::Search(b) => b.write_batch(key, records).await,
        }
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        match self {
            Self::Sqlite(b) => b.close().await,
            Self::Search(b) => b.close().await,
        }
    }
}

fn build_backend(config: &Config) -> Result<AnyBackend> {
    match config.driver {
        Driver::Sqlite => Ok(AnyBackend::Sqlite(SqliteBackend::new(Path::new(
            &config.sqlite.database,
        )))),
        Driver::Search => Ok(AnyBackend::Search(SearchBackend::new(SearchConfig {
            url: config.search.url.clone(),
            api_key: config.search.api_key.clone(),
        })?)),
    }
}

/// The supervisor: owns the loaded configuration and the three pipeline
/// tasks for their whole lifetime.
pub struct Supervisor {
    config: Config,
    batcher: BatcherHandle,
    receiver_alive: ReceiverAlive,
    batch_errors: Arc<AtomicU64>,
    start_time: Instant,
    cancel: CancellationToken,
    receiver_task: Option<JoinHandle<Result<(), syslogd_ingest::IngestError>>>,
    batcher_task: Option<JoinHandle<ConsumerReport>>,
    health_task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Load configuration from `config_path` and build the supervisor.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = Config::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded, already-validated configuration.
    pub async fn build_from_config(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let backend = build_backend(&config)?;
        let (batcher, batcher_task) = batcher::spawn(
            config.queue_capacity,
            config.batch_size,
            Duration::from_secs(config.batch_timeout_secs),
            backend,
        );

        let cancel = CancellationToken::new();
        let receiver_alive = ReceiverAlive::new();
        let receiver_config = ReceiverConfig {
            bind_addr: std::net::SocketAddr::new(config.bind_ip, config.bind_port),
        };
        let receiver_task = {
            let batcher = batcher.clone();
            let cancel = cancel.clone();
            let receiver_alive = receiver_alive.clone();
            tokio::spawn(async move {
                let result = receiver::run(receiver_config, batcher, cancel).await;
                receiver_alive.mark_stopped();
                result
            })
        };

        let batch_errors = Arc::new(AtomicU64::new(0));
        let health_task = health::spawn_periodic_report(
            Duration::from_secs(30),
            batcher.clone(),
            receiver_alive.clone(),
            config.queue_capacity,
            Arc::clone(&batch_errors),
            Instant::now(),
            cancel.clone(),
        );

        tracing::info!(
            bind_ip = %config.bind_ip,
            bind_port = config.bind_port,
            driver = ?config.driver,
            "supervisor initialized"
        );

        Ok(Self {
            config,
            batcher,
            receiver_alive,
            batch_errors,
            start_time: Instant::now(),
            cancel,
            receiver_task: Some(receiver_task),
            batcher_task: Some(batcher_task),
            health_task: Some(health_task),
        })
    }

    /// Enter the main event loop. Blocks until a shutdown signal (`SIGTERM`
    /// or `SIGINT`) is received, then coordinates graceful shutdown.
    pub async fn run(&mut self) -> Result<()> {
        if let Some(pid_file) = self.config.general.pid_file.clone() {
            write_pid_file(Path::new(&pid_file))?;
        }

        tracing::info!("entering main event loop");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        let result = self.shutdown().await;

        if let Some(pid_file) = self.config.general.pid_file.clone() {
            remove_pid_file(Path::new(&pid_file));
        }

        result
    }

    /// Stop accepting new datagrams, drain the queue with a final
    /// `flush_now()`, close the backend, and return (§4.5, §5).
    pub async fn shutdown(&mut self) -> Result<()> {
        tokio::time::timeout(SHUTDOWN_TIMEOUT, self.shutdown_inner())
            .await
            .unwrap_or_else(|_| {
                tracing::error!(
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "shutdown exceeded wall-clock cap, exiting anyway"
                );
                Ok(())
            })
    }

    async fn shutdown_inner(&mut self) -> Result<()> {
        tracing::info!("stopping receiver");
        self.cancel.cancel();
        if let Some(task) = self.receiver_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "receiver exited with error"),
                Err(e) => tracing::warn!(error = %e, "receiver task panicked"),
            }
        }

        tracing::info!("draining batcher queue");
        self.batcher.flush_now();
        self.batcher.shutdown();
        if let Some(task) = self.batcher_task.take() {
            match task.await {
                Ok(report) => {
                    self.batch_errors
                        .store(report.batch_errors, std::sync::atomic::Ordering::Relaxed);
                    tracing::info!(
                        batches_flushed = report.batches_flushed,
                        records_flushed = report.records_flushed,
                        batch_errors = report.batch_errors,
                        "batcher drained"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "batcher task panicked"),
            }
        }

        if let Some(task) = self.health_task.take() {
            let _ = task.await;
        }

        tracing::info!("shutdown complete");
        Ok(())
    }

    /// Current aggregated health snapshot.
    pub fn health(&self) -> health::DaemonHealth {
        health::assess(
            &self.batcher,
            &self.receiver_alive,
            self.config.queue_capacity,
            self.batch_errors.load(std::sync::atomic::Ordering::Relaxed),
            self.start_time,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Wait for `SIGTERM` or `SIGINT`, returning the name of the signal that
/// triggered shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file, refusing to clobber an
/// existing one (guards against a second instance starting by accident).
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    writeln!(file, "{}", pid)?;
    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on shutdown. Logs a warning but does not fail if the
/// file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pid_file_creates_parent_directory() {
        let temp_dir = std::env::temp_dir();
        let test_dir = temp_dir.join(format!("syslogd_test_{}", std::process::id()));
        let pid_file = test_dir.join("subdir").join("test.pid");

        let result = write_pid_file(&pid_file);
        assert!(result.is_ok(), "write_pid_file should create parent directory");
        assert!(pid_file.exists(), "PID file should exist");

        let content = std::fs::read_to_string(&pid_file).expect("should read PID file");
        assert_eq!(content.trim(), std::process::id().to_string());

        let _ = std::fs::remove_dir_all(&test_dir);
    }

    #[test]
    fn write_pid_file_fails_if_already_exists() {
        let temp_dir = std::env::temp_dir();
        let pid_file = temp_dir.join(format!("syslogd_test_dup_{}.pid", std::process::id()));
        std::fs::write(&pid_file, "12345").expect("should write initial PID file");

        let result = write_pid_file(&pid_file);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("already exists"));
        assert!(err_msg.contains("12345"));

        let _ = std::fs::remove_file(&pid_file);
    }

    #[test]
    fn remove_pid_file_handles_nonexistent_gracefully() {
        let temp_dir = std::env::temp_dir();
        let pid_file = temp_dir.join(format!("syslogd_test_nonexist_{}.pid", std::process::id()));
        assert!(!pid_file.exists());
        remove_pid_file(&pid_file);
    }

    #[tokio::test]
    async fn build_from_config_with_sqlite_driver_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.bind_port = 15140;
        config.sqlite.database = dir.path().join("syslog.sqlite3").display().to_string();

        let mut supervisor = Supervisor::build_from_config(config).await.unwrap();
        let health = supervisor.health();
        assert_eq!(health.status, syslogd_core::backend::HealthStatus::Healthy);
        supervisor.shutdown().await.unwrap();
    }
}
