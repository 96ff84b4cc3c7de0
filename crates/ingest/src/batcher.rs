//! Batcher (§4.2) — bounded queue + size/time-triggered flush to a [`StorageBackend`].
//!
//! The receiver never awaits the batcher: [`BatcherHandle::submit`] is a
//! non-blocking `try_send`. A single consumer task owns the active batch
//! buffer and the backend handle, matching the single-writer-per-partition
//! rule in §5.

use std::collections::BTreeMap;
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use syslogd_core::backend::StorageBackend;
use syslogd_core::error::{BackendError, QueueError};
use syslogd_core::metrics::{
    BACKEND_BATCH_ERRORS_TOTAL, BATCHER_BATCHES_FLUSHED_TOTAL, BATCHER_BATCH_RECORDS_TOTAL,
    BATCHER_FLUSH_DURATION_SECONDS, BATCHER_QUEUE_DEPTH, BATCHER_QUEUE_DROPPED_TOTAL,
};
use syslogd_core::types::{LogRecord, PartitionKey};

/// Number of retries for a transient backend failure before the batch is
/// dropped and counted as `BackendFatal` (§7, §4.3 failure policy).
const MAX_RETRIES: u32 = 3;

/// Initial backoff before the first retry; doubles on each subsequent attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

enum Control {
    FlushNow,
    Shutdown,
}

/// Handle held by the UDP receiver and the supervisor.
#[derive(Clone)]
pub struct BatcherHandle {
    record_tx: mpsc::Sender<LogRecord>,
    control_tx: mpsc::UnboundedSender<Control>,
    dropped_total: Arc<AtomicU64>,
}

impl BatcherHandle {
    /// Non-blocking enqueue. On a full queue the record is dropped and the
    /// drop counter is incremented; the receiver is never blocked.
    pub fn submit(&self, record: LogRecord) -> Result<(), QueueError> {
        match self.record_tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(BATCHER_QUEUE_DROPPED_TOTAL).increment(1);
                Err(QueueError::Full {
                    capacity: self.record_tx.max_capacity(),
                })
            }
        }
    }

    /// Requests an out-of-band flush of whatever is currently buffered.
    pub fn flush_now(&self) {
        let _ = self.control_tx.send(Control::FlushNow);
    }

    /// Signals the consumer to drain the queue, flush, close the backend,
    /// and exit its task.
    pub fn shutdown(&self) {
        let _ = self.control_tx.send(Control::Shutdown);
    }

    /// Approximate number of records currently queued (for the depth gauge).
    pub fn queue_depth(&self) -> usize {
        self.record_tx.max_capacity() - self.record_tx.capacity()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

/// Outcome of the consumer task's lifetime, returned when its [`JoinHandle`]
/// completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsumerReport {
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub batch_errors: u64,
}

/// Spawns the consumer task and returns a handle plus its join handle.
pub fn spawn<B>(
    queue_capacity: usize,
    batch_size: usize,
    batch_timeout: Duration,
    backend: B,
) -> (BatcherHandle, JoinHandle<ConsumerReport>)
where
    B: StorageBackend + 'static,
{
    let (record_tx, record_rx) = mpsc::channel(queue_capacity);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let dropped_total = Arc::new(AtomicU64::new(0));

    let handle = BatcherHandle {
        record_tx,
        control_tx,
        dropped_total,
    };
    let join = tokio::spawn(run_consumer(record_rx, control_rx, backend, batch_size, batch_timeout));
    (handle, join)
}

async fn run_consumer<B: StorageBackend>(
    mut record_rx: mpsc::Receiver<LogRecord>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut backend: B,
    batch_size: usize,
    batch_timeout: Duration,
) -> ConsumerReport {
    let mut buffer: Vec<LogRecord> = Vec::with_capacity(batch_size);
    let mut deadline: Option<Instant> = None;
    let mut report = ConsumerReport::default();
    let mut control_closed = false;

    loop {
        metrics::gauge!(BATCHER_QUEUE_DEPTH).set(record_rx.len() as f64);

        let sleep_until_deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            maybe_ctrl = control_rx.recv(), if !control_closed => {
                match maybe_ctrl {
                    Some(Control::FlushNow) => {
                        flush_current(&mut backend, &mut buffer, &mut report).await;
                        deadline = None;
                    }
                    Some(Control::Shutdown) => {
                        drain_remaining(&mut record_rx, &mut buffer, batch_size, &mut backend, &mut report).await;
                        break;
                    }
                    None => control_closed = true,
                }
            }

            maybe_record = record_rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        if buffer.is_empty() {
                            deadline = Some(Instant::now() + batch_timeout);
                        }
                        buffer.push(record);
                        if buffer.len() >= batch_size {
                            flush_current(&mut backend, &mut buffer, &mut report).await;
                            deadline = None;
                        }
                    }
                    None => {
                        drain_remaining(&mut record_rx, &mut buffer, batch_size, &mut backend, &mut report).await;
                        break;
                    }
                }
            }

            _ = sleep_until_deadline, if deadline.is_some() => {
                flush_current(&mut backend, &mut buffer, &mut report).await;
                deadline = None;
            }
        }
    }

    let _ = backend.close().await;
    report
}

/// Non-blocking drain of whatever is still queued, flushing in `batch_size`
/// chunks, followed by a final flush of the trailing partial batch.
async fn drain_remaining<B: StorageBackend>(
    record_rx: &mut mpsc::Receiver<LogRecord>,
    buffer: &mut Vec<LogRecord>,
    batch_size: usize,
    backend: &mut B,
    report: &mut ConsumerReport,
) {
    while let Ok(record) = record_rx.try_recv() {
        buffer.push(record);
        if buffer.len() >= batch_size {
            flush_current(backend, buffer, report).await;
        }
    }
    flush_current(backend, buffer, report).await;
}

async fn flush_current<B: StorageBackend>(
    backend: &mut B,
    buffer: &mut Vec<LogRecord>,
    report: &mut ConsumerReport,
) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let n = batch.len();
    let start = Instant::now();
    flush_batch(backend, batch, report).await;
    metrics::histogram!(BATCHER_FLUSH_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
    metrics::counter!(BATCHER_BATCHES_FLUSHED_TOTAL).increment(1);
    metrics::counter!(BATCHER_BATCH_RECORDS_TOTAL).increment(n as u64);
    report.batches_flushed += 1;
}

/// Groups a batch by partition key (splitting on month-boundary-straddling
/// batches per §4.3) and writes each group with bounded retry.
async fn flush_batch<B: StorageBackend>(backend: &mut B, batch: Vec<LogRecord>, report: &mut ConsumerReport) {
    let mut groups: BTreeMap<PartitionKey, Vec<LogRecord>> = BTreeMap::new();
    for record in batch {
        groups.entry(record.partition_key()).or_default().push(record);
    }

    for (key, records) in groups {
        if let Err(e) = backend.ensure_partition(key).await {
            tracing::error!(partition = %key, error = %e, "failed to open partition, dropping batch");
            report.batch_errors += 1;
            metrics::counter!(BACKEND_BATCH_ERRORS_TOTAL).increment(1);
            continue;
        }
        write_with_retry(backend, key, records, report).await;
    }
}

async fn write_with_retry<B: StorageBackend>(
    backend: &mut B,
    key: PartitionKey,
    records: Vec<LogRecord>,
    report: &mut ConsumerReport,
) {
    let count = records.len();
    let mut attempt = 0u32;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match backend.write_batch(key, records.clone()).await {
            Ok(written) => {
                report.records_flushed += written as u64;
                return;
            }
            Err(BackendError::Transient(reason)) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    tracing::error!(
                        partition = %key,
                        count,
                        reason = %reason,
                        "backend write failed after {MAX_RETRIES} retries, batch dropped"
                    );
                    report.batch_errors += 1;
                    metrics::counter!(BACKEND_BATCH_ERRORS_TOTAL).increment(1);
                    return;
                }
                tracing::warn!(partition = %key, attempt, reason = %reason, "transient backend error, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => {
                tracing::error!(partition = %key, count, error = %err, "backend write failed fatally, batch dropped");
                report.batch_errors += 1;
                metrics::counter!(BACKEND_BATCH_ERRORS_TOTAL).increment(1);
                return;
            }
        }
    }
}
