//! UDP Receiver (§4.4) — binds the syslog socket, parses each datagram,
//! and submits the result to the batcher without ever awaiting it.

use std::net::SocketAddr;

use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use syslogd_core::metrics::{PARSER_ERRORS_TOTAL, PARSER_PARSED_TOTAL, RECEIVER_DATAGRAMS_TOTAL};

use crate::batcher::BatcherHandle;
use crate::error::IngestError;
use crate::parser::{self, MAX_DATAGRAM_SIZE};

/// Desired `SO_RCVBUF` size requested from the OS on bind (§4.4: "set to
/// the OS maximum it will grant"). The kernel silently clamps to its own
/// ceiling (e.g. `net.core.rmem_max`), so this is a request, not a guarantee.
const REQUESTED_RECV_BUFFER_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub bind_addr: SocketAddr,
}

/// Binds a UDP socket with the largest receive buffer the kernel will
/// grant, matching [`collector::syslog_udp::SyslogUdpCollector`]'s
/// bind-then-loop shape but adding the SO_RCVBUF tuning step.
fn bind_tuned_socket(addr: SocketAddr) -> Result<UdpSocket, IngestError> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| {
        IngestError::BindFailed {
            addr: addr.to_string(),
            reason: format!("socket() failed: {e}"),
        }
    })?;
    socket.set_nonblocking(true).map_err(|e| IngestError::BindFailed {
        addr: addr.to_string(),
        reason: format!("set_nonblocking failed: {e}"),
    })?;
    if let Err(e) = socket.set_recv_buffer_size(REQUESTED_RECV_BUFFER_BYTES) {
        warn!(requested = REQUESTED_RECV_BUFFER_BYTES, error = %e, "failed to raise SO_RCVBUF, continuing with OS default");
    }
    socket.bind(&addr.into()).map_err(|e| IngestError::BindFailed {
        addr: addr.to_string(),
        reason: format!("bind() failed: {e}"),
    })?;
    let actual = socket.recv_buffer_size().unwrap_or(0);
    debug!(requested = REQUESTED_RECV_BUFFER_BYTES, actual, "SO_RCVBUF negotiated");
    UdpSocket::from_std(socket.into()).map_err(|e| IngestError::BindFailed {
        addr: addr.to_string(),
        reason: format!("failed to hand socket to tokio: {e}"),
    })
}

/// Runs the receive loop until `cancel` fires. The receiver never awaits
/// the batcher — [`BatcherHandle::submit`] is a non-blocking `try_send`,
/// so a slow or stalled backend cannot cause datagram loss at the kernel
/// socket buffer beyond what SO_RCVBUF already absorbs (§5).
pub async fn run(
    config: ReceiverConfig,
    batcher: BatcherHandle,
    cancel: CancellationToken,
) -> Result<(), IngestError> {
    let socket = bind_tuned_socket(config.bind_addr)?;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("receiver stopping on cancellation");
                return Ok(());
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, sender)) => {
                        metrics::counter!(RECEIVER_DATAGRAMS_TOTAL).increment(1);
                        let received_at = Utc::now();
                        match parser::parse(&buf[..len], sender.ip(), received_at) {
                            Ok(record) => {
                                metrics::counter!(PARSER_PARSED_TOTAL).increment(1);
                                if batcher.submit(record).is_err() {
                                    debug!(sender = %sender, "batcher queue full, record dropped");
                                }
                            }
                            Err(err) => {
                                metrics::counter!(PARSER_ERRORS_TOTAL).increment(1);
                                debug!(sender = %sender, error = %err, "failed to parse datagram, dropped");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "UDP recv error, continuing");
                    }
                }
            }
        }
    }
}
