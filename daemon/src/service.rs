//! Daemon wiring: the ingest socket, the bounded receive queue, and the
//! service lifecycle that ties the receive and encode stages together.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::{UdpSocket, UnixDatagram};
use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use dlt_relay::ingest::{pad_id, LogRecord, MAX_DATAGRAM_LEN};

use crate::config::{Config, NetworkConfig, SocketType};
use crate::error::DltRelayError;
use crate::forward::run_forward_task;

/// Upper bound on queued-but-not-yet-encoded records.
pub const QUEUE_MAX_RECORDS: usize = 512;

/// Counters shared between the receive and encode stages, surfaced in
/// debug logs.
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub malformed_drops: AtomicU64,
    pub level_drops: AtomicU64,
    pub encode_drops: AtomicU64,
    pub send_failures: AtomicU64,
    pub emitted: AtomicU64,
}

/// The one shared mutable resource of the daemon: received records
/// waiting for the encode stage, FIFO, behind a single mutex.
#[derive(Default)]
pub struct RecordQueue {
    records: Mutex<VecDeque<LogRecord>>,
    overflow_drops: AtomicU64,
}

impl RecordQueue {
    pub fn new() -> Self {
        RecordQueue::default()
    }

    /// Enqueue one record. A full queue drops the newest record rather
    /// than blocking the receive stage.
    pub async fn push(&self, record: LogRecord) -> bool {
        let mut records = self.records.lock().await;
        if records.len() >= QUEUE_MAX_RECORDS {
            drop(records);
            let dropped = self.overflow_drops.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("receive queue full, dropping record ({dropped} dropped so far)");
            return false;
        }
        records.push_back(record);
        true
    }

    /// Take every queued record at once, preserving FIFO order. The lock
    /// is held only for the move, never across encode or send.
    pub async fn drain_all(&self) -> Vec<LogRecord> {
        let mut records = self.records.lock().await;
        records.drain(..).collect()
    }

    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops.load(Ordering::Relaxed)
    }
}

/// Listening socket for ingest datagrams, unix or UDP/IPv4 per the
/// network configuration.
pub enum IngestSocket {
    Unix { socket: UnixDatagram, path: PathBuf },
    Udp(UdpSocket),
}

impl IngestSocket {
    pub async fn bind(network: &NetworkConfig) -> Result<Self, DltRelayError> {
        match network.socket_type {
            SocketType::Unix => {
                let path = PathBuf::from(&network.unix_socket.server_path);
                // a previous run may have left its socket file behind
                if path.exists() {
                    let _ = std::fs::remove_file(&path);
                }
                let socket = UnixDatagram::bind(&path).map_err(DltRelayError::BindFailed)?;
                Ok(IngestSocket::Unix { socket, path })
            }
            SocketType::Udpv4 => {
                let addr = format!(
                    "{}:{}",
                    network.udp_socket.server_address, network.udp_socket.server_port
                );
                let socket = UdpSocket::bind(&addr)
                    .await
                    .map_err(DltRelayError::BindFailed)?;
                Ok(IngestSocket::Udp(socket))
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            IngestSocket::Unix { socket, .. } => {
                let (len, _) = socket.recv_from(buf).await?;
                Ok(len)
            }
            IngestSocket::Udp(socket) => {
                let (len, _) = socket.recv_from(buf).await?;
                Ok(len)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            IngestSocket::Unix { path, .. } => path.display().to_string(),
            IngestSocket::Udp(socket) => socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "udp".to_string()),
        }
    }

    fn cleanup(&self) {
        if let IngestSocket::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Receive stage: read one datagram per readiness, parse it, enqueue it.
/// Malformed datagrams and read failures are dropped and counted; the
/// task keeps going until shutdown.
async fn run_receive_task(
    socket: IngestSocket,
    queue: Arc<RecordQueue>,
    stats: Arc<ServiceStats>,
    shutdown: CancellationToken,
) {
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    loop {
        let len = select! {
            _ = shutdown.cancelled() => break,
            res = socket.recv(&mut buf) => match res {
                Ok(len) => len,
                Err(e) => {
                    debug!("ingest socket read failed: {e}");
                    continue;
                }
            },
        };
        match LogRecord::parse(&buf[..len]) {
            Ok(record) => {
                queue.push(record).await;
            }
            Err(e) => {
                stats.malformed_drops.fetch_add(1, Ordering::Relaxed);
                debug!("dropping malformed ingest datagram ({len} octets): {e}");
            }
        }
    }
    socket.cleanup();
}

pub struct DltService {
    config: Config,
    ecu_id: [u8; 4],
    queue: Arc<RecordQueue>,
    stats: Arc<ServiceStats>,
    ingest_socket: IngestSocket,
    storage_socket: UdpSocket,
}

impl DltService {
    /// Bind the sockets and materialize the ECU id. Fails fast on a bad
    /// configuration or an unbindable socket.
    pub async fn new(config: Config) -> Result<Self, DltRelayError> {
        config.validate()?;
        let ecu_id = pad_id(&config.htype_ecu_id);
        let ingest_socket = IngestSocket::bind(&config.network).await?;
        info!("listening for log records on {}", ingest_socket.describe());
        let storage_socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(DltRelayError::BindFailed)?;
        info!(
            "forwarding frames to {}:{}",
            config.network.storage_server.server_address,
            config.network.storage_server.server_port
        );
        Ok(DltService {
            config,
            ecu_id,
            queue: Arc::new(RecordQueue::new()),
            stats: Arc::new(ServiceStats::default()),
            ingest_socket,
            storage_socket,
        })
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        self.stats.clone()
    }

    /// Run the receive and encode stages until the token is cancelled,
    /// then wait for both to wind down. The unix socket path is unlinked
    /// by the receive stage on its way out.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DltRelayError> {
        let DltService {
            config,
            ecu_id,
            queue,
            stats,
            ingest_socket,
            storage_socket,
        } = self;
        let tracker = TaskTracker::new();
        tracker.spawn(run_receive_task(
            ingest_socket,
            queue.clone(),
            stats.clone(),
            shutdown.clone(),
        ));
        tracker.spawn(run_forward_task(
            config,
            ecu_id,
            queue,
            stats,
            storage_socket,
            shutdown,
        ));
        tracker.close();
        tracker.wait().await;
        info!("dlt service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dlt_relay::ingest::LogLevel;

    fn record(n: u16) -> LogRecord {
        LogRecord::new(
            LogLevel::Info,
            "APP1",
            "CTX1",
            *b"SESS",
            n.to_be_bytes().to_vec(),
        )
    }

    #[tokio::test]
    async fn test_queue_preserves_fifo_order() {
        let queue = RecordQueue::new();
        for n in 0..5 {
            assert!(queue.push(record(n)).await);
        }
        let drained = queue.drain_all().await;
        let order: Vec<u16> = drained
            .iter()
            .map(|r| u16::from_be_bytes([r.payload[0], r.payload[1]]))
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(queue.drain_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_drops_newest_on_overflow() {
        let queue = RecordQueue::new();
        for n in 0..QUEUE_MAX_RECORDS {
            assert!(queue.push(record(n as u16)).await);
        }
        let overflowing =
            LogRecord::new(LogLevel::Info, "APP1", "CTX1", *b"SESS", b"overflow".to_vec());
        assert!(!queue.push(overflowing).await);
        assert_eq!(queue.overflow_drops(), 1);
        let drained = queue.drain_all().await;
        assert_eq!(drained.len(), QUEUE_MAX_RECORDS);
        // the overflowing record is gone, the old ones survived
        assert!(drained.iter().all(|r| r.payload != b"overflow"));
    }
}
