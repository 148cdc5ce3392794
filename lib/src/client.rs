//! Application-side logging handle.
//!
//! A [`DltClient`] owns an ephemeral datagram socket and ships one ingest
//! datagram per log call to the daemon. The logging path never returns an
//! error to the application: send failures are swallowed and counted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use deku::DekuContainerWrite;
use log::debug;
use thiserror::Error;
use tokio::net::UnixDatagram;

use crate::ingest::{pad_id, LogLevel, LogRecord, MAX_DATAGRAM_LEN, RECORD_PREFIX_LEN};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to bind client socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct DltClient {
    socket: UnixDatagram,
    server_path: PathBuf,
    client_path: PathBuf,
    session_id: [u8; 4],
    send_failures: AtomicU64,
}

impl DltClient {
    /// Bind an ephemeral client socket and record the daemon's address
    /// and this process's session id. Must be called from within a tokio
    /// runtime.
    pub fn connect(server_path: impl AsRef<Path>, session_id: &str) -> Result<Self, ClientError> {
        let client_path =
            std::env::temp_dir().join(format!("dlt_client_{}.sock", rand::random::<u32>()));
        let socket = UnixDatagram::bind(&client_path).map_err(|source| ClientError::BindFailed {
            path: client_path.clone(),
            source,
        })?;
        Ok(DltClient {
            socket,
            server_path: server_path.as_ref().to_path_buf(),
            client_path,
            session_id: pad_id(session_id),
            send_failures: AtomicU64::new(0),
        })
    }

    pub async fn info(&self, app_id: &str, ctx_id: &str, message: &str) {
        self.log(LogLevel::Info, app_id, ctx_id, message).await;
    }

    pub async fn verbose(&self, app_id: &str, ctx_id: &str, message: &str) {
        self.log(LogLevel::Verbose, app_id, ctx_id, message).await;
    }

    pub async fn warning(&self, app_id: &str, ctx_id: &str, message: &str) {
        self.log(LogLevel::Warning, app_id, ctx_id, message).await;
    }

    pub async fn error(&self, app_id: &str, ctx_id: &str, message: &str) {
        self.log(LogLevel::Error, app_id, ctx_id, message).await;
    }

    pub async fn fatal(&self, app_id: &str, ctx_id: &str, message: &str) {
        self.log(LogLevel::Fatal, app_id, ctx_id, message).await;
    }

    async fn log(&self, level: LogLevel, app_id: &str, ctx_id: &str, message: &str) {
        let mut payload = message.as_bytes();
        if payload.len() > MAX_DATAGRAM_LEN - RECORD_PREFIX_LEN {
            payload = &payload[..MAX_DATAGRAM_LEN - RECORD_PREFIX_LEN];
        }
        let record = LogRecord::new(level, app_id, ctx_id, self.session_id, payload.to_vec());
        let datagram = match record.to_bytes() {
            Ok(datagram) => datagram,
            Err(e) => {
                debug!("failed to serialize log record: {e}");
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&datagram, &self.server_path).await {
            debug!(
                "failed to send log record to {}: {e}",
                self.server_path.display()
            );
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of log calls that never reached the daemon.
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn client_path(&self) -> &Path {
        &self.client_path
    }
}

impl Drop for DltClient {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.client_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind_server(dir: &tempfile::TempDir) -> (UnixDatagram, PathBuf) {
        let path = dir.path().join("dlt.sock");
        (UnixDatagram::bind(&path).unwrap(), path)
    }

    #[tokio::test]
    async fn test_client_sends_one_datagram_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let (server, server_path) = bind_server(&dir);
        let client = DltClient::connect(&server_path, "SESS").unwrap();

        client.warning("APP1", "CTX1", "low on coolant").await;

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        let record = LogRecord::parse(&buf[..len]).unwrap();
        assert_eq!(record.app_id, *b"APP1");
        assert_eq!(record.ctx_id, *b"CTX1");
        assert_eq!(record.session_id, *b"SESS");
        assert_eq!(record.level(), Some(LogLevel::Warning));
        assert_eq!(record.payload, b"low on coolant");
        assert_eq!(client.send_failures(), 0);
    }

    #[tokio::test]
    async fn test_client_truncates_oversized_messages() {
        let dir = tempfile::tempdir().unwrap();
        let (server, server_path) = bind_server(&dir);
        let client = DltClient::connect(&server_path, "SESS").unwrap();

        let message = "x".repeat(MAX_DATAGRAM_LEN);
        client.info("APP1", "CTX1", &message).await;

        let mut buf = [0u8; MAX_DATAGRAM_LEN + 64];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, MAX_DATAGRAM_LEN);
        let record = LogRecord::parse(&buf[..len]).unwrap();
        assert_eq!(record.payload.len(), MAX_DATAGRAM_LEN - RECORD_PREFIX_LEN);
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nobody-home.sock");
        let client = DltClient::connect(&missing, "SESS").unwrap();
        client.error("APP1", "CTX1", "into the void").await;
        assert_eq!(client.send_failures(), 1);
    }

    #[tokio::test]
    async fn test_client_socket_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, server_path) = bind_server(&dir);
        let client = DltClient::connect(&server_path, "SESS").unwrap();
        let client_path = client.client_path().to_path_buf();
        assert!(client_path.exists());
        drop(client);
        assert!(!client_path.exists());
    }
}
