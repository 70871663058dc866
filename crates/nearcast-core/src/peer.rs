//! A single peer connection: one TCP socket, a background reader, and a
//! serialized writer.
//!
//! Grounded on `original_source/connection_manager.py::PeerConnection`
//! (reader loop, write lock, disconnect hook) with the actual byte-level
//! read/write mechanics taken from the frame codec's async helpers. The
//! connection manager owns the peer table; each `PeerConnection` exclusively
//! owns its socket and its reader task, per the ownership rule in §3 of the
//! design.

use crate::framing::{self, FrameError, FrameKind};
use crate::types::DeviceId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// A demultiplexed, still-undecoded frame payload handed up to the
/// connection manager for interpretation.
#[derive(Debug, Clone)]
pub enum PeerFrame {
    Json(Vec<u8>),
    Binary(Vec<u8>),
}

/// One event a peer's reader task reports to the connection manager.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Frame { device_id: DeviceId, frame: PeerFrame },
    Disconnected { device_id: DeviceId },
}

/// A single TCP connection to a remote device.
///
/// Holds the metadata a peer-table record needs (remote name, platform,
/// dial direction) alongside the write-exclusion primitive and reader
/// lifecycle.
pub struct PeerConnection {
    device_id: DeviceId,
    device_name: String,
    platform: String,
    is_outbound: bool,
    write_half: Mutex<OwnedWriteHalf>,
    running: AtomicBool,
}

impl PeerConnection {
    /// Takes ownership of `socket`, splits it into independent read/write
    /// halves, and spawns the dedicated reader task described in §4.6: read
    /// length prefix, reject oversize frames, read the exact payload,
    /// classify, and forward to `events_tx`. A clean or erroring close
    /// sends `Disconnected` and ends the task.
    pub fn spawn(
        socket: TcpStream,
        device_id: DeviceId,
        device_name: String,
        platform: String,
        is_outbound: bool,
        events_tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Arc<Self> {
        let (read_half, write_half) = socket.into_split();
        let conn = Arc::new(Self {
            device_id: device_id.clone(),
            device_name,
            platform,
            is_outbound,
            write_half: Mutex::new(write_half),
            running: AtomicBool::new(true),
        });

        let reader_conn = conn.clone();
        tokio::spawn(async move {
            reader_conn.run_reader(read_half, events_tx).await;
        });

        conn
    }

    async fn run_reader(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        events_tx: mpsc::UnboundedSender<PeerEvent>,
    ) {
        loop {
            let payload = match framing::read_frame(&mut read_half).await {
                Ok(payload) => payload,
                Err(FrameError::ConnectionClosed) => {
                    debug!(device_id = %self.device_id, "peer closed connection");
                    break;
                }
                Err(err) => {
                    warn!(device_id = %self.device_id, error = %err, "fatal framing error, closing connection");
                    break;
                }
            };

            if payload.is_empty() {
                continue;
            }

            let frame = match framing::classify(&payload) {
                Ok(FrameKind::Json) => PeerFrame::Json(payload),
                Ok(FrameKind::Binary) => PeerFrame::Binary(payload),
                Err(err) => {
                    warn!(device_id = %self.device_id, error = %err, "unrecognized frame, closing connection");
                    break;
                }
            };

            if events_tx
                .send(PeerEvent::Frame { device_id: self.device_id.clone(), frame })
                .is_err()
            {
                break;
            }
        }

        self.close().await;
        let _ = events_tx.send(PeerEvent::Disconnected { device_id: self.device_id.clone() });
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn is_outbound(&self) -> bool {
        self.is_outbound
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sends one fully-framed payload, holding the write-exclusion
    /// primitive across the whole write so two concurrent senders never
    /// interleave frame bytes on the wire.
    pub async fn send(&self, payload: &[u8]) -> Result<(), FrameError> {
        let mut write_half = self.write_half.lock().await;
        framing::write_frame(&mut *write_half, payload).await
    }

    /// Idempotent, best-effort close: shuts down the write half and marks
    /// the connection no longer running. OS-level shutdown errors (the
    /// socket may already be gone) are swallowed.
    pub async fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            use tokio::io::AsyncWriteExt;
            let mut write_half = self.write_half.lock().await;
            let _ = write_half.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn dispatches_json_frame_to_events_channel() {
        let (client, server) = connected_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = PeerConnection::spawn(
            server,
            DeviceId::new("peer-a"),
            "Peer A".to_string(),
            "linux".to_string(),
            false,
            tx,
        );
        assert!(conn.is_running());

        let mut client = client;
        framing::write_frame(&mut client, br#"{"type":"handshake"}"#).await.unwrap();

        let event = rx.recv().await.unwrap();
        match event {
            PeerEvent::Frame { device_id, frame: PeerFrame::Json(bytes) } => {
                assert_eq!(device_id.as_str(), "peer-a");
                assert_eq!(bytes, br#"{"type":"handshake"}"#);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_on_clean_close_is_reported() {
        let (client, server) = connected_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _conn = PeerConnection::spawn(
            server,
            DeviceId::new("peer-b"),
            "Peer B".to_string(),
            "linux".to_string(),
            true,
            tx,
        );
        drop(client);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PeerEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_client, server) = connected_pair().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = PeerConnection::spawn(
            server,
            DeviceId::new("peer-c"),
            "Peer C".to_string(),
            "linux".to_string(),
            true,
            tx,
        );
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_running());
    }
}
