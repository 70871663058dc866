//! The connection manager: peer table, dispatch table, group coordination,
//! and file-receiver sessions.
//!
//! Grounded on `original_source/connection_manager.py::ConnectionManager`
//! (dispatch table, master election, group relay), restructured so the
//! peer table and file-receiver table live behind `tokio::sync::Mutex`es
//! instead of relying on interpreter atomicity, and so peer I/O runs on
//! dedicated tasks (`peer.rs`) that feed a single event loop here instead
//! of calling back directly into handler methods.

use crate::binary::{self, BinaryProtocolError, ChunkFrame, FRAME_TYPE_CHUNK, FRAME_TYPE_META};
use crate::envelope::{self, Envelope, EnvelopeError, Payload};
use crate::events::PeerEvents;
use crate::file_receiver::{FileReceiver, FileReceiverError};
use crate::file_sender::{FileSender, FileSenderError};
use crate::framing::{self, FrameError};
use crate::peer::{PeerConnection, PeerEvent, PeerFrame};
use crate::store::{ChatStore, GroupRecord, GroupUpdate, StoreError};
use crate::types::{DeviceId, FileId, GroupId, MessageId, Timestamp};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Connect timeout for outbound dials.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("dial to {addr} timed out after 5 seconds")]
    DialTimeout { addr: SocketAddr },

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: std::io::Error },

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("peer's first frame was not a handshake")]
    ExpectedHandshake,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("unknown group {0}")]
    UnknownGroup(GroupId),

    #[error("binary protocol error: {0}")]
    Binary(#[from] BinaryProtocolError),

    #[error("file receiver error: {0}")]
    FileReceiver(#[from] FileReceiverError),

    #[error("file sender error: {0}")]
    FileSender(#[from] FileSenderError),

    #[error("no open connection to peer {0}")]
    PeerNotConnected(DeviceId),
}

/// Owns the peer table, the file-receiver-session table, and the server
/// socket's accepted connections. One instance per running daemon.
pub struct ConnectionManager {
    device_id: DeviceId,
    device_name: String,
    platform: String,
    data_dir: PathBuf,
    store: Arc<dyn ChatStore>,
    events: Arc<dyn PeerEvents>,
    peers: Mutex<HashMap<DeviceId, Arc<PeerConnection>>>,
    receivers: Mutex<HashMap<FileId, FileReceiver>>,
    peer_events_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl ConnectionManager {
    /// Builds a manager and spawns its internal event-dispatch loop. The
    /// returned `Arc` is the handle every other task (acceptor, dialer,
    /// caller driver) shares.
    pub fn new(
        device_id: DeviceId,
        device_name: String,
        platform: String,
        data_dir: PathBuf,
        store: Arc<dyn ChatStore>,
        events: Arc<dyn PeerEvents>,
    ) -> Arc<Self> {
        let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            device_id,
            device_name,
            platform,
            data_dir,
            store,
            events,
            peers: Mutex::new(HashMap::new()),
            receivers: Mutex::new(HashMap::new()),
            peer_events_tx,
        });

        let dispatcher = manager.clone();
        tokio::spawn(async move {
            dispatcher.run_event_loop(peer_events_rx).await;
        });

        manager
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Snapshot of the peer table: `(device_id, device_name, platform, is_outbound)`.
    pub async fn connected_peers(&self) -> Vec<(DeviceId, String, String, bool)> {
        self.peers
            .lock()
            .await
            .values()
            .map(|c| (c.device_id().clone(), c.device_name().to_string(), c.platform().to_string(), c.is_outbound()))
            .collect()
    }

    // -- event loop -----------------------------------------------------

    async fn run_event_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                PeerEvent::Frame { device_id, frame } => {
                    if let Err(err) = self.handle_frame(&device_id, frame).await {
                        warn!(%device_id, error = %err, "error handling peer frame; connection continues");
                    }
                }
                PeerEvent::Disconnected { device_id } => {
                    self.peers.lock().await.remove(&device_id);
                    self.events.on_peer_disconnected(&device_id);
                }
            }
        }
    }

    async fn handle_frame(&self, device_id: &DeviceId, frame: PeerFrame) -> Result<(), ManagerError> {
        match frame {
            PeerFrame::Json(bytes) => {
                let envelope = envelope::decode(&bytes)?;
                self.handle_envelope(device_id, envelope).await
            }
            PeerFrame::Binary(bytes) => self.handle_binary(device_id, &bytes).await,
        }
    }

    async fn handle_binary(&self, device_id: &DeviceId, bytes: &[u8]) -> Result<(), ManagerError> {
        let Some(&frame_type) = bytes.get(3) else {
            return Ok(());
        };
        match frame_type {
            FRAME_TYPE_META => {
                let meta = binary::decode_meta(bytes)?;
                let receiver = FileReceiver::create(&self.data_dir, meta.file_id, &meta.filename, meta.size).await?;
                self.receivers.lock().await.insert(meta.file_id, receiver);
            }
            FRAME_TYPE_CHUNK => {
                let chunk = binary::decode_chunk(bytes)?;
                self.write_chunk(device_id, chunk).await?;
            }
            other => {
                warn!(kind = other, "ignoring binary frame of unrecognized type");
            }
        }
        Ok(())
    }

    async fn write_chunk(&self, device_id: &DeviceId, chunk: ChunkFrame) -> Result<(), ManagerError> {
        let mut receivers = self.receivers.lock().await;
        let Some(receiver) = receivers.get_mut(&chunk.file_id) else {
            return Ok(()); // unknown file_id: dropped silently, per spec
        };
        let complete = receiver.write_chunk(&chunk).await?;
        if complete {
            let receiver = receivers.remove(&chunk.file_id).expect("just looked up");
            drop(receivers);
            let path = receiver.finish().await?;
            self.events.on_file(device_id, &path);
        }
        Ok(())
    }

    async fn handle_envelope(&self, device_id: &DeviceId, envelope: Envelope) -> Result<(), ManagerError> {
        match envelope.payload {
            Payload::Handshake => {
                // Re-handshake arrives as a brand new connection, handled by
                // `register_peer`; a handshake frame on an already-registered
                // connection is a protocol no-op.
            }
            Payload::Message { text, .. } => {
                self.events.on_text(device_id, &text);
                self.store.append_direct(
                    device_id,
                    &json!({ "from_id": device_id.as_str(), "text": text, "timestamp": envelope.timestamp.as_secs() }),
                )?;
            }
            Payload::FileMeta { file_id, filename, size } => {
                let file_id = FileId::from_legacy_string(&file_id);
                let receiver = FileReceiver::create(&self.data_dir, file_id, &filename, size).await?;
                self.receivers.lock().await.insert(file_id, receiver);
            }
            Payload::FileChunk { file_id, data, chunk_index } => {
                let file_id = FileId::from_legacy_string(&file_id);
                let chunk = ChunkFrame { file_id, chunk_index: chunk_index.unwrap_or(0), data };
                self.write_chunk(device_id, chunk).await?;
            }
            Payload::GroupInvite { group_id, name, inviter_id, .. } => {
                self.events.on_group_invite(&group_id, &name, &inviter_id);
            }
            Payload::GroupJoin { group_id, from_id, .. } => {
                self.handle_group_join(&group_id, &from_id).await?;
            }
            Payload::GroupJoinAck { group_id, name, members, master_id, epoch } => {
                self.store.upsert_group(&group_id, GroupRecord { name, members, master_id, epoch })?;
            }
            Payload::GroupJoinReject { group_id, from_id } => {
                self.events.on_group_notice(&group_id, &format!("{from_id} rejected the invite"));
            }
            Payload::GroupMaster { group_id, name, members, master_id, epoch } => {
                self.store.upsert_group(&group_id, GroupRecord { name, members, master_id, epoch })?;
            }
            Payload::GroupMessage { group_id, message_id, text, from_id } => {
                self.store.append_group(
                    &group_id,
                    &json!({ "message_id": message_id.as_str(), "from_id": from_id.as_str(), "text": text }),
                )?;
                self.events.on_group(&group_id, &from_id, &text);
                if let Some(record) = self.store.get_group(&group_id)? {
                    if record.master_id == self.device_id {
                        self.relay_group_message(&group_id, &record, &message_id, &text, &from_id, Some(device_id))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    // -- group join (master side) ----------------------------------------

    async fn handle_group_join(&self, group_id: &GroupId, from_id: &DeviceId) -> Result<(), ManagerError> {
        let Some(mut record) = self.store.get_group(group_id)? else {
            return Ok(()); // semantic error: join without a known group; ignored
        };
        if record.master_id != self.device_id {
            return Ok(()); // semantic error: join received by a non-master; ignored
        }

        if !record.members.contains(from_id) {
            record.members.push(from_id.clone());
            record.members.sort();
            record.members.dedup();
            self.store.update_group(
                group_id,
                GroupUpdate { members: Some(record.members.clone()), ..Default::default() },
            )?;
        }

        let ack = self.build_envelope(Payload::GroupJoinAck {
            group_id: group_id.clone(),
            name: record.name.clone(),
            members: record.members.clone(),
            master_id: record.master_id.clone(),
            epoch: record.epoch,
        });
        self.send_to(from_id, &ack).await?;
        self.broadcast_group_master(group_id, &record).await?;
        Ok(())
    }

    // -- outward-facing group API -----------------------------------------

    /// Creates a group mastered by this device. Membership is not
    /// announced until peers are invited via [`Self::invite_to_group`].
    pub fn create_group(&self, name: &str, members: Vec<DeviceId>) -> Result<GroupId, ManagerError> {
        let mut all_members = members;
        all_members.push(self.device_id.clone());
        Ok(self.store.create_group(name, all_members, self.device_id.clone())?)
    }

    pub async fn invite_to_group(&self, group_id: &GroupId, invitee: &DeviceId) -> Result<(), ManagerError> {
        let Some(record) = self.store.get_group(group_id)? else {
            return Err(ManagerError::UnknownGroup(group_id.clone()));
        };
        let envelope = self.build_envelope(Payload::GroupInvite {
            group_id: group_id.clone(),
            name: record.name,
            master_id: record.master_id,
            inviter_id: self.device_id.clone(),
        });
        self.send_to(invitee, &envelope).await
    }

    /// Accepts an invite: records provisional local group state and sends
    /// `group_join` to the inviting master.
    pub async fn accept_group_invite(&self, group_id: &GroupId, name: &str, master_id: &DeviceId) -> Result<(), ManagerError> {
        self.store.upsert_group(
            group_id,
            GroupRecord {
                name: name.to_string(),
                members: vec![self.device_id.clone(), master_id.clone()],
                master_id: master_id.clone(),
                epoch: Timestamp::now(),
            },
        )?;
        let envelope = self.build_envelope(Payload::GroupJoin {
            group_id: group_id.clone(),
            name: name.to_string(),
            from_id: self.device_id.clone(),
        });
        self.send_to(master_id, &envelope).await
    }

    pub async fn reject_group_invite(&self, group_id: &GroupId, master_id: &DeviceId) -> Result<(), ManagerError> {
        let envelope = self.build_envelope(Payload::GroupJoinReject { group_id: group_id.clone(), from_id: self.device_id.clone() });
        self.send_to(master_id, &envelope).await
    }

    /// Sends a group message, electing a new master first if the current
    /// one is no longer active. See spec §4.7 "Send group message".
    pub async fn send_group_message(&self, group_id: &GroupId, text: &str) -> Result<(), ManagerError> {
        let Some(mut record) = self.store.get_group(group_id)? else {
            return Err(ManagerError::UnknownGroup(group_id.clone()));
        };

        let connected: Vec<DeviceId> = self.peers.lock().await.keys().cloned().collect();
        let mut active: Vec<DeviceId> = record
            .members
            .iter()
            .filter(|m| **m == self.device_id || connected.contains(m))
            .cloned()
            .collect();
        active.push(self.device_id.clone());
        active.sort();
        active.dedup();

        if !active.contains(&record.master_id) {
            let new_master = active.iter().min().cloned().expect("active always contains self");
            record.master_id = new_master;
            record.epoch = Timestamp::now();
            self.store.update_group(
                group_id,
                GroupUpdate { master_id: Some(record.master_id.clone()), epoch: Some(record.epoch), ..Default::default() },
            )?;
            info!(%group_id, new_master = %record.master_id, "re-elected group master");
            if record.master_id == self.device_id {
                self.broadcast_group_master(group_id, &record).await?;
            }
        }

        let message_id = MessageId::generate(&self.device_id, Timestamp::now());
        if record.master_id == self.device_id {
            self.store.append_group(
                group_id,
                &json!({ "message_id": message_id.as_str(), "from_id": self.device_id.as_str(), "text": text }),
            )?;
            self.events.on_group(group_id, &self.device_id, text);
            self.relay_group_message(group_id, &record, &message_id, text, &self.device_id, None).await?;
        } else {
            let envelope = self.build_envelope(Payload::GroupMessage {
                group_id: group_id.clone(),
                message_id,
                text: text.to_string(),
                from_id: self.device_id.clone(),
            });
            self.send_to(&record.master_id, &envelope).await?;
        }
        Ok(())
    }

    async fn relay_group_message(
        &self,
        group_id: &GroupId,
        record: &GroupRecord,
        message_id: &MessageId,
        text: &str,
        from_id: &DeviceId,
        exclude: Option<&DeviceId>,
    ) -> Result<(), ManagerError> {
        let envelope = self.build_envelope(Payload::GroupMessage {
            group_id: group_id.clone(),
            message_id: message_id.clone(),
            text: text.to_string(),
            from_id: from_id.clone(),
        });
        let bytes = envelope::encode(&envelope)?;
        let peers = self.peers.lock().await;
        for member in &record.members {
            if member == &self.device_id {
                continue;
            }
            if exclude == Some(member) {
                continue;
            }
            if let Some(conn) = peers.get(member) {
                let _ = conn.send(&bytes).await;
            }
        }
        Ok(())
    }

    async fn broadcast_group_master(&self, group_id: &GroupId, record: &GroupRecord) -> Result<(), ManagerError> {
        let envelope = self.build_envelope(Payload::GroupMaster {
            group_id: group_id.clone(),
            name: record.name.clone(),
            members: record.members.clone(),
            master_id: record.master_id.clone(),
            epoch: record.epoch,
        });
        let bytes = envelope::encode(&envelope)?;
        let peers = self.peers.lock().await;
        for member in &record.members {
            if member == &self.device_id {
                continue;
            }
            if let Some(conn) = peers.get(member) {
                let _ = conn.send(&bytes).await;
            }
        }
        Ok(())
    }

    // -- direct messages / files -------------------------------------------

    pub async fn send_text(&self, peer_id: &DeviceId, text: &str) -> Result<(), ManagerError> {
        let message_id = MessageId::generate(&self.device_id, Timestamp::now());
        let envelope = self.build_envelope(Payload::Message { message_id: message_id.clone(), text: text.to_string() });
        self.send_to(peer_id, &envelope).await?;
        self.store.append_direct(
            peer_id,
            &json!({ "message_id": message_id.as_str(), "from_id": self.device_id.as_str(), "text": text }),
        )?;
        Ok(())
    }

    /// Drives a [`FileSender`] over the binary sub-protocol: one meta
    /// frame, then chunks until EOF, each sent as its own framed message.
    pub async fn send_file(&self, peer_id: &DeviceId, path: &Path) -> Result<(), ManagerError> {
        let mut sender = FileSender::open(path).await?;
        self.send_binary_to(peer_id, &sender.meta_frame()?).await?;
        while let Some(chunk) = sender.next_chunk().await? {
            self.send_binary_to(peer_id, &chunk).await?;
        }
        Ok(())
    }

    async fn send_binary_to(&self, peer_id: &DeviceId, payload: &[u8]) -> Result<(), ManagerError> {
        let peers = self.peers.lock().await;
        let conn = peers.get(peer_id).ok_or_else(|| ManagerError::PeerNotConnected(peer_id.clone()))?;
        conn.send(payload).await?;
        Ok(())
    }

    async fn send_to(&self, peer_id: &DeviceId, envelope: &Envelope) -> Result<(), ManagerError> {
        let bytes = envelope::encode(envelope)?;
        self.send_binary_to(peer_id, &bytes).await
    }

    fn build_envelope(&self, payload: Payload) -> Envelope {
        Envelope {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            platform: self.platform.clone(),
            timestamp: Timestamp::now(),
            payload,
        }
    }

    // -- connection lifecycle ---------------------------------------------

    /// Spawns the TCP accept loop: each inbound connection is handshaken
    /// on its own task so a slow or hostile dialer can't stall others.
    pub fn spawn_acceptor(self: &Arc<Self>, listener: TcpListener) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let (socket, addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Err(err) = manager.accept_inbound(socket).await {
                        warn!(%addr, error = %err, "inbound handshake failed");
                    }
                });
            }
        })
    }

    async fn accept_inbound(self: &Arc<Self>, mut socket: TcpStream) -> Result<(), ManagerError> {
        let payload = framing::read_frame(&mut socket).await?;
        let envelope = envelope::decode(&payload)?;
        if !matches!(envelope.payload, Payload::Handshake) {
            return Err(ManagerError::ExpectedHandshake);
        }

        let reply = self.build_envelope(Payload::Handshake);
        framing::write_frame(&mut socket, &envelope::encode(&reply)?).await?;

        self.register_peer(socket, envelope.device_id, envelope.device_name, envelope.platform, false).await;
        Ok(())
    }

    /// Dials `addr` with a 5-second connect timeout, exchanges handshakes,
    /// and registers the resulting peer.
    pub async fn dial(self: &Arc<Self>, addr: SocketAddr) -> Result<(), ManagerError> {
        let mut socket = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ManagerError::DialTimeout { addr })?
            .map_err(|source| ManagerError::Connect { addr, source })?;

        let handshake = self.build_envelope(Payload::Handshake);
        framing::write_frame(&mut socket, &envelope::encode(&handshake)?).await?;

        let payload = framing::read_frame(&mut socket).await?;
        let envelope = envelope::decode(&payload)?;
        if !matches!(envelope.payload, Payload::Handshake) {
            return Err(ManagerError::ExpectedHandshake);
        }

        self.register_peer(socket, envelope.device_id, envelope.device_name, envelope.platform, true).await;
        Ok(())
    }

    async fn register_peer(
        self: &Arc<Self>,
        socket: TcpStream,
        device_id: DeviceId,
        device_name: String,
        platform: String,
        is_outbound: bool,
    ) {
        {
            let mut peers = self.peers.lock().await;
            if let Some(old) = peers.remove(&device_id) {
                old.close().await;
            }
            let conn = PeerConnection::spawn(
                socket,
                device_id.clone(),
                device_name.clone(),
                platform,
                is_outbound,
                self.peer_events_tx.clone(),
            );
            peers.insert(device_id.clone(), conn);
        }

        self.events.on_peer_connected(&device_id, &device_name);
        if let Err(err) = self.push_group_state(&device_id).await {
            warn!(%device_id, error = %err, "failed to push group state after handshake");
        }
    }

    async fn push_group_state(&self, peer_id: &DeviceId) -> Result<(), ManagerError> {
        for (group_id, record) in self.store.get_groups()? {
            if record.master_id != self.device_id || !record.members.contains(peer_id) {
                continue;
            }
            let envelope = self.build_envelope(Payload::GroupMaster {
                group_id: group_id.clone(),
                name: record.name.clone(),
                members: record.members.clone(),
                master_id: record.master_id.clone(),
                epoch: record.epoch,
            });
            self.send_to(peer_id, &envelope).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileChatStore;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingEvents {
        connected: StdMutex<Vec<DeviceId>>,
        disconnected: StdMutex<Vec<DeviceId>>,
        texts: StdMutex<Vec<(DeviceId, String)>>,
        groups: StdMutex<Vec<(GroupId, DeviceId, String)>>,
        files: StdMutex<Vec<(DeviceId, PathBuf)>>,
    }

    impl PeerEvents for RecordingEvents {
        fn on_text(&self, device_id: &DeviceId, text: &str) {
            self.texts.lock().unwrap().push((device_id.clone(), text.to_string()));
        }
        fn on_file(&self, device_id: &DeviceId, path: &PathBuf) {
            self.files.lock().unwrap().push((device_id.clone(), path.clone()));
        }
        fn on_group(&self, group_id: &GroupId, from_id: &DeviceId, text: &str) {
            self.groups.lock().unwrap().push((group_id.clone(), from_id.clone(), text.to_string()));
        }
        fn on_peer_connected(&self, device_id: &DeviceId, _device_name: &str) {
            self.connected.lock().unwrap().push(device_id.clone());
        }
        fn on_peer_disconnected(&self, device_id: &DeviceId) {
            self.disconnected.lock().unwrap().push(device_id.clone());
        }
    }

    async fn spawn_test_manager(device_id: &str) -> (Arc<ConnectionManager>, Arc<RecordingEvents>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileChatStore::open(tmp.path()).unwrap());
        let events = Arc::new(RecordingEvents::default());
        let manager = ConnectionManager::new(
            DeviceId::new(device_id),
            format!("device-{device_id}"),
            "linux".to_string(),
            tmp.path().to_path_buf(),
            store,
            events.clone(),
        );
        (manager, events, tmp)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn handshake_populates_both_peer_tables() {
        let (manager_a, events_a, _tmp_a) = spawn_test_manager("a").await;
        let (manager_b, events_b, _tmp_b) = spawn_test_manager("b").await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        manager_b.spawn_acceptor(listener);

        manager_a.dial(addr).await.unwrap();
        settle().await;

        assert_eq!(manager_a.connected_peers().await.len(), 1);
        assert_eq!(manager_b.connected_peers().await.len(), 1);
        assert_eq!(events_a.connected.lock().unwrap().as_slice(), &[DeviceId::new("b")]);
        assert_eq!(events_b.connected.lock().unwrap().as_slice(), &[DeviceId::new("a")]);
    }

    #[tokio::test]
    async fn direct_message_is_delivered_and_stored() {
        let (manager_a, _events_a, _tmp_a) = spawn_test_manager("a").await;
        let (manager_b, events_b, _tmp_b) = spawn_test_manager("b").await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        manager_b.spawn_acceptor(listener);
        manager_a.dial(addr).await.unwrap();
        settle().await;

        manager_a.send_text(&DeviceId::new("b"), "hola").await.unwrap();
        settle().await;

        assert_eq!(events_b.texts.lock().unwrap().as_slice(), &[(DeviceId::new("a"), "hola".to_string())]);
    }

    #[tokio::test]
    async fn group_master_re_election_picks_lexicographic_minimum() {
        let (manager_b, _events_b, _tmp_b) = spawn_test_manager("b").await;
        let (manager_c, _events_c, _tmp_c) = spawn_test_manager("c").await;

        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_b = listener_b.local_addr().unwrap();
        manager_b.spawn_acceptor(listener_b);
        manager_c.dial(addr_b).await.unwrap();
        settle().await;

        // Both sides already believe A was master of {A,B,C}; A is gone
        // (never connected in this test), so `active` reduces to {B,C}.
        let record = GroupRecord {
            name: "Family".to_string(),
            members: vec![DeviceId::new("a"), DeviceId::new("b"), DeviceId::new("c")],
            master_id: DeviceId::new("a"),
            epoch: Timestamp::from_secs(1_700_000_000),
        };
        let group_id = GroupId::new("group-1");
        manager_b.store.upsert_group(&group_id, record.clone()).unwrap();
        manager_c.store.upsert_group(&group_id, record).unwrap();

        manager_b.send_group_message(&group_id, "hello").await.unwrap();
        settle().await;

        let updated = manager_b.store.get_group(&group_id).unwrap().unwrap();
        assert_eq!(updated.master_id, DeviceId::new("b"));
        assert!(updated.epoch.as_secs() > 1_700_000_000);

        let on_c = manager_c.store.get_group(&group_id).unwrap().unwrap();
        assert_eq!(on_c.master_id, DeviceId::new("b"));
    }

    #[tokio::test]
    async fn file_transfer_completes_and_fires_callback() {
        let (manager_a, _events_a, _tmp_a) = spawn_test_manager("a").await;
        let (manager_b, events_b, tmp_b) = spawn_test_manager("b").await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        manager_b.spawn_acceptor(listener);
        manager_a.dial(addr).await.unwrap();
        settle().await;

        let src = tmp_b.path().join("source.bin");
        tokio::fs::write(&src, vec![0x5Au8; 4096]).await.unwrap();

        manager_a.send_file(&DeviceId::new("b"), &src).await.unwrap();
        settle().await;

        let files = events_b.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, DeviceId::new("a"));
        let bytes = tokio::fs::read(&files[0].1).await.unwrap();
        assert_eq!(bytes.len(), 4096);
    }

    #[tokio::test]
    async fn dial_to_closed_port_reports_error_without_panic() {
        let (manager_a, _events_a, _tmp_a) = spawn_test_manager("a").await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = manager_a.dial(addr).await;
        assert!(result.is_err());
    }
}
