//! The external chat-store contract.
//!
//! The interactive REPL, the on-disk chat log, and the group-metadata store
//! are all named as out-of-scope external collaborators — the core only
//! requires something implementing [`ChatStore`]. [`FileChatStore`] is a
//! concrete default grounded on `original_source/storage.py`: a single JSON
//! state file for group metadata, plus one append-only `.jsonl` log per
//! direct peer or group conversation.

use crate::types::{DeviceId, GroupId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const STATE_FILE: &str = "state.json";
const DIRECT_PREFIX: &str = "direct_";
const GROUP_PREFIX: &str = "group_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("failed to parse state file {path}: {source}")]
    ParseState { path: PathBuf, source: serde_json::Error },

    #[error("failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A group's persisted metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub members: Vec<DeviceId>,
    pub master_id: DeviceId,
    pub epoch: Timestamp,
}

/// A partial update applied to an existing group record — only `Some`
/// fields are changed, mirroring `storage.py::ChatStore.update_group`'s
/// `dict.update()` semantics.
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub members: Option<Vec<DeviceId>>,
    pub master_id: Option<DeviceId>,
    pub epoch: Option<Timestamp>,
}

/// The store interface the connection manager depends on. Messages are
/// passed through as opaque JSON values — the wire layer already defines
/// their shape (§6's envelope payloads); the store just needs to persist
/// and replay them.
pub trait ChatStore: Send + Sync {
    fn create_group(&self, name: &str, members: Vec<DeviceId>, master_id: DeviceId) -> Result<GroupId, StoreError>;
    fn upsert_group(&self, group_id: &GroupId, record: GroupRecord) -> Result<(), StoreError>;
    fn update_group(&self, group_id: &GroupId, update: GroupUpdate) -> Result<(), StoreError>;
    fn get_group(&self, group_id: &GroupId) -> Result<Option<GroupRecord>, StoreError>;
    fn get_groups(&self) -> Result<HashMap<GroupId, GroupRecord>, StoreError>;
    fn append_direct(&self, peer_id: &DeviceId, message: &Value) -> Result<(), StoreError>;
    fn append_group(&self, group_id: &GroupId, message: &Value) -> Result<(), StoreError>;
    fn read_direct(&self, peer_id: &DeviceId, limit: usize) -> Result<Vec<Value>, StoreError>;
    fn read_group(&self, group_id: &GroupId, limit: usize) -> Result<Vec<Value>, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    groups: BTreeMap<String, GroupRecord>,
}

/// File-backed [`ChatStore`]: a JSON map of group state plus append-only
/// JSONL conversation logs, all under one data directory.
pub struct FileChatStore {
    data_dir: PathBuf,
    state: Mutex<State>,
}

impl FileChatStore {
    /// Opens (or creates) the store rooted at `data_dir`, loading any
    /// existing group state. A missing or corrupt state file is treated as
    /// empty, matching the original's tolerant `_load_state`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io { path: data_dir.clone(), source })?;

        let state_path = data_dir.join(STATE_FILE);
        let state = match fs::read_to_string(&state_path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => State::default(),
        };

        Ok(Self { data_dir, state: Mutex::new(state) })
    }

    fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    fn save_state(&self, state: &State) -> Result<(), StoreError> {
        let path = self.state_path();
        let contents = serde_json::to_string_pretty(state)?;
        fs::write(&path, contents).map_err(|source| StoreError::Io { path, source })
    }

    fn direct_log_path(&self, peer_id: &DeviceId) -> PathBuf {
        self.data_dir.join(format!("{DIRECT_PREFIX}{}.jsonl", peer_id.as_str()))
    }

    fn group_log_path(&self, group_id: &GroupId) -> PathBuf {
        self.data_dir.join(format!("{GROUP_PREFIX}{}.jsonl", group_id.as_str()))
    }

    fn append_line(path: &Path, message: &Value) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        let line = serde_json::to_string(message)?;
        writeln!(file, "{line}").map_err(|source| StoreError::Io { path: path.to_path_buf(), source })
    }

    fn read_tail(path: &Path, limit: usize) -> Result<Vec<Value>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;

        let tail: &[String] = if limit == 0 {
            &lines
        } else {
            let start = lines.len().saturating_sub(limit);
            &lines[start..]
        };

        Ok(tail
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl ChatStore for FileChatStore {
    fn create_group(&self, name: &str, members: Vec<DeviceId>, master_id: DeviceId) -> Result<GroupId, StoreError> {
        let group_id = GroupId::generate();
        let mut sorted_members = members;
        sorted_members.sort();
        sorted_members.dedup();

        let record = GroupRecord {
            name: name.to_string(),
            members: sorted_members,
            master_id,
            epoch: Timestamp::now(),
        };

        let mut state = self.state.lock().unwrap();
        state.groups.insert(group_id.as_str().to_string(), record);
        self.save_state(&state)?;
        Ok(group_id)
    }

    fn upsert_group(&self, group_id: &GroupId, record: GroupRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.groups.insert(group_id.as_str().to_string(), record);
        self.save_state(&state)
    }

    fn update_group(&self, group_id: &GroupId, update: GroupUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.groups.get_mut(group_id.as_str()) else {
            return Ok(());
        };
        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(mut members) = update.members {
            members.sort();
            members.dedup();
            record.members = members;
        }
        if let Some(master_id) = update.master_id {
            record.master_id = master_id;
        }
        if let Some(epoch) = update.epoch {
            record.epoch = epoch;
        }
        self.save_state(&state)
    }

    fn get_group(&self, group_id: &GroupId) -> Result<Option<GroupRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.groups.get(group_id.as_str()).cloned())
    }

    fn get_groups(&self) -> Result<HashMap<GroupId, GroupRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .map(|(id, record)| (GroupId::new(id.clone()), record.clone()))
            .collect())
    }

    fn append_direct(&self, peer_id: &DeviceId, message: &Value) -> Result<(), StoreError> {
        Self::append_line(&self.direct_log_path(peer_id), message)
    }

    fn append_group(&self, group_id: &GroupId, message: &Value) -> Result<(), StoreError> {
        Self::append_line(&self.group_log_path(group_id), message)
    }

    fn read_direct(&self, peer_id: &DeviceId, limit: usize) -> Result<Vec<Value>, StoreError> {
        Self::read_tail(&self.direct_log_path(peer_id), limit)
    }

    fn read_group(&self, group_id: &GroupId, limit: usize) -> Result<Vec<Value>, StoreError> {
        Self::read_tail(&self.group_log_path(group_id), limit)
    }
}
