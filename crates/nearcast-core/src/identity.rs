//! Device identity and environment helpers.
//!
//! A device's identity is a stable `DeviceId`, a display name (defaulted to
//! the system hostname), a short platform tag, and — for discovery — its
//! local IPv4 address. None of this is network protocol; it's the small
//! amount of environment-reading glue the protocol layers need to fill in
//! their own envelopes.

use crate::types::DeviceId;
use std::io;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

/// Filename the device id is persisted under, inside the configured data
/// directory.
const DEVICE_ID_FILE: &str = "device_id.txt";

/// Loads the persisted `DeviceId` from `<data_dir>/device_id.txt`, creating
/// and persisting a new random one if the file doesn't exist or is empty.
///
/// Mirrors `original_source/utils.py::get_device_id`: a single trimmed UUID
/// string in a flat file, generated once and reused forever after.
pub fn load_or_create_device_id(data_dir: &Path) -> io::Result<DeviceId> {
    let path = device_id_path(data_dir);
    if let Ok(contents) = std::fs::read_to_string(&path) {
        let trimmed = contents.trim();
        if !trimmed.is_empty() {
            return Ok(DeviceId::new(trimmed));
        }
    }
    let id = DeviceId::generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, id.as_str())?;
    Ok(id)
}

fn device_id_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DEVICE_ID_FILE)
}

/// Returns the system hostname, used as the default display name.
///
/// Falls back to `"unknown-device"` if the hostname can't be read (e.g. in
/// a minimal container without `/etc/hostname`).
pub fn device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-device".to_string())
}

/// Returns a short platform tag for this build.
///
/// `original_source/utils.py::get_platform` hard-codes `"pc"` for every
/// host; we report the real OS family instead, since the wire format treats
/// `platform` as an opaque display string and nothing downstream branches
/// on its exact value (see DESIGN.md).
pub fn platform_tag() -> &'static str {
    match std::env::consts::OS {
        "macos" => "mac",
        "windows" => "pc",
        "linux" => "linux",
        other => other,
    }
}

/// Returns this host's local IPv4 address on the LAN, as seen by the
/// routing table — without sending any packets.
///
/// Mirrors `original_source/utils.py::get_local_ip`: connect a UDP socket to
/// a well-known external address and read back the socket's local endpoint.
/// `connect()` on a `SOCK_DGRAM` socket only consults the routing table; no
/// datagram is transmitted.
pub fn local_ipv4() -> io::Result<std::net::Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    match socket.local_addr()?.ip() {
        std::net::IpAddr::V4(v4) => Ok(v4),
        std::net::IpAddr::V6(_) => Ok(std::net::Ipv4Addr::LOCALHOST),
    }
}
