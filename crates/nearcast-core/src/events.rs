//! The capability object: the caller-supplied callback surface.
//!
//! The original implementation wires closures with dynamic dispatch
//! straight into its connection manager. Here that surface is a single
//! trait object (`Arc<dyn PeerEvents>`) the `ConnectionManager` holds and
//! invokes — there is no IPC/broadcast-channel fan-out layer in this core
//! (that belongs to an excluded TUI), so one trait collapses what the
//! original modeled as several independent callbacks.

use crate::types::{DeviceId, GroupId};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Callbacks the connection manager and discovery service invoke as
/// network events occur. A default no-op implementation is provided via
/// blanket methods so callers only need to override what they care about.
pub trait PeerEvents: Send + Sync {
    /// A direct text message arrived from `device_id`.
    fn on_text(&self, _device_id: &DeviceId, _text: &str) {}

    /// A file from `device_id` finished writing to `path`.
    fn on_file(&self, _device_id: &DeviceId, _path: &PathBuf) {}

    /// A group-scoped text message arrived.
    fn on_group(&self, _group_id: &GroupId, _from_id: &DeviceId, _text: &str) {}

    /// An invite to join a group arrived.
    fn on_group_invite(&self, _group_id: &GroupId, _name: &str, _inviter_id: &DeviceId) {}

    /// A group-related notice that isn't itself a message (e.g. a join
    /// rejection) occurred.
    fn on_group_notice(&self, _group_id: &GroupId, _notice: &str) {}

    /// A peer completed its handshake and was inserted into the peer table.
    fn on_peer_connected(&self, _device_id: &DeviceId, _device_name: &str) {}

    /// A peer's connection closed and its record was removed.
    fn on_peer_disconnected(&self, _device_id: &DeviceId) {}

    /// A `discovery_response` was observed for a device not already known.
    fn on_device_discovered(&self, _device_id: &DeviceId, _device_name: &str, _ip: Ipv4Addr, _tcp_port: u16) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEvents {
        texts: AtomicUsize,
    }

    impl PeerEvents for CountingEvents {
        fn on_text(&self, _device_id: &DeviceId, _text: &str) {
            self.texts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_methods_are_no_ops() {
        struct Silent;
        impl PeerEvents for Silent {}
        let events = Silent;
        events.on_peer_connected(&DeviceId::new("a"), "A");
        events.on_peer_disconnected(&DeviceId::new("a"));
    }

    #[test]
    fn overridden_method_is_invoked() {
        let events = CountingEvents { texts: AtomicUsize::new(0) };
        events.on_text(&DeviceId::new("a"), "hi");
        assert_eq!(events.texts.load(Ordering::SeqCst), 1);
    }
}
