//! The terminal driver: a `PeerEvents` implementation that prints network
//! events to stdout, plus the line-oriented command loop that drives a
//! [`ConnectionManager`].
//!
//! Grounded on `original_source/main.py`'s REPL: the same command set
//! (`peers`, `discoveries`, `connect`, `msg`, `history`, `groups`,
//! `group_create`, `group_send`, `group_history`, `sendfile`, `quit`), the
//! same terse `print(f"\n...")`-style event lines, and the same
//! discovered-device bookkeeping kept by the caller rather than the core.

use nearcast_core::manager::ConnectionManager;
use nearcast_core::store::ChatStore;
use nearcast_core::types::{DeviceId, GroupId};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prints one logged message the way `history`/`group_history` do:
/// `<timestamp or blank> <sender>: <text>`. Log entries are whatever JSON
/// the connection manager passed to `append_direct`/`append_group` — a flat
/// `{message_id, from_id, text}` object, optionally with a `timestamp`.
fn print_log_entry(entry: &serde_json::Value) {
    let text = entry.get("text").and_then(|t| t.as_str()).unwrap_or("");
    let sender = entry.get("from_id").and_then(|d| d.as_str()).unwrap_or("unknown");
    match entry.get("timestamp") {
        Some(ts) => println!("{ts} {sender}: {text}"),
        None => println!("{sender}: {text}"),
    }
}

#[derive(Debug, Clone)]
struct Discovered {
    device_name: String,
    ip: Ipv4Addr,
    tcp_port: u16,
}

/// Prints peer/discovery/group events as they happen, and remembers
/// discovered devices so `connect_discovered` can look them up by id.
pub struct TerminalDriver {
    discovered: Mutex<HashMap<String, Discovered>>,
}

impl TerminalDriver {
    pub fn new() -> Self {
        Self { discovered: Mutex::new(HashMap::new()) }
    }

    /// Runs the REPL until stdin closes or `quit` is entered.
    pub async fn run(&self, manager: Arc<ConnectionManager>, store: Arc<dyn ChatStore>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("\n> ");
            use std::io::Write;
            let _ = std::io::stdout().flush();

            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if self.dispatch(line, &manager, &store).await {
                break;
            }
        }
    }

    /// Handles one command line. Returns `true` if the REPL should stop.
    async fn dispatch(&self, line: &str, manager: &Arc<ConnectionManager>, store: &Arc<dyn ChatStore>) -> bool {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match cmd {
            "help" => self.print_help(),
            "peers" => self.print_peers(manager).await,
            "discoveries" => self.print_discoveries(),
            "groups" => self.print_groups(store),
            "connect" => self.connect(manager, rest).await,
            "connect_discovered" => self.connect_discovered(manager, rest).await,
            "msg" => self.msg(manager, rest).await,
            "history" => self.history(store, rest),
            "group_create" => self.group_create(manager, rest),
            "group_send" => self.group_send(manager, rest).await,
            "group_history" => self.group_history(store, rest),
            "sendfile" => self.sendfile(manager, rest).await,
            "quit" => return true,
            _ => println!("unknown command"),
        }
        false
    }

    fn print_help(&self) {
        println!("commands:");
        println!("  peers");
        println!("  discoveries");
        println!("  connect <ip> <port>");
        println!("  connect_discovered <device_id>");
        println!("  msg <peer_id> <text>");
        println!("  history <peer_id>");
        println!("  groups");
        println!("  group_create <name> <peer_id,peer_id,...>");
        println!("  group_send <group_id> <text>");
        println!("  group_history <group_id>");
        println!("  sendfile <peer_id> <path>");
        println!("  quit");
    }

    async fn print_peers(&self, manager: &Arc<ConnectionManager>) {
        let peers = manager.connected_peers().await;
        if peers.is_empty() {
            println!("no peers");
            return;
        }
        for (device_id, device_name, _platform, _is_outbound) in peers {
            println!("{} {}", device_id.as_str(), device_name);
        }
    }

    fn print_discoveries(&self) {
        let discovered = self.discovered.lock().unwrap();
        if discovered.is_empty() {
            println!("no discoveries");
            return;
        }
        for (device_id, info) in discovered.iter() {
            println!("{device_id} {} {}:{}", info.device_name, info.ip, info.tcp_port);
        }
    }

    fn print_groups(&self, store: &Arc<dyn ChatStore>) {
        let groups = match store.get_groups() {
            Ok(groups) => groups,
            Err(err) => {
                println!("failed to read groups: {err}");
                return;
            }
        };
        if groups.is_empty() {
            println!("no groups");
            return;
        }
        for (group_id, record) in groups {
            let members: Vec<&str> = record.members.iter().map(DeviceId::as_str).collect();
            println!("{} {} master={} members={}", group_id.as_str(), record.name, record.master_id.as_str(), members.join(","));
        }
    }

    async fn connect(&self, manager: &Arc<ConnectionManager>, rest: &str) {
        let parts: Vec<&str> = rest.split_whitespace().collect();
        if parts.len() != 2 {
            println!("usage: connect <ip> <port>");
            return;
        }
        let Ok(ip) = parts[0].parse::<Ipv4Addr>() else {
            println!("invalid ip: {}", parts[0]);
            return;
        };
        let Ok(port) = parts[1].parse::<u16>() else {
            println!("invalid port: {}", parts[1]);
            return;
        };
        match manager.dial(std::net::SocketAddr::from((ip, port))).await {
            Ok(()) => {}
            Err(err) => println!("connect failed: {err}"),
        }
    }

    async fn connect_discovered(&self, manager: &Arc<ConnectionManager>, device_id: &str) {
        if device_id.is_empty() {
            println!("usage: connect_discovered <device_id>");
            return;
        }
        let info = self.discovered.lock().unwrap().get(device_id).cloned();
        let Some(info) = info else {
            println!("device not found");
            return;
        };
        match manager.dial(std::net::SocketAddr::from((info.ip, info.tcp_port))).await {
            Ok(()) => {}
            Err(err) => println!("connect failed: {err}"),
        }
    }

    async fn msg(&self, manager: &Arc<ConnectionManager>, rest: &str) {
        let mut parts = rest.splitn(2, ' ');
        let peer_id = parts.next().unwrap_or("");
        let text = parts.next().unwrap_or("");
        if peer_id.is_empty() || text.is_empty() {
            println!("usage: msg <peer_id> <text>");
            return;
        }
        if let Err(err) = manager.send_text(&DeviceId::new(peer_id), text).await {
            println!("send failed: {err}");
        }
    }

    fn history(&self, store: &Arc<dyn ChatStore>, peer_id: &str) {
        if peer_id.is_empty() {
            println!("usage: history <peer_id>");
            return;
        }
        let entries = match store.read_direct(&DeviceId::new(peer_id), 0) {
            Ok(entries) => entries,
            Err(err) => {
                println!("failed to read history: {err}");
                return;
            }
        };
        if entries.is_empty() {
            println!("no history");
            return;
        }
        for entry in entries {
            print_log_entry(&entry);
        }
    }

    fn group_create(&self, manager: &Arc<ConnectionManager>, rest: &str) {
        let mut parts = rest.splitn(2, ' ');
        let name = parts.next().unwrap_or("");
        let members_raw = parts.next().unwrap_or("");
        if name.is_empty() {
            println!("usage: group_create <name> <peer_id,peer_id,...>");
            return;
        }
        let members: Vec<DeviceId> = members_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(DeviceId::new)
            .collect();
        match manager.create_group(name, members) {
            Ok(group_id) => println!("group created: {}", group_id.as_str()),
            Err(err) => println!("group creation failed: {err}"),
        }
    }

    async fn group_send(&self, manager: &Arc<ConnectionManager>, rest: &str) {
        let mut parts = rest.splitn(2, ' ');
        let group_id = parts.next().unwrap_or("");
        let text = parts.next().unwrap_or("");
        if group_id.is_empty() || text.is_empty() {
            println!("usage: group_send <group_id> <text>");
            return;
        }
        if let Err(err) = manager.send_group_message(&GroupId::new(group_id), text).await {
            println!("send failed: {err}");
        }
    }

    fn group_history(&self, store: &Arc<dyn ChatStore>, group_id: &str) {
        if group_id.is_empty() {
            println!("usage: group_history <group_id>");
            return;
        }
        let entries = match store.read_group(&GroupId::new(group_id), 0) {
            Ok(entries) => entries,
            Err(err) => {
                println!("failed to read group history: {err}");
                return;
            }
        };
        if entries.is_empty() {
            println!("no group history");
            return;
        }
        for entry in entries {
            print_log_entry(&entry);
        }
    }

    async fn sendfile(&self, manager: &Arc<ConnectionManager>, rest: &str) {
        let mut parts = rest.splitn(2, ' ');
        let peer_id = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");
        if peer_id.is_empty() || path.is_empty() {
            println!("usage: sendfile <peer_id> <path>");
            return;
        }
        if let Err(err) = manager.send_file(&DeviceId::new(peer_id), Path::new(path)).await {
            println!("send failed: {err}");
        }
    }
}

impl nearcast_core::events::PeerEvents for TerminalDriver {
    fn on_text(&self, device_id: &DeviceId, text: &str) {
        println!("\n[{}] {text}", device_id.as_str());
    }

    fn on_file(&self, device_id: &DeviceId, path: &PathBuf) {
        println!("\n[{}] file received: {}", device_id.as_str(), path.display());
    }

    fn on_group(&self, group_id: &GroupId, from_id: &DeviceId, text: &str) {
        println!("\n[group {}] {}: {text}", group_id.as_str(), from_id.as_str());
    }

    fn on_group_invite(&self, group_id: &GroupId, name: &str, inviter_id: &DeviceId) {
        println!("\ninvited to group {} \"{name}\" by {}", group_id.as_str(), inviter_id.as_str());
    }

    fn on_group_notice(&self, group_id: &GroupId, notice: &str) {
        println!("\n[group {}] {notice}", group_id.as_str());
    }

    fn on_peer_connected(&self, device_id: &DeviceId, device_name: &str) {
        println!("\nconnected: {} ({device_name})", device_id.as_str());
    }

    fn on_peer_disconnected(&self, device_id: &DeviceId) {
        println!("\ndisconnected: {}", device_id.as_str());
    }

    fn on_device_discovered(&self, device_id: &DeviceId, device_name: &str, ip: Ipv4Addr, tcp_port: u16) {
        let mut discovered = self.discovered.lock().unwrap();
        if discovered.contains_key(device_id.as_str()) {
            return;
        }
        discovered.insert(device_id.as_str().to_string(), Discovered { device_name: device_name.to_string(), ip, tcp_port });
        println!("\ndiscovered: {} {device_name} {ip}:{tcp_port}", device_id.as_str());
    }
}
