//! Local network interface enumeration.
//!
//! Picks the IPv4 addresses worth advertising on: no loopback, no
//! link-local, no virtual adapters.

use if_addrs::IfAddr;
use serde::Serialize;
use std::net::Ipv4Addr;

/// Substrings that mark a virtual adapter, matched case-insensitively.
pub const VIRTUAL_ADAPTER_PATTERNS: &[&str] = &[
    "vmware",
    "virtualbox",
    "vbox",
    "hyper-v",
    "virtual",
    "docker",
    "vethernet",
    "wsl",
    "vmnet",
    "vboxnet",
    "virbr",
    "br-",
];

/// Coarse adapter classification from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterfaceKind {
    Ethernet,
    WiFi,
    Network,
}

impl InterfaceKind {
    pub fn classify(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.starts_with("wlan")
            || name.starts_with("wl")
            || name.contains("wi-fi")
            || name.contains("wifi")
            || name.contains("wireless")
        {
            InterfaceKind::WiFi
        } else if name.starts_with("eth")
            || name.starts_with("en")
            || name.contains("ethernet")
            || name.contains("lan")
            || name.contains("realtek")
            || name.contains("intel")
        {
            InterfaceKind::Ethernet
        } else {
            InterfaceKind::Network
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            InterfaceKind::Ethernet => "Ethernet",
            InterfaceKind::WiFi => "WiFi",
            InterfaceKind::Network => "Network",
        }
    }
}

/// A candidate IPv4 address on an up interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Option<Ipv4Addr>,
    pub kind: InterfaceKind,
}

impl NetworkInterface {
    /// Label shown in interface pickers, e.g. `"WiFi (192.168.1.20)"`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.kind.display_name(), self.ip)
    }

    /// Directed broadcast address of this interface's subnet.
    pub fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast
            .unwrap_or_else(|| Ipv4Addr::from(u32::from(self.ip) | !u32::from(self.netmask)))
    }
}

pub fn is_virtual_adapter(name: &str) -> bool {
    let name = name.to_lowercase();
    VIRTUAL_ADAPTER_PATTERNS.iter().any(|p| name.contains(p))
}

fn is_private(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

/// Candidate addresses on this host.
pub fn candidates() -> Vec<NetworkInterface> {
    let addrs = match if_addrs::get_if_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!("Failed to enumerate interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut result = Vec::new();
    for iface in addrs {
        if iface.is_loopback() || is_virtual_adapter(&iface.name) {
            continue;
        }
        let IfAddr::V4(v4) = &iface.addr else {
            continue;
        };
        if v4.ip.is_loopback() || v4.ip.is_link_local() {
            continue;
        }

        result.push(NetworkInterface {
            kind: InterfaceKind::classify(&iface.name),
            name: iface.name.clone(),
            ip: v4.ip,
            netmask: v4.netmask,
            broadcast: v4.broadcast,
        });
    }
    result
}

/// Best local address to identify ourselves with.
///
/// Private ranges score 10, Ethernet 5, WiFi 3; the first highest score
/// wins. No candidates yields 127.0.0.1.
pub fn preferred_local_ip(interfaces: &[NetworkInterface]) -> Ipv4Addr {
    let mut best = None;
    let mut best_score = -1;

    for iface in interfaces {
        let mut score = 0;
        if is_private(iface.ip) {
            score += 10;
        }
        score += match iface.kind {
            InterfaceKind::Ethernet => 5,
            InterfaceKind::WiFi => 3,
            InterfaceKind::Network => 0,
        };
        if score > best_score {
            best_score = score;
            best = Some(iface.ip);
        }
    }

    best.unwrap_or(Ipv4Addr::LOCALHOST)
}

/// Where announcements go: the selected interface's broadcast address, or
/// the limited broadcast when nothing (or an unknown address) is selected.
pub fn broadcast_target(selected: Option<Ipv4Addr>, interfaces: &[NetworkInterface]) -> Ipv4Addr {
    selected
        .and_then(|ip| interfaces.iter().find(|iface| iface.ip == ip))
        .map(NetworkInterface::broadcast_addr)
        .unwrap_or(Ipv4Addr::BROADCAST)
}
