//! Mesh peer records
//!
//! A [`Peer`] is what the directory hands out; a [`PeerConfig`] is what
//! gets pushed into the WireGuard device for it.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::keys::{PresharedKey, PublicKey};
use crate::overlay;

/// One mesh member as listed by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Identity of the member
    pub public_key: PublicKey,

    /// Public endpoint address, if the member is directly reachable
    #[serde(default)]
    pub ip: Option<IpAddr>,

    /// Public endpoint port (0 = unknown)
    #[serde(default)]
    pub port: u16,

    /// Preshared key, normally stamped mesh-wide before configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<PresharedKey>,

    /// Persistent keepalive interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_secs: Option<u16>,
}

impl Peer {
    /// A peer known only by its key, reachable by roaming
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            ip: None,
            port: 0,
            preshared_key: None,
            keepalive_secs: None,
        }
    }

    /// Builder-style endpoint setter
    pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.ip = Some(endpoint.ip());
        self.port = endpoint.port();
        self
    }

    /// Endpoint, only when both address and port are known
    pub fn endpoint(&self) -> Option<SocketAddr> {
        match self.ip {
            Some(ip) if self.port != 0 => Some(SocketAddr::new(ip, self.port)),
            _ => None,
        }
    }

    /// Translate into a device peer update restricted to the peer's overlay address
    pub fn to_peer_config(&self, overlay_net: &IpNet) -> PeerConfig {
        PeerConfig {
            public_key: self.public_key,
            endpoint: self.endpoint(),
            preshared_key: self.preshared_key,
            persistent_keepalive: self
                .keepalive_secs
                .filter(|secs| *secs != 0)
                .map(|secs| Duration::from_secs(u64::from(secs))),
            allowed_ips: vec![overlay::derive(overlay_net, &self.public_key)],
        }
    }
}

/// Peer update submitted to the WireGuard device, applied as upsert by key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: PublicKey,
    pub endpoint: Option<SocketAddr>,
    pub preshared_key: Option<PresharedKey>,
    pub persistent_keepalive: Option<Duration>,
    pub allowed_ips: Vec<IpNet>,
}

impl PeerConfig {
    /// Render as a `[Peer]` section of the WireGuard config format
    pub fn to_wg_config(&self) -> String {
        let mut section = format!("[Peer]\nPublicKey = {}\n", self.public_key);
        if let Some(psk) = &self.preshared_key {
            section.push_str(&format!("PresharedKey = {}\n", psk.to_base64()));
        }
        if let Some(endpoint) = self.endpoint {
            section.push_str(&format!("Endpoint = {}\n", endpoint));
        }
        let allowed: Vec<String> = self.allowed_ips.iter().map(|n| n.to_string()).collect();
        section.push_str(&format!("AllowedIPs = {}\n", allowed.join(", ")));
        if let Some(keepalive) = self.persistent_keepalive {
            section.push_str(&format!("PersistentKeepalive = {}\n", keepalive.as_secs()));
        }
        section
    }
}

/// A peer as read back from the WireGuard device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePeer {
    pub public_key: PublicKey,
    pub preshared_key: Option<PresharedKey>,
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<IpNet>,
    pub persistent_keepalive: Option<Duration>,
    /// Seconds since the UNIX epoch, `None` if no handshake happened yet
    pub latest_handshake: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl From<&DevicePeer> for Peer {
    fn from(p: &DevicePeer) -> Self {
        Peer {
            public_key: p.public_key,
            ip: p.endpoint.map(|e| e.ip()),
            port: p.endpoint.map_or(0, |e| e.port()),
            preshared_key: p.preshared_key,
            keepalive_secs: p
                .persistent_keepalive
                .map(|d| u16::try_from(d.as_secs()).unwrap_or(u16::MAX)),
        }
    }
}
