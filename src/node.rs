//! Local node state
//!
//! Built once at startup and shared read-only.

use ipnet::IpNet;

use crate::keys::{PrivateKey, PublicKey};
use crate::overlay;

/// Default MTU for the mesh interface
pub const DEFAULT_MTU: u16 = 1280;

/// Immutable description of this node
#[derive(Debug, Clone)]
pub struct LocalNode {
    /// Interface name
    pub interface: String,
    /// Private key
    pub private_key: PrivateKey,
    /// Public key derived from the private key
    pub public_key: PublicKey,
    /// Mesh prefix shared by all nodes
    pub overlay_net: IpNet,
    /// Own overlay address (/32 or /128)
    pub overlay_addr: IpNet,
    /// WireGuard listen port, `None` lets the kernel pick
    pub listen_port: Option<u16>,
    /// Interface MTU
    pub mtu: u16,
}

impl LocalNode {
    pub fn new(
        interface: String,
        private_key: PrivateKey,
        overlay_net: IpNet,
        listen_port: Option<u16>,
        mtu: u16,
    ) -> Self {
        let public_key = private_key.public_key();
        let overlay_net = overlay_net.trunc();
        let overlay_addr = overlay::derive(&overlay_net, &public_key);
        Self {
            interface,
            private_key,
            public_key,
            overlay_net,
            overlay_addr,
            listen_port: listen_port.filter(|p| *p != 0),
            mtu,
        }
    }

    /// Overlay address another node derives to in this mesh
    pub fn overlay_address_of(&self, key: &PublicKey) -> IpNet {
        overlay::derive(&self.overlay_net, key)
    }

    /// Check whether `key` is this node's own identity
    pub fn is_self(&self, key: &PublicKey) -> bool {
        self.public_key == *key
    }
}
