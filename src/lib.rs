//! WolfMesh - WireGuard Mesh Membership Client
//!
//! Joins a node to a flat WireGuard mesh coordinated by a directory node.
//! Every node's overlay address is derived from its public key, so the
//! only shared state is the roster the directory serves.
//!
//! # Architecture
//!
//! The client brings up a local WireGuard interface, registers the
//! directory node as its first peer, then periodically fetches the full
//! roster through the tunnel and upserts every other member into the
//! device. Attempts are spaced by a random 20-40 second delay and never
//! overlap.
//!
//! # Features
//!
//! - Deterministic overlay addressing (IPv4 and IPv6 prefixes)
//! - Mesh-wide preshared key
//! - Failure-tolerant reconciliation: the configured peer set is never cleared
//! - Clean interface teardown on SIGINT/SIGTERM

pub mod config;
pub mod control;
pub mod directory;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod node;
pub mod overlay;
pub mod peer;
pub mod sync;

pub use config::WolfMeshConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfMeshConfig;
    pub use crate::control::{IpTool, LinkControl, TunnelControl, WgTool};
    pub use crate::directory::{DirectoryClient, PeerDirectory};
    pub use crate::error::{Error, Result};
    pub use crate::keys::{PresharedKey, PrivateKey, PublicKey};
    pub use crate::lifecycle::{LifecycleState, MeshClient};
    pub use crate::node::LocalNode;
    pub use crate::peer::Peer;
}
