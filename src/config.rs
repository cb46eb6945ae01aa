//! WolfMesh Configuration
//!
//! This module provides configuration structures for the WolfMesh
//! membership client.

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use crate::node::{LocalNode, DEFAULT_MTU};
use crate::peer::Peer;

/// Linux IFNAMSIZ minus the trailing NUL
const MAX_INTERFACE_NAME: usize = 15;

/// Smallest host part that still gives every key its own address
const MIN_HOST_BITS: u8 = 8;

/// Main WolfMesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfMeshConfig {
    /// Local node configuration
    pub node: NodeConfig,

    /// Directory node configuration
    pub directory: DirectoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// WireGuard interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Private key (base64), mutually exclusive with `private_key_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKey>,

    /// File holding the private key (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,

    /// WireGuard listen port (unset = random)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// Mesh prefix shared by every node
    #[serde(default = "default_overlay_net")]
    pub overlay_net: IpNet,

    /// Interface MTU
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

/// Directory node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory node's WireGuard public key
    pub public_key: PublicKey,

    /// Directory node's public address
    pub address: IpAddr,

    /// Directory node's WireGuard port
    #[serde(default = "default_wg_port")]
    pub port: u16,

    /// HTTP port of the peer list on the directory's overlay address (defaults to `port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,

    /// Mesh-wide preshared key applied to every peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<PresharedKey>,

    /// Peer list request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_interface() -> String {
    "wgmesh0".to_string()
}

fn default_overlay_net() -> IpNet {
    Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8)
        .unwrap_or_default()
        .into()
}

fn default_mtu() -> u16 {
    DEFAULT_MTU
}

fn default_wg_port() -> u16 {
    51820
}

fn default_timeout_secs() -> u64 {
    crate::directory::DEFAULT_FETCH_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfMeshConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: WolfMeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let iface = &self.node.interface;
        if iface.is_empty() {
            return Err(Error::Config("node.interface cannot be empty".into()));
        }
        if iface.len() > MAX_INTERFACE_NAME {
            return Err(Error::Config(format!(
                "node.interface '{}' exceeds {} characters",
                iface, MAX_INTERFACE_NAME
            )));
        }

        match (&self.node.private_key, &self.node.private_key_file) {
            (None, None) => {
                return Err(Error::Config(
                    "one of node.private_key or node.private_key_file is required".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "node.private_key and node.private_key_file are mutually exclusive".into(),
                ))
            }
            _ => {}
        }

        // Addresses are derived whole octets at a time
        let net = &self.node.overlay_net;
        if net.max_prefix_len() - net.prefix_len() < MIN_HOST_BITS {
            return Err(Error::InvalidNetwork(format!(
                "node.overlay_net {} leaves fewer than {} host bits",
                net, MIN_HOST_BITS
            )));
        }

        if self.directory.port == 0 {
            return Err(Error::Config("directory.port cannot be 0".into()));
        }

        if self.directory.timeout_secs == 0 {
            return Err(Error::Config("directory.timeout_secs must be positive".into()));
        }

        Ok(())
    }

    /// Resolve the private key from the inline value or the key file
    pub fn private_key(&self) -> Result<PrivateKey> {
        match (&self.node.private_key, &self.node.private_key_file) {
            (Some(key), _) => Ok(key.clone()),
            (None, Some(path)) => PrivateKey::from_file(path).map_err(|e| {
                Error::Config(format!("could not read private key from {}: {}", path.display(), e))
            }),
            (None, None) => Err(Error::Config("no private key configured".into())),
        }
    }

    /// Build the immutable local node description
    pub fn local_node(&self) -> Result<LocalNode> {
        Ok(LocalNode::new(
            self.node.interface.clone(),
            self.private_key()?,
            self.node.overlay_net,
            self.node.listen_port,
            self.node.mtu,
        ))
    }

    /// WireGuard record of the directory node, the bootstrap peer
    pub fn directory_peer(&self) -> Peer {
        Peer::new(self.directory.public_key)
            .with_endpoint(SocketAddr::new(self.directory.address, self.directory.port))
    }

    /// Where the peer list is served: the directory's overlay address, reached through the tunnel
    pub fn directory_http_address(&self) -> SocketAddr {
        let overlay = crate::overlay::derive(&self.node.overlay_net, &self.directory.public_key);
        SocketAddr::new(
            overlay.addr(),
            self.directory.http_port.unwrap_or(self.directory.port),
        )
    }

    /// Peer list request timeout
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.directory.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LEN;
    use std::io::Write;

    fn dir_key() -> PublicKey {
        PublicKey::from_bytes([0xd1; KEY_LEN])
    }

    fn minimal(private: &PrivateKey) -> String {
        format!(
            r#"
[node]
private_key = "{}"

[directory]
public_key = "{}"
address = "198.51.100.10"
"#,
            private.to_base64(),
            dir_key()
        )
    }

    #[test]
    fn test_parse_config() {
        let private = PrivateKey::generate();
        let psk = PresharedKey::generate();
        let toml = format!(
            r#"
[node]
interface = "mesh0"
private_key = "{}"
listen_port = 51821
overlay_net = "10.99.0.0/16"
mtu = 1400

[directory]
public_key = "{}"
address = "198.51.100.10"
port = 51820
http_port = 8080
preshared_key = "{}"
timeout_secs = 5

[logging]
level = "debug"
"#,
            private.to_base64(),
            dir_key(),
            psk.to_base64()
        );

        let config = WolfMeshConfig::from_str(&toml).unwrap();
        assert_eq!(config.node.interface, "mesh0");
        assert_eq!(config.node.listen_port, Some(51821));
        assert_eq!(config.node.mtu, 1400);
        assert_eq!(config.directory.preshared_key, Some(psk));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "debug");

        let node = config.local_node().unwrap();
        assert_eq!(node.public_key, private.public_key());

        let http = config.directory_http_address();
        assert_eq!(http.port(), 8080);
        assert_eq!(
            IpNet::from(http.ip()),
            crate::overlay::derive(&config.node.overlay_net, &dir_key())
        );
    }

    #[test]
    fn test_defaults() {
        let config = WolfMeshConfig::from_str(&minimal(&PrivateKey::generate())).unwrap();
        assert_eq!(config.node.interface, "wgmesh0");
        assert_eq!(config.node.overlay_net.to_string(), "10.0.0.0/8");
        assert_eq!(config.node.mtu, 1280);
        assert_eq!(config.node.listen_port, None);
        assert_eq!(config.directory.port, 51820);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(11));
        assert_eq!(config.directory_http_address().port(), 51820);
        assert_eq!(config.logging.level, "info");

        let peer = config.directory_peer();
        assert_eq!(peer.public_key, dir_key());
        assert_eq!(peer.endpoint(), Some("198.51.100.10:51820".parse().unwrap()));
    }

    #[test]
    fn test_private_key_file() {
        let private = PrivateKey::generate();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", private.to_base64()).unwrap();

        let toml = format!(
            r#"
[node]
private_key_file = "{}"

[directory]
public_key = "{}"
address = "198.51.100.10"
"#,
            file.path().display(),
            dir_key()
        );
        let config = WolfMeshConfig::from_str(&toml).unwrap();
        assert_eq!(config.private_key().unwrap(), private);
    }

    #[test]
    fn test_validation_errors() {
        let no_key = format!(
            "[node]\n[directory]\npublic_key = \"{}\"\naddress = \"198.51.100.10\"\n",
            dir_key()
        );
        assert!(matches!(WolfMeshConfig::from_str(&no_key), Err(Error::Config(_))));

        let private = PrivateKey::generate();
        let long_name = minimal(&private).replace("[node]", "[node]\ninterface = \"a-very-long-interface\"");
        assert!(matches!(WolfMeshConfig::from_str(&long_name), Err(Error::Config(_))));

        let host_net = minimal(&private).replace("[node]", "[node]\noverlay_net = \"10.0.0.1/32\"");
        assert!(matches!(WolfMeshConfig::from_str(&host_net), Err(Error::InvalidNetwork(_))));

        let narrow_v4 = minimal(&private).replace("[node]", "[node]\noverlay_net = \"10.0.0.0/25\"");
        assert!(matches!(WolfMeshConfig::from_str(&narrow_v4), Err(Error::InvalidNetwork(_))));

        let narrow_v6 = minimal(&private).replace("[node]", "[node]\noverlay_net = \"fd00::/121\"");
        assert!(matches!(WolfMeshConfig::from_str(&narrow_v6), Err(Error::InvalidNetwork(_))));
    }

    #[test]
    fn test_smallest_prefix_gives_distinct_addresses() {
        let private = PrivateKey::generate();
        let toml = minimal(&private).replace("[node]", "[node]\noverlay_net = \"10.0.0.0/24\"");
        let config = WolfMeshConfig::from_str(&toml).unwrap();

        let node = config.local_node().unwrap();
        let others: Vec<IpNet> = (1u8..=8)
            .map(|b| node.overlay_address_of(&PublicKey::from_bytes([b; KEY_LEN])))
            .collect();
        let mut distinct = others.clone();
        distinct.sort();
        distinct.dedup();
        assert!(distinct.len() > 1, "all keys derived to {:?}", others);
        assert!(others.iter().all(|a| config.node.overlay_net.contains(a)));

        let bad_key = minimal(&private).replace(&dir_key().to_base64(), "bogus");
        assert!(matches!(WolfMeshConfig::from_str(&bad_key), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = WolfMeshConfig::from_str(&minimal(&PrivateKey::generate())).unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        let back = WolfMeshConfig::from_str(&text).unwrap();
        assert_eq!(back.node.private_key, config.node.private_key);
        assert_eq!(back.directory.public_key, config.directory.public_key);
    }
}
