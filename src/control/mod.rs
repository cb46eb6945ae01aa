//! Control Module
//!
//! Seams to the two host facilities the client drives: the WireGuard
//! device (keys, peers) and the network link (interface, address, route).

mod link;
mod wg;

pub use link::IpTool;
pub use wg::{parse_dump, WgTool};

use std::process::{Output, Stdio};

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Result;
use crate::keys::PrivateKey;
use crate::peer::{DevicePeer, PeerConfig};

/// Device-level settings of the local WireGuard interface
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub private_key: PrivateKey,
    pub listen_port: Option<u16>,
}

/// WireGuard device control plane.
///
/// `upsert_peers` merges by public key: listed peers are added or
/// overwritten, unlisted peers are left untouched. A missing device
/// must surface as [`crate::Error::DeviceNotFound`].
#[async_trait]
pub trait TunnelControl: Send + Sync {
    /// Set the private key and listen port
    async fn configure_interface(&self, interface: &str, config: &InterfaceConfig) -> Result<()>;

    /// Add or overwrite the given peers
    async fn upsert_peers(&self, interface: &str, peers: &[PeerConfig]) -> Result<()>;

    /// Read back the peers currently configured on the device
    async fn device_peers(&self, interface: &str) -> Result<Vec<DevicePeer>>;
}

/// Network link management.
///
/// A missing link must surface as [`crate::Error::DeviceNotFound`].
#[async_trait]
pub trait LinkControl: Send + Sync {
    /// Create a WireGuard-type link
    async fn create_link(&self, interface: &str) -> Result<()>;

    /// Delete the link
    async fn delete_link(&self, interface: &str) -> Result<()>;

    /// Assign `address`, replacing an identical existing assignment
    async fn replace_address(&self, interface: &str, address: &IpNet) -> Result<()>;

    async fn set_mtu(&self, interface: &str, mtu: u16) -> Result<()>;

    /// Bring the link administratively up
    async fn set_up(&self, interface: &str) -> Result<()>;

    /// Install an on-link route for `network`
    async fn add_route(&self, interface: &str, network: &IpNet) -> Result<()>;
}

/// Run a host tool, optionally feeding `input` on stdin.
///
/// Secrets go through stdin so they never show up in the process table.
pub(crate) async fn run_tool(program: &str, args: &[&str], input: Option<&str>) -> std::io::Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }
    }
    child.wait_with_output().await
}

/// Check whether stderr of `wg`/`ip` says the interface is missing
pub(crate) fn reports_missing_device(stderr: &str) -> bool {
    stderr.contains("No such device")
        || stderr.contains("Cannot find device")
        || stderr.contains("does not exist")
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory host standing in for the kernel in tests

    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::keys::PublicKey;

    #[derive(Default)]
    struct Device {
        config: Option<InterfaceConfig>,
        address: Option<IpNet>,
        mtu: Option<u16>,
        up: bool,
        peers: BTreeMap<PublicKey, DevicePeer>,
    }

    /// Fake kernel: one map of links, each carrying its WireGuard device
    #[derive(Default)]
    pub struct FakeHost {
        devices: Mutex<HashMap<String, Device>>,
        /// Every `upsert_peers` call, in order
        pub upserts: Mutex<Vec<Vec<PeerConfig>>>,
        pub fail_upserts: AtomicBool,
        pub fail_routes: AtomicBool,
        pub fail_create: AtomicBool,
        pub fail_delete: AtomicBool,
    }

    impl FakeHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn has_link(&self, interface: &str) -> bool {
            self.devices.lock().unwrap().contains_key(interface)
        }

        pub fn is_up(&self, interface: &str) -> bool {
            self.devices.lock().unwrap().get(interface).map_or(false, |d| d.up)
        }

        pub fn address(&self, interface: &str) -> Option<IpNet> {
            self.devices.lock().unwrap().get(interface).and_then(|d| d.address)
        }

        pub fn mtu(&self, interface: &str) -> Option<u16> {
            self.devices.lock().unwrap().get(interface).and_then(|d| d.mtu)
        }

        pub fn listen_port(&self, interface: &str) -> Option<u16> {
            self.devices
                .lock()
                .unwrap()
                .get(interface)
                .and_then(|d| d.config.as_ref())
                .and_then(|c| c.listen_port)
        }

        pub fn peer_keys(&self, interface: &str) -> Vec<PublicKey> {
            self.devices
                .lock()
                .unwrap()
                .get(interface)
                .map(|d| d.peers.keys().copied().collect())
                .unwrap_or_default()
        }

        pub fn upsert_count(&self) -> usize {
            self.upserts.lock().unwrap().len()
        }

        fn with_device<R>(&self, interface: &str, f: impl FnOnce(&mut Device) -> R) -> Result<R> {
            let mut devices = self.devices.lock().unwrap();
            devices
                .get_mut(interface)
                .map(f)
                .ok_or_else(|| Error::DeviceNotFound(interface.to_string()))
        }
    }

    #[async_trait]
    impl TunnelControl for FakeHost {
        async fn configure_interface(&self, interface: &str, config: &InterfaceConfig) -> Result<()> {
            self.with_device(interface, |d| d.config = Some(config.clone()))
        }

        async fn upsert_peers(&self, interface: &str, peers: &[PeerConfig]) -> Result<()> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(Error::ControlPlane {
                    interface: interface.to_string(),
                    reason: "injected failure".into(),
                });
            }
            self.upserts.lock().unwrap().push(peers.to_vec());
            self.with_device(interface, |d| {
                for p in peers {
                    d.peers.insert(
                        p.public_key,
                        DevicePeer {
                            public_key: p.public_key,
                            preshared_key: p.preshared_key,
                            endpoint: p.endpoint,
                            allowed_ips: p.allowed_ips.clone(),
                            persistent_keepalive: p.persistent_keepalive,
                            latest_handshake: None,
                            rx_bytes: 0,
                            tx_bytes: 0,
                        },
                    );
                }
            })
        }

        async fn device_peers(&self, interface: &str) -> Result<Vec<DevicePeer>> {
            self.with_device(interface, |d| d.peers.values().cloned().collect())
        }
    }

    #[async_trait]
    impl LinkControl for FakeHost {
        async fn create_link(&self, interface: &str) -> Result<()> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Error::Link {
                    interface: interface.to_string(),
                    reason: "Operation not permitted".into(),
                });
            }
            let mut devices = self.devices.lock().unwrap();
            if devices.contains_key(interface) {
                return Err(Error::Link {
                    interface: interface.to_string(),
                    reason: "File exists".into(),
                });
            }
            devices.insert(interface.to_string(), Device::default());
            Ok(())
        }

        async fn delete_link(&self, interface: &str) -> Result<()> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(Error::Link {
                    interface: interface.to_string(),
                    reason: "Device or resource busy".into(),
                });
            }
            self.devices
                .lock()
                .unwrap()
                .remove(interface)
                .map(|_| ())
                .ok_or_else(|| Error::DeviceNotFound(interface.to_string()))
        }

        async fn replace_address(&self, interface: &str, address: &IpNet) -> Result<()> {
            self.with_device(interface, |d| d.address = Some(*address))
        }

        async fn set_mtu(&self, interface: &str, mtu: u16) -> Result<()> {
            self.with_device(interface, |d| d.mtu = Some(mtu))
        }

        async fn set_up(&self, interface: &str) -> Result<()> {
            self.with_device(interface, |d| d.up = true)
        }

        async fn add_route(&self, interface: &str, _network: &IpNet) -> Result<()> {
            if self.fail_routes.load(Ordering::SeqCst) {
                return Err(Error::Link {
                    interface: interface.to_string(),
                    reason: "RTNETLINK answers: File exists".into(),
                });
            }
            self.with_device(interface, |_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_messages() {
        assert!(reports_missing_device("Unable to access interface: No such device"));
        assert!(reports_missing_device("Cannot find device \"wgmesh0\""));
        assert!(!reports_missing_device("RTNETLINK answers: Operation not permitted"));
    }
}
