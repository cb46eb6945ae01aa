//! WireGuard device control via the `wg` tool

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;

use super::{reports_missing_device, run_tool, InterfaceConfig, TunnelControl};
use crate::error::{Error, Result};
use crate::keys::{PresharedKey, PublicKey};
use crate::peer::{DevicePeer, PeerConfig};

/// Drives the kernel WireGuard device through `wg(8)`
#[derive(Debug, Clone)]
pub struct WgTool {
    program: String,
}

impl WgTool {
    pub fn new() -> Self {
        Self { program: "wg".to_string() }
    }

    /// Use a `wg` binary at a non-default path
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn wg(&self, interface: &str, args: &[&str], input: Option<&str>) -> Result<String> {
        let output = run_tool(&self.program, args, input)
            .await
            .map_err(|e| Error::ControlPlane {
                interface: interface.to_string(),
                reason: format!("failed to run {}: {}", self.program, e),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if reports_missing_device(&stderr) {
            return Err(Error::DeviceNotFound(interface.to_string()));
        }
        Err(Error::ControlPlane {
            interface: interface.to_string(),
            reason: stderr.trim().to_string(),
        })
    }
}

impl Default for WgTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelControl for WgTool {
    async fn configure_interface(&self, interface: &str, config: &InterfaceConfig) -> Result<()> {
        let port = config.listen_port.map(|p| p.to_string());
        let mut args = vec!["set", interface, "private-key", "/dev/stdin"];
        if let Some(port) = port.as_deref() {
            args.extend(["listen-port", port]);
        }
        self.wg(interface, &args, Some(&config.private_key.to_base64())).await?;
        tracing::debug!(interface, listen_port = ?config.listen_port, "Configured WireGuard device");
        Ok(())
    }

    async fn upsert_peers(&self, interface: &str, peers: &[PeerConfig]) -> Result<()> {
        if peers.is_empty() {
            return Ok(());
        }
        // addconf merges by public key and leaves other peers alone
        let conf: String = peers.iter().map(|p| p.to_wg_config()).collect();
        self.wg(interface, &["addconf", interface, "/dev/stdin"], Some(&conf)).await?;
        Ok(())
    }

    async fn device_peers(&self, interface: &str) -> Result<Vec<DevicePeer>> {
        let dump = self.wg(interface, &["show", interface, "dump"], None).await?;
        parse_dump(&dump).map_err(|reason| Error::ControlPlane {
            interface: interface.to_string(),
            reason,
        })
    }
}

/// Parse the output of `wg show <iface> dump`.
///
/// The first line describes the interface itself and is skipped; each
/// following line is one peer with eight tab-separated fields.
pub fn parse_dump(dump: &str) -> std::result::Result<Vec<DevicePeer>, String> {
    dump.lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(parse_peer_line)
        .collect()
}

fn parse_peer_line(line: &str) -> std::result::Result<DevicePeer, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(format!("expected 8 fields in peer line, got {}", fields.len()));
    }

    let public_key: PublicKey = fields[0].parse().map_err(|e| format!("{}", e))?;

    let preshared_key = match fields[1] {
        "(none)" => None,
        s => {
            let psk: PresharedKey = s.parse().map_err(|e| format!("{}", e))?;
            Some(psk).filter(|k| !k.is_zero())
        }
    };

    let endpoint = match fields[2] {
        "(none)" => None,
        s => Some(
            s.parse::<SocketAddr>()
                .map_err(|e| format!("bad endpoint '{}': {}", s, e))?,
        ),
    };

    let allowed_ips = match fields[3] {
        "(none)" | "" => Vec::new(),
        s => s
            .split(',')
            .map(|n| {
                n.trim()
                    .parse::<IpNet>()
                    .map_err(|e| format!("bad allowed ip '{}': {}", n, e))
            })
            .collect::<std::result::Result<_, _>>()?,
    };

    let latest_handshake = match parse_u64(fields[4], "latest-handshake")? {
        0 => None,
        ts => Some(ts),
    };
    let rx_bytes = parse_u64(fields[5], "transfer-rx")?;
    let tx_bytes = parse_u64(fields[6], "transfer-tx")?;

    let persistent_keepalive = match fields[7].trim() {
        "off" | "0" => None,
        s => Some(Duration::from_secs(parse_u64(s, "persistent-keepalive")?)),
    };

    Ok(DevicePeer {
        public_key,
        preshared_key,
        endpoint,
        allowed_ips,
        persistent_keepalive,
        latest_handshake,
        rx_bytes,
        tx_bytes,
    })
}

fn parse_u64(s: &str, field: &str) -> std::result::Result<u64, String> {
    s.trim().parse().map_err(|_| format!("bad {} '{}'", field, s))
}
