//! Network link management via the `ip` tool

use async_trait::async_trait;
use ipnet::IpNet;

use super::{reports_missing_device, run_tool, LinkControl};
use crate::error::{Error, Result};

/// Drives links, addresses and routes through `ip(8)`
#[derive(Debug, Clone)]
pub struct IpTool {
    program: String,
}

impl IpTool {
    pub fn new() -> Self {
        Self { program: "ip".to_string() }
    }

    /// Use an `ip` binary at a non-default path
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn ip(&self, interface: &str, args: &[&str]) -> Result<()> {
        let output = run_tool(&self.program, args, None)
            .await
            .map_err(|e| Error::Link {
                interface: interface.to_string(),
                reason: format!("failed to run {}: {}", self.program, e),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if reports_missing_device(&stderr) {
            return Err(Error::DeviceNotFound(interface.to_string()));
        }
        Err(Error::Link {
            interface: interface.to_string(),
            reason: stderr.trim().to_string(),
        })
    }
}

impl Default for IpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkControl for IpTool {
    async fn create_link(&self, interface: &str) -> Result<()> {
        self.ip(interface, &["link", "add", "dev", interface, "type", "wireguard"]).await
    }

    async fn delete_link(&self, interface: &str) -> Result<()> {
        self.ip(interface, &["link", "delete", "dev", interface]).await
    }

    async fn replace_address(&self, interface: &str, address: &IpNet) -> Result<()> {
        let address = address.to_string();
        self.ip(interface, &["address", "replace", &address, "dev", interface]).await
    }

    async fn set_mtu(&self, interface: &str, mtu: u16) -> Result<()> {
        let mtu = mtu.to_string();
        self.ip(interface, &["link", "set", "dev", interface, "mtu", &mtu]).await
    }

    async fn set_up(&self, interface: &str) -> Result<()> {
        self.ip(interface, &["link", "set", "dev", interface, "up"]).await
    }

    async fn add_route(&self, interface: &str, network: &IpNet) -> Result<()> {
        let network = network.trunc().to_string();
        self.ip(interface, &["route", "add", &network, "dev", interface, "scope", "link"]).await
    }
}
