//! Directory Client
//!
//! Fetches the current mesh roster from the directory node over HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::peer::Peer;

/// Long enough to cover one retransmitted handshake through the tunnel
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(11);

/// Source of the mesh roster
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Fetch the full current peer list. No retries.
    async fn fetch_peers(&self) -> Result<Vec<Peer>>;
}

/// HTTP client for the directory's peer list
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
    address: SocketAddr,
    url: String,
}

impl DirectoryClient {
    /// Create a client for the directory at `address` with a whole-request timeout
    pub fn new(address: SocketAddr, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            address,
            url: format!("http://{}/", address),
        })
    }

    /// Directory address this client talks to
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn transport_error(&self, reason: impl ToString) -> Error {
        Error::Transport {
            address: self.address.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PeerDirectory for DirectoryClient {
    async fn fetch_peers(&self) -> Result<Vec<Peer>> {
        tracing::debug!("Fetching peers from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.transport_error(format!("HTTP {}", status)));
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let peers: Vec<Peer> = serde_json::from_slice(&body).map_err(|e| Error::Decode {
            address: self.address.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Fetched {} peers from {}", peers.len(), self.address);
        Ok(peers)
    }
}
