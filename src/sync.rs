//! Peer Reconciliation
//!
//! One attempt fetches the roster, stamps the mesh-wide preshared key,
//! drops our own entry and upserts the rest into the WireGuard device.
//! Attempts never fail: errors are logged and the next delay is still
//! returned so the schedule keeps going.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::control::TunnelControl;
use crate::directory::PeerDirectory;
use crate::error::{Error, Result};
use crate::keys::PresharedKey;
use crate::node::LocalNode;
use crate::peer::{Peer, PeerConfig};

/// Shortest delay between attempts
pub const SYNC_INTERVAL_MIN: Duration = Duration::from_secs(20);

/// Upper bound (exclusive) of the delay between attempts
pub const SYNC_INTERVAL_MAX: Duration = Duration::from_secs(40);

/// Uniformly random delay in `[SYNC_INTERVAL_MIN, SYNC_INTERVAL_MAX)`
pub fn next_delay() -> Duration {
    jittered(SYNC_INTERVAL_MIN..SYNC_INTERVAL_MAX)
}

fn jittered(range: Range<Duration>) -> Duration {
    let ms = rand::thread_rng().gen_range(range.start.as_millis() as u64..range.end.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Apply the mesh-wide preshared key policy to every record
pub fn stamp_preshared_key(peers: &mut [Peer], preshared_key: Option<PresharedKey>) {
    for peer in peers.iter_mut() {
        peer.preshared_key = preshared_key;
    }
}

/// Upsert `peers` into the node's device, skipping the node itself.
///
/// Returns the number of peer configs submitted. Nothing is submitted
/// when no peer remains after filtering.
pub async fn apply_peers(node: &LocalNode, control: &dyn TunnelControl, peers: &[Peer]) -> Result<usize> {
    let configs: Vec<PeerConfig> = peers
        .iter()
        .filter(|p| !node.is_self(&p.public_key))
        .map(|p| p.to_peer_config(&node.overlay_net))
        .collect();

    if configs.is_empty() {
        return Ok(0);
    }

    control.upsert_peers(&node.interface, &configs).await?;
    Ok(configs.len())
}

/// Runs reconciliation attempts against one directory
pub struct Reconciler {
    node: Arc<LocalNode>,
    directory: Arc<dyn PeerDirectory>,
    control: Arc<dyn TunnelControl>,
    preshared_key: Option<PresharedKey>,
}

impl Reconciler {
    pub fn new(
        node: Arc<LocalNode>,
        directory: Arc<dyn PeerDirectory>,
        control: Arc<dyn TunnelControl>,
        preshared_key: Option<PresharedKey>,
    ) -> Self {
        Self {
            node,
            directory,
            control,
            preshared_key,
        }
    }

    /// Mesh-wide preshared key applied to every peer
    pub fn preshared_key(&self) -> Option<PresharedKey> {
        self.preshared_key
    }

    /// Run one attempt and return the delay before the next one
    pub async fn reconcile(&self) -> Duration {
        self.sync_once().await;
        next_delay()
    }

    async fn sync_once(&self) {
        let mut peers = match self.directory.fetch_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                // Keep whatever is configured; never clear speculatively
                log_failure("Could not fetch peers", &e);
                return;
            }
        };

        stamp_preshared_key(&mut peers, self.preshared_key);

        match apply_peers(&self.node, self.control.as_ref(), &peers).await {
            Ok(applied) => tracing::debug!(
                fetched = peers.len(),
                applied,
                interface = %self.node.interface,
                "Reconciled peers"
            ),
            Err(e) => log_failure("Could not add peers", &e),
        }
    }
}

/// Transient failures are retried next cycle; anything else points at the host
fn log_failure(what: &str, e: &Error) {
    if e.is_transient() {
        tracing::warn!("{}: {}", what, e);
    } else {
        tracing::error!("{}: {}", what, e);
    }
}
