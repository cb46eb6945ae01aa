//! Mesh Client Lifecycle
//!
//! Brings the interface up, seeds the directory node as the first peer,
//! runs the reconciliation schedule until shutdown, then tears the
//! interface down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::control::{InterfaceConfig, LinkControl, TunnelControl};
use crate::directory::PeerDirectory;
use crate::error::{Error, Result};
use crate::keys::PresharedKey;
use crate::node::LocalNode;
use crate::peer::Peer;
use crate::sync::{apply_peers, Reconciler};

/// Lifecycle state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No interface owned
    Stopped,
    /// Interface created, addressed and up
    InterfaceUp,
    /// Directory peer seeded, reconciliation running
    Running,
    /// Tearing the interface down
    ShuttingDown,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "STOPPED"),
            LifecycleState::InterfaceUp => write!(f, "INTERFACE_UP"),
            LifecycleState::Running => write!(f, "RUNNING"),
            LifecycleState::ShuttingDown => write!(f, "SHUTTING_DOWN"),
        }
    }
}

/// Owns the local interface and the reconciliation schedule
pub struct MeshClient {
    node: Arc<LocalNode>,
    tunnel: Arc<dyn TunnelControl>,
    link: Arc<dyn LinkControl>,
    directory_peer: Peer,
    reconciler: Arc<Reconciler>,
    state: LifecycleState,
}

impl MeshClient {
    /// Create a client. `directory_peer` is the WireGuard record of the
    /// directory node itself; `directory` is how its roster is fetched.
    pub fn new(
        node: Arc<LocalNode>,
        tunnel: Arc<dyn TunnelControl>,
        link: Arc<dyn LinkControl>,
        directory: Arc<dyn PeerDirectory>,
        directory_peer: Peer,
        preshared_key: Option<PresharedKey>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&node),
            directory,
            Arc::clone(&tunnel),
            preshared_key,
        ));
        Self {
            node,
            tunnel,
            link,
            directory_peer,
            reconciler,
            state: LifecycleState::Stopped,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The node this client runs as
    pub fn node(&self) -> &LocalNode {
        &self.node
    }

    fn expect_state(&self, expected: LifecycleState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::Config(format!(
                "cannot {} in state {} (expected {})",
                action, self.state, expected
            )));
        }
        Ok(())
    }

    /// Create, key, address and enable the interface.
    ///
    /// A partially configured link is removed again before the error is returned.
    pub async fn bring_up(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::Stopped, "bring up interface")?;
        let iface = self.node.interface.clone();

        self.link.create_link(&iface).await?;
        if let Err(e) = self.configure_link(&iface).await {
            if let Err(cleanup) = self.link.delete_link(&iface).await {
                tracing::warn!("Could not remove half-configured {}: {}", iface, cleanup);
            }
            return Err(e);
        }

        self.state = LifecycleState::InterfaceUp;
        tracing::info!(
            "Interface {} is up with address {} (mtu {})",
            iface,
            self.node.overlay_addr,
            self.node.mtu
        );
        Ok(())
    }

    async fn configure_link(&self, iface: &str) -> Result<()> {
        self.tunnel
            .configure_interface(
                iface,
                &InterfaceConfig {
                    private_key: self.node.private_key.clone(),
                    listen_port: self.node.listen_port,
                },
            )
            .await?;
        self.link.replace_address(iface, &self.node.overlay_addr).await?;
        self.link.set_mtu(iface, self.node.mtu).await?;
        self.link.set_up(iface).await?;

        // Usually "File exists" from an earlier run
        if let Err(e) = self.link.add_route(iface, &self.node.overlay_net).await {
            tracing::debug!("Route for {} not added: {}", self.node.overlay_net, e);
        }
        Ok(())
    }

    /// Register the directory node as the first peer
    pub async fn bootstrap(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::InterfaceUp, "bootstrap")?;

        let mut seed = self.directory_peer.clone();
        seed.preshared_key = self.reconciler.preshared_key();
        if apply_peers(&self.node, self.tunnel.as_ref(), &[seed]).await? == 0 {
            tracing::warn!("Directory key is our own key; no bootstrap peer added");
        }

        self.state = LifecycleState::Running;
        tracing::info!(
            "Client is running. Pubkey: {} IP: {}",
            self.node.public_key,
            self.node.overlay_addr
        );
        Ok(())
    }

    /// Run the reconciliation schedule until `shutdown` resolves.
    ///
    /// The first attempt starts immediately. Each attempt runs on its own
    /// task and hands its next delay back through a single-slot channel;
    /// the timer is only rearmed here, after that delay arrives, so at
    /// most one attempt is in flight. An attempt still running at
    /// shutdown is left behind and its result dropped.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.expect_state(LifecycleState::Running, "run")?;

        let (delay_tx, mut delay_rx) = mpsc::channel::<Duration>(1);
        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);
        tokio::pin!(shutdown);
        let mut armed = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Received shutdown signal");
                    break;
                }
                _ = &mut timer, if armed => {
                    armed = false;
                    let reconciler = Arc::clone(&self.reconciler);
                    let delay_tx = delay_tx.clone();
                    tokio::spawn(async move {
                        let delay = reconciler.reconcile().await;
                        // Receiver is gone once the loop has exited
                        let _ = delay_tx.send(delay).await;
                    });
                }
                Some(delay) = delay_rx.recv() => {
                    tracing::debug!("Next peer sync in {:?}", delay);
                    timer.as_mut().reset(Instant::now() + delay);
                    armed = true;
                }
            }
        }

        if !armed {
            tracing::debug!("Abandoning in-flight peer sync");
        }
        Ok(())
    }

    /// Remove the interface. An interface that is already gone counts as success.
    pub async fn tear_down(&mut self) -> Result<()> {
        self.state = LifecycleState::ShuttingDown;
        let iface = self.node.interface.clone();
        tracing::info!("Exiting...");

        let result = match self.tunnel.device_peers(&iface).await {
            Err(e) if e.is_device_not_found() => Ok(()),
            probe => {
                if let Err(e) = probe {
                    tracing::debug!("Could not inspect {} before removal: {}", iface, e);
                }
                match self.link.delete_link(&iface).await {
                    Err(e) if e.is_device_not_found() => Ok(()),
                    other => other,
                }
            }
        };

        self.state = LifecycleState::Stopped;
        result
    }
}
