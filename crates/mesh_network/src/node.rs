//! MeshNode: top-level coordinator for the socket bridge.
//!
//! [`MeshNode`] is the primary public API for mesh_network. It manages:
//! - TCP listener (accept inbound connections, unless client-only)
//! - Outbound connector (hold one upstream connection, reconnecting)
//! - Relay engine (hook the local messenger)
//! - Event loop (the only task that touches graph and connection tables)

use std::net::SocketAddr;

use mesh_core::Messenger;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::graph::Graph;
use crate::outbound;
use crate::relay::RelayEngine;
use crate::state::{BridgeEvent, BridgeState, NodeStatus};
use crate::transport;

/// Events the loop may have pending before transport readers wait and
/// messenger callbacks start dropping.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// One process's bridge into the mesh.
///
/// Create one per process. Call [`start()`](MeshNode::start) to bind the
/// listener, dial upstream and begin relaying.
pub struct MeshNode {
    /// Network configuration.
    config: NetworkConfig,
    /// The local pub/sub core being bridged.
    messenger: Messenger,
    /// Sender half of the event loop's queue.
    events_tx: mpsc::Sender<BridgeEvent>,
    /// Receiver half, taken by the loop on start.
    events_rx: Option<mpsc::Receiver<BridgeEvent>>,
    /// Shutdown signal broadcaster.
    shutdown_tx: Option<broadcast::Sender<()>>,
    relay: Option<RelayEngine>,
    /// Address the listener is bound to.
    local_addr: Option<SocketAddr>,
    /// Whether the node is currently running.
    running: bool,
}

impl MeshNode {
    /// Create a new node bridging `messenger` with the given config.
    pub fn new(config: NetworkConfig, messenger: Messenger) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        Self {
            config: config.normalized(),
            messenger,
            events_tx,
            events_rx: Some(events_rx),
            shutdown_tx: None,
            relay: None,
            local_addr: None,
            running: false,
        }
    }

    /// Return the node's configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Whether the node is currently running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The bound listener address; `None` when client-only or not started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Start the node. Binds the listener, dials upstream and installs the
    /// relay engine.
    ///
    /// Fails with [`NetworkError::Bind`] if the server address is taken;
    /// run additional processes on the same host with `client_only`.
    pub async fn start(&mut self) -> Result<(), NetworkError> {
        if self.running {
            return Ok(());
        }
        if self.events_rx.is_none() {
            return Err(NetworkError::Stopped);
        }

        let listener = if self.config.client_only {
            None
        } else {
            let listener = TcpListener::bind(&self.config.server)
                .await
                .map_err(|source| NetworkError::Bind {
                    addr: self.config.server.clone(),
                    source,
                })?;
            Some(listener)
        };

        let events_rx = self.events_rx.take().ok_or(NetworkError::Stopped)?;
        let (shutdown_tx, _) = broadcast::channel(8);
        self.shutdown_tx = Some(shutdown_tx.clone());

        // A listening node dials its own listener, so the hub also sees
        // itself as a graph node.
        let upstream = match listener {
            Some(listener) => {
                let bound = listener.local_addr()?;
                self.local_addr = Some(bound);
                info!("Mesh server listening on {bound}");
                tokio::spawn(transport::run_listener(
                    listener,
                    self.events_tx.clone(),
                    shutdown_tx.clone(),
                ));
                bound.to_string()
            }
            None => self.config.server.clone(),
        };

        let state = BridgeState::new(self.messenger.clone(), self.config.name.clone());
        tokio::spawn(Self::event_loop(state, events_rx, shutdown_tx.subscribe()));

        self.relay = Some(RelayEngine::install(&self.messenger, self.events_tx.clone()));

        tokio::spawn(outbound::run_connector(
            upstream.clone(),
            self.config.reconnect_interval,
            self.events_tx.clone(),
            shutdown_tx,
        ));

        self.running = true;
        info!(
            "MeshNode started (upstream {upstream}{})",
            if self.config.client_only { ", client only" } else { "" }
        );
        Ok(())
    }

    /// Stop the node. Closes all connections and shuts down background
    /// tasks. A stopped node cannot be started again.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(relay) = self.relay.take() {
            relay.shutdown();
        }
        if self.running {
            self.running = false;
            info!("MeshNode stopped");
        }
    }

    /// Snapshot of this node's graph view.
    pub async fn graph(&self) -> Result<Graph, NetworkError> {
        let (tx, rx) = oneshot::channel();
        self.query(BridgeEvent::QueryGraph(tx)).await?;
        rx.await.map_err(|_| NetworkError::NotRunning)
    }

    /// Snapshot of this node's connections.
    pub async fn status(&self) -> Result<NodeStatus, NetworkError> {
        let (tx, rx) = oneshot::channel();
        self.query(BridgeEvent::QueryStatus(tx)).await?;
        rx.await.map_err(|_| NetworkError::NotRunning)
    }

    async fn query(&self, event: BridgeEvent) -> Result<(), NetworkError> {
        if !self.running {
            return Err(NetworkError::NotRunning);
        }
        self.events_tx
            .send(event)
            .await
            .map_err(|_| NetworkError::NotRunning)
    }

    // -----------------------------------------------------------------------
    // Internal tasks
    // -----------------------------------------------------------------------

    /// Main event loop. Applies every event to the bridge state in order.
    async fn event_loop(
        mut state: BridgeState,
        mut events_rx: mpsc::Receiver<BridgeEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => state.handle(event),
                    None => break,
                },
                _ = shutdown.recv() => {
                    debug!("Event loop shutting down");
                    break;
                }
            }
        }
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
