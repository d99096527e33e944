//! Bridge state and event dispatch.
//!
//! [`BridgeState`] is owned by exactly one task, the node's event loop. Every
//! mutation of the graph or the connection tables arrives as a
//! [`BridgeEvent`] and is applied by [`BridgeState::handle`]; the inbound,
//! outbound and relay behaviour live in their own modules as `impl` blocks.

use std::collections::HashMap;

use mesh_core::{Messenger, Value};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::NetworkError;
use crate::graph::{Graph, GraphStore, NodeAddress};
use crate::message::Envelope;
use crate::transport::{PeerLink, Side, TransportEvent};

/// Everything the event loop reacts to.
#[derive(Debug)]
pub enum BridgeEvent {
    Transport(TransportEvent),
    /// A locally originated sample to be relayed into the mesh.
    LocalPublish { topic: String, value: Value },
    /// A local publisher or subscriber was registered.
    TopologyChanged,
    QueryGraph(oneshot::Sender<Graph>),
    QueryStatus(oneshot::Sender<NodeStatus>),
}

impl From<TransportEvent> for BridgeEvent {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

/// Point-in-time summary of a node's connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    /// Remote addresses of the accepted connections.
    pub inbound: Vec<NodeAddress>,
    /// Remote address of the upstream connection, if up.
    pub upstream: Option<NodeAddress>,
    /// Our end of the upstream connection.
    pub own_link: Option<NodeAddress>,
    pub graph_nodes: usize,
}

/// Mutable state of one bridge process.
pub struct BridgeState {
    pub(crate) graph: GraphStore,
    pub(crate) inbound: HashMap<NodeAddress, PeerLink>,
    pub(crate) upstream: Option<PeerLink>,
    /// Local address of the upstream connection. A hub dialing its own
    /// listener sees this process's link registered under it.
    pub(crate) own_link: Option<NodeAddress>,
    pub(crate) messenger: Messenger,
    pub(crate) name: Option<String>,
}

impl BridgeState {
    pub fn new(messenger: Messenger, name: Option<String>) -> Self {
        Self {
            graph: GraphStore::new(),
            inbound: HashMap::new(),
            upstream: None,
            own_link: None,
            messenger,
            name,
        }
    }

    /// Apply one event.
    pub fn handle(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Transport(TransportEvent::Connected {
                side,
                link,
                local_addr,
            }) => match side {
                Side::Inbound => self.on_inbound_connected(link),
                Side::Outbound => self.on_outbound_connected(link, local_addr),
            },
            BridgeEvent::Transport(TransportEvent::Message {
                side,
                link_id,
                from,
                envelope,
            }) => {
                trace!("{} from {side} {from}", envelope.kind());
                match side {
                    Side::Inbound => self.on_inbound_envelope(&from, envelope),
                    Side::Outbound => self.on_outbound_envelope(link_id, envelope),
                }
            }
            BridgeEvent::Transport(TransportEvent::Disconnected {
                side,
                link_id,
                addr,
            }) => match side {
                Side::Inbound => self.on_inbound_disconnected(link_id, &addr),
                Side::Outbound => self.on_outbound_disconnected(link_id, &addr),
            },
            BridgeEvent::LocalPublish { topic, value } => self.relay_local(&topic, value),
            BridgeEvent::TopologyChanged => self.announce(),
            BridgeEvent::QueryGraph(reply) => {
                let _ = reply.send(self.graph.snapshot());
            }
            BridgeEvent::QueryStatus(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Whether any inbound connection exists, which makes this process a hub.
    pub fn is_hub(&self) -> bool {
        !self.inbound.is_empty()
    }

    pub(crate) fn is_own_link(&self, addr: &NodeAddress) -> bool {
        self.own_link.as_ref() == Some(addr)
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn status(&self) -> NodeStatus {
        let mut inbound: Vec<NodeAddress> = self.inbound.keys().cloned().collect();
        inbound.sort();
        NodeStatus {
            inbound,
            upstream: self.upstream.as_ref().map(|l| l.addr().clone()),
            own_link: self.own_link.clone(),
            graph_nodes: self.graph.len(),
        }
    }

    /// Send a copy of `envelope` to every graph node that has an inbound
    /// connection, except `skip`.
    ///
    /// Graph entries without a connection are logged and skipped, as are
    /// peers whose send queue is full.
    pub(crate) fn send_to_graph(&self, envelope: &Envelope, skip: Option<&NodeAddress>) -> usize {
        let mut sent = 0;
        for addr in self.graph.addresses() {
            if Some(addr) == skip {
                continue;
            }
            match self.inbound.get(addr) {
                Some(link) => match link.send(envelope.clone()) {
                    Ok(()) => sent += 1,
                    Err(e @ NetworkError::QueueFull(_)) => {
                        warn!("{e}, dropping {}", envelope.kind())
                    }
                    Err(e) => debug!("{e}"),
                },
                None => debug!("Can't find connection {addr}"),
            }
        }
        sent
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
