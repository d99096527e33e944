//! Outbound role: the leaf side of the mesh.
//!
//! Each process holds at most one upstream connection. On connect it reports
//! its topics with a NODE envelope, adopts every GRAPH the hub sends, and
//! republishes relayed JSON locally tagged as network-originated.

use std::time::Duration;

use mesh_core::Sample;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::MIN_RECONNECT_INTERVAL;
use crate::graph::{NodeAddress, NodeInfo};
use crate::message::Envelope;
use crate::state::BridgeState;
use crate::transport::{self, PeerLink, Side, TransportEvent};

impl BridgeState {
    pub(crate) fn on_outbound_connected(&mut self, link: PeerLink, local_addr: NodeAddress) {
        info!("Upstream {} is Up (local {local_addr})", link.addr());
        self.own_link = Some(local_addr);
        if let Err(e) = link.send(Envelope::Node(self.local_node_info())) {
            warn!("NODE report not sent: {e}");
        }
        self.upstream = Some(link);
    }

    pub(crate) fn on_outbound_disconnected(&mut self, link_id: u64, addr: &NodeAddress) {
        if self.upstream.as_ref().is_some_and(|l| l.id() == link_id) {
            info!("Upstream {addr} is Down");
            self.upstream = None;
            self.own_link = None;
        }
    }

    pub(crate) fn on_outbound_envelope(&mut self, link_id: u64, envelope: Envelope) {
        if !self.upstream.as_ref().is_some_and(|l| l.id() == link_id) {
            debug!("Dropping {} from a stale upstream link", envelope.kind());
            return;
        }
        match envelope {
            Envelope::Graph(graph) => {
                self.graph.replace(graph);
                debug!("graph is {:?}", self.graph.snapshot());
            }
            Envelope::Json { topic, value } => {
                let delivered = self.messenger.publish(&topic, Sample::network(value));
                debug!("Relayed '{topic}' to {delivered} local subscriber(s)");
            }
            Envelope::Node(_) => debug!("Ignoring NODE from upstream"),
            Envelope::Reserved { kind, .. } => debug!("Ignoring {kind} from upstream"),
        }
    }

    /// This process's current publishers and subscribers.
    pub fn local_node_info(&self) -> NodeInfo {
        NodeInfo::from_topics(
            self.messenger.publishers(),
            self.messenger.subscribers(),
            self.name.clone(),
        )
    }

    /// Re-send the NODE report after a local topology change.
    pub(crate) fn announce(&self) {
        if let Some(link) = &self.upstream {
            if let Err(e) = link.send(Envelope::Node(self.local_node_info())) {
                debug!("NODE update not sent: {e}");
            }
        }
    }
}

/// Hold the upstream connection to `target`, reconnecting every `interval`
/// (at least [`MIN_RECONNECT_INTERVAL`]) until shutdown.
pub async fn run_connector<E>(
    target: String,
    interval: Duration,
    events: mpsc::Sender<E>,
    shutdown: broadcast::Sender<()>,
) where
    E: From<TransportEvent> + Send + 'static,
{
    let interval = interval.max(MIN_RECONNECT_INTERVAL);
    let mut stop = shutdown.subscribe();
    loop {
        if events.is_closed() {
            return;
        }

        let attempt = tokio::select! {
            result = transport::connect(&target) => result,
            _ = stop.recv() => return,
        };
        match attempt {
            Ok(stream) => {
                debug!("Connected to upstream {target}");
                let conn_shutdown = shutdown.subscribe();
                let result =
                    transport::run_connection(stream, Side::Outbound, events.clone(), conn_shutdown)
                        .await;
                if let Err(e) = result {
                    warn!("Upstream connection to {target} failed: {e}");
                }
            }
            Err(e) => warn!("{e}; retrying in {}s", interval.as_secs_f32()),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.recv() => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
