//! Inbound role: the hub side of the mesh.
//!
//! A hub keeps one entry per accepted connection, folds NODE reports into
//! its graph, pushes the whole graph to every peer whenever it changes, and
//! floods JSON envelopes to everyone but their sender.

use tracing::{debug, info};

use crate::graph::{NodeAddress, NodeInfo};
use crate::message::Envelope;
use crate::state::BridgeState;
use crate::transport::PeerLink;

impl BridgeState {
    pub(crate) fn on_inbound_connected(&mut self, link: PeerLink) {
        let addr = link.addr().clone();
        info!("{addr} is Up");
        // Registered now; the graph entry only appears with its NODE report.
        self.inbound.insert(addr, link);
    }

    pub(crate) fn on_inbound_disconnected(&mut self, link_id: u64, addr: &NodeAddress) {
        match self.inbound.get(addr) {
            Some(link) if link.id() == link_id => {}
            _ => {
                debug!("Ignoring stale disconnect for {addr}");
                return;
            }
        }
        self.inbound.remove(addr);
        self.graph.remove(addr);
        info!("{addr} is Down");
        self.broadcast_graph();
    }

    pub(crate) fn on_inbound_envelope(&mut self, from: &NodeAddress, envelope: Envelope) {
        match envelope {
            Envelope::Node(info) => self.on_node_report(from, info),
            envelope @ Envelope::Json { .. } => {
                self.send_to_graph(&envelope, Some(from));
            }
            Envelope::Graph(_) => debug!("Ignoring GRAPH from inbound peer {from}"),
            Envelope::Reserved { kind, .. } => debug!("Ignoring {kind} from {from}"),
        }
    }

    fn on_node_report(&mut self, from: &NodeAddress, info: NodeInfo) {
        debug!(
            "NODE from {from}: {} publisher(s), {} subscriber(s)",
            info.pubs.len(),
            info.subs.len()
        );
        self.graph.upsert(from.clone(), info);
        self.broadcast_graph();
    }

    /// Push the full graph to every inbound connection except this
    /// process's own loopback link.
    pub(crate) fn broadcast_graph(&self) {
        let envelope = Envelope::Graph(self.graph.snapshot());
        for (addr, link) in &self.inbound {
            if self.is_own_link(addr) {
                continue;
            }
            if let Err(e) = link.send(envelope.clone()) {
                debug!("GRAPH to {addr} not sent: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::state::BridgeEvent;
    use crate::state::tests::{connect_inbound, drain, inbound_message, test_link};
    use crate::transport::{Side, TransportEvent};
    use mesh_core::Messenger;

    fn report(pubs: &[&str], subs: &[&str]) -> NodeInfo {
        NodeInfo {
            pubs: pubs.iter().map(|t| (t.to_string(), "float".to_string())).collect(),
            subs: subs.iter().map(|t| (t.to_string(), "float".to_string())).collect(),
            name: None,
        }
    }

    fn only_graph(envelopes: Vec<Envelope>) -> Graph {
        match envelopes.as_slice() {
            [Envelope::Graph(graph)] => graph.clone(),
            other => panic!("expected one GRAPH, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_registers_without_graph_entry() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (link, mut rx) = test_link("10.0.0.2:40000");
        connect_inbound(&mut state, link);

        assert!(state.is_hub());
        assert!(state.graph.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_node_report_updates_graph_and_broadcasts() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (a, mut rx_a) = test_link("a:1");
        let (b, mut rx_b) = test_link("b:2");
        connect_inbound(&mut state, a);
        connect_inbound(&mut state, b);

        inbound_message(&mut state, "a:1", Envelope::Node(report(&["temp"], &[])));

        let graph = only_graph(drain(&mut rx_a));
        assert_eq!(graph, only_graph(drain(&mut rx_b)));
        assert!(graph[&NodeAddress::from("a:1")].publishes("temp"));
    }

    #[test]
    fn test_node_report_is_last_write_wins() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (a, _rx_a) = test_link("a:1");
        connect_inbound(&mut state, a);

        inbound_message(&mut state, "a:1", Envelope::Node(report(&["temp", "humidity"], &[])));
        inbound_message(&mut state, "a:1", Envelope::Node(report(&[], &["pressure"])));

        assert_eq!(state.graph.get(&"a:1".into()), Some(&report(&[], &["pressure"])));
    }

    #[test]
    fn test_json_floods_all_but_sender() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let mut rxs = Vec::new();
        for addr in ["a:1", "b:2", "c:3"] {
            let (link, rx) = test_link(addr);
            connect_inbound(&mut state, link);
            state.graph.upsert(addr.into(), NodeInfo::default());
            rxs.push(rx);
        }

        let env = Envelope::json("temp", 21.5);
        inbound_message(&mut state, "a:1", env.clone());

        assert!(drain(&mut rxs[0]).is_empty());
        assert_eq!(drain(&mut rxs[1]), vec![env.clone()]);
        assert_eq!(drain(&mut rxs[2]), vec![env]);
    }

    #[test]
    fn test_json_flood_matches_addresses_exactly() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (a, mut rx_a) = test_link("10.0.0.1:5000");
        let (b, mut rx_b) = test_link("10.0.0.12:5000");
        connect_inbound(&mut state, a);
        connect_inbound(&mut state, b);
        state.graph.upsert("10.0.0.1:5000".into(), NodeInfo::default());
        state.graph.upsert("10.0.0.12:5000".into(), NodeInfo::default());

        inbound_message(&mut state, "10.0.0.1:5000", Envelope::json("t", 1));

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_disconnect_converges_graph() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (a, mut rx_a) = test_link("a:1");
        let (b, rx_b) = test_link("b:2");
        let b_id = b.id();
        connect_inbound(&mut state, a);
        connect_inbound(&mut state, b);
        inbound_message(&mut state, "a:1", Envelope::Node(report(&["temp"], &[])));
        inbound_message(&mut state, "b:2", Envelope::Node(report(&[], &["temp"])));
        drain(&mut rx_a);
        drop(rx_b);

        state.handle(BridgeEvent::Transport(TransportEvent::Disconnected {
            side: Side::Inbound,
            link_id: b_id,
            addr: "b:2".into(),
        }));

        assert!(!state.inbound.contains_key(&NodeAddress::from("b:2")));
        let graph = only_graph(drain(&mut rx_a));
        assert_eq!(graph.len(), 1);
        assert!(graph.contains_key(&NodeAddress::from("a:1")));
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_link() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (old, _rx_old) = test_link("a:1");
        let old_id = old.id();
        connect_inbound(&mut state, old);
        let (new, _rx_new) = test_link("a:1");
        connect_inbound(&mut state, new);

        state.handle(BridgeEvent::Transport(TransportEvent::Disconnected {
            side: Side::Inbound,
            link_id: old_id,
            addr: "a:1".into(),
        }));
        assert!(state.inbound.contains_key(&NodeAddress::from("a:1")));
    }

    #[test]
    fn test_json_flood_reaches_own_link() {
        // The hub's local subscribers are fed through its own loopback link.
        let mut state = BridgeState::new(Messenger::new(), None);
        let (own, mut rx_own) = test_link("127.0.0.1:41000");
        let (leaf, _rx_leaf) = test_link("127.0.0.1:42000");
        connect_inbound(&mut state, own);
        connect_inbound(&mut state, leaf);
        state.own_link = Some("127.0.0.1:41000".into());
        state.graph.upsert("127.0.0.1:41000".into(), NodeInfo::default());
        state.graph.upsert("127.0.0.1:42000".into(), NodeInfo::default());

        inbound_message(&mut state, "127.0.0.1:42000", Envelope::json("t", 1));
        assert_eq!(drain(&mut rx_own), vec![Envelope::json("t", 1)]);
    }

    #[test]
    fn test_broadcast_skips_own_link() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (own, mut rx_own) = test_link("127.0.0.1:41000");
        let (leaf, mut rx_leaf) = test_link("127.0.0.1:42000");
        connect_inbound(&mut state, own);
        connect_inbound(&mut state, leaf);
        state.own_link = Some("127.0.0.1:41000".into());

        inbound_message(&mut state, "127.0.0.1:42000", Envelope::Node(NodeInfo::default()));

        assert!(drain(&mut rx_own).is_empty());
        assert_eq!(drain(&mut rx_leaf).len(), 1);
    }

    #[test]
    fn test_broadcast_skip_matches_own_link_exactly() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (own, mut rx_own) = test_link("10.0.0.1:5000");
        let (near, mut rx_near) = test_link("10.0.0.12:5000");
        let (other, mut rx_other) = test_link("10.0.0.3:5000");
        connect_inbound(&mut state, own);
        connect_inbound(&mut state, near);
        connect_inbound(&mut state, other);
        state.own_link = Some("10.0.0.1:5000".into());

        inbound_message(&mut state, "10.0.0.3:5000", Envelope::Node(report(&["temp"], &[])));

        assert!(drain(&mut rx_own).is_empty());
        let graph = only_graph(drain(&mut rx_near));
        assert!(graph[&NodeAddress::from("10.0.0.3:5000")].publishes("temp"));
        assert_eq!(only_graph(drain(&mut rx_other)), graph);
    }

    #[test]
    fn test_reserved_and_graph_are_ignored() {
        let mut state = BridgeState::new(Messenger::new(), None);
        let (a, mut rx_a) = test_link("a:1");
        connect_inbound(&mut state, a);

        let reserved = Envelope::Reserved {
            kind: crate::message::MessageKind::NewPub,
            fields: vec![],
        };
        inbound_message(&mut state, "a:1", reserved);
        inbound_message(&mut state, "a:1", Envelope::Graph(Graph::new()));

        assert!(state.graph.is_empty());
        assert!(drain(&mut rx_a).is_empty());
    }
}
