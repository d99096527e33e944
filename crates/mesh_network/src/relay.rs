//! Relay engine: carries locally published values into the mesh.
//!
//! [`RelayEngine::install`] hooks the messenger so every advertised topic
//! gets one hidden relay subscription. The subscription callback runs on the
//! publisher's thread; it drops network-originated samples (they already
//! came from the mesh) and posts the rest to the event loop, which decides
//! where they go in [`BridgeState::relay_local`].

use std::collections::HashMap;
use std::sync::Arc;

use mesh_core::{HookId, Messenger, Subscriber, Value, WeakMessenger};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::message::Envelope;
use crate::state::{BridgeEvent, BridgeState};

/// Relay subscriptions keyed by topic.
type RelayTable = Arc<Mutex<HashMap<String, Subscriber>>>;

/// Owns the relay subscriptions and hooks installed on a messenger.
pub struct RelayEngine {
    messenger: WeakMessenger,
    hooks: Vec<HookId>,
    relays: RelayTable,
}

impl RelayEngine {
    /// Install relays for every current publisher and hook future ones.
    ///
    /// New publishers and subscribers also post
    /// [`BridgeEvent::TopologyChanged`] so the upstream NODE report stays
    /// current.
    pub fn install(messenger: &Messenger, events: mpsc::Sender<BridgeEvent>) -> Self {
        let relays: RelayTable = Arc::new(Mutex::new(HashMap::new()));

        let weak = messenger.downgrade();
        let hook_relays = Arc::clone(&relays);
        let hook_events = events.clone();
        let on_pub = messenger.on_new_publisher(move |info| {
            install_relay(&weak, &hook_relays, &info.topic, &hook_events);
            post(&hook_events, BridgeEvent::TopologyChanged);
        });

        let sub_events = events.clone();
        let on_sub = messenger.on_new_subscriber(move |_| {
            post(&sub_events, BridgeEvent::TopologyChanged);
        });

        let weak = messenger.downgrade();
        for info in messenger.publishers() {
            install_relay(&weak, &relays, &info.topic, &events);
        }

        Self {
            messenger: weak,
            hooks: vec![on_pub, on_sub],
            relays,
        }
    }

    /// Topics that currently have a relay subscription.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.relays.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Remove the messenger hooks and every relay subscription.
    pub fn shutdown(&self) {
        if let Some(messenger) = self.messenger.upgrade() {
            for hook in &self.hooks {
                messenger.remove_hook(*hook);
            }
        }
        for (_, relay) in self.relays.lock().drain() {
            relay.shutdown();
        }
    }
}

/// Hand an event to the loop from a messenger callback, which must not block.
fn post(events: &mpsc::Sender<BridgeEvent>, event: BridgeEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(BridgeEvent::LocalPublish { topic, .. })) => {
            warn!("Event queue full, dropping sample on '{topic}'")
        }
        Err(TrySendError::Full(_)) => warn!("Event queue full, dropping topology update"),
        Err(TrySendError::Closed(_)) => trace!("Event loop gone"),
    }
}

fn install_relay(
    messenger: &WeakMessenger,
    relays: &RelayTable,
    topic: &str,
    events: &mpsc::Sender<BridgeEvent>,
) {
    let Some(messenger) = messenger.upgrade() else {
        return;
    };
    let mut relays = relays.lock();
    if relays.contains_key(topic) {
        return;
    }

    let events = events.clone();
    let relay_topic = topic.to_string();
    let subscriber = messenger.subscribe_internal(topic, move |sample| {
        if sample.is_from_network() {
            trace!("Not relaying network sample on '{relay_topic}'");
            return;
        }
        let event = BridgeEvent::LocalPublish {
            topic: relay_topic.clone(),
            value: sample.value.clone(),
        };
        post(&events, event);
    });
    debug!("Relaying topic '{topic}'");
    relays.insert(topic.to_string(), subscriber);
}

impl BridgeState {
    /// Route a locally published value.
    ///
    /// A leaf sends it upstream; a hub sends it to every graph node except
    /// itself, since its own subscribers already received it.
    pub(crate) fn relay_local(&self, topic: &str, value: Value) {
        let envelope = Envelope::json(topic, value);
        if !self.is_hub() {
            match &self.upstream {
                Some(link) => {
                    if let Err(e) = link.send(envelope) {
                        warn!("Relay of '{topic}' failed: {e}");
                    }
                }
                None => warn!("No upstream connection, dropping '{topic}'"),
            }
            return;
        }

        let sent = self.send_to_graph(&envelope, self.own_link.as_ref());
        trace!("Relayed '{topic}' to {sent} node(s)");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
