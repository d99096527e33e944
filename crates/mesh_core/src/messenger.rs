//! In-process publish/subscribe core.
//!
//! [`Messenger`] is a cloneable handle over shared topic tables. Delivery is
//! synchronous: [`Messenger::publish`] runs every subscriber callback on the
//! calling thread, after the tables' locks have been released, so callbacks
//! may freely advertise or subscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::sample::Sample;
use crate::value::Value;

/// Callback invoked for every sample published on a subscribed topic.
pub type SampleCallback = Arc<dyn Fn(&Sample) + Send + Sync>;

/// Hook invoked when a publisher or subscriber is registered.
pub type TopicHook = Arc<dyn Fn(&TopicInfo) + Send + Sync>;

/// Handle for removing a hook registered with [`Messenger::on_new_publisher`]
/// or [`Messenger::on_new_subscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// A topic registration as reported in node info.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicInfo {
    pub topic: String,
    pub type_name: String,
}

struct PublisherEntry {
    id: u64,
    info: TopicInfo,
}

struct SubscriberEntry {
    id: u64,
    info: TopicInfo,
    /// Hidden from [`Messenger::subscribers`].
    internal: bool,
    callback: SampleCallback,
}

#[derive(Default)]
struct Inner {
    publishers: RwLock<Vec<PublisherEntry>>,
    subscribers: RwLock<HashMap<String, Vec<Arc<SubscriberEntry>>>>,
    publisher_hooks: RwLock<Vec<(HookId, TopicHook)>>,
    subscriber_hooks: RwLock<Vec<(HookId, TopicHook)>>,
    next_id: AtomicU64,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Handle to a process-local pub/sub core.
#[derive(Clone, Default)]
pub struct Messenger {
    inner: Arc<Inner>,
}

/// Non-owning handle, for hooks that need to call back into the messenger.
#[derive(Clone)]
pub struct WeakMessenger {
    inner: Weak<Inner>,
}

impl WeakMessenger {
    pub fn upgrade(&self) -> Option<Messenger> {
        self.inner.upgrade().map(|inner| Messenger { inner })
    }
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakMessenger {
        WeakMessenger {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a publisher for `topic` and fire the new-publisher hooks.
    pub fn advertise(&self, topic: &str, type_name: &str) -> Publisher {
        let id = self.inner.next_id();
        let info = TopicInfo {
            topic: topic.to_string(),
            type_name: type_name.to_string(),
        };
        self.inner.publishers.write().push(PublisherEntry {
            id,
            info: info.clone(),
        });
        debug!("Advertised publisher on '{topic}' ({type_name})");

        let hooks = self.inner.publisher_hooks.read().clone();
        for (_, hook) in hooks {
            hook(&info);
        }

        Publisher {
            id,
            info,
            messenger: self.clone(),
        }
    }

    /// Subscribe to `topic`. The callback receives both local and
    /// network-originated samples.
    pub fn subscribe<F>(
        &self,
        topic: &str,
        type_name: &str,
        queue_depth: usize,
        callback: F,
    ) -> Subscriber
    where
        F: Fn(&Sample) + Send + Sync + 'static,
    {
        self.register_subscriber(topic, type_name, queue_depth, false, Arc::new(callback))
    }

    /// Subscribe without appearing in [`subscribers`](Self::subscribers) and
    /// without firing the new-subscriber hooks.
    pub fn subscribe_internal<F>(&self, topic: &str, callback: F) -> Subscriber
    where
        F: Fn(&Sample) + Send + Sync + 'static,
    {
        self.register_subscriber(topic, "", 0, true, Arc::new(callback))
    }

    fn register_subscriber(
        &self,
        topic: &str,
        type_name: &str,
        queue_depth: usize,
        internal: bool,
        callback: SampleCallback,
    ) -> Subscriber {
        let id = self.inner.next_id();
        let info = TopicInfo {
            topic: topic.to_string(),
            type_name: type_name.to_string(),
        };
        let entry = Arc::new(SubscriberEntry {
            id,
            info: info.clone(),
            internal,
            callback,
        });
        self.inner
            .subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(entry);

        if !internal {
            debug!("Subscribed to '{topic}' (queue depth {queue_depth})");
            let hooks = self.inner.subscriber_hooks.read().clone();
            for (_, hook) in hooks {
                hook(&info);
            }
        }

        Subscriber {
            id,
            topic: topic.to_string(),
            messenger: self.clone(),
        }
    }

    /// Deliver a sample to every subscriber of `topic`. Returns the number
    /// of callbacks invoked.
    pub fn publish(&self, topic: &str, sample: Sample) -> usize {
        let targets: Vec<Arc<SubscriberEntry>> = match self.inner.subscribers.read().get(topic) {
            Some(list) => list.clone(),
            None => return 0,
        };

        trace!("Publishing on '{topic}' to {} subscriber(s)", targets.len());
        for entry in &targets {
            (entry.callback)(&sample);
        }
        targets.len()
    }

    /// Publish a locally produced value.
    pub fn publish_local(&self, topic: &str, value: impl Into<Value>) -> usize {
        self.publish(topic, Sample::local(value))
    }

    /// All registered publishers.
    pub fn publishers(&self) -> Vec<TopicInfo> {
        self.inner
            .publishers
            .read()
            .iter()
            .map(|p| p.info.clone())
            .collect()
    }

    /// All user-visible subscribers.
    pub fn subscribers(&self) -> Vec<TopicInfo> {
        self.inner
            .subscribers
            .read()
            .values()
            .flatten()
            .filter(|s| !s.internal)
            .map(|s| s.info.clone())
            .collect()
    }

    /// Register a hook fired after every new publisher.
    pub fn on_new_publisher<F>(&self, hook: F) -> HookId
    where
        F: Fn(&TopicInfo) + Send + Sync + 'static,
    {
        let id = HookId(self.inner.next_id());
        self.inner.publisher_hooks.write().push((id, Arc::new(hook)));
        id
    }

    /// Register a hook fired after every new visible subscriber.
    pub fn on_new_subscriber<F>(&self, hook: F) -> HookId
    where
        F: Fn(&TopicInfo) + Send + Sync + 'static,
    {
        let id = HookId(self.inner.next_id());
        self.inner.subscriber_hooks.write().push((id, Arc::new(hook)));
        id
    }

    /// Unregister a hook. Returns false if it was already gone.
    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut removed = false;
        for hooks in [&self.inner.publisher_hooks, &self.inner.subscriber_hooks] {
            let mut hooks = hooks.write();
            let before = hooks.len();
            hooks.retain(|(hook_id, _)| *hook_id != id);
            removed |= hooks.len() != before;
        }
        removed
    }

    fn remove_publisher(&self, id: u64) {
        self.inner.publishers.write().retain(|p| p.id != id);
    }

    fn remove_subscriber(&self, topic: &str, id: u64) {
        let mut subs = self.inner.subscribers.write();
        if let Some(list) = subs.get_mut(topic) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subs.remove(topic);
            }
        }
    }
}

/// Handle returned by [`Messenger::advertise`].
#[derive(Clone)]
pub struct Publisher {
    id: u64,
    info: TopicInfo,
    messenger: Messenger,
}

impl Publisher {
    pub fn topic(&self) -> &str {
        &self.info.topic
    }

    pub fn type_name(&self) -> &str {
        &self.info.type_name
    }

    /// Publish a local value on this publisher's topic.
    pub fn publish(&self, value: impl Into<Value>) -> usize {
        self.messenger.publish_local(&self.info.topic, value)
    }

    /// Unregister the publisher.
    pub fn shutdown(&self) {
        self.messenger.remove_publisher(self.id);
    }
}

/// Handle returned by [`Messenger::subscribe`].
#[derive(Clone)]
pub struct Subscriber {
    id: u64,
    topic: String,
    messenger: Messenger,
}

impl Subscriber {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop receiving samples.
    pub fn shutdown(&self) {
        self.messenger.remove_subscriber(&self.topic, self.id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
