//! Publisher and subscriber handles
//!
//! The two roles get distinct owning types so that publishing through a
//! subscription (or copying through an advertisement) is a compile error
//! rather than a runtime one. Dropping a handle releases its registration
//! on the node; the broker's consuming `unadvertise`/`unsubscribe` methods
//! are the explicit spelling of the same thing.

use std::sync::Arc;

use crate::error::Result;
use crate::node::TopicNode;
use crate::subscriber::SubscriberId;
use crate::waitset::{Waiter, WaiterKey};

#[derive(Debug)]
enum PublisherKind {
    /// Bound to a live node
    Live(Arc<TopicNode>),
    /// Produced under a deny rule: publishes vanish without effect
    Denied {
        name: &'static str,
        instance: usize,
        priority: i8,
    },
}

/// Owning handle for the publishing role on one (topic, instance)
#[derive(Debug)]
pub struct Publisher {
    kind: PublisherKind,
}

impl Publisher {
    pub(crate) fn live(node: Arc<TopicNode>) -> Self {
        Self {
            kind: PublisherKind::Live(node),
        }
    }

    pub(crate) fn denied(name: &'static str, instance: usize, priority: i8) -> Self {
        Self {
            kind: PublisherKind::Denied {
                name,
                instance,
                priority,
            },
        }
    }

    pub(crate) fn is_denied(&self) -> bool {
        matches!(self.kind, PublisherKind::Denied { .. })
    }

    /// Write one sample into the node's ring and wake eligible waiters
    pub fn publish(&self, payload: &[u8]) -> Result<()> {
        match &self.kind {
            PublisherKind::Live(node) => node.publish(payload),
            // denied publishers report success so caller flow is preserved
            PublisherKind::Denied { .. } => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            PublisherKind::Live(node) => node.name(),
            PublisherKind::Denied { name, .. } => name,
        }
    }

    /// Instance index this publisher is bound to
    pub fn instance(&self) -> usize {
        match &self.kind {
            PublisherKind::Live(node) => node.instance(),
            PublisherKind::Denied { instance, .. } => *instance,
        }
    }

    pub fn priority(&self) -> i8 {
        match &self.kind {
            PublisherKind::Live(node) => node.priority(),
            PublisherKind::Denied { priority, .. } => *priority,
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if let PublisherKind::Live(node) = &self.kind {
            node.unadvertise();
        }
    }
}

/// Owning handle for the reading role on one (topic, instance)
#[derive(Debug)]
pub struct Subscriber {
    node: Arc<TopicNode>,
    id: SubscriberId,
}

impl Subscriber {
    pub(crate) fn new(node: Arc<TopicNode>, id: SubscriberId) -> Self {
        Self { node, id }
    }

    pub fn name(&self) -> &'static str {
        self.node.name()
    }

    pub fn instance(&self) -> usize {
        self.node.instance()
    }

    /// Copy the next unseen sample into `out`; `out` must match the
    /// descriptor's payload size exactly
    pub fn copy_to(&self, out: &mut [u8]) -> Result<()> {
        self.node.copy_to(self.id, out)
    }

    /// Copy the next unseen sample into a fresh buffer
    pub fn copy(&self) -> Result<Vec<u8>> {
        self.node.copy_vec(self.id)
    }

    /// Whether an unseen sample is pending and the throttle window elapsed
    pub fn check(&self) -> Result<bool> {
        self.node.check(self.id)
    }

    /// Monotonic time of the node's latest publication, 0 if none
    pub fn stat(&self) -> u64 {
        self.node.last_publish_time_us()
    }

    /// Priority of the instance this subscription is bound to
    pub fn priority(&self) -> i8 {
        self.node.priority()
    }

    /// Samples this subscription has skipped past due to ring overflow
    pub fn overflow_count(&self) -> u64 {
        self.node.overflow_count(self.id).unwrap_or(0)
    }

    /// Set the minimum inter-delivery period in microseconds
    pub fn set_interval_us(&self, interval_us: u32) -> Result<()> {
        self.node.set_interval_us(self.id, interval_us)
    }

    pub fn get_interval_us(&self) -> u32 {
        self.node.get_interval_us(self.id).unwrap_or(0)
    }

    /// Millisecond surface over the microsecond throttle
    pub fn set_interval_ms(&self, interval_ms: u32) -> Result<()> {
        self.set_interval_us(interval_ms.saturating_mul(1_000))
    }

    pub fn get_interval_ms(&self) -> u32 {
        self.get_interval_us() / 1_000
    }

    /// Register a wait object to be signalled when this subscription has
    /// fresh data; signals immediately if it already does
    pub fn attach_waiter(&self, waiter: Arc<dyn Waiter>, interest: u32) -> Result<WaiterKey> {
        self.node.register_waiter(waiter, self.id, interest)
    }

    /// Remove a previously attached wait object
    pub fn detach_waiter(&self, key: WaiterKey) -> Result<()> {
        self.node.unregister_waiter(key, self.id)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        // outstanding waiters are woken with SUBSCRIPTION_CLOSED
        let _ = self.node.remove_subscriber(self.id);
    }
}
