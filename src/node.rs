//! Per-topic node: one (topic, instance) pair
//!
//! A node owns the bounded sample ring, the wrapping generation counter,
//! the subscriber slots, and the waiter set. It moves through three
//! informal states: uninitialized (created, nothing published yet; reads
//! report no data), advertised (live publishers, all reads valid), and
//! quiescent (publishers gone, last ring contents still readable; a
//! re-advertise brings it back).
//!
//! One mutex serializes ring writes, the generation counter, the
//! subscriber list, and waiter registration. Remote forwarding happens
//! after the lock is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::descriptor::TopicDescriptor;
use crate::error::{Result, SkybusError};
use crate::remote::RemoteLink;
use crate::subscriber::{SubscriberId, SubscriberState};
use crate::time::Clock;
use crate::waitset::{events, WaitSet, Waiter, WaiterKey};

/// Lock-free counters mirroring node activity
#[derive(Debug, Default)]
pub struct NodeStats {
    /// Total samples written since creation
    pub publications: AtomicU64,
    /// Total samples subscribers skipped past due to ring overflow
    pub overflows: AtomicU64,
}

#[derive(Debug)]
struct NodeInner {
    /// Flat slot storage, `queue_size * payload_size` bytes once installed
    ring: Vec<u8>,
    /// Ring depth; 0 until the first advertise installs it
    queue_size: usize,
    /// Total publications, wrapping; slot of generation g is (g-1) % queue
    generation: u32,
    advertised: bool,
    priority: i8,
    publisher_count: usize,
    last_publish_time_us: u64,
    subscribers: Vec<Option<SubscriberState>>,
    waiters: WaitSet,
    /// Smallest delivery interval any subscriber asked for; bandwidth hint
    /// for remote bridging, not enforced locally
    interval_hint_us: u32,
}

/// Storage and bookkeeping for one (topic, instance) pair
#[derive(Debug)]
pub struct TopicNode {
    name: &'static str,
    instance: usize,
    payload_size: usize,
    clock: Arc<dyn Clock>,
    remote: Arc<RemoteLink>,
    /// Whether a remote subscriber wants our publishes forwarded
    remote_subscribed: AtomicBool,
    stats: NodeStats,
    inner: Mutex<NodeInner>,
}

impl TopicNode {
    pub(crate) fn new(
        desc: &TopicDescriptor,
        instance: usize,
        clock: Arc<dyn Clock>,
        remote: Arc<RemoteLink>,
    ) -> Self {
        Self {
            name: desc.name,
            instance,
            payload_size: desc.payload_size as usize,
            clock,
            remote,
            remote_subscribed: AtomicBool::new(false),
            stats: NodeStats::default(),
            inner: Mutex::new(NodeInner {
                ring: Vec::new(),
                queue_size: 0,
                generation: 0,
                advertised: false,
                priority: crate::config::PRIORITY_DEFAULT,
                publisher_count: 0,
                last_publish_time_us: 0,
                subscribers: Vec::new(),
                waiters: WaitSet::new(),
                interval_hint_us: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Total publications so far
    pub fn generation(&self) -> u32 {
        self.inner.lock().unwrap().generation
    }

    /// Ring depth, 0 while uninitialized
    pub fn queue_size(&self) -> usize {
        self.inner.lock().unwrap().queue_size
    }

    pub fn priority(&self) -> i8 {
        self.inner.lock().unwrap().priority
    }

    /// Whether a publisher currently holds the node
    pub fn advertised(&self) -> bool {
        self.inner.lock().unwrap().advertised
    }

    /// Whether anything was ever published here
    pub fn is_published(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.generation > 0 || inner.advertised
    }

    pub fn publisher_count(&self) -> usize {
        self.inner.lock().unwrap().publisher_count
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// Monotonic time of the most recent publication, 0 if none
    pub fn last_publish_time_us(&self) -> u64 {
        self.inner.lock().unwrap().last_publish_time_us
    }

    /// Minimum delivery interval across subscribers, 0 when unconstrained
    pub fn interval_hint_us(&self) -> u32 {
        self.inner.lock().unwrap().interval_hint_us
    }

    pub(crate) fn set_remote_subscribed(&self, on: bool) {
        self.remote_subscribed.store(on, Ordering::Release);
    }

    /// Fold a remote subscriber's requested rate into the interval hint
    pub(crate) fn apply_remote_rate_hz(&self, rate_hz: u32) {
        if rate_hz == 0 {
            return;
        }

        let interval_us = 1_000_000 / rate_hz;
        let mut inner = self.inner.lock().unwrap();

        if inner.interval_hint_us == 0 || interval_us < inner.interval_hint_us {
            inner.interval_hint_us = interval_us;
        }
    }

    /// Install the ring if this node has never been advertised
    pub(crate) fn ensure_ring(&self, queue_size: usize) {
        let mut inner = self.inner.lock().unwrap();

        if inner.queue_size == 0 {
            let queue_size = queue_size.max(1);
            inner.ring = vec![0u8; queue_size * self.payload_size];
            inner.queue_size = queue_size;
        }
    }

    /// Register a publisher, installing the queue on first advertise
    ///
    /// `queue_request == 0` means "use the descriptor default". Growing the
    /// ring after it is installed is refused; the node stays usable.
    pub(crate) fn advertise(
        &self,
        priority: i8,
        queue_request: usize,
        default_queue: usize,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.queue_size == 0 {
            let queue_size = if queue_request > 0 {
                queue_request
            } else {
                default_queue
            }
            .max(1);

            inner.ring = vec![0u8; queue_size * self.payload_size];
            inner.queue_size = queue_size;
        } else if queue_request > inner.queue_size {
            return Err(SkybusError::queue_too_large(
                self.name,
                queue_request,
                inner.queue_size,
            ));
        }

        inner.advertised = true;
        inner.priority = priority;
        inner.publisher_count += 1;
        Ok(())
    }

    /// Drop one publisher; the last one out marks the node quiescent
    pub(crate) fn unadvertise(&self) {
        let mut inner = self.inner.lock().unwrap();

        debug_assert!(inner.publisher_count > 0, "unadvertise without publisher");
        inner.publisher_count = inner.publisher_count.saturating_sub(1);

        if inner.publisher_count == 0 {
            inner.advertised = false;
        }
    }

    /// Publish a sample from a local publisher
    pub(crate) fn publish(&self, payload: &[u8]) -> Result<()> {
        self.write(payload, true)
    }

    /// Publish a sample received from the remote side (never re-forwarded)
    pub(crate) fn publish_remote(&self, payload: &[u8]) -> Result<()> {
        self.write(payload, false)
    }

    fn write(&self, payload: &[u8], forward: bool) -> Result<()> {
        if payload.len() != self.payload_size {
            debug_assert_eq!(
                payload.len(),
                self.payload_size,
                "payload size mismatch on {}",
                self.name
            );
            return Err(SkybusError::invalid_argument(
                "payload",
                format!(
                    "length {} does not match declared size {} for {}",
                    payload.len(),
                    self.payload_size,
                    self.name
                ),
            ));
        }

        let now = self.clock.now_us();
        let forward_remote;

        {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;

            debug_assert!(inner.queue_size > 0, "publish before ring install");
            if inner.queue_size == 0 {
                return Err(SkybusError::invalid_argument(
                    "node",
                    format!("{} has no installed queue", self.name),
                ));
            }

            let slot = inner.generation as usize % inner.queue_size;
            let offset = slot * self.payload_size;
            inner.ring[offset..offset + self.payload_size].copy_from_slice(payload);

            inner.generation = inner.generation.wrapping_add(1);
            inner.last_publish_time_us = now;
            self.stats.publications.fetch_add(1, Ordering::Relaxed);

            let generation = inner.generation;
            let subscribers = &inner.subscribers;

            inner.waiters.signal_matching(events::DATA_READY, |id| {
                subscribers
                    .get(id.0 as usize)
                    .and_then(|s| s.as_ref())
                    .map(|s| s.updated(generation, now))
                    .unwrap_or(false)
            });

            forward_remote = forward && self.remote_subscribed.load(Ordering::Acquire);
        }

        if forward_remote {
            self.remote.send_message(self.name, payload);
        }

        Ok(())
    }

    /// Attach a new subscriber cursor, reusing the lowest free slot
    pub(crate) fn add_subscriber(&self) -> SubscriberId {
        let mut inner = self.inner.lock().unwrap();

        let slot = inner.subscribers.iter().position(|s| s.is_none());

        match slot {
            Some(i) => {
                inner.subscribers[i] = Some(SubscriberState::new());
                SubscriberId(i as u32)
            }
            None => {
                inner.subscribers.push(Some(SubscriberState::new()));
                SubscriberId((inner.subscribers.len() - 1) as u32)
            }
        }
    }

    /// Detach a subscriber, waking and dropping any waiters it left behind
    ///
    /// Removing an unknown subscriber is an error.
    pub(crate) fn remove_subscriber(&self, id: SubscriberId) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        inner
            .subscribers
            .get_mut(id.0 as usize)
            .and_then(|s| s.take())
            .ok_or_else(|| SkybusError::invalid_argument("subscriber", "not registered"))?;

        inner.waiters.close_subscriber(id);
        Ok(())
    }

    fn state_mut<'a>(
        inner: &'a mut NodeInner,
        id: SubscriberId,
    ) -> Result<&'a mut SubscriberState> {
        inner
            .subscribers
            .get_mut(id.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| SkybusError::invalid_argument("subscriber", "not registered"))
    }

    /// Copy the next unseen sample into `out` and advance the cursor
    ///
    /// With no unseen data the last-delivered sample is returned again and
    /// the cursor is left alone; copy never blocks. A cursor that fell off
    /// the ring is clamped to the oldest still-held sample and the skipped
    /// count lands on the overflow counters.
    pub(crate) fn copy_to(&self, id: SubscriberId, out: &mut [u8]) -> Result<()> {
        if out.len() != self.payload_size {
            return Err(SkybusError::invalid_argument(
                "out",
                format!(
                    "buffer length {} does not match payload size {}",
                    out.len(),
                    self.payload_size
                ),
            ));
        }

        let now = self.clock.now_us();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if inner.generation == 0 {
            return Err(SkybusError::no_data(self.name));
        }

        let generation = inner.generation;
        let queue = inner.queue_size as u32;
        let sub = Self::state_mut(inner, id)?;

        let behind = sub.behind(generation);

        let delivered = if behind == 0 {
            generation
        } else if behind >= queue {
            let lost = u64::from(behind - queue);
            sub.overflows += lost;
            self.stats.overflows.fetch_add(lost, Ordering::Relaxed);
            generation.wrapping_sub(queue).wrapping_add(1)
        } else {
            let cursor = if sub.seen { sub.last_generation } else { 0 };
            cursor.wrapping_add(1)
        };

        sub.last_generation = delivered;
        sub.seen = true;
        sub.last_copy_time_us = now;

        let slot = delivered.wrapping_sub(1) as usize % inner.queue_size;
        let offset = slot * self.payload_size;
        out.copy_from_slice(&inner.ring[offset..offset + self.payload_size]);
        Ok(())
    }

    /// Copy into a freshly allocated buffer
    pub(crate) fn copy_vec(&self, id: SubscriberId) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.payload_size];
        self.copy_to(id, &mut out)?;
        Ok(out)
    }

    /// The update predicate for one subscriber
    pub(crate) fn check(&self, id: SubscriberId) -> Result<bool> {
        let now = self.clock.now_us();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let generation = inner.generation;
        let sub = Self::state_mut(inner, id)?;
        Ok(sub.updated(generation, now))
    }

    pub(crate) fn set_interval_us(&self, id: SubscriberId, interval_us: u32) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        Self::state_mut(inner, id)?.interval_us = interval_us;

        let min = inner
            .subscribers
            .iter()
            .flatten()
            .map(|s| s.interval_us)
            .filter(|&us| us > 0)
            .min()
            .unwrap_or(0);
        inner.interval_hint_us = min;
        Ok(())
    }

    pub(crate) fn get_interval_us(&self, id: SubscriberId) -> Result<u32> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        Ok(Self::state_mut(inner, id)?.interval_us)
    }

    pub(crate) fn overflow_count(&self, id: SubscriberId) -> Result<u64> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        Ok(Self::state_mut(inner, id)?.overflows)
    }

    /// Associate a waiter with a subscriber
    ///
    /// If the subscriber is already updated the waiter is signalled on the
    /// spot so it will not block; it stays registered for later publishes
    /// either way.
    pub(crate) fn register_waiter(
        &self,
        waiter: Arc<dyn Waiter>,
        id: SubscriberId,
        interest: u32,
    ) -> Result<WaiterKey> {
        let now = self.clock.now_us();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let generation = inner.generation;

        let already_updated = Self::state_mut(inner, id)?.updated(generation, now);
        let immediate = interest & events::DATA_READY;

        let key = inner.waiters.register(waiter.clone(), id, interest)?;

        if already_updated && immediate != 0 {
            if let Err(e) = waiter.signal(immediate) {
                log::warn!("immediate waiter signal failed: {}", e);
            }
        }

        Ok(key)
    }

    pub(crate) fn unregister_waiter(&self, key: WaiterKey, id: SubscriberId) -> Result<()> {
        self.inner.lock().unwrap().waiters.unregister(key, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use crate::waitset::CondvarWaiter;

    static IMU: TopicDescriptor = TopicDescriptor::new("imu", 4);
    static GPS: TopicDescriptor = TopicDescriptor::with_queue("gps", 1, 4);

    fn node(desc: &TopicDescriptor) -> (Arc<TopicNode>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let node = Arc::new(TopicNode::new(
            desc,
            0,
            clock.clone(),
            Arc::new(RemoteLink::new()),
        ));
        (node, clock)
    }

    #[test]
    fn test_uninitialized_node_has_no_data() {
        let (node, _) = node(&IMU);
        let sub = node.add_subscriber();

        assert!(!node.is_published());
        assert!(!node.check(sub).unwrap());
        assert!(matches!(
            node.copy_vec(sub).unwrap_err(),
            SkybusError::NoData { .. }
        ));
    }

    #[test]
    fn test_publish_and_copy_round_trip() {
        let (node, _) = node(&IMU);
        node.advertise(75, 0, 1).unwrap();
        node.publish(&[1, 2, 3, 4]).unwrap();

        let sub = node.add_subscriber();
        assert!(node.check(sub).unwrap());
        assert_eq!(node.copy_vec(sub).unwrap(), vec![1, 2, 3, 4]);
        assert!(!node.check(sub).unwrap());

        // re-reads are idempotent
        assert_eq!(node.copy_vec(sub).unwrap(), vec![1, 2, 3, 4]);
        assert!(!node.check(sub).unwrap());
    }

    #[test]
    fn test_queue_replay_and_overflow() {
        let (node, _) = node(&GPS);
        node.advertise(75, 0, GPS.effective_queue()).unwrap();

        for value in [b'A', b'B', b'C', b'D', b'E', b'F'] {
            node.publish(&[value]).unwrap();
        }

        let sub = node.add_subscriber();

        // cursor fell off the ring: clamped to the oldest still held
        assert_eq!(node.copy_vec(sub).unwrap(), vec![b'C']);
        assert_eq!(node.overflow_count(sub).unwrap(), 2);

        assert_eq!(node.copy_vec(sub).unwrap(), vec![b'D']);
        assert_eq!(node.copy_vec(sub).unwrap(), vec![b'E']);
        assert_eq!(node.copy_vec(sub).unwrap(), vec![b'F']);
        assert!(!node.check(sub).unwrap());
        assert_eq!(node.overflow_count(sub).unwrap(), 2);
    }

    #[test]
    fn test_queue_growth_refused_after_install() {
        let (node, _) = node(&GPS);
        node.advertise(75, 4, GPS.effective_queue()).unwrap();

        let err = node.advertise(75, 8, GPS.effective_queue()).unwrap_err();
        assert!(matches!(err, SkybusError::QueueTooLarge { .. }));

        // the node stays usable
        node.publish(&[b'X']).unwrap();
        assert_eq!(node.generation(), 1);
    }

    #[test]
    fn test_quiescent_node_keeps_last_value() {
        let (node, _) = node(&IMU);
        node.advertise(75, 0, 1).unwrap();
        node.publish(&[9, 9, 9, 9]).unwrap();
        node.unadvertise();

        assert!(!node.advertised());
        assert!(node.is_published());

        let sub = node.add_subscriber();
        assert_eq!(node.copy_vec(sub).unwrap(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_payload_size_enforced() {
        let (node, _) = node(&IMU);
        node.advertise(75, 0, 1).unwrap();
        // release builds report the mismatch as an error; debug asserts
        if cfg!(not(debug_assertions)) {
            assert!(node.publish(&[1, 2]).is_err());
        }
    }

    #[test]
    fn test_remove_unknown_subscriber_is_error() {
        let (node, _) = node(&IMU);
        let sub = node.add_subscriber();
        node.remove_subscriber(sub).unwrap();
        assert!(node.remove_subscriber(sub).is_err());
    }

    #[test]
    fn test_waiter_woken_on_publish() {
        let (node, _) = node(&IMU);
        node.advertise(75, 0, 1).unwrap();

        let sub = node.add_subscriber();
        let waiter = Arc::new(CondvarWaiter::new());
        let as_dyn: Arc<dyn Waiter> = waiter.clone();
        node.register_waiter(as_dyn, sub, events::DATA_READY).unwrap();

        node.publish(&[0; 4]).unwrap();
        assert_eq!(waiter.take_events(), events::DATA_READY);
    }

    #[test]
    fn test_waiter_signalled_immediately_when_data_pending() {
        let (node, _) = node(&IMU);
        node.advertise(75, 0, 1).unwrap();
        node.publish(&[0; 4]).unwrap();

        let sub = node.add_subscriber();
        let waiter = Arc::new(CondvarWaiter::new());
        let as_dyn: Arc<dyn Waiter> = waiter.clone();
        node.register_waiter(as_dyn, sub, events::DATA_READY).unwrap();

        assert_eq!(waiter.take_events(), events::DATA_READY);
    }

    #[test]
    fn test_interval_gates_waiter_wakeups() {
        let (node, clock) = node(&IMU);
        node.advertise(75, 0, 1).unwrap();

        let sub = node.add_subscriber();
        node.set_interval_us(sub, 10_000).unwrap();

        clock.set(1_000);
        node.publish(&[0; 4]).unwrap();
        let mut buf = [0u8; 4];
        node.copy_to(sub, &mut buf).unwrap();

        let waiter = Arc::new(CondvarWaiter::new());
        let as_dyn: Arc<dyn Waiter> = waiter.clone();
        node.register_waiter(as_dyn, sub, events::DATA_READY).unwrap();

        // inside the throttle window: no wake
        clock.set(4_000);
        node.publish(&[1; 4]).unwrap();
        assert_eq!(waiter.take_events(), 0);

        // window elapsed: next publish wakes
        clock.set(12_000);
        node.publish(&[2; 4]).unwrap();
        assert_eq!(waiter.take_events(), events::DATA_READY);
    }

    #[test]
    fn test_unsubscribe_wakes_waiter_with_closed() {
        let (node, _) = node(&IMU);
        node.advertise(75, 0, 1).unwrap();

        let sub = node.add_subscriber();
        let waiter = Arc::new(CondvarWaiter::new());
        let as_dyn: Arc<dyn Waiter> = waiter.clone();
        node.register_waiter(
            as_dyn,
            sub,
            events::DATA_READY | events::SUBSCRIPTION_CLOSED,
        )
        .unwrap();

        node.remove_subscriber(sub).unwrap();
        assert_eq!(waiter.take_events(), events::SUBSCRIPTION_CLOSED);
    }

    #[test]
    fn test_interval_hint_tracks_minimum() {
        let (node, _) = node(&IMU);
        let a = node.add_subscriber();
        let b = node.add_subscriber();

        node.set_interval_us(a, 50_000).unwrap();
        assert_eq!(node.interval_hint_us(), 50_000);

        node.set_interval_us(b, 20_000).unwrap();
        assert_eq!(node.interval_hint_us(), 20_000);

        node.set_interval_us(b, 0).unwrap();
        assert_eq!(node.interval_hint_us(), 50_000);
    }
}
