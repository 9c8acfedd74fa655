//! Topic registry and broker context
//!
//! The broker maps topic names to small per-instance node sets, arbitrates
//! advertise/subscribe/publish/copy, applies publisher rules, and hosts the
//! remote bridge plumbing. It is an explicit context: hosts create one and
//! thread it through their tasks. A single master lock protects the
//! name→nodes map; each node serializes itself. The only permitted nesting
//! is registry lock → node lock, never the reverse.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::config::{DEFAULT_QUEUE_SIZE, MAX_INSTANCES, PRIORITY_DEFAULT};
use crate::descriptor::{DescriptorTable, TopicDescriptor};
use crate::error::{Result, SkybusError};
use crate::node::TopicNode;
use crate::paths;
use crate::remote::{RemoteChannel, RemoteDirectory, RemoteLink};
use crate::rules::PublisherRule;
use crate::time::{Clock, MonotonicClock};

use super::handles::{Publisher, Subscriber};
use super::stats::BrokerStats;

/// Per-name node slots, indexed by instance
type InstanceSlots = [Option<Arc<TopicNode>>; MAX_INSTANCES];

/// Knobs for an advertise call
#[derive(Debug, Clone)]
pub struct AdvertiseOptions {
    /// Exact instance to bind, or None to take the lowest free one
    pub instance: Option<usize>,
    /// Priority installed on the instance, for best-instance selection
    pub priority: i8,
    /// Requested ring depth; 0 takes the descriptor default
    pub queue_size: usize,
    /// Name of the advertising module, matched against publisher rules
    pub module: Option<String>,
}

impl Default for AdvertiseOptions {
    fn default() -> Self {
        Self {
            instance: None,
            priority: PRIORITY_DEFAULT,
            queue_size: 0,
            module: None,
        }
    }
}

impl AdvertiseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to this exact instance, creating it if absent
    pub fn with_instance(mut self, instance: usize) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Identify the advertising module for rule matching
    pub fn from_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

/// The broker: topic registry, arbitration, and bridge attachment point
#[derive(Debug)]
pub struct Broker {
    clock: Arc<dyn Clock>,
    topics: Mutex<HashMap<&'static str, InstanceSlots>>,
    descriptors: Mutex<DescriptorTable>,
    rules: Option<PublisherRule>,
    remote_link: Arc<RemoteLink>,
    remote_dir: RemoteDirectory,
    stats: BrokerStats,
}

impl Broker {
    /// Create a broker on the default monotonic clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Create a broker on a caller-supplied clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            topics: Mutex::new(HashMap::new()),
            descriptors: Mutex::new(DescriptorTable::new()),
            rules: None,
            remote_link: Arc::new(RemoteLink::new()),
            remote_dir: RemoteDirectory::new(),
            stats: BrokerStats::default(),
        }
    }

    /// Load publisher rules from a text file
    ///
    /// On failure the broker keeps running without rules; the error is
    /// returned so the host can decide whether that is acceptable.
    pub fn load_publisher_rules(&mut self, path: impl AsRef<Path>) -> Result<()> {
        match PublisherRule::from_file(path.as_ref()) {
            Ok(rule) => {
                log::info!("using publisher rules from {}", path.as_ref().display());
                self.rules = Some(rule);
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "failed to read publisher rules {}: {}",
                    path.as_ref().display(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Install an already parsed rule set
    pub fn set_publisher_rules(&mut self, rule: PublisherRule) {
        self.rules = Some(rule);
    }

    /// Attach the outbound side of a remote transport
    pub fn attach_remote_channel(&self, channel: Arc<dyn RemoteChannel>) {
        self.remote_link.attach(channel);
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    /// Register a publisher for a topic and publish its initial sample
    ///
    /// With `instance: None` the lowest instance without a live publisher
    /// is taken; an exact instance is created on demand. The first
    /// advertise of a node installs its ring; later advertises may not
    /// grow it. A publisher denied by rules comes back as a sentinel whose
    /// publishes succeed without effect.
    pub fn advertise(
        &self,
        desc: &TopicDescriptor,
        initial: &[u8],
        opts: AdvertiseOptions,
    ) -> Result<Publisher> {
        self.descriptors.lock().unwrap().register(desc)?;

        if initial.len() != desc.payload_size as usize {
            return Err(SkybusError::invalid_argument(
                "initial",
                format!(
                    "initial payload length {} does not match declared size {}",
                    initial.len(),
                    desc.payload_size
                ),
            ));
        }

        if let Some(rule) = &self.rules {
            let module = opts.module.as_deref().unwrap_or("");

            if !rule.allows(module, desc.name) {
                log::debug!("not allowing {} to publish topic {}", module, desc.name);
                self.stats.denied_advertises.fetch_add(1, Ordering::Relaxed);
                return Ok(Publisher::denied(
                    desc.name,
                    opts.instance.unwrap_or(0),
                    opts.priority,
                ));
            }
        }

        let node = {
            let mut topics = self.topics.lock().unwrap();
            let slots = topics.entry(desc.name).or_default();

            let index = match opts.instance {
                Some(i) => {
                    if i >= MAX_INSTANCES {
                        return Err(SkybusError::invalid_argument(
                            "instance",
                            format!("instance {} out of range 0..{}", i, MAX_INSTANCES),
                        ));
                    }
                    i
                }
                None => slots
                    .iter()
                    .position(|slot| match slot {
                        None => true,
                        Some(node) => !node.advertised(),
                    })
                    .ok_or_else(|| {
                        SkybusError::no_memory(format!(
                            "all {} instances of {} have live publishers",
                            MAX_INSTANCES, desc.name
                        ))
                    })?,
            };

            self.node_at(slots, desc, index)?
        };

        node.advertise(opts.priority, opts.queue_size, desc.effective_queue())?;

        if let Err(e) = node.publish(initial) {
            node.unadvertise();
            return Err(e);
        }

        self.remote_link.topic_advertised(desc.name, opts.priority);
        self.stats.advertises.fetch_add(1, Ordering::Relaxed);
        Ok(Publisher::live(node))
    }

    /// Drop a publisher registration
    ///
    /// Equivalent to dropping the handle; the last publisher out leaves
    /// the node quiescent with its ring intact.
    pub fn unadvertise(&self, publisher: Publisher) {
        drop(publisher);
    }

    /// Subscribe to instance 0 of a topic
    pub fn subscribe(&self, desc: &TopicDescriptor) -> Result<Subscriber> {
        self.subscribe_instance(desc, 0)
    }

    /// Subscribe to an exact instance
    ///
    /// The node is created if nothing has advertised it yet (a latent
    /// subscription): a later advertise becomes visible immediately.
    pub fn subscribe_instance(&self, desc: &TopicDescriptor, instance: usize) -> Result<Subscriber> {
        self.descriptors.lock().unwrap().register(desc)?;

        if instance >= MAX_INSTANCES {
            return Err(SkybusError::invalid_argument(
                "instance",
                format!("instance {} out of range 0..{}", instance, MAX_INSTANCES),
            ));
        }

        let node = {
            let mut topics = self.topics.lock().unwrap();
            let slots = topics.entry(desc.name).or_default();
            self.node_at(slots, desc, instance)?
        };

        let id = node.add_subscriber();
        self.stats.subscribes.fetch_add(1, Ordering::Relaxed);
        Ok(Subscriber::new(node, id))
    }

    /// Subscribe to the best advertised instance of a topic
    pub fn subscribe_best(&self, desc: &TopicDescriptor) -> Result<Subscriber> {
        let instance = self
            .resolve_best_instance(desc)
            .ok_or_else(|| SkybusError::no_such_topic(desc.name))?;
        self.subscribe_instance(desc, instance)
    }

    /// Pick the advertised instance with the highest priority; ties go to
    /// the lowest index
    pub fn resolve_best_instance(&self, desc: &TopicDescriptor) -> Option<usize> {
        let topics = self.topics.lock().unwrap();
        let slots = topics.get(desc.name)?;

        let mut best: Option<(usize, i8)> = None;

        for (index, slot) in slots.iter().enumerate() {
            let node = match slot {
                Some(node) if node.is_published() => node,
                _ => continue,
            };

            let priority = node.priority();
            match best {
                Some((_, current)) if priority <= current => {}
                _ => best = Some((index, priority)),
            }
        }

        best.map(|(index, _)| index)
    }

    /// Drop a subscription, waking any waiters it left behind
    pub fn unsubscribe(&self, subscriber: Subscriber) {
        drop(subscriber);
    }

    /// Whether (topic, instance) has ever been advertised locally, or the
    /// topic is known to exist remotely
    pub fn exists(&self, desc: &TopicDescriptor, instance: usize) -> bool {
        self.exists_named(desc.name, instance)
    }

    /// Path shim: answer an existence query for a canonical node path
    pub fn exists_path(&self, path: &str) -> Result<bool> {
        let (name, instance) = paths::parse_path(path)?;
        Ok(self.exists_named(&name, instance))
    }

    /// Canonical path of a (topic, instance) pair
    pub fn node_path_of(&self, desc: &TopicDescriptor, instance: usize) -> Result<String> {
        paths::node_path(desc.name, instance)
    }

    fn exists_named(&self, name: &str, instance: usize) -> bool {
        if instance < MAX_INSTANCES {
            let topics = self.topics.lock().unwrap();

            if let Some(node) = topics.get(name).and_then(|slots| slots[instance].as_ref()) {
                if node.is_published() {
                    return true;
                }
            }
        }

        self.remote_dir.has_topic(name)
    }

    /// Number of distinct topic names with at least one node
    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap().len()
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.topics.lock().unwrap().contains_key(name)
    }

    /// Snapshot of all nodes as (name, instance, advertised, generation)
    pub fn list_topics(&self) -> Vec<(&'static str, usize, bool, u32)> {
        let topics = self.topics.lock().unwrap();
        let mut rows = Vec::new();

        for (name, slots) in topics.iter() {
            for node in slots.iter().flatten() {
                rows.push((*name, node.instance(), node.advertised(), node.generation()));
            }
        }

        rows.sort();
        rows
    }

    /// Record or forget a remote advertisement for a topic name
    pub fn handle_remote_advertisement(&self, name: &str, is_add: bool) {
        log::debug!("remote advertisement for {}: add={}", name, is_add);
        self.remote_dir.set_topic(name, is_add);
    }

    /// Record or forget a remote subscription, updating the node's
    /// forwarding flag and bandwidth hint
    pub fn handle_remote_subscription(&self, name: &str, rate_hz: u32, is_add: bool) {
        self.remote_dir.set_subscriber(name, is_add);

        let node = {
            let topics = self.topics.lock().unwrap();
            topics.get(name).and_then(|slots| slots[0].clone())
        };

        match node {
            Some(node) => {
                node.set_remote_subscribed(is_add);

                if is_add {
                    node.apply_remote_rate_hz(rate_hz);
                }
            }
            None => log::debug!("remote subscription for {}: node not created yet", name),
        }
    }

    /// Publish a payload received from the remote side onto the local node
    ///
    /// Publisher rules do not apply here; the sample wakes local waiters
    /// but is never forwarded back out.
    pub fn handle_remote_message(&self, name: &str, data: &[u8]) -> Result<()> {
        let node = {
            let topics = self.topics.lock().unwrap();
            topics.get(name).and_then(|slots| slots[0].clone())
        };

        let node = node.ok_or_else(|| {
            log::warn!("no local node for remote message on {}", name);
            SkybusError::no_such_topic(name)
        })?;

        let default_queue = self
            .descriptors
            .lock()
            .unwrap()
            .get(name)
            .map(|d| d.effective_queue())
            .unwrap_or(DEFAULT_QUEUE_SIZE);

        node.ensure_ring(default_queue);
        node.publish_remote(data)
    }

    fn node_at(
        &self,
        slots: &mut InstanceSlots,
        desc: &TopicDescriptor,
        index: usize,
    ) -> Result<Arc<TopicNode>> {
        if let Some(node) = &slots[index] {
            return Ok(node.clone());
        }

        // rejects overlong names before anything is registered
        let path = paths::node_path(desc.name, index)?;

        let node = Arc::new(TopicNode::new(
            desc,
            index,
            self.clock.clone(),
            self.remote_link.clone(),
        ));

        node.set_remote_subscribed(self.remote_dir.has_subscriber(desc.name));

        slots[index] = Some(node.clone());
        self.stats.nodes_created.fetch_add(1, Ordering::Relaxed);
        log::debug!("created node {}", path);
        Ok(node)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
