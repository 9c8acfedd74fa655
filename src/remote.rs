//! Remote transport bridging
//!
//! The broker is purely in-process; an optional channel plugs it into a
//! remote transport. Outbound traffic goes through [`RemoteChannel`]
//! (advertisement announcements and forwarded samples); inbound traffic
//! arrives through the broker's `handle_remote_*` methods. The broker keeps
//! two name sets: topics known to exist remotely (consulted by existence
//! checks) and topics with remote subscribers (gating publish forwarding).

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::Result;

/// Outbound side of a remote transport
pub trait RemoteChannel: Send + Sync + fmt::Debug {
    /// Announce a local advertisement to the remote side
    fn topic_advertised(&self, name: &str, priority: i8) -> Result<()>;

    /// Forward a locally published sample to the remote side
    fn send_message(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// Shared handle to the attached channel, held by every node
///
/// Nodes call through this outside their own lock so a slow transport can
/// never stall a publisher's critical section.
#[derive(Debug, Default)]
pub struct RemoteLink {
    channel: RwLock<Option<Arc<dyn RemoteChannel>>>,
}

impl RemoteLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, channel: Arc<dyn RemoteChannel>) {
        *self.channel.write().unwrap() = Some(channel);
    }

    pub fn is_attached(&self) -> bool {
        self.channel.read().unwrap().is_some()
    }

    pub fn topic_advertised(&self, name: &str, priority: i8) {
        let channel = self.channel.read().unwrap().clone();

        if let Some(channel) = channel {
            if let Err(e) = channel.topic_advertised(name, priority) {
                log::warn!("remote advertisement of {} failed: {}", name, e);
            }
        }
    }

    pub fn send_message(&self, name: &str, data: &[u8]) {
        let channel = self.channel.read().unwrap().clone();

        if let Some(channel) = channel {
            if let Err(e) = channel.send_message(name, data) {
                log::warn!("remote forward of {} failed: {}", name, e);
            }
        }
    }
}

/// Name sets describing what the remote side publishes and subscribes
#[derive(Debug, Default)]
pub struct RemoteDirectory {
    topics: Mutex<HashSet<String>>,
    subscribers: Mutex<HashSet<String>>,
}

impl RemoteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or forget a remote advertisement
    pub fn set_topic(&self, name: &str, is_add: bool) {
        let mut topics = self.topics.lock().unwrap();

        if is_add {
            topics.insert(name.to_string());
        } else {
            topics.remove(name);
        }
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.topics.lock().unwrap().contains(name)
    }

    /// Record or forget a remote subscription
    pub fn set_subscriber(&self, name: &str, is_add: bool) {
        let mut subscribers = self.subscribers.lock().unwrap();

        if is_add {
            subscribers.insert(name.to_string());
        } else {
            subscribers.remove(name);
        }
    }

    pub fn has_subscriber(&self, name: &str) -> bool {
        self.subscribers.lock().unwrap().contains(name)
    }
}
