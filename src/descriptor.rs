//! Topic descriptors: the immutable schema registered for each topic name
//!
//! Descriptors are declared once at build time (typically as `static` items
//! next to the message definitions) and are content-addressable by name:
//! every advertise or subscribe that names a topic must present a descriptor
//! identical to the first one seen, otherwise the configuration is broken
//! and the registration fails.

use std::collections::HashMap;

use crate::error::{Result, SkybusError};

/// Immutable schema for one topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicDescriptor {
    /// Topic name, unique across the process
    pub name: &'static str,
    /// Fixed payload size in bytes
    pub payload_size: u16,
    /// Queue depth installed when an advertiser does not request one
    pub default_queue: u8,
}

impl TopicDescriptor {
    /// Create a descriptor with the default queue depth of 1
    pub const fn new(name: &'static str, payload_size: u16) -> Self {
        Self {
            name,
            payload_size,
            default_queue: 1,
        }
    }

    /// Create a descriptor with an explicit default queue depth
    pub const fn with_queue(name: &'static str, payload_size: u16, default_queue: u8) -> Self {
        Self {
            name,
            payload_size,
            default_queue,
        }
    }

    /// Queue depth to install when the advertiser requests none, clamped to ≥1
    pub fn effective_queue(&self) -> usize {
        (self.default_queue as usize).max(1)
    }
}

/// Table of descriptors seen so far, keyed by topic name
///
/// The first registration wins; later registrations must agree on payload
/// size or the whole call is rejected as a configuration error.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    entries: HashMap<&'static str, TopicDescriptor>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, verifying it against any previous registration
    pub fn register(&mut self, desc: &TopicDescriptor) -> Result<()> {
        if desc.name.is_empty() {
            return Err(SkybusError::invalid_argument(
                "name",
                "topic name cannot be empty",
            ));
        }

        if desc.payload_size == 0 {
            return Err(SkybusError::invalid_argument(
                "payload_size",
                "payload size must be greater than 0",
            ));
        }

        match self.entries.get(desc.name) {
            Some(known) if known.payload_size != desc.payload_size => {
                Err(SkybusError::DescriptorMismatch {
                    name: desc.name.to_string(),
                    registered: known.payload_size,
                    offered: desc.payload_size,
                })
            }
            Some(_) => Ok(()),
            None => {
                self.entries.insert(desc.name, *desc);
                Ok(())
            }
        }
    }

    /// Look up the registered descriptor for a name
    pub fn get(&self, name: &str) -> Option<&TopicDescriptor> {
        self.entries.get(name)
    }

    /// Number of distinct topic names registered
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
