//! # Skybus - In-Process Publish/Subscribe Broker
//!
//! Skybus is a micro object request broker for embedded flight-control
//! stacks: sensor, estimator, and controller tasks exchange fixed-size
//! typed samples through named topics without knowing about each other.
//!
//! ## Features
//!
//! - **Typed topics**: immutable descriptors fix a topic's payload size
//! - **Multi-instance**: redundant publishers of one topic live side by
//!   side, with priority-based best-instance selection
//! - **Bounded rings**: each node keeps the last N samples; slow readers
//!   are clamped forward and the loss is counted, never blocking writers
//! - **Readiness signalling**: subscribers block on host wait objects that
//!   are woken edge-triggered on publish
//! - **Rate limiting**: per-subscriber minimum delivery intervals gate
//!   update checks and wakeups, not the stored data
//! - **Publisher rules**: an optional text config reserves topics for a
//!   named module
//! - **Remote bridging**: an optional channel mirrors advertisements and
//!   samples to another transport
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                    Broker                        │
//! │  name → [instance slots] ── publisher rules      │
//! ├──────────────────────────────────────────────────┤
//! │  TopicNode (per name+instance)                   │
//! │  - sample ring + generation                      │
//! │  - subscriber cursors + throttles                │
//! │  - wait set (readiness edges)                    │
//! └──────────────────────────────────────────────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌─────────────────┐   ┌──────────────────────────┐
//! │ Publisher /     │   │  RemoteChannel (optional)│
//! │ Subscriber      │   │  advertisements, samples │
//! └─────────────────┘   └──────────────────────────┘
//! ```

pub mod broker;
pub mod descriptor;
pub mod error;
pub mod node;
pub mod paths;
pub mod remote;
pub mod rules;
pub mod time;
pub mod waitset;

mod subscriber;

// Main API re-exports
pub use broker::{AdvertiseOptions, Broker, BrokerStats, Publisher, Subscriber};
pub use descriptor::TopicDescriptor;
pub use error::{ErrorCode, Result, SkybusError};
pub use node::NodeStats;
pub use remote::RemoteChannel;
pub use rules::PublisherRule;
pub use subscriber::SubscriberId;
pub use time::{Clock, ManualClock, MonotonicClock};
pub use waitset::{events, CondvarWaiter, WaitSet, Waiter, WaiterKey};

#[cfg(target_os = "linux")]
pub use waitset::EventFdWaiter;

/// Compile-time limits and defaults
pub mod config {
    /// Maximum redundant instances per topic name
    pub const MAX_INSTANCES: usize = 4;

    /// Maximum length of a canonical node path
    pub const MAX_PATH: usize = 128;

    /// Prefix of every canonical node path
    pub const PATH_PREFIX: &str = "/obj";

    /// Ring depth installed when neither caller nor descriptor asks for one
    pub const DEFAULT_QUEUE_SIZE: usize = 1;

    /// Lowest meaningful instance priority
    pub const PRIORITY_MIN: i8 = 1;

    /// Priority of an instance that never asked for one
    pub const PRIORITY_DEFAULT: i8 = 75;

    /// Highest instance priority
    pub const PRIORITY_MAX: i8 = 125;
}
