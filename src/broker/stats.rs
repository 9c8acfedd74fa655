//! Broker-wide activity counters

use std::sync::atomic::AtomicU64;

/// Global statistics, updated with relaxed atomics beside the hot paths
#[derive(Debug, Default)]
pub struct BrokerStats {
    /// Nodes created (first advertise or latent subscribe)
    pub nodes_created: AtomicU64,
    /// Successful advertise calls, sentinels included
    pub advertises: AtomicU64,
    /// Successful subscribe calls
    pub subscribes: AtomicU64,
    /// Advertise calls denied by publisher rules
    pub denied_advertises: AtomicU64,
}
