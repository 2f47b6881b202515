//! Node identity and slot ownership types

use crate::error::RedisError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Total number of hash slots in Redis Cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Address of one server node, used as the node identity everywhere results are keyed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or IP
    pub host: String,
    /// Port number
    pub port: u16,
}

impl NodeAddress {
    /// Create a node address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = RedisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RedisError::Config(format!("Invalid node address: {s}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| RedisError::Config(format!("Invalid port in address: {s}")))?;
        if host.is_empty() {
            return Err(RedisError::Config(format!("Missing host in address: {s}")));
        }
        Ok(Self::new(host, port))
    }
}

/// Represents a slot range in a Redis cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    /// Start of the slot range (inclusive)
    pub start: u16,
    /// End of the slot range (inclusive)
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Check if a slot is within this range
    #[must_use]
    pub const fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }
}
