//! Redis Cluster support
//!
//! This module provides:
//! - Slot calculation using CRC16 with hash tag handling
//! - A slot-to-node topology, built by hand or from a `CLUSTER SLOTS` reply the
//!   caller fetched
//! - [`ClusterProvider`], which keeps one pool per primary and routes commands by slot
//!
//! The topology is static once built. Redirects (`MOVED`/`ASK`) are not followed;
//! they surface as ordinary server errors on the command that received them.

use crate::arguments::CommandArguments;
use crate::connection::{ConnectionProvider, Connector, PooledConnection};
use crate::pool::ConnectionPool;
use async_trait::async_trait;
use crc16::{State, XMODEM};
use redis_dispatch_core::{
    ConnectionConfig, NodeAddress, RedisError, RedisResult, RespValue, SlotRange, CLUSTER_SLOTS,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Calculate the hash slot for a given key
///
/// This implements the Redis Cluster key hashing algorithm:
/// - If the key contains {...}, only the part between the first { and first } is hashed
/// - Otherwise, the entire key is hashed
/// - The hash is CRC16 mod 16384
pub fn calculate_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key);
    State::<XMODEM>::calculate(hash_key) % CLUSTER_SLOTS
}

/// Extract the hash tag from a key
///
/// Hash tags allow you to ensure multiple keys are allocated to the same hash slot.
/// For example: `{user1000}.following` and `{user1000}.followers` will hash to the same slot.
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let end = start + 1 + end;
            // An empty tag `{}` hashes the whole key
            if end > start + 1 {
                return &key[start + 1..end];
            }
        }
    }
    key
}

/// Which primary owns which slot ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTopology {
    ranges: Vec<(SlotRange, NodeAddress)>,
}

impl ClusterTopology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign slot ranges to a primary
    #[must_use]
    pub fn with_node(mut self, node: NodeAddress, ranges: impl IntoIterator<Item = SlotRange>) -> Self {
        for range in ranges {
            self.ranges.push((range, node.clone()));
        }
        self.ranges.sort_by_key(|(range, _)| range.start);
        self
    }

    /// Build the topology from a `CLUSTER SLOTS` reply
    ///
    /// Each entry is `[start, end, [host, port, ...], [replica...]...]`; only the
    /// primary (the first address) is kept.
    pub fn from_cluster_slots(reply: &RespValue) -> RedisResult<Self> {
        let mut topology = Self::new();
        for entry in reply.as_slice()? {
            let fields = entry.as_slice()?;
            if fields.len() < 3 {
                return Err(RedisError::Protocol(format!(
                    "CLUSTER SLOTS entry has {} fields, expected at least 3",
                    fields.len()
                )));
            }

            let start = slot_number(&fields[0])?;
            let end = slot_number(&fields[1])?;
            let primary = fields[2].as_slice()?;
            if primary.len() < 2 {
                return Err(RedisError::Protocol(
                    "CLUSTER SLOTS primary entry is missing host or port".to_string(),
                ));
            }
            let host = primary[0].as_string()?;
            let port = u16::try_from(primary[1].as_int()?)
                .map_err(|_| RedisError::Protocol("Invalid port in CLUSTER SLOTS".to_string()))?;

            topology = topology.with_node(NodeAddress::new(host, port), [SlotRange::new(start, end)]);
        }
        Ok(topology)
    }

    /// The primary serving a slot
    pub fn node_for_slot(&self, slot: u16) -> Option<&NodeAddress> {
        self.ranges
            .iter()
            .find(|(range, _)| range.contains(slot))
            .map(|(_, node)| node)
    }

    /// The primary serving a key
    pub fn node_for_key(&self, key: &[u8]) -> Option<&NodeAddress> {
        self.node_for_slot(calculate_slot(key))
    }

    /// Every primary, sorted and deduplicated
    pub fn nodes(&self) -> Vec<NodeAddress> {
        let mut nodes: Vec<NodeAddress> = self.ranges.iter().map(|(_, n)| n.clone()).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Number of slots that have an owner
    pub fn mapped_slots_count(&self) -> usize {
        self.ranges
            .iter()
            .map(|(range, _)| usize::from(range.end - range.start) + 1)
            .sum()
    }
}

fn slot_number(value: &RespValue) -> RedisResult<u16> {
    let n = value.as_int()?;
    u16::try_from(n)
        .ok()
        .filter(|slot| *slot < CLUSTER_SLOTS)
        .ok_or_else(|| RedisError::Protocol(format!("Slot {n} out of range")))
}

/// Connections to every primary of a cluster
pub struct ClusterProvider {
    topology: ClusterTopology,
    pools: BTreeMap<NodeAddress, ConnectionPool>,
    next: AtomicUsize,
}

impl ClusterProvider {
    /// Create a provider over a known topology
    pub fn new(topology: ClusterTopology, config: &ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let pools = topology
            .nodes()
            .into_iter()
            .map(|node| {
                let pool = ConnectionPool::new(node.clone(), config.pool.clone(), connector.clone());
                (node, pool)
            })
            .collect();

        Self {
            topology,
            pools,
            next: AtomicUsize::new(0),
        }
    }

    /// The topology in use
    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    fn pool(&self, node: &NodeAddress) -> RedisResult<&ConnectionPool> {
        self.pools
            .get(node)
            .ok_or_else(|| RedisError::Cluster(format!("Unknown cluster node {node}")))
    }
}

#[async_trait]
impl ConnectionProvider for ClusterProvider {
    async fn get_connection(&self) -> RedisResult<PooledConnection> {
        if self.pools.is_empty() {
            return Err(RedisError::Cluster("Topology has no nodes".to_string()));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.pools.len();
        match self.pools.values().nth(index) {
            Some(pool) => pool.get().await,
            None => Err(RedisError::Cluster("Topology has no nodes".to_string())),
        }
    }

    fn route(&self, args: &CommandArguments) -> RedisResult<Option<NodeAddress>> {
        let slots = args.hash_slots();
        let mut iter = slots.iter();
        let slot = match (iter.next(), iter.next()) {
            (None, _) => return Ok(None),
            (Some(slot), None) => *slot,
            (Some(_), Some(_)) => {
                return Err(RedisError::Cluster(format!(
                    "CROSSSLOT keys of {} hash to {} different slots",
                    args.name(),
                    slots.len()
                )))
            }
        };

        let node = self
            .topology
            .node_for_slot(slot)
            .ok_or_else(|| RedisError::Cluster(format!("Slot {slot} is not served by any node")))?;
        Ok(Some(node.clone()))
    }

    async fn get_connection_for(&self, args: &CommandArguments) -> RedisResult<PooledConnection> {
        match self.route(args)? {
            Some(node) => {
                debug!("Routing {} to {}", args.name(), node);
                self.pool(&node)?.get().await
            }
            None => self.get_connection().await,
        }
    }

    fn nodes(&self) -> Vec<NodeAddress> {
        self.pools.keys().cloned().collect()
    }

    async fn get_node_connection(&self, node: &NodeAddress) -> RedisResult<PooledConnection> {
        self.pool(node)?.get().await
    }
}
