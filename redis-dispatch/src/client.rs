//! High-level Redis client
//!
//! [`Client`] wires a connection provider to the three execution modes and hands
//! out a [`CommandObjects`] factory matching the configured protocol version.

use crate::broadcast::{BroadcastOutcome, Broadcaster};
use crate::cluster::{ClusterProvider, ClusterTopology};
use crate::command::CommandObject;
use crate::commands::CommandObjects;
use crate::connection::{ConnectionProvider, Connector, TcpConnector};
use crate::executor::Executor;
use crate::pipeline::Pipeline;
use crate::pool::ConnectionPool;
use crate::registry::CommandPolicy;
use crate::transaction::Transaction;
use redis_dispatch_core::{ConnectionConfig, NodeAddress, RedisError, RedisResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// High-level Redis client
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct Client {
    provider: Arc<dyn ConnectionProvider>,
    executor: Executor,
    broadcaster: Broadcaster,
    commands: CommandObjects,
}

impl Client {
    /// Connect to a standalone server
    ///
    /// Only the first endpoint of the connection string is used. Connections are
    /// opened lazily, so configuration errors surface here and network errors on
    /// the first command.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use redis_dispatch::{Client, ConnectionConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = ConnectionConfig::new("redis://localhost:6379");
    ///     let client = Client::connect(config).await?;
    ///     let cmds = client.commands();
    ///     client.execute(&cmds.set("greeting", "hello")).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: ConnectionConfig) -> RedisResult<Self> {
        let node = config
            .parse_endpoints()
            .into_iter()
            .next()
            .ok_or_else(|| RedisError::Config("No endpoints specified".to_string()))?;
        info!("Connecting to Redis at {}", node);

        let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new(config.clone()));
        let pool = ConnectionPool::new(node, config.pool.clone(), connector);
        Ok(Self::with_provider(Arc::new(pool), CommandObjects::new(config.protocol_version)))
    }

    /// Connect to a cluster with a known slot layout
    pub async fn connect_cluster(
        config: ConnectionConfig,
        topology: ClusterTopology,
    ) -> RedisResult<Self> {
        if topology.nodes().is_empty() {
            return Err(RedisError::Config("Cluster topology has no nodes".to_string()));
        }
        info!(
            "Connecting to Redis Cluster with {} primaries",
            topology.nodes().len()
        );

        let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new(config.clone()));
        let provider = ClusterProvider::new(topology, &config, connector);
        Ok(Self::with_provider(
            Arc::new(provider),
            CommandObjects::new(config.protocol_version),
        ))
    }

    /// Build a client over any provider
    pub fn with_provider(provider: Arc<dyn ConnectionProvider>, commands: CommandObjects) -> Self {
        Self {
            executor: Executor::new(Arc::clone(&provider)),
            broadcaster: Broadcaster::new(Arc::clone(&provider)),
            provider,
            commands,
        }
    }

    /// Factory for command objects
    pub fn commands(&self) -> CommandObjects {
        self.commands
    }

    /// Nodes reachable through this client
    pub fn nodes(&self) -> Vec<NodeAddress> {
        self.provider.nodes()
    }

    /// Execute one command and wait for its decoded reply
    pub async fn execute<T>(&self, command: &CommandObject<T>) -> RedisResult<T> {
        self.executor.execute_command(command).await
    }

    /// Start a pipeline
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(Arc::clone(&self.provider))
    }

    /// Start a transaction
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.provider))
    }

    /// Run a command on every primary if the policy table says so, on one node otherwise
    pub async fn broadcast<T>(&self, command: &CommandObject<T>) -> RedisResult<T> {
        self.broadcaster.broadcast_command(command).await
    }

    /// Broadcast with an explicit policy and report failed nodes
    pub async fn broadcast_with<T>(
        &self,
        command: &CommandObject<T>,
        policy: CommandPolicy,
    ) -> RedisResult<BroadcastOutcome<T>> {
        self.broadcaster.broadcast_outcome(command, policy).await
    }

    /// Run a command on every primary and keep each node's result
    pub async fn broadcast_per_node<T>(
        &self,
        command: &CommandObject<T>,
    ) -> RedisResult<BTreeMap<NodeAddress, RedisResult<T>>> {
        self.broadcaster.broadcast_per_node(command).await
    }
}
