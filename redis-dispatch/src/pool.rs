//! Connection pooling for a single node
//!
//! The pool caps the number of leased connections with a semaphore and keeps
//! released connections on an idle list for reuse. A lease that cannot be granted
//! within the configured wait fails with [`RedisError::Pool`].

use crate::connection::{
    Connection, ConnectionProvider, Connector, PooledConnection, Recycle,
};
use async_trait::async_trait;
use redis_dispatch_core::{NodeAddress, PoolConfig, RedisError, RedisResult};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

/// Idle connections waiting for reuse
#[derive(Default)]
struct IdleList {
    connections: Mutex<Vec<Box<dyn Connection>>>,
}

impl IdleList {
    fn pop(&self) -> Option<Box<dyn Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Recycle for IdleList {
    fn recycle(&self, conn: Box<dyn Connection>) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }
}

/// Pool of connections to one node
pub struct ConnectionPool {
    node: NodeAddress,
    idle: Arc<IdleList>,
    semaphore: Arc<Semaphore>,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Create an empty pool; connections are opened lazily
    pub fn new(node: NodeAddress, config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            node,
            idle: Arc::new(IdleList::default()),
            semaphore: Arc::new(Semaphore::new(config.max_size.max(1))),
            connector,
            config,
        }
    }

    /// The node this pool connects to
    pub fn node(&self) -> &NodeAddress {
        &self.node
    }

    /// Lease a connection, reusing an idle one when available
    pub async fn get(&self) -> RedisResult<PooledConnection> {
        let permit = timeout(
            self.config.connection_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| {
            RedisError::Pool(format!(
                "Timed out after {:?} waiting for a connection to {}",
                self.config.connection_timeout, self.node
            ))
        })?
        .map_err(|_| RedisError::Pool("Pool closed".to_string()))?;

        let conn = match self.idle.pop() {
            Some(conn) => conn,
            None => {
                debug!("Opening new pooled connection to {}", self.node);
                self.connector.connect(&self.node).await?
            }
        };

        let home: Arc<dyn Recycle> = self.idle.clone();
        Ok(PooledConnection::new(conn, home, permit))
    }

    /// Connections currently idle in the pool
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Leases that could still be granted without waiting
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl ConnectionProvider for ConnectionPool {
    async fn get_connection(&self) -> RedisResult<PooledConnection> {
        self.get().await
    }

    fn nodes(&self) -> Vec<NodeAddress> {
        vec![self.node.clone()]
    }

    async fn get_node_connection(&self, node: &NodeAddress) -> RedisResult<PooledConnection> {
        if *node != self.node {
            return Err(RedisError::Cluster(format!(
                "Unknown node {node}, this pool serves {}",
                self.node
            )));
        }
        self.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::CommandArguments;
    use redis_dispatch_core::RespValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Null(NodeAddress);

    #[async_trait]
    impl Connection for Null {
        fn node(&self) -> &NodeAddress {
            &self.0
        }

        async fn write_batch(&mut self, _batch: &[&CommandArguments]) -> RedisResult<()> {
            Ok(())
        }

        async fn read(&mut self) -> RedisResult<RespValue> {
            Ok(RespValue::ok())
        }

        fn set_blocking(&mut self, _blocking: bool) {}
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Connector for Counting {
        async fn connect(&self, node: &NodeAddress) -> RedisResult<Box<dyn Connection>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Null(node.clone())))
        }
    }

    fn pool(max_size: usize, connector: Arc<Counting>) -> ConnectionPool {
        let config = PoolConfig {
            max_size,
            connection_timeout: Duration::from_millis(50),
        };
        ConnectionPool::new(NodeAddress::new("127.0.0.1", 6379), config, connector)
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let connector = Arc::new(Counting::default());
        let pool = pool(2, connector.clone());

        let conn = pool.get().await.unwrap();
        assert_eq!(pool.available(), 1);
        drop(conn);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.available(), 2);

        let _conn = pool.get().await.unwrap();
        assert_eq!(connector.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = pool(1, Arc::new(Counting::default()));
        let _held = pool.get().await.unwrap();
        assert!(matches!(pool.get().await, Err(RedisError::Pool(_))));
    }

    #[tokio::test]
    async fn test_discarded_connection_is_not_reused() {
        let connector = Arc::new(Counting::default());
        let pool = pool(1, connector.clone());

        pool.get().await.unwrap().discard();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 1);

        let _conn = pool.get().await.unwrap();
        assert_eq!(connector.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_node_rejected() {
        let pool = pool(1, Arc::new(Counting::default()));
        let other = NodeAddress::new("10.0.0.1", 6379);
        assert!(matches!(
            pool.get_node_connection(&other).await,
            Err(RedisError::Cluster(_))
        ));
    }
}
