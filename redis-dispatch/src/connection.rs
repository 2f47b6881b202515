//! Connections and the providers that hand them out
//!
//! A [`Connection`] is a single ordered request/reply stream. Every execution mode
//! talks to the server through this trait only: it writes one or more encoded
//! commands and reads replies back in order. [`TcpConnection`] is the production
//! transport; tests substitute in-memory fakes.
//!
//! Connections are leased from a [`ConnectionProvider`] as [`PooledConnection`]s.
//! Dropping a lease returns the connection to wherever it came from, unless the
//! transport has failed or replies are still owed on it (the caller was cancelled
//! between write and read), in which case the connection is discarded.

use crate::arguments::CommandArguments;
use crate::protocol::{RespDecoder, RespEncoder};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use redis_dispatch_core::{
    ConnectionConfig, NodeAddress, ProtocolVersion, RedisError, RedisResult, RespValue,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// An ordered request/reply stream to one node
///
/// Error replies from the server are ordinary values returned by [`read`](Self::read);
/// only transport and framing failures are `Err`.
#[async_trait]
pub trait Connection: Send {
    /// The node this connection talks to
    fn node(&self) -> &NodeAddress;

    /// Write several commands in a single contiguous write
    async fn write_batch(&mut self, batch: &[&CommandArguments]) -> RedisResult<()>;

    /// Write one command
    async fn write(&mut self, args: &CommandArguments) -> RedisResult<()> {
        self.write_batch(&[args]).await
    }

    /// Read the next reply
    async fn read(&mut self) -> RedisResult<RespValue>;

    /// Read `count` replies in order
    async fn read_many(&mut self, count: usize) -> RedisResult<Vec<RespValue>> {
        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            replies.push(self.read().await?);
        }
        Ok(replies)
    }

    /// Suspend (`true`) or restore (`false`) the read deadline
    fn set_blocking(&mut self, blocking: bool);

    /// Whether the stream has failed and must not be reused
    fn is_broken(&self) -> bool {
        false
    }
}

/// Somewhere a finished connection can be handed back to
pub trait Recycle: Send + Sync {
    /// Take back a healthy connection
    fn recycle(&self, conn: Box<dyn Connection>);
}

/// Opens new connections to a node
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and initialise a connection
    async fn connect(&self, node: &NodeAddress) -> RedisResult<Box<dyn Connection>>;
}

/// A leased connection
///
/// Dropping the lease releases it: the connection goes back to its pool unless a
/// transport error was seen on it or a written command's reply was never read.
/// The pool slot is freed either way.
pub struct PooledConnection {
    node: NodeAddress,
    conn: Option<Box<dyn Connection>>,
    home: Option<Arc<dyn Recycle>>,
    // Released after the connection has been recycled
    _permit: Option<OwnedSemaphorePermit>,
    broken: bool,
    // Replies written for but not yet read
    owed: usize,
}

impl PooledConnection {
    /// Lease a pooled connection
    pub fn new(
        conn: Box<dyn Connection>,
        home: Arc<dyn Recycle>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            node: conn.node().clone(),
            conn: Some(conn),
            home: Some(home),
            _permit: Some(permit),
            broken: false,
            owed: 0,
        }
    }

    /// Wrap a connection that belongs to no pool; it is closed on drop
    pub fn unpooled(conn: Box<dyn Connection>) -> Self {
        Self {
            node: conn.node().clone(),
            conn: Some(conn),
            home: None,
            _permit: None,
            broken: false,
            owed: 0,
        }
    }

    /// Drop the lease without returning the connection to its pool
    pub fn discard(mut self) {
        self.broken = true;
    }

    /// Whether replies to written commands are still unread
    pub fn in_flight(&self) -> bool {
        self.owed > 0
    }

    fn inner(&mut self) -> RedisResult<&mut Box<dyn Connection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| RedisError::Connection("Connection already released".to_string()))
    }

    fn observe<T>(&mut self, result: RedisResult<T>) -> RedisResult<T> {
        if let Err(ref e) = result {
            if e.is_transport() {
                self.broken = true;
            }
        }
        result
    }
}

#[async_trait]
impl Connection for PooledConnection {
    fn node(&self) -> &NodeAddress {
        &self.node
    }

    async fn write_batch(&mut self, batch: &[&CommandArguments]) -> RedisResult<()> {
        // Counted before the write: a write cut short leaves the stream unusable too
        self.owed += batch.len();
        let result = self.inner()?.write_batch(batch).await;
        self.observe(result)
    }

    async fn read(&mut self) -> RedisResult<RespValue> {
        let result = self.inner()?.read().await;
        if result.is_ok() {
            self.owed = self.owed.saturating_sub(1);
        }
        self.observe(result)
    }

    async fn read_many(&mut self, count: usize) -> RedisResult<Vec<RespValue>> {
        let result = self.inner()?.read_many(count).await;
        if let Ok(ref replies) = result {
            self.owed = self.owed.saturating_sub(replies.len());
        }
        self.observe(result)
    }

    fn set_blocking(&mut self, blocking: bool) {
        if let Some(conn) = self.conn.as_mut() {
            conn.set_blocking(blocking);
        }
    }

    fn is_broken(&self) -> bool {
        self.broken || self.conn.as_ref().map_or(true, |c| c.is_broken())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let broken = self.is_broken();
        let owed = self.owed;
        if let Some(conn) = self.conn.take() {
            match self.home.as_ref() {
                Some(home) if !broken && owed == 0 => home.recycle(conn),
                _ if owed > 0 => {
                    debug!(
                        "Discarding connection to {} with {} unread reply(ies)",
                        conn.node(),
                        owed
                    );
                }
                _ => {
                    if broken {
                        debug!("Discarding broken connection to {}", conn.node());
                    }
                }
            }
        }
    }
}

/// Source of connections for the execution layers
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// A connection to any node
    async fn get_connection(&self) -> RedisResult<PooledConnection>;

    /// The node that owns this command's keys, or `None` when any node will do
    fn route(&self, args: &CommandArguments) -> RedisResult<Option<NodeAddress>> {
        let _ = args;
        Ok(None)
    }

    /// A connection to the node that owns this command's keys
    async fn get_connection_for(&self, args: &CommandArguments) -> RedisResult<PooledConnection> {
        match self.route(args)? {
            Some(node) => self.get_node_connection(&node).await,
            None => self.get_connection().await,
        }
    }

    /// Every node a broadcast reaches, in a stable order
    fn nodes(&self) -> Vec<NodeAddress>;

    /// A connection to one specific node
    async fn get_node_connection(&self, node: &NodeAddress) -> RedisResult<PooledConnection>;
}

/// A plain TCP connection speaking RESP
pub struct TcpConnection {
    node: NodeAddress,
    stream: TcpStream,
    read_buffer: BytesMut,
    operation_timeout: Duration,
    blocking: bool,
    broken: bool,
}

impl TcpConnection {
    /// Connect and run the handshake (`HELLO 3`, `AUTH`, `SELECT`) the config asks for
    pub async fn connect(node: &NodeAddress, config: &ConnectionConfig) -> RedisResult<Self> {
        let addr = node.to_string();
        debug!("Connecting to Redis at {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(|e| RedisError::Connection(format!("Failed to connect to {addr}: {e}")))?;

        let stream = match config.tcp_keepalive {
            Some(keepalive_duration) => {
                let socket = socket2::Socket::from(stream.into_std()?);
                let keepalive = socket2::TcpKeepalive::new().with_time(keepalive_duration);
                socket.set_tcp_keepalive(&keepalive).map_err(|e| {
                    RedisError::Connection(format!("Failed to set TCP keepalive: {e}"))
                })?;
                TcpStream::from_std(socket.into())?
            }
            None => stream,
        };
        stream.set_nodelay(true)?;

        let mut conn = Self {
            node: node.clone(),
            stream,
            read_buffer: BytesMut::with_capacity(8192),
            operation_timeout: config.operation_timeout,
            blocking: false,
            broken: false,
        };
        conn.handshake(config).await?;
        Ok(conn)
    }

    async fn handshake(&mut self, config: &ConnectionConfig) -> RedisResult<()> {
        match (config.protocol_version, config.password.as_deref()) {
            (ProtocolVersion::Resp3, Some(password)) => {
                let hello = CommandArguments::new("HELLO")
                    .arg(3)
                    .arg("AUTH")
                    .arg("default")
                    .arg(password);
                self.setup_command(&hello).await?;
            }
            (ProtocolVersion::Resp3, None) => {
                self.setup_command(&CommandArguments::new("HELLO").arg(3))
                    .await?;
            }
            (ProtocolVersion::Resp2, Some(password)) => {
                debug!("Authenticating with Redis server");
                self.setup_command(&CommandArguments::new("AUTH").arg(password))
                    .await?;
            }
            (ProtocolVersion::Resp2, None) => {}
        }

        if config.database != 0 {
            self.setup_command(&CommandArguments::new("SELECT").arg(config.database))
                .await?;
        }
        Ok(())
    }

    async fn setup_command(&mut self, args: &CommandArguments) -> RedisResult<()> {
        self.write(args).await?;
        match self.read().await? {
            RespValue::Error(e) => Err(RedisError::Connection(format!(
                "{} rejected by {}: {e}",
                args.name(),
                self.node
            ))),
            _ => Ok(()),
        }
    }

    fn fail<T>(&mut self, err: RedisError) -> RedisResult<T> {
        self.broken = true;
        warn!("Connection to {} failed: {}", self.node, err);
        Err(err)
    }

    async fn fill_buffer(&mut self) -> RedisResult<usize> {
        if self.blocking {
            Ok(self.stream.read_buf(&mut self.read_buffer).await?)
        } else {
            timeout(
                self.operation_timeout,
                self.stream.read_buf(&mut self.read_buffer),
            )
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(RedisError::from)
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn node(&self) -> &NodeAddress {
        &self.node
    }

    async fn write_batch(&mut self, batch: &[&CommandArguments]) -> RedisResult<()> {
        if self.broken {
            return Err(RedisError::Connection(format!(
                "Connection to {} is broken",
                self.node
            )));
        }

        let encoded = RespEncoder::encode_batch(batch);
        trace!("Writing {} command(s), {} bytes", batch.len(), encoded.len());

        let result = timeout(self.operation_timeout, self.stream.write_all(&encoded))
            .await
            .map_err(|_| RedisError::Timeout)
            .and_then(|r| r.map_err(RedisError::from));
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    async fn read(&mut self) -> RedisResult<RespValue> {
        loop {
            let mut cursor = Cursor::new(&self.read_buffer[..]);
            match RespDecoder::decode(&mut cursor) {
                Ok(Some(value)) => {
                    let pos = cursor.position() as usize;
                    self.read_buffer.advance(pos);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return self.fail(e),
            }

            match self.fill_buffer().await {
                Ok(0) => {
                    return self.fail(RedisError::Connection(
                        "Connection closed by server".to_string(),
                    ))
                }
                Ok(_) => {}
                Err(e) => return self.fail(e),
            }
        }
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Opens [`TcpConnection`]s with a fixed configuration
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: ConnectionConfig,
}

impl TcpConnector {
    /// Create a connector
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, node: &NodeAddress) -> RedisResult<Box<dyn Connection>> {
        let conn = TcpConnection::connect(node, &self.config).await?;
        Ok(Box::new(conn))
    }
}
