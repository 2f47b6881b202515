//! Error types for command execution
//!
//! Every failure a command can produce falls into exactly one of three kinds
//! (see [`ErrorKind`]): the transport broke, the reply did not have the shape the
//! decoder expected, or the server answered with a well-formed error reply.

use crate::types::NodeAddress;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for Redis operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Coarse classification of a [`RedisError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// I/O failure, timeout or an exhausted pool. Nothing can be said about the reply.
    Transport,
    /// The reply did not match what the command's decoder expects.
    Protocol,
    /// The server answered with an error reply.
    Server,
}

/// Error type for Redis operations
#[derive(Error, Debug, Clone)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Protocol parsing error, including batch reply-count desync
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Reply shape did not match the decoder
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Server returned an error
    #[error("Server error: {0}")]
    Server(String),

    /// A whole batch was rejected or discarded before producing per-command replies
    #[error("Batch aborted: {0}")]
    Aborted(String),

    /// One or more nodes failed during a broadcast
    #[error("{0}")]
    Broadcast(Box<BroadcastError>),

    /// Cluster routing error
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for RedisError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<BroadcastError> for RedisError {
    fn from(err: BroadcastError) -> Self {
        Self::Broadcast(Box::new(err))
    }
}

impl RedisError {
    /// Classify this error
    ///
    /// A broadcast error takes the kind of its node failures, see
    /// [`BroadcastError::kind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Connection(_) | Self::Timeout | Self::Pool(_) => {
                ErrorKind::Transport
            }
            Self::Protocol(_) | Self::Type(_) | Self::Cluster(_) | Self::Config(_) => {
                ErrorKind::Protocol
            }
            Self::Server(_) | Self::Aborted(_) => ErrorKind::Server,
            Self::Broadcast(err) => err.kind(),
        }
    }

    /// Whether the connection that produced this error can no longer be trusted
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }

    /// Whether this is a server error reply
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    /// Error code of a server error reply, e.g. `WRONGTYPE` or `ERR`
    #[must_use]
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Self::Server(msg) => msg.split_whitespace().next(),
            _ => None,
        }
    }
}

/// Per-node failures collected while broadcasting one command
#[derive(Debug, Clone)]
pub struct BroadcastError {
    /// Number of nodes the command was sent to
    pub total: usize,
    /// Failed nodes and why
    pub failures: BTreeMap<NodeAddress, RedisError>,
}

impl BroadcastError {
    /// Create a broadcast error
    #[must_use]
    pub fn new(total: usize, failures: BTreeMap<NodeAddress, RedisError>) -> Self {
        Self { total, failures }
    }

    /// Some, but not all, nodes failed
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && self.failures.len() < self.total
    }

    /// Every node failed
    #[must_use]
    pub fn is_total(&self) -> bool {
        self.total > 0 && self.failures.len() == self.total
    }

    /// The kind every node failure shares, or [`ErrorKind::Server`] when they differ
    ///
    /// A broadcast where no node could be reached is a transport failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        let mut kinds = self.failures.values().map(RedisError::kind);
        match kinds.next() {
            Some(first) if kinds.all(|kind| kind == first) => first,
            _ => ErrorKind::Server,
        }
    }
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = if self.is_total() { "total" } else { "partial" };
        write!(
            f,
            "Broadcast failed ({scope}, {}/{} nodes)",
            self.failures.len(),
            self.total
        )?;
        for (node, err) in &self.failures {
            write!(f, "; {node}: {err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let io = RedisError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(io.kind(), ErrorKind::Transport);
        assert_eq!(RedisError::Timeout.kind(), ErrorKind::Transport);
        assert_eq!(
            RedisError::Type("bad".to_string()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            RedisError::Server("ERR nope".to_string()).kind(),
            ErrorKind::Server
        );
    }

    #[test]
    fn test_server_code() {
        let err = RedisError::Server("WRONGTYPE Operation against a key".to_string());
        assert_eq!(err.server_code(), Some("WRONGTYPE"));
        assert_eq!(RedisError::Timeout.server_code(), None);
    }

    #[test]
    fn test_broadcast_partial_vs_total() {
        let mut failures = BTreeMap::new();
        failures.insert(NodeAddress::new("10.0.0.2", 7001), RedisError::Timeout);

        let partial = BroadcastError::new(3, failures.clone());
        assert!(partial.is_partial());
        assert!(!partial.is_total());
        assert!(partial.to_string().contains("partial"));

        let total = BroadcastError::new(1, failures);
        assert!(total.is_total());
        assert!(!total.is_partial());
    }

    #[test]
    fn test_broadcast_kind_follows_failures() {
        let a = NodeAddress::new("10.0.0.1", 7000);
        let b = NodeAddress::new("10.0.0.2", 7001);

        let unreachable = BroadcastError::new(
            2,
            BTreeMap::from([
                (a.clone(), RedisError::Timeout),
                (b.clone(), RedisError::Connection("refused".to_string())),
            ]),
        );
        assert_eq!(RedisError::from(unreachable).kind(), ErrorKind::Transport);

        let mixed = BroadcastError::new(
            2,
            BTreeMap::from([
                (a, RedisError::Timeout),
                (b, RedisError::Server("BUSY script running".to_string())),
            ]),
        );
        let err = RedisError::from(mixed);
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(!err.is_transport());
    }
}
