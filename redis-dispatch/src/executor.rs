//! One command, one round trip

use crate::arguments::CommandArguments;
use crate::command::CommandObject;
use crate::connection::{Connection, ConnectionProvider};
use redis_dispatch_core::{RedisResult, RespValue};
use std::sync::Arc;
use tracing::{debug, trace};

/// Sends single commands and decodes their replies
#[derive(Clone)]
pub struct Executor {
    provider: Arc<dyn ConnectionProvider>,
}

impl Executor {
    /// Create an executor over a connection provider
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Execute one command on the node that owns its keys
    ///
    /// The connection is released on every path, including transport and decode
    /// failures. If the call is cancelled after the write, the connection is
    /// discarded rather than pooled with its reply unread. Error replies come back
    /// as [`RedisError::Server`](redis_dispatch_core::RedisError::Server).
    pub async fn execute_command<T>(&self, command: &CommandObject<T>) -> RedisResult<T> {
        let args = command.arguments();
        let mut conn = self.provider.get_connection_for(args).await?;
        let reply = round_trip(&mut conn, args).await?;
        drop(conn);
        command.decode(reply)
    }
}

/// Write one command and read its reply, suspending the read deadline for
/// blocking commands
pub(crate) async fn round_trip<C>(conn: &mut C, args: &CommandArguments) -> RedisResult<RespValue>
where
    C: Connection + ?Sized,
{
    trace!("Executing {} on {}", args.name(), conn.node());

    if args.is_blocking() {
        debug!("{} may block; read deadline suspended", args.name());
        conn.set_blocking(true);
    }

    let result = match conn.write(args).await {
        Ok(()) => conn.read().await,
        Err(e) => Err(e),
    };

    if args.is_blocking() {
        conn.set_blocking(false);
    }
    result
}
