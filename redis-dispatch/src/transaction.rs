//! Transaction support for Redis
//!
//! A [`Transaction`] queues commands exactly like a [`Pipeline`](crate::pipeline::Pipeline)
//! and sends them wrapped in `MULTI`/`EXEC` in a single write. The batch commits as a
//! whole or not at all: if the server rejects it (a command refused while queueing,
//! or a watched key that changed) every response resolves to the same
//! [`RedisError::Aborted`].
//!
//! # Examples
//!
//! ```no_run
//! use redis_dispatch::{Client, ConnectionConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ConnectionConfig::new("redis://localhost:6379")).await?;
//! let cmds = client.commands();
//!
//! let mut tx = client.transaction();
//! tx.watch(["balance"]).await?;
//! let debit = tx.append_command(cmds.decr_by("balance", 10));
//! let log = tx.append_command(cmds.rpush("ledger", ["debit:10"]));
//! tx.exec().await?;
//!
//! println!("balance {} after {} entries", debit.get().await?, log.get().await?);
//! # Ok(())
//! # }
//! ```

use crate::arguments::{CommandArguments, ToArg};
use crate::command::CommandObject;
use crate::connection::ConnectionProvider;
use crate::pipeline::{BatchCore, BatchMode, Response};
use redis_dispatch_core::{RedisError, RedisResult, RespValue};
use std::sync::Arc;
use tracing::debug;

/// A server-side atomic batch
pub struct Transaction {
    core: Arc<BatchCore>,
}

impl Transaction {
    /// Create a transaction; a connection is leased on the first `watch` or `exec`
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            core: BatchCore::new(BatchMode::Transaction, provider),
        }
    }

    /// Watch keys for modification; sent immediately
    ///
    /// If any watched key changes before [`exec`](Self::exec), the transaction is
    /// aborted and every response resolves to [`RedisError::Aborted`].
    pub async fn watch<I>(&mut self, keys: I) -> RedisResult<()>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        let args = CommandArguments::new("WATCH").keys(keys);
        if args.is_keyless() {
            return Err(RedisError::Config("WATCH needs at least one key".to_string()));
        }
        expect_ok(self.core.send_now(&args).await?)?;
        self.core.set_watching(true);
        debug!("Watching {} key(s)", args.len() - 1);
        Ok(())
    }

    /// Forget every watched key
    pub async fn unwatch(&mut self) -> RedisResult<()> {
        if !self.core.is_watching() {
            return Ok(());
        }
        expect_ok(self.core.send_now(&CommandArguments::new("UNWATCH")).await?)?;
        self.core.set_watching(false);
        Ok(())
    }

    /// Queue a command; never performs I/O
    pub fn append_command<T>(&mut self, command: CommandObject<T>) -> Response<T>
    where
        T: Send + Sync + 'static,
    {
        self.core.append(command)
    }

    /// Send `MULTI`, the queued commands and `EXEC` in one write and resolve the
    /// responses from the `EXEC` reply
    ///
    /// With nothing queued no transaction is sent; watched keys are released with
    /// `UNWATCH` instead.
    pub async fn exec(&mut self) -> RedisResult<()> {
        if self.core.pending() == 0 {
            if self.core.is_watching() {
                debug!("Nothing queued, releasing watched keys");
                self.unwatch().await?;
            }
            return Ok(());
        }
        self.core.flush().await
    }

    /// Commands queued for the next `exec`
    pub fn len(&self) -> usize {
        self.core.pending()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the queued commands without sending them
    ///
    /// Pending responses resolve to [`RedisError::Aborted`]. Watched keys are
    /// released with `UNWATCH`.
    pub async fn discard(mut self) -> RedisResult<()> {
        let dropped = self
            .core
            .abandon(RedisError::Aborted("transaction discarded".to_string()));
        debug!("Transaction discarded with {} queued command(s)", dropped);
        self.unwatch().await?;
        self.core.release().await;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.core
            .abandon(RedisError::Aborted("transaction dropped before exec".to_string()));
        self.core.release_now();
    }
}

fn expect_ok(reply: RespValue) -> RedisResult<()> {
    match reply {
        RespValue::Error(msg) => Err(RedisError::Server(msg)),
        _ => Ok(()),
    }
}
