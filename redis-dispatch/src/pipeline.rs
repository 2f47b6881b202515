//! Pipelined execution with deferred responses
//!
//! Appending a command to a [`Pipeline`] records it and hands back a [`Response`]
//! placeholder; nothing touches the network until the pipeline is flushed. A flush
//! writes every pending command in one contiguous write, reads exactly as many
//! replies back and resolves the responses in append order.
//!
//! Batch-wide failures (a transport error, or a reply count that does not match the
//! number of commands) resolve every pending response to the same error. A server
//! error reply only affects the response it belongs to. Over a cluster the batch is
//! split by owning node and each node's part succeeds or fails on its own. A flush
//! that is cancelled midway resolves its commands to [`RedisError::Aborted`].
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
//! let mut pipeline = client.pipeline();
//! let set = pipeline.append_command(cmds.set("a", "1"));
//! let incr = pipeline.append_command(cmds.incr("a"));
//! let get = pipeline.append_command(cmds.get("a"));
//! pipeline.flush().await?;
//!
//! assert_eq!(set.get().await?, "OK");
//! assert_eq!(incr.get().await?, 2);
//! assert_eq!(get.get().await?, Some("2".to_string()));
//! # Ok(())
//! # }
//! ```

use crate::arguments::CommandArguments;
use crate::command::CommandObject;
use crate::connection::{Connection, ConnectionProvider, PooledConnection};
use redis_dispatch_core::{ErrorKind, NodeAddress, RedisError, RedisResult, RespValue};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tracing::{debug, warn};

/// A deferred reply
///
/// Resolved exactly once, during the flush of the batch it was appended to. Clones
/// share the same slot.
pub struct Response<T> {
    slot: Arc<OnceLock<RedisResult<T>>>,
    batch: Weak<BatchCore>,
}

impl<T: Clone> Response<T> {
    /// The decoded value, flushing the owning batch first if needed
    ///
    /// Reading an unresolved response flushes every command appended to the same
    /// pipeline so far. Later calls return the cached outcome without decoding again.
    pub async fn get(&self) -> RedisResult<T> {
        if let Some(result) = self.slot.get() {
            return result.clone();
        }

        match self.batch.upgrade() {
            Some(batch) => {
                debug!("Response read before flush, flushing implicitly");
                // Batch-wide failures are recorded in every slot
                let _ = batch.flush().await;
            }
            None => {
                return Err(RedisError::Aborted(
                    "batch was dropped before it was flushed".to_string(),
                ))
            }
        }

        self.slot.get().cloned().unwrap_or_else(|| {
            Err(RedisError::Aborted(
                "response was not resolved by its batch".to_string(),
            ))
        })
    }

    /// The outcome if already resolved; never flushes
    pub fn try_get(&self) -> Option<RedisResult<T>> {
        self.slot.get().cloned()
    }
}

impl<T> Response<T> {
    /// Whether the response has been resolved
    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl<T> Clone for Response<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            batch: Weak::clone(&self.batch),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Some(result) => f.debug_tuple("Response").field(result).finish(),
            None => f.write_str("Response(<unresolved>)"),
        }
    }
}

/// A queued command with its type erased
pub(crate) trait QueuedCommand: Send {
    fn arguments(&self) -> &CommandArguments;

    /// Decode the reply into the response slot
    fn resolve(self: Box<Self>, reply: RespValue);

    /// Resolve the response slot to an error without decoding
    fn fail(self: Box<Self>, err: RedisError);
}

struct Queued<T> {
    command: CommandObject<T>,
    slot: Arc<OnceLock<RedisResult<T>>>,
}

impl<T: Send + Sync + 'static> QueuedCommand for Queued<T> {
    fn arguments(&self) -> &CommandArguments {
        self.command.arguments()
    }

    fn resolve(self: Box<Self>, reply: RespValue) {
        let _ = self.slot.set(self.command.decode(reply));
    }

    fn fail(self: Box<Self>, err: RedisError) {
        let _ = self.slot.set(Err(err));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchMode {
    Pipeline,
    Transaction,
}

/// Commands taken off the queue for one flush
///
/// Whatever is still held when this is dropped (the flush was cancelled before its
/// replies were read) resolves to [`RedisError::Aborted`].
struct InFlight(Vec<Box<dyn QueuedCommand>>);

impl InFlight {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn arguments(&self) -> Vec<&CommandArguments> {
        self.0.iter().map(|queued| queued.arguments()).collect()
    }

    fn into_commands(mut self) -> Vec<Box<dyn QueuedCommand>> {
        std::mem::take(&mut self.0)
    }

    fn resolve_all(self, replies: Vec<RespValue>) {
        for (queued, reply) in self.into_commands().into_iter().zip(replies) {
            queued.resolve(reply);
        }
    }

    fn fail_all(self, err: &RedisError) {
        fail_all(self.into_commands(), err);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            debug!("Flush cancelled with {} command(s) in flight", self.0.len());
            fail_all(
                std::mem::take(&mut self.0),
                &RedisError::Aborted("flush cancelled before its replies were read".to_string()),
            );
        }
    }
}

/// State shared by a batch and its responses
pub(crate) struct BatchCore {
    mode: BatchMode,
    provider: Arc<dyn ConnectionProvider>,
    queue: Mutex<Vec<Box<dyn QueuedCommand>>>,
    connection: tokio::sync::Mutex<Option<PooledConnection>>,
    watching: AtomicBool,
}

impl BatchCore {
    pub(crate) fn new(mode: BatchMode, provider: Arc<dyn ConnectionProvider>) -> Arc<Self> {
        Arc::new(Self {
            mode,
            provider,
            queue: Mutex::new(Vec::new()),
            connection: tokio::sync::Mutex::new(None),
            watching: AtomicBool::new(false),
        })
    }

    pub(crate) fn append<T>(self: &Arc<Self>, command: CommandObject<T>) -> Response<T>
    where
        T: Send + Sync + 'static,
    {
        let slot = Arc::new(OnceLock::new());
        let queued = Queued {
            command,
            slot: Arc::clone(&slot),
        };
        self.lock_queue().push(Box::new(queued));
        Response {
            slot,
            batch: Arc::downgrade(self),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn QueuedCommand>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_queue(&self) -> Vec<Box<dyn QueuedCommand>> {
        std::mem::take(&mut *self.lock_queue())
    }

    /// Resolve every pending response to `err` without sending anything
    pub(crate) fn abandon(&self, err: RedisError) -> usize {
        let batch = self.take_queue();
        let count = batch.len();
        fail_all(batch, &err);
        count
    }

    /// Send one command outside the batch on the batch's connection
    pub(crate) async fn send_now(&self, args: &CommandArguments) -> RedisResult<RespValue> {
        let mut guard = self.connection.lock().await;

        let mut conn = match guard.take() {
            Some(conn) => match self.provider.route(args) {
                Ok(Some(node)) if node != *conn.node() => {
                    let bound = conn.node().clone();
                    *guard = Some(conn);
                    return Err(RedisError::Cluster(format!(
                        "{} belongs on {node}, but the batch is bound to {bound}",
                        args.name()
                    )));
                }
                Err(e) => {
                    *guard = Some(conn);
                    return Err(e);
                }
                Ok(_) => conn,
            },
            None => self.provider.get_connection_for(args).await?,
        };

        // Owned until the reply is in; a cancelled call drops it with the reply owed
        let result = crate::executor::round_trip(&mut conn, args).await;
        match result {
            Err(ref e) if e.kind() != ErrorKind::Server => conn.discard(),
            _ => *guard = Some(conn),
        }
        result
    }

    pub(crate) fn set_watching(&self, watching: bool) {
        self.watching.store(watching, Ordering::SeqCst);
    }

    pub(crate) fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Release the connection, discarding it if it may carry server-side state
    pub(crate) async fn release(&self) {
        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            if self.is_watching() {
                conn.discard();
            }
        }
    }

    /// Synchronous variant of [`release`](Self::release) for use in `Drop`
    pub(crate) fn release_now(&self) {
        if let Ok(mut guard) = self.connection.try_lock() {
            if let Some(conn) = guard.take() {
                if self.is_watching() {
                    conn.discard();
                }
            }
        }
    }

    async fn lease(&self, node: Option<&NodeAddress>) -> RedisResult<PooledConnection> {
        match node {
            Some(node) => self.provider.get_node_connection(node).await,
            None => self.provider.get_connection().await,
        }
    }

    /// Group commands by the node that owns their keys, keeping append order inside
    /// each group
    ///
    /// Keyless commands follow the node the batch is bound to, else the first keyed
    /// command. In a pipeline a command that cannot be routed fails on its own; a
    /// transaction fails as a whole, and also when its commands span several nodes.
    fn partition(
        &self,
        batch: InFlight,
        bound: Option<&NodeAddress>,
    ) -> RedisResult<Vec<(Option<NodeAddress>, InFlight)>> {
        let routes: Vec<RedisResult<Option<NodeAddress>>> = batch
            .0
            .iter()
            .map(|queued| self.provider.route(queued.arguments()))
            .collect();

        if self.mode == BatchMode::Transaction {
            if let Some(err) = routes.iter().find_map(|route| route.as_ref().err()).cloned() {
                batch.fail_all(&err);
                return Err(err);
            }
        }

        let home = bound.cloned().or_else(|| {
            routes
                .iter()
                .find_map(|route| route.as_ref().ok().and_then(Option::clone))
        });

        let mut groups: Vec<(Option<NodeAddress>, InFlight)> = Vec::new();
        for (queued, route) in batch.into_commands().into_iter().zip(routes) {
            let node = match route {
                Ok(Some(node)) => Some(node),
                Ok(None) => home.clone(),
                Err(e) => {
                    queued.fail(e);
                    continue;
                }
            };
            match groups.iter_mut().find(|(owner, _)| *owner == node) {
                Some((_, group)) => group.0.push(queued),
                None => groups.push((node, InFlight(vec![queued]))),
            }
        }

        if self.mode == BatchMode::Transaction {
            let moved = bound.is_some() && groups.iter().any(|(node, _)| node.as_ref() != bound);
            if groups.len() > 1 || moved {
                let err = RedisError::Cluster(
                    "Transaction commands span several nodes; all keys must live on one node"
                        .to_string(),
                );
                for (_, group) in groups {
                    group.fail_all(&err);
                }
                return Err(err);
            }
        }
        Ok(groups)
    }

    /// Send everything queued so far and resolve the responses
    ///
    /// Each node's commands go out in one write on that node's connection; the
    /// connection used last stays bound to the batch for the next flush.
    pub(crate) async fn flush(&self) -> RedisResult<()> {
        let mut guard = self.connection.lock().await;

        let batch = InFlight(self.take_queue());
        if batch.is_empty() {
            return Ok(());
        }

        // Owned by this future from here on; if it is cancelled mid-exchange the
        // lease is dropped with replies owed and never reused
        let mut held = guard.take();
        let bound = held.as_ref().map(|conn| conn.node().clone());
        let groups = match self.partition(batch, bound.as_ref()) {
            Ok(groups) => groups,
            Err(e) => {
                *guard = held;
                return Err(e);
            }
        };

        let mut first_error = None;
        for (node, group) in groups {
            let reuse = match (&held, &node) {
                (Some(conn), Some(node)) => conn.node() == node,
                (Some(_), None) => true,
                (None, _) => false,
            };
            let reused = if reuse { held.take() } else { None };
            let mut conn = match reused {
                Some(conn) => conn,
                None => match self.lease(node.as_ref()).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        group.fail_all(&e);
                        first_error = first_error.or(Some(e));
                        continue;
                    }
                },
            };

            debug!(
                "Flushing {} command(s) to {} as {:?}",
                group.len(),
                conn.node(),
                self.mode
            );

            let outcome = match self.mode {
                BatchMode::Pipeline => run_pipeline(&mut conn, group).await,
                BatchMode::Transaction => {
                    let outcome = run_transaction(&mut conn, group).await;
                    // EXEC or a failed round trip always ends the watch
                    self.set_watching(false);
                    outcome
                }
            };

            match outcome {
                Err(e) if e.kind() != ErrorKind::Server => {
                    // The stream position is unknown; never reuse it
                    conn.discard();
                    first_error = first_error.or(Some(e));
                }
                Err(e) => {
                    held = Some(conn);
                    first_error = first_error.or(Some(e));
                }
                Ok(()) => held = Some(conn),
            }
        }

        *guard = held;
        first_error.map_or(Ok(()), Err)
    }
}

fn fail_all(batch: Vec<Box<dyn QueuedCommand>>, err: &RedisError) {
    for queued in batch {
        queued.fail(err.clone());
    }
}

fn desync(expected: usize, got: usize) -> RedisError {
    RedisError::Protocol(format!(
        "Reply count mismatch: sent {expected} command(s), received {got} reply(ies)"
    ))
}

/// Write the batch, read the replies, then resolve in order
async fn exchange(
    conn: &mut PooledConnection,
    batch: &[&CommandArguments],
) -> RedisResult<Vec<RespValue>> {
    let blocking = batch.iter().any(|args| args.is_blocking());
    if blocking {
        conn.set_blocking(true);
    }

    let result = match conn.write_batch(batch).await {
        Ok(()) => conn.read_many(batch.len()).await,
        Err(e) => Err(e),
    };

    if blocking {
        conn.set_blocking(false);
    }

    let replies = result?;
    if replies.len() != batch.len() {
        return Err(desync(batch.len(), replies.len()));
    }
    Ok(replies)
}

async fn run_pipeline(conn: &mut PooledConnection, batch: InFlight) -> RedisResult<()> {
    let args = batch.arguments();
    let replies = exchange(conn, &args).await;

    match replies {
        Ok(replies) => {
            batch.resolve_all(replies);
            Ok(())
        }
        Err(e) => {
            warn!("Pipeline of {} command(s) aborted: {}", batch.len(), e);
            batch.fail_all(&e);
            Err(e)
        }
    }
}

async fn run_transaction(conn: &mut PooledConnection, batch: InFlight) -> RedisResult<()> {
    let multi = CommandArguments::new("MULTI");
    let exec = CommandArguments::new("EXEC");

    let mut args: Vec<&CommandArguments> = Vec::with_capacity(batch.len() + 2);
    args.push(&multi);
    args.extend(batch.arguments());
    args.push(&exec);

    let replies = exchange(conn, &args).await;

    let replies = match replies {
        Ok(replies) => replies,
        Err(e) => {
            warn!("Transaction of {} command(s) aborted: {}", batch.len(), e);
            batch.fail_all(&e);
            return Err(e);
        }
    };

    match interpret_exec(replies, batch.len()) {
        Ok(results) => {
            batch.resolve_all(results);
            Ok(())
        }
        Err(e) => {
            warn!("Transaction of {} command(s) aborted: {}", batch.len(), e);
            batch.fail_all(&e);
            Err(e)
        }
    }
}

/// Check the MULTI and QUEUED acknowledgements and unpack the EXEC reply
fn interpret_exec(mut replies: Vec<RespValue>, count: usize) -> RedisResult<Vec<RespValue>> {
    let exec = replies.pop().unwrap_or(RespValue::Null);
    let mut acks = replies.into_iter();

    if let Some(RespValue::Error(msg)) = acks.next() {
        return Err(RedisError::Aborted(format!("MULTI rejected: {msg}")));
    }
    let queue_error = acks.find_map(RespValue::into_error);

    match exec {
        RespValue::Array(results) if results.len() == count => match queue_error {
            // Some servers still execute the valid part; keep the batch all-or-nothing
            Some(msg) => Err(RedisError::Aborted(format!(
                "command rejected while queueing: {msg}"
            ))),
            None => Ok(results),
        },
        RespValue::Array(results) => Err(desync(count, results.len())),
        RespValue::Error(msg) => Err(RedisError::Aborted(match queue_error {
            Some(cause) => format!("{msg} ({cause})"),
            None => msg,
        })),
        RespValue::Null => Err(RedisError::Aborted(
            "transaction discarded because a watched key was modified".to_string(),
        )),
        other => Err(RedisError::Protocol(format!(
            "Expected EXEC array, got {}",
            other.shape()
        ))),
    }
}

/// A batch of commands sent together on one connection
///
/// Appends from several tasks need external serialization; append order is the
/// order replies are matched in.
pub struct Pipeline {
    core: Arc<BatchCore>,
}

impl Pipeline {
    /// Create a pipeline; a connection is leased on the first flush
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            core: BatchCore::new(BatchMode::Pipeline, provider),
        }
    }

    /// Queue a command and return its placeholder; never performs I/O
    pub fn append_command<T>(&mut self, command: CommandObject<T>) -> Response<T>
    where
        T: Send + Sync + 'static,
    {
        self.core.append(command)
    }

    /// Send every queued command and resolve their responses
    ///
    /// Returns the batch-wide error if the batch was aborted. Server error replies
    /// are not batch-wide; they only show up on their own response.
    pub async fn flush(&mut self) -> RedisResult<()> {
        self.core.flush().await
    }

    /// Same as [`flush`](Self::flush)
    pub async fn sync(&mut self) -> RedisResult<()> {
        self.flush().await
    }

    /// Commands waiting for the next flush
    pub fn len(&self) -> usize {
        self.core.pending()
    }

    /// Whether nothing is waiting for a flush
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and give the connection back
    pub async fn close(self) -> RedisResult<()> {
        let result = self.core.flush().await;
        self.core.release().await;
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let abandoned = self
            .core
            .abandon(RedisError::Aborted("pipeline dropped before flush".to_string()));
        if abandoned > 0 {
            debug!("Pipeline dropped with {} unflushed command(s)", abandoned);
        }
        self.core.release_now();
    }
}
