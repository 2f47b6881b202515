//! Broadcast dispatch across every primary
//!
//! A broadcast sends one command to each node concurrently, collects the raw
//! replies keyed by node, and only then folds them with the command's
//! [`ResponsePolicy`]. The folded reply goes through the command's own builder, so a
//! broadcast decodes exactly like a single-node call.
//!
//! Partial failure (some nodes failed) and total failure (no node succeeded) are
//! told apart by [`BroadcastError`]. Whether a partial failure fails the call is
//! decided by the policy's [`FailureTolerance`].

use crate::arguments::CommandArguments;
use crate::command::CommandObject;
use crate::connection::ConnectionProvider;
use crate::executor::round_trip;
use crate::registry::{policy_for, CommandPolicy, FailureTolerance, ResponsePolicy};
use futures_util::future::join_all;
use redis_dispatch_core::{BroadcastError, NodeAddress, RedisError, RedisResult, RespValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a tolerant broadcast
#[derive(Debug, Clone)]
pub struct BroadcastOutcome<T> {
    /// The combined, decoded value
    pub value: T,
    /// Nodes that failed, with their errors
    pub failed: BTreeMap<NodeAddress, RedisError>,
}

impl<T> BroadcastOutcome<T> {
    /// Whether every node succeeded
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs commands on every node and combines the replies
#[derive(Clone)]
pub struct Broadcaster {
    provider: Arc<dyn ConnectionProvider>,
}

impl Broadcaster {
    /// Create a broadcaster over a provider
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Run a command according to its entry in the policy table
    ///
    /// Commands the table does not mark as global run on a single node, exactly as
    /// [`Executor::execute_command`](crate::executor::Executor::execute_command) would.
    pub async fn broadcast_command<T>(&self, command: &CommandObject<T>) -> RedisResult<T> {
        self.broadcast_command_with(command, policy_for(command.arguments()))
            .await
    }

    /// Run a command with an explicit policy
    pub async fn broadcast_command_with<T>(
        &self,
        command: &CommandObject<T>,
        policy: CommandPolicy,
    ) -> RedisResult<T> {
        self.broadcast_outcome(command, policy)
            .await
            .map(|outcome| outcome.value)
    }

    /// Run a command with an explicit policy and report failed nodes
    pub async fn broadcast_outcome<T>(
        &self,
        command: &CommandObject<T>,
        policy: CommandPolicy,
    ) -> RedisResult<BroadcastOutcome<T>> {
        let args = command.arguments();

        if !policy.is_broadcast() {
            let mut conn = self.provider.get_connection_for(args).await?;
            let reply = round_trip(&mut conn, args).await?;
            drop(conn);
            return Ok(BroadcastOutcome {
                value: command.decode(reply)?,
                failed: BTreeMap::new(),
            });
        }

        let replies = self.fan_out(args).await?;
        let total = replies.len();

        let mut successes = Vec::with_capacity(total);
        let mut failures = BTreeMap::new();
        for (node, result) in replies {
            match result {
                Ok(reply) => successes.push(reply),
                Err(e) => {
                    warn!("{} failed on {}: {}", args.name(), node, e);
                    failures.insert(node, e);
                }
            }
        }

        if successes.is_empty() {
            return Err(BroadcastError::new(total, failures).into());
        }
        if !failures.is_empty() && policy.tolerance == FailureTolerance::FailFast {
            return Err(BroadcastError::new(total, failures).into());
        }

        let combined = combine(policy.response, successes)?;
        Ok(BroadcastOutcome {
            value: command.decode(combined)?,
            failed: failures,
        })
    }

    /// Run a command on every node and decode each reply separately
    pub async fn broadcast_per_node<T>(
        &self,
        command: &CommandObject<T>,
    ) -> RedisResult<BTreeMap<NodeAddress, RedisResult<T>>> {
        let replies = self.fan_out(command.arguments()).await?;
        Ok(replies
            .into_iter()
            .map(|(node, result)| (node, result.and_then(|reply| command.decode(reply))))
            .collect())
    }

    /// One round trip per node, concurrently; error replies count as failures
    async fn fan_out(
        &self,
        args: &CommandArguments,
    ) -> RedisResult<BTreeMap<NodeAddress, RedisResult<RespValue>>> {
        let nodes = self.provider.nodes();
        if nodes.is_empty() {
            return Err(RedisError::Cluster("No nodes to broadcast to".to_string()));
        }
        debug!("Broadcasting {} to {} node(s)", args.name(), nodes.len());

        let provider = &self.provider;
        let calls = nodes.into_iter().map(|node| async move {
            let result = match provider.get_node_connection(&node).await {
                Ok(mut conn) => round_trip(&mut conn, args).await,
                Err(e) => Err(e),
            };
            let result = result.and_then(|reply| match reply {
                RespValue::Error(msg) => Err(RedisError::Server(msg)),
                other => Ok(other),
            });
            (node, result)
        });

        Ok(join_all(calls).await.into_iter().collect())
    }
}

/// Fold successful replies, given in node order, into one
fn combine(policy: ResponsePolicy, replies: Vec<RespValue>) -> RedisResult<RespValue> {
    let mut iter = replies.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| RedisError::Protocol("No replies to combine".to_string()))?;

    match policy {
        ResponsePolicy::OneSucceeded => Ok(first),
        ResponsePolicy::AllSucceeded => {
            for other in iter {
                if other != first {
                    return Err(RedisError::Protocol(format!(
                        "Nodes disagreed: {first:?} vs {other:?}"
                    )));
                }
            }
            Ok(first)
        }
        ResponsePolicy::LogicalAnd => iter.try_fold(first, |acc, next| logical(&acc, &next, true)),
        ResponsePolicy::LogicalOr => iter.try_fold(first, |acc, next| logical(&acc, &next, false)),
        ResponsePolicy::Sum => numeric(first, iter, i64::checked_add, |a, b| a + b),
        ResponsePolicy::Min => numeric(first, iter, |a, b| Some(a.min(b)), f64::min),
        ResponsePolicy::Max => numeric(first, iter, |a, b| Some(a.max(b)), f64::max),
        ResponsePolicy::CombineArrays => {
            let mut combined = Vec::new();
            for reply in std::iter::once(first).chain(iter) {
                match reply {
                    RespValue::Array(items) | RespValue::Set(items) => combined.extend(items),
                    other => {
                        return Err(RedisError::Type(format!(
                            "Cannot combine {} as an array",
                            other.shape()
                        )))
                    }
                }
            }
            Ok(RespValue::Array(combined))
        }
    }
}

fn logical(a: &RespValue, b: &RespValue, and: bool) -> RedisResult<RespValue> {
    let op = |x: bool, y: bool| if and { x && y } else { x || y };
    match (a, b) {
        (RespValue::Integer(x), RespValue::Integer(y)) => {
            Ok(RespValue::Integer(i64::from(op(*x != 0, *y != 0))))
        }
        (RespValue::Boolean(x), RespValue::Boolean(y)) => Ok(RespValue::Boolean(op(*x, *y))),
        (RespValue::Array(xs), RespValue::Array(ys)) if xs.len() == ys.len() => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| logical(x, y, and))
            .collect::<RedisResult<Vec<_>>>()
            .map(RespValue::Array),
        (RespValue::Array(xs), RespValue::Array(ys)) => Err(RedisError::Protocol(format!(
            "Cannot combine arrays of {} and {} elements",
            xs.len(),
            ys.len()
        ))),
        _ => Err(RedisError::Type(format!(
            "Cannot combine {} and {} logically",
            a.shape(),
            b.shape()
        ))),
    }
}

/// Integers stay integers; any double turns the whole fold into doubles
fn numeric(
    first: RespValue,
    rest: impl Iterator<Item = RespValue>,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> RedisResult<RespValue> {
    let replies: Vec<RespValue> = std::iter::once(first).chain(rest).collect();

    if replies.iter().all(|r| matches!(r, RespValue::Integer(_))) {
        let mut values = replies.iter().filter_map(|r| match r {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        });
        let start = values.next().unwrap_or_default();
        return values
            .try_fold(start, |acc, v| int_op(acc, v))
            .map(RespValue::Integer)
            .ok_or_else(|| RedisError::Protocol("Integer overflow combining replies".to_string()));
    }

    let mut total: Option<f64> = None;
    for reply in &replies {
        let value = match reply {
            RespValue::Integer(i) => *i as f64,
            RespValue::Double(d) => *d,
            other => {
                return Err(RedisError::Type(format!(
                    "Cannot combine {} numerically",
                    other.shape()
                )))
            }
        };
        total = Some(match total {
            Some(acc) => float_op(acc, value),
            None => value,
        });
    }
    Ok(RespValue::Double(total.unwrap_or_default()))
}
