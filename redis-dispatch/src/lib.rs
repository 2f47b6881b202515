//! Command objects with synchronous, pipelined and broadcast execution for Redis
//!
//! Every command is a [`CommandObject<T>`]: its wire arguments plus the function
//! that decodes its reply. The same object runs in any execution mode:
//!
//! - [`Executor::execute_command`] sends it and waits for the decoded value
//! - [`Pipeline::append_command`] queues it and returns a deferred [`Response<T>`]
//!   that resolves when the pipeline is flushed; [`Transaction`] does the same
//!   inside `MULTI`/`EXEC`
//! - [`Broadcaster::broadcast_command`] runs it on every primary and folds the
//!   replies with the command's entry in the [`registry`]
//!
//! Failures fall into three kinds (see [`ErrorKind`]): transport, protocol and
//! server errors.
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_dispatch::{Client, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("redis://localhost:6379");
//!     let client = Client::connect(config).await?;
//!     let cmds = client.commands();
//!
//!     client.execute(&cmds.set("mykey", "myvalue")).await?;
//!     let value = client.execute(&cmds.get("mykey")).await?;
//!     println!("Value: {:?}", value);
//!
//!     let keys = client.broadcast(&cmds.dbsize()).await?;
//!     println!("{} keys across all primaries", keys);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::unused_async)]

pub mod arguments;
pub mod broadcast;
pub mod builders;
pub mod client;
pub mod cluster;
pub mod command;
pub mod commands;
pub mod connection;
pub mod executor;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod transaction;

pub use arguments::{CommandArguments, CommandParams, ScanParams, SetParams, ToArg};
pub use broadcast::{BroadcastOutcome, Broadcaster};
pub use client::Client;
pub use cluster::{calculate_slot, ClusterProvider, ClusterTopology};
pub use command::{Builder, CommandObject};
pub use commands::CommandObjects;
pub use connection::{Connection, ConnectionProvider, Connector, PooledConnection};
pub use executor::Executor;
pub use pipeline::{Pipeline, Response};
pub use pool::ConnectionPool;
pub use registry::{CommandPolicy, FailureTolerance, RequestPolicy, ResponsePolicy};
pub use transaction::Transaction;

pub use redis_dispatch_core::{
    BroadcastError, ConnectionConfig, ErrorKind, NodeAddress, PoolConfig, ProtocolVersion,
    RedisError, RedisResult, RespValue, SlotRange,
};
