//! Core types for the redis-dispatch command execution library
//!
//! This crate provides the raw reply type, error definitions, configuration and node
//! identity types shared by every layer of redis-dispatch.

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{ConnectionConfig, PoolConfig, ProtocolVersion};
pub use error::{BroadcastError, ErrorKind, RedisError, RedisResult};
pub use types::{NodeAddress, SlotRange, CLUSTER_SLOTS};
pub use value::RespValue;
