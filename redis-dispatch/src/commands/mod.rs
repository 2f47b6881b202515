//! Command factories
//!
//! [`CommandObjects`] builds ready-to-run [`CommandObject`]s. Each command family
//! lives in its own module and adds an `impl CommandObjects` block, so a family can
//! be added without touching the dispatchers: every factory output works with
//! [`Executor`](crate::executor::Executor), [`Pipeline`](crate::pipeline::Pipeline),
//! [`Transaction`](crate::transaction::Transaction) and
//! [`Broadcaster`](crate::broadcast::Broadcaster) alike.
//!
//! The factory carries the negotiated protocol version and picks the matching
//! builder when a command's reply shape differs between RESP2 and RESP3.

pub mod hash;
pub mod keys;
pub mod list;
pub mod server;
pub mod strings;

use crate::arguments::{CommandArguments, ToArg};
use crate::command::CommandObject;
use redis_dispatch_core::{ProtocolVersion, RedisResult, RespValue};

/// Factory for command objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandObjects {
    protocol: ProtocolVersion,
}

impl CommandObjects {
    /// Factory for the given protocol version
    pub const fn new(protocol: ProtocolVersion) -> Self {
        Self { protocol }
    }

    /// Protocol version builders are chosen for
    pub const fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub(crate) const fn is_resp3(&self) -> bool {
        matches!(self.protocol, ProtocolVersion::Resp3)
    }

    /// Any command: a name, plain arguments and a decoder
    ///
    /// Keys are not tagged; use [`custom_with`](Self::custom_with) when the
    /// command must be routed in a cluster.
    pub fn custom<T, I, F>(&self, name: &str, args: I, builder: F) -> CommandObject<T>
    where
        I: IntoIterator,
        I::Item: ToArg,
        F: Fn(RespValue) -> RedisResult<T> + Send + Sync + 'static,
    {
        CommandObject::new(CommandArguments::new(name).args(args), builder)
    }

    /// Any command from prepared arguments
    pub fn custom_with<T, F>(&self, arguments: CommandArguments, builder: F) -> CommandObject<T>
    where
        F: Fn(RespValue) -> RedisResult<T> + Send + Sync + 'static,
    {
        CommandObject::new(arguments, builder)
    }
}
