//! Command objects: arguments paired with a reply decoder
//!
//! A [`CommandObject`] knows nothing about how it will be executed. The same object
//! can be handed to [`Executor::execute_command`](crate::executor::Executor::execute_command),
//! appended to a [`Pipeline`](crate::pipeline::Pipeline) or
//! [`Transaction`](crate::transaction::Transaction), or broadcast with a
//! [`Broadcaster`](crate::broadcast::Broadcaster).

use crate::arguments::CommandArguments;
use redis_dispatch_core::{RedisError, RedisResult, RespValue};
use std::fmt;
use std::sync::Arc;

/// Decode function turning a raw reply into a typed value
pub type Builder<T> = Arc<dyn Fn(RespValue) -> RedisResult<T> + Send + Sync>;

/// One command's arguments and the function that decodes its reply
pub struct CommandObject<T> {
    arguments: CommandArguments,
    builder: Builder<T>,
}

impl<T> CommandObject<T> {
    /// Pair arguments with a decoder
    pub fn new<F>(arguments: CommandArguments, builder: F) -> Self
    where
        F: Fn(RespValue) -> RedisResult<T> + Send + Sync + 'static,
    {
        Self {
            arguments,
            builder: Arc::new(builder),
        }
    }

    /// Pair arguments with an already shared decoder
    pub fn with_builder(arguments: CommandArguments, builder: Builder<T>) -> Self {
        Self { arguments, builder }
    }

    /// The wire arguments
    pub fn arguments(&self) -> &CommandArguments {
        &self.arguments
    }

    /// The decoder
    pub fn builder(&self) -> &Builder<T> {
        &self.builder
    }

    /// Decode one reply
    ///
    /// Error replies become [`RedisError::Server`] without invoking the builder.
    pub fn decode(&self, reply: RespValue) -> RedisResult<T> {
        match reply {
            RespValue::Error(msg) => Err(RedisError::Server(msg)),
            other => (self.builder)(other),
        }
    }

    /// Compose a post-processing step onto the decoder
    pub fn map<U, F>(self, f: F) -> CommandObject<U>
    where
        T: 'static,
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let builder = self.builder;
        CommandObject::new(self.arguments, move |reply| builder(reply).map(&f))
    }

    /// Split into arguments and decoder
    pub fn into_parts(self) -> (CommandArguments, Builder<T>) {
        (self.arguments, self.builder)
    }
}

impl<T> Clone for CommandObject<T> {
    fn clone(&self) -> Self {
        Self {
            arguments: self.arguments.clone(),
            builder: Arc::clone(&self.builder),
        }
    }
}

impl<T> fmt::Debug for CommandObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandObject")
            .field("arguments", &self.arguments.to_string())
            .finish_non_exhaustive()
    }
}
