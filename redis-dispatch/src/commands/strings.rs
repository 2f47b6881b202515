//! String commands

use super::CommandObjects;
use crate::arguments::{CommandArguments, SetParams, ToArg};
use crate::builders;
use crate::command::CommandObject;
use redis_dispatch_core::RespValue;

impl CommandObjects {
    /// GET key
    pub fn get(&self, key: impl ToArg) -> CommandObject<Option<String>> {
        CommandObject::new(CommandArguments::new("GET").key(key), builders::optional_string)
    }

    /// GET key, binary value
    pub fn get_bytes(&self, key: impl ToArg) -> CommandObject<Option<bytes::Bytes>> {
        CommandObject::new(CommandArguments::new("GET").key(key), builders::optional_bytes)
    }

    /// SET key value
    pub fn set(&self, key: impl ToArg, value: impl ToArg) -> CommandObject<String> {
        CommandObject::new(
            CommandArguments::new("SET").key(key).arg(value),
            builders::status,
        )
    }

    /// SET key value with options
    ///
    /// Replies with `None` when an NX/XX condition was not met. With `GET` the
    /// previous value is returned instead of `OK`.
    pub fn set_with(
        &self,
        key: impl ToArg,
        value: impl ToArg,
        params: &SetParams,
    ) -> CommandObject<Option<String>> {
        CommandObject::new(
            CommandArguments::new("SET")
                .key(key)
                .arg(value)
                .add_params(params),
            |reply| match reply {
                RespValue::SimpleString(s) => Ok(Some(s)),
                other => builders::optional_string(other),
            },
        )
    }

    /// INCR key
    pub fn incr(&self, key: impl ToArg) -> CommandObject<i64> {
        CommandObject::new(CommandArguments::new("INCR").key(key), builders::integer)
    }

    /// INCRBY key increment
    pub fn incr_by(&self, key: impl ToArg, increment: i64) -> CommandObject<i64> {
        CommandObject::new(
            CommandArguments::new("INCRBY").key(key).arg(increment),
            builders::integer,
        )
    }

    /// DECR key
    pub fn decr(&self, key: impl ToArg) -> CommandObject<i64> {
        CommandObject::new(CommandArguments::new("DECR").key(key), builders::integer)
    }

    /// DECRBY key decrement
    pub fn decr_by(&self, key: impl ToArg, decrement: i64) -> CommandObject<i64> {
        CommandObject::new(
            CommandArguments::new("DECRBY").key(key).arg(decrement),
            builders::integer,
        )
    }

    /// INCRBYFLOAT key increment
    ///
    /// The new value comes back as a bulk string under both protocol versions.
    pub fn incr_by_float(&self, key: impl ToArg, increment: f64) -> CommandObject<f64> {
        CommandObject::new(
            CommandArguments::new("INCRBYFLOAT").key(key).arg(increment),
            builders::double,
        )
    }

    /// APPEND key value
    pub fn append(&self, key: impl ToArg, value: impl ToArg) -> CommandObject<i64> {
        CommandObject::new(
            CommandArguments::new("APPEND").key(key).arg(value),
            builders::integer,
        )
    }

    /// STRLEN key
    pub fn strlen(&self, key: impl ToArg) -> CommandObject<i64> {
        CommandObject::new(CommandArguments::new("STRLEN").key(key), builders::integer)
    }

    /// MGET key [key ...]
    pub fn mget<I>(&self, keys: I) -> CommandObject<Vec<Option<String>>>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            CommandArguments::new("MGET").keys(keys),
            builders::optional_string_list,
        )
    }

    /// MSET key value [key value ...]
    pub fn mset<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> CommandObject<()>
    where
        K: ToArg,
        V: ToArg,
    {
        let mut args = CommandArguments::new("MSET");
        for (key, value) in pairs {
            args = args.key(key).arg(value);
        }
        CommandObject::new(args, builders::unit)
    }
}
