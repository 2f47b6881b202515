//! Hash commands for Redis

use super::CommandObjects;
use crate::arguments::{CommandArguments, ToArg};
use crate::builders;
use crate::command::CommandObject;
use std::collections::HashMap;

impl CommandObjects {
    /// HSET key field value [field value ...]; returns the number of new fields
    pub fn hset<F, V>(&self, key: impl ToArg, fields: impl IntoIterator<Item = (F, V)>) -> CommandObject<i64>
    where
        F: ToArg,
        V: ToArg,
    {
        let mut args = CommandArguments::new("HSET").key(key);
        for (field, value) in fields {
            args = args.arg(field).arg(value);
        }
        CommandObject::new(args, builders::integer)
    }

    /// HGET key field
    pub fn hget(&self, key: impl ToArg, field: impl ToArg) -> CommandObject<Option<String>> {
        CommandObject::new(
            CommandArguments::new("HGET").key(key).arg(field),
            builders::optional_string,
        )
    }

    /// HMGET key field [field ...]
    pub fn hmget<I>(&self, key: impl ToArg, fields: I) -> CommandObject<Vec<Option<String>>>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            CommandArguments::new("HMGET").key(key).args(fields),
            builders::optional_string_list,
        )
    }

    /// HGETALL key
    ///
    /// RESP2 sends a flat field/value array, RESP3 a map.
    pub fn hgetall(&self, key: impl ToArg) -> CommandObject<HashMap<String, String>> {
        let args = CommandArguments::new("HGETALL").key(key);
        if self.is_resp3() {
            CommandObject::new(args, builders::string_map)
        } else {
            CommandObject::new(args, builders::string_map_flat)
        }
    }

    /// HDEL key field [field ...]
    pub fn hdel<I>(&self, key: impl ToArg, fields: I) -> CommandObject<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            CommandArguments::new("HDEL").key(key).args(fields),
            builders::integer,
        )
    }

    /// HEXISTS key field
    pub fn hexists(&self, key: impl ToArg, field: impl ToArg) -> CommandObject<bool> {
        CommandObject::new(
            CommandArguments::new("HEXISTS").key(key).arg(field),
            builders::boolean,
        )
    }

    /// HLEN key
    pub fn hlen(&self, key: impl ToArg) -> CommandObject<i64> {
        CommandObject::new(CommandArguments::new("HLEN").key(key), builders::integer)
    }

    /// HINCRBY key field increment
    pub fn hincr_by(&self, key: impl ToArg, field: impl ToArg, increment: i64) -> CommandObject<i64> {
        CommandObject::new(
            CommandArguments::new("HINCRBY").key(key).arg(field).arg(increment),
            builders::integer,
        )
    }
}
