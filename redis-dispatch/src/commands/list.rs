//! List commands for Redis

use super::CommandObjects;
use crate::arguments::{CommandArguments, ToArg};
use crate::builders;
use crate::command::CommandObject;
use std::time::Duration;

impl CommandObjects {
    /// LPUSH key element [element ...]; returns the new length
    pub fn lpush<I>(&self, key: impl ToArg, elements: I) -> CommandObject<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            CommandArguments::new("LPUSH").key(key).args(elements),
            builders::integer,
        )
    }

    /// RPUSH key element [element ...]; returns the new length
    pub fn rpush<I>(&self, key: impl ToArg, elements: I) -> CommandObject<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            CommandArguments::new("RPUSH").key(key).args(elements),
            builders::integer,
        )
    }

    /// LPOP key
    pub fn lpop(&self, key: impl ToArg) -> CommandObject<Option<String>> {
        CommandObject::new(CommandArguments::new("LPOP").key(key), builders::optional_string)
    }

    /// RPOP key
    pub fn rpop(&self, key: impl ToArg) -> CommandObject<Option<String>> {
        CommandObject::new(CommandArguments::new("RPOP").key(key), builders::optional_string)
    }

    /// LRANGE key start stop
    pub fn lrange(&self, key: impl ToArg, start: i64, stop: i64) -> CommandObject<Vec<String>> {
        CommandObject::new(
            CommandArguments::new("LRANGE").key(key).arg(start).arg(stop),
            builders::string_list,
        )
    }

    /// LLEN key
    pub fn llen(&self, key: impl ToArg) -> CommandObject<i64> {
        CommandObject::new(CommandArguments::new("LLEN").key(key), builders::integer)
    }

    /// LINDEX key index
    pub fn lindex(&self, key: impl ToArg, index: i64) -> CommandObject<Option<String>> {
        CommandObject::new(
            CommandArguments::new("LINDEX").key(key).arg(index),
            builders::optional_string,
        )
    }

    /// BLPOP key [key ...] timeout
    ///
    /// Waits on the server for up to `timeout` (zero waits forever), so the
    /// connection's fixed read deadline is suspended for this command.
    pub fn blpop<I>(&self, keys: I, timeout: Duration) -> CommandObject<Option<(String, String)>>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            blocking_pop("BLPOP", keys, timeout),
            builders::optional_key_value,
        )
    }

    /// BRPOP key [key ...] timeout
    pub fn brpop<I>(&self, keys: I, timeout: Duration) -> CommandObject<Option<(String, String)>>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            blocking_pop("BRPOP", keys, timeout),
            builders::optional_key_value,
        )
    }
}

fn blocking_pop<I>(name: &str, keys: I, timeout: Duration) -> CommandArguments
where
    I: IntoIterator,
    I::Item: ToArg,
{
    CommandArguments::new(name)
        .keys(keys)
        .arg(timeout.as_secs_f64())
        .blocking()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_pops_are_flagged() {
        let cmds = CommandObjects::default();
        let cmd = cmds.blpop(["jobs"], Duration::from_millis(1500));
        assert!(cmd.arguments().is_blocking());
        assert_eq!(cmd.arguments().to_string(), "BLPOP jobs 1.5");

        assert!(!cmds.lpop("jobs").arguments().is_blocking());
    }

    #[test]
    fn test_lrange_arguments() {
        let cmd = CommandObjects::default().lrange("l", 0, -1);
        assert_eq!(cmd.arguments().to_string(), "LRANGE l 0 -1");
    }
}
