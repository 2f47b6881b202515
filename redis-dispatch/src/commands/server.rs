//! Server, scripting and connection commands
//!
//! Most of these are global: the policy table in [`registry`](crate::registry)
//! marks them for broadcast, so pass them to
//! [`Broadcaster::broadcast_command`](crate::broadcast::Broadcaster::broadcast_command)
//! to reach every primary of a cluster.

use super::CommandObjects;
use crate::arguments::{CommandArguments, ToArg};
use crate::builders;
use crate::command::CommandObject;
use redis_dispatch_core::RespValue;
use std::collections::HashMap;
use std::time::Duration;

impl CommandObjects {
    /// PING
    pub fn ping(&self) -> CommandObject<String> {
        CommandObject::new(CommandArguments::new("PING"), builders::status)
    }

    /// ECHO message
    pub fn echo(&self, message: impl ToArg) -> CommandObject<String> {
        CommandObject::new(CommandArguments::new("ECHO").arg(message), builders::string)
    }

    /// DBSIZE
    pub fn dbsize(&self) -> CommandObject<i64> {
        CommandObject::new(CommandArguments::new("DBSIZE"), builders::integer)
    }

    /// FLUSHALL
    pub fn flushall(&self) -> CommandObject<String> {
        CommandObject::new(CommandArguments::new("FLUSHALL"), builders::status)
    }

    /// FLUSHDB
    pub fn flushdb(&self) -> CommandObject<String> {
        CommandObject::new(CommandArguments::new("FLUSHDB"), builders::status)
    }

    /// RANDOMKEY
    pub fn randomkey(&self) -> CommandObject<Option<String>> {
        CommandObject::new(CommandArguments::new("RANDOMKEY"), builders::optional_string)
    }

    /// WAIT numreplicas timeout; returns the number of replicas that acknowledged
    pub fn wait(&self, replicas: u32, timeout: Duration) -> CommandObject<i64> {
        let args = CommandArguments::new("WAIT")
            .arg(replicas)
            .arg(timeout.as_millis() as u64);
        // WAIT 0 blocks until the replicas answer
        let args = if timeout.is_zero() { args.blocking() } else { args };
        CommandObject::new(args, builders::integer)
    }

    /// INFO [section]
    pub fn info(&self, section: Option<&str>) -> CommandObject<String> {
        let args = match section {
            Some(section) => CommandArguments::new("INFO").arg(section),
            None => CommandArguments::new("INFO"),
        };
        CommandObject::new(args, builders::string)
    }

    /// SCRIPT EXISTS sha1 [sha1 ...]
    pub fn script_exists<I>(&self, sha1s: I) -> CommandObject<Vec<bool>>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(
            CommandArguments::new("SCRIPT").arg("EXISTS").args(sha1s),
            builders::boolean_list,
        )
    }

    /// SCRIPT FLUSH
    pub fn script_flush(&self) -> CommandObject<String> {
        CommandObject::new(CommandArguments::new("SCRIPT").arg("FLUSH"), builders::status)
    }

    /// SCRIPT LOAD script; returns the script's SHA1
    pub fn script_load(&self, script: impl ToArg) -> CommandObject<String> {
        CommandObject::new(
            CommandArguments::new("SCRIPT").arg("LOAD").arg(script),
            builders::string,
        )
    }

    /// SCRIPT KILL
    pub fn script_kill(&self) -> CommandObject<String> {
        CommandObject::new(CommandArguments::new("SCRIPT").arg("KILL"), builders::status)
    }

    /// CONFIG SET parameter value
    pub fn config_set(&self, parameter: impl ToArg, value: impl ToArg) -> CommandObject<String> {
        CommandObject::new(
            CommandArguments::new("CONFIG").arg("SET").arg(parameter).arg(value),
            builders::status,
        )
    }

    /// CONFIG GET pattern
    ///
    /// RESP2 sends a flat parameter/value array, RESP3 a map.
    pub fn config_get(&self, pattern: impl ToArg) -> CommandObject<HashMap<String, String>> {
        let args = CommandArguments::new("CONFIG").arg("GET").arg(pattern);
        if self.is_resp3() {
            CommandObject::new(args, builders::string_map)
        } else {
            CommandObject::new(args, builders::string_map_flat)
        }
    }

    /// Any command, reply left undecoded
    pub fn raw(&self, arguments: CommandArguments) -> CommandObject<RespValue> {
        CommandObject::new(arguments, builders::raw)
    }
}
