//! Keyspace commands

use super::CommandObjects;
use crate::arguments::{CommandArguments, ScanParams, ToArg};
use crate::builders;
use crate::command::CommandObject;
use std::time::Duration;

impl CommandObjects {
    /// DEL key [key ...]
    pub fn del<I>(&self, keys: I) -> CommandObject<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(CommandArguments::new("DEL").keys(keys), builders::integer)
    }

    /// UNLINK key [key ...]
    pub fn unlink<I>(&self, keys: I) -> CommandObject<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(CommandArguments::new("UNLINK").keys(keys), builders::integer)
    }

    /// EXISTS key [key ...], counting repeats
    pub fn exists<I>(&self, keys: I) -> CommandObject<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        CommandObject::new(CommandArguments::new("EXISTS").keys(keys), builders::integer)
    }

    /// EXPIRE key seconds
    pub fn expire(&self, key: impl ToArg, ttl: Duration) -> CommandObject<bool> {
        CommandObject::new(
            CommandArguments::new("EXPIRE").key(key).arg(ttl.as_secs()),
            builders::boolean,
        )
    }

    /// TTL key; `-1` without expiry, `-2` when the key is missing
    pub fn ttl(&self, key: impl ToArg) -> CommandObject<i64> {
        CommandObject::new(CommandArguments::new("TTL").key(key), builders::integer)
    }

    /// TYPE key
    pub fn key_type(&self, key: impl ToArg) -> CommandObject<String> {
        CommandObject::new(CommandArguments::new("TYPE").key(key), builders::status)
    }

    /// KEYS pattern
    pub fn keys(&self, pattern: impl ToArg) -> CommandObject<Vec<String>> {
        CommandObject::new(CommandArguments::new("KEYS").arg(pattern), builders::string_list)
    }

    /// SCAN cursor [MATCH pattern] [COUNT count] [TYPE type]
    pub fn scan(&self, cursor: impl ToArg, params: &ScanParams) -> CommandObject<(String, Vec<String>)> {
        CommandObject::new(
            CommandArguments::new("SCAN").arg(cursor).add_params(params),
            builders::scan_page,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_dispatch_core::RespValue;

    #[test]
    fn test_multi_key_commands_tag_all_keys() {
        let cmd = CommandObjects::default().del(["{u}a", "{u}b"]);
        assert_eq!(cmd.arguments().key_args().count(), 2);
        assert_eq!(cmd.arguments().hash_slots().len(), 1);
    }

    #[test]
    fn test_expire_is_integer_boolean() {
        let cmd = CommandObjects::default().expire("k", Duration::from_secs(30));
        assert_eq!(cmd.arguments().to_string(), "EXPIRE k 30");
        assert!(cmd.decode(RespValue::Integer(1)).unwrap());
        assert!(cmd.decode(RespValue::Boolean(true)).is_err());
    }

    #[test]
    fn test_scan_arguments() {
        let params = ScanParams::new().pattern("user:*").count(100);
        let cmd = CommandObjects::default().scan("0", &params);
        assert_eq!(cmd.arguments().to_string(), "SCAN 0 MATCH user:* COUNT 100");
        assert!(cmd.arguments().is_keyless());
    }
}
