//! Binary-safe argument lists for a single command
//!
//! [`CommandArguments`] is the ordered token list written to the wire: the command
//! name first, then every argument encoded to bytes. Positions holding keys are
//! remembered so providers can route the command, and the `blocking` flag tells the
//! transport to skip its fixed read deadline.
//!
//! # Examples
//!
//! ```
//! use redis_dispatch::arguments::{CommandArguments, SetParams};
//! use std::time::Duration;
//!
//! let args = CommandArguments::new("SET")
//!     .key("user:1")
//!     .arg("alice")
//!     .add_params(&SetParams::new().ex(Duration::from_secs(60)).nx());
//!
//! assert_eq!(args.to_string(), "SET user:1 alice NX EX 60");
//! assert_eq!(args.routing_key(), Some(&b"user:1"[..]));
//! ```

use crate::cluster::calculate_slot;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Conversion of a caller value into one wire token
///
/// Text and raw bytes produce the same token, numbers are sent in their decimal
/// form and booleans as `1`/`0`.
pub trait ToArg {
    /// Encode this value as a single binary-safe token
    fn to_arg(&self) -> Bytes;
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for bool {
    fn to_arg(&self) -> Bytes {
        Bytes::from_static(if *self { b"1" } else { b"0" })
    }
}

impl ToArg for f64 {
    fn to_arg(&self) -> Bytes {
        if self.is_infinite() {
            let token: &'static [u8] = if *self > 0.0 { b"+inf" } else { b"-inf" };
            Bytes::from_static(token)
        } else {
            Bytes::from(self.to_string())
        }
    }
}

macro_rules! integer_to_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

integer_to_arg!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

/// Role of one token in the argument list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// The command name (and nothing else)
    Command,
    /// A key the command touches
    Key,
    /// Any other argument
    Value,
}

/// Structured option sets that expand into flat tokens
pub trait CommandParams {
    /// Append this option set's tokens in the command-defined order
    fn add_params(&self, args: CommandArguments) -> CommandArguments;
}

/// The ordered wire tokens of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArguments {
    name: String,
    tokens: Vec<Bytes>,
    kinds: Vec<ArgKind>,
    blocking: bool,
}

impl CommandArguments {
    /// Start an argument list for the named command
    ///
    /// The name is upper-cased; multi-word commands such as `SCRIPT EXISTS` are
    /// written as a name plus an ordinary argument.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().to_ascii_uppercase();
        Self {
            tokens: vec![Bytes::from(name.clone())],
            kinds: vec![ArgKind::Command],
            name,
            blocking: false,
        }
    }

    /// Append one value
    #[must_use]
    pub fn arg(mut self, value: impl ToArg) -> Self {
        self.push(value.to_arg(), ArgKind::Value);
        self
    }

    /// Append every value of an iterator
    #[must_use]
    pub fn args<I>(mut self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        for value in values {
            self.push(value.to_arg(), ArgKind::Value);
        }
        self
    }

    /// Append one value and mark it as a routing key
    #[must_use]
    pub fn key(mut self, key: impl ToArg) -> Self {
        self.push(key.to_arg(), ArgKind::Key);
        self
    }

    /// Append several keys; every one of them is tagged
    #[must_use]
    pub fn keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        for key in keys {
            self.push(key.to_arg(), ArgKind::Key);
        }
        self
    }

    /// Expand a structured option set
    #[must_use]
    pub fn add_params(self, params: &impl CommandParams) -> Self {
        params.add_params(self)
    }

    /// Mark the command as one that may wait on the server without bound
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    fn push(&mut self, token: Bytes, kind: ArgKind) {
        self.tokens.push(token);
        self.kinds.push(kind);
    }

    /// Upper-cased command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First argument after the name, used to tell subcommands apart
    pub fn subcommand(&self) -> Option<&[u8]> {
        self.tokens.get(1).map(|t| &t[..])
    }

    /// Number of tokens including the command name
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Always false; the command name is the first token
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Wire tokens in order
    pub fn tokens(&self) -> &[Bytes] {
        &self.tokens
    }

    /// Tokens with their roles
    pub fn iter(&self) -> impl Iterator<Item = (ArgKind, &Bytes)> {
        self.kinds.iter().copied().zip(self.tokens.iter())
    }

    /// Every key, in argument order
    pub fn key_args(&self) -> impl Iterator<Item = &[u8]> {
        self.iter()
            .filter(|(kind, _)| *kind == ArgKind::Key)
            .map(|(_, token)| &token[..])
    }

    /// The key that decides which node owns the command
    pub fn routing_key(&self) -> Option<&[u8]> {
        self.key_args().next()
    }

    /// Whether the command carries no key at all
    pub fn is_keyless(&self) -> bool {
        self.routing_key().is_none()
    }

    /// Hash slots of every key
    pub fn hash_slots(&self) -> BTreeSet<u16> {
        self.key_args().map(calculate_slot).collect()
    }

    /// Whether the transport must skip its fixed read deadline
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }
}

impl fmt::Display for CommandArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(token))?;
        }
        Ok(())
    }
}

/// Expiry option for SET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// EX seconds
    Ex(u64),
    /// PX milliseconds
    Px(u64),
    /// EXAT unix seconds
    ExAt(u64),
    /// PXAT unix milliseconds
    PxAt(u64),
    /// KEEPTTL
    KeepTtl,
}

/// Existence condition for SET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// Only set if the key does not exist
    Nx,
    /// Only set if the key exists
    Xx,
}

/// Options of the SET command, emitted as `[NX|XX] [GET] [EX|PX|EXAT|PXAT|KEEPTTL]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetParams {
    condition: Option<SetCondition>,
    get: bool,
    expiry: Option<Expiry>,
}

impl SetParams {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire after the given duration, at second precision
    pub fn ex(mut self, ttl: Duration) -> Self {
        self.expiry = Some(Expiry::Ex(ttl.as_secs()));
        self
    }

    /// Expire after the given duration, at millisecond precision
    pub fn px(mut self, ttl: Duration) -> Self {
        self.expiry = Some(Expiry::Px(ttl.as_millis() as u64));
        self
    }

    /// Set an explicit expiry option
    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Keep the existing time to live
    pub fn keep_ttl(mut self) -> Self {
        self.expiry = Some(Expiry::KeepTtl);
        self
    }

    /// Only set if the key does not exist
    pub fn nx(mut self) -> Self {
        self.condition = Some(SetCondition::Nx);
        self
    }

    /// Only set if the key already exists
    pub fn xx(mut self) -> Self {
        self.condition = Some(SetCondition::Xx);
        self
    }

    /// Return the previous value
    pub fn get(mut self) -> Self {
        self.get = true;
        self
    }
}

impl CommandParams for SetParams {
    fn add_params(&self, mut args: CommandArguments) -> CommandArguments {
        match self.condition {
            Some(SetCondition::Nx) => args = args.arg("NX"),
            Some(SetCondition::Xx) => args = args.arg("XX"),
            None => {}
        }
        if self.get {
            args = args.arg("GET");
        }
        match self.expiry {
            Some(Expiry::Ex(secs)) => args.arg("EX").arg(secs),
            Some(Expiry::Px(millis)) => args.arg("PX").arg(millis),
            Some(Expiry::ExAt(at)) => args.arg("EXAT").arg(at),
            Some(Expiry::PxAt(at)) => args.arg("PXAT").arg(at),
            Some(Expiry::KeepTtl) => args.arg("KEEPTTL"),
            None => args,
        }
    }
}

/// Options of the SCAN family, emitted as `[MATCH pattern] [COUNT n] [TYPE t]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanParams {
    pattern: Option<String>,
    count: Option<u64>,
    type_name: Option<String>,
}

impl ScanParams {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Only return keys matching the glob pattern
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Hint for the amount of work per call
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Only return keys of the given type
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

impl CommandParams for ScanParams {
    fn add_params(&self, mut args: CommandArguments) -> CommandArguments {
        if let Some(ref pattern) = self.pattern {
            args = args.arg("MATCH").arg(pattern);
        }
        if let Some(count) = self.count {
            args = args.arg("COUNT").arg(count);
        }
        if let Some(ref type_name) = self.type_name {
            args = args.arg("TYPE").arg(type_name);
        }
        args
    }
}
