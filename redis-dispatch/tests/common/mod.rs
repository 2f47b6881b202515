//! In-memory Redis stand-in shared by the integration tests
//!
//! [`FakeServer`] keeps strings, lists and hashes in a map and understands enough
//! of the command set (including `MULTI`/`EXEC`/`WATCH`) to exercise every
//! execution mode. Faults can be injected per server.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use redis_dispatch::{
    ClusterProvider, ClusterTopology, CommandArguments, CommandObjects, Connection,
    ConnectionConfig, ConnectionPool, ConnectionProvider, Connector, NodeAddress, PoolConfig,
    ProtocolVersion, RedisError, RedisResult, RespValue, SlotRange,
};
use redis_dispatch::Client;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Read deadline of fake connections in non-blocking mode
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Installs a test subscriber once; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Injected misbehaviour
#[derive(Debug, Clone)]
pub enum Fault {
    /// Connecting and writing fail
    Down,
    /// Every command gets this error reply
    ErrorReply(String),
    /// The last reply of every write is lost
    ShortRead,
}

#[derive(Debug, Clone)]
enum Entry {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(BTreeMap<Bytes, Bytes>),
}

#[derive(Default)]
struct Store {
    entries: HashMap<Bytes, Entry>,
    versions: HashMap<Bytes, u64>,
    clock: u64,
}

impl Store {
    fn touch(&mut self, key: &Bytes) {
        self.clock += 1;
        self.versions.insert(key.clone(), self.clock);
    }

    fn version(&self, key: &Bytes) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
}

/// One fake node
pub struct FakeServer {
    node: NodeAddress,
    store: Mutex<Store>,
    fault: Mutex<Option<Fault>>,
    delay: Mutex<Duration>,
    writes: Mutex<Vec<Vec<String>>>,
    connects: AtomicUsize,
}

impl FakeServer {
    pub fn new(port: u16) -> Arc<Self> {
        Arc::new(Self {
            node: NodeAddress::new("127.0.0.1", port),
            store: Mutex::new(Store::default()),
            fault: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            writes: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn node(&self) -> NodeAddress {
        self.node.clone()
    }

    pub fn set_fault(&self, fault: Option<Fault>) {
        *self.fault.lock().unwrap() = fault;
    }

    /// Delay before each reply becomes readable
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Command names of every write, one entry per write
    pub fn writes(&self) -> Vec<Vec<String>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Store a string directly, bumping the key's version
    pub fn seed(&self, key: &str, value: &str) {
        let mut store = self.store.lock().unwrap();
        let key = Bytes::copy_from_slice(key.as_bytes());
        store.touch(&key);
        store
            .entries
            .insert(key, Entry::Str(Bytes::copy_from_slice(value.as_bytes())));
    }

    pub fn string(&self, key: &str) -> Option<String> {
        match self.store.lock().unwrap().entries.get(key.as_bytes()) {
            Some(Entry::Str(value)) => Some(String::from_utf8_lossy(value).into_owned()),
            _ => None,
        }
    }

    pub fn key_count(&self) -> usize {
        self.store.lock().unwrap().entries.len()
    }

    fn fault(&self) -> Option<Fault> {
        self.fault.lock().unwrap().clone()
    }
}

/// Connection-local state
#[derive(Default)]
struct Session {
    multi: Option<Vec<Vec<Bytes>>>,
    multi_error: Option<String>,
    watched: HashMap<Bytes, u64>,
}

pub struct FakeConnection {
    server: Arc<FakeServer>,
    session: Session,
    pending: VecDeque<RespValue>,
    blocking: bool,
    broken: bool,
}

impl FakeConnection {
    fn handle(&mut self, tokens: Vec<Bytes>) -> RespValue {
        let name = String::from_utf8_lossy(&tokens[0]).to_ascii_uppercase();

        if let Some(Fault::ErrorReply(msg)) = self.server.fault() {
            return RespValue::Error(msg);
        }

        match name.as_str() {
            "MULTI" => {
                if self.session.multi.is_some() {
                    return RespValue::Error("ERR MULTI calls can not be nested".to_string());
                }
                self.session.multi = Some(Vec::new());
                self.session.multi_error = None;
                RespValue::ok()
            }
            "EXEC" => self.exec(),
            "DISCARD" => {
                self.session.multi = None;
                self.session.multi_error = None;
                self.session.watched.clear();
                RespValue::ok()
            }
            "WATCH" => {
                if self.session.multi.is_some() {
                    return RespValue::Error("ERR WATCH inside MULTI is not allowed".to_string());
                }
                let store = self.server.store.lock().unwrap();
                for key in &tokens[1..] {
                    self.session.watched.insert(key.clone(), store.version(key));
                }
                RespValue::ok()
            }
            "UNWATCH" => {
                self.session.watched.clear();
                RespValue::ok()
            }
            _ => {
                if let Some(queue) = self.session.multi.as_mut() {
                    if known(&name) {
                        queue.push(tokens);
                        return RespValue::SimpleString("QUEUED".to_string());
                    }
                    let msg = unknown(&name);
                    self.session.multi_error = Some(msg.clone());
                    return RespValue::Error(msg);
                }
                let mut store = self.server.store.lock().unwrap();
                execute(&mut store, &name, &tokens[1..])
            }
        }
    }

    fn exec(&mut self) -> RespValue {
        let Some(queued) = self.session.multi.take() else {
            return RespValue::Error("ERR EXEC without MULTI".to_string());
        };
        let watched = std::mem::take(&mut self.session.watched);
        if self.session.multi_error.take().is_some() {
            return RespValue::Error(
                "EXECABORT Transaction discarded because of previous errors.".to_string(),
            );
        }

        let mut store = self.server.store.lock().unwrap();
        if watched
            .iter()
            .any(|(key, version)| store.version(key) != *version)
        {
            return RespValue::Null;
        }
        RespValue::Array(
            queued
                .into_iter()
                .map(|tokens| {
                    let name = String::from_utf8_lossy(&tokens[0]).to_ascii_uppercase();
                    execute(&mut store, &name, &tokens[1..])
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn node(&self) -> &NodeAddress {
        &self.server.node
    }

    async fn write_batch(&mut self, batch: &[&CommandArguments]) -> RedisResult<()> {
        if self.broken {
            return Err(RedisError::Connection("connection already failed".to_string()));
        }
        if let Some(Fault::Down) = self.server.fault() {
            self.broken = true;
            return Err(RedisError::Connection("connection reset by peer".to_string()));
        }

        self.server
            .writes
            .lock()
            .unwrap()
            .push(batch.iter().map(|args| args.name().to_string()).collect());

        for args in batch {
            let reply = self.handle(args.tokens().to_vec());
            self.pending.push_back(reply);
        }
        if let Some(Fault::ShortRead) = self.server.fault() {
            self.pending.pop_back();
        }
        Ok(())
    }

    async fn read(&mut self) -> RedisResult<RespValue> {
        if self.pending.is_empty() {
            self.broken = true;
            return Err(RedisError::Connection("connection closed by peer".to_string()));
        }

        let delay = *self.server.delay.lock().unwrap();
        if !delay.is_zero() {
            if self.blocking || delay <= READ_TIMEOUT {
                tokio::time::sleep(delay).await;
            } else {
                tokio::time::sleep(READ_TIMEOUT).await;
                self.broken = true;
                return Err(RedisError::Timeout);
            }
        }

        // Taken only once readable; an abandoned read leaves it for the next one
        self.pending
            .pop_front()
            .ok_or_else(|| RedisError::Connection("connection closed by peer".to_string()))
    }

    /// Returns whatever replies arrived, up to `count`
    async fn read_many(&mut self, count: usize) -> RedisResult<Vec<RespValue>> {
        let available = count.min(self.pending.len());
        let mut replies = Vec::with_capacity(available);
        for _ in 0..available {
            replies.push(self.read().await?);
        }
        Ok(replies)
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Connects to fake servers by address
#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<NodeAddress, Arc<FakeServer>>,
}

impl FakeConnector {
    pub fn new(servers: &[Arc<FakeServer>]) -> Self {
        Self {
            servers: servers
                .iter()
                .map(|server| (server.node(), Arc::clone(server)))
                .collect(),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, node: &NodeAddress) -> RedisResult<Box<dyn Connection>> {
        let server = self
            .servers
            .get(node)
            .ok_or_else(|| RedisError::Connection(format!("no route to {node}")))?;
        server.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(Fault::Down) = server.fault() {
            return Err(RedisError::Connection(format!("connection refused by {node}")));
        }
        Ok(Box::new(FakeConnection {
            server: Arc::clone(server),
            session: Session::default(),
            pending: VecDeque::new(),
            blocking: false,
            broken: false,
        }))
    }
}

/// A client over a single fake node, with its pool exposed
pub struct Standalone {
    pub server: Arc<FakeServer>,
    pub pool: Arc<ConnectionPool>,
    pub client: Client,
}

pub fn standalone() -> Standalone {
    standalone_with(PoolConfig::default(), ProtocolVersion::Resp2)
}

pub fn standalone_with(pool: PoolConfig, protocol: ProtocolVersion) -> Standalone {
    init_tracing();
    let server = FakeServer::new(6379);
    let connector = Arc::new(FakeConnector::new(&[Arc::clone(&server)]));
    let pool = Arc::new(ConnectionPool::new(server.node(), pool, connector));
    let provider: Arc<dyn ConnectionProvider> = pool.clone();
    let client = Client::with_provider(provider, CommandObjects::new(protocol));
    Standalone {
        server,
        pool,
        client,
    }
}

/// A client over `count` fake primaries splitting the slot space evenly
pub fn cluster(count: u16) -> (Vec<Arc<FakeServer>>, Client) {
    init_tracing();
    let servers: Vec<Arc<FakeServer>> = (0..count).map(|i| FakeServer::new(7000 + i)).collect();

    let per_node = 16384 / count;
    let mut topology = ClusterTopology::new();
    for (i, server) in servers.iter().enumerate() {
        let i = i as u16;
        let start = i * per_node;
        let end = if i + 1 == count { 16383 } else { start + per_node - 1 };
        topology = topology.with_node(server.node(), [SlotRange::new(start, end)]);
    }

    let connector = Arc::new(FakeConnector::new(&servers));
    let provider = ClusterProvider::new(topology, &ConnectionConfig::default(), connector);
    let client = Client::with_provider(Arc::new(provider), CommandObjects::default());
    (servers, client)
}

/// A key whose slot belongs to node `index` of a `cluster(count)` layout
pub fn key_owned_by(index: usize, count: u16) -> String {
    let per_node = 16384 / count;
    (0..)
        .map(|i| format!("key:{i}"))
        .find(|key| {
            let owner = (redis_dispatch::calculate_slot(key.as_bytes()) / per_node).min(count - 1);
            usize::from(owner) == index
        })
        .unwrap()
}

fn known(name: &str) -> bool {
    matches!(
        name,
        "PING"
            | "ECHO"
            | "SET"
            | "GET"
            | "MGET"
            | "INCR"
            | "INCRBY"
            | "DECR"
            | "DECRBY"
            | "DEL"
            | "EXISTS"
            | "DBSIZE"
            | "FLUSHALL"
            | "FLUSHDB"
            | "KEYS"
            | "LPUSH"
            | "RPUSH"
            | "LPOP"
            | "RPOP"
            | "LRANGE"
            | "LLEN"
            | "BLPOP"
            | "HSET"
            | "HGET"
            | "HGETALL"
    )
}

fn unknown(name: &str) -> String {
    format!("ERR unknown command '{name}'")
}

fn wrong_args(name: &str) -> RespValue {
    RespValue::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn bulk(value: &Bytes) -> RespValue {
    RespValue::BulkString(value.clone())
}

fn parse_int(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

fn matches_pattern(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.split_last() {
        Some((b'*', prefix)) => key.starts_with(prefix),
        _ => pattern == key,
    }
}

fn execute(store: &mut Store, name: &str, args: &[Bytes]) -> RespValue {
    match name {
        "PING" => RespValue::SimpleString("PONG".to_string()),
        "ECHO" => match args {
            [message] => bulk(message),
            _ => wrong_args(name),
        },
        "SET" => {
            let [key, value, options @ ..] = args else {
                return wrong_args(name);
            };
            let nx = options.iter().any(|o| o.eq_ignore_ascii_case(b"NX"));
            if nx && store.entries.contains_key(key) {
                return RespValue::Null;
            }
            store.touch(key);
            store.entries.insert(key.clone(), Entry::Str(value.clone()));
            RespValue::ok()
        }
        "GET" => match args {
            [key] => match store.entries.get(key) {
                Some(Entry::Str(value)) => bulk(value),
                Some(_) => RespValue::Error(WRONGTYPE.to_string()),
                None => RespValue::Null,
            },
            _ => wrong_args(name),
        },
        "MGET" => {
            if args.is_empty() {
                return wrong_args(name);
            }
            RespValue::Array(
                args.iter()
                    .map(|key| match store.entries.get(key) {
                        Some(Entry::Str(value)) => bulk(value),
                        _ => RespValue::Null,
                    })
                    .collect(),
            )
        }
        "INCR" | "DECR" | "INCRBY" | "DECRBY" => {
            let (key, delta) = match (name, args) {
                ("INCR", [key]) => (key, Some(1)),
                ("DECR", [key]) => (key, Some(-1)),
                ("INCRBY", [key, by]) => (key, parse_int(by)),
                ("DECRBY", [key, by]) => (key, parse_int(by).map(|by| -by)),
                _ => return wrong_args(name),
            };
            let current = match store.entries.get(key) {
                Some(Entry::Str(value)) => parse_int(value),
                Some(_) => return RespValue::Error(WRONGTYPE.to_string()),
                None => Some(0),
            };
            match current.zip(delta).and_then(|(c, d)| c.checked_add(d)) {
                Some(next) => {
                    store.touch(key);
                    store
                        .entries
                        .insert(key.clone(), Entry::Str(Bytes::from(next.to_string())));
                    RespValue::Integer(next)
                }
                None => {
                    RespValue::Error("ERR value is not an integer or out of range".to_string())
                }
            }
        }
        "DEL" => {
            let mut removed = 0;
            for key in args {
                if store.entries.remove(key).is_some() {
                    store.touch(key);
                    removed += 1;
                }
            }
            RespValue::Integer(removed)
        }
        "EXISTS" => RespValue::Integer(
            args.iter()
                .filter(|key| store.entries.contains_key(*key))
                .count() as i64,
        ),
        "DBSIZE" => RespValue::Integer(store.entries.len() as i64),
        "FLUSHALL" | "FLUSHDB" => {
            let keys: Vec<Bytes> = store.entries.keys().cloned().collect();
            for key in &keys {
                store.touch(key);
            }
            store.entries.clear();
            RespValue::ok()
        }
        "KEYS" => match args {
            [pattern] => {
                let mut keys: Vec<&Bytes> = store
                    .entries
                    .keys()
                    .filter(|key| matches_pattern(pattern, key))
                    .collect();
                keys.sort();
                RespValue::Array(keys.into_iter().map(bulk).collect())
            }
            _ => wrong_args(name),
        },
        "LPUSH" | "RPUSH" => {
            let [key, elements @ ..] = args else {
                return wrong_args(name);
            };
            if elements.is_empty() {
                return wrong_args(name);
            }
            let entry = store
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::List(VecDeque::new()));
            let Entry::List(list) = entry else {
                return RespValue::Error(WRONGTYPE.to_string());
            };
            for element in elements {
                if name == "LPUSH" {
                    list.push_front(element.clone());
                } else {
                    list.push_back(element.clone());
                }
            }
            let len = list.len() as i64;
            store.touch(key);
            RespValue::Integer(len)
        }
        "LPOP" | "RPOP" => match args {
            [key] => pop(store, key, name == "LPOP").map_or(RespValue::Null, |v| bulk(&v)),
            _ => wrong_args(name),
        },
        "BLPOP" => {
            let [keys @ .., _timeout] = args else {
                return wrong_args(name);
            };
            for key in keys {
                if let Some(value) = pop(store, key, true) {
                    return RespValue::Array(vec![bulk(key), bulk(&value)]);
                }
            }
            RespValue::Null
        }
        "LRANGE" => {
            let [key, start, stop] = args else {
                return wrong_args(name);
            };
            let (Some(start), Some(stop)) = (parse_int(start), parse_int(stop)) else {
                return RespValue::Error("ERR value is not an integer or out of range".to_string());
            };
            match store.entries.get(key) {
                Some(Entry::List(list)) => {
                    let len = list.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                    RespValue::Array(
                        list.iter()
                            .enumerate()
                            .filter(|(i, _)| (*i as i64) >= start && (*i as i64) <= stop)
                            .map(|(_, v)| bulk(v))
                            .collect(),
                    )
                }
                Some(_) => RespValue::Error(WRONGTYPE.to_string()),
                None => RespValue::Array(Vec::new()),
            }
        }
        "LLEN" => match args {
            [key] => match store.entries.get(key) {
                Some(Entry::List(list)) => RespValue::Integer(list.len() as i64),
                Some(_) => RespValue::Error(WRONGTYPE.to_string()),
                None => RespValue::Integer(0),
            },
            _ => wrong_args(name),
        },
        "HSET" => {
            let [key, pairs @ ..] = args else {
                return wrong_args(name);
            };
            if pairs.is_empty() || pairs.len() % 2 != 0 {
                return wrong_args(name);
            }
            let entry = store
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::Hash(BTreeMap::new()));
            let Entry::Hash(hash) = entry else {
                return RespValue::Error(WRONGTYPE.to_string());
            };
            let added = pairs
                .chunks(2)
                .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count();
            store.touch(key);
            RespValue::Integer(added as i64)
        }
        "HGET" => match args {
            [key, field] => match store.entries.get(key) {
                Some(Entry::Hash(hash)) => hash.get(field).map_or(RespValue::Null, bulk),
                Some(_) => RespValue::Error(WRONGTYPE.to_string()),
                None => RespValue::Null,
            },
            _ => wrong_args(name),
        },
        "HGETALL" => match args {
            [key] => match store.entries.get(key) {
                Some(Entry::Hash(hash)) => RespValue::Array(
                    hash.iter()
                        .flat_map(|(field, value)| [bulk(field), bulk(value)])
                        .collect(),
                ),
                Some(_) => RespValue::Error(WRONGTYPE.to_string()),
                None => RespValue::Array(Vec::new()),
            },
            _ => wrong_args(name),
        },
        _ => RespValue::Error(unknown(name)),
    }
}

fn pop(store: &mut Store, key: &Bytes, front: bool) -> Option<Bytes> {
    let Some(Entry::List(list)) = store.entries.get_mut(key) else {
        return None;
    };
    let value = if front { list.pop_front() } else { list.pop_back() }?;
    if list.is_empty() {
        store.entries.remove(key);
    }
    store.touch(key);
    Some(value)
}
