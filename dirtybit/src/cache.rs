//! Key-value write-back cache with a Redis compatible command surface.

use crate::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Result of the `TYPE` probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheType {
    None,
    String,
    Hash,
    Other(String),
}

impl CacheType {
    pub fn parse(name: &str) -> Self {
        match name {
            "none" => CacheType::None,
            "string" => CacheType::String,
            "hash" => CacheType::Hash,
            other => CacheType::Other(other.to_string()),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, CacheType::None)
    }
}

/// String entry standing for a map whose last key was deleted, Redis drops empty hashes.
pub const EMPTY_MAP_MARKER: &[u8] = b"\0dirtybit:empty-map";

/// String entry standing for a value or child cleared to nil since it was stored.
pub const NIL_MARKER: &[u8] = b"\0dirtybit:nil";

pub fn entity_cache_key(prefix: &str, key: i64) -> String {
    format!("{}.{{{}}}", prefix, key)
}

pub fn entity_component_cache_key(prefix: &str, key: i64, component: &str) -> String {
    format!("{}.{}", entity_cache_key(prefix, key), component)
}

pub fn entity_component_child_cache_key(prefix: &str, key: i64, component: &str, child: &str) -> String {
    format!("{}.{}", entity_component_cache_key(prefix, key, component), child)
}

pub trait KvCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
    fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> Result<(), AppError>;
    /// Returns whether the value was written.
    fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool, AppError>;
    /// Returns the number of removed keys, missing keys are not an error.
    fn del(&self, keys: &[String]) -> Result<usize, AppError>;
    fn key_type(&self, key: &str) -> Result<CacheType, AppError>;
    fn hget_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, AppError>;
    fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError>;
    fn hset_nx(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, AppError>;
    fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, AppError>;
    /// Replaces whatever `key` holds with a hash of `fields` in one step, no fields removes the key.
    fn replace_hash(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError>;

    fn get_map(&self, key: &str) -> Result<BTreeMap<String, String>, AppError> {
        self.hget_all(key)?
            .into_iter()
            .map(|(k, v)| String::from_utf8(v).map(|v| (k, v)).map_err(|e| AppError::Conversion(e.to_string())))
            .collect()
    }

    fn set_map(&self, key: &str, map: &BTreeMap<String, String>) -> Result<(), AppError> {
        let fields: Vec<(String, Vec<u8>)> = map.iter().map(|(k, v)| (k.clone(), v.clone().into_bytes())).collect();
        self.hset(key, &fields)
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Str(Vec<u8>),
    Hash(BTreeMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache with the same semantics as the Redis commands it stands in for.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
}

fn wrong_type(key: &str) -> AppError {
    AppError::WrongType(key.to_string())
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys in sorted order.
    pub fn keys(&self) -> Result<Vec<String>, AppError> {
        let now = Instant::now();
        let slots = self.slots.lock()?;
        let mut keys: Vec<String> = slots.iter().filter(|(_, s)| s.live(now)).map(|(k, _)| k.clone()).collect();
        keys.sort();
        Ok(keys)
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut Slot>) -> Result<R, AppError>) -> Result<R, AppError> {
        let mut slots = self.slots.lock()?;
        let now = Instant::now();
        if slots.get(key).is_some_and(|s| !s.live(now)) {
            slots.remove(key);
        }
        f(slots.get_mut(key))
    }

    fn with_hash<R>(&self, key: &str, create: bool, f: impl FnOnce(&mut BTreeMap<String, Vec<u8>>) -> R) -> Result<Option<R>, AppError> {
        let mut slots = self.slots.lock()?;
        let now = Instant::now();
        if slots.get(key).is_some_and(|s| !s.live(now)) {
            slots.remove(key);
        }
        if create && !slots.contains_key(key) {
            slots.insert(key.to_string(), Slot { entry: Entry::Hash(BTreeMap::new()), expires_at: None });
        }
        let result = match slots.get_mut(key) {
            None => return Ok(None),
            Some(Slot { entry: Entry::Str(_), .. }) => return Err(wrong_type(key)),
            Some(Slot { entry: Entry::Hash(hash), .. }) => {
                let result = f(hash);
                (result, hash.is_empty())
            }
        };
        if result.1 {
            slots.remove(key);
        }
        Ok(Some(result.0))
    }
}

impl KvCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.with_live(key, |slot| match slot {
            None => Ok(None),
            Some(Slot { entry: Entry::Str(bytes), .. }) => Ok(Some(bytes.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> Result<(), AppError> {
        let expires_at = expiry.map(|d| Instant::now() + d);
        self.slots.lock()?.insert(key.to_string(), Slot { entry: Entry::Str(value.to_vec()), expires_at });
        Ok(())
    }

    fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        let exists = self.with_live(key, |slot| Ok(slot.is_some()))?;
        if exists {
            return Ok(false);
        }
        self.set(key, value, None)?;
        Ok(true)
    }

    fn del(&self, keys: &[String]) -> Result<usize, AppError> {
        let now = Instant::now();
        let mut slots = self.slots.lock()?;
        Ok(keys.iter().filter_map(|k| slots.remove(k)).filter(|s| s.live(now)).count())
    }

    fn key_type(&self, key: &str) -> Result<CacheType, AppError> {
        self.with_live(key, |slot| {
            Ok(match slot {
                None => CacheType::None,
                Some(Slot { entry: Entry::Str(_), .. }) => CacheType::String,
                Some(Slot { entry: Entry::Hash(_), .. }) => CacheType::Hash,
            })
        })
    }

    fn hget_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, AppError> {
        Ok(self.with_hash(key, false, |hash| hash.clone())?.unwrap_or_default())
    }

    fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError> {
        if fields.is_empty() {
            return Ok(());
        }
        self.with_hash(key, true, |hash| {
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        })?;
        Ok(())
    }

    fn hset_nx(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, AppError> {
        let written = self.with_hash(key, true, |hash| {
            if hash.contains_key(field) {
                false
            } else {
                hash.insert(field.to_string(), value.to_vec());
                true
            }
        })?;
        Ok(written.unwrap_or(false))
    }

    fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, AppError> {
        let removed = self.with_hash(key, false, |hash| fields.iter().filter(|f| hash.remove(*f).is_some()).count())?;
        Ok(removed.unwrap_or(0))
    }

    fn replace_hash(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError> {
        let mut slots = self.slots.lock()?;
        if fields.is_empty() {
            slots.remove(key);
            return Ok(());
        }
        let hash: BTreeMap<String, Vec<u8>> = fields.iter().cloned().collect();
        slots.insert(key.to_string(), Slot { entry: Entry::Hash(hash), expires_at: None });
        Ok(())
    }
}

/// [`KvCache`] over a Redis connection.
pub struct RedisCache {
    conn: Mutex<redis::Connection>,
}

impl RedisCache {
    pub fn open(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        Ok(RedisCache { conn: Mutex::new(client.get_connection()?) })
    }

    fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, AppError> {
        let mut conn = self.conn.lock()?;
        Ok(cmd.query(&mut *conn)?)
    }
}

impl KvCache for RedisCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.query(redis::cmd("GET").arg(key))
    }

    fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> Result<(), AppError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(expiry) = expiry {
            cmd.arg("PX").arg(expiry.as_millis() as u64);
        }
        self.query(&cmd)
    }

    fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        let reply: Option<String> = self.query(redis::cmd("SET").arg(key).arg(value).arg("NX"))?;
        Ok(reply.is_some())
    }

    fn del(&self, keys: &[String]) -> Result<usize, AppError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys))
    }

    fn key_type(&self, key: &str) -> Result<CacheType, AppError> {
        let name: String = self.query(redis::cmd("TYPE").arg(key))?;
        Ok(CacheType::parse(&name))
    }

    fn hget_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, AppError> {
        self.query(redis::cmd("HGETALL").arg(key))
    }

    fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value.as_slice());
        }
        let _: usize = self.query(&cmd)?;
        Ok(())
    }

    fn hset_nx(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, AppError> {
        self.query(redis::cmd("HSETNX").arg(key).arg(field).arg(value))
    }

    fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, AppError> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("HDEL").arg(key).arg(fields))
    }

    fn replace_hash(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError> {
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !fields.is_empty() {
            pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                pipe.arg(field).arg(value.as_slice());
            }
            pipe.ignore();
        }
        let mut conn = self.conn.lock()?;
        pipe.query::<()>(&mut *conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, Vec<u8>)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.as_bytes().to_vec())).collect()
    }

    #[test]
    fn keys_colocate_under_the_entity_hashtag() {
        assert_eq!(entity_cache_key("p", 7), "p.{7}");
        assert_eq!(entity_component_cache_key("p", 7, "C"), "p.{7}.C");
        assert_eq!(entity_component_child_cache_key("p", -3, "bag", "items"), "p.{-3}.bag.items");
    }

    #[test]
    fn strings_and_hashes_do_not_mix() {
        let cache = MemoryCache::new();
        cache.set("s", b"v", None).expect("set");
        cache.hset("h", &fields(&[("1", "a")])).expect("hset");
        assert_eq!(cache.key_type("s").expect("type"), CacheType::String);
        assert_eq!(cache.key_type("h").expect("type"), CacheType::Hash);
        assert_eq!(cache.key_type("missing").expect("type"), CacheType::None);
        assert!(matches!(cache.get("h"), Err(AppError::WrongType(_))));
        assert!(matches!(cache.hset("s", &fields(&[("1", "a")])), Err(AppError::WrongType(_))));
    }

    #[test]
    fn emptied_hash_disappears() {
        let cache = MemoryCache::new();
        cache.hset("h", &fields(&[("1", "a"), ("2", "b")])).expect("hset");
        assert_eq!(cache.hdel("h", &["1".to_string(), "9".to_string()]).expect("hdel"), 1);
        assert_eq!(cache.hdel("h", &["1".to_string()]).expect("double hdel"), 0);
        assert_eq!(cache.hget_all("h").expect("hgetall").len(), 1);
        cache.hdel("h", &["2".to_string()]).expect("hdel");
        assert_eq!(cache.key_type("h").expect("type"), CacheType::None);
    }

    #[test]
    fn replace_hash_swaps_any_previous_entry() {
        let cache = MemoryCache::new();
        cache.hset("h", &fields(&[("1", "a"), ("2", "b")])).expect("hset");
        cache.replace_hash("h", &fields(&[("3", "c")])).expect("replace");
        assert_eq!(cache.hget_all("h").expect("hgetall").keys().collect::<Vec<_>>(), vec!["3"]);

        cache.set("s", EMPTY_MAP_MARKER, None).expect("marker");
        cache.replace_hash("s", &fields(&[("1", "a")])).expect("replace string");
        assert_eq!(cache.key_type("s").expect("type"), CacheType::Hash);

        cache.replace_hash("h", &[]).expect("replace with nothing");
        assert_eq!(cache.key_type("h").expect("type"), CacheType::None);
    }

    #[test]
    fn nx_variants_keep_existing_values() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("k", b"1").expect("first"));
        assert!(!cache.set_nx("k", b"2").expect("second"));
        assert_eq!(cache.get("k").expect("get"), Some(b"1".to_vec()));
        assert!(cache.hset_nx("h", "f", b"1").expect("first"));
        assert!(!cache.hset_nx("h", "f", b"2").expect("second"));
        assert_eq!(cache.hget_all("h").expect("hgetall").get("f"), Some(&b"1".to_vec()));
    }

    #[test]
    fn expired_entries_are_gone() {
        let cache = MemoryCache::new();
        cache.set("short", b"v", Some(Duration::from_millis(0))).expect("set");
        cache.set("long", b"v", Some(Duration::from_secs(60))).expect("set");
        assert_eq!(cache.get("short").expect("get"), None);
        assert_eq!(cache.key_type("short").expect("type"), CacheType::None);
        assert_eq!(cache.keys().expect("keys"), vec!["long".to_string()]);
    }

    #[test]
    fn string_maps_round_trip() {
        let cache = MemoryCache::new();
        let map: BTreeMap<String, String> = [("a", "1"), ("b", "2")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        cache.set_map("m", &map).expect("set_map");
        assert_eq!(cache.get_map("m").expect("get_map"), map);
        assert_eq!(cache.del(&["m".to_string(), "none".to_string()]).expect("del"), 1);
    }
}
