#![allow(dead_code)]

use player::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const PREFIX: &str = "p";

/// In-memory cache recording every write command, with an optional failing `DEL`.
#[derive(Default)]
pub struct RecordingCache {
    pub inner: MemoryCache,
    log: Mutex<Vec<String>>,
    pub fail_del: AtomicBool,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, command: String) {
        self.log.lock().expect("log lock").push(command);
    }

    /// Commands issued against `key` since the last call.
    pub fn take_log_for(&self, key: &str) -> Vec<String> {
        let mut log = self.log.lock().expect("log lock");
        let taken: Vec<String> = log.iter().filter(|c| c.split(' ').nth(1) == Some(key)).cloned().collect();
        log.clear();
        taken
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys().expect("keys")
    }
}

impl KvCache for RecordingCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> Result<(), AppError> {
        self.record(format!("SET {}", key));
        self.inner.set(key, value, expiry)
    }

    fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        self.record(format!("SETNX {}", key));
        self.inner.set_nx(key, value)
    }

    fn del(&self, keys: &[String]) -> Result<usize, AppError> {
        if self.fail_del.load(Ordering::SeqCst) {
            return Err(AppError::Custom("injected DEL failure".to_string()));
        }
        for key in keys {
            self.record(format!("DEL {}", key));
        }
        self.inner.del(keys)
    }

    fn key_type(&self, key: &str) -> Result<CacheType, AppError> {
        self.inner.key_type(key)
    }

    fn hget_all(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, AppError> {
        self.inner.hget_all(key)
    }

    fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError> {
        if !fields.is_empty() {
            let names: Vec<&str> = fields.iter().map(|(f, _)| f.as_str()).collect();
            self.record(format!("HSET {} {}", key, names.join(",")));
        }
        self.inner.hset(key, fields)
    }

    fn hset_nx(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, AppError> {
        self.record(format!("HSETNX {} {}", key, field));
        self.inner.hset_nx(key, field, value)
    }

    fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, AppError> {
        if !fields.is_empty() {
            self.record(format!("HDEL {} {}", key, fields.join(",")));
        }
        self.inner.hdel(key, fields)
    }

    fn replace_hash(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<(), AppError> {
        let names: Vec<&str> = fields.iter().map(|(f, _)| f.as_str()).collect();
        self.record(format!("REPLACE {} {}", key, names.join(",")));
        self.inner.replace_hash(key, fields)
    }
}

/// Document store counting batched updates, with switchable write failures.
pub struct FaultyDb {
    pub inner: RedbEntityDb,
    pub fail_writes: AtomicBool,
    pub batches: AtomicUsize,
}

impl FaultyDb {
    pub fn new() -> Self {
        FaultyDb {
            inner: RedbEntityDb::in_memory("player").expect("in-memory db"),
            fail_writes: AtomicBool::new(false),
            batches: AtomicUsize::new(0),
        }
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn doc(&self, id: i64) -> Document {
        self.inner.find_entity_by_id(id).expect("find").expect("document present")
    }

    fn check(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Custom("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl EntityDb for FaultyDb {
    fn find_entity_by_id(&self, id: i64) -> Result<Option<Document>, AppError> {
        self.inner.find_entity_by_id(id)
    }

    fn insert_entity(&self, id: i64, doc: &Document) -> Result<(), AppError> {
        self.check()?;
        self.inner.insert_entity(id, doc)
    }

    fn save_entity(&self, id: i64, doc: &Document) -> Result<(), AppError> {
        self.check()?;
        self.inner.save_entity(id, doc)
    }

    fn delete_entity(&self, id: i64) -> Result<bool, AppError> {
        self.check()?;
        self.inner.delete_entity(id)
    }

    fn save_component(&self, id: i64, component: &str, value: &Value) -> Result<(), AppError> {
        self.check()?;
        self.inner.save_component(id, component, value)
    }

    fn save_components(&self, id: i64, fields: &Document) -> Result<(), AppError> {
        self.check()?;
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.save_components(id, fields)
    }

    fn save_component_field(&self, id: i64, component: &str, field: &str, value: &Value) -> Result<(), AppError> {
        self.check()?;
        self.inner.save_component_field(id, component, field, value)
    }

    fn delete_component_field(&self, id: i64, component: &str, field: &str) -> Result<(), AppError> {
        self.check()?;
        self.inner.delete_component_field(id, component, field)
    }
}

pub fn registry() -> SchemaRegistry {
    player_registry(NamingPolicy::Verbatim)
}
