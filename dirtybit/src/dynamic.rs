//! Maps whose values are only known at runtime. Every value carries a discriminator, and
//! [`DynamicRegistry`] maps discriminators to constructors.

use crate::convert::{CacheValue, FieldValue, MapKeyType, ValueKind};
use crate::error::AppError;
use crate::message::{self, Message};
use crate::schema::SchemaRegistry;
use crate::value::{MapKey, Value};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

/// Raw map entries handed to a [`BytesMapLoader`].
pub type BytesMap = BTreeMap<MapKey, Vec<u8>>;

/// Implemented by objects owning a dynamic map, see `#[saveable(loader)]`.
pub trait BytesMapLoader {
    fn load_from_bytes_map(&mut self, registry: &SchemaRegistry, entries: BytesMap) -> Result<(), AppError>;
}

pub trait DynamicValue: Any {
    fn discriminator(&self) -> &'static str;
    fn encode(&self) -> Result<Vec<u8>, AppError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<M: Message> DynamicValue for M {
    fn discriminator(&self) -> &'static str {
        M::message_name()
    }

    fn encode(&self) -> Result<Vec<u8>, AppError> {
        message::encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Serialize, Deserialize)]
struct Tagged {
    tag: String,
    payload: Vec<u8>,
}

pub fn encode_tagged(value: &dyn DynamicValue) -> Result<Vec<u8>, AppError> {
    let tagged = Tagged { tag: value.discriminator().to_string(), payload: value.encode()? };
    Ok(bincode::serialize(&tagged)?)
}

pub type Constructor = fn(&[u8]) -> Result<Box<dyn DynamicValue>, AppError>;

fn decode_boxed<M: Message>(bytes: &[u8]) -> Result<Box<dyn DynamicValue>, AppError> {
    Ok(Box::new(message::decode::<M>(bytes)?))
}

#[derive(Clone, Default)]
pub struct DynamicRegistry {
    constructors: HashMap<String, Constructor>,
}

impl DynamicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: Message>(&mut self) -> &mut Self {
        self.constructors.insert(M::message_name().to_string(), decode_boxed::<M>);
        self
    }

    pub fn register_with(&mut self, discriminator: &str, constructor: Constructor) -> &mut Self {
        self.constructors.insert(discriminator.to_string(), constructor);
        self
    }

    pub fn contains(&self, discriminator: &str) -> bool {
        self.constructors.contains_key(discriminator)
    }

    pub fn decode_tagged(&self, bytes: &[u8]) -> Result<Box<dyn DynamicValue>, AppError> {
        let tagged: Tagged = bincode::deserialize(bytes)?;
        let constructor = self
            .constructors
            .get(&tagged.tag)
            .ok_or_else(|| AppError::UnknownDiscriminator(tagged.tag.clone()))?;
        constructor(&tagged.payload)
    }
}

impl fmt::Debug for DynamicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("DynamicRegistry").field("discriminators", &tags).finish()
    }
}

/// Map of values whose concrete type is resolved through a [`DynamicRegistry`].
pub struct DynamicMap<K> {
    entries: HashMap<K, Box<dyn DynamicValue>>,
}

impl<K> Default for DynamicMap<K> {
    fn default() -> Self {
        DynamicMap { entries: HashMap::new() }
    }
}

impl<K: fmt::Debug> fmt::Debug for DynamicMap<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(k, v)| (k, v.discriminator()))).finish()
    }
}

impl<K: MapKeyType + Eq + Hash> DynamicMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&dyn DynamicValue> {
        self.entries.get(key).map(|v| v.as_ref())
    }

    pub fn get_as<T: 'static>(&self, key: &K) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.as_any().downcast_ref::<T>())
    }

    pub fn get_as_mut<T: 'static>(&mut self, key: &K) -> Option<&mut T> {
        self.entries.get_mut(key).and_then(|v| v.as_any_mut().downcast_mut::<T>())
    }

    pub fn insert(&mut self, key: K, value: Box<dyn DynamicValue>) -> Option<Box<dyn DynamicValue>> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<Box<dyn DynamicValue>> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Replaces the content with decoded entries, leaving it untouched on any failure.
    pub fn load_from_bytes_map(&mut self, registry: &DynamicRegistry, entries: BytesMap) -> Result<(), AppError> {
        let mut decoded = HashMap::with_capacity(entries.len());
        for (k, bytes) in entries {
            decoded.insert(K::from_map_key(k)?, registry.decode_tagged(&bytes)?);
        }
        self.entries = decoded;
        Ok(())
    }
}

impl<K: MapKeyType + Eq + Hash> FieldValue for DynamicMap<K> {
    fn value_kind() -> ValueKind {
        ValueKind::DynamicMap
    }

    fn is_dynamic_map() -> bool {
        true
    }

    fn kind(&self) -> ValueKind {
        ValueKind::DynamicMap
    }

    fn is_empty_map(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_value(&self, _plain: bool) -> Result<Value, AppError> {
        let mut entries = BTreeMap::new();
        for (k, v) in self.entries.iter() {
            entries.insert(k.to_map_key(), Value::Bytes(encode_tagged(v.as_ref())?));
        }
        Ok(Value::Map(entries))
    }

    fn load_value(&mut self, _value: Value) -> Result<(), AppError> {
        Err(AppError::DynamicMap("values must be loaded through a bytes map loader".to_string()))
    }

    fn to_cache(&self) -> Result<CacheValue, AppError> {
        let mut fields = Vec::with_capacity(self.entries.len());
        for (k, v) in self.entries.iter() {
            fields.push((k.to_map_key().to_string(), encode_tagged(v.as_ref())?));
        }
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(CacheValue::Hash(fields))
    }

    fn load_cache(&mut self, _cached: CacheValue) -> Result<(), AppError> {
        Err(AppError::DynamicMap("values must be loaded through a bytes map loader".to_string()))
    }

    fn map_entry_cache(&self, key: &MapKey) -> Result<Option<Vec<u8>>, AppError> {
        let typed = K::from_map_key(key.clone())?;
        self.entries.get(&typed).map(|v| encode_tagged(v.as_ref())).transpose()
    }

    fn parse_map_key(&self, field: &str) -> Result<MapKey, AppError> {
        Ok(K::from_field(field)?.to_map_key())
    }
}
