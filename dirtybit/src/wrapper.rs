//! Ready made persistable values that keep their dirty marker in sync with every mutation.

use crate::convert::{FieldValue, MapKeyType};
use crate::dirty::{BaseDirtyMark, BaseMapDirtyMark, DirtyMark, MapDirtyMark};
use crate::dynamic::{BytesMap, BytesMapLoader, DynamicMap, DynamicValue};
use crate::error::AppError;
use crate::message::Message;
use crate::schema::SchemaRegistry;
use macros::Saveable;
use std::collections::HashMap;
use std::hash::Hash;

/// Assigns `value` and marks the owner dirty.
pub fn set_field<T>(mark: &mut dyn DirtyMark, field: &mut T, value: T) {
    *field = value;
    mark.set_dirty();
}

/// Runs an in-place mutation and marks the owner dirty.
pub fn set_with<R>(mark: &mut dyn DirtyMark, f: impl FnOnce() -> R) -> R {
    let result = f();
    mark.set_dirty();
    result
}

pub fn map_set<K: MapKeyType + Eq + Hash, V>(mark: &mut dyn MapDirtyMark, map: &mut HashMap<K, V>, key: K, value: V) {
    mark.set_dirty(key.to_map_key(), true);
    map.insert(key, value);
}

pub fn map_del<K: MapKeyType + Eq + Hash, V>(mark: &mut dyn MapDirtyMark, map: &mut HashMap<K, V>, key: &K) -> Option<V> {
    mark.set_dirty(key.to_map_key(), false);
    map.remove(key)
}

/// A structured message persisted as one value.
#[derive(Saveable, Debug, Clone, Default)]
pub struct MessageData<M: Message + FieldValue> {
    #[db]
    pub value: M,
    #[mark]
    mark: BaseDirtyMark,
}

impl<M: Message + FieldValue> MessageData<M> {
    pub fn new(value: M) -> Self {
        MessageData { value, mark: BaseDirtyMark::default() }
    }

    pub fn value(&self) -> &M {
        &self.value
    }

    /// Mutable access, the message is marked dirty.
    pub fn value_mut(&mut self) -> &mut M {
        self.mark.set_dirty();
        &mut self.value
    }

    pub fn set(&mut self, value: M) {
        set_field(&mut self.mark, &mut self.value, value);
    }

    pub fn dirty_mark(&self) -> &BaseDirtyMark {
        &self.mark
    }
}

/// A map synchronised key by key.
#[derive(Saveable, Debug, Clone)]
pub struct MapData<K, V>
where
    K: MapKeyType + Eq + Hash + 'static,
    V: FieldValue + Default + 'static,
{
    #[db]
    pub value: HashMap<K, V>,
    #[mark]
    mark: BaseMapDirtyMark,
}

impl<K, V> Default for MapData<K, V>
where
    K: MapKeyType + Eq + Hash + 'static,
    V: FieldValue + Default + 'static,
{
    fn default() -> Self {
        MapData { value: HashMap::new(), mark: BaseMapDirtyMark::default() }
    }
}

impl<K, V> MapData<K, V>
where
    K: MapKeyType + Eq + Hash + 'static,
    V: FieldValue + Default + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry without recording deletions.
    pub fn init(&mut self) {
        self.value = HashMap::new();
    }

    pub fn contains(&self, key: &K) -> bool {
        self.value.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.value.get(key)
    }

    pub fn set(&mut self, key: K, value: V) {
        map_set(&mut self.mark, &mut self.value, key, value);
    }

    pub fn delete(&mut self, key: &K) -> Option<V> {
        map_del(&mut self.mark, &mut self.value, key)
    }

    /// Mutates an existing entry in place, marking its key.
    pub fn update<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let value = self.value.get_mut(key)?;
        let result = f(value);
        self.mark.set_dirty(key.to_map_key(), true);
        Some(result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.value.iter()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn dirty_mark(&self) -> &BaseMapDirtyMark {
        &self.mark
    }
}

/// A list persisted as one value.
#[derive(Saveable, Debug, Clone, Default)]
pub struct SliceData<T: FieldValue + Default + 'static> {
    #[db]
    pub value: Vec<T>,
    #[mark]
    mark: BaseDirtyMark,
}

impl<T: FieldValue + Default + 'static> SliceData<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `items`, an empty input changes nothing.
    pub fn add(&mut self, items: impl IntoIterator<Item = T>) {
        let before = self.value.len();
        self.value.extend(items);
        if self.value.len() > before {
            self.mark.set_dirty();
        }
    }

    /// Removes `start..end`, `end` is clamped to the length and an inverted range is ignored.
    pub fn delete(&mut self, start: usize, end: usize) {
        let end = end.min(self.value.len());
        if start > end {
            return;
        }
        self.value.drain(start..end);
        self.mark.set_dirty();
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.value.get(index)
    }

    pub fn set(&mut self, index: usize, item: T) -> Result<(), AppError> {
        let len = self.value.len();
        let slot = self
            .value
            .get_mut(index)
            .ok_or_else(|| AppError::Custom(format!("index {} out of range for length {}", index, len)))?;
        set_field(&mut self.mark, slot, item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn dirty_mark(&self) -> &BaseDirtyMark {
        &self.mark
    }
}

/// A map of registered message types, rebuilt from stored bytes through the registry.
#[derive(Saveable, Debug)]
#[saveable(loader)]
pub struct DynamicMapData<K>
where
    K: MapKeyType + Eq + Hash + 'static,
{
    #[db]
    pub value: DynamicMap<K>,
    #[mark]
    mark: BaseMapDirtyMark,
}

impl<K: MapKeyType + Eq + Hash + 'static> Default for DynamicMapData<K> {
    fn default() -> Self {
        DynamicMapData { value: DynamicMap::new(), mark: BaseMapDirtyMark::default() }
    }
}

impl<K: MapKeyType + Eq + Hash + 'static> BytesMapLoader for DynamicMapData<K> {
    fn load_from_bytes_map(&mut self, registry: &SchemaRegistry, entries: BytesMap) -> Result<(), AppError> {
        self.value.load_from_bytes_map(registry.dynamic(), entries)
    }
}

impl<K: MapKeyType + Eq + Hash + 'static> DynamicMapData<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<M: Message>(&mut self, key: K, value: M) {
        self.mark.set_dirty(key.to_map_key(), true);
        self.value.insert(key, Box::new(value));
    }

    pub fn remove(&mut self, key: &K) -> Option<Box<dyn DynamicValue>> {
        self.mark.set_dirty(key.to_map_key(), false);
        self.value.remove(key)
    }

    pub fn get_as<T: 'static>(&self, key: &K) -> Option<&T> {
        self.value.get_as(key)
    }

    /// Mutates a value in place when it has type `T`, marking its key.
    pub fn with_value_mut<T: 'static, R>(&mut self, key: &K, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let value = self.value.get_as_mut::<T>(key)?;
        let result = f(value);
        self.mark.set_dirty(key.to_map_key(), true);
        Some(result)
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn dirty_mark(&self) -> &BaseMapDirtyMark {
        &self.mark
    }
}

#[cfg(test)]
mod wrapper_tests {
    use super::*;
    use crate::cache::{CacheType, KvCache, MemoryCache, EMPTY_MAP_MARKER};
    use crate::dirty::Saveable as _;
    use crate::load::load_from_cache;
    use crate::save::save_changed_data_to_cache;
    use crate::value::MapKey;
    use serde::{Deserialize, Serialize};

    #[derive(macros::Message, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Sword {
        damage: u32,
    }

    #[derive(macros::Message, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct PlayerInfo {
        level: i32,
        exp: i64,
    }

    #[test]
    fn message_mutation_marks_dirty() {
        let mut data = MessageData::new(PlayerInfo { level: 1, exp: 0 });
        assert!(!data.dirty_mark().is_dirty());
        data.value_mut().exp = 50;
        assert!(data.dirty_mark().is_dirty() && data.dirty_mark().is_changed());
        assert_eq!(data.value().exp, 50);
        data.set(PlayerInfo::default());
        assert_eq!(data.value(), &PlayerInfo::default());
    }

    #[test]
    fn map_operations_record_per_key_marks() {
        let mut data = MapData::<i32, String>::new();
        data.set(5, "a".to_string());
        data.set(6, "b".to_string());
        assert_eq!(data.delete(&6).as_deref(), Some("b"));
        assert_eq!(data.update(&5, |v| v.push('!')), Some(()));
        assert_eq!(data.update(&7, |v| v.push('!')), None);
        assert!(data.contains(&5));
        assert_eq!(data.get(&5).map(String::as_str), Some("a!"));
        assert_eq!(data.len(), 1);
        assert_eq!(data.dirty_mark().dirty_entries(), vec![(MapKey::Int(5), true), (MapKey::Int(6), false)]);

        data.init();
        assert!(data.is_empty());
        assert_eq!(data.dirty_mark().dirty_entries().len(), 2, "init records nothing");
    }

    #[test]
    fn slice_delete_clamps_the_range() {
        let mut data = SliceData::<i32>::new();
        data.add(Vec::new());
        assert!(!data.dirty_mark().is_dirty(), "empty add is a no-op");
        data.add([1, 2, 3, 4]);
        data.delete(1, 100);
        assert_eq!(data.value, vec![1]);
        data.delete(3, 2);
        assert_eq!(data.len(), 1, "inverted range is ignored");
        assert!(data.set(4, 9).is_err());
        data.set(0, 9).expect("in range");
        assert_eq!(data.get(0), Some(&9));
    }

    #[test]
    fn dynamic_value_mutation_marks_its_key() {
        let mut data = DynamicMapData::<String>::new();
        data.insert("item1".to_string(), Sword { damage: 1 });
        data.mark.reset_dirty();
        assert_eq!(data.with_value_mut(&"item1".to_string(), |s: &mut Sword| s.damage = 9), Some(()));
        assert_eq!(data.with_value_mut(&"item1".to_string(), |_: &mut PlayerInfo| ()), None, "wrong type");
        assert_eq!(data.get_as::<Sword>(&"item1".to_string()), Some(&Sword { damage: 9 }));
        assert_eq!(data.dirty_mark().dirty_entries(), vec![(MapKey::Str("item1".into()), true)]);
    }

    #[test]
    fn dynamic_map_survives_the_cache() {
        let mut registry = SchemaRegistry::default();
        registry.register_dynamic::<Sword>();
        let cache = MemoryCache::new();

        let mut data = DynamicMapData::<String>::new();
        data.insert("item1".to_string(), Sword { damage: 7 });
        let tree = registry.schema_of(&data).expect("schema");
        let field = tree.field.as_ref().expect("single field");
        assert!(field.dynamic_map);
        assert!(save_changed_data_to_cache(&cache, "p.{1}.items", &mut data, field).expect("push"));
        assert_eq!(cache.hget_all("p.{1}.items").expect("hash").len(), 1);

        let mut loaded = DynamicMapData::<String>::new();
        assert!(load_from_cache(&registry, &cache, "p.{1}.items", &mut loaded).expect("load"));
        assert_eq!(loaded.get_as::<Sword>(&"item1".to_string()), Some(&Sword { damage: 7 }));
        assert!(loaded.dirty_mark().has_cached());
    }

    #[test]
    fn emptied_map_keeps_a_cache_entry() {
        let registry = SchemaRegistry::default();
        let cache = MemoryCache::new();
        let key = "p.{1}.names";
        let mut data = MapData::<i32, String>::new();
        data.set(5, "a".to_string());
        let tree = registry.schema_of(&data).expect("schema");
        let field = tree.field.as_ref().expect("single field");
        assert!(save_changed_data_to_cache(&cache, key, &mut data, field).expect("bootstrap"));
        assert!(data.dirty_mark().has_cached());

        data.delete(&5);
        assert!(save_changed_data_to_cache(&cache, key, &mut data, field).expect("delete"));
        assert_eq!(cache.get(key).expect("marker"), Some(EMPTY_MAP_MARKER.to_vec()));
        assert!(!data.dirty_mark().has_cached());

        let mut loaded = MapData::<i32, String>::new();
        loaded.set(9, "stale".to_string());
        assert!(load_from_cache(&registry, &cache, key, &mut loaded).expect("load"));
        assert!(loaded.is_empty());
        assert!(!loaded.dirty_mark().has_cached());

        data.set(6, "b".to_string());
        assert!(save_changed_data_to_cache(&cache, key, &mut data, field).expect("second bootstrap"));
        assert_eq!(cache.key_type(key).expect("type"), CacheType::Hash);
        assert!(data.dirty_mark().has_cached());
    }
}
