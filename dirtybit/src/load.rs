//! Loading stored data back into live objects, from the document store or from the cache.

use crate::cache::{CacheType, KvCache, EMPTY_MAP_MARKER, NIL_MARKER};
use crate::convert::CacheValue;
use crate::dirty::MarkMut;
use crate::dynamic::BytesMap;
use crate::entity::{Component, Entity};
use crate::error::AppError;
use crate::schema::{resolve_child_mut, resolve_leaf_mut, Persistable, SchemaField, SchemaRegistry};
use crate::value::{Document, MapKey, Value};
use crate::{debug, error};

/// Hands raw map entries to a [`crate::BytesMapLoader`], on the object holding the map or else on `obj`.
fn load_dynamic(
    registry: &SchemaRegistry,
    obj: &mut dyn Persistable,
    field: &SchemaField,
    entries: Vec<(String, Vec<u8>)>,
) -> Result<(), AppError> {
    let entries = {
        let Some((leaf, leaf_field)) = resolve_leaf_mut(&mut *obj, field, true)? else {
            return Ok(());
        };
        let value = leaf
            .field(leaf_field.index)
            .ok_or_else(|| AppError::NotSaveable(format!("{} has no accessor", leaf_field.ident)))?;
        let mut bytes = BytesMap::new();
        for (k, v) in entries {
            bytes.insert(value.parse_map_key(&k)?, v);
        }
        match leaf.bytes_map_loader() {
            Some(loader) => return loader.load_from_bytes_map(registry, bytes),
            None => bytes,
        }
    };
    let type_name = obj.descriptor().type_name;
    match obj.bytes_map_loader() {
        Some(loader) => loader.load_from_bytes_map(registry, entries),
        None => Err(AppError::DynamicMap(format!("{}.{} has no bytes map loader", type_name, field.ident))),
    }
}

fn dynamic_entries(value: Value) -> Result<Vec<(String, Vec<u8>)>, AppError> {
    match value {
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| match v {
                Value::Bytes(bytes) => Ok((k.to_string(), bytes)),
                other => Err(AppError::type_mismatch("bytes", other.kind_name())),
            })
            .collect(),
        other => Err(AppError::type_mismatch("map", other.kind_name())),
    }
}

/// Loads a stored value into `field` of `obj`, creating nil links on the way.
pub fn load_field_data(registry: &SchemaRegistry, obj: &mut dyn Persistable, field: &SchemaField, value: Value) -> Result<(), AppError> {
    if value.is_null() {
        return Ok(());
    }
    if field.dynamic_map {
        return load_dynamic(registry, obj, field, dynamic_entries(value)?);
    }
    let Some((leaf, leaf_field)) = resolve_leaf_mut(obj, field, true)? else {
        return Ok(());
    };
    let type_name = leaf.descriptor().type_name;
    let target = leaf
        .field_mut(leaf_field.index)
        .ok_or_else(|| AppError::NotSaveable(format!("{}.{} has no accessor", type_name, leaf_field.ident)))?;
    let kind = target.kind();
    target.load_value(value).map_err(|e| {
        error!("load {} of {} as {:?}: {}", field.name, type_name, kind, e);
        e
    })
}

/// Loads a whole stored object: its single field, or each child present in the stored document.
pub fn load_obj_data(registry: &SchemaRegistry, obj: &mut dyn Persistable, value: Value) -> Result<(), AppError> {
    if value.is_null() {
        return Ok(());
    }
    let tree = registry.require_schema(obj)?;
    if let Some(field) = &tree.field {
        return load_field_data(registry, obj, field, value);
    }
    let mut entries = match value {
        Value::Map(entries) => entries,
        other => return Err(AppError::type_mismatch("document", other.kind_name())),
    };
    let mut first_err = None;
    for child in tree.children.iter() {
        let Some(child_value) = entries.remove(&MapKey::from(child.name.as_str())) else {
            debug!("{} not stored", child.name);
            continue;
        };
        if child_value.is_null() {
            continue;
        }
        let result = match resolve_child_mut(&mut *obj, child, true) {
            Ok(Some((child_obj, inner))) => load_field_data(registry, child_obj, inner, child_value),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("load child {} err: {}", child.name, e);
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

pub fn load_component_data(registry: &SchemaRegistry, component: &mut dyn Component, value: Value) -> Result<(), AppError> {
    load_obj_data(registry, component.as_persistable_mut(), value)
}

/// Loads every component found in `doc`, continuing past failures.
pub fn load_entity_data(registry: &SchemaRegistry, entity: &mut dyn Entity, doc: &Document) -> Result<(), AppError> {
    let id = entity.id();
    let mut first_err = None;
    for component in entity.components_mut() {
        if registry.schema_of(component.as_persistable()).is_none() {
            continue;
        }
        let name = component.name().to_string();
        let Some(value) = doc.get(&registry.component_name(&name)).or_else(|| doc.get(&name)) else {
            continue;
        };
        if let Err(e) = load_component_data(registry, component.as_mut(), value.clone()) {
            error!("load entity {} {} err: {}", id, name, e);
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// A cache entry read back with its markers decoded.
pub(crate) enum CachedEntry {
    /// The value or child was cleared to nil.
    Nil,
    Value(CacheValue),
}

/// Reads the entry at `key`, `None` when it is gone. An empty map marker reads as an empty hash.
pub(crate) fn read_cache_entry(cache: &dyn KvCache, key: &str, cache_type: &CacheType) -> Result<Option<CachedEntry>, AppError> {
    match cache_type {
        CacheType::None => Ok(None),
        CacheType::String => {
            let bytes = cache.get(key)?.unwrap_or_default();
            if bytes == NIL_MARKER {
                Ok(Some(CachedEntry::Nil))
            } else if bytes == EMPTY_MAP_MARKER {
                Ok(Some(CachedEntry::Value(CacheValue::Hash(Vec::new()))))
            } else {
                Ok(Some(CachedEntry::Value(CacheValue::Str(bytes))))
            }
        }
        CacheType::Hash => Ok(Some(CachedEntry::Value(CacheValue::Hash(cache.hget_all(key)?.into_iter().collect())))),
        CacheType::Other(name) => Err(AppError::UnsupportedType(format!("{} unsupported cache type {}", key, name))),
    }
}

/// Sets a child of `obj` back to nil.
pub(crate) fn clear_child(obj: &mut dyn Persistable, child: &SchemaField) -> Result<(), AppError> {
    let type_name = obj.descriptor().type_name;
    obj.field_mut(child.index)
        .ok_or_else(|| AppError::NotSaveable(format!("{}.{} has no accessor", type_name, child.ident)))?
        .load_value(Value::Null)
}

/// Loads a decoded cache entry into `field` of `obj`, a nil entry clears the field.
pub(crate) fn load_entry(
    registry: &SchemaRegistry,
    key: &str,
    entry: CachedEntry,
    obj: &mut dyn Persistable,
    field: &SchemaField,
) -> Result<(), AppError> {
    let cached = match entry {
        CachedEntry::Value(cached) => cached,
        CachedEntry::Nil => {
            if let Some((leaf, leaf_field)) = resolve_leaf_mut(&mut *obj, field, false)? {
                let type_name = leaf.descriptor().type_name;
                leaf.field_mut(leaf_field.index)
                    .ok_or_else(|| AppError::NotSaveable(format!("{}.{} has no accessor", type_name, leaf_field.ident)))?
                    .load_value(Value::Null)?;
            }
            debug!("load cache {} field {} as nil", key, field.name);
            return Ok(());
        }
    };
    let hash = matches!(&cached, CacheValue::Hash(fields) if !fields.is_empty());
    if field.dynamic_map {
        let CacheValue::Hash(entries) = cached else {
            return Err(AppError::type_mismatch("hash", "string"));
        };
        load_dynamic(registry, &mut *obj, field, entries)?;
    } else {
        let Some((leaf, leaf_field)) = resolve_leaf_mut(&mut *obj, field, true)? else {
            return Ok(());
        };
        let type_name = leaf.descriptor().type_name;
        let target = leaf
            .field_mut(leaf_field.index)
            .ok_or_else(|| AppError::NotSaveable(format!("{}.{} has no accessor", type_name, leaf_field.ident)))?;
        target.load_cache(cached).map_err(|e| {
            error!("load cache {} into {}.{}: {}", key, type_name, leaf_field.ident, e);
            e
        })?;
    }
    if let Some((leaf, _)) = resolve_leaf_mut(obj, field, false)? {
        if let Some(MarkMut::Map(m)) = leaf.mark_mut() {
            if hash {
                m.set_cached();
            } else {
                m.reset_cached();
            }
        }
    }
    debug!("load cache {} field {}", key, field.name);
    Ok(())
}

/// Loads the cache entry at `key` into `field` of `obj`, returns whether an entry existed.
pub fn load_field_from_cache(
    registry: &SchemaRegistry,
    cache: &dyn KvCache,
    key: &str,
    obj: &mut dyn Persistable,
    field: &SchemaField,
) -> Result<bool, AppError> {
    let cache_type = cache.key_type(key)?;
    let Some(entry) = read_cache_entry(cache, key, &cache_type)? else {
        return Ok(false);
    };
    load_entry(registry, key, entry, obj, field)?;
    Ok(true)
}

/// Loads `obj` from the cache, its single field from `key` or each child from `key.child`.
/// Returns whether any entry existed.
pub fn load_from_cache(registry: &SchemaRegistry, cache: &dyn KvCache, key: &str, obj: &mut dyn Persistable) -> Result<bool, AppError> {
    let tree = registry.require_schema(obj)?;
    if let Some(field) = &tree.field {
        return load_field_from_cache(registry, cache, key, obj, field);
    }
    let mut has_data = false;
    let mut first_err = None;
    for child in tree.children.iter() {
        let child_key = format!("{}.{}", key, child.name);
        let cache_type = match cache.key_type(&child_key) {
            Ok(t) if !t.exists() => continue,
            Ok(t) => t,
            Err(e) => {
                first_err.get_or_insert(e);
                continue;
            }
        };
        has_data = true;
        let result = match read_cache_entry(cache, &child_key, &cache_type) {
            Ok(None) => Ok(()),
            Ok(Some(CachedEntry::Nil)) => clear_child(&mut *obj, child),
            Ok(Some(entry)) => match resolve_child_mut(&mut *obj, child, true) {
                Ok(Some((child_obj, inner))) => load_entry(registry, &child_key, entry, child_obj, inner),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("load cache child {} err: {}", child_key, e);
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(has_data), Err)
}
