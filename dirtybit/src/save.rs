//! Cache writer and database flusher.

use crate::cache::{entity_component_cache_key, entity_component_child_cache_key, KvCache, EMPTY_MAP_MARKER, NIL_MARKER};
use crate::convert::{CacheValue, FieldValue};
use crate::db::EntityDb;
use crate::dirty::{MarkMut, MarkRef};
use crate::entity::{Component, Entity};
use crate::error::AppError;
use crate::schema::{resolve_child, resolve_child_mut, resolve_leaf, resolve_leaf_mut, Persistable, SchemaField, SchemaRegistry};
use crate::value::{Document, MapKey, Value};
use crate::{debug, error};
use std::collections::BTreeMap;

fn leaf_value<'a>(leaf: &'a dyn Persistable, field: &SchemaField) -> Result<&'a dyn FieldValue, AppError> {
    leaf.field(field.index)
        .ok_or_else(|| AppError::NotSaveable(format!("{}.{} has no accessor", leaf.descriptor().type_name, field.ident)))
}

/// Database value of `field` of `obj`, `None` when a link of the field chain is nil.
pub fn get_save_data(obj: &dyn Persistable, field: &SchemaField) -> Result<Option<Value>, AppError> {
    let Some((leaf, leaf_field)) = resolve_leaf(obj, field)? else {
        return Ok(None);
    };
    let value = leaf_value(leaf, leaf_field)?;
    value.to_value(leaf_field.plain).map(Some).map_err(|e| {
        error!("save {} of {} as {:?}: {}", field.name, leaf.descriptor().type_name, value.kind(), e);
        e
    })
}

/// Database value of a whole component: its single field, or a document of its non-nil children.
pub fn get_component_save_data(registry: &SchemaRegistry, component: &dyn Component) -> Result<Option<Value>, AppError> {
    let obj = component.as_persistable();
    let tree = registry.require_schema(obj)?;
    if let Some(field) = &tree.field {
        return get_save_data(obj, field);
    }
    let mut children = BTreeMap::new();
    for child in tree.children.iter() {
        if let Some((child_obj, inner)) = resolve_child(obj, child)? {
            if let Some(value) = get_save_data(child_obj, inner)? {
                children.insert(MapKey::Str(child.name.clone()), value);
            }
        }
    }
    Ok(Some(Value::Map(children)))
}

/// Full document of an entity, used when it is inserted for the first time.
pub fn get_entity_save_data(registry: &SchemaRegistry, entity: &dyn Entity) -> Result<Document, AppError> {
    let mut doc = Document::new();
    for component in entity.components() {
        if registry.schema_of(component.as_persistable()).is_none() {
            continue;
        }
        if let Some(value) = get_component_save_data(registry, component.as_ref())? {
            doc.insert(registry.component_name(component.name()), value);
        }
    }
    Ok(doc)
}

/// Writes the whole value, returns whether `key` now holds a hash.
fn push_whole(cache: &dyn KvCache, key: &str, value: &dyn FieldValue) -> Result<bool, AppError> {
    if value.is_nil() {
        cache.del(&[key.to_string()])?;
        return Ok(false);
    }
    match value.to_cache()? {
        CacheValue::Str(bytes) => {
            cache.set(key, &bytes, None)?;
            Ok(false)
        }
        CacheValue::Hash(fields) if fields.is_empty() => {
            cache.set(key, EMPTY_MAP_MARKER, None)?;
            Ok(false)
        }
        CacheValue::Hash(fields) => {
            cache.replace_hash(key, &fields)?;
            Ok(true)
        }
    }
}

/// Replays the dirty map entries, returns whether `key` still holds a hash.
fn push_map(cache: &dyn KvCache, key: &str, value: &dyn FieldValue, entries: &[(MapKey, bool)]) -> Result<bool, AppError> {
    if value.is_nil() || value.is_empty_map() {
        return push_whole(cache, key, value);
    }
    let mut set = Vec::new();
    let mut del = Vec::new();
    for (k, add_or_update) in entries {
        if !*add_or_update {
            del.push(k.to_string());
            continue;
        }
        match value.map_entry_cache(k)? {
            Some(bytes) => set.push((k.to_string(), bytes)),
            None => debug!("{} dirty key {} no longer in the map", key, k),
        }
    }
    cache.hset(key, &set)?;
    cache.hdel(key, &del)?;
    Ok(true)
}

/// Pushes the dirty data of `field` to `key`, returns whether anything was written.
///
/// A whole-value marker overwrites the entry. A map marker replaces the whole hash once and
/// replays the pending per-key operations afterwards. An emptied map is kept as
/// [`EMPTY_MAP_MARKER`] so the delete survives in the cache, a nil value deletes the entry.
pub fn save_changed_data_to_cache(cache: &dyn KvCache, key: &str, obj: &mut dyn Persistable, field: &SchemaField) -> Result<bool, AppError> {
    let Some((leaf, leaf_field)) = resolve_leaf_mut(obj, field, false)? else {
        return Ok(false);
    };
    let hash_cached = {
        let leaf_ref: &dyn Persistable = &*leaf;
        let value = leaf_value(leaf_ref, leaf_field)?;
        let mark = leaf_ref
            .mark()
            .ok_or_else(|| AppError::NotSaveable(format!("{} has no dirty mark", leaf_ref.descriptor().type_name)))?;
        match mark {
            MarkRef::Whole(m) if m.is_dirty() => {
                push_whole(cache, key, value)?;
                None
            }
            MarkRef::Map(m) if m.is_dirty() => {
                let cached = if m.has_cached() {
                    push_map(cache, key, value, &m.dirty_entries())?
                } else {
                    push_whole(cache, key, value)?
                };
                Some(cached)
            }
            _ => return Ok(false),
        }
    };
    if let Some(mut mark) = leaf.mark_mut() {
        mark.reset_dirty();
        if let (MarkMut::Map(m), Some(cached)) = (&mut mark, hash_cached) {
            if cached {
                m.set_cached();
            } else {
                m.reset_cached();
            }
        }
    }
    debug!("save cache {}", key);
    Ok(true)
}

/// Marks every non-nil child of `component` as possibly held by the store.
pub(crate) fn track_stored_children(registry: &SchemaRegistry, component: &mut dyn Component) -> Result<(), AppError> {
    let Some(tree) = registry.schema_of(component.as_persistable()) else {
        return Ok(());
    };
    let mut present = Vec::new();
    for child in tree.children.iter() {
        if resolve_child(component.as_persistable(), child)?.is_some() {
            present.push(child.name.clone());
        }
    }
    for name in present {
        component.base_mut().mark_child_stored(&name);
    }
    Ok(())
}

/// Pushes a component to the cache under `entity_key`, one key for a single field, one key per
/// child otherwise.
///
/// A child cleared to nil after it was stored is written as [`NIL_MARKER`] until a flush carries
/// the removal to the store.
pub fn save_component_changed_data_to_cache(
    registry: &SchemaRegistry,
    cache: &dyn KvCache,
    prefix: &str,
    entity_key: i64,
    component: &mut dyn Component,
) -> Result<(), AppError> {
    let Some(tree) = registry.schema_of(component.as_persistable()) else {
        return Ok(());
    };
    let name = component.name().to_string();
    if let Some(field) = &tree.field {
        let key = entity_component_cache_key(prefix, entity_key, &name);
        return save_changed_data_to_cache(cache, &key, component.as_persistable_mut(), field).map(|_| ()).map_err(|e| {
            error!("{} cache err: {}", key, e);
            e
        });
    }
    let mut first_err = None;
    for child in tree.children.iter() {
        let key = entity_component_child_cache_key(prefix, entity_key, &name, &child.name);
        let present = match resolve_child_mut(component.as_persistable_mut(), child, false) {
            Ok(Some((child_obj, inner))) => save_changed_data_to_cache(cache, &key, child_obj, inner).map(|_| true),
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };
        let result = match present {
            Ok(true) => {
                component.base_mut().mark_child_stored(&child.name);
                Ok(())
            }
            Ok(false) if component.base().child_stored(&child.name) => cache.set(&key, NIL_MARKER, None),
            Ok(false) => cache.del(&[key.clone()]).map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("{} cache err: {}", key, e);
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// One component or child taken into a flush batch.
struct Flushed {
    component: usize,
    child: Option<usize>,
    cache_key: String,
    cleared: bool,
}

/// Flushes changed components of `entity` under its own id, see [`save_entity_changed_data_to_db_by_key`].
pub fn save_entity_changed_data_to_db(
    registry: &SchemaRegistry,
    db: &dyn EntityDb,
    entity: &mut dyn Entity,
    cache: &dyn KvCache,
    prefix: &str,
    remove_cache_after_flush: bool,
) -> Result<usize, AppError> {
    let key = entity.id();
    save_entity_changed_data_to_db_by_key(registry, db, entity, key, cache, prefix, remove_cache_after_flush)
}

/// Writes every changed component and child of `entity` in one batched update against `key`.
///
/// A child cleared to nil after it was stored is written as `null`, which unsets its path.
/// Markers are reset and cache entries removed only after the update succeeded, a failed update
/// leaves both untouched. Returns the number of flushed entries.
pub fn save_entity_changed_data_to_db_by_key(
    registry: &SchemaRegistry,
    db: &dyn EntityDb,
    entity: &mut dyn Entity,
    key: i64,
    cache: &dyn KvCache,
    prefix: &str,
    remove_cache_after_flush: bool,
) -> Result<usize, AppError> {
    let mut batch = Document::new();
    let mut flushed: Vec<Flushed> = Vec::new();
    let mut first_err: Option<AppError> = None;

    for (ci, component) in entity.components().iter().enumerate() {
        let obj = component.as_persistable();
        let Some(tree) = registry.schema_of(obj) else {
            continue;
        };
        let name = component.name();
        let db_name = registry.component_name(name);
        if let Some(field) = &tree.field {
            match changed_save_data(obj, field) {
                Ok(Some(value)) => {
                    batch.insert(db_name, value);
                    flushed.push(Flushed {
                        component: ci,
                        child: None,
                        cache_key: entity_component_cache_key(prefix, key, name),
                        cleared: false,
                    });
                }
                Ok(None) => debug!("{} ignore {}", key, name),
                Err(e) => {
                    error!("{} save {} err: {}", key, name, e);
                    first_err.get_or_insert(e);
                }
            }
            continue;
        }
        for (idx, child) in tree.children.iter().enumerate() {
            let path = format!("{}.{}", db_name, child.name);
            let data = match resolve_child(obj, child) {
                Ok(Some((child_obj, inner))) => changed_save_data(child_obj, inner).map(|v| v.map(|v| (v, false))),
                Ok(None) if component.base().child_stored(&child.name) => Ok(Some((Value::Null, true))),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
            match data {
                Ok(Some((value, cleared))) => {
                    batch.insert(path, value);
                    flushed.push(Flushed {
                        component: ci,
                        child: Some(idx),
                        cache_key: entity_component_child_cache_key(prefix, key, name, &child.name),
                        cleared,
                    });
                }
                Ok(None) => debug!("{} ignore {}", key, path),
                Err(e) => {
                    error!("{} save {} err: {}", key, path, e);
                    first_err.get_or_insert(e);
                }
            }
        }
    }

    if batch.is_empty() {
        debug!("ignore unchanged data {}", key);
        return first_err.map_or(Ok(0), Err);
    }
    if let Err(e) = db.save_components(key, &batch) {
        error!("save db {} err: {}", key, e);
        return Err(e);
    }
    debug!("save db {} {:?}", key, batch.keys().collect::<Vec<_>>());

    let components = entity.components_mut();
    let mut del_keys = Vec::new();
    for f in flushed.iter() {
        let Some(component) = components.get_mut(f.component) else { continue };
        let Some(tree) = registry.schema_of(component.as_persistable()) else { continue };
        let child = f.child.and_then(|idx| tree.children.get(idx));
        match child {
            Some(child) if f.cleared => component.base_mut().forget_child(&child.name),
            Some(child) => component.base_mut().mark_child_stored(&child.name),
            None => {}
        }
        let obj = component.as_persistable_mut();
        let leaf = match (child, &tree.field) {
            (Some(_), _) if f.cleared => Ok(None),
            (Some(child), _) => match resolve_child_mut(obj, child, false) {
                Ok(Some((child_obj, inner))) => resolve_leaf_mut(child_obj, inner, false),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            },
            (None, Some(field)) => resolve_leaf_mut(obj, field, false),
            (None, None) => Ok(None),
        };
        if let Ok(Some((leaf, _))) = leaf {
            if let Some(mut mark) = leaf.mark_mut() {
                mark.reset_changed();
                if remove_cache_after_flush {
                    mark.reset_cached();
                }
            }
        }
        if remove_cache_after_flush {
            del_keys.push(f.cache_key.clone());
        }
    }
    if !del_keys.is_empty() {
        match cache.del(&del_keys) {
            Ok(_) => debug!("remove cache {} {:?}", key, del_keys),
            Err(e) => {
                error!("remove cache {} {:?} err: {}", key, del_keys, e);
                first_err.get_or_insert(e);
            }
        }
    }
    first_err.map_or(Ok(flushed.len()), Err)
}

/// Database value of `field` when its marker reports a change, `None` otherwise.
fn changed_save_data(obj: &dyn Persistable, field: &SchemaField) -> Result<Option<Value>, AppError> {
    let Some((leaf, _)) = resolve_leaf(obj, field)? else {
        return Ok(None);
    };
    match leaf.mark() {
        Some(mark) if mark.is_changed() => get_save_data(obj, field),
        Some(_) => Ok(None),
        None => Err(AppError::NotSaveable(format!("{} has no dirty mark", leaf.descriptor().type_name))),
    }
}
