//! Replays cache entries left behind by an unclean shutdown into the document store.

use crate::cache::{entity_component_cache_key, entity_component_child_cache_key, KvCache};
use crate::db::EntityDb;
use crate::entity::{Component, Entity};
use crate::error::AppError;
use crate::load::{clear_child, load_entry, read_cache_entry, CachedEntry};
use crate::save::get_save_data;
use crate::schema::{resolve_child_mut, resolve_leaf_mut, Persistable, SchemaField, SchemaRegistry};
use crate::value::Value;
use crate::{debug, error, info};

fn reset_marks(obj: &mut dyn Persistable, field: &SchemaField) -> Result<(), AppError> {
    if let Some((leaf, _)) = resolve_leaf_mut(obj, field, false)? {
        if let Some(mut mark) = leaf.mark_mut() {
            mark.reset_changed();
            mark.reset_dirty();
            mark.reset_cached();
        }
    }
    Ok(())
}

/// Where a recovered value goes in the entity document.
enum Target<'a> {
    Component(&'a str),
    Child(&'a str, &'a str),
}

/// Loads the entry into the live object, writes the recomputed value to the store and only then
/// deletes the entry.
#[allow(clippy::too_many_arguments)]
fn fix_field(
    registry: &SchemaRegistry,
    db: &dyn EntityDb,
    cache: &dyn KvCache,
    key: i64,
    cache_key: &str,
    entry: CachedEntry,
    obj: &mut dyn Persistable,
    field: &SchemaField,
    target: Target<'_>,
) -> Result<(), AppError> {
    load_entry(registry, cache_key, entry, &mut *obj, field)?;
    let value = get_save_data(&*obj, field)?.unwrap_or(Value::Null);
    match target {
        Target::Component(component) => {
            db.save_component(key, component, &value)?;
            info!("{} -> {}", cache_key, component);
        }
        Target::Child(component, child) => {
            db.save_component_field(key, component, child, &value)?;
            info!("{} -> {}.{}", cache_key, component, child);
        }
    }
    cache.del(&[cache_key.to_string()])?;
    info!("remove cache after fix {}", cache_key);
    reset_marks(obj, field)
}

#[allow(clippy::too_many_arguments)]
fn fix_component(
    registry: &SchemaRegistry,
    db: &dyn EntityDb,
    cache: &dyn KvCache,
    key: i64,
    cache_key: &str,
    component: &mut dyn Component,
    field: &SchemaField,
    db_name: &str,
) -> Result<bool, AppError> {
    let cache_type = cache.key_type(cache_key)?;
    let Some(entry) = read_cache_entry(cache, cache_key, &cache_type)? else {
        return Ok(false);
    };
    fix_field(registry, db, cache, key, cache_key, entry, component.as_persistable_mut(), field, Target::Component(db_name))?;
    Ok(true)
}

/// A nil entry clears the child and unsets its path, any other entry is replayed as a value.
#[allow(clippy::too_many_arguments)]
fn fix_child(
    registry: &SchemaRegistry,
    db: &dyn EntityDb,
    cache: &dyn KvCache,
    key: i64,
    cache_key: &str,
    component: &mut dyn Component,
    child: &SchemaField,
    db_name: &str,
) -> Result<bool, AppError> {
    let cache_type = cache.key_type(cache_key)?;
    let Some(entry) = read_cache_entry(cache, cache_key, &cache_type)? else {
        return Ok(false);
    };
    match entry {
        CachedEntry::Nil => {
            clear_child(component.as_persistable_mut(), child)?;
            db.save_component_field(key, db_name, &child.name, &Value::Null)?;
            info!("{} -> unset {}.{}", cache_key, db_name, child.name);
            cache.del(&[cache_key.to_string()])?;
            info!("remove cache after fix {}", cache_key);
            component.base_mut().forget_child(&child.name);
        }
        entry => {
            let Some((child_obj, inner)) = resolve_child_mut(component.as_persistable_mut(), child, true)? else {
                return Ok(false);
            };
            let target = Target::Child(db_name, &child.name);
            fix_field(registry, db, cache, key, cache_key, entry, child_obj, inner, target)?;
            component.base_mut().mark_child_stored(&child.name);
        }
    }
    Ok(true)
}

fn tally(cache_key: &str, result: Result<bool, AppError>, fixed: &mut usize, first_err: &mut Option<AppError>) {
    match result {
        Ok(true) => *fixed += 1,
        Ok(false) => debug!("{} no cache", cache_key),
        Err(e) => {
            error!("fix {} err: {}", cache_key, e);
            first_err.get_or_insert(e);
        }
    }
}

/// Reconciles every cache entry of `entity` into the document stored under `key`.
///
/// Each component or child is handled on its own: a failure is logged and the remaining ones are
/// still processed. Returns the number of recovered entries, or the first error.
pub fn fix_entity_data_from_cache(
    registry: &SchemaRegistry,
    entity: &mut dyn Entity,
    db: &dyn EntityDb,
    cache: &dyn KvCache,
    prefix: &str,
    key: i64,
) -> Result<usize, AppError> {
    let mut fixed = 0;
    let mut first_err = None;
    for component in entity.components_mut() {
        let Some(tree) = registry.schema_of(component.as_persistable()) else {
            continue;
        };
        let name = component.name().to_string();
        let db_name = registry.component_name(&name);

        if let Some(field) = &tree.field {
            let cache_key = entity_component_cache_key(prefix, key, &name);
            let result = fix_component(registry, db, cache, key, &cache_key, component.as_mut(), field, &db_name);
            tally(&cache_key, result, &mut fixed, &mut first_err);
            continue;
        }

        for child in tree.children.iter() {
            let cache_key = entity_component_child_cache_key(prefix, key, &name, &child.name);
            let result = fix_child(registry, db, cache, key, &cache_key, component.as_mut(), child, &db_name);
            tally(&cache_key, result, &mut fixed, &mut first_err);
        }
    }
    first_err.map_or(Ok(fixed), Err)
}
