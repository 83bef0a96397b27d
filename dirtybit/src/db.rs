//! Document store holding one document per entity, one top-level field per component.

use crate::error::AppError;
use crate::value::{Document, MapKey, Value};
use redb::{Database, ReadableTable, TableDefinition, TableError};
use std::collections::BTreeMap;
use std::path::Path;

/// Document collection API consumed by the flusher and the recovery.
pub trait EntityDb {
    fn find_entity_by_id(&self, id: i64) -> Result<Option<Document>, AppError>;
    fn insert_entity(&self, id: i64, doc: &Document) -> Result<(), AppError>;
    /// Replaces the whole document, creating it when missing.
    fn save_entity(&self, id: i64, doc: &Document) -> Result<(), AppError>;
    fn delete_entity(&self, id: i64) -> Result<bool, AppError>;
    /// A `null` value unsets the component, as it does for the field and batch updates.
    fn save_component(&self, id: i64, component: &str, value: &Value) -> Result<(), AppError>;
    /// Sets every dotted path of `fields` in one update.
    fn save_components(&self, id: i64, fields: &Document) -> Result<(), AppError>;
    fn save_component_field(&self, id: i64, component: &str, field: &str, value: &Value) -> Result<(), AppError>;
    fn delete_component_field(&self, id: i64, component: &str, field: &str) -> Result<(), AppError>;
}

fn path_error(path: &str, found: &Value) -> AppError {
    AppError::DocumentPath(format!("cannot create field '{}' in element of kind {}", path, found.kind_name()))
}

/// `$set` of a dotted path, creating missing intermediate documents.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), AppError> {
    let mut parts = path.split('.');
    let first = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| AppError::DocumentPath(format!("empty path '{}'", path)))?;
    let rest: Vec<&str> = parts.collect();
    let Some((last, middle)) = rest.split_last() else {
        doc.insert(first.to_string(), value);
        return Ok(());
    };
    let mut current = doc.entry(first.to_string()).or_insert_with(|| Value::Map(BTreeMap::new()));
    for part in middle {
        current = match current {
            Value::Map(entries) => entries.entry(MapKey::from(*part)).or_insert_with(|| Value::Map(BTreeMap::new())),
            other => return Err(path_error(path, other)),
        };
    }
    match current {
        Value::Map(entries) => {
            entries.insert(MapKey::from(*last), value);
            Ok(())
        }
        other => Err(path_error(path, other)),
    }
}

/// `$unset` of a dotted path, missing paths are ignored.
pub fn unset_path(doc: &mut Document, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, init)) = parts.split_last() else { return };
    if init.is_empty() {
        doc.remove(*last);
        return;
    }
    let Some(mut current) = doc.get_mut(init[0]) else { return };
    for part in &init[1..] {
        current = match current {
            Value::Map(entries) => match entries.get_mut(&MapKey::from(*part)) {
                Some(next) => next,
                None => return,
            },
            _ => return,
        };
    }
    if let Value::Map(entries) = current {
        entries.remove(&MapKey::from(*last));
    }
}

/// `$set` of a dotted path, `null` unsets it instead.
pub fn apply_path(doc: &mut Document, path: &str, value: &Value) -> Result<(), AppError> {
    if value.is_null() {
        unset_path(doc, path);
        return Ok(());
    }
    set_path(doc, path, value.clone())
}

/// [`EntityDb`] over a `redb` table of bincode encoded documents keyed by entity id.
pub struct RedbEntityDb {
    db: Database,
    collection: String,
}

impl RedbEntityDb {
    pub fn open(path: impl AsRef<Path>, collection: &str) -> Result<Self, AppError> {
        Ok(RedbEntityDb { db: Database::create(path)?, collection: collection.to_string() })
    }

    pub fn in_memory(collection: &str) -> Result<Self, AppError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Ok(RedbEntityDb { db, collection: collection.to_string() })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn table(&self) -> TableDefinition<'_, i64, &'static [u8]> {
        TableDefinition::new(&self.collection)
    }

    fn read(&self, id: i64) -> Result<Option<Document>, AppError> {
        let read_tx = self.db.begin_read()?;
        let table = match read_tx.open_table(self.table()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(id)? {
            Some(guard) => Ok(Some(bincode::deserialize(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Runs `f` on the stored document inside one write transaction and stores the result.
    fn update(&self, id: i64, f: impl FnOnce(Option<Document>) -> Result<Document, AppError>) -> Result<(), AppError> {
        let write_tx = self.db.begin_write()?;
        {
            let mut table = write_tx.open_table(self.table())?;
            let current = match table.get(id)? {
                Some(guard) => Some(bincode::deserialize::<Document>(guard.value())?),
                None => None,
            };
            let updated = f(current)?;
            let bytes = bincode::serialize(&updated)?;
            table.insert(id, bytes.as_slice())?;
        }
        write_tx.commit()?;
        Ok(())
    }

    fn update_existing(&self, id: i64, f: impl FnOnce(&mut Document) -> Result<(), AppError>) -> Result<(), AppError> {
        self.update(id, |current| {
            let mut doc = current.ok_or(AppError::EntityNotFound(id))?;
            f(&mut doc)?;
            Ok(doc)
        })
    }
}

impl EntityDb for RedbEntityDb {
    fn find_entity_by_id(&self, id: i64) -> Result<Option<Document>, AppError> {
        self.read(id)
    }

    fn insert_entity(&self, id: i64, doc: &Document) -> Result<(), AppError> {
        self.update(id, |current| match current {
            Some(_) => Err(AppError::DuplicateKey(id)),
            None => Ok(doc.clone()),
        })
    }

    fn save_entity(&self, id: i64, doc: &Document) -> Result<(), AppError> {
        self.update(id, |_| Ok(doc.clone()))
    }

    fn delete_entity(&self, id: i64) -> Result<bool, AppError> {
        let write_tx = self.db.begin_write()?;
        let removed = {
            let mut table = write_tx.open_table(self.table())?;
            let existed = table.remove(id)?.is_some();
            existed
        };
        write_tx.commit()?;
        Ok(removed)
    }

    fn save_component(&self, id: i64, component: &str, value: &Value) -> Result<(), AppError> {
        self.update_existing(id, |doc| apply_path(doc, component, value))
    }

    fn save_components(&self, id: i64, fields: &Document) -> Result<(), AppError> {
        self.update_existing(id, |doc| {
            for (path, value) in fields {
                apply_path(doc, path, value)?;
            }
            Ok(())
        })
    }

    fn save_component_field(&self, id: i64, component: &str, field: &str, value: &Value) -> Result<(), AppError> {
        self.update_existing(id, |doc| apply_path(doc, &format!("{}.{}", component, field), value))
    }

    fn delete_component_field(&self, id: i64, component: &str, field: &str) -> Result<(), AppError> {
        self.update_existing(id, |doc| {
            unset_path(doc, &format!("{}.{}", component, field));
            Ok(())
        })
    }
}
