//! dirtybit reads struct annotations and derives the code necessary for persisting game entity components
//! through a write-back cache into a document store.
//!
//! Components track their own changes with dirty marks: cache pushes write only what is dirty (whole values or single
//! map entries), database flushes write every changed component of an entity in one batched update, and a recovery pass
//! replays cache entries left over by an unclean shutdown. The document store is backed by `redb` with `bincode`
//! encoded documents, the cache is Redis or an in-process equivalent.
//!

extern crate self as dirtybit;

pub mod cache;
pub mod convert;
pub mod db;
pub mod dirty;
pub mod dynamic;
pub mod entity;
pub mod error;
pub mod load;
pub mod logger;
pub mod message;
pub mod recovery;
pub mod save;
pub mod schema;
pub mod settings;
pub mod value;
pub mod wrapper;

pub use bincode;
pub use chrono;
pub use redb;
pub use serde;
pub use serde::Deserialize;
pub use serde::Serialize;
pub use serde_json;

pub use cache::{entity_cache_key, entity_component_cache_key, entity_component_child_cache_key};
pub use cache::{CacheType, KvCache, MemoryCache, RedisCache, EMPTY_MAP_MARKER, NIL_MARKER};
pub use convert::{convert_string_to, convert_value_to_string, CacheValue, FieldValue, MapKeyType, ValueKind};
pub use db::{EntityDb, RedbEntityDb};
pub use dirty::{AsMark, BaseDirtyMark, BaseMapDirtyMark, DirtyMark, MapDirtyMark, MarkMut, MarkRef, Saveable};
pub use dynamic::{BytesMap, BytesMapLoader, DynamicMap, DynamicRegistry, DynamicValue};
pub use entity::{BaseComponent, BaseEntity, Component, Entity};
pub use error::AppError;
pub use load::{load_component_data, load_entity_data, load_field_data, load_field_from_cache, load_from_cache, load_obj_data};
pub use macros::{Message, Saveable};
pub use message::Message;
pub use recovery::fix_entity_data_from_cache;
pub use save::{get_component_save_data, get_entity_save_data, get_save_data};
pub use save::{save_changed_data_to_cache, save_component_changed_data_to_cache};
pub use save::{save_entity_changed_data_to_db, save_entity_changed_data_to_db_by_key};
pub use schema::{Describe, FieldDescriptor, FieldTag, NamingPolicy, Persistable, SchemaField, SchemaRegistry, SchemaTree, StructDescriptor};
pub use settings::PersistSettings;
pub use value::{Document, MapKey, Value};
pub use wrapper::{DynamicMapData, MapData, MessageData, SliceData};
