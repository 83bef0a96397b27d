use crate::cache::{KvCache, MemoryCache, RedisCache};
use crate::db::RedbEntityDb;
use crate::error::AppError;
use crate::logger::{self, Level};
use crate::schema::{NamingPolicy, SchemaRegistry};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::str::FromStr;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_key_prefix() -> String {
    "p".to_string()
}

fn default_collection() -> String {
    "entity".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub db: DbSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    pub redis_url: Option<String>,
    #[serde(default = "default_true")]
    pub remove_after_flush: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbSettings {
    pub path: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub lower_case_names: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings { key_prefix: default_key_prefix(), redis_url: None, remove_after_flush: true }
    }
}

impl Default for DbSettings {
    fn default() -> Self {
        DbSettings { path: None, collection: default_collection(), lower_case_names: false }
    }
}

impl Default for PersistSettings {
    fn default() -> Self {
        PersistSettings { log_level: default_log_level(), cache: CacheSettings::default(), db: DbSettings::default() }
    }
}

/// `DIRTYBIT__SECTION__KEY` overrides, applied on top of any file source.
fn env_source() -> Environment {
    Environment::with_prefix("DIRTYBIT").try_parsing(true).separator("__")
}

impl PersistSettings {
    pub fn new(path: &str) -> Result<Self, AppError> {
        let builder =
            Config::builder()
                .add_source(File::with_name(path).required(true))
                .add_source(env_source());
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        let builder =
            Config::builder()
                .add_source(File::from_str(content, FileFormat::Toml))
                .add_source(env_source());
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn naming_policy(&self) -> NamingPolicy {
        if self.db.lower_case_names {
            NamingPolicy::LowerCase
        } else {
            NamingPolicy::Verbatim
        }
    }

    pub fn level(&self) -> Result<Level, AppError> {
        Level::from_str(&self.log_level).map_err(AppError::Custom)
    }

    pub fn init_logger(&self) -> Result<(), AppError> {
        logger::set_max_level(self.level()?);
        Ok(())
    }

    pub fn registry(&self) -> SchemaRegistry {
        SchemaRegistry::new(self.naming_policy())
    }

    /// Redis when a url is configured, the in-process cache otherwise.
    pub fn open_cache(&self) -> Result<Box<dyn KvCache>, AppError> {
        match &self.cache.redis_url {
            Some(url) => Ok(Box::new(RedisCache::open(url)?)),
            None => Ok(Box::new(MemoryCache::new())),
        }
    }

    pub fn open_db(&self) -> Result<RedbEntityDb, AppError> {
        match &self.db.path {
            Some(path) => RedbEntityDb::open(path, &self.db.collection),
            None => RedbEntityDb::in_memory(&self.db.collection),
        }
    }
}
