//! Structured messages: serde types persisted either as encoded bytes (bincode) or, for plain
//! fields, as a generic document.

use crate::convert::CacheValue;
use crate::error::AppError;
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Implemented by `#[derive(Message)]`.
pub trait Message: Serialize + DeserializeOwned + Default + 'static {
    fn message_name() -> &'static str;
}

pub fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>, AppError> {
    Ok(bincode::serialize(message)?)
}

pub fn decode<M: DeserializeOwned>(bytes: &[u8]) -> Result<M, AppError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn to_value<M: Serialize>(message: &M, plain: bool) -> Result<Value, AppError> {
    if plain {
        Ok(Value::from_json(serde_json::to_value(message)?))
    } else {
        Ok(Value::Bytes(encode(message)?))
    }
}

/// Bytes replace the message, a document overwrites only the fields it carries.
pub fn load_value<M: Serialize + DeserializeOwned>(message: &mut M, value: Value) -> Result<(), AppError> {
    match value {
        Value::Bytes(bytes) => {
            if !bytes.is_empty() {
                *message = decode(&bytes)?;
            }
            Ok(())
        }
        Value::Map(fields) => {
            let mut current = serde_json::to_value(&*message)?;
            match current.as_object_mut() {
                Some(object) => {
                    for (k, v) in fields {
                        object.insert(k.to_string(), v.to_json());
                    }
                }
                None => current = Value::Map(fields).to_json(),
            }
            *message = serde_json::from_value(current)?;
            Ok(())
        }
        Value::Null => Ok(()),
        other => Err(AppError::type_mismatch("message", other.kind_name())),
    }
}

pub fn to_cache<M: Serialize>(message: &M) -> Result<CacheValue, AppError> {
    Ok(CacheValue::Str(encode(message)?))
}

pub fn load_cache<M: DeserializeOwned>(message: &mut M, cached: CacheValue) -> Result<(), AppError> {
    match cached {
        CacheValue::Str(bytes) if bytes.is_empty() => Ok(()),
        CacheValue::Str(bytes) => {
            *message = decode(&bytes)?;
            Ok(())
        }
        CacheValue::Hash(_) => Err(AppError::type_mismatch("message", "hash")),
    }
}

#[cfg(test)]
mod message_tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Info {
        level: i32,
        exp: i64,
        name: String,
    }

    fn info() -> Info {
        Info { level: 3, exp: 50, name: "hero".to_string() }
    }

    #[test]
    fn encoded_form_is_bytes() {
        let value = to_value(&info(), false).expect("encode");
        assert!(matches!(value, Value::Bytes(_)));
        let mut loaded = Info::default();
        load_value(&mut loaded, value).expect("decode");
        assert_eq!(loaded, info());
    }

    #[test]
    fn plain_form_is_a_document() {
        let value = to_value(&info(), true).expect("plain");
        assert_eq!(value.get("Level"), Some(&Value::Int(3)));
        assert_eq!(value.get("Exp"), Some(&Value::Int(50)));
        assert_eq!(value.get("Name"), Some(&Value::Str("hero".into())));
    }

    #[test]
    fn partial_document_merges_into_existing() {
        let mut loaded = info();
        load_value(&mut loaded, Value::doc([("Exp", Value::Int(99))])).expect("merge");
        assert_eq!(loaded, Info { exp: 99, ..info() });
    }

    #[test]
    fn empty_bytes_leave_message_untouched() {
        let mut loaded = info();
        load_value(&mut loaded, Value::Bytes(vec![])).expect("empty");
        load_cache(&mut loaded, CacheValue::Str(vec![])).expect("empty cache");
        assert_eq!(loaded, info());
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let mut loaded = Info::default();
        assert!(load_value(&mut loaded, Value::Int(1)).is_err());
        assert!(load_value(&mut loaded, Value::Bytes(vec![1])).is_err(), "truncated bytes");
        assert!(load_cache(&mut loaded, CacheValue::Hash(vec![])).is_err());
    }
}
