//! Conversions between typed field values and the generic [`Value`] representation used by the
//! document store, plus the string forms stored in the cache.

use crate::error::AppError;
use crate::schema::{Persistable, StructDescriptor};
use crate::value::{MapKey, Value};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Shape of a field type, recorded in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar(&'static str),
    Message,
    List,
    Array(usize),
    Map,
    DynamicMap,
    Struct,
    Unsupported(&'static str),
}

/// What a cache entry holds: a single string value or a hash of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Str(Vec<u8>),
    Hash(Vec<(String, Vec<u8>)>),
}

/// A typed value that can live in a persisted field.
pub trait FieldValue {
    fn value_kind() -> ValueKind where Self: Sized;

    /// Descriptor of the saveable object wrapped by this field, if any.
    fn nested_descriptor() -> Option<fn() -> StructDescriptor> where Self: Sized {
        None
    }

    fn is_dynamic_map() -> bool where Self: Sized {
        false
    }

    fn kind(&self) -> ValueKind;

    fn is_nil(&self) -> bool {
        false
    }

    fn init_nil(&mut self) {}

    /// True for a present map without entries.
    fn is_empty_map(&self) -> bool {
        false
    }

    fn nested(&self) -> Option<&dyn Persistable> {
        None
    }

    fn nested_mut(&mut self) -> Option<&mut dyn Persistable> {
        None
    }

    fn to_value(&self, plain: bool) -> Result<Value, AppError>;

    fn load_value(&mut self, value: Value) -> Result<(), AppError>;

    fn to_cache(&self) -> Result<CacheValue, AppError>;

    fn load_cache(&mut self, cached: CacheValue) -> Result<(), AppError>;

    /// Cache bytes of one map entry, `None` when the key is absent.
    fn map_entry_cache(&self, _key: &MapKey) -> Result<Option<Vec<u8>>, AppError> {
        Err(AppError::UnsupportedType(format!("{:?} is not a map", self.kind())))
    }

    /// Parses a cache hash field name into a typed map key.
    fn parse_map_key(&self, _field: &str) -> Result<MapKey, AppError> {
        Err(AppError::UnsupportedKeyType(format!("{:?} is not a map", self.kind())))
    }
}

/// Primitive values with a textual cache form.
pub trait ScalarText: Sized {
    fn to_text(&self) -> String;
    fn parse_text(text: &str) -> Result<Self, AppError>;
}

pub fn convert_string_to<T: ScalarText>(text: &str) -> Result<T, AppError> {
    T::parse_text(text)
}

pub fn convert_value_to_string<T: ScalarText>(value: &T) -> String {
    value.to_text()
}

fn utf8(bytes: Vec<u8>) -> Result<String, AppError> {
    String::from_utf8(bytes).map_err(|e| AppError::Conversion(e.to_string()))
}

fn expect_str(cached: CacheValue, expected: &str) -> Result<Vec<u8>, AppError> {
    match cached {
        CacheValue::Str(bytes) => Ok(bytes),
        CacheValue::Hash(_) => Err(AppError::type_mismatch(expected, "hash")),
    }
}

/// Cache bytes of a value stored inside a hash field.
pub fn hash_field_bytes(value: &dyn FieldValue) -> Result<Vec<u8>, AppError> {
    match value.to_cache()? {
        CacheValue::Str(bytes) => Ok(bytes),
        CacheValue::Hash(_) => Err(AppError::UnsupportedType(format!("{:?} cannot be a hash field", value.kind()))),
    }
}

macro_rules! scalar_text {
    ($($t:ty),*) => {
        $(
            impl ScalarText for $t {
                fn to_text(&self) -> String {
                    self.to_string()
                }
                fn parse_text(text: &str) -> Result<Self, AppError> {
                    text.parse::<$t>().map_err(|e| AppError::Conversion(format!("'{}' as {}: {}", text, stringify!($t), e)))
                }
            }
        )*
    };
}

scalar_text!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl ScalarText for bool {
    fn to_text(&self) -> String {
        self.to_string()
    }

    fn parse_text(text: &str) -> Result<Self, AppError> {
        match text {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(AppError::Conversion(format!("'{}' as bool", other))),
        }
    }
}

impl ScalarText for String {
    fn to_text(&self) -> String {
        self.clone()
    }

    fn parse_text(text: &str) -> Result<Self, AppError> {
        Ok(text.to_string())
    }
}

macro_rules! scalar_field {
    ($t:ty, $to:expr, $from:expr) => {
        impl FieldValue for $t {
            fn value_kind() -> ValueKind {
                ValueKind::Scalar(stringify!($t))
            }

            fn kind(&self) -> ValueKind {
                ValueKind::Scalar(stringify!($t))
            }

            fn to_value(&self, _plain: bool) -> Result<Value, AppError> {
                let to: fn(&$t) -> Value = $to;
                Ok(to(self))
            }

            fn load_value(&mut self, value: Value) -> Result<(), AppError> {
                let from: fn(Value) -> Result<$t, AppError> = $from;
                *self = from(value)?;
                Ok(())
            }

            fn to_cache(&self) -> Result<CacheValue, AppError> {
                Ok(CacheValue::Str(self.to_text().into_bytes()))
            }

            fn load_cache(&mut self, cached: CacheValue) -> Result<(), AppError> {
                let text = utf8(expect_str(cached, stringify!($t))?)?;
                *self = <$t>::parse_text(&text)?;
                Ok(())
            }
        }
    };
}

macro_rules! integer_fields {
    ($variant:ident, $wide:ty, $($t:ty),*) => {
        $(
            scalar_field!($t, |v| Value::$variant(*v as $wide), |value| match value {
                Value::Int(i) => <$t>::try_from(i).map_err(|_| AppError::type_mismatch(stringify!($t), format!("int {}", i))),
                Value::UInt(u) => <$t>::try_from(u).map_err(|_| AppError::type_mismatch(stringify!($t), format!("uint {}", u))),
                other => Err(AppError::type_mismatch(stringify!($t), other.kind_name())),
            });
        )*
    };
}

integer_fields!(Int, i64, i8, i16, i32, i64, isize);
integer_fields!(UInt, u64, u8, u16, u32, u64, usize);

macro_rules! float_fields {
    ($($t:ty),*) => {
        $(
            scalar_field!($t, |v| Value::Float(*v as f64), |value| match value {
                Value::Float(f) => Ok(f as $t),
                Value::Int(i) => Ok(i as $t),
                Value::UInt(u) => Ok(u as $t),
                other => Err(AppError::type_mismatch(stringify!($t), other.kind_name())),
            });
        )*
    };
}

float_fields!(f32, f64);

scalar_field!(bool, |v| Value::Bool(*v), |value| match value {
    Value::Bool(b) => Ok(b),
    other => Err(AppError::type_mismatch("bool", other.kind_name())),
});

scalar_field!(String, |v| Value::Str(v.clone()), |value| match value {
    Value::Str(s) => Ok(s),
    other => Err(AppError::type_mismatch("String", other.kind_name())),
});

/// Primitive types allowed as persisted map keys.
pub trait MapKeyType: Sized {
    fn to_map_key(&self) -> MapKey;
    fn from_map_key(key: MapKey) -> Result<Self, AppError>;

    fn from_field(field: &str) -> Result<Self, AppError>;
}

macro_rules! integer_keys {
    ($variant:ident, $wide:ty, $($t:ty),*) => {
        $(
            impl MapKeyType for $t {
                fn to_map_key(&self) -> MapKey {
                    MapKey::$variant(*self as $wide)
                }

                fn from_map_key(key: MapKey) -> Result<Self, AppError> {
                    match key {
                        MapKey::Int(i) => <$t>::try_from(i).map_err(|_| AppError::UnsupportedKeyType(format!("{} as {}", i, stringify!($t)))),
                        MapKey::UInt(u) => <$t>::try_from(u).map_err(|_| AppError::UnsupportedKeyType(format!("{} as {}", u, stringify!($t)))),
                        MapKey::Str(s) => Self::from_field(&s),
                        MapKey::Bool(b) => Err(AppError::UnsupportedKeyType(format!("bool {} as {}", b, stringify!($t)))),
                    }
                }

                fn from_field(field: &str) -> Result<Self, AppError> {
                    <$t>::parse_text(field)
                }
            }
        )*
    };
}

integer_keys!(Int, i64, i8, i16, i32, i64, isize);
integer_keys!(UInt, u64, u8, u16, u32, u64, usize);

impl MapKeyType for String {
    fn to_map_key(&self) -> MapKey {
        MapKey::Str(self.clone())
    }

    fn from_map_key(key: MapKey) -> Result<Self, AppError> {
        Ok(key.to_string())
    }

    fn from_field(field: &str) -> Result<Self, AppError> {
        Ok(field.to_string())
    }
}

impl MapKeyType for bool {
    fn to_map_key(&self) -> MapKey {
        MapKey::Bool(*self)
    }

    fn from_map_key(key: MapKey) -> Result<Self, AppError> {
        match key {
            MapKey::Bool(b) => Ok(b),
            MapKey::Str(s) => bool::parse_text(&s),
            other => Err(AppError::UnsupportedKeyType(format!("{} as bool", other))),
        }
    }

    fn from_field(field: &str) -> Result<Self, AppError> {
        bool::parse_text(field)
    }
}

fn list_to_value<'a, T, I>(items: I, plain: bool) -> Result<Value, AppError>
where
    T: FieldValue + 'a,
    I: Iterator<Item = &'a T>,
{
    Ok(Value::List(items.map(|item| item.to_value(plain)).collect::<Result<_, _>>()?))
}

fn list_to_cache(value: Value) -> Result<CacheValue, AppError> {
    Ok(CacheValue::Str(serde_json::to_vec(&value)?))
}

fn list_from_cache(cached: CacheValue, expected: &str) -> Result<Value, AppError> {
    let bytes = expect_str(cached, expected)?;
    Ok(serde_json::from_slice::<Value>(&bytes)?)
}

impl<T: FieldValue + Default> FieldValue for Vec<T> {
    fn value_kind() -> ValueKind {
        ValueKind::List
    }

    fn kind(&self) -> ValueKind {
        ValueKind::List
    }

    fn to_value(&self, plain: bool) -> Result<Value, AppError> {
        list_to_value(self.iter(), plain)
    }

    fn load_value(&mut self, value: Value) -> Result<(), AppError> {
        match value {
            Value::List(items) => {
                let mut loaded = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let mut elem = T::default();
                    elem.load_value(item).map_err(|e| AppError::SliceElemType(format!("element {}: {}", i, e)))?;
                    loaded.push(elem);
                }
                *self = loaded;
                Ok(())
            }
            Value::Null => {
                self.clear();
                Ok(())
            }
            other => Err(AppError::type_mismatch("list", other.kind_name())),
        }
    }

    fn to_cache(&self) -> Result<CacheValue, AppError> {
        list_to_cache(self.to_value(false)?)
    }

    fn load_cache(&mut self, cached: CacheValue) -> Result<(), AppError> {
        self.load_value(list_from_cache(cached, "list")?)
    }
}

impl<T: FieldValue + Default, const N: usize> FieldValue for [T; N] {
    fn value_kind() -> ValueKind {
        ValueKind::Array(N)
    }

    fn kind(&self) -> ValueKind {
        ValueKind::Array(N)
    }

    fn to_value(&self, plain: bool) -> Result<Value, AppError> {
        list_to_value(self.iter(), plain)
    }

    fn load_value(&mut self, value: Value) -> Result<(), AppError> {
        match value {
            Value::List(items) => {
                if items.len() != N {
                    return Err(AppError::ArrayLen { expected: N, found: items.len() });
                }
                let mut loaded = Vec::with_capacity(N);
                for (i, item) in items.into_iter().enumerate() {
                    let mut elem = T::default();
                    elem.load_value(item).map_err(|e| AppError::SliceElemType(format!("element {}: {}", i, e)))?;
                    loaded.push(elem);
                }
                let loaded: [T; N] = loaded.try_into().map_err(|_| AppError::ArrayLen { expected: N, found: N })?;
                *self = loaded;
                Ok(())
            }
            other => Err(AppError::type_mismatch("array", other.kind_name())),
        }
    }

    fn to_cache(&self) -> Result<CacheValue, AppError> {
        list_to_cache(self.to_value(false)?)
    }

    fn load_cache(&mut self, cached: CacheValue) -> Result<(), AppError> {
        self.load_value(list_from_cache(cached, "array")?)
    }
}

macro_rules! map_field {
    ($map:ident, $($key_bound:ident),*) => {
        impl<K, V> FieldValue for $map<K, V>
        where
            K: MapKeyType $(+ $key_bound)*,
            V: FieldValue + Default,
        {
            fn value_kind() -> ValueKind {
                ValueKind::Map
            }

            fn kind(&self) -> ValueKind {
                ValueKind::Map
            }

            fn is_empty_map(&self) -> bool {
                self.is_empty()
            }

            fn to_value(&self, plain: bool) -> Result<Value, AppError> {
                let mut entries = BTreeMap::new();
                for (k, v) in self.iter() {
                    entries.insert(k.to_map_key(), v.to_value(plain)?);
                }
                Ok(Value::Map(entries))
            }

            fn load_value(&mut self, value: Value) -> Result<(), AppError> {
                match value {
                    Value::Map(entries) => {
                        let mut loaded = $map::new();
                        for (k, v) in entries {
                            let mut elem = V::default();
                            elem.load_value(v)?;
                            loaded.insert(K::from_map_key(k)?, elem);
                        }
                        *self = loaded;
                        Ok(())
                    }
                    Value::Null => {
                        self.clear();
                        Ok(())
                    }
                    other => Err(AppError::type_mismatch("map", other.kind_name())),
                }
            }

            fn to_cache(&self) -> Result<CacheValue, AppError> {
                let mut fields = Vec::with_capacity(self.len());
                for (k, v) in self.iter() {
                    fields.push((k.to_map_key().to_string(), hash_field_bytes(v)?));
                }
                fields.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(CacheValue::Hash(fields))
            }

            fn load_cache(&mut self, cached: CacheValue) -> Result<(), AppError> {
                match cached {
                    CacheValue::Hash(fields) => {
                        let mut loaded = $map::new();
                        for (field, bytes) in fields {
                            let mut elem = V::default();
                            elem.load_cache(CacheValue::Str(bytes))?;
                            loaded.insert(K::from_field(&field)?, elem);
                        }
                        *self = loaded;
                        Ok(())
                    }
                    CacheValue::Str(_) => Err(AppError::type_mismatch("hash", "string")),
                }
            }

            fn map_entry_cache(&self, key: &MapKey) -> Result<Option<Vec<u8>>, AppError> {
                let typed = K::from_map_key(key.clone())?;
                self.get(&typed).map(|v| hash_field_bytes(v)).transpose()
            }

            fn parse_map_key(&self, field: &str) -> Result<MapKey, AppError> {
                Ok(K::from_field(field)?.to_map_key())
            }
        }
    };
}

map_field!(HashMap, Eq, Hash);
map_field!(BTreeMap, Ord);

impl<T: FieldValue + Default> FieldValue for Option<T> {
    fn value_kind() -> ValueKind {
        T::value_kind()
    }

    fn nested_descriptor() -> Option<fn() -> StructDescriptor> {
        T::nested_descriptor()
    }

    fn is_dynamic_map() -> bool {
        T::is_dynamic_map()
    }

    fn kind(&self) -> ValueKind {
        T::value_kind()
    }

    fn is_nil(&self) -> bool {
        self.is_none()
    }

    fn is_empty_map(&self) -> bool {
        self.as_ref().is_some_and(|v| v.is_empty_map())
    }

    fn init_nil(&mut self) {
        if self.is_none() {
            *self = Some(T::default());
        }
    }

    fn nested(&self) -> Option<&dyn Persistable> {
        self.as_ref().and_then(|v| v.nested())
    }

    fn nested_mut(&mut self) -> Option<&mut dyn Persistable> {
        self.as_mut().and_then(|v| v.nested_mut())
    }

    fn to_value(&self, plain: bool) -> Result<Value, AppError> {
        match self {
            Some(v) => v.to_value(plain),
            None => Ok(Value::Null),
        }
    }

    fn load_value(&mut self, value: Value) -> Result<(), AppError> {
        if value.is_null() {
            *self = None;
            return Ok(());
        }
        match self {
            Some(v) => v.load_value(value),
            None => {
                let mut loaded = T::default();
                loaded.load_value(value)?;
                *self = Some(loaded);
                Ok(())
            }
        }
    }

    fn to_cache(&self) -> Result<CacheValue, AppError> {
        match self {
            Some(v) => v.to_cache(),
            None => Err(AppError::NotSaveable("nil value has no cache form".to_string())),
        }
    }

    fn load_cache(&mut self, cached: CacheValue) -> Result<(), AppError> {
        match self {
            Some(v) => v.load_cache(cached),
            None => {
                let mut loaded = T::default();
                loaded.load_cache(cached)?;
                *self = Some(loaded);
                Ok(())
            }
        }
    }

    fn map_entry_cache(&self, key: &MapKey) -> Result<Option<Vec<u8>>, AppError> {
        match self {
            Some(v) => v.map_entry_cache(key),
            None => Ok(None),
        }
    }

    fn parse_map_key(&self, field: &str) -> Result<MapKey, AppError> {
        match self {
            Some(v) => v.parse_map_key(field),
            None => T::default().parse_map_key(field),
        }
    }
}

impl<T: FieldValue> FieldValue for Box<T> {
    fn value_kind() -> ValueKind {
        T::value_kind()
    }

    fn nested_descriptor() -> Option<fn() -> StructDescriptor> {
        T::nested_descriptor()
    }

    fn is_dynamic_map() -> bool {
        T::is_dynamic_map()
    }

    fn kind(&self) -> ValueKind {
        (**self).kind()
    }

    fn is_nil(&self) -> bool {
        (**self).is_nil()
    }

    fn is_empty_map(&self) -> bool {
        (**self).is_empty_map()
    }

    fn init_nil(&mut self) {
        (**self).init_nil()
    }

    fn nested(&self) -> Option<&dyn Persistable> {
        (**self).nested()
    }

    fn nested_mut(&mut self) -> Option<&mut dyn Persistable> {
        (**self).nested_mut()
    }

    fn to_value(&self, plain: bool) -> Result<Value, AppError> {
        (**self).to_value(plain)
    }

    fn load_value(&mut self, value: Value) -> Result<(), AppError> {
        (**self).load_value(value)
    }

    fn to_cache(&self) -> Result<CacheValue, AppError> {
        (**self).to_cache()
    }

    fn load_cache(&mut self, cached: CacheValue) -> Result<(), AppError> {
        (**self).load_cache(cached)
    }

    fn map_entry_cache(&self, key: &MapKey) -> Result<Option<Vec<u8>>, AppError> {
        (**self).map_entry_cache(key)
    }

    fn parse_map_key(&self, field: &str) -> Result<MapKey, AppError> {
        (**self).parse_map_key(field)
    }
}
