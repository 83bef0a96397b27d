use crate::convert::{FieldValue, ValueKind};
use crate::dirty::{MarkMut, MarkRef};
use crate::dynamic::{BytesMapLoader, DynamicRegistry};
use crate::error::AppError;
use crate::message::Message;
use crate::{debug, error, info};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTag {
    Db,
    Child,
}

/// One annotated field as written in the source, produced by `#[derive(Saveable)]`.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub ident: &'static str,
    pub index: usize,
    pub tag: FieldTag,
    pub rename: Option<&'static str>,
    pub plain: bool,
    pub public: bool,
    pub kind: ValueKind,
    pub dynamic_map: bool,
    pub nested: Option<fn() -> StructDescriptor>,
}

#[derive(Debug, Clone)]
pub struct StructDescriptor {
    pub type_name: &'static str,
    pub component: bool,
    pub fields: Vec<FieldDescriptor>,
}

pub trait Describe {
    fn describe() -> StructDescriptor;
}

/// An object whose annotated fields can be persisted, implemented by `#[derive(Saveable)]`.
pub trait Persistable: Any {
    fn descriptor(&self) -> StructDescriptor;
    fn schema_type_id(&self) -> TypeId;
    fn field(&self, index: usize) -> Option<&dyn FieldValue>;
    fn field_mut(&mut self, index: usize) -> Option<&mut dyn FieldValue>;
    fn mark(&self) -> Option<MarkRef<'_>>;
    fn mark_mut(&mut self) -> Option<MarkMut<'_>>;
    fn bytes_map_loader(&mut self) -> Option<&mut dyn BytesMapLoader> {
        None
    }
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingPolicy {
    #[default]
    Verbatim,
    LowerCase,
}

impl NamingPolicy {
    pub fn apply(&self, name: &str) -> String {
        match self {
            NamingPolicy::Verbatim => name.to_string(),
            NamingPolicy::LowerCase => name.to_lowercase(),
        }
    }
}

/// A persisted field after discovery.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub ident: &'static str,
    pub index: usize,
    pub name: String,
    pub plain: bool,
    pub depth: usize,
    pub kind: ValueKind,
    pub dynamic_map: bool,
    /// Single field of a component, stored under the component name.
    pub component_named: bool,
    /// Schema of the saveable object held by this field.
    pub nested: Option<Box<SchemaTree>>,
}

/// Either one single field or a list of children, never both.
#[derive(Debug, Clone)]
pub struct SchemaTree {
    pub type_name: &'static str,
    pub field: Option<SchemaField>,
    pub children: Vec<SchemaField>,
}

impl SchemaTree {
    pub fn is_single(&self) -> bool {
        self.field.is_some()
    }

    pub fn child(&self, name: &str) -> Option<&SchemaField> {
        self.children.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) {:?} plain:{} depth:{}", self.name, self.ident, self.kind, self.plain, self.depth)?;
        if self.dynamic_map {
            write!(f, " dynamic")?;
        }
        if let Some(nested) = &self.nested {
            write!(f, " -> {}", nested)?;
        }
        Ok(())
    }
}

impl fmt::Display for SchemaTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} {{ {} }}", self.type_name, field),
            None => {
                write!(f, "{} [", self.type_name)?;
                for (i, child) in self.children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Per-type schema cache plus the dynamic value constructors, built once at startup and passed
/// to every persistence call.
pub struct SchemaRegistry {
    naming: NamingPolicy,
    dynamic: DynamicRegistry,
    structs: RwLock<HashMap<TypeId, Option<Arc<SchemaTree>>>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        SchemaRegistry::new(NamingPolicy::Verbatim)
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("naming", &self.naming)
            .field("dynamic", &self.dynamic)
            .field("types", &self.len())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new(naming: NamingPolicy) -> Self {
        SchemaRegistry { naming, dynamic: DynamicRegistry::new(), structs: RwLock::new(HashMap::new()) }
    }

    pub fn with_dynamic(mut self, dynamic: DynamicRegistry) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn register_dynamic<M: Message>(&mut self) -> &mut Self {
        self.dynamic.register::<M>();
        self
    }

    pub fn dynamic(&self) -> &DynamicRegistry {
        &self.dynamic
    }

    pub fn naming(&self) -> NamingPolicy {
        self.naming
    }

    /// Document field name of a component.
    pub fn component_name(&self, name: &str) -> String {
        self.naming.apply(name)
    }

    pub fn len(&self) -> usize {
        self.structs.read().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema_of_type<T: Describe + 'static>(&self) -> Option<Arc<SchemaTree>> {
        self.lookup(TypeId::of::<T>(), T::describe)
    }

    /// Schema of the object's concrete type, `None` when it has nothing to persist.
    pub fn schema_of(&self, obj: &dyn Persistable) -> Option<Arc<SchemaTree>> {
        self.lookup(obj.schema_type_id(), || obj.descriptor())
    }

    /// Like [`schema_of`](Self::schema_of) but absence is an error.
    pub fn require_schema(&self, obj: &dyn Persistable) -> Result<Arc<SchemaTree>, AppError> {
        self.schema_of(obj).ok_or_else(|| AppError::NotSaveableStruct(obj.descriptor().type_name.to_string()))
    }

    fn lookup(&self, type_id: TypeId, describe: impl FnOnce() -> StructDescriptor) -> Option<Arc<SchemaTree>> {
        if let Ok(structs) = self.structs.read() {
            if let Some(found) = structs.get(&type_id) {
                return found.clone();
            }
        }
        let discovered = self.discover(&describe()).map(Arc::new);
        match self.structs.write() {
            Ok(mut structs) => structs.entry(type_id).or_insert(discovered).clone(),
            Err(_) => discovered,
        }
    }

    fn discover(&self, desc: &StructDescriptor) -> Option<SchemaTree> {
        let tree = self.parse_struct(desc, None);
        if tree.field.is_none() && tree.children.is_empty() {
            debug!("{} has no persisted fields", desc.type_name);
            return None;
        }
        info!("schema {}", tree);
        Some(tree)
    }

    fn parse_struct(&self, desc: &StructDescriptor, parent: Option<&SchemaField>) -> SchemaTree {
        let mut tree = SchemaTree { type_name: desc.type_name, field: None, children: Vec::new() };
        for fd in desc.fields.iter().filter(|f| f.tag == FieldTag::Db) {
            if let Some(existing) = &tree.field {
                error!("{}.{} ignored, {} is already the db field", desc.type_name, fd.ident, existing.ident);
                continue;
            }
            tree.field = self.parse_field(desc, fd, parent);
        }
        for fd in desc.fields.iter().filter(|f| f.tag == FieldTag::Child) {
            if parent.is_some() {
                debug!("{}.{} child ignored below the first level", desc.type_name, fd.ident);
                continue;
            }
            if let Some(existing) = &tree.field {
                error!("{}.{} child ignored, {} is already the db field", desc.type_name, fd.ident, existing.ident);
                continue;
            }
            if let Some(child) = self.parse_field(desc, fd, None) {
                tree.children.push(child);
            }
        }
        tree
    }

    fn parse_field(&self, desc: &StructDescriptor, fd: &FieldDescriptor, parent: Option<&SchemaField>) -> Option<SchemaField> {
        if !fd.public {
            error!("{}.{} must be pub to be persisted", desc.type_name, fd.ident);
            return None;
        }
        if let ValueKind::Unsupported(ty) = fd.kind {
            error!("{}.{} has unsupported type {}", desc.type_name, fd.ident, ty);
            return None;
        }
        let mut field = match parent {
            None => SchemaField {
                ident: fd.ident,
                index: fd.index,
                name: self.naming.apply(fd.rename.unwrap_or(fd.ident)),
                plain: fd.plain,
                depth: 0,
                kind: fd.kind,
                dynamic_map: fd.dynamic_map,
                component_named: desc.component && fd.tag == FieldTag::Db,
                nested: None,
            },
            Some(p) => SchemaField {
                ident: fd.ident,
                index: fd.index,
                name: p.name.clone(),
                plain: p.plain,
                depth: p.depth + 1,
                kind: fd.kind,
                dynamic_map: fd.dynamic_map,
                component_named: p.component_named,
                nested: None,
            },
        };
        match fd.nested {
            Some(nested_desc) => {
                let nested = self.parse_struct(&nested_desc(), Some(&field));
                match &nested.field {
                    Some(inner) => {
                        field.dynamic_map |= inner.dynamic_map;
                        field.nested = Some(Box::new(nested));
                    }
                    None => {
                        error!("{}.{} holds {} which has no db field", desc.type_name, fd.ident, nested.type_name);
                        return None;
                    }
                }
            }
            None if fd.tag == FieldTag::Child => {
                error!("{}.{} child must be a saveable struct, found {:?}", desc.type_name, fd.ident, fd.kind);
                return None;
            }
            None => {}
        }
        Some(field)
    }
}

/// Walks a single-field chain down to the object carrying the marker, `None` if a link is nil.
pub fn resolve_leaf<'o, 't>(
    obj: &'o dyn Persistable,
    field: &'t SchemaField,
) -> Result<Option<(&'o dyn Persistable, &'t SchemaField)>, AppError> {
    let Some(tree) = &field.nested else {
        return Ok(Some((obj, field)));
    };
    let inner_field = tree.field.as_ref().ok_or_else(|| AppError::NotSaveable(tree.type_name.to_string()))?;
    let value = obj.field(field.index).ok_or_else(|| missing_field(obj, field))?;
    if value.is_nil() {
        return Ok(None);
    }
    let inner = value.nested().ok_or_else(|| AppError::NotSaveable(format!("{} is not a saveable struct", field.ident)))?;
    resolve_leaf(inner, inner_field)
}

pub fn resolve_leaf_mut<'o, 't>(
    obj: &'o mut dyn Persistable,
    field: &'t SchemaField,
    init_nil: bool,
) -> Result<Option<(&'o mut dyn Persistable, &'t SchemaField)>, AppError> {
    let Some(tree) = &field.nested else {
        return Ok(Some((obj, field)));
    };
    let inner_field = tree.field.as_ref().ok_or_else(|| AppError::NotSaveable(tree.type_name.to_string()))?;
    let type_name = obj.descriptor().type_name;
    let value = obj
        .field_mut(field.index)
        .ok_or_else(|| AppError::NotSaveable(format!("{}.{} has no accessor", type_name, field.ident)))?;
    if init_nil {
        value.init_nil();
    }
    if value.is_nil() {
        return Ok(None);
    }
    let inner = value.nested_mut().ok_or_else(|| AppError::NotSaveable(format!("{} is not a saveable struct", field.ident)))?;
    resolve_leaf_mut(inner, inner_field, init_nil)
}

/// The child object and its single-field schema, `None` for a nil child.
pub fn resolve_child<'o, 't>(
    obj: &'o dyn Persistable,
    child: &'t SchemaField,
) -> Result<Option<(&'o dyn Persistable, &'t SchemaField)>, AppError> {
    let inner_field = child_field(child)?;
    let value = obj.field(child.index).ok_or_else(|| missing_field(obj, child))?;
    if value.is_nil() {
        return Ok(None);
    }
    let inner = value.nested().ok_or_else(|| AppError::NotSaveable(format!("child {} is not a saveable struct", child.name)))?;
    Ok(Some((inner, inner_field)))
}

pub fn resolve_child_mut<'o, 't>(
    obj: &'o mut dyn Persistable,
    child: &'t SchemaField,
    init_nil: bool,
) -> Result<Option<(&'o mut dyn Persistable, &'t SchemaField)>, AppError> {
    let inner_field = child_field(child)?;
    let type_name = obj.descriptor().type_name;
    let value = obj
        .field_mut(child.index)
        .ok_or_else(|| AppError::NotSaveable(format!("{}.{} has no accessor", type_name, child.ident)))?;
    if init_nil {
        value.init_nil();
    }
    if value.is_nil() {
        return Ok(None);
    }
    let inner = value.nested_mut().ok_or_else(|| AppError::NotSaveable(format!("child {} is not a saveable struct", child.name)))?;
    Ok(Some((inner, inner_field)))
}

fn child_field(child: &SchemaField) -> Result<&SchemaField, AppError> {
    child
        .nested
        .as_ref()
        .and_then(|tree| tree.field.as_ref())
        .ok_or_else(|| AppError::NotSaveable(format!("child {} has no db field", child.name)))
}

fn missing_field(obj: &dyn Persistable, field: &SchemaField) -> AppError {
    AppError::NotSaveable(format!("{}.{} has no accessor", obj.descriptor().type_name, field.ident))
}

#[cfg(test)]
mod schema_tests {
    use super::*;
    use crate::dirty::BaseDirtyMark;
    use crate::entity::BaseComponent;
    use crate::wrapper::{DynamicMapData, MapData, MessageData, SliceData};
    use macros::Saveable;
    use serde::{Deserialize, Serialize};

    #[derive(macros::Message, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct PlayerInfo {
        level: i32,
    }

    #[derive(Saveable, Default)]
    struct Info {
        #[component]
        base: BaseComponent,
        #[db(plain)]
        pub info: MessageData<PlayerInfo>,
    }

    #[derive(Saveable, Default)]
    struct Bag {
        #[component]
        base: BaseComponent,
        #[child]
        pub items: MapData<i32, String>,
        #[child(name = "Equip")]
        pub equip: Option<SliceData<i32>>,
    }

    #[derive(Saveable, Default)]
    struct Messy {
        #[db]
        pub first: i32,
        #[db]
        pub second: i32,
        #[child]
        pub ignored: MapData<i32, i32>,
    }

    #[derive(Saveable, Default)]
    struct Hidden {
        #[db]
        level: i32,
        #[mark]
        mark: BaseDirtyMark,
    }

    #[derive(Saveable)]
    struct Odd {
        #[db]
        pub callback: fn(i32) -> i32,
    }

    #[derive(Saveable, Default)]
    struct Scalars {
        #[child]
        pub level: i32,
    }

    #[derive(Saveable, Default)]
    struct Stash {
        #[db]
        pub items: Option<Box<DynamicMapData<String>>>,
    }

    #[test]
    fn single_field_component_inherits_name_and_plain_flag() {
        let registry = SchemaRegistry::default();
        let tree = registry.schema_of_type::<Info>().expect("schema");
        let field = tree.field.as_ref().expect("single field");
        assert!(tree.is_single());
        assert_eq!(field.name, "info");
        assert!(field.plain && field.component_named);
        assert_eq!(field.kind, ValueKind::Struct);
        let inner = field.nested.as_ref().and_then(|t| t.field.as_ref()).expect("nested field");
        assert_eq!((inner.name.as_str(), inner.depth, inner.plain), ("info", 1, true));
        assert_eq!(inner.kind, ValueKind::Message);
    }

    #[test]
    fn children_are_named_by_policy() {
        let verbatim = SchemaRegistry::default();
        let tree = verbatim.schema_of_type::<Bag>().expect("schema");
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["items", "Equip"]);
        assert!(tree.child("Equip").is_some_and(|c| !c.component_named));

        let lower = SchemaRegistry::new(NamingPolicy::LowerCase);
        let tree = lower.schema_of_type::<Bag>().expect("schema");
        assert!(tree.child("equip").is_some());
        assert_eq!(lower.component_name("Bag"), "bag");
    }

    #[test]
    fn first_db_field_wins_and_children_are_dropped() {
        let registry = SchemaRegistry::default();
        let tree = registry.schema_of_type::<Messy>().expect("schema");
        assert_eq!(tree.field.as_ref().map(|f| f.ident), Some("first"));
        assert!(tree.children.is_empty());
    }

    #[test]
    fn invalid_fields_leave_nothing_to_persist() {
        let registry = SchemaRegistry::default();
        assert!(registry.schema_of_type::<Hidden>().is_none(), "private field");
        assert!(registry.schema_of_type::<Odd>().is_none(), "fn pointer");
        assert!(registry.schema_of_type::<Scalars>().is_none(), "child of a scalar");
        let before = registry.len();
        assert!(registry.schema_of(&Hidden::default()).is_none());
        assert_eq!(registry.len(), before, "absence is memoized too");
        assert!(matches!(registry.require_schema(&Hidden::default()), Err(AppError::NotSaveableStruct(_))));
    }

    #[test]
    fn dynamic_map_flags_the_top_field() {
        let registry = SchemaRegistry::default();
        let tree = registry.schema_of_type::<Stash>().expect("schema");
        let field = tree.field.as_ref().expect("single field");
        assert!(field.dynamic_map);
        assert!(!field.component_named);
    }

    #[test]
    fn discovery_is_memoized_per_type() {
        let registry = SchemaRegistry::default();
        let first = registry.schema_of_type::<Bag>().expect("schema");
        let second = registry.schema_of(&Bag::default()).expect("schema");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(first.to_string().starts_with("Bag ["));
    }
}
