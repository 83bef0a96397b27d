use crate::cache::KvCache;
use crate::error::AppError;
use crate::load::load_component_data;
use crate::save::{save_component_changed_data_to_cache, track_stored_children};
use crate::schema::{Persistable, SchemaRegistry};
use crate::value::Value;
use crate::warn;
use std::collections::BTreeSet;

/// Name and owning entity of a component, embedded through `#[component]`.
///
/// Also remembers which children may hold data in the store or the cache, so clearing one of
/// them to nil can be carried to both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseComponent {
    name: String,
    entity_id: Option<i64>,
    stored_children: BTreeSet<String>,
}

impl BaseComponent {
    pub fn new(name: &str) -> Self {
        BaseComponent { name: name.to_string(), entity_id: None, stored_children: BTreeSet::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_id(&self) -> Option<i64> {
        self.entity_id
    }

    pub fn attach(&mut self, entity_id: i64) {
        self.entity_id = Some(entity_id);
    }

    pub fn child_stored(&self, child: &str) -> bool {
        self.stored_children.contains(child)
    }

    pub fn mark_child_stored(&mut self, child: &str) {
        self.stored_children.insert(child.to_string());
    }

    pub fn forget_child(&mut self, child: &str) {
        self.stored_children.remove(child);
    }
}

/// A named persistable unit attached to one entity, implemented by `#[derive(Saveable)]` with a
/// `#[component]` field.
pub trait Component: Persistable {
    fn base(&self) -> &BaseComponent;
    fn base_mut(&mut self) -> &mut BaseComponent;
    fn as_persistable(&self) -> &dyn Persistable;
    fn as_persistable_mut(&mut self) -> &mut dyn Persistable;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn entity_id(&self) -> Option<i64> {
        self.base().entity_id()
    }
}

pub trait Entity {
    fn id(&self) -> i64;
    fn components(&self) -> &[Box<dyn Component>];
    fn components_mut(&mut self) -> &mut [Box<dyn Component>];
}

/// Entity owning its components in insertion order.
#[derive(Default)]
pub struct BaseEntity {
    id: i64,
    components: Vec<Box<dyn Component>>,
}

impl Entity for BaseEntity {
    fn id(&self) -> i64 {
        self.id
    }

    fn components(&self) -> &[Box<dyn Component>] {
        &self.components
    }

    fn components_mut(&mut self) -> &mut [Box<dyn Component>] {
        &mut self.components
    }
}

impl BaseEntity {
    pub fn new(id: i64) -> Self {
        BaseEntity { id, components: Vec::new() }
    }

    /// Attaches the component, loading `source` (its stored value) into it when given.
    pub fn add_component(
        &mut self,
        registry: &SchemaRegistry,
        mut component: Box<dyn Component>,
        source: Option<Value>,
    ) -> Result<(), AppError> {
        let name = component.name().to_string();
        if name.is_empty() {
            return Err(AppError::InvalidComponent(format!("{} has no name", component.descriptor().type_name)));
        }
        if self.component(&name).is_some() {
            return Err(AppError::DuplicateComponent(name));
        }
        component.base_mut().attach(self.id);
        if let Some(value) = source {
            load_component_data(registry, component.as_mut(), value)?;
        }
        track_stored_children(registry, component.as_mut())?;
        self.components.push(component);
        Ok(())
    }

    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        self.components.iter().find(|c| c.name() == name).map(|c| c.as_ref())
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut (dyn Component + 'static)> {
        self.components.iter_mut().find(|c| c.name() == name).map(|c| c.as_mut())
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.components.iter().find_map(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.components.iter_mut().find_map(|c| c.as_any_mut().downcast_mut::<T>())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Pushes every component's dirty data to the cache under the entity id.
    pub fn save_cache(&mut self, registry: &SchemaRegistry, cache: &dyn KvCache, prefix: &str) -> Result<(), AppError> {
        let key = self.id;
        self.save_cache_by_key(registry, cache, prefix, key)
    }

    /// Pushes every component's dirty data to the cache under `key`, continuing past failures.
    pub fn save_cache_by_key(&mut self, registry: &SchemaRegistry, cache: &dyn KvCache, prefix: &str, key: i64) -> Result<(), AppError> {
        let mut first_err = None;
        for component in self.components.iter_mut() {
            if let Err(e) = save_component_changed_data_to_cache(registry, cache, prefix, key, component.as_mut()) {
                warn!("cache push of {} failed: {}", component.name(), e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
