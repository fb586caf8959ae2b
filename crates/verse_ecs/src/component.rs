//! Component types and the component/resource id registry.

use crate::storage::{column_constructor, ColumnData};
use std::{
    any::{type_name, TypeId},
    borrow::Cow,
    collections::HashMap,
    fmt,
};

/// A value that can be attached to an [`Entity`](crate::entity::Entity).
///
/// Components are plain data; prefer `#[derive(Component)]`.
pub trait Component: Send + Sync + 'static {}

/// A dense numeric id for a registered component or resource type.
///
/// Ids are assigned on first registration and stable for the lifetime of the
/// world. Component and resource registrations of the same Rust type receive
/// distinct ids.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstructs an id from a bitset index.
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Metadata for a registered component or resource type.
pub struct ComponentInfo {
    id: ComponentId,
    name: Cow<'static, str>,
    type_id: TypeId,
    /// Builds an empty storage column for this component. `None` for
    /// resource registrations, which never live in chunks.
    pub(crate) new_column: Option<fn() -> Box<dyn ColumnData>>,
}

impl ComponentInfo {
    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Registry assigning [`ComponentId`]s to component and resource types.
///
/// The two namespaces share one dense counter (so access bitsets can index
/// both) but are looked up through separate maps: registering a type as a
/// component and as a resource yields two different ids.
#[derive(Default)]
pub struct Components {
    infos: Vec<ComponentInfo>,
    component_ids: HashMap<TypeId, ComponentId>,
    resource_ids: HashMap<TypeId, ComponentId>,
}

impl Components {
    /// Registers `T` in the component namespace, returning its id.
    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        let Self { infos, component_ids, .. } = self;
        *component_ids.entry(TypeId::of::<T>()).or_insert_with(|| {
            let id = ComponentId(infos.len() as u32);
            infos.push(ComponentInfo {
                id,
                name: Cow::Borrowed(type_name::<T>()),
                type_id: TypeId::of::<T>(),
                new_column: Some(column_constructor::<T>()),
            });
            id
        })
    }

    /// Registers `T` in the resource namespace, returning its id.
    pub fn register_resource<T: Send + Sync + 'static>(&mut self) -> ComponentId {
        let Self { infos, resource_ids, .. } = self;
        *resource_ids.entry(TypeId::of::<T>()).or_insert_with(|| {
            let id = ComponentId(infos.len() as u32);
            infos.push(ComponentInfo {
                id,
                name: Cow::Borrowed(type_name::<T>()),
                type_id: TypeId::of::<T>(),
                new_column: None,
            });
            id
        })
    }

    #[inline]
    pub fn get_component_id(&self, type_id: TypeId) -> Option<ComponentId> {
        self.component_ids.get(&type_id).copied()
    }

    #[inline]
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.get_component_id(TypeId::of::<T>())
    }

    #[inline]
    pub fn get_resource_id(&self, type_id: TypeId) -> Option<ComponentId> {
        self.resource_ids.get(&type_id).copied()
    }

    #[inline]
    pub fn resource_id<T: Send + Sync + 'static>(&self) -> Option<ComponentId> {
        self.get_resource_id(TypeId::of::<T>())
    }

    #[inline]
    pub fn get_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// The display name of `id`, or a placeholder for unknown ids.
    pub fn get_name(&self, id: ComponentId) -> &str {
        self.get_info(id).map(ComponentInfo::name).unwrap_or("<unknown>")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    impl Component for Position {}

    #[test]
    fn registration_is_idempotent() {
        let mut components = Components::default();
        let a = components.register_component::<Position>();
        let b = components.register_component::<Position>();
        assert_eq!(a, b);
        assert_eq!(components.len(), 1);
    }

    #[test]
    fn namespaces_are_distinct() {
        let mut components = Components::default();
        let component = components.register_component::<Position>();
        let resource = components.register_resource::<Position>();
        assert_ne!(component, resource);
        assert_eq!(components.component_id::<Position>(), Some(component));
        assert_eq!(components.resource_id::<Position>(), Some(resource));
    }
}
