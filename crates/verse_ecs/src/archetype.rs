//! Archetypes: interned component-set storage groups and the edge graph
//! connecting them.

use crate::component::{ComponentId, Components};
use crate::storage::{Chunk, ColumnData};
use smallvec::SmallVec;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Identifies an archetype within a world. Ids are assigned in creation
/// order, so they double as the creation stamp used by query memoisation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The archetype of entities with no components; always present.
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A point in the world's archetype creation sequence. Query caches compare
/// this against the current count to detect new archetypes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct ArchetypeGeneration(pub(crate) u32);

impl ArchetypeGeneration {
    pub const INITIAL: Self = Self(0);
}

/// Graph edges between archetypes differing by exactly one component. An
/// `add` edge leads to the archetype with the component attached; `remove`
/// edges are the inverse. Query matching traverses `add` edges from the
/// empty root.
#[derive(Default)]
pub struct Edges {
    add: HashMap<ComponentId, ArchetypeId>,
    remove: HashMap<ComponentId, ArchetypeId>,
}

impl Edges {
    #[inline]
    pub fn get_add(&self, component: ComponentId) -> Option<ArchetypeId> {
        self.add.get(&component).copied()
    }

    #[inline]
    pub fn get_remove(&self, component: ComponentId) -> Option<ArchetypeId> {
        self.remove.get(&component).copied()
    }

    /// Iterates the add edges (attached component, target archetype).
    pub fn add_edges(&self) -> impl Iterator<Item = (ComponentId, ArchetypeId)> + '_ {
        self.add.iter().map(|(&component, &target)| (component, target))
    }
}

/// A unique sorted set of component ids and the chunked storage for every
/// entity carrying exactly that set.
pub struct Archetype {
    id: ArchetypeId,
    components: Box<[ComponentId]>,
    component_index: HashMap<ComponentId, usize>,
    constructors: Box<[fn() -> Box<dyn ColumnData>]>,
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) edges: Edges,
}

impl Archetype {
    fn new(id: ArchetypeId, components: Box<[ComponentId]>, registry: &Components) -> Self {
        debug_assert!(components.windows(2).all(|w| w[0] < w[1]), "component list must be sorted");
        let component_index = components
            .iter()
            .enumerate()
            .map(|(position, &component)| (component, position))
            .collect();
        let constructors = components
            .iter()
            .map(|&component| {
                registry
                    .get_info(component)
                    .and_then(|info| info.new_column)
                    .expect("archetype component is not a registered component type")
            })
            .collect();
        Self {
            id,
            components,
            component_index,
            constructors,
            chunks: Vec::new(),
            edges: Edges::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The sorted component id list.
    #[inline]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    #[inline]
    pub fn contains(&self, component: ComponentId) -> bool {
        self.component_index.contains_key(&component)
    }

    /// The column position of `component` in this archetype's sorted order.
    #[inline]
    pub(crate) fn column_position(&self, component: ComponentId) -> Option<usize> {
        self.component_index.get(&component).copied()
    }

    #[inline]
    pub fn edges(&self) -> &Edges {
        &self.edges
    }

    /// Total number of entities stored across all chunks.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|chunk| chunk.len() == 0)
    }

    /// Index of a chunk with a free row, appending a new chunk if every
    /// existing one is full. Never reallocates an existing chunk.
    pub(crate) fn chunk_with_room(&mut self) -> usize {
        match self.chunks.last() {
            Some(chunk) if !chunk.is_full() => self.chunks.len() - 1,
            _ => {
                self.chunks.push(Chunk::new(&self.constructors));
                self.chunks.len() - 1
            }
        }
    }
}

/// Commutative hash of a component set; independent of element order.
fn component_set_hash(components: &[ComponentId]) -> u64 {
    components
        .iter()
        .map(|component| {
            let mut hasher = DefaultHasher::new();
            component.hash(&mut hasher);
            hasher.finish()
        })
        .fold(0, |acc, h| acc ^ h)
}

/// All archetypes of a world, interned so that two equal component sets are
/// always the same archetype instance.
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    by_hash: HashMap<u64, SmallVec<[ArchetypeId; 1]>>,
}

impl Default for Archetypes {
    fn default() -> Self {
        let mut archetypes = Self {
            archetypes: Vec::new(),
            by_hash: HashMap::new(),
        };
        let empty = archetypes.create(Box::new([]), &Components::default());
        debug_assert_eq!(empty, ArchetypeId::EMPTY);
        archetypes
    }
}

impl Archetypes {
    #[inline]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    #[inline]
    pub fn empty(&self) -> &Archetype {
        &self.archetypes[ArchetypeId::EMPTY.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// The current creation stamp; advances whenever an archetype is created.
    #[inline]
    pub fn generation(&self) -> ArchetypeGeneration {
        ArchetypeGeneration(self.archetypes.len() as u32)
    }

    /// Mutable access to two distinct archetypes at once, for structural
    /// moves between them.
    pub(crate) fn get_2_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b);
        if a.index() < b.index() {
            let (low, high) = self.archetypes.split_at_mut(b.index());
            (&mut low[a.index()], &mut high[0])
        } else {
            let (low, high) = self.archetypes.split_at_mut(a.index());
            (&mut high[0], &mut low[b.index()])
        }
    }

    /// Interns the archetype for the exact component set `components`
    /// (sorted, deduplicated), creating it and any missing intermediate
    /// archetypes along the sorted add-edge chain from the empty root. The
    /// chain walk keeps every archetype reachable from the root, which query
    /// matching relies on.
    pub(crate) fn intern(
        &mut self,
        components: &[ComponentId],
        registry: &Components,
    ) -> ArchetypeId {
        debug_assert!(components.windows(2).all(|w| w[0] < w[1]));
        let mut current = ArchetypeId::EMPTY;
        for (depth, &component) in components.iter().enumerate() {
            current = self.get_or_insert_child(current, component, &components[..=depth], registry);
        }
        current
    }

    /// The archetype reached from `parent` by attaching `component`.
    pub(crate) fn add_target(
        &mut self,
        parent: ArchetypeId,
        component: ComponentId,
        registry: &Components,
    ) -> ArchetypeId {
        if let Some(child) = self.archetypes[parent.index()].edges.get_add(component) {
            return child;
        }
        let mut set: Vec<ComponentId> =
            self.archetypes[parent.index()].components.to_vec();
        let position = set.binary_search(&component).unwrap_err();
        set.insert(position, component);
        let child = self.intern(&set, registry);
        self.archetypes[parent.index()].edges.add.insert(component, child);
        self.archetypes[child.index()].edges.remove.insert(component, parent);
        child
    }

    /// The archetype reached from `child` by detaching `component`.
    pub(crate) fn remove_target(
        &mut self,
        child: ArchetypeId,
        component: ComponentId,
        registry: &Components,
    ) -> ArchetypeId {
        if let Some(parent) = self.archetypes[child.index()].edges.get_remove(component) {
            return parent;
        }
        let set: Vec<ComponentId> = self.archetypes[child.index()]
            .components
            .iter()
            .copied()
            .filter(|&c| c != component)
            .collect();
        let parent = self.intern(&set, registry);
        self.archetypes[child.index()].edges.remove.insert(component, parent);
        self.archetypes[parent.index()].edges.add.insert(component, child);
        parent
    }

    fn get_or_insert_child(
        &mut self,
        parent: ArchetypeId,
        component: ComponentId,
        set: &[ComponentId],
        registry: &Components,
    ) -> ArchetypeId {
        if let Some(child) = self.archetypes[parent.index()].edges.get_add(component) {
            return child;
        }
        let child = match self.find(set) {
            Some(existing) => existing,
            None => self.create(set.into(), registry),
        };
        self.archetypes[parent.index()].edges.add.insert(component, child);
        self.archetypes[child.index()].edges.remove.insert(component, parent);
        child
    }

    /// Hashed lookup of an exact component set; collisions resolve by linear
    /// scan of the bucket.
    fn find(&self, components: &[ComponentId]) -> Option<ArchetypeId> {
        let hash = component_set_hash(components);
        self.by_hash.get(&hash)?.iter().copied().find(|&id| {
            self.archetypes[id.index()].components.as_ref() == components
        })
    }

    fn create(&mut self, components: Box<[ComponentId]>, registry: &Components) -> ArchetypeId {
        let id = ArchetypeId(self.archetypes.len() as u32);
        let hash = component_set_hash(&components);
        self.by_hash.entry(hash).or_default().push(id);
        self.archetypes.push(Archetype::new(id, components, registry));
        id
    }

    /// Rebase every stored tick against `current`.
    pub(crate) fn check_ticks(&mut self, current: crate::tick::Tick) {
        for archetype in &mut self.archetypes {
            for chunk in &mut archetype.chunks {
                chunk.check_ticks(current);
            }
        }
    }

    /// Drops all entities and rows but keeps the interned archetypes.
    pub(crate) fn clear_entities(&mut self) {
        for archetype in &mut self.archetypes {
            archetype.chunks.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Components};

    struct A;
    struct B;
    struct C;
    impl Component for A {}
    impl Component for B {}
    impl Component for C {}

    #[test]
    fn equal_sets_intern_to_one_archetype() {
        let mut registry = Components::default();
        let a = registry.register_component::<A>();
        let b = registry.register_component::<B>();

        let mut archetypes = Archetypes::default();
        let mut set = vec![a, b];
        set.sort();
        let first = archetypes.intern(&set, &registry);
        let second = archetypes.intern(&set, &registry);
        assert_eq!(first, second);
        // root, {first}, {first, second}
        assert_eq!(archetypes.len(), 3);
    }

    #[test]
    fn different_paths_reach_the_same_archetype() {
        let mut registry = Components::default();
        let a = registry.register_component::<A>();
        let b = registry.register_component::<B>();

        let mut archetypes = Archetypes::default();
        // attach a then b
        let with_a = archetypes.add_target(ArchetypeId::EMPTY, a, &registry);
        let with_ab = archetypes.add_target(with_a, b, &registry);
        // attach b then a
        let with_b = archetypes.add_target(ArchetypeId::EMPTY, b, &registry);
        let with_ba = archetypes.add_target(with_b, a, &registry);
        assert_eq!(with_ab, with_ba);
        assert_ne!(with_a, with_b);
    }

    #[test]
    fn detach_links_back() {
        let mut registry = Components::default();
        let a = registry.register_component::<A>();
        let b = registry.register_component::<B>();
        let c = registry.register_component::<C>();

        let mut archetypes = Archetypes::default();
        let mut set = vec![a, b, c];
        set.sort();
        let full = archetypes.intern(&set, &registry);
        let without_b = archetypes.remove_target(full, b, &registry);
        let components = archetypes.get(without_b).unwrap().components().to_vec();
        assert_eq!(components, {
            let mut expected = vec![a, c];
            expected.sort();
            expected
        });
        // the inverse edge now exists too
        assert_eq!(
            archetypes.get(without_b).unwrap().edges().get_add(b),
            Some(full)
        );
    }

    #[test]
    fn every_archetype_is_reachable_from_the_root() {
        let mut registry = Components::default();
        let a = registry.register_component::<A>();
        let b = registry.register_component::<B>();
        let c = registry.register_component::<C>();

        let mut archetypes = Archetypes::default();
        let mut set = vec![a, b, c];
        set.sort();
        let full = archetypes.intern(&set, &registry);
        // drop the middle component so the two-component archetype is
        // created by a detach rather than an attach chain
        let detached = archetypes.remove_target(full, set[1], &registry);

        let mut visited = vec![false; archetypes.len()];
        let mut stack = vec![ArchetypeId::EMPTY];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            for (_, target) in archetypes.get(id).unwrap().edges().add_edges() {
                stack.push(target);
            }
        }
        assert!(visited[detached.index()]);
        assert!(visited.iter().all(|&v| v));
    }
}
