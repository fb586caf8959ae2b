//! Declared data access of systems and queries, and the compatibility rules
//! the schedule builder and the parallel executor enforce.

use crate::bitset::BitSet;
use crate::component::ComponentId;

/// What a system or query reads and writes, by [`ComponentId`].
///
/// `writes` is always a subset of `reads_and_writes`. The `reads_all` /
/// `writes_all` flags model whole-world access (exclusive systems, `&World`
/// params) without enumerating ids.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Access {
    reads_and_writes: BitSet,
    writes: BitSet,
    reads_all: bool,
    writes_all: bool,
}

impl Access {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&mut self, id: ComponentId) {
        self.reads_and_writes.insert(id.index());
    }

    pub fn add_write(&mut self, id: ComponentId) {
        self.reads_and_writes.insert(id.index());
        self.writes.insert(id.index());
    }

    pub fn read_all(&mut self) {
        self.reads_all = true;
    }

    pub fn write_all(&mut self) {
        self.reads_all = true;
        self.writes_all = true;
    }

    #[inline]
    pub fn has_read(&self, id: ComponentId) -> bool {
        self.reads_all || self.reads_and_writes.contains(id.index())
    }

    #[inline]
    pub fn has_write(&self, id: ComponentId) -> bool {
        self.writes_all || self.writes.contains(id.index())
    }

    #[inline]
    pub fn has_reads_all(&self) -> bool {
        self.reads_all
    }

    #[inline]
    pub fn has_writes_all(&self) -> bool {
        self.writes_all
    }

    /// `true` if this access touches anything at all.
    pub fn has_any(&self) -> bool {
        self.reads_all || self.writes_all || self.reads_and_writes.has_any_set()
    }

    pub fn extend(&mut self, other: &Access) {
        self.reads_and_writes.union_with(&other.reads_and_writes);
        self.writes.union_with(&other.writes);
        self.reads_all |= other.reads_all;
        self.writes_all |= other.writes_all;
    }

    pub fn clear(&mut self) {
        self.reads_and_writes.clear();
        self.writes.clear();
        self.reads_all = false;
        self.writes_all = false;
    }

    /// Two accesses are compatible unless one writes what the other touches.
    pub fn is_compatible(&self, other: &Access) -> bool {
        if self.writes_all {
            return !other.has_any();
        }
        if other.writes_all {
            return !self.has_any();
        }
        if (self.reads_all && other.writes.has_any_set())
            || (other.reads_all && self.writes.has_any_set())
        {
            return false;
        }
        self.writes.is_disjoint(&other.reads_and_writes)
            && other.writes.is_disjoint(&self.reads_and_writes)
    }

    /// The component ids responsible for an incompatibility. Empty when the
    /// conflict is whole-world (`writes_all` vs anything).
    pub fn get_conflicts(&self, other: &Access) -> Vec<ComponentId> {
        let mut conflicts = BitSet::new();
        if self.reads_all {
            conflicts.union_with(&other.writes);
        }
        if other.reads_all {
            conflicts.union_with(&self.writes);
        }
        if self.writes_all {
            conflicts.union_with(&other.reads_and_writes);
        }
        if other.writes_all {
            conflicts.union_with(&self.reads_and_writes);
        }
        let mut self_writes_hits = self.writes.clone();
        self_writes_hits.intersect_with(&other.reads_and_writes);
        conflicts.union_with(&self_writes_hits);
        let mut other_writes_hits = other.writes.clone();
        other_writes_hits.intersect_with(&self.reads_and_writes);
        conflicts.union_with(&other_writes_hits);
        conflicts.ones().map(|index| ComponentId::from_index(index)).collect()
    }
}

/// One disjunctive clause of a query's `With`/`Without` predicate.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessFilters {
    pub(crate) with: BitSet,
    pub(crate) without: BitSet,
}

impl AccessFilters {
    /// `true` if no archetype can satisfy both filter sets at once.
    fn is_ruled_out_by(&self, other: &Self) -> bool {
        self.with.overlaps(&other.without) || self.without.overlaps(&other.with)
    }
}

/// An [`Access`] plus the filter clauses that scope it to a subset of
/// archetypes, in disjunctive normal form, and the ids the query requires to
/// be present.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilteredAccess {
    pub(crate) access: Access,
    pub(crate) required: BitSet,
    /// DNF: an archetype is touched iff at least one clause matches it.
    pub(crate) filter_sets: Vec<AccessFilters>,
}

impl Default for FilteredAccess {
    fn default() -> Self {
        Self {
            access: Access::default(),
            required: BitSet::new(),
            filter_sets: vec![AccessFilters::default()],
        }
    }
}

impl FilteredAccess {
    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut Access {
        &mut self.access
    }

    pub fn add_read(&mut self, id: ComponentId) {
        self.access.add_read(id);
        self.add_required(id);
        self.and_with(id);
    }

    pub fn add_write(&mut self, id: ComponentId) {
        self.access.add_write(id);
        self.add_required(id);
        self.and_with(id);
    }

    fn add_required(&mut self, id: ComponentId) {
        self.required.insert(id.index());
    }

    /// Adds a `With(id)` conjunct to every clause.
    pub fn and_with(&mut self, id: ComponentId) {
        for clause in &mut self.filter_sets {
            clause.with.insert(id.index());
        }
    }

    /// Adds a `Without(id)` conjunct to every clause.
    pub fn and_without(&mut self, id: ComponentId) {
        for clause in &mut self.filter_sets {
            clause.without.insert(id.index());
        }
    }

    /// Merges another filtered access conjunctively (same query).
    pub fn extend(&mut self, other: &FilteredAccess) {
        self.access.extend(&other.access);
        self.required.union_with(&other.required);
        // cross product of the two DNFs
        let mut clauses = Vec::with_capacity(self.filter_sets.len() * other.filter_sets.len());
        for own in &self.filter_sets {
            for theirs in &other.filter_sets {
                let mut merged = own.clone();
                merged.with.union_with(&theirs.with);
                merged.without.union_with(&theirs.without);
                clauses.push(merged);
            }
        }
        self.filter_sets = clauses;
    }

    /// Two filtered accesses are compatible if their underlying accesses are,
    /// or if every pair of clauses is mutually exclusive (so no archetype is
    /// ever touched by both).
    pub fn is_compatible(&self, other: &FilteredAccess) -> bool {
        if self.access.is_compatible(&other.access) {
            return true;
        }
        self.filter_sets.iter().all(|own| {
            other.filter_sets.iter().all(|theirs| own.is_ruled_out_by(theirs))
        })
    }

    pub fn get_conflicts(&self, other: &FilteredAccess) -> Vec<ComponentId> {
        if self.is_compatible(other) {
            Vec::new()
        } else {
            self.access.get_conflicts(&other.access)
        }
    }
}

/// The complete declared access of one system: the union access used for
/// quick checks plus the per-query filtered accesses used for precise ones.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FilteredAccessSet {
    combined_access: Access,
    filtered_accesses: Vec<FilteredAccess>,
}

impl FilteredAccessSet {
    #[inline]
    pub fn combined_access(&self) -> &Access {
        &self.combined_access
    }

    pub fn add(&mut self, filtered: FilteredAccess) {
        self.combined_access.extend(&filtered.access);
        self.filtered_accesses.push(filtered);
    }

    pub fn add_unfiltered_read(&mut self, id: ComponentId) {
        let mut filtered = FilteredAccess::default();
        filtered.access.add_read(id);
        self.add(filtered);
    }

    pub fn add_unfiltered_write(&mut self, id: ComponentId) {
        let mut filtered = FilteredAccess::default();
        filtered.access.add_write(id);
        self.add(filtered);
    }

    pub fn read_all(&mut self) {
        let mut filtered = FilteredAccess::default();
        filtered.access.read_all();
        self.add(filtered);
    }

    pub fn write_all(&mut self) {
        let mut filtered = FilteredAccess::default();
        filtered.access.write_all();
        self.add(filtered);
    }

    pub fn extend(&mut self, other: &FilteredAccessSet) {
        self.combined_access.extend(&other.combined_access);
        self.filtered_accesses.extend(other.filtered_accesses.iter().cloned());
    }

    pub fn is_compatible(&self, other: &FilteredAccessSet) -> bool {
        if self.combined_access.is_compatible(&other.combined_access) {
            return true;
        }
        self.filtered_accesses.iter().all(|own| {
            other.filtered_accesses.iter().all(|theirs| own.is_compatible(theirs))
        })
    }

    /// The set of component ids that make two systems conflict, deduplicated
    /// and sorted.
    pub fn get_conflicts(&self, other: &FilteredAccessSet) -> Vec<ComponentId> {
        if self.is_compatible(other) {
            return Vec::new();
        }
        let mut conflicts: Vec<ComponentId> = self
            .filtered_accesses
            .iter()
            .flat_map(|own| {
                other
                    .filtered_accesses
                    .iter()
                    .flat_map(move |theirs| own.get_conflicts(theirs))
            })
            .collect();
        conflicts.sort_unstable();
        conflicts.dedup();
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: usize) -> ComponentId {
        ComponentId::from_index(index)
    }

    #[test]
    fn read_read_is_compatible() {
        let mut a = Access::new();
        a.add_read(id(0));
        let mut b = Access::new();
        b.add_read(id(0));
        assert!(a.is_compatible(&b));
        assert!(a.get_conflicts(&b).is_empty());
    }

    #[test]
    fn write_read_conflicts() {
        let mut a = Access::new();
        a.add_write(id(0));
        let mut b = Access::new();
        b.add_read(id(0));
        assert!(!a.is_compatible(&b));
        assert_eq!(a.get_conflicts(&b), vec![id(0)]);
    }

    #[test]
    fn writes_all_conflicts_with_anything() {
        let mut a = Access::new();
        a.write_all();
        let mut b = Access::new();
        b.add_read(id(3));
        assert!(!a.is_compatible(&b));
        // but not with a system that touches nothing
        assert!(a.is_compatible(&Access::new()));
    }

    #[test]
    fn disjoint_filters_permit_conflicting_access() {
        // Query 1: &mut T with With<A>; Query 2: &mut T with Without<A>.
        let t = id(0);
        let a = id(1);

        let mut first = FilteredAccess::default();
        first.add_write(t);
        first.and_with(a);

        let mut second = FilteredAccess::default();
        second.add_write(t);
        second.and_without(a);

        assert!(first.is_compatible(&second));
        assert!(first.get_conflicts(&second).is_empty());

        // without the Without, they collide on T
        let mut third = FilteredAccess::default();
        third.add_write(t);
        assert!(!first.is_compatible(&third));
        assert_eq!(first.get_conflicts(&third), vec![t]);
    }

    #[test]
    fn set_conflicts_are_sorted_and_deduplicated() {
        let mut a = FilteredAccessSet::default();
        a.add_unfiltered_write(id(2));
        a.add_unfiltered_write(id(1));
        let mut b = FilteredAccessSet::default();
        b.add_unfiltered_read(id(1));
        b.add_unfiltered_write(id(2));
        b.add_unfiltered_read(id(2));
        assert_eq!(a.get_conflicts(&b), vec![id(1), id(2)]);
    }
}
