//! Queries: typed views over matching archetypes.
//!
//! A query is described by a data tuple ([`QueryData`]) and a filter tuple
//! ([`QueryFilter`]). Both compile down to a canonical sorted list of
//! [`QueryTerm`]s, which is the key into the world's shared match cache:
//! duplicate queries, however their terms were spelled, share one cached
//! archetype list. Matching walks the archetype add-edge graph from the empty
//! root and is memoised against the archetype generation, so it only reruns
//! when archetypes have been created since.

mod fetch;
mod filter;
mod state;

pub use fetch::{QueryData, ReadOnlyQueryData};
pub use filter::{Added, Changed, MarkChanged, QueryFilter, With, Without};
pub use state::{Query, QueryIter, QueryState};

use crate::archetype::{Archetype, ArchetypeGeneration, ArchetypeId, Archetypes};
use crate::component::ComponentId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// How a term constrains and touches a component.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TermKind {
    Read,
    Write,
    OptionalRead,
    OptionalWrite,
    With,
    Without,
    Added,
    Changed,
    MarkChanged,
}

impl TermKind {
    /// The kind this term becomes when wrapped in `Option<_>`.
    pub(crate) fn into_optional(self) -> Self {
        match self {
            TermKind::Read => TermKind::OptionalRead,
            TermKind::Write => TermKind::OptionalWrite,
            other => other,
        }
    }

    /// `true` if an archetype must contain the component to match.
    fn requires_presence(self) -> bool {
        matches!(
            self,
            TermKind::Read
                | TermKind::Write
                | TermKind::With
                | TermKind::Added
                | TermKind::Changed
                | TermKind::MarkChanged
        )
    }
}

/// One canonicalized term of a query.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct QueryTerm {
    pub component: ComponentId,
    pub kind: TermKind,
}

/// `true` if an archetype satisfies every term.
pub(crate) fn matches_archetype(terms: &[QueryTerm], archetype: &Archetype) -> bool {
    terms.iter().all(|term| {
        if term.kind == TermKind::Without {
            !archetype.contains(term.component)
        } else if term.kind.requires_presence() {
            archetype.contains(term.component)
        } else {
            true
        }
    })
}

/// Walks the archetype graph from the empty root, pruning any subtree rooted
/// at an archetype that contains a `Without` id (descendants along add edges
/// only gain components), and records every archetype whose presence
/// requirements are all satisfied.
pub(crate) fn match_archetypes(terms: &[QueryTerm], archetypes: &Archetypes) -> Vec<ArchetypeId> {
    let mut visited = vec![false; archetypes.len()];
    let mut matched = Vec::new();
    let mut stack = vec![ArchetypeId::EMPTY];
    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut visited[id.index()], true) {
            continue;
        }
        let archetype = archetypes
            .get(id)
            .expect("archetype graph edge points at a missing archetype");
        if terms
            .iter()
            .any(|term| term.kind == TermKind::Without && archetype.contains(term.component))
        {
            continue;
        }
        if terms
            .iter()
            .filter(|term| term.kind.requires_presence())
            .all(|term| archetype.contains(term.component))
        {
            matched.push(id);
        }
        for (_, target) in archetype.edges().add_edges() {
            stack.push(target);
        }
    }
    matched.sort_unstable();
    matched
}

/// The memoised result of matching one canonical term list.
pub(crate) struct CachedMatches {
    pub(crate) seen: ArchetypeGeneration,
    pub(crate) matched: Vec<ArchetypeId>,
}

/// World-hosted cache of archetype matches keyed by canonical term list.
/// Shared between every query state with the same terms.
#[derive(Default)]
pub struct QueryCaches {
    caches: Mutex<HashMap<Box<[QueryTerm]>, Arc<RwLock<CachedMatches>>>>,
}

impl QueryCaches {
    pub(crate) fn get_or_create(&self, terms: &[QueryTerm]) -> Arc<RwLock<CachedMatches>> {
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.get(terms) {
            return cache.clone();
        }
        let cache = Arc::new(RwLock::new(CachedMatches {
            seen: ArchetypeGeneration::INITIAL,
            matched: Vec::new(),
        }));
        caches.insert(terms.into(), cache.clone());
        cache
    }

    /// Number of distinct cached term lists.
    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.lock().is_empty()
    }
}

/// Failure of [`Query::get`](crate::query::Query::get).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum QueryEntityError {
    #[error("the entity does not exist")]
    NoSuchEntity,
    #[error("the entity's components do not match the query")]
    QueryDoesNotMatch,
}

/// Failure of [`Query::single`](crate::query::Query::single).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum QuerySingleError {
    #[error("no entity matched the query")]
    NoEntities,
    #[error("more than one entity matched the query")]
    MultipleEntities,
}
