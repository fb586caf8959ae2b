//! Schedule and system-set labels.
//!
//! Labels are user-defined unit types (or enums) deriving `ScheduleLabel` /
//! `SystemSet`; interning wraps them in a cheaply cloneable `Arc` so graph
//! structures can key on them.

use crate::label::DynEq;
use std::any::TypeId;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Identifies a [`Schedule`](crate::schedule::Schedule) inside the
/// [`Schedules`](crate::schedule::Schedules) container. Prefer
/// `#[derive(ScheduleLabel)]`.
pub trait ScheduleLabel: Send + Sync + Debug + 'static {
    fn dyn_clone(&self) -> Box<dyn ScheduleLabel>;
    fn as_dyn_eq(&self) -> &dyn DynEq;
    fn dyn_hash(&self, state: &mut dyn Hasher);

    /// Wraps this label for cheap cloning and map keying.
    fn intern(&self) -> InternedScheduleLabel
    where
        Self: Sized,
    {
        InternedScheduleLabel(Arc::from(self.dyn_clone()))
    }
}

/// A reference-counted, hashable [`ScheduleLabel`].
#[derive(Clone)]
pub struct InternedScheduleLabel(Arc<dyn ScheduleLabel>);

impl InternedScheduleLabel {
    pub fn label(&self) -> &dyn ScheduleLabel {
        &*self.0
    }
}

impl Debug for InternedScheduleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for InternedScheduleLabel {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_dyn_eq().dyn_eq(other.0.as_dyn_eq())
    }
}

impl Eq for InternedScheduleLabel {}

impl Hash for InternedScheduleLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

// an interned label is itself a label, so containers can be addressed with
// either form
impl ScheduleLabel for InternedScheduleLabel {
    fn dyn_clone(&self) -> Box<dyn ScheduleLabel> {
        self.0.dyn_clone()
    }

    fn as_dyn_eq(&self) -> &dyn DynEq {
        self.0.as_dyn_eq()
    }

    fn dyn_hash(&self, state: &mut dyn Hasher) {
        self.0.dyn_hash(state);
    }
}

/// Identifies a group of systems for ordering, conditions and containment.
/// Prefer `#[derive(SystemSet)]`.
pub trait SystemSet: Send + Sync + Debug + 'static {
    fn dyn_clone(&self) -> Box<dyn SystemSet>;
    fn as_dyn_eq(&self) -> &dyn DynEq;
    fn dyn_hash(&self, state: &mut dyn Hasher);

    /// `Some` for the per-system-type set every function system belongs to.
    fn system_type(&self) -> Option<TypeId> {
        None
    }

    /// `true` for compiler-generated sets backing tuple conditions.
    fn is_anonymous(&self) -> bool {
        false
    }

    fn intern(&self) -> InternedSystemSet
    where
        Self: Sized,
    {
        InternedSystemSet(Arc::from(self.dyn_clone()))
    }
}

/// A reference-counted, hashable [`SystemSet`].
#[derive(Clone)]
pub struct InternedSystemSet(Arc<dyn SystemSet>);

impl InternedSystemSet {
    pub fn set(&self) -> &dyn SystemSet {
        &*self.0
    }

    pub fn system_type(&self) -> Option<TypeId> {
        self.0.system_type()
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_anonymous()
    }
}

impl Debug for InternedSystemSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for InternedSystemSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_dyn_eq().dyn_eq(other.0.as_dyn_eq())
    }
}

impl Eq for InternedSystemSet {}

impl Hash for InternedSystemSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl SystemSet for InternedSystemSet {
    fn dyn_clone(&self) -> Box<dyn SystemSet> {
        self.0.dyn_clone()
    }

    fn as_dyn_eq(&self) -> &dyn DynEq {
        self.0.as_dyn_eq()
    }

    fn dyn_hash(&self, state: &mut dyn Hasher) {
        self.0.dyn_hash(state);
    }

    fn system_type(&self) -> Option<TypeId> {
        self.0.system_type()
    }

    fn is_anonymous(&self) -> bool {
        self.0.is_anonymous()
    }
}

/// The set owned by every instance of the system type `T`. Lets ordering
/// constraints name plain `fn` systems directly.
pub struct SystemTypeSet<T: 'static>(PhantomData<fn() -> T>);

impl<T: 'static> SystemTypeSet<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Debug for SystemTypeSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SystemTypeSet")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Clone for SystemTypeSet<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SystemTypeSet<T> {}

impl<T> PartialEq for SystemTypeSet<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Eq for SystemTypeSet<T> {}

impl<T> Hash for SystemTypeSet<T> {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl<T> SystemSet for SystemTypeSet<T> {
    fn dyn_clone(&self) -> Box<dyn SystemSet> {
        Box::new(*self)
    }

    fn as_dyn_eq(&self) -> &dyn DynEq {
        self
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<Self>().hash(&mut state);
    }

    fn system_type(&self) -> Option<TypeId> {
        Some(TypeId::of::<T>())
    }
}

/// A unique unnamed set, generated for tuples carrying collective run
/// conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AnonymousSet(usize);

static NEXT_ANONYMOUS_SET_ID: AtomicUsize = AtomicUsize::new(0);

impl AnonymousSet {
    pub(crate) fn new() -> Self {
        Self(NEXT_ANONYMOUS_SET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl SystemSet for AnonymousSet {
    fn dyn_clone(&self) -> Box<dyn SystemSet> {
        Box::new(*self)
    }

    fn as_dyn_eq(&self) -> &dyn DynEq {
        self
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<Self>().hash(&mut state);
        self.0.hash(&mut state);
    }

    fn is_anonymous(&self) -> bool {
        true
    }
}

/// Conversion of ordering targets into the set that represents them: a set
/// is itself; a function system is its [`SystemTypeSet`].
pub trait IntoSystemSet<Marker> {
    type Set: SystemSet + Clone;

    fn into_system_set(self) -> Self::Set;
}

impl<S: SystemSet + Clone> IntoSystemSet<()> for S {
    type Set = S;

    fn into_system_set(self) -> Self::Set {
        self
    }
}

/// Marker for the function-system [`IntoSystemSet`] impl.
pub struct IsFunctionSystemSet;

impl<Marker: 'static, F> IntoSystemSet<(IsFunctionSystemSet, Marker)> for F
where
    F: crate::system::SystemParamFunction<Marker>,
{
    type Set = SystemTypeSet<crate::system::FunctionSystem<Marker, F>>;

    fn into_system_set(self) -> Self::Set {
        SystemTypeSet::new()
    }
}

/// Marker for the exclusive-system [`IntoSystemSet`] impl.
pub struct IsExclusiveFunctionSystemSet;

impl<F> IntoSystemSet<(IsExclusiveFunctionSystemSet,)> for F
where
    F: FnMut(&mut crate::world::World) + Send + Sync + 'static,
{
    type Set = SystemTypeSet<crate::system::ExclusiveFunctionSystem<F>>;

    fn into_system_set(self) -> Self::Set {
        SystemTypeSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Physics;

    impl SystemSet for Physics {
        fn dyn_clone(&self) -> Box<dyn SystemSet> {
            Box::new(self.clone())
        }
        fn as_dyn_eq(&self) -> &dyn DynEq {
            self
        }
        fn dyn_hash(&self, mut state: &mut dyn Hasher) {
            TypeId::of::<Self>().hash(&mut state);
            self.hash(&mut state);
        }
    }

    #[test]
    fn interned_sets_compare_by_value() {
        let a = Physics.intern();
        let b = Physics.intern();
        assert_eq!(a, b);
        let anon_a = AnonymousSet::new().intern();
        let anon_b = AnonymousSet::new().intern();
        assert_ne!(anon_a, anon_b);
    }
}
