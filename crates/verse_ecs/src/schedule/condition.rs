//! Run conditions: read-only systems returning `bool`, evaluated by the
//! executor each tick before the gated system or set runs.

use crate::system::{IntoSystem, ReadOnlySystem};

/// A value convertible into a condition system. Conditions must be read-only
/// so the executor can evaluate them on the scheduling thread while systems
/// run.
pub trait Condition<Marker>: Sized {
    type System: ReadOnlySystem<In = (), Out = bool>;

    fn into_condition_system(self) -> Self::System;
}

impl<Marker, F> Condition<Marker> for F
where
    F: IntoSystem<(), bool, Marker>,
    F::System: ReadOnlySystem<In = (), Out = bool>,
{
    type System = F::System;

    fn into_condition_system(self) -> Self::System {
        IntoSystem::into_system(self)
    }
}

/// A boxed condition, gating a system or set.
pub type BoxedCondition = Box<dyn ReadOnlySystem<In = (), Out = bool>>;

pub(crate) fn new_condition<Marker>(condition: impl Condition<Marker>) -> BoxedCondition {
    Box::new(condition.into_condition_system())
}

/// Common reusable conditions.
pub mod common_conditions {
    use super::Condition;
    use crate::change_detection::{DetectChanges, Res};
    use crate::event::{Event, EventReader};
    use crate::resource::Resource;
    use crate::system::{Local, ReadOnlySystem};

    /// `true` on the first evaluation only.
    pub fn run_once() -> impl FnMut(Local<bool>) -> bool + Clone {
        |mut has_run: Local<bool>| {
            if *has_run {
                false
            } else {
                *has_run = true;
                true
            }
        }
    }

    /// `true` while the resource exists.
    pub fn resource_exists<T: Resource>() -> impl FnMut(Option<Res<T>>) -> bool + Clone {
        |resource: Option<Res<T>>| resource.is_some()
    }

    /// `true` when the resource exists and changed since the condition's
    /// last evaluation.
    pub fn resource_changed<T: Resource>() -> impl FnMut(Option<Res<T>>) -> bool + Clone {
        |resource: Option<Res<T>>| resource.is_some_and(|resource| resource.is_changed())
    }

    /// `true` when the resource exists and equals `value`.
    pub fn resource_equals<T: Resource + PartialEq>(
        value: T,
    ) -> impl FnMut(Option<Res<T>>) -> bool + Clone
    where
        T: Clone,
    {
        move |resource: Option<Res<T>>| resource.is_some_and(|resource| *resource == value)
    }

    /// `true` while there are unread events of type `E`.
    pub fn on_event<E: Event>() -> impl FnMut(EventReader<E>) -> bool + Clone {
        |mut reader: EventReader<E>| reader.read().count() > 0
    }

    /// Inverts another condition.
    pub fn not<Marker, C>(condition: C) -> NotSystem<C::System>
    where
        C: Condition<Marker>,
    {
        NotSystem(condition.into_condition_system())
    }

    /// See [`not`].
    pub struct NotSystem<S: ReadOnlySystem<In = (), Out = bool>>(S);

    impl<S: ReadOnlySystem<In = (), Out = bool>> crate::system::System for NotSystem<S> {
        type In = ();
        type Out = bool;

        fn name(&self) -> std::borrow::Cow<'static, str> {
            format!("!{}", self.0.name()).into()
        }

        fn component_access(&self) -> &crate::access::FilteredAccessSet {
            self.0.component_access()
        }

        fn is_exclusive(&self) -> bool {
            self.0.is_exclusive()
        }

        fn has_deferred(&self) -> bool {
            self.0.has_deferred()
        }

        fn initialize(&mut self, world: &mut crate::world::World) {
            self.0.initialize(world);
        }

        unsafe fn run_unsafe(
            &mut self,
            input: Self::In,
            world: crate::world::UnsafeWorldCell,
        ) -> Self::Out {
            !self.0.run_unsafe(input, world)
        }

        fn apply_deferred(&mut self, world: &mut crate::world::World) {
            self.0.apply_deferred(world);
        }

        fn last_run(&self) -> crate::tick::Tick {
            self.0.last_run()
        }

        fn set_last_run(&mut self, tick: crate::tick::Tick) {
            self.0.set_last_run(tick);
        }

        fn check_change_tick(&mut self, current: crate::tick::Tick) {
            self.0.check_change_tick(current);
        }
    }

    // SAFETY: delegates to a read-only system
    unsafe impl<S: ReadOnlySystem<In = (), Out = bool>> ReadOnlySystem for NotSystem<S> {}
}
