//! Systems built from plain functions whose arguments are [`SystemParam`]s.

use crate::access::FilteredAccessSet;
use crate::system::system_param::SystemMeta;
use crate::system::{
    IntoSystem, ReadOnlySystem, ReadOnlySystemParam, System, SystemParam, SystemParamItem,
};
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use std::borrow::Cow;
use std::marker::PhantomData;
use variadics_please::all_tuples;

/// A function that can run as a system once its params are materialized.
/// Implemented for all `fn(P0, .., Pn) -> Out` where each `Pi: SystemParam`.
pub trait SystemParamFunction<Marker>: Send + Sync + 'static {
    type In;
    type Out;
    type Param: SystemParam;

    fn run(&mut self, input: Self::In, param_value: SystemParamItem<Self::Param>) -> Self::Out;
}

/// The [`System`] wrapper around a [`SystemParamFunction`].
pub struct FunctionSystem<Marker, F>
where
    F: SystemParamFunction<Marker>,
{
    func: F,
    state: Option<<F::Param as SystemParam>::State>,
    meta: SystemMeta,
    marker: PhantomData<fn() -> Marker>,
}

/// Marker distinguishing the function-system [`IntoSystem`] impl.
pub struct IsFunctionSystem;

impl<Marker, F> IntoSystem<F::In, F::Out, (IsFunctionSystem, Marker)> for F
where
    Marker: 'static,
    F: SystemParamFunction<Marker>,
{
    type System = FunctionSystem<Marker, F>;

    fn into_system(func: Self) -> Self::System {
        FunctionSystem {
            func,
            state: None,
            meta: SystemMeta::new(Cow::Borrowed(std::any::type_name::<F>())),
            marker: PhantomData,
        }
    }
}

impl<Marker, F> System for FunctionSystem<Marker, F>
where
    Marker: 'static,
    F: SystemParamFunction<Marker>,
{
    type In = F::In;
    type Out = F::Out;

    fn name(&self) -> Cow<'static, str> {
        self.meta.name.clone()
    }

    fn component_access(&self) -> &FilteredAccessSet {
        &self.meta.component_access_set
    }

    fn is_exclusive(&self) -> bool {
        false
    }

    fn has_deferred(&self) -> bool {
        self.meta.has_deferred
    }

    fn initialize(&mut self, world: &mut World) {
        if self.state.is_some() {
            return;
        }
        self.state = Some(F::Param::init_state(world, &mut self.meta));
        // everything that exists counts as added/changed on the first run
        self.meta.last_run = world.change_tick().relative_to(Tick::MAX);
    }

    unsafe fn run_unsafe(&mut self, input: Self::In, world: UnsafeWorldCell) -> Self::Out {
        let state = self
            .state
            .as_mut()
            .expect("system was run before being initialized");
        // SAFETY: reading the tick counter races with nothing; the executor
        // only advances it between runs
        let this_run = world.world().change_tick();
        // SAFETY: the caller guarantees the declared access is available
        let params = F::Param::get_param(state, &self.meta, world, this_run);
        self.func.run(input, params)
    }

    fn apply_deferred(&mut self, world: &mut World) {
        if let Some(state) = self.state.as_mut() {
            F::Param::apply(state, world);
        }
    }

    fn last_run(&self) -> Tick {
        self.meta.last_run
    }

    fn set_last_run(&mut self, tick: Tick) {
        self.meta.last_run = tick;
    }

    fn check_change_tick(&mut self, current: Tick) {
        self.meta.last_run.check_tick(current);
    }

    fn type_set(&self) -> Option<crate::schedule::InternedSystemSet> {
        use crate::schedule::{SystemSet, SystemTypeSet};
        Some(SystemTypeSet::<Self>::new().intern())
    }
}

// SAFETY: read-only params never register writes
unsafe impl<Marker, F> ReadOnlySystem for FunctionSystem<Marker, F>
where
    Marker: 'static,
    F: SystemParamFunction<Marker>,
    F::Param: ReadOnlySystemParam,
{
}

macro_rules! impl_system_function {
    ($(#[$meta:meta])* $($param: ident),*) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        impl<Out, Func: Send + Sync + 'static, $($param: SystemParam),*>
            SystemParamFunction<fn($($param,)*) -> Out> for Func
        where
            for<'a> &'a mut Func:
                FnMut($($param),*) -> Out +
                FnMut($(SystemParamItem<$param>),*) -> Out,
            Out: 'static,
        {
            type In = ();
            type Out = Out;
            type Param = ($($param,)*);

            #[inline]
            fn run(&mut self, _input: (), param_value: SystemParamItem<($($param,)*)>) -> Out {
                // a separate fn pins down the HRTB-bound call
                #[allow(clippy::too_many_arguments)]
                fn call_inner<Out, $($param),*>(
                    mut f: impl FnMut($($param),*) -> Out,
                    $($param: $param),*
                ) -> Out {
                    f($($param),*)
                }
                let ($($param,)*) = param_value;
                call_inner(self, $($param),*)
            }
        }
    };
}

all_tuples!(impl_system_function, 0, 16, P);
