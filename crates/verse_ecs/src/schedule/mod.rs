//! Schedules: ordered, condition-gated graphs of systems, addressable by
//! label on the world.

mod condition;
mod config;
mod executor;
mod graph;
mod label;

pub use condition::{common_conditions, BoxedCondition, Condition};
pub use config::{
    Ambiguity, Dependency, DependencyKind, GraphInfo, IntoScheduleConfigs, ScheduleConfig,
    ScheduleConfigs, ScheduleSystem,
};
pub use executor::{ApplyDeferred, ExecutorKind};
pub use graph::{NodeId, ScheduleBuildError, ScheduleGraph, SystemSchedule};
pub use label::{
    AnonymousSet, InternedScheduleLabel, InternedSystemSet, IntoSystemSet, ScheduleLabel,
    SystemSet, SystemTypeSet,
};

use crate::change_detection::DetectChangesMut;
use crate::component::{Component, ComponentId};
use crate::resource::Resource;
use crate::system::System;
use crate::tick::Tick;
use crate::world::World;
use executor::{make_executor, SystemExecutor};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// An ordered, condition-gated collection of systems.
pub struct Schedule {
    label: InternedScheduleLabel,
    graph: ScheduleGraph,
    executable: SystemSchedule,
    executor: Box<dyn SystemExecutor>,
}

impl Schedule {
    pub fn new(label: impl ScheduleLabel + Clone) -> Self {
        Self {
            label: label.intern(),
            graph: ScheduleGraph::default(),
            executable: SystemSchedule::default(),
            executor: make_executor(ExecutorKind::default()),
        }
    }

    #[inline]
    pub fn label(&self) -> &InternedScheduleLabel {
        &self.label
    }

    /// Adds systems (or tuples of systems, with ordering combinators).
    pub fn add_systems<M>(
        &mut self,
        systems: impl IntoScheduleConfigs<ScheduleSystem, M>,
    ) -> &mut Self {
        self.graph.add_systems(systems.into_configs());
        self
    }

    /// Configures sets: membership, ordering and conditions.
    pub fn configure_sets<M>(
        &mut self,
        sets: impl IntoScheduleConfigs<InternedSystemSet, M>,
    ) -> &mut Self {
        self.graph.configure_sets(sets.into_configs());
        self
    }

    pub fn set_executor_kind(&mut self, kind: ExecutorKind) -> &mut Self {
        if kind != self.executor.kind() {
            self.executor = make_executor(kind);
        }
        self
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        self.executor.kind()
    }

    /// Disables the implicit deferred-buffer flush at the end of the
    /// schedule.
    pub fn set_apply_final_deferred(&mut self, apply: bool) -> &mut Self {
        self.executor.set_apply_final_deferred(apply);
        self
    }

    pub fn graph(&self) -> &ScheduleGraph {
        &self.graph
    }

    /// Rebuilds the executable if the graph changed. Surfaces every build
    /// diagnostic as a typed error.
    pub fn initialize(&mut self, world: &mut World) -> Result<(), ScheduleBuildError> {
        if !self.graph.changed {
            return Ok(());
        }
        self.graph.restore(&mut self.executable);
        for node in &mut self.graph.systems {
            if let Some(system) = node.system.as_mut() {
                system.initialize(world);
            }
            for condition in &mut node.conditions {
                condition.initialize(world);
            }
        }
        for conditions in &mut self.graph.system_set_conditions {
            for condition in conditions {
                condition.initialize(world);
            }
        }
        let ignored = world
            .get_resource::<Schedules>()
            .map(|schedules| schedules.ignored_scheduling_ambiguities.clone())
            .unwrap_or_default();
        self.executable = self.graph.build(world.components(), &ignored)?;
        Ok(())
    }

    /// Runs every system once, then advances the world tick.
    ///
    /// The tick moves exactly once per run, at the tick boundary: every
    /// system in the run observes the same tick, and writes made between
    /// runs land on the next tick, strictly newer than any system's last
    /// run.
    ///
    /// Panics if the schedule fails to build.
    pub fn run(&mut self, world: &mut World) {
        if let Err(error) = self.initialize(world) {
            panic!("failed to build schedule {:?}: {error}", self.label);
        }
        self.executor.run(&mut self.executable, world);
        world.increment_change_tick();
    }

    /// Rebases the last-run ticks of every system and condition.
    pub(crate) fn check_change_ticks(&mut self, current: Tick) {
        for system in &mut self.executable.systems {
            system.check_change_tick(current);
        }
        for conditions in &mut self.executable.system_conditions {
            for condition in conditions {
                condition.check_change_tick(current);
            }
        }
        for conditions in &mut self.executable.set_conditions {
            for condition in conditions {
                condition.check_change_tick(current);
            }
        }
    }
}

/// Failure to run a schedule by label.
#[derive(Error, Debug)]
pub enum TryRunScheduleError {
    #[error("the Schedules resource does not exist on this world")]
    NoSchedules,
    #[error(
        "schedule {0} cannot run: it is not in the Schedules container \
         (is it already running? re-entering a running schedule is an error)"
    )]
    ScheduleNotFound(String),
}

/// World-hosted map from label to [`Schedule`].
#[derive(Default)]
pub struct Schedules {
    inner: HashMap<InternedScheduleLabel, Schedule>,
    /// Component ids whose access conflicts never count as ambiguities.
    pub ignored_scheduling_ambiguities: BTreeSet<ComponentId>,
}

impl Resource for Schedules {}

impl Schedules {
    /// Inserts a schedule, returning the one previously under its label.
    pub fn insert(&mut self, schedule: Schedule) -> Option<Schedule> {
        self.inner.insert(schedule.label.clone(), schedule)
    }

    pub fn remove(&mut self, label: impl ScheduleLabel + Clone) -> Option<Schedule> {
        self.inner.remove(&label.intern())
    }

    pub fn contains(&self, label: impl ScheduleLabel + Clone) -> bool {
        self.inner.contains_key(&label.intern())
    }

    pub fn get(&self, label: impl ScheduleLabel + Clone) -> Option<&Schedule> {
        self.inner.get(&label.intern())
    }

    pub fn get_mut(&mut self, label: impl ScheduleLabel + Clone) -> Option<&mut Schedule> {
        self.inner.get_mut(&label.intern())
    }

    /// The schedule under `label`, created empty if absent.
    pub fn entry(&mut self, label: impl ScheduleLabel + Clone) -> &mut Schedule {
        self.inner
            .entry(label.intern())
            .or_insert_with_key(|interned| Schedule {
                label: interned.clone(),
                graph: ScheduleGraph::default(),
                executable: SystemSchedule::default(),
                executor: make_executor(ExecutorKind::default()),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InternedScheduleLabel, &Schedule)> {
        self.inner.iter()
    }

    /// Permits scheduling ambiguities on component `T` everywhere.
    pub fn allow_ambiguous_component<T: Component>(&mut self, world: &mut World) {
        let id = world.register_component::<T>();
        self.ignored_scheduling_ambiguities.insert(id);
    }

    /// Permits scheduling ambiguities on resource `T` everywhere.
    pub fn allow_ambiguous_resource<T: Resource>(&mut self, world: &mut World) {
        let id = world.register_resource::<T>();
        self.ignored_scheduling_ambiguities.insert(id);
    }

    pub(crate) fn check_change_ticks(&mut self, current: Tick) {
        for schedule in self.inner.values_mut() {
            schedule.check_change_ticks(current);
        }
    }
}

impl World {
    /// Inserts a schedule into the world's [`Schedules`] container,
    /// replacing any schedule under the same label.
    pub fn add_schedule(&mut self, schedule: Schedule) {
        self.init_resource::<Schedules>();
        self.resource_mut::<Schedules>().insert(schedule);
    }

    /// Temporarily removes the schedule under `label`, gives it to `f`
    /// together with the world, and puts it back. Systems inside may freely
    /// run *other* schedules by label; re-entering the same label errors
    /// because the schedule is absent while it runs.
    pub fn try_schedule_scope<R>(
        &mut self,
        label: impl ScheduleLabel + Clone,
        f: impl FnOnce(&mut World, &mut Schedule) -> R,
    ) -> Result<R, TryRunScheduleError> {
        let interned = label.intern();
        let Some(mut schedule) = self
            .get_resource_mut::<Schedules>()
            .and_then(|mut schedules| schedules.inner.remove(&interned))
        else {
            return if self.contains_resource::<Schedules>() {
                Err(TryRunScheduleError::ScheduleNotFound(format!("{interned:?}")))
            } else {
                Err(TryRunScheduleError::NoSchedules)
            };
        };
        let result = f(self, &mut schedule);
        let old = self
            .resource_mut::<Schedules>()
            .bypass_change_detection()
            .inner
            .insert(interned.clone(), schedule);
        assert!(
            old.is_none(),
            "schedule {interned:?} was inserted while it was running"
        );
        Ok(result)
    }

    /// Runs the schedule under `label` once.
    pub fn try_run_schedule(
        &mut self,
        label: impl ScheduleLabel + Clone,
    ) -> Result<(), TryRunScheduleError> {
        self.try_schedule_scope(label, |world, schedule| schedule.run(world))
    }

    /// Runs the schedule under `label` once, panicking if it is absent.
    #[track_caller]
    pub fn run_schedule(&mut self, label: impl ScheduleLabel + Clone) {
        if let Err(error) = self.try_run_schedule(label) {
            panic!("{error}");
        }
    }
}
