//! The `Main` schedule and the ordered sub-schedules it drives.

use crate::time::{FixedTime, Time};
use crate::{App, Plugin};
use verse_ecs::prelude::*;
use verse_ecs::schedule::InternedScheduleLabel;

/// The schedule that contains the app logic run on every
/// [`App::update`](crate::App::update).
///
/// On its first run it executes the startup list ([`PreStartup`],
/// [`Startup`], [`PostStartup`]) once; on every run it executes the main
/// list in [`MainScheduleOrder`].
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Main;

/// Runs once, before [`Startup`].
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PreStartup;

/// Runs once, when the app starts.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Startup;

/// Runs once, after [`Startup`].
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PostStartup;

/// First schedule of every tick. Event queues rotate here.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct First;

/// Engine preparation work that must precede [`Update`].
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PreUpdate;

/// Runs [`FixedMain`] zero or more times, driven by the accumulated
/// overstep of the virtual clock.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct RunFixedMainLoop;

/// The fixed-timestep counterpart of [`Main`]; executes the
/// [`FixedMainScheduleOrder`] list each fixed tick.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FixedMain;

/// First schedule of every fixed tick.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FixedFirst;

/// Fixed-rate gameplay logic.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FixedUpdate;

/// Last schedule of every fixed tick.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FixedLast;

/// Per-frame gameplay logic.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Update;

/// Engine response work that must follow [`Update`].
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PostUpdate;

/// Last schedule of every tick.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Last;

/// The ordered schedule lists the [`Main`] schedule executes.
#[derive(Resource, Debug)]
pub struct MainScheduleOrder {
    /// Labels run every tick, in order.
    pub labels: Vec<InternedScheduleLabel>,
    /// Labels run once on the first tick, in order.
    pub startup_labels: Vec<InternedScheduleLabel>,
}

impl Default for MainScheduleOrder {
    fn default() -> Self {
        Self {
            labels: vec![
                First.intern(),
                PreUpdate.intern(),
                RunFixedMainLoop.intern(),
                Update.intern(),
                PostUpdate.intern(),
                Last.intern(),
            ],
            startup_labels: vec![PreStartup.intern(), Startup.intern(), PostStartup.intern()],
        }
    }
}

impl MainScheduleOrder {
    /// Inserts `schedule` to run after `after` in the main list.
    pub fn insert_after(&mut self, after: impl ScheduleLabel + Clone, schedule: impl ScheduleLabel + Clone) {
        let interned = after.intern();
        let index = self
            .labels
            .iter()
            .position(|label| *label == interned)
            .unwrap_or_else(|| panic!("expected {interned:?} in the main schedule order"));
        self.labels.insert(index + 1, schedule.intern());
    }

    /// Inserts `schedule` to run before `before` in the main list.
    pub fn insert_before(&mut self, before: impl ScheduleLabel + Clone, schedule: impl ScheduleLabel + Clone) {
        let interned = before.intern();
        let index = self
            .labels
            .iter()
            .position(|label| *label == interned)
            .unwrap_or_else(|| panic!("expected {interned:?} in the main schedule order"));
        self.labels.insert(index, schedule.intern());
    }
}

/// The ordered schedule list the [`FixedMain`] schedule executes.
#[derive(Resource, Debug)]
pub struct FixedMainScheduleOrder {
    pub labels: Vec<InternedScheduleLabel>,
}

impl Default for FixedMainScheduleOrder {
    fn default() -> Self {
        Self {
            labels: vec![FixedFirst.intern(), FixedUpdate.intern(), FixedLast.intern()],
        }
    }
}

#[derive(Resource, Default)]
struct StartupHasRun(bool);

impl Main {
    /// Drives the startup list (once) and the main list (every run).
    pub fn run_main(world: &mut World) {
        if !world
            .get_resource::<StartupHasRun>()
            .map(|ran| ran.0)
            .unwrap_or(true)
        {
            world.resource_scope(|world, order: Mut<MainScheduleOrder>| {
                for label in &order.startup_labels {
                    let _ = world.try_run_schedule(label.clone());
                }
            });
            world.resource_mut::<StartupHasRun>().0 = true;
        }
        world.resource_scope(|world, order: Mut<MainScheduleOrder>| {
            for label in &order.labels {
                let _ = world.try_run_schedule(label.clone());
            }
        });
    }
}

impl FixedMain {
    /// Runs the fixed-tick schedule list once.
    pub fn run_fixed_main(world: &mut World) {
        world.resource_scope(|world, order: Mut<FixedMainScheduleOrder>| {
            for label in &order.labels {
                let _ = world.try_run_schedule(label.clone());
            }
        });
    }
}

/// Runs [`FixedMain`] once per period of accumulated virtual time.
pub fn run_fixed_main_loop(world: &mut World) {
    let Some(delta) = world.get_resource::<Time>().map(Time::delta) else {
        return;
    };
    if !world.contains_resource::<FixedTime>() {
        return;
    }
    world.resource_mut::<FixedTime>().accumulate(delta);
    loop {
        let expended = world.resource_mut::<FixedTime>().expend();
        if !expended {
            break;
        }
        let _ = world.try_run_schedule(FixedMain);
    }
}

/// Initializes the [`Main`] schedule, its sub-schedule orders, and the fixed
/// main loop.
pub struct MainSchedulePlugin;

impl Plugin for MainSchedulePlugin {
    fn build(&self, app: &mut App) {
        // facilitator schedules stay single-threaded; they only dispatch
        let mut main_schedule = Schedule::new(Main);
        main_schedule.set_executor_kind(ExecutorKind::SingleThreaded);
        let mut fixed_main_schedule = Schedule::new(FixedMain);
        fixed_main_schedule.set_executor_kind(ExecutorKind::SingleThreaded);
        let mut fixed_loop_schedule = Schedule::new(RunFixedMainLoop);
        fixed_loop_schedule.set_executor_kind(ExecutorKind::SingleThreaded);

        app.add_schedule(main_schedule)
            .add_schedule(fixed_main_schedule)
            .add_schedule(fixed_loop_schedule)
            .init_resource::<MainScheduleOrder>()
            .init_resource::<FixedMainScheduleOrder>()
            .init_resource::<StartupHasRun>()
            .add_systems(Main, Main::run_main)
            .add_systems(FixedMain, FixedMain::run_fixed_main)
            .add_systems(RunFixedMainLoop, run_fixed_main_loop);
    }
}
