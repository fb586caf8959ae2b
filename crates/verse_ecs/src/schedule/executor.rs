//! Schedule executors.
//!
//! Both executors implement the same per-tick state machine: every system
//! moves to `Complete`, either by running, by being skipped by a false
//! condition (its own or one of its sets'), or by being the `ApplyDeferred`
//! barrier. A panicking system is logged and counts as complete; the tick
//! continues.

use super::graph::SystemSchedule;
use crate::access::FilteredAccessSet;
use crate::bitset::BitSet;
use crate::system::System;
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use parking_lot::{Condvar, Mutex};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Which executor a schedule runs on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExecutorKind {
    /// Runs systems one at a time, in topological order, on the calling
    /// thread.
    #[default]
    SingleThreaded,
    /// Runs non-conflicting systems concurrently on a pool of worker
    /// threads. Conditions, exclusive systems and deferred application stay
    /// on the scheduling thread.
    MultiThreaded,
}

pub(crate) trait SystemExecutor: Send + Sync {
    fn kind(&self) -> ExecutorKind;
    fn set_apply_final_deferred(&mut self, apply: bool);
    fn run(&mut self, schedule: &mut SystemSchedule, world: &mut World);
}

pub(crate) fn make_executor(kind: ExecutorKind) -> Box<dyn SystemExecutor> {
    match kind {
        ExecutorKind::SingleThreaded => Box::new(SingleThreadedExecutor::default()),
        ExecutorKind::MultiThreaded => Box::new(MultiThreadedExecutor::default()),
    }
}

/// The flush-barrier pseudo-system. Add it to a schedule to force all
/// deferred buffers recorded by earlier systems to apply at that point.
pub struct ApplyDeferred;

impl System for ApplyDeferred {
    type In = ();
    type Out = ();

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("apply_deferred")
    }

    fn component_access(&self) -> &FilteredAccessSet {
        static EMPTY: std::sync::OnceLock<FilteredAccessSet> = std::sync::OnceLock::new();
        EMPTY.get_or_init(FilteredAccessSet::default)
    }

    fn is_exclusive(&self) -> bool {
        // takes the world lock while buffers apply
        true
    }

    fn has_deferred(&self) -> bool {
        false
    }

    fn initialize(&mut self, _world: &mut World) {}

    unsafe fn run_unsafe(&mut self, _input: (), _world: UnsafeWorldCell) {}

    fn apply_deferred(&mut self, _world: &mut World) {}

    fn is_apply_deferred(&self) -> bool {
        true
    }

    fn last_run(&self) -> Tick {
        Tick::new(0)
    }

    fn set_last_run(&mut self, _tick: Tick) {}

    fn check_change_tick(&mut self, _current: Tick) {}
}

/// Runs a condition with exclusive world access, containing panics (a
/// panicking condition counts as `false`).
fn evaluate_condition(
    condition: &mut super::condition::BoxedCondition,
    world: &mut World,
    this_run: Tick,
) -> bool {
    condition.initialize(world);
    let result = catch_unwind(AssertUnwindSafe(|| condition.run((), world)));
    condition.set_last_run(this_run);
    match result {
        Ok(value) => value,
        Err(_) => {
            log::error!("condition {} panicked; treating as false", condition.name());
            false
        }
    }
}

fn log_system_panic(name: &str) {
    log::error!("system {name} panicked; continuing with the rest of the tick");
}

#[derive(Default)]
pub(crate) struct SingleThreadedExecutor {
    completed: BitSet,
    evaluated_sets: BitSet,
    unapplied: BitSet,
    skip_final_deferred: bool,
}

impl SystemExecutor for SingleThreadedExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::SingleThreaded
    }

    fn set_apply_final_deferred(&mut self, apply: bool) {
        self.skip_final_deferred = !apply;
    }

    fn run(&mut self, schedule: &mut SystemSchedule, world: &mut World) {
        let this_run = world.change_tick();
        for position in 0..schedule.systems.len() {
            if self.completed.contains(position) {
                continue;
            }

            // evaluate the conditions of every not-yet-evaluated set this
            // system belongs to; a false set skips all of its members
            let member_of = schedule.sets_with_conditions_of_systems[position].clone();
            for set in member_of.ones() {
                if self.evaluated_sets.contains(set) {
                    continue;
                }
                self.evaluated_sets.insert(set);
                let mut set_passed = true;
                for condition in &mut schedule.set_conditions[set] {
                    if !evaluate_condition(condition, world, this_run) {
                        set_passed = false;
                    }
                }
                if !set_passed {
                    self.completed
                        .union_with(&schedule.systems_in_sets_with_conditions[set]);
                }
            }
            if self.completed.contains(position) {
                continue;
            }

            let mut should_run = true;
            for condition in &mut schedule.system_conditions[position] {
                if !evaluate_condition(condition, world, this_run) {
                    should_run = false;
                }
            }
            self.completed.insert(position);
            if !should_run {
                continue;
            }

            if schedule.systems[position].is_apply_deferred() {
                self.flush_deferred(schedule, world);
                continue;
            }

            let result = catch_unwind(AssertUnwindSafe(|| {
                schedule.systems[position].run((), world);
            }));
            let system = &mut schedule.systems[position];
            system.set_last_run(this_run);
            if result.is_err() {
                log_system_panic(&system.name());
                continue;
            }
            if system.has_deferred() {
                self.unapplied.insert(position);
            }
        }

        if !self.skip_final_deferred {
            self.flush_deferred(schedule, world);
        }
        self.completed.clear();
        self.evaluated_sets.clear();
    }
}

impl SingleThreadedExecutor {
    fn flush_deferred(&mut self, schedule: &mut SystemSchedule, world: &mut World) {
        let unapplied = std::mem::take(&mut self.unapplied);
        for position in unapplied.ones() {
            schedule.systems[position].apply_deferred(world);
        }
    }
}

// ----- parallel executor ----------------------------------------------------

/// Shareable pointer into the schedule's system array. Workers receive slot
/// indices and resolve them through this base pointer.
#[derive(Clone, Copy)]
struct SystemsPtr(*mut super::config::ScheduleSystem);

// SAFETY: the scheduling thread dispatches each slot to at most one worker
// at a time and never touches a dispatched slot itself.
unsafe impl Send for SystemsPtr {}
unsafe impl Sync for SystemsPtr {}

impl SystemsPtr {
    /// # Safety
    /// `position` must be in bounds and exclusively owned by the caller.
    unsafe fn add(self, position: usize) -> *mut super::config::ScheduleSystem {
        self.0.add(position)
    }
}

enum Task {
    Run(usize),
    Exit,
}

struct WorkerShared {
    tasks: Mutex<VecDeque<Task>>,
    task_available: Condvar,
}

/// Per-tick bookkeeping of the scheduling thread.
struct ExecState {
    deps_remaining: Vec<usize>,
    /// Slot consumed: ran, running, or skipped.
    started: BitSet,
    completed: BitSet,
    evaluated_sets: BitSet,
    unapplied: BitSet,
    running: Vec<usize>,
    completed_count: usize,
}

impl ExecState {
    /// Marks a never-started system complete (condition skip) and unblocks
    /// its dependents.
    fn skip(&mut self, position: usize, schedule: &SystemSchedule) {
        if self.started.contains(position) {
            return;
        }
        self.started.insert(position);
        self.completed.insert(position);
        self.completed_count += 1;
        for &dependent in &schedule.system_dependents[position] {
            self.deps_remaining[dependent] = self.deps_remaining[dependent].saturating_sub(1);
        }
    }

    /// Marks a started system finished and unblocks its dependents.
    fn finish(&mut self, position: usize, schedule: &SystemSchedule) {
        debug_assert!(self.started.contains(position));
        self.running.retain(|&running| running != position);
        self.completed.insert(position);
        self.completed_count += 1;
        for &dependent in &schedule.system_dependents[position] {
            self.deps_remaining[dependent] = self.deps_remaining[dependent].saturating_sub(1);
        }
    }
}

#[derive(Default)]
pub(crate) struct MultiThreadedExecutor {
    skip_final_deferred: bool,
    /// Cloned access sets and names, so admission can be checked while the
    /// owning systems are borrowed by workers.
    access: Vec<FilteredAccessSet>,
    names: Vec<String>,
}

impl SystemExecutor for MultiThreadedExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::MultiThreaded
    }

    fn set_apply_final_deferred(&mut self, apply: bool) {
        self.skip_final_deferred = !apply;
    }

    fn run(&mut self, schedule: &mut SystemSchedule, world: &mut World) {
        let num_systems = schedule.systems.len();
        if num_systems == 0 {
            return;
        }
        let this_run = world.change_tick();

        self.access = schedule
            .systems
            .iter()
            .map(|system| system.component_access().clone())
            .collect();
        self.names = schedule
            .systems
            .iter()
            .map(|system| system.name().into_owned())
            .collect();

        let mut state = ExecState {
            deps_remaining: schedule.system_dependencies.clone(),
            started: BitSet::new(),
            completed: BitSet::new(),
            evaluated_sets: BitSet::new(),
            unapplied: BitSet::new(),
            running: Vec::new(),
            completed_count: 0,
        };

        let (done_sender, done_receiver) = std::sync::mpsc::channel::<usize>();
        let shared = WorkerShared {
            tasks: Mutex::new(VecDeque::new()),
            task_available: Condvar::new(),
        };
        let worker_count = std::thread::available_parallelism()
            .map(|threads| threads.get())
            .unwrap_or(1)
            .min(num_systems);

        let systems_ptr = SystemsPtr(schedule.systems.as_mut_ptr());
        let world_cell = UnsafeWorldCell::new(world);
        let shared_ref = &shared;
        let names_ref = &self.names;

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let done = done_sender.clone();
                let systems_ptr = systems_ptr;
                scope.spawn(move || loop {
                    let task = {
                        let mut tasks = shared_ref.tasks.lock();
                        loop {
                            if let Some(task) = tasks.pop_front() {
                                break task;
                            }
                            shared_ref.task_available.wait(&mut tasks);
                        }
                    };
                    match task {
                        Task::Exit => break,
                        Task::Run(position) => {
                            // SAFETY: this slot is exclusively ours while
                            // dispatched
                            let system = unsafe { &mut *systems_ptr.add(position) };
                            let result = catch_unwind(AssertUnwindSafe(|| {
                                // SAFETY: admission checked declared access
                                // against everything running
                                unsafe { system.run_unsafe((), world_cell) };
                            }));
                            if result.is_err() {
                                log_system_panic(&names_ref[position]);
                            }
                            let _ = done.send(position);
                        }
                    }
                });
            }

            while state.completed_count < num_systems {
                let mut progressed = true;
                while progressed {
                    progressed = false;
                    for position in 0..num_systems {
                        if state.started.contains(position)
                            || state.deps_remaining[position] > 0
                        {
                            continue;
                        }

                        let pending_set_conditions = schedule.sets_with_conditions_of_systems
                            [position]
                            .ones()
                            .any(|set| !state.evaluated_sets.contains(set));
                        let has_conditions = pending_set_conditions
                            || !schedule.system_conditions[position].is_empty();
                        // SAFETY: slot not dispatched; metadata read only
                        let system = unsafe { &*systems_ptr.add(position) };
                        let needs_world = has_conditions
                            || system.is_exclusive()
                            || system.is_apply_deferred();

                        if needs_world {
                            if !state.running.is_empty() {
                                continue;
                            }
                            // SAFETY: nothing is running; the world is ours
                            let world = unsafe { world_cell.world_mut() };
                            Self::run_on_scheduling_thread(
                                schedule, world, position, &mut state, this_run,
                            );
                            progressed = true;
                            continue;
                        }

                        // admission: declared access must be compatible with
                        // every running system's
                        if !state.running.iter().all(|&other| {
                            self.access[position].is_compatible(&self.access[other])
                        }) {
                            continue;
                        }

                        state.started.insert(position);
                        state.running.push(position);
                        shared_ref.tasks.lock().push_back(Task::Run(position));
                        shared_ref.task_available.notify_one();
                        progressed = true;
                    }
                }

                if state.completed_count >= num_systems {
                    break;
                }
                assert!(
                    !state.running.is_empty(),
                    "schedule executor stalled: no system is runnable or running"
                );

                // wait for at least one completion, then drain the rest
                let position = done_receiver.recv().expect("workers alive");
                Self::finish_worker_system(schedule, position, this_run, systems_ptr, &mut state);
                while let Ok(position) = done_receiver.try_recv() {
                    Self::finish_worker_system(schedule, position, this_run, systems_ptr, &mut state);
                }
            }

            {
                let mut tasks = shared_ref.tasks.lock();
                for _ in 0..worker_count {
                    tasks.push_back(Task::Exit);
                }
            }
            shared_ref.task_available.notify_all();
        });

        if !self.skip_final_deferred {
            let unapplied = std::mem::take(&mut state.unapplied);
            for position in unapplied.ones() {
                schedule.systems[position].apply_deferred(world);
            }
        }
    }
}

impl MultiThreadedExecutor {
    /// Evaluates conditions for `position` and, if they pass, runs it here
    /// on the scheduling thread. Exclusive systems and `ApplyDeferred` only
    /// ever run through this path. Requires that nothing is running.
    fn run_on_scheduling_thread(
        schedule: &mut SystemSchedule,
        world: &mut World,
        position: usize,
        state: &mut ExecState,
        this_run: Tick,
    ) {
        let member_of = schedule.sets_with_conditions_of_systems[position].clone();
        for set in member_of.ones() {
            if state.evaluated_sets.contains(set) {
                continue;
            }
            state.evaluated_sets.insert(set);
            let mut set_passed = true;
            for condition in &mut schedule.set_conditions[set] {
                if !evaluate_condition(condition, world, this_run) {
                    set_passed = false;
                }
            }
            if !set_passed {
                let members = schedule.systems_in_sets_with_conditions[set].clone();
                for member in members.ones() {
                    state.skip(member, schedule);
                }
            }
        }
        if state.completed.contains(position) {
            return;
        }

        let mut should_run = true;
        for condition in &mut schedule.system_conditions[position] {
            if !evaluate_condition(condition, world, this_run) {
                should_run = false;
            }
        }
        if !should_run {
            state.skip(position, schedule);
            return;
        }

        if schedule.systems[position].is_apply_deferred() {
            let unapplied = std::mem::take(&mut state.unapplied);
            for unapplied_position in unapplied.ones() {
                schedule.systems[unapplied_position].apply_deferred(world);
            }
            state.started.insert(position);
            state.finish(position, schedule);
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            schedule.systems[position].run((), world);
        }));
        let system = &mut schedule.systems[position];
        system.set_last_run(this_run);
        if result.is_err() {
            log_system_panic(&system.name());
        } else if system.has_deferred() {
            state.unapplied.insert(position);
        }
        state.started.insert(position);
        state.finish(position, schedule);
    }

    /// Bookkeeping after a worker reports a system done.
    fn finish_worker_system(
        schedule: &SystemSchedule,
        position: usize,
        this_run: Tick,
        systems_ptr: SystemsPtr,
        state: &mut ExecState,
    ) {
        // SAFETY: the worker released the slot by reporting completion
        let system = unsafe { &mut *systems_ptr.add(position) };
        system.set_last_run(this_run);
        if system.has_deferred() {
            state.unapplied.insert(position);
        }
        state.finish(position, schedule);
    }
}
