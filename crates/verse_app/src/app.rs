//! The application shell: a world, the schedules that run against it, and
//! the plugin lifecycle.

use crate::main_schedule::{First, Main, MainSchedulePlugin};
use crate::plugin::{Plugin, Plugins, PluginsState};
use crate::time::TimePlugin;
use std::collections::HashSet;
use thiserror::Error;
use verse_ecs::event::event_update_system;
use verse_ecs::prelude::*;
use verse_ecs::resource::FromWorld;
use verse_ecs::schedule::{InternedSystemSet, ScheduleSystem};

/// Message requesting the app to leave its run loop.
#[derive(Event, Clone, Debug, Default, Eq, PartialEq)]
pub enum AppExit {
    /// Orderly shutdown.
    #[default]
    Success,
    /// Shutdown with a process error code.
    Error(u8),
}

impl AppExit {
    pub fn error() -> Self {
        Self::Error(1)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Adding the same unique plugin twice.
#[derive(Error, Debug)]
#[error("plugin {name} was already added to the app")]
pub struct DuplicatePluginError {
    pub name: String,
}

/// A world plus the machinery to configure and run it.
pub struct App {
    world: World,
    runner: Option<Box<dyn FnOnce(App) -> AppExit + Send>>,
    plugin_registry: Vec<Box<dyn Plugin>>,
    plugin_names: HashSet<String>,
    plugins_state: PluginsState,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// An app with the main-schedule driver and virtual time installed.
    pub fn new() -> Self {
        let mut app = Self::empty();
        app.add_plugins((MainSchedulePlugin, TimePlugin));
        app.add_event::<AppExit>();
        app
    }

    /// An app with nothing installed at all.
    pub fn empty() -> Self {
        let mut world = World::new();
        world.init_resource::<Schedules>();
        Self {
            world,
            runner: None,
            plugin_registry: Vec::new(),
            plugin_names: HashSet::new(),
            plugins_state: PluginsState::Adding,
        }
    }

    #[inline]
    pub fn world(&self) -> &World {
        &self.world
    }

    #[inline]
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    // ----- configuration ----------------------------------------------------

    /// Adds systems to the schedule under `label`, creating it if needed.
    pub fn add_systems<M>(
        &mut self,
        label: impl ScheduleLabel + Clone,
        systems: impl IntoScheduleConfigs<ScheduleSystem, M>,
    ) -> &mut Self {
        let mut schedules = self.world.resource_mut::<Schedules>();
        schedules.entry(label).add_systems(systems);
        self
    }

    /// Configures system sets in the schedule under `label`.
    pub fn configure_sets<M>(
        &mut self,
        label: impl ScheduleLabel + Clone,
        sets: impl IntoScheduleConfigs<InternedSystemSet, M>,
    ) -> &mut Self {
        let mut schedules = self.world.resource_mut::<Schedules>();
        schedules.entry(label).configure_sets(sets);
        self
    }

    /// Inserts a pre-built schedule, replacing any under the same label.
    pub fn add_schedule(&mut self, schedule: Schedule) -> &mut Self {
        self.world.add_schedule(schedule);
        self
    }

    pub fn insert_resource<R: Resource>(&mut self, resource: R) -> &mut Self {
        self.world.insert_resource(resource);
        self
    }

    pub fn init_resource<R: Resource + FromWorld>(&mut self) -> &mut Self {
        self.world.init_resource::<R>();
        self
    }

    /// Registers the event type `E`: its queue resource plus the frame
    /// rotation in [`First`].
    pub fn add_event<E: Event>(&mut self) -> &mut Self {
        if !self.world.contains_resource::<Events<E>>() {
            self.world.init_resource::<Events<E>>();
            self.add_systems(First, event_update_system::<E>);
        }
        self
    }

    // ----- plugins ----------------------------------------------------------

    /// Adds one plugin or a tuple of plugins, running their `build` hooks
    /// immediately.
    #[track_caller]
    pub fn add_plugins<M>(&mut self, plugins: impl Plugins<M>) -> &mut Self {
        assert!(
            matches!(self.plugins_state, PluginsState::Adding),
            "plugins cannot be added after App::run started the lifecycle"
        );
        plugins.add_to_app(self);
        self
    }

    pub(crate) fn add_boxed_plugin(&mut self, plugin: Box<dyn Plugin>) {
        if let Err(error) = self.try_add_boxed_plugin(plugin) {
            panic!("{error}");
        }
    }

    fn try_add_boxed_plugin(
        &mut self,
        plugin: Box<dyn Plugin>,
    ) -> Result<(), DuplicatePluginError> {
        if plugin.is_unique() && !self.plugin_names.insert(plugin.name().to_string()) {
            return Err(DuplicatePluginError {
                name: plugin.name().to_string(),
            });
        }
        plugin.build(self);
        self.plugin_registry.push(plugin);
        Ok(())
    }

    /// `true` if a plugin of type `P` was added.
    pub fn is_plugin_added<P: Plugin>(&self) -> bool {
        self.plugin_registry
            .iter()
            .any(|plugin| plugin.downcast_ref::<P>().is_some())
    }

    pub fn plugins_state(&self) -> PluginsState {
        self.plugins_state
    }

    fn plugins_ready(&self) -> bool {
        self.plugin_registry
            .iter()
            .all(|plugin| plugin.ready(self))
    }

    /// Runs `finish` for every plugin. Called by [`App::run`] once all
    /// plugins are ready.
    pub fn finish(&mut self) {
        let plugins = std::mem::take(&mut self.plugin_registry);
        for plugin in &plugins {
            plugin.finish(self);
        }
        self.plugin_registry = plugins;
        self.plugins_state = PluginsState::Finished;
    }

    /// Runs `cleanup` for every plugin.
    pub fn cleanup(&mut self) {
        let plugins = std::mem::take(&mut self.plugin_registry);
        for plugin in &plugins {
            plugin.cleanup(self);
        }
        self.plugin_registry = plugins;
        self.plugins_state = PluginsState::Cleaned;
    }

    // ----- running ----------------------------------------------------------

    /// Advances the app by one tick: runs the [`Main`] schedule, then world
    /// tick bookkeeping.
    pub fn update(&mut self) {
        self.world.run_schedule(Main);
        self.world.check_change_ticks();
    }

    /// Sets the function that drives the main loop. The default runner
    /// calls [`App::update`] once.
    pub fn set_runner(&mut self, runner: impl FnOnce(App) -> AppExit + Send + 'static) -> &mut Self {
        self.runner = Some(Box::new(runner));
        self
    }

    /// Drives the plugin lifecycle to completion, then hands the app to its
    /// runner: build (already done) → busy-wait for ready → finish →
    /// cleanup → main loop.
    pub fn run(&mut self) -> AppExit {
        let mut app = std::mem::replace(self, App::empty());
        while !app.plugins_ready() {
            std::thread::yield_now();
        }
        app.plugins_state = PluginsState::Ready;
        app.finish();
        app.cleanup();
        let runner = app
            .runner
            .take()
            .unwrap_or_else(|| Box::new(run_once_runner));
        runner(app)
    }

    /// The strongest exit request currently queued, if any.
    pub fn should_exit(&self) -> Option<AppExit> {
        let events = self.world.get_resource::<Events<AppExit>>()?;
        let mut cursor = events.get_cursor_at_start();
        let mut exit = None;
        for event in cursor.read(events) {
            match (&exit, event) {
                (_, AppExit::Error(_)) => exit = Some(event.clone()),
                (None, AppExit::Success) => exit = Some(AppExit::Success),
                _ => {}
            }
        }
        exit
    }
}

fn run_once_runner(mut app: App) -> AppExit {
    app.update();
    app.should_exit().unwrap_or(AppExit::Success)
}
