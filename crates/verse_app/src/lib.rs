//! The Verse application shell: [`App`], plugins with a build/ready/finish/
//! cleanup lifecycle, the [`Main`](main_schedule::Main) schedule driver, and
//! a headless loop runner.

mod app;
mod main_schedule;
mod plugin;
mod schedule_runner;
mod time;

pub use app::{App, AppExit, DuplicatePluginError};
pub use main_schedule::{
    First, FixedFirst, FixedLast, FixedMain, FixedMainScheduleOrder, FixedUpdate, Last, Main,
    MainSchedulePlugin, MainScheduleOrder, PostStartup, PostUpdate, PreStartup, PreUpdate,
    RunFixedMainLoop, Startup, Update,
};
pub use plugin::{Plugin, PluginMarker, Plugins, PluginsState};
pub use schedule_runner::{RunMode, ScheduleRunnerPlugin};
pub use time::{update_time, FixedTime, Time, TimePlugin};

pub mod prelude {
    pub use crate::{
        App, AppExit, First, FixedTime, FixedUpdate, Last, Main, Plugin, PluginsState,
        PostStartup, PostUpdate, PreStartup, PreUpdate, RunFixedMainLoop, ScheduleRunnerPlugin,
        Startup, Time, Update,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use verse_ecs::prelude::*;

    #[derive(Resource, Default)]
    struct Counter {
        startup: usize,
        update: usize,
        fixed: usize,
    }

    fn count_startup(mut counter: ResMut<Counter>) {
        counter.startup += 1;
    }

    fn count_update(mut counter: ResMut<Counter>) {
        counter.update += 1;
    }

    fn count_fixed(mut counter: ResMut<Counter>) {
        counter.fixed += 1;
    }

    #[test]
    fn startup_runs_exactly_once() {
        let mut app = App::new();
        app.init_resource::<Counter>()
            .add_systems(Startup, count_startup)
            .add_systems(Update, count_update);
        app.update();
        app.update();
        app.update();
        let counter = app.world().resource::<Counter>();
        assert_eq!(counter.startup, 1);
        assert_eq!(counter.update, 3);
    }

    #[test]
    fn fixed_main_runs_per_accumulated_period() {
        let mut app = App::new();
        app.init_resource::<Counter>()
            .insert_resource(FixedTime::from_period(Duration::from_millis(10)))
            .add_systems(FixedUpdate, count_fixed);

        // drive the fixed loop directly with a synthetic delta
        app.world_mut()
            .resource_mut::<Time>()
            .advance_by(Duration::from_millis(25));
        app.world_mut().run_schedule(RunFixedMainLoop);

        let counter = app.world().resource::<Counter>();
        assert_eq!(counter.fixed, 2, "25ms of overstep buys two 10ms ticks");
        assert_eq!(
            app.world().resource::<FixedTime>().overstep(),
            Duration::from_millis(5)
        );

        // not enough overstep: zero runs
        app.world_mut()
            .resource_mut::<Time>()
            .advance_by(Duration::from_millis(2));
        app.world_mut().run_schedule(RunFixedMainLoop);
        assert_eq!(app.world().resource::<Counter>().fixed, 2);
    }

    #[test]
    fn plugin_lifecycle_order() {
        #[derive(Default)]
        struct Lifecycle {
            order: Arc<std::sync::Mutex<Vec<&'static str>>>,
            ready_after: Arc<AtomicUsize>,
        }

        impl Plugin for Lifecycle {
            fn build(&self, _app: &mut App) {
                self.order.lock().unwrap().push("build");
            }

            fn ready(&self, _app: &App) -> bool {
                // not ready the first two polls
                self.ready_after.fetch_add(1, Ordering::SeqCst) >= 2
            }

            fn finish(&self, _app: &mut App) {
                self.order.lock().unwrap().push("finish");
            }

            fn cleanup(&self, _app: &mut App) {
                self.order.lock().unwrap().push("cleanup");
            }
        }

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut app = App::new();
        app.add_plugins(Lifecycle {
            order: order.clone(),
            ready_after: Arc::new(AtomicUsize::new(0)),
        });
        app.set_runner(|app| {
            let _ = app;
            AppExit::Success
        });
        assert_eq!(app.run(), AppExit::Success);
        assert_eq!(*order.lock().unwrap(), vec!["build", "finish", "cleanup"]);
    }

    #[test]
    fn duplicate_unique_plugin_panics() {
        struct Solo;
        impl Plugin for Solo {
            fn build(&self, _app: &mut App) {}
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut app = App::new();
            app.add_plugins(Solo);
            app.add_plugins(Solo);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn exit_event_stops_the_loop_runner() {
        fn request_exit(mut writer: EventWriter<AppExit>, mut counter: ResMut<Counter>) {
            counter.update += 1;
            if counter.update == 3 {
                writer.send(AppExit::Success);
            }
        }

        let mut app = App::new();
        app.init_resource::<Counter>()
            .add_plugins(ScheduleRunnerPlugin::default())
            .add_systems(Update, request_exit);
        assert_eq!(app.run(), AppExit::Success);
    }

    #[test]
    fn error_exit_outranks_success() {
        let mut app = App::new();
        app.world_mut().send_event(AppExit::Success);
        app.world_mut().send_event(AppExit::Error(3));
        assert_eq!(app.should_exit(), Some(AppExit::Error(3)));
    }
}
