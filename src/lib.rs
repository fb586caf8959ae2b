//! Verse: a data-driven game engine runtime.
//!
//! This facade re-exports the engine's member crates:
//! - [`ecs`]: archetype-based world storage, change detection, queries and
//!   the system scheduler.
//! - [`app`]: the application shell, plugins and the main-schedule driver.
//! - [`asset`]: asynchronous asset loading with refcounted handles and
//!   recursive dependency load tracking.
//! - [`tasks`]: the async task pool backing asset I/O.
//!
//! ```no_run
//! use verse::prelude::*;
//!
//! #[derive(Component)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! fn report(query: Query<(Entity, &Position)>) {
//!     for (entity, position) in query.iter() {
//!         println!("{entity} is at ({}, {})", position.x, position.y);
//!     }
//! }
//!
//! App::new()
//!     .add_plugins(ScheduleRunnerPlugin::run_once())
//!     .add_systems(Update, report)
//!     .run();
//! ```

pub use verse_app as app;
pub use verse_asset as asset;
pub use verse_ecs as ecs;
pub use verse_tasks as tasks;

pub mod prelude {
    pub use verse_app::prelude::*;
    pub use verse_asset::prelude::*;
    pub use verse_ecs::prelude::*;
}
