//! A headless runner driving [`App::update`] in a loop.

use crate::{App, AppExit, Plugin};
use std::time::{Duration, Instant};

/// How the runner loops.
#[derive(Clone, Copy, Debug)]
pub enum RunMode {
    /// One update, then exit.
    Once,
    /// Update until an [`AppExit`] event, optionally sleeping between
    /// ticks.
    Loop { wait: Option<Duration> },
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Loop { wait: None }
    }
}

/// Installs a runner that drives the main schedule without a windowing
/// backend.
#[derive(Default)]
pub struct ScheduleRunnerPlugin {
    pub run_mode: RunMode,
}

impl ScheduleRunnerPlugin {
    /// Runs one update, then exits.
    pub fn run_once() -> Self {
        Self {
            run_mode: RunMode::Once,
        }
    }

    /// Loops with at least `wait` between tick starts.
    pub fn run_loop(wait: Duration) -> Self {
        Self {
            run_mode: RunMode::Loop { wait: Some(wait) },
        }
    }
}

impl Plugin for ScheduleRunnerPlugin {
    fn build(&self, app: &mut App) {
        let run_mode = self.run_mode;
        app.set_runner(move |mut app: App| match run_mode {
            RunMode::Once => {
                app.update();
                app.should_exit().unwrap_or(AppExit::Success)
            }
            RunMode::Loop { wait } => loop {
                let start = Instant::now();
                app.update();
                if let Some(exit) = app.should_exit() {
                    break exit;
                }
                if let Some(wait) = wait {
                    let elapsed = start.elapsed();
                    if let Some(remaining) = wait.checked_sub(elapsed) {
                        std::thread::sleep(remaining);
                    }
                }
            },
        });
    }
}
