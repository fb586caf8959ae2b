//! A small async task pool.
//!
//! Wraps [`async_executor`] with dedicated worker threads. Used by the asset
//! server for background loads; nothing in the scheduler awaits.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

pub use futures_lite::future::block_on;

/// A pool of worker threads driving an async executor.
pub struct TaskPool {
    executor: Arc<async_executor::Executor<'static>>,
}

impl TaskPool {
    /// Spawns `thread_count` workers (at least one).
    pub fn new(thread_count: usize) -> Self {
        let executor = Arc::new(async_executor::Executor::new());
        for index in 0..thread_count.max(1) {
            let executor = executor.clone();
            std::thread::Builder::new()
                .name(format!("verse-task-pool-{index}"))
                .spawn(move || {
                    block_on(executor.run(std::future::pending::<()>()));
                })
                .expect("failed to spawn task pool thread");
        }
        Self { executor }
    }

    /// Schedules a future on the pool. The returned [`Task`] cancels the
    /// future when dropped; call [`Task::detach`] to let it run to
    /// completion unobserved.
    pub fn spawn<T: Send + 'static>(
        &self,
        future: impl Future<Output = T> + Send + 'static,
    ) -> Task<T> {
        Task(self.executor.spawn(future))
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|threads| threads.get())
            .unwrap_or(1);
        Self::new(threads)
    }
}

/// A handle to a spawned future. Dropping it cancels the future
/// cooperatively; detaching lets it finish on its own.
pub struct Task<T>(async_executor::Task<T>);

impl<T> Task<T> {
    /// Lets the task run to completion without an owner.
    pub fn detach(self) {
        self.0.detach();
    }

    /// Cancels the task, resolving once it has actually stopped.
    pub async fn cancel(self) -> Option<T> {
        self.0.cancel().await
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// The process-wide pool used for asset I/O.
pub struct IoTaskPool;

static IO_TASK_POOL: OnceLock<TaskPool> = OnceLock::new();

impl IoTaskPool {
    /// Initializes the pool if needed and returns it.
    pub fn get_or_init(init: impl FnOnce() -> TaskPool) -> &'static TaskPool {
        IO_TASK_POOL.get_or_init(init)
    }

    /// The pool, initializing it with default settings on first use.
    pub fn get() -> &'static TaskPool {
        Self::get_or_init(TaskPool::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn spawn_and_block_on() {
        let pool = TaskPool::new(2);
        let task = pool.spawn(async { 21 * 2 });
        assert_eq!(block_on(task), 42);
    }

    #[test]
    fn dropped_tasks_are_cancelled() {
        static RAN: AtomicBool = AtomicBool::new(false);
        static BLOCKER_STARTED: AtomicBool = AtomicBool::new(false);
        let pool = TaskPool::new(1);
        // park the single worker, and only then spawn the victim so it
        // cannot sneak in first
        let blocker = pool.spawn(async {
            BLOCKER_STARTED.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
        });
        while !BLOCKER_STARTED.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let victim = pool.spawn(async {
            RAN.store(true, Ordering::SeqCst);
        });
        drop(victim);
        block_on(blocker);
        std::thread::sleep(Duration::from_millis(50));
        assert!(!RAN.load(Ordering::SeqCst));
    }

    #[test]
    fn detached_tasks_complete() {
        static RAN: AtomicBool = AtomicBool::new(false);
        let pool = TaskPool::new(1);
        pool.spawn(async {
            RAN.store(true, Ordering::SeqCst);
        })
        .detach();
        for _ in 0..100 {
            if RAN.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("detached task never ran");
    }
}
