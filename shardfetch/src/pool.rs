//! Bounded worker pool with staggered admission and cooperative interrupt.
//!
//! The pool owns a FIFO queue of tasks and a fixed number of workers.
//! Workers are launched one at a time, spaced by a configurable delay —
//! some origins throttle or refuse bursty parallel connects, and a small
//! stagger sidesteps that. Each worker repeatedly pulls a task and hands it
//! to the driver; the driver may push the task back via
//! [`PoolHandle::retry`], where any idle worker will pick it up again.
//!
//! Interruption is sticky and cooperative: workers finish the task they are
//! on and stop pulling new ones; nothing is preempted mid-flight. A
//! separate monitor invokes the driver's tick hook on a fixed cadence until
//! the pool quiesces.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Hooks supplied by the pool's user.
pub trait PoolDriver<T>: Send + Sync + 'static {
    /// Execute one task. Call [`PoolHandle::retry`] to re-enqueue it, or
    /// [`PoolHandle::interrupt`] to stop the pool.
    fn execute<'a>(&'a self, task: T, pool: &'a PoolHandle<T>) -> BoxFuture<'a, ()>;

    /// Invoked on a fixed cadence while the pool runs. Default: nothing.
    fn on_tick<'a>(&'a self, _pool: &'a PoolHandle<T>) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Invoked exactly once when the pool is interrupted. Default: nothing.
    fn on_interrupt(&self, _pool: &PoolHandle<T>) {}
}

struct PoolShared<T> {
    queue: Mutex<VecDeque<T>>,
    /// Tasks that have not reached a terminal state (queued + executing).
    outstanding: AtomicUsize,
    /// Wakes idle workers when a retry lands in the queue.
    wake: Notify,
    /// Fires when the last task reaches a terminal state.
    drained: CancellationToken,
    interrupt: CancellationToken,
    interrupt_hook_fired: AtomicBool,
}

/// Cloneable handle used by drivers and observers of the pool.
pub struct PoolHandle<T> {
    shared: Arc<PoolShared<T>>,
    driver: Arc<dyn PoolDriver<T>>,
}

impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            driver: Arc::clone(&self.driver),
        }
    }
}

impl<T: Send + 'static> PoolHandle<T> {
    /// Re-enqueue a task for another attempt by any available worker.
    ///
    /// After an interrupt the task is dropped instead: an interrupted pool
    /// admits no further work, retries included.
    pub fn retry(&self, task: T) {
        if self.shared.interrupt.is_cancelled() {
            return;
        }
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.lock().unwrap().push_back(task);
        self.shared.wake.notify_one();
    }

    /// Stop admitting work. Tasks currently executing run to completion.
    ///
    /// The first call fires the driver's `on_interrupt` hook; later calls
    /// are no-ops.
    pub fn interrupt(&self) {
        self.shared.interrupt.cancel();
        if !self.shared.interrupt_hook_fired.swap(true, Ordering::AcqRel) {
            self.driver.on_interrupt(self);
        }
    }

    /// True once [`interrupt`](Self::interrupt) has been called.
    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupt.is_cancelled()
    }

    /// Number of tasks that have not yet finished or been abandoned.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }
}

/// Bounded concurrent task pool. See the module docs for the lifecycle.
pub struct WorkerPool<T> {
    handle: PoolHandle<T>,
    concurrency: usize,
    start_delay: Duration,
    tick_interval: Duration,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool over an initial task list.
    ///
    /// * `concurrency` - number of workers (at least 1)
    /// * `start_delay` - spacing between worker launches; zero launches all
    ///   workers at once
    /// * `tick_interval` - cadence of the driver's `on_tick` hook
    pub fn new(
        tasks: Vec<T>,
        concurrency: usize,
        start_delay: Duration,
        tick_interval: Duration,
        driver: Arc<dyn PoolDriver<T>>,
    ) -> Self {
        let outstanding = tasks.len();
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::from(tasks)),
            outstanding: AtomicUsize::new(outstanding),
            wake: Notify::new(),
            drained: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            interrupt_hook_fired: AtomicBool::new(false),
        });
        if outstanding == 0 {
            shared.drained.cancel();
        }
        Self {
            handle: PoolHandle { shared, driver },
            concurrency: concurrency.max(1),
            start_delay,
            tick_interval,
        }
    }

    /// A handle to the pool, valid before, during and after `start`.
    pub fn handle(&self) -> PoolHandle<T> {
        self.handle.clone()
    }

    /// True once the pool has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.handle.is_interrupted()
    }

    /// Run the pool to completion.
    ///
    /// Returns when every task has reached a terminal state, or when an
    /// interrupt has drained the in-flight workers.
    pub async fn start(&self) {
        let mut workers = Vec::with_capacity(self.concurrency);

        for index in 0..self.concurrency {
            if index > 0 && !self.start_delay.is_zero() {
                tokio::select! {
                    _ = self.handle.shared.interrupt.cancelled() => break,
                    _ = self.handle.shared.drained.cancelled() => break,
                    _ = tokio::time::sleep(self.start_delay) => {}
                }
            }
            let handle = self.handle.clone();
            workers.push(tokio::spawn(async move {
                Self::worker_loop(handle).await;
            }));
            debug!(worker = index, "admitted pool worker");
        }

        let monitor_handle = self.handle.clone();
        let tick_interval = self.tick_interval;
        let monitor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = monitor_handle.shared.interrupt.cancelled() => break,
                    _ = monitor_handle.shared.drained.cancelled() => break,
                    _ = tokio::time::sleep(tick_interval) => {
                        monitor_handle.driver.on_tick(&monitor_handle).await;
                    }
                }
            }
        });

        for worker in workers {
            let _ = worker.await;
        }
        let _ = monitor.await;
    }

    async fn worker_loop(handle: PoolHandle<T>) {
        let shared = &handle.shared;
        loop {
            if shared.interrupt.is_cancelled() {
                break;
            }
            let task = shared.queue.lock().unwrap().pop_front();
            match task {
                Some(task) => {
                    let driver = Arc::clone(&handle.driver);
                    driver.execute(task, &handle).await;
                    if shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                        shared.drained.cancel();
                    }
                }
                None => {
                    tokio::select! {
                        _ = shared.interrupt.cancelled() => break,
                        _ = shared.drained.cancelled() => break,
                        _ = shared.wake.notified() => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Driver that records executions and optionally retries or interrupts.
    struct TestDriver {
        executed: Mutex<Vec<u32>>,
        retry_once: Option<u32>,
        interrupt_on: Option<u32>,
        interrupts_seen: AtomicUsize,
        ticks: AtomicUsize,
        work_delay: Duration,
    }

    impl TestDriver {
        fn new() -> Self {
            Self {
                executed: Mutex::new(Vec::new()),
                retry_once: None,
                interrupt_on: None,
                interrupts_seen: AtomicUsize::new(0),
                ticks: AtomicUsize::new(0),
                work_delay: Duration::ZERO,
            }
        }
    }

    impl PoolDriver<u32> for TestDriver {
        fn execute<'a>(&'a self, task: u32, pool: &'a PoolHandle<u32>) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                if !self.work_delay.is_zero() {
                    tokio::time::sleep(self.work_delay).await;
                }
                let first_run = {
                    let mut executed = self.executed.lock().unwrap();
                    let first = !executed.contains(&task);
                    executed.push(task);
                    first
                };
                if self.retry_once == Some(task) && first_run {
                    pool.retry(task);
                }
                if self.interrupt_on == Some(task) {
                    pool.interrupt();
                }
            })
        }

        fn on_tick<'a>(&'a self, _pool: &'a PoolHandle<u32>) -> BoxFuture<'a, ()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }

        fn on_interrupt(&self, _pool: &PoolHandle<u32>) {
            self.interrupts_seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_all_tasks_execute() {
        let driver = Arc::new(TestDriver::new());
        let pool = WorkerPool::new(
            vec![1, 2, 3, 4, 5],
            3,
            Duration::ZERO,
            Duration::from_secs(1),
            Arc::clone(&driver) as Arc<dyn PoolDriver<u32>>,
        );

        pool.start().await;

        let mut executed = driver.executed.lock().unwrap().clone();
        executed.sort_unstable();
        assert_eq!(executed, vec![1, 2, 3, 4, 5]);
        assert!(!pool.is_interrupted());
    }

    #[tokio::test]
    async fn test_empty_task_list_returns_immediately() {
        let driver = Arc::new(TestDriver::new());
        let pool = WorkerPool::new(
            Vec::new(),
            4,
            Duration::ZERO,
            Duration::from_secs(1),
            driver as Arc<dyn PoolDriver<u32>>,
        );
        pool.start().await;
    }

    #[tokio::test]
    async fn test_retry_reexecutes_task() {
        let mut driver = TestDriver::new();
        driver.retry_once = Some(2);
        let driver = Arc::new(driver);
        let pool = WorkerPool::new(
            vec![1, 2, 3],
            2,
            Duration::ZERO,
            Duration::from_secs(1),
            Arc::clone(&driver) as Arc<dyn PoolDriver<u32>>,
        );

        pool.start().await;

        let executed = driver.executed.lock().unwrap().clone();
        assert_eq!(executed.iter().filter(|&&t| t == 2).count(), 2);
        assert_eq!(executed.len(), 4);
    }

    #[tokio::test]
    async fn test_interrupt_stops_admission() {
        let mut driver = TestDriver::new();
        driver.interrupt_on = Some(1);
        let driver = Arc::new(driver);
        // One worker, so tasks after the interrupting one never start.
        let pool = WorkerPool::new(
            vec![1, 2, 3, 4, 5],
            1,
            Duration::ZERO,
            Duration::from_secs(1),
            Arc::clone(&driver) as Arc<dyn PoolDriver<u32>>,
        );

        pool.start().await;

        assert!(pool.is_interrupted());
        assert_eq!(driver.executed.lock().unwrap().len(), 1);
        assert_eq!(driver.interrupts_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interrupt_hook_fires_once() {
        let driver = Arc::new(TestDriver::new());
        let pool = WorkerPool::new(
            vec![1],
            1,
            Duration::ZERO,
            Duration::from_secs(1),
            Arc::clone(&driver) as Arc<dyn PoolDriver<u32>>,
        );
        let handle = pool.handle();

        handle.interrupt();
        handle.interrupt();
        handle.interrupt();

        assert_eq!(driver.interrupts_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_interrupt_is_dropped() {
        let driver = Arc::new(TestDriver::new());
        let pool = WorkerPool::new(
            vec![1],
            1,
            Duration::ZERO,
            Duration::from_secs(1),
            Arc::clone(&driver) as Arc<dyn PoolDriver<u32>>,
        );
        let handle = pool.handle();

        handle.interrupt();
        handle.retry(99);
        pool.start().await;

        assert!(!driver.executed.lock().unwrap().contains(&99));
    }

    #[tokio::test]
    async fn test_staggered_admission_spaces_workers() {
        let mut driver = TestDriver::new();
        driver.work_delay = Duration::from_millis(40);
        let driver = Arc::new(driver);
        let pool = WorkerPool::new(
            vec![1, 2, 3],
            3,
            Duration::from_millis(30),
            Duration::from_secs(1),
            driver as Arc<dyn PoolDriver<u32>>,
        );

        let started = Instant::now();
        pool.start().await;

        // Two stagger gaps precede the third worker; the run cannot finish
        // before they have elapsed.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_monitor_ticks_while_running() {
        let mut driver = TestDriver::new();
        driver.work_delay = Duration::from_millis(80);
        let driver = Arc::new(driver);
        let pool = WorkerPool::new(
            vec![1],
            1,
            Duration::ZERO,
            Duration::from_millis(10),
            Arc::clone(&driver) as Arc<dyn PoolDriver<u32>>,
        );

        pool.start().await;

        assert!(driver.ticks.load(Ordering::SeqCst) >= 1);
    }
}
