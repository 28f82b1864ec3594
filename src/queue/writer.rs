//! Background page writers.
//!
//! A [`FlushScheduler`] owns a set of worker threads that periodically run
//! every registered [`FlushTask`]. A queue either owns a private scheduler
//! (dedicated mode) or registers with the process-wide one returned by
//! [`FlushScheduler::shared`], which amortizes threads across many queues.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{const_mutex, Condvar, Mutex};

/// Work run by background writers on every pass.
pub trait FlushTask: Send + Sync {
    /// Flush whatever the owner considers pending.
    fn flush_pass(&self);
}

/// Identifies a registration with a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Scheduler state guarded by one lock.
struct Registry {
    tasks: Vec<(TaskId, Arc<dyn FlushTask>)>,
    /// Set by `wake()` so a pass runs without waiting for the period.
    woken: bool,
    stopping: bool,
}

struct SchedulerInner {
    name: String,
    period: Duration,
    registry: Mutex<Registry>,
    wake: Condvar,
    /// Number of worker threads still running.
    live: Mutex<usize>,
    exited: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_task: AtomicU64,
}

/// A pool of background writer threads.
///
/// Cloning yields another handle to the same pool.
///
/// # Thread Safety
/// - `registry`: `Mutex` + `Condvar`; workers sleep on it between passes
/// - `live`: `Mutex` + `Condvar`; lets `shutdown` wait for exits with a deadline
///
/// Tasks run outside the registry lock, so a slow flush never blocks
/// registration or wake-ups.
#[derive(Clone)]
pub struct FlushScheduler {
    inner: Arc<SchedulerInner>,
}

/// The process-wide scheduler, created on first use.
static SHARED: Mutex<Option<FlushScheduler>> = const_mutex(None);

impl FlushScheduler {
    /// Start a scheduler with `threads` workers running a pass every `period`.
    ///
    /// # Errors
    /// Returns an error if a worker thread cannot be spawned; workers that
    /// did start are stopped again.
    pub fn new(name: &str, threads: usize, period: Duration) -> io::Result<Self> {
        let inner = Arc::new(SchedulerInner {
            name: name.to_string(),
            period,
            registry: Mutex::new(Registry {
                tasks: Vec::new(),
                woken: false,
                stopping: false,
            }),
            wake: Condvar::new(),
            live: Mutex::new(0),
            exited: Condvar::new(),
            handles: Mutex::new(Vec::new()),
            next_task: AtomicU64::new(0),
        });
        let scheduler = Self { inner };

        for index in 0..threads.max(1) {
            let worker = Arc::clone(&scheduler.inner);
            *scheduler.inner.live.lock() += 1;
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || run_worker(worker));
            match spawned {
                Ok(handle) => scheduler.inner.handles.lock().push(handle),
                Err(e) => {
                    *scheduler.inner.live.lock() -= 1;
                    scheduler.shutdown(Instant::now());
                    return Err(e);
                }
            }
        }

        log::debug!("started flush scheduler {} with {} threads", name, threads.max(1));
        Ok(scheduler)
    }

    /// The process-wide scheduler.
    ///
    /// The first caller decides its thread count and period; later callers
    /// share it as-is.
    pub fn shared(threads: usize, period: Duration) -> io::Result<Self> {
        let mut shared = SHARED.lock();
        if let Some(scheduler) = shared.as_ref() {
            return Ok(scheduler.clone());
        }
        let scheduler = Self::new("spillq-shared", threads, period)?;
        *shared = Some(scheduler.clone());
        Ok(scheduler)
    }

    /// Register a task to run on every pass.
    pub fn register(&self, task: Arc<dyn FlushTask>) -> TaskId {
        let id = TaskId(self.inner.next_task.fetch_add(1, Ordering::Relaxed));
        self.inner.registry.lock().tasks.push((id, task));
        id
    }

    /// Remove a task. A pass already running it is not interrupted.
    pub fn deregister(&self, id: TaskId) {
        self.inner.registry.lock().tasks.retain(|(task, _)| *task != id);
    }

    /// Number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.inner.registry.lock().tasks.len()
    }

    /// Run a pass now instead of at the next period.
    pub fn wake(&self) {
        let mut registry = self.inner.registry.lock();
        registry.woken = true;
        self.inner.wake.notify_all();
    }

    /// Stop the workers, waiting for them to exit until `deadline`.
    ///
    /// Returns `true` if every worker exited in time; those are joined.
    /// Workers still busy past the deadline are detached and exit after
    /// their current pass.
    pub fn shutdown(&self, deadline: Instant) -> bool {
        {
            let mut registry = self.inner.registry.lock();
            registry.stopping = true;
            self.inner.wake.notify_all();
        }

        let mut live = self.inner.live.lock();
        while *live > 0 {
            if self.inner.exited.wait_until(&mut live, deadline).timed_out() {
                break;
            }
        }
        let all_exited = *live == 0;
        drop(live);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
        if all_exited {
            for handle in handles {
                let worker = handle.thread().name().unwrap_or("unnamed").to_string();
                if handle.join().is_err() {
                    log::error!(
                        "flush scheduler {} worker {} panicked",
                        self.inner.name,
                        worker
                    );
                }
            }
        } else {
            log::warn!(
                "flush scheduler {} did not terminate before its deadline",
                self.inner.name
            );
        }
        all_exited
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("name", &self.inner.name)
            .field("period", &self.inner.period)
            .finish()
    }
}

/// Counts a worker out of `live` when it exits, including by panic.
struct LiveGuard<'a>(&'a SchedulerInner);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        let mut live = self.0.live.lock();
        *live -= 1;
        self.0.exited.notify_all();
    }
}

fn run_worker(inner: Arc<SchedulerInner>) {
    let _live = LiveGuard(&inner);
    loop {
        let tasks: Vec<Arc<dyn FlushTask>> = {
            let mut registry = inner.registry.lock();
            if !registry.woken && !registry.stopping {
                inner.wake.wait_for(&mut registry, inner.period);
            }
            if registry.stopping {
                break;
            }
            registry.woken = false;
            registry.tasks.iter().map(|(_, task)| Arc::clone(task)).collect()
        };

        for task in tasks {
            task.flush_pass();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl FlushTask for Counter {
        fn flush_pass(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_tasks_run_periodically() {
        let scheduler = FlushScheduler::new("test", 2, Duration::from_millis(1)).unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        scheduler.register(counter.clone());

        assert!(wait_for(|| counter.0.load(Ordering::SeqCst) >= 3));
        assert!(scheduler.shutdown(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_wake_runs_pass_early() {
        let scheduler = FlushScheduler::new("test", 1, Duration::from_secs(3600)).unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        scheduler.register(counter.clone());

        scheduler.wake();
        assert!(wait_for(|| counter.0.load(Ordering::SeqCst) >= 1));
        assert!(scheduler.shutdown(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_deregister_stops_task() {
        let scheduler = FlushScheduler::new("test", 1, Duration::from_millis(1)).unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let id = scheduler.register(counter.clone());
        assert_eq!(scheduler.task_count(), 1);

        scheduler.deregister(id);
        assert_eq!(scheduler.task_count(), 0);
        assert!(scheduler.shutdown(Instant::now() + Duration::from_secs(5)));
    }

    struct Panicking;

    impl FlushTask for Panicking {
        fn flush_pass(&self) {
            panic!("flush pass failed");
        }
    }

    #[test]
    fn test_shutdown_survives_worker_panic() {
        let scheduler = FlushScheduler::new("test", 1, Duration::from_millis(1)).unwrap();
        scheduler.register(Arc::new(Panicking));
        scheduler.wake();

        assert!(wait_for(|| *scheduler.inner.live.lock() == 0));
        assert!(scheduler.shutdown(Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_shared_is_reused() {
        let a = FlushScheduler::shared(1, Duration::from_millis(5)).unwrap();
        let b = FlushScheduler::shared(4, Duration::from_secs(1)).unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
