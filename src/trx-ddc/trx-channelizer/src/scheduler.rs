// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Periodic task scheduling.
//!
//! Buffer processors and channel sources drain their queues on a fixed-rate
//! tick supplied by a [`Scheduler`]. Production code uses [`TokioScheduler`];
//! tests drive time by hand with [`ManualScheduler`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Work executed on every tick.
pub type Job = Box<dyn FnMut() + Send>;

/// Shorter periods are clamped to this.
const MINIMUM_PERIOD: Duration = Duration::from_millis(1);

/// Source of fixed-rate ticks.
pub trait Scheduler: Send + Sync {
    /// Run `job` every `period` until the returned task is cancelled or dropped.
    fn schedule_at_fixed_rate(&self, name: &str, period: Duration, job: Job) -> ScheduledTask;
}

/// Handle to a scheduled job. Dropping it cancels the job.
pub struct ScheduledTask {
    name: String,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    fn new(name: &str, cancelled: Arc<AtomicBool>, handle: Option<JoinHandle<()>>) -> Self {
        Self {
            name: name.to_string(),
            cancelled,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stop the job. A tick already in progress runs to completion.
    pub fn cancel(&mut self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("Cancelled scheduled task '{}'", self.name);
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Ticks with `tokio::time::interval` and runs each tick's job on the
/// runtime's blocking pool, keeping DSP work off the async workers. Ticks of
/// one task never overlap.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling context.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at_fixed_rate(&self, name: &str, period: Duration, job: Job) -> ScheduledTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let period = period.max(MINIMUM_PERIOD);
        let job = Arc::new(Mutex::new(job));
        let task_name = name.to_string();
        let handle = self.handle.spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let (job, flag) = (job.clone(), flag.clone());
                let tick = task::spawn_blocking(move || {
                    if flag.load(Ordering::Acquire) {
                        return;
                    }
                    if let Ok(mut run) = job.lock() {
                        (*run)();
                    }
                });
                if let Err(e) = tick.await {
                    warn!("Scheduled task '{}' stopped: {}", task_name, e);
                    break;
                }
            }
        });
        debug!("Scheduled task '{}' every {:?}", name, period);
        ScheduledTask::new(name, cancelled, Some(handle))
    }
}

struct ManualTask {
    id: u64,
    name: String,
    period: Duration,
    next_due: Duration,
    cancelled: Arc<AtomicBool>,
    /// `None` while the job is running.
    job: Option<Job>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    tasks: Vec<ManualTask>,
}

/// Deterministic scheduler: jobs only run when the owner calls
/// [`run_pending`](Self::run_pending) or [`advance`](Self::advance).
///
/// Jobs run outside the internal lock, so a job may schedule or cancel tasks.
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    state: Mutex<ManualState>,
}

type TakenJob = (u64, Arc<AtomicBool>, Job);

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (not cancelled) tasks.
    pub fn task_count(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state
                .tasks
                .iter()
                .filter(|t| !t.cancelled.load(Ordering::Acquire))
                .count(),
            Err(_) => 0,
        }
    }

    /// Names of the live tasks, in scheduling order.
    pub fn task_names(&self) -> Vec<String> {
        match self.state.lock() {
            Ok(state) => state
                .tasks
                .iter()
                .filter(|t| !t.cancelled.load(Ordering::Acquire))
                .map(|t| t.name.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Run every live task once, ignoring time. Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let jobs = self.take_jobs(|_| true);
        self.run_jobs(jobs)
    }

    /// Move the clock forward and run each task once per elapsed period.
    pub fn advance(&self, by: Duration) -> usize {
        let now = match self.state.lock() {
            Ok(mut state) => {
                state.now += by;
                state.now
            }
            Err(_) => return 0,
        };

        let mut ran = 0;
        loop {
            let jobs = self.take_jobs(|task| task.next_due <= now);
            if jobs.is_empty() {
                break;
            }
            ran += self.run_jobs(jobs);
        }
        ran
    }

    fn take_jobs(&self, due: impl Fn(&ManualTask) -> bool) -> Vec<TakenJob> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        state.tasks.retain(|t| !t.cancelled.load(Ordering::Acquire));
        let mut jobs = Vec::new();
        for task in state.tasks.iter_mut() {
            if !due(task) {
                continue;
            }
            if let Some(job) = task.job.take() {
                task.next_due += task.period;
                jobs.push((task.id, task.cancelled.clone(), job));
            }
        }
        jobs
    }

    fn run_jobs(&self, mut jobs: Vec<TakenJob>) -> usize {
        let mut ran = 0;
        for (_, cancelled, job) in jobs.iter_mut() {
            if !cancelled.load(Ordering::Acquire) {
                job();
                ran += 1;
            }
        }

        if let Ok(mut state) = self.state.lock() {
            for (id, _, job) in jobs {
                if let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) {
                    task.job = Some(job);
                }
            }
            state.tasks.retain(|t| !t.cancelled.load(Ordering::Acquire));
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at_fixed_rate(&self, name: &str, period: Duration, job: Job) -> ScheduledTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut state) = self.state.lock() {
            let next_due = state.now;
            state.tasks.push(ManualTask {
                id,
                name: name.to_string(),
                period: period.max(MINIMUM_PERIOD),
                next_due,
                cancelled: cancelled.clone(),
                job: Some(job),
            });
        }
        ScheduledTask::new(name, cancelled, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_manual_run_pending_runs_each_task_once() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _a = scheduler.schedule_at_fixed_rate("a", Duration::from_millis(20), counter_job(&count));
        let _b = scheduler.schedule_at_fixed_rate("b", Duration::from_millis(20), counter_job(&count));
        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.task_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_manual_advance_runs_per_period() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _task = scheduler.schedule_at_fixed_rate("t", Duration::from_millis(10), counter_job(&count));
        // Due at t=0, 10, 20, 30.
        assert_eq!(scheduler.advance(Duration::from_millis(35)), 4);
        assert_eq!(scheduler.advance(Duration::from_millis(4)), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_dropping_task_cancels_it() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let task = scheduler.schedule_at_fixed_rate("t", Duration::from_millis(10), counter_job(&count));
        assert_eq!(scheduler.task_count(), 1);
        drop(task);
        assert_eq!(scheduler.run_pending(), 0);
        assert_eq!(scheduler.task_count(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_job_may_schedule_reentrantly() {
        let scheduler = Arc::new(ManualScheduler::new());
        let inner = Arc::new(Mutex::new(Vec::<ScheduledTask>::new()));
        let (sched, inner_clone) = (scheduler.clone(), inner.clone());
        let _outer = scheduler.schedule_at_fixed_rate(
            "outer",
            Duration::from_millis(10),
            Box::new(move || {
                let task = sched.schedule_at_fixed_rate("inner", Duration::from_millis(10), Box::new(|| {}));
                inner_clone.lock().unwrap().push(task);
            }),
        );
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(scheduler.task_count(), 2);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_ticks_until_cancelled() {
        let scheduler = TokioScheduler::current().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let mut task =
            scheduler.schedule_at_fixed_rate("tick", Duration::from_millis(5), counter_job(&count));
        tokio::time::sleep(Duration::from_millis(60)).await;
        task.cancel();
        assert!(task.is_cancelled());
        // Let a tick already on the blocking pool finish.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, got {}", seen);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_runs_jobs_off_the_runtime_thread() {
        // The current-thread runtime polls every task on this thread.
        let runtime_thread = std::thread::current().id();
        let scheduler = TokioScheduler::current().unwrap();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let record = threads.clone();
        let _task = scheduler.schedule_at_fixed_rate(
            "blocking",
            Duration::from_millis(5),
            Box::new(move || {
                std::thread::sleep(Duration::from_millis(50));
                record.lock().unwrap().push(std::thread::current().id());
            }),
        );

        // A sleeping job must not stall the runtime.
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(started.elapsed() < Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(120)).await;
        let threads = threads.lock().unwrap();
        assert!(!threads.is_empty());
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }
}
