//! Priority scheduler
//!
//! Holds queued request tasks, admits a bounded number concurrently ordered
//! by ascending priority value, and retires them on completion or
//! cancellation. State is only mutated under one lock; the admission loop is
//! re-entered every time an active task finishes, which keeps the active set
//! saturated up to the limit.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SchedulerConfig;

/// A unit of schedulable work
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn task_id(&self) -> u64;

    /// Lower value runs first
    fn priority(&self) -> u32;

    /// Drive the task to completion. Must return (not hang) once the task
    /// has been cancelled, so the admission loop is never blocked.
    async fn run(self: Arc<Self>);

    /// Request cancellation; must be idempotent
    fn cancel(&self);
}

struct SchedulerState {
    started: bool,
    new_tasks: Vec<Arc<dyn ScheduledTask>>,
    pending: Vec<Arc<dyn ScheduledTask>>,
    active: HashMap<u64, Arc<dyn ScheduledTask>>,
}

/// Bounded-concurrency priority scheduler
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    limit: usize,
}

impl Scheduler {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                started: false,
                new_tasks: Vec::new(),
                pending: Vec::new(),
                active: HashMap::new(),
            }),
            limit: limit.max(1),
        })
    }

    /// Queue a task. Before `start` it parks in the new set; afterwards it
    /// joins the pending queue and admission is attempted immediately.
    pub fn add(self: &Arc<Self>, task: Arc<dyn ScheduledTask>) {
        {
            let mut state = self.state.lock();
            if !state.started {
                state.new_tasks.push(task);
                return;
            }
            state.pending.push(task);
            // Stable sort: ties keep insertion order.
            state.pending.sort_by_key(|t| t.priority());
        }
        self.poll_pending();
    }

    /// Move all new tasks to the pending queue sorted by ascending priority
    /// and begin admitting work
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.started {
                return;
            }
            state.started = true;
            let mut new_tasks = std::mem::take(&mut state.new_tasks);
            new_tasks.sort_by_key(|t| t.priority());
            state.pending = new_tasks;
        }
        self.poll_pending();
    }

    /// Remove a task: queued tasks are dropped before running; an active
    /// task is cancelled in place. Unknown ids are ignored.
    pub fn remove(self: &Arc<Self>, task_id: u64) {
        let active_task = {
            let mut state = self.state.lock();
            state.new_tasks.retain(|t| t.task_id() != task_id);
            state.pending.retain(|t| t.task_id() != task_id);
            state.active.get(&task_id).cloned()
        };
        if let Some(task) = active_task {
            task.cancel();
        }
    }

    /// Cancel everything, queued and active
    pub fn shutdown(self: &Arc<Self>) {
        let (dropped, active): (Vec<_>, Vec<_>) = {
            let mut state = self.state.lock();
            let mut dropped = std::mem::take(&mut state.new_tasks);
            dropped.append(&mut state.pending);
            (dropped, state.active.values().cloned().collect())
        };
        for task in dropped.iter().chain(active.iter()) {
            task.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn pending_count(&self) -> usize {
        let state = self.state.lock();
        state.new_tasks.len() + state.pending.len()
    }

    /// Admit pending work while the active set has room
    fn poll_pending(self: &Arc<Self>) {
        loop {
            let task = {
                let mut state = self.state.lock();
                if !state.started
                    || state.active.len() >= self.limit
                    || state.pending.is_empty()
                {
                    return;
                }
                let task = state.pending.remove(0);
                state.active.insert(task.task_id(), task.clone());
                task
            };

            // Retirement rides a drop guard so the slot is reclaimed even
            // when the task unwinds instead of returning.
            let guard = RetireGuard {
                scheduler: self.clone(),
                task_id: task.task_id(),
            };
            tokio::spawn(async move {
                let _guard = guard;
                task.run().await;
            });
        }
    }

    /// Retire a task from the active set and admit more pending work
    fn finish(self: &Arc<Self>, task_id: u64) {
        let started = {
            let mut state = self.state.lock();
            state.active.remove(&task_id);
            state.started
        };
        if started {
            self.poll_pending();
        }
    }
}

/// Retires its task when dropped, whether the run returned or unwound
struct RetireGuard {
    scheduler: Arc<Scheduler>,
    task_id: u64,
}

impl Drop for RetireGuard {
    fn drop(&mut self) {
        self.scheduler.finish(self.task_id);
    }
}

/// Derive the concurrency limit from host resource hints.
///
/// This is a policy knob, not a structural requirement: the result is
/// clamped to `[min_concurrency, max_concurrency]`, and
/// `fixed_concurrency` bypasses derivation entirely.
pub fn derive_concurrency_limit(
    parallelism: usize,
    available_memory_bytes: u64,
    config: &SchedulerConfig,
) -> usize {
    let min = config.min_concurrency.max(1);
    let max = config.max_concurrency.max(min);

    if let Some(fixed) = config.fixed_concurrency {
        return fixed.clamp(min, max);
    }

    let memory_slots = (available_memory_bytes / config.memory_per_slot_bytes.max(1)) as usize;
    parallelism.min(memory_slots).clamp(min, max)
}

/// Detect available system memory for the concurrency derivation.
///
/// On Linux reads MemAvailable (falling back to MemTotal) from
/// /proc/meminfo. Falls back to 1GB when detection fails.
pub fn detect_available_memory() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/meminfo") {
            let read_line = |prefix: &str| {
                content
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
            };
            if let Some(bytes) = read_line("MemAvailable:").or_else(|| read_line("MemTotal:")) {
                tracing::debug!(bytes, "detected available memory from /proc/meminfo");
                return bytes;
            }
        }
        tracing::warn!("failed to read /proc/meminfo, using default 1GB");
    }

    1024 * 1024 * 1024
}
