//! `defer_to_thread`: running blocking or CPU-heavy work off the reactor
//! thread without blocking it.
//!
//! A small worker pool (bounded channel + `std::thread::spawn`, sized by
//! [`ReactorConfig::num_threads_in_pool`](crate::config::ReactorConfig))
//! runs submitted closures. Completions come back over a second channel
//! that an idle callback drains each time the idle fiber gets picked,
//! resolving whichever fiber is waiting on that particular job and
//! resuming it. This is the one part of the core that talks to another
//! OS thread at all; everything else in the reactor is single-threaded by
//! construction.

use crate::scheduler::{self, Scheduler};
use crate::sync::Signal;
use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type BoxedJob = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;

struct Job {
    id: u64,
    body: BoxedJob,
}

struct Completion {
    id: u64,
    result: Box<dyn Any + Send>,
}

struct Pending {
    result: Option<Box<dyn Any + Send>>,
    signal: Signal,
}

/// Owns the worker threads and the bookkeeping for in-flight jobs.
/// Created once by [`Scheduler::new`](crate::scheduler::Scheduler), torn
/// down (join included) on drop.
pub(crate) struct DeferPool {
    job_tx: Sender<Job>,
    completion_rx: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    pending: HashMap<u64, Pending>,
    next_id: u64,
}

impl DeferPool {
    pub(crate) fn new(num_threads: usize, stack_size: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (completion_tx, completion_rx) = mpsc::channel::<Completion>();

        let workers = (0..num_threads.max(1))
            .map(|worker_index| {
                let job_rx = Arc::clone(&job_rx);
                let completion_tx = completion_tx.clone();
                std::thread::Builder::new()
                    .name(format!("reactor-defer-{worker_index}"))
                    .stack_size(stack_size)
                    .spawn(move || loop {
                        let job = {
                            let rx = job_rx.lock().unwrap_or_else(|e| e.into_inner());
                            rx.recv()
                        };
                        let Ok(job) = job else { break };
                        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job.body))
                            .unwrap_or_else(|payload| {
                                tracing::warn!(job_id = job.id, "deferred job panicked");
                                payload
                            });
                        if completion_tx.send(Completion { id: job.id, result }).is_err() {
                            break;
                        }
                    })
                    .expect("failed to spawn defer-pool worker thread")
            })
            .collect();

        Self { job_tx, completion_rx, workers, pending: HashMap::new(), next_id: 0 }
    }

    fn submit(&mut self, body: BoxedJob) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, Pending { result: None, signal: Signal::new() });
        let _ = self.job_tx.send(Job { id, body });
        id
    }

    /// Drains whatever completions are currently available without
    /// blocking, storing each result and waking its waiter. Called from
    /// the idle fiber's body.
    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            if let Some(pending) = self.pending.get_mut(&completion.id) {
                pending.result = Some(completion.result);
                pending.signal.signal();
            }
        }
    }

    fn take_result(&mut self, id: u64) -> Option<Box<dyn Any + Send>> {
        let pending = self.pending.get_mut(&id)?;
        let result = pending.result.take()?;
        self.pending.remove(&id);
        Some(result)
    }
}

impl Drop for DeferPool {
    fn drop(&mut self) {
        // Dropping `job_tx` unblocks every worker's `recv()`; join them so
        // the reactor doesn't outlive threads still touching its state.
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

pub(crate) fn drain_completions(s: &mut Scheduler) {
    s.defer_pool_mut().drain_completions();
}

/// Runs `body` on the worker pool and suspends the calling fiber until it
/// completes, returning its result. Panics in the caller's fiber if
/// `body` itself panicked on the worker thread (mirroring how a panic
/// inside `join_fiber`'s target propagates).
pub fn defer_to_thread<T: Send + 'static>(body: impl FnOnce() -> T + Send + 'static) -> T {
    let id = scheduler::with(|s| {
        s.defer_pool_mut().submit(Box::new(move || Box::new(body()) as Box<dyn Any + Send>))
    });

    loop {
        let result = scheduler::with(|s| s.defer_pool_mut().take_result(id));
        if let Some(result) = result {
            return match result.downcast::<T>() {
                Ok(value) => *value,
                Err(payload) => std::panic::resume_unwind(payload),
            };
        }
        let signal_ptr: *mut Signal =
            scheduler::with(|s| &mut s.defer_pool_mut().pending.get_mut(&id).unwrap().signal as *mut _);
        // Safety: `id`'s `Pending` entry stays in the map until
        // `take_result` removes it above, so the pointer is valid for
        // this wait; no `Scheduler` borrow spans the suspend itself.
        unsafe { (*signal_ptr).wait() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_pool_runs_jobs_and_reports_back() {
        let mut pool = DeferPool::new(2, 256 * 1024);
        let id = pool.submit(Box::new(|| Box::new(40 + 2) as Box<dyn Any + Send>));
        let result = loop {
            pool.drain_completions();
            if let Some(r) = pool.take_result(id) {
                break r;
            }
            std::thread::yield_now();
        };
        assert_eq!(*result.downcast::<i32>().unwrap(), 42);
    }
}
