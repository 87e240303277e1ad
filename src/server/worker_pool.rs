//! Fixed-size pool of job-running coroutines.
//!
//! Workers share one unbounded channel; whichever worker is free picks
//! up the next job. Panicking jobs are contained per job.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use may::coroutine::JoinHandle;
use may::sync::mpsc;
use tracing::{debug, error};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize, stack_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(receiver);
        let mut workers = Vec::with_capacity(size);

        for worker_id in 0..size {
            let receiver = Arc::clone(&receiver);
            let spawned = unsafe {
                may::coroutine::Builder::new()
                    .stack_size(stack_size)
                    .spawn(move || {
                        debug!(worker_id, "worker started");
                        while let Ok(job) = receiver.recv() {
                            if catch_unwind(AssertUnwindSafe(move || job())).is_err() {
                                error!(worker_id, "job panicked");
                            }
                        }
                        debug!(worker_id, "worker exiting");
                    })
            };
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(worker_id, error = %e, "failed to spawn worker"),
            }
        }

        Self { sender, workers }
    }

    /// Enqueue a job. Fails only when the pool has shut down.
    pub(crate) fn execute(&self, job: Job) -> bool {
        self.sender.send(job).is_ok()
    }

    /// Close the channel and join every worker. Queued jobs finish
    /// first.
    pub(crate) fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}
