//! Bounded worker pool.
//!
//! Jobs run on a rayon pool, but admission is capped separately: a bounded
//! crossbeam channel of capacity `C` acts as a counting semaphore, so the
//! submitting thread blocks in [`Submitter::submit`] while `C` jobs hold a
//! slot. At most `C` jobs are ever queued or running; the walker never
//! runs ahead of capacity.

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    admission: usize,
}

impl WorkerPool {
    pub fn new(threads: usize, admission: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("decrypt-{i}"))
            .build()
            .map_err(|e| anyhow!("rayon threadpool build failed: {}", e))?;

        Ok(Self {
            pool,
            admission: admission.max(1),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn admission(&self) -> usize {
        self.admission
    }

    /// Run `op` on the calling thread with a [`Submitter`]; returns once
    /// `op` has returned and every job it submitted has finished.
    pub fn run<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&Submitter<'_, 'scope>) -> R,
    {
        let (acquire, release) = bounded(self.admission);
        self.pool.in_place_scope(|scope| {
            let submitter = Submitter {
                scope,
                acquire,
                release,
            };
            op(&submitter)
        })
    }
}

pub struct Submitter<'a, 'scope> {
    scope: &'a rayon::Scope<'scope>,
    acquire: Sender<()>,
    release: Receiver<()>,
}

impl<'scope> Submitter<'_, 'scope> {
    /// Blocks until a slot is free, then hands `job` to the pool.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        // we hold `release`, so the channel cannot be disconnected here
        if self.acquire.send(()).is_err() {
            error!("admission channel closed, dropping job");
            return;
        }
        let slot = Slot(self.release.clone());

        self.scope.spawn(move |_| {
            let _slot = slot;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                error!(panic = %panic_message(payload.as_ref()), "worker panicked");
            }
        });
    }
}

/// One admission slot; handed back on drop, unwinding included.
struct Slot(Receiver<()>);

impl Drop for Slot {
    fn drop(&mut self) {
        let _ = self.0.try_recv();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
