// crates/strix-core/src/runtime/worker.rs
// ============================================================================
// Module: Strix Worker Pool
// Description: Bounded thread pool executing module calls for one scan.
// Purpose: Run handle_event jobs off the dispatcher thread.
// Dependencies: std::thread, std::sync
// ============================================================================

//! ## Overview
//! A small fixed pool of named threads pulls closures from a shared queue.
//! The dispatcher keeps at most one job in flight per non-thread-safe module,
//! so queue growth is bounded by the module count. Shutdown drops the sender
//! and joins workers with a deadline; workers stuck inside a hung module call
//! are left to finish in the background rather than blocking scan teardown.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Unit of work executed on a pool worker.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool for one scan.
pub(crate) struct WorkerPool {
    /// Job submission side; `None` once shutdown has begun.
    sender: Option<Sender<Job>>,
    /// Worker thread handles for join-on-shutdown.
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers labelled with the scan id.
    pub(crate) fn start(scan_label: &str, threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let shared: Arc<Mutex<Receiver<Job>>> = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(threads.max(1));
        for index in 0 .. threads.max(1) {
            let shared = Arc::clone(&shared);
            let name = format!("strix-worker-{scan_label}-{index}");
            let builder = thread::Builder::new().name(name);
            if let Ok(handle) = builder.spawn(move || worker_loop(&shared)) {
                handles.push(handle);
            }
        }
        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Submits a job for execution.
    ///
    /// Returns false when the pool has been shut down.
    pub(crate) fn submit(&self, job: Job) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok())
    }

    /// Stops accepting jobs and joins workers up to the deadline.
    ///
    /// Workers still executing when the deadline passes are detached; their
    /// completion messages are ignored by the dispatcher after teardown.
    pub(crate) fn shutdown(&mut self, deadline: Duration) {
        self.sender = None;
        let until = Instant::now() + deadline;
        for handle in self.handles.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
                continue;
            }
            while Instant::now() < until && !handle.is_finished() {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(0));
    }
}

/// Worker thread body: pull jobs until the channel closes.
fn worker_loop(shared: &Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn jobs_execute_on_workers() {
        let mut pool = WorkerPool::start("test", 2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0 .. 8 {
            let counter = Arc::clone(&counter);
            assert!(pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        }
        pool.shutdown(Duration::from_secs(2));
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let mut pool = WorkerPool::start("test", 1);
        pool.shutdown(Duration::from_secs(1));
        assert!(!pool.submit(Box::new(|| {})));
    }
}
