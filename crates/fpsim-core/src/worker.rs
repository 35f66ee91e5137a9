//! Single-threaded sequential task executor
//!
//! Every operation body of a session runs here. Jobs are executed exactly
//! once, in submission order, on one dedicated OS thread, so the state they
//! mutate needs no lock of its own. A job that blocks delays every job queued
//! behind it. A job that panics takes the worker down with it; later
//! submissions fail with [`CoreError::WorkerStopped`].

use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{CoreError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// FIFO worker backed by one named thread
pub struct Worker {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Worker {
    /// Spawn the worker thread
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!("Worker {} started", thread_name);
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
                debug!("Worker {} drained and stopped", thread_name);
            })
            .map_err(|e| CoreError::WorkerSpawn(e.to_string()))?;

        let thread_id = handle.thread().id();
        info!("Spawned worker {}", name);

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Name of the worker thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the caller is running on this worker's thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Enqueue a job and return without waiting for it to run
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(Box::new(job)).map_err(|_| CoreError::WorkerStopped),
            None => Err(CoreError::WorkerStopped),
        }
    }

    /// Stop accepting jobs, let queued jobs finish and join the thread.
    ///
    /// When called from a job on the worker itself the thread is not joined.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        if self.is_current() {
            return;
        }

        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Worker {} thread panicked", self.name);
            }
        }
        info!("Worker {} shut down", self.name);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc as std_mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let worker = Worker::spawn("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            worker.submit(move || seen.lock().unwrap().push(i)).unwrap();
        }
        worker.shutdown();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_does_not_wait_for_blocked_job() {
        let worker = Worker::spawn("test-nonblocking").unwrap();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();

        worker
            .submit(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        // The first job is parked; submitting more must still return at once.
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            worker
                .submit(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        worker.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_jobs_never_overlap() {
        let worker = Worker::spawn("test-overlap").unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            worker
                .submit(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        worker.shutdown();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let worker = Worker::spawn("test-stopped").unwrap();
        worker.shutdown();
        assert_eq!(worker.submit(|| {}), Err(CoreError::WorkerStopped));
    }

    #[test]
    fn test_panicking_job_stops_worker() {
        let worker = Worker::spawn("test-panic").unwrap();
        worker.submit(|| panic!("invariant violated")).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if worker.submit(|| {}) == Err(CoreError::WorkerStopped) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker survived a panic");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_runs_on_worker_thread() {
        let worker = Arc::new(Worker::spawn("test-thread").unwrap());
        let (tx, rx) = std_mpsc::channel();
        let inner = Arc::clone(&worker);

        worker
            .submit(move || {
                let _ = tx.send((inner.is_current(), thread::current().name().map(String::from)));
            })
            .unwrap();

        let (is_current, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(is_current);
        assert_eq!(name.as_deref(), Some("test-thread"));
        assert!(!worker.is_current());
    }
}
