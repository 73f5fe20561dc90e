//! Single-threaded worker context.
//!
//! A [`WorkerContext`] owns a piece of state on a dedicated thread and runs
//! posted jobs against it one at a time, in posting order. Stopping is
//! explicit: [`WorkerContext::stop_and_join`] lets every job already queued
//! finish, then joins the thread and hands the state back.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;

/// Errors from the worker context.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker has stopped")]
    Stopped,
    #[error("blocking call issued from the worker thread itself")]
    Reentrant,
    #[error("worker thread panicked")]
    Panicked,
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Commands that can be sent to the worker thread.
enum WorkerCmd<S> {
    Run(Job<S>),
    Stop,
}

/// Cloneable posting handle to a worker.
pub struct WorkerHandle<S> {
    tx: Sender<WorkerCmd<S>>,
    accepting: Arc<AtomicBool>,
    thread_id: ThreadId,
}

impl<S> Clone for WorkerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            accepting: Arc::clone(&self.accepting),
            thread_id: self.thread_id,
        }
    }
}

impl<S: Send + 'static> WorkerHandle<S> {
    /// Queues a job. Fails once the worker has been told to stop.
    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) -> Result<(), WorkerError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(WorkerError::Stopped);
        }
        self.tx
            .send(WorkerCmd::Run(Box::new(job)))
            .map_err(|_| WorkerError::Stopped)
    }

    /// Runs a job and blocks until its result is available.
    pub fn call<R>(
        &self,
        job: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> Result<R, WorkerError>
    where
        R: Send + 'static,
    {
        if self.is_current() {
            return Err(WorkerError::Reentrant);
        }
        let (reply_tx, reply_rx) = channel();
        self.post(move |state| {
            let _ = reply_tx.send(job(state));
        })?;
        // A job dropped unrun (stop raced the post) closes the reply channel.
        reply_rx.recv().map_err(|_| WorkerError::Stopped)
    }

    /// True when called from the worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops accepting jobs. Jobs already queued still run.
    pub fn stop(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(WorkerCmd::Stop);
        }
    }
}

/// A dedicated thread owning state of type `S`.
pub struct WorkerContext<S> {
    name: String,
    handle: WorkerHandle<S>,
    join: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> WorkerContext<S> {
    /// Moves `state` onto a new named thread and starts the job loop.
    pub fn spawn(name: &str, state: S) -> Result<Self, WorkerError> {
        let (tx, rx) = channel::<WorkerCmd<S>>();
        let thread_name = name.to_string();

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = state;
            tracing::debug!(worker = %thread_name, "Worker started");
            while let Ok(cmd) = rx.recv() {
                match cmd {
                    WorkerCmd::Run(job) => {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&mut state)));
                        if outcome.is_err() {
                            tracing::error!(worker = %thread_name, "Worker job panicked");
                        }
                    }
                    WorkerCmd::Stop => break,
                }
            }
            tracing::debug!(worker = %thread_name, "Worker drained and stopped");
            state
        })?;

        let handle = WorkerHandle {
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
            thread_id: join.thread().id(),
        };

        Ok(Self {
            name: name.to_string(),
            handle,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> WorkerHandle<S> {
        self.handle.clone()
    }

    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) -> Result<(), WorkerError> {
        self.handle.post(job)
    }

    pub fn is_current(&self) -> bool {
        self.handle.is_current()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread_id
    }

    /// Stops accepting work, waits for queued work to finish and returns the
    /// owned state.
    ///
    /// Called from the worker thread itself this only stops the worker; the
    /// thread exits once the current job returns and the state is dropped.
    pub fn stop_and_join(mut self) -> Result<S, WorkerError> {
        self.handle.stop();
        if self.handle.is_current() {
            return Err(WorkerError::Reentrant);
        }
        match self.join.take() {
            Some(join) => join.join().map_err(|_| WorkerError::Panicked),
            None => Err(WorkerError::Stopped),
        }
    }
}

impl<S: Send + 'static> WorkerContext<S> {
    /// Stops accepting work without waiting for the thread.
    ///
    /// The returned handle yields the state once the queued jobs have run.
    /// This is the only way to stop a worker from its own thread without
    /// losing the state.
    pub fn stop_detached(mut self) -> Option<JoinHandle<S>> {
        self.handle.stop();
        self.join.take()
    }
}

impl<S> Drop for WorkerContext<S> {
    fn drop(&mut self) {
        if self.handle.accepting.swap(false, Ordering::AcqRel) {
            let _ = self.handle.tx.send(WorkerCmd::Stop);
        }
        if let Some(join) = self.join.take() {
            if thread::current().id() != self.handle.thread_id {
                let _ = join.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order() {
        let worker = WorkerContext::spawn("test-worker", Vec::new()).unwrap();
        for i in 0..10 {
            worker.post(move |v: &mut Vec<i32>| v.push(i)).unwrap();
        }
        let state = worker.stop_and_join().unwrap();
        assert_eq!(state, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_drains_pending_jobs() {
        let worker = WorkerContext::spawn("test-worker", 0u32).unwrap();
        worker
            .post(|n: &mut u32| {
                thread::sleep(Duration::from_millis(20));
                *n += 1;
            })
            .unwrap();
        worker.post(|n: &mut u32| *n += 1).unwrap();

        assert_eq!(worker.stop_and_join().unwrap(), 2);
    }

    #[test]
    fn test_post_after_stop_rejected() {
        let worker = WorkerContext::spawn("test-worker", 0u32).unwrap();
        let handle = worker.handle();
        worker.stop_and_join().unwrap();

        assert!(matches!(handle.post(|_| {}), Err(WorkerError::Stopped)));
        assert!(matches!(handle.call(|n| *n), Err(WorkerError::Stopped)));
    }

    #[test]
    fn test_call_returns_result() {
        let worker = WorkerContext::spawn("test-worker", 41u32).unwrap();
        let value = worker.handle().call(|n| {
            *n += 1;
            *n
        });
        assert_eq!(value.unwrap(), 42);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let worker = WorkerContext::spawn("test-worker", 0u32).unwrap();
        worker.post(|_| panic!("job failure")).unwrap();
        worker.post(|n| *n = 7).unwrap();

        assert_eq!(worker.stop_and_join().unwrap(), 7);
    }

    #[test]
    fn test_call_from_worker_is_reentrant() {
        let worker = WorkerContext::spawn("test-worker", None::<bool>).unwrap();
        let handle = worker.handle();
        worker
            .post(move |slot: &mut Option<bool>| {
                *slot = Some(matches!(handle.call(|_| ()), Err(WorkerError::Reentrant)));
            })
            .unwrap();

        assert_eq!(worker.stop_and_join().unwrap(), Some(true));
    }

    #[test]
    fn test_stop_from_worker_keeps_state() {
        let worker = WorkerContext::spawn("test-worker", 0u32).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let slot = Arc::new(std::sync::Mutex::new(Some(worker)));
        let inner = Arc::clone(&slot);

        slot.lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .post(move |n: &mut u32| {
                *n = 5;
                let worker = inner.lock().unwrap().take().unwrap();
                worker.post(|n: &mut u32| *n += 1).unwrap();
                tx.send(worker.stop_detached()).unwrap();
            })
            .unwrap();

        let join = rx.recv().unwrap().unwrap();
        assert_eq!(join.join().unwrap(), 6);
    }
}
