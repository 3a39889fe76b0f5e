//! Executors that run user callbacks
//!
//! Every user-visible event is posted to an application-supplied
//! [`Executor`]. Executors must run tasks in the order they were accepted.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::utils::lock;

/// Unit of work posted to an executor
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Returned when an executor will not accept more work
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("executor rejected task: {0}")]
pub struct RejectedExecution(pub String);

/// Runs posted tasks in submission order
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution>;
}

/// Runs every task inline on the posting thread
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        task();
        Ok(())
    }
}

/// Single dedicated worker thread fed through a channel
pub struct ThreadExecutor {
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_id: thread::ThreadId,
}

impl ThreadExecutor {
    /// Spawn the worker thread
    pub fn new(name: &str) -> std::io::Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            })?;
        let thread_id = worker.thread().id();
        Ok(Arc::new(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            thread_id,
        }))
    }

    /// Whether the caller is running on the worker thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting tasks. Already queued tasks still run. Joins the worker
    /// unless called from it.
    pub fn shutdown(&self) {
        lock(&self.sender).take();
        if self.is_current() {
            return;
        }
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                log::warn!("executor worker panicked");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        lock(&self.sender).is_none()
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        let guard = lock(&self.sender);
        match guard.as_ref() {
            Some(tx) => tx
                .send(task)
                .map_err(|_| RejectedExecution("worker thread exited".into())),
            None => Err(RejectedExecution("executor is shut down".into())),
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        lock(&self.sender).take();
    }
}

/// Ordered executor on a tokio runtime.
///
/// Tasks go through an unbounded queue drained by one runtime task, so
/// submission order is kept. Callbacks should not block the runtime.
pub struct TokioExecutor {
    sender: tokio::sync::mpsc::UnboundedSender<Task>,
}

impl TokioExecutor {
    /// Start the draining task on the given runtime
    pub fn new(handle: &tokio::runtime::Handle) -> Arc<Self> {
        let (sender, mut rx) = tokio::sync::mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Arc::new(Self { sender })
    }

    /// Start on the runtime the caller is running in
    pub fn current() -> Arc<Self> {
        Self::new(&tokio::runtime::Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedExecution> {
        self.sender
            .send(task)
            .map_err(|_| RejectedExecution("runtime task exited".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_thread_executor_keeps_order() {
        let executor = ThreadExecutor::new("test-executor").unwrap();
        let (tx, rx) = channel();
        for i in 0..10 {
            let tx = tx.clone();
            executor.execute(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let seen: Vec<_> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_rejects() {
        let executor = ThreadExecutor::new("test-executor").unwrap();
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(executor.execute(Box::new(|| {})).is_err());
    }

    #[test]
    fn test_direct_executor_runs_inline() {
        let (tx, rx) = channel();
        DirectExecutor
            .execute(Box::new(move || tx.send(1).unwrap()))
            .unwrap();
        assert_eq!(rx.try_recv(), Ok(1));
    }

    #[tokio::test]
    async fn test_tokio_executor_keeps_order() {
        let executor = TokioExecutor::current();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for i in 0..5 {
            let tx = tx.clone();
            executor.execute(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_tokio_executor_rejects_after_runtime_exit() {
        let executor = tokio_test::block_on(async { TokioExecutor::current() });
        assert!(executor.execute(Box::new(|| {})).is_err());
    }
}
