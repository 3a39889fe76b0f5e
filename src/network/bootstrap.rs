//! One-time engine bootstrap
//!
//! The loader verifies each engine build and owns the init thread, spawned
//! once per process. Every engine then runs its own setup on that thread
//! before its first request starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use super::engine::NetworkEngine;
use super::executor::Task;
use crate::utils::{BootstrapError, lock};

/// Engine version this crate was built against
pub const EXPECTED_ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

const INIT_THREAD_NAME: &str = "binix-net-init";

struct InitThread {
    sender: Sender<Task>,
    worker: JoinHandle<()>,
}

/// Process-wide loader state with an explicit init/teardown lifecycle
pub struct LibraryLoader {
    expected_version: String,
    init_thread: Mutex<Option<InitThread>>,
    init_thread_id: Mutex<Option<ThreadId>>,
    initialized: AtomicBool,
}

impl LibraryLoader {
    /// Create a loader expecting the compiled-in engine version
    pub fn new() -> Self {
        Self::with_expected_version(EXPECTED_ENGINE_VERSION)
    }

    /// Create a loader expecting a specific engine version
    pub fn with_expected_version(expected: impl Into<String>) -> Self {
        Self {
            expected_version: expected.into(),
            init_thread: Mutex::new(None),
            init_thread_id: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Loader shared by every context that does not bring its own
    pub fn global() -> Arc<LibraryLoader> {
        static GLOBAL: OnceLock<Arc<LibraryLoader>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(LibraryLoader::new())))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Verify the engine build and bring up the init thread.
    /// Safe to call redundantly and concurrently; only the first caller
    /// spawns the thread, but every engine has its version checked.
    pub fn ensure_initialized(
        &self,
        engine: &Arc<dyn NetworkEngine>,
    ) -> Result<(), BootstrapError> {
        self.check_version(engine.as_ref())?;
        if self.is_initialized() {
            return Ok(());
        }
        let mut init_thread = lock(&self.init_thread);
        if self.is_initialized() {
            return Ok(());
        }
        self.init_sender(&mut init_thread)?;
        self.initialized.store(true, Ordering::Release);
        log::debug!("library loader up, expecting engine {}", self.expected_version);
        Ok(())
    }

    /// Run `engine`'s own setup on the init thread and wait for it.
    /// Callers run this once per engine.
    pub fn initialize_engine(&self, engine: &Arc<dyn NetworkEngine>) -> Result<(), BootstrapError> {
        self.ensure_initialized(engine)?;
        if self.on_init_thread() {
            engine.initialize_on_init_thread();
            return Ok(());
        }
        let engine = Arc::clone(engine);
        let (done_tx, done_rx) = mpsc::channel();
        self.post_to_init_thread(Box::new(move || {
            engine.initialize_on_init_thread();
            let _ = done_tx.send(());
        }))?;
        done_rx
            .recv()
            .map_err(|_| BootstrapError::InitThread("engine init did not complete".into()))
    }

    fn check_version(&self, engine: &dyn NetworkEngine) -> Result<(), BootstrapError> {
        let actual = engine.version();
        if actual == self.expected_version {
            return Ok(());
        }
        log::error!(
            "engine version mismatch: expected {}, got {}",
            self.expected_version,
            actual
        );
        Err(BootstrapError::VersionMismatch {
            expected: self.expected_version.clone(),
            actual,
        })
    }

    /// Run `task` on the init thread, inline if already on it
    pub fn post_to_init_thread(&self, task: Task) -> Result<(), BootstrapError> {
        if self.on_init_thread() {
            task();
            return Ok(());
        }
        let sender = self.init_sender(&mut lock(&self.init_thread))?;
        sender
            .send(task)
            .map_err(|_| BootstrapError::InitThread("init thread exited".into()))
    }

    /// Whether the caller is running on the init thread
    pub fn on_init_thread(&self) -> bool {
        *lock(&self.init_thread_id) == Some(thread::current().id())
    }

    /// Stop the init thread and forget the initialization. Queued tasks
    /// still run before the thread exits.
    pub fn shutdown(&self) {
        let taken = lock(&self.init_thread).take();
        self.initialized.store(false, Ordering::Release);
        let Some(InitThread { sender, worker }) = taken else {
            return;
        };
        drop(sender);
        if self.on_init_thread() {
            return;
        }
        if worker.join().is_err() {
            log::warn!("init thread panicked");
        }
        lock(&self.init_thread_id).take();
    }

    fn init_sender(
        &self,
        init_thread: &mut Option<InitThread>,
    ) -> Result<Sender<Task>, BootstrapError> {
        if let Some(existing) = init_thread.as_ref() {
            return Ok(existing.sender.clone());
        }
        let (sender, rx) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name(INIT_THREAD_NAME.to_string())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            })
            .map_err(|e| BootstrapError::InitThread(e.to_string()))?;
        *lock(&self.init_thread_id) = Some(worker.thread().id());
        *init_thread = Some(InitThread {
            sender: sender.clone(),
            worker,
        });
        Ok(sender)
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LibraryLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::recording::RecordingEngine;
    use std::time::Duration;

    #[test]
    fn test_init_thread_spawned_once() {
        let loader = LibraryLoader::new();
        let engine: Arc<dyn NetworkEngine> = RecordingEngine::new();

        loader.ensure_initialized(&engine).unwrap();
        let first = *lock(&loader.init_thread_id);
        loader.ensure_initialized(&engine).unwrap();

        assert!(loader.is_initialized());
        assert!(first.is_some());
        assert_eq!(*lock(&loader.init_thread_id), first);
    }

    #[test]
    fn test_each_engine_initializes_on_init_thread() {
        let loader = LibraryLoader::new();
        let first = RecordingEngine::new();
        let second = RecordingEngine::new();
        for recording in [&first, &second] {
            let engine: Arc<dyn NetworkEngine> = recording.clone();
            loader.initialize_engine(&engine).unwrap();
        }
        for recording in [&first, &second] {
            assert_eq!(recording.init_count(), 1);
            assert_eq!(recording.init_thread_name().as_deref(), Some(INIT_THREAD_NAME));
        }
    }

    #[test]
    fn test_concurrent_callers_share_one_init_thread() {
        let loader = Arc::new(LibraryLoader::new());
        let recording = RecordingEngine::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = Arc::clone(&loader);
                let engine: Arc<dyn NetworkEngine> = recording.clone();
                thread::spawn(move || {
                    loader.ensure_initialized(&engine).unwrap();
                    *lock(&loader.init_thread_id)
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids[0].is_some());
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(recording.init_count(), 0);
    }

    #[test]
    fn test_version_mismatch_fails_fast() {
        let loader = LibraryLoader::with_expected_version("0.0.0-other");
        let recording = RecordingEngine::new();
        let engine: Arc<dyn NetworkEngine> = recording.clone();

        let err = loader.initialize_engine(&engine).unwrap_err();
        assert!(matches!(err, BootstrapError::VersionMismatch { .. }));
        assert!(!loader.is_initialized());
        assert_eq!(recording.init_count(), 0);
    }

    #[test]
    fn test_version_checked_after_loader_is_up() {
        let loader = LibraryLoader::new();
        let good: Arc<dyn NetworkEngine> = RecordingEngine::new();
        let stale: Arc<dyn NetworkEngine> = RecordingEngine::with_version("0.0.0-other");
        loader.ensure_initialized(&good).unwrap();
        let err = loader.initialize_engine(&stale).unwrap_err();
        assert!(matches!(err, BootstrapError::VersionMismatch { .. }));
    }

    #[test]
    fn test_post_to_init_thread_runs_inline_when_nested() {
        let loader = Arc::new(LibraryLoader::new());
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&loader);
        loader
            .post_to_init_thread(Box::new(move || {
                let nested_tx = tx.clone();
                inner
                    .post_to_init_thread(Box::new(move || nested_tx.send("nested").unwrap()))
                    .unwrap();
                tx.send("outer").unwrap();
            }))
            .unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first, second), ("nested", "outer"));
    }

    #[test]
    fn test_shutdown_resets() {
        let loader = LibraryLoader::new();
        let recording = RecordingEngine::new();
        let engine: Arc<dyn NetworkEngine> = recording.clone();
        loader.initialize_engine(&engine).unwrap();
        loader.shutdown();
        assert!(!loader.is_initialized());
        loader.initialize_engine(&engine).unwrap();
        assert!(loader.is_initialized());
        assert_eq!(recording.init_count(), 2);
    }
}
