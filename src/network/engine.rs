//! Boundary with the network engine
//!
//! The engine owns DNS, TLS, QUIC, HTTP/2 and socket I/O. The request only
//! drives it through an opaque handle and receives notifications back through
//! [`EngineCallbacks`], always treated as arriving on an arbitrary network
//! thread.
//!
//! Engines must never invoke [`EngineCallbacks`] synchronously from inside
//! one of the trait methods below: the request may be holding its state lock
//! while it calls into the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::buffer::ByteBuffer;
use super::priority::EnginePriority;
use super::request::EngineCallbacks;
use crate::utils::{RequestError, Result};

/// Per-request settings passed to `create_request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParams {
    pub url: String,
    pub priority: EnginePriority,
    pub disable_cache: bool,
    pub disable_connection_migration: bool,
    pub enable_metrics: bool,
}

/// Consumer of a raw load state, see `RequestStatus::from_load_state`
pub type LoadStateCallback = Box<dyn FnOnce(i32) + Send>;

/// Completion of an upload read: buffer, bytes written, final chunk
pub type UploadReadDone = Box<dyn FnOnce(ByteBuffer, usize, bool) + Send>;

/// Completion of an upload rewind
pub type UploadRewindDone = Box<dyn FnOnce() + Send>;

/// Body source the engine pulls upload bytes from.
///
/// Failures never reach the engine: the request fails instead and the
/// completion is dropped.
pub trait UploadChannel: Send + Sync {
    /// Body length, or `None` for a chunked upload
    fn length(&self) -> Option<u64>;
    /// Fill `buffer` from its position; `on_done` receives it back
    fn read(&self, buffer: ByteBuffer, on_done: UploadReadDone);
    /// Restart the body from the beginning, e.g. before following a redirect
    fn rewind(&self, on_done: UploadRewindDone);
}

/// Operations the request invokes on the network engine
pub trait NetworkEngine: Send + Sync {
    /// Build version the engine was compiled from
    fn version(&self) -> String;

    /// One-time engine-global setup, run on the loader's init thread
    fn initialize_on_init_thread(&self) {}

    /// Allocate engine state for one request. Returns the handle value.
    fn create_request(&self, params: &RequestParams, callbacks: EngineCallbacks) -> Option<u64>;

    fn set_method(&self, handle: u64, method: &str) -> bool;

    fn add_header(&self, handle: u64, name: &str, value: &str) -> bool;

    /// Attach the upload body before `start`
    fn attach_upload(&self, handle: u64, upload: Arc<dyn UploadChannel>);

    fn start(&self, handle: u64);

    fn follow_redirect(&self, handle: u64);

    /// Start filling `buffer` in `[position, limit)`. A rejected read hands
    /// the buffer back.
    fn read(
        &self,
        handle: u64,
        buffer: ByteBuffer,
        position: usize,
        limit: usize,
    ) -> std::result::Result<(), ByteBuffer>;

    /// Release engine state. With `send_on_canceled` the engine reports
    /// `on_canceled` once teardown completes.
    fn destroy(&self, handle: u64, send_on_canceled: bool);

    fn get_status(&self, handle: u64, listener: LoadStateCallback);
}

/// Handle to engine-owned request state, released exactly once.
///
/// Reading the id after release is a checked error rather than a stale value.
#[derive(Debug)]
pub struct EngineHandle {
    id: u64,
    released: AtomicBool,
}

impl EngineHandle {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            released: AtomicBool::new(false),
        })
    }

    /// Handle value, as long as it has not been released
    pub fn id(&self) -> Result<u64> {
        if self.is_released() {
            return Err(RequestError::illegal_state("Engine handle used after release."));
        }
        Ok(self.id)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Mark released. Only the first caller gets the id back.
    pub(crate) fn release(&self) -> Option<u64> {
        (!self.released.swap(true, Ordering::AcqRel)).then_some(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_released_once() {
        let handle = EngineHandle::new(7);
        assert_eq!(handle.id(), Ok(7));
        assert_eq!(handle.release(), Some(7));
        assert_eq!(handle.release(), None);
        assert!(handle.id().is_err());
    }
}
