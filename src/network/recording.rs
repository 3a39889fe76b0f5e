//! In-process scriptable engine
//!
//! [`RecordingEngine`] performs no I/O. It records every call made across
//! the engine boundary and lets a driver (usually a test) play the network
//! side by firing notifications through the stored [`EngineCallbacks`].
//! Notifications are always fired with the engine lock released, and
//! cancellation is acknowledged from a separate thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use super::bootstrap::EXPECTED_ENGINE_VERSION;
use super::buffer::ByteBuffer;
use super::engine::{LoadStateCallback, NetworkEngine, RequestParams, UploadChannel};
use super::metrics::RawMetrics;
use super::request::EngineCallbacks;
use crate::utils::{Result, lock};

/// One call across the engine boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateRequest { handle: u64, url: String },
    SetMethod { handle: u64, method: String },
    AddHeader { handle: u64, name: String, value: String },
    AttachUpload { handle: u64, length: Option<u64> },
    Start { handle: u64 },
    FollowRedirect { handle: u64 },
    Read { handle: u64, position: usize, limit: usize },
    Destroy { handle: u64, send_on_canceled: bool },
    GetStatus { handle: u64 },
}

struct Slot {
    callbacks: EngineCallbacks,
    params: RequestParams,
    pending_read: Option<ByteBuffer>,
    upload: Option<Arc<dyn UploadChannel>>,
    received_bytes: u64,
    load_state: i32,
}

#[derive(Default)]
struct Recorded {
    next_handle: u64,
    calls: Vec<EngineCall>,
    slots: HashMap<u64, Slot>,
    retired: HashMap<u64, EngineCallbacks>,
    init_count: usize,
    init_thread_name: Option<String>,
    reject_reads: bool,
    refuse_create: bool,
}

/// Engine double driven by the caller
pub struct RecordingEngine {
    version: String,
    state: Mutex<Recorded>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Self::with_version(EXPECTED_ENGINE_VERSION)
    }

    /// Engine reporting a specific build version
    pub fn with_version(version: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            version: version.into(),
            state: Mutex::new(Recorded {
                next_handle: 1,
                ..Recorded::default()
            }),
        })
    }

    /// Calls seen so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.state).calls.clone()
    }

    pub fn init_count(&self) -> usize {
        lock(&self.state).init_count
    }

    /// Name of the thread global init ran on
    pub fn init_thread_name(&self) -> Option<String> {
        lock(&self.state).init_thread_name.clone()
    }

    /// Handle of the most recently created request
    pub fn last_handle(&self) -> Option<u64> {
        lock(&self.state).slots.keys().max().copied()
    }

    /// Requests created and not yet destroyed
    pub fn live_requests(&self) -> usize {
        lock(&self.state).slots.len()
    }

    pub fn params(&self, handle: u64) -> Option<RequestParams> {
        lock(&self.state)
            .slots
            .get(&handle)
            .map(|slot| slot.params.clone())
    }

    /// Forget recorded calls and destroyed requests
    pub fn clear_history(&self) {
        let mut state = lock(&self.state);
        state.calls.clear();
        state.retired.clear();
    }

    /// Refuse every `read`, handing the buffer back
    pub fn set_reject_reads(&self, reject: bool) {
        lock(&self.state).reject_reads = reject;
    }

    /// Make `create_request` fail
    pub fn set_refuse_create(&self, refuse: bool) {
        lock(&self.state).refuse_create = refuse;
    }

    pub fn set_load_state(&self, handle: u64, load_state: i32) {
        if let Some(slot) = lock(&self.state).slots.get_mut(&handle) {
            slot.load_state = load_state;
        }
    }

    /// Whether a read is waiting for `complete_read`
    pub fn has_pending_read(&self, handle: u64) -> bool {
        lock(&self.state)
            .slots
            .get(&handle)
            .is_some_and(|slot| slot.pending_read.is_some())
    }

    /// Upload body attached to `handle`
    pub fn upload(&self, handle: u64) -> Option<Arc<dyn UploadChannel>> {
        lock(&self.state)
            .slots
            .get(&handle)
            .and_then(|slot| slot.upload.clone())
    }

    fn callbacks(&self, handle: u64) -> Option<EngineCallbacks> {
        lock(&self.state)
            .slots
            .get(&handle)
            .map(|slot| slot.callbacks.clone())
    }

    /// Callbacks of a request, kept after destroy so late notifications
    /// can be replayed
    pub fn callbacks_for(&self, handle: u64) -> Option<EngineCallbacks> {
        let state = lock(&self.state);
        state
            .slots
            .get(&handle)
            .map(|slot| slot.callbacks.clone())
            .or_else(|| state.retired.get(&handle).cloned())
    }

    /// Pause on a redirect to `location`. Returns false for an unknown handle.
    pub fn redirect(&self, handle: u64, location: &str, status: u16, received_bytes: u64) -> bool {
        let Some(callbacks) = self.callbacks(handle) else {
            return false;
        };
        callbacks.on_redirect_received(
            location,
            status,
            "Found",
            vec![("Location".to_string(), location.to_string())],
            false,
            "",
            "",
            received_bytes,
        );
        true
    }

    /// Deliver final response headers
    pub fn respond(&self, handle: u64, status: u16, headers: Vec<(String, String)>) -> bool {
        let Some(callbacks) = self.callbacks(handle) else {
            return false;
        };
        callbacks.on_response_started(status, "OK", headers, false, "h2", "");
        true
    }

    /// Fill the pending read with as much of `data` as fits.
    /// Returns the byte count, or `None` with no read pending.
    pub fn complete_read(&self, handle: u64, data: &[u8]) -> Option<usize> {
        self.complete_read_with(handle, |buffer| {
            let n = data.len().min(buffer.remaining());
            buffer.unfilled_mut()[..n].copy_from_slice(&data[..n]);
            n
        })
    }

    /// Complete the pending read with a custom writer returning the
    /// reported byte count. The writer may move the buffer's position or
    /// limit to simulate external modification.
    pub fn complete_read_with(
        &self,
        handle: u64,
        write: impl FnOnce(&mut ByteBuffer) -> usize,
    ) -> Option<usize> {
        let (callbacks, mut buffer, received) = {
            let mut state = lock(&self.state);
            let slot = state.slots.get_mut(&handle)?;
            let buffer = slot.pending_read.take()?;
            (slot.callbacks.clone(), buffer, slot.received_bytes)
        };
        let (position, limit) = (buffer.position(), buffer.limit());
        let n = write(&mut buffer);
        let received = received + n as u64;
        if let Some(slot) = lock(&self.state).slots.get_mut(&handle) {
            slot.received_bytes = received;
        }
        callbacks.on_read_completed(buffer, n, position, limit, received);
        Some(n)
    }

    /// Report end of body
    pub fn succeed(&self, handle: u64) -> bool {
        let Some((callbacks, received)) = lock(&self.state)
            .slots
            .get(&handle)
            .map(|slot| (slot.callbacks.clone(), slot.received_bytes))
        else {
            return false;
        };
        callbacks.on_succeeded(received);
        true
    }

    /// Report a network failure
    pub fn fail(&self, handle: u64, error_code: i32, native_error_code: i32, message: &str) -> bool {
        self.fail_with_quic(handle, error_code, native_error_code, 0, message)
    }

    /// Report a network failure carrying a QUIC detailed error code
    pub fn fail_with_quic(
        &self,
        handle: u64,
        error_code: i32,
        native_error_code: i32,
        quic_error_code: i32,
        message: &str,
    ) -> bool {
        let Some((callbacks, received)) = lock(&self.state)
            .slots
            .get(&handle)
            .map(|slot| (slot.callbacks.clone(), slot.received_bytes))
        else {
            return false;
        };
        callbacks.on_error(
            error_code,
            native_error_code,
            quic_error_code,
            message,
            received,
        );
        true
    }

    /// Report collected metrics
    pub fn report_metrics(&self, handle: u64, metrics: RawMetrics) -> Option<Result<()>> {
        let callbacks = self.callbacks(handle)?;
        Some(callbacks.on_metrics_collected(metrics))
    }
}

/// HTTP token characters, as allowed in methods and header names
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

fn is_header_value(s: &str) -> bool {
    !s.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0'))
}

impl NetworkEngine for RecordingEngine {
    fn version(&self) -> String {
        self.version.clone()
    }

    fn initialize_on_init_thread(&self) {
        let mut state = lock(&self.state);
        state.init_count += 1;
        state.init_thread_name = thread::current().name().map(str::to_string);
    }

    fn create_request(&self, params: &RequestParams, callbacks: EngineCallbacks) -> Option<u64> {
        let mut state = lock(&self.state);
        if state.refuse_create {
            return None;
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.slots.insert(
            handle,
            Slot {
                callbacks,
                params: params.clone(),
                pending_read: None,
                upload: None,
                received_bytes: 0,
                load_state: 0,
            },
        );
        state.calls.push(EngineCall::CreateRequest {
            handle,
            url: params.url.clone(),
        });
        Some(handle)
    }

    fn set_method(&self, handle: u64, method: &str) -> bool {
        lock(&self.state).calls.push(EngineCall::SetMethod {
            handle,
            method: method.to_string(),
        });
        is_token(method)
    }

    fn add_header(&self, handle: u64, name: &str, value: &str) -> bool {
        lock(&self.state).calls.push(EngineCall::AddHeader {
            handle,
            name: name.to_string(),
            value: value.to_string(),
        });
        is_token(name) && is_header_value(value)
    }

    fn attach_upload(&self, handle: u64, upload: Arc<dyn UploadChannel>) {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::AttachUpload {
            handle,
            length: upload.length(),
        });
        if let Some(slot) = state.slots.get_mut(&handle) {
            slot.upload = Some(upload);
        }
    }

    fn start(&self, handle: u64) {
        lock(&self.state).calls.push(EngineCall::Start { handle });
    }

    fn follow_redirect(&self, handle: u64) {
        let mut state = lock(&self.state);
        state.calls.push(EngineCall::FollowRedirect { handle });
        if let Some(slot) = state.slots.get_mut(&handle) {
            slot.received_bytes = 0;
        }
    }

    fn read(
        &self,
        handle: u64,
        buffer: ByteBuffer,
        position: usize,
        limit: usize,
    ) -> std::result::Result<(), ByteBuffer> {
        let mut state = lock(&self.state);
        if state.reject_reads {
            return Err(buffer);
        }
        state.calls.push(EngineCall::Read {
            handle,
            position,
            limit,
        });
        match state.slots.get_mut(&handle) {
            Some(slot) => {
                slot.pending_read = Some(buffer);
                Ok(())
            }
            None => Err(buffer),
        }
    }

    fn destroy(&self, handle: u64, send_on_canceled: bool) {
        let slot = {
            let mut state = lock(&self.state);
            state.calls.push(EngineCall::Destroy {
                handle,
                send_on_canceled,
            });
            let slot = state.slots.remove(&handle);
            if let Some(slot) = &slot {
                state.retired.insert(handle, slot.callbacks.clone());
            }
            slot
        };
        if let (Some(slot), true) = (slot, send_on_canceled) {
            thread::spawn(move || slot.callbacks.on_canceled());
        }
    }

    fn get_status(&self, handle: u64, listener: LoadStateCallback) {
        let load_state = {
            let mut state = lock(&self.state);
            state.calls.push(EngineCall::GetStatus { handle });
            state.slots.get(&handle).map(|slot| slot.load_state)
        };
        let load_state = load_state.unwrap_or(-1);
        thread::spawn(move || listener(load_state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validation() {
        assert!(is_token("GET"));
        assert!(is_token("X-Custom_Header"));
        assert!(!is_token(""));
        assert!(!is_token("header:name"));
        assert!(!is_token("bad method"));
        assert!(is_header_value("text/plain; charset=utf-8"));
        assert!(!is_header_value("a\r\nInjected: 1"));
    }
}
