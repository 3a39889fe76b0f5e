//! Request body upload
//!
//! The application supplies an [`UploadDataProvider`] and the executor it
//! runs on. [`UploadDataStream`] adapts it to the engine's pull-based
//! [`UploadChannel`]: every provider call is posted to the upload executor,
//! and any error, panic or rejected post fails the owning request.

use std::sync::{Arc, Mutex, Weak};

use super::buffer::ByteBuffer;
use super::callback::{CallbackError, CallbackResult, run_guarded};
use super::engine::{UploadChannel, UploadReadDone, UploadRewindDone};
use super::executor::Executor;
use super::request::RequestInner;
use crate::utils::{RequestError, lock};

/// Source of a request body, driven on the upload executor
pub trait UploadDataProvider: Send + Sync {
    /// Body length in bytes, or -1 for a chunked upload
    fn length(&self) -> Result<i64, CallbackError>;

    /// Write the next bytes into `buffer` from its position, then report
    /// through `sink`. May complete asynchronously.
    fn read(&self, sink: UploadDataSink, buffer: ByteBuffer) -> CallbackResult;

    /// Restart the body from the beginning, then report through `sink`
    fn rewind(&self, sink: UploadDataSink) -> CallbackResult;

    /// Called once after the request completes
    fn close(&self) -> CallbackResult {
        Ok(())
    }
}

/// Completion handle for one provider read or rewind
pub struct UploadDataSink {
    stream: Arc<UploadDataStream>,
}

impl UploadDataSink {
    /// `buffer` now holds new bytes up to its position.
    /// `final_chunk` ends a chunked upload.
    pub fn on_read_succeeded(self, buffer: ByteBuffer, final_chunk: bool) {
        self.stream.read_succeeded(buffer, final_chunk);
    }

    pub fn on_read_error(self, error: CallbackError) {
        self.stream.fail(error);
    }

    pub fn on_rewind_succeeded(self) {
        self.stream.rewind_succeeded();
    }

    pub fn on_rewind_error(self, error: CallbackError) {
        self.stream.fail(error);
    }
}

#[derive(Default)]
struct StreamState {
    length: Option<i64>,
    total_read: u64,
    read_start: usize,
    read_done: Option<UploadReadDone>,
    rewind_done: Option<UploadRewindDone>,
    closed: bool,
}

/// Provider wrapped for the engine
pub struct UploadDataStream {
    provider: Arc<dyn UploadDataProvider>,
    executor: Arc<dyn Executor>,
    request: Weak<RequestInner>,
    state: Mutex<StreamState>,
    self_ref: Weak<UploadDataStream>,
}

type UploadTask = Box<dyn FnOnce() -> CallbackResult + Send>;

impl UploadDataStream {
    pub(crate) fn new(
        provider: Arc<dyn UploadDataProvider>,
        executor: Arc<dyn Executor>,
        request: Weak<RequestInner>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            provider,
            executor,
            request,
            state: Mutex::new(StreamState::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// Query the body length. Runs on the upload executor before the engine
    /// starts.
    pub(crate) fn initialize(&self) -> CallbackResult {
        let length = self.provider.length()?;
        lock(&self.state).length = Some(length);
        log::debug!("upload initialized, length {}", length);
        Ok(())
    }

    /// Run provider code on the upload executor
    pub(crate) fn post_task(&self, task: UploadTask) {
        let request = self.request.clone();
        let posted = self.executor.execute(Box::new(move || {
            if let Err(err) = run_guarded(task) {
                if let Some(request) = request.upgrade() {
                    request.on_upload_exception(err);
                }
            }
        }));
        if let Err(rejected) = posted {
            self.fail(Box::new(rejected));
        }
    }

    /// Close the provider once, on the upload executor. Errors are logged.
    pub(crate) fn close(&self) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
        }
        let provider = Arc::clone(&self.provider);
        let posted = self.executor.execute(Box::new(move || {
            if let Err(err) = run_guarded(|| provider.close()) {
                log::error!("Exception thrown when closing the upload provider: {}", err);
            }
        }));
        if let Err(rejected) = posted {
            log::error!("Exception posting upload close: {}", rejected);
        }
    }

    fn sink(&self) -> Option<UploadDataSink> {
        self.self_ref
            .upgrade()
            .map(|stream| UploadDataSink { stream })
    }

    fn fail(&self, error: CallbackError) {
        if let Some(request) = self.request.upgrade() {
            request.on_upload_exception(error);
        }
    }

    fn read_succeeded(&self, buffer: ByteBuffer, final_chunk: bool) {
        let outcome = {
            let mut state = lock(&self.state);
            match state.read_done.take() {
                None => Err(RequestError::illegal_state("Not expecting a read result.")),
                Some(on_done) => {
                    let length = state.length.unwrap_or(-1);
                    let bytes_read = buffer.position().saturating_sub(state.read_start);
                    state.total_read += bytes_read as u64;
                    if final_chunk && length >= 0 {
                        Err(RequestError::illegal_argument(
                            "Non-chunked upload can't have last chunk",
                        ))
                    } else if length >= 0 && state.total_read > length as u64 {
                        Err(RequestError::illegal_argument(format!(
                            "Read upload data length {} exceeds expected length {}",
                            state.total_read, length
                        )))
                    } else {
                        Ok((on_done, bytes_read))
                    }
                }
            }
        };
        match outcome {
            Ok((on_done, bytes_read)) => on_done(buffer, bytes_read, final_chunk),
            Err(err) => self.fail(Box::new(err)),
        }
    }

    fn rewind_succeeded(&self) {
        let on_done = {
            let mut state = lock(&self.state);
            state.total_read = 0;
            state.rewind_done.take()
        };
        match on_done {
            Some(on_done) => on_done(),
            None => self.fail(Box::new(RequestError::illegal_state(
                "Not expecting a rewind result.",
            ))),
        }
    }
}

impl UploadChannel for UploadDataStream {
    fn length(&self) -> Option<u64> {
        lock(&self.state)
            .length
            .filter(|length| *length >= 0)
            .map(|length| length as u64)
    }

    fn read(&self, buffer: ByteBuffer, on_done: UploadReadDone) {
        {
            let mut state = lock(&self.state);
            state.read_start = buffer.position();
            state.read_done = Some(on_done);
        }
        let Some(sink) = self.sink() else {
            return;
        };
        let provider = Arc::clone(&self.provider);
        self.post_task(Box::new(move || provider.read(sink, buffer)));
    }

    fn rewind(&self, on_done: UploadRewindDone) {
        lock(&self.state).rewind_done = Some(on_done);
        let Some(sink) = self.sink() else {
            return;
        };
        let provider = Arc::clone(&self.provider);
        self.post_task(Box::new(move || provider.rewind(sink)));
    }
}

/// Provider serving an in-memory body
pub struct BytesUploadProvider {
    data: Vec<u8>,
    offset: Mutex<usize>,
}

impl BytesUploadProvider {
    pub fn new(data: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            data: data.into(),
            offset: Mutex::new(0),
        })
    }
}

impl UploadDataProvider for BytesUploadProvider {
    fn length(&self) -> Result<i64, CallbackError> {
        Ok(self.data.len() as i64)
    }

    fn read(&self, sink: UploadDataSink, mut buffer: ByteBuffer) -> CallbackResult {
        {
            let mut offset = lock(&self.offset);
            let written = buffer.put(&self.data[*offset..]);
            *offset += written;
        }
        sink.on_read_succeeded(buffer, false);
        Ok(())
    }

    fn rewind(&self, sink: UploadDataSink) -> CallbackResult {
        *lock(&self.offset) = 0;
        sink.on_rewind_succeeded();
        Ok(())
    }
}
