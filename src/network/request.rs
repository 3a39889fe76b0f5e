//! URL request and its state machine
//!
//! A request moves through NOT_STARTED -> STARTED, with independent
//! waiting-on-redirect and waiting-on-read sub-flags, and becomes done once
//! the engine handle is released. All flags and the handle live behind one
//! mutex that is never held across a user callback or an executor post.

use std::sync::{Arc, Mutex, Weak};

use super::buffer::ByteBuffer;
use super::callback::{CallbackError, RequestEvent, UrlRequestCallback, run_guarded};
use super::context::UrlRequestContext;
use super::engine::{EngineHandle, NetworkEngine, RequestParams};
use super::exception::{NetworkException, RequestKind, UrlRequestException};
use super::executor::{Executor, Task};
use super::metrics::{FinishedReason, RawMetrics, RequestFinishedInfo, RequestMetrics};
use super::priority::{RequestPriority, ResourceType};
use super::response::UrlResponseInfo;
use super::status::{RequestStatus, StatusListener};
use super::upload::{UploadDataProvider, UploadDataStream};
use crate::utils::{RequestError, Result, lock};

type DestroyedHook = Box<dyn FnOnce() + Send>;

/// Builder for [`UrlRequest`]
pub struct UrlRequestBuilder {
    url: String,
    callback: Arc<dyn UrlRequestCallback>,
    executor: Arc<dyn Executor>,
    context: UrlRequestContext,
    method: Option<String>,
    headers: Vec<(String, String)>,
    priority: Option<RequestPriority>,
    disable_cache: bool,
    disable_connection_migration: bool,
    enable_metrics: Option<bool>,
    upload: Option<(Arc<dyn UploadDataProvider>, Arc<dyn Executor>)>,
}

impl UrlRequestBuilder {
    pub fn new(
        url: impl Into<String>,
        callback: Arc<dyn UrlRequestCallback>,
        executor: Arc<dyn Executor>,
        context: &UrlRequestContext,
    ) -> Self {
        Self {
            url: url.into(),
            callback,
            executor,
            context: context.clone(),
            method: None,
            headers: Vec::new(),
            priority: None,
            disable_cache: false,
            disable_connection_migration: false,
            enable_metrics: None,
            upload: None,
        }
    }

    /// Set the HTTP method; defaults to GET, or POST with an upload
    pub fn http_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Add a header. Order is kept and duplicates are allowed.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn priority(mut self, priority: RequestPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Use the default priority for a resource type
    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.priority = Some(resource_type.default_priority());
        self
    }

    pub fn disable_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    pub fn disable_connection_migration(mut self) -> Self {
        self.disable_connection_migration = true;
        self
    }

    /// Override the context's metrics setting for this request
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Attach a request body read on `executor`
    pub fn upload_data_provider(
        mut self,
        provider: Arc<dyn UploadDataProvider>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        self.upload = Some((provider, executor));
        self
    }

    /// Validate and create the request
    pub fn build(self) -> Result<UrlRequest> {
        if self.url.is_empty() {
            return Err(RequestError::null_argument("URL is required."));
        }
        if self.context.is_shutdown() {
            return Err(RequestError::illegal_state("Engine is shut down."));
        }
        let params = RequestParams {
            url: self.url,
            priority: self
                .priority
                .unwrap_or_else(|| self.context.default_priority())
                .to_engine(),
            disable_cache: self.disable_cache,
            disable_connection_migration: self.disable_connection_migration,
            enable_metrics: self
                .enable_metrics
                .unwrap_or_else(|| self.context.metrics_enabled()),
        };
        let request = UrlRequest::new(params, self.callback, self.executor, self.context);
        if let Some(method) = self.method {
            request.set_http_method(method)?;
        }
        for (name, value) in self.headers {
            request.add_header(name, value)?;
        }
        if let Some((provider, executor)) = self.upload {
            request.set_upload_data_provider(provider, executor)?;
        }
        Ok(request)
    }
}

struct RequestState {
    started: bool,
    waiting_on_redirect: bool,
    waiting_on_read: bool,
    handle: Option<Arc<EngineHandle>>,
    method: Option<String>,
    headers: Vec<(String, String)>,
    upload: Option<Arc<UploadDataStream>>,
    url_chain: Vec<String>,
    received_bytes_from_redirects: u64,
    response_info: Option<Arc<UrlResponseInfo>>,
    last_info: Option<Arc<UrlResponseInfo>>,
    finished_reason: FinishedReason,
    exception: Option<UrlRequestException>,
    metrics: Option<RequestMetrics>,
    canceled_delivered: bool,
    on_destroyed: Option<DestroyedHook>,
}

impl RequestState {
    fn is_done(&self) -> bool {
        self.started && self.handle.is_none()
    }

    fn check_not_started(&self) -> Result<()> {
        if self.started {
            return Err(RequestError::illegal_state("Request is already started."));
        }
        Ok(())
    }

    fn has_content_type(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case("Content-Type") && !value.is_empty())
    }
}

/// Work left over after releasing the handle, run once the lock is dropped
#[must_use]
struct Teardown {
    upload: Option<Arc<UploadDataStream>>,
    hook: Option<DestroyedHook>,
}

impl Teardown {
    fn run(self) {
        if let Some(upload) = self.upload {
            upload.close();
        }
        if let Some(hook) = self.hook {
            hook();
        }
    }
}

/// Buffer and snapshot handed from a read completion to its posted task.
/// At most one read is outstanding at a time.
struct PendingRead {
    buffer: ByteBuffer,
    info: Arc<UrlResponseInfo>,
}

pub(crate) struct RequestInner {
    context: UrlRequestContext,
    engine: Arc<dyn NetworkEngine>,
    callback: Arc<dyn UrlRequestCallback>,
    executor: Arc<dyn Executor>,
    initial_url: String,
    params: RequestParams,
    state: Mutex<RequestState>,
    read_slot: Mutex<Option<PendingRead>>,
    self_ref: Weak<RequestInner>,
}

/// An HTTP request driven by the network engine.
///
/// Cloning yields another handle to the same request.
#[derive(Clone)]
pub struct UrlRequest {
    inner: Arc<RequestInner>,
}

impl UrlRequest {
    fn new(
        params: RequestParams,
        callback: Arc<dyn UrlRequestCallback>,
        executor: Arc<dyn Executor>,
        context: UrlRequestContext,
    ) -> Self {
        let url = params.url.clone();
        let inner = Arc::new_cyclic(|self_ref| RequestInner {
            engine: context.engine(),
            context,
            callback,
            executor,
            initial_url: url.clone(),
            params,
            state: Mutex::new(RequestState {
                started: false,
                waiting_on_redirect: false,
                waiting_on_read: false,
                handle: None,
                method: None,
                headers: Vec::new(),
                upload: None,
                url_chain: vec![url],
                received_bytes_from_redirects: 0,
                response_info: None,
                last_info: None,
                finished_reason: FinishedReason::Unknown,
                exception: None,
                metrics: None,
                canceled_delivered: false,
                on_destroyed: None,
            }),
            read_slot: Mutex::new(None),
            self_ref: self_ref.clone(),
        });
        Self { inner }
    }

    /// Set the HTTP method. Only valid before `start`.
    pub fn set_http_method(&self, method: impl Into<String>) -> Result<()> {
        let method = method.into();
        let mut state = lock(&self.inner.state);
        state.check_not_started()?;
        if method.is_empty() {
            return Err(RequestError::null_argument("Method is required."));
        }
        state.method = Some(method);
        Ok(())
    }

    /// Add a request header. Only valid before `start`.
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let mut state = lock(&self.inner.state);
        state.check_not_started()?;
        if name.is_empty() {
            return Err(RequestError::null_argument("Invalid header name."));
        }
        state.headers.push((name, value.into()));
        Ok(())
    }

    /// Attach a request body. Only valid before `start`; turns a default
    /// GET into POST.
    pub fn set_upload_data_provider(
        &self,
        provider: Arc<dyn UploadDataProvider>,
        executor: Arc<dyn Executor>,
    ) -> Result<()> {
        let mut state = lock(&self.inner.state);
        state.check_not_started()?;
        if state.method.is_none() {
            state.method = Some("POST".to_string());
        }
        state.upload = Some(UploadDataStream::new(
            provider,
            executor,
            Arc::downgrade(&self.inner),
        ));
        Ok(())
    }

    /// Hand the request to the engine.
    ///
    /// Invalid methods or headers fail the whole start and leave nothing
    /// behind. With an upload, the engine starts once the body stream has
    /// initialized on the upload executor.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.context.ensure_engine_initialized()?;

        let mut state = lock(&inner.state);
        state.check_not_started()?;
        if state.upload.is_some() && !state.has_content_type() {
            return Err(RequestError::illegal_argument(
                "Requests with upload data must have a Content-Type.",
            ));
        }

        let callbacks = EngineCallbacks {
            inner: Arc::clone(inner),
        };
        let id = inner
            .engine
            .create_request(&inner.params, callbacks)
            .ok_or_else(|| RequestError::Runtime("Engine failed to create request.".into()))?;

        if let Some(method) = &state.method {
            if !inner.engine.set_method(id, method) {
                inner.engine.destroy(id, false);
                return Err(RequestError::illegal_argument(format!(
                    "Invalid http method {}",
                    method
                )));
            }
        }
        for (name, value) in &state.headers {
            if !inner.engine.add_header(id, name, value) {
                inner.engine.destroy(id, false);
                return Err(RequestError::illegal_argument(format!(
                    "Invalid header {}={}",
                    name, value
                )));
            }
        }

        let handle = EngineHandle::new(id);
        state.started = true;
        state.handle = Some(Arc::clone(&handle));
        inner.context.request_started();

        let upload = state.upload.clone();
        match upload {
            Some(upload) => {
                drop(state);
                let request = Arc::clone(inner);
                let stream = Arc::clone(&upload);
                upload.post_task(Box::new(move || {
                    stream.initialize()?;
                    let state = lock(&request.state);
                    if state.is_done() {
                        return Ok(());
                    }
                    let id = handle.id()?;
                    request.engine.attach_upload(id, stream);
                    request.engine.start(id);
                    Ok(())
                }));
            }
            None => inner.engine.start(id),
        }
        Ok(())
    }

    /// Continue to the pending redirect target
    pub fn follow_redirect(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if !state.waiting_on_redirect {
            return Err(RequestError::illegal_state("No redirect to follow."));
        }
        state.waiting_on_redirect = false;
        let Some(handle) = state.handle.as_ref() else {
            return Ok(());
        };
        self.inner.engine.follow_redirect(handle.id()?);
        Ok(())
    }

    /// Read the next chunk of the body into `buffer`, from its position up
    /// to its limit. The buffer comes back in `on_read_completed`.
    pub fn read(&self, buffer: ByteBuffer) -> Result<()> {
        if !buffer.has_remaining() {
            return Err(RequestError::illegal_argument("ByteBuffer is already full."));
        }
        if !buffer.is_direct() {
            return Err(RequestError::illegal_argument(
                "byteBuffer must be a direct ByteBuffer.",
            ));
        }
        let mut state = lock(&self.inner.state);
        if !state.waiting_on_read {
            return Err(RequestError::illegal_state("Unexpected read attempt."));
        }
        state.waiting_on_read = false;
        let Some(handle) = state.handle.as_ref() else {
            return Ok(());
        };
        let (position, limit) = (buffer.position(), buffer.limit());
        match self.inner.engine.read(handle.id()?, buffer, position, limit) {
            Ok(()) => Ok(()),
            Err(_rejected) => {
                state.waiting_on_read = true;
                Err(RequestError::illegal_argument("Unable to call native read"))
            }
        }
    }

    /// Cancel the request. Idempotent; a no-op before `start` or once done.
    pub fn cancel(&self) {
        let teardown = {
            let mut state = lock(&self.inner.state);
            if !state.started || state.is_done() {
                return;
            }
            state.finished_reason = FinishedReason::Canceled;
            self.inner.destroy_locked(&mut state, true)
        };
        teardown.run();
    }

    /// True once started and the engine handle has been released
    pub fn is_done(&self) -> bool {
        lock(&self.inner.state).is_done()
    }

    /// Report the current load state to `listener` on the executor
    pub fn get_status(&self, listener: StatusListener) {
        let state = lock(&self.inner.state);
        if let Some(id) = state.handle.as_ref().and_then(|h| h.id().ok()) {
            let request = Arc::clone(&self.inner);
            self.inner.engine.get_status(
                id,
                Box::new(move |load_state| {
                    request.post_task(Box::new(move || {
                        listener(RequestStatus::from_load_state(load_state))
                    }));
                }),
            );
            return;
        }
        drop(state);
        self.inner
            .post_task(Box::new(move || listener(RequestStatus::Invalid)));
    }

    /// URL the request was created with
    pub fn url(&self) -> &str {
        &self.inner.initial_url
    }

    /// Every URL visited so far, redirects included
    pub fn url_chain(&self) -> Vec<String> {
        lock(&self.inner.state).url_chain.clone()
    }

    /// Final response metadata, once the response has started
    pub fn response_info(&self) -> Option<Arc<UrlResponseInfo>> {
        lock(&self.inner.state).response_info.clone()
    }

    /// Most recent snapshot, redirect or final
    pub fn last_response_info(&self) -> Option<Arc<UrlResponseInfo>> {
        lock(&self.inner.state).last_info.clone()
    }

    pub fn finished_reason(&self) -> FinishedReason {
        lock(&self.inner.state).finished_reason
    }

    pub fn exception(&self) -> Option<UrlRequestException> {
        lock(&self.inner.state).exception.clone()
    }

    pub fn metrics(&self) -> Option<RequestMetrics> {
        lock(&self.inner.state).metrics
    }

    pub fn is_waiting_on_read(&self) -> bool {
        lock(&self.inner.state).waiting_on_read
    }

    pub fn is_waiting_on_redirect(&self) -> bool {
        lock(&self.inner.state).waiting_on_redirect
    }

    /// Run `hook` right after the engine handle is released
    #[doc(hidden)]
    pub fn set_on_destroyed_hook(&self, hook: impl FnOnce() + Send + 'static) {
        lock(&self.inner.state).on_destroyed = Some(Box::new(hook));
    }
}

impl std::fmt::Debug for UrlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlRequest")
            .field("url", &self.inner.initial_url)
            .finish_non_exhaustive()
    }
}

impl RequestInner {
    fn arc(&self) -> Option<Arc<RequestInner>> {
        self.self_ref.upgrade()
    }

    /// Release the handle. The caller runs the returned teardown once the
    /// state lock is dropped.
    fn destroy_locked(&self, state: &mut RequestState, send_on_canceled: bool) -> Teardown {
        let mut teardown = Teardown {
            upload: None,
            hook: None,
        };
        let Some(handle) = state.handle.take() else {
            return teardown;
        };
        if let Some(id) = handle.release() {
            self.engine.destroy(id, send_on_canceled);
        }
        self.context.request_finished();
        teardown.upload = state.upload.clone();
        teardown.hook = state.on_destroyed.take();
        teardown
    }

    /// Post to the callback executor. A rejected post fails the request;
    /// if that post is rejected too the failure is only logged.
    fn post_task(&self, task: Task) {
        if let Err(rejected) = self.executor.execute(task) {
            log::error!("Exception posting task to executor: {}", rejected);
            self.fail_with_exception(UrlRequestException::Internal(format!(
                "Exception posting task to executor: {}",
                rejected
            )));
        }
    }

    fn post_event(&self, event: RequestEvent) {
        let Some(request) = self.arc() else {
            return;
        };
        self.post_task(Box::new(move || request.deliver(event)));
    }

    fn deliver(self: Arc<Self>, event: RequestEvent) {
        let terminal = event.is_terminal();
        let name = event.name();
        let request = UrlRequest {
            inner: Arc::clone(&self),
        };
        let result = run_guarded(|| self.callback.dispatch(&request, event));
        if let Err(err) = result {
            if terminal {
                log::error!("Exception in {} method: {}", name, err);
            } else {
                self.on_callback_exception(err);
            }
        }
    }

    fn on_callback_exception(&self, err: CallbackError) {
        log::error!("Exception in UrlRequest.Callback: {}", err);
        self.fail_with_exception(UrlRequestException::Callback(Arc::from(err)));
    }

    pub(crate) fn on_upload_exception(&self, err: CallbackError) {
        log::error!("Exception in upload method: {}", err);
        self.fail_with_exception(UrlRequestException::Upload(Arc::from(err)));
    }

    /// Tear down and deliver exactly one `on_failed`
    fn fail_with_exception(&self, exception: UrlRequestException) {
        let (teardown, info) = {
            let mut state = lock(&self.state);
            if !state.started || state.is_done() {
                return;
            }
            let teardown = self.destroy_locked(&mut state, false);
            state.exception = Some(exception.clone());
            state.finished_reason = FinishedReason::Failed;
            (teardown, state.response_info.clone())
        };
        teardown.run();
        self.post_event(RequestEvent::Failed {
            info,
            error: exception,
        });
        self.report_finished();
    }

    fn report_finished(&self) {
        if !self.context.has_finished_listeners() {
            return;
        }
        let report = {
            let state = lock(&self.state);
            RequestFinishedInfo {
                url: self.initial_url.clone(),
                metrics: state.metrics,
                finished_reason: state.finished_reason,
                response_info: state.response_info.clone(),
                exception: state.exception.clone(),
            }
        };
        let context = self.context.clone();
        self.post_task(Box::new(move || context.report_finished(report)));
    }

    fn response_snapshot(
        state: &RequestState,
        http_status_code: u16,
        http_status_text: &str,
        headers: Vec<(String, String)>,
        was_cached: bool,
        negotiated_protocol: &str,
        proxy_server: &str,
    ) -> Arc<UrlResponseInfo> {
        Arc::new(UrlResponseInfo::new(
            state.url_chain.clone(),
            http_status_code,
            http_status_text,
            headers,
            was_cached,
            negotiated_protocol,
            proxy_server,
        ))
    }
}

/// Notifications from the engine for one request.
///
/// Engines may call these from any thread. Nothing is delivered once the
/// request is done, except the `on_canceled` that completes a cancel.
#[derive(Clone)]
pub struct EngineCallbacks {
    inner: Arc<RequestInner>,
}

impl EngineCallbacks {
    /// The engine paused on a redirect to `new_location`
    #[allow(clippy::too_many_arguments)]
    pub fn on_redirect_received(
        &self,
        new_location: &str,
        http_status_code: u16,
        http_status_text: &str,
        headers: Vec<(String, String)>,
        was_cached: bool,
        negotiated_protocol: &str,
        proxy_server: &str,
        received_bytes: u64,
    ) {
        let info = {
            let mut state = lock(&self.inner.state);
            if state.is_done() {
                return;
            }
            let info = RequestInner::response_snapshot(
                &state,
                http_status_code,
                http_status_text,
                headers,
                was_cached,
                negotiated_protocol,
                proxy_server,
            );
            state.received_bytes_from_redirects += received_bytes;
            info.set_received_bytes_count(state.received_bytes_from_redirects);
            state.url_chain.push(new_location.to_string());
            state.last_info = Some(Arc::clone(&info));
            state.waiting_on_redirect = true;
            info
        };
        self.inner.post_event(RequestEvent::RedirectReceived {
            info,
            new_location: new_location.to_string(),
        });
    }

    /// Final response headers arrived
    pub fn on_response_started(
        &self,
        http_status_code: u16,
        http_status_text: &str,
        headers: Vec<(String, String)>,
        was_cached: bool,
        negotiated_protocol: &str,
        proxy_server: &str,
    ) {
        let info = {
            let mut state = lock(&self.inner.state);
            if state.is_done() {
                return;
            }
            let info = RequestInner::response_snapshot(
                &state,
                http_status_code,
                http_status_text,
                headers,
                was_cached,
                negotiated_protocol,
                proxy_server,
            );
            info.set_received_bytes_count(state.received_bytes_from_redirects);
            state.response_info = Some(Arc::clone(&info));
            state.last_info = Some(Arc::clone(&info));
            state.waiting_on_read = true;
            info
        };
        self.inner.post_event(RequestEvent::ResponseStarted { info });
    }

    /// `bytes_read` bytes were written at `initial_position`.
    /// `received_bytes` counts the current response only.
    pub fn on_read_completed(
        &self,
        mut buffer: ByteBuffer,
        bytes_read: usize,
        initial_position: usize,
        initial_limit: usize,
        received_bytes: u64,
    ) {
        let info = {
            let mut state = lock(&self.inner.state);
            if state.is_done() {
                return;
            }
            let Some(info) = state.response_info.clone() else {
                drop(state);
                self.inner.fail_with_exception(UrlRequestException::Internal(
                    "Read completed before the response started".into(),
                ));
                return;
            };
            info.set_received_bytes_count(state.received_bytes_from_redirects + received_bytes);
            if buffer.position() != initial_position
                || buffer.limit() != initial_limit
                || bytes_read > buffer.remaining()
            {
                drop(state);
                self.inner.fail_with_exception(UrlRequestException::Internal(
                    "ByteBuffer modified externally during read".into(),
                ));
                return;
            }
            buffer.advance(bytes_read);
            state.waiting_on_read = true;
            info
        };

        let previous = lock(&self.inner.read_slot).replace(PendingRead { buffer, info });
        debug_assert!(previous.is_none(), "overlapping read completions");
        let Some(request) = self.inner.arc() else {
            return;
        };
        self.inner.post_task(Box::new(move || {
            let Some(PendingRead { buffer, info }) = lock(&request.read_slot).take() else {
                return;
            };
            request.deliver(RequestEvent::ReadCompleted { info, buffer });
        }));
    }

    /// The body has been fully read. `received_bytes` counts the current
    /// response only.
    pub fn on_succeeded(&self, received_bytes: u64) {
        let (teardown, info) = {
            let mut state = lock(&self.inner.state);
            if state.is_done() {
                return;
            }
            let Some(info) = state.response_info.clone() else {
                drop(state);
                self.inner.fail_with_exception(UrlRequestException::Internal(
                    "Request succeeded without a response".into(),
                ));
                return;
            };
            info.set_received_bytes_count(state.received_bytes_from_redirects + received_bytes);
            let teardown = self.inner.destroy_locked(&mut state, false);
            state.finished_reason = FinishedReason::Succeeded;
            (teardown, info)
        };
        teardown.run();
        self.inner.post_event(RequestEvent::Succeeded { info });
        self.inner.report_finished();
    }

    /// The engine failed the request
    pub fn on_error(
        &self,
        error_code: i32,
        native_error_code: i32,
        native_sub_error_code: i32,
        message: &str,
        received_bytes: u64,
    ) {
        {
            let state = lock(&self.inner.state);
            if state.is_done() {
                return;
            }
            if let Some(info) = &state.response_info {
                info.set_received_bytes_count(
                    state.received_bytes_from_redirects + received_bytes,
                );
            }
        }
        let exception = NetworkException::from_engine(
            error_code,
            native_error_code,
            native_sub_error_code,
            message,
            RequestKind::UrlRequest,
        );
        self.inner
            .fail_with_exception(UrlRequestException::Network(exception));
    }

    /// Teardown requested by `cancel` completed
    pub fn on_canceled(&self) {
        let info = {
            let mut state = lock(&self.inner.state);
            if state.canceled_delivered || !state.is_done() {
                return;
            }
            state.canceled_delivered = true;
            state.response_info.clone()
        };
        self.inner.post_event(RequestEvent::Canceled { info });
        self.inner.report_finished();
    }

    /// Timing metrics for the request; accepted at most once
    pub fn on_metrics_collected(&self, metrics: RawMetrics) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if state.metrics.is_some() {
            return Err(RequestError::illegal_state(
                "Metrics collection should only happen once.",
            ));
        }
        state.metrics = Some(metrics.into());
        Ok(())
    }

    /// The upload body could not be produced; fails the request
    pub fn on_upload_error(&self, err: CallbackError) {
        self.inner.on_upload_exception(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::callback::CallbackResult;
    use crate::network::context::{ContextConfig, UrlRequestContext};
    use crate::network::engine::{LoadStateCallback, UploadChannel};
    use crate::network::executor::DirectExecutor;
    use crate::network::bootstrap::{EXPECTED_ENGINE_VERSION, LibraryLoader};
    use mockall::{Sequence, mock, predicate::eq};
    use pretty_assertions::assert_eq;

    mock! {
        Engine {}
        impl NetworkEngine for Engine {
            fn version(&self) -> String;
            fn initialize_on_init_thread(&self);
            fn create_request(&self, params: &RequestParams, callbacks: EngineCallbacks) -> Option<u64>;
            fn set_method(&self, handle: u64, method: &str) -> bool;
            fn add_header(&self, handle: u64, name: &str, value: &str) -> bool;
            fn attach_upload(&self, handle: u64, upload: Arc<dyn UploadChannel>);
            fn start(&self, handle: u64);
            fn follow_redirect(&self, handle: u64);
            fn read(
                &self,
                handle: u64,
                buffer: ByteBuffer,
                position: usize,
                limit: usize,
            ) -> std::result::Result<(), ByteBuffer>;
            fn destroy(&self, handle: u64, send_on_canceled: bool);
            fn get_status(&self, handle: u64, listener: LoadStateCallback);
        }
    }

    struct NoopCallback;

    impl UrlRequestCallback for NoopCallback {
        fn on_redirect_received(
            &self,
            _: &UrlRequest,
            _: &Arc<UrlResponseInfo>,
            _: &str,
        ) -> CallbackResult {
            Ok(())
        }
        fn on_response_started(&self, _: &UrlRequest, _: &Arc<UrlResponseInfo>) -> CallbackResult {
            Ok(())
        }
        fn on_read_completed(
            &self,
            _: &UrlRequest,
            _: &Arc<UrlResponseInfo>,
            _: ByteBuffer,
        ) -> CallbackResult {
            Ok(())
        }
        fn on_succeeded(&self, _: &UrlRequest, _: &Arc<UrlResponseInfo>) -> CallbackResult {
            Ok(())
        }
        fn on_failed(
            &self,
            _: &UrlRequest,
            _: Option<&Arc<UrlResponseInfo>>,
            _: &UrlRequestException,
        ) -> CallbackResult {
            Ok(())
        }
        fn on_canceled(&self, _: &UrlRequest, _: Option<&Arc<UrlResponseInfo>>) -> CallbackResult {
            Ok(())
        }
    }

    fn mock_context(engine: MockEngine) -> UrlRequestContext {
        UrlRequestContext::builder(Arc::new(engine))
            .config(ContextConfig::default())
            .loader(Arc::new(LibraryLoader::new()))
            .build()
    }

    fn expect_bootstrap(engine: &mut MockEngine) {
        engine
            .expect_version()
            .returning(|| EXPECTED_ENGINE_VERSION.to_string());
        engine.expect_initialize_on_init_thread().times(1).return_const(());
    }

    fn builder(context: &UrlRequestContext) -> UrlRequestBuilder {
        UrlRequestBuilder::new(
            "https://example.com/",
            Arc::new(NoopCallback),
            Arc::new(DirectExecutor),
            context,
        )
    }

    #[test]
    fn test_start_registers_headers_in_order_then_starts() {
        let mut engine = MockEngine::new();
        expect_bootstrap(&mut engine);
        let mut seq = Sequence::new();
        engine
            .expect_create_request()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Some(7));
        engine
            .expect_add_header()
            .with(eq(7), eq("Content-Type"), eq("text/plain"))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        engine
            .expect_add_header()
            .with(eq(7), eq("X-Trace"), eq("1"))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        engine
            .expect_start()
            .with(eq(7))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        engine.expect_set_method().never();
        engine.expect_attach_upload().never();

        let context = mock_context(engine);
        let request = builder(&context)
            .add_header("Content-Type", "text/plain")
            .add_header("X-Trace", "1")
            .build()
            .unwrap();
        request.start().unwrap();
        assert!(!request.is_done());
    }

    #[test]
    fn test_invalid_header_tears_down_and_rethrows() {
        let mut engine = MockEngine::new();
        expect_bootstrap(&mut engine);
        engine.expect_create_request().returning(|_, _| Some(3));
        engine.expect_add_header().return_const(false);
        engine
            .expect_destroy()
            .with(eq(3), eq(false))
            .times(1)
            .return_const(());
        engine.expect_start().never();

        let context = mock_context(engine);
        let request = builder(&context)
            .add_header("header:name", "headervalue")
            .build()
            .unwrap();
        let err = request.start().unwrap_err();
        assert_eq!(
            err,
            RequestError::IllegalArgument("Invalid header header:name=headervalue".into())
        );
        assert!(!request.is_done());
        assert_eq!(context.active_requests(), 0);
    }

    #[test]
    fn test_invalid_method_fails_start() {
        let mut engine = MockEngine::new();
        expect_bootstrap(&mut engine);
        engine.expect_create_request().returning(|_, _| Some(4));
        engine.expect_set_method().return_const(false);
        engine.expect_destroy().times(1).return_const(());

        let context = mock_context(engine);
        let request = builder(&context).http_method("bad:method!").build().unwrap();
        let err = request.start().unwrap_err();
        assert_eq!(
            err,
            RequestError::IllegalArgument("Invalid http method bad:method!".into())
        );
    }

    #[test]
    fn test_mutators_fail_after_start() {
        let mut engine = MockEngine::new();
        expect_bootstrap(&mut engine);
        engine.expect_create_request().returning(|_, _| Some(1));
        engine.expect_start().return_const(());

        let context = mock_context(engine);
        let request = builder(&context).build().unwrap();
        request.start().unwrap();

        let already = RequestError::IllegalState("Request is already started.".into());
        assert_eq!(request.add_header("a", "b").unwrap_err(), already);
        assert_eq!(request.set_http_method("PUT").unwrap_err(), already);
        assert_eq!(request.start().unwrap_err(), already);
    }

    #[test]
    fn test_empty_arguments_are_null_arguments() {
        let engine = MockEngine::new();
        let context = mock_context(engine);
        let err = UrlRequestBuilder::new(
            "",
            Arc::new(NoopCallback),
            Arc::new(DirectExecutor),
            &context,
        )
        .build()
        .unwrap_err();
        assert_eq!(err, RequestError::NullArgument("URL is required.".into()));

        let request = builder(&context).build().unwrap();
        assert_eq!(
            request.set_http_method("").unwrap_err(),
            RequestError::NullArgument("Method is required.".into())
        );
        assert!(matches!(
            request.add_header("", "v"),
            Err(RequestError::NullArgument(_))
        ));
    }

    #[test]
    fn test_cancel_sends_canceled_signal_once() {
        let mut engine = MockEngine::new();
        expect_bootstrap(&mut engine);
        engine.expect_create_request().returning(|_, _| Some(9));
        engine.expect_start().return_const(());
        engine
            .expect_destroy()
            .with(eq(9), eq(true))
            .times(1)
            .return_const(());

        let context = mock_context(engine);
        let request = builder(&context).build().unwrap();
        request.cancel();
        assert!(!request.is_done());
        request.start().unwrap();
        request.cancel();
        request.cancel();
        assert!(request.is_done());
        assert_eq!(request.finished_reason(), FinishedReason::Canceled);
    }

    #[test]
    fn test_read_and_redirect_require_waiting_state() {
        let engine = MockEngine::new();
        let context = mock_context(engine);
        let request = builder(&context).build().unwrap();
        assert_eq!(
            request.read(ByteBuffer::allocate_direct(8)).unwrap_err(),
            RequestError::IllegalState("Unexpected read attempt.".into())
        );
        assert_eq!(
            request.follow_redirect().unwrap_err(),
            RequestError::IllegalState("No redirect to follow.".into())
        );
        assert_eq!(
            request.read(ByteBuffer::allocate(8)).unwrap_err(),
            RequestError::IllegalArgument("byteBuffer must be a direct ByteBuffer.".into())
        );
        let mut full = ByteBuffer::allocate_direct(4);
        full.put(b"full");
        assert_eq!(
            request.read(full).unwrap_err(),
            RequestError::IllegalArgument("ByteBuffer is already full.".into())
        );
    }
}
