//! Network engine backed by reqwest
//!
//! Global init builds a multi-threaded tokio runtime and a shared
//! `reqwest::Client` with automatic redirects turned off. Each started
//! request becomes one runtime task that waits for commands (follow the
//! redirect, read into a buffer) and reports progress through its
//! [`EngineCallbacks`].
//!
//! Priorities go out as the HTTP `Priority` header. Connections are TCP,
//! so `disable_connection_migration` has nothing to turn off. Recognised
//! `experimental_options`: `pool_max_idle_per_host` (count) and
//! `pool_idle_timeout` (seconds).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::redirect::Policy;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::buffer::ByteBuffer;
use super::context::ContextConfig;
use super::engine::{LoadStateCallback, NetworkEngine, RequestParams, UploadChannel};
use super::priority::EnginePriority;
use super::exception::{kind_for_net_error, net_error};
use super::metrics::RawMetrics;
use super::request::EngineCallbacks;
use super::status::RequestStatus;
use crate::utils::lock;

const UPLOAD_CHUNK: usize = 16 * 1024;
const MAX_REDIRECTS: usize = 20;
const ERR_FAILED: i32 = -2;
const ERR_INVALID_URL: i32 = -300;
const ERR_TOO_MANY_REDIRECTS: i32 = -310;

enum Command {
    FollowRedirect,
    Read {
        buffer: ByteBuffer,
        position: usize,
        limit: usize,
    },
}

struct Pending {
    params: RequestParams,
    callbacks: EngineCallbacks,
    method: reqwest::Method,
    headers: Vec<(String, String)>,
    upload: Option<Arc<dyn UploadChannel>>,
}

struct Live {
    commands: mpsc::UnboundedSender<Command>,
    callbacks: EngineCallbacks,
    task: tokio::task::AbortHandle,
    load_state: Arc<AtomicI32>,
}

enum Entry {
    Pending(Pending),
    Live(Live),
}

/// reqwest-backed [`NetworkEngine`]
pub struct ReqwestEngine {
    config: ContextConfig,
    runtime: OnceLock<Runtime>,
    client: OnceLock<reqwest::Client>,
    next_handle: AtomicU64,
    requests: Mutex<HashMap<u64, Entry>>,
}

impl ReqwestEngine {
    pub fn new(config: ContextConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            runtime: OnceLock::new(),
            client: OnceLock::new(),
            next_handle: AtomicU64::new(1),
            requests: Mutex::new(HashMap::new()),
        })
    }

    fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.config.user_agent.clone())
            .connect_timeout(self.config.connect_timeout)
            .redirect(Policy::none());
        if !self.config.enable_http2 {
            builder = builder.http1_only();
        }
        let options = &self.config.experimental_options;
        if let Some(max) = options.get("pool_max_idle_per_host").and_then(|v| v.as_u64()) {
            builder = builder.pool_max_idle_per_host(usize::try_from(max).unwrap_or(usize::MAX));
        }
        if let Some(secs) = options.get("pool_idle_timeout").and_then(|v| v.as_f64()) {
            match Duration::try_from_secs_f64(secs) {
                Ok(timeout) => builder = builder.pool_idle_timeout(timeout),
                Err(e) => log::warn!("ignoring pool_idle_timeout {}: {}", secs, e),
            }
        }
        builder.build()
    }

    fn with_pending(&self, handle: u64, f: impl FnOnce(&mut Pending)) -> bool {
        match lock(&self.requests).get_mut(&handle) {
            Some(Entry::Pending(pending)) => {
                f(pending);
                true
            }
            _ => false,
        }
    }

    fn send(&self, handle: u64, command: Command) -> Result<(), Command> {
        match lock(&self.requests).get(&handle) {
            Some(Entry::Live(live)) => live.commands.send(command).map_err(|e| e.0),
            _ => Err(command),
        }
    }
}

impl NetworkEngine for ReqwestEngine {
    fn version(&self) -> String {
        super::bootstrap::EXPECTED_ENGINE_VERSION.to_string()
    }

    fn initialize_on_init_thread(&self) {
        match tokio::runtime::Builder::new_multi_thread()
            .thread_name("binix-net")
            .enable_all()
            .build()
        {
            Ok(runtime) => {
                let _ = self.runtime.set(runtime);
            }
            Err(e) => log::error!("failed to build network runtime: {}", e),
        }
        match self.build_client() {
            Ok(client) => {
                let _ = self.client.set(client);
            }
            Err(e) => log::error!("failed to build http client: {}", e),
        }
    }

    fn create_request(&self, params: &RequestParams, callbacks: EngineCallbacks) -> Option<u64> {
        if self.runtime.get().is_none() || self.client.get().is_none() {
            return None;
        }
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        lock(&self.requests).insert(
            handle,
            Entry::Pending(Pending {
                params: params.clone(),
                callbacks,
                method: reqwest::Method::GET,
                headers: Vec::new(),
                upload: None,
            }),
        );
        Some(handle)
    }

    fn set_method(&self, handle: u64, method: &str) -> bool {
        let Ok(method) = reqwest::Method::from_bytes(method.as_bytes()) else {
            return false;
        };
        self.with_pending(handle, |pending| pending.method = method)
    }

    fn add_header(&self, handle: u64, name: &str, value: &str) -> bool {
        let valid = reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_ok()
            && reqwest::header::HeaderValue::from_str(value).is_ok();
        valid
            && self.with_pending(handle, |pending| {
                pending.headers.push((name.to_string(), value.to_string()))
            })
    }

    fn attach_upload(&self, handle: u64, upload: Arc<dyn UploadChannel>) {
        self.with_pending(handle, |pending| pending.upload = Some(upload));
    }

    fn start(&self, handle: u64) {
        let (Some(runtime), Some(client)) = (self.runtime.get(), self.client.get()) else {
            return;
        };
        let mut requests = lock(&self.requests);
        if !matches!(requests.get(&handle), Some(Entry::Pending(_))) {
            return;
        }
        let Some(Entry::Pending(pending)) = requests.remove(&handle) else {
            return;
        };
        let (commands, rx) = mpsc::unbounded_channel();
        let load_state = Arc::new(AtomicI32::new(RequestStatus::Idle as i32));
        let callbacks = pending.callbacks.clone();
        let task = runtime.spawn(drive(client.clone(), pending, rx, Arc::clone(&load_state)));
        requests.insert(
            handle,
            Entry::Live(Live {
                commands,
                callbacks,
                task: task.abort_handle(),
                load_state,
            }),
        );
    }

    fn follow_redirect(&self, handle: u64) {
        if self.send(handle, Command::FollowRedirect).is_err() {
            log::warn!("follow_redirect on unknown request {}", handle);
        }
    }

    fn read(
        &self,
        handle: u64,
        buffer: ByteBuffer,
        position: usize,
        limit: usize,
    ) -> Result<(), ByteBuffer> {
        self.send(
            handle,
            Command::Read {
                buffer,
                position,
                limit,
            },
        )
        .map_err(|command| match command {
            Command::Read { buffer, .. } => buffer,
            Command::FollowRedirect => ByteBuffer::allocate_direct(0),
        })
    }

    fn destroy(&self, handle: u64, send_on_canceled: bool) {
        let entry = lock(&self.requests).remove(&handle);
        let callbacks = match entry {
            Some(Entry::Live(live)) => {
                live.task.abort();
                live.callbacks
            }
            Some(Entry::Pending(pending)) => pending.callbacks,
            None => return,
        };
        if send_on_canceled {
            match self.runtime.get() {
                Some(runtime) => {
                    runtime.spawn(async move { callbacks.on_canceled() });
                }
                None => {
                    std::thread::spawn(move || callbacks.on_canceled());
                }
            }
        }
    }

    fn get_status(&self, handle: u64, listener: LoadStateCallback) {
        let load_state = match lock(&self.requests).get(&handle) {
            Some(Entry::Live(live)) => live.load_state.load(Ordering::Acquire),
            Some(Entry::Pending(_)) => RequestStatus::Idle as i32,
            None => RequestStatus::Invalid as i32,
        };
        std::thread::spawn(move || listener(load_state));
    }
}

impl Drop for ReqwestEngine {
    fn drop(&mut self) {
        // The last reference may be released on a runtime worker.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Net error code for a reqwest failure
fn net_error_for(error: &reqwest::Error) -> i32 {
    let detail = format!("{:?}", error).to_ascii_lowercase();
    if error.is_timeout() {
        net_error::ERR_TIMED_OUT
    } else if detail.contains("dns error") || detail.contains("failed to lookup") {
        net_error::ERR_NAME_NOT_RESOLVED
    } else if error.is_connect() {
        if detail.contains("connection reset") {
            net_error::ERR_CONNECTION_RESET
        } else {
            net_error::ERR_CONNECTION_REFUSED
        }
    } else if error.is_body() || error.is_decode() {
        net_error::ERR_CONNECTION_CLOSED
    } else if error.is_builder() {
        ERR_INVALID_URL
    } else {
        ERR_FAILED
    }
}

fn report_error(callbacks: &EngineCallbacks, native: i32, message: &str, received: u64) {
    let kind = kind_for_net_error(native);
    log::debug!("request failed with net error {}: {}", native, message);
    callbacks.on_error(kind as i32, native, 0, message, received);
}

fn header_list(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect()
}

fn protocol_name(version: reqwest::Version) -> &'static str {
    match version {
        reqwest::Version::HTTP_09 => "http/0.9",
        reqwest::Version::HTTP_10 => "http/1.0",
        reqwest::Version::HTTP_11 => "http/1.1",
        reqwest::Version::HTTP_2 => "h2",
        reqwest::Version::HTTP_3 => "h3",
        _ => "unknown",
    }
}

/// Pull the whole upload body through the channel
async fn collect_upload(upload: Arc<dyn UploadChannel>) -> Option<Vec<u8>> {
    let expected = upload.length();
    let mut body = Vec::new();
    loop {
        if expected.is_some_and(|len| body.len() as u64 >= len) {
            return Some(body);
        }
        let (tx, rx) = oneshot::channel();
        upload.read(
            ByteBuffer::allocate_direct(UPLOAD_CHUNK),
            Box::new(move |buffer, bytes_read, final_chunk| {
                let _ = tx.send((buffer, bytes_read, final_chunk));
            }),
        );
        // A dropped completion means the request already failed.
        let (buffer, bytes_read, final_chunk) = rx.await.ok()?;
        let end = buffer.position();
        body.extend_from_slice(&buffer.contents(end - bytes_read.min(end), end));
        if final_chunk {
            return Some(body);
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

/// Timestamps reqwest lets us observe; DNS, connect and TLS stay unknown
struct Timings {
    request_start: i64,
    sending_start: i64,
    sending_end: i64,
    response_start: i64,
    sent_bytes: u64,
}

impl Timings {
    fn new() -> Self {
        Self {
            request_start: now_ms(),
            sending_start: -1,
            sending_end: -1,
            response_start: -1,
            sent_bytes: 0,
        }
    }

    fn finish(&self, received_bytes: u64) -> RawMetrics {
        RawMetrics {
            timings_ms: [
                self.request_start,
                -1,
                -1,
                -1,
                -1,
                -1,
                -1,
                self.sending_start,
                self.sending_end,
                self.response_start,
                now_ms(),
            ],
            socket_reused: false,
            sent_bytes: i64::try_from(self.sent_bytes).unwrap_or(i64::MAX),
            received_bytes: i64::try_from(received_bytes).unwrap_or(i64::MAX),
        }
    }
}

/// How a driven request ended
enum Outcome {
    Succeeded(u64),
    Failed {
        native: i32,
        message: String,
        received: u64,
    },
    /// Destroyed or failed on the request side; nothing left to report
    Abandoned,
}

impl Outcome {
    fn failed(native: i32, message: impl Into<String>, received: u64) -> Self {
        Self::Failed {
            native,
            message: message.into(),
            received,
        }
    }
}

async fn drive(
    client: reqwest::Client,
    pending: Pending,
    commands: mpsc::UnboundedReceiver<Command>,
    load_state: Arc<AtomicI32>,
) {
    let callbacks = pending.callbacks.clone();
    let enable_metrics = pending.params.enable_metrics;
    let mut timings = Timings::new();
    let outcome = exchange(client, pending, commands, load_state, &mut timings).await;

    let received = match &outcome {
        Outcome::Succeeded(received) | Outcome::Failed { received, .. } => *received,
        Outcome::Abandoned => return,
    };
    if enable_metrics {
        if let Err(e) = callbacks.on_metrics_collected(timings.finish(received)) {
            log::warn!("dropping metrics: {}", e);
        }
    }
    match outcome {
        Outcome::Succeeded(received) => callbacks.on_succeeded(received),
        Outcome::Failed {
            native,
            message,
            received,
        } => report_error(&callbacks, native, &message, received),
        Outcome::Abandoned => {}
    }
}

async fn exchange(
    client: reqwest::Client,
    pending: Pending,
    mut commands: mpsc::UnboundedReceiver<Command>,
    load_state: Arc<AtomicI32>,
    timings: &mut Timings,
) -> Outcome {
    let Pending {
        params,
        callbacks,
        mut method,
        headers,
        upload,
    } = pending;

    let mut url = match Url::parse(&params.url) {
        Ok(url) => url,
        Err(e) => return Outcome::failed(ERR_INVALID_URL, e.to_string(), 0),
    };
    let mut body = match upload {
        Some(upload) => {
            load_state.store(RequestStatus::SendingRequest as i32, Ordering::Release);
            match collect_upload(upload).await {
                Some(body) => Some(body),
                None => return Outcome::Abandoned,
            }
        }
        None => None,
    };
    let urgency = params.priority.urgency();

    let mut redirects = 0;
    let response = loop {
        load_state.store(RequestStatus::WaitingForResponse as i32, Ordering::Release);
        let mut request = client.request(method.clone(), url.clone());
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if params.disable_cache {
            request = request.header("Cache-Control", "no-cache");
        }
        if urgency != EnginePriority::Medium.urgency() {
            request = request.header("Priority", format!("u={}", urgency));
        }
        if let Some(body) = &body {
            timings.sent_bytes += body.len() as u64;
            request = request.body(body.clone());
        }

        timings.sending_start = now_ms();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Outcome::failed(net_error_for(&e), e.to_string(), 0),
        };
        timings.response_start = now_ms();
        timings.sending_end = timings.response_start;

        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| url.join(v).ok());
        let Some(location) = location.filter(|_| status.is_redirection()) else {
            break response;
        };

        redirects += 1;
        if redirects > MAX_REDIRECTS {
            return Outcome::failed(ERR_TOO_MANY_REDIRECTS, "too many redirects", 0);
        }
        callbacks.on_redirect_received(
            location.as_str(),
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            header_list(response.headers()),
            false,
            protocol_name(response.version()),
            "",
            response.content_length().unwrap_or(0),
        );
        load_state.store(RequestStatus::WaitingForDelegate as i32, Ordering::Release);
        match commands.recv().await {
            Some(Command::FollowRedirect) => {}
            Some(Command::Read { .. }) | None => return Outcome::Abandoned,
        }
        if status == reqwest::StatusCode::SEE_OTHER {
            method = reqwest::Method::GET;
            body = None;
        }
        url = location;
    };

    let status = response.status();
    callbacks.on_response_started(
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        header_list(response.headers()),
        false,
        protocol_name(response.version()),
        "",
    );
    load_state.store(RequestStatus::WaitingForDelegate as i32, Ordering::Release);

    let mut stream: BoxStream<'static, reqwest::Result<_>> = response.bytes_stream().boxed();
    let mut leftover: Vec<u8> = Vec::new();
    let mut offset = 0;
    let mut received = 0u64;
    while let Some(command) = commands.recv().await {
        let Command::Read {
            mut buffer,
            position,
            limit,
        } = command
        else {
            continue;
        };
        load_state.store(RequestStatus::ReadingResponse as i32, Ordering::Release);
        while offset == leftover.len() {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    leftover = chunk.to_vec();
                    offset = 0;
                }
                Some(Err(e)) => return Outcome::failed(net_error_for(&e), e.to_string(), received),
                None => return Outcome::Succeeded(received),
            }
        }
        let n = (leftover.len() - offset).min(limit - position);
        buffer.unfilled_mut()[..n].copy_from_slice(&leftover[offset..offset + n]);
        offset += n;
        received += n as u64;
        load_state.store(RequestStatus::WaitingForDelegate as i32, Ordering::Release);
        callbacks.on_read_completed(buffer, n, position, limit, received);
    }
    Outcome::Abandoned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(protocol_name(reqwest::Version::HTTP_11), "http/1.1");
        assert_eq!(protocol_name(reqwest::Version::HTTP_2), "h2");
    }

    #[test]
    fn test_requests_need_init() {
        let engine = ReqwestEngine::new(ContextConfig::default());
        assert!(engine.client.get().is_none());
        assert!(!engine.set_method(1, "GET"));
    }

    #[test]
    fn test_builds_client_without_redirects() {
        let engine = ReqwestEngine::new(ContextConfig::default());
        assert!(engine.build_client().is_ok());
    }

    #[test]
    fn test_builds_client_with_pool_options() {
        let config = ContextConfig {
            experimental_options: serde_json::json!({
                "pool_max_idle_per_host": 2,
                "pool_idle_timeout": 1.5,
            }),
            ..ContextConfig::default()
        };
        assert!(ReqwestEngine::new(config).build_client().is_ok());
    }

    #[test]
    fn test_metrics_keep_unobserved_phases_unknown() {
        let mut timings = Timings::new();
        timings.sent_bytes = 12;
        let raw = timings.finish(34);
        assert!(raw.timings_ms[0] > 0);
        assert_eq!(&raw.timings_ms[1..7], &[-1; 6]);
        assert!(raw.timings_ms[10] >= raw.timings_ms[0]);
        assert_eq!((raw.sent_bytes, raw.received_bytes), (12, 34));
    }
}
