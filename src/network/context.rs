//! Engine context shared by requests
//!
//! A context binds one [`NetworkEngine`] to its configuration and loader,
//! creates request builders, tracks active requests and fans finished
//! requests out to registered listeners.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::bootstrap::LibraryLoader;
use super::callback::{UrlRequestCallback, run_guarded};
use super::engine::NetworkEngine;
use super::executor::Executor;
use super::metrics::{RequestFinishedInfo, RequestFinishedListener};
use super::priority::RequestPriority;
use super::request::UrlRequestBuilder;
use crate::utils::{RequestError, Result, lock};

/// Engine context configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// User-Agent sent with every request
    pub user_agent: String,
    pub enable_http2: bool,
    /// Collect per-request timing metrics
    pub enable_metrics: bool,
    /// Priority of requests that do not set one, as an ordinal
    pub default_priority: RequestPriority,
    /// Connection timeout, given in seconds in JSON
    #[serde(deserialize_with = "duration_from_secs")]
    pub connect_timeout: Duration,
    /// Engine-specific tuning, read by the engine that understands it
    pub experimental_options: serde_json::Value,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
            enable_http2: true,
            enable_metrics: false,
            default_priority: RequestPriority::default(),
            connect_timeout: Duration::from_secs(30),
            experimental_options: serde_json::Value::Null,
        }
    }
}

impl ContextConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RequestError::illegal_argument(format!("Invalid context config: {}", e)))
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

struct ContextInner {
    engine: Arc<dyn NetworkEngine>,
    config: ContextConfig,
    loader: Arc<LibraryLoader>,
    engine_initialized: AtomicBool,
    engine_init_lock: Mutex<()>,
    active_requests: AtomicUsize,
    shut_down: AtomicBool,
    finished_listeners: Mutex<Vec<Arc<dyn RequestFinishedListener>>>,
}

/// Handle to an engine context; clones share state
#[derive(Clone)]
pub struct UrlRequestContext {
    inner: Arc<ContextInner>,
}

/// Builder for [`UrlRequestContext`]
pub struct ContextBuilder {
    engine: Arc<dyn NetworkEngine>,
    config: ContextConfig,
    loader: Option<Arc<LibraryLoader>>,
}

impl ContextBuilder {
    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a dedicated loader instead of the process-wide one
    pub fn loader(mut self, loader: Arc<LibraryLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn build(self) -> UrlRequestContext {
        UrlRequestContext {
            inner: Arc::new(ContextInner {
                engine: self.engine,
                config: self.config,
                loader: self.loader.unwrap_or_else(LibraryLoader::global),
                engine_initialized: AtomicBool::new(false),
                engine_init_lock: Mutex::new(()),
                active_requests: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
                finished_listeners: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl UrlRequestContext {
    /// Context with default config on the process-wide loader
    pub fn new(engine: Arc<dyn NetworkEngine>) -> Self {
        Self::builder(engine).build()
    }

    pub fn builder(engine: Arc<dyn NetworkEngine>) -> ContextBuilder {
        ContextBuilder {
            engine,
            config: ContextConfig::default(),
            loader: None,
        }
    }

    /// Start building a request whose callbacks run on `executor`
    pub fn new_url_request_builder(
        &self,
        url: impl Into<String>,
        callback: Arc<dyn UrlRequestCallback>,
        executor: Arc<dyn Executor>,
    ) -> UrlRequestBuilder {
        UrlRequestBuilder::new(url, callback, executor, self)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn loader(&self) -> &Arc<LibraryLoader> {
        &self.inner.loader
    }

    /// Bring up the loader and run this context's engine setup, once
    pub fn ensure_engine_initialized(&self) -> Result<()> {
        if self.inner.engine_initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = lock(&self.inner.engine_init_lock);
        if self.inner.engine_initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.loader.initialize_engine(&self.inner.engine)?;
        self.inner.engine_initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn engine(&self) -> Arc<dyn NetworkEngine> {
        Arc::clone(&self.inner.engine)
    }

    pub(crate) fn metrics_enabled(&self) -> bool {
        self.inner.config.enable_metrics
    }

    pub(crate) fn default_priority(&self) -> RequestPriority {
        self.inner.config.default_priority
    }

    /// Requests started and not yet done
    pub fn active_requests(&self) -> usize {
        self.inner.active_requests.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Refuse new requests. Fails while any request is still active.
    pub fn shutdown(&self) -> Result<()> {
        if self.active_requests() > 0 {
            return Err(RequestError::illegal_state(
                "Cannot shutdown with active requests.",
            ));
        }
        self.inner.shut_down.store(true, Ordering::Release);
        log::debug!("url request context shut down");
        Ok(())
    }

    pub fn add_request_finished_listener(&self, listener: Arc<dyn RequestFinishedListener>) {
        lock(&self.inner.finished_listeners).push(listener);
    }

    /// Remove a listener previously added, compared by identity
    pub fn remove_request_finished_listener(&self, listener: &Arc<dyn RequestFinishedListener>) {
        lock(&self.inner.finished_listeners).retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn has_finished_listeners(&self) -> bool {
        !lock(&self.inner.finished_listeners).is_empty()
    }

    pub(crate) fn request_started(&self) {
        self.inner.active_requests.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn request_finished(&self) {
        let _ = self
            .inner
            .active_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Hand `info` to every listener. Listener panics are logged.
    pub(crate) fn report_finished(&self, info: RequestFinishedInfo) {
        let listeners = lock(&self.inner.finished_listeners).clone();
        for listener in listeners {
            let info = info.clone();
            if let Err(err) = run_guarded(|| {
                listener.on_request_finished(info);
                Ok(())
            }) {
                log::error!("Exception thrown from request finished listener: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::recording::RecordingEngine;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults() {
        let config = ContextConfig::default();
        assert!(config.enable_http2);
        assert!(!config.enable_metrics);
        assert_eq!(config.default_priority, RequestPriority::Medium);
        assert!(config.user_agent.starts_with("binix-urlrequest/"));
    }

    #[test]
    fn test_config_from_json() {
        let config = ContextConfig::from_json(
            r#"{
                "user_agent": "test-agent",
                "enable_http2": false,
                "enable_metrics": true,
                "default_priority": 1,
                "connect_timeout": 2.5,
                "experimental_options": {"pool_max_idle_per_host": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(config.user_agent, "test-agent");
        assert!(!config.enable_http2);
        assert!(config.enable_metrics);
        assert_eq!(config.default_priority, RequestPriority::Lowest);
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.experimental_options["pool_max_idle_per_host"], 4);
    }

    #[test]
    fn test_config_rejects_bad_json() {
        let err = ContextConfig::from_json(r#"{"connect_timeout": "soon"}"#).unwrap_err();
        assert!(matches!(err, RequestError::IllegalArgument(_)));
        let err = ContextConfig::from_json(r#"{"default_priority": 9}"#).unwrap_err();
        assert!(matches!(err, RequestError::IllegalArgument(_)));
    }

    #[test]
    fn test_shutdown_refuses_new_requests() {
        let context = UrlRequestContext::builder(RecordingEngine::new())
            .loader(Arc::new(LibraryLoader::new()))
            .build();
        context.shutdown().unwrap();
        assert!(context.is_shutdown());
    }

    #[test]
    fn test_engine_initialized_once_per_context() {
        let recording = RecordingEngine::new();
        let context = UrlRequestContext::builder(recording.clone())
            .loader(Arc::new(LibraryLoader::new()))
            .build();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let context = context.clone();
                std::thread::spawn(move || context.ensure_engine_initialized())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        context.ensure_engine_initialized().unwrap();
        assert_eq!(recording.init_count(), 1);
    }

    #[test]
    fn test_contexts_sharing_a_loader_each_initialize_their_engine() {
        let loader = Arc::new(LibraryLoader::new());
        let first = RecordingEngine::new();
        let second = RecordingEngine::new();
        for recording in [&first, &second] {
            UrlRequestContext::builder(recording.clone())
                .loader(Arc::clone(&loader))
                .build()
                .ensure_engine_initialized()
                .unwrap();
        }
        assert_eq!(first.init_count(), 1);
        assert_eq!(second.init_count(), 1);
    }

    #[test]
    fn test_active_request_count_never_underflows() {
        let context = UrlRequestContext::new(RecordingEngine::new());
        context.request_finished();
        assert_eq!(context.active_requests(), 0);
        context.request_started();
        assert!(context.shutdown().is_err());
        context.request_finished();
        assert!(context.shutdown().is_ok());
    }
}
