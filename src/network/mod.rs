//! Asynchronous URL request stack
//!
//! A [`UrlRequest`] is created from a [`UrlRequestContext`], driven by a
//! [`NetworkEngine`] and reports every event to a [`UrlRequestCallback`] on
//! an application-supplied [`Executor`].

mod bootstrap;
mod buffer;
mod callback;
mod context;
mod engine;
mod exception;
mod executor;
mod metrics;
mod priority;
pub mod recording;
mod reqwest_engine;
mod request;
mod response;
mod status;
mod upload;

pub use bootstrap::{EXPECTED_ENGINE_VERSION, LibraryLoader};
pub use buffer::ByteBuffer;
pub use callback::{CallbackError, CallbackPanic, CallbackResult, RequestEvent, UrlRequestCallback};
pub use context::{ContextBuilder, ContextConfig, UrlRequestContext};
pub use engine::{
    EngineHandle, LoadStateCallback, NetworkEngine, RequestParams, UploadChannel, UploadReadDone,
    UploadRewindDone,
};
pub use exception::{
    Cause, ErrorKind, NetworkException, QuicDetails, RequestKind, UrlRequestException,
    kind_for_net_error, map_error_code, net_error,
};
pub use executor::{DirectExecutor, Executor, RejectedExecution, Task, ThreadExecutor, TokioExecutor};
pub use metrics::{
    FinishedReason, RawMetrics, RequestFinishedInfo, RequestFinishedListener, RequestMetrics,
};
pub use priority::{EnginePriority, RequestPriority, ResourceType};
pub use reqwest_engine::ReqwestEngine;
pub use request::{EngineCallbacks, UrlRequest, UrlRequestBuilder};
pub use response::UrlResponseInfo;
pub use status::{RequestStatus, StatusListener};
pub use upload::{BytesUploadProvider, UploadDataProvider, UploadDataSink, UploadDataStream};
