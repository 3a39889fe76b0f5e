//! Application-facing callback interface
//!
//! Each network event becomes one [`RequestEvent`]; [`UrlRequestCallback`]
//! has exactly one method per event kind and no default bodies, so handlers
//! are explicit and exhaustive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use super::buffer::ByteBuffer;
use super::exception::UrlRequestException;
use super::request::UrlRequest;
use super::response::UrlResponseInfo;

/// Error returned by a user callback. The request fails with it as cause.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a user callback
pub type CallbackResult = Result<(), CallbackError>;

/// Events delivered to the application, in engine order
#[derive(Debug)]
pub enum RequestEvent {
    RedirectReceived {
        info: Arc<UrlResponseInfo>,
        new_location: String,
    },
    ResponseStarted {
        info: Arc<UrlResponseInfo>,
    },
    ReadCompleted {
        info: Arc<UrlResponseInfo>,
        buffer: ByteBuffer,
    },
    Succeeded {
        info: Arc<UrlResponseInfo>,
    },
    Failed {
        info: Option<Arc<UrlResponseInfo>>,
        error: UrlRequestException,
    },
    Canceled {
        info: Option<Arc<UrlResponseInfo>>,
    },
}

impl RequestEvent {
    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Canceled { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RedirectReceived { .. } => "onRedirectReceived",
            Self::ResponseStarted { .. } => "onResponseStarted",
            Self::ReadCompleted { .. } => "onReadCompleted",
            Self::Succeeded { .. } => "onSucceeded",
            Self::Failed { .. } => "onFailed",
            Self::Canceled { .. } => "onCanceled",
        }
    }
}

/// Handler for request events, invoked on the request's executor.
///
/// Returning an error (or panicking) from one of the first three methods
/// fails the request. Errors from the terminal methods are only logged.
pub trait UrlRequestCallback: Send + Sync {
    /// A redirect is pending; call `request.follow_redirect()` to continue
    fn on_redirect_received(
        &self,
        request: &UrlRequest,
        info: &Arc<UrlResponseInfo>,
        new_location: &str,
    ) -> CallbackResult;

    /// Headers are in; call `request.read()` to receive the body
    fn on_response_started(&self, request: &UrlRequest, info: &Arc<UrlResponseInfo>)
    -> CallbackResult;

    /// `buffer` has been filled up to its new position
    fn on_read_completed(
        &self,
        request: &UrlRequest,
        info: &Arc<UrlResponseInfo>,
        buffer: ByteBuffer,
    ) -> CallbackResult;

    fn on_succeeded(&self, request: &UrlRequest, info: &Arc<UrlResponseInfo>) -> CallbackResult;

    fn on_failed(
        &self,
        request: &UrlRequest,
        info: Option<&Arc<UrlResponseInfo>>,
        error: &UrlRequestException,
    ) -> CallbackResult;

    fn on_canceled(
        &self,
        request: &UrlRequest,
        info: Option<&Arc<UrlResponseInfo>>,
    ) -> CallbackResult;

    /// Route one event to its handler method
    fn dispatch(&self, request: &UrlRequest, event: RequestEvent) -> CallbackResult {
        match event {
            RequestEvent::RedirectReceived { info, new_location } => {
                self.on_redirect_received(request, &info, &new_location)
            }
            RequestEvent::ResponseStarted { info } => self.on_response_started(request, &info),
            RequestEvent::ReadCompleted { info, buffer } => {
                self.on_read_completed(request, &info, buffer)
            }
            RequestEvent::Succeeded { info } => self.on_succeeded(request, &info),
            RequestEvent::Failed { info, error } => self.on_failed(request, info.as_ref(), &error),
            RequestEvent::Canceled { info } => self.on_canceled(request, info.as_ref()),
        }
    }
}

/// A user callback panicked
#[derive(Debug, Error)]
#[error("callback panicked: {0}")]
pub struct CallbackPanic(pub String);

/// Run user code, turning a panic into a [`CallbackPanic`] error
pub(crate) fn run_guarded<F: FnOnce() -> CallbackResult>(f: F) -> CallbackResult {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Box::new(CallbackPanic(message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_guarded_catches_panics() {
        let err = run_guarded(|| panic!("boom")).unwrap_err();
        assert_eq!(err.to_string(), "callback panicked: boom");
    }

    #[test]
    fn test_run_guarded_passes_errors_through() {
        let err = run_guarded(|| Err("nope".into())).unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert!(run_guarded(|| Ok(())).is_ok());
    }
}
