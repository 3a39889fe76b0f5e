//! Failure taxonomy delivered through `on_failed`
//!
//! Engine error codes are mapped onto [`ErrorKind`] by [`map_error_code`];
//! retryability depends on the kind of request that failed.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Net error codes that carry special retry semantics
pub mod net_error {
    pub const ERR_TIMED_OUT: i32 = -7;
    pub const ERR_NETWORK_CHANGED: i32 = -21;
    pub const ERR_CONNECTION_CLOSED: i32 = -100;
    pub const ERR_CONNECTION_RESET: i32 = -101;
    pub const ERR_CONNECTION_REFUSED: i32 = -102;
    pub const ERR_NAME_NOT_RESOLVED: i32 = -105;
    pub const ERR_INTERNET_DISCONNECTED: i32 = -106;
    pub const ERR_ADDRESS_UNREACHABLE: i32 = -109;
    pub const ERR_CONNECTION_TIMED_OUT: i32 = -118;
    pub const ERR_HTTP2_PING_FAILED: i32 = -352;
    pub const ERR_QUIC_PROTOCOL_ERROR: i32 = -356;
    pub const ERR_QUIC_HANDSHAKE_FAILED: i32 = -358;
}

/// Request-facing error kinds. The numeric values are the engine's codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    HostnameNotResolved = 1,
    InternetDisconnected = 2,
    NetworkChanged = 3,
    TimedOut = 4,
    ConnectionClosed = 5,
    ConnectionTimedOut = 6,
    ConnectionRefused = 7,
    ConnectionReset = 8,
    AddressUnreachable = 9,
    QuicProtocolFailed = 10,
    Other = 11,
    ListenerExceptionThrown = 12,
}

/// Map an engine error code onto the request-facing taxonomy.
///
/// Unknown codes are logged and reported as [`ErrorKind::Other`]; the raw
/// value stays available on the exception.
pub fn map_error_code(code: i32) -> ErrorKind {
    match code {
        1 => ErrorKind::HostnameNotResolved,
        2 => ErrorKind::InternetDisconnected,
        3 => ErrorKind::NetworkChanged,
        4 => ErrorKind::TimedOut,
        5 => ErrorKind::ConnectionClosed,
        6 => ErrorKind::ConnectionTimedOut,
        7 => ErrorKind::ConnectionRefused,
        8 => ErrorKind::ConnectionReset,
        9 => ErrorKind::AddressUnreachable,
        10 => ErrorKind::QuicProtocolFailed,
        11 => ErrorKind::Other,
        12 => ErrorKind::ListenerExceptionThrown,
        unknown => {
            log::error!("Unknown error code: {}", unknown);
            ErrorKind::Other
        }
    }
}

/// Engine-side classification of a net error code, used by engines that
/// only know the native code
pub fn kind_for_net_error(native_error_code: i32) -> ErrorKind {
    use net_error::*;
    match native_error_code {
        ERR_NAME_NOT_RESOLVED => ErrorKind::HostnameNotResolved,
        ERR_INTERNET_DISCONNECTED => ErrorKind::InternetDisconnected,
        ERR_NETWORK_CHANGED => ErrorKind::NetworkChanged,
        ERR_TIMED_OUT => ErrorKind::TimedOut,
        ERR_CONNECTION_CLOSED => ErrorKind::ConnectionClosed,
        ERR_CONNECTION_TIMED_OUT => ErrorKind::ConnectionTimedOut,
        ERR_CONNECTION_REFUSED => ErrorKind::ConnectionRefused,
        ERR_CONNECTION_RESET => ErrorKind::ConnectionReset,
        ERR_ADDRESS_UNREACHABLE => ErrorKind::AddressUnreachable,
        ERR_QUIC_PROTOCOL_ERROR => ErrorKind::QuicProtocolFailed,
        _ => ErrorKind::Other,
    }
}

/// Which request surface produced the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    #[default]
    UrlRequest,
    BidirectionalStream,
}

/// QUIC diagnostics attached to [`ErrorKind::QuicProtocolFailed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuicDetails {
    pub quic_detailed_error_code: i32,
}

/// A network failure raised by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkException {
    kind: ErrorKind,
    raw_error_code: i32,
    native_error_code: i32,
    quic: Option<QuicDetails>,
    message: String,
    request_kind: RequestKind,
}

impl NetworkException {
    /// Build from the values the engine reports in `on_error`
    pub fn from_engine(
        error_code: i32,
        native_error_code: i32,
        native_sub_error_code: i32,
        message: &str,
        request_kind: RequestKind,
    ) -> Self {
        let kind = map_error_code(error_code);
        let quic = (kind == ErrorKind::QuicProtocolFailed).then_some(QuicDetails {
            quic_detailed_error_code: native_sub_error_code,
        });
        Self {
            kind,
            raw_error_code: error_code,
            native_error_code,
            quic,
            message: format!("Exception in UrlRequest: {}", message),
            request_kind,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Error code exactly as the engine reported it
    pub fn raw_error_code(&self) -> i32 {
        self.raw_error_code
    }

    /// Native net error code, e.g. `-102` for connection refused
    pub fn net_error(&self) -> i32 {
        self.native_error_code
    }

    pub fn quic_details(&self) -> Option<QuicDetails> {
        self.quic
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether reissuing the same request is safe and likely to succeed
    pub fn immediately_retryable(&self) -> bool {
        if self.request_kind == RequestKind::BidirectionalStream
            && matches!(
                self.native_error_code,
                net_error::ERR_HTTP2_PING_FAILED | net_error::ERR_QUIC_HANDSHAKE_FAILED
            )
        {
            return true;
        }
        matches!(
            self.kind,
            ErrorKind::NetworkChanged
                | ErrorKind::TimedOut
                | ErrorKind::ConnectionClosed
                | ErrorKind::ConnectionTimedOut
                | ErrorKind::ConnectionReset
        )
    }
}

impl fmt::Display for NetworkException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for NetworkException {}

/// Cause carried by callback and upload failures
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Failure delivered to `UrlRequestCallback::on_failed`
#[derive(Debug, Clone, Error)]
pub enum UrlRequestException {
    /// Engine-level failure
    #[error(transparent)]
    Network(NetworkException),
    /// A user callback returned an error or panicked
    #[error("Exception received from UrlRequest.Callback")]
    Callback(#[source] Cause),
    /// The upload data provider failed
    #[error("Exception received from UploadDataProvider")]
    Upload(#[source] Cause),
    /// The request could not proceed for a reason local to this process
    #[error("{0}")]
    Internal(String),
}

impl UrlRequestException {
    /// Error kind, with callback faults reported as listener exceptions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(e) => e.kind(),
            Self::Callback(_) => ErrorKind::ListenerExceptionThrown,
            Self::Upload(_) | Self::Internal(_) => ErrorKind::Other,
        }
    }

    /// Native net error code, or zero when the failure did not come from the engine
    pub fn net_error(&self) -> i32 {
        match self {
            Self::Network(e) => e.net_error(),
            _ => 0,
        }
    }

    pub fn immediately_retryable(&self) -> bool {
        matches!(self, Self::Network(e) if e.immediately_retryable())
    }

    /// Message of the underlying cause, if any
    pub fn cause_message(&self) -> Option<String> {
        match self {
            Self::Callback(cause) | Self::Upload(cause) => Some(cause.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_known_and_unknown_codes() {
        assert_eq!(map_error_code(1), ErrorKind::HostnameNotResolved);
        assert_eq!(map_error_code(10), ErrorKind::QuicProtocolFailed);
        assert_eq!(map_error_code(99), ErrorKind::Other);
    }

    #[test]
    fn test_unknown_code_keeps_raw_value() {
        let e = NetworkException::from_engine(99, -1, 0, "net::ERR_FAILED", RequestKind::UrlRequest);
        assert_eq!(e.kind(), ErrorKind::Other);
        assert_eq!(e.raw_error_code(), 99);
    }

    #[test]
    fn test_quic_details_only_for_quic_failures() {
        let quic = NetworkException::from_engine(10, -356, 83, "quic", RequestKind::UrlRequest);
        assert_eq!(quic.quic_details().map(|d| d.quic_detailed_error_code), Some(83));
        let reset = NetworkException::from_engine(8, -101, 83, "reset", RequestKind::UrlRequest);
        assert!(reset.quic_details().is_none());
    }

    #[test]
    fn test_retryable_classification() {
        let timed_out = NetworkException::from_engine(4, -7, 0, "t", RequestKind::UrlRequest);
        assert!(timed_out.immediately_retryable());
        let refused = NetworkException::from_engine(7, -102, 0, "r", RequestKind::UrlRequest);
        assert!(!refused.immediately_retryable());
    }

    #[test]
    fn test_ping_failure_retryable_only_for_streams() {
        let url = NetworkException::from_engine(11, -352, 0, "p", RequestKind::UrlRequest);
        assert!(!url.immediately_retryable());
        let stream =
            NetworkException::from_engine(11, -352, 0, "p", RequestKind::BidirectionalStream);
        assert!(stream.immediately_retryable());
        let handshake =
            NetworkException::from_engine(10, -358, 0, "h", RequestKind::BidirectionalStream);
        assert!(handshake.immediately_retryable());
    }

    #[test]
    fn test_message_prefix() {
        let e = NetworkException::from_engine(
            7,
            -102,
            0,
            "net::ERR_CONNECTION_REFUSED",
            RequestKind::UrlRequest,
        );
        assert_eq!(e.to_string(), "Exception in UrlRequest: net::ERR_CONNECTION_REFUSED");
    }
}
