//! Per-request timing metrics and finished-request reports

use std::sync::Arc;
use std::time::Duration;

use super::exception::UrlRequestException;
use super::response::UrlResponseInfo;

/// Timing and byte counts for one request.
///
/// Timestamps are milliseconds since the Unix epoch; the engine reports `-1`
/// for phases that did not happen, which become `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestMetrics {
    pub request_start: Option<u64>,
    pub dns_start: Option<u64>,
    pub dns_end: Option<u64>,
    pub connect_start: Option<u64>,
    pub connect_end: Option<u64>,
    pub ssl_start: Option<u64>,
    pub ssl_end: Option<u64>,
    pub sending_start: Option<u64>,
    pub sending_end: Option<u64>,
    pub response_start: Option<u64>,
    pub request_end: Option<u64>,
    pub socket_reused: bool,
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

/// Raw metrics as an engine reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMetrics {
    /// request start, dns start/end, connect start/end, ssl start/end,
    /// sending start/end, response start, request end
    pub timings_ms: [i64; 11],
    pub socket_reused: bool,
    pub sent_bytes: i64,
    pub received_bytes: i64,
}

fn timestamp(ms: i64) -> Option<u64> {
    u64::try_from(ms).ok()
}

impl From<RawMetrics> for RequestMetrics {
    fn from(raw: RawMetrics) -> Self {
        let t = raw.timings_ms;
        Self {
            request_start: timestamp(t[0]),
            dns_start: timestamp(t[1]),
            dns_end: timestamp(t[2]),
            connect_start: timestamp(t[3]),
            connect_end: timestamp(t[4]),
            ssl_start: timestamp(t[5]),
            ssl_end: timestamp(t[6]),
            sending_start: timestamp(t[7]),
            sending_end: timestamp(t[8]),
            response_start: timestamp(t[9]),
            request_end: timestamp(t[10]),
            socket_reused: raw.socket_reused,
            sent_bytes: raw.sent_bytes.max(0) as u64,
            received_bytes: raw.received_bytes.max(0) as u64,
        }
    }
}

impl RequestMetrics {
    /// Time from request start to request end
    pub fn total_time(&self) -> Option<Duration> {
        let start = self.request_start?;
        let end = self.request_end?;
        end.checked_sub(start).map(Duration::from_millis)
    }

    /// Time from request start to the first response byte
    pub fn ttfb(&self) -> Option<Duration> {
        let start = self.request_start?;
        let first = self.response_start?;
        first.checked_sub(start).map(Duration::from_millis)
    }
}

/// Why a request reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishedReason {
    Succeeded,
    Failed,
    Canceled,
    #[default]
    Unknown,
}

/// Report handed to request-finished listeners
#[derive(Debug, Clone)]
pub struct RequestFinishedInfo {
    pub url: String,
    pub metrics: Option<RequestMetrics>,
    pub finished_reason: FinishedReason,
    pub response_info: Option<Arc<UrlResponseInfo>>,
    pub exception: Option<UrlRequestException>,
}

/// Listener registered on a context for every finished request
pub trait RequestFinishedListener: Send + Sync {
    fn on_request_finished(&self, info: RequestFinishedInfo);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_timings_are_absent() {
        let raw = RawMetrics {
            timings_ms: [100, -1, -1, 110, 130, -1, -1, 131, 132, 180, 200],
            socket_reused: false,
            sent_bytes: 70,
            received_bytes: 260,
        };
        let metrics = RequestMetrics::from(raw);
        assert!(metrics.dns_start.is_none());
        assert_eq!(metrics.connect_end, Some(130));
        assert_eq!(metrics.total_time(), Some(Duration::from_millis(100)));
        assert_eq!(metrics.ttfb(), Some(Duration::from_millis(80)));
    }
}
