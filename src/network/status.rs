//! Request load status

/// Load state of a request, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// The request has not started or has already finished
    Invalid = -1,
    Idle = 0,
    WaitingForStalledSocketPool = 1,
    WaitingForAvailableSocket = 2,
    /// Waiting on the application, e.g. a deferred redirect or read
    WaitingForDelegate = 3,
    WaitingForCache = 4,
    DownloadingPacFile = 5,
    ResolvingProxyForUrl = 6,
    ResolvingHostInPacFile = 7,
    EstablishingProxyTunnel = 8,
    ResolvingHost = 9,
    Connecting = 10,
    SslHandshake = 11,
    SendingRequest = 12,
    WaitingForResponse = 13,
    ReadingResponse = 14,
}

impl RequestStatus {
    /// Convert an engine load state; anything out of range is `Invalid`
    pub fn from_load_state(load_state: i32) -> Self {
        match load_state {
            0 => Self::Idle,
            1 => Self::WaitingForStalledSocketPool,
            2 => Self::WaitingForAvailableSocket,
            3 => Self::WaitingForDelegate,
            4 => Self::WaitingForCache,
            5 => Self::DownloadingPacFile,
            6 => Self::ResolvingProxyForUrl,
            7 => Self::ResolvingHostInPacFile,
            8 => Self::EstablishingProxyTunnel,
            9 => Self::ResolvingHost,
            10 => Self::Connecting,
            11 => Self::SslHandshake,
            12 => Self::SendingRequest,
            13 => Self::WaitingForResponse,
            14 => Self::ReadingResponse,
            _ => Self::Invalid,
        }
    }
}

/// Receives the answer to `UrlRequest::get_status`
pub type StatusListener = Box<dyn FnOnce(RequestStatus) + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_load_state() {
        assert_eq!(RequestStatus::from_load_state(10), RequestStatus::Connecting);
        assert_eq!(RequestStatus::from_load_state(14), RequestStatus::ReadingResponse);
        assert_eq!(RequestStatus::from_load_state(-1), RequestStatus::Invalid);
        assert_eq!(RequestStatus::from_load_state(42), RequestStatus::Invalid);
    }
}
