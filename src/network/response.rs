//! Response metadata snapshots

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metadata for one redirect or for the final response.
///
/// Everything is fixed at construction except `received_bytes_count`, which
/// grows in place as more data arrives.
#[derive(Debug)]
pub struct UrlResponseInfo {
    url_chain: Vec<String>,
    http_status_code: u16,
    http_status_text: String,
    headers: Vec<(String, String)>,
    was_cached: bool,
    negotiated_protocol: String,
    proxy_server: String,
    received_bytes_count: AtomicU64,
}

impl UrlResponseInfo {
    /// Create a new snapshot. `url_chain` must not be empty.
    pub fn new(
        url_chain: Vec<String>,
        http_status_code: u16,
        http_status_text: impl Into<String>,
        headers: Vec<(String, String)>,
        was_cached: bool,
        negotiated_protocol: impl Into<String>,
        proxy_server: impl Into<String>,
    ) -> Self {
        debug_assert!(!url_chain.is_empty());
        Self {
            url_chain,
            http_status_code,
            http_status_text: http_status_text.into(),
            headers,
            was_cached,
            negotiated_protocol: negotiated_protocol.into(),
            proxy_server: proxy_server.into(),
            received_bytes_count: AtomicU64::new(0),
        }
    }

    /// URL this response came from: the last entry of the chain
    pub fn url(&self) -> &str {
        self.url_chain.last().map(String::as_str).unwrap_or("")
    }

    /// Every URL visited so far, in order
    pub fn url_chain(&self) -> &[String] {
        &self.url_chain
    }

    pub fn http_status_code(&self) -> u16 {
        self.http_status_code
    }

    pub fn http_status_text(&self) -> &str {
        &self.http_status_text
    }

    /// Headers in the order received, duplicates preserved
    pub fn all_headers_as_list(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Headers grouped by name
    pub fn all_headers(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &self.headers {
            map.entry(name.clone()).or_default().push(value.clone());
        }
        map
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn was_cached(&self) -> bool {
        self.was_cached
    }

    pub fn negotiated_protocol(&self) -> &str {
        &self.negotiated_protocol
    }

    pub fn proxy_server(&self) -> &str {
        &self.proxy_server
    }

    /// Bytes received over the network for the whole request so far,
    /// redirects included
    pub fn received_bytes_count(&self) -> u64 {
        self.received_bytes_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_received_bytes_count(&self, count: u64) {
        self.received_bytes_count.store(count, Ordering::Release);
    }

    /// Check if the response was successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status_code)
    }

    /// Check if the response is a redirect (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.http_status_code)
    }
}

impl fmt::Display for UrlResponseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<String> = self
            .headers
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(
            f,
            "UrlResponseInfo[{}]: urlChain = [{}], httpStatus = {} {}, headers = [{}], \
             wasCached = {}, negotiatedProtocol = {}, proxyServer= {}, receivedBytesCount = {}",
            self.url(),
            self.url_chain.join(", "),
            self.http_status_code,
            self.http_status_text,
            headers.join(", "),
            self.was_cached,
            self.negotiated_protocol,
            self.proxy_server,
            self.received_bytes_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> UrlResponseInfo {
        UrlResponseInfo::new(
            vec!["http://a/redirect".into(), "http://a/success.txt".into()],
            200,
            "OK",
            vec![
                ("Content-Type".into(), "text/plain".into()),
                ("multi".into(), "v1".into()),
                ("multi".into(), "v2".into()),
            ],
            false,
            "unknown",
            ":0",
        )
    }

    #[test]
    fn test_url_is_last_in_chain() {
        assert_eq!(info().url(), "http://a/success.txt");
    }

    #[test]
    fn test_headers_grouped_and_ordered() {
        let info = info();
        assert_eq!(info.all_headers()["multi"], vec!["v1", "v2"]);
        assert_eq!(info.header("content-type"), Some("text/plain"));
        assert_eq!(info.all_headers_as_list()[1].1, "v1");
    }

    #[test]
    fn test_display_summary() {
        let info = info();
        info.set_received_bytes_count(260);
        assert_eq!(
            info.to_string(),
            "UrlResponseInfo[http://a/success.txt]: urlChain = [http://a/redirect, \
             http://a/success.txt], httpStatus = 200 OK, headers = [Content-Type=text/plain, \
             multi=v1, multi=v2], wasCached = false, negotiatedProtocol = unknown, \
             proxyServer= :0, receivedBytesCount = 260"
        );
    }
}
