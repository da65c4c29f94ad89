//! HTTP-shaped responses handed back to the interception point.

use serde::{Deserialize, Serialize};

/// Header injected into stored copies, holding the store time in epoch millis.
pub const CACHE_DATE_HEADER: &str = "sw-cache-date";

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSource {
    /// Live network response.
    Network,
    /// Fresh cache hit.
    Cache,
    /// Cached copy served because the network failed.
    StaleCache,
    /// Reserved route resolved to a pre-cached document.
    Route,
    /// Cached page shell served in place of an uncached document.
    ShellFallback,
    /// Synthesized 503.
    Offline,
}

impl ResponseSource {
    pub fn from_cache(&self) -> bool {
        !matches!(self, ResponseSource::Network | ResponseSource::Offline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    /// Header names are stored lowercase. Repeated headers keep one pair each,
    /// in arrival order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl Response {
    pub fn new(status: u16, status_text: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body,
            source: ResponseSource::Network,
        }
    }

    /// Plain-text 503 used when neither network nor cache can answer.
    pub fn offline(message: &str) -> Self {
        Self::new(503, "Service Unavailable", message.as_bytes().to_vec())
            .with_header("Content-Type", "text/plain")
            .with_source(ResponseSource::Offline)
    }

    /// Set a header, replacing every earlier value of the same name.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value.to_string()));
        self
    }

    /// Add a header value, keeping earlier values of the same name.
    pub fn append_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// First value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn is_ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    let name = name.to_ascii_lowercase();
    headers
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| v.as_str())
}
