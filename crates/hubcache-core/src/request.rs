//! Intercepted requests and their per-request classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

/// Destination hint supplied by the hosting runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Image,
    Font,
    Document,
    #[default]
    Other,
}

impl Destination {
    /// Parse the runtime's destination string. Unknown hints map to `Other`.
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "image" => Destination::Image,
            "font" => Destination::Font,
            "document" => Destination::Document,
            _ => Destination::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Image => "image",
            Destination::Font => "font",
            Destination::Document => "document",
            Destination::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub destination: Destination,
}

impl Request {
    pub fn new(method: &str, url: Url, destination: Destination) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            destination,
        }
    }

    pub fn get(url: Url, destination: Destination) -> Self {
        Self::new("GET", url, destination)
    }

    /// Parse an absolute URL into a GET request.
    pub fn parse(url: &str, destination: Destination) -> Result<Self> {
        Ok(Self::get(Url::parse(url)?, destination))
    }

    /// Only GET requests over http(s) are intercepted; everything else is
    /// left to the runtime's default handling.
    pub fn is_interceptable(&self) -> bool {
        self.method == "GET" && matches!(self.url.scheme(), "http" | "https")
    }

    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Identity of a stored entry within a generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.as_str().to_string(),
        }
    }

    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Derived judgment over one request. Recomputed every time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestClassification {
    pub destination: Destination,
    pub same_origin: bool,
    pub cacheable: bool,
}
