//! Network access for the worker.
//!
//! `Fetcher` is what the worker calls when it needs the network. An `Err`
//! means the request never produced a response (connection refused, DNS,
//! timeout); HTTP error statuses come back as `Ok` responses and the caller
//! decides what to do with them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::Result;
use crate::request::Request;
use crate::response::{Response, ResponseSource};

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// `Fetcher` backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client. Without a timeout, hung requests rely on the
    /// platform's own limits before they surface as network failures.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let response = self
            .client
            .request(method, request.url.clone())
            .send()
            .await
            .map_err(|e| {
                warn!(url = %request.url, error = %e, "Network request failed");
                e
            })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "Fetched from network"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}
