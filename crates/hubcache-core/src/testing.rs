//! In-process fakes for the worker's seams: a scripted network, a manual
//! clock, a platform that records calls and a store that always fails.
//!
//! Compiled for this crate's tests and behind the `testing` feature for
//! anyone who wants to drive a worker without touching the network.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::clock::Clock;
use crate::entry::CachedEntry;
use crate::error::{CacheError, Result};
use crate::fetch::Fetcher;
use crate::message::Notification;
use crate::platform::Platform;
use crate::request::{Request, RequestKey};
use crate::response::Response;
use crate::store::CacheStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[derive(Debug, Clone)]
enum Scripted {
    Respond { status: u16, body: String },
    Fail,
}

/// `Fetcher` answering from a table of canned responses. Unknown URLs fail
/// like an unreachable host.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        lock(&self.routes).insert(
            normalize(url),
            Scripted::Respond {
                status,
                body: body.to_string(),
            },
        );
    }

    pub fn fail(&self, url: &str) {
        lock(&self.routes).insert(normalize(url), Scripted::Fail);
    }

    /// Answer 200 for every entry, resolved against `origin`; the body is
    /// the resolved URL.
    pub fn serve_all(&self, entries: &[String], origin: &str) {
        let Ok(base) = Url::parse(origin) else {
            return;
        };
        for entry in entries {
            if let Ok(url) = base.join(entry) {
                self.respond(url.as_str(), 200, url.as_str());
            }
        }
    }

    pub fn calls(&self, url: &str) -> usize {
        lock(&self.calls).get(&normalize(url)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = request.url.to_string();
        *lock(&self.calls).entry(url.clone()).or_insert(0) += 1;
        let scripted = lock(&self.routes).get(&url).cloned();
        match scripted {
            Some(Scripted::Respond { status, body }) => {
                let text = if (200..=299).contains(&status) { "OK" } else { "Error" };
                Ok(Response::new(status, text, body.into_bytes()))
            }
            Some(Scripted::Fail) => {
                Err(CacheError::Network(format!("connection refused: {}", url)))
            }
            None => Err(CacheError::Network(format!("no route to {}", url))),
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// `Platform` that remembers every call.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    claims: Mutex<usize>,
    skip_waiting: Mutex<usize>,
    notifications: Mutex<Vec<Notification>>,
    windows: Mutex<Vec<String>>,
}

impl RecordingPlatform {
    pub fn claim_calls(&self) -> usize {
        *lock(&self.claims)
    }

    pub fn skip_waiting_calls(&self) -> usize {
        *lock(&self.skip_waiting)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn opened_windows(&self) -> Vec<String> {
        lock(&self.windows).clone()
    }
}

impl Platform for RecordingPlatform {
    fn claim_clients(&self) -> Result<usize> {
        *lock(&self.claims) += 1;
        Ok(1)
    }

    fn skip_waiting(&self) -> Result<()> {
        *lock(&self.skip_waiting) += 1;
        Ok(())
    }

    fn show_notification(&self, notification: &Notification) -> Result<()> {
        lock(&self.notifications).push(notification.clone());
        Ok(())
    }

    fn open_window(&self, url: &str) -> Result<()> {
        lock(&self.windows).push(url.to_string());
        Ok(())
    }
}

/// Store whose every operation fails, as with exhausted quota.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

impl FailingStore {
    fn unavailable<T>() -> Result<T> {
        Err(CacheError::Store("storage unavailable".to_string()))
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn open(&self, _generation: &str) -> Result<()> {
        Self::unavailable()
    }

    async fn generation_names(&self) -> Result<Vec<String>> {
        Self::unavailable()
    }

    async fn delete_generation(&self, _generation: &str) -> Result<bool> {
        Self::unavailable()
    }

    async fn get(&self, _generation: &str, _key: &RequestKey) -> Result<Option<CachedEntry>> {
        Self::unavailable()
    }

    async fn put(&self, _generation: &str, _key: &RequestKey, _entry: CachedEntry) -> Result<()> {
        Self::unavailable()
    }

    async fn delete(&self, _generation: &str, _key: &RequestKey) -> Result<bool> {
        Self::unavailable()
    }

    async fn list_keys(&self, _generation: &str) -> Result<Vec<RequestKey>> {
        Self::unavailable()
    }
}
