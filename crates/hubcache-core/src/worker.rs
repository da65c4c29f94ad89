//! The cache worker: install, activate, fetch policy and eviction.
//!
//! One `CacheWorker` corresponds to one deployed version. It is driven by
//! its `Registration`, which decides which instance receives events.
//!
//! Request handling, in order:
//! 1. Reserved routes (`/v1`, `/v2/`, ...) answer from any generation.
//! 2. Development mode sends same-origin requests straight to the network.
//! 3. Otherwise: fresh dynamic hit, else network (storing cacheable 2xx
//!    responses), else stale copy, else page shell or an offline 503.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::entry::CachedEntry;
use crate::error::{CacheError, InstallError, Result};
use crate::fetch::Fetcher;
use crate::message::{MessageReply, Notification, PushPayload, WorkerMessage};
use crate::platform::{LoggingPlatform, Platform};
use crate::policy::{classify, max_age, TrustedHosts};
use crate::request::{Destination, Request, RequestClassification, RequestKey};
use crate::response::{Response, ResponseSource};
use crate::routes::RouteTable;
use crate::store::CacheStore;

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, nothing run yet.
    #[default]
    Parsed,
    /// Pre-caching the manifest.
    Installing,
    /// Installed, waiting to be promoted.
    Installed,
    /// Deleting stale generations.
    Activating,
    /// Serving requests.
    Activated,
    /// Failed install or superseded by a newer instance.
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub cached: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    pub clients_claimed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub generations_scanned: usize,
    /// (generation, entries removed) for every generation that was trimmed.
    pub trimmed: Vec<(String, usize)>,
}

impl EvictionReport {
    pub fn removed(&self) -> usize {
        self.trimmed.iter().map(|(_, n)| n).sum()
    }
}

pub struct CacheWorker {
    id: WorkerId,
    config: Arc<Config>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    platform: Arc<dyn Platform>,
    clock: Arc<dyn Clock>,
    trusted: TrustedHosts,
    routes: RouteTable,
    state: watch::Sender<WorkerState>,
    skip_waiting: AtomicBool,
}

impl CacheWorker {
    pub fn new(
        config: Config,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let trusted = TrustedHosts::from_config(&config)?;
        let routes = RouteTable::from_config(&config)?;
        let (state, _) = watch::channel(WorkerState::Parsed);
        Ok(Self {
            id: WorkerId::next(),
            config: Arc::new(config),
            store,
            fetcher,
            platform: Arc::new(LoggingPlatform),
            clock: Arc::new(SystemClock),
            trusted,
            routes,
            state,
            skip_waiting: AtomicBool::new(false),
        })
    }

    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        debug!(worker = self.id.0, from = ?previous, to = ?state, "Worker state changed");
    }

    /// Mark this instance as superseded. It stops its maintenance loop on
    /// the next tick.
    pub fn mark_redundant(&self) {
        self.set_state(WorkerState::Redundant);
    }

    fn offline_response(&self) -> Response {
        Response::offline(&format!("{} is offline", self.config.display_name))
    }

    fn request_skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Release);
        if let Err(e) = self.platform.skip_waiting() {
            warn!(error = %e, "Platform refused skip waiting");
        }
    }

    // ===== Install =====

    /// Pre-cache the manifest into the static generation.
    ///
    /// Every resource is fetched before anything is written, so a single
    /// failure leaves the store untouched and the worker redundant.
    pub async fn install(&self) -> std::result::Result<InstallReport, InstallError> {
        if self.state() != WorkerState::Parsed {
            return Err(InstallError::State(format!("{:?}", self.state())));
        }

        self.set_state(WorkerState::Installing);
        info!(worker = self.id.0, version = %self.config.version, "Worker installing");

        match self.precache().await {
            Ok(report) => {
                info!(
                    generation = %report.generation,
                    count = report.cached.len(),
                    "Static assets cached"
                );
                self.set_state(WorkerState::Installed);
                self.request_skip_waiting();
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Failed to cache static assets");
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self) -> std::result::Result<InstallReport, InstallError> {
        let generation = self.config.static_cache_name();
        let manifest = self.config.manifest();

        let fetches = manifest.iter().map(|raw| async move {
            let url = self
                .config
                .resolve(raw)
                .map_err(|e| InstallError::resource(raw, e))?;
            let request = Request::get(url, Destination::Other);
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| InstallError::resource(raw, e))?;
            if !response.is_ok() {
                return Err(InstallError::resource(
                    raw,
                    CacheError::HttpStatus {
                        url: request.url.to_string(),
                        status: response.status,
                    },
                ));
            }
            Ok((request.key(), response))
        });
        let fetched = try_join_all(fetches).await?;

        self.store
            .open(&generation)
            .await
            .map_err(|e| InstallError::storage(&generation, e))?;

        let mut cached = Vec::with_capacity(fetched.len());
        for (key, response) in fetched {
            let entry = CachedEntry::unstamped(&key, &response);
            self.store
                .put(&generation, &key, entry)
                .await
                .map_err(|e| InstallError::storage(&generation, e))?;
            debug!(url = %key.url, "Pre-cached resource");
            cached.push(key.url);
        }

        Ok(InstallReport { generation, cached })
    }

    /// Adopt the static generation an earlier run of this same version left
    /// in the store, without touching the network. Fails when that
    /// generation is missing, leaving the worker in `Parsed`.
    pub async fn resume(&self) -> Result<InstallReport> {
        if self.state() != WorkerState::Parsed {
            return Err(CacheError::State(format!(
                "cannot resume from {:?}",
                self.state()
            )));
        }

        let generation = self.config.static_cache_name();
        if !self.store.generation_names().await?.contains(&generation) {
            return Err(CacheError::State(format!(
                "no cached generation {} to resume",
                generation
            )));
        }
        let cached = self
            .store
            .list_keys(&generation)
            .await?
            .into_iter()
            .map(|key| key.url)
            .collect();

        info!(worker = self.id.0, generation = %generation, "Worker resumed from cache");
        self.set_state(WorkerState::Installed);
        self.request_skip_waiting();
        Ok(InstallReport { generation, cached })
    }

    // ===== Activate =====

    /// Delete this namespace's stale generations, then claim open pages.
    /// Returns only once deletion has finished.
    pub async fn activate(&self) -> Result<ActivationReport> {
        if self.state() != WorkerState::Installed {
            return Err(CacheError::State(format!(
                "cannot activate from {:?}",
                self.state()
            )));
        }

        self.set_state(WorkerState::Activating);
        info!(worker = self.id.0, "Worker activating");

        let current = [
            self.config.static_cache_name(),
            self.config.dynamic_cache_name(),
        ];
        let stale: Vec<String> = match self.store.generation_names().await {
            Ok(names) => names
                .into_iter()
                .filter(|name| self.config.owns_generation(name) && !current.contains(name))
                .collect(),
            Err(e) => {
                self.set_state(WorkerState::Installed);
                return Err(e);
            }
        };

        let results = join_all(stale.iter().map(|name| async move {
            info!(generation = %name, "Deleting old cache");
            self.store.delete_generation(name).await
        }))
        .await;

        let mut deleted = Vec::with_capacity(stale.len());
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => {
                    self.set_state(WorkerState::Installed);
                    return Err(e);
                }
            }
        }

        let clients_claimed = self.platform.claim_clients().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to claim clients");
            0
        });

        self.set_state(WorkerState::Activated);
        info!(worker = self.id.0, deleted = deleted.len(), "Worker activated");
        Ok(ActivationReport {
            deleted,
            clients_claimed,
        })
    }

    // ===== Fetch =====

    /// Answer an intercepted request.
    ///
    /// `None` means the request is not ours (non-GET or non-http) and the
    /// runtime should handle it normally. Anything intercepted always gets a
    /// response; failures are resolved here and never surface to the page.
    pub async fn handle_fetch(&self, request: &Request) -> Option<Response> {
        if !request.is_interceptable() {
            return None;
        }

        if let Some(document) = self.routes.resolve(&request.url, &self.config.origin) {
            return Some(self.serve_route(document).await);
        }

        let classification = classify(request, &self.config, &self.trusted);
        debug!(
            url = %request.url,
            destination = request.destination.as_str(),
            cacheable = classification.cacheable,
            "Intercepted request"
        );

        if self.config.development && classification.same_origin {
            return Some(self.fetch_development(request).await);
        }

        Some(self.fetch_production(request, classification).await)
    }

    async fn serve_route(&self, document: &Url) -> Response {
        match self.store.match_any(&RequestKey::get(document)).await {
            Ok(Some(entry)) => {
                debug!(document = %document, "Serving reserved route from cache");
                entry.to_response(ResponseSource::Route)
            }
            Ok(None) => {
                warn!(document = %document, "Reserved route has no cached document");
                self.offline_response()
            }
            Err(e) => {
                warn!(document = %document, error = %e, "Cache lookup failed for reserved route");
                self.offline_response()
            }
        }
    }

    async fn fetch_development(&self, request: &Request) -> Response {
        debug!(url = %request.url, "Development mode: fetching from network");
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %request.url, error = %e, "Network request failed in development");
                Response::offline("Development mode: Network error")
            }
        }
    }

    async fn lookup(&self, generation: &str, key: &RequestKey) -> Option<CachedEntry> {
        match self.store.get(generation, key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(cache = generation, key = %key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn fetch_production(
        &self,
        request: &Request,
        classification: RequestClassification,
    ) -> Response {
        let generation = self.config.dynamic_cache_name();
        let key = request.key();
        let now = self.clock.now();

        let cached = self.lookup(&generation, &key).await;
        if let Some(entry) = &cached {
            if entry.is_fresh(max_age(classification.destination, &self.config), now) {
                debug!(url = %request.url, "Serving from cache");
                return entry.to_response(ResponseSource::Cache);
            }
        }

        debug!(url = %request.url, "Fetching from network");
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() && classification.cacheable {
                    let entry = CachedEntry::stamped(&key, &response, self.clock.now());
                    match self.store.put(&generation, &key, entry).await {
                        Ok(()) => debug!(url = %request.url, "Cached response"),
                        Err(e) => warn!(url = %request.url, error = %e, "Failed to store response"),
                    }
                }
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network request failed");
                self.offline_fallback(request, &generation, &key, cached).await
            }
        }
    }

    async fn offline_fallback(
        &self,
        request: &Request,
        generation: &str,
        key: &RequestKey,
        earlier: Option<CachedEntry>,
    ) -> Response {
        // Look again: a concurrent request may have stored it meanwhile
        if let Some(entry) = self.lookup(generation, key).await.or(earlier) {
            info!(url = %request.url, "Serving stale cache");
            return entry.to_response(ResponseSource::StaleCache);
        }

        if request.destination == Destination::Document {
            if let Some(shell) = self.cached_shell().await {
                info!(url = %request.url, "Serving offline page shell");
                return shell.to_response(ResponseSource::ShellFallback);
            }
        }

        self.offline_response()
    }

    async fn cached_shell(&self) -> Option<CachedEntry> {
        let url = self.config.resolve(&self.config.offline_document).ok()?;
        match self.store.match_any(&RequestKey::get(&url)).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed for page shell");
                None
            }
        }
    }

    // ===== Eviction =====

    /// Trim every generation that grew past the ceiling, oldest entries
    /// first. Runs across all generations, not just this service's.
    pub async fn sweep(&self) -> Result<EvictionReport> {
        let ceiling = self.config.eviction_ceiling;
        let batch = ceiling - self.config.eviction_target;
        let mut report = EvictionReport::default();

        for name in self.store.generation_names().await? {
            report.generations_scanned += 1;
            let keys = self.store.list_keys(&name).await?;
            if keys.len() <= ceiling {
                continue;
            }

            let victims = &keys[..batch.min(keys.len())];
            let results = join_all(victims.iter().map(|key| self.store.delete(&name, key))).await;
            let mut removed = 0;
            for result in results {
                match result {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!(cache = %name, error = %e, "Failed to evict entry"),
                }
            }
            info!(cache = %name, removed = removed, "Cleaned up cache entries");
            report.trimmed.push((name, removed));
        }

        Ok(report)
    }

    /// Run `sweep` every `sweep_interval` until the worker turns redundant
    /// or the handle is aborted. The first sweep happens one full interval
    /// after spawning; turning redundant stops the loop right away.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let period = self.config.sweep_interval;
        let mut state = self.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                if *state.borrow_and_update() == WorkerState::Redundant {
                    debug!(worker = worker.id.0, "Maintenance stopped");
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = worker.sweep().await {
                            warn!(error = %e, "Eviction sweep failed");
                        }
                    }
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    // ===== Messages, push, notifications, sync =====

    pub fn handle_message(&self, data: &Value) -> Option<MessageReply> {
        match WorkerMessage::parse(data) {
            Some(WorkerMessage::SkipWaiting) => {
                self.request_skip_waiting();
                None
            }
            Some(WorkerMessage::GetVersion) => Some(MessageReply::Version {
                version: self.config.version.clone(),
            }),
            Some(WorkerMessage::PerformanceMetric { metric }) => {
                info!(metric = %metric, "Performance metric");
                None
            }
            None => {
                debug!("Ignoring unrecognized message");
                None
            }
        }
    }

    /// Show a notification for a push payload. Malformed payloads are
    /// dropped without a notification.
    pub fn handle_push(&self, payload: &[u8]) -> Option<Notification> {
        let Some(payload) = PushPayload::parse(payload) else {
            debug!(bytes = payload.len(), "Ignoring malformed push payload");
            return None;
        };
        let notification = Notification::from_push(
            payload,
            &self.config.display_name,
            &self.config.notification_icon,
        );
        if let Err(e) = self.platform.show_notification(&notification) {
            warn!(error = %e, "Failed to show notification");
        }
        Some(notification)
    }

    /// Returns whether a window was opened.
    pub fn handle_notification_click(&self, action: Option<&str>, url: Option<&str>) -> bool {
        match action {
            None | Some("") | Some("open") => {
                let target = url.unwrap_or("/");
                match self.platform.open_window(target) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(url = target, error = %e, "Failed to open window");
                        false
                    }
                }
            }
            Some(_) => false,
        }
    }

    /// Returns whether the tag was recognized.
    pub async fn handle_sync(&self, tag: &str) -> bool {
        if tag != self.config.analytics_sync_tag {
            debug!(tag = tag, "Ignoring unknown sync tag");
            return false;
        }
        self.sync_analytics().await;
        true
    }

    /// Extension point for shipping buffered analytics.
    async fn sync_analytics(&self) {
        info!(service = %self.config.service_name, "Syncing analytics data");
    }
}

// ============================================================================
// Tests
// ============================================================================
