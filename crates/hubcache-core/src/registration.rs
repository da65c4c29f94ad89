//! Registration: which worker instance receives which event.
//!
//! A page registers a script location once. Each deploy produces a new
//! `CacheWorker`, which moves through installing -> waiting -> active. Only
//! the active instance sees fetch, message, push and sync events; a failed
//! install leaves the current active instance in place.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::message::{MessageReply, Notification, WorkerMessage};
use crate::request::Request;
use crate::response::Response;
use crate::worker::{ActivationReport, CacheWorker, InstallReport};

/// Every event the runtime can deliver, one handler each.
#[derive(Debug, Clone)]
pub enum Event {
    /// Install the pending worker.
    Install,
    /// Promote the waiting worker.
    Activate,
    Fetch(Request),
    Message(Value),
    Push(Vec<u8>),
    NotificationClick {
        action: Option<String>,
        url: Option<String>,
    },
    Sync(String),
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    /// `None` lets the runtime perform the request itself.
    Response(Option<Response>),
    Reply(Option<MessageReply>),
    Notification(Option<Notification>),
    /// Whether the event led to any action.
    Handled(bool),
}

/// Result of handing a new worker to the registration.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Installed and promoted immediately.
    Activated {
        install: InstallReport,
        activation: ActivationReport,
    },
    /// Installed; waits until `Event::Activate`.
    Waiting(InstallReport),
}

pub struct Registration {
    script_url: Url,
    scope: Url,
    installing: Option<Arc<CacheWorker>>,
    waiting: Option<Arc<CacheWorker>>,
    active: Option<Arc<CacheWorker>>,
}

impl Registration {
    /// Register a worker script, resolving `script` and `scope` against the
    /// registering page. The default scope is the script's directory.
    pub fn register(page: &Url, script: &str, scope: Option<&str>) -> Result<Self> {
        let script_url = page.join(script)?;
        if !matches!(script_url.scheme(), "http" | "https") {
            return Err(CacheError::InvalidUrl(format!(
                "worker script must be http(s): {}",
                script_url
            )));
        }
        if script_url.origin() != page.origin() {
            return Err(CacheError::InvalidUrl(format!(
                "worker script must share the page's origin: {}",
                script_url
            )));
        }

        let script_dir = script_url.join("./")?;
        let scope = match scope {
            Some(s) => script_url.join(s)?,
            None => script_dir.clone(),
        };
        if scope.origin() != script_url.origin() || !scope.path().starts_with(script_dir.path()) {
            return Err(CacheError::InvalidUrl(format!(
                "scope {} is outside the script directory {}",
                scope, script_dir
            )));
        }

        info!(script = %script_url, scope = %scope, "Worker registered");
        Ok(Self {
            script_url,
            scope,
            installing: None,
            waiting: None,
            active: None,
        })
    }

    /// The script location as requested, cache-busting query included.
    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    /// The script's identity, without query or fragment.
    pub fn script_id(&self) -> String {
        let mut id = self.script_url.clone();
        id.set_query(None);
        id.set_fragment(None);
        id.to_string()
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn controls(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin() && url.path().starts_with(self.scope.path())
    }

    pub fn active(&self) -> Option<Arc<CacheWorker>> {
        self.active.clone()
    }

    pub fn waiting(&self) -> Option<Arc<CacheWorker>> {
        self.waiting.clone()
    }

    /// Install a new worker and, as it always asks to skip waiting, promote
    /// it. On install failure the error is returned and the previous active
    /// worker keeps serving.
    pub async fn update(&mut self, worker: CacheWorker) -> Result<UpdateOutcome> {
        self.installing = Some(Arc::new(worker));
        let install = match self.dispatch(Event::Install).await? {
            EventOutcome::Installed(report) => report,
            other => {
                return Err(CacheError::State(format!(
                    "unexpected install outcome: {:?}",
                    other
                )))
            }
        };
        self.promote(install).await
    }

    /// Like `update`, but adopts the static generation already in the store
    /// instead of downloading the manifest. Lets a host come back up with
    /// the network down.
    pub async fn resume(&mut self, worker: CacheWorker) -> Result<UpdateOutcome> {
        let worker = Arc::new(worker);
        let install = worker.resume().await?;
        if let Some(previous) = self.waiting.replace(worker) {
            previous.mark_redundant();
        }
        self.promote(install).await
    }

    async fn promote(&mut self, install: InstallReport) -> Result<UpdateOutcome> {
        let skip = self
            .waiting
            .as_ref()
            .map(|w| w.skip_waiting_requested())
            .unwrap_or(false);
        if !skip {
            return Ok(UpdateOutcome::Waiting(install));
        }

        match self.dispatch(Event::Activate).await? {
            EventOutcome::Activated(activation) => {
                Ok(UpdateOutcome::Activated { install, activation })
            }
            other => Err(CacheError::State(format!(
                "unexpected activate outcome: {:?}",
                other
            ))),
        }
    }

    pub async fn dispatch(&mut self, event: Event) -> Result<EventOutcome> {
        match event {
            Event::Install => self.install_pending().await.map(EventOutcome::Installed),
            Event::Activate => self.activate_waiting().await.map(EventOutcome::Activated),
            Event::Fetch(request) => {
                let response = match &self.active {
                    Some(worker) => worker.handle_fetch(&request).await,
                    None => {
                        debug!(url = %request.url, "No active worker, passing through");
                        None
                    }
                };
                Ok(EventOutcome::Response(response))
            }
            Event::Message(data) => {
                // A skip-waiting message is meant for the waiting worker
                if WorkerMessage::parse(&data) == Some(WorkerMessage::SkipWaiting) {
                    if let Some(waiting) = self.waiting.clone() {
                        waiting.handle_message(&data);
                        self.activate_waiting().await?;
                        return Ok(EventOutcome::Reply(None));
                    }
                }
                let reply = self.active.as_ref().and_then(|w| w.handle_message(&data));
                Ok(EventOutcome::Reply(reply))
            }
            Event::Push(payload) => {
                let shown = self.active.as_ref().and_then(|w| w.handle_push(&payload));
                Ok(EventOutcome::Notification(shown))
            }
            Event::NotificationClick { action, url } => {
                let opened = self
                    .active
                    .as_ref()
                    .map(|w| w.handle_notification_click(action.as_deref(), url.as_deref()))
                    .unwrap_or(false);
                Ok(EventOutcome::Handled(opened))
            }
            Event::Sync(tag) => {
                let handled = match &self.active {
                    Some(worker) => worker.handle_sync(&tag).await,
                    None => false,
                };
                Ok(EventOutcome::Handled(handled))
            }
        }
    }

    async fn install_pending(&mut self) -> Result<InstallReport> {
        let worker = self
            .installing
            .take()
            .ok_or_else(|| CacheError::State("no worker is installing".to_string()))?;

        match worker.install().await {
            Ok(report) => {
                if let Some(previous) = self.waiting.replace(worker) {
                    previous.mark_redundant();
                }
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Install failed, keeping the current worker");
                Err(e.into())
            }
        }
    }

    async fn activate_waiting(&mut self) -> Result<ActivationReport> {
        let worker = self
            .waiting
            .take()
            .ok_or_else(|| CacheError::State("no worker is waiting".to_string()))?;

        match worker.activate().await {
            Ok(report) => {
                if let Some(previous) = self.active.replace(worker) {
                    previous.mark_redundant();
                }
                Ok(report)
            }
            Err(e) => {
                self.waiting = Some(worker);
                Err(e)
            }
        }
    }
}
