//! Hubcache core - offline cache engine for the portfolio hub sites.
//!
//! A [`CacheWorker`] pre-caches the site shell on install, prunes retired
//! cache generations on activate and answers intercepted requests from a
//! freshness-aware cache, falling back to stale copies or the shell document
//! when the network is gone. A [`Registration`] tracks which worker instance
//! is installing, waiting or active and dispatches runtime events to it.

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod fetch;
pub mod message;
pub mod platform;
pub mod policy;
pub mod registration;
pub mod request;
pub mod response;
pub mod routes;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use config::{Config, RouteRule};
pub use error::{CacheError, InstallError, Result};
pub use registration::{Event, EventOutcome, Registration, UpdateOutcome};
pub use request::{Destination, Request, RequestKey};
pub use response::{Response, ResponseSource};
pub use store::{CacheStore, DiskStore, MemoryStore};
pub use worker::{CacheWorker, WorkerId, WorkerState};
