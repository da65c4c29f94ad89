//! Hubcache - runs the portfolio hub's offline cache worker from the terminal.
//!
//! Installs and activates a worker against the configured origin with an
//! on-disk cache, then answers requests through it the way a page would.
//! With the network down, the version already on disk is activated instead.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hubcache_core::fetch::HttpFetcher;
use hubcache_core::platform::LoggingPlatform;
use hubcache_core::{
    CacheStore, CacheWorker, Config, Destination, DiskStore, Event, EventOutcome, Registration,
    Request, UpdateOutcome,
};

// ============================================================================
// Constants
// ============================================================================

/// Worker script location, relative to the origin
const WORKER_SCRIPT: &str = "./sw.js";

const USAGE: &str = "\
Usage: hubcache <command> [args]

Commands:
  install                       Install and activate the worker
  fetch [--as <kind>] <url>...  Request URLs through the worker (kind: image, font, document)
  caches                        List cache generations and their entries
  sweep                         Run one eviction sweep
  serve                         Stay active and sweep on schedule until Ctrl-C
  message <json>                Post a message to the worker
  push <json>                   Deliver a push payload
  sync <tag>                    Fire a background sync
  init-config                   Write the current configuration to the config file

Environment:
  HUBCACHE_ORIGIN, HUBCACHE_VERSION, HUBCACHE_DEVELOPMENT, ...  Configuration when no file exists
  HUBCACHE_LOG_DIR              Also write daily-rotated logs to this directory
  RUST_LOG                      Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var("HUBCACHE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "hubcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let config_path = Config::default_path()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    match command.as_str() {
        "init-config" => {
            config.save(&config_path)?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
        "caches" => list_caches(&config).await,
        "install" => {
            let registration = start(config).await?;
            describe_active(&registration);
            Ok(())
        }
        "fetch" => fetch(config, rest).await,
        "sweep" => {
            // Eviction only touches the store, never the network
            let store = open_store(&config)?;
            let report = new_worker(config, store)?.sweep().await?;
            println!(
                "Scanned {} generations, removed {} entries",
                report.generations_scanned,
                report.removed()
            );
            for (name, removed) in &report.trimmed {
                println!("  {}: -{}", name, removed);
            }
            Ok(())
        }
        "serve" => serve(config).await,
        "message" | "push" | "sync" => {
            let Some(arg) = rest.first() else {
                bail!("{} needs an argument\n\n{}", command, USAGE);
            };
            let mut registration = start(config).await?;
            let event = match command.as_str() {
                "message" => Event::Message(
                    serde_json::from_str(arg).context("Message must be valid JSON")?,
                ),
                "push" => Event::Push(arg.as_bytes().to_vec()),
                _ => Event::Sync(arg.clone()),
            };
            print_outcome(registration.dispatch(event).await?);
            Ok(())
        }
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

fn open_store(config: &Config) -> Result<Arc<DiskStore>> {
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    Ok(Arc::new(DiskStore::new(cache_dir)?))
}

fn new_worker(config: Config, store: Arc<DiskStore>) -> Result<CacheWorker> {
    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout)?);
    Ok(CacheWorker::new(config, store, fetcher)?.with_platform(Arc::new(LoggingPlatform)))
}

/// Register and install a worker backed by the on-disk cache. When the
/// install cannot reach the network, the version already on disk is used.
async fn start(config: Config) -> Result<Registration> {
    let store = open_store(&config)?;
    let page = config.resolve("/")?;
    let mut registration = Registration::register(&page, WORKER_SCRIPT, None)?;

    info!(origin = %config.origin, version = %config.version, "Starting worker");
    let outcome = match registration.update(new_worker(config.clone(), store.clone())?).await {
        Ok(outcome) => outcome,
        Err(install_error) => {
            warn!(error = %install_error, "Install failed, falling back to the cached version");
            registration
                .resume(new_worker(config, store)?)
                .await
                .with_context(|| {
                    format!("Worker install failed ({}) and nothing is cached", install_error)
                })?
        }
    };

    match outcome {
        UpdateOutcome::Activated { install, activation } => {
            info!(
                generation = %install.generation,
                cached = install.cached.len(),
                deleted = activation.deleted.len(),
                "Worker active"
            );
        }
        UpdateOutcome::Waiting(install) => {
            warn!(generation = %install.generation, "Worker installed but waiting");
        }
    }

    Ok(registration)
}

fn active(registration: &Registration) -> Result<Arc<CacheWorker>> {
    registration
        .active()
        .context("No active worker after install")
}

fn describe_active(registration: &Registration) {
    match registration.active() {
        Some(worker) => {
            let config = worker.config();
            println!("Active: {} {} ({:?})", config.display_name, config.version, worker.state());
            println!("Scope:  {}", registration.scope());
            println!("Static: {}", config.static_cache_name());
            println!("Mode:   {}", if config.development { "development" } else { "production" });
        }
        None => println!("No active worker"),
    }
}

async fn fetch(config: Config, args: &[String]) -> Result<()> {
    let mut destination = Destination::Other;
    let mut urls = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--as" => {
                let kind = iter.next().context("--as needs a value")?;
                destination = Destination::from_hint(kind);
            }
            _ => urls.push(arg.clone()),
        }
    }
    if urls.is_empty() {
        bail!("fetch needs at least one URL\n\n{}", USAGE);
    }

    let origin = config.origin.clone();
    let mut registration = start(config).await?;

    for raw in urls {
        let url = origin
            .join(&raw)
            .with_context(|| format!("Invalid URL: {}", raw))?;
        let request = Request::get(url, destination);
        match registration.dispatch(Event::Fetch(request.clone())).await? {
            EventOutcome::Response(Some(response)) => println!(
                "{} {} {:?}{} {} ({} bytes)",
                response.status,
                response.status_text,
                response.source,
                if response.source.from_cache() { " [cached]" } else { "" },
                request.url,
                response.body.len()
            ),
            EventOutcome::Response(None) => println!("--- passthrough {}", request.url),
            other => print_outcome(other),
        }
    }
    Ok(())
}

async fn list_caches(config: &Config) -> Result<()> {
    let cache_dir = config.cache_dir()?;
    let store = DiskStore::new(cache_dir)?;
    let now = Utc::now();

    let names = store.generation_names().await?;
    if names.is_empty() {
        println!("No caches in {}", store.dir().display());
        return Ok(());
    }

    for name in names {
        let keys = store.list_keys(&name).await?;
        let marker = if config.owns_generation(&name) { "" } else { " (foreign)" };
        println!("{} - {} entries{}", name, keys.len(), marker);
        for key in keys {
            let age = match store.get(&name, &key).await? {
                Some(entry) => entry.age_display(now),
                None => "missing".to_string(),
            };
            println!("  {} {} [{}]", key.method, key.url, age);
        }
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let registration = start(config).await?;
    let worker = active(&registration)?;
    describe_active(&registration);

    let maintenance = worker.spawn_maintenance();
    println!(
        "Sweeping every {}s, press Ctrl-C to stop",
        worker.config().sweep_interval.as_secs()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    worker.mark_redundant();
    maintenance.abort();
    info!("Worker stopped");
    Ok(())
}

fn print_outcome(outcome: EventOutcome) {
    match outcome {
        EventOutcome::Reply(Some(reply)) => match serde_json::to_string(&reply) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Failed to encode reply"),
        },
        EventOutcome::Reply(None) => println!("(no reply)"),
        EventOutcome::Notification(Some(notification)) => {
            println!("Notification: {} - {}", notification.title, notification.body)
        }
        EventOutcome::Notification(None) => println!("(no notification)"),
        EventOutcome::Handled(handled) => println!("handled: {}", handled),
        other => println!("{:?}", other),
    }
}
