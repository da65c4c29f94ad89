//! End-to-end behaviour of an installed and activated worker.

use std::sync::Arc;

use chrono::Duration;
use url::Url;

use hubcache_core::clock::Clock;
use hubcache_core::entry::CachedEntry;
use hubcache_core::testing::{ManualClock, RecordingPlatform, ScriptedFetcher};
use hubcache_core::{
    CacheStore, CacheWorker, Config, Destination, MemoryStore, Registration, Request, RequestKey,
    Response, ResponseSource,
};

const ORIGIN: &str = "https://itswatuyusei.github.io";

struct Site {
    registration: Registration,
    store: Arc<MemoryStore>,
    fetcher: Arc<ScriptedFetcher>,
    clock: Arc<ManualClock>,
}

impl Site {
    async fn deploy(version: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        let clock = Arc::new(ManualClock::new());
        let mut registration =
            Registration::register(&url("/index.html"), "./sw.js?v=1", None).unwrap();

        let worker = new_worker(version, &store, &fetcher, &clock);
        fetcher.serve_all(&worker.config().manifest(), ORIGIN);
        registration.update(worker).await.unwrap();
        fetcher.reset_calls();

        Self {
            registration,
            store,
            fetcher,
            clock,
        }
    }

    fn worker(&self) -> Arc<CacheWorker> {
        self.registration.active().unwrap()
    }

    async fn get(&self, path: &str, destination: Destination) -> Response {
        let request = Request::get(url(path), destination);
        self.worker().handle_fetch(&request).await.unwrap()
    }

    fn dynamic(&self) -> String {
        self.worker().config().dynamic_cache_name()
    }
}

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn new_worker(
    version: &str,
    store: &Arc<MemoryStore>,
    fetcher: &Arc<ScriptedFetcher>,
    clock: &Arc<ManualClock>,
) -> CacheWorker {
    let mut config = Config::for_origin(Url::parse(ORIGIN).unwrap());
    config.version = version.to_string();
    CacheWorker::new(config, store.clone(), fetcher.clone())
        .unwrap()
        .with_platform(Arc::new(RecordingPlatform::default()))
        .with_clock(clock.clone())
}

#[tokio::test]
async fn test_image_cached_for_a_day_then_refetched() {
    let site = Site::deploy("1.0.0").await;
    let bio = url("/bio.png").to_string();
    site.fetcher.respond(&bio, 200, "png-v1");

    let first = site.get("/bio.png", Destination::Image).await;
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.text(), "png-v1");
    assert_eq!(site.fetcher.calls(&bio), 1);

    site.clock.advance(Duration::hours(23));
    let second = site.get("/bio.png", Destination::Image).await;
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.text(), "png-v1");
    assert_eq!(site.fetcher.calls(&bio), 1);

    site.clock.advance(Duration::hours(2));
    site.fetcher.respond(&bio, 200, "png-v2");
    let third = site.get("/bio.png", Destination::Image).await;
    assert_eq!(third.source, ResponseSource::Network);
    assert_eq!(third.text(), "png-v2");
    assert_eq!(site.fetcher.calls(&bio), 2);
}

#[tokio::test]
async fn test_stale_entry_is_overwritten_with_new_stamp() {
    let site = Site::deploy("1.0.0").await;
    let data = url("/data.json");
    site.fetcher.respond(data.as_str(), 200, "old");
    site.get("/data.json", Destination::Other).await;

    site.clock.advance(Duration::hours(1));
    site.fetcher.respond(data.as_str(), 200, "new");
    let refreshed = site.get("/data.json", Destination::Other).await;
    assert_eq!(refreshed.source, ResponseSource::Network);

    let stored = site
        .store
        .get(&site.dynamic(), &RequestKey::get(&data))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.to_response(ResponseSource::Cache).text(), "new");
    assert_eq!(stored.stored_at(), Some(site.clock.now()));
}

#[tokio::test]
async fn test_stale_copy_served_when_network_fails() {
    let site = Site::deploy("1.0.0").await;
    let feed = url("/feed.json");
    site.fetcher.respond(feed.as_str(), 200, "cached feed");
    site.get("/feed.json", Destination::Other).await;

    site.clock.advance(Duration::hours(6));
    site.fetcher.fail(feed.as_str());
    let response = site.get("/feed.json", Destination::Other).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::StaleCache);
    assert_eq!(response.text(), "cached feed");
}

#[tokio::test]
async fn test_offline_navigation_gets_page_shell() {
    let site = Site::deploy("1.0.0").await;
    site.fetcher.fail(url("/projects").as_str());

    let page = site.get("/projects", Destination::Document).await;
    assert_eq!(page.source, ResponseSource::ShellFallback);
    assert_eq!(page.text(), url("/index.html").as_str());

    // Non-documents never get the shell
    site.fetcher.fail(url("/projects.css").as_str());
    let style = site.get("/projects.css", Destination::Other).await;
    assert_eq!(style.status, 503);
    assert_eq!(style.text(), "Portfolio Hub is offline");
}

#[tokio::test]
async fn test_offline_navigation_without_shell_is_503() {
    let site = Site::deploy("1.0.0").await;
    let static_name = site.worker().config().static_cache_name();
    site.store.delete_generation(&static_name).await.unwrap();
    site.fetcher.fail(url("/projects").as_str());

    let page = site.get("/projects", Destination::Document).await;
    assert_eq!(page.status, 503);
    assert_eq!(page.source, ResponseSource::Offline);
}

#[tokio::test]
async fn test_untrusted_cross_origin_passes_through() {
    let site = Site::deploy("1.0.0").await;
    let tracker = "https://tracker.example/pixel.js";
    site.fetcher.respond(tracker, 200, "track()");
    let before = site.store.list_keys(&site.dynamic()).await.unwrap_or_default();

    let request = Request::parse(tracker, Destination::Other).unwrap();
    let response = site.worker().handle_fetch(&request).await.unwrap();
    assert_eq!(response.text(), "track()");

    let after = site.store.list_keys(&site.dynamic()).await.unwrap_or_default();
    assert_eq!(before, after);

    // Trusted hosts and images are stored even cross-origin
    let avatar = "https://ik.imagekit.io/ItsWatuyusei/Image/avatar.png";
    site.fetcher.respond(avatar, 200, "png");
    let request = Request::parse(avatar, Destination::Image).unwrap();
    site.worker().handle_fetch(&request).await.unwrap();
    let keys = site.store.list_keys(&site.dynamic()).await.unwrap();
    assert!(keys.iter().any(|k| k.url == avatar));
}

#[tokio::test]
async fn test_rollover_deletes_only_own_stale_generations() {
    let store = Arc::new(MemoryStore::new());
    for name in [
        "portfolio-hub-2025-static-0.9.0",
        "portfolio-hub-2025-dynamic-0.9.0",
        "portfolio-hub-2025-static-1.0.0",
        "other-site-static-3.1.0",
    ] {
        store.open(name).await.unwrap();
    }

    let fetcher = Arc::new(ScriptedFetcher::new());
    let clock = Arc::new(ManualClock::new());
    let worker = new_worker("1.0.0", &store, &fetcher, &clock);
    fetcher.serve_all(&worker.config().manifest(), ORIGIN);

    let mut registration = Registration::register(&url("/"), "/sw.js", None).unwrap();
    registration.update(worker).await.unwrap();

    let mut names = store.generation_names().await.unwrap();
    names.sort();
    assert_eq!(
        names,
        vec![
            "other-site-static-3.1.0".to_string(),
            "portfolio-hub-2025-static-1.0.0".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_sweep_removes_twenty_oldest() {
    let site = Site::deploy("1.0.0").await;
    let dynamic = site.dynamic();
    let response = Response::new(200, "OK", b"x".to_vec());
    for i in 0..101 {
        let key = RequestKey::get(&url(&format!("/asset-{}.js", i)));
        let entry = CachedEntry::unstamped(&key, &response);
        site.store.put(&dynamic, &key, entry).await.unwrap();
    }

    site.worker().sweep().await.unwrap();

    let keys = site.store.list_keys(&dynamic).await.unwrap();
    assert_eq!(keys.len(), 81);
    let expected: Vec<String> = (20..101)
        .map(|i| url(&format!("/asset-{}.js", i)).to_string())
        .collect();
    let remaining: Vec<String> = keys.into_iter().map(|k| k.url).collect();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn test_reinstall_has_no_duplicate_keys() {
    let site = Site::deploy("1.0.0").await;
    let static_name = site.worker().config().static_cache_name();
    let manifest_len = site.worker().config().manifest().len();

    let mut registration = site.registration;
    let again = new_worker("1.0.0", &site.store, &site.fetcher, &site.clock);
    registration.update(again).await.unwrap();

    let keys = site.store.list_keys(&static_name).await.unwrap();
    let mut unique = keys.clone();
    unique.sort_by(|a, b| a.url.cmp(&b.url));
    unique.dedup();
    assert_eq!(keys.len(), manifest_len);
    assert_eq!(unique.len(), manifest_len);
}

#[tokio::test]
async fn test_reserved_route_ignores_freshness() {
    let site = Site::deploy("1.0.0").await;
    let static_name = site.worker().config().static_cache_name();
    let document = url("/v1/index.html");
    let key = RequestKey::get(&document);
    let response = Response::new(200, "OK", b"<h1>v1</h1>".to_vec());
    site.store
        .put(&static_name, &key, CachedEntry::unstamped(&key, &response))
        .await
        .unwrap();

    site.clock.advance(Duration::days(30));
    for path in ["/v1", "/v1/"] {
        let page = site.get(path, Destination::Document).await;
        assert_eq!(page.source, ResponseSource::Route);
        assert_eq!(page.text(), "<h1>v1</h1>");
    }
    assert_eq!(site.fetcher.total_calls(), 0);

    // Uncached reserved routes do not reach the network either
    let v2 = site.get("/v2", Destination::Document).await;
    assert_eq!(v2.status, 503);
    assert_eq!(site.fetcher.total_calls(), 0);
}
