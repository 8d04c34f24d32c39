//! Request routing at the network boundary.
//!
//! Every outbound request is classified and resolved against the generation
//! caches, a live fetch, or both, each class under its own consistency policy.

mod classify;

pub use classify::{classify, navigation_fallback_keys, RouteRequest, Strategy};

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheSet, CachedResponse, ResponseCache};
use crate::config::RouterConfig;

/// Applies the per-class caching strategy to intercepted requests.
pub struct CacheRouter<C: ResponseCache + 'static> {
  client: reqwest::Client,
  caches: Arc<C>,
  names: CacheSet,
  config: Arc<RouterConfig>,
}

impl<C: ResponseCache + 'static> CacheRouter<C> {
  pub fn new(config: RouterConfig, caches: Arc<C>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build router client: {}", e))?;

    let names = CacheSet::new(config.generation.clone());

    Ok(Self {
      client,
      caches,
      names,
      config: Arc::new(config),
    })
  }

  pub fn cache_names(&self) -> &CacheSet {
    &self.names
  }

  /// Resolve one request under its classified strategy.
  pub async fn handle(&self, request: RouteRequest) -> Result<CachedResponse> {
    let strategy = classify(&request, &self.config);
    debug!("{:?} {} -> {:?}", request.method, request.url, strategy);

    match strategy {
      Strategy::ShellFallback => self.shell_fallback(&request).await,
      Strategy::NetworkOnly | Strategy::PassThrough => self.fetch(&request).await,
      Strategy::CacheFirst => self.cache_first(&request).await,
      Strategy::NetworkFirst => self.network_first(&request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&request).await,
    }
  }

  /// Plain network fetch, captured into a fresh response record.
  async fn fetch(&self, request: &RouteRequest) -> Result<CachedResponse> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    let response = builder.send().await?;
    CachedResponse::capture(response).await
  }

  /// Static assets: exact key, then query-stripped key, then network with a
  /// copy stored for next time.
  async fn cache_first(&self, request: &RouteRequest) -> Result<CachedResponse> {
    let cache = self.names.static_cache();
    let exact = request.static_exact_key();
    let stripped = request.static_stripped_key();

    if let Some(hit) = self.caches.lookup(&cache, &exact)? {
      debug!("Static cache hit: {}", exact);
      return Ok(hit);
    }
    if exact != stripped {
      if let Some(hit) = self.caches.lookup(&cache, &stripped)? {
        debug!("Static cache hit (query stripped): {}", stripped);
        return Ok(hit);
      }
    }

    debug!("Static cache miss, fetching: {}", request.url);
    let response = self.fetch(request).await?;
    if response.is_success() {
      self.caches.put(&cache, &stripped, &response)?;
    }

    Ok(response)
  }

  /// Backend API calls: network, storing a copy on success; on failure the
  /// latest cached copy; failing that, a synthesized offline response.
  async fn network_first(&self, request: &RouteRequest) -> Result<CachedResponse> {
    let cache = self.names.api_cache();
    let key = request.url_key();

    match self.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.caches.put(&cache, &key, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        warn!("Network failed for {}, trying cache: {}", request.url, e);
        if let Some(cached) = self.caches.lookup(&cache, &key)? {
          return Ok(cached);
        }
        Ok(CachedResponse::offline_placeholder())
      }
    }
  }

  /// CDN assets: any cached copy immediately, with a background refresh; no
  /// cached copy means the caller waits on the network.
  async fn stale_while_revalidate(&self, request: &RouteRequest) -> Result<CachedResponse> {
    let cache = self.names.font_cache();
    let key = request.url_key();

    if let Some(cached) = self.caches.lookup(&cache, &key)? {
      let router = self.clone();
      let request = request.clone();
      tokio::spawn(async move {
        match router.fetch(&request).await {
          Ok(response) if response.is_success() => {
            if let Err(e) = router
              .caches
              .put(&router.names.font_cache(), &request.url_key(), &response)
            {
              warn!("Failed to refresh cached copy of {}: {}", request.url, e);
            }
          }
          Ok(_) => {}
          Err(e) => debug!("Background refresh failed for {}: {}", request.url, e),
        }
      });
      return Ok(cached);
    }

    let response = self.fetch(request).await?;
    if response.is_success() {
      self.caches.put(&cache, &key, &response)?;
    }

    Ok(response)
  }

  /// Navigations: network, then the configured fallback-key precedence
  /// against the static cache.
  async fn shell_fallback(&self, request: &RouteRequest) -> Result<CachedResponse> {
    match self.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) => {
        warn!(
          "Navigation fetch failed for {}, serving shell from cache: {}",
          request.url, e
        );

        let cache = self.names.static_cache();
        for key in navigation_fallback_keys(request.url.path(), &self.config) {
          if let Some(hit) = self.caches.lookup(&cache, &key)? {
            debug!("Shell fallback resolved {} via {}", request.url.path(), key);
            return Ok(hit);
          }
        }

        Err(eyre!(
          "Offline and no cached shell for {}",
          request.url.path()
        ))
      }
    }
  }
}

impl<C: ResponseCache + 'static> Clone for CacheRouter<C> {
  fn clone(&self) -> Self {
    Self {
      client: self.client.clone(),
      caches: Arc::clone(&self.caches),
      names: self.names.clone(),
      config: Arc::clone(&self.config),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteResponseCache;
  use std::time::Duration;
  use url::Url;

  fn open_router(config: RouterConfig) -> (tempfile::TempDir, CacheRouter<SqliteResponseCache>) {
    let dir = tempfile::tempdir().unwrap();
    let caches =
      Arc::new(SqliteResponseCache::open_at(&dir.path().join("responses.db")).unwrap());
    let router = CacheRouter::new(config, caches).unwrap();
    (dir, router)
  }

  fn html(body: &str) -> CachedResponse {
    CachedResponse {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  #[tokio::test]
  async fn cache_first_serves_precached_asset_without_network() {
    let (_dir, router) = open_router(RouterConfig::default());
    let cache = router.cache_names().static_cache();
    router
      .caches
      .put(&cache, "/list.html", &html("cached shell"))
      .unwrap();

    // Unroutable host: any network attempt would fail loudly
    let url = Url::parse("http://127.0.0.1:9/list.html").unwrap();
    let response = router.handle(RouteRequest::get(url)).await.unwrap();
    assert_eq!(response.body, b"cached shell");
  }

  #[tokio::test]
  async fn cache_first_resolves_query_via_stripped_key() {
    let (_dir, router) = open_router(RouterConfig::default());
    let cache = router.cache_names().static_cache();
    router
      .caches
      .put(&cache, "/list.html", &html("cached shell"))
      .unwrap();

    let url = Url::parse("http://127.0.0.1:9/list.html?page=2").unwrap();
    let response = router.handle(RouteRequest::get(url)).await.unwrap();
    assert_eq!(response.body, b"cached shell");
  }

  #[tokio::test]
  async fn network_first_stores_a_copy_on_success() {
    let mut server = mockito::Server::new_async().await;
    let host = Url::parse(&server.url()).unwrap().host_str().unwrap().to_string();

    let mut config = RouterConfig::default();
    config.backend_hosts = vec![host];
    let (_dir, router) = open_router(config);

    let _m = server
      .mock("GET", "/rest/v1/articles")
      .match_query(mockito::Matcher::Any)
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"[{"id":"a1"}]"#)
      .create_async()
      .await;

    let url = Url::parse(&format!("{}/rest/v1/articles?select=*", server.url())).unwrap();
    let request = RouteRequest::get(url);
    let key = request.url_key();

    let response = router.handle(request).await.unwrap();
    assert_eq!(response.status, 200);

    let cached = router
      .caches
      .lookup(&router.cache_names().api_cache(), &key)
      .unwrap()
      .unwrap();
    assert_eq!(cached.body, br#"[{"id":"a1"}]"#);
  }

  #[tokio::test]
  async fn network_first_falls_back_to_cached_copy_on_failure() {
    let mut config = RouterConfig::default();
    config.backend_hosts = vec!["127.0.0.1".to_string()];
    let (_dir, router) = open_router(config);

    // A copy from an earlier successful fetch; the backend is unreachable now
    let url = Url::parse("http://127.0.0.1:9/rest/v1/articles?select=*").unwrap();
    let request = RouteRequest::get(url);
    let key = request.url_key();
    router
      .caches
      .put(&router.cache_names().api_cache(), &key, &html("cached api body"))
      .unwrap();

    let response = router.handle(request).await.unwrap();
    assert_eq!(response.body, b"cached api body");
  }

  #[tokio::test]
  async fn network_first_without_cache_synthesizes_offline_response() {
    let mut config = RouterConfig::default();
    config.backend_hosts = vec!["127.0.0.1".to_string()];
    let (_dir, router) = open_router(config);

    let url = Url::parse("http://127.0.0.1:9/rest/v1/articles").unwrap();
    let response = router.handle(RouteRequest::get(url)).await.unwrap();

    assert_eq!(response.status, 503);
    let parsed: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(parsed["error"], "Offline");
  }

  #[tokio::test]
  async fn swr_returns_cached_copy_without_waiting_then_refreshes() {
    let mut server = mockito::Server::new_async().await;
    let host = Url::parse(&server.url()).unwrap().host_str().unwrap().to_string();

    let mut config = RouterConfig::default();
    config.cdn_hosts = vec![host];
    let (_dir, router) = open_router(config);

    let _m = server
      .mock("GET", "/font.woff2")
      .with_status(200)
      .with_body("fresh")
      .create_async()
      .await;

    let url = Url::parse(&format!("{}/font.woff2", server.url())).unwrap();
    let cache = router.cache_names().font_cache();
    let key = RouteRequest::get(url.clone()).url_key();
    router.caches.put(&cache, &key, &html("stale")).unwrap();

    // This call sees the stale copy
    let response = router.handle(RouteRequest::get(url.clone())).await.unwrap();
    assert_eq!(response.body, b"stale");

    // The background refresh lands for the next call
    tokio::time::sleep(Duration::from_millis(200)).await;
    let refreshed = router.caches.lookup(&cache, &key).unwrap().unwrap();
    assert_eq!(refreshed.body, b"fresh");
  }

  #[tokio::test]
  async fn swr_without_cache_waits_on_network() {
    let mut server = mockito::Server::new_async().await;
    let host = Url::parse(&server.url()).unwrap().host_str().unwrap().to_string();

    let mut config = RouterConfig::default();
    config.cdn_hosts = vec![host];
    let (_dir, router) = open_router(config);

    let _m = server
      .mock("GET", "/font.woff2")
      .with_status(200)
      .with_body("network")
      .create_async()
      .await;

    let url = Url::parse(&format!("{}/font.woff2", server.url())).unwrap();
    let response = router.handle(RouteRequest::get(url)).await.unwrap();
    assert_eq!(response.body, b"network");
  }

  #[tokio::test]
  async fn offline_navigation_resolves_shell_by_fallback_precedence() {
    let (_dir, router) = open_router(RouterConfig::default());
    let cache = router.cache_names().static_cache();
    router
      .caches
      .put(&cache, "/reader.html", &html("reader shell"))
      .unwrap();

    let url = Url::parse("http://127.0.0.1:9/reader?id=42").unwrap();
    let response = router
      .handle(RouteRequest::navigation(url))
      .await
      .unwrap();
    assert_eq!(response.body, b"reader shell");
  }

  #[tokio::test]
  async fn offline_navigation_with_empty_cache_is_an_error() {
    let (_dir, router) = open_router(RouterConfig::default());

    let url = Url::parse("http://127.0.0.1:9/reader").unwrap();
    assert!(router.handle(RouteRequest::navigation(url)).await.is_err());
  }
}
