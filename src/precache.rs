//! Install-time shell asset precache and activation-time generation eviction.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheSet, CachedResponse, ResponseCache};
use crate::config::RouterConfig;
use crate::event::WorkerCommand;

/// Outcome of one precache pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecacheReport {
  pub attempted: usize,
  pub failed: usize,
}

/// Populates the static cache on install and prunes stale generations on
/// activation.
pub struct PrecacheManager<C: ResponseCache + 'static> {
  client: reqwest::Client,
  caches: Arc<C>,
  names: CacheSet,
  origin: Url,
  manifest: Vec<String>,
}

impl<C: ResponseCache + 'static> PrecacheManager<C> {
  pub fn new(origin: &str, config: &RouterConfig, caches: Arc<C>) -> Result<Self> {
    let origin =
      Url::parse(origin).map_err(|e| eyre!("Invalid app origin {}: {}", origin, e))?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build precache client: {}", e))?;

    Ok(Self {
      client,
      caches,
      names: CacheSet::new(config.generation.clone()),
      origin,
      manifest: config.static_assets.clone(),
    })
  }

  /// Fetch and store every manifest asset independently. A single failing
  /// asset is logged and counted but never aborts the rest; a degraded shell
  /// beats no shell. Completes regardless of the failure count.
  pub async fn install(&self) -> Result<PrecacheReport> {
    use futures::stream::{self, StreamExt};

    info!("Precaching {} shell assets", self.manifest.len());

    let results: Vec<(&String, Result<()>)> = stream::iter(self.manifest.iter())
      .map(|path| async move { (path, self.fetch_asset(path).await) })
      .buffer_unordered(6)
      .collect()
      .await;

    let mut failed = 0;
    for (path, result) in results {
      if let Err(e) = result {
        warn!("Precache failed for {}: {}", path, e);
        failed += 1;
      }
    }

    let report = PrecacheReport {
      attempted: self.manifest.len(),
      failed,
    };
    info!(
      "Precache complete: {}/{} assets cached; replacing previous version immediately",
      report.attempted - report.failed,
      report.attempted
    );

    Ok(report)
  }

  async fn fetch_asset(&self, path: &str) -> Result<()> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset path {}: {}", path, e))?;

    let response = self.client.get(url).send().await?;
    // Capture copies status and body into a fresh record, so an asset that
    // arrived via redirect can still satisfy a later navigation
    let captured = CachedResponse::capture(response).await?;

    if !captured.is_success() {
      return Err(eyre!("HTTP {} for {}", captured.status, path));
    }

    self.caches.put(&self.names.static_cache(), path, &captured)
  }

  /// Delete every cache whose generation tag differs from the current one.
  /// A single enumerate-filter-delete pass; key-level pruning never happens.
  pub fn activate(&self) -> Result<usize> {
    let existing = self.caches.list_caches()?;
    let stale: Vec<_> = existing
      .into_iter()
      .filter(|name| !self.names.contains(name))
      .collect();

    for name in &stale {
      info!("Deleting old cache: {}", name.label());
      self.caches.delete_cache(name)?;
    }

    Ok(stale.len())
  }

  /// Handle a control message from the UI side.
  pub fn handle_command(&self, command: WorkerCommand) -> Result<()> {
    match command {
      WorkerCommand::SkipWaiting => {
        info!("Skip-waiting requested, activating now");
        self.activate()?;
      }
      WorkerCommand::ClearCachesAndDeregister => {
        for name in self.caches.list_caches()? {
          self.caches.delete_cache(&name)?;
        }
        info!("All caches cleared, registration dropped");
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheName, SqliteResponseCache};

  fn open_caches() -> (tempfile::TempDir, Arc<SqliteResponseCache>) {
    let dir = tempfile::tempdir().unwrap();
    let caches =
      Arc::new(SqliteResponseCache::open_at(&dir.path().join("responses.db")).unwrap());
    (dir, caches)
  }

  fn sample(body: &str) -> CachedResponse {
    CachedResponse {
      status: 200,
      headers: Vec::new(),
      body: body.as_bytes().to_vec(),
    }
  }

  #[tokio::test]
  async fn install_tolerates_individual_asset_failures() {
    let mut server = mockito::Server::new_async().await;
    let _ok_a = server
      .mock("GET", "/index.html")
      .with_status(200)
      .with_body("index")
      .create_async()
      .await;
    let _ok_b = server
      .mock("GET", "/css/common.css")
      .with_status(200)
      .with_body("css")
      .create_async()
      .await;
    let _gone = server
      .mock("GET", "/icons/icon-192.png")
      .with_status(404)
      .create_async()
      .await;

    let mut config = RouterConfig::default();
    config.static_assets = vec![
      "/index.html".to_string(),
      "/css/common.css".to_string(),
      "/icons/icon-192.png".to_string(),
    ];

    let (_dir, caches) = open_caches();
    let manager = PrecacheManager::new(&server.url(), &config, Arc::clone(&caches)).unwrap();

    let report = manager.install().await.unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.failed, 1);

    // Everything that did fetch is retrievable afterwards
    let cache = manager.names.static_cache();
    assert_eq!(
      caches.lookup(&cache, "/index.html").unwrap().unwrap().body,
      b"index"
    );
    assert_eq!(
      caches.lookup(&cache, "/css/common.css").unwrap().unwrap().body,
      b"css"
    );
    assert!(caches.lookup(&cache, "/icons/icon-192.png").unwrap().is_none());
  }

  #[tokio::test]
  async fn activate_evicts_only_stale_generations() {
    let (_dir, caches) = open_caches();

    let old_set = CacheSet::new("v1");
    let current_set = CacheSet::new("v2");
    caches
      .put(&old_set.static_cache(), "/index.html", &sample("old"))
      .unwrap();
    caches
      .put(&old_set.api_cache(), "/api", &sample("old api"))
      .unwrap();
    caches
      .put(&current_set.static_cache(), "/index.html", &sample("new"))
      .unwrap();

    let mut config = RouterConfig::default();
    config.generation = "v2".to_string();
    let manager =
      PrecacheManager::new("https://read.example.com", &config, Arc::clone(&caches)).unwrap();

    let deleted = manager.activate().unwrap();
    assert_eq!(deleted, 2);

    assert!(caches
      .lookup(&old_set.static_cache(), "/index.html")
      .unwrap()
      .is_none());
    assert!(caches
      .lookup(&current_set.static_cache(), "/index.html")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn skip_waiting_command_activates_immediately() {
    let (_dir, caches) = open_caches();
    caches
      .put(&CacheSet::new("v0").static_cache(), "/index.html", &sample("old"))
      .unwrap();
    caches
      .put(&CacheSet::new("v1").static_cache(), "/index.html", &sample("new"))
      .unwrap();

    let manager = PrecacheManager::new(
      "https://read.example.com",
      &RouterConfig::default(),
      Arc::clone(&caches),
    )
    .unwrap();

    manager.handle_command(WorkerCommand::SkipWaiting).unwrap();

    let remaining = caches.list_caches().unwrap();
    assert_eq!(remaining, vec![CacheSet::new("v1").static_cache()]);
  }

  #[tokio::test]
  async fn clear_command_empties_every_generation() {
    let (_dir, caches) = open_caches();
    caches
      .put(
        &CacheName::new(crate::cache::CacheComponent::Static, "v1"),
        "/index.html",
        &sample("x"),
      )
      .unwrap();
    caches
      .put(
        &CacheName::new(crate::cache::CacheComponent::Font, "v2"),
        "/font.woff2",
        &sample("y"),
      )
      .unwrap();

    let manager = PrecacheManager::new(
      "https://read.example.com",
      &RouterConfig::default(),
      Arc::clone(&caches),
    )
    .unwrap();

    manager
      .handle_command(WorkerCommand::ClearCachesAndDeregister)
      .unwrap();
    assert!(caches.list_caches().unwrap().is_empty());
  }
}
