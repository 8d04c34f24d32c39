//! Version checks against the live deployment and the full-reset recovery path.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::ResponseCache;
use crate::config::{RouterConfig, UpdateConfig};
use crate::event::{EngineEvent, WorkerCommand};
use crate::prefs::{Prefs, APP_VERSION_KEY, AUTH_SESSION_PREFIX, IMAGE_NOTICE_KEY};

/// Outcome of one version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
  /// First run: the server version became the local baseline, no banner
  AdoptedBaseline { version: String },
  /// Local and server versions agree
  UpToDate { version: String },
  /// A newer deployment is live; the local version stays until an explicit
  /// reload or adopt
  UpdateAvailable { local: String, server: String },
  /// The check could not reach the server; equivalent to "no update known yet"
  Unknown,
}

/// What a full reset removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetReport {
  pub caches_deleted: usize,
  pub prefs_removed: usize,
}

#[derive(Deserialize)]
struct VersionPayload {
  version: String,
}

/// Compares the remembered app version against the server-declared one and
/// drives the update banner and the last-resort reset flow.
pub struct UpdateCoordinator {
  inner: Arc<Inner>,
  poll: Arc<Mutex<Option<JoinHandle<()>>>>,
}

struct Inner {
  client: reqwest::Client,
  version_url: Url,
  poll_interval: Duration,
  prefs: Arc<Prefs>,
  events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl UpdateCoordinator {
  pub fn new(
    origin: &str,
    router: &RouterConfig,
    update: &UpdateConfig,
    prefs: Arc<Prefs>,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
  ) -> Result<Self> {
    let version_url = Url::parse(origin)
      .and_then(|base| base.join(&router.version_path))
      .map_err(|e| eyre!("Invalid version endpoint: {}", e))?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build version-check client: {}", e))?;

    Ok(Self {
      inner: Arc::new(Inner {
        client,
        version_url,
        poll_interval: Duration::from_secs(update.poll_interval_secs),
        prefs,
        events,
      }),
      poll: Arc::new(Mutex::new(None)),
    })
  }

  /// Fetch the server-declared version. Query-string cache-busted as defense
  /// in depth on top of the router's never-cache rule for this path.
  async fn fetch_server_version(&self) -> Result<String> {
    let mut url = self.inner.version_url.clone();
    url.set_query(Some(&Utc::now().timestamp_millis().to_string()));

    let response = self
      .inner
      .client
      .get(url)
      .header("cache-control", "no-cache")
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(eyre!("Version check returned HTTP {}", response.status()));
    }

    let payload: VersionPayload = response.json().await?;
    Ok(payload.version)
  }

  /// Compare the server version against the remembered one.
  ///
  /// An unreachable or malformed endpoint is not an error state for this
  /// check; it resolves to `Unknown` and the next poll tick tries again.
  /// Storage failures do propagate.
  pub async fn check_for_updates(&self) -> Result<UpdateCheck> {
    let server = match self.fetch_server_version().await {
      Ok(version) => version,
      Err(e) => {
        debug!("Version check failed, ignoring: {}", e);
        return Ok(UpdateCheck::Unknown);
      }
    };

    match self.inner.prefs.get(APP_VERSION_KEY)? {
      None => {
        self.inner.prefs.set(APP_VERSION_KEY, &server)?;
        info!("Adopted version baseline {}", server);
        Ok(UpdateCheck::AdoptedBaseline { version: server })
      }
      Some(local) if local == server => Ok(UpdateCheck::UpToDate { version: server }),
      Some(local) => {
        info!("Update available: {} -> {}", local, server);
        if let Some(events) = &self.inner.events {
          let _ = events.send(EngineEvent::UpdateAvailable {
            local: local.clone(),
            server: server.clone(),
          });
        }
        Ok(UpdateCheck::UpdateAvailable { local, server })
      }
    }
  }

  /// Remember the current server version without reloading; the banner
  /// dismiss path.
  pub async fn adopt_server_version(&self) -> Result<Option<String>> {
    match self.fetch_server_version().await {
      Ok(server) => {
        self.inner.prefs.set(APP_VERSION_KEY, &server)?;
        Ok(Some(server))
      }
      Err(e) => {
        debug!("Could not adopt server version: {}", e);
        Ok(None)
      }
    }
  }

  /// Periodic version check. Restarting clears the previous timer first.
  pub fn start_polling(&self) -> Result<()> {
    let mut guard = self
      .poll
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(handle) = guard.take() {
      handle.abort();
    }

    let coordinator = self.clone();
    *guard = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(coordinator.inner.poll_interval);
      loop {
        ticker.tick().await;
        if let Err(e) = coordinator.check_for_updates().await {
          debug!("Scheduled version check failed: {}", e);
        }
      }
    }));

    Ok(())
  }

  pub fn stop_polling(&self) -> Result<()> {
    let mut guard = self
      .poll
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(handle) = guard.take() {
      handle.abort();
    }

    Ok(())
  }

  /// The nuclear recovery path for "app stuck" reports.
  ///
  /// Deletes every cache generation in one enumerate-then-delete pass, prunes
  /// all remembered state except the auth session and the one-time image
  /// notice, tells the worker to clear and deregister, then asks the host to
  /// reload. Login survives so a repair never forces re-authentication.
  pub fn perform_full_reset<C: ResponseCache>(
    &self,
    caches: &C,
    worker: Option<&mpsc::UnboundedSender<WorkerCommand>>,
  ) -> Result<ResetReport> {
    let names = caches.list_caches()?;
    for name in &names {
      caches.delete_cache(name)?;
    }

    let prefs_removed = self
      .inner
      .prefs
      .clear_except(&[AUTH_SESSION_PREFIX], &[IMAGE_NOTICE_KEY])?;

    if let Some(worker) = worker {
      let _ = worker.send(WorkerCommand::ClearCachesAndDeregister);
    }
    if let Some(events) = &self.inner.events {
      let _ = events.send(EngineEvent::ReloadRequested);
    }

    info!(
      "Full reset: {} caches deleted, {} prefs removed",
      names.len(),
      prefs_removed
    );

    Ok(ResetReport {
      caches_deleted: names.len(),
      prefs_removed,
    })
  }
}

impl Clone for UpdateCoordinator {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      poll: Arc::clone(&self.poll),
    }
  }
}
