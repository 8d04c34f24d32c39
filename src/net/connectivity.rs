//! Best-effort online/offline detection.
//!
//! Platform-level online signals produce false positives (captive portals, DNS
//! failures), so a live probe against a well-known endpoint is authoritative.
//! A platform "definitely offline" signal is trusted immediately; "online" only
//! triggers a verifying probe.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::config::ProbeConfig;
use crate::event::EngineEvent;

/// Cached connectivity state refreshed by active probing.
pub struct ConnectivityMonitor {
  inner: Arc<Inner>,
  poll: Arc<Mutex<Option<JoinHandle<()>>>>,
}

struct Inner {
  client: reqwest::Client,
  probe_url: Url,
  timeout: Duration,
  interval: Duration,
  offline: AtomicBool,
  events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl ConnectivityMonitor {
  pub fn new(
    config: &ProbeConfig,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
  ) -> Result<Self> {
    let probe_url = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid probe URL {}: {}", config.url, e))?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build probe client: {}", e))?;

    Ok(Self {
      inner: Arc::new(Inner {
        client,
        probe_url,
        timeout: Duration::from_millis(config.timeout_ms),
        interval: Duration::from_secs(config.interval_secs),
        offline: AtomicBool::new(false),
        events,
      }),
      poll: Arc::new(Mutex::new(None)),
    })
  }

  /// Best-effort offline flag, from the most recent probe or platform signal.
  pub fn is_offline(&self) -> bool {
    self.inner.offline.load(Ordering::Relaxed)
  }

  /// Issue a cache-bypassing probe. Any response at all counts as online,
  /// including non-inspectable ones; only an error or timeout means offline.
  pub async fn probe(&self) -> bool {
    let result = self
      .inner
      .client
      .get(self.inner.probe_url.clone())
      .header("cache-control", "no-cache")
      .timeout(self.inner.timeout)
      .send()
      .await;

    let online = match result {
      Ok(_) => true,
      Err(e) => {
        debug!("Connectivity probe failed: {}", e);
        false
      }
    };

    self.set_online(online);
    online
  }

  /// Feed a platform online/offline transition into the monitor.
  #[allow(dead_code)]
  pub fn note_platform_change(&self, online: bool) {
    if !online {
      // A negative platform signal is cheap and trustworthy
      self.set_online(false);
    } else {
      // A positive one is not; verify with a live probe
      let monitor = self.clone();
      tokio::spawn(async move {
        monitor.probe().await;
      });
    }
  }

  /// Re-probe on a fixed interval to catch silent transitions. Restarting
  /// clears the previous timer first, so at most one poll task runs.
  pub fn start_polling(&self) -> Result<()> {
    let mut guard = self
      .poll
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(handle) = guard.take() {
      handle.abort();
    }

    let monitor = self.clone();
    *guard = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(monitor.inner.interval);
      // The immediate first tick doubles as the on-load probe
      loop {
        ticker.tick().await;
        monitor.probe().await;
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

  fn set_online(&self, online: bool) {
    let was_offline = self.inner.offline.swap(!online, Ordering::Relaxed);
    let changed = was_offline == online;

    if changed {
      if online {
        debug!("Connectivity restored");
      } else {
        warn!("Connectivity lost");
      }
      if let Some(events) = &self.inner.events {
        let _ = events.send(EngineEvent::ConnectivityChanged { online });
      }
    }
  }
}

impl Clone for ConnectivityMonitor {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      poll: Arc::clone(&self.poll),
    }
  }
}
