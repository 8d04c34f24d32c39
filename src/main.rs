mod cache;
mod config;
mod event;
mod net;
mod precache;
mod prefs;
mod router;
mod store;
mod update;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use url::Url;

use cache::SqliteResponseCache;
use config::Config;
use net::ConnectivityMonitor;
use precache::PrecacheManager;
use prefs::Prefs;
use router::{CacheRouter, RouteRequest};
use store::{ArticleRecord, ArticleStore};
use update::{UpdateCheck, UpdateCoordinator};

#[derive(Parser, Debug)]
#[command(name = "inkcache")]
#[command(about = "Offline caching and update engine for an e-ink article reader")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/inkcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the static cache from the asset manifest and activate this generation
  Precache,
  /// List locally stored articles, newest first
  List,
  /// Download the full content of an article for offline reading
  Download { id: String },
  /// Remove a downloaded article
  Remove { id: String },
  /// Show connectivity and offline store status
  Status,
  /// Check whether a newer deployment is live
  CheckUpdates,
  /// Dismiss a pending update by adopting the current server version
  DismissUpdate,
  /// Run the connectivity and version pollers, printing engine events
  Watch,
  /// Clear all caches and remembered state except login, then request a reload
  Reset,
}

/// Default base directory for databases and logs.
fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(base.join("inkcache"))
}

fn init_tracing(dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let appender = tracing_appender::rolling::daily(dir.join("logs"), "inkcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let base_dir = match &config.app.data_dir {
    Some(dir) => dir.clone(),
    None => data_dir()?,
  };
  let _log_guard = init_tracing(&base_dir)?;

  // Deployments whose backend host falls outside the configured suffixes
  // still get network-first treatment for their own backend
  let mut router_config = config.router.clone();
  if let Ok(backend) = Url::parse(&config.app.backend_url) {
    if let Some(host) = backend.host_str() {
      if !router_config.is_backend_host(host) {
        router_config.backend_hosts.push(host.to_string());
      }
    }
  }

  let caches = Arc::new(SqliteResponseCache::open_at(&base_dir.join("responses.db"))?);
  let store = ArticleStore::open_at(&base_dir.join("articles.db"))?;
  let prefs = Arc::new(Prefs::open_at(&base_dir.join("prefs.db"))?);

  match args.command {
    Command::Precache => {
      let manager =
        PrecacheManager::new(&config.app.origin, &router_config, Arc::clone(&caches))?;
      let report = manager.install().await?;
      let evicted = manager.activate()?;
      println!(
        "Precached {}/{} assets ({} failed), evicted {} stale cache generation(s)",
        report.attempted - report.failed,
        report.attempted,
        report.failed,
        evicted
      );
    }

    Command::List => {
      let articles = store.list()?;
      if articles.is_empty() {
        println!("No articles stored offline.");
      }
      for article in articles {
        let marker = if article.is_fully_downloaded() {
          "downloaded"
        } else {
          "metadata only"
        };
        println!("{}  {}  [{}]", article.id, article.title, marker);
      }
    }

    Command::Download { id } => {
      if store.is_fully_available(&id)? {
        println!("Article {} is already downloaded; refreshing.", id);
      }
      let router = CacheRouter::new(router_config, Arc::clone(&caches))?;
      let record = fetch_article(&router, &config, &id).await?;
      store.put(&record)?;
      println!("Downloaded \"{}\" for offline reading.", record.title);
    }

    Command::Remove { id } => {
      store.delete(&id)?;
      println!("Removed article {} from the offline store.", id);
    }

    Command::Status => {
      let monitor = ConnectivityMonitor::new(&config.probe, None)?;
      let online = monitor.probe().await;
      let stats = store.stats()?;
      let version = prefs.get(prefs::APP_VERSION_KEY)?;

      println!("Connectivity: {}", if online { "online" } else { "offline" });
      println!(
        "Offline store: {} article(s), {}",
        stats.count,
        stats.size_formatted()
      );
      println!(
        "App version: {}",
        version.as_deref().unwrap_or("(not yet adopted)")
      );
    }

    Command::CheckUpdates => {
      let coordinator = UpdateCoordinator::new(
        &config.app.origin,
        &config.router,
        &config.update,
        Arc::clone(&prefs),
        None,
      )?;

      match coordinator.check_for_updates().await? {
        UpdateCheck::AdoptedBaseline { version } => {
          println!("First run: adopted version {}.", version)
        }
        UpdateCheck::UpToDate { version } => println!("Up to date at version {}.", version),
        UpdateCheck::UpdateAvailable { local, server } => {
          println!("Update available: {} -> {}. Reload to apply.", local, server)
        }
        UpdateCheck::Unknown => println!("Could not reach the version endpoint; no update known."),
      }
    }

    Command::DismissUpdate => {
      let coordinator = UpdateCoordinator::new(
        &config.app.origin,
        &config.router,
        &config.update,
        Arc::clone(&prefs),
        None,
      )?;

      match coordinator.adopt_server_version().await? {
        Some(version) => println!("Adopted server version {}.", version),
        None => println!("Version endpoint unreachable; nothing adopted."),
      }
    }

    Command::Watch => {
      let (events_tx, mut events) = event::EngineEvents::channel();
      let monitor = ConnectivityMonitor::new(&config.probe, Some(events_tx.clone()))?;
      let coordinator = UpdateCoordinator::new(
        &config.app.origin,
        &config.router,
        &config.update,
        Arc::clone(&prefs),
        Some(events_tx),
      )?;

      monitor.start_polling()?;
      coordinator.start_polling()?;
      println!("Watching connectivity and deployment version. Ctrl-C to stop.");

      loop {
        tokio::select! {
          maybe = events.next() => match maybe {
            Some(event::EngineEvent::UpdateAvailable { local, server }) => {
              println!("Update available: {} -> {}", local, server)
            }
            Some(event::EngineEvent::ConnectivityChanged { online }) => {
              println!("Connectivity: {}", if online { "online" } else { "offline" })
            }
            Some(event::EngineEvent::ReloadRequested) => println!("Reload requested."),
            None => break,
          },
          _ = tokio::signal::ctrl_c() => {
            monitor.stop_polling()?;
            coordinator.stop_polling()?;
            break;
          }
        }
      }
    }

    Command::Reset => {
      let coordinator = UpdateCoordinator::new(
        &config.app.origin,
        &config.router,
        &config.update,
        Arc::clone(&prefs),
        None,
      )?;
      let manager =
        PrecacheManager::new(&config.app.origin, &router_config, Arc::clone(&caches))?;

      let (worker_tx, mut worker_rx) = tokio::sync::mpsc::unbounded_channel();
      let report = coordinator.perform_full_reset(caches.as_ref(), Some(&worker_tx))?;
      drop(worker_tx);
      while let Some(command) = worker_rx.recv().await {
        manager.handle_command(command)?;
      }

      store.clear()?;
      println!(
        "Reset complete: {} cache generation(s) deleted, {} setting(s) removed. Login preserved.",
        report.caches_deleted, report.prefs_removed
      );
    }
  }

  Ok(())
}

/// Pull one full article record from the backend through the router, so a
/// fresh copy lands in the API cache as a side effect.
async fn fetch_article(
  router: &CacheRouter<SqliteResponseCache>,
  config: &Config,
  id: &str,
) -> Result<ArticleRecord> {
  let mut url = Url::parse(&config.app.backend_url)
    .and_then(|base| base.join("/rest/v1/articles"))
    .map_err(|e| eyre!("Invalid backend URL: {}", e))?;
  url.set_query(Some(&format!("id=eq.{}&select=*", id)));

  let mut request = RouteRequest::get(url);
  if let Ok(key) = Config::get_backend_key() {
    request = request
      .with_header("apikey", key.clone())
      .with_header("authorization", format!("Bearer {}", key));
  }

  let response = router.handle(request).await?;
  if response.status == 503 {
    return Err(eyre!(
      "Offline and article {} has no cached copy. Connect and try again.",
      id
    ));
  }
  if !response.is_success() {
    return Err(eyre!(
      "Backend returned HTTP {} for article {}: {}",
      response.status,
      id,
      response.body_text()
    ));
  }

  let mut records: Vec<ArticleRecord> = serde_json::from_slice(&response.body)
    .map_err(|e| eyre!("Malformed article record from backend: {}", e))?;

  let record = records.pop().ok_or_else(|| eyre!("Article {} not found", id))?;
  if !record.is_fully_downloaded() {
    info!("Article {} arrived without content; storing metadata only", id);
  }

  Ok(record)
}
