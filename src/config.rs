use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  #[serde(default)]
  pub router: RouterConfig,
  #[serde(default)]
  pub probe: ProbeConfig,
  #[serde(default)]
  pub update: UpdateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Origin the app shell is served from, e.g. "https://read.example.com"
  pub origin: String,
  /// Backend base URL (article store + auth)
  pub backend_url: String,
  /// Override for the local data directory (databases, logs)
  pub data_dir: Option<PathBuf>,
}

/// Request classification and cache-generation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
  /// Deployment generation tag embedded in cache names
  pub generation: String,
  /// Shell asset manifest, extension-qualified and extension-free forms both listed
  pub static_assets: Vec<String>,
  /// Hosts classified as backend API calls (suffix match)
  pub backend_hosts: Vec<String>,
  /// Hosts classified as third-party CDN assets (suffix match)
  pub cdn_hosts: Vec<String>,
  /// Path of the version probe; never served from any cache
  pub version_path: String,
  /// Shell page served when no navigation fallback variant matches
  pub default_shell: String,
  /// Fallback key precedence for offline navigations. Deployment-topology
  /// specific, so configurable rather than hard-coded.
  pub navigation_fallbacks: Vec<FallbackVariant>,
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      generation: "v1".to_string(),
      static_assets: [
        "/",
        "/index.html",
        "/list.html",
        "/reader.html",
        "/css/common.css",
        "/css/login.css",
        "/css/list.css",
        "/css/reader.css",
        "/js/config.js",
        "/js/auth.js",
        "/js/list.js",
        "/js/reader.js",
        "/js/offline-cache.js",
        "/js/common.js",
        "/manifest.json",
        "/icons/icon-192.png",
        "/icons/icon-512.png",
        "/icons/icon-180.png",
        "/icons/favicon-96x96.png",
        "/icons/favicon.ico",
        "/icons/favicon.svg",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      backend_hosts: vec!["supabase.co".to_string()],
      cdn_hosts: vec![
        "googleapis.com".to_string(),
        "gstatic.com".to_string(),
        "jsdelivr.net".to_string(),
      ],
      version_path: "/version.json".to_string(),
      default_shell: "/list.html".to_string(),
      navigation_fallbacks: vec![
        FallbackVariant::ExtensionQualified,
        FallbackVariant::ExtensionFree,
        FallbackVariant::ExactPath,
        FallbackVariant::RootShell,
      ],
    }
  }
}

/// One candidate-key rule for resolving an offline navigation against the
/// static cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackVariant {
  /// "/reader" -> "/reader.html"
  ExtensionQualified,
  /// "/reader.html" -> "/reader"
  ExtensionFree,
  /// The request path as-is
  ExactPath,
  /// The configured default shell page
  RootShell,
}

impl RouterConfig {
  /// Whether a path names a declared static asset (trailing slash tolerated).
  pub fn is_static_asset(&self, path: &str) -> bool {
    self
      .static_assets
      .iter()
      .any(|asset| path == asset || path == format!("{}/", asset))
  }

  pub fn is_backend_host(&self, host: &str) -> bool {
    self.backend_hosts.iter().any(|h| host_matches(host, h))
  }

  pub fn is_cdn_host(&self, host: &str) -> bool {
    self.cdn_hosts.iter().any(|h| host_matches(host, h))
  }
}

fn host_matches(host: &str, candidate: &str) -> bool {
  host == candidate || host.ends_with(&format!(".{}", candidate))
}

/// Connectivity probe settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  /// Lightweight, cache-bypassing endpoint used to verify real connectivity
  pub url: String,
  pub timeout_ms: u64,
  pub interval_secs: u64,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      url: "https://www.gstatic.com/generate_204".to_string(),
      timeout_ms: 2500,
      interval_secs: 15,
    }
  }
}

/// Version check settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
  pub poll_interval_secs: u64,
}

impl Default for UpdateConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: 900,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./inkcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/inkcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/inkcache/config.yaml\n\
                 with at least app.origin and app.backend_url."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("inkcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("inkcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the backend API key from environment variables.
  pub fn get_backend_key() -> Result<String> {
    std::env::var("INKCACHE_BACKEND_KEY").map_err(|_| {
      eyre!("Backend API key not found. Set the INKCACHE_BACKEND_KEY environment variable.")
    })
  }
}
