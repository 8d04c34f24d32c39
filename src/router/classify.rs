//! Request classification into a closed set of caching strategies.

use url::Url;

use crate::config::{FallbackVariant, RouterConfig};

/// The caching strategy applied to one intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Full-page load: network, then cached shell by path heuristic
  ShellFallback,
  /// Version probe: bypass all caches in both directions
  NetworkOnly,
  /// Declared static asset: cache, then network (storing a copy)
  CacheFirst,
  /// Backend API call: network (storing a copy), then cache, then offline error
  NetworkFirst,
  /// CDN asset: cached copy immediately, refresh in the background
  StaleWhileRevalidate,
  /// Everything else: forward to the network untouched
  PassThrough,
}

/// An outbound request as seen at the interception boundary.
#[derive(Debug, Clone)]
pub struct RouteRequest {
  pub method: reqwest::Method,
  pub url: Url,
  /// Whether this is a full-page load rather than a subresource fetch
  pub is_navigation: bool,
  /// Extra request headers, e.g. backend auth
  pub headers: Vec<(String, String)>,
}

impl RouteRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: reqwest::Method::GET,
      url,
      is_navigation: false,
      headers: Vec::new(),
    }
  }

  pub fn navigation(url: Url) -> Self {
    Self {
      method: reqwest::Method::GET,
      url,
      is_navigation: true,
      headers: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Cache key for the static cache: path plus query.
  pub fn static_exact_key(&self) -> String {
    match self.url.query() {
      Some(q) => format!("{}?{}", self.url.path(), q),
      None => self.url.path().to_string(),
    }
  }

  /// Query-stripped static key: path only. Precached assets live under this.
  pub fn static_stripped_key(&self) -> String {
    self.url.path().to_string()
  }

  /// Cache key for the API and font caches: the full normalized URL.
  pub fn url_key(&self) -> String {
    self.url.as_str().to_string()
  }
}

/// Classify a request. Pure function of the request and the router config.
pub fn classify(request: &RouteRequest, config: &RouterConfig) -> Strategy {
  // Navigations get the shell fallback regardless of search params
  if request.is_navigation {
    return Strategy::ShellFallback;
  }

  // Non-GET requests are never intercepted for caching
  if request.method != reqwest::Method::GET {
    return Strategy::PassThrough;
  }

  let path = request.url.path();

  // The version probe is the one signal that must always reflect the live
  // deployment; never serve or store it from any cache
  if path == config.version_path {
    return Strategy::NetworkOnly;
  }

  if config.is_static_asset(path) {
    return Strategy::CacheFirst;
  }

  if let Some(host) = request.url.host_str() {
    if config.is_backend_host(host) {
      return Strategy::NetworkFirst;
    }
    if config.is_cdn_host(host) {
      return Strategy::StaleWhileRevalidate;
    }
  }

  Strategy::PassThrough
}

/// Candidate static-cache keys for resolving an offline navigation, in the
/// configured precedence order, deduplicated.
pub fn navigation_fallback_keys(path: &str, config: &RouterConfig) -> Vec<String> {
  let mut keys: Vec<String> = Vec::new();

  for variant in &config.navigation_fallbacks {
    let candidate = match variant {
      FallbackVariant::ExtensionQualified => add_html_extension(path),
      FallbackVariant::ExtensionFree => strip_extension(path),
      FallbackVariant::ExactPath => Some(path.to_string()),
      FallbackVariant::RootShell => Some(config.default_shell.clone()),
    };

    if let Some(key) = candidate {
      if !keys.contains(&key) {
        keys.push(key);
      }
    }
  }

  keys
}

/// "/reader" -> "/reader.html"; already-qualified or root paths yield nothing.
fn add_html_extension(path: &str) -> Option<String> {
  let (_, file) = path.rsplit_once('/')?;
  if file.is_empty() || file.contains('.') {
    return None;
  }
  Some(format!("{}.html", path))
}

/// "/reader.html" -> "/reader".
fn strip_extension(path: &str) -> Option<String> {
  let (dir, file) = path.rsplit_once('/')?;
  let (stem, _ext) = file.rsplit_once('.')?;
  if stem.is_empty() {
    return None;
  }
  Some(format!("{}/{}", dir, stem))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> RouterConfig {
    RouterConfig::default()
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn navigations_use_shell_fallback() {
    let req = RouteRequest::navigation(url("https://read.example.com/reader.html?id=42"));
    assert_eq!(classify(&req, &config()), Strategy::ShellFallback);
  }

  #[test]
  fn non_get_is_never_intercepted() {
    let mut req = RouteRequest::get(url("https://abc.supabase.co/rest/v1/articles"));
    req.method = reqwest::Method::POST;
    assert_eq!(classify(&req, &config()), Strategy::PassThrough);
  }

  #[test]
  fn version_probe_is_network_only() {
    let req = RouteRequest::get(url("https://read.example.com/version.json?1700000000"));
    assert_eq!(classify(&req, &config()), Strategy::NetworkOnly);
  }

  #[test]
  fn declared_static_assets_are_cache_first() {
    let req = RouteRequest::get(url("https://read.example.com/css/reader.css"));
    assert_eq!(classify(&req, &config()), Strategy::CacheFirst);
  }

  #[test]
  fn backend_hosts_are_network_first() {
    let req = RouteRequest::get(url("https://abc.supabase.co/rest/v1/articles?select=*"));
    assert_eq!(classify(&req, &config()), Strategy::NetworkFirst);
  }

  #[test]
  fn cdn_hosts_are_stale_while_revalidate() {
    let req = RouteRequest::get(url("https://fonts.gstatic.com/s/literata/v35/a.woff2"));
    assert_eq!(classify(&req, &config()), Strategy::StaleWhileRevalidate);
  }

  #[test]
  fn everything_else_passes_through() {
    let req = RouteRequest::get(url("https://tracker.example.net/pixel.gif"));
    assert_eq!(classify(&req, &config()), Strategy::PassThrough);
  }

  #[test]
  fn static_keys_split_on_query() {
    let req = RouteRequest::get(url("https://read.example.com/list.html?page=2"));
    assert_eq!(req.static_exact_key(), "/list.html?page=2");
    assert_eq!(req.static_stripped_key(), "/list.html");
  }

  #[test]
  fn fallback_keys_follow_configured_precedence() {
    let keys = navigation_fallback_keys("/reader", &config());
    assert_eq!(keys, vec!["/reader.html", "/reader", "/list.html"]);

    let keys = navigation_fallback_keys("/reader.html", &config());
    assert_eq!(keys, vec!["/reader", "/reader.html", "/list.html"]);
  }

  #[test]
  fn fallback_precedence_is_configurable() {
    let mut cfg = config();
    cfg.navigation_fallbacks = vec![crate::config::FallbackVariant::RootShell];

    let keys = navigation_fallback_keys("/reader", &cfg);
    assert_eq!(keys, vec!["/list.html"]);
  }
}
