//! Structured cache identifiers.
//!
//! Every response cache is addressed by a (component, generation) pair rather
//! than a free-form name, so generation-based eviction compares identifiers
//! structurally instead of parsing name prefixes.

use color_eyre::{eyre::eyre, Result};

/// The logical partition a response cache belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheComponent {
  /// App shell assets (HTML entry points, CSS, JS, icons, manifest)
  Static,
  /// Backend API responses
  Api,
  /// Third-party CDN assets (fonts etc.)
  Font,
}

impl CacheComponent {
  pub fn as_str(&self) -> &'static str {
    match self {
      CacheComponent::Static => "static",
      CacheComponent::Api => "api",
      CacheComponent::Font => "font",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "static" => Ok(CacheComponent::Static),
      "api" => Ok(CacheComponent::Api),
      "font" => Ok(CacheComponent::Font),
      other => Err(eyre!("Unknown cache component: {}", other)),
    }
  }
}

/// Identifier of one response cache: which partition, which deployment generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheName {
  pub component: CacheComponent,
  pub generation: String,
}

impl CacheName {
  pub fn new(component: CacheComponent, generation: impl Into<String>) -> Self {
    Self {
      component,
      generation: generation.into(),
    }
  }

  /// Human-readable label for logs, e.g. "inkcache-static-v1".
  pub fn label(&self) -> String {
    format!("inkcache-{}-{}", self.component.as_str(), self.generation)
  }
}

/// The cache name triple for one deployment generation.
#[derive(Debug, Clone)]
pub struct CacheSet {
  generation: String,
}

impl CacheSet {
  pub fn new(generation: impl Into<String>) -> Self {
    Self {
      generation: generation.into(),
    }
  }

  pub fn static_cache(&self) -> CacheName {
    CacheName::new(CacheComponent::Static, self.generation.clone())
  }

  pub fn api_cache(&self) -> CacheName {
    CacheName::new(CacheComponent::Api, self.generation.clone())
  }

  pub fn font_cache(&self) -> CacheName {
    CacheName::new(CacheComponent::Font, self.generation.clone())
  }

  pub fn all(&self) -> [CacheName; 3] {
    [self.static_cache(), self.api_cache(), self.font_cache()]
  }

  /// Whether the given cache belongs to this generation.
  pub fn contains(&self, name: &CacheName) -> bool {
    name.generation == self.generation
  }
}
