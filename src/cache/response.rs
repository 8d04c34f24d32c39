//! Captured HTTP responses as storable values.

use color_eyre::Result;
use serde::{Deserialize, Serialize};

/// A response captured for caching: status, headers, body.
///
/// Always a fresh record built from the final bytes of a fetch. Redirect
/// provenance is deliberately dropped at capture time, so a cached copy can
/// satisfy a later navigation without the runtime rejecting it as redirected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Capture a network response into a fresh record.
  pub async fn capture(response: reqwest::Response) -> Result<Self> {
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Self {
      status,
      headers,
      body,
    })
  }

  /// Synthesized 503 returned when the network is down and no cached copy exists.
  pub fn offline_placeholder() -> Self {
    let body = serde_json::json!({
      "error": "Offline",
      "message": "No cached data available. Please check your connection."
    });

    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: body.to_string().into_bytes(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn offline_placeholder_is_structured_json() {
    let resp = CachedResponse::offline_placeholder();
    assert_eq!(resp.status, 503);
    assert_eq!(resp.header("Content-Type"), Some("application/json"));

    let parsed: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(parsed["error"], "Offline");
  }

  #[test]
  fn header_lookup_is_case_insensitive() {
    let resp = CachedResponse {
      status: 200,
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: Vec::new(),
    };
    assert_eq!(resp.header("content-type"), Some("text/html"));
    assert_eq!(resp.header("x-missing"), None);
  }
}
