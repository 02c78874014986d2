//! Request/response model shared by the router, cache and replay queue,
//! plus the network fetch collaborator.

mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use url::Url;

/// How a request was issued by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  /// Script, image, stylesheet, API call...
  #[default]
  Subresource,
}

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_uppercase(),
      url,
      headers: Vec::new(),
      body: Vec::new(),
      mode: RequestMode::Subresource,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  /// A top-level page load accepting HTML.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
    .with_header("accept", "text/html,application/xhtml+xml")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = body;
    self
  }

  /// Case-insensitive header lookup (first match).
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Whether the client asked for an HTML document.
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }

  /// Safe methods may be answered from cache; anything else is deferred when offline.
  pub fn is_idempotent(&self) -> bool {
    matches!(self.method.as_str(), "GET" | "HEAD" | "OPTIONS")
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Cache identity of a request: upper-cased method and URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new("GET", url)
  }

  /// Short stable digest, used to correlate log lines.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(&hasher.finalize()[..6])
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A captured response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub captured_at: DateTime<Utc>,
}

impl ResponseSnapshot {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      captured_at: Utc::now(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

/// Network access. An `Err` means the transport failed; HTTP error statuses
/// are still `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot>;
}


#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_normalizes_method_and_fragment() {
    let a = RequestKey::new("get", &url("https://qr.example.com/app.js#top"));
    let b = Request::get(url("https://qr.example.com/app.js")).key();
    assert_eq!(a, b);
    assert_eq!(a.digest(), b.digest());
    assert_eq!(a.digest().len(), 12);
  }

  #[test]
  fn test_accepts_html() {
    let page = Request::get(url("https://qr.example.com/about"))
      .with_header("Accept", "text/html,*/*;q=0.8");
    let script = Request::get(url("https://qr.example.com/missing.js"))
      .with_header("Accept", "*/*");
    let bare = Request::get(url("https://qr.example.com/x"));

    assert!(page.accepts_html());
    assert!(!script.accepts_html());
    assert!(!bare.accepts_html());
    assert!(Request::navigate(url("https://qr.example.com/")).accepts_html());
  }

  #[test]
  fn test_idempotent_methods() {
    assert!(Request::get(url("https://qr.example.com/")).is_idempotent());
    assert!(!Request::new("post", url("https://qr.example.com/api")).is_idempotent());
  }
}
