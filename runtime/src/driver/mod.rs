//! Page automation abstraction.
//!
//! Defines the `PageDriver` trait the collector talks to. Every primitive is
//! fallible; callers decide which failures are worth surfacing. The only
//! production implementation is Chromium via chromiumoxide, tests script
//! their own.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Opaque reference to an element found by `query_all` / `query_within`.
///
/// Handles are only valid until the next top-level `query_all` on the same
/// driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Which network exchanges a subscription is interested in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFilter {
    /// Every substring must appear in the request URL.
    #[serde(default)]
    pub url_contains: Vec<String>,
    /// HTTP method to match (case-insensitive). `None` matches any method.
    #[serde(default)]
    pub method: Option<String>,
}

impl ResponseFilter {
    pub fn matches(&self, url: &str, method: &str) -> bool {
        let method_ok = self
            .method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case(method))
            .unwrap_or(true);
        method_ok && self.url_contains.iter().all(|needle| url.contains(needle.as_str()))
    }
}

/// A captured response payload.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub url: String,
    pub method: String,
    pub body: String,
}

/// Live network subscription. Responses queue up in `receiver` until drained.
pub struct NetworkSubscription {
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<NetworkResponse>,
}

/// A single browser page (tab) the collector can drive.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Get the current URL.
    async fn current_url(&self) -> Result<String>;

    /// Find all elements matching a CSS selector in the page.
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>>;
    /// Find all elements matching a CSS selector below `scope`.
    async fn query_within(&self, scope: ElementHandle, selector: &str)
        -> Result<Vec<ElementHandle>>;
    /// Rendered text of an element.
    async fn text(&self, element: ElementHandle) -> Result<String>;
    /// Attribute value of an element, `None` when absent.
    async fn attribute(&self, element: ElementHandle, name: &str) -> Result<Option<String>>;
    /// Whether the element currently occupies layout space.
    async fn visible(&self, element: ElementHandle) -> Result<bool>;
    /// Number of elements matching a selector.
    async fn count(&self, selector: &str) -> Result<usize>;
    /// Click an element.
    async fn click(&self, element: ElementHandle) -> Result<()>;

    /// Scroll the page and its main container to the end.
    async fn scroll_to_end(&self) -> Result<()>;
    /// Press a named key (e.g. "End") on the page.
    async fn press_key(&self, key: &str) -> Result<()>;
    /// Dispatch a mouse wheel event.
    async fn wheel(&self, delta_x: f64, delta_y: f64) -> Result<()>;
    /// Suspend for `ms` milliseconds.
    async fn wait(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
    /// Wait until at least one element matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()>;
    /// Execute JavaScript in the page context and return the result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Start capturing response payloads matching `filter`.
    async fn on_network_response(&self, filter: ResponseFilter) -> Result<NetworkSubscription>;
    /// Stop a capture started by `on_network_response`.
    async fn off_network_response(&self, id: u64) -> Result<()>;

    /// Open a new page sharing the session but no automation state.
    async fn new_isolated_context(&self) -> Result<Box<dyn PageDriver>>;
    /// Close this page.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes backslashes, quotes, backticks, line breaks and angle brackets,
/// and strips null bytes.
pub fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
