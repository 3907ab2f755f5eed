//! Chromium-based page driver using chromiumoxide.

use super::{
    sanitize_js_string, ElementHandle, NavigationResult, NetworkResponse, NetworkSubscription,
    PageDriver, ResponseFilter,
};
use crate::session::StorageState;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventLoadingFinished, EventRequestWillBeSent, GetResponseBodyParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Upper bound for a single CDP round trip. A page that stops answering
/// surfaces as an error instead of a hang.
const CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Run one CDP call under [`CALL_TIMEOUT`].
async fn bounded<T, E, F>(what: &str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<anyhow::Error>,
{
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result.map_err(|e| Into::<anyhow::Error>::into(e).context(format!("{what} failed"))),
        Err(_) => bail!("{what} timed out after {}ms", CALL_TIMEOUT.as_millis()),
    }
}

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. HARVEST_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("HARVEST_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.harvest/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".harvest/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".harvest/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".harvest/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".harvest/chromium/chrome-linux64/chrome"),
                home.join(".harvest/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// A launched Chromium instance.
pub struct ChromiumBrowser {
    browser: Arc<Browser>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumBrowser {
    /// Launch Chromium. `headless = false` opens a visible window.
    pub async fn launch(headless: bool) -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set HARVEST_CHROMIUM_PATH or install Chrome.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1280, 720)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Open a page with the session cookies for `host` installed.
    pub async fn open_page(&self, session: &StorageState, host: &str) -> Result<ChromiumDriver> {
        let matching = session.cookies_for(host);
        if matching.is_empty() && !session.cookies.is_empty() {
            bail!("session state holds no cookies for {host}");
        }

        let driver = ChromiumDriver::open(Arc::clone(&self.browser), Arc::clone(&self.active_count))
            .await?;
        if matching.is_empty() {
            return Ok(driver);
        }

        let cookies: Vec<CookieParam> = matching
            .into_iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.domain = Some(c.domain.clone());
                param.path = Some(c.path.clone());
                param.secure = Some(c.secure);
                param.http_only = Some(c.http_only);
                param
            })
            .collect();
        driver
            .page
            .set_cookies(cookies)
            .await
            .context("failed to install session cookies")?;

        Ok(driver)
    }

    /// Number of currently open pages.
    pub fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Shut the browser down. Pages still holding a reference keep it alive.
    pub async fn close(self) -> Result<()> {
        if let Ok(mut browser) = Arc::try_unwrap(self.browser) {
            browser.close().await.context("failed to close Chromium")?;
            let _ = browser.wait().await;
        }
        Ok(())
    }
}

/// A single Chromium page.
pub struct ChromiumDriver {
    browser: Arc<Browser>,
    page: Page,
    active_count: Arc<AtomicUsize>,
    elements: Mutex<HashMap<u64, Arc<Element>>>,
    next_handle: AtomicU64,
    subscriptions: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl ChromiumDriver {
    async fn open(browser: Arc<Browser>, active_count: Arc<AtomicUsize>) -> Result<Self> {
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Self {
            browser,
            page,
            active_count,
            elements: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    fn register(&self, elements: Vec<Element>) -> Vec<ElementHandle> {
        let mut table = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        elements
            .into_iter()
            .map(|el| {
                let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
                table.insert(id, Arc::new(el));
                ElementHandle(id)
            })
            .collect()
    }

    fn element(&self, handle: ElementHandle) -> Result<Arc<Element>> {
        let table = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        match table.get(&handle.0) {
            Some(el) => Ok(Arc::clone(el)),
            None => bail!("stale element handle {}", handle.0),
        }
    }
}

fn decode_body(body: String, base64_encoded: bool) -> String {
    if !base64_encoded {
        return body;
    }
    match base64::engine::general_purpose::STANDARD.decode(body.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let remaining = Duration::from_millis(timeout_ms).saturating_sub(start.elapsed());
                if tokio::time::timeout(remaining, self.page.wait_for_navigation())
                    .await
                    .is_err()
                {
                    debug!("load of {url} still pending after {timeout_ms}ms");
                }
                let final_url = bounded("reading URL", self.page.url())
                    .await
                    .ok()
                    .flatten()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());
                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn current_url(&self) -> Result<String> {
        let url = bounded("reading URL", self.page.url())
            .await?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let found = bounded(&format!("query {selector}"), self.page.find_elements(selector)).await?;
        self.elements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(self.register(found))
    }

    async fn query_within(
        &self,
        scope: ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        let parent = self.element(scope)?;
        // Chromium reports "no node found" as an error; treat it as empty.
        let found = bounded(&format!("query {selector}"), parent.find_elements(selector))
            .await
            .unwrap_or_default();
        Ok(self.register(found))
    }

    async fn text(&self, element: ElementHandle) -> Result<String> {
        let el = self.element(element)?;
        Ok(bounded("reading text", el.inner_text()).await?.unwrap_or_default())
    }

    async fn attribute(&self, element: ElementHandle, name: &str) -> Result<Option<String>> {
        let el = self.element(element)?;
        bounded("reading attribute", el.attribute(name)).await
    }

    async fn visible(&self, element: ElementHandle) -> Result<bool> {
        let el = self.element(element)?;
        let returns = bounded(
            "visibility check",
            el.call_js_fn(
                "function() { const r = this.getBoundingClientRect(); \
                 const s = window.getComputedStyle(this); \
                 return r.width > 0 && r.height > 0 && s.visibility !== 'hidden'; }",
                false,
            ),
        )
        .await?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll('{}').length",
            sanitize_js_string(selector)
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, element: ElementHandle) -> Result<()> {
        let el = self.element(element)?;
        bounded("click", el.click()).await?;
        Ok(())
    }

    async fn scroll_to_end(&self) -> Result<()> {
        self.evaluate(
            "(() => { const main = document.querySelector('main'); \
             if (main) { main.scrollTop = main.scrollHeight; } \
             window.scrollTo(0, document.body.scrollHeight); return true; })()",
        )
        .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let body = bounded("finding body", self.page.find_element("body")).await?;
        bounded("key press", body.press_key(key)).await?;
        Ok(())
    }

    async fn wheel(&self, delta_x: f64, delta_y: f64) -> Result<()> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(640.0)
            .y(360.0)
            .delta_x(delta_x)
            .delta_y(delta_y)
            .build()
            .map_err(|e| anyhow::anyhow!("invalid wheel event: {e}"))?;
        bounded("wheel", self.page.execute(params)).await?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.count(selector).await.unwrap_or(0) > 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("no element matched {selector} within {timeout_ms}ms");
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = bounded("JS execution", self.page.evaluate(script)).await?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn on_network_response(&self, filter: ResponseFilter) -> Result<NetworkSubscription> {
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .context("failed to listen for requests")?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("failed to listen for finished loads")?;

        let page = self.page.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut pending: HashMap<String, (String, String)> = HashMap::new();
            loop {
                tokio::select! {
                    Some(event) = requests.next() => {
                        if filter.matches(&event.request.url, &event.request.method) {
                            pending.insert(
                                event.request_id.as_ref().to_string(),
                                (event.request.url.clone(), event.request.method.clone()),
                            );
                        }
                    }
                    Some(event) = finished.next() => {
                        let Some((url, method)) = pending.remove(event.request_id.as_ref()) else {
                            continue;
                        };
                        match page.execute(GetResponseBodyParams::new(event.request_id.clone())).await {
                            Ok(resp) => {
                                let body = decode_body(resp.result.body.clone(), resp.result.base64_encoded);
                                if tx.send(NetworkResponse { url, method, body }).is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("response body unavailable for {url}: {e}"),
                        }
                    }
                    else => break,
                }
            }
        });

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, task);
        Ok(NetworkSubscription { id, receiver: rx })
    }

    async fn off_network_response(&self, id: u64) -> Result<()> {
        let task = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match task {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => bail!("unknown network subscription {id}"),
        }
    }

    async fn new_isolated_context(&self) -> Result<Box<dyn PageDriver>> {
        let driver =
            ChromiumDriver::open(Arc::clone(&self.browser), Arc::clone(&self.active_count)).await?;
        Ok(Box::new(driver))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        for (_, task) in self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
        {
            task.abort();
        }
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.clone().close().await;
        Ok(())
    }
}
