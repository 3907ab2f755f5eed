//! Scripted in-memory page for collector tests.
//!
//! A `FakeList` shows one frame of a list at a time. Every wheel event (the
//! last of the three scroll mechanisms) or a click on the "next" button moves
//! to the following frame and replays that frame's network payloads to any
//! live subscription. Detail pages opened through `new_isolated_context`
//! serve scripted name/headline pairs or fail on demand. A follower count can
//! be shown at one URL to stand in for a subject's own page.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use harvest_runtime::driver::{
    ElementHandle, NavigationResult, NetworkResponse, NetworkSubscription, PageDriver,
    ResponseFilter,
};
use harvest_runtime::profile::{
    EnrichmentRule, FieldKind, FieldRule, IdentityRule, Interaction, MiningRule, OutputRule,
    RecordRule, ReferenceRule, SourceProfile, SubjectRule, TargetRule,
};
use harvest_runtime::CollectOptions;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const BASE: &str = "https://example.test";
pub const START: &str = "https://example.test/people/list";
pub const PAGE_API: &str = "https://example.test/api/page?cursor=next";
pub const SUBJECT_TEMPLATE: &str = "https://example.test/people/{subject}/about";

/// One rendered list card.
#[derive(Debug, Clone, Default)]
pub struct Card {
    pub token: String,
    pub name: Option<String>,
    pub headline: Option<String>,
}

impl Card {
    pub fn named(token: &str) -> Self {
        Self {
            token: token.to_string(),
            name: Some(format!("Name {token}")),
            headline: None,
        }
    }

    pub fn full(token: &str) -> Self {
        Self {
            headline: Some(format!("Headline {token}")),
            ..Self::named(token)
        }
    }

    pub fn bare(token: &str) -> Self {
        Self {
            token: token.to_string(),
            ..Self::default()
        }
    }
}

/// What one pass sees.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub cards: Vec<Card>,
    /// Extra text in the list container (mined by the text channel).
    pub text: Vec<String>,
    /// Payload bodies delivered when this frame is reached.
    pub network: Vec<String>,
}

impl Frame {
    pub fn cards(tokens: &[&str]) -> Self {
        Self {
            cards: tokens.iter().map(|t| Card::named(t)).collect(),
            ..Self::default()
        }
    }
}

/// Scripted detail page.
#[derive(Debug, Clone)]
pub enum Detail {
    Page { name: String, headline: String },
    Fail,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Card(usize),
    Link(usize),
    Name(usize),
    Headline(usize),
    Header,
    Next,
    Followers,
    DetailName,
    DetailHeadline,
}

/// State shared between the list page and its detail contexts.
#[derive(Default)]
pub struct Shared {
    pub details: Mutex<HashMap<String, Detail>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub visited: Mutex<Vec<String>>,
}

struct ListState {
    frames: Vec<Frame>,
    position: usize,
    url: String,
    landing: Option<String>,
    nav_failures: u32,
    nav_calls: u32,
    nav_log: Vec<String>,
    failing: HashSet<&'static str>,
    failing_once: HashSet<&'static str>,
    hang_evaluate_from: Option<usize>,
    followers: Option<(String, String)>,
    header: Option<String>,
    paginate: bool,
    disabled_next_at_end: bool,
    elements: HashMap<u64, Node>,
    next_element: u64,
    subscriptions: HashMap<u64, (ResponseFilter, mpsc::UnboundedSender<NetworkResponse>)>,
    next_subscription: u64,
    detached: u32,
    clicks: u32,
}

/// Scripted list page.
pub struct FakeList {
    state: Mutex<ListState>,
    pub shared: Arc<Shared>,
}

impl FakeList {
    /// Scroll-driven list: frame `k` is what pass `k` sees; frame 0 is the
    /// initial render.
    pub fn scrolling(passes: Vec<Frame>) -> Self {
        let mut frames = vec![Frame::default()];
        frames.extend(passes);
        Self::new(frames, false)
    }

    /// Paginated list: pass 1 reads page 0, every later pass clicks "next".
    pub fn paginated(pages: Vec<Frame>) -> Self {
        Self::new(pages, true)
    }

    fn new(frames: Vec<Frame>, paginate: bool) -> Self {
        Self {
            state: Mutex::new(ListState {
                frames,
                position: 0,
                url: "about:blank".to_string(),
                landing: None,
                nav_failures: 0,
                nav_calls: 0,
                nav_log: Vec::new(),
                failing: HashSet::new(),
                failing_once: HashSet::new(),
                hang_evaluate_from: None,
                followers: None,
                header: None,
                paginate,
                disabled_next_at_end: false,
                elements: HashMap::new(),
                next_element: 1,
                subscriptions: HashMap::new(),
                next_subscription: 1,
                detached: 0,
                clicks: 0,
            }),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Navigation lands here instead of the requested URL.
    pub fn landing_on(self, url: &str) -> Self {
        self.lock().landing = Some(url.to_string());
        self
    }

    /// The first `n` navigations fail.
    pub fn failing_navigations(self, n: u32) -> Self {
        self.lock().nav_failures = n;
        self
    }

    /// Make a primitive (`scroll_to_end`, `press_key`, `query:<selector>`,
    /// `evaluate`) fail every time.
    pub fn failing(self, what: &'static str) -> Self {
        self.lock().failing.insert(what);
        self
    }

    /// Like [`failing`](Self::failing), but only the next call fails.
    pub fn failing_once(self, what: &'static str) -> Self {
        self.lock().failing_once.insert(what);
        self
    }

    /// `evaluate` never returns once frame `position` is showing.
    pub fn hanging_evaluate_from(self, position: usize) -> Self {
        self.lock().hang_evaluate_from = Some(position);
        self
    }

    /// Show `span.followers` with `text` while the page is at `url`.
    pub fn with_followers_at(self, url: &str, text: &str) -> Self {
        self.lock().followers = Some((url.to_string(), text.to_string()));
        self
    }

    /// Text of the `h1` list header.
    pub fn with_header(self, text: &str) -> Self {
        self.lock().header = Some(text.to_string());
        self
    }

    /// Keep a disabled "next" button on the last page instead of removing it.
    pub fn disabled_next_at_end(self) -> Self {
        self.lock().disabled_next_at_end = true;
        self
    }

    pub fn with_detail(self, token: &str, detail: Detail) -> Self {
        self.shared
            .details
            .lock()
            .unwrap()
            .insert(reference(token), detail);
        self
    }

    pub fn navigations(&self) -> u32 {
        self.lock().nav_calls
    }

    /// Every URL navigation was asked for, in order.
    pub fn navigation_log(&self) -> Vec<String> {
        self.lock().nav_log.clone()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.lock().subscriptions.len()
    }

    pub fn detached(&self) -> u32 {
        self.lock().detached
    }

    pub fn clicks(&self) -> u32 {
        self.lock().clicks
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListState> {
        self.state.lock().unwrap()
    }

    fn register(state: &mut ListState, nodes: Vec<Node>) -> Vec<ElementHandle> {
        nodes
            .into_iter()
            .map(|node| {
                let id = state.next_element;
                state.next_element += 1;
                state.elements.insert(id, node);
                ElementHandle(id)
            })
            .collect()
    }

    fn node(state: &ListState, el: ElementHandle) -> Result<Node> {
        state
            .elements
            .get(&el.0)
            .copied()
            .ok_or_else(|| anyhow!("stale handle {}", el.0))
    }

    fn advance(state: &mut ListState) {
        if state.position + 1 >= state.frames.len() {
            return;
        }
        state.position += 1;
        let bodies = state.frames[state.position].network.clone();
        for body in bodies {
            for (filter, tx) in state.subscriptions.values() {
                if filter.matches(PAGE_API, "POST") {
                    let _ = tx.send(NetworkResponse {
                        url: PAGE_API.to_string(),
                        method: "POST".to_string(),
                        body: body.clone(),
                    });
                }
            }
        }
    }

    fn has_next(state: &ListState) -> bool {
        state.paginate
            && (state.position + 1 < state.frames.len() || state.disabled_next_at_end)
    }

    fn frame(state: &ListState) -> &Frame {
        &state.frames[state.position]
    }
}

pub fn reference(token: &str) -> String {
    format!("{BASE}/people/{token}")
}

#[async_trait]
impl PageDriver for FakeList {
    async fn navigate(&self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        let mut state = self.lock();
        state.nav_calls += 1;
        state.nav_log.push(url.to_string());
        if state.nav_failures > 0 {
            state.nav_failures -= 1;
            bail!("net::ERR_CONNECTION_RESET");
        }
        state.url = state.landing.clone().unwrap_or_else(|| url.to_string());
        state.position = 0;
        state.elements.clear();
        Ok(NavigationResult {
            final_url: state.url.clone(),
            load_time_ms: 1,
        })
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let mut state = self.lock();
        let key = format!("query:{selector}");
        if state.failing.contains(key.as_str()) || state.failing_once.remove(key.as_str()) {
            bail!("selector {selector} threw");
        }
        state.elements.clear();
        let followers_here = matches!(&state.followers, Some((at, _)) if *at == state.url);
        let nodes = match selector {
            "li.card" => (0..Self::frame(&state).cards.len()).map(Node::Card).collect(),
            "h1.count" if state.header.is_some() => vec![Node::Header],
            "button.next" if Self::has_next(&state) => vec![Node::Next],
            "span.followers" if followers_here => vec![Node::Followers],
            _ => Vec::new(),
        };
        Ok(Self::register(&mut state, nodes))
    }

    async fn query_within(&self, scope: ElementHandle, selector: &str) -> Result<Vec<ElementHandle>> {
        let mut state = self.lock();
        let Node::Card(i) = Self::node(&state, scope)? else {
            return Ok(Vec::new());
        };
        let card = Self::frame(&state).cards[i].clone();
        let nodes = match selector {
            "a" => vec![Node::Link(i)],
            ".name" if card.name.is_some() => vec![Node::Name(i)],
            ".headline" if card.headline.is_some() => vec![Node::Headline(i)],
            _ => Vec::new(),
        };
        Ok(Self::register(&mut state, nodes))
    }

    async fn text(&self, element: ElementHandle) -> Result<String> {
        let state = self.lock();
        let cards = &Self::frame(&state).cards;
        match Self::node(&state, element)? {
            Node::Name(i) => Ok(cards[i].name.clone().unwrap_or_default()),
            Node::Headline(i) => Ok(cards[i].headline.clone().unwrap_or_default()),
            Node::Header => Ok(state.header.clone().unwrap_or_default()),
            Node::Followers => Ok(state
                .followers
                .as_ref()
                .map(|(_, text)| text.clone())
                .unwrap_or_default()),
            _ => Ok(String::new()),
        }
    }

    async fn attribute(&self, element: ElementHandle, name: &str) -> Result<Option<String>> {
        let state = self.lock();
        let at_end = state.position + 1 >= state.frames.len();
        match (Self::node(&state, element)?, name) {
            (Node::Link(i), "href") => Ok(Some(format!(
                "/people/{}?trk=list",
                Self::frame(&state).cards[i].token
            ))),
            (Node::Next, "class") if at_end => Ok(Some("next is-disabled".to_string())),
            (Node::Next, "class") => Ok(Some("next".to_string())),
            _ => Ok(None),
        }
    }

    async fn visible(&self, _element: ElementHandle) -> Result<bool> {
        Ok(true)
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.query_all(selector).await?.len())
    }

    async fn click(&self, element: ElementHandle) -> Result<()> {
        let mut state = self.lock();
        if let Node::Next = Self::node(&state, element)? {
            state.clicks += 1;
            Self::advance(&mut state);
        }
        Ok(())
    }

    async fn scroll_to_end(&self) -> Result<()> {
        if self.lock().failing.contains("scroll_to_end") {
            bail!("scroll swallowed");
        }
        Ok(())
    }

    async fn press_key(&self, _key: &str) -> Result<()> {
        if self.lock().failing.contains("press_key") {
            bail!("key swallowed");
        }
        Ok(())
    }

    async fn wheel(&self, _delta_x: f64, _delta_y: f64) -> Result<()> {
        Self::advance(&mut self.lock());
        Ok(())
    }

    async fn wait(&self, _ms: u64) {
        tokio::task::yield_now().await;
    }

    async fn wait_for_selector(&self, selector: &str, _timeout_ms: u64) -> Result<()> {
        let state = self.lock();
        let frame = Self::frame(&state);
        if selector == "li.card" && !frame.cards.is_empty() {
            Ok(())
        } else {
            bail!("timeout waiting for {selector}")
        }
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        let hang = {
            let state = self.lock();
            matches!(state.hang_evaluate_from, Some(from) if state.position >= from)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.lock();
        if state.failing.contains("evaluate") {
            bail!("execution context destroyed");
        }
        Ok(serde_json::Value::String(Self::frame(&state).text.join("\n")))
    }

    async fn on_network_response(&self, filter: ResponseFilter) -> Result<NetworkSubscription> {
        let mut state = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.subscriptions.insert(id, (filter, tx));
        Ok(NetworkSubscription { id, receiver: rx })
    }

    async fn off_network_response(&self, id: u64) -> Result<()> {
        let mut state = self.lock();
        match state.subscriptions.remove(&id) {
            Some(_) => {
                state.detached += 1;
                Ok(())
            }
            None => bail!("unknown subscription {id}"),
        }
    }

    async fn new_isolated_context(&self) -> Result<Box<dyn PageDriver>> {
        let shared = Arc::clone(&self.shared);
        let active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_active.fetch_max(active, Ordering::SeqCst);
        shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDetailPage {
            shared,
            current: Mutex::new(None),
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// One isolated detail context.
pub struct FakeDetailPage {
    shared: Arc<Shared>,
    current: Mutex<Option<(String, String)>>,
}

#[async_trait]
impl PageDriver for FakeDetailPage {
    async fn navigate(&self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        tokio::task::yield_now().await;
        self.shared.visited.lock().unwrap().push(url.to_string());
        let detail = self.shared.details.lock().unwrap().get(url).cloned();
        match detail {
            Some(Detail::Page { name, headline }) => {
                *self.current.lock().unwrap() = Some((name, headline));
                Ok(NavigationResult {
                    final_url: url.to_string(),
                    load_time_ms: 1,
                })
            }
            Some(Detail::Fail) => bail!("detail page crashed"),
            None => bail!("no detail page for {url}"),
        }
    }

    async fn current_url(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        Ok(match selector {
            "h1.detail-name" => vec![ElementHandle(1)],
            "div.detail-headline" => vec![ElementHandle(2)],
            _ => Vec::new(),
        })
    }

    async fn query_within(&self, _scope: ElementHandle, _selector: &str) -> Result<Vec<ElementHandle>> {
        Ok(Vec::new())
    }

    async fn text(&self, element: ElementHandle) -> Result<String> {
        let current = self.current.lock().unwrap().clone();
        let (name, headline) = current.ok_or_else(|| anyhow!("nothing loaded"))?;
        Ok(if element.0 == 1 { name } else { headline })
    }

    async fn attribute(&self, _element: ElementHandle, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn visible(&self, _element: ElementHandle) -> Result<bool> {
        Ok(true)
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.query_all(selector).await?.len())
    }

    async fn click(&self, _element: ElementHandle) -> Result<()> {
        Ok(())
    }

    async fn scroll_to_end(&self) -> Result<()> {
        Ok(())
    }

    async fn press_key(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn wheel(&self, _delta_x: f64, _delta_y: f64) -> Result<()> {
        Ok(())
    }

    async fn wait(&self, _ms: u64) {
        tokio::task::yield_now().await;
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout_ms: u64) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn on_network_response(&self, _filter: ResponseFilter) -> Result<NetworkSubscription> {
        bail!("not supported on detail pages")
    }

    async fn off_network_response(&self, _id: u64) -> Result<()> {
        Ok(())
    }

    async fn new_isolated_context(&self) -> Result<Box<dyn PageDriver>> {
        bail!("nested contexts not supported")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn field(name: &str, selector: &str) -> FieldRule {
    FieldRule {
        name: name.to_string(),
        selectors: vec![selector.to_string()],
        attribute: None,
        kind: FieldKind::Text,
        min_len: 0,
        exclude: Vec::new(),
        visible_only: false,
    }
}

/// Profile matching the fake page's markup.
pub fn profile() -> SourceProfile {
    SourceProfile {
        name: "people".to_string(),
        description: "test list".to_string(),
        start_url: START.to_string(),
        base_url: BASE.to_string(),
        auth_wall_markers: vec!["/login".to_string()],
        identity: IdentityRule {
            strip_query: true,
            token_shape: Some(r"^/people/([^/?#]+)".to_string()),
        },
        warmup_selector: "li.card".to_string(),
        interaction: Interaction::Scroll {
            key: "End".to_string(),
            wheel_delta: 3000.0,
        },
        records: vec![RecordRule {
            selector: "li.card".to_string(),
            require: None,
            reference: ReferenceRule {
                selectors: vec!["a".to_string()],
                attribute: "href".to_string(),
                capture: None,
                template: None,
            },
            fields: vec![field("name", ".name"), field("headline", ".headline")],
            required_fields: Vec::new(),
            fallback_identity: Vec::new(),
        }],
        mining: Some(MiningRule {
            absolute_pattern: r#"https?://example\.test/people/[^"'<>\s\\]+"#.to_string(),
            relative_pattern: r#"/people/[^"'<>\s\\]+"#.to_string(),
            text_scope: Some("main".to_string()),
            include_markup: false,
            network: Some(ResponseFilter {
                url_contains: vec!["/api/page".to_string()],
                method: Some("POST".to_string()),
            }),
        }),
        target: Some(TargetRule {
            selectors: vec!["h1.count".to_string()],
            pattern: r"(\d[\d,]*) people".to_string(),
        }),
        enrichment: Some(EnrichmentRule {
            required: vec!["name".to_string(), "headline".to_string()],
            fields: vec![
                field("name", "h1.detail-name"),
                field("headline", "div.detail-headline"),
            ],
            ready_selector: None,
        }),
        subject_page: None,
        output: OutputRule {
            reference_column: "profileUrl".to_string(),
            token_column: "username".to_string(),
            preferred_columns: vec!["name".to_string(), "username".to_string()],
        },
    }
}

/// Same profile, paginated with a "next" button.
pub fn paginated_profile() -> SourceProfile {
    SourceProfile {
        interaction: Interaction::Paginate {
            next_selector: "button.next".to_string(),
            disabled_class: Some("is-disabled".to_string()),
        },
        ..profile()
    }
}

/// Profile that reads a follower count from the subject's page.
pub fn profile_with_subject_page(url: Option<&str>) -> SourceProfile {
    SourceProfile {
        subject_page: Some(SubjectRule {
            url: url.map(str::to_string),
            ready_selector: None,
            fields: vec![FieldRule {
                kind: FieldKind::Count,
                ..field("authorFollowers", "span.followers")
            }],
        }),
        ..profile()
    }
}

/// Options with every delay zeroed.
pub fn fast_options() -> CollectOptions {
    CollectOptions {
        interaction_delay_ms: 0,
        jitter_ms: 0,
        settle_ms: 0,
        warmup_timeout_ms: 0,
        retry_base_delay_ms: 0,
        enrichment_delay_ms: 0,
        enrichment_jitter_ms: 0,
        ..CollectOptions::default()
    }
}

/// Tokens of a result, in output order.
pub fn tokens(items: &[harvest_runtime::Entity]) -> Vec<String> {
    items
        .iter()
        .filter_map(|e| e.identity.token.clone())
        .collect()
}
