//! Canonical entity identities.
//!
//! Raw references arrive as absolute URLs, relative hrefs, or fragments cut
//! out of free text with trailing punctuation attached. They all go through
//! [`normalize`] so the dedup store can key on the result.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Prefix of identities that are not URLs (content-hash fallbacks).
pub const SYNTHETIC_PREFIX: &str = "urn:harvest:";

/// Punctuation free-text matches drag along at the end of a reference.
const TRAILING_TEXT_JUNK: [char; 4] = [')', ',', '.', ';'];

/// Trimmed from the end of the path so `/in/a/` and `/in/a` collapse.
const TRAILING_PATH_JUNK: [char; 5] = [')', ',', '.', ';', '/'];

/// Canonical identity of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    /// Normalized absolute reference.
    pub reference: String,
    /// Short stable name derived from the reference path, if any.
    pub token: Option<String>,
}

impl Identity {
    /// Identity for a record that carries no reference of its own.
    pub fn synthetic(hash: u64) -> Self {
        Self {
            reference: format!("{SYNTHETIC_PREFIX}{hash:016x}"),
            token: None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.reference.starts_with(SYNTHETIC_PREFIX)
    }
}

/// How references are canonicalized for one source.
#[derive(Debug, Clone)]
pub struct Normalizer {
    base: Url,
    strip_query: bool,
    token_shape: Option<Regex>,
}

impl Normalizer {
    pub fn new(base: Url, strip_query: bool, token_shape: Option<Regex>) -> Self {
        Self {
            base,
            strip_query,
            token_shape,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Normalize a raw reference and attach its token.
    pub fn identity(&self, raw: &str) -> Option<Identity> {
        let reference = normalize(raw, &self.base, self.strip_query)?;
        let token = self
            .token_shape
            .as_ref()
            .and_then(|shape| derive_token(&reference, shape));
        Some(Identity { reference, token })
    }
}

/// Resolve `raw` against `base` into a dedup-safe absolute URL string.
///
/// Strips trailing `),.;` left over from free-text matches, drops the
/// fragment (and the query when `strip_query` is set) and trims a trailing
/// slash from non-root paths. Returns `None` for anything that does not
/// resolve to an http(s) URL.
pub fn normalize(raw: &str, base: &Url, strip_query: bool) -> Option<String> {
    let cleaned = raw.trim().trim_end_matches(TRAILING_TEXT_JUNK);
    if cleaned.is_empty() {
        return None;
    }

    let mut url = base.join(cleaned).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    if strip_query {
        url.set_query(None);
    }

    let path = url.path().to_string();
    let trimmed = path.trim_end_matches(TRAILING_PATH_JUNK);
    if trimmed.len() != path.len() {
        url.set_path(if trimmed.is_empty() { "/" } else { trimmed });
    }

    Some(url.to_string())
}

/// Extract the short name from a normalized reference.
///
/// `shape` is matched against the URL path; its first capture group is the
/// token. Returns `None` when the reference does not parse or the shape does
/// not match.
pub fn derive_token(reference: &str, shape: &Regex) -> Option<String> {
    let url = Url::parse(reference).ok()?;
    let caps = shape.captures(url.path())?;
    let token = caps.get(1)?.as_str();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
