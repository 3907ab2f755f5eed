//! Source profiles: per-site selectors, URL shapes and patterns.
//!
//! Everything source-specific lives here as data. Built-in profiles are
//! loaded at compile time from `profiles.json` via `include_str!`; a user
//! file with the same schema can replace them.

use crate::driver::ResponseFilter;
use crate::error::{HarvestError, HarvestResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Raw JSON content of the built-in profiles.
const PROFILES_JSON: &str = include_str!("profiles.json");

/// Placeholder in `start_url` filled from the run subject (e.g. a username).
pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Everything the collector needs to know about one kind of list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Page holding the list. May contain `{subject}`.
    pub start_url: String,
    /// Base for resolving relative references.
    pub base_url: String,
    /// URL fragments that mean the session was rejected.
    #[serde(default)]
    pub auth_wall_markers: Vec<String>,
    #[serde(default)]
    pub identity: IdentityRule,
    /// First sign of renderable content.
    pub warmup_selector: String,
    pub interaction: Interaction,
    /// Structured record rules, tried in order every pass.
    pub records: Vec<RecordRule>,
    #[serde(default)]
    pub mining: Option<MiningRule>,
    #[serde(default)]
    pub target: Option<TargetRule>,
    #[serde(default)]
    pub enrichment: Option<EnrichmentRule>,
    /// Facts about the subject itself, stamped onto every item.
    #[serde(default)]
    pub subject_page: Option<SubjectRule>,
    #[serde(default)]
    pub output: OutputRule,
}

/// How references become identities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityRule {
    /// Drop the query string during normalization.
    #[serde(default)]
    pub strip_query: bool,
    /// Path regex whose first group is the short token.
    #[serde(default)]
    pub token_shape: Option<String>,
}

/// How to make the list reveal more content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interaction {
    /// Scroll to the end by script, key press and mouse wheel.
    Scroll {
        #[serde(default = "default_key")]
        key: String,
        #[serde(default = "default_wheel_delta")]
        wheel_delta: f64,
    },
    /// Click a "next page" control; a missing or disabled control ends the list.
    Paginate {
        next_selector: String,
        #[serde(default)]
        disabled_class: Option<String>,
    },
}

fn default_key() -> String {
    "End".to_string()
}

fn default_wheel_delta() -> f64 {
    3000.0
}

/// One kind of structural record in the rendered list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRule {
    pub selector: String,
    /// Records without a match for this sub-selector are skipped.
    #[serde(default)]
    pub require: Option<String>,
    pub reference: ReferenceRule,
    #[serde(default)]
    pub fields: Vec<FieldRule>,
    /// Records missing any of these fields are skipped.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Fields hashed into a synthetic identity when the record has no reference.
    #[serde(default)]
    pub fallback_identity: Vec<String>,
}

/// Where a record's reference comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceRule {
    /// Ordered fallbacks below the record; empty means the record itself.
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default = "default_reference_attribute")]
    pub attribute: String,
    /// Regex applied to the raw attribute; group 1 feeds `template`.
    #[serde(default)]
    pub capture: Option<String>,
    /// Reference template, `{1}` is replaced by the capture.
    #[serde(default)]
    pub template: Option<String>,
}

fn default_reference_attribute() -> String {
    "href".to_string()
}

/// Value kind of a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Count,
    List,
}

/// One content field with its ordered fallback selectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub selectors: Vec<String>,
    /// Read this attribute instead of the rendered text.
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub kind: FieldKind,
    /// Values shorter than this count as empty.
    #[serde(default)]
    pub min_len: usize,
    /// Values containing any of these substrings are discarded.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Only consider elements that are laid out on screen.
    #[serde(default)]
    pub visible_only: bool,
}

/// Patterns shared by the free-text and network channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningRule {
    pub absolute_pattern: String,
    pub relative_pattern: String,
    /// Element whose text is scanned each pass. `None` disables the text channel.
    #[serde(default)]
    pub text_scope: Option<String>,
    /// Scan the scope's markup instead of its rendered text.
    #[serde(default)]
    pub include_markup: bool,
    /// Responses to sniff. `None` disables the network channel.
    #[serde(default)]
    pub network: Option<ResponseFilter>,
}

/// Where the displayed total lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRule {
    pub selectors: Vec<String>,
    /// Group 1 is the number, thousands separators allowed.
    pub pattern: String,
}

/// Detail-page backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRule {
    /// An entity with all of these present is skipped.
    pub required: Vec<String>,
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub ready_selector: Option<String>,
}

/// Subject-level fields read once per run (e.g. a follower count).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRule {
    /// Page to read from, may contain `{subject}`. `None` reads the start
    /// page once it has warmed up.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ready_selector: Option<String>,
    pub fields: Vec<FieldRule>,
}

/// Column naming for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRule {
    #[serde(default = "default_reference_column")]
    pub reference_column: String,
    #[serde(default = "default_token_column")]
    pub token_column: String,
    #[serde(default)]
    pub preferred_columns: Vec<String>,
}

fn default_reference_column() -> String {
    "reference".to_string()
}

fn default_token_column() -> String {
    "token".to_string()
}

impl Default for OutputRule {
    fn default() -> Self {
        Self {
            reference_column: default_reference_column(),
            token_column: default_token_column(),
            preferred_columns: Vec::new(),
        }
    }
}

impl SourceProfile {
    /// Start URL with the subject filled in.
    pub fn start_url_for(&self, subject: Option<&str>) -> HarvestResult<String> {
        self.fill_subject(&self.start_url, subject)
    }

    /// Subject page URL, when the profile reads one.
    pub fn subject_url_for(&self, subject: Option<&str>) -> HarvestResult<Option<String>> {
        match self.subject_page.as_ref().and_then(|rule| rule.url.as_deref()) {
            Some(template) => self.fill_subject(template, subject).map(Some),
            None => Ok(None),
        }
    }

    fn fill_subject(&self, template: &str, subject: Option<&str>) -> HarvestResult<String> {
        if !template.contains(SUBJECT_PLACEHOLDER) {
            return Ok(template.to_string());
        }
        match subject {
            Some(s) if !s.trim().is_empty() => Ok(template.replace(SUBJECT_PLACEHOLDER, s.trim())),
            _ => Err(HarvestError::Config(format!(
                "profile '{}' needs a subject for {template}",
                self.name
            ))),
        }
    }

    /// Parsed base URL.
    pub fn base(&self) -> HarvestResult<Url> {
        Url::parse(&self.base_url).map_err(|e| {
            HarvestError::Config(format!("profile '{}' base_url: {e}", self.name))
        })
    }

    /// Check that every pattern compiles and the profile is usable.
    pub fn validate(&self) -> HarvestResult<()> {
        self.base()?;
        if self.records.is_empty() {
            return Err(HarvestError::Config(format!(
                "profile '{}' has no record rules",
                self.name
            )));
        }
        let mut patterns: Vec<&str> = Vec::new();
        if let Some(shape) = &self.identity.token_shape {
            patterns.push(shape);
        }
        for record in &self.records {
            if let Some(capture) = &record.reference.capture {
                patterns.push(capture);
            }
        }
        if let Some(mining) = &self.mining {
            patterns.push(&mining.absolute_pattern);
            patterns.push(&mining.relative_pattern);
        }
        if let Some(target) = &self.target {
            patterns.push(&target.pattern);
        }
        for pattern in patterns {
            compile(pattern)?;
        }
        Ok(())
    }
}

/// Compile a profile regex, mapping failures to a config error.
pub fn compile(pattern: &str) -> HarvestResult<Regex> {
    Regex::new(pattern).map_err(|e| HarvestError::Config(format!("bad pattern {pattern:?}: {e}")))
}

/// Built-in profiles.
pub fn builtin_profiles() -> HarvestResult<Vec<SourceProfile>> {
    parse_profiles(PROFILES_JSON)
}

/// Look up a built-in profile by name.
pub fn builtin(name: &str) -> HarvestResult<SourceProfile> {
    builtin_profiles()?
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| HarvestError::Config(format!("unknown profile '{name}'")))
}

/// Load profiles from a user file.
pub fn load_profiles(path: &Path) -> HarvestResult<Vec<SourceProfile>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| HarvestError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_profiles(&raw)
}

fn parse_profiles(raw: &str) -> HarvestResult<Vec<SourceProfile>> {
    let profiles: Vec<SourceProfile> = serde_json::from_str(raw)
        .map_err(|e| HarvestError::Config(format!("malformed profiles: {e}")))?;
    for profile in &profiles {
        profile.validate()?;
    }
    Ok(profiles)
}
