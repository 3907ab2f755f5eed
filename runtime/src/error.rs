//! Error taxonomy for a collection run.
//!
//! Interaction, extraction and enrichment failures are recoverable: the
//! component that hits them logs and moves on. Everything else is fatal and
//! ends the run before any interaction with the list begins.

/// All errors produced by the collector core.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// A single scroll, key, wheel or click call failed.
    #[error("interaction failed ({action}): {message}")]
    Interaction { action: &'static str, message: String },

    /// A channel could not read the current page state.
    #[error("extraction failed on {channel} channel: {message}")]
    Extraction { channel: &'static str, message: String },

    /// A detail-page visit failed for one entity.
    #[error("enrichment failed for {reference}: {message}")]
    Enrichment { reference: String, message: String },

    /// The start page could not be reached.
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// A required precondition (session, credentials) is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The source profile or options are unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarvestError {
    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::Navigation { .. } | HarvestError::Precondition(_) | HarvestError::Config(_)
        )
    }

    pub(crate) fn interaction(action: &'static str, err: impl std::fmt::Display) -> Self {
        HarvestError::Interaction {
            action,
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn extraction(channel: &'static str, err: impl std::fmt::Display) -> Self {
        HarvestError::Extraction {
            channel,
            message: format!("{err:#}"),
        }
    }
}

pub type HarvestResult<T> = Result<T, HarvestError>;
