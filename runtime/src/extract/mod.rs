//! Multi-channel extraction.
//!
//! Each pass reads the page three ways and hands every observation to the
//! dedup store as a [`Candidate`]:
//!
//! - **structured**: record elements with fields and a reference
//! - **text**: reference patterns mined from the list container
//! - **network**: reference patterns mined from captured payloads
//!
//! A channel that fails contributes nothing for that pass; the other
//! channels are unaffected.

pub mod fields;
pub mod network;
pub mod structured;
pub mod text_mining;

use crate::driver::PageDriver;
use crate::error::HarvestResult;
use crate::identity::Normalizer;
use crate::profile::{compile, SourceProfile};
use crate::store::{Candidate, Channel};
use network::NetworkSniffer;
use structured::StructuredReader;
use text_mining::{scope_text, ReferenceMiner};
use tracing::debug;

/// Per-channel candidate counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCounts {
    pub structured: usize,
    pub text: usize,
    pub network: usize,
}

/// Everything one pass observed.
#[derive(Debug, Default)]
pub struct PassHarvest {
    pub candidates: Vec<Candidate>,
    pub counts: ChannelCounts,
}

/// Extraction state for one run.
pub struct Extractor {
    normalizer: Normalizer,
    structured: StructuredReader,
    miner: Option<ReferenceMiner>,
    text_scope: Option<String>,
    include_markup: bool,
    sniffer: Option<NetworkSniffer>,
}

impl Extractor {
    pub fn new(profile: &SourceProfile) -> HarvestResult<Self> {
        let token_shape = profile
            .identity
            .token_shape
            .as_deref()
            .map(compile)
            .transpose()?;
        let normalizer = Normalizer::new(profile.base()?, profile.identity.strip_query, token_shape);
        let structured = StructuredReader::new(&profile.records)?;

        let (miner, text_scope, include_markup, sniffer) = match &profile.mining {
            Some(rule) => (
                Some(ReferenceMiner::new(rule)?),
                rule.text_scope.clone(),
                rule.include_markup,
                rule.network.clone().map(NetworkSniffer::new),
            ),
            None => (None, None, false, None),
        };

        Ok(Self {
            normalizer,
            structured,
            miner,
            text_scope,
            include_markup,
            sniffer,
        })
    }

    /// Start the network channel, if the profile has one.
    pub async fn attach_network(&mut self, driver: &dyn PageDriver) {
        if let Some(sniffer) = self.sniffer.as_mut() {
            sniffer.attach(driver).await;
        }
    }

    /// Stop the network channel.
    pub async fn detach_network(&mut self, driver: &dyn PageDriver) {
        if let Some(sniffer) = self.sniffer.as_mut() {
            sniffer.detach(driver).await;
        }
    }

    /// Run all three channels against the current page state.
    pub async fn pass(&mut self, driver: &dyn PageDriver) -> PassHarvest {
        let mut harvest = PassHarvest::default();

        let structured = self.structured.read(driver, &self.normalizer).await;
        harvest.counts.structured = structured.len();
        harvest.candidates.extend(structured);

        if let (Some(miner), Some(scope)) = (&self.miner, &self.text_scope) {
            match scope_text(driver, scope, self.include_markup).await {
                Ok(text) => {
                    let mined = miner.mine(&text, &self.normalizer);
                    harvest.counts.text = mined.len();
                    harvest
                        .candidates
                        .extend(mined.into_iter().map(|id| Candidate::bare(id, Channel::Text)));
                }
                Err(e) => debug!("{e}"),
            }
        }

        let network = self.drain_network();
        harvest.counts.network = network.len();
        harvest.candidates.extend(network);

        harvest
    }

    /// Identities from payloads captured since the last drain.
    pub fn drain_network(&mut self) -> Vec<Candidate> {
        match (&self.miner, self.sniffer.as_mut()) {
            (Some(miner), Some(sniffer)) => sniffer
                .drain(miner, &self.normalizer)
                .into_iter()
                .map(|id| Candidate::bare(id, Channel::Network))
                .collect(),
            _ => Vec::new(),
        }
    }
}
