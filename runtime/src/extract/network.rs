//! Network channel: identities mined out of list-pagination payloads.
//!
//! Infinite lists often fetch more rows before they render them, and some
//! rows are virtualized away again. Sniffing the responses catches both.

use super::text_mining::ReferenceMiner;
use crate::driver::{NetworkResponse, NetworkSubscription, PageDriver, ResponseFilter};
use crate::error::HarvestError;
use crate::identity::{Identity, Normalizer};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};

/// Buffered response capture for one run.
pub struct NetworkSniffer {
    filter: ResponseFilter,
    subscription: Option<NetworkSubscription>,
    responses_seen: usize,
}

impl NetworkSniffer {
    pub fn new(filter: ResponseFilter) -> Self {
        Self {
            filter,
            subscription: None,
            responses_seen: 0,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn responses_seen(&self) -> usize {
        self.responses_seen
    }

    /// Start capturing. Failure leaves the channel disabled for the run.
    pub async fn attach(&mut self, driver: &dyn PageDriver) {
        if self.is_attached() {
            return;
        }
        match driver.on_network_response(self.filter.clone()).await {
            Ok(subscription) => {
                debug!(id = subscription.id, "network capture attached");
                self.subscription = Some(subscription);
            }
            Err(e) => warn!("{}", HarvestError::extraction("network", e)),
        }
    }

    /// Mine everything buffered since the last drain.
    pub fn drain(&mut self, miner: &ReferenceMiner, normalizer: &Normalizer) -> Vec<Identity> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Vec::new();
        };
        let mut identities = Vec::new();
        loop {
            match subscription.receiver.try_recv() {
                Ok(response) => {
                    self.responses_seen += 1;
                    identities.extend(mine_response(&response, miner, normalizer));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("network capture closed by driver");
                    break;
                }
            }
        }
        identities
    }

    /// Stop capturing. Safe to call when never attached.
    pub async fn detach(&mut self, driver: &dyn PageDriver) {
        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = driver.off_network_response(subscription.id).await {
                debug!("{}", HarvestError::extraction("network", e));
            }
            debug!(responses = self.responses_seen(), "network capture detached");
        }
    }
}

/// Payloads are frequently JSON with escaped slashes.
fn mine_response(
    response: &NetworkResponse,
    miner: &ReferenceMiner,
    normalizer: &Normalizer,
) -> Vec<Identity> {
    let body = response.body.replace("\\/", "/").replace("\\u002F", "/");
    miner.mine(&body, normalizer)
}
