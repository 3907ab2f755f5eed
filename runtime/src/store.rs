//! Identity-keyed dedup store.
//!
//! Entities live in an arena in first-seen order; the index maps each
//! canonical reference to its slot.

use crate::entity::{Entity, FieldMap};
use crate::identity::Identity;
use std::collections::HashMap;

/// Which channel produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Structured element query.
    Structured,
    /// Free-text pattern mining.
    Text,
    /// Network payload sniffing.
    Network,
    /// Detail-page enrichment.
    Enrichment,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Text => write!(f, "text"),
            Self::Network => write!(f, "network"),
            Self::Enrichment => write!(f, "enrichment"),
        }
    }
}

/// One observation from one channel in one pass.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub identity: Identity,
    pub fields: FieldMap,
    pub channel: Channel,
}

impl Candidate {
    /// Identity-only candidate (text and network channels).
    pub fn bare(identity: Identity, channel: Channel) -> Self {
        Self {
            identity,
            fields: FieldMap::new(),
            channel,
        }
    }
}

/// What folding a candidate did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Set of known entities keyed by canonical reference.
#[derive(Debug, Default)]
pub struct DedupStore {
    index: HashMap<String, usize>,
    entities: Vec<Entity>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Fold one candidate in.
    ///
    /// Only the structured channel carries content; identity-only channels
    /// contribute discovery. Existing content is never regressed.
    pub fn merge(&mut self, candidate: Candidate) -> MergeOutcome {
        let Candidate {
            identity, fields, ..
        } = candidate;

        match self.index.get(&identity.reference) {
            Some(&slot) => {
                let entity = &mut self.entities[slot];
                let mut changed = false;
                if entity.identity.token.is_none() && identity.token.is_some() {
                    entity.identity.token = identity.token;
                    changed = true;
                }
                if entity.merge_fields(fields) {
                    changed = true;
                }
                if changed {
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::Unchanged
                }
            }
            None => {
                let slot = self.entities.len();
                self.index.insert(identity.reference.clone(), slot);
                let mut entity = Entity::new(identity);
                entity.merge_fields(fields);
                self.entities.push(entity);
                MergeOutcome::Inserted
            }
        }
    }

    /// Fold a batch, returning how many new identities appeared.
    pub fn merge_all(&mut self, candidates: impl IntoIterator<Item = Candidate>) -> usize {
        let mut inserted = 0;
        for candidate in candidates {
            if self.merge(candidate) == MergeOutcome::Inserted {
                inserted += 1;
            }
        }
        inserted
    }

    /// Freeze into the ordered output sequence.
    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }
}
