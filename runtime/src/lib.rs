// Copyright 2026 Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Harvest runtime library: convergence-driven collection of virtualized,
//! lazily-loaded web lists.
//!
//! The entry point is [`collector::collect`], which drives any
//! [`driver::PageDriver`] through a [`profile::SourceProfile`].

pub mod cli;
pub mod collector;
pub mod driver;
pub mod enrich;
pub mod entity;
pub mod error;
pub mod export;
pub mod extract;
pub mod identity;
pub mod profile;
pub mod progress;
pub mod retry;
pub mod session;
pub mod store;

pub use collector::{
    collect, collect_subjects, merge_runs, CollectOptions, CollectResult, Phase, RunOutcome,
    StopReason, SubjectRun,
};
pub use entity::{Entity, FieldMap, FieldValue};
pub use error::{HarvestError, HarvestResult};
pub use identity::Identity;
pub use profile::SourceProfile;
