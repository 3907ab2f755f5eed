// Copyright 2026 Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Progress event types and broadcast channel for run telemetry.
//!
//! The collector emits `ProgressEvent`s as a run moves through its phases,
//! which flow through a `tokio::sync::broadcast` channel to any subscriber
//! (the CLI spinner, tests). When nobody listens, events are dropped.

use crate::collector::{Phase, StopReason};
use serde::{Deserialize, Serialize};

/// A progress event emitted during a collection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// The kind of progress event.
    pub event: ProgressEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEventKind {
    /// The run entered a new phase.
    PhaseChanged { phase: Phase },
    /// A displayed total was read off the page.
    TargetDetected { target: usize },
    /// One interact / extract / fold pass finished.
    PassCompleted {
        pass: u32,
        size: usize,
        inserted: usize,
        streak: u32,
        structured: usize,
        text: usize,
        network: usize,
    },
    /// One enrichment item finished, successfully or not.
    EnrichmentProgress {
        done: usize,
        total: usize,
        failed: usize,
    },
    /// The run finished.
    RunComplete {
        total: usize,
        passes: u32,
        reason: StopReason,
        elapsed_ms: u64,
    },
    /// A non-fatal warning occurred.
    Warning { message: String },
}

/// Sender handle for emitting progress events.
pub type ProgressSender = tokio::sync::broadcast::Sender<ProgressEvent>;

/// Receiver handle for consuming progress events.
pub type ProgressReceiver = tokio::sync::broadcast::Receiver<ProgressEvent>;

/// Create a new progress broadcast channel with a bounded buffer.
///
/// One event per pass plus one per enriched item; a slow consumer that lags
/// behind 256 events just misses the oldest ones.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Per-run emitter that stamps the run id and sequence number.
#[derive(Debug)]
pub struct Reporter {
    tx: Option<ProgressSender>,
    run_id: String,
    seq: u64,
}

impl Reporter {
    pub fn new(tx: Option<ProgressSender>) -> Self {
        Self {
            tx,
            run_id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit an event, ignoring the error raised when nobody listens.
    pub fn emit(&mut self, event: ProgressEventKind) {
        if let Some(ref sender) = self.tx {
            self.seq += 1;
            let _ = sender.send(ProgressEvent {
                run_id: self.run_id.clone(),
                seq: self.seq,
                event,
            });
        }
    }
}
