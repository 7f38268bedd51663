//! Human-in-the-loop review checkpoints.
//!
//! The orchestrator never prompts anyone itself. When the table index reaches
//! the pause marker it hands a [`Checkpoint`] to a [`ReviewGate`] and waits
//! for a [`CheckpointDecision`]. The CLI implements the gate over stdin; a
//! service could implement it over a queue. Tests script it.
//!
//! A checkpoint is a review gate, not a recovery mechanism: nothing is
//! retried, the operator only decides where to stop next and whether the
//! table goes to the model (and from there to the database).

use crate::table::{BackendOutput, NormalizedTable, StructuredTableRecord};
use std::path::Path;

/// Everything the operator may want to look at for one table.
#[derive(Debug)]
pub struct Checkpoint<'a> {
    pub index: usize,
    pub total: usize,
    pub caption: Option<&'a str>,
    pub image: Option<&'a Path>,
    pub pdf: Option<&'a Path>,
    /// The table as parsed straight from the markup, if it parsed.
    pub markup: Option<&'a NormalizedTable>,
    /// Each backend's normalised tables.
    pub backends: &'a [BackendOutput],
}

/// The operator's answer at a checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointDecision {
    /// Next index to pause at; `None` pauses at the following table.
    pub next_pause: Option<usize>,
    /// Send this table to the structured-extraction collaborator.
    pub structure: bool,
}

/// Front end that answers checkpoints.
pub trait ReviewGate: Send {
    /// Index of the first table to pause at; `None` never pauses.
    fn first_pause(&mut self) -> Option<usize>;

    /// Called when the run reaches the pause marker.
    fn on_checkpoint(&mut self, checkpoint: &Checkpoint<'_>) -> CheckpointDecision;

    /// Called after a record was extracted; `true` persists it.
    fn confirm_persist(&mut self, record: &StructuredTableRecord) -> bool;
}

/// A gate that never pauses. The run only renders and cross-checks tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReview;

impl ReviewGate for NoReview {
    fn first_pause(&mut self) -> Option<usize> {
        None
    }

    fn on_checkpoint(&mut self, checkpoint: &Checkpoint<'_>) -> CheckpointDecision {
        CheckpointDecision {
            next_pause: Some(checkpoint.total),
            structure: false,
        }
    }

    fn confirm_persist(&mut self, _record: &StructuredTableRecord) -> bool {
        false
    }
}

/// The single piece of state carried from one table to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseMarker(Option<usize>);

impl PauseMarker {
    pub fn new(first: Option<usize>) -> Self {
        Self(first)
    }

    pub fn get(&self) -> Option<usize> {
        self.0
    }

    /// Whether the run pauses at table `index`.
    pub fn is_due(&self, index: usize) -> bool {
        self.0 == Some(index)
    }

    /// Move the marker after a checkpoint at `index`.
    ///
    /// An explicit index wins, even one already passed (which never pauses
    /// again); no answer pauses at the next table.
    pub fn advance(&mut self, index: usize, decision: &CheckpointDecision) {
        self.0 = Some(decision.next_pause.unwrap_or(index + 1));
    }
}
