//! Reference sequential executor.
//!
//! A script is a sequence of row operations over numbered slots. The
//! reference executor applies it directly to an in-memory row model, the
//! way a single always-online client would. Replaying the same script
//! through an outbox and a remote store must end in the same rows.

use outbox_codec::Document;
use std::collections::{BTreeMap, BTreeSet};

/// One step of a script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOp {
    /// Create a row in an empty slot.
    Create {
        /// Slot index.
        slot: usize,
        /// Initial fields.
        data: Document,
    },
    /// Overwrite some fields of a live row.
    Update {
        /// Slot index.
        slot: usize,
        /// Fields to write.
        data: Document,
    },
    /// Delete a live row.
    Delete {
        /// Slot index.
        slot: usize,
    },
    /// Let the client sync. No effect on the reference model.
    Drain,
}

/// Drops steps that are invalid at their position.
///
/// A create needs an empty slot; an update or delete needs a live one.
pub fn normalize(ops: &[ScriptOp]) -> Vec<ScriptOp> {
    let mut live = BTreeSet::new();
    ops.iter()
        .filter(|op| match op {
            ScriptOp::Create { slot, .. } => live.insert(*slot),
            ScriptOp::Update { slot, .. } => live.contains(slot),
            ScriptOp::Delete { slot } => live.remove(slot),
            ScriptOp::Drain => true,
        })
        .cloned()
        .collect()
}

/// Applies scripts straight to a row model.
#[derive(Debug, Default)]
pub struct ReferenceExecutor {
    rows: BTreeMap<usize, Document>,
    writes: usize,
}

impl ReferenceExecutor {
    /// Creates an executor with no rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a whole script.
    pub fn run(ops: &[ScriptOp]) -> Self {
        let mut executor = Self::new();
        for op in ops {
            executor.apply(op);
        }
        executor
    }

    /// Applies one step. Invalid steps are ignored.
    pub fn apply(&mut self, op: &ScriptOp) {
        match op {
            ScriptOp::Create { slot, data } => {
                if !self.rows.contains_key(slot) {
                    self.rows.insert(*slot, data.clone());
                    self.writes += 1;
                }
            }
            ScriptOp::Update { slot, data } => {
                if let Some(row) = self.rows.get_mut(slot) {
                    row.extend(data.clone());
                    self.writes += 1;
                }
            }
            ScriptOp::Delete { slot } => {
                if self.rows.remove(slot).is_some() {
                    self.writes += 1;
                }
            }
            ScriptOp::Drain => {}
        }
    }

    /// Live rows by slot.
    pub fn rows(&self) -> &BTreeMap<usize, Document> {
        &self.rows
    }

    /// Number of writes that took effect.
    pub fn writes(&self) -> usize {
        self.writes
    }
}
