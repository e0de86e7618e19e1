// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host renderer double that records every batch.

use arbor_core::{HostError, HostOp, HostRenderer, HostTree};

/// [`HostTree`] wrapper that keeps a copy of each batch it receives.
///
/// Assertions can inspect batch boundaries (one batch per commit) as well as
/// the resulting host tree. `fail_next` makes the next batch fail without
/// being applied.
#[derive(Debug, Default)]
pub struct RecordingHost {
    tree: HostTree,
    batches: Vec<Vec<HostOp>>,
    fail_next: Option<HostError>,
}

impl RecordingHost {
    /// Empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// The host tree after all successful batches.
    pub fn tree(&self) -> &HostTree {
        &self.tree
    }

    /// Every batch received, failed ones included.
    pub fn batches(&self) -> &[Vec<HostOp>] {
        &self.batches
    }

    /// Last batch received.
    pub fn last_batch(&self) -> Option<&[HostOp]> {
        self.batches.last().map(Vec::as_slice)
    }

    /// Forgets recorded batches; the host tree is kept.
    pub fn clear_batches(&mut self) {
        self.batches.clear();
    }

    /// Rejects the next batch with `error`.
    pub fn fail_next(&mut self, error: HostError) {
        self.fail_next = Some(error);
    }

    /// Host kinds and `value` props of the attached tree in pre-order,
    /// formatted `kind:value` (or just `kind`).
    pub fn labels(&self) -> Vec<String> {
        self.tree
            .walk()
            .into_iter()
            .map(|(_, id)| {
                let kind = self.tree.kind(id).unwrap_or_default();
                match self
                    .tree
                    .props(id)
                    .and_then(|p| p.get("value"))
                    .and_then(serde_json::Value::as_str)
                {
                    Some(v) => format!("{kind}:{v}"),
                    None => kind.to_owned(),
                }
            })
            .collect()
    }
}

impl HostRenderer for RecordingHost {
    fn apply(&mut self, ops: &[HostOp]) -> Result<(), HostError> {
        self.batches.push(ops.to_vec());
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        self.tree.apply(ops)
    }
}
