// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sibling-list reconciliation: identity pairing and minimal-move placement.
//!
//! Old children are paired with new declarations by resolved key and tag.
//! Paired children whose old positions form the longest increasing
//! subsequence (in new order) stay put; every other paired child gets a
//! `Move` and every unpaired declaration an `Insert`, each anchored before its
//! new next sibling. Placements are emitted right to left so every anchor is
//! already in its final position when it is referenced.
//!
//! This is a heuristic, not a tree edit distance: it is O(n log n) in the
//! sibling count and minimal in the number of moves for one list.
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::commit::Diagnostic;
use crate::declaration::{Declaration, NodeTag};
use crate::ident::{Key, NodeId};
use crate::props::Props;

/// One operation of an edit script.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum EditOp {
    /// Attach a newly created node before `before` (append when `None`).
    Insert {
        /// Created node.
        node: NodeId,
        /// New parent.
        parent: NodeId,
        /// Next sibling in the final order.
        before: Option<NodeId>,
    },
    /// Reposition an existing node among its siblings.
    Move {
        /// Moved node.
        node: NodeId,
        /// Parent (unchanged).
        parent: NodeId,
        /// Next sibling in the final order.
        before: Option<NodeId>,
    },
    /// Replace the node's configuration.
    Update {
        /// Updated node.
        node: NodeId,
        /// New configuration.
        props: Props,
    },
    /// Destroy the node and its subtree.
    Delete {
        /// Deleted node.
        node: NodeId,
    },
}

impl EditOp {
    /// Node the op targets.
    pub fn node(&self) -> NodeId {
        match self {
            Self::Insert { node, .. }
            | Self::Move { node, .. }
            | Self::Update { node, .. }
            | Self::Delete { node } => *node,
        }
    }
}

/// Ordered edit operations; must be applied in emission order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EditScript {
    /// Operations in emission order.
    pub ops: Vec<EditOp>,
}

impl EditScript {
    /// Number of ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing changes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates ops in emission order.
    pub fn iter(&self) -> impl Iterator<Item = &EditOp> {
        self.ops.iter()
    }

    /// Count of `Insert` ops.
    pub fn inserts(&self) -> usize {
        self.count(|op| matches!(op, EditOp::Insert { .. }))
    }

    /// Count of `Move` ops.
    pub fn moves(&self) -> usize {
        self.count(|op| matches!(op, EditOp::Move { .. }))
    }

    /// Count of `Update` ops.
    pub fn updates(&self) -> usize {
        self.count(|op| matches!(op, EditOp::Update { .. }))
    }

    /// Count of `Delete` ops.
    pub fn deletes(&self) -> usize {
        self.count(|op| matches!(op, EditOp::Delete { .. }))
    }

    fn count(&self, f: impl Fn(&EditOp) -> bool) -> usize {
        self.ops.iter().filter(|op| f(op)).count()
    }
}

/// Identity of an existing child as seen by the pairing step.
#[derive(Clone, Debug)]
pub(crate) struct OldChild {
    pub id: NodeId,
    pub key: Key,
    pub tag: NodeTag,
}

/// Final position of one declared child.
#[derive(Clone, Debug)]
pub(crate) struct Placement {
    pub id: NodeId,
    pub key: Key,
    pub fresh: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Reconciled {
    pub ops: Vec<EditOp>,
    pub children: Vec<Placement>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolves sibling keys. Empty and repeated explicit keys are reported and
/// fall back to the positional key; the first occurrence keeps its key.
pub(crate) fn effective_keys(parent: NodeId, new: &[Declaration]) -> (Vec<Key>, Vec<Diagnostic>) {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut diagnostics = Vec::new();
    let keys = new
        .iter()
        .enumerate()
        .map(|(index, decl)| match decl.key() {
            None => Key::Index(index),
            Some("") => {
                diagnostics.push(Diagnostic::MalformedKey { parent, index });
                Key::Index(index)
            }
            Some(k) if seen.insert(k) => Key::Explicit(k.to_owned()),
            Some(k) => {
                diagnostics.push(Diagnostic::DuplicateKey {
                    parent,
                    key: k.to_owned(),
                    index,
                });
                Key::Index(index)
            }
        })
        .collect();
    (keys, diagnostics)
}

/// Reconciles one sibling list. Fresh ids come from `alloc`, called in
/// declaration order.
pub(crate) fn reconcile_children(
    parent: NodeId,
    old: &[OldChild],
    new: &[Declaration],
    alloc: &mut dyn FnMut() -> NodeId,
) -> Reconciled {
    let (keys, diagnostics) = effective_keys(parent, new);

    let mut by_key: FxHashMap<&Key, usize> = FxHashMap::default();
    for (j, child) in old.iter().enumerate() {
        by_key.entry(&child.key).or_insert(j);
    }

    let mut used = vec![false; old.len()];
    let mut sources: Vec<Option<usize>> = Vec::with_capacity(new.len());
    for (decl, key) in new.iter().zip(&keys) {
        let source = by_key
            .get(key)
            .copied()
            .filter(|&j| !used[j] && decl.has_tag(&old[j].tag));
        if let Some(j) = source {
            used[j] = true;
        }
        sources.push(source);
    }

    let mut ops: Vec<EditOp> = old
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(child, _)| EditOp::Delete { node: child.id })
        .collect();

    let matched: Vec<(usize, usize)> = sources
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|j| (i, j)))
        .collect();
    let old_positions: Vec<usize> = matched.iter().map(|&(_, j)| j).collect();
    let mut stable = vec![false; new.len()];
    for p in longest_increasing_subsequence(&old_positions) {
        stable[matched[p].0] = true;
    }

    let children: Vec<Placement> = sources
        .iter()
        .zip(keys)
        .map(|(source, key)| match source {
            Some(j) => Placement {
                id: old[*j].id,
                key,
                fresh: false,
            },
            None => Placement {
                id: alloc(),
                key,
                fresh: true,
            },
        })
        .collect();

    for i in (0..children.len()).rev() {
        let node = children[i].id;
        let before = children.get(i + 1).map(|p| p.id);
        if children[i].fresh {
            ops.push(EditOp::Insert {
                node,
                parent,
                before,
            });
        } else if !stable[i] {
            ops.push(EditOp::Move {
                node,
                parent,
                before,
            });
        }
    }

    Reconciled {
        ops,
        children,
        diagnostics,
    }
}

/// Positions (indices into `seq`) of one longest strictly increasing
/// subsequence, in order. Patience sorting with predecessor links.
fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    // tails[k] = index in seq of the smallest tail of an increasing run of length k+1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, &value) in seq.iter().enumerate() {
        let k = tails.partition_point(|&t| seq[t] < value);
        if k > 0 {
            prev[i] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(i);
        } else {
            tails[k] = i;
        }
    }
    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = prev[i];
    }
    out.reverse();
    out
}
