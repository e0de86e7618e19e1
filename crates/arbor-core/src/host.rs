// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host renderer port and the bundled in-memory host.
//!
//! The engine never interprets host nodes. Each commit hands the renderer one
//! ordered batch of primitive operations; the renderer applies them verbatim.
//! `Insert` of a node that is already attached moves it. `Remove` detaches and
//! destroys the node together with its host descendants, so only the top-level
//! host nodes of a deleted subtree are removed explicitly.
use std::collections::BTreeMap;
use std::fmt::Write as _;

use blake3::Hasher;
use serde::Serialize;
use thiserror::Error;

use crate::ident::{Hash, NodeId};
use crate::props::Props;

/// Primitive host operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum HostOp {
    /// Create a detached host node.
    Create {
        /// Node id (doubles as the host handle).
        node: NodeId,
        /// Host kind.
        kind: String,
        /// Initial configuration.
        props: Props,
    },
    /// Replace a node's configuration.
    SetConfig {
        /// Target node.
        node: NodeId,
        /// New configuration.
        props: Props,
    },
    /// Attach (or move) `node` under `parent` before `before`; append when `None`.
    Insert {
        /// Inserted node.
        node: NodeId,
        /// Host parent ([`NodeId::ROOT`] is the container).
        parent: NodeId,
        /// Next host sibling.
        before: Option<NodeId>,
    },
    /// Detach and destroy a node and its host descendants.
    Remove {
        /// Removed node.
        node: NodeId,
    },
}

/// Errors a host reports for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Operation referenced an unknown host node.
    #[error("unknown host node {0}")]
    UnknownNode(NodeId),
    /// `Create` reused a live id.
    #[error("host node {0} already exists")]
    AlreadyExists(NodeId),
    /// Insert anchor is not a child of the parent.
    #[error("anchor {anchor} is not a child of {parent}")]
    BadAnchor {
        /// Target parent.
        parent: NodeId,
        /// Anchor node.
        anchor: NodeId,
    },
    /// Insert would make a node its own ancestor.
    #[error("inserting {0} would create a cycle")]
    Cycle(NodeId),
    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Host renderer port.
///
/// Called once per commit with the complete batch. Implementations must apply
/// the ops in order; an observer of the host never sees a partial batch
/// because the engine never splits one.
pub trait HostRenderer {
    /// Applies one commit's operations.
    fn apply(&mut self, ops: &[HostOp]) -> Result<(), HostError>;
}

#[derive(Clone, Debug, PartialEq)]
struct HostNode {
    kind: String,
    props: Props,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// In-memory host tree.
///
/// Batches are applied to a copy and swapped in on success, so a failing
/// batch leaves the tree untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct HostTree {
    nodes: BTreeMap<NodeId, HostNode>,
    batches: usize,
}

impl Default for HostTree {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTree {
    /// Tree with only the container.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::ROOT,
            HostNode {
                kind: "root".into(),
                props: Props::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        Self { nodes, batches: 0 }
    }

    /// Number of batches applied.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Live host nodes, excluding the container.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// True when only the container exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `node` is live.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Children of a host node.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(&node).map_or(&[], |n| n.children.as_slice())
    }

    /// Host kind of a node.
    pub fn kind(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(|n| n.kind.as_str())
    }

    /// Configuration of a node.
    pub fn props(&self, node: NodeId) -> Option<&Props> {
        self.nodes.get(&node).map(|n| &n.props)
    }

    /// Kinds of the container's attached subtree in pre-order, with depth.
    pub fn walk(&self) -> Vec<(usize, NodeId)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, NodeId)> = self
            .children(NodeId::ROOT)
            .iter()
            .rev()
            .map(|c| (0, *c))
            .collect();
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, id));
            stack.extend(self.children(id).iter().rev().map(|c| (depth + 1, *c)));
        }
        out
    }

    /// Indented outline of the attached tree, one node per line.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for (depth, id) in self.walk() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let props = serde_json::to_string(&node.props).unwrap_or_default();
            let _ = writeln!(out, "{:indent$}{}{} {}", "", node.kind, id, props, indent = depth * 2);
        }
        out
    }

    /// Digest of the attached tree (structure, kinds, props).
    pub fn digest(&self) -> Hash {
        let mut hasher = Hasher::new();
        for (depth, id) in self.walk() {
            hasher.update(&(depth as u64).to_le_bytes());
            hasher.update(&id.value().to_le_bytes());
            if let Some(node) = self.nodes.get(&id) {
                hasher.update(node.kind.as_bytes());
                if let Ok(bytes) = serde_json::to_vec(&node.props) {
                    hasher.update(&bytes);
                }
            }
        }
        hasher.finalize().into()
    }

    fn apply_one(&mut self, op: &HostOp) -> Result<(), HostError> {
        match op {
            HostOp::Create { node, kind, props } => {
                if self.nodes.contains_key(node) {
                    return Err(HostError::AlreadyExists(*node));
                }
                self.nodes.insert(
                    *node,
                    HostNode {
                        kind: kind.clone(),
                        props: props.clone(),
                        parent: None,
                        children: Vec::new(),
                    },
                );
            }
            HostOp::SetConfig { node, props } => {
                self.nodes
                    .get_mut(node)
                    .ok_or(HostError::UnknownNode(*node))?
                    .props = props.clone();
            }
            HostOp::Insert {
                node,
                parent,
                before,
            } => self.insert(*node, *parent, *before)?,
            HostOp::Remove { node } => {
                if !self.nodes.contains_key(node) || node.is_root() {
                    return Err(HostError::UnknownNode(*node));
                }
                self.unlink(*node);
                let mut stack = vec![*node];
                while let Some(id) = stack.pop() {
                    if let Some(removed) = self.nodes.remove(&id) {
                        stack.extend(removed.children);
                    }
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, node: NodeId, parent: NodeId, before: Option<NodeId>) -> Result<(), HostError> {
        if !self.nodes.contains_key(&node) {
            return Err(HostError::UnknownNode(node));
        }
        let parent_node = self.nodes.get(&parent).ok_or(HostError::UnknownNode(parent))?;
        if let Some(anchor) = before {
            if anchor == node || !parent_node.children.contains(&anchor) {
                return Err(HostError::BadAnchor { parent, anchor });
            }
        }
        let mut cursor = Some(parent);
        while let Some(c) = cursor {
            if c == node {
                return Err(HostError::Cycle(node));
            }
            cursor = self.nodes.get(&c).and_then(|n| n.parent);
        }
        self.unlink(node);
        if let Some(p) = self.nodes.get_mut(&parent) {
            let index = before
                .and_then(|a| p.children.iter().position(|c| *c == a))
                .unwrap_or(p.children.len());
            p.children.insert(index, node);
        }
        if let Some(n) = self.nodes.get_mut(&node) {
            n.parent = Some(parent);
        }
        Ok(())
    }

    fn unlink(&mut self, node: NodeId) {
        let Some(parent) = self.nodes.get_mut(&node).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != node);
        }
    }
}

impl HostRenderer for HostTree {
    fn apply(&mut self, ops: &[HostOp]) -> Result<(), HostError> {
        let mut next = self.clone();
        for op in ops {
            next.apply_one(op)?;
        }
        next.batches += 1;
        *self = next;
        Ok(())
    }
}
