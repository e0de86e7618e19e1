// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The committed node tree.
//!
//! Written only by the commit executor; renders read it and stage changes.
use std::collections::BTreeMap;
use std::sync::Arc;

use blake3::Hasher;

use crate::component::EvalError;
use crate::declaration::{Declaration, Lifecycle, NodeTag};
use crate::hooks::HookCell;
use crate::ident::{ComponentId, Hash, Key, NodeId};
use crate::props::Props;
use crate::suspense::SuspenseRecord;

/// Record attached to an error boundary node.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBoundaryRecord {
    /// Latest declared primary children.
    pub primary: Vec<Declaration>,
    /// Latest declared fallback.
    pub fallback: Vec<Declaration>,
    /// Caught error while the fallback is mounted.
    pub error: Option<EvalError>,
}

/// Kind-specific payload of a node.
#[derive(Clone)]
pub enum NodeKind {
    /// Container node.
    Root,
    /// Host primitive.
    Host {
        /// Host kind.
        kind: String,
        /// Committed configuration.
        props: Props,
        /// Lifecycle callbacks.
        lifecycle: Option<Arc<dyn Lifecycle>>,
    },
    /// Composite.
    Composite {
        /// Evaluating component.
        component: ComponentId,
        /// Committed props.
        props: Props,
        /// Committed hook state.
        hooks: HookCell,
    },
    /// Suspense boundary.
    Suspense(SuspenseRecord),
    /// Error boundary.
    ErrorBoundary(ErrorBoundaryRecord),
}

impl core::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Root => f.write_str("Root"),
            Self::Host { kind, props, .. } => f
                .debug_struct("Host")
                .field("kind", kind)
                .field("props", props)
                .finish_non_exhaustive(),
            Self::Composite {
                component, props, ..
            } => f
                .debug_struct("Composite")
                .field("component", &component.short())
                .field("props", props)
                .finish_non_exhaustive(),
            Self::Suspense(r) => f.debug_tuple("Suspense").field(&r.state).finish(),
            Self::ErrorBoundary(r) => f
                .debug_tuple("ErrorBoundary")
                .field(&r.error.is_some())
                .finish(),
        }
    }
}

/// One committed node.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    key: Key,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// Builds the initial node for a fresh declaration.
    pub(crate) fn declared(id: NodeId, key: Key, decl: &Declaration) -> Self {
        let kind = match decl {
            Declaration::Host(d) => NodeKind::Host {
                kind: d.kind.clone(),
                props: d.props.clone(),
                lifecycle: d.lifecycle.clone(),
            },
            Declaration::Composite(d) => NodeKind::Composite {
                component: d.component,
                props: d.props.clone(),
                hooks: HookCell::default(),
            },
            Declaration::Suspense(d) => {
                NodeKind::Suspense(SuspenseRecord::new(d.children.clone(), d.fallback.clone()))
            }
            Declaration::ErrorBoundary(d) => NodeKind::ErrorBoundary(ErrorBoundaryRecord {
                primary: d.children.clone(),
                fallback: d.fallback.clone(),
                error: None,
            }),
        };
        Self {
            id,
            key,
            parent: None,
            children: Vec::new(),
            kind,
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Sibling key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Owning parent; `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Kind-specific payload.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Type tag.
    pub fn tag(&self) -> NodeTag {
        match &self.kind {
            NodeKind::Root => NodeTag::Root,
            NodeKind::Host { kind, .. } => NodeTag::Host(kind.clone()),
            NodeKind::Composite { component, .. } => NodeTag::Composite(*component),
            NodeKind::Suspense(_) => NodeTag::Suspense,
            NodeKind::ErrorBoundary(_) => NodeTag::ErrorBoundary,
        }
    }

    /// True when the tag matches, without allocating.
    pub(crate) fn has_tag(&self, tag: &NodeTag) -> bool {
        match (&self.kind, tag) {
            (NodeKind::Host { kind, .. }, NodeTag::Host(k)) => kind == k,
            (NodeKind::Composite { component, .. }, NodeTag::Composite(c)) => component == c,
            (NodeKind::Root, NodeTag::Root)
            | (NodeKind::Suspense(_), NodeTag::Suspense)
            | (NodeKind::ErrorBoundary(_), NodeTag::ErrorBoundary) => true,
            _ => false,
        }
    }

    /// Host and composite props.
    pub fn props(&self) -> Option<&Props> {
        match &self.kind {
            NodeKind::Host { props, .. } | NodeKind::Composite { props, .. } => Some(props),
            _ => None,
        }
    }

    /// Committed hook cell of a composite.
    pub fn hooks(&self) -> Option<&HookCell> {
        match &self.kind {
            NodeKind::Composite { hooks, .. } => Some(hooks),
            _ => None,
        }
    }

    /// Suspense record of a suspense boundary.
    pub fn suspense(&self) -> Option<&SuspenseRecord> {
        match &self.kind {
            NodeKind::Suspense(r) => Some(r),
            _ => None,
        }
    }

    /// Record of an error boundary.
    pub fn error_boundary(&self) -> Option<&ErrorBoundaryRecord> {
        match &self.kind {
            NodeKind::ErrorBoundary(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn lifecycle(&self) -> Option<&Arc<dyn Lifecycle>> {
        match &self.kind {
            NodeKind::Host { lifecycle, .. } => lifecycle.as_ref(),
            _ => None,
        }
    }

    /// True for host primitives and the root.
    pub fn is_host_like(&self) -> bool {
        matches!(self.kind, NodeKind::Root | NodeKind::Host { .. })
    }
}

/// blake3 digest of the committed tree (structure, keys, tags, props).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TreeDigest(pub Hash);

impl core::fmt::Display for TreeDigest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Errors from structural tree edits. These indicate a corrupted edit script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// Referenced node does not exist.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// Node id is already in use.
    #[error("node {0} already exists")]
    Duplicate(NodeId),
    /// Anchor is not a child of the given parent.
    #[error("node {anchor} is not a child of {parent}")]
    BadAnchor {
        /// Parent being edited.
        parent: NodeId,
        /// Anchor sibling.
        anchor: NodeId,
    },
}

/// Arena of committed nodes keyed by id.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: BTreeMap<NodeId, Node>,
    pub(crate) next_id: u64,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// Tree holding only the root container.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::ROOT,
            Node {
                id: NodeId::ROOT,
                key: Key::Index(0),
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Root,
            },
        );
        Self { nodes, next_id: 1 }
    }

    /// Looks up a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// True when the node is committed.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root exists from construction.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of a node (empty for unknown ids).
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map_or(&[], |n| n.children.as_slice())
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.nodes.get(&id).and_then(|n| n.parent);
        core::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.nodes.get(&current).and_then(|n| n.parent);
            Some(current)
        })
    }

    /// Child-index path from the root; sorts nodes in pre-order.
    pub(crate) fn preorder_key(&self, id: NodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut cursor = id;
        while let Some(parent) = self.nodes.get(&cursor).and_then(|n| n.parent) {
            let index = self
                .children(parent)
                .iter()
                .position(|c| *c == cursor)
                .unwrap_or(usize::MAX);
            path.push(index);
            cursor = parent;
        }
        path.reverse();
        path
    }

    /// Nearest host-like ancestor (the host parent of the node's host roots).
    pub fn host_parent(&self, id: NodeId) -> NodeId {
        self.ancestors(id)
            .find(|a| self.nodes.get(a).is_some_and(Node::is_host_like))
            .unwrap_or(NodeId::ROOT)
    }

    /// The node itself when host-like, otherwise the top-level host nodes of
    /// its subtree in order.
    pub fn host_roots(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_host_roots(id, &mut out);
        out
    }

    fn collect_host_roots(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.is_host_like() {
            out.push(id);
            return;
        }
        for child in &node.children {
            self.collect_host_roots(*child, out);
        }
    }

    fn first_host_in(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(&id)?;
        if node.is_host_like() {
            return Some(id);
        }
        node.children.iter().find_map(|c| self.first_host_in(*c))
    }

    /// First host node that follows `id`'s subtree under the same host parent.
    pub fn next_host_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = id;
        loop {
            let parent_id = self.nodes.get(&cursor)?.parent?;
            let parent = self.nodes.get(&parent_id)?;
            let index = parent.children.iter().position(|c| *c == cursor)?;
            if let Some(found) = parent.children[index + 1..]
                .iter()
                .find_map(|s| self.first_host_in(*s))
            {
                return Some(found);
            }
            if parent.is_host_like() {
                return None;
            }
            cursor = parent_id;
        }
    }

    /// Subtree of `id` in post-order (children before parents).
    pub fn postorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((n, expanded)) = stack.pop() {
            if expanded {
                out.push(n);
                continue;
            }
            stack.push((n, true));
            for c in self.children(n).iter().rev() {
                stack.push((*c, false));
            }
        }
        out
    }

    pub(crate) fn insert_detached(&mut self, node: Node) -> Result<(), TreeError> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::Duplicate(node.id));
        }
        self.next_id = self.next_id.max(node.id.value() + 1);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Places `id` under `parent` before `before` (append when `None`),
    /// detaching it from its current position first.
    pub(crate) fn place(
        &mut self,
        id: NodeId,
        parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&id) {
            return Err(TreeError::UnknownNode(id));
        }
        let parent_node = self.nodes.get(&parent).ok_or(TreeError::UnknownNode(parent))?;
        if let Some(anchor) = before {
            if anchor == id || !parent_node.children.contains(&anchor) {
                return Err(TreeError::BadAnchor { parent, anchor });
            }
        }
        self.unlink(id);
        let siblings = &mut self
            .nodes
            .get_mut(&parent)
            .ok_or(TreeError::UnknownNode(parent))?
            .children;
        let index = before
            .and_then(|anchor| siblings.iter().position(|c| *c == anchor))
            .unwrap_or(siblings.len());
        siblings.insert(index, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(parent);
        }
        Ok(())
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != id);
        }
        if let Some(n) = self.nodes.get_mut(&id) {
            n.parent = None;
        }
    }

    /// Unlinks and removes the subtree rooted at `id`, returning its nodes in
    /// post-order.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<Node>, TreeError> {
        if id.is_root() || !self.nodes.contains_key(&id) {
            return Err(TreeError::UnknownNode(id));
        }
        let order = self.postorder(id);
        self.unlink(id);
        Ok(order
            .into_iter()
            .filter_map(|n| self.nodes.remove(&n))
            .collect())
    }

    /// Digest of the whole committed tree.
    pub fn digest(&self) -> TreeDigest {
        let mut hasher = Hasher::new();
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            hasher.update(&id.value().to_le_bytes());
            hasher.update(node.key.to_string().as_bytes());
            hasher.update(format!("{:?}", node.tag()).as_bytes());
            if let Some(props) = node.props() {
                // BTreeMap-backed, so the encoding is canonical.
                if let Ok(bytes) = serde_json::to_vec(props) {
                    hasher.update(&bytes);
                }
            }
            hasher.update(&(node.children.len() as u64).to_le_bytes());
            stack.extend(node.children.iter().rev().copied());
        }
        TreeDigest(hasher.finalize().into())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::declaration::{CompositeDecl, HostDecl};
    use crate::ident::make_component_id;

    fn host(tree: &mut NodeTree, id: u64, parent: NodeId) -> NodeId {
        let id = NodeId::from_raw(id);
        let decl: Declaration = HostDecl::new("view").into();
        tree.insert_detached(Node::declared(id, Key::Index(0), &decl))
            .unwrap();
        tree.place(id, parent, None).unwrap();
        id
    }

    fn composite(tree: &mut NodeTree, id: u64, parent: NodeId) -> NodeId {
        let id = NodeId::from_raw(id);
        let decl: Declaration = CompositeDecl::new(make_component_id("C")).into();
        tree.insert_detached(Node::declared(id, Key::Index(0), &decl))
            .unwrap();
        tree.place(id, parent, None).unwrap();
        id
    }

    #[test]
    fn next_host_sibling_walks_through_composites() {
        // root
        //  ├─ c1 (composite)
        //  │   └─ a (host)
        //  ├─ c2 (composite, empty)
        //  └─ c3 (composite)
        //      └─ b (host)
        let mut t = NodeTree::new();
        let c1 = composite(&mut t, 1, NodeId::ROOT);
        let a = host(&mut t, 2, c1);
        let _c2 = composite(&mut t, 3, NodeId::ROOT);
        let c3 = composite(&mut t, 4, NodeId::ROOT);
        let b = host(&mut t, 5, c3);

        assert_eq!(t.next_host_sibling(a), Some(b));
        assert_eq!(t.next_host_sibling(c1), Some(b));
        assert_eq!(t.next_host_sibling(b), None);
        assert_eq!(t.host_parent(b), NodeId::ROOT);
        assert_eq!(t.host_roots(NodeId::ROOT), vec![NodeId::ROOT]);
        assert_eq!(t.host_roots(c3), vec![b]);
    }

    #[test]
    fn next_host_sibling_stops_at_host_parent() {
        let mut t = NodeTree::new();
        let outer = host(&mut t, 1, NodeId::ROOT);
        let inner = host(&mut t, 2, outer);
        let _after = host(&mut t, 3, NodeId::ROOT);
        assert_eq!(t.next_host_sibling(inner), None);
    }

    #[test]
    fn remove_subtree_is_postorder_and_unlinks() {
        let mut t = NodeTree::new();
        let a = host(&mut t, 1, NodeId::ROOT);
        let b = host(&mut t, 2, a);
        let c = host(&mut t, 3, a);
        let removed: Vec<NodeId> = t.remove_subtree(a).unwrap().iter().map(Node::id).collect();
        assert_eq!(removed, vec![b, c, a]);
        assert!(t.children(NodeId::ROOT).is_empty());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn place_moves_before_anchor() {
        let mut t = NodeTree::new();
        let a = host(&mut t, 1, NodeId::ROOT);
        let b = host(&mut t, 2, NodeId::ROOT);
        let c = host(&mut t, 3, NodeId::ROOT);
        t.place(c, NodeId::ROOT, Some(a)).unwrap();
        assert_eq!(t.children(NodeId::ROOT), &[c, a, b]);
        assert_eq!(t.preorder_key(b), vec![2]);
        assert!(matches!(
            t.place(a, NodeId::ROOT, Some(NodeId::from_raw(99))),
            Err(TreeError::BadAnchor { .. })
        ));
    }

    #[test]
    fn digest_tracks_props() {
        let mut t = NodeTree::new();
        let a = host(&mut t, 1, NodeId::ROOT);
        let before = t.digest();
        if let Some(NodeKind::Host { props, .. }) = t.get_mut(a).map(|n| &mut n.kind) {
            props.insert("x", 1);
        }
        assert_ne!(before, t.digest());
    }
}
