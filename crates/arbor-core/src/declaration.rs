// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declarations: the immutable description of the intended tree.
//!
//! Producers build `Declaration` values and hand them to
//! [`crate::Engine::schedule_update`]; they never touch committed nodes.
//! Composite bodies are referenced through a [`ComponentId`] capability and
//! evaluated by the engine during render.
use std::sync::Arc;

use crate::commit::{CallbackContext, CallbackError};
use crate::ident::{ComponentId, Key};
use crate::props::Props;

/// Host-node lifecycle callbacks run by the commit executor.
///
/// `attached` runs parent-before-child after the structural pass; `detached`
/// runs child-before-parent when the node is destroyed. Failures are logged
/// and recorded in the commit report; they never abort the pass.
pub trait Lifecycle: Send + Sync {
    /// Node was inserted into the committed tree.
    fn attached(&self, _cx: &CallbackContext<'_>) -> Result<(), CallbackError> {
        Ok(())
    }
    /// Node props changed in a commit.
    fn updated(&self, _cx: &CallbackContext<'_>) -> Result<(), CallbackError> {
        Ok(())
    }
    /// Node is being destroyed.
    fn detached(&self, _cx: &CallbackContext<'_>) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Type tag of a node; a tag change is never treated as an update.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeTag {
    /// The engine's container node.
    Root,
    /// Host primitive of the given kind (e.g. `"view"`, `"text"`).
    Host(String),
    /// Composite evaluated by a registered component.
    Composite(ComponentId),
    /// Suspense boundary.
    Suspense,
    /// Error boundary.
    ErrorBoundary,
}

impl NodeTag {
    /// True for host primitives and the root container.
    #[must_use]
    pub fn is_host_like(&self) -> bool {
        matches!(self, Self::Root | Self::Host(_))
    }
}

/// Declared host primitive.
#[derive(Clone)]
pub struct HostDecl {
    /// Host kind understood by the renderer.
    pub kind: String,
    /// Optional explicit sibling key.
    pub key: Option<String>,
    /// Host configuration.
    pub props: Props,
    /// Declared children.
    pub children: Vec<Declaration>,
    /// Optional lifecycle callbacks.
    pub lifecycle: Option<Arc<dyn Lifecycle>>,
}

impl HostDecl {
    /// New host declaration with no key, props, or children.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: None,
            props: Props::new(),
            children: Vec::new(),
            lifecycle: None,
        }
    }

    /// Sets the explicit key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Adds one prop.
    #[must_use]
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key, value);
        self
    }

    /// Replaces all props.
    #[must_use]
    pub fn props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    /// Appends a child.
    #[must_use]
    pub fn child(mut self, child: impl Into<Declaration>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Appends children.
    #[must_use]
    pub fn children<I, D>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Declaration>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    /// Attaches lifecycle callbacks.
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }
}

impl PartialEq for HostDecl {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.key == other.key
            && self.props == other.props
            && self.children == other.children
            && same_lifecycle(self.lifecycle.as_ref(), other.lifecycle.as_ref())
    }
}

impl core::fmt::Debug for HostDecl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostDecl")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("props", &self.props)
            .field("children", &self.children)
            .field("lifecycle", &self.lifecycle.is_some())
            .finish()
    }
}

pub(crate) fn same_lifecycle(
    a: Option<&Arc<dyn Lifecycle>>,
    b: Option<&Arc<dyn Lifecycle>>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Declared composite: a component invocation with props.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeDecl {
    /// Registered component to evaluate.
    pub component: ComponentId,
    /// Optional explicit sibling key.
    pub key: Option<String>,
    /// Props passed to `evaluate`.
    pub props: Props,
}

impl CompositeDecl {
    /// New composite declaration.
    #[must_use]
    pub fn new(component: ComponentId) -> Self {
        Self {
            component,
            key: None,
            props: Props::new(),
        }
    }

    /// Sets the explicit key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Adds one prop.
    #[must_use]
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key, value);
        self
    }
}

/// Declared suspense boundary.
///
/// A boundary without a fallback does not catch suspension; the nearest
/// ancestor boundary that has one does.
#[derive(Clone, Debug, PartialEq)]
pub struct SuspenseDecl {
    /// Optional explicit sibling key.
    pub key: Option<String>,
    /// Shown while a descendant awaits a value.
    pub fallback: Option<Vec<Declaration>>,
    /// Primary content.
    pub children: Vec<Declaration>,
}

impl SuspenseDecl {
    /// Boundary with the given primary children and no fallback.
    #[must_use]
    pub fn new<I, D>(children: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Declaration>,
    {
        Self {
            key: None,
            fallback: None,
            children: children.into_iter().map(Into::into).collect(),
        }
    }

    /// Sets the fallback content.
    #[must_use]
    pub fn fallback<I, D>(mut self, fallback: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Declaration>,
    {
        self.fallback = Some(fallback.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the explicit key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Declared error boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorBoundaryDecl {
    /// Optional explicit sibling key.
    pub key: Option<String>,
    /// Rendered in place of the children after a failure below.
    pub fallback: Vec<Declaration>,
    /// Primary content.
    pub children: Vec<Declaration>,
}

impl ErrorBoundaryDecl {
    /// Boundary with the given fallback and primary children.
    #[must_use]
    pub fn new<F, C, D, E>(fallback: F, children: C) -> Self
    where
        F: IntoIterator<Item = D>,
        D: Into<Declaration>,
        C: IntoIterator<Item = E>,
        E: Into<Declaration>,
    {
        Self {
            key: None,
            fallback: fallback.into_iter().map(Into::into).collect(),
            children: children.into_iter().map(Into::into).collect(),
        }
    }

    /// Sets the explicit key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// One declared element of the intended tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Declaration {
    /// Host primitive.
    Host(HostDecl),
    /// Component invocation.
    Composite(CompositeDecl),
    /// Suspense boundary.
    Suspense(SuspenseDecl),
    /// Error boundary.
    ErrorBoundary(ErrorBoundaryDecl),
}

impl Declaration {
    /// The explicit key, if declared.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Host(d) => d.key.as_deref(),
            Self::Composite(d) => d.key.as_deref(),
            Self::Suspense(d) => d.key.as_deref(),
            Self::ErrorBoundary(d) => d.key.as_deref(),
        }
    }

    /// The type tag the declaration produces.
    #[must_use]
    pub fn tag(&self) -> NodeTag {
        match self {
            Self::Host(d) => NodeTag::Host(d.kind.clone()),
            Self::Composite(d) => NodeTag::Composite(d.component),
            Self::Suspense(_) => NodeTag::Suspense,
            Self::ErrorBoundary(_) => NodeTag::ErrorBoundary,
        }
    }

    /// True when `tag` matches without allocating.
    pub(crate) fn has_tag(&self, tag: &NodeTag) -> bool {
        match (self, tag) {
            (Self::Host(d), NodeTag::Host(kind)) => d.kind == *kind,
            (Self::Composite(d), NodeTag::Composite(id)) => d.component == *id,
            (Self::Suspense(_), NodeTag::Suspense)
            | (Self::ErrorBoundary(_), NodeTag::ErrorBoundary) => true,
            _ => false,
        }
    }

    /// Convenience: host declaration builder.
    #[must_use]
    pub fn host(kind: impl Into<String>) -> HostDecl {
        HostDecl::new(kind)
    }

    /// Convenience: composite declaration builder.
    #[must_use]
    pub fn composite(component: ComponentId) -> CompositeDecl {
        CompositeDecl::new(component)
    }

    /// Resolved sibling key: the explicit key, or the positional index.
    pub(crate) fn resolved_key(&self, index: usize) -> Key {
        self.key()
            .map_or(Key::Index(index), |k| Key::Explicit(k.to_owned()))
    }
}

impl From<HostDecl> for Declaration {
    fn from(d: HostDecl) -> Self {
        Self::Host(d)
    }
}

impl From<CompositeDecl> for Declaration {
    fn from(d: CompositeDecl) -> Self {
        Self::Composite(d)
    }
}

impl From<SuspenseDecl> for Declaration {
    fn from(d: SuspenseDecl) -> Self {
        Self::Suspense(d)
    }
}

impl From<ErrorBoundaryDecl> for Declaration {
    fn from(d: ErrorBoundaryDecl) -> Self {
        Self::ErrorBoundary(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::make_component_id;

    struct Noop;
    impl Lifecycle for Noop {}

    #[test]
    fn host_equality_compares_lifecycle_by_identity() {
        let cb: Arc<dyn Lifecycle> = Arc::new(Noop);
        let a = HostDecl::new("view").lifecycle(Arc::clone(&cb));
        let b = HostDecl::new("view").lifecycle(cb);
        let c = HostDecl::new("view").lifecycle(Arc::new(Noop));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn tags_distinguish_kinds_and_components() {
        let a: Declaration = Declaration::host("view").into();
        let b: Declaration = Declaration::host("text").into();
        let c: Declaration = Declaration::composite(make_component_id("A")).into();
        assert_ne!(a.tag(), b.tag());
        assert!(c.has_tag(&NodeTag::Composite(make_component_id("A"))));
        assert!(!c.has_tag(&NodeTag::Composite(make_component_id("B"))));
    }

    #[test]
    fn resolved_key_falls_back_to_index() {
        let keyed: Declaration = Declaration::host("li").key("k").into();
        let bare: Declaration = Declaration::host("li").into();
        assert_eq!(keyed.resolved_key(4), Key::explicit("k"));
        assert_eq!(bare.resolved_key(4), Key::Index(4));
    }
}
