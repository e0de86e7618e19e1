// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Composite components and evaluation results.
use thiserror::Error;

use crate::declaration::Declaration;
use crate::hooks::{Hooks, SlotKind};
use crate::ident::NodeId;
use crate::props::Props;
use crate::suspense::AwaitHandle;

/// Body of a composite node.
///
/// Registered once with [`crate::Engine::register_component`]; declarations
/// refer to it by the returned [`crate::ComponentId`]. `evaluate` must be
/// deterministic in `props` and hook state and must not touch the engine: a
/// render may be discarded and re-run at any unit boundary.
pub trait Component: Send + Sync {
    /// Unique name; the component id is derived from it.
    fn name(&self) -> &str;

    /// Pure components are skipped when redeclared with equal props and no
    /// pending state in the rendering lane.
    fn is_pure(&self) -> bool {
        false
    }

    /// Produces the declared children, or reports that a value is not ready.
    fn evaluate(&self, props: &Props, hooks: &mut Hooks<'_>) -> Evaluation;
}

/// Outcome of [`Component::evaluate`].
#[derive(Debug, Clone)]
pub enum Evaluation {
    /// Children to reconcile.
    Ready(Vec<Declaration>),
    /// A value is not available yet; the nearest suspense boundary with a
    /// fallback takes over until the handle settles.
    Pending(AwaitHandle),
    /// Evaluation failed; the nearest error boundary takes over.
    Failed(String),
}

impl Evaluation {
    /// Ready with the given children.
    pub fn ready<I, D>(children: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Declaration>,
    {
        Self::Ready(children.into_iter().map(Into::into).collect())
    }

    /// Failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised while evaluating a subtree. Caught by the nearest error
/// boundary; fatal to the tree when there is none.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The component returned [`Evaluation::Failed`] or panicked.
    #[error("component {component} failed: {message}")]
    Failed {
        /// Component name.
        component: String,
        /// Failure message.
        message: String,
    },
    /// The slot kinds requested differ from the previous evaluation.
    #[error("hook order changed on node {node} at slot {slot}: expected {expected:?}, found {found:?}")]
    HookOrder {
        /// Offending node.
        node: NodeId,
        /// First slot that differs.
        slot: usize,
        /// Kind recorded by the previous evaluation (`None`: no slot there).
        expected: Option<SlotKind>,
        /// Kind requested now (`None`: evaluation stopped short).
        found: Option<SlotKind>,
    },
    /// An awaited value was rejected.
    #[error("awaited value rejected: {0}")]
    Rejected(String),
    /// A declaration referenced a component that is not registered.
    #[error("component {0} is not registered")]
    UnknownComponent(String),
}
