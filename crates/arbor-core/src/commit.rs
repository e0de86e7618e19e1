// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Commit executor: the only writer of the node tree and the host.
//!
//! A commit is synchronous and never interrupted. It runs in three phases:
//!
//! 1. **Structure.** Staged node creations are installed, then the edit
//!    script is applied in emission order. Host operations are derived as
//!    each op lands (against the nearest host ancestor and the next host
//!    sibling at that moment) and handed to the renderer as one batch.
//! 2. **Detach.** Every destroyed subtree, children before parents: effect
//!    cleanups, [`Lifecycle::detached`], release of subscriptions and queued
//!    state.
//! 3. **Attach.** Inserted and updated nodes in pre-order (parents before
//!    children): [`Lifecycle::attached`] or [`Lifecycle::updated`], then
//!    effects staged by the render.
//!
//! Callback failures and panics are logged and recorded in the
//! [`CommitReport`]; the pass always runs to the end and structural changes
//! are never rolled back.
//!
//! [`Lifecycle::detached`]: crate::Lifecycle::detached
//! [`Lifecycle::attached`]: crate::Lifecycle::attached
//! [`Lifecycle::updated`]: crate::Lifecycle::updated
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use crate::clock::Clock;
use crate::component::EvalError;
use crate::declaration::NodeTag;
use crate::engine::EngineError;
use crate::hooks::{Cleanup, Effect, UpdateQueue};
use crate::host::{HostError, HostOp, HostRenderer};
use crate::ident::NodeId;
use crate::props::Props;
use crate::reconcile::{EditOp, EditScript};
use crate::render::{FinishedRender, Staged};
use crate::scheduler::Priority;
use crate::suspense::{SettleAction, SuspenseState, Subscriptions};
use crate::tree::{Node, NodeKind, NodeTree};

/// What a callback sees of its node.
#[derive(Debug)]
pub struct CallbackContext<'a> {
    /// Node the callback belongs to.
    pub node: NodeId,
    /// Node tag.
    pub tag: NodeTag,
    /// Committed props (host and composite nodes).
    pub props: Option<&'a Props>,
}

/// Error returned by lifecycle callbacks, effects, and observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    /// Error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Which callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    /// `Lifecycle::attached`.
    Attached,
    /// `Lifecycle::updated`.
    Updated,
    /// `Lifecycle::detached`.
    Detached,
    /// An effect body.
    Effect,
    /// An effect cleanup.
    Cleanup,
}

/// A callback failure isolated to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    /// Owning node.
    pub node: NodeId,
    /// Failing callback.
    pub phase: CallbackPhase,
    /// Error text or panic message.
    pub message: String,
}

/// Non-fatal conditions found while rendering a lane.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Explicit key repeated among siblings; the repeat was paired by position.
    DuplicateKey {
        /// Parent of the sibling list.
        parent: NodeId,
        /// Repeated key.
        key: String,
        /// Declaration index of the repeat.
        index: usize,
    },
    /// Empty explicit key; paired by position.
    MalformedKey {
        /// Parent of the sibling list.
        parent: NodeId,
        /// Declaration index.
        index: usize,
    },
    /// An error boundary caught a failure and renders its fallback.
    BoundaryCaught {
        /// Boundary node.
        boundary: NodeId,
        /// Caught error.
        error: EvalError,
    },
    /// A suspense boundary shows its fallback until a value settles.
    Suspended {
        /// Boundary node.
        boundary: NodeId,
    },
}

/// Timing and size of one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitMetrics {
    /// Render units spent on the committed render (restarts excluded).
    pub units: usize,
    /// Times the lane was interrupted before this commit.
    pub interruptions: u32,
    /// Time from render start to commit start.
    pub render_time: Duration,
    /// Time spent in the commit.
    pub commit_time: Duration,
    /// Edit ops applied.
    pub ops: usize,
    /// Host ops emitted.
    pub host_ops: usize,
}

/// Result of one commit.
#[derive(Debug, Clone)]
pub struct CommitReport {
    /// Committed lane.
    pub lane: Priority,
    /// Applied edit script.
    pub script: EditScript,
    /// Host batch handed to the renderer.
    pub host_ops: Vec<HostOp>,
    /// Render diagnostics.
    pub diagnostics: Vec<Diagnostic>,
    /// Isolated callback failures.
    pub callback_failures: Vec<CallbackFailure>,
    /// Measurements.
    pub metrics: CommitMetrics,
    /// Error reported by the renderer for the batch, if any.
    pub host_error: Option<HostError>,
}

/// Profiling hook notified after every commit.
///
/// Called synchronously on the engine's thread and must return promptly.
/// Errors and panics are caught and logged.
pub trait CommitObserver: Send + Sync {
    /// Called once per commit.
    fn on_commit(&self, lane: Priority, metrics: &CommitMetrics) -> Result<(), CallbackError>;
}

impl<F> CommitObserver for F
where
    F: Fn(Priority, &CommitMetrics) -> Result<(), CallbackError> + Send + Sync,
{
    fn on_commit(&self, lane: Priority, metrics: &CommitMetrics) -> Result<(), CallbackError> {
        self(lane, metrics)
    }
}

/// Live effect cleanups keyed by `(node, slot)`.
pub(crate) type EffectCleanups = BTreeMap<(NodeId, usize), Cleanup>;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Runs one callback, isolating errors and panics.
fn guarded<T>(
    node: NodeId,
    phase: CallbackPhase,
    failures: &mut Vec<CallbackFailure>,
    f: impl FnOnce() -> Result<T, CallbackError>,
) -> Option<T> {
    let message = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => return Some(v),
        Ok(Err(e)) => e.0,
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    error!(node = %node, ?phase, %message, "callback failed");
    failures.push(CallbackFailure {
        node,
        phase,
        message,
    });
    None
}

pub(crate) struct Committed {
    pub report: CommitReport,
    /// Ids of destroyed nodes, children before parents.
    pub deleted: Vec<NodeId>,
}

/// Mutable engine state a commit writes.
pub(crate) struct CommitExecutor<'a> {
    pub tree: &'a mut NodeTree,
    pub updates: &'a mut UpdateQueue,
    pub subscriptions: &'a mut Subscriptions,
    pub cleanups: &'a mut EffectCleanups,
}

impl CommitExecutor<'_> {
    pub(crate) fn run(
        self,
        render: FinishedRender,
        interruptions: u32,
        host: &mut dyn HostRenderer,
        clock: &dyn Clock,
    ) -> Result<Committed, EngineError> {
        let Self {
            tree,
            updates,
            subscriptions,
            cleanups,
        } = self;
        let started = clock.now();
        let FinishedRender {
            lane,
            script,
            staged,
            diagnostics,
            next_id,
            units,
            started_at,
            ..
        } = render;

        // Phase 1: structure.
        let mut fresh: BTreeSet<NodeId> = BTreeSet::new();
        let mut rest = Vec::with_capacity(staged.len());
        for s in staged {
            match s {
                Staged::Create(node) => {
                    fresh.insert(node.id());
                    tree.insert_detached(node)?;
                }
                other => rest.push(other),
            }
        }

        let mut host_ops: Vec<HostOp> = Vec::new();
        let mut graveyard: Vec<Node> = Vec::new();
        let mut updated: BTreeSet<NodeId> = BTreeSet::new();
        for op in &script.ops {
            match op {
                EditOp::Insert {
                    node,
                    parent,
                    before,
                } => {
                    tree.place(*node, *parent, *before)?;
                    if let Some(NodeKind::Host { kind, props, .. }) = tree.get(*node).map(Node::kind) {
                        host_ops.push(HostOp::Create {
                            node: *node,
                            kind: kind.clone(),
                            props: props.clone(),
                        });
                        host_ops.push(HostOp::Insert {
                            node: *node,
                            parent: tree.host_parent(*node),
                            before: tree.next_host_sibling(*node),
                        });
                    }
                }
                EditOp::Move {
                    node,
                    parent,
                    before,
                } => {
                    tree.place(*node, *parent, *before)?;
                    let host_parent = tree.host_parent(*node);
                    let anchor = tree.next_host_sibling(*node);
                    for h in tree.host_roots(*node) {
                        host_ops.push(HostOp::Insert {
                            node: h,
                            parent: host_parent,
                            before: anchor,
                        });
                    }
                }
                EditOp::Update { node, props } => {
                    let Some(target) = tree.get_mut(*node) else {
                        return Err(EngineError::UnknownNode(*node));
                    };
                    match &mut target.kind {
                        NodeKind::Host { props: p, .. } => {
                            p.clone_from(props);
                            host_ops.push(HostOp::SetConfig {
                                node: *node,
                                props: props.clone(),
                            });
                        }
                        NodeKind::Composite { props: p, .. } => p.clone_from(props),
                        _ => {}
                    }
                    updated.insert(*node);
                }
                EditOp::Delete { node } => {
                    for h in tree.host_roots(*node) {
                        host_ops.push(HostOp::Remove { node: h });
                    }
                    graveyard.extend(tree.remove_subtree(*node)?);
                }
            }
        }

        let host_error = if host_ops.is_empty() {
            None
        } else {
            host.apply(&host_ops).err()
        };
        if let Some(e) = &host_error {
            error!(lane = %lane, error = %e, "host rejected commit batch");
        }

        let mut effects: BTreeMap<NodeId, Vec<(usize, Arc<dyn Effect>)>> = BTreeMap::new();
        for s in rest {
            match s {
                Staged::Create(_) => {}
                Staged::Hooks { node, cell } => {
                    if let Some(NodeKind::Composite { hooks, .. }) =
                        tree.get_mut(node).map(|n| &mut n.kind)
                    {
                        *hooks = cell;
                    }
                }
                Staged::Rebase(r) => updates.apply_rebase(r),
                Staged::Effect { node, slot, effect } => {
                    effects.entry(node).or_default().push((slot, effect));
                }
                Staged::Lifecycle { node, lifecycle } => {
                    if let Some(NodeKind::Host { lifecycle: l, .. }) =
                        tree.get_mut(node).map(|n| &mut n.kind)
                    {
                        *l = lifecycle;
                    }
                }
                Staged::Suspense { node, record } => {
                    if let Some(NodeKind::Suspense(current)) = tree.get_mut(node).map(|n| &mut n.kind) {
                        if let Some(old) = current.subscription.take() {
                            subscriptions.release(old);
                        }
                        *current = record;
                    }
                }
                Staged::ErrorBoundary { node, record } => {
                    if let Some(NodeKind::ErrorBoundary(current)) =
                        tree.get_mut(node).map(|n| &mut n.kind)
                    {
                        *current = record;
                    }
                }
                Staged::Subscribe {
                    boundary,
                    handle,
                    lane: origin,
                } => {
                    if let Some(NodeKind::Suspense(record)) =
                        tree.get_mut(boundary).map(|n| &mut n.kind)
                    {
                        let id = subscriptions.register(
                            handle.clone(),
                            SettleAction::Retry {
                                boundary,
                                lane: origin,
                            },
                            Some(boundary),
                        );
                        record.subscription = Some(id);
                        record.awaiting = Some(handle);
                        record.state = SuspenseState::FallbackDisplayed { lane: origin };
                    }
                }
            }
        }
        tree.next_id = tree.next_id.max(next_id);

        // Phase 2: detach, children before parents.
        let mut failures = Vec::new();
        let mut deleted = Vec::with_capacity(graveyard.len());
        for node in &graveyard {
            let id = node.id();
            deleted.push(id);
            let slots: Vec<(NodeId, usize)> = cleanups
                .range((id, 0)..=(id, usize::MAX))
                .map(|(k, _)| *k)
                .collect();
            for key in slots {
                if let Some(cleanup) = cleanups.remove(&key) {
                    guarded(id, CallbackPhase::Cleanup, &mut failures, cleanup);
                }
            }
            if let Some(lifecycle) = node.lifecycle() {
                let cx = CallbackContext {
                    node: id,
                    tag: node.tag(),
                    props: node.props(),
                };
                guarded(id, CallbackPhase::Detached, &mut failures, || {
                    lifecycle.detached(&cx)
                });
            }
            subscriptions.release_owner(id);
            updates.release(id);
        }

        // Phase 3: attach, pre-order.
        let mut attach: Vec<NodeId> = fresh
            .iter()
            .chain(&updated)
            .chain(effects.keys())
            .copied()
            .filter(|id| tree.contains(*id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        attach.sort_by_cached_key(|id| tree.preorder_key(*id));
        let tree: &NodeTree = tree;
        for id in attach {
            let Some(node) = tree.get(id) else {
                continue;
            };
            let cx = CallbackContext {
                node: id,
                tag: node.tag(),
                props: node.props(),
            };
            if let Some(lifecycle) = node.lifecycle() {
                if fresh.contains(&id) {
                    guarded(id, CallbackPhase::Attached, &mut failures, || {
                        lifecycle.attached(&cx)
                    });
                } else if updated.contains(&id) {
                    guarded(id, CallbackPhase::Updated, &mut failures, || {
                        lifecycle.updated(&cx)
                    });
                }
            }
            for (slot, effect) in effects.remove(&id).unwrap_or_default() {
                if let Some(cleanup) = cleanups.remove(&(id, slot)) {
                    guarded(id, CallbackPhase::Cleanup, &mut failures, cleanup);
                }
                if let Some(Some(cleanup)) =
                    guarded(id, CallbackPhase::Effect, &mut failures, || effect.run(&cx))
                {
                    cleanups.insert((id, slot), cleanup);
                }
            }
        }

        let commit_time = clock.now().saturating_sub(started);
        let metrics = CommitMetrics {
            units,
            interruptions,
            render_time: started.saturating_sub(started_at),
            commit_time,
            ops: script.len(),
            host_ops: host_ops.len(),
        };
        info!(
            lane = %lane,
            ops = metrics.ops,
            host_ops = metrics.host_ops,
            units,
            deleted = deleted.len(),
            failures = failures.len(),
            "commit"
        );
        Ok(Committed {
            report: CommitReport {
                lane,
                script,
                host_ops,
                diagnostics,
                callback_failures: failures,
                metrics,
                host_error,
            },
            deleted,
        })
    }
}
