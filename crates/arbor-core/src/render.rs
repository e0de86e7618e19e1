// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Incremental render: one node per unit, resumable across calls.
//!
//! A [`Render`] walks the committed tree with an explicit stack of frames.
//! Each unit diffs one node against its declaration (or re-evaluates it when
//! it has work in the lane) and pushes frames for the children it reconciled.
//! Nothing touches the committed tree: every result goes to append-only logs
//! (edit ops, staged node state, diagnostics) that the commit executor applies
//! in one step.
//!
//! Boundaries push a checkpoint recording the log lengths when their unit
//! starts. A suspension or an evaluation error truncates the logs back to the
//! nearest boundary that handles it and re-queues the boundary in fallback
//! mode. Nodes without work in the lane, and not redeclared by their parent,
//! are skipped unless they sit on the path to a node that has work.
//!
//! Within a lane the latest request wins: a host node redeclared by an
//! ancestor keeps its override when the override was scheduled after the
//! ancestor's declaration.
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::commit::{panic_message, Diagnostic};
use crate::component::{Component, EvalError, Evaluation};
use crate::declaration::{same_lifecycle, Declaration, Lifecycle};
use crate::hooks::{Effect, HookCell, Hooks, Rebase};
use crate::ident::{ComponentId, NodeId};
use crate::props::Props;
use crate::reconcile::{reconcile_children, EditOp, EditScript, OldChild};
use crate::scheduler::{LaneWork, Priority};
use crate::suspense::{AwaitHandle, AwaitStatus, SuspenseRecord, SuspenseState};
use crate::tree::{ErrorBoundaryRecord, Node, NodeKind, NodeTree};

/// Engine state a render reads.
pub(crate) struct RenderContext<'a> {
    pub tree: &'a NodeTree,
    pub components: &'a FxHashMap<ComponentId, Arc<dyn Component>>,
    pub updates: &'a crate::hooks::UpdateQueue,
    pub check_hook_order: bool,
}

/// Node state produced by a render and installed by the commit.
pub(crate) enum Staged {
    Create(Node),
    Hooks {
        node: NodeId,
        cell: HookCell,
    },
    Rebase(Rebase),
    Effect {
        node: NodeId,
        slot: usize,
        effect: Arc<dyn Effect>,
    },
    Lifecycle {
        node: NodeId,
        lifecycle: Option<Arc<dyn Lifecycle>>,
    },
    Suspense {
        node: NodeId,
        record: SuspenseRecord,
    },
    ErrorBoundary {
        node: NodeId,
        record: ErrorBoundaryRecord,
    },
    Subscribe {
        boundary: NodeId,
        handle: AwaitHandle,
        lane: Priority,
    },
}

#[derive(Clone, Debug)]
enum Mode {
    Primary,
    Fallback(AwaitHandle),
    Errored(EvalError),
}

#[derive(Clone, Debug)]
struct Frame {
    node: NodeId,
    /// `None` when the parent did not redeclare the node this render.
    decl: Option<Declaration>,
    /// Scheduling sequence number of the work that produced `decl`; an
    /// override recorded later replaces the declared children.
    origin: u64,
    fresh: bool,
    mode: Mode,
}

impl Frame {
    fn visit(node: NodeId) -> Self {
        Self {
            node,
            decl: None,
            origin: 0,
            fresh: false,
            mode: Mode::Primary,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Catches {
    Suspension,
    Error,
}

#[derive(Debug)]
struct Checkpoint {
    frame: Frame,
    catches: Catches,
    /// Stack height after the boundary frame was popped; the boundary's
    /// subtree is done once the stack drops back to it.
    depth: usize,
    ops: usize,
    staged: usize,
    diagnostics: usize,
    next_id: u64,
}

enum Throw {
    Suspend(AwaitHandle),
    Error(EvalError),
}

/// Outcome of one unit.
#[derive(Debug)]
pub(crate) enum Step {
    Continue,
    Complete,
    /// No enclosing boundary with a fallback.
    Suspended(AwaitHandle),
    /// No enclosing error boundary.
    Uncaught(EvalError),
}

/// Everything a finished render hands to the commit executor.
pub(crate) struct FinishedRender {
    pub lane: Priority,
    pub work: LaneWork,
    pub script: EditScript,
    pub staged: Vec<Staged>,
    pub diagnostics: Vec<Diagnostic>,
    pub next_id: u64,
    pub units: usize,
    pub started_at: Duration,
}

/// In-flight render of one lane.
pub(crate) struct Render {
    lane: Priority,
    /// Lane whose queued state updates are folded; `None` for inspection diffs.
    hook_lane: Option<Priority>,
    work: LaneWork,
    /// Nodes with work plus all their ancestors.
    path: BTreeSet<NodeId>,
    stack: Vec<Frame>,
    checkpoints: Vec<Checkpoint>,
    ops: Vec<EditOp>,
    staged: Vec<Staged>,
    diagnostics: Vec<Diagnostic>,
    next_id: u64,
    units: usize,
    started_at: Duration,
}

impl Render {
    /// Render of `lane`'s recorded work, starting at the root.
    pub(crate) fn for_lane(lane: Priority, work: LaneWork, tree: &NodeTree, now: Duration) -> Self {
        let mut path = BTreeSet::new();
        for target in work.targets() {
            if tree.contains(target) {
                path.insert(target);
                path.extend(tree.ancestors(target));
            }
        }
        debug!(lane = %lane, targets = path.len(), "render started");
        Self {
            lane,
            hook_lane: Some(lane),
            work,
            path,
            stack: vec![Frame::visit(NodeId::ROOT)],
            checkpoints: Vec::new(),
            ops: Vec::new(),
            staged: Vec::new(),
            diagnostics: Vec::new(),
            next_id: tree.next_id,
            units: 0,
            started_at: now,
        }
    }

    /// Side-effect-free diff of one committed node against `decl`.
    pub(crate) fn for_subtree(node: NodeId, decl: Declaration, tree: &NodeTree) -> Self {
        Self {
            lane: Priority::Immediate,
            hook_lane: None,
            work: LaneWork::default(),
            path: BTreeSet::new(),
            stack: vec![Frame {
                node,
                decl: Some(decl),
                origin: 0,
                fresh: false,
                mode: Mode::Primary,
            }],
            checkpoints: Vec::new(),
            ops: Vec::new(),
            staged: Vec::new(),
            diagnostics: Vec::new(),
            next_id: tree.next_id,
            units: 0,
            started_at: Duration::ZERO,
        }
    }

    pub(crate) fn lane(&self) -> Priority {
        self.lane
    }

    /// True when the render's snapshot carries replacement children for `target`.
    pub(crate) fn declares(&self, target: NodeId) -> bool {
        self.work.declarations.contains_key(&target)
    }

    /// Runs one unit.
    pub(crate) fn step(&mut self, cx: &RenderContext<'_>) -> Step {
        while self
            .checkpoints
            .last()
            .is_some_and(|c| self.stack.len() <= c.depth)
        {
            self.checkpoints.pop();
        }
        let Some(frame) = self.stack.pop() else {
            return Step::Complete;
        };
        self.units += 1;
        if let Err(throw) = self.unit(cx, &frame) {
            if let Some(step) = self.capture(throw) {
                return step;
            }
        }
        if self.stack.is_empty() {
            Step::Complete
        } else {
            Step::Continue
        }
    }

    pub(crate) fn finish(self) -> FinishedRender {
        FinishedRender {
            lane: self.lane,
            work: self.work,
            script: EditScript { ops: self.ops },
            staged: self.staged,
            diagnostics: self.diagnostics,
            next_id: self.next_id,
            units: self.units,
            started_at: self.started_at,
        }
    }

    fn unit(&mut self, cx: &RenderContext<'_>, frame: &Frame) -> Result<(), Throw> {
        let committed = cx.tree.get(frame.node);
        match (&frame.decl, committed.map(Node::kind)) {
            (Some(Declaration::Host(_)), _) | (None, Some(NodeKind::Host { .. } | NodeKind::Root)) => {
                self.host_unit(cx, frame);
                Ok(())
            }
            (Some(Declaration::Composite(_)), _) | (None, Some(NodeKind::Composite { .. })) => {
                self.composite_unit(cx, frame)
            }
            (Some(Declaration::Suspense(_)), _) | (None, Some(NodeKind::Suspense(_))) => {
                self.suspense_unit(cx, frame);
                Ok(())
            }
            (Some(Declaration::ErrorBoundary(_)), _) | (None, Some(NodeKind::ErrorBoundary(_))) => {
                self.error_boundary_unit(cx, frame);
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    fn host_unit(&mut self, cx: &RenderContext<'_>, frame: &Frame) {
        let node = frame.node;
        let newer = self
            .work
            .declarations
            .get(&node)
            .filter(|(seq, _)| *seq > frame.origin)
            .map(|(seq, children)| (*seq, children.clone()));
        if let Some(Declaration::Host(d)) = &frame.decl {
            if !frame.fresh {
                if let Some(NodeKind::Host {
                    props, lifecycle, ..
                }) = cx.tree.get(node).map(Node::kind)
                {
                    if *props != d.props {
                        self.ops.push(EditOp::Update {
                            node,
                            props: d.props.clone(),
                        });
                    }
                    if !same_lifecycle(lifecycle.as_ref(), d.lifecycle.as_ref()) {
                        self.staged.push(Staged::Lifecycle {
                            node,
                            lifecycle: d.lifecycle.clone(),
                        });
                    }
                }
            }
            let old = self.old_children(cx, node, frame.fresh);
            match newer {
                Some((seq, children)) => {
                    debug!(node = %node, seq, "override newer than redeclaration");
                    self.reconcile(node, &old, &children, seq);
                }
                None => self.reconcile(node, &old, &d.children, frame.origin),
            }
        } else if let Some((seq, children)) = newer {
            let old = self.old_children(cx, node, false);
            self.reconcile(node, &old, &children, seq);
        } else {
            self.descend(cx, node);
        }
    }

    fn composite_unit(&mut self, cx: &RenderContext<'_>, frame: &Frame) -> Result<(), Throw> {
        let node = frame.node;
        let committed = cx.tree.get(node);
        let (component_id, props): (ComponentId, &Props) = match (&frame.decl, committed.map(Node::kind)) {
            (Some(Declaration::Composite(d)), _) => (d.component, &d.props),
            (None, Some(NodeKind::Composite {
                component, props, ..
            })) => (*component, props),
            _ => return Ok(()),
        };
        let Some(component) = cx.components.get(&component_id) else {
            return Err(Throw::Error(EvalError::UnknownComponent(component_id.short())));
        };
        let committed_props = committed.and_then(Node::props);
        let own = self.work.states.contains_key(&node);
        if !frame.fresh && !own {
            let bail = frame.decl.is_none()
                || (component.is_pure() && committed_props == Some(props));
            if bail {
                debug!(node = %node, component = component.name(), "bailout");
                self.descend(cx, node);
                return Ok(());
            }
        }

        let mut hooks = Hooks::new(
            node,
            self.hook_lane,
            committed.and_then(Node::hooks),
            cx.updates,
            cx.check_hook_order,
        );
        let evaluation = catch_unwind(AssertUnwindSafe(|| component.evaluate(props, &mut hooks)))
            .map_err(|payload| {
                Throw::Error(EvalError::Failed {
                    component: component.name().to_owned(),
                    message: format!("panicked: {}", panic_message(payload.as_ref())),
                })
            })?;
        let children = match evaluation {
            Evaluation::Ready(children) => children,
            Evaluation::Pending(handle) => {
                return Err(match handle.status() {
                    AwaitStatus::Rejected(message) => Throw::Error(EvalError::Rejected(message)),
                    _ => Throw::Suspend(handle),
                });
            }
            Evaluation::Failed(message) => {
                return Err(Throw::Error(EvalError::Failed {
                    component: component.name().to_owned(),
                    message,
                }));
            }
        };
        let output = hooks.finish().map_err(Throw::Error)?;

        if !frame.fresh && committed_props != Some(props) {
            self.ops.push(EditOp::Update {
                node,
                props: props.clone(),
            });
        }
        self.staged.push(Staged::Hooks {
            node,
            cell: output.cell,
        });
        self.staged
            .extend(output.rebases.into_iter().map(Staged::Rebase));
        self.staged.extend(output.effects.into_iter().map(|e| Staged::Effect {
            node,
            slot: e.slot,
            effect: e.effect,
        }));
        let origin = self
            .work
            .states
            .get(&node)
            .map_or(frame.origin, |seq| frame.origin.max(*seq));
        let old = self.old_children(cx, node, frame.fresh);
        self.reconcile(node, &old, &children, origin);
        Ok(())
    }

    fn suspense_unit(&mut self, cx: &RenderContext<'_>, frame: &Frame) {
        let node = frame.node;
        let committed = cx.tree.get(node).and_then(Node::suspense);
        let (primary, fallback) = match (&frame.decl, committed) {
            (Some(Declaration::Suspense(d)), _) => (d.children.clone(), d.fallback.clone()),
            (None, Some(r)) => (r.primary.clone(), r.fallback.clone()),
            _ => return,
        };
        let showing = committed.is_some_and(SuspenseRecord::showing_fallback);
        match &frame.mode {
            Mode::Primary => {
                let retry = self.work.retries.contains(&node);
                let rerender = frame.fresh || frame.decl.is_some() || retry;
                if !rerender && showing {
                    self.descend(cx, node);
                    return;
                }
                if fallback.is_some() {
                    self.checkpoint(frame, Catches::Suspension);
                }
                if !rerender {
                    self.descend(cx, node);
                    return;
                }
                if !frame.fresh {
                    self.staged.push(Staged::Suspense {
                        node,
                        record: SuspenseRecord::new(primary.clone(), fallback),
                    });
                }
                let old = if showing {
                    self.delete_children(cx, node);
                    Vec::new()
                } else {
                    self.old_children(cx, node, frame.fresh)
                };
                self.reconcile(node, &old, &primary, frame.origin);
            }
            Mode::Fallback(handle) => {
                let Some(fallback) = fallback else {
                    return;
                };
                let mut record = SuspenseRecord::new(primary, Some(fallback.clone()));
                record.state = SuspenseState::Pending { lane: self.lane };
                self.staged.push(Staged::Suspense { node, record });
                self.staged.push(Staged::Subscribe {
                    boundary: node,
                    handle: handle.clone(),
                    lane: self.lane,
                });
                let old = if showing {
                    self.old_children(cx, node, false)
                } else {
                    self.delete_children(cx, node);
                    Vec::new()
                };
                self.reconcile(node, &old, &fallback, frame.origin);
            }
            Mode::Errored(_) => {}
        }
    }

    fn error_boundary_unit(&mut self, cx: &RenderContext<'_>, frame: &Frame) {
        let node = frame.node;
        let committed = cx.tree.get(node).and_then(Node::error_boundary);
        let (primary, fallback) = match (&frame.decl, committed) {
            (Some(Declaration::ErrorBoundary(d)), _) => (d.children.clone(), d.fallback.clone()),
            (None, Some(r)) => (r.primary.clone(), r.fallback.clone()),
            _ => return,
        };
        let errored = committed.is_some_and(|r| r.error.is_some());
        match &frame.mode {
            Mode::Primary => {
                let reset = self.work.resets.contains(&node);
                let changed = frame.decl.is_some()
                    && committed.is_some_and(|r| r.primary != primary || r.fallback != fallback);
                if errored && !reset && !changed {
                    self.descend(cx, node);
                    return;
                }
                self.checkpoint(frame, Catches::Error);
                if !frame.fresh && frame.decl.is_none() && !errored {
                    self.descend(cx, node);
                    return;
                }
                if errored || changed {
                    self.staged.push(Staged::ErrorBoundary {
                        node,
                        record: ErrorBoundaryRecord {
                            primary: primary.clone(),
                            fallback,
                            error: None,
                        },
                    });
                }
                let old = if errored {
                    self.delete_children(cx, node);
                    Vec::new()
                } else {
                    self.old_children(cx, node, frame.fresh)
                };
                self.reconcile(node, &old, &primary, frame.origin);
            }
            Mode::Errored(error) => {
                self.staged.push(Staged::ErrorBoundary {
                    node,
                    record: ErrorBoundaryRecord {
                        primary,
                        fallback: fallback.clone(),
                        error: Some(error.clone()),
                    },
                });
                let old = if errored {
                    self.old_children(cx, node, false)
                } else {
                    self.delete_children(cx, node);
                    Vec::new()
                };
                self.reconcile(node, &old, &fallback, frame.origin);
            }
            Mode::Fallback(_) => {}
        }
    }

    fn checkpoint(&mut self, frame: &Frame, catches: Catches) {
        self.checkpoints.push(Checkpoint {
            frame: frame.clone(),
            catches,
            depth: self.stack.len(),
            ops: self.ops.len(),
            staged: self.staged.len(),
            diagnostics: self.diagnostics.len(),
            next_id: self.next_id,
        });
    }

    /// Rewinds to the nearest boundary that handles `throw`. Returns the final
    /// step when no boundary does.
    fn capture(&mut self, throw: Throw) -> Option<Step> {
        let wanted = match throw {
            Throw::Suspend(_) => Catches::Suspension,
            Throw::Error(_) => Catches::Error,
        };
        let Some(k) = self.checkpoints.iter().rposition(|c| c.catches == wanted) else {
            return Some(match throw {
                Throw::Suspend(handle) => Step::Suspended(handle),
                Throw::Error(error) => Step::Uncaught(error),
            });
        };
        let cp = self.checkpoints.split_off(k).swap_remove(0);
        self.ops.truncate(cp.ops);
        self.staged.truncate(cp.staged);
        self.diagnostics.truncate(cp.diagnostics);
        self.stack.truncate(cp.depth);
        self.next_id = cp.next_id;

        let boundary = cp.frame.node;
        let mode = match throw {
            Throw::Suspend(handle) => {
                debug!(lane = %self.lane, boundary = %boundary, "suspended; rendering fallback");
                self.diagnostics.push(Diagnostic::Suspended { boundary });
                Mode::Fallback(handle)
            }
            Throw::Error(error) => {
                warn!(lane = %self.lane, boundary = %boundary, %error, "error boundary caught");
                self.diagnostics.push(Diagnostic::BoundaryCaught {
                    boundary,
                    error: error.clone(),
                });
                Mode::Errored(error)
            }
        };
        self.stack.push(Frame { mode, ..cp.frame });
        None
    }

    fn old_children(&self, cx: &RenderContext<'_>, node: NodeId, fresh: bool) -> Vec<OldChild> {
        if fresh {
            return Vec::new();
        }
        cx.tree
            .children(node)
            .iter()
            .filter_map(|c| cx.tree.get(*c))
            .map(|n| OldChild {
                id: n.id(),
                key: n.key().clone(),
                tag: n.tag(),
            })
            .collect()
    }

    fn delete_children(&mut self, cx: &RenderContext<'_>, node: NodeId) {
        self.ops.extend(
            cx.tree
                .children(node)
                .iter()
                .map(|c| EditOp::Delete { node: *c }),
        );
    }

    /// Visits committed children on the path to pending work.
    fn descend(&mut self, cx: &RenderContext<'_>, node: NodeId) {
        for child in cx.tree.children(node).iter().rev() {
            if self.path.contains(child) {
                self.stack.push(Frame::visit(*child));
            }
        }
    }

    fn reconcile(&mut self, parent: NodeId, old: &[OldChild], new: &[Declaration], origin: u64) {
        let mut next_id = self.next_id;
        let out = reconcile_children(parent, old, new, &mut || {
            let id = NodeId::from_raw(next_id);
            next_id += 1;
            id
        });
        self.next_id = next_id;
        for d in &out.diagnostics {
            warn!(lane = %self.lane, diagnostic = ?d, "identity diagnostic");
        }
        self.diagnostics.extend(out.diagnostics);
        self.ops.extend(out.ops);
        for (placement, decl) in out.children.into_iter().zip(new).rev() {
            if placement.fresh {
                self.staged.push(Staged::Create(Node::declared(
                    placement.id,
                    placement.key,
                    decl,
                )));
            }
            self.stack.push(Frame {
                node: placement.id,
                decl: Some(decl.clone()),
                origin,
                fresh: placement.fresh,
                mode: Mode::Primary,
            });
        }
    }
}
