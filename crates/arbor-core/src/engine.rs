// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The engine: public surface and the cooperative work loop.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::commit::{panic_message, CommitExecutor, CommitObserver, CommitReport, EffectCleanups};
use crate::component::{Component, EvalError};
use crate::config::EngineConfig;
use crate::declaration::Declaration;
use crate::hooks::{SlotKind, StateUpdate, UpdateQueue};
use crate::host::HostRenderer;
use crate::ident::{make_component_id, ComponentId, NodeId};
use crate::reconcile::{EditOp, EditScript};
use crate::render::{FinishedRender, Render, RenderContext, Step};
use crate::scheduler::{Lane, LaneState, LaneStatus, LaneWork, Lanes, Priority};
use crate::suspense::{AwaitHandle, AwaitStatus, SettleAction, SubscriptionId, Subscriptions};
use crate::tree::{NodeKind, NodeTree, TreeError};

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The node id does not name a committed node.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// The node cannot be the target of this operation.
    #[error("node {0} is not a valid target")]
    InvalidTarget(NodeId),
    /// The slot is not a state slot of the composite.
    #[error("slot {slot} of node {node} is not a state slot")]
    NotAStateSlot {
        /// Target node.
        node: NodeId,
        /// Requested slot.
        slot: usize,
    },
    /// A component with the same name is already registered.
    #[error("duplicate component name: {0}")]
    DuplicateComponentName(String),
    /// The declaration's tag differs from the node's; diffing would recreate it.
    #[error("declaration tag does not match node {0}")]
    TagMismatch(NodeId),
    /// The inspected subtree suspends outside any boundary with a fallback.
    #[error("subtree of node {0} suspends without a boundary")]
    WouldSuspend(NodeId),
    /// The inspected subtree fails outside any error boundary.
    #[error("diff failed: {0}")]
    Diff(EvalError),
    /// A render error reached the root; the tree was unmounted.
    #[error("uncaught error in lane {lane}: {error}")]
    Uncaught {
        /// Lane whose render failed.
        lane: Priority,
        /// The error.
        error: EvalError,
    },
    /// A commit referenced nodes inconsistently (engine state corruption).
    #[error("internal invariant violated: {0}")]
    Tree(#[from] TreeError),
}

/// Why a work call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WorkOutcome {
    /// No lane has work.
    #[default]
    Idle,
    /// The time or unit budget ran out with work remaining.
    Yielded,
    /// Remaining work waits for awaited values to settle.
    Waiting,
}

/// Result of one work call.
#[derive(Debug, Default)]
pub struct WorkReport {
    /// Why the call returned.
    pub outcome: WorkOutcome,
    /// Commits in the order they happened.
    pub commits: Vec<CommitReport>,
    /// Units run, including units of renders that were later discarded.
    pub units: usize,
}

#[derive(Clone, Copy, Debug)]
struct Budget {
    max_units: Option<usize>,
    deadline: Option<Duration>,
}

/// Reconciliation and scheduling engine.
///
/// Owns the committed node tree, the lanes of pending work, and the in-flight
/// render. Producers schedule work with [`Engine::schedule_update`] and
/// [`Engine::set_state`]; the host drives progress with
/// [`Engine::perform_work`], passing the renderer each call.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    tree: NodeTree,
    components: FxHashMap<ComponentId, Arc<dyn Component>>,
    lanes: Lanes,
    updates: UpdateQueue,
    subscriptions: Subscriptions,
    cleanups: EffectCleanups,
    render: Option<Render>,
    observer: Option<Arc<dyn CommitObserver>>,
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("nodes", &self.tree.len())
            .field("components", &self.components.len())
            .field("rendering", &self.render.as_ref().map(Render::lane))
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine on the system clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Engine on a caller-supplied clock.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            tree: NodeTree::new(),
            components: FxHashMap::default(),
            lanes: Lanes::default(),
            updates: UpdateQueue::default(),
            subscriptions: Subscriptions::new(),
            cleanups: EffectCleanups::new(),
            render: None,
            observer: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The committed tree.
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Committed value of a composite's state slot.
    pub fn state(&self, node: NodeId, slot: usize) -> Option<&Value> {
        self.tree.get(node)?.hooks()?.state(slot)
    }

    /// Registers a component and returns the id declarations use to invoke it.
    pub fn register_component(&mut self, component: Arc<dyn Component>) -> Result<ComponentId, EngineError> {
        let id = make_component_id(component.name());
        if self.components.contains_key(&id) {
            return Err(EngineError::DuplicateComponentName(component.name().to_owned()));
        }
        self.components.insert(id, component);
        Ok(id)
    }

    /// Installs the commit observer, replacing any previous one.
    pub fn set_commit_observer(&mut self, observer: Arc<dyn CommitObserver>) {
        self.observer = Some(observer);
    }

    /// Schedules new children for the root or a committed host node.
    ///
    /// Supersedes declarations for the same target pending in other lanes. A
    /// render of another lane already carrying that target restarts.
    #[instrument(skip(self, children), fields(children = children.len()))]
    pub fn schedule_update(
        &mut self,
        target: NodeId,
        children: Vec<Declaration>,
        priority: Priority,
    ) -> Result<(), EngineError> {
        let valid = target.is_root()
            || self
                .tree
                .get(target)
                .is_some_and(|n| matches!(n.kind(), NodeKind::Host { .. }));
        if !valid {
            return Err(if self.tree.contains(target) {
                EngineError::InvalidTarget(target)
            } else {
                EngineError::UnknownNode(target)
            });
        }
        let now = self.clock.now();
        let cancelled = self.lanes.schedule_declarations(target, children, priority, now);
        self.cancel_lanes(cancelled);
        if self
            .render
            .as_ref()
            .is_some_and(|r| r.lane() != priority && r.declares(target))
        {
            if let Some(stale) = self.render.take() {
                debug!(
                    lane = %stale.lane(),
                    target = %target,
                    by = %priority,
                    "in-flight render superseded; restarting"
                );
                self.lanes.set_state(stale.lane(), LaneState::Scheduled);
            }
        }
        self.new_work(priority);
        Ok(())
    }

    /// Queues an update for state slot `slot` of composite `node`.
    pub fn set_state(
        &mut self,
        node: NodeId,
        slot: usize,
        update: impl Into<StateUpdate>,
        priority: Priority,
    ) -> Result<(), EngineError> {
        let cell = self
            .tree
            .get(node)
            .ok_or(EngineError::UnknownNode(node))?
            .hooks()
            .ok_or(EngineError::NotAStateSlot { node, slot })?;
        if cell.kind_at(slot) != Some(SlotKind::State) {
            return Err(EngineError::NotAStateSlot { node, slot });
        }
        self.updates.push(node, slot, priority, update.into());
        self.lanes.schedule_state(node, priority, self.clock.now());
        self.new_work(priority);
        Ok(())
    }

    /// Re-renders an errored boundary's primary children.
    pub fn reset_error_boundary(&mut self, node: NodeId, priority: Priority) -> Result<(), EngineError> {
        let boundary = self.tree.get(node).ok_or(EngineError::UnknownNode(node))?;
        if boundary.error_boundary().is_none() {
            return Err(EngineError::InvalidTarget(node));
        }
        self.lanes.schedule_reset(node, priority, self.clock.now());
        self.new_work(priority);
        Ok(())
    }

    /// Calls `on_settle` (on the engine's thread, during a work call) once
    /// `handle` settles or is rejected.
    pub fn register_awaitable(
        &mut self,
        handle: AwaitHandle,
        on_settle: impl FnOnce(&AwaitStatus) + Send + 'static,
    ) -> SubscriptionId {
        self.subscriptions
            .register(handle, SettleAction::Callback(Box::new(on_settle)), None)
    }

    /// Drops a registration; returns false when it already fired.
    pub fn release_awaitable(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.release(id)
    }

    /// Snapshot of one lane.
    pub fn lane_status(&self, priority: Priority) -> LaneStatus {
        self.lanes.status(priority, &self.config, self.clock.now())
    }

    /// Side-effect-free diff of `node` against `decl`.
    ///
    /// Composite state is read as committed, without queued updates. Fresh
    /// ids are drawn from a render-local counter, so repeated calls without an
    /// intervening commit return identical scripts.
    pub fn diff_subtree(&self, node: NodeId, decl: &Declaration) -> Result<EditScript, EngineError> {
        if node.is_root() {
            return Err(EngineError::InvalidTarget(node));
        }
        let target = self.tree.get(node).ok_or(EngineError::UnknownNode(node))?;
        if !decl.has_tag(&target.tag()) {
            return Err(EngineError::TagMismatch(node));
        }
        let mut render = Render::for_subtree(node, decl.clone(), &self.tree);
        let cx = RenderContext {
            tree: &self.tree,
            components: &self.components,
            updates: &self.updates,
            check_hook_order: self.config.check_hook_order,
        };
        loop {
            match render.step(&cx) {
                Step::Continue => {}
                Step::Complete => return Ok(render.finish().script),
                Step::Suspended(_) => return Err(EngineError::WouldSuspend(node)),
                Step::Uncaught(error) => return Err(EngineError::Diff(error)),
            }
        }
    }

    /// Runs work until the frame budget elapses, the optional unit cap is
    /// reached, or nothing is runnable.
    #[instrument(skip(self, host))]
    pub fn perform_work(&mut self, host: &mut dyn HostRenderer) -> Result<WorkReport, EngineError> {
        let budget = Budget {
            max_units: self.config.max_units_per_slice,
            deadline: Some(self.clock.now() + self.config.frame_budget()),
        };
        self.run(host, budget)
    }

    /// Runs at most `units` units regardless of elapsed time.
    #[instrument(skip(self, host))]
    pub fn perform_units(&mut self, host: &mut dyn HostRenderer, units: usize) -> Result<WorkReport, EngineError> {
        self.run(
            host,
            Budget {
                max_units: Some(units),
                deadline: None,
            },
        )
    }

    /// Runs until nothing is runnable.
    #[instrument(skip(self, host))]
    pub fn flush(&mut self, host: &mut dyn HostRenderer) -> Result<WorkReport, EngineError> {
        self.run(
            host,
            Budget {
                max_units: None,
                deadline: None,
            },
        )
    }

    fn run(&mut self, host: &mut dyn HostRenderer, budget: Budget) -> Result<WorkReport, EngineError> {
        let mut report = WorkReport::default();
        loop {
            self.drain_settlements();
            let now = self.clock.now();
            let current = self.render.as_ref().map(Render::lane);
            let Some(lane) = self.lanes.next_runnable(current, &self.config, now) else {
                self.render = None;
                report.outcome = if self.lanes.any_blocked() {
                    WorkOutcome::Waiting
                } else {
                    WorkOutcome::Idle
                };
                return Ok(report);
            };

            let exhausted = budget.max_units.is_some_and(|max| report.units >= max)
                || (report.units > 0 && budget.deadline.is_some_and(|d| now >= d));
            if exhausted {
                debug!(units = report.units, "budget exhausted; yielding");
                report.outcome = WorkOutcome::Yielded;
                return Ok(report);
            }

            if current != Some(lane) {
                if let Some(previous) = current {
                    debug!(lane = %previous, by = %lane, "render interrupted");
                    self.lanes.interrupted(previous);
                }
                let work = self.lanes.snapshot(lane);
                self.render = Some(Render::for_lane(lane, work, &self.tree, now));
                self.lanes.set_state(lane, LaneState::InProgress);
            }

            let Some(render) = self.render.as_mut() else {
                continue;
            };
            let cx = RenderContext {
                tree: &self.tree,
                components: &self.components,
                updates: &self.updates,
                check_hook_order: self.config.check_hook_order,
            };
            let step = render.step(&cx);
            report.units += 1;
            match step {
                Step::Continue => {}
                Step::Complete => {
                    if let Some(render) = self.render.take() {
                        let commit = self.commit(render.finish(), host)?;
                        report.commits.push(commit);
                    }
                }
                Step::Suspended(handle) => self.block_lane(lane, handle),
                Step::Uncaught(error) => return Err(self.unmount(lane, error, host)),
            }
        }
    }

    fn commit(&mut self, mut finished: FinishedRender, host: &mut dyn HostRenderer) -> Result<CommitReport, EngineError> {
        let lane = finished.lane;
        let work = std::mem::take(&mut finished.work);
        self.lanes.set_state(lane, LaneState::Completed);
        self.lanes.set_state(lane, LaneState::Committing);
        let interruptions = self.lanes.interruptions(lane);
        let committed = CommitExecutor {
            tree: &mut self.tree,
            updates: &mut self.updates,
            subscriptions: &mut self.subscriptions,
            cleanups: &mut self.cleanups,
        }
        .run(finished, interruptions, host, self.clock.as_ref())?;
        self.lanes.committed(lane, &work, self.clock.now());
        for node in &committed.deleted {
            let cancelled = self.lanes.release_node(*node);
            self.cancel_lanes(cancelled);
        }
        self.notify_observer(&committed.report);
        Ok(committed.report)
    }

    fn notify_observer(&self, report: &CommitReport) {
        let Some(observer) = &self.observer else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| observer.on_commit(report.lane, &report.metrics))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(lane = %report.lane, error = %e, "commit observer failed"),
            Err(payload) => warn!(
                lane = %report.lane,
                panic = %panic_message(payload.as_ref()),
                "commit observer panicked"
            ),
        }
    }

    /// Defers the lane's commit until `handle` settles.
    fn block_lane(&mut self, lane: Priority, handle: AwaitHandle) {
        self.render = None;
        let id = self
            .subscriptions
            .register(handle, SettleAction::Unblock { lane }, None);
        if let Some(previous) = self.lanes.block(lane, id) {
            self.subscriptions.release(previous);
        }
        debug!(lane = %lane, subscription = id.value(), "lane blocked on awaited value");
    }

    /// Unmounts every child of the root after an uncaught render error.
    fn unmount(&mut self, lane: Priority, error: EvalError, host: &mut dyn HostRenderer) -> EngineError {
        error!(lane = %lane, %error, "uncaught render error; unmounting tree");
        self.render = None;
        self.lanes.discard(lane);
        let ops = self
            .tree
            .children(NodeId::ROOT)
            .iter()
            .map(|c| EditOp::Delete { node: *c })
            .collect();
        let finished = FinishedRender {
            lane,
            work: LaneWork::default(),
            script: EditScript { ops },
            staged: Vec::new(),
            diagnostics: Vec::new(),
            next_id: self.tree.next_id,
            units: 0,
            started_at: self.clock.now(),
        };
        if let Err(e) = self.commit(finished, host) {
            return e;
        }
        EngineError::Uncaught { lane, error }
    }

    /// New work in `lane`: a render of that lane restarts, and a block on an
    /// awaited value is lifted so the new work gets rendered.
    fn new_work(&mut self, lane: Priority) {
        if self.render.as_ref().is_some_and(|r| r.lane() == lane) {
            debug!(lane = %lane, "new work; restarting render");
            self.render = None;
        }
        if let Some(id) = self.lanes.clear_block(lane) {
            self.subscriptions.release(id);
        }
    }

    fn cancel_lanes(&mut self, cancelled: Vec<Lane>) {
        for lane in cancelled {
            warn!(lane = %lane.priority, "lane cancelled; no work left");
            if let Some(id) = lane.blocked_on {
                self.subscriptions.release(id);
            }
            if self.render.as_ref().is_some_and(|r| r.lane() == lane.priority) {
                self.render = None;
            }
        }
    }

    fn drain_settlements(&mut self) {
        let settled = self.subscriptions.drain_settled();
        if settled.is_empty() {
            return;
        }
        let now = self.clock.now();
        for (id, sub) in settled {
            match sub.action {
                SettleAction::Retry { boundary, lane } => {
                    if self.tree.contains(boundary) {
                        debug!(lane = %lane, boundary = %boundary, "awaited value settled; retrying");
                        self.lanes.schedule_retry(boundary, lane, now);
                        self.new_work(lane);
                    }
                }
                SettleAction::Unblock { lane } => {
                    debug!(lane = %lane, "awaited value settled; unblocking");
                    self.lanes.unblock(lane, id);
                }
                SettleAction::Callback(on_settle) => {
                    let status = sub.handle.status();
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| on_settle(&status))) {
                        warn!(
                            subscription = id.value(),
                            panic = %panic_message(payload.as_ref()),
                            "settle callback panicked"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::component::Evaluation;
    use crate::declaration::HostDecl;
    use crate::hooks::Hooks;
    use crate::host::HostTree;
    use crate::props::Props;

    struct Label;

    impl Component for Label {
        fn name(&self) -> &str {
            "Label"
        }

        fn evaluate(&self, props: &Props, _hooks: &mut Hooks<'_>) -> Evaluation {
            let text = props.get_str("text").unwrap_or_default().to_owned();
            Evaluation::ready([HostDecl::new("text").prop("value", text)])
        }
    }

    fn engine() -> Engine {
        Engine::with_clock(EngineConfig::default(), Arc::new(ManualClock::new()))
    }

    #[test]
    fn duplicate_component_names_are_rejected() {
        let mut e = engine();
        e.register_component(Arc::new(Label)).unwrap();
        assert!(matches!(
            e.register_component(Arc::new(Label)),
            Err(EngineError::DuplicateComponentName(_))
        ));
    }

    #[test]
    fn schedule_update_rejects_non_host_targets() {
        let mut e = engine();
        let mut host = HostTree::new();
        let label = e.register_component(Arc::new(Label)).unwrap();
        e.schedule_update(
            NodeId::ROOT,
            vec![Declaration::composite(label).prop("text", "hi").into()],
            Priority::Normal,
        )
        .unwrap();
        e.flush(&mut host).unwrap();
        let composite = e.tree().children(NodeId::ROOT)[0];
        assert!(matches!(
            e.schedule_update(composite, vec![], Priority::Normal),
            Err(EngineError::InvalidTarget(_))
        ));
        assert!(matches!(
            e.schedule_update(NodeId::from_raw(999), vec![], Priority::Normal),
            Err(EngineError::UnknownNode(_))
        ));
    }

    #[test]
    fn diff_subtree_rejects_root_and_tag_changes() {
        let mut e = engine();
        let mut host = HostTree::new();
        e.schedule_update(NodeId::ROOT, vec![HostDecl::new("view").into()], Priority::Normal)
            .unwrap();
        e.flush(&mut host).unwrap();
        let view = e.tree().children(NodeId::ROOT)[0];
        let other: Declaration = HostDecl::new("text").into();
        assert!(matches!(
            e.diff_subtree(NodeId::ROOT, &other),
            Err(EngineError::InvalidTarget(_))
        ));
        assert!(matches!(e.diff_subtree(view, &other), Err(EngineError::TagMismatch(_))));
    }

    #[test]
    fn flush_on_an_idle_engine_does_nothing() {
        let mut e = engine();
        let mut host = HostTree::new();
        let report = e.flush(&mut host).unwrap();
        assert_eq!(report.outcome, WorkOutcome::Idle);
        assert!(report.commits.is_empty());
        assert_eq!(host.batches(), 0);
    }
}
