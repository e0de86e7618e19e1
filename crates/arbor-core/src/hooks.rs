// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hook cells: per-node state slots indexed by call order.
//!
//! A composite's `evaluate` receives a [`Hooks`] cursor. Every `use_*` call
//! claims the next slot; the kinds claimed form the node's fingerprint, which
//! must not change between evaluations. The cursor only reads the committed
//! [`HookCell`] and builds a replacement that the commit installs, so a
//! discarded render leaves no trace.
//!
//! State updates are queued per `(node, slot)` with the lane they were
//! scheduled in. A render folds the queue from the slot's base value and skips
//! updates from other lanes; the first skipped update pins the new base and
//! everything after it stays queued, so each update is applied exactly once to
//! the final value no matter which lane commits first.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::commit::{CallbackContext, CallbackError};
use crate::component::EvalError;
use crate::ident::NodeId;
use crate::scheduler::Priority;

/// Kind of a hook slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// `use_state`.
    State,
    /// `use_memo`.
    Memo,
    /// `use_effect`.
    Effect,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SlotValue {
    State { base: Value, current: Value },
    Memo { deps: Vec<Value>, value: Value },
    Effect { deps: Option<Vec<Value>> },
}

impl SlotValue {
    const fn kind(&self) -> SlotKind {
        match self {
            Self::State { .. } => SlotKind::State,
            Self::Memo { .. } => SlotKind::Memo,
            Self::Effect { .. } => SlotKind::Effect,
        }
    }
}

/// Committed hook slots of one composite node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HookCell {
    slots: Vec<SlotValue>,
}

impl HookCell {
    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the component uses no hooks.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot kinds in call order.
    pub fn fingerprint(&self) -> Vec<SlotKind> {
        self.slots.iter().map(SlotValue::kind).collect()
    }

    /// Committed value of a state slot.
    pub fn state(&self, slot: usize) -> Option<&Value> {
        match self.slots.get(slot) {
            Some(SlotValue::State { current, .. }) => Some(current),
            _ => None,
        }
    }

    pub(crate) fn kind_at(&self, slot: usize) -> Option<SlotKind> {
        self.slots.get(slot).map(SlotValue::kind)
    }
}

/// A queued state change.
#[derive(Clone)]
pub enum StateUpdate {
    /// Replace the value.
    Set(Value),
    /// Derive the next value from the previous one.
    Map(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
}

impl StateUpdate {
    /// Functional update.
    pub fn map(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self::Map(Arc::new(f))
    }

    fn apply(&self, previous: &Value) -> Value {
        match self {
            Self::Set(v) => v.clone(),
            Self::Map(f) => f(previous),
        }
    }
}

impl From<Value> for StateUpdate {
    fn from(value: Value) -> Self {
        Self::Set(value)
    }
}

impl core::fmt::Debug for StateUpdate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Set(v) => f.debug_tuple("Set").field(v).finish(),
            Self::Map(_) => f.write_str("Map(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct QueuedUpdate {
    seq: u64,
    /// `None` once a render has folded the update in; such entries replay in
    /// every lane.
    lane: Option<Priority>,
    update: StateUpdate,
}

/// Result of folding one slot's queue in a render, applied at commit.
#[derive(Clone, Debug)]
pub(crate) struct Rebase {
    pub node: NodeId,
    pub slot: usize,
    retained: Vec<QueuedUpdate>,
    consumed_upto: u64,
}

/// Pending state updates for every `(node, slot)`.
#[derive(Debug, Default)]
pub(crate) struct UpdateQueue {
    next_seq: u64,
    pending: BTreeMap<(NodeId, usize), Vec<QueuedUpdate>>,
}

impl UpdateQueue {
    pub(crate) fn push(&mut self, node: NodeId, slot: usize, lane: Priority, update: StateUpdate) {
        self.next_seq += 1;
        self.pending
            .entry((node, slot))
            .or_default()
            .push(QueuedUpdate {
                seq: self.next_seq,
                lane: Some(lane),
                update,
            });
    }

    /// Folds the queue for one slot starting at `base`.
    ///
    /// Returns `(value, new_base, rebase)`; `rebase` is `None` when nothing was
    /// queued. `lane == None` folds nothing and reports the committed value.
    fn fold(
        &self,
        node: NodeId,
        slot: usize,
        base: &Value,
        current: &Value,
        lane: Option<Priority>,
    ) -> (Value, Value, Option<Rebase>) {
        let Some(lane) = lane else {
            return (current.clone(), base.clone(), None);
        };
        let Some(queue) = self.pending.get(&(node, slot)).filter(|q| !q.is_empty()) else {
            return (current.clone(), base.clone(), None);
        };
        let mut value = base.clone();
        let mut new_base: Option<Value> = None;
        let mut retained = Vec::new();
        let mut consumed_upto = 0;
        for entry in queue {
            consumed_upto = entry.seq;
            let included = entry.lane.is_none_or(|l| l == lane);
            if included {
                value = entry.update.apply(&value);
                if new_base.is_some() {
                    retained.push(QueuedUpdate {
                        lane: None,
                        ..entry.clone()
                    });
                }
            } else {
                if new_base.is_none() {
                    new_base = Some(value.clone());
                }
                retained.push(entry.clone());
            }
        }
        let new_base = new_base.unwrap_or_else(|| value.clone());
        let rebase = Rebase {
            node,
            slot,
            retained,
            consumed_upto,
        };
        (value, new_base, Some(rebase))
    }

    /// Installs a committed fold: retained entries plus anything that arrived
    /// after the render read the queue.
    pub(crate) fn apply_rebase(&mut self, rebase: Rebase) {
        let key = (rebase.node, rebase.slot);
        let later: Vec<QueuedUpdate> = self
            .pending
            .remove(&key)
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.seq > rebase.consumed_upto)
            .collect();
        let mut next = rebase.retained;
        next.extend(later);
        if !next.is_empty() {
            self.pending.insert(key, next);
        }
    }

    /// Drops every queued update for a destroyed node.
    pub(crate) fn release(&mut self, node: NodeId) {
        self.pending.retain(|(n, _), _| *n != node);
    }

    pub(crate) fn has_pending(&self, node: NodeId) -> bool {
        self.pending
            .range((node, 0)..=(node, usize::MAX))
            .any(|(_, q)| !q.is_empty())
    }
}

/// Cleanup returned by an effect; runs before the effect re-runs and when the
/// node is destroyed.
pub type Cleanup = Box<dyn FnOnce() -> Result<(), CallbackError> + Send>;

/// Side effect run by the commit executor after the node is attached.
pub trait Effect: Send + Sync {
    /// Runs the effect.
    fn run(&self, cx: &CallbackContext<'_>) -> Result<Option<Cleanup>, CallbackError>;
}

impl<F> Effect for F
where
    F: Fn(&CallbackContext<'_>) -> Result<Option<Cleanup>, CallbackError> + Send + Sync,
{
    fn run(&self, cx: &CallbackContext<'_>) -> Result<Option<Cleanup>, CallbackError> {
        self(cx)
    }
}

pub(crate) struct StagedEffect {
    pub slot: usize,
    pub effect: Arc<dyn Effect>,
}

pub(crate) struct HookOutput {
    pub cell: HookCell,
    pub effects: Vec<StagedEffect>,
    pub rebases: Vec<Rebase>,
}

/// Hook cursor handed to [`crate::Component::evaluate`].
pub struct Hooks<'a> {
    node: NodeId,
    lane: Option<Priority>,
    previous: Option<&'a HookCell>,
    queue: &'a UpdateQueue,
    check_order: bool,
    next: HookCell,
    effects: Vec<StagedEffect>,
    rebases: Vec<Rebase>,
    violation: Option<EvalError>,
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(
        node: NodeId,
        lane: Option<Priority>,
        previous: Option<&'a HookCell>,
        queue: &'a UpdateQueue,
        check_order: bool,
    ) -> Self {
        Self {
            node,
            lane,
            previous,
            queue,
            check_order,
            next: HookCell::default(),
            effects: Vec::new(),
            rebases: Vec::new(),
            violation: None,
        }
    }

    /// Node being evaluated; pass it to [`crate::Engine::set_state`].
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Index the next `use_*` call will claim.
    pub fn cursor(&self) -> usize {
        self.next.slots.len()
    }

    /// Previous slot at the cursor if its kind matches. Records a violation
    /// otherwise.
    fn claim(&mut self, kind: SlotKind) -> Option<&'a SlotValue> {
        let slot = self.cursor();
        let previous = self.previous?;
        let found = previous.slots.get(slot);
        if found.map(SlotValue::kind) == Some(kind) {
            return found;
        }
        if self.check_order && self.violation.is_none() {
            self.violation = Some(EvalError::HookOrder {
                node: self.node,
                slot,
                expected: found.map(SlotValue::kind),
                found: Some(kind),
            });
        }
        None
    }

    /// State slot. `init` seeds the slot on first evaluation; later
    /// evaluations return the value with this lane's queued updates applied.
    pub fn use_state(&mut self, init: impl Into<Value>) -> Value {
        let slot = self.cursor();
        let (value, base) = match self.claim(SlotKind::State) {
            Some(SlotValue::State { base, current }) => {
                let (value, new_base, rebase) =
                    self.queue.fold(self.node, slot, base, current, self.lane);
                if let Some(r) = rebase {
                    self.rebases.push(r);
                }
                (value, new_base)
            }
            _ => {
                let v = init.into();
                (v.clone(), v)
            }
        };
        self.next.slots.push(SlotValue::State {
            base,
            current: value.clone(),
        });
        value
    }

    /// Memoized value, recomputed only when `deps` change.
    pub fn use_memo(&mut self, deps: Vec<Value>, compute: impl FnOnce() -> Value) -> Value {
        let value = match self.claim(SlotKind::Memo) {
            Some(SlotValue::Memo { deps: old, value }) if *old == deps => value.clone(),
            _ => compute(),
        };
        self.next.slots.push(SlotValue::Memo {
            deps,
            value: value.clone(),
        });
        value
    }

    /// Effect run after commit. `deps == None` runs on every commit of this
    /// node; otherwise the effect re-runs only when `deps` change.
    pub fn use_effect(&mut self, deps: Option<Vec<Value>>, effect: Arc<dyn Effect>) {
        let slot = self.cursor();
        let unchanged = matches!(
            self.claim(SlotKind::Effect),
            Some(SlotValue::Effect { deps: Some(old) }) if Some(old) == deps.as_ref()
        );
        if !unchanged {
            self.effects.push(StagedEffect { slot, effect });
        }
        self.next.slots.push(SlotValue::Effect { deps });
    }

    /// Closes the evaluation, checking the slot count against the previous
    /// evaluation.
    pub(crate) fn finish(mut self) -> Result<HookOutput, EvalError> {
        if let Some(v) = self.violation.take() {
            return Err(v);
        }
        if self.check_order {
            if let Some(previous) = self.previous {
                let used = self.next.slots.len();
                if used < previous.slots.len() {
                    return Err(EvalError::HookOrder {
                        node: self.node,
                        slot: used,
                        expected: previous.kind_at(used),
                        found: None,
                    });
                }
            }
        }
        Ok(HookOutput {
            cell: self.next,
            effects: self.effects,
            rebases: self.rebases,
        })
    }
}
