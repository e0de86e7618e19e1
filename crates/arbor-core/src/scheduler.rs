// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Priority lanes and the lane state machine.
//!
//! Lane lifecycle:
//! `Idle -> Scheduled -> InProgress -> (Interrupted -> Scheduled) | Completed -> Committing -> Committed`.
//!
//! Each lane records *what* needs rendering (declaration overrides, state
//! updates, suspense retries, boundary resets); the render itself lives in the
//! engine. A lane is runnable while it has work and is not blocked on an
//! awaited value. Selection picks the highest *effective* priority: a lane that
//! was interrupted `max_interruptions` times or has waited longer than
//! `starvation_timeout` runs as [`Priority::Immediate`].
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::declaration::Declaration;
use crate::ident::NodeId;
use crate::suspense::SubscriptionId;

/// Lane priority. Total order: `Immediate > UserBlocking > Normal > Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    /// Background work.
    Idle,
    /// Default priority.
    Normal,
    /// Work the user is waiting on (typing, hover).
    UserBlocking,
    /// Must run before anything else.
    Immediate,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Self; 4] = [
        Self::Immediate,
        Self::UserBlocking,
        Self::Normal,
        Self::Idle,
    ];

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Normal => "normal",
            Self::UserBlocking => "user-blocking",
            Self::Immediate => "immediate",
        }
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lane state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LaneState {
    /// No work recorded.
    Idle,
    /// Work recorded, not rendering.
    Scheduled,
    /// A render for this lane is in flight.
    InProgress,
    /// The in-flight render was abandoned for a higher lane.
    Interrupted,
    /// Render finished; commit pending.
    Completed,
    /// Commit executing.
    Committing,
    /// Last render committed; no work since.
    Committed,
}

/// Snapshot of one lane for inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LaneStatus {
    /// Base priority.
    pub priority: Priority,
    /// Priority after starvation promotion.
    pub effective: Priority,
    /// Current state.
    pub state: LaneState,
    /// Interruptions since the lane last committed.
    pub interruptions: u32,
    /// Nodes with recorded work.
    pub pending_targets: usize,
    /// Commit deferred until an awaited value settles.
    pub blocked: bool,
}

/// Work recorded in a lane. Rendering takes a snapshot; the commit removes
/// exactly what the snapshot contained.
#[derive(Clone, Debug, Default)]
pub(crate) struct LaneWork {
    /// Replacement children per target, with the scheduling sequence number.
    pub declarations: BTreeMap<NodeId, (u64, Vec<Declaration>)>,
    /// Composites with queued state, with the latest scheduling sequence number.
    pub states: BTreeMap<NodeId, u64>,
    pub retries: BTreeSet<NodeId>,
    pub resets: BTreeSet<NodeId>,
}

impl LaneWork {
    fn is_empty(&self) -> bool {
        self.declarations.is_empty()
            && self.states.is_empty()
            && self.retries.is_empty()
            && self.resets.is_empty()
    }

    /// Every node with work, deduplicated.
    pub(crate) fn targets(&self) -> BTreeSet<NodeId> {
        let mut out: BTreeSet<NodeId> = self.declarations.keys().copied().collect();
        out.extend(self.states.keys());
        out.extend(&self.retries);
        out.extend(&self.resets);
        out
    }

    fn release(&mut self, node: NodeId) -> bool {
        let a = self.declarations.remove(&node).is_some();
        let b = self.states.remove(&node).is_some();
        let c = self.retries.remove(&node);
        let d = self.resets.remove(&node);
        a || b || c || d
    }
}

#[derive(Debug)]
pub(crate) struct Lane {
    pub priority: Priority,
    pub state: LaneState,
    pub work: LaneWork,
    pub interruptions: u32,
    pub first_scheduled: Option<Duration>,
    pub blocked_on: Option<SubscriptionId>,
}

impl Lane {
    fn new(priority: Priority) -> Self {
        Self {
            priority,
            state: LaneState::Idle,
            work: LaneWork::default(),
            interruptions: 0,
            first_scheduled: None,
            blocked_on: None,
        }
    }

    fn has_work(&self) -> bool {
        !self.work.is_empty()
    }

    fn runnable(&self) -> bool {
        self.has_work() && self.blocked_on.is_none()
    }

    fn effective(&self, config: &EngineConfig, now: Duration) -> Priority {
        let starved = self.interruptions >= config.max_interruptions
            || self
                .first_scheduled
                .is_some_and(|t| now.saturating_sub(t) >= config.starvation_timeout());
        if starved {
            Priority::Immediate
        } else {
            self.priority
        }
    }
}

/// All lanes, keyed by priority.
#[derive(Debug, Default)]
pub(crate) struct Lanes {
    lanes: BTreeMap<Priority, Lane>,
    seq: u64,
}

impl Lanes {
    fn touch(&mut self, priority: Priority, now: Duration) -> &mut Lane {
        let lane = self
            .lanes
            .entry(priority)
            .or_insert_with(|| Lane::new(priority));
        if matches!(lane.state, LaneState::Idle | LaneState::Committed) {
            debug!(lane = %priority, from = ?lane.state, "lane scheduled");
            lane.state = LaneState::Scheduled;
        }
        if lane.first_scheduled.is_none() {
            lane.first_scheduled = Some(now);
        }
        lane
    }

    /// Records replacement children for `target`. Older declarations for the
    /// same target in other lanes are superseded; lanes left without work are
    /// removed and returned.
    pub(crate) fn schedule_declarations(
        &mut self,
        target: NodeId,
        children: Vec<Declaration>,
        priority: Priority,
        now: Duration,
    ) -> Vec<Lane> {
        self.seq += 1;
        let seq = self.seq;
        for lane in self.lanes.values_mut() {
            if lane.priority != priority && lane.work.declarations.remove(&target).is_some() {
                debug!(lane = %lane.priority, target = %target, by = %priority, "declaration superseded");
            }
        }
        let cancelled = self.take_cancelled(Some(priority));
        self.touch(priority, now)
            .work
            .declarations
            .insert(target, (seq, children));
        cancelled
    }

    pub(crate) fn schedule_state(&mut self, node: NodeId, priority: Priority, now: Duration) {
        self.seq += 1;
        let seq = self.seq;
        self.touch(priority, now).work.states.insert(node, seq);
    }

    pub(crate) fn schedule_retry(&mut self, boundary: NodeId, priority: Priority, now: Duration) {
        self.touch(priority, now).work.retries.insert(boundary);
    }

    pub(crate) fn schedule_reset(&mut self, boundary: NodeId, priority: Priority, now: Duration) {
        self.touch(priority, now).work.resets.insert(boundary);
    }

    /// Drops all work for a destroyed node; returns lanes left empty.
    pub(crate) fn release_node(&mut self, node: NodeId) -> Vec<Lane> {
        let mut touched = false;
        for lane in self.lanes.values_mut() {
            touched |= lane.work.release(node);
        }
        if touched {
            self.take_cancelled(None)
        } else {
            Vec::new()
        }
    }

    /// Removes lanes that were waiting to run but have no work left.
    fn take_cancelled(&mut self, keep: Option<Priority>) -> Vec<Lane> {
        let doomed: Vec<Priority> = self
            .lanes
            .values()
            .filter(|l| {
                Some(l.priority) != keep
                    && !l.has_work()
                    && matches!(
                        l.state,
                        LaneState::Scheduled | LaneState::InProgress | LaneState::Interrupted
                    )
            })
            .map(|l| l.priority)
            .collect();
        doomed
            .into_iter()
            .filter_map(|p| self.lanes.remove(&p))
            .collect()
    }

    /// Highest effective-priority runnable lane. Ties prefer `current`, then
    /// the lane waiting longest.
    pub(crate) fn next_runnable(
        &self,
        current: Option<Priority>,
        config: &EngineConfig,
        now: Duration,
    ) -> Option<Priority> {
        self.lanes
            .values()
            .filter(|l| l.runnable())
            .max_by_key(|l| {
                (
                    l.effective(config, now),
                    Some(l.priority) == current,
                    Reverse(l.first_scheduled),
                    l.priority,
                )
            })
            .map(|l| l.priority)
    }

    pub(crate) fn snapshot(&self, priority: Priority) -> LaneWork {
        self.lanes
            .get(&priority)
            .map(|l| l.work.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_state(&mut self, priority: Priority, state: LaneState) {
        if let Some(lane) = self.lanes.get_mut(&priority) {
            if lane.state != state {
                debug!(lane = %priority, from = ?lane.state, to = ?state, "lane transition");
                lane.state = state;
            }
        }
    }

    /// Abandons the in-flight render of `priority`.
    pub(crate) fn interrupted(&mut self, priority: Priority) {
        self.set_state(priority, LaneState::Interrupted);
        if let Some(lane) = self.lanes.get_mut(&priority) {
            lane.interruptions += 1;
        }
        self.set_state(priority, LaneState::Scheduled);
    }

    pub(crate) fn interruptions(&self, priority: Priority) -> u32 {
        self.lanes.get(&priority).map_or(0, |l| l.interruptions)
    }

    /// Removes the committed snapshot from the lane and resets its
    /// starvation counters. Work recorded after the snapshot stays scheduled.
    pub(crate) fn committed(&mut self, priority: Priority, done: &LaneWork, now: Duration) {
        let Some(lane) = self.lanes.get_mut(&priority) else {
            return;
        };
        for (target, (seq, _)) in &done.declarations {
            if lane.work.declarations.get(target).is_some_and(|(s, _)| s == seq) {
                lane.work.declarations.remove(target);
            }
        }
        for (n, seq) in &done.states {
            if lane.work.states.get(n) == Some(seq) {
                lane.work.states.remove(n);
            }
        }
        for n in &done.retries {
            lane.work.retries.remove(n);
        }
        for n in &done.resets {
            lane.work.resets.remove(n);
        }
        lane.interruptions = 0;
        if lane.has_work() {
            lane.first_scheduled = Some(now);
            lane.state = LaneState::Scheduled;
        } else {
            lane.first_scheduled = None;
            lane.state = LaneState::Committed;
        }
    }

    /// Drops all work of a lane (uncaught render failure).
    pub(crate) fn discard(&mut self, priority: Priority) {
        if let Some(lane) = self.lanes.get_mut(&priority) {
            lane.work = LaneWork::default();
            lane.interruptions = 0;
            lane.first_scheduled = None;
            lane.state = LaneState::Idle;
        }
    }

    pub(crate) fn block(&mut self, priority: Priority, on: SubscriptionId) -> Option<SubscriptionId> {
        let lane = self.lanes.get_mut(&priority)?;
        lane.state = LaneState::Scheduled;
        lane.blocked_on.replace(on)
    }

    pub(crate) fn unblock(&mut self, priority: Priority, on: SubscriptionId) {
        if let Some(lane) = self.lanes.get_mut(&priority) {
            if lane.blocked_on == Some(on) {
                lane.blocked_on = None;
            }
        }
    }

    /// Lifts a block regardless of the awaited value; returns the released subscription.
    pub(crate) fn clear_block(&mut self, priority: Priority) -> Option<SubscriptionId> {
        self.lanes.get_mut(&priority)?.blocked_on.take()
    }

    /// True when some lane has work but is blocked on an awaited value.
    pub(crate) fn any_blocked(&self) -> bool {
        self.lanes
            .values()
            .any(|l| l.has_work() && l.blocked_on.is_some())
    }

    pub(crate) fn status(&self, priority: Priority, config: &EngineConfig, now: Duration) -> LaneStatus {
        self.lanes.get(&priority).map_or(
            LaneStatus {
                priority,
                effective: priority,
                state: LaneState::Idle,
                interruptions: 0,
                pending_targets: 0,
                blocked: false,
            },
            |l| LaneStatus {
                priority,
                effective: l.effective(config, now),
                state: l.state,
                interruptions: l.interruptions,
                pending_targets: l.work.targets().len(),
                blocked: l.blocked_on.is_some(),
            },
        )
    }
}
