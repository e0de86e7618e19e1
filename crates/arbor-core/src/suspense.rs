// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Suspense coordination: awaitable values, boundary records, settle subscriptions.
//!
//! A composite that needs a value which is not available yet returns
//! [`crate::Evaluation::Pending`] with an [`AwaitHandle`]. The render rewinds to
//! the nearest suspense boundary that declares a fallback, renders the
//! fallback instead, and the commit registers a subscription on the handle.
//! When the handle settles, the subscription fires and the boundary is retried
//! in the lane that originally suspended.
//!
//! Settlement may happen on any thread. Subscriptions only send the
//! subscription id over a channel; the engine drains it at the start of every
//! work call and between units.
use std::collections::BTreeMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::declaration::Declaration;
use crate::ident::NodeId;
use crate::scheduler::Priority;

/// Observable state of an awaited value.
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitStatus {
    /// Not available yet.
    Pending,
    /// Available.
    Settled(Value),
    /// Failed; propagated like an evaluation error.
    Rejected(String),
}

impl AwaitStatus {
    /// True while the value is not available.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// One-shot notification invoked when an awaitable leaves `Pending`.
pub type SettleCallback = Box<dyn FnOnce() + Send>;

/// Contract for external async-value providers (caches, fetch layers).
///
/// `subscribe` must invoke the callback exactly once: immediately if the value
/// is already settled or rejected, otherwise on settlement.
pub trait Awaitable: Send + Sync {
    /// Current status.
    fn status(&self) -> AwaitStatus;
    /// Registers a settle notification.
    fn subscribe(&self, on_settle: SettleCallback);
}

/// Shared handle to an awaitable value.
#[derive(Clone)]
pub struct AwaitHandle(Arc<dyn Awaitable>);

impl AwaitHandle {
    /// Wraps an awaitable.
    pub fn new(awaitable: Arc<dyn Awaitable>) -> Self {
        Self(awaitable)
    }

    /// Current status of the underlying value.
    #[must_use]
    pub fn status(&self) -> AwaitStatus {
        self.0.status()
    }

    /// True when both handles point at the same awaitable.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn subscribe(&self, on_settle: SettleCallback) {
        self.0.subscribe(on_settle);
    }
}

impl core::fmt::Debug for AwaitHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("AwaitHandle").field(&self.status()).finish()
    }
}

/// In-process awaitable settled by calling [`Deferred::settle`] or
/// [`Deferred::reject`].
pub struct Deferred {
    inner: Mutex<DeferredInner>,
}

struct DeferredInner {
    status: AwaitStatus,
    subscribers: Vec<SettleCallback>,
}

impl Deferred {
    /// New pending value.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DeferredInner {
                status: AwaitStatus::Pending,
                subscribers: Vec::new(),
            }),
        })
    }

    /// Handle for use in [`crate::Evaluation::Pending`].
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> AwaitHandle {
        AwaitHandle(Arc::clone(self) as Arc<dyn Awaitable>)
    }

    /// Settles with a value. Ignored if already settled or rejected.
    pub fn settle(&self, value: impl Into<Value>) {
        self.finish(AwaitStatus::Settled(value.into()));
    }

    /// Rejects with an error message. Ignored if already settled or rejected.
    pub fn reject(&self, message: impl Into<String>) {
        self.finish(AwaitStatus::Rejected(message.into()));
    }

    fn finish(&self, status: AwaitStatus) {
        let subscribers = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if !inner.status.is_pending() {
                return;
            }
            inner.status = status;
            std::mem::take(&mut inner.subscribers)
        };
        for notify in subscribers {
            notify();
        }
    }
}

impl Awaitable for Deferred {
    fn status(&self) -> AwaitStatus {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .clone()
    }

    fn subscribe(&self, on_settle: SettleCallback) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.status.is_pending() {
            inner.subscribers.push(on_settle);
        } else {
            drop(inner);
            on_settle();
        }
    }
}

/// Committed state of a suspense boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspenseState {
    /// Primary children are mounted.
    Settled,
    /// A descendant suspended in the current render; the fallback is staged
    /// but not yet committed.
    Pending {
        /// Lane the suspension happened in; the retry re-enters it.
        lane: Priority,
    },
    /// Fallback children are mounted and a settle subscription is live.
    FallbackDisplayed {
        /// Lane the suspension happened in; the retry re-enters it.
        lane: Priority,
    },
}

/// Record attached to a suspense boundary node.
#[derive(Debug, Clone)]
pub struct SuspenseRecord {
    /// Latest declared primary children.
    pub primary: Vec<Declaration>,
    /// Latest declared fallback.
    pub fallback: Option<Vec<Declaration>>,
    /// Boundary state.
    pub state: SuspenseState,
    pub(crate) awaiting: Option<AwaitHandle>,
    pub(crate) subscription: Option<SubscriptionId>,
}

impl SuspenseRecord {
    pub(crate) fn new(primary: Vec<Declaration>, fallback: Option<Vec<Declaration>>) -> Self {
        Self {
            primary,
            fallback,
            state: SuspenseState::Settled,
            awaiting: None,
            subscription: None,
        }
    }

    /// True while the fallback is mounted.
    #[must_use]
    pub fn showing_fallback(&self) -> bool {
        matches!(self.state, SuspenseState::FallbackDisplayed { .. })
    }
}

/// Identifier of a settle subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw value for logs.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// What happens when a subscription's handle settles.
pub(crate) enum SettleAction {
    /// Re-render the boundary in the lane it suspended in.
    Retry { boundary: NodeId, lane: Priority },
    /// A lane whose commit was deferred (no boundary caught the suspension).
    Unblock { lane: Priority },
    /// Caller-supplied callback from [`crate::Engine::register_awaitable`].
    Callback(Box<dyn FnOnce(&AwaitStatus) + Send>),
}

impl core::fmt::Debug for SettleAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Retry { boundary, lane } => f
                .debug_struct("Retry")
                .field("boundary", boundary)
                .field("lane", lane)
                .finish(),
            Self::Unblock { lane } => f.debug_struct("Unblock").field("lane", lane).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Subscription {
    pub handle: AwaitHandle,
    pub action: SettleAction,
    pub owner: Option<NodeId>,
}

/// Live subscriptions plus the settle inbox.
pub(crate) struct Subscriptions {
    next: u64,
    live: BTreeMap<SubscriptionId, Subscription>,
    tx: Sender<SubscriptionId>,
    rx: Receiver<SubscriptionId>,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            next: 0,
            live: BTreeMap::new(),
            tx,
            rx,
        }
    }

    /// Registers `action` to run when `handle` settles. If the handle already
    /// settled, the notification is queued immediately.
    pub(crate) fn register(
        &mut self,
        handle: AwaitHandle,
        action: SettleAction,
        owner: Option<NodeId>,
    ) -> SubscriptionId {
        self.next += 1;
        let id = SubscriptionId(self.next);
        let tx = self.tx.clone();
        let notify = handle.clone();
        self.live.insert(
            id,
            Subscription {
                handle,
                action,
                owner,
            },
        );
        notify.subscribe(Box::new(move || {
            // Receiver lives as long as the engine; a closed channel means the
            // engine is gone and nobody cares about the notification.
            let _ = tx.send(id);
        }));
        id
    }

    /// Drops a subscription; a later notification for it is ignored.
    pub(crate) fn release(&mut self, id: SubscriptionId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Drops every subscription owned by `node`.
    pub(crate) fn release_owner(&mut self, node: NodeId) -> usize {
        let before = self.live.len();
        self.live.retain(|_, s| s.owner != Some(node));
        before - self.live.len()
    }

    /// Removes and returns the subscriptions whose handles have settled since
    /// the last drain, in notification order.
    pub(crate) fn drain_settled(&mut self) -> Vec<(SubscriptionId, Subscription)> {
        let mut out = Vec::new();
        while let Ok(id) = self.rx.try_recv() {
            if let Some(sub) = self.live.remove(&id) {
                out.push((id, sub));
            }
        }
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }
}
