// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Component fixtures covering the evaluation outcomes the engine handles.
//!
//! Every fixture renders into `text` host nodes whose `value` prop is a
//! string, so [`crate::RecordingHost::labels`] shows what mounted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_core::{
    AwaitStatus, Component, Deferred, Effect, Evaluation, HostDecl, Hooks, Props,
};
use serde_json::Value;

/// Host kind every fixture renders.
pub const TEXT_KIND: &str = "text";

/// `text` host node with a string `value` prop.
pub fn text(value: impl Into<String>) -> HostDecl {
    HostDecl::new(TEXT_KIND).prop("value", value.into())
}

/// Shared evaluation counter.
#[derive(Clone, Debug, Default)]
pub struct Evaluations(Arc<AtomicUsize>);

impl Evaluations {
    /// Evaluations so far.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Renders `props.text` as a `text` node. Pure; counts its evaluations.
#[derive(Debug, Default)]
pub struct Label {
    evaluations: Evaluations,
}

impl Label {
    /// Fixture and a handle on its evaluation count.
    pub fn counted() -> (Arc<Self>, Evaluations) {
        let label = Arc::new(Self::default());
        let count = label.evaluations.clone();
        (label, count)
    }
}

impl Component for Label {
    fn name(&self) -> &str {
        "Label"
    }

    fn is_pure(&self) -> bool {
        true
    }

    fn evaluate(&self, props: &Props, _hooks: &mut Hooks<'_>) -> Evaluation {
        self.evaluations.bump();
        let value = props.get_str("text").unwrap_or_default();
        Evaluation::ready([text(value)])
    }
}

/// One state slot (initially `0`), rendered as `count:<n>`.
///
/// An optional effect is registered with the count as its dependency.
#[derive(Default)]
pub struct Counter {
    effect: Option<Arc<dyn Effect>>,
    evaluations: Evaluations,
}

impl Counter {
    /// Counter without an effect.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose effect re-runs whenever the count changes.
    pub fn with_effect(effect: Arc<dyn Effect>) -> Self {
        Self {
            effect: Some(effect),
            evaluations: Evaluations::default(),
        }
    }

    /// Handle on the evaluation count.
    pub fn evaluations(&self) -> Evaluations {
        self.evaluations.clone()
    }
}

impl Component for Counter {
    fn name(&self) -> &str {
        "Counter"
    }

    fn evaluate(&self, _props: &Props, hooks: &mut Hooks<'_>) -> Evaluation {
        self.evaluations.bump();
        let count = hooks.use_state(0);
        if let Some(effect) = &self.effect {
            hooks.use_effect(Some(vec![count.clone()]), Arc::clone(effect));
        }
        Evaluation::ready([text(format!("count:{count}"))])
    }
}

/// Suspends on a [`Deferred`] until it settles, then renders the settled
/// value (strings verbatim, anything else as JSON). A rejection surfaces as
/// an evaluation error.
pub struct Awaiting {
    name: String,
    value: Arc<Deferred>,
}

impl Awaiting {
    /// Fixture named `name` waiting on a fresh deferred, plus that deferred.
    pub fn new(name: impl Into<String>) -> (Arc<Self>, Arc<Deferred>) {
        let value = Deferred::new();
        (
            Arc::new(Self {
                name: name.into(),
                value: Arc::clone(&value),
            }),
            value,
        )
    }
}

impl Component for Awaiting {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, _props: &Props, _hooks: &mut Hooks<'_>) -> Evaluation {
        match self.value.handle().status() {
            AwaitStatus::Settled(Value::String(s)) => Evaluation::ready([text(s)]),
            AwaitStatus::Settled(v) => Evaluation::ready([text(v.to_string())]),
            AwaitStatus::Pending | AwaitStatus::Rejected(_) => {
                Evaluation::Pending(self.value.handle())
            }
        }
    }
}

/// Fails with `props.message` (default `"boom"`) while `props.fail` is not
/// `false`; renders `ok` otherwise.
#[derive(Debug, Default)]
pub struct Failing;

impl Component for Failing {
    fn name(&self) -> &str {
        "Failing"
    }

    fn evaluate(&self, props: &Props, _hooks: &mut Hooks<'_>) -> Evaluation {
        if props.get("fail") == Some(&Value::Bool(false)) {
            return Evaluation::ready([text("ok")]);
        }
        Evaluation::failed(props.get_str("message").unwrap_or("boom"))
    }
}

/// Fails while its switch is on; renders `recovered` once it is off.
#[derive(Debug)]
pub struct Flaky {
    failing: Arc<AtomicBool>,
}

impl Flaky {
    /// Fixture (initially failing) and its switch.
    pub fn new() -> (Arc<Self>, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(true));
        (
            Arc::new(Self {
                failing: Arc::clone(&failing),
            }),
            failing,
        )
    }
}

impl Component for Flaky {
    fn name(&self) -> &str {
        "Flaky"
    }

    fn evaluate(&self, _props: &Props, _hooks: &mut Hooks<'_>) -> Evaluation {
        if self.failing.load(Ordering::SeqCst) {
            return Evaluation::failed("flaky");
        }
        Evaluation::ready([text("recovered")])
    }
}

/// Panics during evaluation.
#[derive(Debug, Default)]
pub struct Panicking;

impl Component for Panicking {
    fn name(&self) -> &str {
        "Panicking"
    }

    #[allow(clippy::panic)]
    fn evaluate(&self, _props: &Props, _hooks: &mut Hooks<'_>) -> Evaluation {
        panic!("component exploded");
    }
}

/// Calls `use_state` then `use_memo`; with `props.shift == true` the order is
/// swapped, which the engine reports as a hook-order error on re-render.
#[derive(Debug, Default)]
pub struct HookShifter;

impl Component for HookShifter {
    fn name(&self) -> &str {
        "HookShifter"
    }

    fn evaluate(&self, props: &Props, hooks: &mut Hooks<'_>) -> Evaluation {
        let shifted = props.get("shift") == Some(&Value::Bool(true));
        let value = if shifted {
            hooks.use_memo(vec![], || Value::from(1));
            hooks.use_state(0)
        } else {
            let v = hooks.use_state(0);
            hooks.use_memo(vec![], || Value::from(1));
            v
        };
        Evaluation::ready([text(format!("shifter:{value}"))])
    }
}
