// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted scenarios driving a real engine against the in-memory host.
//!
//! Every scenario uses a [`ManualClock`] and explicit unit budgets, so the
//! output is identical from run to run.

use std::sync::Arc;

use arbor_core::{
    make_component_id, AwaitStatus, Component, Declaration, Deferred, Engine, EngineConfig,
    EngineError, ErrorBoundaryDecl, Evaluation, HostDecl, HostTree, Hooks, ManualClock, NodeId,
    Priority, Props, SuspenseDecl, WorkReport,
};
use clap::ValueEnum;
use tracing::info;

/// Scenario selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Keyed children reordered, removed and added.
    KeyedReorder,
    /// Urgent update preempting an in-flight render.
    Interrupt,
    /// Fallback shown until an awaited value settles.
    Suspense,
    /// Failing component replaced by its boundary's fallback.
    ErrorBoundary,
}

impl Scenario {
    /// Name as typed on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeyedReorder => "keyed-reorder",
            Self::Interrupt => "interrupt",
            Self::Suspense => "suspense",
            Self::ErrorBoundary => "error-boundary",
        }
    }
}

/// One scripted action and the work it produced.
#[derive(Debug)]
pub struct Step {
    /// What the script did.
    pub label: String,
    /// Report of the work call made for this step.
    pub report: WorkReport,
}

/// A finished scenario.
#[derive(Debug)]
pub struct DemoRun {
    /// Scenario that ran.
    pub scenario: Scenario,
    /// Steps in order.
    pub steps: Vec<Step>,
    /// Host tree after the last step.
    pub host: HostTree,
}

struct Script {
    engine: Engine,
    host: HostTree,
    steps: Vec<Step>,
}

impl Script {
    fn new(config: EngineConfig) -> Self {
        Self {
            engine: Engine::with_clock(config, Arc::new(ManualClock::new())),
            host: HostTree::new(),
            steps: Vec::new(),
        }
    }

    fn register(&mut self, component: Arc<dyn Component>) -> Result<(), EngineError> {
        self.engine.register_component(component).map(|_| ())
    }

    fn record(&mut self, label: &str, report: WorkReport) {
        info!(step = label, commits = report.commits.len(), "demo step");
        self.steps.push(Step {
            label: label.to_owned(),
            report,
        });
    }

    /// Replaces `target`'s children and runs until idle.
    fn render(
        &mut self,
        label: &str,
        target: NodeId,
        children: Vec<Declaration>,
        priority: Priority,
    ) -> Result<(), EngineError> {
        self.engine.schedule_update(target, children, priority)?;
        self.flush(label)
    }

    fn flush(&mut self, label: &str) -> Result<(), EngineError> {
        let report = self.engine.flush(&mut self.host)?;
        self.record(label, report);
        Ok(())
    }

    fn child(&self, parent: NodeId, index: usize) -> Result<NodeId, EngineError> {
        self.engine
            .tree()
            .children(parent)
            .get(index)
            .copied()
            .ok_or(EngineError::UnknownNode(parent))
    }

    fn finish(self, scenario: Scenario) -> DemoRun {
        DemoRun {
            scenario,
            steps: self.steps,
            host: self.host,
        }
    }
}

/// Runs `scenario` with `config`.
pub fn run(scenario: Scenario, config: EngineConfig) -> Result<DemoRun, EngineError> {
    info!(scenario = scenario.as_str(), "running demo");
    let mut script = Script::new(config);
    match scenario {
        Scenario::KeyedReorder => keyed_reorder(&mut script)?,
        Scenario::Interrupt => interrupt(&mut script)?,
        Scenario::Suspense => suspense(&mut script)?,
        Scenario::ErrorBoundary => error_boundary(&mut script)?,
    }
    Ok(script.finish(scenario))
}

fn item(key: &str) -> Declaration {
    HostDecl::new("item").key(key).prop("label", key).into()
}

fn items(keys: &[&str]) -> Vec<Declaration> {
    keys.iter().map(|k| item(k)).collect()
}

fn keyed_reorder(script: &mut Script) -> Result<(), EngineError> {
    script.render(
        "mount a b c d e",
        NodeId::ROOT,
        vec![HostDecl::new("list").children(items(&["a", "b", "c", "d", "e"])).into()],
        Priority::Normal,
    )?;
    let list = script.child(NodeId::ROOT, 0)?;
    script.render(
        "move e to the front",
        list,
        items(&["e", "a", "b", "c", "d"]),
        Priority::Normal,
    )?;
    script.render(
        "drop a and c, add x",
        list,
        items(&["e", "b", "x", "d"]),
        Priority::Normal,
    )
}

fn interrupt(script: &mut Script) -> Result<(), EngineError> {
    let keys: Vec<String> = (0..200).map(|i| format!("row-{i}")).collect();
    let forward: Vec<&str> = keys.iter().map(String::as_str).collect();
    let backward: Vec<&str> = forward.iter().rev().copied().collect();
    script.render(
        "mount 200 rows and a status line",
        NodeId::ROOT,
        vec![
            HostDecl::new("list").key("list").children(items(&forward)).into(),
            HostDecl::new("status").key("status").prop("text", "idle").into(),
        ],
        Priority::Normal,
    )?;
    let list = script.child(NodeId::ROOT, 0)?;

    script
        .engine
        .schedule_update(list, items(&backward), Priority::Normal)?;
    let report = script.engine.perform_units(&mut script.host, 50)?;
    script.record("reverse rows (normal), 50 units", report);

    script.render(
        "status update (immediate)",
        NodeId::ROOT,
        vec![
            HostDecl::new("list").key("list").children(items(&backward)).into(),
            HostDecl::new("status").key("status").prop("text", "busy").into(),
        ],
        Priority::Immediate,
    )?;
    let status = script.child(NodeId::ROOT, 1)?;
    script.render(
        "status update (user-blocking)",
        status,
        vec![HostDecl::new("badge").prop("text", "done").into()],
        Priority::UserBlocking,
    )
}

/// Renders the settled value of a [`Deferred`], suspending until then.
struct Remote {
    value: Arc<Deferred>,
}

impl Component for Remote {
    fn name(&self) -> &str {
        "Remote"
    }

    fn evaluate(&self, _props: &Props, _hooks: &mut Hooks<'_>) -> Evaluation {
        match self.value.handle().status() {
            AwaitStatus::Settled(v) => Evaluation::ready([HostDecl::new("text").prop("value", v)]),
            AwaitStatus::Pending | AwaitStatus::Rejected(_) => Evaluation::Pending(self.value.handle()),
        }
    }
}

fn suspense(script: &mut Script) -> Result<(), EngineError> {
    let value = Deferred::new();
    script.register(Arc::new(Remote {
        value: Arc::clone(&value),
    }))?;
    let remote: Declaration = Declaration::composite(make_component_id("Remote")).into();
    script.render(
        "mount remote content behind a fallback",
        NodeId::ROOT,
        vec![SuspenseDecl::new([remote])
            .fallback([HostDecl::new("spinner")])
            .into()],
        Priority::Normal,
    )?;
    value.settle("hello from remote");
    script.flush("value settles")
}

/// Fails while `props.fail` is `true`.
struct Fragile;

impl Component for Fragile {
    fn name(&self) -> &str {
        "Fragile"
    }

    fn evaluate(&self, props: &Props, hooks: &mut Hooks<'_>) -> Evaluation {
        let renders = hooks.use_memo(vec![], || 0.into());
        if props.get("fail").and_then(serde_json::Value::as_bool) == Some(true) {
            return Evaluation::failed("fragile component gave up");
        }
        Evaluation::ready([HostDecl::new("text")
            .prop("value", "fragile component is fine")
            .prop("memo", renders)])
    }
}

fn guarded(fail: bool) -> Vec<Declaration> {
    let fragile = Declaration::composite(make_component_id("Fragile")).prop("fail", fail);
    vec![
        HostDecl::new("header").prop("text", "dashboard").into(),
        ErrorBoundaryDecl::new(
            [HostDecl::new("text").prop("value", "something went wrong")],
            [fragile],
        )
        .into(),
    ]
}

fn error_boundary(script: &mut Script) -> Result<(), EngineError> {
    script.register(Arc::new(Fragile))?;
    script.render(
        "mount a failing component",
        NodeId::ROOT,
        guarded(true),
        Priority::Normal,
    )?;
    script.render(
        "redeclare it healthy",
        NodeId::ROOT,
        guarded(false),
        Priority::Normal,
    )
}
