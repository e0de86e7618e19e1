// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use arbor_core::{
    make_component_id, CallbackError, CallbackPhase, CommitMetrics, Declaration, HostDecl,
    HostError, NodeId, Priority, StateUpdate,
};
use arbor_dry_tests::{keyed_items, keyed_list, text, Counter, EngineTestBuilder, EventLog};
use serde_json::Value;

fn nested(log: &EventLog) -> Declaration {
    HostDecl::new("app")
        .lifecycle(log.lifecycle("app"))
        .child(
            HostDecl::new("header")
                .lifecycle(log.lifecycle("header"))
                .child(text("title")),
        )
        .child(HostDecl::new("body").lifecycle(log.lifecycle("body")))
        .into()
}

#[test]
fn each_commit_is_one_host_batch() {
    let log = EventLog::new();
    let mut rig = EngineTestBuilder::new().build().unwrap();

    let report = rig.mount(vec![nested(&log)]).unwrap();

    assert_eq!(report.commits.len(), 1);
    assert_eq!(rig.host.batches().len(), 1);
    assert_eq!(rig.host.tree().batches(), 1);
    assert_eq!(report.commits[0].metrics.host_ops, rig.host.batches()[0].len());
    assert_eq!(
        rig.host.labels(),
        vec!["app", "header", "text:title", "body"]
    );
}

#[test]
fn partial_render_is_never_visible() {
    let mut rig = EngineTestBuilder::new().build().unwrap();
    rig.mount(vec![keyed_list(&["a", "b"]).into()]).unwrap();
    let digest = rig.engine.tree().digest();
    let host_digest = rig.host.tree().digest();
    let list = rig.path(&[0]).unwrap();

    rig.engine
        .schedule_update(
            list,
            keyed_items(&["b", "c", "d", "a"]),
            Priority::Normal,
        )
        .unwrap();
    let report = rig.step(3).unwrap();

    assert!(report.commits.is_empty());
    assert_eq!(rig.host.batches().len(), 1);
    assert_eq!(rig.engine.tree().digest(), digest);
    assert_eq!(rig.host.tree().digest(), host_digest);

    let report = rig.flush().unwrap();
    assert_eq!(report.commits.len(), 1);
    assert_eq!(rig.host.batches().len(), 2);
    assert_ne!(rig.engine.tree().digest(), digest);
}

#[test]
fn host_failure_is_reported_with_the_commit() {
    let mut rig = EngineTestBuilder::new().build().unwrap();
    rig.host.fail_next(HostError::Backend("gpu lost".into()));

    let report = rig.mount(vec![text("hello").into()]).unwrap();

    let commit = &report.commits[0];
    assert_eq!(commit.host_error, Some(HostError::Backend("gpu lost".into())));
    assert_eq!(rig.engine.tree().children(NodeId::ROOT).len(), 1);
    assert!(rig.host.tree().is_empty());
}

#[test]
fn attach_runs_parents_first_and_detach_children_first() {
    let log = EventLog::new();
    let mut rig = EngineTestBuilder::new().build().unwrap();

    rig.mount(vec![nested(&log)]).unwrap();
    assert_eq!(
        log.take(),
        vec!["attached app", "attached header", "attached body"]
    );

    rig.mount(vec![]).unwrap();
    assert_eq!(
        log.take(),
        vec!["detached header", "detached body", "detached app"]
    );
    assert!(rig.host.tree().is_empty());
    assert_eq!(rig.engine.tree().len(), 1);
}

#[test]
fn updated_runs_only_when_props_change() {
    let log = EventLog::new();
    let lifecycle = log.lifecycle("box");
    let mut rig = EngineTestBuilder::new().build().unwrap();
    let decl = |width: i64| -> Vec<Declaration> {
        vec![HostDecl::new("box")
            .prop("width", width)
            .lifecycle(Arc::clone(&lifecycle))
            .into()]
    };

    rig.mount(decl(1)).unwrap();
    rig.mount(decl(1)).unwrap();
    rig.mount(decl(2)).unwrap();

    assert_eq!(log.take(), vec!["attached box", "updated box"]);
}

#[test]
fn callback_failures_are_isolated_to_their_node() {
    let log = EventLog::new();
    let mut rig = EngineTestBuilder::new().build().unwrap();
    let children = vec![
        HostDecl::new("bad")
            .lifecycle(log.failing_lifecycle("bad"))
            .into(),
        HostDecl::new("good").lifecycle(log.lifecycle("good")).into(),
    ];

    let report = rig.mount(children).unwrap();

    let bad = rig.path(&[0]).unwrap();
    let failures = &report.commits[0].callback_failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, bad);
    assert_eq!(failures[0].phase, CallbackPhase::Attached);
    assert_eq!(log.events(), vec!["attached bad", "attached good"]);
    assert_eq!(rig.host.labels(), vec!["bad", "good"]);
}

#[test]
fn effects_clean_up_before_rerun_and_on_removal() {
    let log = EventLog::new();
    let counter = Counter::with_effect(log.effect("count"));
    let evaluations = counter.evaluations();
    let mut rig = EngineTestBuilder::new()
        .with_component(Arc::new(counter))
        .build()
        .unwrap();
    let id = make_component_id("Counter");

    rig.mount(vec![Declaration::composite(id).into()]).unwrap();
    assert_eq!(log.take(), vec!["effect count"]);
    let node = rig.path(&[0]).unwrap();

    rig.engine
        .set_state(node, 0, StateUpdate::map(|v| Value::from(v.as_i64().unwrap_or(0) + 1)), Priority::Normal)
        .unwrap();
    rig.flush().unwrap();
    assert_eq!(log.take(), vec!["cleanup count", "effect count"]);
    assert_eq!(rig.engine.state(node, 0), Some(&Value::from(1)));
    assert_eq!(rig.host.labels(), vec!["text:count:1"]);

    rig.engine
        .set_state(node, 0, Value::from(1), Priority::Normal)
        .unwrap();
    rig.flush().unwrap();
    assert!(log.take().is_empty());
    assert_eq!(evaluations.count(), 3);

    rig.mount(vec![]).unwrap();
    assert_eq!(log.take(), vec!["cleanup count"]);
}

#[test]
fn observer_sees_every_commit_and_cannot_break_the_engine() {
    let seen: Arc<Mutex<Vec<(Priority, CommitMetrics)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let mut rig = EngineTestBuilder::new().build().unwrap();
    rig.engine.set_commit_observer(Arc::new(
        move |lane: Priority, metrics: &CommitMetrics| -> Result<(), CallbackError> {
            sink.lock().unwrap().push((lane, *metrics));
            Err(CallbackError::new("observer is grumpy"))
        },
    ));

    rig.mount(vec![text("a").into()]).unwrap();
    rig.render(NodeId::ROOT, vec![text("b").into()], Priority::UserBlocking)
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, Priority::Normal);
    assert_eq!(seen[1].0, Priority::UserBlocking);
    assert_eq!(seen[0].1.host_ops, 2);
    assert_eq!(seen[1].1.ops, 1);
    assert!(seen[1].1.units > 0);
    assert_eq!(rig.host.labels(), vec!["text:b"]);
}
