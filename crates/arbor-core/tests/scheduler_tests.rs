// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use arbor_core::{
    make_component_id, Declaration, EngineConfig, HostDecl, HostOp, LaneState, NodeId, Priority,
    StateUpdate, WorkOutcome,
};
use arbor_dry_tests::{keyed_items, keyed_list, text, Counter, EngineTestBuilder, TestRig};
use serde_json::Value;

/// Root -> app -> [list(keys), status].
fn app_rig(config: EngineConfig, keys: &[&str]) -> (TestRig, NodeId, NodeId) {
    let mut rig = EngineTestBuilder::new().with_config(config).build().unwrap();
    rig.mount(vec![HostDecl::new("app")
        .child(keyed_list(keys).key("list"))
        .child(HostDecl::new("status").key("status").child(text("idle")))
        .into()])
        .unwrap();
    let list = rig.path(&[0, 0]).unwrap();
    let status = rig.path(&[0, 1]).unwrap();
    (rig, list, status)
}

fn add(n: i64) -> StateUpdate {
    StateUpdate::map(move |v| Value::from(v.as_i64().unwrap_or(0) + n))
}

#[test]
fn urgent_work_commits_before_an_in_flight_render() {
    let (mut rig, list, status) = app_rig(EngineConfig::default(), &["a", "b", "c"]);

    rig.engine
        .schedule_update(list, keyed_items(&["c", "b", "a"]), Priority::Normal)
        .unwrap();
    assert!(rig.step(2).unwrap().commits.is_empty());
    assert_eq!(rig.engine.lane_status(Priority::Normal).state, LaneState::InProgress);

    rig.engine
        .schedule_update(status, vec![text("busy").into()], Priority::Immediate)
        .unwrap();
    let report = rig.flush().unwrap();

    let lanes: Vec<Priority> = report.commits.iter().map(|c| c.lane).collect();
    assert_eq!(lanes, vec![Priority::Immediate, Priority::Normal]);
    assert_eq!(report.commits[1].metrics.interruptions, 1);
    assert_eq!(
        rig.host.labels(),
        vec!["app", "list", "text:c", "text:b", "text:a", "status", "text:busy"]
    );
    assert_eq!(rig.engine.lane_status(Priority::Normal).state, LaneState::Committed);
}

#[test]
fn interrupted_lane_commits_despite_ten_thousand_urgent_updates() {
    let config = EngineConfig {
        max_interruptions: 8,
        ..EngineConfig::default()
    };
    let keys: Vec<String> = (0..40).map(|i| format!("k{i}")).collect();
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    let (mut rig, list, status) = app_rig(config, &keys);
    let reversed: Vec<&str> = keys.iter().rev().copied().collect();

    rig.engine
        .schedule_update(list, keyed_items(&reversed), Priority::Normal)
        .unwrap();

    let mut normal_commit = None;
    let mut urgent_commits = 0;
    for i in 0..10_000 {
        rig.engine
            .schedule_update(status, vec![text(format!("tick-{i}")).into()], Priority::Immediate)
            .unwrap();
        let report = rig.step(6).unwrap();
        for commit in report.commits {
            match commit.lane {
                Priority::Normal => normal_commit = Some((i, commit.metrics.interruptions)),
                _ => urgent_commits += 1,
            }
        }
        if normal_commit.is_some() {
            break;
        }
    }

    let (iteration, interruptions) = normal_commit.expect("normal lane starved");
    assert!(iteration < 100, "normal lane took {iteration} iterations");
    assert_eq!(interruptions, 8);
    assert!(urgent_commits >= 8);
    let labels = rig.host.labels();
    assert_eq!(labels[2], "text:k39");
    assert_eq!(labels[41], "text:k0");
}

#[test]
fn lanes_waiting_past_the_timeout_run_first() {
    let (mut rig, list, status) = app_rig(EngineConfig::default(), &["a", "b"]);

    rig.engine
        .schedule_update(list, keyed_items(&["b", "a"]), Priority::Idle)
        .unwrap();
    rig.clock.advance(Duration::from_millis(600));
    rig.engine
        .schedule_update(status, vec![text("late").into()], Priority::Immediate)
        .unwrap();

    let status_before = rig.engine.lane_status(Priority::Idle);
    assert_eq!(status_before.effective, Priority::Immediate);
    assert_eq!(status_before.pending_targets, 1);

    let report = rig.flush().unwrap();
    let lanes: Vec<Priority> = report.commits.iter().map(|c| c.lane).collect();
    assert_eq!(lanes, vec![Priority::Idle, Priority::Immediate]);
}

#[test]
fn newer_declarations_supersede_pending_ones() {
    let (mut rig, list, _status) = app_rig(EngineConfig::default(), &["a"]);

    rig.engine
        .schedule_update(list, keyed_items(&["a", "b"]), Priority::Normal)
        .unwrap();
    rig.step(2).unwrap();
    rig.engine
        .schedule_update(list, keyed_items(&["c"]), Priority::UserBlocking)
        .unwrap();

    assert_eq!(rig.engine.lane_status(Priority::Normal).state, LaneState::Idle);
    let report = rig.flush().unwrap();
    assert_eq!(report.commits.len(), 1);
    assert_eq!(report.commits[0].lane, Priority::UserBlocking);
    assert_eq!(rig.host.labels(), vec!["app", "list", "text:c", "status", "text:idle"]);
}

#[test]
fn newer_override_wins_over_an_older_ancestor_redeclaration() {
    let (mut rig, list, _status) = app_rig(EngineConfig::default(), &["a"]);
    let app = |items: Vec<Declaration>| -> Vec<Declaration> {
        vec![HostDecl::new("app")
            .child(HostDecl::new("list").key("list").children(items))
            .child(HostDecl::new("status").key("status").child(text("idle")))
            .into()]
    };

    rig.engine
        .schedule_update(NodeId::ROOT, app(vec![text("old").into()]), Priority::Normal)
        .unwrap();
    rig.engine
        .schedule_update(list, vec![text("newest").into()], Priority::Normal)
        .unwrap();
    let report = rig.flush().unwrap();

    assert_eq!(report.commits.len(), 1);
    assert_eq!(
        rig.host.labels(),
        vec!["app", "list", "text:newest", "status", "text:idle"]
    );
    assert_eq!(rig.engine.lane_status(Priority::Normal).pending_targets, 0);

    rig.engine
        .schedule_update(list, vec![text("override").into()], Priority::Normal)
        .unwrap();
    rig.engine
        .schedule_update(NodeId::ROOT, app(vec![text("redeclared").into()]), Priority::Normal)
        .unwrap();
    rig.flush().unwrap();

    assert_eq!(
        rig.host.labels(),
        vec!["app", "list", "text:redeclared", "status", "text:idle"]
    );
    assert_eq!(rig.engine.lane_status(Priority::Normal).state, LaneState::Committed);
}

#[test]
fn superseded_declaration_in_an_in_flight_render_never_commits() {
    let (mut rig, list, status) = app_rig(EngineConfig::default(), &["a"]);

    rig.engine
        .schedule_update(status, vec![text("s1").into()], Priority::Immediate)
        .unwrap();
    rig.engine
        .schedule_update(list, vec![text("stale").into()], Priority::Immediate)
        .unwrap();
    assert!(rig.step(1).unwrap().commits.is_empty());

    rig.engine
        .schedule_update(list, vec![text("fresh").into()], Priority::Idle)
        .unwrap();
    let report = rig.flush().unwrap();

    let lanes: Vec<Priority> = report.commits.iter().map(|c| c.lane).collect();
    assert_eq!(lanes, vec![Priority::Immediate, Priority::Idle]);
    assert!(!format!("{:?}", rig.host.batches()).contains("stale"));
    assert_eq!(
        rig.host.labels(),
        vec!["app", "list", "text:fresh", "status", "text:s1"]
    );
}

#[test]
fn interrupted_diff_of_a_large_subtree_restarts_from_scratch() {
    let keys: Vec<String> = (0..10_000).map(|i| format!("k{i}")).collect();
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    let (mut rig, list, status) = app_rig(EngineConfig::default(), &keys);
    let relabelled: Vec<Declaration> = (0..10_000)
        .map(|i| text(format!("v{i}")).key(format!("k{i}")).into())
        .collect();

    rig.engine
        .schedule_update(list, relabelled, Priority::Normal)
        .unwrap();
    assert!(rig.step(2).unwrap().commits.is_empty());
    rig.engine
        .schedule_update(status, vec![text("busy").into()], Priority::Immediate)
        .unwrap();
    let report = rig.flush().unwrap();

    let lanes: Vec<Priority> = report.commits.iter().map(|c| c.lane).collect();
    assert_eq!(lanes, vec![Priority::Immediate, Priority::Normal]);
    // root, app, list, then every item
    let normal = &report.commits[1];
    assert_eq!(normal.metrics.units, 10_003);
    assert_eq!(normal.metrics.interruptions, 1);
    assert_eq!(normal.host_ops.len(), 10_000);
    assert_eq!(report.units, report.commits[0].metrics.units + 10_003);

    let labels = rig.host.labels();
    assert_eq!(labels.len(), 10_004);
    assert_eq!(labels[2], "text:v0");
    assert_eq!(labels[10_001], "text:v9999");
    assert_eq!(labels[10_002..], ["status", "text:busy"]);
}

#[test]
fn state_updates_from_two_lanes_are_rebased() {
    let mut rig = EngineTestBuilder::new()
        .with_component(Arc::new(Counter::new()))
        .build()
        .unwrap();
    rig.mount(vec![Declaration::composite(make_component_id("Counter")).into()])
        .unwrap();
    let counter = rig.path(&[0]).unwrap();
    let label = rig.path(&[0, 0]).unwrap();

    rig.engine.set_state(counter, 0, add(1), Priority::Normal).unwrap();
    rig.engine.set_state(counter, 0, add(10), Priority::Immediate).unwrap();
    let report = rig.flush().unwrap();

    let lanes: Vec<Priority> = report.commits.iter().map(|c| c.lane).collect();
    assert_eq!(lanes, vec![Priority::Immediate, Priority::Normal]);
    let shown: Vec<&HostOp> = report.commits[0].host_ops.iter().collect();
    assert!(matches!(
        shown.as_slice(),
        [HostOp::SetConfig { node, props }] if *node == label && props.get_str("value") == Some("count:10")
    ));
    assert_eq!(rig.engine.state(counter, 0), Some(&Value::from(11)));
    assert_eq!(rig.host.labels(), vec!["text:count:11"]);
}

#[test]
fn work_for_removed_nodes_is_dropped() {
    let mut rig = EngineTestBuilder::new()
        .with_component(Arc::new(Counter::new()))
        .build()
        .unwrap();
    rig.mount(vec![Declaration::composite(make_component_id("Counter")).into()])
        .unwrap();
    let counter = rig.path(&[0]).unwrap();

    rig.engine.set_state(counter, 0, add(1), Priority::Idle).unwrap();
    rig.render(NodeId::ROOT, vec![], Priority::Immediate).unwrap();

    assert_eq!(rig.engine.lane_status(Priority::Idle).pending_targets, 0);
    assert!(rig.engine.set_state(counter, 0, add(1), Priority::Idle).is_err());
    assert_eq!(rig.flush().unwrap().outcome, WorkOutcome::Idle);
}

#[test]
fn frame_budget_yields_between_units() {
    let mut rig = EngineTestBuilder::new()
        .with_max_units(2)
        .build()
        .unwrap();
    rig.engine
        .schedule_update(NodeId::ROOT, vec![keyed_list(&["a", "b", "c"]).into()], Priority::Normal)
        .unwrap();

    let mut slices = 0;
    loop {
        let report = rig.engine.perform_work(&mut rig.host).unwrap();
        slices += 1;
        assert!(report.units <= 2);
        if report.outcome != WorkOutcome::Yielded {
            break;
        }
    }
    assert!(slices > 1);
    assert_eq!(rig.host.batches().len(), 1);
    assert_eq!(rig.host.labels(), vec!["list", "text:a", "text:b", "text:c"]);
}
