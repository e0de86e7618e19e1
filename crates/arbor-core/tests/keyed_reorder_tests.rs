// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use arbor_core::{Declaration, Diagnostic, EditOp, HostDecl, HostOp, Key, NodeId, Priority};
use arbor_dry_tests::{keyed_items, keyed_list, text, EngineTestBuilder, TestRig};
use proptest::prelude::*;

fn rig_with_list(keys: &[&str]) -> (TestRig, NodeId) {
    let mut rig = EngineTestBuilder::new().build().unwrap();
    rig.mount(vec![keyed_list(keys).into()]).unwrap();
    let list = rig.path(&[0]).unwrap();
    (rig, list)
}

fn ids_by_key(rig: &TestRig, list: NodeId) -> Vec<(Key, NodeId)> {
    let mut out: Vec<(Key, NodeId)> = rig
        .engine
        .tree()
        .children(list)
        .iter()
        .map(|id| (rig.engine.tree().get(*id).unwrap().key().clone(), *id))
        .collect();
    out.sort();
    out
}

#[test]
fn moving_one_item_to_the_end_is_a_single_move() {
    let (mut rig, list) = rig_with_list(&["a", "b", "c", "d", "e"]);
    let before = ids_by_key(&rig, list);

    let report = rig
        .render(list, keyed_items(&["b", "c", "d", "e", "a"]), Priority::Normal)
        .unwrap();

    let commit = &report.commits[0];
    assert_eq!(commit.script.moves(), 1);
    assert_eq!(commit.script.inserts(), 0);
    assert_eq!(commit.script.deletes(), 0);
    assert_eq!(commit.script.updates(), 0);
    let a = before[0].1;
    assert_eq!(
        commit.host_ops,
        vec![HostOp::Insert {
            node: a,
            parent: list,
            before: None,
        }]
    );
    assert_eq!(ids_by_key(&rig, list), before);
    assert_eq!(
        rig.host.labels(),
        vec!["list", "text:b", "text:c", "text:d", "text:e", "text:a"]
    );
}

#[test]
fn moving_one_item_to_the_front_is_a_single_move() {
    let (mut rig, list) = rig_with_list(&["a", "b", "c", "d"]);
    let d = rig.child(list, 3).unwrap();

    let report = rig
        .render(list, keyed_items(&["d", "a", "b", "c"]), Priority::Normal)
        .unwrap();

    let ops = &report.commits[0].script.ops;
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], EditOp::Move { node, before: Some(_), .. } if node == d));
    assert_eq!(rig.child(list, 0), Some(d));
}

#[test]
fn unkeyed_siblings_pair_by_position() {
    let mut rig = EngineTestBuilder::new().build().unwrap();
    rig.mount(vec![text("x").into(), text("y").into()]).unwrap();
    let first = rig.child(NodeId::ROOT, 0).unwrap();

    let report = rig.mount(vec![text("y").into(), text("x").into()]).unwrap();

    let script = &report.commits[0].script;
    assert_eq!(script.updates(), 2);
    assert_eq!(script.moves(), 0);
    assert_eq!(rig.child(NodeId::ROOT, 0), Some(first));
    assert_eq!(rig.host.labels(), vec!["text:y", "text:x"]);
}

#[test]
fn changing_the_kind_under_a_key_recreates_the_node() {
    let (mut rig, list) = rig_with_list(&["a"]);
    let old = rig.child(list, 0).unwrap();

    let report = rig
        .render(
            list,
            vec![HostDecl::new("image").key("a").into()],
            Priority::Normal,
        )
        .unwrap();

    let script = &report.commits[0].script;
    assert_eq!(script.deletes(), 1);
    assert_eq!(script.inserts(), 1);
    assert!(!rig.engine.tree().contains(old));
    assert_eq!(rig.host.labels(), vec!["list", "image"]);
}

#[test]
fn removed_and_added_keys_delete_and_insert() {
    let (mut rig, list) = rig_with_list(&["a", "b", "c"]);
    let report = rig
        .render(list, keyed_items(&["c", "x", "a"]), Priority::Normal)
        .unwrap();

    let script = &report.commits[0].script;
    assert_eq!(script.deletes(), 1);
    assert_eq!(script.inserts(), 1);
    assert_eq!(script.moves(), 1);
    assert_eq!(rig.host.labels(), vec!["list", "text:c", "text:x", "text:a"]);
}

#[test]
fn duplicate_and_empty_keys_are_reported_and_paired_by_position() {
    let mut rig = EngineTestBuilder::new().build().unwrap();
    let children: Vec<Declaration> = vec![
        text("one").key("k").into(),
        text("two").key("k").into(),
        text("three").key("").into(),
    ];

    let report = rig.mount(vec![HostDecl::new("list").children(children).into()]).unwrap();

    let list = rig.path(&[0]).unwrap();
    let diagnostics = &report.commits[0].diagnostics;
    assert!(diagnostics.contains(&Diagnostic::DuplicateKey {
        parent: list,
        key: "k".into(),
        index: 1,
    }));
    assert!(diagnostics.contains(&Diagnostic::MalformedKey {
        parent: list,
        index: 2,
    }));
    assert_eq!(
        rig.host.labels(),
        vec!["list", "text:one", "text:two", "text:three"]
    );
    let second = rig.child(list, 1).unwrap();
    assert_eq!(rig.engine.tree().get(second).unwrap().key(), &Key::Index(1));
}

const KEYS: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_permutation_keeps_identity_and_only_moves(order in Just(KEYS.to_vec()).prop_shuffle()) {
        let (mut rig, list) = rig_with_list(&KEYS);
        let before = ids_by_key(&rig, list);

        let report = rig.render(list, keyed_items(&order), Priority::Normal).unwrap();

        prop_assert_eq!(ids_by_key(&rig, list), before);
        if let Some(commit) = report.commits.first() {
            prop_assert_eq!(commit.script.inserts(), 0);
            prop_assert_eq!(commit.script.deletes(), 0);
            prop_assert!(commit.script.moves() < KEYS.len());
        }
        let mut expected = vec!["list".to_owned()];
        expected.extend(order.iter().map(|k| format!("text:{k}")));
        prop_assert_eq!(rig.host.labels(), expected);
    }
}
