// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use arbor_core::{
    make_component_id, Declaration, Diagnostic, EngineConfig, EngineError, ErrorBoundaryDecl,
    EvalError, NodeId, Priority, SlotKind,
};
use arbor_dry_tests::{
    text, EngineTestBuilder, Failing, Flaky, HookShifter, Panicking, TestRig,
};

fn composite(name: &str) -> arbor_core::CompositeDecl {
    Declaration::composite(make_component_id(name))
}

fn rig() -> TestRig {
    EngineTestBuilder::new()
        .with_component(Arc::new(Failing))
        .with_component(Arc::new(Panicking))
        .with_component(Arc::new(HookShifter))
        .build()
        .unwrap()
}

fn guarded(child: impl Into<Declaration>) -> Declaration {
    ErrorBoundaryDecl::new([text("fallback")], [child]).into()
}

fn caught(rig: &TestRig, boundary: NodeId) -> Option<EvalError> {
    rig.engine
        .tree()
        .get(boundary)
        .and_then(|n| n.error_boundary())
        .and_then(|r| r.error.clone())
}

#[test]
fn failing_component_is_replaced_by_the_fallback() {
    let mut rig = rig();

    let report = rig
        .mount(vec![
            text("outside").into(),
            guarded(composite("Failing").prop("message", "bad input")),
        ])
        .unwrap();

    let boundary = rig.path(&[1]).unwrap();
    let expected = EvalError::Failed {
        component: "Failing".into(),
        message: "bad input".into(),
    };
    assert_eq!(rig.host.labels(), vec!["text:outside", "text:fallback"]);
    assert_eq!(caught(&rig, boundary), Some(expected.clone()));
    assert!(report.commits[0].diagnostics.contains(&Diagnostic::BoundaryCaught {
        boundary,
        error: expected,
    }));
}

#[test]
fn panics_are_caught_like_failures() {
    let mut rig = rig();

    rig.mount(vec![guarded(composite("Panicking"))]).unwrap();

    let boundary = rig.path(&[0]).unwrap();
    match caught(&rig, boundary) {
        Some(EvalError::Failed { component, message }) => {
            assert_eq!(component, "Panicking");
            assert!(message.contains("component exploded"));
        }
        other => unreachable!("unexpected boundary state: {other:?}"),
    }
    assert_eq!(rig.host.labels(), vec!["text:fallback"]);
}

#[test]
fn hook_order_change_is_reported_to_the_boundary() {
    let mut rig = rig();
    rig.mount(vec![guarded(composite("HookShifter"))]).unwrap();
    assert_eq!(rig.host.labels(), vec!["text:shifter:0"]);
    let boundary = rig.path(&[0]).unwrap();
    let shifter = rig.path(&[0, 0]).unwrap();

    rig.mount(vec![guarded(composite("HookShifter").prop("shift", true))])
        .unwrap();

    assert_eq!(
        caught(&rig, boundary),
        Some(EvalError::HookOrder {
            node: shifter,
            slot: 0,
            expected: Some(SlotKind::State),
            found: Some(SlotKind::Memo),
        })
    );
    assert_eq!(rig.host.labels(), vec!["text:fallback"]);
    assert!(!rig.engine.tree().contains(shifter));
}

#[test]
fn hook_order_checking_can_be_disabled() {
    let mut rig = EngineTestBuilder::new()
        .with_config(EngineConfig {
            check_hook_order: false,
            ..EngineConfig::default()
        })
        .with_component(Arc::new(HookShifter))
        .build()
        .unwrap();
    rig.mount(vec![guarded(composite("HookShifter"))]).unwrap();

    rig.mount(vec![guarded(composite("HookShifter").prop("shift", true))])
        .unwrap();

    let boundary = rig.path(&[0]).unwrap();
    assert_eq!(caught(&rig, boundary), None);
}

#[test]
fn boundary_recovers_when_redeclared() {
    let mut rig = rig();
    rig.mount(vec![guarded(composite("Failing"))]).unwrap();
    let boundary = rig.path(&[0]).unwrap();
    assert!(caught(&rig, boundary).is_some());

    rig.mount(vec![guarded(composite("Failing").prop("fail", false))])
        .unwrap();

    assert_eq!(caught(&rig, boundary), None);
    assert_eq!(rig.path(&[0]), Some(boundary));
    assert_eq!(rig.host.labels(), vec!["text:ok"]);
}

#[test]
fn reset_rerenders_the_primary_children() {
    let (flaky, failing) = Flaky::new();
    let mut rig = EngineTestBuilder::new()
        .with_component(flaky)
        .build()
        .unwrap();
    rig.mount(vec![guarded(composite("Flaky"))]).unwrap();
    let boundary = rig.path(&[0]).unwrap();
    assert_eq!(rig.host.labels(), vec!["text:fallback"]);

    rig.engine
        .reset_error_boundary(boundary, Priority::Normal)
        .unwrap();
    let report = rig.flush().unwrap();
    assert!(matches!(
        report.commits[0].diagnostics.as_slice(),
        [Diagnostic::BoundaryCaught { .. }]
    ));
    assert_eq!(rig.host.labels(), vec!["text:fallback"]);

    failing.store(false, Ordering::SeqCst);
    rig.engine
        .reset_error_boundary(boundary, Priority::Normal)
        .unwrap();
    rig.flush().unwrap();
    assert_eq!(caught(&rig, boundary), None);
    assert_eq!(rig.host.labels(), vec!["text:recovered"]);

    let text_node = rig.path(&[0, 0, 0]).unwrap();
    assert!(matches!(
        rig.engine.reset_error_boundary(text_node, Priority::Normal),
        Err(EngineError::InvalidTarget(_))
    ));
}

#[test]
fn uncaught_errors_unmount_the_tree() {
    let mut rig = rig();
    rig.mount(vec![text("before").into()]).unwrap();

    let result = rig.mount(vec![text("before").into(), composite("Failing").into()]);

    assert!(matches!(
        result,
        Err(EngineError::Uncaught {
            lane: Priority::Normal,
            error: EvalError::Failed { .. }
        })
    ));
    assert!(rig.engine.tree().children(NodeId::ROOT).is_empty());
    assert!(rig.host.tree().is_empty());
    assert_eq!(rig.flush().unwrap().outcome, arbor_core::WorkOutcome::Idle);

    rig.mount(vec![text("after").into()]).unwrap();
    assert_eq!(rig.host.labels(), vec!["text:after"]);
}

#[test]
fn nested_boundaries_catch_at_the_nearest() {
    let mut rig = rig();
    let inner: Declaration = ErrorBoundaryDecl::new([text("inner")], [composite("Failing")]).into();

    rig.mount(vec![ErrorBoundaryDecl::new(
        [text("outer")],
        [inner, text("sibling").into()],
    )
    .into()])
        .unwrap();

    assert_eq!(rig.host.labels(), vec!["text:inner", "text:sibling"]);
    let outer = rig.path(&[0]).unwrap();
    assert_eq!(caught(&rig, outer), None);
}
