// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! arbor-core: incremental UI-tree reconciliation and scheduling engine.
//!
//! Producers describe the intended tree as immutable [`Declaration`] values.
//! The [`Engine`] keeps the committed node tree, computes the edit script that
//! brings it in line with the latest declarations, and applies that script to
//! a [`HostRenderer`] in one batch per commit. Rendering is split into
//! per-node units run by a cooperative, priority-aware scheduler: a render can
//! yield at any unit boundary, be abandoned for a more urgent lane, or park
//! behind a suspense boundary until an awaited value settles.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod clock;
mod commit;
mod component;
mod config;
mod declaration;
mod engine;
mod hooks;
mod host;
mod ident;
mod props;
mod reconcile;
mod render;
mod scheduler;
mod suspense;
mod tree;

/// Time sources for budgets and starvation aging.
pub use clock::{Clock, ManualClock, SystemClock};
/// Commit reports, callback failures, and the observer hook.
pub use commit::{
    CallbackContext, CallbackError, CallbackFailure, CallbackPhase, CommitMetrics,
    CommitObserver, CommitReport, Diagnostic,
};
/// Composite components.
pub use component::{Component, EvalError, Evaluation};
/// Engine configuration and its storage port.
pub use config::{ConfigError, ConfigService, ConfigStore, EngineConfig, ENGINE_CONFIG_KEY};
/// Declarations of the intended tree.
pub use declaration::{
    CompositeDecl, Declaration, ErrorBoundaryDecl, HostDecl, Lifecycle, NodeTag, SuspenseDecl,
};
/// Engine surface.
pub use engine::{Engine, EngineError, WorkOutcome, WorkReport};
/// Hook cursor and state updates.
pub use hooks::{Cleanup, Effect, HookCell, Hooks, SlotKind, StateUpdate};
/// Host renderer port and the in-memory host.
pub use host::{HostError, HostOp, HostRenderer, HostTree};
/// Identifiers.
pub use ident::{make_component_id, ComponentId, Hash, Key, NodeId};
/// Declared configuration.
pub use props::Props;
/// Edit scripts.
pub use reconcile::{EditOp, EditScript};
/// Lanes.
pub use scheduler::{LaneState, LaneStatus, Priority};
/// Awaitable values and suspense records.
pub use suspense::{
    AwaitHandle, AwaitStatus, Awaitable, Deferred, SettleCallback, SubscriptionId,
    SuspenseRecord, SuspenseState,
};
/// Committed tree.
pub use tree::{ErrorBoundaryRecord, Node, NodeKind, NodeTree, TreeDigest, TreeError};
