// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Arbor crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`callbacks`] - Lifecycle and effect recorders over a shared event log
//! - [`components`] - Component fixtures (labels, counters, suspending, failing)
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`engine`] - Engine builder, test rig, and keyed-list declarations
//! - [`host`] - Host renderer double recording every batch

pub mod callbacks;
pub mod components;
pub mod config;
pub mod engine;
pub mod host;

// Re-export commonly used items at crate root for convenience
pub use callbacks::EventLog;
pub use components::{
    text, Awaiting, Counter, Evaluations, Failing, Flaky, HookShifter, Label, Panicking,
    TEXT_KIND,
};
pub use config::InMemoryConfigStore;
pub use engine::{keyed_items, keyed_list, EngineTestBuilder, TestRig};
pub use host::RecordingHost;
