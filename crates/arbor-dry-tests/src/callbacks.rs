// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lifecycle and effect recorders sharing one ordered event log.

use std::sync::{Arc, Mutex};

use arbor_core::{CallbackContext, CallbackError, Cleanup, Effect, Lifecycle};

/// Shared, ordered log of callback events.
///
/// Entries read `"<phase> <label>"`, e.g. `"attached row-a"` or
/// `"cleanup timer"`.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event.
    pub fn push(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.into());
    }

    /// Snapshot of all events.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Removes and returns all events.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Index of the first event equal to `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Lifecycle callbacks that log under `label`.
    pub fn lifecycle(&self, label: impl Into<String>) -> Arc<dyn Lifecycle> {
        Arc::new(RecordingLifecycle {
            log: self.clone(),
            label: label.into(),
            fail_attach: false,
        })
    }

    /// Lifecycle whose `attached` fails after logging.
    pub fn failing_lifecycle(&self, label: impl Into<String>) -> Arc<dyn Lifecycle> {
        Arc::new(RecordingLifecycle {
            log: self.clone(),
            label: label.into(),
            fail_attach: true,
        })
    }

    /// Effect that logs `effect <label>` and returns a cleanup logging
    /// `cleanup <label>`.
    pub fn effect(&self, label: impl Into<String>) -> Arc<dyn Effect> {
        Arc::new(RecordingEffect {
            log: self.clone(),
            label: label.into(),
        })
    }
}

struct RecordingLifecycle {
    log: EventLog,
    label: String,
    fail_attach: bool,
}

impl Lifecycle for RecordingLifecycle {
    fn attached(&self, _cx: &CallbackContext<'_>) -> Result<(), CallbackError> {
        self.log.push(format!("attached {}", self.label));
        if self.fail_attach {
            return Err(CallbackError::new(format!("{} refused to attach", self.label)));
        }
        Ok(())
    }

    fn updated(&self, _cx: &CallbackContext<'_>) -> Result<(), CallbackError> {
        self.log.push(format!("updated {}", self.label));
        Ok(())
    }

    fn detached(&self, _cx: &CallbackContext<'_>) -> Result<(), CallbackError> {
        self.log.push(format!("detached {}", self.label));
        Ok(())
    }
}

struct RecordingEffect {
    log: EventLog,
    label: String,
}

impl Effect for RecordingEffect {
    fn run(&self, _cx: &CallbackContext<'_>) -> Result<Option<Cleanup>, CallbackError> {
        self.log.push(format!("effect {}", self.label));
        let log = self.log.clone();
        let label = self.label.clone();
        Ok(Some(Box::new(move || {
            log.push(format!("cleanup {label}"));
            Ok(())
        })))
    }
}
