// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine builder and a rig bundling engine, host, and clock.

use std::sync::Arc;

use arbor_core::{
    Component, Declaration, Engine, EngineConfig, EngineError, HostDecl, ManualClock, NodeId,
    Priority, WorkReport,
};

use crate::components::text;
use crate::host::RecordingHost;

/// Builder for engines on a [`ManualClock`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use arbor_dry_tests::{EngineTestBuilder, Label};
///
/// let rig = EngineTestBuilder::new()
///     .with_component(Arc::new(Label::default()))
///     .build()
///     .unwrap();
/// assert!(rig.host.tree().is_empty());
/// ```
#[derive(Default)]
pub struct EngineTestBuilder {
    config: EngineConfig,
    components: Vec<Arc<dyn Component>>,
}

impl EngineTestBuilder {
    /// Builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Cap units per `perform_work` call.
    pub fn with_max_units(mut self, units: usize) -> Self {
        self.config.max_units_per_slice = Some(units);
        self
    }

    /// Register a component at build time.
    pub fn with_component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    /// Build the rig. Fails when two components share a name.
    pub fn build(self) -> Result<TestRig, EngineError> {
        let clock = ManualClock::new();
        let mut engine = Engine::with_clock(self.config, Arc::new(clock.clone()));
        for component in self.components {
            engine.register_component(component)?;
        }
        Ok(TestRig {
            engine,
            host: RecordingHost::new(),
            clock,
        })
    }
}

/// Engine wired to a recording host and a manual clock.
pub struct TestRig {
    /// Engine under test.
    pub engine: Engine,
    /// Host receiving commits.
    pub host: RecordingHost,
    /// Clock shared with the engine.
    pub clock: ManualClock,
}

impl TestRig {
    /// Schedules `children` for `target` and flushes.
    pub fn render(
        &mut self,
        target: NodeId,
        children: Vec<Declaration>,
        priority: Priority,
    ) -> Result<WorkReport, EngineError> {
        self.engine.schedule_update(target, children, priority)?;
        self.flush()
    }

    /// Replaces the root's children at normal priority and flushes.
    pub fn mount(&mut self, children: Vec<Declaration>) -> Result<WorkReport, EngineError> {
        self.render(NodeId::ROOT, children, Priority::Normal)
    }

    /// Runs until idle or waiting.
    pub fn flush(&mut self) -> Result<WorkReport, EngineError> {
        self.engine.flush(&mut self.host)
    }

    /// Runs at most `units` units.
    pub fn step(&mut self, units: usize) -> Result<WorkReport, EngineError> {
        self.engine.perform_units(&mut self.host, units)
    }

    /// Committed child `index` of `parent`.
    pub fn child(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.engine.tree().children(parent).get(index).copied()
    }

    /// Follows child indices from the root.
    pub fn path(&self, indices: &[usize]) -> Option<NodeId> {
        indices
            .iter()
            .try_fold(NodeId::ROOT, |node, &i| self.child(node, i))
    }
}

/// `text` nodes keyed and labelled by `keys`.
pub fn keyed_items(keys: &[&str]) -> Vec<Declaration> {
    keys.iter().map(|k| text(*k).key(*k).into()).collect()
}

/// `list` host node over [`keyed_items`].
pub fn keyed_list(keys: &[&str]) -> HostDecl {
    HostDecl::new("list").children(keyed_items(keys))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::components::Label;
    use arbor_core::Key;

    #[test]
    fn duplicate_components_fail_the_build() {
        let result = EngineTestBuilder::new()
            .with_component(Arc::new(Label::default()))
            .with_component(Arc::new(Label::default()))
            .build();
        assert!(matches!(result, Err(EngineError::DuplicateComponentName(_))));
    }

    #[test]
    fn mount_commits_one_batch() {
        let mut rig = EngineTestBuilder::new().build().unwrap();
        let report = rig.mount(vec![keyed_list(&["a", "b"]).into()]).unwrap();
        assert_eq!(report.commits.len(), 1);
        assert_eq!(rig.host.batches().len(), 1);
        assert_eq!(rig.host.labels(), vec!["list", "text:a", "text:b"]);
        let b = rig.path(&[0, 1]).unwrap();
        assert_eq!(rig.engine.tree().get(b).unwrap().key(), &Key::explicit("b"));
    }
}
