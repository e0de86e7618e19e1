// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Text and JSON rendering of demo runs and engine config.

use std::fmt::Write as _;
use std::path::Path;

use arbor_core::{CommitReport, Diagnostic, EngineConfig, Priority, WorkOutcome};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use serde::Serialize;

use crate::demo::DemoRun;

#[derive(Debug, Serialize)]
struct CommitSummary {
    lane: Priority,
    ops: usize,
    host_ops: usize,
    units: usize,
    interruptions: u32,
    diagnostics: Vec<String>,
    callback_failures: usize,
    host_error: Option<String>,
}

impl From<&CommitReport> for CommitSummary {
    fn from(c: &CommitReport) -> Self {
        Self {
            lane: c.lane,
            ops: c.metrics.ops,
            host_ops: c.metrics.host_ops,
            units: c.metrics.units,
            interruptions: c.metrics.interruptions,
            diagnostics: c.diagnostics.iter().map(describe).collect(),
            callback_failures: c.callback_failures.len(),
            host_error: c.host_error.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
struct StepSummary<'a> {
    label: &'a str,
    outcome: &'static str,
    units: usize,
    commits: Vec<CommitSummary>,
}

#[derive(Debug, Serialize)]
struct DemoSummary<'a> {
    scenario: &'static str,
    steps: Vec<StepSummary<'a>>,
    host: Vec<String>,
    host_digest: String,
}

const fn outcome_name(outcome: WorkOutcome) -> &'static str {
    match outcome {
        WorkOutcome::Idle => "idle",
        WorkOutcome::Yielded => "yielded",
        WorkOutcome::Waiting => "waiting",
    }
}

/// One-line description of a render diagnostic.
pub fn describe(diagnostic: &Diagnostic) -> String {
    match diagnostic {
        Diagnostic::DuplicateKey { parent, key, index } => {
            format!("duplicate key {key:?} under {parent} at {index}")
        }
        Diagnostic::MalformedKey { parent, index } => {
            format!("empty key under {parent} at {index}")
        }
        Diagnostic::BoundaryCaught { boundary, error } => {
            format!("boundary {boundary} caught: {error}")
        }
        Diagnostic::Suspended { boundary } => format!("boundary {boundary} suspended"),
    }
}

fn commit_table(commits: &[CommitReport]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec![
            "lane",
            "ops",
            "host ops",
            "units",
            "interruptions",
            "diagnostics",
        ]);
    for c in commits {
        let diagnostics: Vec<String> = c.diagnostics.iter().map(describe).collect();
        table.add_row(vec![
            c.lane.to_string(),
            c.metrics.ops.to_string(),
            c.metrics.host_ops.to_string(),
            c.metrics.units.to_string(),
            c.metrics.interruptions.to_string(),
            diagnostics.join("\n"),
        ]);
    }
    table
}

/// Human-readable report: one commit table per step, then the host tree.
pub fn render_text(run: &DemoRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "scenario: {}", run.scenario.as_str());
    for (i, step) in run.steps.iter().enumerate() {
        let report = &step.report;
        let _ = writeln!(
            out,
            "\n[{}] {} ({} units, {})",
            i + 1,
            step.label,
            report.units,
            outcome_name(report.outcome)
        );
        if report.commits.is_empty() {
            let _ = writeln!(out, "no commit");
        } else {
            let _ = writeln!(out, "{}", commit_table(&report.commits));
        }
        for c in &report.commits {
            if let Some(e) = &c.host_error {
                let _ = writeln!(out, "host error in {} commit: {e}", c.lane);
            }
            for f in &c.callback_failures {
                let _ = writeln!(out, "callback {:?} failed on {}: {}", f.phase, f.node, f.message);
            }
        }
    }
    let _ = writeln!(out, "\nhost tree:");
    out.push_str(&run.host.outline());
    out
}

/// Machine-readable report.
pub fn render_json(run: &DemoRun) -> Result<String, serde_json::Error> {
    let summary = DemoSummary {
        scenario: run.scenario.as_str(),
        steps: run
            .steps
            .iter()
            .map(|s| StepSummary {
                label: &s.label,
                outcome: outcome_name(s.report.outcome),
                units: s.report.units,
                commits: s.report.commits.iter().map(CommitSummary::from).collect(),
            })
            .collect(),
        host: run.host.outline().lines().map(str::to_owned).collect(),
        host_digest: hex::encode(run.host.digest()),
    };
    serde_json::to_string_pretty(&summary)
}

/// Config values with the file they came from.
pub fn config_table(config: &EngineConfig, source: &Path, stored: bool) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["setting", "value"]);
    table.add_row(vec!["frame_budget_ms".to_owned(), config.frame_budget_ms.to_string()]);
    table.add_row(vec![
        "max_interruptions".to_owned(),
        config.max_interruptions.to_string(),
    ]);
    table.add_row(vec![
        "starvation_timeout_ms".to_owned(),
        config.starvation_timeout_ms.to_string(),
    ]);
    table.add_row(vec![
        "max_units_per_slice".to_owned(),
        config
            .max_units_per_slice
            .map_or_else(|| "none".to_owned(), |n| n.to_string()),
    ]);
    table.add_row(vec![
        "check_hook_order".to_owned(),
        config.check_hook_order.to_string(),
    ]);
    let origin = if stored { "" } else { " (not written; defaults)" };
    format!("config: {}{origin}\n{table}\n", source.display())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::demo::{run, Scenario};

    #[test]
    fn text_report_lists_every_step() {
        let demo = run(Scenario::KeyedReorder, EngineConfig::default()).unwrap();
        let text = render_text(&demo);
        assert!(text.contains("scenario: keyed-reorder"));
        assert!(text.contains("[3] drop a and c, add x"));
        assert!(text.contains("host tree:"));
    }

    #[test]
    fn json_report_carries_lanes_and_diagnostics() {
        let demo = run(Scenario::Suspense, EngineConfig::default()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&render_json(&demo).unwrap()).unwrap();
        assert_eq!(json["scenario"], "suspense");
        assert_eq!(json["steps"][0]["commits"][0]["lane"], "normal");
        let diagnostic = json["steps"][0]["commits"][0]["diagnostics"][0].as_str().unwrap();
        assert!(diagnostic.ends_with("suspended"));
        assert_eq!(json["host_digest"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn config_table_marks_defaults() {
        let text = config_table(&EngineConfig::default(), Path::new("/tmp/engine.json"), false);
        assert!(text.contains("(not written; defaults)"));
        assert!(text.contains("max_interruptions"));
    }
}
