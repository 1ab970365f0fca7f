use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logger::indent;
use crate::state::{Failure, FailureCategory};
use crate::testgen::candidate::CompilationUnit;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: CompilationUnit,
    pub reason: String,
    pub detail: String,
}

/// Aggregate of one run, built once after the scheduler drains.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_units: usize,
    pub successes: Vec<CompilationUnit>,
    pub failures: BTreeMap<FailureCategory, Vec<UnitFailure>>,
    /// Units that never produced an outcome (ceiling or cancellation).
    pub unfinished: Vec<CompilationUnit>,
    pub cancelled: bool,
    pub ceiling_reached: bool,
}

impl RunSummary {
    pub fn new(
        started_at: DateTime<Utc>,
        total_units: usize,
        mut successes: Vec<CompilationUnit>,
        failures: impl IntoIterator<Item = (CompilationUnit, Failure)>,
        mut unfinished: Vec<CompilationUnit>,
    ) -> Self {
        successes.sort();
        unfinished.sort();

        let mut grouped: BTreeMap<FailureCategory, Vec<UnitFailure>> = BTreeMap::new();
        for (unit, f) in failures {
            grouped.entry(f.category).or_default().push(UnitFailure {
                unit,
                reason: f.reason,
                detail: f.detail,
            });
        }
        for list in grouped.values_mut() {
            list.sort_by(|a, b| a.unit.cmp(&b.unit));
        }

        Self {
            started_at,
            finished_at: Utc::now(),
            total_units,
            successes,
            failures: grouped,
            unfinished,
            cancelled: false,
            ceiling_reached: false,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failures.values().map(Vec::len).sum()
    }

    pub fn outcome_count(&self) -> usize {
        self.successes.len() + self.failure_count()
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0 && self.unfinished.is_empty() && !self.cancelled
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(55);
        let thin = "-".repeat(55);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        if self.cancelled {
            let _ = writeln!(out, "Run cancelled");
        } else if self.ceiling_reached {
            let _ = writeln!(out, "Run stopped at wall-clock ceiling");
        } else {
            let _ = writeln!(out, "All tasks completed");
        }
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Units discovered:       {}", self.total_units);
        let _ = writeln!(out, "Successful generations: {}", self.successes.len());
        let _ = writeln!(out, "Failed generations:     {}", self.failure_count());
        if !self.unfinished.is_empty() {
            let _ = writeln!(out, "Not completed:          {}", self.unfinished.len());
        }
        let _ = writeln!(out, "{thin}");

        if !self.failures.is_empty() {
            let _ = writeln!(out, "\nDETAILED FAILURE REPORT:");
            for (category, list) in &self.failures {
                let _ = writeln!(out, "\n--- {} ({}) ---", category.label(), list.len());
                for f in list {
                    let _ = writeln!(out, "  - {}: {}", f.unit, f.reason);
                    if !f.detail.trim().is_empty() {
                        let _ = writeln!(out, "{}", indent(f.detail.trim_end(), 6));
                    }
                }
            }
        }

        if !self.unfinished.is_empty() {
            let _ = writeln!(out, "\n--- Not completed ({}) ---", self.unfinished.len());
            for u in &self.unfinished {
                let _ = writeln!(out, "  - {u}");
            }
        }

        let secs = self.duration().as_secs();
        let _ = writeln!(out, "{thin}");
        let _ = writeln!(out, "Total execution time: {} minutes, {} seconds", secs / 60, secs % 60);
        let _ = writeln!(out, "{rule}");
        out
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(n: &str) -> CompilationUnit {
        CompilationUnit::new(n)
    }

    fn summary() -> RunSummary {
        RunSummary::new(
            Utc::now(),
            5,
            vec![unit("b.B"), unit("a.A")],
            vec![
                (unit("c.C"), Failure::compilation("unresolvable dependency com.x", "error: package com.x does not exist")),
                (unit("d.D"), Failure::synthesis("no extractable code block", "")),
                (unit("e.E"), Failure::compilation("exceeded retry budget", "")),
            ],
            vec![],
        )
    }

    #[test]
    fn groups_failures_by_category() {
        let s = summary();
        assert_eq!(s.successes, vec![unit("a.A"), unit("b.B")]);
        assert_eq!(s.failure_count(), 3);
        assert_eq!(s.outcome_count(), 5);
        assert_eq!(s.failures[&FailureCategory::Compilation].len(), 2);
        assert_eq!(s.failures[&FailureCategory::Synthesis].len(), 1);
        assert!(!s.is_clean());
    }

    #[test]
    fn render_lists_categories_and_transcripts() {
        let text = summary().render();
        assert!(text.contains("Successful generations: 2"));
        assert!(text.contains("--- Compilation Failures (2) ---"));
        assert!(text.contains("  - c.C: unresolvable dependency com.x"));
        assert!(text.contains("      error: package com.x does not exist"));
        assert!(text.contains("--- Synthesis Failures (1) ---"));
    }

    #[test]
    fn json_report_round_trips_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        summary().write_json(&path).unwrap();

        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["successes"][0], "a.A");
        assert_eq!(v["failures"]["compilation"][0]["unit"], "c.C");
        assert_eq!(v["total_units"], 5);
    }
}
