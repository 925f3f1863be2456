//! Coverage result produced by the instrumentation engine.
//!
//! Modules contain documents (source files); documents carry per-line hit
//! counts and branch points.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hit information for one source line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineHit {
    /// Number of times the line executed
    pub hits: u64,
    /// Method containing the line, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Hit information for one branch path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHit {
    /// Line the branch starts on
    pub line: u32,
    /// Branch instruction offset
    pub offset: u32,
    /// Path index at that offset
    pub path: u32,
    /// Number of times the path was taken
    pub hits: u64,
}

/// Coverage for one source document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCoverage {
    /// Line number → hit info
    pub lines: BTreeMap<u32, LineHit>,
    /// Branch points in the document
    #[serde(default)]
    pub branches: Vec<BranchHit>,
}

impl DocumentCoverage {
    /// Record hits for a line
    pub fn record_line(&mut self, line: u32, hits: u64, method: Option<&str>) {
        let entry = self.lines.entry(line).or_default();
        entry.hits += hits;
        if entry.method.is_none() {
            entry.method = method.map(String::from);
        }
    }

    /// Record hits for a branch path
    pub fn record_branch(&mut self, line: u32, offset: u32, path: u32, hits: u64) {
        self.branches.push(BranchHit {
            line,
            offset,
            path,
            hits,
        });
    }

    /// (covered, total) lines
    #[must_use]
    pub fn line_counts(&self) -> (usize, usize) {
        let covered = self.lines.values().filter(|line| line.hits > 0).count();
        (covered, self.lines.len())
    }

    /// (covered, total) branch paths
    #[must_use]
    pub fn branch_counts(&self) -> (usize, usize) {
        let covered = self.branches.iter().filter(|branch| branch.hits > 0).count();
        (covered, self.branches.len())
    }
}

/// Coverage for one instrumented module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCoverage {
    /// Document path → coverage
    pub documents: BTreeMap<String, DocumentCoverage>,
}

impl ModuleCoverage {
    /// Get or create a document entry
    pub fn document_mut(&mut self, path: &str) -> &mut DocumentCoverage {
        self.documents.entry(path.to_string()).or_default()
    }

    /// (covered, total) lines across all documents
    #[must_use]
    pub fn line_counts(&self) -> (usize, usize) {
        sum_counts(self.documents.values().map(DocumentCoverage::line_counts))
    }

    /// (covered, total) branch paths across all documents
    #[must_use]
    pub fn branch_counts(&self) -> (usize, usize) {
        sum_counts(self.documents.values().map(DocumentCoverage::branch_counts))
    }
}

/// Summary statistics for a result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Lines with at least one hit
    pub lines_covered: usize,
    /// Lines instrumented
    pub lines_valid: usize,
    /// Branch paths taken at least once
    pub branches_covered: usize,
    /// Branch paths instrumented
    pub branches_valid: usize,
}

impl CoverageSummary {
    /// Line rate in `0.0..=1.0`; an empty result is vacuously fully covered
    #[must_use]
    pub fn line_rate(&self) -> f64 {
        rate(self.lines_covered, self.lines_valid)
    }

    /// Branch rate in `0.0..=1.0`
    #[must_use]
    pub fn branch_rate(&self) -> f64 {
        rate(self.branches_covered, self.branches_valid)
    }
}

/// Full coverage result for one run. Moved into the renderer exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageResult {
    /// Identifier of the instrumented test module
    pub identifier: String,
    /// Module name → coverage
    pub modules: BTreeMap<String, ModuleCoverage>,
}

impl CoverageResult {
    /// Create an empty result for a test module
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            modules: BTreeMap::new(),
        }
    }

    /// Get or create a module entry
    pub fn module_mut(&mut self, name: &str) -> &mut ModuleCoverage {
        self.modules.entry(name.to_string()).or_default()
    }

    /// Check if the result holds any module
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Summary across all modules
    #[must_use]
    pub fn summary(&self) -> CoverageSummary {
        let (lines_covered, lines_valid) =
            sum_counts(self.modules.values().map(ModuleCoverage::line_counts));
        let (branches_covered, branches_valid) =
            sum_counts(self.modules.values().map(ModuleCoverage::branch_counts));
        CoverageSummary {
            lines_covered,
            lines_valid,
            branches_covered,
            branches_valid,
        }
    }
}

fn sum_counts(counts: impl Iterator<Item = (usize, usize)>) -> (usize, usize) {
    counts.fold((0, 0), |(covered, total), (c, t)| (covered + c, total + t))
}

pub(crate) fn rate(covered: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    covered as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CoverageResult {
        let mut result = CoverageResult::new("abc.dll");
        let doc = result.module_mut("abc.dll").document_mut("src/game.cs");
        doc.record_line(10, 5, Some("Game::Update"));
        doc.record_line(11, 0, Some("Game::Update"));
        doc.record_branch(10, 4, 0, 1);
        doc.record_branch(10, 4, 1, 0);
        let doc = result.module_mut("abc.dll").document_mut("src/player.cs");
        doc.record_line(3, 2, None);
        result
    }

    #[test]
    fn test_summary_counts() {
        let summary = sample().summary();
        assert_eq!(summary.lines_covered, 2);
        assert_eq!(summary.lines_valid, 3);
        assert_eq!(summary.branches_covered, 1);
        assert_eq!(summary.branches_valid, 2);
        assert!((summary.branch_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_result_is_fully_covered() {
        let result = CoverageResult::new("empty.dll");
        assert!(result.is_empty());
        assert_eq!(result.summary().line_rate(), 1.0);
    }

    #[test]
    fn test_record_line_accumulates_hits() {
        let mut doc = DocumentCoverage::default();
        doc.record_line(1, 2, Some("first"));
        doc.record_line(1, 3, Some("second"));
        assert_eq!(doc.lines[&1].hits, 5);
        assert_eq!(doc.lines[&1].method.as_deref(), Some("first"));
    }
}
