//! LCOV Report Renderer
//!
//! ## LCOV Format
//!
//! ```text
//! TN:<test name>
//! SF:<source file>
//! FN:<line>,<function name>
//! FNDA:<execution count>,<function name>
//! FNF:<functions found>
//! FNH:<functions hit>
//! BRDA:<line>,<block>,<branch>,<taken>
//! BRF:<branches found>
//! BRH:<branches hit>
//! DA:<line>,<execution count>
//! LF:<lines found>
//! LH:<lines hit>
//! end_of_record
//! ```

use super::ReportRenderer;
use crate::coverage::{CoverageResult, DocumentCoverage};
use crate::result::BoxError;
use std::collections::BTreeMap;
use std::fmt::Write;

/// LCOV renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct LcovRenderer;

impl LcovRenderer {
    /// Create a new LCOV renderer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generate LCOV format report as a string
    #[must_use]
    pub fn generate(&self, result: &CoverageResult) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "TN:{}", result.identifier);

        for module in result.modules.values() {
            for (file, document) in &module.documents {
                let _ = writeln!(output, "SF:{file}");
                Self::write_functions(&mut output, document);
                Self::write_branches(&mut output, document);

                let mut lines_hit = 0;
                for (line, hit) in &document.lines {
                    let _ = writeln!(output, "DA:{line},{}", hit.hits);
                    if hit.hits > 0 {
                        lines_hit += 1;
                    }
                }
                let _ = writeln!(output, "LF:{}", document.lines.len());
                let _ = writeln!(output, "LH:{lines_hit}");

                output.push_str("end_of_record\n");
            }
        }

        output
    }

    fn write_functions(output: &mut String, document: &DocumentCoverage) {
        let functions = extract_functions(document);
        let mut functions_hit = 0;

        for (name, (line, count)) in &functions {
            let _ = writeln!(output, "FN:{line},{name}");
            let _ = writeln!(output, "FNDA:{count},{name}");
            if *count > 0 {
                functions_hit += 1;
            }
        }

        let _ = writeln!(output, "FNF:{}", functions.len());
        let _ = writeln!(output, "FNH:{functions_hit}");
    }

    fn write_branches(output: &mut String, document: &DocumentCoverage) {
        if document.branches.is_empty() {
            return;
        }
        for branch in &document.branches {
            let taken = if branch.hits > 0 {
                branch.hits.to_string()
            } else {
                "-".to_string()
            };
            let _ = writeln!(
                output,
                "BRDA:{},{},{},{taken}",
                branch.line, branch.offset, branch.path
            );
        }
        let (hit, found) = document.branch_counts();
        let _ = writeln!(output, "BRF:{found}");
        let _ = writeln!(output, "BRH:{hit}");
    }
}

/// function name → (first line, hits on that line)
fn extract_functions(document: &DocumentCoverage) -> BTreeMap<String, (u32, u64)> {
    let mut functions: BTreeMap<String, (u32, u64)> = BTreeMap::new();
    for (line, hit) in &document.lines {
        if let Some(name) = &hit.method {
            let _ = functions.entry(name.clone()).or_insert((*line, hit.hits));
        }
    }
    functions
}

impl ReportRenderer for LcovRenderer {
    fn format(&self) -> &str {
        "lcov"
    }

    fn extension(&self) -> &str {
        "info"
    }

    fn render(&self, result: &CoverageResult) -> Result<Vec<u8>, BoxError> {
        Ok(self.generate(result).into_bytes())
    }
}
