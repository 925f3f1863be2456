//! Cobertura XML Coverage Report Renderer
//!
//! The default report format.
//!
//! ## Cobertura XML Format
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <coverage line-rate="0.8" branch-rate="0.5" version="1.9" timestamp="1556263787"
//!           lines-covered="4" lines-valid="5" branches-covered="1" branches-valid="2">
//!   <sources />
//!   <packages>
//!     <package name="abc" line-rate="0.8" branch-rate="0.5" complexity="0">
//!       <classes>
//!         <class name="Game" filename="src/Game.cs" line-rate="0.9" branch-rate="0.5" complexity="0">
//!           <lines>
//!             <line number="10" hits="5" branch="True" condition-coverage="50% (1/2)" />
//!           </lines>
//!         </class>
//!       </classes>
//!     </package>
//!   </packages>
//! </coverage>
//! ```

use super::ReportRenderer;
use crate::coverage::model::rate;
use crate::coverage::{CoverageResult, DocumentCoverage};
use crate::result::BoxError;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

/// Cobertura XML renderer
#[derive(Debug, Clone)]
pub struct CoberturaRenderer {
    version: String,
    timestamp: Option<u64>,
}

impl Default for CoberturaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl CoberturaRenderer {
    /// Create a new Cobertura renderer
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: "1.9".to_string(),
            timestamp: None,
        }
    }

    /// Set the version string
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Pin the timestamp attribute (seconds since the epoch)
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Generate Cobertura XML report as a string
    #[must_use]
    pub fn generate(&self, result: &CoverageResult) -> String {
        let summary = result.summary();
        let timestamp = self.timestamp.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs())
        });

        let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        xml.push('\n');
        let _ = write!(
            xml,
            r#"<coverage line-rate="{:.4}" branch-rate="{:.4}" version="{}" timestamp="{}" lines-covered="{}" lines-valid="{}" branches-covered="{}" branches-valid="{}">"#,
            summary.line_rate(),
            summary.branch_rate(),
            escape(&self.version),
            timestamp,
            summary.lines_covered,
            summary.lines_valid,
            summary.branches_covered,
            summary.branches_valid,
        );
        xml.push('\n');
        xml.push_str("  <sources />\n");
        xml.push_str("  <packages>\n");

        for (module_name, module) in &result.modules {
            let (covered, total) = module.line_counts();
            let (branch_covered, branch_total) = module.branch_counts();
            let _ = write!(
                xml,
                r#"    <package name="{}" line-rate="{:.4}" branch-rate="{:.4}" complexity="0">"#,
                escape(&package_name(module_name)),
                rate(covered, total),
                rate(branch_covered, branch_total),
            );
            xml.push('\n');
            xml.push_str("      <classes>\n");

            for (file_path, document) in &module.documents {
                Self::write_class(&mut xml, file_path, document);
            }

            xml.push_str("      </classes>\n");
            xml.push_str("    </package>\n");
        }

        xml.push_str("  </packages>\n");
        xml.push_str("</coverage>\n");

        xml
    }

    fn write_class(xml: &mut String, file_path: &str, document: &DocumentCoverage) {
        let (covered, total) = document.line_counts();
        let (branch_covered, branch_total) = document.branch_counts();
        let _ = write!(
            xml,
            r#"        <class name="{}" filename="{}" line-rate="{:.4}" branch-rate="{:.4}" complexity="0">"#,
            escape(&extract_class_name(file_path)),
            escape(file_path),
            rate(covered, total),
            rate(branch_covered, branch_total),
        );
        xml.push('\n');
        xml.push_str("          <lines>\n");

        let branches = branches_by_line(document);
        for (line, hit) in &document.lines {
            match branches.get(line) {
                Some(&(taken, paths)) => {
                    let percent = rate(taken, paths) * 100.0;
                    let _ = write!(
                        xml,
                        r#"            <line number="{}" hits="{}" branch="True" condition-coverage="{:.0}% ({}/{})" />"#,
                        line, hit.hits, percent, taken, paths
                    );
                }
                None => {
                    let _ = write!(
                        xml,
                        r#"            <line number="{}" hits="{}" branch="False" />"#,
                        line, hit.hits
                    );
                }
            }
            xml.push('\n');
        }

        xml.push_str("          </lines>\n");
        xml.push_str("        </class>\n");
    }
}

impl ReportRenderer for CoberturaRenderer {
    fn format(&self) -> &str {
        "cobertura"
    }

    fn extension(&self) -> &str {
        "cobertura.xml"
    }

    fn render(&self, result: &CoverageResult) -> Result<Vec<u8>, BoxError> {
        Ok(self.generate(result).into_bytes())
    }
}

/// Module file name without its directory and extension
fn package_name(module: &str) -> String {
    let file = module.rsplit(['/', '\\']).next().unwrap_or(module);
    file.rsplit_once('.')
        .map_or(file, |(stem, _)| stem)
        .to_string()
}

/// Class name from a document path
fn extract_class_name(file_path: &str) -> String {
    let file = file_path.rsplit(['/', '\\']).next().unwrap_or(file_path);
    file.rsplit_once('.')
        .map_or(file, |(stem, _)| stem)
        .to_string()
}

/// line → (paths taken, paths total)
fn branches_by_line(document: &DocumentCoverage) -> BTreeMap<u32, (usize, usize)> {
    let mut lines: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for branch in &document.branches {
        let entry = lines.entry(branch.line).or_default();
        entry.1 += 1;
        if branch.hits > 0 {
            entry.0 += 1;
        }
    }
    lines
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
