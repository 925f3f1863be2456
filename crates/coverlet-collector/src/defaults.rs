//! Immutable collector defaults.
//!
//! Names, default report format and file names live in one record handed to
//! the controller at construction instead of process-wide constants.

use std::path::PathBuf;

/// Element names recognized in the collector's configuration block.
pub mod elements {
    /// Comma-separated include filters
    pub const INCLUDE: &str = "Include";
    /// Comma-separated include directories
    pub const INCLUDE_DIRECTORY: &str = "IncludeDirectory";
    /// Comma-separated exclude filters
    pub const EXCLUDE: &str = "Exclude";
    /// Comma-separated source files to exclude
    pub const EXCLUDE_BY_FILE: &str = "ExcludeByFile";
    /// Comma-separated attributes to exclude
    pub const EXCLUDE_BY_ATTRIBUTE: &str = "ExcludeByAttribute";
    /// Path of a previous result to merge with
    pub const MERGE_WITH: &str = "MergeWith";
    /// Source link flag
    pub const USE_SOURCE_LINK: &str = "UseSourceLink";
    /// Single hit flag
    pub const SINGLE_HIT: &str = "SingleHit";
    /// Report format override
    pub const FORMAT: &str = "Format";
}

/// Defaults record for one collector instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorDefaults {
    /// Name used to prefix diagnostics
    pub collector_name: String,
    /// Friendly name advertised to the host
    pub friendly_name: String,
    /// Collector URI advertised to the host
    pub uri: String,
    /// Report format used when the configuration names none
    pub report_format: String,
    /// Report base file name (extension comes from the renderer)
    pub report_file_name: String,
    /// Session-start property carrying the test module list
    pub test_sources_property: String,
    /// Parent directory of the per-run scratch directory
    pub scratch_root: PathBuf,
}

impl Default for CollectorDefaults {
    fn default() -> Self {
        Self {
            collector_name: "CoverletCoverageDataCollector".to_string(),
            friendly_name: "XPlat code coverage".to_string(),
            uri: "datacollector://Microsoft/CoverletCodeCoverage/1.0".to_string(),
            report_format: "cobertura".to_string(),
            report_file_name: "coverage".to_string(),
            test_sources_property: "TestSources".to_string(),
            scratch_root: std::env::temp_dir(),
        }
    }
}

impl CollectorDefaults {
    /// Create the default record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the report format
    #[must_use]
    pub fn with_report_format(mut self, format: impl Into<String>) -> Self {
        self.report_format = format.into();
        self
    }

    /// Override the report base file name
    #[must_use]
    pub fn with_report_file_name(mut self, name: impl Into<String>) -> Self {
        self.report_file_name = name.into();
        self
    }

    /// Override the scratch root
    #[must_use]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }
}
