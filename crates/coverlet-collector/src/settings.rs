//! Collector settings and the configuration block they are parsed from.
//!
//! The host hands the collector a structured configuration block whose
//! element names match the run settings schema (`Include`, `Exclude`,
//! `MergeWith`, ...). List elements are comma-separated strings, flags are
//! leniently parsed booleans, and every element is optional.

use crate::defaults::{elements, CollectorDefaults};
use crate::result::{CollectorError, CollectorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// A list element: either the comma-separated text form or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListElement {
    /// `"a,b,c"`
    Text(String),
    /// `["a", "b", "c"]`
    Items(Vec<String>),
}

impl ListElement {
    /// Split into trimmed, non-empty entries
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        match self {
            Self::Text(text) => split_list(text),
            Self::Items(items) => items
                .iter()
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect(),
        }
    }
}

/// A flag element: a native boolean or its text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagElement {
    /// `true`
    Bool(bool),
    /// `"True"`, `"false"`, anything else reads as false
    Text(String),
}

impl FlagElement {
    /// Lenient boolean value
    #[must_use]
    pub fn value(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(text) => text.trim().eq_ignore_ascii_case("true"),
        }
    }
}

/// Raw configuration block supplied by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfiguration {
    /// Include filters
    #[serde(rename = "Include", default, skip_serializing_if = "Option::is_none")]
    pub include: Option<ListElement>,
    /// Include directories
    #[serde(rename = "IncludeDirectory", default, skip_serializing_if = "Option::is_none")]
    pub include_directory: Option<ListElement>,
    /// Exclude filters
    #[serde(rename = "Exclude", default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<ListElement>,
    /// Source files to exclude
    #[serde(rename = "ExcludeByFile", default, skip_serializing_if = "Option::is_none")]
    pub exclude_by_file: Option<ListElement>,
    /// Attributes to exclude
    #[serde(rename = "ExcludeByAttribute", default, skip_serializing_if = "Option::is_none")]
    pub exclude_by_attribute: Option<ListElement>,
    /// Previous result to merge with
    #[serde(rename = "MergeWith", default, skip_serializing_if = "Option::is_none")]
    pub merge_with: Option<String>,
    /// Source link flag
    #[serde(rename = "UseSourceLink", default, skip_serializing_if = "Option::is_none")]
    pub use_source_link: Option<FlagElement>,
    /// Single hit flag
    #[serde(rename = "SingleHit", default, skip_serializing_if = "Option::is_none")]
    pub single_hit: Option<FlagElement>,
    /// Report format
    #[serde(rename = "Format", default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl CollectorConfiguration {
    /// Parse a JSON configuration block
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or an element has the wrong shape
    pub fn from_json_str(input: &str) -> CollectorResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parse a YAML configuration block
    ///
    /// # Errors
    ///
    /// Returns error if the YAML is malformed or an element has the wrong shape
    pub fn from_yaml_str(input: &str) -> CollectorResult<Self> {
        Ok(serde_yaml_ng::from_str(input)?)
    }

    /// Load a configuration file, choosing the parser from its extension
    /// (`.json`, `.yaml`, `.yml`).
    ///
    /// # Errors
    ///
    /// Returns error if the file can't be read, has an unsupported extension,
    /// or fails to parse
    pub fn load(path: &Path) -> CollectorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml" | "yml") => Self::from_yaml_str(&content),
            other => Err(CollectorError::config(format!(
                "unsupported configuration file extension: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Report format named by the block, if any
    #[must_use]
    pub fn report_format(&self) -> Option<&str> {
        self.format
            .as_deref()
            .map(str::trim)
            .filter(|format| !format.is_empty())
    }
}

/// Settings handed to the instrumentation engine. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverletSettings {
    /// The single test module to instrument
    pub test_module: String,
    /// Include filters
    pub include_filters: Vec<String>,
    /// Include directories
    pub include_directories: Vec<String>,
    /// Exclude filters
    pub exclude_filters: Vec<String>,
    /// Source files to exclude
    pub exclude_source_files: Vec<String>,
    /// Attributes to exclude
    pub exclude_attributes: Vec<String>,
    /// Previous result to merge with
    pub merge_with: Option<String>,
    /// Source link flag
    pub use_source_link: bool,
    /// Single hit flag
    pub single_hit: bool,
}

impl fmt::Display for CoverletSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestModule: '{}', ", self.test_module)?;
        write!(f, "{}: '{}', ", elements::INCLUDE, self.include_filters.join(","))?;
        write!(
            f,
            "{}: '{}', ",
            elements::INCLUDE_DIRECTORY,
            self.include_directories.join(",")
        )?;
        write!(f, "{}: '{}', ", elements::EXCLUDE, self.exclude_filters.join(","))?;
        write!(
            f,
            "{}: '{}', ",
            elements::EXCLUDE_BY_FILE,
            self.exclude_source_files.join(",")
        )?;
        write!(
            f,
            "{}: '{}', ",
            elements::EXCLUDE_BY_ATTRIBUTE,
            self.exclude_attributes.join(",")
        )?;
        write!(
            f,
            "{}: '{}', ",
            elements::MERGE_WITH,
            self.merge_with.as_deref().unwrap_or_default()
        )?;
        write!(f, "{}: '{}', ", elements::USE_SOURCE_LINK, self.use_source_link)?;
        write!(f, "{}: '{}'", elements::SINGLE_HIT, self.single_hit)
    }
}

/// Builds [`CoverletSettings`] from the host configuration and module list
#[derive(Debug, Clone)]
pub struct CoverletSettingsParser {
    collector_name: String,
}

impl CoverletSettingsParser {
    /// Create a parser that prefixes diagnostics with the collector name
    #[must_use]
    pub fn new(defaults: &CollectorDefaults) -> Self {
        Self {
            collector_name: defaults.collector_name.clone(),
        }
    }

    /// Parse settings.
    ///
    /// Only the first test module is used; the engine instruments exactly one
    /// module per run. A missing configuration block yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::NoTestModules`] if `test_modules` is empty
    pub fn parse(
        &self,
        configuration: Option<&CollectorConfiguration>,
        test_modules: &[String],
    ) -> CollectorResult<CoverletSettings> {
        let mut settings = CoverletSettings {
            test_module: self.parse_test_module(test_modules)?,
            ..CoverletSettings::default()
        };

        if let Some(config) = configuration {
            settings.include_filters = entries(config.include.as_ref());
            settings.include_directories = entries(config.include_directory.as_ref());
            settings.exclude_filters = entries(config.exclude.as_ref());
            settings.exclude_source_files = entries(config.exclude_by_file.as_ref());
            settings.exclude_attributes = entries(config.exclude_by_attribute.as_ref());
            settings.merge_with = config
                .merge_with
                .as_deref()
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(String::from);
            settings.use_source_link = config.use_source_link.as_ref().is_some_and(FlagElement::value);
            settings.single_hit = config.single_hit.as_ref().is_some_and(FlagElement::value);
        }

        debug!(
            collector = %self.collector_name,
            settings = %settings,
            "initializing coverage collection"
        );

        Ok(settings)
    }

    fn parse_test_module(&self, test_modules: &[String]) -> CollectorResult<String> {
        test_modules
            .iter()
            .map(|module| module.trim())
            .find(|module| !module.is_empty())
            .map(String::from)
            .ok_or_else(|| CollectorError::NoTestModules {
                collector: self.collector_name.clone(),
            })
    }
}

fn entries(element: Option<&ListElement>) -> Vec<String> {
    element.map(ListElement::entries).unwrap_or_default()
}

/// Split a comma-separated element into trimmed, non-empty entries
#[must_use]
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}
