//! Coverage Report Renderers
//!
//! Cobertura XML, LCOV, and JSON serializers for a [`CoverageResult`].

mod cobertura;
mod json;
mod lcov;

pub use cobertura::CoberturaRenderer;
pub use json::JsonRenderer;
pub use lcov::LcovRenderer;

use super::CoverageResult;
use crate::result::{BoxError, CollectorError, CollectorResult};

/// Rendered report bytes plus the format-specific file extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    /// Serialized report
    pub bytes: Vec<u8>,
    /// Extension without the leading dot (e.g. `xml`)
    pub extension: String,
}

/// Renderer capability: turns a coverage result into report bytes
pub trait ReportRenderer: Send + Sync {
    /// Format name (e.g. `cobertura`)
    fn format(&self) -> &str;

    /// File extension for this format, without the dot
    fn extension(&self) -> &str;

    /// Serialize the result.
    ///
    /// # Errors
    ///
    /// Returns the renderer's own error; the coordinator wraps it with the
    /// format name.
    fn render(&self, result: &CoverageResult) -> Result<Vec<u8>, BoxError>;

    /// Serialize the result, consuming it, and pair the bytes with the
    /// extension.
    ///
    /// # Errors
    ///
    /// Returns the renderer's own error
    fn render_report(&self, result: CoverageResult) -> Result<RenderedReport, BoxError> {
        Ok(RenderedReport {
            bytes: self.render(&result)?,
            extension: self.extension().to_string(),
        })
    }
}

/// Look up a built-in renderer by (case-insensitive) format name
///
/// # Errors
///
/// Returns [`CollectorError::UnknownFormat`] for unsupported names
pub fn renderer_for_format(format: &str) -> CollectorResult<Box<dyn ReportRenderer>> {
    match format.trim().to_ascii_lowercase().as_str() {
        "cobertura" => Ok(Box::new(CoberturaRenderer::new())),
        "json" => Ok(Box::new(JsonRenderer::new())),
        "lcov" => Ok(Box::new(LcovRenderer::new())),
        _ => Err(CollectorError::UnknownFormat {
            format: format.to_string(),
        }),
    }
}
