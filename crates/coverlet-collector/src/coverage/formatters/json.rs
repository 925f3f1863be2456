//! JSON Coverage Report Renderer
//!
//! Serializes the coverage result as-is; the output can be fed back as a
//! `MergeWith` input on a later run.

use super::ReportRenderer;
use crate::coverage::CoverageResult;
use crate::result::BoxError;

/// JSON renderer
#[derive(Debug, Clone, Copy)]
pub struct JsonRenderer {
    pretty: bool,
}

impl Default for JsonRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRenderer {
    /// Create a renderer producing indented output
    #[must_use]
    pub const fn new() -> Self {
        Self { pretty: true }
    }

    /// Produce compact output
    #[must_use]
    pub const fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }
}

impl ReportRenderer for JsonRenderer {
    fn format(&self) -> &str {
        "json"
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn render(&self, result: &CoverageResult) -> Result<Vec<u8>, BoxError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(result)?
        } else {
            serde_json::to_vec(result)?
        };
        Ok(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_output_parses_back() {
        let mut result = CoverageResult::new("abc.dll");
        result
            .module_mut("abc.dll")
            .document_mut("src/Game.cs")
            .record_line(3, 1, Some("Game::Run"));

        let bytes = JsonRenderer::new().compact().render(&result).unwrap();
        let parsed: CoverageResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_pretty_output_is_indented() {
        let bytes = JsonRenderer::new().render(&CoverageResult::new("a.dll")).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\n  \"identifier\": \"a.dll\""));
    }
}
