//! Coverage result model, instrumentation engine capability, and report
//! renderers.
//!
//! # Architecture
//!
//! ```text
//! settings → InstrumentationEngine::prepare → handle
//!                                             ↓ (run end)
//!          InstrumentationEngine::compute_result → CoverageResult
//!                                             ↓
//!                      ReportRenderer::render → (bytes, extension)
//! ```

mod engine;
pub mod formatters;
mod model;

pub use engine::{InstrumentationEngine, InstrumentationHandle};
pub use formatters::{
    renderer_for_format, CoberturaRenderer, JsonRenderer, LcovRenderer, RenderedReport,
    ReportRenderer,
};
pub use model::{BranchHit, CoverageResult, CoverageSummary, DocumentCoverage, LineHit, ModuleCoverage};
