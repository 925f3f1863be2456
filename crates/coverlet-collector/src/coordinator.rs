//! Report Coordinator
//!
//! Sequences the instrumentation engine, the renderer and scratch storage:
//!
//! ```text
//! begin_instrumentation ──► (worker) prepare ──► handle
//! produce_report ──► wait for worker ──► compute_result ──► render ──► artifact
//! persist ──► ScratchStore::write ──► file path
//! ```
//!
//! The instrumentation handle is single use. Concurrent `produce_report`
//! calls race for it; exactly one wins, the others get
//! [`CollectorError::NoInstrumentation`].

use crate::coverage::{InstrumentationEngine, InstrumentationHandle, ReportRenderer};
use crate::result::{BoxError, CollectorError, CollectorResult};
use crate::scratch::ScratchStore;
use crate::settings::CoverletSettings;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Where module preparation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstrumentationMode {
    /// On the calling thread; run start blocks until modules are instrumented
    #[default]
    Inline,
    /// On a dedicated worker thread; the report request waits for it
    Background,
}

/// Rendered report ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    base_name: String,
    extension: String,
    bytes: Vec<u8>,
}

impl ReportArtifact {
    /// Create an artifact
    #[must_use]
    pub fn new(base_name: impl Into<String>, extension: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            base_name: base_name.into(),
            extension: extension.into(),
            bytes,
        }
    }

    /// `<base>.<extension>`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base_name, self.extension)
    }

    /// Format-specific extension
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Report bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

enum Pending {
    Ready(InstrumentationHandle),
    InFlight {
        module: String,
        worker: JoinHandle<Result<InstrumentationHandle, BoxError>>,
    },
}

impl Pending {
    fn module(&self) -> &str {
        match self {
            Self::Ready(handle) => handle.module(),
            Self::InFlight { module, .. } => module.as_str(),
        }
    }

    /// Block until the handle is available
    fn into_handle(self) -> CollectorResult<InstrumentationHandle> {
        match self {
            Self::Ready(handle) => Ok(handle),
            Self::InFlight { module, worker } => match worker.join() {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(source)) => Err(CollectorError::Instrumentation { module, source }),
                Err(_) => Err(CollectorError::Instrumentation {
                    module,
                    source: "instrumentation worker panicked".into(),
                }),
            },
        }
    }
}

/// Orchestrates instrumentation, rendering and persistence for one run
pub struct ReportCoordinator {
    engine: Arc<dyn InstrumentationEngine>,
    renderer: Box<dyn ReportRenderer>,
    store: Arc<ScratchStore>,
    report_base_name: String,
    mode: InstrumentationMode,
    pending: Mutex<Option<Pending>>,
    /// Set under the `pending` lock by [`ReportCoordinator::close`]
    closed: AtomicBool,
}

impl fmt::Debug for ReportCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportCoordinator")
            .field("format", &self.renderer.format())
            .field("report_base_name", &self.report_base_name)
            .field("mode", &self.mode)
            .field("instrumented", &self.has_pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ReportCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        engine: Arc<dyn InstrumentationEngine>,
        renderer: Box<dyn ReportRenderer>,
        store: Arc<ScratchStore>,
        report_base_name: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            renderer,
            store,
            report_base_name: report_base_name.into(),
            mode: InstrumentationMode::Inline,
            pending: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Choose where module preparation runs
    #[must_use]
    pub const fn with_mode(mut self, mode: InstrumentationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Report format name of the configured renderer
    #[must_use]
    pub fn format(&self) -> &str {
        self.renderer.format()
    }

    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if a handle (or an in-flight preparation) is waiting for a
    /// report request
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Check if [`close`](Self::close) has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Instrument the settings' test module and keep the handle.
    ///
    /// In [`InstrumentationMode::Background`] this only dispatches the
    /// worker; preparation failures then surface from
    /// [`produce_report`](Self::produce_report). Inline preparation runs
    /// under the pending lock, so a concurrent [`close`](Self::close) waits
    /// for it and then drops the handle.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Instrumentation`] if preparation fails (or
    /// the worker can't be spawned), and [`CollectorError::InvalidState`] if
    /// a previous handle has not been consumed yet or the coordinator is
    /// closed
    pub fn begin_instrumentation(&self, settings: &CoverletSettings) -> CollectorResult<()> {
        let module = settings.test_module.clone();
        info!(module = %module, mode = ?self.mode, "instrumenting test module");

        let mut pending = self.pending();
        if self.is_closed() {
            return Err(CollectorError::invalid_state(format!(
                "coordinator closed before '{module}' was instrumented"
            )));
        }
        if let Some(existing) = pending.as_ref() {
            return Err(CollectorError::invalid_state(format!(
                "instrumentation of '{}' has not been reported yet",
                existing.module()
            )));
        }

        let next = match self.mode {
            InstrumentationMode::Inline => {
                let handle = self
                    .engine
                    .prepare(settings)
                    .map_err(|source| CollectorError::Instrumentation {
                        module: module.clone(),
                        source,
                    })?;
                Pending::Ready(handle)
            }
            InstrumentationMode::Background => {
                let engine = Arc::clone(&self.engine);
                let settings = settings.clone();
                let worker = thread::Builder::new()
                    .name("coverage-instrumentation".to_string())
                    .spawn(move || engine.prepare(&settings))
                    .map_err(|e| CollectorError::Instrumentation {
                        module: module.clone(),
                        source: Box::new(e),
                    })?;
                Pending::InFlight { module, worker }
            }
        };

        *pending = Some(next);
        Ok(())
    }

    /// Compute, render and return the report, consuming the handle.
    ///
    /// Blocks until a background preparation has finished.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::NoInstrumentation`] without a pending handle,
    /// [`CollectorError::Instrumentation`] if background preparation failed,
    /// [`CollectorError::CoverageResult`] if the engine can't compute a
    /// result, and [`CollectorError::Render`] if rendering fails
    pub fn produce_report(&self) -> CollectorResult<ReportArtifact> {
        let pending = self.pending().take().ok_or(CollectorError::NoInstrumentation)?;
        let handle = pending.into_handle()?;
        let module = handle.module().to_string();

        let result = self
            .engine
            .compute_result(handle)
            .map_err(|source| CollectorError::CoverageResult {
                module: module.clone(),
                source,
            })?;

        let rendered = self
            .renderer
            .render_report(result)
            .map_err(|source| CollectorError::Render {
                format: self.renderer.format().to_string(),
                source,
            })?;

        debug!(
            module = %module,
            format = %self.renderer.format(),
            bytes = rendered.bytes.len(),
            "coverage report rendered"
        );

        Ok(ReportArtifact::new(
            self.report_base_name.clone(),
            rendered.extension,
            rendered.bytes,
        ))
    }

    /// Write the artifact into `directory` as `<base>.<extension>`
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Persist`] if the write fails
    pub fn persist(&self, artifact: &ReportArtifact, directory: &Path) -> CollectorResult<PathBuf> {
        self.store
            .write(directory, &artifact.file_name(), artifact.bytes())
    }

    /// Drop any pending handle without computing a result and refuse
    /// further instrumentation. Waits for an inline preparation in progress
    /// and joins a background worker, so no handle or thread outlives the
    /// call. Idempotent.
    pub fn close(&self) {
        let pending = {
            let mut pending = self.pending();
            self.closed.store(true, Ordering::SeqCst);
            pending.take()
        };
        if let Some(pending) = pending {
            let module = pending.module().to_string();
            let _ = pending.into_handle();
            debug!(module = %module, "pending instrumentation abandoned");
        }
    }
}
