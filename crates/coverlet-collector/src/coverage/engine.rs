//! Instrumentation engine capability.
//!
//! The engine that rewrites modules and tracks hits is external; the
//! collector only sequences `prepare` and `compute_result`.

use super::CoverageResult;
use crate::result::BoxError;
use crate::settings::CoverletSettings;
use std::any::Any;
use std::fmt;

/// Proof that a module was instrumented.
///
/// Carries whatever state the engine needs to compute a result later.
/// Consumed by [`InstrumentationEngine::compute_result`], so it can only be
/// used once.
pub struct InstrumentationHandle {
    module: String,
    state: Box<dyn Any + Send>,
}

impl fmt::Debug for InstrumentationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationHandle")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl InstrumentationHandle {
    /// Wrap engine state for `module`
    #[must_use]
    pub fn new<T: Any + Send>(module: impl Into<String>, state: T) -> Self {
        Self {
            module: module.into(),
            state: Box::new(state),
        }
    }

    /// The instrumented test module
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Borrow the engine state
    #[must_use]
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.downcast_ref::<T>()
    }

    /// Take the engine state back out of the handle.
    ///
    /// # Errors
    ///
    /// Returns the handle unchanged if the state is not a `T`
    pub fn into_state<T: Any>(self) -> Result<T, Self> {
        match self.state.downcast::<T>() {
            Ok(state) => Ok(*state),
            Err(state) => Err(Self {
                module: self.module,
                state,
            }),
        }
    }
}

/// Instrumentation engine consumed by the report coordinator
pub trait InstrumentationEngine: Send + Sync {
    /// Instrument the settings' test module.
    ///
    /// # Errors
    ///
    /// Returns the engine's own error; the coordinator wraps it with the
    /// module name.
    fn prepare(&self, settings: &CoverletSettings) -> Result<InstrumentationHandle, BoxError>;

    /// Compute the coverage result for an instrumented module, consuming the
    /// handle.
    ///
    /// # Errors
    ///
    /// Returns the engine's own error; the coordinator wraps it with the
    /// module name.
    fn compute_result(&self, handle: InstrumentationHandle) -> Result<CoverageResult, BoxError>;
}
