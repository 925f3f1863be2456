//! Lifecycle Controller
//!
//! Ties the host's session events to the report pipeline.
//!
//! ```text
//!  Idle ──run start──► Instrumenting ──► Instrumented ──run end──► Reporting
//!                           │                                         │
//!                     no test modules                    send ok │    │ any failure
//!                           │                                    ▼    │
//!                           │                  AwaitingTransferCompletion
//!                           │                               │ completion
//!                           ▼                               ▼         ▼
//!                      Terminated ◄──────────── teardown ◄── dispose (any state)
//! ```
//!
//! Teardown (close the transfer gate and the coordinator, purge the scratch
//! directory) runs exactly once, whichever of dispose or the completion
//! signal gets there first. A run step already in progress stops at its
//! next step: nothing is instrumented, subscribed or sent afterwards. No
//! failure propagates back into the host; everything degrades to a warning
//! through the host logger.

use crate::coordinator::{InstrumentationMode, ReportCoordinator};
use crate::coverage::{renderer_for_format, CoberturaRenderer, InstrumentationEngine, ReportRenderer};
use crate::defaults::CollectorDefaults;
use crate::host::{CollectorLogger, HostLogger, RunContext, SessionEndEvent, SessionStartEvent, TracingHostLogger};
use crate::result::{CollectorError, CollectorResult};
use crate::scratch::{FileSystem, OsFileSystem, ScratchDirectory, ScratchStore};
use crate::settings::{CollectorConfiguration, CoverletSettingsParser};
use crate::transfer::{TransferChannel, TransferCompletion, TransferGate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, info};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Waiting for run start
    Idle,
    /// Settings parsed, modules being instrumented
    Instrumenting,
    /// Ready for run end (with or without an instrumentation handle)
    Instrumented,
    /// Producing, persisting and sending the report
    Reporting,
    /// Report handed to the host, waiting for the completion signal
    AwaitingTransferCompletion,
    /// Torn down; all further signals are ignored
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Instrumenting => "instrumenting",
            Self::Instrumented => "instrumented",
            Self::Reporting => "reporting",
            Self::AwaitingTransferCompletion => "awaiting-transfer-completion",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

struct Inner {
    this: Weak<Inner>,
    defaults: CollectorDefaults,
    configuration: Option<CollectorConfiguration>,
    logger: CollectorLogger,
    coordinator: ReportCoordinator,
    gate: TransferGate,
    store: Arc<ScratchStore>,
    scratch: ScratchDirectory,
    state: Mutex<LifecycleState>,
    /// Signalled once the state reaches `Terminated`
    terminated: Condvar,
    torn_down: AtomicBool,
    teardown_thread: Mutex<Option<ThreadId>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `from -> to`. Returns `false`, leaving the state alone, if the
    /// controller is elsewhere.
    fn advance(&self, from: LifecycleState, to: LifecycleState) -> bool {
        {
            let mut state = self.state();
            if *state != from {
                return false;
            }
            *state = to;
        }
        debug!(run = %self.logger.context(), from = %from, to = %to, "lifecycle transition");
        true
    }

    fn current(&self) -> LifecycleState {
        *self.state()
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Warn and tear down. Once torn down, a failure is a closed piece
    /// refusing work and is only logged at debug.
    fn fail(&self, error: &CollectorError) {
        if self.is_torn_down() {
            debug!(run = %self.logger.context(), error = %error, "run step stopped by teardown");
            return;
        }
        self.logger.warn_error(error);
        self.teardown();
    }

    fn session_start(&self, event: &SessionStartEvent) {
        if !self.advance(LifecycleState::Idle, LifecycleState::Instrumenting) {
            debug!(state = %self.current(), "run start ignored");
            return;
        }

        let modules = event.test_sources(&self.defaults.test_sources_property);
        let settings = match CoverletSettingsParser::new(&self.defaults)
            .parse(self.configuration.as_ref(), &modules)
        {
            Ok(settings) => settings,
            Err(e) => {
                self.fail(&e);
                return;
            }
        };

        if self.is_torn_down() {
            debug!(run = %self.logger.context(), "run start stopped by teardown");
            return;
        }

        // a closed coordinator refuses, so nothing is instrumented after teardown
        if let Err(e) = self.coordinator.begin_instrumentation(&settings) {
            if self.is_torn_down() {
                debug!(run = %self.logger.context(), error = %e, "run step stopped by teardown");
            } else {
                self.logger.warn_error(&e);
            }
        }

        let _ = self.advance(LifecycleState::Instrumenting, LifecycleState::Instrumented);
    }

    fn session_end(&self) {
        if !self.advance(LifecycleState::Instrumented, LifecycleState::Reporting) {
            debug!(state = %self.current(), "run end ignored");
            return;
        }

        // no state lock across the chain: completion may fire inside `send`
        match self.report_and_send() {
            Ok(path) => {
                if self.advance(LifecycleState::Reporting, LifecycleState::AwaitingTransferCompletion) {
                    info!(path = %path.display(), "coverage report sent, awaiting transfer completion");
                }
            }
            Err(e) => self.fail(&e),
        }
    }

    /// Each step refuses once teardown has closed the piece it needs:
    /// the coordinator has no handle, the store refuses the purged
    /// directory, the gate refuses registration and sends.
    fn report_and_send(&self) -> CollectorResult<PathBuf> {
        let artifact = self.coordinator.produce_report()?;
        let path = self.coordinator.persist(&artifact, self.scratch.path())?;
        let _ = self.gate.on_completed(completion_handler(self.this.clone()))?;
        self.gate.send(self.logger.context(), &path)?;
        Ok(path)
    }

    fn transfer_completed(&self, completion: &TransferCompletion) {
        if self.current() == LifecycleState::Terminated {
            debug!("transfer completion after teardown ignored");
            return;
        }
        if completion.is_success() {
            debug!(run = %self.logger.context(), "coverage report transferred");
        } else {
            debug!(
                run = %self.logger.context(),
                error = ?completion.error,
                cancelled = completion.cancelled,
                "coverage report transfer did not succeed"
            );
        }
        self.teardown();
    }

    /// Runs once. Later callers block until the first has finished, except
    /// the tearing-down thread itself re-entering through a callback.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            self.wait_for_termination();
            return;
        }
        *self.teardown_thread() = Some(thread::current().id());

        self.gate.close();
        self.coordinator.close();
        if let Err(e) = self.store.purge(self.scratch.path()) {
            self.logger.warn_error(&e);
        }

        *self.state() = LifecycleState::Terminated;
        self.terminated.notify_all();
        info!(run = %self.logger.context(), "coverage collector terminated");
    }

    fn teardown_thread(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.teardown_thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for_termination(&self) {
        if *self.teardown_thread() == Some(thread::current().id()) {
            return;
        }
        let mut state = self.state();
        while *state != LifecycleState::Terminated {
            state = self
                .terminated
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Handler registered with the transfer gate. Holds only a weak reference,
/// so a pending subscription never keeps the controller alive.
fn completion_handler(inner: Weak<Inner>) -> impl Fn(&TransferCompletion) + Send + Sync + 'static {
    move |completion: &TransferCompletion| match inner.upgrade() {
        Some(inner) => inner.transfer_completed(completion),
        None => debug!("transfer completion for a dropped collector ignored"),
    }
}

/// Builder for [`LifecycleController`]
pub struct LifecycleControllerBuilder {
    engine: Arc<dyn InstrumentationEngine>,
    channel: Arc<dyn TransferChannel>,
    defaults: CollectorDefaults,
    configuration: Option<CollectorConfiguration>,
    host_logger: Arc<dyn HostLogger>,
    file_system: Arc<dyn FileSystem>,
    context: RunContext,
    mode: InstrumentationMode,
    scratch: Option<ScratchDirectory>,
}

impl fmt::Debug for LifecycleControllerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleControllerBuilder")
            .field("defaults", &self.defaults)
            .field("configuration", &self.configuration)
            .field("context", &self.context)
            .field("mode", &self.mode)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

impl LifecycleControllerBuilder {
    /// Override the defaults record
    #[must_use]
    pub fn with_defaults(mut self, defaults: CollectorDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Collector configuration block from the host's run settings
    #[must_use]
    pub fn with_configuration(mut self, configuration: CollectorConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Host logging channel for warnings
    #[must_use]
    pub fn with_host_logger(mut self, host_logger: Arc<dyn HostLogger>) -> Self {
        self.host_logger = host_logger;
        self
    }

    /// Filesystem used for scratch storage
    #[must_use]
    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    /// Run correlation token supplied by the host
    #[must_use]
    pub const fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    /// Where module preparation runs
    #[must_use]
    pub const fn with_mode(mut self, mode: InstrumentationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use an explicit scratch directory instead of a fresh one under the
    /// scratch root
    #[must_use]
    pub fn with_scratch_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.scratch = Some(ScratchDirectory::at(directory));
        self
    }

    /// Build the controller in [`LifecycleState::Idle`].
    ///
    /// An unknown report format is reported as a warning and replaced by
    /// the default format.
    #[must_use]
    pub fn build(self) -> LifecycleController {
        let logger = CollectorLogger::new(self.context, self.host_logger, &self.defaults.collector_name);
        let renderer = select_renderer(&self.defaults, self.configuration.as_ref(), &logger);
        let store = Arc::new(ScratchStore::new(self.file_system));
        let coordinator = ReportCoordinator::new(
            self.engine,
            renderer,
            Arc::clone(&store),
            self.defaults.report_file_name.clone(),
        )
        .with_mode(self.mode);
        let gate = TransferGate::new(self.channel, self.defaults.friendly_name.clone());
        let scratch = self
            .scratch
            .unwrap_or_else(|| ScratchDirectory::new_under(&self.defaults.scratch_root));

        debug!(
            run = %self.context,
            scratch = %scratch.path().display(),
            format = %coordinator.format(),
            "coverage collector created"
        );

        let defaults = self.defaults;
        let configuration = self.configuration;
        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            defaults,
            configuration,
            logger,
            coordinator,
            gate,
            store,
            scratch,
            state: Mutex::new(LifecycleState::Idle),
            terminated: Condvar::new(),
            torn_down: AtomicBool::new(false),
            teardown_thread: Mutex::new(None),
        });

        LifecycleController { inner }
    }
}

fn select_renderer(
    defaults: &CollectorDefaults,
    configuration: Option<&CollectorConfiguration>,
    logger: &CollectorLogger,
) -> Box<dyn ReportRenderer> {
    let requested = configuration
        .and_then(CollectorConfiguration::report_format)
        .unwrap_or(defaults.report_format.as_str());

    renderer_for_format(requested).unwrap_or_else(|e| {
        logger.warn_error(&e);
        renderer_for_format(&defaults.report_format)
            .unwrap_or_else(|_| Box::new(CoberturaRenderer::new()))
    })
}

/// Per-run coverage collector driven by host session events.
///
/// Dropping the controller disposes it.
///
/// # Example
///
/// ```no_run
/// use coverlet_collector::{
///     InProcessTransferChannel, InstrumentationEngine, LifecycleController, SessionStartEvent,
/// };
/// use std::sync::Arc;
///
/// fn run(engine: Arc<dyn InstrumentationEngine>) {
///     let channel = Arc::new(InProcessTransferChannel::new());
///     let collector = LifecycleController::builder(engine, channel).build();
///
///     collector.on_session_start(&SessionStartEvent::with_test_sources("TestSources", ["a.dll"]));
///     // ... tests run ...
///     collector.on_session_end();
/// }
/// ```
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("context", self.inner.logger.context())
            .field("state", &self.state())
            .field("scratch", &self.inner.scratch)
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    /// Start building a controller over an instrumentation engine and the
    /// host's transfer channel
    #[must_use]
    pub fn builder(
        engine: Arc<dyn InstrumentationEngine>,
        channel: Arc<dyn TransferChannel>,
    ) -> LifecycleControllerBuilder {
        LifecycleControllerBuilder {
            engine,
            channel,
            defaults: CollectorDefaults::default(),
            configuration: None,
            host_logger: Arc::new(TracingHostLogger),
            file_system: Arc::new(OsFileSystem),
            context: RunContext::new(),
            mode: InstrumentationMode::default(),
            scratch: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.current()
    }

    /// Run this controller reports against
    #[must_use]
    pub fn context(&self) -> &RunContext {
        self.inner.logger.context()
    }

    /// Scratch directory the report is staged in
    #[must_use]
    pub fn scratch_directory(&self) -> &Path {
        self.inner.scratch.path()
    }

    /// Host run-start signal: parse settings and instrument the first test
    /// module. Ignored outside [`LifecycleState::Idle`].
    pub fn on_session_start(&self, event: &SessionStartEvent) {
        self.inner.session_start(event);
    }

    /// Host run-end signal: produce, persist and send the report. Ignored
    /// outside [`LifecycleState::Instrumented`].
    pub fn on_session_end(&self) {
        self.inner.session_end();
    }

    /// Same as [`on_session_end`](Self::on_session_end), for hosts that
    /// dispatch typed events
    pub fn handle_session_end(&self, _event: &SessionEndEvent) {
        self.on_session_end();
    }

    /// Tear down: revoke the subscription, drop any instrumentation and
    /// purge the scratch directory. Safe to call repeatedly and concurrently
    /// with a completion signal; when it returns the controller is
    /// [`LifecycleState::Terminated`], even if another thread did the work.
    pub fn dispose(&self) {
        self.inner.teardown();
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageResult, InstrumentationHandle};
    use crate::result::BoxError;
    use crate::scratch::MemoryFileSystem;
    use crate::settings::CoverletSettings;
    use crate::transfer::InProcessTransferChannel;

    #[derive(Default)]
    struct StubEngine {
        fail_prepare: bool,
    }

    impl InstrumentationEngine for StubEngine {
        fn prepare(&self, settings: &CoverletSettings) -> Result<InstrumentationHandle, BoxError> {
            if self.fail_prepare {
                return Err("access denied".into());
            }
            Ok(InstrumentationHandle::new(settings.test_module.clone(), ()))
        }

        fn compute_result(&self, handle: InstrumentationHandle) -> Result<CoverageResult, BoxError> {
            let mut result = CoverageResult::new(handle.module());
            result
                .module_mut(handle.module())
                .document_mut("src/Lib.cs")
                .record_line(1, 1, None);
            Ok(result)
        }
    }

    struct Harness {
        fs: Arc<MemoryFileSystem>,
        channel: Arc<InProcessTransferChannel>,
        controller: LifecycleController,
    }

    fn harness(engine: StubEngine) -> Harness {
        let fs = Arc::new(MemoryFileSystem::new());
        let channel = Arc::new(InProcessTransferChannel::new());
        let controller = LifecycleController::builder(Arc::new(engine), channel.clone())
            .with_file_system(fs.clone())
            .with_scratch_directory("/scratch/run")
            .build();
        Harness { fs, channel, controller }
    }

    fn start_event() -> SessionStartEvent {
        SessionStartEvent::with_test_sources("TestSources", ["a.dll"])
    }

    mod transition_tests {
        use super::*;

        #[test]
        fn test_new_controller_is_idle() {
            let h = harness(StubEngine::default());
            assert_eq!(h.controller.state(), LifecycleState::Idle);
            assert_eq!(h.controller.scratch_directory(), Path::new("/scratch/run"));
        }

        #[test]
        fn test_full_cycle_terminates_on_completion() {
            let h = harness(StubEngine::default());
            h.controller.on_session_start(&start_event());
            assert_eq!(h.controller.state(), LifecycleState::Instrumented);

            h.controller.on_session_end();
            assert_eq!(h.controller.state(), LifecycleState::AwaitingTransferCompletion);
            assert!(h.fs.file_exists(Path::new("/scratch/run/coverage.cobertura.xml")));

            let _ = h.channel.complete(&TransferCompletion::succeeded());
            assert_eq!(h.controller.state(), LifecycleState::Terminated);
            assert_eq!(h.fs.file_count(), 0);
            assert_eq!(h.channel.subscriber_count(), 0);
        }

        #[test]
        fn test_run_end_before_run_start_is_ignored() {
            let h = harness(StubEngine::default());
            h.controller.on_session_end();
            assert_eq!(h.controller.state(), LifecycleState::Idle);
        }

        #[test]
        fn test_second_run_start_is_ignored() {
            let h = harness(StubEngine::default());
            h.controller.on_session_start(&start_event());
            h.controller.on_session_start(&start_event());
            assert_eq!(h.controller.state(), LifecycleState::Instrumented);
        }

        #[test]
        fn test_instrumentation_failure_still_instrumented() {
            let h = harness(StubEngine { fail_prepare: true });
            h.controller.on_session_start(&start_event());
            assert_eq!(h.controller.state(), LifecycleState::Instrumented);

            h.controller.on_session_end();
            assert_eq!(h.controller.state(), LifecycleState::Terminated);
            assert_eq!(h.fs.file_count(), 0);
            assert!(h.channel.sent().is_empty());
        }

        #[test]
        fn test_completion_inside_send_terminates() {
            let fs = Arc::new(MemoryFileSystem::new());
            let channel = Arc::new(InProcessTransferChannel::new().with_complete_on_send(true));
            let controller = LifecycleController::builder(Arc::new(StubEngine::default()), channel.clone())
                .with_file_system(fs.clone())
                .build();

            controller.on_session_start(&start_event());
            controller.on_session_end();

            assert_eq!(controller.state(), LifecycleState::Terminated);
            assert_eq!(fs.removal_count(), 1);
            assert_eq!(channel.sent().len(), 1);
        }

        #[test]
        fn test_typed_session_end_event_reports() {
            let h = harness(StubEngine::default());
            h.controller.on_session_start(&start_event());
            h.controller.handle_session_end(&SessionEndEvent);

            assert_eq!(h.controller.state(), LifecycleState::AwaitingTransferCompletion);
            assert_eq!(h.channel.sent().len(), 1);
        }

        #[test]
        fn test_dispose_from_idle_terminates() {
            let h = harness(StubEngine::default());
            h.controller.dispose();
            h.controller.dispose();
            assert_eq!(h.controller.state(), LifecycleState::Terminated);

            h.controller.on_session_start(&start_event());
            assert_eq!(h.controller.state(), LifecycleState::Terminated);
        }

        #[test]
        fn test_state_display() {
            assert_eq!(
                LifecycleState::AwaitingTransferCompletion.to_string(),
                "awaiting-transfer-completion"
            );
            assert_eq!(LifecycleState::Idle.to_string(), "idle");
        }
    }

    mod renderer_selection_tests {
        use super::*;

        #[test]
        fn test_configured_format_is_used() {
            let h = {
                let fs = Arc::new(MemoryFileSystem::new());
                let channel = Arc::new(InProcessTransferChannel::new());
                let config = CollectorConfiguration::from_json_str(r#"{"Format": "lcov"}"#).unwrap();
                let controller = LifecycleController::builder(Arc::new(StubEngine::default()), channel.clone())
                    .with_file_system(fs.clone())
                    .with_configuration(config)
                    .with_scratch_directory("/scratch/lcov")
                    .build();
                Harness { fs, channel, controller }
            };

            h.controller.on_session_start(&start_event());
            h.controller.on_session_end();
            assert!(h.fs.file_exists(Path::new("/scratch/lcov/coverage.info")));
        }

        #[test]
        fn test_unknown_format_falls_back_to_default() {
            let config = CollectorConfiguration::from_json_str(r#"{"Format": "opencover"}"#).unwrap();
            let logger = CollectorLogger::new(RunContext::new(), Arc::new(TracingHostLogger), "collector");
            let renderer = select_renderer(&CollectorDefaults::default(), Some(&config), &logger);
            assert_eq!(renderer.format(), "cobertura");
        }
    }

    mod drop_tests {
        use super::*;

        #[test]
        fn test_drop_purges_and_unsubscribes() {
            let h = harness(StubEngine::default());
            h.controller.on_session_start(&start_event());
            h.controller.on_session_end();
            assert_eq!(h.fs.file_count(), 1);

            let Harness { fs, channel, controller } = h;
            drop(controller);

            assert_eq!(fs.file_count(), 0);
            assert_eq!(channel.subscriber_count(), 0);
            // late completion after drop is harmless
            assert_eq!(channel.complete(&TransferCompletion::succeeded()), 0);
        }
    }
}
