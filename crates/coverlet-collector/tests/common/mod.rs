//! Shared fakes for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use coverlet_collector::{
    BoxError, CoverageResult, CoverletSettings, HostLogger, InProcessTransferChannel,
    InstrumentationEngine, InstrumentationHandle, InstrumentationMode, LifecycleController,
    MemoryFileSystem, RunContext,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub const SCRATCH: &str = "/scratch/run";
pub const REPORT: &str = "/scratch/run/coverage.cobertura.xml";

/// Holds an engine call until the test releases it
struct Hold {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Hold {
    fn pass(slot: &Mutex<Option<Self>>) {
        if let Some(hold) = slot.lock().unwrap().as_ref() {
            hold.entered.send(()).unwrap();
            hold.release.recv().unwrap();
        }
    }
}

/// Test side of a held engine call: `entered` fires when the call starts,
/// sending on `release` lets it finish
pub struct HeldCall {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

fn hold(slot: &Mutex<Option<Hold>>) -> HeldCall {
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    *slot.lock().unwrap() = Some(Hold {
        entered: entered_tx,
        release: release_rx,
    });
    HeldCall { entered, release }
}

/// Engine with switchable failures, call counters and holdable calls
#[derive(Default)]
pub struct FakeEngine {
    pub fail_prepare: AtomicBool,
    pub fail_compute: AtomicBool,
    pub prepared: AtomicUsize,
    pub computed: AtomicUsize,
    pub last_settings: Mutex<Option<CoverletSettings>>,
    prepare_hold: Mutex<Option<Hold>>,
    compute_hold: Mutex<Option<Hold>>,
}

impl FakeEngine {
    pub fn failing_prepare() -> Self {
        let engine = Self::default();
        engine.fail_prepare.store(true, Ordering::SeqCst);
        engine
    }

    pub fn failing_compute() -> Self {
        let engine = Self::default();
        engine.fail_compute.store(true, Ordering::SeqCst);
        engine
    }

    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn computed(&self) -> usize {
        self.computed.load(Ordering::SeqCst)
    }

    pub fn last_settings(&self) -> Option<CoverletSettings> {
        self.last_settings.lock().unwrap().clone()
    }

    /// Make the next `prepare` wait for the returned release
    pub fn hold_prepare(&self) -> HeldCall {
        hold(&self.prepare_hold)
    }

    /// Make the next `compute_result` wait for the returned release
    pub fn hold_compute(&self) -> HeldCall {
        hold(&self.compute_hold)
    }
}

impl InstrumentationEngine for FakeEngine {
    fn prepare(&self, settings: &CoverletSettings) -> Result<InstrumentationHandle, BoxError> {
        *self.last_settings.lock().unwrap() = Some(settings.clone());
        Hold::pass(&self.prepare_hold);
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err("Access to the path is denied".into());
        }
        let _ = self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(InstrumentationHandle::new(settings.test_module.clone(), 7_u32))
    }

    fn compute_result(&self, handle: InstrumentationHandle) -> Result<CoverageResult, BoxError> {
        Hold::pass(&self.compute_hold);
        if self.fail_compute.load(Ordering::SeqCst) {
            return Err("hit file not found".into());
        }
        let _ = self.computed.fetch_add(1, Ordering::SeqCst);

        let module = handle.module().to_string();
        let mut result = CoverageResult::new(&module);
        let document = result.module_mut(&module).document_mut("src/Calculator.cs");
        document.record_line(10, 4, Some("Calculator::Add"));
        document.record_line(11, 0, Some("Calculator::Add"));
        document.record_branch(10, 0, 0, 4);
        document.record_branch(10, 0, 1, 0);
        Ok(result)
    }
}

/// Host logger that keeps every warning
#[derive(Default)]
pub struct RecordingLogger {
    warnings: Mutex<Vec<(RunContext, String)>>,
}

impl RecordingLogger {
    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn contexts(&self) -> Vec<RunContext> {
        self.warnings.lock().unwrap().iter().map(|(context, _)| *context).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.warnings().iter().any(|warning| warning.contains(needle))
    }
}

impl HostLogger for RecordingLogger {
    fn warn(&self, context: &RunContext, message: &str) {
        self.warnings.lock().unwrap().push((*context, message.to_string()));
    }
}

/// Everything a lifecycle test needs to observe
pub struct Rig {
    pub engine: Arc<FakeEngine>,
    pub fs: Arc<MemoryFileSystem>,
    pub channel: Arc<InProcessTransferChannel>,
    pub logger: Arc<RecordingLogger>,
    pub context: RunContext,
}

impl Rig {
    pub fn new(engine: FakeEngine) -> Self {
        Self::with_channel(engine, InProcessTransferChannel::new())
    }

    pub fn with_channel(engine: FakeEngine, channel: InProcessTransferChannel) -> Self {
        Self {
            engine: Arc::new(engine),
            fs: Arc::new(MemoryFileSystem::new()),
            channel: Arc::new(channel),
            logger: Arc::new(RecordingLogger::default()),
            context: RunContext::new(),
        }
    }

    pub fn controller(&self) -> LifecycleController {
        self.controller_with_mode(InstrumentationMode::Inline)
    }

    pub fn controller_with_mode(&self, mode: InstrumentationMode) -> LifecycleController {
        LifecycleController::builder(self.engine.clone(), self.channel.clone())
            .with_file_system(self.fs.clone())
            .with_host_logger(self.logger.clone())
            .with_context(self.context)
            .with_scratch_directory(SCRATCH)
            .with_mode(mode)
            .build()
    }
}

/// Tracing layer that disposes the collector the moment an event with the
/// given message is logged on the subscribed thread
pub struct DisposeOnEvent {
    message: &'static str,
    collector: Arc<OnceLock<Arc<LifecycleController>>>,
    fired: AtomicUsize,
}

impl DisposeOnEvent {
    pub fn new(message: &'static str, collector: Arc<OnceLock<Arc<LifecycleController>>>) -> Self {
        Self {
            message,
            collector,
            fired: AtomicUsize::new(0),
        }
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for DisposeOnEvent {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if visitor.0 != self.message {
            return;
        }
        if let Some(collector) = self.collector.get() {
            if self.fired.fetch_add(1, Ordering::SeqCst) == 0 {
                collector.dispose();
            }
        }
    }
}
