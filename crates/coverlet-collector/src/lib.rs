//! Coverlet Collector: coverage report lifecycle coordinator
//!
//! Embedded in a test host. Instruments the test module when the run starts,
//! renders the coverage report when it ends, stages it in a per-run scratch
//! directory, hands it to the host's transfer channel, and removes the
//! scratch directory once the host confirms the transfer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       LifecycleController                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  run start ──► CoverletSettingsParser ──► ReportCoordinator      │
//! │                                            │ begin_instrumentation│
//! │  run end ───► ReportCoordinator ──► ScratchStore ──► TransferGate │
//! │               produce_report        write            send        │
//! │                                                        │         │
//! │  completion ◄──────────────────── host transfer channel┘         │
//! │      └──► TransferGate::close + ScratchStore::purge              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure degrades to a warning through the host logger; the test
//! run itself always completes.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod coordinator;
pub mod coverage;
pub mod defaults;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod result;
pub mod scratch;
pub mod settings;
pub mod transfer;

pub use coordinator::{InstrumentationMode, ReportArtifact, ReportCoordinator};
pub use coverage::{
    renderer_for_format, CoberturaRenderer, CoverageResult, CoverageSummary, InstrumentationEngine,
    InstrumentationHandle, JsonRenderer, LcovRenderer, RenderedReport, ReportRenderer,
};
pub use defaults::CollectorDefaults;
pub use host::{
    CollectorLogger, HostLogger, RunContext, SessionEndEvent, SessionStartEvent, TracingHostLogger,
};
pub use lifecycle::{LifecycleController, LifecycleControllerBuilder, LifecycleState};
pub use result::{BoxError, CollectorError, CollectorResult};
pub use scratch::{FileSystem, MemoryFileSystem, OsFileSystem, ScratchDirectory, ScratchStore};
pub use settings::{CollectorConfiguration, CoverletSettings, CoverletSettingsParser};
pub use transfer::{
    CompletionHandler, InProcessTransferChannel, SubscriptionId, TransferChannel,
    TransferCompletion, TransferGate, TransferRequest,
};
