//! Transfer Gate
//!
//! One-shot hand-off of the staged report to the host's file-transfer
//! channel, plus the "transfer finished" subscription that triggers cleanup.
//!
//! ```text
//! TransferGate::on_completed(handler) ──► channel.subscribe
//! TransferGate::send(context, path)   ──► channel.send_file (delete_source_after_send = false)
//!                 ... host copies the file ...
//! channel completion ──► handler (at most once per subscription)
//! TransferGate::unsubscribe           ──► channel.unsubscribe (idempotent)
//! ```

use crate::host::RunContext;
use crate::result::{BoxError, CollectorError, CollectorResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// File hand-off request passed to the host channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Run the file belongs to
    pub context: RunContext,
    /// Staged report file
    pub path: PathBuf,
    /// Whether the channel may delete the source once sent. Always `false`
    /// from the gate; deletion waits for the completion signal.
    pub delete_source_after_send: bool,
    /// Human-readable description
    pub description: String,
    /// Friendly name of the sending collector
    pub friendly_name: String,
}

/// Completion payload raised by the host once a transfer has finished,
/// successfully or not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompletion {
    /// Transfer failure reported by the host, if any
    pub error: Option<String>,
    /// Whether the host cancelled the transfer
    pub cancelled: bool,
}

impl TransferCompletion {
    /// Successful transfer
    #[must_use]
    pub const fn succeeded() -> Self {
        Self {
            error: None,
            cancelled: false,
        }
    }

    /// Failed transfer
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            cancelled: false,
        }
    }

    /// Cancelled transfer
    #[must_use]
    pub const fn cancelled() -> Self {
        Self {
            error: None,
            cancelled: true,
        }
    }

    /// Check if the host copied the file
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

/// Callback invoked when a transfer completes
pub type CompletionHandler = Arc<dyn Fn(&TransferCompletion) + Send + Sync>;

/// Token identifying one registered completion handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The host's file-transfer mechanism.
///
/// Completion may be signalled on any thread, including synchronously from
/// inside [`send_file`](Self::send_file).
pub trait TransferChannel: Send + Sync {
    /// Hand a file to the host
    ///
    /// # Errors
    ///
    /// Returns the channel's own error if the request is rejected
    fn send_file(&self, request: TransferRequest) -> Result<(), BoxError>;

    /// Register a completion handler
    fn subscribe(&self, handler: CompletionHandler) -> SubscriptionId;

    /// Remove a completion handler. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Owns one collector's subscription to a [`TransferChannel`]
pub struct TransferGate {
    channel: Arc<dyn TransferChannel>,
    friendly_name: String,
    subscription: Mutex<Option<SubscriptionId>>,
    /// Set under the `subscription` lock by [`TransferGate::close`]
    closed: AtomicBool,
}

impl fmt::Debug for TransferGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferGate")
            .field("friendly_name", &self.friendly_name)
            .field("subscription", &*self.subscription())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl TransferGate {
    /// Create a gate over `channel`
    #[must_use]
    pub fn new(channel: Arc<dyn TransferChannel>, friendly_name: impl Into<String>) -> Self {
        Self {
            channel,
            friendly_name: friendly_name.into(),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn subscription(&self) -> MutexGuard<'_, Option<SubscriptionId>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if a completion handler is currently registered
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription().is_some()
    }

    /// Check if [`close`](Self::close) has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register the completion handler for this transfer cycle.
    ///
    /// The handler fires at most once, however many completions the host
    /// delivers.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::InvalidState`] if a handler is already
    /// registered or the gate is closed
    pub fn on_completed<F>(&self, handler: F) -> CollectorResult<SubscriptionId>
    where
        F: Fn(&TransferCompletion) + Send + Sync + 'static,
    {
        let id = {
            let mut subscription = self.subscription();
            if self.is_closed() {
                return Err(CollectorError::invalid_state("transfer gate is closed"));
            }
            if let Some(existing) = *subscription {
                return Err(CollectorError::invalid_state(format!(
                    "completion handler {existing} is already registered"
                )));
            }

            let fired = AtomicBool::new(false);
            let id = self.channel.subscribe(Arc::new(move |completion: &TransferCompletion| {
                if fired.swap(true, Ordering::SeqCst) {
                    debug!("duplicate transfer completion ignored");
                    return;
                }
                handler(completion);
            }));
            *subscription = Some(id);
            id
        };

        debug!(subscription = %id, "transfer completion handler registered");
        Ok(id)
    }

    /// Hand `path` to the host. The source file is kept; it is purged once
    /// the completion signal arrives.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Transfer`] if the channel rejects the file,
    /// and [`CollectorError::InvalidState`] if the gate is closed
    pub fn send(&self, context: &RunContext, path: &Path) -> CollectorResult<()> {
        debug!(run = %context, path = %path.display(), "sending coverage report");
        if self.is_closed() {
            return Err(CollectorError::invalid_state(format!(
                "transfer gate closed before '{}' was sent",
                path.display()
            )));
        }

        let description = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        let request = TransferRequest {
            context: *context,
            path: path.to_path_buf(),
            delete_source_after_send: false,
            description,
            friendly_name: self.friendly_name.clone(),
        };

        self.channel
            .send_file(request)
            .map_err(|source| CollectorError::Transfer {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Revoke the completion handler. Returns `false` if nothing was
    /// registered, so calling it twice is a no-op.
    pub fn unsubscribe(&self) -> bool {
        let Some(id) = self.subscription().take() else {
            return false;
        };
        let removed = self.channel.unsubscribe(id);
        debug!(subscription = %id, removed, "transfer completion handler revoked");
        true
    }

    /// Revoke the handler and refuse further registrations and sends.
    /// Idempotent. A send already handed to the channel is not recalled.
    pub fn close(&self) {
        let id = {
            let mut subscription = self.subscription();
            self.closed.store(true, Ordering::SeqCst);
            subscription.take()
        };
        if let Some(id) = id {
            let removed = self.channel.unsubscribe(id);
            debug!(subscription = %id, removed, "transfer gate closed");
        }
    }
}

impl Drop for TransferGate {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

#[derive(Default)]
struct ChannelState {
    next_id: u64,
    handlers: BTreeMap<SubscriptionId, CompletionHandler>,
    sent: Vec<TransferRequest>,
    rejection: Option<String>,
    unsubscribed: usize,
}

/// In-process transfer channel.
///
/// Records every request and lets the owner signal completion. Handlers run
/// outside the channel lock, so they may unsubscribe from inside the
/// callback.
#[derive(Default)]
pub struct InProcessTransferChannel {
    state: Mutex<ChannelState>,
    complete_on_send: bool,
}

impl fmt::Debug for InProcessTransferChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("InProcessTransferChannel")
            .field("subscribers", &state.handlers.len())
            .field("sent", &state.sent.len())
            .field("complete_on_send", &self.complete_on_send)
            .finish()
    }
}

impl InProcessTransferChannel {
    /// Create a channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal a successful completion from inside `send_file`
    #[must_use]
    pub const fn with_complete_on_send(mut self, enabled: bool) -> Self {
        self.complete_on_send = enabled;
        self
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject subsequent sends with `reason` (`None` accepts again)
    pub fn reject_sends(&self, reason: Option<&str>) {
        self.state().rejection = reason.map(String::from);
    }

    /// Requests received so far
    #[must_use]
    pub fn sent(&self) -> Vec<TransferRequest> {
        self.state().sent.clone()
    }

    /// Number of registered handlers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state().handlers.len()
    }

    /// Number of handlers actually removed by `unsubscribe`
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.state().unsubscribed
    }

    /// Deliver `completion` to every registered handler. Returns how many
    /// handlers were invoked.
    pub fn complete(&self, completion: &TransferCompletion) -> usize {
        let handlers: Vec<CompletionHandler> = self.state().handlers.values().cloned().collect();
        for handler in &handlers {
            handler(completion);
        }
        handlers.len()
    }
}

impl TransferChannel for InProcessTransferChannel {
    fn send_file(&self, request: TransferRequest) -> Result<(), BoxError> {
        {
            let mut state = self.state();
            if let Some(reason) = &state.rejection {
                return Err(reason.clone().into());
            }
            state.sent.push(request);
        }
        if self.complete_on_send {
            let _ = self.complete(&TransferCompletion::succeeded());
        }
        Ok(())
    }

    fn subscribe(&self, handler: CompletionHandler) -> SubscriptionId {
        let mut state = self.state();
        state.next_id += 1;
        let id = SubscriptionId::new(state.next_id);
        let _ = state.handlers.insert(id, handler);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let removed = state.handlers.remove(&id).is_some();
        if removed {
            state.unsubscribed += 1;
        }
        removed
    }
}
