//! Result delivery.

use crate::types::{Origin, RequestEnvelope, RequestResult, Session, Ticket};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Callbacks for one submitted request. All methods default to no-ops.
///
/// Callbacks run wherever the reporter runs. Listeners that must observe
/// results on the submitting task forward them, which is what
/// [`ChannelListener`] does.
pub trait ResultListener<T>: Send + Sync {
    fn on_success(&self, _ticket: &Ticket, _payload: Vec<T>, _origin: Origin) {}
    fn on_failure(&self, _ticket: &Ticket, _message: &str, _origin: Origin) {}
    fn on_session_change(&self, _ticket: &Ticket, _session: &Session) {}
}

/// One delivered callback, as seen by a [`ChannelListener`] receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent<T> {
    Success {
        ticket: Ticket,
        payload: Vec<T>,
        origin: Origin,
    },
    Failure {
        ticket: Ticket,
        message: String,
        origin: Origin,
    },
    SessionChanged {
        ticket: Ticket,
        session: Session,
    },
}

impl<T> ListenerEvent<T> {
    pub fn ticket(&self) -> &Ticket {
        match self {
            ListenerEvent::Success { ticket, .. }
            | ListenerEvent::Failure { ticket, .. }
            | ListenerEvent::SessionChanged { ticket, .. } => ticket,
        }
    }

    pub fn origin(&self) -> Option<Origin> {
        match self {
            ListenerEvent::Success { origin, .. } | ListenerEvent::Failure { origin, .. } => {
                Some(*origin)
            }
            ListenerEvent::SessionChanged { .. } => None,
        }
    }

    /// True for the outcome of the network phase, the last delivery a
    /// request can produce apart from a following session change.
    pub fn is_network_outcome(&self) -> bool {
        self.origin() == Some(Origin::Network)
    }
}

/// Forwards every callback to the receiver held by the submitting task,
/// preserving delivery order.
pub struct ChannelListener<T> {
    tx: mpsc::UnboundedSender<ListenerEvent<T>>,
}

impl<T> ChannelListener<T> {
    fn send(&self, event: ListenerEvent<T>) {
        if self.tx.send(event).is_err() {
            trace!("listener receiver dropped, discarding event");
        }
    }
}

impl<T: Send + 'static> ResultListener<T> for ChannelListener<T> {
    fn on_success(&self, ticket: &Ticket, payload: Vec<T>, origin: Origin) {
        self.send(ListenerEvent::Success {
            ticket: ticket.clone(),
            payload,
            origin,
        });
    }

    fn on_failure(&self, ticket: &Ticket, message: &str, origin: Origin) {
        self.send(ListenerEvent::Failure {
            ticket: ticket.clone(),
            message: message.to_string(),
            origin,
        });
    }

    fn on_session_change(&self, ticket: &Ticket, session: &Session) {
        self.send(ListenerEvent::SessionChanged {
            ticket: ticket.clone(),
            session: session.clone(),
        });
    }
}

/// Create a listener and the receiver the submitting task drains.
pub fn listener_channel<T: Send + 'static>() -> (
    Arc<dyn ResultListener<T>>,
    mpsc::UnboundedReceiver<ListenerEvent<T>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelListener { tx }), rx)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub successes: u64,
    pub failures: u64,
    pub session_changes: u64,
    pub discarded: u64,
    pub listener_panics: u64,
}

#[derive(Default)]
struct AtomicStats {
    successes: AtomicU64,
    failures: AtomicU64,
    session_changes: AtomicU64,
    discarded: AtomicU64,
    listener_panics: AtomicU64,
}

/// Maps a result onto listener callbacks.
///
/// - no result → `on_failure` with the generic message
/// - success with payload → `on_success`
/// - anything else → `on_failure`
/// - a session on the result → additionally `on_session_change`
///
/// A missing listener discards the result. A panicking callback is
/// contained here and counted; it never reaches the caller.
#[derive(Clone, Default)]
pub struct ResultReporter {
    stats: Arc<AtomicStats>,
}

impl ResultReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report<T>(&self, envelope: &RequestEnvelope<T>, result: Option<RequestResult<T>>) {
        let ticket = envelope.ticket();
        let Some(listener) = envelope.listener() else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(ticket = %ticket, request_id = envelope.request_id(), "no listener, result discarded");
            return;
        };

        let Some(result) = result else {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            let fallback: RequestResult<T> = RequestResult::no_result();
            self.guarded(ticket, || {
                listener.on_failure(ticket, fallback.message_or_default(), Origin::Network)
            });
            return;
        };

        let origin = result.origin;
        let session = result.session.clone();
        let deliverable = result.is_deliverable_success();
        match (deliverable, result.payload) {
            (true, Some(payload)) => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                debug!(ticket = %ticket, %origin, items = payload.len(), "delivering success");
                self.guarded(ticket, || listener.on_success(ticket, payload, origin));
            }
            _ => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                let message = result
                    .message
                    .as_deref()
                    .unwrap_or(crate::types::result::NO_RESULT_MESSAGE);
                debug!(ticket = %ticket, %origin, reason = message, "delivering failure");
                self.guarded(ticket, || listener.on_failure(ticket, message, origin));
            }
        }

        if let Some(session) = session {
            self.stats.session_changes.fetch_add(1, Ordering::Relaxed);
            self.guarded(ticket, || listener.on_session_change(ticket, &session));
        }
    }

    fn guarded(&self, ticket: &Ticket, callback: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            self.stats.listener_panics.fetch_add(1, Ordering::Relaxed);
            warn!(ticket = %ticket, "result listener panicked");
        }
    }

    pub fn stats(&self) -> ReporterStats {
        ReporterStats {
            successes: self.stats.successes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            session_changes: self.stats.session_changes.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            listener_panics: self.stats.listener_panics.load(Ordering::Relaxed),
        }
    }
}
