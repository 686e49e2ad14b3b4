//! Bounded request queue with a single consumer task.

use super::reporter::ResultReporter;
use crate::types::{ErrorKind, RequestEnvelope, RequestResult};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a handler did with an envelope.
pub enum Handled<T> {
    /// The dispatcher reports this result. `None` is reported as a failure.
    Completed(Option<RequestResult<T>>),
    /// The handler took over delivery of every phase of this envelope.
    Delegated,
}

/// Strategy invoked by the consumer for each envelope, in FIFO order.
#[async_trait]
pub trait RequestHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, envelope: &RequestEnvelope<T>, reporter: &ResultReporter) -> Handled<T>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Waiting for the next envelope.
    Idle,
    Processing,
}

const IDLE: u8 = 0;
const PROCESSING: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub accepted: u64,
    pub rejected: u64,
    pub processed: u64,
    pub panics: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    panics: AtomicU64,
}

/// Serialises every request submitted to one client.
///
/// `enqueue` never blocks: it either appends to the tail of the bounded
/// queue or rejects. One consumer task, spawned at construction, takes
/// envelopes in submission order and runs them through the handler one at
/// a time. Nothing raised inside the handler stops the consumer.
pub struct Dispatcher<T> {
    sender: mpsc::Sender<RequestEnvelope<T>>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
    capacity: usize,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Start a dispatcher. A capacity of zero is coerced to one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(capacity: usize, handler: Arc<dyn RequestHandler<T>>) -> Result<Self> {
        Self::with_reporter(capacity, handler, ResultReporter::new())
    }

    pub fn with_reporter(
        capacity: usize,
        handler: Arc<dyn RequestHandler<T>>,
        reporter: ResultReporter,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::configuration_with_context(
                "dispatcher must be started inside a tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("dispatcher"),
            )
        })?;

        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let state = Arc::new(AtomicU8::new(IDLE));
        let counters = Arc::new(Counters::default());

        let worker = runtime.spawn(consume(
            receiver,
            handler,
            reporter,
            state.clone(),
            counters.clone(),
        ));
        debug!(capacity, "dispatcher started");

        Ok(Self {
            sender,
            state,
            counters,
            capacity,
            worker,
        })
    }

    /// Append to the queue. Returns `false` for `None`, a full queue, or a
    /// stopped consumer; no listener is invoked for a rejected envelope.
    pub fn enqueue(&self, envelope: impl Into<Option<RequestEnvelope<T>>>) -> bool {
        let Some(envelope) = envelope.into() else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match self.sender.try_send(envelope) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(envelope)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    ticket = %envelope.ticket(),
                    capacity = self.capacity,
                    "request queue full, rejecting"
                );
                false
            }
            Err(TrySendError::Closed(envelope)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(ticket = %envelope.ticket(), "request queue closed, rejecting");
                false
            }
        }
    }

    pub fn state(&self) -> DispatcherState {
        match self.state.load(Ordering::Acquire) {
            PROCESSING => DispatcherState::Processing,
            _ => DispatcherState::Idle,
        }
    }

    /// Envelopes accepted but not yet taken by the consumer.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, drain what is queued, and wait for the consumer.
    pub async fn shutdown(self) {
        let Self { sender, worker, .. } = self;
        drop(sender);
        if let Err(e) = worker.await {
            warn!(error = %e, "dispatcher consumer ended abnormally");
        }
    }
}

async fn consume<T: Send + 'static>(
    mut receiver: mpsc::Receiver<RequestEnvelope<T>>,
    handler: Arc<dyn RequestHandler<T>>,
    reporter: ResultReporter,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
) {
    loop {
        state.store(IDLE, Ordering::Release);
        let Some(envelope) = receiver.recv().await else {
            break;
        };
        state.store(PROCESSING, Ordering::Release);
        debug!(
            request_id = envelope.request_id(),
            ticket = %envelope.ticket(),
            operation = %envelope.operation(),
            "processing request"
        );

        let outcome = AssertUnwindSafe(handler.handle(&envelope, &reporter))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Handled::Completed(result)) => Some(result),
            Ok(Handled::Delegated) => None,
            Err(panic) => {
                counters.panics.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(panic.as_ref());
                warn!(ticket = %envelope.ticket(), reason = %message, "request handler panicked");
                Some(Some(RequestResult::failure(
                    ErrorKind::Unknown,
                    format!("request handler panicked: {}", message),
                )))
            }
        };

        if let Some(result) = result {
            reporter.report(&envelope, result);
        }
        counters.processed.fetch_add(1, Ordering::Relaxed);
    }
    state.store(IDLE, Ordering::Release);
    debug!("request queue closed, consumer exiting");
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
