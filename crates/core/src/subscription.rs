use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::client::{OperationError, QueryResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Listen,
}

impl OperationKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Listen => "listen",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    QueryResult(QueryResponse),
    Mutation(Value),
    Error(OperationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationEvent {
    pub subscription: SubscriptionId,
    pub payload: EventPayload,
    pub received_at: Instant,
}

#[derive(Debug, Clone)]
pub struct EventSink {
    subscription: SubscriptionId,
    sender: Sender<OperationEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(subscription: SubscriptionId, sender: Sender<OperationEvent>) -> Self {
        Self {
            subscription,
            sender,
        }
    }

    #[must_use]
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn send(&self, payload: EventPayload) -> bool {
        self.sender
            .send(OperationEvent {
                subscription: self.subscription,
                payload,
                received_at: Instant::now(),
            })
            .is_ok()
    }

    pub fn send_result(&self, response: QueryResponse) -> bool {
        self.send(EventPayload::QueryResult(response))
    }

    pub fn send_mutation(&self, mutation: Value) -> bool {
        self.send(EventPayload::Mutation(mutation))
    }

    pub fn send_error(&self, error: OperationError) -> bool {
        self.send(EventPayload::Error(error))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Subscription: Send {
    fn cancel(&mut self);
}

pub struct SubscriptionHandle {
    id: SubscriptionId,
    kind: OperationKind,
    inner: Option<Box<dyn Subscription>>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.inner.is_some())
            .finish()
    }
}

impl SubscriptionHandle {
    #[must_use]
    pub fn new(id: SubscriptionId, kind: OperationKind, inner: Box<dyn Subscription>) -> Self {
        Self {
            id,
            kind,
            inner: Some(inner),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Releases the underlying subscription. Returns `false` when it was
    /// already released.
    pub fn cancel(&mut self) -> bool {
        let Some(mut inner) = self.inner.take() else {
            return false;
        };
        inner.cancel();
        true
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
