use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api_url::decode_api_url;
use crate::client::{ApiClient, OperationError, OperationRequest, QueryResponse};
use crate::listen_feed::ListenFeed;
use crate::params::{parse_params, render_params, Params, ParamsError};
use crate::session::{SessionKey, SessionStore};
use crate::subscription::{
    EventPayload, EventSink, OperationEvent, OperationKind, SubscriptionHandle, SubscriptionId,
};

pub const DEFAULT_EDITOR_HEIGHT: u16 = 6;
pub const MIN_EDITOR_HEIGHT: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Idle,
    QueryRunning,
    ListenRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteOutcome {
    Consumed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("{0}")]
    Params(#[from] ParamsError),
    #[error("{0}")]
    Operation(#[from] OperationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    query: String,
    raw_params: String,
    parsed_params: Result<Params, ParamsError>,
}

impl Draft {
    #[must_use]
    pub fn new(query: impl Into<String>, raw_params: impl Into<String>) -> Self {
        let raw_params = raw_params.into();
        Self {
            query: query.into(),
            parsed_params: parse_params(&raw_params),
            raw_params,
        }
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn raw_params(&self) -> &str {
        &self.raw_params
    }

    #[must_use]
    pub fn parsed_params(&self) -> Result<&Params, &ParamsError> {
        self.parsed_params.as_ref()
    }

    #[must_use]
    pub fn params_error(&self) -> Option<&ParamsError> {
        self.parsed_params.as_ref().err()
    }

    /// `Ok(None)` when there is nothing to run.
    fn request(&self) -> Result<Option<OperationRequest>, ParamsError> {
        let params = self.parsed_params.clone()?;
        if self.query.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(OperationRequest::new(self.query.clone(), params)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub query: String,
    pub result: Value,
    pub server_time_ms: u64,
    pub end_to_end: Duration,
}

impl QueryOutcome {
    #[must_use]
    pub fn is_empty_result(&self) -> bool {
        matches!(&self.result, Value::Array(items) if items.is_empty())
    }
}

pub struct VisionController<C: ApiClient, S: SessionStore> {
    client: C,
    session: S,
    datasets: Vec<String>,
    draft: Draft,
    status: OperationStatus,
    outcome: Option<QueryOutcome>,
    error: Option<ConsoleError>,
    listen_feed: ListenFeed<Value>,
    query_subscription: Option<SubscriptionHandle>,
    listen_subscription: Option<SubscriptionHandle>,
    query_started_at: Option<Instant>,
    running_query: String,
    last_subscription_id: u64,
    editor_height: u16,
    events_tx: Sender<OperationEvent>,
    events_rx: Receiver<OperationEvent>,
}

impl<C: ApiClient, S: SessionStore> VisionController<C, S> {
    pub fn new(mut client: C, session: S, datasets: Vec<String>) -> Self {
        let draft = Draft::new(
            session.get(SessionKey::LastQuery, ""),
            session.get(SessionKey::LastParams, ""),
        );

        let first_dataset = datasets.first().cloned().unwrap_or_default();
        let mut dataset = session.get(SessionKey::Dataset, &first_dataset);
        if !datasets.is_empty() && !datasets.contains(&dataset) {
            debug!(%dataset, "remembered dataset is no longer available");
            dataset = first_dataset;
        }
        if !dataset.is_empty() {
            client.configure(&dataset);
        }

        let (events_tx, events_rx) = mpsc::channel();
        Self {
            client,
            session,
            datasets,
            draft,
            status: OperationStatus::Idle,
            outcome: None,
            error: None,
            listen_feed: ListenFeed::default(),
            query_subscription: None,
            listen_subscription: None,
            query_started_at: None,
            running_query: String::new(),
            last_subscription_id: 0,
            editor_height: DEFAULT_EDITOR_HEIGHT,
            events_tx,
            events_rx,
        }
    }

    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    #[must_use]
    pub fn is_query_running(&self) -> bool {
        self.status == OperationStatus::QueryRunning
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.status == OperationStatus::ListenRunning
    }

    #[must_use]
    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    #[must_use]
    pub fn datasets(&self) -> &[String] {
        &self.datasets
    }

    #[must_use]
    pub fn current_dataset(&self) -> String {
        self.client.current_config().dataset
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&QueryOutcome> {
        self.outcome.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&ConsoleError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn has_result(&self) -> bool {
        self.error.is_none() && !self.is_query_running() && self.outcome.is_some()
    }

    #[must_use]
    pub fn listen_feed(&self) -> &ListenFeed<Value> {
        &self.listen_feed
    }

    #[must_use]
    pub fn editor_height(&self) -> u16 {
        self.editor_height
    }

    #[must_use]
    pub fn query_elapsed(&self) -> Option<Duration> {
        if !self.is_query_running() {
            return None;
        }
        self.query_started_at.map(|started_at| started_at.elapsed())
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.draft.query = query.into();
    }

    pub fn set_params(&mut self, raw_params: impl Into<String>) {
        let raw_params = raw_params.into();
        self.draft.parsed_params = parse_params(&raw_params);
        self.draft.raw_params = raw_params;
    }

    pub fn run_query(&mut self) -> bool {
        self.persist_draft();
        self.cancel_listener();
        self.cancel_query();
        self.reset_output();

        let Some(request) = self.validated_request() else {
            return false;
        };

        let id = self.next_subscription_id();
        let sink = EventSink::new(id, self.events_tx.clone());
        info!(subscription = %id, dataset = %self.current_dataset(), "running query");
        self.running_query.clone_from(&request.query);
        let inner = self.client.run_query(request, sink);
        self.query_subscription = Some(SubscriptionHandle::new(id, OperationKind::Query, inner));
        self.query_started_at = Some(Instant::now());
        self.status = OperationStatus::QueryRunning;
        true
    }

    pub fn toggle_listen(&mut self) -> bool {
        if self.is_listening() {
            self.cancel_listener();
            self.status = OperationStatus::Idle;
            info!("listener stopped");
            return false;
        }

        self.persist_draft();
        self.cancel_query();
        self.reset_output();

        let Some(request) = self.validated_request() else {
            return false;
        };

        let id = self.next_subscription_id();
        let sink = EventSink::new(id, self.events_tx.clone());
        info!(subscription = %id, dataset = %self.current_dataset(), "opening listener");
        let inner = self.client.open_listener(request, sink);
        self.listen_subscription = Some(SubscriptionHandle::new(id, OperationKind::Listen, inner));
        self.status = OperationStatus::ListenRunning;
        true
    }

    pub fn change_dataset(&mut self, dataset: &str) {
        if let Err(error) = self.session.set(SessionKey::Dataset, dataset) {
            warn!(%error, "failed to remember dataset");
        }
        self.client.configure(dataset);
        info!(%dataset, "dataset changed");
        self.run_query();
    }

    pub fn handle_paste(&mut self, text: &str) -> PasteOutcome {
        let decoded = match decode_api_url(text) {
            None => return PasteOutcome::Ignored,
            Some(Err(error)) => {
                warn!(%error, "error while trying to parse pasted API URL");
                return PasteOutcome::Ignored;
            }
            Some(Ok(decoded)) => decoded,
        };

        self.draft = Draft {
            query: decoded.query,
            raw_params: render_params(&decoded.params),
            parsed_params: Ok(decoded.params),
        };

        if self.current_dataset() != decoded.dataset {
            self.change_dataset(&decoded.dataset);
        }
        PasteOutcome::Consumed
    }

    pub fn change_editor_height(&mut self, height: u16) -> bool {
        let height = height.max(MIN_EDITOR_HEIGHT);
        if height == self.editor_height {
            return false;
        }
        self.editor_height = height;
        true
    }

    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply(event) {
                applied += 1;
            }
        }
        applied
    }

    pub fn poll_event(&mut self, timeout: Duration) -> bool {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => self.apply(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    pub fn apply(&mut self, event: OperationEvent) -> bool {
        let Some(kind) = self.active_kind(event.subscription) else {
            debug!(subscription = %event.subscription, "dropping event from stale subscription");
            return false;
        };

        match (kind, event.payload) {
            (OperationKind::Query, EventPayload::QueryResult(response)) => {
                self.complete_query(response, event.received_at);
                true
            }
            (OperationKind::Query, EventPayload::Error(error)) => {
                warn!(%error, "query failed");
                self.cancel_query();
                self.error = Some(ConsoleError::Operation(error));
                self.status = OperationStatus::Idle;
                true
            }
            (OperationKind::Listen, EventPayload::Mutation(mutation)) => {
                self.listen_feed.push(mutation);
                true
            }
            (OperationKind::Listen, EventPayload::Error(error)) => {
                warn!(%error, "listener failed");
                self.cancel_listener();
                self.error = Some(ConsoleError::Operation(error));
                self.status = OperationStatus::Idle;
                true
            }
            (kind, payload) => {
                warn!(kind = kind.label(), ?payload, "unexpected event for operation");
                false
            }
        }
    }

    pub fn teardown(&mut self) {
        self.cancel_query();
        self.cancel_listener();
        self.status = OperationStatus::Idle;
    }

    fn complete_query(&mut self, response: QueryResponse, received_at: Instant) {
        let end_to_end = self
            .query_started_at
            .map(|started_at| received_at.saturating_duration_since(started_at))
            .unwrap_or_default();
        info!(
            server_ms = response.server_time_ms,
            end_to_end_ms = u64::try_from(end_to_end.as_millis()).unwrap_or(u64::MAX),
            "query completed"
        );

        self.cancel_query();
        self.outcome = Some(QueryOutcome {
            query: std::mem::take(&mut self.running_query),
            result: response.result,
            server_time_ms: response.server_time_ms,
            end_to_end,
        });
        self.error = None;
        self.status = OperationStatus::Idle;
    }

    fn active_kind(&self, id: SubscriptionId) -> Option<OperationKind> {
        [&self.query_subscription, &self.listen_subscription]
            .into_iter()
            .flatten()
            .find(|handle| handle.id() == id)
            .map(SubscriptionHandle::kind)
    }

    fn validated_request(&mut self) -> Option<OperationRequest> {
        match self.draft.request() {
            Ok(Some(request)) => Some(request),
            Ok(None) => None,
            Err(error) => {
                self.error = Some(ConsoleError::Params(error));
                None
            }
        }
    }

    fn reset_output(&mut self) {
        self.status = OperationStatus::Idle;
        self.listen_feed.clear();
        self.outcome = None;
        self.error = None;
        self.query_started_at = None;
    }

    fn persist_draft(&mut self) {
        for (key, value) in [
            (SessionKey::LastQuery, self.draft.query.as_str()),
            (SessionKey::LastParams, self.draft.raw_params.as_str()),
        ] {
            if let Err(error) = self.session.set(key, value) {
                warn!(key = key.as_str(), %error, "failed to remember draft");
            }
        }
    }

    fn cancel_query(&mut self) {
        if let Some(mut handle) = self.query_subscription.take() {
            if handle.cancel() {
                debug!(subscription = %handle.id(), "query subscription released");
            }
        }
    }

    fn cancel_listener(&mut self) {
        if let Some(mut handle) = self.listen_subscription.take() {
            if handle.cancel() {
                debug!(subscription = %handle.id(), "listen subscription released");
            }
        }
    }

    fn next_subscription_id(&mut self) -> SubscriptionId {
        self.last_subscription_id += 1;
        SubscriptionId::new(self.last_subscription_id)
    }
}

impl<C: ApiClient, S: SessionStore> Drop for VisionController<C, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
