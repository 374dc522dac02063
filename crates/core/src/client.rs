use serde_json::Value;
use thiserror::Error;

use crate::params::Params;
use crate::subscription::{EventSink, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub dataset: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub query: String,
    pub params: Params,
}

impl OperationRequest {
    #[must_use]
    pub fn new(query: impl Into<String>, params: Params) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub result: Value,
    pub server_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Opening an operation must return immediately. Results, mutations and
/// errors are delivered later through the sink.
pub trait ApiClient {
    fn configure(&mut self, dataset: &str);

    fn current_config(&self) -> ClientConfig;

    fn run_query(&mut self, request: OperationRequest, sink: EventSink) -> Box<dyn Subscription>;

    fn open_listener(
        &mut self,
        request: OperationRequest,
        sink: EventSink,
    ) -> Box<dyn Subscription>;
}
