use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use vision_core::client::{
    ApiClient, ClientConfig, OperationError, OperationRequest, QueryResponse,
};
use vision_core::config::ConsoleConfig;
use vision_core::subscription::{CancellationToken, EventSink, Subscription};

use crate::sse::{SseDecoder, SseEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LISTEN_RECONNECT_ATTEMPTS: u32 = 3;
const LISTEN_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("invalid api url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("api url `{0}` cannot carry a path")]
    CannotBeBase(String),
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    #[serde(default)]
    ms: u64,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct DatasetEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed {
        description: Option<String>,
        message: Option<String>,
    },
    Plain(String),
}

#[derive(Debug, Clone)]
pub struct HttpApiClient {
    http: ReqwestClient,
    base_url: Url,
    token: Option<String>,
    request_timeout: Duration,
    dataset: String,
    runtime: Handle,
    listen_retry: ListenRetry,
}

#[derive(Debug, Clone, Copy)]
struct ListenRetry {
    attempts: u32,
    delay: Duration,
}

enum StreamEnd {
    Closed,
    Stopped,
}

impl HttpApiClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        request_timeout: Duration,
        runtime: Handle,
    ) -> Result<Self, HttpClientError> {
        let trimmed = base_url.trim_end_matches('/');
        let base_url = Url::parse(trimmed).map_err(|source| HttpClientError::InvalidUrl {
            url: trimmed.to_string(),
            source,
        })?;
        if base_url.cannot_be_a_base() {
            return Err(HttpClientError::CannotBeBase(trimmed.to_string()));
        }

        let http = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(HttpClientError::Build)?;

        Ok(Self {
            http,
            base_url,
            token,
            request_timeout,
            dataset: String::new(),
            runtime,
            listen_retry: ListenRetry {
                attempts: LISTEN_RECONNECT_ATTEMPTS,
                delay: LISTEN_RECONNECT_DELAY,
            },
        })
    }

    #[must_use]
    pub fn with_listen_reconnects(mut self, attempts: u32, delay: Duration) -> Self {
        self.listen_retry = ListenRetry { attempts, delay };
        self
    }

    pub fn from_config(config: &ConsoleConfig, runtime: Handle) -> Result<Self, HttpClientError> {
        Self::new(
            &config.api_base_url(),
            config.token(),
            config.request_timeout(),
            runtime,
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Lists dataset names for the project. Blocks the calling thread, so it
    /// must not be called from inside the runtime.
    pub fn fetch_datasets(&self) -> Result<Vec<String>, HttpClientError> {
        let url = self.endpoint(&["datasets"])?;
        let request = self.authorized(self.http.get(url.clone()).timeout(self.request_timeout));
        self.runtime.block_on(async move {
            let response = send(request, &url).await?;
            let entries: Vec<DatasetEntry> =
                response
                    .json()
                    .await
                    .map_err(|source| HttpClientError::Decode {
                        url: url.to_string(),
                        source,
                    })?;
            Ok(entries.into_iter().map(|entry| entry.name).collect())
        })
    }

    fn operation_url(
        &self,
        endpoint: &str,
        request: &OperationRequest,
    ) -> Result<Url, HttpClientError> {
        let mut url = self.endpoint(&["data", endpoint, self.dataset.as_str()])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("query", &request.query);
            for (name, value) in &request.params {
                pairs.append_pair(&format!("${name}"), &value.to_string());
            }
        }
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HttpClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| HttpClientError::CannotBeBase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        authorize(builder, self.token.as_deref())
    }

    fn spawn(
        &self,
        sink: EventSink,
        token: CancellationToken,
        task: impl std::future::Future<Output = Result<(), OperationError>> + Send + 'static,
    ) -> Box<dyn Subscription> {
        let guard = token.clone();
        let handle = self.runtime.spawn(async move {
            if let Err(error) = task.await {
                debug!(subscription = %sink.subscription(), %error, "operation failed");
                if !guard.is_cancelled() {
                    sink.send_error(error);
                }
            }
        });
        Box::new(TaskSubscription {
            token,
            task: Some(handle),
        })
    }
}

impl ApiClient for HttpApiClient {
    fn configure(&mut self, dataset: &str) {
        self.dataset = dataset.to_string();
    }

    fn current_config(&self) -> ClientConfig {
        ClientConfig {
            dataset: self.dataset.clone(),
        }
    }

    fn run_query(&mut self, request: OperationRequest, sink: EventSink) -> Box<dyn Subscription> {
        let token = CancellationToken::new();
        let prepared = self.operation_url("query", &request).map(|url| {
            let builder =
                self.authorized(self.http.get(url.clone()).timeout(self.request_timeout));
            (url, builder)
        });
        let result_sink = sink.clone();
        let guard = token.clone();

        self.spawn(sink, token, async move {
            let (url, builder) = prepared.map_err(to_operation_error)?;
            debug!(%url, "sending query");
            let response = send(builder, &url).await.map_err(to_operation_error)?;
            let envelope: QueryEnvelope = response.json().await.map_err(|source| {
                to_operation_error(HttpClientError::Decode {
                    url: url.to_string(),
                    source,
                })
            })?;
            if !guard.is_cancelled() {
                result_sink.send_result(QueryResponse {
                    result: envelope.result,
                    server_time_ms: envelope.ms,
                });
            }
            Ok(())
        })
    }

    fn open_listener(
        &mut self,
        request: OperationRequest,
        sink: EventSink,
    ) -> Box<dyn Subscription> {
        let token = CancellationToken::new();
        let prepared = self.operation_url("listen", &request).map(|mut url| {
            url.query_pairs_mut().append_pair("includeResult", "true");
            url
        });
        let http = self.http.clone();
        let bearer = self.token.clone();
        let retry = self.listen_retry;
        let mutation_sink = sink.clone();
        let guard = token.clone();

        self.spawn(sink, token, async move {
            let url = prepared.map_err(to_operation_error)?;
            let mut reconnects = 0;
            loop {
                info!(%url, reconnects, "connecting listener");
                let builder = authorize(
                    http.get(url.clone()).header(ACCEPT, "text/event-stream"),
                    bearer.as_deref(),
                );
                let response = send(builder, &url).await.map_err(to_operation_error)?;
                match stream_events(response, &url, &mutation_sink, &guard).await? {
                    StreamEnd::Stopped => return Ok(()),
                    StreamEnd::Closed if reconnects < retry.attempts => {
                        reconnects += 1;
                        warn!(%url, attempt = reconnects, "listener closed by server, reconnecting");
                        tokio::time::sleep(retry.delay).await;
                        if guard.is_cancelled() {
                            return Ok(());
                        }
                    }
                    StreamEnd::Closed => {
                        return Err(OperationError::new(format!(
                            "listener connection closed by server, gave up after {} reconnects",
                            retry.attempts
                        )));
                    }
                }
            }
        })
    }
}

async fn stream_events(
    mut response: Response,
    url: &Url,
    sink: &EventSink,
    guard: &CancellationToken,
) -> Result<StreamEnd, OperationError> {
    let mut decoder = SseDecoder::new();
    loop {
        let chunk = response.chunk().await.map_err(|source| {
            to_operation_error(HttpClientError::Request {
                url: url.to_string(),
                source,
            })
        })?;
        let Some(chunk) = chunk else {
            return Ok(StreamEnd::Closed);
        };

        for event in decoder.feed(&chunk) {
            if guard.is_cancelled() || !handle_listen_event(event, sink)? {
                return Ok(StreamEnd::Stopped);
            }
        }
    }
}

/// Returns `Ok(false)` when the receiving side is gone.
fn handle_listen_event(event: SseEvent, sink: &EventSink) -> Result<bool, OperationError> {
    match event.event.as_str() {
        "welcome" => {
            debug!(data = %event.data, "listener established");
            Ok(true)
        }
        "mutation" => match serde_json::from_str::<Value>(&event.data) {
            Ok(mutation) => Ok(sink.send_mutation(mutation)),
            Err(error) => {
                warn!(%error, "skipping malformed mutation event");
                Ok(true)
            }
        },
        "channelError" | "disconnect" => Err(OperationError::new(listen_error_message(
            &event.event,
            &event.data,
        ))),
        other => {
            debug!(event = other, "ignoring listener event");
            Ok(true)
        }
    }
}

fn listen_error_message(kind: &str, data: &str) -> String {
    let detail = serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|value| {
            ["message", "reason"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| data.to_string());
    format!("listener {kind}: {detail}")
}

fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
        None => builder,
    }
}

async fn send(builder: RequestBuilder, url: &Url) -> Result<Response, HttpClientError> {
    let response = builder
        .send()
        .await
        .map_err(|source| HttpClientError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(HttpClientError::Status {
        status: status.as_u16(),
        message: clean_error_message(status, &body),
    })
}

fn clean_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let detail = match envelope.error {
            Some(ErrorBody::Detailed {
                description,
                message,
            }) => description.or(message),
            Some(ErrorBody::Plain(message)) => Some(message),
            None => None,
        };
        if let Some(detail) = detail.or(envelope.message).filter(|d| !d.is_empty()) {
            return detail;
        }
    }

    if !body.is_empty() && body.len() < 200 && !body.contains('{') {
        return body.trim().to_string();
    }

    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

fn to_operation_error(error: HttpClientError) -> OperationError {
    OperationError::new(error.to_string())
}

#[derive(Debug)]
struct TaskSubscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription for TaskSubscription {
    fn cancel(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;
    use vision_core::client::{ApiClient, OperationRequest};
    use vision_core::params::Params;

    use super::{clean_error_message, listen_error_message, HttpApiClient};

    fn client(runtime: &tokio::runtime::Runtime) -> HttpApiClient {
        HttpApiClient::new(
            "https://abc123.api.sanity.io/v1/",
            None,
            std::time::Duration::from_secs(1),
            runtime.handle().clone(),
        )
        .expect("client should build")
    }

    #[test]
    fn query_url_carries_dataset_query_and_json_params() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime should start");
        let mut client = client(&runtime);
        client.configure("blog");

        let mut params = Params::new();
        params.insert("type".to_string(), json!("post"));
        let url = client
            .operation_url("query", &OperationRequest::new("*[_type == $type]", params))
            .expect("url should build");

        assert_eq!(url.path(), "/v1/data/query/blog");
        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                ("query".to_string(), "*[_type == $type]".to_string()),
                ("$type".to_string(), "\"post\"".to_string()),
            ]
        );
    }

    #[test]
    fn configure_updates_current_config() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime should start");
        let mut client = client(&runtime);
        assert_eq!(client.current_config().dataset, "");
        client.configure("production");
        assert_eq!(client.current_config().dataset, "production");
    }

    #[test]
    fn error_messages_prefer_server_description() {
        assert_eq!(
            clean_error_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"description":"expected ']'","type":"queryParseError"}}"#
            ),
            "expected ']'"
        );
        assert_eq!(
            clean_error_message(StatusCode::UNAUTHORIZED, r#"{"message":"bad token"}"#),
            "bad token"
        );
        assert_eq!(
            clean_error_message(StatusCode::BAD_GATEWAY, "{}"),
            "Bad Gateway"
        );
    }

    #[test]
    fn listen_errors_use_message_or_reason() {
        assert_eq!(
            listen_error_message("channelError", r#"{"message":"query too large"}"#),
            "listener channelError: query too large"
        );
        assert_eq!(
            listen_error_message("disconnect", r#"{"reason":"forbidden"}"#),
            "listener disconnect: forbidden"
        );
    }
}
