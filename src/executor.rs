use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

use crate::{
    decode::{decode_body, prepare_request, PreparedRequest},
    ClientOptions, RequestError, RequestSpec, Result,
};

/// Performs a single request/response exchange.
///
/// This is the only component that touches the network. Implementations
/// return the raw response body; decoding happens in the caller.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn send(&self, request: PreparedRequest) -> Result<Vec<u8>>;
}

#[derive(Clone)]
/// [`Executor`] backed by a `reqwest` client.
pub struct HttpExecutor {
    http: reqwest::Client,
    options: ClientOptions,
}

impl fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("options", &self.options)
            .finish()
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpExecutor {
    /// Creates an executor with a default `reqwest` client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            options: ClientOptions::default(),
        }
    }

    /// Creates an executor whose client is built from `options`.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
            .user_agent(options.user_agent.as_str())
            .build()
            .map_err(|err| RequestError::config(format!("cannot build HTTP client: {err}")))?;
        Ok(Self { http, options })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Prepares, sends and decodes one request.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        body: Option<&Map<String, JsonValue>>,
        headers: &IndexMap<String, String>,
    ) -> Result<T> {
        execute_with(self, spec, body, headers).await
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn send(&self, request: PreparedRequest) -> Result<Vec<u8>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self
            .http
            .request(request.method, request.url)
            .timeout(request.timeout);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

/// Prepares `spec`, sends it through `executor` and decodes the body as `T`.
///
/// The request timeout is enforced here as well, so executors that ignore
/// [`PreparedRequest::timeout`] still give up on time.
pub(crate) async fn execute_with<E, T>(
    executor: &E,
    spec: &RequestSpec,
    body: Option<&Map<String, JsonValue>>,
    headers: &IndexMap<String, String>,
) -> Result<T>
where
    E: Executor + ?Sized,
    T: DeserializeOwned,
{
    let request = prepare_request(spec, body, headers)?;
    let timeout = request.timeout;
    let bytes = tokio::time::timeout(timeout, executor.send(request))
        .await
        .map_err(|_| {
            RequestError::Transport(format!(
                "request timed out after {}s",
                timeout.as_secs_f64()
            ))
        })??;
    decode_body(&bytes)
}

fn transport_error(err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        RequestError::Transport(format!("request timed out: {err}"))
    } else {
        RequestError::Transport(err.to_string())
    }
}
