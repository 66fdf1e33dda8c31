use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

use crate::{model::positive_secs, RequestError, RequestSpec, Result};

/// A validated request, ready to hand to an [`crate::Executor`].
#[derive(Clone)]
pub struct PreparedRequest {
    pub url: Url,
    pub method: Method,
    pub timeout: Duration,
    /// Headers in the order they are applied.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Option<Vec<u8>>,
}

impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if name == header::AUTHORIZATION {
                    "<redacted>"
                } else {
                    value.to_str().unwrap_or("<binary>")
                };
                (name.as_str(), shown)
            })
            .collect();

        f.debug_struct("PreparedRequest")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

pub(crate) fn prepare_request(
    spec: &RequestSpec,
    body: Option<&Map<String, JsonValue>>,
    headers: &IndexMap<String, String>,
) -> Result<PreparedRequest> {
    let raw_url = spec
        .url
        .as_deref()
        .ok_or_else(|| RequestError::config("request URL is missing"))?;
    let url = Url::parse(raw_url)
        .map_err(|err| RequestError::config(format!("invalid request URL '{raw_url}': {err}")))?;

    let timeout_secs = spec
        .timeout_secs
        .ok_or_else(|| RequestError::config("request timeout is missing"))?;
    let timeout = positive_secs(timeout_secs, "request timeout")?;

    let method = Method::from_bytes(spec.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|err| {
            RequestError::config(format!("invalid HTTP method '{}': {err}", spec.method))
        })?;

    let mut prepared_headers = Vec::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| RequestError::config(format!("invalid header name '{name}': {err}")))?;
        let header_value = HeaderValue::from_str(value).map_err(|err| {
            RequestError::config(format!("invalid value for header '{name}': {err}"))
        })?;
        prepared_headers.push((header_name, header_value));
    }

    // An unserializable body is dropped rather than failing the call.
    let body = body.and_then(|body| serde_json::to_vec(body).ok());
    if body.is_some()
        && !prepared_headers
            .iter()
            .any(|(name, _)| name == header::CONTENT_TYPE)
    {
        prepared_headers.push((
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ));
    }

    Ok(PreparedRequest {
        url,
        method,
        timeout,
        headers: prepared_headers,
        body,
    })
}

pub(crate) fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.is_empty() {
        return Err(RequestError::EmptyResponse);
    }
    serde_json::from_slice(bytes).map_err(|err| RequestError::Decoding(err.to_string()))
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use reqwest::{header, Method};
    use serde::Deserialize;
    use serde_json::json;

    use crate::{decode, RequestError, RequestSpec};

    #[derive(Debug, Deserialize, PartialEq)]
    struct JobStatus {
        state: String,
    }

    fn no_headers() -> IndexMap<String, String> {
        IndexMap::new()
    }

    #[test]
    fn prepare_uppercases_lowercase_method() {
        let spec = RequestSpec::new("https://jobs.example/status");
        let request =
            decode::prepare_request(&spec, None, &no_headers()).expect("must prepare request");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.timeout.as_secs(), 60);
        assert!(request.body.is_none());
    }

    #[test]
    fn prepare_rejects_missing_url() {
        let err = decode::prepare_request(&RequestSpec::default(), None, &no_headers())
            .expect_err("must fail");
        assert!(matches!(err, RequestError::Configuration(msg) if msg.contains("URL")));
    }

    #[test]
    fn prepare_rejects_missing_timeout() {
        let mut spec = RequestSpec::new("https://jobs.example/status");
        spec.timeout_secs = None;
        let err = decode::prepare_request(&spec, None, &no_headers()).expect_err("must fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn prepare_rejects_invalid_method() {
        let spec = RequestSpec::new("https://jobs.example/status").with_method("GE T");
        let err = decode::prepare_request(&spec, None, &no_headers()).expect_err("must fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn prepare_applies_headers_in_order_and_json_content_type() {
        let mut headers = IndexMap::new();
        headers.insert("X-Job".to_owned(), "42".to_owned());
        headers.insert("Authorization".to_owned(), "Bearer secret".to_owned());
        let body = json!({ "job": 42 }).as_object().cloned();
        let spec = RequestSpec::new("https://jobs.example/result").with_method("post");

        let request =
            decode::prepare_request(&spec, body.as_ref(), &headers).expect("must prepare request");

        let names: Vec<&str> = request.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["x-job", "authorization", "content-type"]);
        assert_eq!(request.body.as_deref(), Some(br#"{"job":42}"#.as_slice()));

        let debug = format!("{request:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn prepare_keeps_caller_content_type() {
        let mut headers = IndexMap::new();
        headers.insert(
            "Content-Type".to_owned(),
            "application/vnd.job+json".to_owned(),
        );
        let body = json!({}).as_object().cloned();
        let spec = RequestSpec::new("https://jobs.example/result");

        let request =
            decode::prepare_request(&spec, body.as_ref(), &headers).expect("must prepare request");

        let content_types: Vec<_> = request
            .headers
            .iter()
            .filter(|(name, _)| name == header::CONTENT_TYPE)
            .collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(content_types[0].1, "application/vnd.job+json");
    }

    #[test]
    fn decode_empty_body_is_empty_response() {
        let err = decode::decode_body::<JobStatus>(b"").expect_err("must fail");
        assert_eq!(err, RequestError::EmptyResponse);
    }

    #[test]
    fn decode_mismatched_body_is_decoding_error() {
        let err = decode::decode_body::<JobStatus>(br#"{"status":1}"#).expect_err("must fail");
        assert!(matches!(err, RequestError::Decoding(_)));
    }

    #[test]
    fn decode_valid_body() {
        let status: JobStatus =
            decode::decode_body(br#"{"state":"done"}"#).expect("must decode");
        assert_eq!(
            status,
            JobStatus {
                state: "done".to_owned()
            }
        );
    }
}
