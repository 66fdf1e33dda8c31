use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{RequestError, Result};

/// Upper bound on attempts a single schedule may register.
pub const MAX_SCHEDULED_ATTEMPTS: usize = 10_000;

const DEFAULT_METHOD: &str = "get";
const DEFAULT_TIMEOUT_SECS: f64 = 60.0;

fn default_method() -> String {
    DEFAULT_METHOD.to_owned()
}

fn default_timeout_secs() -> Option<f64> {
    Some(DEFAULT_TIMEOUT_SECS)
}

fn default_overall_timeout_secs() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_fallback() -> bool {
    true
}

/// Description of one HTTP call.
///
/// Fields are checked only when a request is prepared, so an incomplete spec
/// fails with [`RequestError::Configuration`] at the point it is used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Target URL.
    #[serde(default)]
    pub url: Option<String>,
    /// HTTP method, case-insensitive.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<f64>,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            url: None,
            method: default_method(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RequestSpec {
    /// Creates a `GET` spec with a 60 second timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Sets the HTTP method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the request timeout in seconds.
    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// How polling attempts are spaced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DelayMode {
    /// Attempts every `interval_secs`, bounded by the overall timeout.
    Equal { interval_secs: f64 },
    /// Each entry is an increment over the previous attempt's delay.
    Explicit { delays_secs: Vec<f64> },
}

/// Timing of repeated polling attempts against a status endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollingSchedule {
    /// Status endpoint. Its timeout is replaced by `overall_timeout_secs`.
    pub target: RequestSpec,
    /// Time after which a firing attempt counts as schedule exhaustion.
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: f64,
    #[serde(flatten)]
    pub delay_mode: DelayMode,
    /// Issue the result request when the schedule is exhausted.
    #[serde(default = "default_fallback")]
    pub fallback_to_result_on_timeout: bool,
}

impl PollingSchedule {
    /// Attempts spaced by `interval_secs`.
    pub fn equal(target: RequestSpec, interval_secs: f64) -> Self {
        Self::with_mode(target, DelayMode::Equal { interval_secs })
    }

    /// Attempts at cumulative offsets of `increments_secs`.
    pub fn explicit(target: RequestSpec, increments_secs: impl Into<Vec<f64>>) -> Self {
        Self::with_mode(
            target,
            DelayMode::Explicit {
                delays_secs: increments_secs.into(),
            },
        )
    }

    fn with_mode(target: RequestSpec, delay_mode: DelayMode) -> Self {
        Self {
            target,
            overall_timeout_secs: default_overall_timeout_secs(),
            delay_mode,
            fallback_to_result_on_timeout: default_fallback(),
        }
    }

    /// Sets the overall timeout in seconds.
    pub fn with_overall_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.overall_timeout_secs = timeout_secs;
        self
    }

    /// Enables or disables the result request on timeout.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback_to_result_on_timeout = fallback;
        self
    }

    pub fn overall_timeout(&self) -> Result<Duration> {
        positive_secs(self.overall_timeout_secs, "overall polling timeout")
    }

    /// Spec used for each polling attempt.
    pub fn polling_request(&self) -> RequestSpec {
        RequestSpec {
            timeout_secs: Some(self.overall_timeout_secs),
            ..self.target.clone()
        }
    }

    /// Delays, relative to run start, at which attempts fire.
    ///
    /// The first entry is always zero. Equal mode adds `n` further attempts
    /// where `n = floor(timeout / interval) - 1`, but only when `n > 1`.
    /// Explicit mode adds one attempt per increment at the running sum.
    pub fn delays(&self) -> Result<Vec<Duration>> {
        self.overall_timeout()?;
        let mut delays = vec![Duration::ZERO];

        match &self.delay_mode {
            DelayMode::Equal { interval_secs } => {
                let interval = positive_secs(*interval_secs, "polling interval")?;
                let extra = (self.overall_timeout_secs / interval_secs).floor() - 1.0;
                if extra > 1.0 {
                    if extra >= MAX_SCHEDULED_ATTEMPTS as f64 {
                        return Err(too_many_attempts());
                    }
                    // Bounded above, so the cast is exact.
                    let extra = extra as u32;
                    delays.extend((1..=extra).map(|n| interval.saturating_mul(n)));
                }
            }
            DelayMode::Explicit { delays_secs } => {
                if delays_secs.len() >= MAX_SCHEDULED_ATTEMPTS {
                    return Err(too_many_attempts());
                }
                let mut cumulative = 0.0_f64;
                for (index, increment) in delays_secs.iter().enumerate() {
                    if !increment.is_finite() || *increment < 0.0 {
                        return Err(RequestError::config(format!(
                            "invalid polling delay at index {index}: {increment}"
                        )));
                    }
                    cumulative += increment;
                    delays.push(Duration::try_from_secs_f64(cumulative).map_err(|err| {
                        RequestError::config(format!(
                            "polling delay at index {index} is out of range: {err}"
                        ))
                    })?);
                }
            }
        }

        Ok(delays)
    }
}

/// Everything needed for one polling run: optional schedule, the final
/// result request, and the body and headers shared by every call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling: Option<PollingSchedule>,
    pub result: RequestSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Map<String, JsonValue>>,
    /// Header name to value, applied in insertion order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
}

impl RequestModel {
    /// Model that fetches `result` directly, with no polling.
    pub fn new(result: RequestSpec) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    /// Parses a model from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| RequestError::config(format!("invalid request model JSON: {err}")))
    }

    /// Polls with `schedule` before the result request.
    pub fn with_polling(mut self, schedule: PollingSchedule) -> Self {
        self.polling = Some(schedule);
        self
    }

    /// Sets the JSON object sent as body of every request.
    pub fn with_body(mut self, body: Map<String, JsonValue>) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

pub(crate) fn positive_secs(secs: f64, what: &str) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(RequestError::config(format!(
            "{what} must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|err| RequestError::config(format!("{what} is out of range: {err}")))
}

fn too_many_attempts() -> RequestError {
    RequestError::config(format!(
        "polling schedule exceeds {MAX_SCHEDULED_ATTEMPTS} attempts"
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{DelayMode, PollingSchedule, RequestError, RequestModel, RequestSpec};

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    fn status() -> RequestSpec {
        RequestSpec::new("https://jobs.example/status")
    }

    #[test]
    fn equal_interval_adds_attempts_below_timeout() {
        let schedule = PollingSchedule::equal(status(), 10.0).with_overall_timeout_secs(35.0);
        assert_eq!(schedule.delays().expect("valid schedule"), secs(&[0, 10, 20]));
    }

    #[test]
    fn equal_interval_with_short_timeout_keeps_only_immediate_attempt() {
        let schedule = PollingSchedule::equal(status(), 10.0).with_overall_timeout_secs(15.0);
        assert_eq!(schedule.delays().expect("valid schedule"), secs(&[0]));
    }

    #[test]
    fn equal_interval_with_single_extra_attempt_is_not_expanded() {
        // floor(25 / 10) - 1 == 1, which does not exceed the threshold.
        let schedule = PollingSchedule::equal(status(), 10.0).with_overall_timeout_secs(25.0);
        assert_eq!(schedule.delays().expect("valid schedule"), secs(&[0]));
    }

    #[test]
    fn explicit_delays_are_cumulative_increments() {
        let schedule = PollingSchedule::explicit(status(), [5.0, 10.0, 15.0]);
        assert_eq!(
            schedule.delays().expect("valid schedule"),
            secs(&[0, 5, 15, 30])
        );
    }

    #[test]
    fn explicit_empty_list_still_polls_immediately() {
        let schedule = PollingSchedule::explicit(status(), Vec::<f64>::new());
        assert_eq!(schedule.delays().expect("valid schedule"), secs(&[0]));
    }

    #[test]
    fn rejects_non_positive_interval() {
        let err = PollingSchedule::equal(status(), 0.0)
            .delays()
            .expect_err("must fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn rejects_negative_increment() {
        let err = PollingSchedule::explicit(status(), [5.0, -1.0])
            .delays()
            .expect_err("must fail");
        assert!(matches!(err, RequestError::Configuration(msg) if msg.contains("index 1")));
    }

    #[test]
    fn rejects_unbounded_equal_schedule() {
        let err = PollingSchedule::equal(status(), 0.001)
            .with_overall_timeout_secs(1_000_000.0)
            .delays()
            .expect_err("must fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn polling_request_uses_overall_timeout() {
        let schedule = PollingSchedule::equal(status().with_timeout_secs(5.0), 10.0)
            .with_overall_timeout_secs(90.0);
        assert_eq!(schedule.polling_request().timeout_secs, Some(90.0));
        assert_eq!(schedule.polling_request().url, status().url);
    }

    #[test]
    fn model_from_json_applies_defaults() {
        let model = RequestModel::from_json(
            r#"{
                "polling": {
                    "target": { "url": "https://jobs.example/status" },
                    "mode": "explicit",
                    "delays_secs": [1, 2]
                },
                "result": { "url": "https://jobs.example/result", "method": "post" },
                "headers": { "X-Job": "42", "Accept": "application/json" }
            }"#,
        )
        .expect("valid model");

        let polling = model.polling.expect("polling present");
        assert_eq!(polling.overall_timeout_secs, 60.0);
        assert!(polling.fallback_to_result_on_timeout);
        assert_eq!(polling.target.method, "get");
        assert_eq!(
            polling.delay_mode,
            DelayMode::Explicit {
                delays_secs: vec![1.0, 2.0]
            }
        );
        assert_eq!(model.result.method, "post");
        assert_eq!(model.result.timeout_secs, Some(60.0));
        let names: Vec<&str> = model.headers.keys().map(String::as_str).collect();
        assert_eq!(names, ["X-Job", "Accept"]);
    }

    #[test]
    fn model_from_json_reports_configuration_error() {
        let err = RequestModel::from_json("{ not json").expect_err("must fail");
        assert!(err.is_configuration());
    }
}
