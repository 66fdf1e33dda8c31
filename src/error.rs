/// Error domain reported by [`RequestError::domain`].
pub const ERROR_DOMAIN: &str = "request_poller";

/// Error type returned by this crate.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// A field required for the request or schedule is missing or malformed.
    ///
    /// Raised before any network call is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network or request execution error from the executor.
    #[error("transport error: {0}")]
    Transport(String),
    /// A response arrived but its body was empty.
    #[error("empty response body")]
    EmptyResponse,
    /// A non-empty body could not be decoded into the expected type.
    #[error("decode error: {0}")]
    Decoding(String),
    /// The polling schedule ran past its overall timeout and fallback is off.
    #[error("polling timed out after {timeout_secs}s without a result")]
    TimeoutExhausted { timeout_secs: f64 },
    /// `start` was called while another run on the same poller is active.
    #[error("a polling run is already in progress")]
    RunInProgress,
    /// The run was stopped with `stop_polling` before it produced an outcome.
    #[error("polling run was stopped")]
    Stopped,
}

impl RequestError {
    /// Error domain shared by every variant.
    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }

    /// Stable numeric code per variant.
    pub fn code(&self) -> u16 {
        match self {
            Self::Configuration(_) => 1,
            Self::Transport(_) => 2,
            Self::EmptyResponse => 3,
            Self::Decoding(_) => 4,
            Self::TimeoutExhausted { .. } => 5,
            Self::RunInProgress => 6,
            Self::Stopped => 7,
        }
    }

    /// Returns `true` for configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns `true` when the schedule timed out without fallback.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExhausted { .. })
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
