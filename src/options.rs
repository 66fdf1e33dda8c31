/// Configures the underlying HTTP client used by [`crate::HttpExecutor`].
///
/// Per-request timeouts come from each [`crate::RequestSpec`], not from here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Value sent in the `User-Agent` header.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            user_agent: concat!("request-poller/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ClientOptions {
    /// Builds options from environment variables, falling back to defaults.
    ///
    /// Reads:
    /// - `REQUEST_POLLER_CONNECT_TIMEOUT_MS`: connect timeout in milliseconds
    /// - `REQUEST_POLLER_USER_AGENT`: user agent string
    ///
    /// Returns an error if a variable is set but malformed or empty.
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut options = Self::default();

        if let Ok(raw) = std::env::var("REQUEST_POLLER_CONNECT_TIMEOUT_MS") {
            options.connect_timeout_ms = raw.trim().parse::<u64>().map_err(|err| {
                format!("invalid REQUEST_POLLER_CONNECT_TIMEOUT_MS '{raw}': {err}")
            })?;
        }
        if let Ok(user_agent) = std::env::var("REQUEST_POLLER_USER_AGENT") {
            if user_agent.trim().is_empty() {
                return Err("REQUEST_POLLER_USER_AGENT is set but empty".to_owned());
            }
            options.user_agent = user_agent;
        }

        Ok(options)
    }
}
