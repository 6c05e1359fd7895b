//! Task configuration.
//!
//! All tunables live in a [`FetchConfig`] record passed into task
//! constructors. There is no process-wide state: two tasks in the same
//! process can run with different retry budgets, headers, or proxies.

use std::time::Duration;

/// Default maximum retries per shard (and for the mono task).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default interval between observer notifications.
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_millis(300);

/// Default cadence for journal snapshots while a task runs.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(300);

/// How the HTTP client selects a proxy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProxyMode {
    /// Use the given proxy URL for all requests.
    Explicit(String),
    /// Let the client read the usual proxy environment variables.
    Environment,
    /// Connect directly, ignoring any environment configuration.
    #[default]
    Disabled,
}

/// Configuration shared by all download tasks built from it.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Maximum retry attempts per shard before the underlying error is
    /// surfaced.
    pub max_retries: u32,

    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Extra headers merged into every request.
    pub headers: Vec<(String, String)>,

    /// Minimum interval between two status notifications to an observer.
    pub notify_interval: Duration,

    /// Interval between journal snapshots while the task runs.
    pub monitor_interval: Duration,

    /// Proxy selection for the HTTP client.
    pub proxy: ProxyMode,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: concat!("shardfetch/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: Vec::new(),
            notify_interval: DEFAULT_NOTIFY_INTERVAL,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            proxy: ProxyMode::Disabled,
        }
    }
}

impl FetchConfig {
    /// Create a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum retries per shard.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the User-Agent string.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Add an extra header to every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the observer notification interval.
    pub fn with_notify_interval(mut self, interval: Duration) -> Self {
        self.notify_interval = interval;
        self
    }

    /// Set the journal snapshot interval.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Route all requests through the given proxy URL.
    pub fn with_proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = ProxyMode::Explicit(url.into());
        self
    }

    /// Pick up proxy settings from the environment.
    pub fn with_environment_proxy(mut self) -> Self {
        self.proxy = ProxyMode::Environment;
        self
    }
}
