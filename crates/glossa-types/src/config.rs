//! Worker configuration.
//!
//! Behavioral attributes of one worker channel are expressed as
//! configuration rather than as separate channel types: the language tag
//! and watched extensions come from the worker description, while
//! endpoints, timeouts, and limits default to production values and are
//! compressed by tests.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Default endpoint the host dials to reach the worker.
pub const DEFAULT_ENDPOINT: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 49150));

/// Default timeout for the `StartStream` and `WorkerInitResponse` phases
/// of startup, and for environment reload.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bounded parallelism of the per-function dispatcher.
pub const DEFAULT_DISPATCH_PARALLELISM: usize = 6;

/// Default trailing-edge debounce window for file-change events.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Read-only configuration for one worker channel.
///
/// # Example
///
/// ```
/// use glossa_types::WorkerConfig;
///
/// let config = WorkerConfig::new("python", [".py"]);
/// assert_eq!(config.language(), "python");
/// assert!(config.watches_extension(".py"));
/// assert!(!config.watches_extension(".js"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    language: String,
    extensions: Vec<String>,
    endpoint: SocketAddr,
    #[serde(with = "duration_millis")]
    startup_timeout: Duration,
    #[serde(with = "duration_millis")]
    init_timeout: Duration,
    #[serde(with = "duration_millis")]
    reload_timeout: Duration,
    dispatch_parallelism: usize,
    #[serde(with = "duration_millis")]
    debounce_window: Duration,
    #[serde(default)]
    managed_dependencies: bool,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl WorkerConfig {
    /// Creates a configuration with production defaults.
    ///
    /// `extensions` is the ordered set of file extensions (including the
    /// leading dot) that trigger a host restart when changed under the
    /// script root.
    #[must_use]
    pub fn new(
        language: impl Into<String>,
        extensions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            language: language.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
            endpoint: DEFAULT_ENDPOINT,
            startup_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            init_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reload_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            dispatch_parallelism: DEFAULT_DISPATCH_PARALLELISM,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            managed_dependencies: false,
        }
    }

    /// Asks the worker to resolve managed dependencies at function load.
    #[must_use]
    pub fn with_managed_dependencies(mut self) -> Self {
        self.managed_dependencies = true;
        self
    }

    /// Overrides the transport endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Overrides all three handshake timeouts at once.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self.init_timeout = timeout;
        self.reload_timeout = timeout;
        self
    }

    /// Overrides the dispatcher parallelism.
    #[must_use]
    pub fn with_dispatch_parallelism(mut self, degree: usize) -> Self {
        self.dispatch_parallelism = degree.max(1);
        self
    }

    /// Overrides the file-event debounce window.
    #[must_use]
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Returns the worker's language tag.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Returns the watched file extensions in declaration order.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Returns whether `ext` (with leading dot) is watched.
    #[must_use]
    pub fn watches_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }

    /// Returns the transport endpoint.
    #[must_use]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Returns the `StartStream` timeout.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Returns the `WorkerInitResponse` timeout.
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        self.init_timeout
    }

    /// Returns the environment-reload timeout.
    #[must_use]
    pub fn reload_timeout(&self) -> Duration {
        self.reload_timeout
    }

    /// Returns the dispatcher's bounded parallelism.
    #[must_use]
    pub fn dispatch_parallelism(&self) -> usize {
        self.dispatch_parallelism
    }

    /// Returns the file-event debounce window.
    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    /// Returns whether function loads request managed dependencies.
    #[must_use]
    pub fn managed_dependencies(&self) -> bool {
        self.managed_dependencies
    }
}
