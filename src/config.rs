//! Serializable client and transport configuration.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	client::retry::{self, BackoffFn},
};

/// Default per-attempt timeout of a client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default dial timeout; covers name resolution and the TCP handshake.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(300);
/// Default budget for the TLS handshake of a new connection.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default time an idle pooled connection is kept.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// Default number of idle connections kept per host.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 500;
/// Default capacity of the in-memory response cache.
pub const DEFAULT_CACHE_SIZE_MIB: usize = 500;
/// Upper bound accepted for `retry_max`.
pub const MAX_RETRIES: u32 = 100;

/// Backoff function selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
	/// Same delay before every retry.
	Constant {
		/// Delay between attempts.
		delay: Duration,
	},
	/// `min * 2^attempt`, capped at `max`.
	Exponential {
		/// Delay before the first retry.
		min: Duration,
		/// Upper bound of the delay.
		max: Duration,
	},
	/// Uniformly random delay in `[min, max)` multiplied by `attempt + 1`.
	LinearJitter {
		/// Lower bound of the random delay.
		min: Duration,
		/// Upper bound of the random delay.
		max: Duration,
	},
}
impl BackoffStrategy {
	/// Validate invariants of the strategy.
	pub fn validate(&self) -> Result<()> {
		match self {
			Self::Constant { .. } => Ok(()),
			Self::Exponential { min, max } | Self::LinearJitter { min, max } =>
				if max < min {
					Err(Error::Validation {
						field: "backoff.max",
						reason: "Must be greater than or equal to backoff.min.".into(),
					})
				} else {
					Ok(())
				},
		}
	}

	/// Build the backoff function.
	pub fn build(&self) -> BackoffFn {
		match *self {
			Self::Constant { delay } => retry::constant_backoff(delay),
			Self::Exponential { min, max } => retry::exponential_backoff(min, max),
			Self::LinearJitter { min, max } => retry::linear_jitter_backoff(min, max),
		}
	}
}
impl Default for BackoffStrategy {
	fn default() -> Self {
		Self::Constant { delay: Duration::ZERO }
	}
}

/// Settings of the pooled base transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
	/// Budget for resolving and connecting to a host, shared across its addresses.
	#[serde(default = "default_dial_timeout")]
	pub dial_timeout: Duration,
	/// Budget for the TLS handshake of `https` connections.
	#[serde(default = "default_tls_handshake_timeout")]
	pub tls_handshake_timeout: Duration,
	/// Enable TCP keep-alive probes on new connections.
	#[serde(default = "default_true")]
	pub keep_alive: bool,
	/// Time an idle connection stays in the pool.
	#[serde(default = "default_idle_timeout")]
	pub idle_timeout: Duration,
	/// Maximum idle connections kept per host.
	#[serde(default = "default_max_idle_per_host")]
	pub max_idle_per_host: usize,
}
impl TransportConfig {
	/// Validate invariants for transport configuration.
	pub fn validate(&self) -> Result<()> {
		if self.dial_timeout.is_zero() {
			return Err(Error::Validation {
				field: "transport.dial_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.tls_handshake_timeout.is_zero() {
			return Err(Error::Validation {
				field: "transport.tls_handshake_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			dial_timeout: DEFAULT_DIAL_TIMEOUT,
			tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
			keep_alive: true,
			idle_timeout: DEFAULT_IDLE_TIMEOUT,
			max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
		}
	}
}

/// Declarative client configuration, consumed by [`crate::ClientBuilder::from_config`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Per-attempt timeout; zero disables it.
	#[serde(default = "default_timeout")]
	pub timeout: Duration,
	/// Retries after the first attempt, used by `build_retryable`.
	#[serde(default)]
	pub retry_max: u32,
	/// Backoff between retries.
	#[serde(default)]
	pub backoff: BackoffStrategy,
	/// Serve cacheable responses from an in-memory cache.
	#[serde(default)]
	pub enable_cache: bool,
	/// Capacity of the in-memory cache in MiB.
	#[serde(default = "default_cache_size_mib")]
	pub cache_size_mib: usize,
	/// Record connection-phase and body-read timings.
	#[serde(default)]
	pub extended_trace: bool,
	/// Follow `3xx` redirects, up to ten hops.
	#[serde(default)]
	pub follow_redirects: bool,
	/// Target id stamped on requests that carry none.
	#[serde(default)]
	pub target_id: Option<String>,
	/// Base transport settings.
	#[serde(default)]
	pub transport: TransportConfig,
}
impl ClientConfig {
	/// Validate invariants for client configuration.
	pub fn validate(&self) -> Result<()> {
		if self.retry_max > MAX_RETRIES {
			return Err(Error::Validation {
				field: "retry_max",
				reason: format!("Must be less than or equal to {MAX_RETRIES}."),
			});
		}
		if self.enable_cache && self.cache_size_mib == 0 {
			return Err(Error::Validation {
				field: "cache_size_mib",
				reason: "Must be greater than zero when the cache is enabled.".into(),
			});
		}
		if self.target_id.as_deref().is_some_and(str::is_empty) {
			return Err(Error::Validation { field: "target_id", reason: "Must not be empty.".into() });
		}

		self.backoff.validate()?;
		self.transport.validate()?;

		Ok(())
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_TIMEOUT,
			retry_max: 0,
			backoff: BackoffStrategy::default(),
			enable_cache: false,
			cache_size_mib: DEFAULT_CACHE_SIZE_MIB,
			extended_trace: false,
			follow_redirects: false,
			target_id: None,
			transport: TransportConfig::default(),
		}
	}
}

fn default_true() -> bool {
	true
}

fn default_timeout() -> Duration {
	DEFAULT_TIMEOUT
}

fn default_dial_timeout() -> Duration {
	DEFAULT_DIAL_TIMEOUT
}

fn default_tls_handshake_timeout() -> Duration {
	DEFAULT_TLS_HANDSHAKE_TIMEOUT
}

fn default_idle_timeout() -> Duration {
	DEFAULT_IDLE_TIMEOUT
}

fn default_max_idle_per_host() -> usize {
	DEFAULT_MAX_IDLE_PER_HOST
}

fn default_cache_size_mib() -> usize {
	DEFAULT_CACHE_SIZE_MIB
}
