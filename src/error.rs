//! Crate-wide error types and `Result` alias.

// std
use std::{error::Error as StdError, io};

/// Library-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error accepted from user-supplied hooks and bodies.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Unified error type for the transport pipeline.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] io::Error),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Hyper(#[from] hyper::Error),
	#[error(transparent)]
	Client(#[from] hyper_util::client::legacy::Error),
	#[error(transparent)]
	InvalidUri(#[from] http::uri::InvalidUri),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Request body cannot be replayed; build it from a buffer or a reader factory.")]
	BodyNotRewindable,
	#[error("Request body factory failed: {0}")]
	BodyRewind(#[source] io::Error),
	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Request canceled.")]
	Canceled,
	#[error("Circuit breaker open for bucket '{bucket}'.")]
	CircuitOpen { bucket: String },
	#[error("Request deadline exceeded.")]
	DeadlineExceeded,
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Stopped after {0} redirects.")]
	TooManyRedirects(usize),
	#[error("Request timed out after {0:?}.")]
	Timeout(std::time::Duration),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
	#[error("{0}")]
	Custom(BoxError),
}
impl Error {
	/// Wrap an arbitrary error, typically returned from a request hook.
	pub fn custom<E>(err: E) -> Self
	where
		E: Into<BoxError>,
	{
		Self::Custom(err.into())
	}

	/// Whether the error represents a timeout of any layer.
	///
	/// Walks the source chain looking for `io::ErrorKind::TimedOut`, so dial timeouts
	/// wrapped by the pooling client are recognised as well.
	pub fn is_timeout(&self) -> bool {
		match self {
			Self::Timeout(_) | Self::DeadlineExceeded => true,
			Self::Io(err) => err.kind() == io::ErrorKind::TimedOut || chain_timed_out(err),
			Self::Hyper(err) => err.is_timeout() || chain_timed_out(err),
			Self::Reqwest(err) => err.is_timeout(),
			other => chain_timed_out(other),
		}
	}

	/// Whether the request was rejected by an open circuit breaker.
	pub fn is_circuit_open(&self) -> bool {
		matches!(self, Self::CircuitOpen { .. })
	}

	/// Whether the request context was canceled or its deadline expired.
	pub fn is_canceled(&self) -> bool {
		matches!(self, Self::Canceled | Self::DeadlineExceeded)
	}
}
impl From<std::convert::Infallible> for Error {
	fn from(value: std::convert::Infallible) -> Self {
		match value {}
	}
}
impl From<http::header::InvalidHeaderValue> for Error {
	fn from(value: http::header::InvalidHeaderValue) -> Self {
		Self::Http(value.into())
	}
}
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}

fn chain_timed_out(err: &(dyn StdError + 'static)) -> bool {
	let mut current = err.source();

	while let Some(err) = current {
		if let Some(io) = err.downcast_ref::<io::Error>()
			&& io.kind() == io::ErrorKind::TimedOut
		{
			return true;
		}
		if let Some(inner) = err.downcast_ref::<Error>()
			&& inner.is_timeout()
		{
			return true;
		}

		current = err.source();
	}

	false
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn classifies_timeouts_through_the_source_chain() {
		let timed_out = Error::from(io::Error::new(io::ErrorKind::TimedOut, "dial timeout"));
		let refused = Error::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));

		assert!(timed_out.is_timeout());
		assert!(!refused.is_timeout());
		assert!(Error::Timeout(std::time::Duration::from_secs(1)).is_timeout());
		assert!(Error::DeadlineExceeded.is_timeout());
		assert!(!Error::Canceled.is_timeout());
	}

	#[test]
	fn circuit_open_is_distinguishable_from_transport_errors() {
		let open = Error::CircuitOpen { bucket: "users-api".into() };

		assert!(open.is_circuit_open());
		assert!(!Error::Canceled.is_circuit_open());
		assert_eq!(open.to_string(), "Circuit breaker open for bucket 'users-api'.");
	}

	#[test]
	fn result_alias_accepts_a_custom_error_type() {
		let failed = Error::Canceled;
		let outcome: Result<u16, &Error> = Err(&failed);
		let parsed: Result<u16, std::num::ParseIntError> = "503".parse();

		assert!(outcome.is_err_and(Error::is_canceled));
		assert_eq!(parsed.ok(), Some(503));
	}
}
