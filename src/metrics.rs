//! Metric names, label helpers, and the optional Prometheus exporter.
//!
//! Every recording goes through the `metrics` facade, which is fire-and-forget: with no
//! recorder installed the calls are no-ops, and buffering is the recorder's concern.

// crates.io
use http::{Method, StatusCode};
use metrics::Label;
#[cfg(feature = "prometheus")] use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

pub(crate) type LabelSet = SmallVec<[Label; 6]>;

/// Wall-clock duration of a whole round trip.
pub const METRIC_REQUEST_DURATION: &str = "http_client_request_duration_seconds";
/// Duration of DNS resolution for a new connection.
pub const METRIC_DNS_DURATION: &str = "http_client_dns_duration_seconds";
/// Duration of the TCP connect for a new connection.
pub const METRIC_TCP_CONNECT_DURATION: &str = "http_client_tcp_connect_duration_seconds";
/// Duration of the TLS handshake for a new `https` connection.
pub const METRIC_TLS_HANDSHAKE_DURATION: &str = "http_client_tls_handshake_duration_seconds";
/// Time from request start until a connection was obtained.
pub const METRIC_GOT_CONNECTION_DURATION: &str = "http_client_got_connection_duration_seconds";
/// Time from request start until the request was fully written.
pub const METRIC_REQUEST_WRITTEN_DURATION: &str = "http_client_request_written_duration_seconds";
/// Time from request start until the response head arrived.
pub const METRIC_FIRST_BYTE_DURATION: &str = "http_client_response_first_byte_duration_seconds";
/// Time from request start until the response body was fully read.
pub const METRIC_FULLY_READ_DURATION: &str = "http_client_response_fully_read_duration_seconds";
/// Requests rejected by an open circuit breaker.
pub const METRIC_CIRCUIT_OPEN_TOTAL: &str = "http_client_circuit_breaker_open_total";
/// Responses observed for retried attempts.
pub const METRIC_RETRY_TOTAL: &str = "http_client_request_retry_total";
/// Forwarded headers skipped because the caller set a different value.
pub const METRIC_FORWARDED_HEADER_DIFF_TOTAL: &str = "http_client_forwarded_header_diff_total";
/// Cache lookups by result (`hit`, `miss`, `revalidated`).
pub const METRIC_CACHE_TOTAL: &str = "http_client_cache_total";
/// Open connections per pool and remote address.
pub const METRIC_POOL_OPEN_CONNECTIONS: &str = "http_client_pool_open_connections";

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder()?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Normalise a route-like value for use as a label: trailing `/` trimmed, `{` replaced by `_`
/// and `}` removed.
pub fn sanitize_label_value(value: &str) -> String {
	if value.is_empty() {
		return String::new();
	}

	let trimmed = value.trim_end_matches('/');

	if trimmed.is_empty() {
		return "/".into();
	}

	trimmed.replace('{', "_").replace('}', "")
}

pub(crate) fn request_labels(method: &Method, target_id: Option<&str>) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("technology", "rust"));

	if let Some(target_id) = target_id.filter(|id| !id.is_empty()) {
		labels.push(Label::new("target_id", sanitize_label_value(target_id)));
	}

	labels.push(Label::new("method", method.as_str().to_ascii_lowercase()));

	labels
}

/// Append `status` and `status_class` labels describing a round-trip outcome.
pub(crate) fn outcome_labels(mut labels: LabelSet, outcome: Result<StatusCode, &Error>) -> LabelSet {
	let (status, class) = match outcome {
		Ok(status) => (status.as_u16().to_string(), format!("{}xx", status.as_u16() / 100)),
		Err(err) if err.is_timeout() => ("timeout".into(), "error".into()),
		Err(_) => ("error".into(), "error".into()),
	};

	labels.push(Label::new("status", status));
	labels.push(Label::new("status_class", class));

	labels
}

/// Append a `status` label for a connection phase (`ok`, `timeout`, or `error`).
pub(crate) fn phase_labels(mut labels: LabelSet, err: Option<&Error>) -> LabelSet {
	let status = match err {
		None => "ok",
		Some(err) if err.is_timeout() => "timeout",
		Some(_) => "error",
	};

	labels.push(Label::new("status", status));

	labels
}

pub(crate) fn record_duration(name: &'static str, labels: &LabelSet, elapsed: Duration) {
	metrics::histogram!(name, labels.iter()).record(elapsed.as_secs_f64());
}

pub(crate) fn increment(name: &'static str, labels: &LabelSet) {
	metrics::counter!(name, labels.iter()).increment(1);
}

pub(crate) fn record_cache_result(result: &'static str) {
	metrics::counter!(METRIC_CACHE_TOTAL, "result" => result).increment(1);
}

pub(crate) fn record_pool_connections(pool: &str, address: &str, open: i64) {
	metrics::gauge!(
		METRIC_POOL_OPEN_CONNECTIONS,
		"pool" => pool.to_owned(),
		"address" => address.to_owned()
	)
	.set(open as f64);
}
