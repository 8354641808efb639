//! Request and response hooks installed by [`ClientBuilder`](crate::ClientBuilder).

// crates.io
use http::HeaderValue;
use metrics::Label;
// self
use crate::{
	_prelude::*,
	context::RequestMeta,
	metrics::{self as telemetry, LabelSet},
	transport::hook::{RequestHook, ResponseHook},
};

/// Header carrying the retry attempt of a resent request.
pub const RETRY_HEADER: &str = "x-retry";

/// Copy the request's [`ForwardedHeaders`](crate::context::ForwardedHeaders) onto it.
///
/// A header the caller already set keeps its value, even an empty one; when it differs
/// from the forwarded value the mismatch is counted instead.
pub fn forward_tracing_headers_hook() -> RequestHook {
	Arc::new(|request: &mut Request| {
		let Some(forwarded) = request.forwarded_headers().cloned() else {
			return Ok(());
		};

		for (name, value) in forwarded.iter() {
			match request.headers().get(name) {
				Some(existing) if existing != value => {
					let mut labels = LabelSet::new();

					labels.push(Label::new("stack", "rust"));
					labels.push(Label::new("header", name.as_str().to_owned()));
					labels.push(Label::new(
						"target_id",
						telemetry::sanitize_label_value(request.target_id().unwrap_or_default()),
					));

					telemetry::increment(telemetry::METRIC_FORWARDED_HEADER_DIFF_TOTAL, &labels);
				},
				_ => {
					request.headers_mut().insert(name.clone(), value.clone());
				},
			}
		}

		Ok(())
	})
}

/// Set `x-retry: <attempt>` on retried requests.
pub fn retry_header_hook() -> RequestHook {
	Arc::new(|request: &mut Request| {
		let attempt = request.retry_count();

		if attempt > 0 {
			request.headers_mut().insert(RETRY_HEADER, HeaderValue::from(attempt));
		}

		Ok(())
	})
}

/// Count the outcomes of retried requests.
pub fn retry_metric_hook() -> ResponseHook {
	Arc::new(|parts, outcome| {
		if parts.retry_count() == 0 {
			return;
		}

		let labels = telemetry::outcome_labels(
			telemetry::request_labels(&parts.method, parts.target_id()),
			outcome.map(|response| response.status()),
		);

		telemetry::increment(telemetry::METRIC_RETRY_TOTAL, &labels);
	})
}
