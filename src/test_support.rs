//! Shared doubles and metric capture helpers for unit tests.

// std
use std::{
	borrow::Borrow,
	collections::VecDeque,
	future::Future,
	pin::Pin,
	sync::atomic::{AtomicUsize, Ordering},
	task::{Context as TaskContext, Poll},
};
// crates.io
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body::{Body as HttpBody, Frame};
use http_body_util::BodyExt;
use metrics_util::{
	CompositeKey, MetricKind,
	debugging::{DebugValue, DebuggingRecorder},
};
use parking_lot::Mutex;
// self
use crate::{
	_prelude::*,
	ResponseBody,
	client::Requester,
	context::RequestMeta,
	transport::{RoundTrip, Transport},
};

type Respond = dyn Fn(usize, &RecordedRequest) -> Result<Response> + Send + Sync;

/// Request as observed by [`MockTransport`].
#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
	pub method: Method,
	pub uri: Uri,
	pub headers: HeaderMap,
	pub body: Bytes,
	pub retry: u32,
	pub target_id: Option<String>,
}

/// Counting transport double answering through a closure of the call index.
pub(crate) struct MockTransport {
	calls: AtomicUsize,
	requests: Mutex<Vec<RecordedRequest>>,
	respond: Box<Respond>,
}
impl MockTransport {
	pub(crate) fn new<F>(respond: F) -> Arc<Self>
	where
		F: Fn(usize, &RecordedRequest) -> Result<Response> + Send + Sync + 'static,
	{
		Arc::new(Self {
			calls: AtomicUsize::new(0),
			requests: Mutex::new(Vec::new()),
			respond: Box::new(respond),
		})
	}

	pub(crate) fn with_status(status: StatusCode) -> Arc<Self> {
		Self::new(move |_, _| Ok(response(status, Vec::new(), "")))
	}

	pub(crate) fn failing<F>(error: F) -> Arc<Self>
	where
		F: Fn() -> Error + Send + Sync + 'static,
	{
		Self::new(move |_, _| Err(error()))
	}

	/// Answer with `statuses[i]` for the i-th call, repeating the last one afterwards.
	pub(crate) fn sequence(statuses: Vec<StatusCode>) -> Arc<Self> {
		Self::new(move |call, _| {
			let status = statuses.get(call).or(statuses.last()).copied().unwrap_or(StatusCode::OK);

			Ok(response(status, Vec::new(), status.as_str().to_owned()))
		})
	}

	pub(crate) fn transport(self: &Arc<Self>) -> Transport {
		self.clone()
	}

	pub(crate) fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
		self.requests.lock().clone()
	}
}
#[async_trait]
impl RoundTrip for MockTransport {
	async fn round_trip(&self, request: Request) -> Result<Response> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst);
		let (parts, body) = request.into_parts();
		let recorded = RecordedRequest {
			method: parts.method.clone(),
			uri: parts.uri.clone(),
			headers: parts.headers.clone(),
			body: body.collect().await?.to_bytes(),
			retry: parts.retry_count(),
			target_id: parts.target_id().map(str::to_owned),
		};
		let outcome = (self.respond)(call, &recorded);

		self.requests.lock().push(recorded);

		outcome
	}
}
#[async_trait]
impl Requester for MockTransport {
	async fn execute(&self, request: Request) -> Result<Response> {
		self.round_trip(request).await
	}
}

pub(crate) fn response(
	status: StatusCode,
	headers: Vec<(&'static str, &'static str)>,
	body: impl Into<Bytes>,
) -> Response {
	let mut response = http::Response::new(ResponseBody::full(body));

	*response.status_mut() = status;

	for (name, value) in headers {
		response.headers_mut().insert(name, http::HeaderValue::from_static(value));
	}

	response
}

/// Body yielding a fixed list of frames, errors included.
pub(crate) struct ScriptedBody(VecDeque<Result<Frame<Bytes>>>);
impl ScriptedBody {
	pub(crate) fn new(frames: Vec<Result<Frame<Bytes>>>) -> Self {
		Self(frames.into())
	}
}
impl HttpBody for ScriptedBody {
	type Data = Bytes;
	type Error = Error;

	fn poll_frame(
		self: Pin<&mut Self>,
		_: &mut TaskContext<'_>,
	) -> Poll<Option<Result<Frame<Bytes>>>> {
		Poll::Ready(self.get_mut().0.pop_front())
	}
}

pub(crate) type Snapshot = Vec<(CompositeKey, DebugValue)>;

pub(crate) fn capture_metrics<F>(f: F) -> Snapshot
where
	F: FnOnce(),
{
	let recorder = DebuggingRecorder::new();
	let snapshotter = recorder.snapshotter();

	metrics::with_local_recorder(&recorder, f);

	snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
}

/// Drive `future` on a current-thread runtime so the thread-local recorder sees every task.
pub(crate) fn capture_metrics_async<Fut>(future: Fut) -> (Fut::Output, Snapshot)
where
	Fut: Future,
{
	let mut output = None;
	let snapshot = capture_metrics(|| {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.expect("runtime");

		output = Some(runtime.block_on(future));
	});

	(output.expect("future output"), snapshot)
}

pub(crate) fn counter_value(snapshot: &Snapshot, name: &str, labels: &[(&str, &str)]) -> u64 {
	snapshot
		.iter()
		.find_map(|(key, value)| {
			(key.kind() == MetricKind::Counter
				&& Borrow::<str>::borrow(key.key().name()) == name
				&& labels_match(key, labels))
			.then(|| match value {
				DebugValue::Counter(value) => *value,
				_ => 0,
			})
		})
		.unwrap_or(0)
}

pub(crate) fn histogram_count(snapshot: &Snapshot, name: &str, labels: &[(&str, &str)]) -> usize {
	snapshot
		.iter()
		.find_map(|(key, value)| {
			if key.kind() == MetricKind::Histogram
				&& Borrow::<str>::borrow(key.key().name()) == name
				&& labels_match(key, labels)
			{
				match value {
					DebugValue::Histogram(values) => Some(values.len()),
					_ => None,
				}
			} else {
				None
			}
		})
		.unwrap_or(0)
}

/// Total number of histogram samples recorded under `name`, whatever the labels.
pub(crate) fn histogram_samples(snapshot: &Snapshot, name: &str) -> usize {
	snapshot
		.iter()
		.filter(|(key, _)| {
			key.kind() == MetricKind::Histogram && Borrow::<str>::borrow(key.key().name()) == name
		})
		.map(|(_, value)| match value {
			DebugValue::Histogram(values) => values.len(),
			_ => 0,
		})
		.sum()
}

/// Every histogram sample recorded under `name`, whatever the labels.
pub(crate) fn histogram_values(snapshot: &Snapshot, name: &str) -> Vec<f64> {
	snapshot
		.iter()
		.filter(|(key, _)| {
			key.kind() == MetricKind::Histogram && Borrow::<str>::borrow(key.key().name()) == name
		})
		.flat_map(|(_, value)| match value {
			DebugValue::Histogram(values) => values.iter().map(|value| value.into_inner()).collect(),
			_ => Vec::new(),
		})
		.collect()
}

fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
	let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

	labels.sort_unstable();

	let mut expected_sorted = expected.to_vec();

	expected_sorted.sort_unstable();

	labels.len() == expected_sorted.len()
		&& labels.into_iter().zip(expected_sorted).all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
}
