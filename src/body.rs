//! Request body materialization and the streaming response body.
//!
//! A request body must be re-obtainable for retries to resend identical bytes. [`Body`]
//! converts the common body representations into either an in-memory buffer or a reader
//! factory, both with a known content length. Single-use streams are accepted too, but
//! rewinding them fails with [`Error::BodyNotRewindable`].

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	io::{self, Read, Seek, SeekFrom},
	pin::Pin,
	task::{Context as TaskContext, Poll},
};
// crates.io
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use parking_lot::Mutex;
// self
use crate::{_prelude::*, error::BoxError};

/// Maximum number of bytes read from a response body that is discarded before a retry.
pub const RESPONSE_DRAIN_LIMIT: usize = 4096;

/// Factory producing a fresh reader over the same request payload on every call.
pub type ReaderFn = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Replayable or single-use HTTP request body.
pub struct Body {
	kind: Kind,
}
impl Body {
	/// Empty body.
	pub fn empty() -> Self {
		Self { kind: Kind::Empty }
	}

	/// Body backed by a reader factory.
	///
	/// The factory is invoked once to learn the content length and then once per
	/// attempt, so it must yield the same bytes every time.
	pub fn from_reader_fn(factory: ReaderFn) -> Result<Self> {
		let pending = read_all(factory.as_ref())?;

		Ok(Self::replayable(Source::Factory(factory), pending))
	}

	/// Body backed by a closure returning any reader.
	pub fn from_fn<F, R>(factory: F) -> Result<Self>
	where
		F: Fn() -> io::Result<R> + Send + Sync + 'static,
		R: Read + Send + 'static,
	{
		Self::from_reader_fn(Arc::new(move || {
			factory().map(|reader| Box::new(reader) as Box<dyn Read + Send>)
		}))
	}

	/// Body backed by a seekable reader which is rewound to its start on every attempt.
	pub fn from_seekable<R>(reader: R) -> Result<Self>
	where
		R: Read + Seek + Send + 'static,
	{
		let reader = Arc::new(Mutex::new(reader));

		Self::from_reader_fn(Arc::new(move || {
			let mut reader = reader.lock();
			let mut buffer = Vec::new();

			reader.seek(SeekFrom::Start(0))?;
			reader.read_to_end(&mut buffer)?;

			Ok(Box::new(io::Cursor::new(buffer)) as Box<dyn Read + Send>)
		}))
	}

	/// Read a one-shot reader to the end so its bytes can be replayed.
	pub fn from_reader<R>(mut reader: R) -> Result<Self>
	where
		R: Read,
	{
		let mut buffer = Vec::new();

		reader.read_to_end(&mut buffer)?;

		Ok(Self::from(buffer))
	}

	/// Wrap a streaming body that can be sent only once.
	///
	/// Retrying a request carrying such a body fails before any further network call.
	pub fn wrap_stream<B>(body: B) -> Self
	where
		B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
		B::Error: Into<BoxError>,
	{
		let body = body.map_err(|err| Error::Custom(err.into())).boxed();

		Self { kind: Kind::Streaming(Some(body)) }
	}

	/// Known length of the payload; `None` for single-use streams.
	pub fn content_length(&self) -> Option<u64> {
		match &self.kind {
			Kind::Empty => Some(0),
			Kind::Replayable { length, .. } => Some(*length),
			Kind::Streaming(_) => None,
		}
	}

	/// Whether [`Body::rewind`] can produce the payload again.
	pub fn is_replayable(&self) -> bool {
		!matches!(self.kind, Kind::Streaming(_))
	}

	/// Produce a fresh body carrying the payload from its first byte.
	pub fn rewind(&self) -> Result<Self> {
		match &self.kind {
			Kind::Empty => Ok(Self::empty()),
			Kind::Replayable { source: Source::Buffer(bytes), .. } =>
				Ok(Self::replayable(Source::Buffer(bytes.clone()), bytes.clone())),
			Kind::Replayable { source: Source::Factory(factory), .. } => {
				let pending = read_all(factory.as_ref()).map_err(|err| match err {
					Error::Io(err) => Error::BodyRewind(err),
					err => err,
				})?;

				Ok(Self::replayable(Source::Factory(factory.clone()), pending))
			},
			Kind::Streaming(_) => Err(Error::BodyNotRewindable),
		}
	}

	/// Buffered payload when the body is replayable, otherwise the body itself.
	pub(crate) fn try_into_bytes(self) -> std::result::Result<Bytes, Self> {
		match self.kind {
			Kind::Empty => Ok(Bytes::new()),
			Kind::Replayable { pending: Some(bytes), .. } => Ok(bytes),
			Kind::Replayable { pending: None, .. } => Ok(Bytes::new()),
			kind @ Kind::Streaming(_) => Err(Self { kind }),
		}
	}

	fn replayable(source: Source, pending: Bytes) -> Self {
		let length = pending.len() as u64;

		Self { kind: Kind::Replayable { source, pending: Some(pending), length } }
	}
}
impl Default for Body {
	fn default() -> Self {
		Self::empty()
	}
}
impl Debug for Body {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match &self.kind {
			Kind::Empty => f.write_str("Body::Empty"),
			Kind::Replayable { length, .. } =>
				f.debug_struct("Body::Replayable").field("length", length).finish(),
			Kind::Streaming(_) => f.write_str("Body::Streaming"),
		}
	}
}
impl From<Bytes> for Body {
	fn from(value: Bytes) -> Self {
		if value.is_empty() {
			Self::empty()
		} else {
			Self::replayable(Source::Buffer(value.clone()), value)
		}
	}
}
impl From<Vec<u8>> for Body {
	fn from(value: Vec<u8>) -> Self {
		Self::from(Bytes::from(value))
	}
}
impl From<&'static [u8]> for Body {
	fn from(value: &'static [u8]) -> Self {
		Self::from(Bytes::from_static(value))
	}
}
impl From<String> for Body {
	fn from(value: String) -> Self {
		Self::from(Bytes::from(value))
	}
}
impl From<&'static str> for Body {
	fn from(value: &'static str) -> Self {
		Self::from(Bytes::from_static(value.as_bytes()))
	}
}
impl From<()> for Body {
	fn from(_: ()) -> Self {
		Self::empty()
	}
}
impl HttpBody for Body {
	type Data = Bytes;
	type Error = Error;

	fn poll_frame(
		mut self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
	) -> Poll<Option<std::result::Result<Frame<Bytes>, Error>>> {
		match &mut self.kind {
			Kind::Empty => Poll::Ready(None),
			Kind::Replayable { pending, .. } => {
				let frame = pending.take().filter(|bytes| !bytes.is_empty()).map(Frame::data);

				Poll::Ready(frame.map(Ok))
			},
			Kind::Streaming(Some(body)) => Pin::new(body).poll_frame(cx),
			Kind::Streaming(None) => Poll::Ready(None),
		}
	}

	fn is_end_stream(&self) -> bool {
		match &self.kind {
			Kind::Empty => true,
			Kind::Replayable { pending, .. } =>
				pending.as_ref().is_none_or(|bytes| bytes.is_empty()),
			Kind::Streaming(Some(body)) => body.is_end_stream(),
			Kind::Streaming(None) => true,
		}
	}

	fn size_hint(&self) -> SizeHint {
		match &self.kind {
			Kind::Empty => SizeHint::with_exact(0),
			Kind::Replayable { pending, .. } =>
				SizeHint::with_exact(pending.as_ref().map_or(0, |bytes| bytes.len() as u64)),
			Kind::Streaming(Some(body)) => body.size_hint(),
			Kind::Streaming(None) => SizeHint::with_exact(0),
		}
	}
}

enum Kind {
	Empty,
	Replayable { source: Source, pending: Option<Bytes>, length: u64 },
	Streaming(Option<BoxBody<Bytes, Error>>),
}

enum Source {
	Buffer(Bytes),
	Factory(ReaderFn),
}

/// Streaming HTTP response body.
///
/// Reading is single-use; decorators that need the payload buffer it and put a
/// replacement body back on the response.
pub struct ResponseBody {
	inner: BoxBody<Bytes, Error>,
}
impl ResponseBody {
	/// Wrap any `http_body::Body` yielding `Bytes`.
	pub fn new<B>(body: B) -> Self
	where
		B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
		B::Error: Into<Error>,
	{
		Self { inner: body.map_err(Into::into).boxed() }
	}

	/// Body without payload.
	pub fn empty() -> Self {
		Self::new(Empty::<Bytes>::new())
	}

	/// Body carrying the given bytes.
	pub fn full(bytes: impl Into<Bytes>) -> Self {
		Self::new(Full::new(bytes.into()))
	}

	/// Collect the whole payload.
	pub async fn bytes(self) -> Result<Bytes> {
		Ok(self.inner.collect().await?.to_bytes())
	}

	/// Collect the whole payload as UTF-8 text, replacing invalid sequences.
	pub async fn text(self) -> Result<String> {
		let bytes = self.bytes().await?;

		Ok(String::from_utf8_lossy(&bytes).into_owned())
	}

	/// Read and discard at most `limit` bytes, then drop the body.
	///
	/// Consuming a small remainder lets the connection return to the pool; larger
	/// payloads are abandoned together with their connection.
	pub async fn drain(mut self, limit: usize) {
		let mut consumed = 0;

		while consumed < limit {
			match self.inner.frame().await {
				Some(Ok(frame)) =>
					if let Some(data) = frame.data_ref() {
						consumed += data.len();
					},
				Some(Err(err)) => {
					tracing::debug!(error = %err, "response body drain aborted");

					break;
				},
				None => break,
			}
		}
	}
}
impl Default for ResponseBody {
	fn default() -> Self {
		Self::empty()
	}
}
impl Debug for ResponseBody {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("ResponseBody").field("size_hint", &self.inner.size_hint()).finish()
	}
}
impl HttpBody for ResponseBody {
	type Data = Bytes;
	type Error = Error;

	fn poll_frame(
		mut self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
	) -> Poll<Option<std::result::Result<Frame<Bytes>, Error>>> {
		Pin::new(&mut self.inner).poll_frame(cx)
	}

	fn is_end_stream(&self) -> bool {
		self.inner.is_end_stream()
	}

	fn size_hint(&self) -> SizeHint {
		self.inner.size_hint()
	}
}

fn read_all(
	factory: &(dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync),
) -> Result<Bytes> {
	let mut reader = factory()?;
	let mut buffer = Vec::new();

	reader.read_to_end(&mut buffer)?;

	Ok(Bytes::from(buffer))
}
