//! Connection-pooling base transport with per-address open-connection counters.
//!
//! Requests run through `hyper-util`'s pooling client over an instrumented dialer. Every
//! successful TCP dial increments the counter of its `tcp:host:port` key before the connection
//! is handed on, and the connection decrements it exactly once when dropped, whether the caller,
//! the pool or a failed TLS handshake closes it. Failed dials leave the counters untouched.
//!
//! `https` connections are secured with `rustls` against the bundled web PKI roots.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
	io,
	net::SocketAddr,
	pin::Pin,
	sync::atomic::{AtomicBool, AtomicI64, Ordering},
	task::{Context as TaskContext, Poll},
};
// crates.io
use async_trait::async_trait;
use dashmap::DashMap;
use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::{
	client::legacy::{
		Client as PoolClient,
		connect::{Connected, Connection},
	},
	rt::{TokioExecutor, TokioIo, TokioTimer},
};
use parking_lot::Mutex;
use rustls::{ClientConfig as TlsConfig, RootCertStore, pki_types::ServerName};
use tokio::{
	io::{AsyncRead, AsyncWrite, ReadBuf},
	net::{TcpSocket, TcpStream},
	time,
};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tower::Service;
// self
use crate::{
	_prelude::*,
	Body, ResponseBody,
	config::TransportConfig,
	metrics as telemetry,
	transport::{
		RoundTrip,
		trace::{self, ConnectionTrace, GotConnInfo},
	},
};

/// Shared view over the open-connection counters of one pool.
///
/// Holding a handle keeps the counters alive after the transport is dropped, so connections
/// closing later are still observed.
#[derive(Clone, Debug)]
pub struct PoolStats {
	name: Arc<str>,
	counters: Arc<DashMap<String, Arc<AtomicI64>>>,
}
impl PoolStats {
	fn new(name: &str) -> Self {
		Self { name: Arc::from(name), counters: Arc::new(DashMap::new()) }
	}

	/// Pool name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Snapshot of `network:address` to open connections.
	///
	/// Concurrent dials and closes may or may not be reflected.
	pub fn snapshot(&self) -> HashMap<String, i64> {
		self.counters
			.iter()
			.map(|entry| (entry.key().clone(), entry.value().load(Ordering::Acquire)))
			.collect()
	}

	/// Publish every counter as the `http_client_pool_open_connections` gauge.
	pub fn export(&self) {
		for (address, open) in self.snapshot() {
			telemetry::record_pool_connections(&self.name, &address, open);
		}
	}

	fn counter(&self, key: String) -> Arc<AtomicI64> {
		self.counters.entry(key).or_default().clone()
	}
}

/// Pooling HTTP/1 base transport exposing live connection counts.
#[derive(Clone, Debug)]
pub struct PooledTransport {
	client: PoolClient<PoolConnector, Body>,
	stats: PoolStats,
}
impl PooledTransport {
	/// Create a pool named `name` from the given settings.
	pub fn new(name: &str, config: &TransportConfig) -> Self {
		let stats = PoolStats::new(name);
		let tls = tls_connector()
			.inspect_err(|err| tracing::warn!(pool = %name, error = %err, "TLS is unavailable"))
			.ok();
		let connector = PoolConnector {
			dial_timeout: config.dial_timeout,
			tls_handshake_timeout: config.tls_handshake_timeout,
			keep_alive: config.keep_alive,
			tls,
			stats: stats.clone(),
		};
		let client = PoolClient::builder(TokioExecutor::new())
			.pool_idle_timeout(config.idle_timeout)
			.pool_max_idle_per_host(config.max_idle_per_host)
			.pool_timer(TokioTimer::new())
			.build(connector);

		Self { client, stats }
	}

	/// Pool name.
	pub fn name(&self) -> &str {
		self.stats.name()
	}

	/// Snapshot of `network:address` to open connections.
	pub fn stats(&self) -> HashMap<String, i64> {
		self.stats.snapshot()
	}

	/// Handle over the counters, for periodic polling or export.
	pub fn stats_handle(&self) -> PoolStats {
		self.stats.clone()
	}

	/// Publish the counters through the metrics facade.
	pub fn export_stats(&self) {
		self.stats.export();
	}
}
#[async_trait]
impl RoundTrip for PooledTransport {
	async fn round_trip(&self, request: Request) -> Result<Response> {
		let trace = trace::client_trace(&request);
		let response = self.client.request(request).await?;

		if let Some(trace) = trace {
			report_phases(trace.as_ref(), response.extensions().get::<DialInfo>(), Instant::now());
		}

		Ok(response.map(ResponseBody::new))
	}
}

fn report_phases(trace: &dyn ConnectionTrace, dial: Option<&DialInfo>, now: Instant) {
	let fresh = dial.is_some_and(|dial| !dial.claimed.swap(true, Ordering::AcqRel));

	if let Some(dial) = dial.filter(|_| fresh) {
		trace.dns_done(dial.dns, None);
		trace.connect_done(dial.connect, None);

		if let Some(handshake) = dial.tls_handshake {
			trace.tls_handshake_done(handshake, None);
		}
	}

	let exchange = dial.and_then(|dial| dial.wire.last_exchange());

	trace.got_conn(
		GotConnInfo { reused: !fresh, was_idle: !fresh },
		exchange.map_or(now, |exchange| exchange.started),
	);
	trace.wrote_request(exchange.map_or(now, |exchange| exchange.written), None);
	trace.got_first_response_byte(now);
}

fn tls_connector() -> Result<TlsConnector> {
	let mut roots = RootCertStore::empty();

	roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

	let mut config =
		TlsConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
			.with_safe_default_protocol_versions()
			.map_err(|err| invalid_input(format!("TLS configuration: {err}")))?
			.with_root_certificates(roots)
			.with_no_client_auth();

	config.alpn_protocols = vec![b"http/1.1".to_vec()];

	Ok(TlsConnector::from(Arc::new(config)))
}

/// Write and read activity of one connection.
///
/// HTTP/1 runs one exchange at a time per connection: the first write after a response
/// starts the next exchange, and the first read after writing closes it.
#[derive(Debug, Default)]
struct Wire {
	state: Mutex<WireState>,
}
impl Wire {
	fn wrote(&self) {
		let now = Instant::now();
		let mut state = self.state.lock();
		let exchange = state.writing.get_or_insert(Exchange { started: now, written: now });

		exchange.written = now;
	}

	fn read(&self) {
		let mut state = self.state.lock();

		if let Some(exchange) = state.writing.take() {
			state.last = Some(exchange);
		}
	}

	fn last_exchange(&self) -> Option<Exchange> {
		self.state.lock().last
	}
}

#[derive(Debug, Default)]
struct WireState {
	writing: Option<Exchange>,
	last: Option<Exchange>,
}

#[derive(Clone, Copy, Debug)]
struct Exchange {
	started: Instant,
	written: Instant,
}

/// Timings of the dial that produced a connection, exposed on its responses.
#[derive(Clone, Debug)]
struct DialInfo {
	dns: Duration,
	connect: Duration,
	tls_handshake: Option<Duration>,
	claimed: Arc<AtomicBool>,
	wire: Arc<Wire>,
}

#[derive(Clone)]
struct PoolConnector {
	dial_timeout: Duration,
	tls_handshake_timeout: Duration,
	keep_alive: bool,
	tls: Option<TlsConnector>,
	stats: PoolStats,
}
impl PoolConnector {
	async fn dial(self, uri: Uri) -> Result<TracedConn> {
		let secure = match uri.scheme_str() {
			Some("https") => true,
			Some("http") | None => false,
			Some(other) => return Err(invalid_input(format!("{uri}: unsupported scheme {other}"))),
		};
		let host = uri
			.host()
			.map(|host| host.trim_start_matches('[').trim_end_matches(']').to_owned())
			.ok_or_else(|| invalid_input(format!("{uri}: missing host")))?;
		let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
		let key = format!("tcp:{host}:{port}");
		let (stream, dns, connect) = self.dial_tcp(&host, port, &key).await?;
		let open = OpenConnection::new(self.stats.counter(key));
		let (stream, tls_handshake) = if secure {
			let started = Instant::now();
			let stream = self.handshake(&host, stream).await?;

			(Stream::Tls(Box::new(stream)), Some(started.elapsed()))
		} else {
			(Stream::Plain(stream), None)
		};

		Ok(TracedConn {
			io: TokioIo::new(stream),
			dial: DialInfo {
				dns,
				connect,
				tls_handshake,
				claimed: Arc::new(AtomicBool::new(false)),
				wire: Arc::new(Wire::default()),
			},
			_open: open,
		})
	}

	async fn dial_tcp(
		&self,
		host: &str,
		port: u16,
		key: &str,
	) -> Result<(TcpStream, Duration, Duration)> {
		let started = Instant::now();
		let deadline = started + self.dial_timeout;
		let addresses: Vec<SocketAddr> =
			time::timeout_at(deadline, tokio::net::lookup_host((host, port)))
				.await
				.map_err(|_| timed_out(format!("resolving {host} timed out")))??
				.collect();
		let dns = started.elapsed();
		let connect_started = Instant::now();
		let mut last_err = None;

		for (i, address) in addresses.iter().enumerate() {
			let remaining = deadline.saturating_duration_since(Instant::now());

			if remaining.is_zero() {
				break;
			}

			let share = remaining / (addresses.len() - i) as u32;

			match time::timeout(share, connect(*address, self.keep_alive)).await {
				Ok(Ok(stream)) => {
					tracing::debug!(
						pool = %self.stats.name(),
						%key,
						%address,
						?dns,
						"connection opened"
					);

					return Ok((stream, dns, connect_started.elapsed()));
				},
				Ok(Err(err)) => last_err = Some(err),
				Err(_) => last_err = Some(timed_out(format!("connecting to {address} timed out"))),
			}
		}

		let err = last_err.unwrap_or_else(|| {
			if addresses.is_empty() {
				io::Error::new(io::ErrorKind::NotFound, format!("no addresses found for {host}"))
			} else {
				timed_out(format!("dialing {host}:{port} timed out"))
			}
		});

		tracing::debug!(pool = %self.stats.name(), %key, error = %err, "dial failed");

		Err(err.into())
	}

	async fn handshake(&self, host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
		let tls =
			self.tls.clone().ok_or_else(|| invalid_input(format!("{host}: TLS is unavailable")))?;
		let name = ServerName::try_from(host)
			.map_err(|err| invalid_input(format!("{host}: {err}")))?
			.to_owned();
		let stream = time::timeout(self.tls_handshake_timeout, tls.connect(name, stream))
			.await
			.map_err(|_| timed_out(format!("TLS handshake with {host} timed out")))?
			.inspect_err(|err| {
				tracing::debug!(
					pool = %self.stats.name(),
					%host,
					error = %err,
					"TLS handshake failed"
				);
			})?;

		Ok(stream)
	}
}
impl Debug for PoolConnector {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("PoolConnector")
			.field("dial_timeout", &self.dial_timeout)
			.field("tls_handshake_timeout", &self.tls_handshake_timeout)
			.field("keep_alive", &self.keep_alive)
			.field("tls", &self.tls.is_some())
			.field("stats", &self.stats)
			.finish()
	}
}
impl Service<Uri> for PoolConnector {
	type Error = Error;
	type Future = Pin<Box<dyn Future<Output = Result<TracedConn>> + Send>>;
	type Response = TracedConn;

	fn poll_ready(&mut self, _: &mut TaskContext<'_>) -> Poll<Result<()>> {
		Poll::Ready(Ok(()))
	}

	fn call(&mut self, uri: Uri) -> Self::Future {
		Box::pin(self.clone().dial(uri))
	}
}

async fn connect(address: SocketAddr, keep_alive: bool) -> io::Result<TcpStream> {
	let socket = if address.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };

	socket.set_keepalive(keep_alive)?;

	let stream = socket.connect(address).await?;

	stream.set_nodelay(true)?;

	Ok(stream)
}

fn invalid_input(message: String) -> Error {
	io::Error::new(io::ErrorKind::InvalidInput, message).into()
}

fn timed_out(message: String) -> io::Error {
	io::Error::new(io::ErrorKind::TimedOut, message)
}

/// Open-connection count held by a dialed TCP stream.
struct OpenConnection(Arc<AtomicI64>);
impl OpenConnection {
	fn new(counter: Arc<AtomicI64>) -> Self {
		counter.fetch_add(1, Ordering::AcqRel);

		Self(counter)
	}
}
impl Drop for OpenConnection {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}

enum Stream {
	Plain(TcpStream),
	Tls(Box<TlsStream<TcpStream>>),
}
impl AsyncRead for Stream {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		match self.get_mut() {
			Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
		}
	}
}
impl AsyncWrite for Stream {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		match self.get_mut() {
			Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
		match self.get_mut() {
			Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
		}
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
		match self.get_mut() {
			Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
		}
	}

	fn poll_write_vectored(
		self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
		bufs: &[io::IoSlice<'_>],
	) -> Poll<io::Result<usize>> {
		match self.get_mut() {
			Self::Plain(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write_vectored(cx, bufs),
		}
	}

	fn is_write_vectored(&self) -> bool {
		match self {
			Self::Plain(stream) => stream.is_write_vectored(),
			Self::Tls(stream) => stream.is_write_vectored(),
		}
	}
}

/// Pooled connection recording its wire activity and releasing its open count when dropped.
struct TracedConn {
	io: TokioIo<Stream>,
	dial: DialInfo,
	_open: OpenConnection,
}
impl TracedConn {
	fn track_write(&self, written: &Poll<io::Result<usize>>) {
		if matches!(written, Poll::Ready(Ok(n)) if *n > 0) {
			self.dial.wire.wrote();
		}
	}
}
impl Connection for TracedConn {
	fn connected(&self) -> Connected {
		Connected::new().extra(self.dial.clone())
	}
}
impl Read for TracedConn {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
		buf: ReadBufCursor<'_>,
	) -> Poll<io::Result<()>> {
		let read = Read::poll_read(Pin::new(&mut self.io), cx, buf);

		if matches!(read, Poll::Ready(Ok(()))) {
			self.dial.wire.read();
		}

		read
	}
}
impl Write for TracedConn {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let written = Write::poll_write(Pin::new(&mut self.io), cx, buf);

		self.track_write(&written);

		written
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
		Write::poll_flush(Pin::new(&mut self.io), cx)
	}

	fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
		Write::poll_shutdown(Pin::new(&mut self.io), cx)
	}

	fn is_write_vectored(&self) -> bool {
		Write::is_write_vectored(&self.io)
	}

	fn poll_write_vectored(
		mut self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
		bufs: &[io::IoSlice<'_>],
	) -> Poll<io::Result<usize>> {
		let written = Write::poll_write_vectored(Pin::new(&mut self.io), cx, bufs);

		self.track_write(&written);

		written
	}
}
