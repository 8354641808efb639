//! Connection accounting of the pooled transport.

// std
use std::time::Duration;
// crates.io
use http::{Method, StatusCode};
use roundtrip::{PooledTransport, Result, RoundTrip, TransportConfig, client::new_request};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

#[tokio::test]
async fn open_connections_return_to_zero_once_the_pool_is_dropped() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/ping"))
		.respond_with(ResponseTemplate::new(200).set_body_string("pong"))
		.mount(&server)
		.await;

	let transport = PooledTransport::new("integration", &TransportConfig::default());
	let stats = transport.stats_handle();
	let address = server.address();
	let key = format!("tcp:{}:{}", address.ip(), address.port());

	for _ in 0..3 {
		let request = new_request(Method::GET, &format!("{}/ping", server.uri()), ())?;
		let response = transport.round_trip(request).await?;

		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(response.into_body().text().await?, "pong");
	}

	assert!(stats.snapshot().get(&key).is_some_and(|open| *open >= 1));

	drop(transport);

	for _ in 0..100 {
		if stats.snapshot().get(&key) == Some(&0) {
			break;
		}

		tokio::time::sleep(Duration::from_millis(20)).await;
	}

	assert_eq!(stats.snapshot().get(&key), Some(&0));

	Ok(())
}

#[tokio::test]
async fn refused_connections_leave_no_open_count() {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("listener");
	let address = listener.local_addr().expect("address");

	drop(listener);

	let transport = PooledTransport::new("refused", &TransportConfig::default());
	let request =
		new_request(Method::GET, &format!("http://{address}/"), ()).expect("request");

	assert!(transport.round_trip(request).await.is_err());
	assert!(transport.stats().values().all(|open| *open == 0));
}
