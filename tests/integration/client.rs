//! Full client pipelines against a local HTTP server.

// std
use std::sync::Arc;
// crates.io
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use roundtrip::{
	Body, Client, MemoryCache, PooledTransport, RequestMeta, Requester, Result, TransportConfig,
	client::new_request,
	transport::{
		cache::FROM_CACHE_HEADER, reqwest_transport::ReqwestTransport,
		user_agent::DEFAULT_USER_AGENT,
	},
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{header, method, path},
};

fn pool(name: &str) -> Arc<PooledTransport> {
	Arc::new(PooledTransport::new(name, &TransportConfig::default()))
}

#[tokio::test]
async fn retries_server_errors_until_success() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/orders"))
		.respond_with(ResponseTemplate::new(503))
		.up_to_n_times(2)
		.with_priority(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/orders"))
		.respond_with(ResponseTemplate::new(201).set_body_string("created"))
		.mount(&server)
		.await;

	let client = Client::builder().transport(pool("retries")).build_retryable(3);
	let request = new_request(Method::POST, &format!("{}/orders", server.uri()), "order-1")?;
	let response = client.execute(request).await?;

	assert_eq!(response.status(), StatusCode::CREATED);
	assert_eq!(response.into_body().text().await?, "created");

	let received = server.received_requests().await.expect("recording enabled");
	let retries: Vec<_> = received
		.iter()
		.map(|request| request.headers.get("x-retry").map(|value| value.as_bytes().to_vec()))
		.collect();

	assert_eq!(received.len(), 3);
	assert!(received.iter().all(|request| request.body == b"order-1"));
	assert_eq!(retries, vec![None, Some(b"1".to_vec()), Some(b"2".to_vec())]);

	Ok(())
}

#[tokio::test]
async fn fresh_responses_are_served_from_the_cache() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/catalog"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string("catalog")
				.insert_header("cache-control", "max-age=60"),
		)
		.expect(1)
		.mount(&server)
		.await;

	let client = Client::builder()
		.transport(pool("cache"))
		.cache(Arc::new(MemoryCache::new(1)))
		.build();
	let url = format!("{}/catalog", server.uri());
	let first = client.execute(new_request(Method::GET, &url, ())?).await?;

	assert!(first.headers().get(FROM_CACHE_HEADER).is_none());
	assert_eq!(first.into_body().text().await?, "catalog");

	let second = client.execute(new_request(Method::GET, &url, ())?).await?;

	assert_eq!(second.headers()[FROM_CACHE_HEADER], "1");
	assert_eq!(second.into_body().text().await?, "catalog");

	Ok(())
}

#[tokio::test]
async fn forwarded_headers_reach_the_server() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/users"))
		.and(header("x-request-id", "req-42"))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&server)
		.await;

	let client = Client::builder().transport(pool("forwarded")).target_id("users-api").build();
	let mut request = new_request(Method::GET, &format!("{}/users", server.uri()), Body::empty())?;
	let mut forwarded = HeaderMap::new();

	forwarded.insert("x-request-id", HeaderValue::from_static("req-42"));
	request.set_forwarded_headers(forwarded);

	let response = client.execute(request).await?;

	assert_eq!(response.status(), StatusCode::OK);

	Ok(())
}

#[tokio::test]
async fn reqwest_base_transport_runs_behind_the_same_chain() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/health"))
		.and(header("user-agent", DEFAULT_USER_AGENT))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.expect(1)
		.mount(&server)
		.await;

	let client = Client::builder().transport(Arc::new(ReqwestTransport::default())).build();
	let url = format!("{}/health", server.uri());
	let response = client.execute(new_request(Method::GET, &url, ())?).await?;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.into_body().text().await?, "ok");

	Ok(())
}

#[tokio::test]
async fn redirects_are_followed_only_when_enabled() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/old"))
		.respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/new"))
		.respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
		.expect(1)
		.mount(&server)
		.await;

	let url = format!("{}/old", server.uri());
	let plain = Client::builder().transport(pool("no-redirects")).build();
	let response = plain.execute(new_request(Method::GET, &url, ())?).await?;

	assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
	assert_eq!(response.headers()["location"], "/new");

	let following = Client::builder().transport(pool("redirects")).follow_redirects(true).build();
	let response = following.execute(new_request(Method::GET, &url, ())?).await?;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.into_body().text().await?, "moved here");

	Ok(())
}
