use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{Buf, Bytes};
use hickory_proto::op::Message;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{Connection, Endpoint};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::{BenchmarkConfig, DohMethod};
use crate::transport::doh::CONTENT_TYPE;
use crate::transport::tls;

/// DNS over HTTPS on HTTP/3 (RFC 8484 over QUIC, ALPN `h3`).
///
/// The QUIC connection is established lazily and re-dialed when it closes;
/// each query runs one HTTP/3 request over it.
#[derive(Clone)]
pub struct Doh3Client {
	url: String,
	host: String,
	port: u16,
	method: DohMethod,
	connect_timeout: Duration,
	request_timeout: Duration,
	endpoint: Endpoint,
	conn: Arc<Mutex<Option<Connection>>>,
}

impl Doh3Client {
	pub fn new(cfg: &BenchmarkConfig) -> Result<Self> {
		let url = reqwest::Url::parse(&cfg.server)
			.map_err(|e| anyhow!("--server '{}' is not a valid URL: {}", cfg.server, e))?;
		let host = url
			.host_str()
			.ok_or_else(|| anyhow!("--server '{}' has no host", cfg.server))?
			.to_string();
		let port = url
			.port_or_known_default()
			.ok_or_else(|| anyhow!("--server '{}' has no port", cfg.server))?;

		let mut endpoint = Endpoint::client(
			"0.0.0.0:0"
				.parse()
				.map_err(|e| anyhow!("invalid bind address: {}", e))?,
		)
		.map_err(|e| anyhow!("failed to create QUIC endpoint: {}", e))?;

		let crypto = tls::client_config(cfg.insecure, &[b"h3"]);
		let quic_crypto = QuicClientConfig::try_from(crypto)
			.map_err(|e| anyhow!("failed to build QUIC TLS config: {}", e))?;
		endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic_crypto)));

		Ok(Self {
			url: cfg.server.clone(),
			host,
			port,
			method: cfg.doh_method,
			connect_timeout: cfg.connect_timeout,
			request_timeout: cfg.request_timeout,
			endpoint,
			conn: Arc::new(Mutex::new(None)),
		})
	}

	pub async fn query(&self, req: &Message) -> Result<Message> {
		let payload = req
			.to_vec()
			.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;

		let conn = self.connection().await?;
		let (mut driver, mut send_request) =
			h3::client::new(h3_quinn::Connection::new(conn))
				.await
				.map_err(|e| anyhow!("HTTP/3 handshake with {} failed: {}", self.url, e))?;
		tokio::spawn(async move {
			let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
		});

		let request = match self.method {
			DohMethod::Post => http::Request::builder()
				.method(http::Method::POST)
				.uri(&self.url)
				.header("content-type", CONTENT_TYPE)
				.header("accept", CONTENT_TYPE)
				.body(())
				.map_err(|e| anyhow!("failed to build HTTP/3 request: {}", e))?,
			DohMethod::Get => {
				let encoded = URL_SAFE_NO_PAD.encode(&payload);
				http::Request::builder()
					.method(http::Method::GET)
					.uri(format!("{}?dns={}", self.url, encoded))
					.header("accept", CONTENT_TYPE)
					.body(())
					.map_err(|e| anyhow!("failed to build HTTP/3 request: {}", e))?
			}
		};

		let mut stream = send_request
			.send_request(request)
			.await
			.map_err(|e| anyhow!("HTTP/3 request to {} failed: {}", self.url, e))?;
		if self.method == DohMethod::Post {
			stream
				.send_data(Bytes::from(payload))
				.await
				.map_err(|e| anyhow!("failed to send HTTP/3 body: {}", e))?;
		}
		stream
			.finish()
			.await
			.map_err(|e| anyhow!("failed to finish HTTP/3 request: {}", e))?;

		let response = timeout(self.request_timeout, stream.recv_response())
			.await
			.map_err(|_| anyhow!("timed out waiting for response from {}", self.url))?
			.map_err(|e| anyhow!("failed to read HTTP/3 response: {}", e))?;
		if !response.status().is_success() {
			bail!("DoH server {} returned status {}", self.url, response.status());
		}

		let mut body = Vec::new();
		loop {
			match stream.recv_data().await {
				Ok(Some(chunk)) => body.extend_from_slice(chunk.chunk()),
				Ok(None) => break,
				Err(e) => bail!("failed to read HTTP/3 response body: {}", e),
			}
		}

		Message::from_vec(&body).map_err(|e| anyhow!("failed to parse response: {}", e))
	}

	async fn connection(&self) -> Result<Connection> {
		let mut guard = self.conn.lock().await;
		if let Some(conn) = guard.as_ref() {
			if conn.close_reason().is_none() {
				return Ok(conn.clone());
			}
			*guard = None;
		}

		let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
			.await
			.map_err(|e| anyhow!("failed to resolve '{}': {}", self.host, e))?
			.next()
			.ok_or_else(|| anyhow!("'{}' did not resolve to any address", self.host))?;

		let connecting = self
			.endpoint
			.connect(addr, &self.host)
			.map_err(|e| anyhow!("failed to start QUIC connection to {}: {}", self.host, e))?;
		let conn = timeout(self.connect_timeout, connecting)
			.await
			.map_err(|_| anyhow!("timed out connecting to {}", self.host))?
			.map_err(|e| anyhow!("QUIC handshake with {} failed: {}", self.host, e))?;

		*guard = Some(conn.clone());
		Ok(conn)
	}
}
