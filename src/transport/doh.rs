use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hickory_proto::op::Message;

use crate::config::{BenchmarkConfig, DohMethod, HttpVersion};

pub const CONTENT_TYPE: &str = "application/dns-message";

/// DNS over HTTPS (RFC 8484) for HTTP/1.1 and HTTP/2.
///
/// POST sends the wire-format message as the body; GET carries it
/// base64url-encoded without padding in the `dns` query parameter.
/// Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct DohClient {
	url: String,
	method: DohMethod,
	client: reqwest::Client,
}

impl DohClient {
	pub fn new(cfg: &BenchmarkConfig) -> Result<Self> {
		let mut builder = reqwest::Client::builder()
			.use_rustls_tls()
			.danger_accept_invalid_certs(cfg.insecure)
			.connect_timeout(cfg.connect_timeout);
		builder = match cfg.doh_protocol {
			HttpVersion::Http1 => builder.http1_only(),
			HttpVersion::Http2 => builder.http2_prior_knowledge(),
			HttpVersion::Http3 => bail!("HTTP/3 requests are handled by the dedicated client"),
		};
		let client = builder
			.build()
			.map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;

		Ok(Self {
			url: cfg.server.clone(),
			method: cfg.doh_method,
			client,
		})
	}

	pub async fn query(&self, req: &Message) -> Result<Message> {
		let payload = req
			.to_vec()
			.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;

		let request = match self.method {
			DohMethod::Post => self
				.client
				.post(&self.url)
				.header("content-type", CONTENT_TYPE)
				.header("accept", CONTENT_TYPE)
				.body(payload),
			DohMethod::Get => {
				let encoded = URL_SAFE_NO_PAD.encode(&payload);
				self.client
					.get(format!("{}?dns={}", self.url, encoded))
					.header("accept", CONTENT_TYPE)
			}
		};

		let response = request
			.send()
			.await
			.map_err(|e| anyhow!("DoH request to {} failed: {}", self.url, e))?;
		if !response.status().is_success() {
			bail!("DoH server {} returned status {}", self.url, response.status());
		}

		let body = response
			.bytes()
			.await
			.map_err(|e| anyhow!("failed to read DoH response body: {}", e))?;
		Message::from_vec(&body).map_err(|e| anyhow!("failed to parse response: {}", e))
	}
}
