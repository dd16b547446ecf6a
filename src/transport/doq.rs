use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use hickory_proto::op::Message;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{Connection, Endpoint};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::BenchmarkConfig;
use crate::transport::tls;

/// DNS over QUIC (RFC 9250).
///
/// One bidirectional stream per query with the same 2-byte length framing
/// as TCP. The QUIC connection is established lazily and re-dialed when it
/// closes; cloning shares the endpoint and connection, with concurrent
/// queries multiplexed onto separate streams.
#[derive(Clone)]
pub struct DoqClient {
	server: String,
	server_name: String,
	connect_timeout: Duration,
	write_timeout: Duration,
	read_timeout: Duration,
	endpoint: Endpoint,
	conn: Arc<Mutex<Option<Connection>>>,
}

impl DoqClient {
	pub fn new(cfg: &BenchmarkConfig) -> Result<Self> {
		let mut endpoint = Endpoint::client(
			"0.0.0.0:0"
				.parse()
				.map_err(|e| anyhow!("invalid bind address: {}", e))?,
		)
		.map_err(|e| anyhow!("failed to create QUIC endpoint: {}", e))?;

		let crypto = tls::client_config(cfg.insecure, &[b"doq"]);
		let quic_crypto = QuicClientConfig::try_from(crypto)
			.map_err(|e| anyhow!("failed to build QUIC TLS config: {}", e))?;
		endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic_crypto)));

		Ok(Self {
			server: cfg.server.clone(),
			server_name: cfg.host(),
			connect_timeout: cfg.connect_timeout,
			write_timeout: cfg.write_timeout,
			read_timeout: cfg.read_timeout,
			endpoint,
			conn: Arc::new(Mutex::new(None)),
		})
	}

	pub async fn query(&self, req: &Message) -> Result<Message> {
		let payload = req
			.to_vec()
			.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;
		if payload.len() > u16::MAX as usize {
			bail!("query of {} bytes does not fit stream framing", payload.len());
		}

		let conn = self.connection().await?;
		let (mut send, mut recv) = conn
			.open_bi()
			.await
			.map_err(|e| anyhow!("failed to open QUIC stream to {}: {}", self.server, e))?;

		let mut framed = Vec::with_capacity(2 + payload.len());
		framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
		framed.extend_from_slice(&payload);
		timeout(self.write_timeout, send.write_all(&framed))
			.await
			.map_err(|_| anyhow!("timed out writing to {}", self.server))?
			.map_err(|e| anyhow!("failed to write query to {}: {}", self.server, e))?;
		send.finish().ok();

		let mut len_buf = [0u8; 2];
		timeout(self.read_timeout, recv.read_exact(&mut len_buf))
			.await
			.map_err(|_| anyhow!("timed out reading response from {}", self.server))?
			.map_err(|e| anyhow!("failed to read response length from {}: {}", self.server, e))?;
		let resp_len = u16::from_be_bytes(len_buf) as usize;

		let mut resp_buf = vec![0u8; resp_len];
		timeout(self.read_timeout, recv.read_exact(&mut resp_buf))
			.await
			.map_err(|_| anyhow!("timed out reading response from {}", self.server))?
			.map_err(|e| anyhow!("failed to read response body from {}: {}", self.server, e))?;

		Message::from_vec(&resp_buf).map_err(|e| anyhow!("failed to parse response: {}", e))
	}

	/// Reuse the open connection or dial a fresh one when it is gone.
	async fn connection(&self) -> Result<Connection> {
		let mut guard = self.conn.lock().await;
		if let Some(conn) = guard.as_ref() {
			if conn.close_reason().is_none() {
				return Ok(conn.clone());
			}
			*guard = None;
		}

		let addr = tokio::net::lookup_host(&self.server)
			.await
			.map_err(|e| anyhow!("failed to resolve '{}': {}", self.server, e))?
			.next()
			.ok_or_else(|| anyhow!("'{}' did not resolve to any address", self.server))?;

		let connecting = self
			.endpoint
			.connect(addr, &self.server_name)
			.map_err(|e| anyhow!("failed to start QUIC connection to {}: {}", self.server, e))?;
		let conn = timeout(self.connect_timeout, connecting)
			.await
			.map_err(|_| anyhow!("timed out connecting to {}", self.server))?
			.map_err(|e| anyhow!("QUIC handshake with {} failed: {}", self.server, e))?;

		*guard = Some(conn.clone());
		Ok(conn)
	}
}
