use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use hickory_proto::op::Message;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::BenchmarkConfig;
use crate::transport::tls;

/// Plain DNS over TCP and DNS over TLS.
///
/// Messages are framed with a 2-byte big-endian length prefix per RFC 1035;
/// the next message on the stream is the reply. Cloning shares the
/// underlying connection.
#[derive(Clone)]
pub struct StreamClient {
	server: String,
	host: String,
	tls_config: Option<Arc<ClientConfig>>,
	connect_timeout: Duration,
	write_timeout: Duration,
	read_timeout: Duration,
	queries_per_conn: u64,
	conn: Arc<Mutex<StreamConn>>,
}

#[derive(Default)]
struct StreamConn {
	stream: Option<WireStream>,
	served: u64,
}

enum WireStream {
	Tcp(TcpStream),
	Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl WireStream {
	async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
		match self {
			WireStream::Tcp(s) => s.write_all(buf).await,
			WireStream::Tls(s) => s.write_all(buf).await,
		}
	}

	async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
		match self {
			WireStream::Tcp(s) => s.read_exact(buf).await.map(|_| ()),
			WireStream::Tls(s) => s.read_exact(buf).await.map(|_| ()),
		}
	}
}

impl StreamClient {
	/// Create a TCP client, or a TLS client when `use_tls` is set.
	pub fn new(cfg: &BenchmarkConfig, use_tls: bool) -> Self {
		let tls_config = use_tls.then(|| Arc::new(tls::client_config(cfg.insecure, &[b"dot"])));
		Self {
			server: cfg.server.clone(),
			host: cfg.host(),
			tls_config,
			connect_timeout: cfg.connect_timeout,
			write_timeout: cfg.write_timeout,
			read_timeout: cfg.read_timeout,
			queries_per_conn: cfg.queries_per_conn,
			conn: Arc::new(Mutex::new(StreamConn::default())),
		}
	}

	pub async fn query(&self, req: &Message) -> Result<Message> {
		let payload = req
			.to_vec()
			.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;
		if payload.len() > u16::MAX as usize {
			bail!("query of {} bytes does not fit stream framing", payload.len());
		}

		let mut conn = self.conn.lock().await;

		if self.queries_per_conn > 0 && conn.served >= self.queries_per_conn {
			conn.stream = None;
			conn.served = 0;
		}
		if conn.stream.is_none() {
			conn.stream = Some(
				timeout(self.connect_timeout, self.dial())
					.await
					.map_err(|_| anyhow!("timed out connecting to {}", self.server))??,
			);
		}
		let Some(stream) = conn.stream.as_mut() else {
			bail!("no connection available for {}", self.server);
		};

		let mut framed = Vec::with_capacity(2 + payload.len());
		framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
		framed.extend_from_slice(&payload);

		let result = self.exchange(stream, &framed).await;
		match result {
			Ok(resp) => {
				conn.served += 1;
				Ok(resp)
			}
			Err(e) => {
				// a half-written or half-read stream is useless, reconnect next time
				conn.stream = None;
				conn.served = 0;
				Err(e)
			}
		}
	}

	async fn exchange(&self, stream: &mut WireStream, framed: &[u8]) -> Result<Message> {
		timeout(self.write_timeout, stream.write_all(framed))
			.await
			.map_err(|_| anyhow!("timed out writing to {}", self.server))?
			.map_err(|e| anyhow!("failed to write query to {}: {}", self.server, e))?;

		let mut len_buf = [0u8; 2];
		timeout(self.read_timeout, stream.read_exact(&mut len_buf))
			.await
			.map_err(|_| anyhow!("timed out reading response from {}", self.server))?
			.map_err(|e| anyhow!("failed to read response length from {}: {}", self.server, e))?;
		let resp_len = u16::from_be_bytes(len_buf) as usize;
		if resp_len == 0 {
			bail!("received empty response from {}", self.server);
		}

		let mut resp_buf = vec![0u8; resp_len];
		timeout(self.read_timeout, stream.read_exact(&mut resp_buf))
			.await
			.map_err(|_| anyhow!("timed out reading response from {}", self.server))?
			.map_err(|e| anyhow!("failed to read response body from {}: {}", self.server, e))?;

		Message::from_vec(&resp_buf).map_err(|e| anyhow!("failed to parse response: {}", e))
	}

	async fn dial(&self) -> Result<WireStream> {
		let tcp = TcpStream::connect(&self.server)
			.await
			.map_err(|e| anyhow!("failed to connect to {}: {}", self.server, e))?;
		tcp.set_nodelay(true).ok();

		match &self.tls_config {
			None => Ok(WireStream::Tcp(tcp)),
			Some(config) => {
				let connector = TlsConnector::from(config.clone());
				let server_name = ServerName::try_from(self.host.clone())
					.map_err(|e| anyhow!("invalid TLS server name '{}': {}", self.host, e))?;
				let stream = connector
					.connect(server_name, tcp)
					.await
					.map_err(|e| anyhow!("TLS handshake with {} failed: {}", self.server, e))?;
				Ok(WireStream::Tls(Box::new(stream)))
			}
		}
	}
}
