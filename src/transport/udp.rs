use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use hickory_proto::op::Message;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use crate::config::BenchmarkConfig;

/// Receive buffer sized for EDNS-extended responses.
const RECV_BUFFER_SIZE: usize = 4096;

/// Plain DNS over UDP.
///
/// The client owns one connected socket at a time behind a mutex; cloning
/// shares the socket, so a single handle can either be cloned across
/// workers (shared mode) or created per worker.
#[derive(Clone)]
pub struct UdpClient {
	server: String,
	connect_timeout: Duration,
	write_timeout: Duration,
	read_timeout: Duration,
	queries_per_conn: u64,
	conn: Arc<Mutex<UdpConn>>,
}

#[derive(Default)]
struct UdpConn {
	socket: Option<UdpSocket>,
	served: u64,
}

impl UdpClient {
	pub fn new(cfg: &BenchmarkConfig) -> Self {
		Self {
			server: cfg.server.clone(),
			connect_timeout: cfg.connect_timeout,
			write_timeout: cfg.write_timeout,
			read_timeout: cfg.read_timeout,
			queries_per_conn: cfg.queries_per_conn,
			conn: Arc::new(Mutex::new(UdpConn::default())),
		}
	}

	pub async fn query(&self, req: &Message) -> Result<Message> {
		let payload = req
			.to_vec()
			.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;

		let mut conn = self.conn.lock().await;
		let UdpConn { socket, served } = &mut *conn;

		// recycle the socket once it served its query quota
		if self.queries_per_conn > 0 && *served >= self.queries_per_conn {
			*socket = None;
			*served = 0;
		}
		if socket.is_none() {
			*socket = Some(
				timeout(self.connect_timeout, self.connect())
					.await
					.map_err(|_| anyhow!("timed out connecting to {}", self.server))??,
			);
		}
		let Some(socket) = socket.as_ref() else {
			bail!("no UDP socket available for {}", self.server);
		};

		timeout(self.write_timeout, socket.send(&payload))
			.await
			.map_err(|_| anyhow!("timed out writing to {}", self.server))?
			.map_err(|e| anyhow!("failed to send query to {}: {}", self.server, e))?;
		*served += 1;

		// read until the response ID matches the request, discarding strays
		// from earlier timed out queries on the same socket
		let deadline = Instant::now() + self.read_timeout;
		let mut buf = vec![0u8; RECV_BUFFER_SIZE];
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				bail!("timed out reading response from {}", self.server);
			}
			let len = timeout(remaining, socket.recv(&mut buf))
				.await
				.map_err(|_| anyhow!("timed out reading response from {}", self.server))?
				.map_err(|e| anyhow!("failed to read response from {}: {}", self.server, e))?;

			let resp = match Message::from_vec(&buf[..len]) {
				Ok(m) => m,
				Err(_) => continue,
			};
			if resp.id() != req.id() {
				continue;
			}
			return Ok(resp);
		}
	}

	async fn connect(&self) -> Result<UdpSocket> {
		let addr = tokio::net::lookup_host(&self.server)
			.await
			.map_err(|e| anyhow!("failed to resolve '{}': {}", self.server, e))?
			.next()
			.ok_or_else(|| anyhow!("'{}' did not resolve to any address", self.server))?;

		let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
		let socket = UdpSocket::bind(bind_addr)
			.await
			.map_err(|e| anyhow!("failed to bind UDP socket: {}", e))?;
		socket
			.connect(addr)
			.await
			.map_err(|e| anyhow!("failed to connect to {}: {}", self.server, e))?;
		Ok(socket)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cli::Cli;
	use crate::config::BenchmarkConfig;
	use clap::Parser;
	use hickory_proto::op::{MessageType, Query};
	use hickory_proto::rr::{Name, RecordType};
	use std::net::SocketAddr;

	fn test_client(server: &str, queries_per_conn: u64) -> UdpClient {
		let cli = Cli::parse_from([
			"dns-loadgen",
			"example.com",
			"-s",
			server,
			"--query-per-conn",
			&queries_per_conn.to_string(),
			"--read-timeout",
			"1s",
		]);
		let cfg = BenchmarkConfig::from_cli(&cli).unwrap().normalize().unwrap();
		UdpClient::new(&cfg)
	}

	fn query_message(id: u16) -> Message {
		let mut msg = Message::new();
		msg.set_id(id);
		msg.add_query(Query::query(Name::from_ascii("example.com.").unwrap(), RecordType::A));
		msg
	}

	/// Echo responder that answers every query with a response copy.
	async fn spawn_responder() -> SocketAddr {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = socket.local_addr().unwrap();
		tokio::spawn(async move {
			let mut buf = vec![0u8; 4096];
			while let Ok((len, src)) = socket.recv_from(&mut buf).await {
				if let Ok(mut msg) = Message::from_vec(&buf[..len]) {
					msg.set_message_type(MessageType::Response);
					if let Ok(bytes) = msg.to_vec() {
						let _ = socket.send_to(&bytes, src).await;
					}
				}
			}
		});
		addr
	}

	#[tokio::test]
	async fn test_query_roundtrip() {
		let addr = spawn_responder().await;
		let client = test_client(&addr.to_string(), 0);

		let resp = client.query(&query_message(42)).await.unwrap();
		assert_eq!(resp.id(), 42);
		assert_eq!(resp.message_type(), MessageType::Response);
	}

	#[tokio::test]
	async fn test_socket_reused_across_queries() {
		let addr = spawn_responder().await;
		let client = test_client(&addr.to_string(), 0);

		for id in 0..5 {
			client.query(&query_message(id)).await.unwrap();
		}
		let conn = client.conn.lock().await;
		assert_eq!(conn.served, 5);
	}

	#[tokio::test]
	async fn test_socket_recycled_after_quota() {
		let addr = spawn_responder().await;
		let client = test_client(&addr.to_string(), 2);

		for id in 0..5 {
			client.query(&query_message(id)).await.unwrap();
		}
		// 5 queries at 2 per connection leaves 1 on the freshest socket
		let conn = client.conn.lock().await;
		assert_eq!(conn.served, 1);
	}

	#[tokio::test]
	async fn test_read_timeout_without_server() {
		// nothing listens on this socket, the read must time out
		let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = silent.local_addr().unwrap();
		let client = test_client(&addr.to_string(), 0);

		let err = client.query(&query_message(7)).await.unwrap_err();
		assert!(err.to_string().contains("timed out"));
	}
}
