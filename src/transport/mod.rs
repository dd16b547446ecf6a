//! Transport dispatch: one factory built from the config, one query client
//! handed to each worker, one `query` call per request.

mod doh;
mod doh3;
mod doq;
mod stream;
mod tls;
mod udp;

use anyhow::Result;
use hickory_proto::op::Message;

use crate::config::{BenchmarkConfig, HttpVersion, Protocol};

pub use doh::DohClient;
pub use doh3::Doh3Client;
pub use doq::DoqClient;
pub use stream::StreamClient;
pub use udp::UdpClient;

/// Per-worker handle for issuing queries over the configured transport.
///
/// Dispatch is a plain match on the variant; clients use interior
/// mutability, so a shared clone and an exclusive instance look the same
/// to the caller.
#[derive(Clone)]
pub enum QueryClient {
	Udp(UdpClient),
	Stream(StreamClient),
	Doq(DoqClient),
	Doh(DohClient),
	Doh3(Doh3Client),
}

impl QueryClient {
	/// Send one request and wait for its response.
	///
	/// Any response parsed off the wire is `Ok`, including SERVFAIL or
	/// NXDOMAIN; `Err` means the exchange itself failed.
	pub async fn query(&self, req: &Message) -> Result<Message> {
		match self {
			QueryClient::Udp(c) => c.query(req).await,
			QueryClient::Stream(c) => c.query(req).await,
			QueryClient::Doq(c) => c.query(req).await,
			QueryClient::Doh(c) => c.query(req).await,
			QueryClient::Doh3(c) => c.query(req).await,
		}
	}
}

/// Builds query clients for workers.
///
/// The factory runs once per benchmark. Unless separate worker connections
/// are requested, it creates a single client up front and hands every
/// worker a clone sharing the underlying connection; otherwise each worker
/// gets a client with its own connection state.
pub struct TransportFactory {
	cfg: BenchmarkConfig,
	shared: Option<QueryClient>,
}

impl TransportFactory {
	pub fn new(cfg: &BenchmarkConfig) -> Result<Self> {
		let shared = if cfg.separate_worker_connections {
			None
		} else {
			Some(build_client(cfg)?)
		};
		Ok(Self { cfg: cfg.clone(), shared })
	}

	/// Produce the query client for one worker.
	pub fn client(&self) -> Result<QueryClient> {
		match &self.shared {
			Some(client) => Ok(client.clone()),
			None => build_client(&self.cfg),
		}
	}
}

fn build_client(cfg: &BenchmarkConfig) -> Result<QueryClient> {
	let client = match cfg.protocol {
		Protocol::Udp => QueryClient::Udp(UdpClient::new(cfg)),
		Protocol::Tcp => QueryClient::Stream(StreamClient::new(cfg, false)),
		Protocol::Dot => QueryClient::Stream(StreamClient::new(cfg, true)),
		Protocol::Doq => QueryClient::Doq(DoqClient::new(cfg)?),
		Protocol::Doh => match cfg.doh_protocol {
			HttpVersion::Http3 => QueryClient::Doh3(Doh3Client::new(cfg)?),
			_ => QueryClient::Doh(DohClient::new(cfg)?),
		},
	};
	Ok(client)
}
