use clap::Parser;

/// DNS load generator
#[derive(Parser, Debug)]
#[command(name = "dns-loadgen")]
#[command(about = "Generate DNS load against a resolver over UDP, TCP, DoT, DoQ or DoH")]
pub struct Cli {
	/// Domains and data sources to query: literal names, @<file> paths or http(s) URLs
	#[arg(required = true)]
	pub queries: Vec<String>,

	/// Server to benchmark: <host>[:port], https://<host>[/path] or quic://<host>[:port]
	#[arg(short = 's', long = "server", default_value = "127.0.0.1")]
	pub server: String,

	/// DNS query type (repeatable, e.g. A, AAAA, TXT)
	#[arg(short = 't', long = "type", default_value = "A")]
	pub types: Vec<String>,

	/// How many times each domain is queried by each worker; exclusive with --duration
	#[arg(short = 'n', long = "number")]
	pub number: Option<u64>,

	/// Run for the given duration instead of a fixed count (e.g. 30s)
	#[arg(short = 'd', long = "duration")]
	pub duration: Option<String>,

	/// Number of concurrent workers
	#[arg(short = 'c', long = "concurrency", default_value = "1")]
	pub concurrency: u32,

	/// Global queries per second limit shared by all workers (0 = unlimited)
	#[arg(short = 'l', long = "rate-limit", default_value = "0")]
	pub rate_limit: u32,

	/// Queries per second limit applied to each worker (0 = unlimited)
	#[arg(long = "rate-limit-worker", default_value = "0")]
	pub rate_limit_worker: u32,

	/// Queries sent per connection before reconnecting; UDP/TCP/DoT only (0 = reuse)
	#[arg(long = "query-per-conn", default_value = "0")]
	pub queries_per_conn: u64,

	/// Set the Recursion Desired flag on all queries
	#[arg(short = 'r', long = "recurse")]
	pub recurse: bool,

	/// Chance for each domain to be queried, 1.0 queries everything
	#[arg(long = "probability", default_value = "1.0")]
	pub probability: f64,

	/// EDNS0 buffer size between 512 and 4096 (0 = no EDNS0)
	#[arg(long = "edns0", default_value = "0")]
	pub edns0: u16,

	/// EDNS option as <decimal code>:<hex data>, e.g. 65001:DEADBEEF
	#[arg(long = "ednsopt")]
	pub ednsopt: Option<String>,

	/// Set the DNSSEC OK (DO) bit on all queries
	#[arg(long = "dnssec")]
	pub dnssec: bool,

	/// Use TCP instead of UDP for plain DNS
	#[arg(long = "tcp")]
	pub tcp: bool,

	/// Use DNS over TLS
	#[arg(long = "dot")]
	pub dot: bool,

	/// Write timeout for requests
	#[arg(long = "write-timeout", default_value = "1s")]
	pub write_timeout: String,

	/// Read timeout for responses
	#[arg(long = "read-timeout", default_value = "3s")]
	pub read_timeout: String,

	/// Timeout for connection establishment
	#[arg(long = "connect-timeout", default_value = "1s")]
	pub connect_timeout: String,

	/// Overall timeout for a single request
	#[arg(long = "request-timeout", default_value = "5s")]
	pub request_timeout: String,

	/// HTTP method for DoH requests: get or post
	#[arg(long = "doh-method", default_value = "post")]
	pub doh_method: String,

	/// HTTP protocol version for DoH requests: 1.1, 2 or 3
	#[arg(long = "doh-protocol", default_value = "1.1")]
	pub doh_protocol: String,

	/// Disable server TLS certificate validation (DoT, DoQ, DoH)
	#[arg(long = "insecure")]
	pub insecure: bool,

	/// Delay between requests: constant ("2s") or random interval ("1s-2s")
	#[arg(long = "request-delay")]
	pub request_delay: Option<String>,

	/// Log every request to the request log file
	#[arg(long = "request-log")]
	pub request_log: bool,

	/// Path of the request log file (default requests.log)
	#[arg(long = "request-log-path")]
	pub request_log_path: Option<String>,

	/// Give each worker its own connection instead of sharing one
	#[arg(long = "separate-worker-connections")]
	pub separate_worker_connections: bool,

	/// Expose Prometheus metrics on the given address, e.g. 127.0.0.1:8080
	#[arg(long = "prometheus")]
	pub prometheus: Option<String>,

	/// Write the latency distribution to a CSV file
	#[arg(long = "csv")]
	pub csv: Option<String>,

	/// Upper latency bound of the report histogram (default --request-timeout)
	#[arg(long = "hist-max")]
	pub hist_max: Option<String>,

	/// Disable the progress bar
	#[arg(long = "no-progress")]
	pub no_progress: bool,

	/// Suppress all standard output
	#[arg(long = "silent")]
	pub silent: bool,

	/// Seed for per-worker randomness, making probability and delay draws reproducible
	#[arg(long = "seed")]
	pub seed: Option<u64>,
}
