use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use hickory_proto::rr::RecordType;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::cli::Cli;

/// Default EDNS0 buffer size according to http://www.dnsflagday.net/2020/
pub const DEFAULT_EDNS0_BUFFER_SIZE: u16 = 1232;

/// Default path of the request log file.
pub const DEFAULT_REQUEST_LOG_PATH: &str = "requests.log";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Wire protocol used to reach the benchmarked server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
	Udp,
	Tcp,
	Dot,
	Doq,
	Doh,
}

/// HTTP method used for DNS-over-HTTPS requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DohMethod {
	Get,
	Post,
}

/// HTTP protocol version used for DNS-over-HTTPS requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
	Http1,
	Http2,
	Http3,
}

/// Delay applied between consecutive requests of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDelay {
	#[default]
	None,
	Constant(Duration),
	/// Uniformly random delay from [start, end).
	Uniform(Duration, Duration),
}

/// Benchmark settings, immutable once validated by [`BenchmarkConfig::normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
	/// Server address. For plain DNS and DoT `<host>[:port]`, for DoH a URL,
	/// for DoQ `quic://<host>[:port]` before normalization.
	pub server: String,
	pub protocol: Protocol,
	pub doh_method: DohMethod,
	pub doh_protocol: HttpVersion,

	/// DNS RR types each question is fired with, in order.
	pub types: Vec<RecordType>,
	/// Domains and data sources (literals, @file paths, HTTP URLs).
	pub queries: Vec<String>,

	/// Number of passes over the question list per worker; 0 means unset.
	pub count: u64,
	/// Wall-clock cap for the whole run, exclusive with `count`.
	pub duration: Option<Duration>,
	/// Number of concurrent workers.
	pub concurrency: u32,

	/// Global queries-per-second limit shared by all workers; 0 disables.
	pub rate_limit: u32,
	/// Per-worker queries-per-second limit; 0 disables.
	pub rate_limit_worker: u32,

	/// Queries sent on one connection before it is closed and reopened;
	/// 0 reuses the connection indefinitely. UDP/TCP/DoT only.
	pub queries_per_conn: u64,

	pub recurse: bool,
	/// Chance for each question to be used, 1.0 uses everything.
	pub probability: f64,

	/// EDNS0 buffer size; 0 disables EDNS0.
	pub edns0: u16,
	/// Raw `code:hexdata` EDNS option specification.
	pub edns_opt: Option<String>,
	/// Parsed form of `edns_opt`, filled by `normalize`.
	pub edns_opt_parsed: Option<(u16, Vec<u8>)>,
	pub dnssec: bool,

	pub write_timeout: Duration,
	pub read_timeout: Duration,
	pub connect_timeout: Duration,
	pub request_timeout: Duration,

	/// Upper latency bound of the report histogram, defaults to `request_timeout`.
	pub hist_max: Option<Duration>,

	/// Raw request delay specification, e.g. "2s" or "1s-2s".
	pub request_delay: String,
	/// Parsed form of `request_delay`, filled by `normalize`.
	pub delay: RequestDelay,

	pub separate_worker_connections: bool,
	/// Disable TLS certificate verification for DoT, DoQ and DoH.
	pub insecure: bool,

	pub request_log_enabled: bool,
	pub request_log_path: String,

	/// Address of the Prometheus metrics endpoint, if enabled.
	pub prometheus_addr: Option<String>,
	/// Path of the latency distribution CSV export, if enabled.
	pub csv: Option<String>,

	/// Base seed for per-worker PRNGs; random runs when unset.
	pub seed: Option<u64>,

	pub silent: bool,
	pub progress_bar: bool,
}

impl BenchmarkConfig {
	/// Build an un-normalized config from parsed command line flags.
	pub fn from_cli(cli: &Cli) -> Result<Self> {
		let mut types = Vec::new();
		for t in &cli.types {
			let rt = RecordType::from_str(&t.to_uppercase())
				.map_err(|_| anyhow!("--type '{}' is not a known DNS type", t))?;
			types.push(rt);
		}

		let doh_method = match cli.doh_method.to_lowercase().as_str() {
			"get" => DohMethod::Get,
			"post" => DohMethod::Post,
			other => bail!("--doh-method '{}' is not supported, use get or post", other),
		};
		let doh_protocol = match cli.doh_protocol.as_str() {
			"1.1" => HttpVersion::Http1,
			"2" => HttpVersion::Http2,
			"3" => HttpVersion::Http3,
			other => bail!("--doh-protocol '{}' is not supported, use 1.1, 2 or 3", other),
		};

		let duration = match &cli.duration {
			Some(raw) => Some(parse_duration(raw).map_err(|e| anyhow!("--duration: {}", e))?),
			None => None,
		};
		let hist_max = match &cli.hist_max {
			Some(raw) => Some(parse_duration(raw).map_err(|e| anyhow!("--hist-max: {}", e))?),
			None => None,
		};

		let protocol = if cli.dot {
			Protocol::Dot
		} else if cli.tcp {
			Protocol::Tcp
		} else {
			Protocol::Udp
		};

		Ok(Self {
			server: cli.server.clone(),
			protocol,
			doh_method,
			doh_protocol,
			types,
			queries: cli.queries.clone(),
			count: cli.number.unwrap_or(0),
			duration,
			concurrency: cli.concurrency,
			rate_limit: cli.rate_limit,
			rate_limit_worker: cli.rate_limit_worker,
			queries_per_conn: cli.queries_per_conn,
			recurse: cli.recurse,
			probability: cli.probability,
			edns0: cli.edns0,
			edns_opt: cli.ednsopt.clone(),
			edns_opt_parsed: None,
			dnssec: cli.dnssec,
			write_timeout: parse_duration(&cli.write_timeout)
				.map_err(|e| anyhow!("--write-timeout: {}", e))?,
			read_timeout: parse_duration(&cli.read_timeout)
				.map_err(|e| anyhow!("--read-timeout: {}", e))?,
			connect_timeout: parse_duration(&cli.connect_timeout)
				.map_err(|e| anyhow!("--connect-timeout: {}", e))?,
			request_timeout: parse_duration(&cli.request_timeout)
				.map_err(|e| anyhow!("--request-timeout: {}", e))?,
			hist_max,
			request_delay: cli.request_delay.clone().unwrap_or_default(),
			delay: RequestDelay::None,
			separate_worker_connections: cli.separate_worker_connections,
			insecure: cli.insecure,
			request_log_enabled: cli.request_log,
			request_log_path: cli.request_log_path.clone().unwrap_or_default(),
			prometheus_addr: cli.prometheus.clone(),
			csv: cli.csv.clone(),
			seed: cli.seed,
			silent: cli.silent,
			progress_bar: !cli.no_progress,
		})
	}

	/// Validate the settings and fill in derived fields and defaults.
	///
	/// Errors name the offending flag. The operation is idempotent, running
	/// it on an already normalized config is a no-op.
	pub fn normalize(mut self) -> Result<Self> {
		if self.server.is_empty() {
			bail!("--server must not be empty");
		}

		if let Some(stripped) = self.server.strip_prefix("quic://") {
			self.server = stripped.to_string();
			self.protocol = Protocol::Doq;
		}
		if self.server.starts_with("http://") || self.server.starts_with("https://") {
			self.protocol = Protocol::Doh;
		}

		if self.protocol == Protocol::Doh {
			let mut url = reqwest::Url::parse(&self.server)
				.map_err(|e| anyhow!("--server '{}' is not a valid URL: {}", self.server, e))?;
			if url.path().is_empty() || url.path() == "/" {
				url.set_path("/dns-query");
				self.server = url.to_string();
			}
		} else {
			let (host, port) = split_host_port(&self.server);
			if port.is_none() {
				let default_port = match self.protocol {
					// https://www.rfc-editor.org/rfc/rfc7858 and rfc9250
					Protocol::Dot | Protocol::Doq => 853,
					_ => 53,
				};
				self.server = join_host_port(&host, default_port);
			}
		}

		if self.count == 0 && self.duration.is_none() {
			self.count = 1;
		}
		if self.duration.is_some() && self.count > 0 {
			bail!("--number and --duration are specified at once, only one can be used");
		}

		if self.hist_max.is_none() {
			self.hist_max = Some(self.request_timeout);
		}

		if self.edns0 != 0 && !(512..=4096).contains(&self.edns0) {
			bail!("--edns0 must have value between 512 and 4096");
		}

		if let Some(spec) = &self.edns_opt {
			self.edns_opt_parsed = Some(parse_edns_opt(spec)?);
		}

		if self.request_log_enabled && self.request_log_path.is_empty() {
			self.request_log_path = DEFAULT_REQUEST_LOG_PATH.to_string();
		}

		self.delay = parse_request_delay(&self.request_delay)?;

		if self.types.is_empty() {
			self.types = vec![RecordType::A];
		}

		if self.probability <= 0.0 {
			tracing::warn!(
				probability = self.probability,
				"probability is not positive, no queries will be issued"
			);
		}

		Ok(self)
	}

	/// Upper latency bound of the report histogram.
	pub fn hist_max(&self) -> Duration {
		self.hist_max.unwrap_or(self.request_timeout)
	}

	/// Host portion of the server address, used for SNI and QUIC server names.
	pub fn host(&self) -> String {
		if self.protocol == Protocol::Doh {
			return reqwest::Url::parse(&self.server)
				.ok()
				.and_then(|u| u.host_str().map(str::to_string))
				.unwrap_or_default();
		}
		split_host_port(&self.server).0
	}

	/// Human readable transport description for the startup banner.
	pub fn network_label(&self) -> String {
		match self.protocol {
			Protocol::Udp => "udp".to_string(),
			Protocol::Tcp => "tcp".to_string(),
			Protocol::Dot => "tcp-tls".to_string(),
			Protocol::Doq => "quic".to_string(),
			Protocol::Doh => {
				let scheme = if self.server.starts_with("http://") { "http" } else { "https" };
				let version = match self.doh_protocol {
					HttpVersion::Http1 => "1.1",
					HttpVersion::Http2 => "2",
					HttpVersion::Http3 => "3",
				};
				let method = match self.doh_method {
					DohMethod::Get => "GET",
					DohMethod::Post => "POST",
				};
				format!("{}/{} ({})", scheme, version, method)
			}
		}
	}
}

/// Split `<host>[:port]` into host and optional port, handling bracketed and
/// bare IPv6 addresses.
pub fn split_host_port(server: &str) -> (String, Option<u16>) {
	if let Some(rest) = server.strip_prefix('[') {
		if let Some((host, tail)) = rest.split_once(']') {
			let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
			return (host.to_string(), port);
		}
	}
	if server.matches(':').count() > 1 {
		// bare IPv6 address without port
		return (server.to_string(), None);
	}
	match server.rsplit_once(':') {
		Some((host, port)) => match port.parse() {
			Ok(p) => (host.to_string(), Some(p)),
			Err(_) => (server.to_string(), None),
		},
		None => (server.to_string(), None),
	}
}

fn join_host_port(host: &str, port: u16) -> String {
	if host.contains(':') {
		format!("[{}]:{}", host, port)
	} else {
		format!("{}:{}", host, port)
	}
}

/// Parse an EDNS option in `<decimal code>:<hex data>` format.
fn parse_edns_opt(spec: &str) -> Result<(u16, Vec<u8>)> {
	let parts: Vec<&str> = spec.split(':').collect();
	if parts.len() != 2 {
		bail!("--ednsopt is not in correct format, expected code:hexdata");
	}
	let code: u16 = parts[0]
		.parse()
		.map_err(|_| anyhow!("--ednsopt is not in correct format, code is not a decimal number"))?;
	let data = parse_hex(parts[1])
		.ok_or_else(|| anyhow!("--ednsopt is not in correct format, data is not a hexadecimal string"))?;
	Ok((code, data))
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
	if s.len() % 2 != 0 {
		return None;
	}
	(0..s.len())
		.step_by(2)
		.map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
		.collect()
}

static DELAY_RE: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"^(\d+(?:ns|ms|[smhdw]))(?:-(\d+(?:ns|ms|[smhdw])))?$").unwrap()
});

/// Parse a single duration with an `ns|ms|s|m|h|d|w` suffix, e.g. "500ms".
pub fn parse_duration(s: &str) -> Result<Duration> {
	let digits_end = s
		.find(|c: char| !c.is_ascii_digit())
		.ok_or_else(|| anyhow!("'{}' is missing a duration unit", s))?;
	let (digits, suffix) = s.split_at(digits_end);
	let value: u64 = digits
		.parse()
		.map_err(|_| anyhow!("'{}' is not a valid duration", s))?;
	let duration = match suffix {
		"ns" => Duration::from_nanos(value),
		"ms" => Duration::from_millis(value),
		"s" => Duration::from_secs(value),
		"m" => Duration::from_secs(value * 60),
		"h" => Duration::from_secs(value * 3600),
		"d" => Duration::from_secs(value * 86400),
		"w" => Duration::from_secs(value * 604800),
		_ => bail!("'{}' has an unknown duration unit '{}'", s, suffix),
	};
	Ok(duration)
}

/// Parse the request delay grammar: either a single duration ("2s") or an
/// interval ("1s-2s") drawn uniformly per request.
pub fn parse_request_delay(raw: &str) -> Result<RequestDelay> {
	if raw.is_empty() {
		return Ok(RequestDelay::None);
	}
	let caps = DELAY_RE.captures(raw).ok_or_else(|| {
		anyhow!(
			"--request-delay '{}' has unexpected format, either <duration> or <duration>-<duration> is expected",
			raw
		)
	})?;
	let start = parse_duration(&caps[1])?;
	match caps.get(2) {
		Some(end) => {
			let end = parse_duration(end.as_str())?;
			if end <= start {
				bail!(
					"--request-delay '{}' is an invalid interval, start should be strictly less than end",
					raw
				);
			}
			Ok(RequestDelay::Uniform(start, end))
		}
		None if start.is_zero() => Ok(RequestDelay::None),
		None => Ok(RequestDelay::Constant(start)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	fn config_from(args: &[&str]) -> BenchmarkConfig {
		let mut full = vec!["dns-loadgen"];
		full.extend_from_slice(args);
		let cli = Cli::parse_from(full);
		BenchmarkConfig::from_cli(&cli).unwrap()
	}

	#[test]
	fn test_udp_default_port() {
		let cfg = config_from(&["example.com", "-s", "8.8.8.8"]).normalize().unwrap();
		assert_eq!(cfg.server, "8.8.8.8:53");
		assert_eq!(cfg.protocol, Protocol::Udp);
	}

	#[test]
	fn test_explicit_port_unchanged() {
		let cfg = config_from(&["example.com", "-s", "8.8.8.8:1234"]).normalize().unwrap();
		assert_eq!(cfg.server, "8.8.8.8:1234");
	}

	#[test]
	fn test_dot_default_port() {
		let cfg = config_from(&["example.com", "-s", "1.1.1.1", "--dot"]).normalize().unwrap();
		assert_eq!(cfg.server, "1.1.1.1:853");
		assert_eq!(cfg.protocol, Protocol::Dot);
	}

	#[test]
	fn test_quic_prefix_stripped() {
		let cfg = config_from(&["example.com", "-s", "quic://dns.adguard.com"])
			.normalize()
			.unwrap();
		assert_eq!(cfg.server, "dns.adguard.com:853");
		assert_eq!(cfg.protocol, Protocol::Doq);
	}

	#[test]
	fn test_doh_default_path() {
		let cfg = config_from(&["example.com", "-s", "https://dns.google"]).normalize().unwrap();
		assert_eq!(cfg.server, "https://dns.google/dns-query");
		assert_eq!(cfg.protocol, Protocol::Doh);
	}

	#[test]
	fn test_doh_explicit_path_kept() {
		let cfg = config_from(&["example.com", "-s", "https://dns.google/resolve"])
			.normalize()
			.unwrap();
		assert_eq!(cfg.server, "https://dns.google/resolve");
	}

	#[test]
	fn test_ipv6_default_port() {
		let cfg = config_from(&["example.com", "-s", "2606:4700::1111"]).normalize().unwrap();
		assert_eq!(cfg.server, "[2606:4700::1111]:53");
	}

	#[test]
	fn test_normalize_is_idempotent() {
		let once = config_from(&["example.com", "-s", "quic://dns.adguard.com", "--request-delay", "1s-2s"])
			.normalize()
			.unwrap();
		let twice = once.clone().normalize().unwrap();
		assert_eq!(once, twice);
	}

	#[test]
	fn test_count_defaults_to_one() {
		let cfg = config_from(&["example.com"]).normalize().unwrap();
		assert_eq!(cfg.count, 1);
	}

	#[test]
	fn test_count_and_duration_conflict() {
		let err = config_from(&["example.com", "-n", "10", "-d", "10s"])
			.normalize()
			.unwrap_err();
		assert!(err.to_string().contains("--number and --duration"));
	}

	#[test]
	fn test_duration_only_leaves_count_zero() {
		let cfg = config_from(&["example.com", "-d", "10s"]).normalize().unwrap();
		assert_eq!(cfg.count, 0);
		assert_eq!(cfg.duration, Some(Duration::from_secs(10)));
	}

	#[test]
	fn test_edns0_out_of_range() {
		let err = config_from(&["example.com", "--edns0", "100"]).normalize().unwrap_err();
		assert!(err.to_string().contains("--edns0"));
	}

	#[test]
	fn test_edns0_valid() {
		let cfg = config_from(&["example.com", "--edns0", "1232"]).normalize().unwrap();
		assert_eq!(cfg.edns0, 1232);
	}

	#[test]
	fn test_ednsopt_parsed() {
		let cfg = config_from(&["example.com", "--ednsopt", "65001:DEADBEEF"])
			.normalize()
			.unwrap();
		assert_eq!(cfg.edns_opt_parsed, Some((65001, vec![0xde, 0xad, 0xbe, 0xef])));
	}

	#[test]
	fn test_ednsopt_bad_hex() {
		let err = config_from(&["example.com", "--ednsopt", "65001:XYZ"])
			.normalize()
			.unwrap_err();
		assert!(err.to_string().contains("hexadecimal"));
	}

	#[test]
	fn test_ednsopt_missing_data() {
		let err = config_from(&["example.com", "--ednsopt", "65001"]).normalize().unwrap_err();
		assert!(err.to_string().contains("--ednsopt"));
	}

	#[test]
	fn test_hist_max_defaults_to_request_timeout() {
		let cfg = config_from(&["example.com"]).normalize().unwrap();
		assert_eq!(cfg.hist_max(), cfg.request_timeout);
	}

	#[test]
	fn test_parse_duration_units() {
		assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
		assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
		assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
		assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
		assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
		assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604800));
		assert!(parse_duration("abc").is_err());
	}

	#[test]
	fn test_delay_constant() {
		assert_eq!(
			parse_request_delay("500ms").unwrap(),
			RequestDelay::Constant(Duration::from_millis(500))
		);
	}

	#[test]
	fn test_delay_interval() {
		assert_eq!(
			parse_request_delay("1s-2s").unwrap(),
			RequestDelay::Uniform(Duration::from_secs(1), Duration::from_secs(2))
		);
	}

	#[test]
	fn test_delay_inverted_interval() {
		assert!(parse_request_delay("2s-1s").is_err());
	}

	#[test]
	fn test_delay_garbage() {
		assert!(parse_request_delay("fast").is_err());
	}

	#[test]
	fn test_delay_empty_is_none() {
		assert_eq!(parse_request_delay("").unwrap(), RequestDelay::None);
	}

	#[test]
	fn test_unknown_type_rejected() {
		let cli = Cli::parse_from(["dns-loadgen", "example.com", "-t", "BOGUS"]);
		assert!(BenchmarkConfig::from_cli(&cli).is_err());
	}

	#[test]
	fn test_split_host_port_variants() {
		assert_eq!(split_host_port("8.8.8.8"), ("8.8.8.8".to_string(), None));
		assert_eq!(split_host_port("8.8.8.8:53"), ("8.8.8.8".to_string(), Some(53)));
		assert_eq!(split_host_port("::1"), ("::1".to_string(), None));
		assert_eq!(split_host_port("[::1]:853"), ("::1".to_string(), Some(853)));
	}

	#[test]
	fn test_network_label() {
		let cfg = config_from(&["example.com", "-s", "https://dns.google", "--doh-protocol", "2"])
			.normalize()
			.unwrap();
		assert_eq!(cfg.network_label(), "https/2 (POST)");
	}
}
