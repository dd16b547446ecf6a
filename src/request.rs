use hickory_proto::op::{Edns, Message, Query};
use hickory_proto::rr::rdata::opt::EdnsOption;
use hickory_proto::rr::{Name, RecordType};
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::{BenchmarkConfig, Protocol, DEFAULT_EDNS0_BUFFER_SIZE};

/// Build one DNS query message for the given question and type.
///
/// The message carries a random 16-bit ID, except over QUIC where the ID is
/// fixed to 0 as required by RFC 9250. An EDNS0 OPT record is attached when
/// a buffer size, an EDNS option or the DO bit is configured.
pub fn build(name: &Name, qtype: RecordType, cfg: &BenchmarkConfig, rng: &mut StdRng) -> Message {
	let mut msg = Message::new();
	msg.set_recursion_desired(cfg.recurse);
	msg.add_query(Query::query(name.clone(), qtype));

	if cfg.protocol == Protocol::Doq {
		msg.set_id(0);
	} else {
		msg.set_id(rng.gen::<u16>());
	}

	if cfg.edns0 > 0 {
		let mut edns = Edns::new();
		edns.set_max_payload(cfg.edns0);
		*msg.extensions_mut() = Some(edns);
	}
	if let Some((code, data)) = &cfg.edns_opt_parsed {
		let edns = msg.extensions_mut().get_or_insert_with(default_edns);
		edns.options_mut().insert(EdnsOption::Unknown(*code, data.clone()));
	}
	if cfg.dnssec {
		let edns = msg.extensions_mut().get_or_insert_with(default_edns);
		edns.set_dnssec_ok(true);
	}

	msg
}

fn default_edns() -> Edns {
	let mut edns = Edns::new();
	edns.set_max_payload(DEFAULT_EDNS0_BUFFER_SIZE);
	edns
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cli::Cli;
	use clap::Parser;
	use hickory_proto::rr::rdata::opt::EdnsCode;
	use rand::SeedableRng;

	fn config_from(args: &[&str]) -> BenchmarkConfig {
		let mut full = vec!["dns-loadgen"];
		full.extend_from_slice(args);
		let cli = Cli::parse_from(full);
		BenchmarkConfig::from_cli(&cli).unwrap().normalize().unwrap()
	}

	fn name() -> Name {
		Name::from_ascii("example.com.").unwrap()
	}

	#[test]
	fn test_basic_request() {
		let cfg = config_from(&["example.com", "-r"]);
		let mut rng = StdRng::seed_from_u64(1);
		let msg = build(&name(), RecordType::A, &cfg, &mut rng);

		assert!(msg.recursion_desired());
		assert_eq!(msg.queries().len(), 1);
		assert_eq!(msg.queries()[0].query_type(), RecordType::A);
		assert!(msg.extensions().is_none());
	}

	#[test]
	fn test_quic_request_id_is_zero() {
		let cfg = config_from(&["example.com", "-s", "quic://dns.adguard.com"]);
		let mut rng = StdRng::seed_from_u64(1);
		for _ in 0..32 {
			let msg = build(&name(), RecordType::A, &cfg, &mut rng);
			assert_eq!(msg.id(), 0);
		}
	}

	#[test]
	fn test_request_ids_vary() {
		let cfg = config_from(&["example.com"]);
		let mut rng = StdRng::seed_from_u64(1);
		let ids: std::collections::HashSet<u16> =
			(0..64).map(|_| build(&name(), RecordType::A, &cfg, &mut rng).id()).collect();
		// 64 draws from a 16-bit space should essentially never all collide
		assert!(ids.len() > 32);
	}

	#[test]
	fn test_edns0_buffer_size() {
		let cfg = config_from(&["example.com", "--edns0", "4096"]);
		let mut rng = StdRng::seed_from_u64(1);
		let msg = build(&name(), RecordType::A, &cfg, &mut rng);

		let edns = msg.extensions().as_ref().unwrap();
		assert_eq!(edns.max_payload(), 4096);
		assert!(!edns.dnssec_ok());
	}

	#[test]
	fn test_dnssec_adds_default_opt() {
		// DO bit requested without --edns0 creates an OPT with the default size
		let cfg = config_from(&["example.com", "--dnssec"]);
		let mut rng = StdRng::seed_from_u64(1);
		let msg = build(&name(), RecordType::A, &cfg, &mut rng);

		let edns = msg.extensions().as_ref().unwrap();
		assert_eq!(edns.max_payload(), DEFAULT_EDNS0_BUFFER_SIZE);
		assert!(edns.dnssec_ok());
	}

	#[test]
	fn test_edns_option_with_dnssec() {
		let cfg = config_from(&["example.com", "--ednsopt", "65001:DEADBEEF", "--dnssec"]);
		let mut rng = StdRng::seed_from_u64(1);
		let msg = build(&name(), RecordType::A, &cfg, &mut rng);

		let edns = msg.extensions().as_ref().unwrap();
		assert_eq!(edns.max_payload(), DEFAULT_EDNS0_BUFFER_SIZE);
		assert!(edns.dnssec_ok());
		match edns.options().get(EdnsCode::Unknown(65001)) {
			Some(EdnsOption::Unknown(code, data)) => {
				assert_eq!(*code, 65001);
				assert_eq!(data, &vec![0xde, 0xad, 0xbe, 0xef]);
			}
			other => panic!("unexpected EDNS option: {:?}", other),
		}
	}

	#[test]
	fn test_explicit_edns0_kept_with_option() {
		let cfg = config_from(&["example.com", "--edns0", "512", "--ednsopt", "10:0102"]);
		let mut rng = StdRng::seed_from_u64(1);
		let msg = build(&name(), RecordType::A, &cfg, &mut rng);

		let edns = msg.extensions().as_ref().unwrap();
		assert_eq!(edns.max_payload(), 512);
		assert!(edns.options().get(EdnsCode::Unknown(10)).is_some());
	}

	#[test]
	fn test_request_serializes() {
		let cfg = config_from(&["example.com", "--dnssec", "--edns0", "1232"]);
		let mut rng = StdRng::seed_from_u64(1);
		let msg = build(&name(), RecordType::AAAA, &cfg, &mut rng);
		let bytes = msg.to_vec().unwrap();
		assert!(bytes.len() > 12);
	}
}
