use std::collections::HashMap;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;

/// Per-worker accumulator of query outcomes.
///
/// Owned and written by exactly one worker, handed back to the
/// orchestrator when the worker finishes.
pub struct ResultSink {
	/// Total recorded queries.
	pub total: u64,
	/// Queries that ended in a transport error or timeout.
	pub errors: u64,
	/// Response counts per RCODE.
	pub codes: HashMap<ResponseCode, u64>,
	/// Issued query counts per question type.
	pub qtypes: HashMap<RecordType, u64>,
	/// Latency distribution in microseconds.
	pub latencies: Histogram<u64>,
	/// Start of the first recorded query.
	pub first_start: Option<Instant>,
	/// End of the last recorded query.
	pub last_end: Option<Instant>,
}

impl ResultSink {
	pub fn new(hist_max: Duration) -> Self {
		let high = (hist_max.as_micros() as u64).max(2);
		// 3 significant digits keeps the histogram compact and is plenty
		// for latency reporting
		let latencies = Histogram::new_with_bounds(1, high, 3)
			.unwrap_or_else(|_| Histogram::new(3).unwrap_or_else(|_| unreachable!()));
		Self {
			total: 0,
			errors: 0,
			codes: HashMap::new(),
			qtypes: HashMap::new(),
			latencies,
			first_start: None,
			last_end: None,
		}
	}

	/// Record one completed query.
	pub fn record(
		&mut self,
		req: &Message,
		resp: Option<&Message>,
		err: Option<&anyhow::Error>,
		start: Instant,
		duration: Duration,
	) {
		self.total += 1;
		if err.is_some() {
			self.errors += 1;
		}
		if let Some(resp) = resp {
			*self.codes.entry(resp.response_code()).or_default() += 1;
		}
		if let Some(q) = req.queries().first() {
			*self.qtypes.entry(q.query_type()).or_default() += 1;
		}
		self.latencies.saturating_record((duration.as_micros() as u64).max(1));

		if self.first_start.is_none() {
			self.first_start = Some(start);
		}
		let end = start + duration;
		if self.last_end.map_or(true, |prev| end > prev) {
			self.last_end = Some(end);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::anyhow;
	use hickory_proto::op::{MessageType, Query};
	use hickory_proto::rr::Name;

	fn request(qtype: RecordType) -> Message {
		let mut msg = Message::new();
		msg.set_id(7);
		msg.add_query(Query::query(Name::from_ascii("example.com.").unwrap(), qtype));
		msg
	}

	fn response(code: ResponseCode) -> Message {
		let mut msg = request(RecordType::A);
		msg.set_message_type(MessageType::Response);
		msg.set_response_code(code);
		msg
	}

	#[test]
	fn test_record_success() {
		let mut sink = ResultSink::new(Duration::from_secs(5));
		let req = request(RecordType::A);
		let resp = response(ResponseCode::NoError);

		sink.record(&req, Some(&resp), None, Instant::now(), Duration::from_millis(12));

		assert_eq!(sink.total, 1);
		assert_eq!(sink.errors, 0);
		assert_eq!(sink.codes.get(&ResponseCode::NoError), Some(&1));
		assert_eq!(sink.qtypes.get(&RecordType::A), Some(&1));
		assert_eq!(sink.latencies.len(), 1);
	}

	#[test]
	fn test_record_error() {
		let mut sink = ResultSink::new(Duration::from_secs(5));
		let req = request(RecordType::AAAA);
		let err = anyhow!("timed out");

		sink.record(&req, None, Some(&err), Instant::now(), Duration::from_secs(5));

		assert_eq!(sink.total, 1);
		assert_eq!(sink.errors, 1);
		assert!(sink.codes.is_empty());
		assert_eq!(sink.qtypes.get(&RecordType::AAAA), Some(&1));
	}

	#[test]
	fn test_rcode_distribution() {
		let mut sink = ResultSink::new(Duration::from_secs(5));
		let req = request(RecordType::A);
		for code in [ResponseCode::NoError, ResponseCode::NoError, ResponseCode::NXDomain] {
			let resp = response(code);
			sink.record(&req, Some(&resp), None, Instant::now(), Duration::from_millis(1));
		}

		assert_eq!(sink.codes.get(&ResponseCode::NoError), Some(&2));
		assert_eq!(sink.codes.get(&ResponseCode::NXDomain), Some(&1));
	}

	#[test]
	fn test_latency_saturates_at_bound() {
		let mut sink = ResultSink::new(Duration::from_millis(10));
		let req = request(RecordType::A);
		// way beyond the histogram bound, must clamp instead of panic
		sink.record(&req, None, None, Instant::now(), Duration::from_secs(60));
		assert_eq!(sink.latencies.len(), 1);
	}

	#[test]
	fn test_span_tracking() {
		let mut sink = ResultSink::new(Duration::from_secs(5));
		let req = request(RecordType::A);
		let start = Instant::now();

		sink.record(&req, None, None, start, Duration::from_millis(5));
		sink.record(&req, None, None, start + Duration::from_millis(10), Duration::from_millis(5));

		assert_eq!(sink.first_start, Some(start));
		assert_eq!(sink.last_end, Some(start + Duration::from_millis(15)));
	}
}
