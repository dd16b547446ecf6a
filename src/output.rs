use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hdrhistogram::Histogram;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;

use crate::config::BenchmarkConfig;
use crate::sink::ResultSink;

/// Results of all workers merged into one view.
pub struct Summary {
	pub total: u64,
	pub errors: u64,
	pub codes: HashMap<ResponseCode, u64>,
	pub qtypes: HashMap<RecordType, u64>,
	pub latencies: Histogram<u64>,
}

impl Summary {
	pub fn merge(sinks: &[ResultSink], hist_max: Duration) -> Self {
		let high = (hist_max.as_micros() as u64).max(2);
		let mut latencies = Histogram::new_with_bounds(1, high, 3)
			.unwrap_or_else(|_| Histogram::new(3).unwrap_or_else(|_| unreachable!()));

		let mut total = 0;
		let mut errors = 0;
		let mut codes: HashMap<ResponseCode, u64> = HashMap::new();
		let mut qtypes: HashMap<RecordType, u64> = HashMap::new();
		for sink in sinks {
			total += sink.total;
			errors += sink.errors;
			for (code, count) in &sink.codes {
				*codes.entry(*code).or_default() += count;
			}
			for (qtype, count) in &sink.qtypes {
				*qtypes.entry(*qtype).or_default() += count;
			}
			if let Err(e) = latencies.add(&sink.latencies) {
				tracing::warn!(error = %e, "failed to merge a worker histogram");
			}
		}

		Self { total, errors, codes, qtypes, latencies }
	}

	fn quantile_ms(&self, q: f64) -> f64 {
		self.latencies.value_at_quantile(q) as f64 / 1000.0
	}
}

/// Print the benchmark report to stdout.
pub fn print_report(cfg: &BenchmarkConfig, sinks: &[ResultSink], elapsed: Duration) {
	let summary = Summary::merge(sinks, cfg.hist_max());

	println!();
	println!("Benchmark Results");
	println!("=================");
	println!("Workers:         {}", sinks.len());
	println!("Total requests:  {}", summary.total);
	println!("Errors:          {}", summary.errors);
	if elapsed > Duration::ZERO {
		println!("Queries/sec:     {:.1}", summary.total as f64 / elapsed.as_secs_f64());
	}
	println!("Elapsed:         {:.2}s", elapsed.as_secs_f64());

	if summary.total == 0 {
		println!("\nNo queries were recorded.");
		return;
	}

	let mut latency = Table::new();
	latency.load_preset(UTF8_FULL);
	latency.set_content_arrangement(ContentArrangement::Dynamic);
	latency.set_header(vec!["min", "mean", "p50", "p95", "p99", "max"]);
	latency.add_row(vec![
		format!("{:.2} ms", summary.latencies.min() as f64 / 1000.0),
		format!("{:.2} ms", summary.latencies.mean() / 1000.0),
		format!("{:.2} ms", summary.quantile_ms(0.50)),
		format!("{:.2} ms", summary.quantile_ms(0.95)),
		format!("{:.2} ms", summary.quantile_ms(0.99)),
		format!("{:.2} ms", summary.latencies.max() as f64 / 1000.0),
	]);
	println!("\nLatency");
	println!("{latency}");

	if !summary.codes.is_empty() {
		let mut rows: Vec<(&ResponseCode, &u64)> = summary.codes.iter().collect();
		rows.sort_by(|a, b| b.1.cmp(a.1));

		let mut table = Table::new();
		table.load_preset(UTF8_FULL);
		table.set_content_arrangement(ContentArrangement::Dynamic);
		table.set_header(vec!["Response code", "Count", "Share"]);
		for (code, count) in rows {
			table.add_row(vec![
				code.to_string(),
				count.to_string(),
				format!("{:.1}%", *count as f64 / summary.total as f64 * 100.0),
			]);
		}
		println!("\nResponse codes");
		println!("{table}");
	}

	if !summary.qtypes.is_empty() {
		let mut rows: Vec<(&RecordType, &u64)> = summary.qtypes.iter().collect();
		rows.sort_by(|a, b| b.1.cmp(a.1));

		let mut table = Table::new();
		table.load_preset(UTF8_FULL);
		table.set_content_arrangement(ContentArrangement::Dynamic);
		table.set_header(vec!["Query type", "Count"]);
		for (qtype, count) in rows {
			table.add_row(vec![qtype.to_string(), count.to_string()]);
		}
		println!("\nQuery types");
		println!("{table}");
	}
}

/// Write the merged latency distribution to a CSV file.
pub fn write_csv(path: &str, cfg: &BenchmarkConfig, sinks: &[ResultSink]) -> Result<()> {
	let summary = Summary::merge(sinks, cfg.hist_max());

	let mut writer = csv::Writer::from_path(path)
		.map_err(|e| anyhow!("failed to open CSV file '{}': {}", path, e))?;
	writer.write_record(["latency_ms", "count"])?;
	for value in summary.latencies.iter_recorded() {
		writer.write_record([
			format!("{:.3}", value.value_iterated_to() as f64 / 1000.0),
			value.count_at_value().to_string(),
		])?;
	}
	writer.flush()?;
	println!("\nLatency distribution written to: {}", path);
	Ok(())
}
