use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use hickory_proto::op::Message;

/// Append-only log of every issued query.
///
/// Open failure before the run starts is fatal; write failures during the
/// run are logged and otherwise ignored so they never stop the benchmark.
pub struct RequestLog {
	writer: Mutex<BufWriter<File>>,
}

impl RequestLog {
	pub fn open(path: &str) -> Result<Self> {
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(path)
			.map_err(|e| anyhow!("failed to open request log '{}': {}", path, e))?;
		Ok(Self { writer: Mutex::new(BufWriter::new(file)) })
	}

	/// Write one log line for a completed query.
	pub fn log(
		&self,
		worker_id: u32,
		req: &Message,
		resp: Option<&Message>,
		err: Option<&anyhow::Error>,
		duration: Duration,
	) {
		let (qname, qtype) = match req.queries().first() {
			Some(q) => (q.name().to_string(), q.query_type().to_string()),
			None => ("-".to_string(), "-".to_string()),
		};
		let outcome = match (resp, err) {
			(Some(resp), _) => format!("rcode:{}", resp.response_code()),
			(None, Some(err)) => format!("err:{}", err),
			(None, None) => "dropped".to_string(),
		};
		let line = format!(
			"{} worker:{} reqid:{} qname:{} qtype:{} {} duration:{}ms",
			chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
			worker_id,
			req.id(),
			qname,
			qtype,
			outcome,
			duration.as_millis(),
		);

		match self.writer.lock() {
			Ok(mut writer) => {
				if let Err(e) = writeln!(writer, "{}", line) {
					tracing::warn!(error = %e, "failed to write request log line");
				}
			}
			Err(e) => tracing::warn!(error = %e, "request log writer poisoned"),
		}
	}
}

impl Drop for RequestLog {
	fn drop(&mut self) {
		if let Ok(mut writer) = self.writer.lock() {
			let _ = writer.flush();
		}
	}
}
