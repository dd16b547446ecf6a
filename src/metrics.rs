use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::routing::get;
use axum::Router;
use hickory_proto::op::Message;
use prometheus::{
	Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio_util::sync::CancellationToken;

/// Prometheus taps updated once per completed query.
pub struct Metrics {
	registry: Registry,
	responses: IntCounterVec,
	errors: IntCounter,
	durations: HistogramVec,
}

impl Metrics {
	pub fn new() -> Result<Self> {
		let registry = Registry::new();

		let responses = IntCounterVec::new(
			Opts::new("dns_responses_total", "DNS responses by query type and response code"),
			&["qtype", "rcode"],
		)?;
		registry.register(Box::new(responses.clone()))?;

		let errors = IntCounter::new("dns_errors_total", "Failed DNS requests")?;
		registry.register(Box::new(errors.clone()))?;

		let durations = HistogramVec::new(
			HistogramOpts::new("dns_request_duration_seconds", "DNS request latency by query type")
				.buckets(prometheus::exponential_buckets(0.001, 2.0, 14)?),
			&["qtype"],
		)?;
		registry.register(Box::new(durations.clone()))?;

		Ok(Self { registry, responses, errors, durations })
	}

	/// Record one completed query, independently of the result sink.
	pub fn observe(
		&self,
		req: &Message,
		resp: Option<&Message>,
		err: Option<&anyhow::Error>,
		duration: Duration,
	) {
		if let Some(resp) = resp {
			let qtype = resp
				.queries()
				.first()
				.map(|q| q.query_type().to_string())
				.unwrap_or_default();
			let rcode = resp.response_code().to_string();
			self.responses.with_label_values(&[&qtype, &rcode]).inc();
		}
		if err.is_some() {
			self.errors.inc();
		}
		if let Some(q) = req.queries().first() {
			self.durations
				.with_label_values(&[&q.query_type().to_string()])
				.observe(duration.as_secs_f64());
		}
	}

	fn render(&self) -> String {
		let mut buf = Vec::new();
		let encoder = TextEncoder::new();
		if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
			tracing::warn!(error = %e, "failed to encode metrics");
		}
		String::from_utf8(buf).unwrap_or_default()
	}
}

/// Serve the metrics registry at /metrics until the run is cancelled.
///
/// Returns once the listener is bound; bind failure is an error the caller
/// reports without stopping the benchmark.
pub async fn serve(metrics: Arc<Metrics>, addr: String, cancel: CancellationToken) -> Result<()> {
	let app = Router::new().route(
		"/metrics",
		get(move || {
			let metrics = metrics.clone();
			async move { metrics.render() }
		}),
	);

	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.map_err(|e| anyhow!("failed to bind metrics endpoint at {}: {}", addr, e))?;
	tracing::info!(%addr, "serving Prometheus metrics");

	tokio::spawn(async move {
		let shutdown = async move { cancel.cancelled().await };
		if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
			tracing::warn!(error = %e, "metrics endpoint terminated");
		}
	});
	Ok(())
}
