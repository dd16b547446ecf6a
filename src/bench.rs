use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use hickory_proto::rr::Name;
use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::config::{BenchmarkConfig, RequestDelay};
use crate::limit::RateGate;
use crate::metrics::{self, Metrics};
use crate::questions;
use crate::reqlog::RequestLog;
use crate::request;
use crate::sink::ResultSink;
use crate::transport::{QueryClient, TransportFactory};

/// Execute the benchmark and return the per-worker result sinks.
///
/// Spawns one task per worker. Each worker iterates the question list with
/// every configured type, either `count` times or until the duration cap or
/// the cancellation token stops the run. No per-request failure ever aborts
/// the benchmark.
pub async fn run(cfg: &BenchmarkConfig, cancel: CancellationToken) -> Result<Vec<ResultSink>> {
	let questions = questions::load(&cfg.queries).await?;
	let mut names = Vec::with_capacity(questions.len());
	for q in &questions {
		names.push(Name::from_ascii(q).map_err(|e| anyhow!("invalid domain name '{}': {}", q, e))?);
	}
	let names = Arc::new(names);

	let reqlog = match cfg.request_log_enabled {
		true => Some(Arc::new(RequestLog::open(&cfg.request_log_path)?)),
		false => None,
	};

	let metrics = match &cfg.prometheus_addr {
		Some(addr) => {
			let m = Arc::new(Metrics::new()?);
			// a dead metrics endpoint is not worth failing the benchmark over
			if let Err(e) = metrics::serve(m.clone(), addr.clone(), cancel.clone()).await {
				tracing::error!(error = %e, "Prometheus metrics endpoint not started");
			}
			Some(m)
		}
		None => None,
	};

	// one shared signal: external cancellation plus the duration cap
	let token = cancel.child_token();
	let deadline = cfg.duration.map(|d| Instant::now() + d);
	if let Some(d) = cfg.duration {
		let timer_token = token.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(d) => timer_token.cancel(),
				_ = timer_token.cancelled() => {}
			}
		});
	}

	let factory = TransportFactory::new(cfg)?;
	let global_gate = RateGate::new(cfg.rate_limit).map(Arc::new);

	if !cfg.silent {
		println!("Using {} hostnames", names.len());
		println!(
			"Benchmarking {} via {} with {} concurrent requests{}",
			cfg.server,
			cfg.network_label(),
			cfg.concurrency,
			limits_label(cfg),
		);
	}

	let progress = build_progress(cfg, names.len(), &token);

	let cfg = Arc::new(cfg.clone());
	let mut handles = Vec::with_capacity(cfg.concurrency as usize);
	for worker_id in 0..cfg.concurrency {
		let worker = Worker {
			id: worker_id,
			cfg: cfg.clone(),
			questions: names.clone(),
			client: factory.client()?,
			global_gate: global_gate.clone(),
			cancel: token.clone(),
			deadline,
			reqlog: reqlog.clone(),
			metrics: metrics.clone(),
			progress: progress.clone(),
		};
		handles.push(tokio::spawn(worker.run()));
	}

	let mut sinks = Vec::with_capacity(handles.len());
	for handle in handles {
		match handle.await {
			Ok(sink) => sinks.push(sink),
			Err(e) => tracing::error!(error = %e, "worker task failed"),
		}
	}

	progress.finish();
	Ok(sinks)
}

fn limits_label(cfg: &BenchmarkConfig) -> String {
	match (cfg.rate_limit, cfg.rate_limit_worker) {
		(0, 0) => String::new(),
		(global, 0) => format!(" (limited to {} QPS overall)", global),
		(0, worker) => format!(" (limited to {} QPS per worker)", worker),
		(global, worker) => {
			format!(" (limited to {} QPS overall and {} QPS per worker)", global, worker)
		}
	}
}

/// Progress indication shared by all workers.
#[derive(Clone)]
struct Progress {
	bar: Option<ProgressBar>,
	per_query: bool,
}

impl Progress {
	fn tick(&self) {
		if self.per_query {
			if let Some(bar) = &self.bar {
				bar.inc(1);
			}
		}
	}

	fn finish(&self) {
		if let Some(bar) = &self.bar {
			bar.finish();
		}
	}
}

fn build_progress(cfg: &BenchmarkConfig, question_count: usize, token: &CancellationToken) -> Progress {
	let none = Progress { bar: None, per_query: false };
	if cfg.silent || !cfg.progress_bar {
		return none;
	}

	if cfg.count > 0 {
		let repetitions = cfg.count
			* u64::from(cfg.concurrency)
			* cfg.types.len() as u64
			* question_count as u64;
		if repetitions < 100 {
			return none;
		}
		// below 1.0 probability the real repetition count is unknown, fall
		// back to an indeterminate spinner
		let bar = if cfg.probability < 1.0 {
			let bar = ProgressBar::new_spinner();
			bar.enable_steady_tick(Duration::from_millis(120));
			bar
		} else {
			ProgressBar::new(repetitions)
		};
		return Progress { bar: Some(bar), per_query: true };
	}

	if let Some(duration) = cfg.duration {
		if duration >= Duration::from_secs(10) {
			let bar = ProgressBar::new(duration.as_secs());
			let tick_bar = bar.clone();
			let token = token.clone();
			tokio::spawn(async move {
				let mut interval = tokio::time::interval(Duration::from_secs(1));
				interval.tick().await;
				loop {
					tokio::select! {
						_ = interval.tick() => tick_bar.inc(1),
						_ = token.cancelled() => break,
					}
				}
			});
			return Progress { bar: Some(bar), per_query: false };
		}
	}

	none
}

struct Worker {
	id: u32,
	cfg: Arc<BenchmarkConfig>,
	questions: Arc<Vec<Name>>,
	client: QueryClient,
	global_gate: Option<Arc<RateGate>>,
	cancel: CancellationToken,
	deadline: Option<Instant>,
	reqlog: Option<Arc<RequestLog>>,
	metrics: Option<Arc<Metrics>>,
	progress: Progress,
}

impl Worker {
	async fn run(self) -> ResultSink {
		let mut sink = ResultSink::new(self.cfg.hist_max());
		let mut rng = seed_rng(self.cfg.seed, self.id);
		let worker_gate = RateGate::new(self.cfg.rate_limit_worker);

		let mut pass: u64 = 0;
		'run: while self.cfg.duration.is_some() || pass < self.cfg.count {
			for name in self.questions.iter() {
				for &qtype in &self.cfg.types {
					if self.cancel.is_cancelled() {
						break 'run;
					}
					if rng.gen::<f64>() > self.cfg.probability {
						continue;
					}
					if let Some(gate) = &self.global_gate {
						if gate.acquire(&self.cancel).await.is_err() {
							break 'run;
						}
					}
					if let Some(gate) = &worker_gate {
						if gate.acquire(&self.cancel).await.is_err() {
							break 'run;
						}
					}

					let req = request::build(name, qtype, &self.cfg, &mut rng);
					let start = Instant::now();
					let result = tokio::select! {
						biased;
						r = tokio::time::timeout(self.cfg.request_timeout, self.client.query(&req)) => {
							match r {
								Ok(outcome) => outcome,
								Err(_) => Err(anyhow!(
									"request timed out after {:?}",
									self.cfg.request_timeout
								)),
							}
						}
						// in-flight request abandoned, nothing is recorded
						_ = self.cancel.cancelled() => break 'run,
					};

					// a failure that started only after the benchmark deadline
					// is no real outcome, the run was already over
					if result.is_err() {
						if let Some(deadline) = self.deadline {
							if start > deadline {
								break 'run;
							}
						}
					}

					let duration = start.elapsed();
					let (resp, err) = match result {
						Ok(resp) => (Some(resp), None),
						Err(e) => (None, Some(e)),
					};

					if let Some(log) = &self.reqlog {
						log.log(self.id, &req, resp.as_ref(), err.as_ref(), duration);
					}
					if let Some(metrics) = &self.metrics {
						metrics.observe(&req, resp.as_ref(), err.as_ref(), duration);
					}
					self.progress.tick();
					sink.record(&req, resp.as_ref(), err.as_ref(), start, duration);

					delay(&self.cfg.delay, &self.cancel, &mut rng).await;
				}
			}
			pass += 1;
		}
		sink
	}
}

fn seed_rng(seed: Option<u64>, worker_id: u32) -> StdRng {
	match seed {
		Some(base) => StdRng::seed_from_u64(base.wrapping_add(u64::from(worker_id))),
		None => {
			let clock = std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_nanos() as u64)
				.unwrap_or_default();
			StdRng::seed_from_u64(clock ^ (u64::from(worker_id) << 32))
		}
	}
}

/// Sleep between requests; cancellation cuts the sleep short and is not an
/// error.
async fn delay(delay: &RequestDelay, cancel: &CancellationToken, rng: &mut StdRng) {
	let duration = match delay {
		RequestDelay::None => return,
		RequestDelay::Constant(d) => *d,
		RequestDelay::Uniform(start, end) => {
			let span = (*end - *start).as_nanos() as u64;
			*start + Duration::from_nanos(rng.gen_range(0..span))
		}
	};
	tokio::select! {
		_ = tokio::time::sleep(duration) => {}
		_ = cancel.cancelled() => {}
	}
}
