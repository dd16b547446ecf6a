mod bench;
mod cli;
mod config;
mod limit;
mod metrics;
mod output;
mod questions;
mod reqlog;
mod request;
mod sink;
mod transport;

use std::time::Instant;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::config::BenchmarkConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "dns_loadgen=info".into()),
		)
		.init();

	let cli = Cli::parse();
	let cfg = BenchmarkConfig::from_cli(&cli)?.normalize()?;

	// Ctrl-C stops the benchmark gracefully, results so far are reported
	let cancel = CancellationToken::new();
	{
		let cancel = cancel.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				tracing::info!("interrupted, stopping benchmark");
				cancel.cancel();
			}
		});
	}

	let start = Instant::now();
	let sinks = bench::run(&cfg, cancel).await?;
	let elapsed = start.elapsed();

	if !cfg.silent {
		output::print_report(&cfg, &sinks, elapsed);
	}
	if let Some(path) = &cfg.csv {
		output::write_csv(path, &cfg, &sinks)?;
	}

	Ok(())
}
