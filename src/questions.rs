use std::time::Duration;

use anyhow::{anyhow, bail, Result};

/// Overall timeout for downloading a remote question list.
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the ordered question list from the configured data sources.
///
/// Each entry is either an http(s) URL (downloaded, one domain per line),
/// a local file referenced as @<path> (one domain per line) or a literal
/// domain name. All names are normalized to fully qualified form and the
/// ordering is preserved across and within sources.
pub async fn load(entries: &[String]) -> Result<Vec<String>> {
	let mut questions = Vec::new();
	for entry in entries {
		if entry.starts_with("http://") || entry.starts_with("https://") {
			questions.extend(fetch_remote(entry).await?);
		} else if let Some(path) = entry.strip_prefix('@') {
			questions.extend(read_file(path)?);
		} else {
			questions.push(fqdn(entry));
		}
	}
	if questions.is_empty() {
		bail!("no questions to benchmark with, data sources are empty");
	}
	Ok(questions)
}

/// Ensure a domain name is in fully qualified (trailing dot) form.
pub fn fqdn(name: &str) -> String {
	if name.ends_with('.') {
		name.to_string()
	} else {
		format!("{}.", name)
	}
}

async fn fetch_remote(url: &str) -> Result<Vec<String>> {
	let client = reqwest::Client::builder()
		.timeout(FETCH_TIMEOUT)
		.build()
		.map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;
	let resp = client
		.get(url)
		.send()
		.await
		.map_err(|e| anyhow!("failed to download file '{}': {}", url, e))?;
	if !resp.status().is_success() {
		bail!("failed to download file '{}' with status '{}'", url, resp.status());
	}
	let body = resp
		.text()
		.await
		.map_err(|e| anyhow!("failed to read file '{}': {}", url, e))?;
	Ok(body
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(fqdn)
		.collect())
}

/// Read domains from a local file, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
fn read_file(path: &str) -> Result<Vec<String>> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| anyhow!("failed to read domain file '{}': {}", path, e))?;
	Ok(content
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.map(fqdn)
		.collect())
}
