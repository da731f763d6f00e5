//! Runtime configuration.
//!
//! Read from the environment:
//! - `TEMPLATE_TRANSFORM_BATCH_MAX` - Concepts per batch (required)
//! - `TEMPLATE_WORKER_POOL_SIZE` - Concurrent batches (default: 10)
//! - `TEMPLATE_REQUEST_TIMEOUT_SECS` - Deadline for each terminology call (default: 60)
//! - `TERMINOLOGY_URL` - Terminology service base URL (default: `http://localhost:8080`)
//! - `TERMINOLOGY_API_KEY` - Bearer token for the terminology service (optional)

use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TERMINOLOGY_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub batch_max: usize,
    pub worker_pool_size: usize,
    pub request_timeout: Duration,
    pub terminology_url: String,
    pub terminology_api_key: Option<String>,
}

impl Config {
    /// Defaults for everything but the batch size.
    pub fn new(batch_max: usize) -> Self {
        Self {
            batch_max,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            terminology_url: DEFAULT_TERMINOLOGY_URL.to_string(),
            terminology_api_key: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let batch_max = std::env::var("TEMPLATE_TRANSFORM_BATCH_MAX")
            .context("TEMPLATE_TRANSFORM_BATCH_MAX must be set")?;
        let batch_max = parse_positive("TEMPLATE_TRANSFORM_BATCH_MAX", &batch_max)?;

        let mut config = Self::new(batch_max);
        if let Ok(size) = std::env::var("TEMPLATE_WORKER_POOL_SIZE") {
            config.worker_pool_size = parse_positive("TEMPLATE_WORKER_POOL_SIZE", &size)?;
        }
        if let Ok(secs) = std::env::var("TEMPLATE_REQUEST_TIMEOUT_SECS") {
            let secs = parse_positive("TEMPLATE_REQUEST_TIMEOUT_SECS", &secs)?;
            config.request_timeout = Duration::from_secs(secs as u64);
        }
        if let Ok(url) = std::env::var("TERMINOLOGY_URL") {
            config.terminology_url = url;
        }
        config.terminology_api_key = std::env::var("TERMINOLOGY_API_KEY").ok();
        Ok(config)
    }
}

fn parse_positive(name: &str, value: &str) -> Result<usize> {
    let parsed: usize = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got '{}'", name, value))?;
    if parsed == 0 {
        bail!("{} must be greater than zero", name);
    }
    Ok(parsed)
}
