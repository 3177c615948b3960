use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use url::Url;

use crate::domain::Target;
use crate::utils::{merge_headers, parse_headers};

/// Concurrent, indefinitely-looping HTTP fetch driver
#[derive(Parser, Debug)]
#[command(name = "fetchloop", version)]
pub struct Cli {
    /// Target URL to fetch repeatedly
    #[arg(long)]
    pub url: Url,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 8)]
    pub threads: usize,

    /// Directory for per-attempt output files
    #[arg(long, default_value = "downloads")]
    pub out_dir: PathBuf,

    /// Write each attempt's body to disk (bytes are counted either way)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub save: bool,

    /// Suppress periodic progress lines (completion and error lines remain)
    #[arg(long)]
    pub quiet: bool,

    /// Drop the connection after headers, never read the body
    #[arg(long)]
    pub connect_only: bool,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 300_000)]
    pub timeout_ms: u64,

    /// Pause between a failed attempt and the next one, in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub retry_delay_ms: u64,

    /// Extra request headers as `key=value` pairs separated by `;`
    #[arg(long, default_value = "")]
    pub headers: String,
}

fn default_headers() -> Vec<(String, String)> {
    vec![
        (
            "User-Agent".to_string(),
            concat!("fetchloop/", env!("CARGO_PKG_VERSION")).to_string(),
        ),
        ("Accept".to_string(), "*/*".to_string()),
        ("Connection".to_string(), "keep-alive".to_string()),
    ]
}

impl Cli {
    /// Resolve the immutable fetch target from the raw CLI surface.
    pub fn target(&self) -> Target {
        let overrides = parse_headers(&self.headers);
        Target {
            url: self.url.clone(),
            headers: merge_headers(&default_headers(), &overrides),
            timeout: Duration::from_millis(self.timeout_ms),
            connect_only: self.connect_only,
        }
    }
}
