use std::time::Duration;

use url::Url;

/// Resolved fetch target. Built once from the CLI surface and immutable
/// for the process lifetime; shared across workers behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    /// Merged header set, defaults already overridden by user entries.
    /// Keys are case-sensitive as provided.
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub connect_only: bool,
}

/// Terminal result of one successful attempt. Failures travel as
/// `Err(AttemptError)`, not as a variant here.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    /// Body streamed to completion. `nominal` is the server-declared
    /// Content-Length, not guaranteed accurate.
    Downloaded { bytes: u64, nominal: Option<u64> },
    /// Connection and headers only; no body bytes were read.
    ConnectOnly { nominal: Option<u64> },
}
