use thiserror::Error;

use crate::fetch::FetchError;

/// Everything that can end one attempt early. Always caught inside the
/// worker loop and answered with a retry, never propagated past it.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Output sink error: {0}")]
    Sink(#[from] std::io::Error),
}
