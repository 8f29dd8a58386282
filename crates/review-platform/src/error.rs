use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// §7: 404 is a first-class "resource deleted remotely" signal, distinct
/// from transient network/5xx/rate-limit failures the reconciler just
/// logs-and-skips.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("resource not found")]
    NotFound,

    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("rate limiter deadline exceeded")]
    RateLimitTimeout,

    #[error("request deadline exceeded")]
    Timeout,
}

impl From<Error> for review_core::Error {
    fn from(err: Error) -> Self {
        review_core::Error::platform(err.to_string())
    }
}
