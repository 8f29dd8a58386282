use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("chat transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("chat API error: {0}")]
    Api(String),

    #[error("long-poll session expired, re-establishing")]
    SessionExpired,
}

impl From<Error> for review_core::Error {
    fn from(err: Error) -> Self {
        review_core::Error::platform(err.to_string())
    }
}
