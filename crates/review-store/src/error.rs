use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("row not found: {0}")]
    NotFound(String),
}

impl From<Error> for review_core::Error {
    fn from(err: Error) -> Self {
        review_core::Error::store(err.to_string())
    }
}
