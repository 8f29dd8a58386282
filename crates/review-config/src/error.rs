use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("invalid start_time {value:?}: expected YYYY-MM-DD")]
    InvalidStartTime { value: String },

    #[error("missing required secret: {0}")]
    MissingSecret(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
