use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Cache storage error: {0}")]
    Store(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid trusted host pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid worker state: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

impl CacheError {
    /// Truncate a message to avoid logging excessive data
    pub(crate) fn truncate(message: &str) -> String {
        if message.len() <= MAX_ERROR_BODY_LENGTH {
            message.to_string()
        } else {
            let cut: String = message.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, message.len())
        }
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(e: reqwest::Error) -> Self {
        CacheError::Network(Self::truncate(&e.to_string()))
    }
}

impl From<url::ParseError> for CacheError {
    fn from(e: url::ParseError) -> Self {
        CacheError::InvalidUrl(e.to_string())
    }
}

/// Why an install attempt was abandoned. Nothing is written to the static
/// generation when this is returned.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to pre-cache {url}: {source}")]
    Resource {
        url: String,
        #[source]
        source: Box<CacheError>,
    },

    #[error("Failed to write static cache {generation}: {source}")]
    Storage {
        generation: String,
        #[source]
        source: Box<CacheError>,
    },

    /// Install was called on a worker that already left `Parsed`.
    #[error("Cannot install a worker in state {0}")]
    State(String),
}

impl InstallError {
    pub fn resource(url: &str, source: CacheError) -> Self {
        InstallError::Resource {
            url: url.to_string(),
            source: Box::new(source),
        }
    }

    pub fn storage(generation: &str, source: CacheError) -> Self {
        InstallError::Storage {
            generation: generation.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
