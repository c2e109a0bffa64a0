use std::path::PathBuf;

use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Failures surfaced by the decode core.
///
/// End of stream is not an error: reads report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{url}: {message}")]
    Format { url: String, message: String },
    #[error("{url}: decoding failed: {message}")]
    Decode { url: String, message: String },
    #[error("usage error: {0}")]
    Usage(String),
    #[error("decode worker for {0} terminated unexpectedly")]
    WorkerGone(String),
}

impl MediaError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MediaError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format(url: &str, message: impl Into<String>) -> Self {
        MediaError::Format {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(url: &str, message: impl Into<String>) -> Self {
        MediaError::Decode {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        MediaError::Usage(message.into())
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, MediaError::Usage(_))
    }
}

impl Clone for MediaError {
    fn clone(&self) -> Self {
        match self {
            MediaError::Io { path, source } => MediaError::Io {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            MediaError::Format { url, message } => MediaError::Format {
                url: url.clone(),
                message: message.clone(),
            },
            MediaError::Decode { url, message } => MediaError::Decode {
                url: url.clone(),
                message: message.clone(),
            },
            MediaError::Usage(message) => MediaError::Usage(message.clone()),
            MediaError::WorkerGone(name) => MediaError::WorkerGone(name.clone()),
        }
    }
}
