use std::error::Error as StdError;
use thiserror::Error;

/// Failure of a single http exchange made through a `Session`.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("Too many redirects while fetching {0}")]
    TooManyRedirects(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Redirect from {0} has no usable Location header")]
    MissingLocation(String),

    #[error("{0}")]
    Header(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unsupported polygon format ({0})")]
    UnsupportedFormat(String),

    #[error("Check internet connection: unable to reach {host}")]
    Connectivity {
        host: String,
        #[source]
        source: HttpError,
    },

    #[error("Catalog request failed: {url}")]
    Search {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("Checksum descriptor download error: {url}")]
    ChecksumFetch {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("Download error from {url}")]
    TransferFailed {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse {what}: {detail}")]
    Parse { what: String, detail: String },
}

impl SyncError {
    /// Fatal errors end the run; the rest are scoped to a single granule.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnsupportedFormat(_)
                | Self::Connectivity { .. }
                | Self::Search { .. }
        )
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn parse(what: impl Into<String>, detail: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.to_string(),
        }
    }

    /// The error message followed by every source in the chain.
    pub fn trace(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
