// Typed errors raised by the transport and transfer layers.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Response bodies kept in errors are cut to this many characters.
const MAX_BODY_CHARS: usize = 2000;

/// Retry budget a failed attempt is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Connect,
    Read,
    Redirect,
    Status,
    Other,
}

impl FailureCategory {
    /// Classify a reqwest failure.
    pub fn of(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            FailureCategory::Connect
        } else if err.is_timeout() || err.is_body() || err.is_decode() {
            FailureCategory::Read
        } else if err.is_redirect() {
            FailureCategory::Redirect
        } else {
            FailureCategory::Other
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::Connect => "connect",
            FailureCategory::Read => "read",
            FailureCategory::Redirect => "redirect",
            FailureCategory::Status => "status",
            FailureCategory::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{method} {url} failed ({category} error): {source}")]
    Request {
        method: String,
        url: String,
        category: FailureCategory,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Access token refresh failed: {0}")]
    AuthRefresh(String),

    #[error("Failed to decode response of {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: wrong content checksum after {attempts} attempts", .path.display())]
    ChecksumMismatch { path: PathBuf, attempts: u32 },

    #[error("{name}: no download link in file descriptor")]
    MissingLink { name: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub(crate) fn status(method: &reqwest::Method, url: &str, status: u16, body: &str) -> Self {
        ClientError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status,
            body: rndflow_sdk::StringUtil::truncate(body, MAX_BODY_CHARS),
        }
    }

    pub(crate) fn request(method: &reqwest::Method, url: &str, source: reqwest::Error) -> Self {
        ClientError::Request {
            method: method.to_string(),
            url: url.to_string(),
            category: FailureCategory::of(&source),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClientError::Io {
            path: path.into(),
            source,
        }
    }

    /// The HTTP status of a `Status` error.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
