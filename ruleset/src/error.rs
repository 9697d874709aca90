use std::fmt;
use std::io;
use std::sync::Arc;

use crate::validate::Rejection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Transport(String),
    Status(u16),
    MissingLocation(u16),
    TooManyRedirects(usize),
    InvalidUrl(String),
    TooLarge(u64),
}

impl std::error::Error for FetchError {}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            FetchError::Transport(e) => write!(f, "transport error: {}", e),
            FetchError::Status(status) => write!(f, "unexpected status {}", status),
            FetchError::MissingLocation(status) => {
                write!(f, "redirect {} without location", status)
            }
            FetchError::TooManyRedirects(max) => write!(f, "more than {} redirects", max),
            FetchError::InvalidUrl(url) => write!(f, "invalid url: {}", url),
            FetchError::TooLarge(max) => write!(f, "body exceeds {} bytes", max),
        }
    }
}

/// Failure to provision one rule-set. Cloneable so concurrent callers
/// sharing one attempt all receive it.
#[derive(Debug, Clone)]
pub enum ProvisionError {
    InvalidTag(String),
    Fetch { url: String, source: FetchError },
    Rejected { url: String, reason: Rejection },
    Io(Arc<io::Error>),
    Exhausted {
        tag: String,
        attempts: Vec<ProvisionError>,
    },
}

impl ProvisionError {
    pub(crate) fn io(e: io::Error) -> Self {
        ProvisionError::Io(Arc::new(e))
    }
}

impl std::error::Error for ProvisionError {}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            ProvisionError::InvalidTag(tag) => write!(f, "invalid rule-set tag: {:?}", tag),
            ProvisionError::Fetch { url, source } => write!(f, "fetch {}: {}", url, source),
            ProvisionError::Rejected { url, reason } => write!(f, "reject {}: {}", url, reason),
            ProvisionError::Io(e) => write!(f, "io error: {}", e),
            ProvisionError::Exhausted { tag, attempts } => {
                write!(f, "all {} candidates failed for {}", attempts.len(), tag)?;
                for (i, attempt) in attempts.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{}{}", sep, attempt)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub enum ManifestError {
    Io(io::Error),
    Parse(serde_json::Error),
    InvalidTag(String),
    DuplicateTag(String),
    UnknownTag(String),
    BuiltIn(String),
}

impl From<io::Error> for ManifestError {
    fn from(e: io::Error) -> Self {
        ManifestError::Io(e)
    }
}

impl From<serde_json::Error> for ManifestError {
    fn from(e: serde_json::Error) -> Self {
        ManifestError::Parse(e)
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManifestError::Io(e) => Some(e),
            ManifestError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            ManifestError::Io(e) => write!(f, "manifest io: {}", e),
            ManifestError::Parse(e) => write!(f, "manifest parse: {}", e),
            ManifestError::InvalidTag(tag) => write!(f, "invalid rule-set tag: {:?}", tag),
            ManifestError::DuplicateTag(tag) => write!(f, "rule-set {} already exists", tag),
            ManifestError::UnknownTag(tag) => write!(f, "no rule-set named {}", tag),
            ManifestError::BuiltIn(tag) => write!(f, "rule-set {} is built in", tag),
        }
    }
}
