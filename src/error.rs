use thiserror::Error;

/// Reason a single URL fetch failed. Mirrors the crawler's `FetchError` taxonomy member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Timeout,
    Connection,
    HttpStatus(u16),
    NonHtml,
    RobotsDenied,
    ExternalRedirect,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Timeout => write!(f, "timeout"),
            FetchFailure::Connection => write!(f, "connection"),
            FetchFailure::HttpStatus(code) => write!(f, "http_status({code})"),
            FetchFailure::NonHtml => write!(f, "non_html"),
            FetchFailure::RobotsDenied => write!(f, "robots_denied"),
            FetchFailure::ExternalRedirect => write!(f, "external_redirect"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: FetchFailure },

    #[error("extraction failed for {url}: {detail}")]
    Extract { url: String, detail: String },

    #[error("chunking failed for {url}: {detail}")]
    Chunk { url: String, detail: String },

    #[error(
        "index checksum mismatch at {path}: the persisted vector index may be corrupt or tampered with; delete the cache directory and rebuild"
    )]
    IndexTamper { path: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("query issued against an index that has not been loaded")]
    IndexNotLoaded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
