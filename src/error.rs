use thiserror::Error;

/// Failure taxonomy for coordinator, API and command paths.
///
/// `InsufficientBalance` and `InvalidOutcome` get dedicated chat replies;
/// everything else surfaces through the generic command-failed message at
/// the dispatch boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Selection target is malformed or already resolved. The select
    /// operation fails and no session is created.
    #[error("attempted to feature invalid market '{0}'")]
    InvalidMarket(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    /// Backend rejected the API key.
    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    /// Resolve command given an unrecognized or unsupported outcome token.
    #[error("'{0}' is not a valid resolution outcome")]
    InvalidOutcome(String),

    #[error("no market is currently featured")]
    NoActiveMarket,

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx backend response that doesn't map to a more specific variant.
    #[error("backend error: {0}")]
    Api(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
