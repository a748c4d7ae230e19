/// Domain-specific error types for the trading engine.
/// The engine is long-running: per-item failures are logged and the cycle
/// continues with the next (station, day). Only unrecoverable I/O on the
/// ledger or snapshot roots is allowed to terminate the process.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transient upstream failure (timeout, network, 5xx, 429).
    /// Surfaced only after retries with backoff.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Upstream returned a non-success status after retries.
    #[error("{api} API error: {status} {body}")]
    Api {
        api: &'static str,
        status: u16,
        body: String,
    },

    /// Response body did not match any expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A pure component was called with inputs it cannot work with
    /// (empty forecast, empty bracket set, price outside [0,1]).
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Upstream(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Malformed(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        EngineError::Ledger(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
