//! Error types for the LP engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the LP engine
#[derive(Error, Debug)]
pub enum Error {
    // Caller errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Wallet busy: {0}")]
    WalletBusy(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Unsupported pool type: {0}")]
    UnsupportedPoolType(String),

    // Market-condition gates
    #[error("Oracle unreliable: {0}")]
    OracleUnreliable(String),

    #[error("Slippage exceeded at {bps}bps")]
    SlippageExceeded { bps: u16 },

    #[error("Slippage exhausted after {last_bps}bps")]
    SlippageExhausted { last_bps: u16 },

    #[error("Pool paused: {0}")]
    PoolPaused(String),

    // Upstream errors
    #[error("Venue unavailable: {0}")]
    VenueUnavailable(String),

    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),

    #[error("Bundle dropped: {0}")]
    BundleDropped(String),

    #[error("Bundle timed out after {0}s")]
    BundleTimeout(u64),

    #[error("Signing refused: {0}")]
    SignRefused(String),

    // Infrastructure
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::VenueUnavailable(_)
                | Error::RpcUnavailable(_)
                | Error::BundleDropped(_)
                | Error::BundleTimeout(_)
                | Error::Store(_)
        )
    }

    /// Machine-readable error code for the API envelope
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::WalletBusy(_) => "WALLET_BUSY",
            Error::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            Error::UnsupportedPoolType(_) => "UNSUPPORTED_POOL_TYPE",
            Error::OracleUnreliable(_) => "ORACLE_UNRELIABLE",
            Error::SlippageExceeded { .. } => "SLIPPAGE_EXCEEDED",
            Error::SlippageExhausted { .. } => "SLIPPAGE_EXHAUSTED",
            Error::PoolPaused(_) => "POOL_PAUSED",
            Error::VenueUnavailable(_) => "VENUE_UNAVAILABLE",
            Error::RpcUnavailable(_) => "RPC_UNAVAILABLE",
            Error::BundleDropped(_) => "BUNDLE_DROPPED",
            Error::BundleTimeout(_) => "BUNDLE_TIMEOUT",
            Error::SignRefused(_) => "SIGN_REFUSED",
            Error::Store(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_)
            | Error::Anyhow(_) => "INTERNAL",
        }
    }

    /// HTTP status for the API envelope: client errors 4xx,
    /// transient upstream 503, fatal upstream 502.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::UnsupportedPoolType(_) | Error::InsufficientFunds(_) => {
                400
            }
            Error::NotFound(_) => 404,
            Error::WalletBusy(_)
            | Error::OracleUnreliable(_)
            | Error::SlippageExceeded { .. }
            | Error::SlippageExhausted { .. }
            | Error::PoolPaused(_) => 409,
            Error::VenueUnavailable(_)
            | Error::RpcUnavailable(_)
            | Error::BundleDropped(_)
            | Error::BundleTimeout(_)
            | Error::Store(_) => 503,
            Error::SignRefused(_) => 502,
            Error::Serialization(_) | Error::Config(_) | Error::Internal(_) | Error::Anyhow(_) => {
                500
            }
        }
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::RpcUnavailable(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::VenueUnavailable("down".into()).is_retryable());
        assert!(Error::RpcUnavailable("down".into()).is_retryable());
        assert!(Error::BundleDropped("relay".into()).is_retryable());
        assert!(Error::BundleTimeout(60).is_retryable());

        assert!(!Error::SlippageExceeded { bps: 300 }.is_retryable());
        assert!(!Error::InsufficientFunds("0.1 SOL".into()).is_retryable());
        assert!(!Error::PoolPaused("pool".into()).is_retryable());
        assert!(!Error::Validation("bad range".into()).is_retryable());
    }

    #[test]
    fn test_codes_and_status() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(Error::Validation("x".into()).http_status(), 400);
        assert_eq!(Error::WalletBusy("w".into()).http_status(), 409);
        assert_eq!(Error::VenueUnavailable("v".into()).http_status(), 503);
        assert_eq!(Error::SignRefused("no".into()).http_status(), 502);
        assert_eq!(
            Error::SlippageExhausted { last_bps: 1000 }.code(),
            "SLIPPAGE_EXHAUSTED"
        );
    }
}
