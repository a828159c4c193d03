//! Error types for the wallet core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet core
#[derive(Error, Debug)]
pub enum Error {
    // Vault errors
    #[error("Wrong secret")]
    WrongSecret,

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Vault corrupted: {0}")]
    VaultCorrupted(String),

    #[error("No vault found for wallet {0}")]
    VaultNotFound(String),

    #[error("Vault already exists for wallet {0}")]
    VaultExists(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    // Session errors
    #[error("Request {0} superseded by a newer request")]
    Superseded(u64),

    #[error("Session expired or unknown: {0}")]
    SessionExpired(String),

    #[error("Request not pending: {0}")]
    RequestNotPending(u64),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Relay error: {0}")]
    Relay(String),

    // Decoder errors
    #[error("Transaction blocked: {0}")]
    Blocked(String),

    #[error("Unknown program {0} - review carefully")]
    UnknownProgramWarning(String),

    #[error("Transaction decode failed: {0}")]
    TransactionDecode(String),

    // Policy errors
    #[error("Approval blocked by policy: spender {0} is denylisted")]
    PolicyBlocked(String),

    #[error("Unlimited approval to {0} blocked by policy")]
    PolicyBlockedUnlimited(String),

    // Signer errors
    #[error("Signing failed: {0}")]
    SignFailed(String),

    // Broadcast errors
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transaction validity window expired")]
    ValidityWindowExpired,

    #[error("No endpoint accepted the transaction: {0}")]
    AllEndpointsFailed(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // Swap source errors
    #[error("Swap quote failed: {0}")]
    SwapQuote(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
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
            Error::Rpc(_) | Error::RpcTimeout(_) | Error::SendFailed(_) | Error::Relay(_)
        )
    }

    /// Non-fatal errors are surfaced to the user but do not stop the request
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::UnknownProgramWarning(_))
    }

    /// Check if this error is a safety violation
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            Error::Blocked(_)
                | Error::PolicyBlocked(_)
                | Error::PolicyBlockedUnlimited(_)
                | Error::SignFailed(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from bincode errors
impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from HTTP client errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::RpcTimeout(0)
        } else {
            Error::Rpc(e.to_string())
        }
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
