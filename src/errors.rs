use thiserror::Error;

/// Application-wide error type - single point of truth
#[derive(Error, Debug)]
pub enum AppError {
    /// Bitcoin RPC operations
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Backend collaborator failures
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Transaction construction failures
    #[error("Construct error: {0}")]
    Construct(#[from] ConstructError),

    /// File I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration issues
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation/parsing
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// RPC error types
#[derive(Error, Debug)]
pub enum RpcError {
    /// Failed to establish connection to Bitcoin Core RPC server
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// TXID string format is invalid (not valid hex or wrong length)
    #[error("Invalid txid: {txid}")]
    InvalidTxid { txid: String },

    /// RPC method call failed (covers network errors, authentication, etc.)
    #[error("RPC call failed: {method} - {message}")]
    CallFailed { method: String, message: String },

    /// Failed to deserialise RPC response data
    #[error("Deserialisation failed: {0}")]
    DeserialisationFailed(String),

    /// Retry limit exceeded for RPC operation
    #[error("Max retries exceeded: {operation}")]
    MaxRetriesExceeded { operation: String },

    /// Transaction exists in valid format but not found in blockchain/mempool
    #[error("Transaction not found: {txid}")]
    TransactionNotFound { txid: String },
}

/// Failures reported by a [`crate::backend::Backend`] implementation
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Output {vout} not found in transaction {txid}")]
    OutputNotFound { txid: String, vout: u32 },

    #[error("No public key known for {0}")]
    PubkeyNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Address codec failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address: {0}")]
    Invalid(String),

    #[error("Unsupported address version {version:#04x} for {address}")]
    UnsupportedVersion { address: String, version: u8 },

    #[error("Invalid multisig array: {0}")]
    InvalidMultisig(String),

    #[error("Invalid public key: {0}")]
    InvalidPubkey(String),
}

/// The transaction is malformed or does not follow any recognised encoding.
///
/// Always recoverable: block parsing treats it as "not a protocol transaction".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<BackendError> for DecodeError {
    fn from(err: BackendError) -> Self {
        DecodeError(format!("prevout lookup failed: {}", err))
    }
}

/// Coin selection could not cover outputs plus fee
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BalanceError {
    pub address: String,
    /// Approximate amount (in satoshis) the address would need
    pub needed: u64,
    pub message: String,
}

/// A construction-time contract violation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Destination output is dust.")]
    DustDestination,

    #[error("Unknown encoding-scheme: {0}")]
    UnknownEncoding(String),

    #[error("P2SH encoding not enabled yet")]
    P2shNotEnabled,

    #[error("One `OP_RETURN` output per transaction.")]
    OpReturnTooLarge,

    #[error("Can't use multisig encoding when source is P2SH and no dust_return_pubkey is provided.")]
    MissingDustReturnPubkey,

    #[error("Invalid dust return pubkey: {0}")]
    InvalidDustReturnPubkey(String),

    #[error("Can't do 2 TXs with old_style_api")]
    OldStyleApiMultipleTxs,

    #[error("Segwit P2SH construction cannot chain onto an existing pretx")]
    SegwitWithPretx,

    #[error("Unable to select source input for p2sh source address")]
    NoP2shSourceInput,

    #[error("Either pubKey or multisig pubKeys must be provided")]
    MissingP2shOwner,

    #[error("invalid multisig pubkeys value")]
    InvalidMultisigPubkeys,

    #[error("Too many P2SH data chunks: {0}")]
    TooManyP2shChunks(usize),

    #[error("Exact fee {exact_fee} is below the data transaction fee {necessary_fee}")]
    ExactFeeTooLow { exact_fee: u64, necessary_fee: u64 },

    #[error("Constructed transaction does not parse correctly: {desired} ≠ {parsed}")]
    SelfCheckMismatch { desired: String, parsed: String },

    #[error("Serialisation failed: {0}")]
    Serialisation(String),
}

/// A message could not be composed; one entry per problem found
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .0.join("; "))]
pub struct ComposeError(pub Vec<String>);

/// Everything `construct` can fail with
#[derive(Error, Debug)]
pub enum ConstructError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Application-wide result type - single point of truth
pub type AppResult<T> = Result<T, AppError>;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Result type for backend collaborator calls
pub type BackendResult<T> = Result<T, BackendError>;

pub type ConstructResult<T> = Result<T, ConstructError>;

// Additional From implementations for common error types
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidData(format!("JSON error: {}", err))
    }
}

impl From<AddressError> for AppError {
    fn from(err: AddressError) -> Self {
        AppError::InvalidData(err.to_string())
    }
}

impl From<hex::FromHexError> for AppError {
    fn from(err: hex::FromHexError) -> Self {
        AppError::InvalidData(format!("hex error: {}", err))
    }
}
