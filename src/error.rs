// Error taxonomy for ledger and pool operations
use std::fmt;

/// Status class an API layer maps an error onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    BadRequest,
    Permission,
    NotFound,
    Conflict,
    PaymentRequired,
    ServiceUnavailable,
}

impl ErrorClass {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Permission => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::PaymentRequired => 402,
            Self::ServiceUnavailable => 503,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BolaoError {
    // Balance errors
    InsufficientFunds,
    InvalidDeposit,

    // Entry errors
    InvalidGuess(String),
    InvalidPool(String),
    PoolNotAcceptingEntries,
    PoolClosedForGuesses,

    // Permission / state errors
    Unauthorized,
    AlreadyTerminal,

    // System errors
    GatewayUnavailable(String),
    NotFound(String),
    Storage(String),
}

pub type BolaoResult<T> = Result<T, BolaoError>;

impl fmt::Display for BolaoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientFunds => write!(f, "Insufficient funds."),
            Self::InvalidDeposit => write!(f, "Invalid deposit."),
            Self::InvalidGuess(msg) => write!(f, "Invalid guess: {}", msg),
            Self::InvalidPool(msg) => write!(f, "Invalid pool: {}", msg),
            Self::PoolNotAcceptingEntries => write!(f, "This pool is not accepting entries."),
            Self::PoolClosedForGuesses => write!(f, "This pool is no longer accepting guesses."),
            Self::Unauthorized => write!(f, "You are not allowed to perform this action."),
            Self::AlreadyTerminal => write!(f, "The pool is already finalized or cancelled."),
            Self::GatewayUnavailable(msg) => {
                write!(f, "Payment service unavailable: {}", msg)
            }
            Self::NotFound(what) => write!(f, "{} not found.", what),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for BolaoError {}

impl From<sled::Error> for BolaoError {
    fn from(err: sled::Error) -> Self {
        BolaoError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BolaoError {
    fn from(err: serde_json::Error) -> Self {
        BolaoError::Storage(format!("codec: {}", err))
    }
}

impl From<sled::transaction::TransactionError<BolaoError>> for BolaoError {
    fn from(err: sled::transaction::TransactionError<BolaoError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => BolaoError::Storage(e.to_string()),
        }
    }
}

// Error code mapping for API responses
impl BolaoError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InvalidDeposit => "INVALID_DEPOSIT",
            Self::InvalidGuess(_) => "INVALID_GUESS",
            Self::InvalidPool(_) => "INVALID_POOL",
            Self::PoolNotAcceptingEntries => "POOL_NOT_ACCEPTING_ENTRIES",
            Self::PoolClosedForGuesses => "POOL_CLOSED_FOR_GUESSES",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AlreadyTerminal => "ALREADY_TERMINAL",
            Self::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InsufficientFunds | Self::InvalidDeposit => ErrorClass::PaymentRequired,
            Self::InvalidGuess(_) | Self::InvalidPool(_) => ErrorClass::BadRequest,
            Self::PoolNotAcceptingEntries | Self::PoolClosedForGuesses | Self::AlreadyTerminal => {
                ErrorClass::Conflict
            }
            Self::Unauthorized => ErrorClass::Permission,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::GatewayUnavailable(_) | Self::Storage(_) => ErrorClass::ServiceUnavailable,
        }
    }

    /// Financial errors are terminal for the request; only system errors may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::Storage(_))
    }

    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds
                | Self::InvalidDeposit
                | Self::InvalidGuess(_)
                | Self::InvalidPool(_)
                | Self::PoolNotAcceptingEntries
                | Self::PoolClosedForGuesses
        )
    }
}
