//! Error handling for the inventory ledger core.
//!
//! Every failure is a rejected operation, never a crash: the enclosing
//! transaction rolls back with zero side effects and the error propagates
//! to the calling layer for translation into a user-facing response.

use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("quantity must be a positive integer")]
    InvalidQuantity,

    #[error("invalid expiry date: {0}")]
    InvalidDate(String),

    #[error("lot_code and expiry_date must be provided together, or not at all")]
    InconsistentLotInfo,

    #[error("source and destination locations must differ")]
    SameLocationTransfer,

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("stock record not found: {0}")]
    RecordNotFound(String),

    #[error("storage location {0} does not exist")]
    InvalidLocationReference(Uuid),

    #[error("concurrent update conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// Stable machine-readable code for the calling layer.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidQuantity => "INVALID_QUANTITY",
            AppError::InvalidDate(_) => "INVALID_DATE",
            AppError::InconsistentLotInfo => "INCONSISTENT_LOT_INFO",
            AppError::SameLocationTransfer => "SAME_LOCATION_TRANSFER",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::RecordNotFound(_) => "RECORD_NOT_FOUND",
            AppError::InvalidLocationReference(_) => "INVALID_LOCATION_REFERENCE",
            AppError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// True when the database reported a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Result type alias for ledger operations
pub type AppResult<T> = Result<T, AppError>;
