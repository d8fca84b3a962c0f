//! Error types for wideseries client operations.
//!
//! ## Error Handling Strategy
//!
//! Errors are local wherever possible. Nothing is retried transparently.
//!
//! - **Per sample**: `Codec(EncodingOverflow)` drops one sample, counted
//! - **Per row**: `Codec(MalformedKey | TruncatedValue)` skips one scanned row
//! - **Per batch**: `BulkWriteFailure` drops one batch, the writer keeps going;
//!   `PartialRowFailure` reports failed rows while the rest count as committed
//! - **Fatal**: `QueueOverflow` means the generation rate exceeds what the
//!   pipeline can absorb. It is returned to the coordinator, which drains and
//!   stops the pipeline.
//!
//! ## Examples
//!
//! ```ignore
//! match writer.write_batch(batch).await {
//!     Ok(outcome) => println!("committed {}", outcome.committed_samples),
//!     Err(ClientError::BulkWriteFailure(msg)) => eprintln!("batch dropped: {}", msg),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;
use wideseries_core::CodecError;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Row key or value could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The store rejected a whole bulk write. The batch is dropped.
    #[error("Bulk write failed: {0}")]
    BulkWriteFailure(String),

    /// Some rows of an otherwise successful bulk write failed.
    #[error("{failed} of {total} rows failed in bulk write")]
    PartialRowFailure { failed: usize, total: usize },

    /// A fail-fast queue was full when the producer tried to enqueue.
    ///
    /// ## Resolution
    /// - Lower the generation rate
    /// - Add writers or raise the batch size
    /// - Raise the queue capacity if the overload is a short burst
    #[error("Queue overflow: {pct_full:.1}% of {capacity} slots in use, cannot enqueue")]
    QueueOverflow { capacity: usize, pct_full: f64 },

    /// Store-level failure not tied to a particular batch.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    #[error("Column family '{family}' does not exist in table '{table}'")]
    FamilyNotFound { table: String, family: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The other end of a pipeline queue went away.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for ClientError {
    fn from(e: tokio::task::JoinError) -> Self {
        ClientError::Internal(format!("task failed: {}", e))
    }
}
