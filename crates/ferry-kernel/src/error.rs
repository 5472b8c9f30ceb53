//! Kernel-specific error types.

use crate::storage::StorageError;
use ferry_types::error::FerryError;
use thiserror::Error;

/// Kernel error type wrapping FerryError with remote-context failures.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped FerryError.
    #[error(transparent)]
    Ferry(#[from] FerryError),

    /// The remote context failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),

    /// Slice persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
