//! # Errors
//!
//! Error classification shared by the source unpackers and the reconciler.
//!
//! Every unpack failure is either [`UnpackError::Unrecoverable`] (the catalog
//! spec is wrong and retrying reproduces the failure) or
//! [`UnpackError::Recoverable`] (transient, safe to retry with backoff).
//! Reconciliation behaviour is driven by this tag, never by error text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnpackError {
    /// Invalid input or configuration that only a spec change can fix
    #[error("{0:#}")]
    Unrecoverable(anyhow::Error),
    /// Transient failure (network, registry, filesystem)
    #[error("{0:#}")]
    Recoverable(anyhow::Error),
}

impl UnpackError {
    /// Wrap an error as unrecoverable
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self::Unrecoverable(err.into())
    }

    /// Build an unrecoverable error from a message
    pub fn unrecoverable_msg(msg: impl std::fmt::Display) -> Self {
        Self::Unrecoverable(anyhow::anyhow!("{msg}"))
    }

    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

/// Anything not explicitly classified is treated as transient
impl From<anyhow::Error> for UnpackError {
    fn from(err: anyhow::Error) -> Self {
        Self::Recoverable(err)
    }
}

impl From<std::io::Error> for UnpackError {
    fn from(err: std::io::Error) -> Self {
        Self::Recoverable(err.into())
    }
}
