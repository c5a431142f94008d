use signflow_storage::StorageError;
use thiserror::Error;

use super::{SignatureProvider, SignatureStatus};
use crate::hash::HashAlgorithm;

/// Errors raised by signature-request operations.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature request '{request_id}' not found")]
    RequestNotFound { request_id: String },

    #[error("no {what} found for request '{request_id}'")]
    RecordNotFound {
        what: &'static str,
        request_id: String,
    },

    #[error("{what} for request '{request_id}' has expired")]
    Expired { what: &'static str, request_id: String },

    #[error("signature request cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: SignatureStatus,
        to: SignatureStatus,
    },

    #[error("new signature requests need a SHA-256 document hash, got {algorithm:?}")]
    UnsupportedDocumentHash { algorithm: HashAlgorithm },

    #[error("signature request '{request_id}' needs a verified one-time code before signing")]
    OtpRequired { request_id: String },

    #[error("signature request '{request_id}' is closed ({status:?})")]
    RequestClosed {
        request_id: String,
        status: SignatureStatus,
    },

    #[error("{provider:?} provider error: {message}")]
    Provider {
        provider: SignatureProvider,
        message: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SignatureError {
    pub(crate) fn provider(provider: SignatureProvider, message: impl Into<String>) -> Self {
        SignatureError::Provider {
            provider,
            message: message.into(),
        }
    }
}

/// Errors raised by one-time-password verification.
///
/// Messages are meant to be shown to the signer as-is.
#[derive(Debug, Error)]
pub enum OtpError {
    #[error("no verification code was issued for request '{request_id}'")]
    NotFound { request_id: String },

    #[error("verification code has expired")]
    Expired,

    #[error("maximum verification attempts exceeded")]
    AttemptsExceeded,

    #[error("invalid verification code, {remaining} {} remaining", attempt_word(.remaining))]
    InvalidCode { remaining: u32 },

    #[error("verification code was already used")]
    AlreadyVerified,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn attempt_word(n: &u32) -> &'static str {
    if *n == 1 {
        "attempt"
    } else {
        "attempts"
    }
}
