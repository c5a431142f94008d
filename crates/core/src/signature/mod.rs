//! Qualified electronic-signature requests.
//!
//! A request is bound to one document hash and walks a strictly forward
//! path:
//!
//! ```text
//! pending -> [awaiting-otp] -> signing -> signed | rejected | failed | cancelled
//! ```
//!
//! `expired` is never stored. It is what [`derive_effective_status`] reports
//! for a non-terminal request read after its `expires_at`.

mod error;
pub mod orchestrator;
pub mod otp;
pub mod provider;
pub mod simulate;

pub use error::{OtpError, SignatureError};
pub use orchestrator::{NewSignatureRequest, SignatureOrchestrator};
pub use otp::{OtpChallenge, OtpRecord, OtpVerification};
pub use provider::{
    ClaveAuthMethod, ClaveAuthSession, ClaveConfig, ClaveRedirect, ProviderCallback,
    ProviderConfig, ViafirmaConfig, ViafirmaCredentials, ViafirmaInitiation,
    ViafirmaSignatureJob,
};
pub use simulate::{CertificateInfo, SignatureFormat, SignatureMetadata};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::hash::DocumentHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureProvider {
    /// Spanish national identity broker (Cl@ve).
    Clave,
    /// Third-party signing platform.
    Viafirma,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureLevel {
    Simple,
    Advanced,
    #[default]
    Qualified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureStatus {
    Pending,
    AwaitingOtp,
    Signing,
    Signed,
    Rejected,
    Failed,
    Expired,
    Cancelled,
}

impl SignatureStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignatureStatus::Signed
                | SignatureStatus::Rejected
                | SignatureStatus::Failed
                | SignatureStatus::Expired
                | SignatureStatus::Cancelled
        )
    }

    /// Whether a stored request may move from `self` to `next`.
    ///
    /// Terminal states are final, nothing goes back to `pending`, `signed`
    /// is only reachable from `signing`, and `expired` is never written.
    pub fn can_transition_to(self, next: SignatureStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SignatureStatus::Pending | SignatureStatus::Expired => false,
            SignatureStatus::AwaitingOtp => self == SignatureStatus::Pending,
            SignatureStatus::Signing => {
                matches!(self, SignatureStatus::Pending | SignatureStatus::AwaitingOtp)
            }
            SignatureStatus::Signed => self == SignatureStatus::Signing,
            SignatureStatus::Rejected | SignatureStatus::Failed | SignatureStatus::Cancelled => {
                true
            }
        }
    }
}

/// The person signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub id: String,
    pub name: String,
    pub email: String,
    /// National identity number, when known.
    #[serde(default)]
    pub national_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedSignatureRequest {
    pub id: String,
    pub document_id: String,
    pub document_hash: String,
    pub project_id: String,
    pub provider: SignatureProvider,
    pub signature_level: SignatureLevel,
    pub signer: Signer,
    pub status: SignatureStatus,
    pub otp_required: bool,
    #[serde(default)]
    pub auth_method: Option<ClaveAuthMethod>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub signed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub metadata: Option<SignatureMetadata>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl QualifiedSignatureRequest {
    /// Whether the request may enter `signing`. With a second factor it only
    /// gets there from `awaiting-otp`, once its code has been verified.
    pub fn may_start_signing(&self, otp_verified: bool) -> bool {
        !self.otp_required || (self.status == SignatureStatus::AwaitingOtp && otp_verified)
    }

    /// Whether `content` is the document this request was created for.
    ///
    /// Exact for SHA-256 hashes. A legacy base64 fallback hash only covers
    /// the first 48 bytes of content, so later edits go unnoticed; new
    /// requests never carry one.
    pub fn matches_document(&self, content: &str) -> bool {
        DocumentHash::detect(&self.document_hash).verify(content)
    }
}

/// True iff `now` is past the request's deadline; false without one.
pub fn is_expired(request: &QualifiedSignatureRequest, now: OffsetDateTime) -> bool {
    request.expires_at.is_some_and(|at| now > at)
}

/// The status a reader should see at `now`.
pub fn derive_effective_status(
    request: &QualifiedSignatureRequest,
    now: OffsetDateTime,
) -> SignatureStatus {
    if !request.status.is_terminal() && is_expired(request, now) {
        SignatureStatus::Expired
    } else {
        request.status
    }
}

/// Human-readable countdown to `expires_at`, or `"expired"`.
///
/// Shows the two most significant units: `"6d 23h"`, `"4h 05m"`, `"12m 30s"`,
/// `"45s"`.
pub fn time_remaining(expires_at: OffsetDateTime, now: OffsetDateTime) -> String {
    let left = expires_at - now;
    if left <= time::Duration::ZERO {
        return "expired".to_string();
    }
    let secs = left.whole_seconds();
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
