//! Synthetic signature metadata.
//!
//! Stands in for the provider's cryptographic signing call. Every value is
//! derived deterministically from the request, the signer's input and the
//! signing instant, so tests can assert on exact output.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::{QualifiedSignatureRequest, SignatureProvider};
use crate::clock::rfc3339;

pub const SIGNATURE_ALGORITHM: &str = "SHA256withRSA";

const CERTIFICATE_VALIDITY: Duration = Duration::days(730);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureFormat {
    #[serde(rename = "XAdES")]
    Xades,
    #[serde(rename = "PAdES")]
    Pades,
}

impl SignatureFormat {
    pub fn for_provider(provider: SignatureProvider) -> Self {
        match provider {
            SignatureProvider::Clave => SignatureFormat::Xades,
            SignatureProvider::Viafirma | SignatureProvider::Internal => SignatureFormat::Pades,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub serial_number: String,
    pub issuer: String,
    pub subject: String,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_to: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMetadata {
    pub format: SignatureFormat,
    pub algorithm: String,
    pub timestamp_token: String,
    pub certificate: CertificateInfo,
    pub signature_value: String,
    #[serde(with = "time::serde::rfc3339")]
    pub signed_at: OffsetDateTime,
}

pub fn build_signature_metadata(
    request: &QualifiedSignatureRequest,
    signature_data: &str,
    now: OffsetDateTime,
) -> SignatureMetadata {
    let signed_at = rfc3339(now);
    let signature_value = STANDARD.encode(Sha256::digest(
        format!(
            "{}|{}|{}|{}",
            request.document_hash, request.signer.id, signature_data, signed_at
        )
        .as_bytes(),
    ));
    let serial = Sha256::digest(format!("{}|{}", request.signer.id, request.id).as_bytes());
    let serial_number: String = serial[..16].iter().map(|b| format!("{b:02X}")).collect();

    let subject = match &request.signer.national_id {
        Some(nid) => format!(
            "CN={name} - {nid}, SERIALNUMBER=IDCES-{nid}, C=ES",
            name = request.signer.name.to_uppercase()
        ),
        None => format!(
            "CN={}, E={}, C=ES",
            request.signer.name.to_uppercase(),
            request.signer.email
        ),
    };

    SignatureMetadata {
        format: SignatureFormat::for_provider(request.provider),
        algorithm: SIGNATURE_ALGORITHM.to_string(),
        timestamp_token: STANDARD.encode(format!("TST|{signed_at}|{}", request.document_hash)),
        certificate: CertificateInfo {
            serial_number,
            issuer: issuer(request.provider).to_string(),
            subject,
            valid_from: now,
            valid_to: now.saturating_add(CERTIFICATE_VALIDITY),
        },
        signature_value,
        signed_at: now,
    }
}

fn issuer(provider: SignatureProvider) -> &'static str {
    match provider {
        SignatureProvider::Clave => "CN=AC FNMT Usuarios, OU=Ceres, O=FNMT-RCM, C=ES",
        SignatureProvider::Viafirma => "CN=Viafirma Qualified CA, O=Viafirma S.L., C=ES",
        SignatureProvider::Internal => "CN=Signflow Internal CA, O=Signflow, C=ES",
    }
}
