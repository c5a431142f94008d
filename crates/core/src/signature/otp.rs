//! One-time verification codes.
//!
//! A record keeps only a salted SHA-256 digest of its code. The clear code
//! leaves this module exactly once, in the [`OtpChallenge`] handed to the
//! delivery collaborator.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::OtpError;

pub const CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub request_id: String,
    pub code_digest: String,
    pub masked_phone: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub verified: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub verified_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Returned by `generate_otp`: the code to deliver and where it goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub request_id: String,
    pub code: String,
    pub masked_phone: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpVerification {
    pub request_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub verified_at: OffsetDateTime,
}

/// Uniformly random, zero-padded numeric code.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:0width$}", rng.gen_range(0..1_000_000u32), width = CODE_LEN)
}

/// Digest stored in place of `code`; salted with the request id so equal
/// codes on different requests do not collide.
pub fn code_digest(request_id: &str, code: &str) -> String {
    format!("{:x}", Sha256::digest(format!("{request_id}:{code}").as_bytes()))
}

pub fn new_record(
    request_id: &str,
    code: &str,
    phone: &str,
    max_attempts: u32,
    now: OffsetDateTime,
    ttl: time::Duration,
) -> OtpRecord {
    OtpRecord {
        request_id: request_id.to_string(),
        code_digest: code_digest(request_id, code),
        masked_phone: mask_phone(phone),
        attempts: 0,
        max_attempts,
        verified: false,
        verified_at: None,
        created_at: now,
        expires_at: now.saturating_add(ttl),
    }
}

/// Outcome of checking `code` against `record` at `now`.
///
/// The first element is the record to persist, `None` when the attempt was
/// refused before it counted (expired, already verified, budget exhausted).
/// A counted attempt is persisted whether or not the code matched.
pub fn verify_attempt(
    record: &OtpRecord,
    code: &str,
    now: OffsetDateTime,
) -> (Option<OtpRecord>, Result<OtpVerification, OtpError>) {
    if now > record.expires_at {
        return (None, Err(OtpError::Expired));
    }
    if record.verified {
        return (None, Err(OtpError::AlreadyVerified));
    }
    if record.attempts >= record.max_attempts {
        return (None, Err(OtpError::AttemptsExceeded));
    }

    let mut next = record.clone();
    next.attempts += 1;
    if code_digest(&record.request_id, code) != record.code_digest {
        let remaining = next.max_attempts.saturating_sub(next.attempts);
        return (Some(next), Err(OtpError::InvalidCode { remaining }));
    }

    next.verified = true;
    next.verified_at = Some(now);
    let verification = OtpVerification {
        request_id: next.request_id.clone(),
        verified_at: now,
    };
    (Some(next), Ok(verification))
}

/// `+34600123456` → `+34*****456`. Keeps an international prefix and the
/// last three digits.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().filter(|c| !c.is_whitespace()).collect();
    let keep_tail = if chars.len() > 6 { 3 } else { 2.min(chars.len()) };
    let keep_head = if chars.first() == Some(&'+') && chars.len() > 6 {
        3
    } else {
        0
    };
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i < keep_head || i >= chars.len() - keep_tail {
                *c
            } else {
                '*'
            }
        })
        .collect()
}
