//! Runtime configuration for the flow repository and the signature
//! orchestrator.
//!
//! Every field has a default, so an empty document is a valid configuration.
//!
//! ```toml
//! [signature]
//! request_ttl_days = 7
//! otp_ttl_secs = 300
//! otp_max_attempts = 3
//! clave_session_ttl_secs = 900
//! settle_delay_ms = 1500
//!
//! [flow]
//! strict = false
//! max_conflict_retries = 8
//!
//! [[providers]]
//! type = "clave"
//! broker_url = "https://pasarela.clave.gob.es/Proxy2/ServiceProvider"
//! sp_issuer = "https://signflow.example.com/sp"
//! assertion_consumer_url = "https://signflow.example.com/clave/acs"
//!
//! [[providers]]
//! type = "viafirma"
//! api_url = "https://sandbox.viafirma.com/inbox/api/v3"
//! callback_url = "https://signflow.example.com/viafirma/callback"
//! signing_page_url = "https://sandbox.viafirma.com/inbox/app/sign"
//! ```

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::signature::{ProviderConfig, SignatureProvider};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignflowConfig {
    pub signature: SignatureSettings,
    pub flow: FlowSettings,
    pub providers: Vec<ProviderConfig>,
}

impl SignflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signature.validate()
    }

    /// The configuration block for `provider`, if one is present.
    pub fn provider(&self, provider: SignatureProvider) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.provider() == provider)
    }
}

/// `[signature]` section — lifetimes and retry budgets of the signing workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureSettings {
    pub request_ttl_days: i64,
    pub otp_ttl_secs: i64,
    pub otp_max_attempts: u32,
    pub clave_session_ttl_secs: i64,
    /// Delay before a simulated signature returns.
    pub settle_delay_ms: u64,
    /// Retry budget for read-modify-write updates that lose an OCC race.
    pub max_conflict_retries: u32,
}

impl Default for SignatureSettings {
    fn default() -> Self {
        Self {
            request_ttl_days: 7,
            otp_ttl_secs: 5 * 60,
            otp_max_attempts: 3,
            clave_session_ttl_secs: 15 * 60,
            settle_delay_ms: 1500,
            max_conflict_retries: 8,
        }
    }
}

const REQUEST_TTL_DAYS: (i64, i64) = (1, 3650);
const SHORT_TTL_SECS: (i64, i64) = (1, 86_400);
const OTP_ATTEMPTS: (i64, i64) = (1, 100);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

fn check_range(field: &'static str, value: i64, (min, max): (i64, i64)) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl SignatureSettings {
    /// Reject lifetimes and budgets outside their supported ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("signature.request_ttl_days", self.request_ttl_days, REQUEST_TTL_DAYS)?;
        check_range("signature.otp_ttl_secs", self.otp_ttl_secs, SHORT_TTL_SECS)?;
        check_range(
            "signature.clave_session_ttl_secs",
            self.clave_session_ttl_secs,
            SHORT_TTL_SECS,
        )?;
        check_range(
            "signature.otp_max_attempts",
            i64::from(self.otp_max_attempts),
            OTP_ATTEMPTS,
        )
    }

    // The accessors clamp, so settings that skipped `validate` cannot
    // overflow a `Duration`.

    pub fn request_ttl(&self) -> Duration {
        Duration::days(self.request_ttl_days.clamp(REQUEST_TTL_DAYS.0, REQUEST_TTL_DAYS.1))
    }

    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl_secs.clamp(SHORT_TTL_SECS.0, SHORT_TTL_SECS.1))
    }

    pub fn clave_session_ttl(&self) -> Duration {
        Duration::seconds(
            self.clave_session_ttl_secs
                .clamp(SHORT_TTL_SECS.0, SHORT_TTL_SECS.1),
        )
    }

    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settle_delay_ms)
    }
}

/// `[flow]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Surface unknown steps/approvers as errors instead of ignoring them.
    pub strict: bool,
    pub max_conflict_retries: u32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            strict: false,
            max_conflict_retries: 8,
        }
    }
}
