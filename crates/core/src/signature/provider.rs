//! Provider configuration and the correlation records exchanged with
//! external identity brokers and signing platforms.
//!
//! Nothing here performs network I/O. Initiation produces the payload or URL
//! the integration layer forwards; completion arrives later as a
//! [`ProviderCallback`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{SignatureMetadata, SignatureProvider};
use crate::clock::rfc3339;

// ── Configuration ──────────────────────────────────────────────────────────

/// One `[[providers]]` entry, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Clave(ClaveConfig),
    Viafirma(ViafirmaConfig),
    Internal,
}

impl ProviderConfig {
    pub fn provider(&self) -> SignatureProvider {
        match self {
            ProviderConfig::Clave(_) => SignatureProvider::Clave,
            ProviderConfig::Viafirma(_) => SignatureProvider::Viafirma,
            ProviderConfig::Internal => SignatureProvider::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaveConfig {
    /// Broker endpoint the AuthnRequest is POSTed to.
    pub broker_url: String,
    /// Our service-provider entity id.
    pub sp_issuer: String,
    pub assertion_consumer_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViafirmaConfig {
    pub api_url: String,
    pub callback_url: String,
    pub signing_page_url: String,
}

// ── Cl@ve ──────────────────────────────────────────────────────────────────

/// How the signer authenticates against the identity broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaveAuthMethod {
    /// Cl@ve PIN: short-lived code delivered to the citizen's phone.
    PinCode,
    /// Cl@ve Permanente: long-lived password plus SMS.
    Permanent,
    /// Electronic national identity card.
    Dnie,
    /// Software certificate installed in the browser.
    Certificate,
}

impl ClaveAuthMethod {
    /// Identity provider the broker should route to.
    pub fn idp(self) -> &'static str {
        match self {
            ClaveAuthMethod::PinCode => "AEAT",
            ClaveAuthMethod::Permanent => "SS",
            ClaveAuthMethod::Dnie | ClaveAuthMethod::Certificate => "AFIRMA",
        }
    }

    /// eIDAS level of assurance requested for this method.
    pub fn level_of_assurance(self) -> &'static str {
        match self {
            ClaveAuthMethod::PinCode => "http://eidas.europa.eu/LoA/low",
            ClaveAuthMethod::Permanent | ClaveAuthMethod::Certificate => {
                "http://eidas.europa.eu/LoA/substantial"
            }
            ClaveAuthMethod::Dnie => "http://eidas.europa.eu/LoA/high",
        }
    }
}

/// Authentication session correlating a request with an outbound
/// AuthnRequest. Valid for a short window only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaveAuthSession {
    pub id: String,
    pub request_id: String,
    pub auth_method: ClaveAuthMethod,
    /// Base64 AuthnRequest as sent to the broker.
    pub saml_request: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// What the browser must POST to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaveRedirect {
    pub url: String,
    pub binding: String,
    #[serde(rename = "SAMLRequest")]
    pub saml_request: String,
    #[serde(rename = "RelayState")]
    pub relay_state: String,
}

/// Base64-encoded SAML AuthnRequest selecting the IdP and LoA for `method`.
pub(crate) fn encode_authn_request(
    config: &ClaveConfig,
    session_id: &str,
    method: ClaveAuthMethod,
    issued_at: OffsetDateTime,
) -> String {
    let xml = format!(
        concat!(
            r#"<saml2p:AuthnRequest xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" "#,
            r#"ID="_{id}" Version="2.0" IssueInstant="{at}" "#,
            r#"Destination="{dest}" AssertionConsumerServiceURL="{acs}" "#,
            r#"ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST">"#,
            r#"<saml2:Issuer>{issuer}</saml2:Issuer>"#,
            r#"<saml2p:Extensions><SelectedIdP>{idp}</SelectedIdP></saml2p:Extensions>"#,
            r#"<saml2p:RequestedAuthnContext Comparison="minimum">"#,
            r#"<saml2:AuthnContextClassRef>{loa}</saml2:AuthnContextClassRef>"#,
            r#"</saml2p:RequestedAuthnContext></saml2p:AuthnRequest>"#,
        ),
        id = session_id,
        at = rfc3339(issued_at),
        dest = config.broker_url,
        acs = config.assertion_consumer_url,
        issuer = config.sp_issuer,
        idp = method.idp(),
        loa = method.level_of_assurance(),
    );
    STANDARD.encode(xml)
}

// ── Viafirma ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViafirmaCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ViafirmaCredentials {
    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

/// A signing job opened on the platform for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViafirmaSignatureJob {
    pub id: String,
    pub request_id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub callback_url: String,
    pub signing_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Copied from the request so the platform stops at the same deadline.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViafirmaInitiation {
    pub job_id: String,
    pub signing_url: String,
}

// ── Callbacks ──────────────────────────────────────────────────────────────

/// Asynchronous completion signal from a broker or signing platform, as
/// normalized by the integration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProviderCallback {
    /// Identity confirmed. The request may start signing, once its code is
    /// verified when it needs one.
    Authenticated,
    Signed { metadata: SignatureMetadata },
    Rejected { reason: String },
    Failed { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn clave() -> ClaveConfig {
        ClaveConfig {
            broker_url: "https://broker.example/sp".into(),
            sp_issuer: "https://signflow.example/sp".into(),
            assertion_consumer_url: "https://signflow.example/acs".into(),
        }
    }

    #[test]
    fn provider_config_is_tagged_by_type() {
        let cfg: ProviderConfig = serde_json::from_value(serde_json::json!({
            "type": "viafirma",
            "api_url": "https://v.example/api",
            "callback_url": "https://signflow.example/cb",
            "signing_page_url": "https://v.example/sign",
        }))
        .unwrap();
        assert_eq!(cfg.provider(), SignatureProvider::Viafirma);

        let internal: ProviderConfig =
            serde_json::from_value(serde_json::json!({ "type": "internal" })).unwrap();
        assert_eq!(internal, ProviderConfig::Internal);
    }

    #[test]
    fn authn_request_selects_idp_and_loa() {
        let encoded = encode_authn_request(
            &clave(),
            "sess-1",
            ClaveAuthMethod::Dnie,
            datetime!(2026-03-01 10:00 UTC),
        );
        let xml = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert!(xml.contains(r#"ID="_sess-1""#));
        assert!(xml.contains("<SelectedIdP>AFIRMA</SelectedIdP>"));
        assert!(xml.contains("http://eidas.europa.eu/LoA/high"));
        assert!(xml.contains("https://signflow.example/acs"));
    }

    #[test]
    fn each_method_maps_to_a_distinct_context() {
        let contexts: Vec<_> = [
            ClaveAuthMethod::PinCode,
            ClaveAuthMethod::Permanent,
            ClaveAuthMethod::Dnie,
            ClaveAuthMethod::Certificate,
        ]
        .iter()
        .map(|m| (m.idp(), m.level_of_assurance()))
        .collect();
        for (i, a) in contexts.iter().enumerate() {
            for b in &contexts[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn callback_wire_shape() {
        let cb: ProviderCallback = serde_json::from_value(serde_json::json!({
            "event": "rejected",
            "reason": "signer declined",
        }))
        .unwrap();
        assert_eq!(
            cb,
            ProviderCallback::Rejected {
                reason: "signer declined".into()
            }
        );
    }

    #[test]
    fn credentials_need_both_halves() {
        let creds = ViafirmaCredentials {
            api_key: "key".into(),
            api_secret: " ".into(),
        };
        assert!(!creds.is_complete());
    }
}
