//! Signature request lifecycle against a storage backend.
//!
//! Requests, Cl@ve sessions, Viafirma jobs and OTP records each live in their
//! own namespace keyed by request id. Status changes and OTP attempts go
//! through [`RecordStore::update`], so concurrent callers on one request are
//! serialized by version. Expiry is never written: it is derived from the
//! injected clock whenever a record is read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use signflow_storage::SignflowStorage;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::otp::{self, OtpChallenge, OtpRecord, OtpVerification};
use super::provider::{
    encode_authn_request, ClaveAuthMethod, ClaveAuthSession, ClaveConfig, ClaveRedirect,
    ProviderCallback, ProviderConfig, ViafirmaConfig, ViafirmaCredentials, ViafirmaInitiation,
    ViafirmaSignatureJob,
};
use super::simulate::{build_signature_metadata, SignatureMetadata};
use super::{
    derive_effective_status, is_expired, OtpError, QualifiedSignatureRequest, SignatureError,
    SignatureLevel, SignatureProvider, SignatureStatus, Signer,
};
use crate::audit::{create_audit_log, Actor, AuditAction, AuditEntityType, AuditLogger};
use crate::clock::{Clock, SystemClock};
use crate::config::{SignatureSettings, SignflowConfig};
use crate::hash::{DocumentHash, HashAlgorithm};
use crate::store::{RecordStore, Update};

pub const REQUESTS: &str = "signature_requests";
pub const CLAVE_SESSIONS: &str = "clave_sessions";
pub const VIAFIRMA_JOBS: &str = "viafirma_jobs";
pub const OTP_CODES: &str = "otp";

/// Everything needed to open a signature request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignatureRequest {
    pub document_id: String,
    pub document_hash: String,
    pub project_id: String,
    pub provider: SignatureProvider,
    pub signer: Signer,
    #[serde(default)]
    pub signature_level: SignatureLevel,
    #[serde(default)]
    pub auth_method: Option<ClaveAuthMethod>,
}

/// Build a `pending` request expiring `ttl` after `now`. Cl@ve requests
/// require a second factor.
pub fn new_request(
    new: NewSignatureRequest,
    now: OffsetDateTime,
    ttl: time::Duration,
) -> QualifiedSignatureRequest {
    QualifiedSignatureRequest {
        id: Uuid::new_v4().to_string(),
        otp_required: new.provider == SignatureProvider::Clave,
        document_id: new.document_id,
        document_hash: new.document_hash,
        project_id: new.project_id,
        provider: new.provider,
        signature_level: new.signature_level,
        signer: new.signer,
        status: SignatureStatus::Pending,
        auth_method: new.auth_method,
        created_at: now,
        expires_at: Some(now.saturating_add(ttl)),
        signed_at: None,
        metadata: None,
        failure_reason: None,
    }
}

/// Fail unless `request` can still change at `now`.
fn ensure_open(request: &QualifiedSignatureRequest, now: OffsetDateTime) -> Result<(), SignatureError> {
    if request.status.is_terminal() {
        return Err(SignatureError::RequestClosed {
            request_id: request.id.clone(),
            status: request.status,
        });
    }
    if is_expired(request, now) {
        return Err(SignatureError::Expired {
            what: "signature request",
            request_id: request.id.clone(),
        });
    }
    Ok(())
}

/// Apply one forward step, returning the `(from, to)` pair.
fn step_status(
    request: &mut QualifiedSignatureRequest,
    to: SignatureStatus,
    reason: Option<&str>,
    otp_verified: bool,
    now: OffsetDateTime,
) -> Result<(SignatureStatus, SignatureStatus), SignatureError> {
    let from = request.status;
    if !from.can_transition_to(to) {
        return Err(SignatureError::InvalidTransition { from, to });
    }
    if to == SignatureStatus::Signing && !request.may_start_signing(otp_verified) {
        return Err(SignatureError::OtpRequired {
            request_id: request.id.clone(),
        });
    }
    request.status = to;
    match to {
        SignatureStatus::Signed => request.signed_at = Some(now),
        SignatureStatus::Rejected | SignatureStatus::Failed | SignatureStatus::Cancelled => {
            request.failure_reason = reason.map(str::to_owned);
        }
        _ => {}
    }
    Ok((from, to))
}

fn signer_actor(request: &QualifiedSignatureRequest) -> Actor {
    Actor::new(&request.signer.id, &request.signer.name)
}

pub struct SignatureOrchestrator<S, C = SystemClock> {
    store: RecordStore<S>,
    audit: AuditLogger<S>,
    clock: C,
    settings: SignatureSettings,
    providers: Vec<ProviderConfig>,
}

impl<S: SignflowStorage, C: Clock> SignatureOrchestrator<S, C> {
    pub fn new(storage: Arc<S>, clock: C, config: &SignflowConfig) -> Self {
        Self {
            store: RecordStore::new(storage.clone(), config.signature.max_conflict_retries),
            audit: AuditLogger::new(storage),
            clock,
            settings: config.signature.clone(),
            providers: config.providers.clone(),
        }
    }

    pub fn audit(&self) -> &AuditLogger<S> {
        &self.audit
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    // ── Requests ───────────────────────────────────────────────────────────

    pub async fn create_request(
        &self,
        new: NewSignatureRequest,
        actor: &Actor,
    ) -> Result<QualifiedSignatureRequest, SignatureError> {
        let hash = DocumentHash::detect(&new.document_hash);
        if hash.algorithm != HashAlgorithm::Sha256 {
            return Err(SignatureError::UnsupportedDocumentHash {
                algorithm: hash.algorithm,
            });
        }
        let now = self.clock.now();
        let request = new_request(new, now, self.settings.request_ttl());
        self.store.create(REQUESTS, &request.id, &request).await?;

        self.audit
            .record(&create_audit_log(
                AuditEntityType::SignatureRequest,
                &request.id,
                AuditAction::RequestCreated,
                actor,
                json!({
                    "document_id": request.document_id,
                    "document_hash": request.document_hash,
                    "provider": request.provider,
                    "signer_id": request.signer.id,
                    "otp_required": request.otp_required,
                }),
                now,
            ))
            .await?;
        info!(
            request_id = %request.id,
            provider = ?request.provider,
            signer_id = %request.signer.id,
            "signature request created"
        );
        Ok(request)
    }

    /// The stored request, as last written. See [`Self::effective_status`]
    /// for the status a reader should act on.
    pub async fn request(&self, request_id: &str) -> Result<QualifiedSignatureRequest, SignatureError> {
        self.store
            .load::<QualifiedSignatureRequest>(REQUESTS, request_id)
            .await?
            .map(|(request, _)| request)
            .ok_or_else(|| SignatureError::RequestNotFound {
                request_id: request_id.to_string(),
            })
    }

    pub async fn effective_status(&self, request_id: &str) -> Result<SignatureStatus, SignatureError> {
        let request = self.request(request_id).await?;
        Ok(derive_effective_status(&request, self.clock.now()))
    }

    /// Move a request one step along its forward-only path. Repeating the
    /// current status is a no-op.
    pub async fn transition_request(
        &self,
        request_id: &str,
        to: SignatureStatus,
        reason: Option<&str>,
        actor: &Actor,
    ) -> Result<QualifiedSignatureRequest, SignatureError> {
        self.advance(request_id, to, reason, None, actor).await
    }

    /// Shared path for every status change. With `metadata`, the request is
    /// completed as `signed`, passing through `signing` when it has not got
    /// there yet.
    async fn advance(
        &self,
        request_id: &str,
        to: SignatureStatus,
        reason: Option<&str>,
        metadata: Option<&SignatureMetadata>,
        actor: &Actor,
    ) -> Result<QualifiedSignatureRequest, SignatureError> {
        let now = self.clock.now();
        let otp_verified = match to {
            SignatureStatus::Signing | SignatureStatus::Signed => self.otp_verified(request_id).await?,
            _ => false,
        };
        let (request, hops) = self
            .store
            .update::<QualifiedSignatureRequest, _, SignatureError, _>(REQUESTS, request_id, |current| {
                let mut request = current.ok_or_else(|| SignatureError::RequestNotFound {
                    request_id: request_id.to_string(),
                })?;
                if request.status == to {
                    return Ok(Update::Keep((request, Vec::new())));
                }
                ensure_open(&request, now)?;

                let mut hops = Vec::with_capacity(2);
                if metadata.is_some()
                    && matches!(
                        request.status,
                        SignatureStatus::Pending | SignatureStatus::AwaitingOtp
                    )
                {
                    hops.push(step_status(
                        &mut request,
                        SignatureStatus::Signing,
                        None,
                        otp_verified,
                        now,
                    )?);
                }
                hops.push(step_status(&mut request, to, reason, otp_verified, now)?);
                if let Some(metadata) = metadata {
                    request.metadata = Some(metadata.clone());
                }
                Ok(Update::Write(request.clone(), (request, hops)))
            })
            .await?;

        let mut entries: Vec<_> = hops
            .iter()
            .map(|(from, to)| {
                create_audit_log(
                    AuditEntityType::SignatureRequest,
                    &request.id,
                    AuditAction::RequestStatusChanged,
                    actor,
                    json!({ "from": from, "to": to, "reason": reason }),
                    now,
                )
            })
            .collect();
        if let (Some(metadata), false) = (&request.metadata, hops.is_empty()) {
            if request.status == SignatureStatus::Signed {
                entries.push(create_audit_log(
                    AuditEntityType::SignatureRequest,
                    &request.id,
                    AuditAction::SignatureCompleted,
                    actor,
                    json!({
                        "format": metadata.format,
                        "certificate_serial": metadata.certificate.serial_number,
                        "document_hash": request.document_hash,
                    }),
                    now,
                ));
            }
        }
        self.audit.record_all(&entries).await?;

        for (from, to) in &hops {
            info!(request_id = %request.id, from = ?from, to = ?to, "signature request status changed");
        }
        Ok(request)
    }

    /// Whether the request's current code has been verified. A code issued
    /// after verification replaces the record and reads as unverified.
    async fn otp_verified(&self, request_id: &str) -> Result<bool, SignatureError> {
        Ok(self
            .store
            .load::<OtpRecord>(OTP_CODES, request_id)
            .await?
            .is_some_and(|(record, _)| record.verified))
    }

    /// Load a request and check that it is neither terminal nor expired.
    async fn open_request(&self, request_id: &str) -> Result<QualifiedSignatureRequest, SignatureError> {
        let request = self.request(request_id).await?;
        ensure_open(&request, self.clock.now())?;
        Ok(request)
    }

    fn require_provider(
        request: &QualifiedSignatureRequest,
        provider: SignatureProvider,
    ) -> Result<(), SignatureError> {
        if request.provider != provider {
            return Err(SignatureError::provider(
                provider,
                format!(
                    "request '{}' is bound to the {:?} provider",
                    request.id, request.provider
                ),
            ));
        }
        Ok(())
    }

    // ── Cl@ve ──────────────────────────────────────────────────────────────

    fn clave_config(&self) -> Result<&ClaveConfig, SignatureError> {
        self.providers
            .iter()
            .find_map(|p| match p {
                ProviderConfig::Clave(cfg) => Some(cfg),
                _ => None,
            })
            .ok_or_else(|| SignatureError::provider(SignatureProvider::Clave, "provider is not configured"))
    }

    /// Open an authentication session with the identity broker and return
    /// what the browser must POST to it. Replaces any earlier session for
    /// the same request.
    pub async fn initiate_clave(
        &self,
        request_id: &str,
        auth_method: ClaveAuthMethod,
    ) -> Result<ClaveRedirect, SignatureError> {
        let config = self.clave_config()?;
        let request = self.open_request(request_id).await?;
        Self::require_provider(&request, SignatureProvider::Clave)?;

        let now = self.clock.now();
        let session_id = Uuid::new_v4().to_string();
        let session = ClaveAuthSession {
            saml_request: encode_authn_request(config, &session_id, auth_method, now),
            id: session_id,
            request_id: request.id.clone(),
            auth_method,
            created_at: now,
            expires_at: now.saturating_add(self.settings.clave_session_ttl()),
        };

        self.store
            .update::<QualifiedSignatureRequest, _, SignatureError, _>(REQUESTS, request_id, |current| {
                let mut request = current.ok_or_else(|| SignatureError::RequestNotFound {
                    request_id: request_id.to_string(),
                })?;
                ensure_open(&request, now)?;
                if request.auth_method == Some(auth_method) {
                    return Ok(Update::Keep(()));
                }
                request.auth_method = Some(auth_method);
                Ok(Update::Write(request, ()))
            })
            .await?;
        self.store.put(CLAVE_SESSIONS, request_id, &session).await?;

        self.audit
            .record(&create_audit_log(
                AuditEntityType::ClaveSession,
                &session.id,
                AuditAction::ClaveInitiated,
                &signer_actor(&request),
                json!({
                    "request_id": request.id,
                    "auth_method": auth_method,
                    "idp": auth_method.idp(),
                    "expires_at": crate::clock::rfc3339(session.expires_at),
                }),
                now,
            ))
            .await?;
        info!(
            request_id = %request.id,
            session_id = %session.id,
            auth_method = ?auth_method,
            "Cl@ve authentication initiated"
        );

        Ok(ClaveRedirect {
            url: config.broker_url.clone(),
            binding: "HTTP-POST".to_string(),
            saml_request: session.saml_request,
            relay_state: session.id,
        })
    }

    /// The live authentication session for a request.
    pub async fn clave_session(&self, request_id: &str) -> Result<ClaveAuthSession, SignatureError> {
        let (session, _) = self
            .store
            .load::<ClaveAuthSession>(CLAVE_SESSIONS, request_id)
            .await?
            .ok_or_else(|| SignatureError::RecordNotFound {
                what: "Cl@ve session",
                request_id: request_id.to_string(),
            })?;
        if self.clock.now() > session.expires_at {
            debug!(request_id, session_id = %session.id, "Cl@ve session expired");
            return Err(SignatureError::Expired {
                what: "Cl@ve session",
                request_id: request_id.to_string(),
            });
        }
        Ok(session)
    }

    // ── Viafirma ───────────────────────────────────────────────────────────

    fn viafirma_config(&self) -> Result<&ViafirmaConfig, SignatureError> {
        self.providers
            .iter()
            .find_map(|p| match p {
                ProviderConfig::Viafirma(cfg) => Some(cfg),
                _ => None,
            })
            .ok_or_else(|| {
                SignatureError::provider(SignatureProvider::Viafirma, "provider is not configured")
            })
    }

    /// Open a signing job on the platform. The job inherits the request's
    /// deadline.
    pub async fn initiate_viafirma(
        &self,
        request_id: &str,
        credentials: &ViafirmaCredentials,
        workflow_id: Option<&str>,
    ) -> Result<ViafirmaInitiation, SignatureError> {
        if !credentials.is_complete() {
            return Err(SignatureError::provider(
                SignatureProvider::Viafirma,
                "API key and secret are required",
            ));
        }
        let config = self.viafirma_config()?;
        let request = self.open_request(request_id).await?;
        Self::require_provider(&request, SignatureProvider::Viafirma)?;

        let now = self.clock.now();
        let job_id = Uuid::new_v4().to_string();
        let job = ViafirmaSignatureJob {
            signing_url: format!("{}/{}", config.signing_page_url.trim_end_matches('/'), job_id),
            id: job_id,
            request_id: request.id.clone(),
            workflow_id: workflow_id.map(str::to_owned),
            callback_url: config.callback_url.clone(),
            created_at: now,
            expires_at: request.expires_at,
        };
        self.store.put(VIAFIRMA_JOBS, request_id, &job).await?;

        self.audit
            .record(&create_audit_log(
                AuditEntityType::ViafirmaJob,
                &job.id,
                AuditAction::ViafirmaInitiated,
                &signer_actor(&request),
                json!({
                    "request_id": request.id,
                    "workflow_id": job.workflow_id,
                    "api_url": config.api_url,
                }),
                now,
            ))
            .await?;
        info!(request_id = %request.id, job_id = %job.id, "Viafirma signing job opened");

        Ok(ViafirmaInitiation {
            job_id: job.id,
            signing_url: job.signing_url,
        })
    }

    pub async fn signature_job(&self, request_id: &str) -> Result<ViafirmaSignatureJob, SignatureError> {
        self.store
            .load::<ViafirmaSignatureJob>(VIAFIRMA_JOBS, request_id)
            .await?
            .map(|(job, _)| job)
            .ok_or_else(|| SignatureError::RecordNotFound {
                what: "Viafirma job",
                request_id: request_id.to_string(),
            })
    }

    // ── OTP ────────────────────────────────────────────────────────────────

    /// Issue a fresh code for `request_id`, replacing any earlier one, and
    /// move a `pending` request to `awaiting-otp`.
    pub async fn generate_otp(&self, request_id: &str, phone: &str) -> Result<OtpChallenge, SignatureError> {
        let request = self.open_request(request_id).await?;
        let now = self.clock.now();
        let code = otp::generate_code(&mut rand::thread_rng());
        let record = otp::new_record(
            request_id,
            &code,
            phone,
            self.settings.otp_max_attempts,
            now,
            self.settings.otp_ttl(),
        );
        self.store.put(OTP_CODES, request_id, &record).await?;

        let actor = signer_actor(&request);
        self.audit
            .record(&create_audit_log(
                AuditEntityType::OtpVerification,
                request_id,
                AuditAction::OtpGenerated,
                &actor,
                json!({
                    "masked_phone": record.masked_phone,
                    "expires_at": crate::clock::rfc3339(record.expires_at),
                }),
                now,
            ))
            .await?;
        info!(request_id, phone = %record.masked_phone, "verification code issued");

        if request.status == SignatureStatus::Pending {
            self.advance(request_id, SignatureStatus::AwaitingOtp, None, None, &actor)
                .await?;
        }

        Ok(OtpChallenge {
            request_id: request_id.to_string(),
            code,
            masked_phone: record.masked_phone,
            expires_at: record.expires_at,
        })
    }

    /// Check `code` against the active record. Every counted attempt is
    /// persisted before the outcome is returned.
    pub async fn verify_otp(&self, request_id: &str, code: &str) -> Result<OtpVerification, OtpError> {
        let now = self.clock.now();
        let (outcome, attempts) = self
            .store
            .update::<OtpRecord, _, OtpError, _>(OTP_CODES, request_id, |current| {
                let record = current.ok_or_else(|| OtpError::NotFound {
                    request_id: request_id.to_string(),
                })?;
                let (write, outcome) = otp::verify_attempt(&record, code, now);
                Ok(match write {
                    Some(next) => {
                        let attempts = Some(next.attempts);
                        Update::Write(next, (outcome, attempts))
                    }
                    None => Update::Keep((outcome, None)),
                })
            })
            .await?;

        let actor = match self.request(request_id).await {
            Ok(request) => signer_actor(&request),
            Err(SignatureError::Storage(err)) => return Err(err.into()),
            Err(_) => Actor::system(),
        };
        let action = match (&outcome, attempts) {
            (Ok(_), _) => Some(AuditAction::OtpVerified),
            (Err(_), Some(_)) => Some(AuditAction::OtpFailed),
            (Err(_), None) => None,
        };
        if let Some(action) = action {
            self.audit
                .record(&create_audit_log(
                    AuditEntityType::OtpVerification,
                    request_id,
                    action,
                    &actor,
                    json!({ "attempts": attempts }),
                    now,
                ))
                .await?;
        }

        match &outcome {
            Ok(_) => {
                info!(request_id, "verification code accepted");
                self.signing_after_otp(request_id, &actor).await?;
            }
            Err(err) => warn!(request_id, attempts = ?attempts, error = %err, "verification code refused"),
        }
        outcome
    }

    /// A verified second factor lets an `awaiting-otp` request start signing.
    async fn signing_after_otp(&self, request_id: &str, actor: &Actor) -> Result<(), OtpError> {
        let result = match self.request(request_id).await {
            Ok(request) if request.status == SignatureStatus::AwaitingOtp => self
                .advance(request_id, SignatureStatus::Signing, None, None, actor)
                .await
                .map(drop),
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => Ok(()),
            Err(SignatureError::Storage(err)) => Err(err.into()),
            Err(err) => {
                debug!(request_id, error = %err, "request left as is after verification");
                Ok(())
            }
        }
    }

    // ── Signing ────────────────────────────────────────────────────────────

    /// Produce signature metadata for `signature_data` after the configured
    /// settling delay. Does not change the request.
    pub async fn simulate_signature(
        &self,
        request_id: &str,
        signature_data: &str,
    ) -> Result<SignatureMetadata, SignatureError> {
        let request = self.open_request(request_id).await?;
        let delay = self.settings.settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let metadata = build_signature_metadata(&request, signature_data, self.clock.now());
        debug!(request_id, format = ?metadata.format, "signature produced");
        Ok(metadata)
    }

    /// Mark a request `signed` with its metadata.
    pub async fn complete_signature(
        &self,
        request_id: &str,
        metadata: &SignatureMetadata,
        actor: &Actor,
    ) -> Result<QualifiedSignatureRequest, SignatureError> {
        self.advance(request_id, SignatureStatus::Signed, None, Some(metadata), actor)
            .await
    }

    /// Entry point for asynchronous completion reported by a provider.
    pub async fn apply_provider_callback(
        &self,
        request_id: &str,
        callback: &ProviderCallback,
    ) -> Result<QualifiedSignatureRequest, SignatureError> {
        let actor = Actor::system();
        self.audit
            .record(&create_audit_log(
                AuditEntityType::SignatureRequest,
                request_id,
                AuditAction::ProviderCallback,
                &actor,
                serde_json::to_value(callback).map_err(signflow_storage::StorageError::from)?,
                self.clock.now(),
            ))
            .await?;

        match callback {
            ProviderCallback::Authenticated => {
                self.advance(request_id, SignatureStatus::Signing, None, None, &actor)
                    .await
            }
            ProviderCallback::Signed { metadata } => {
                self.complete_signature(request_id, metadata, &actor).await
            }
            ProviderCallback::Rejected { reason } => {
                self.advance(request_id, SignatureStatus::Rejected, Some(reason.as_str()), None, &actor)
                    .await
            }
            ProviderCallback::Failed { error } => {
                self.advance(request_id, SignatureStatus::Failed, Some(error.as_str()), None, &actor)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signflow_storage::InMemoryStorage;
    use time::macros::datetime;
    use time::Duration;

    use crate::clock::FixedClock;
    use crate::hash::hash_document;

    type Orchestrator = SignatureOrchestrator<InMemoryStorage, Arc<FixedClock>>;

    const START: OffsetDateTime = datetime!(2026-04-10 08:00 UTC);

    fn config() -> SignflowConfig {
        let mut config = SignflowConfig::default();
        config.signature.settle_delay_ms = 0;
        config.providers = vec![
            ProviderConfig::Clave(ClaveConfig {
                broker_url: "https://broker.example/sp".into(),
                sp_issuer: "https://signflow.example/sp".into(),
                assertion_consumer_url: "https://signflow.example/acs".into(),
            }),
            ProviderConfig::Viafirma(ViafirmaConfig {
                api_url: "https://viafirma.example/api".into(),
                callback_url: "https://signflow.example/viafirma".into(),
                signing_page_url: "https://viafirma.example/sign/".into(),
            }),
        ];
        config
    }

    fn setup() -> (Orchestrator, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(START));
        let orch = SignatureOrchestrator::new(
            Arc::new(InMemoryStorage::new()),
            clock.clone(),
            &config(),
        );
        (orch, clock)
    }

    fn new_request_for(provider: SignatureProvider) -> NewSignatureRequest {
        NewSignatureRequest {
            document_id: "doc-1".into(),
            document_hash: hash_document("contract body"),
            project_id: "proj-1".into(),
            provider,
            signer: Signer {
                id: "u1".into(),
                name: "Ana García".into(),
                email: "ana@example.com".into(),
                national_id: Some("12345678Z".into()),
            },
            signature_level: SignatureLevel::Qualified,
            auth_method: None,
        }
    }

    async fn open(orch: &Orchestrator, provider: SignatureProvider) -> QualifiedSignatureRequest {
        orch.create_request(new_request_for(provider), &Actor::new("owner", "Owner"))
            .await
            .unwrap()
    }

    fn wrong_code(code: &str) -> &'static str {
        if code == "000000" {
            "111111"
        } else {
            "000000"
        }
    }

    #[tokio::test]
    async fn requests_expire_after_seven_days() {
        let (orch, _) = setup();
        let clave = open(&orch, SignatureProvider::Clave).await;
        let internal = open(&orch, SignatureProvider::Internal).await;

        assert_eq!(clave.status, SignatureStatus::Pending);
        assert_eq!(clave.expires_at, Some(START + Duration::days(7)));
        assert!(clave.otp_required);
        assert!(!internal.otp_required);

        let log = orch
            .audit()
            .entries_for(AuditEntityType::SignatureRequest, &clave.id)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::RequestCreated);
        assert_eq!(log[0].user_id, "owner");
    }

    #[tokio::test]
    async fn fallback_hashes_are_refused_for_new_requests() {
        let (orch, _) = setup();
        let mut new = new_request_for(SignatureProvider::Internal);
        new.document_hash = crate::hash::fallback_digest("contract body");

        assert!(matches!(
            orch.create_request(new, &Actor::system()).await,
            Err(SignatureError::UnsupportedDocumentHash {
                algorithm: HashAlgorithm::Base64Truncated
            })
        ));
    }

    #[tokio::test]
    async fn expiry_is_derived_on_read() {
        let (orch, clock) = setup();
        let req = open(&orch, SignatureProvider::Internal).await;

        clock.advance(Duration::days(7));
        assert_eq!(
            orch.effective_status(&req.id).await.unwrap(),
            SignatureStatus::Pending
        );

        clock.advance(Duration::seconds(1));
        assert_eq!(
            orch.effective_status(&req.id).await.unwrap(),
            SignatureStatus::Expired
        );
        // Nothing was written.
        assert_eq!(orch.request(&req.id).await.unwrap().status, SignatureStatus::Pending);

        let err = orch
            .transition_request(&req.id, SignatureStatus::Signing, None, &Actor::system())
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::Expired { .. }));
    }

    #[tokio::test]
    async fn transitions_are_forward_only() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Internal).await;
        let actor = Actor::system();

        let err = orch
            .transition_request(&req.id, SignatureStatus::Signed, None, &actor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignatureError::InvalidTransition {
                from: SignatureStatus::Pending,
                to: SignatureStatus::Signed
            }
        ));

        orch.transition_request(&req.id, SignatureStatus::Signing, None, &actor)
            .await
            .unwrap();
        let err = orch
            .transition_request(&req.id, SignatureStatus::AwaitingOtp, None, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::InvalidTransition { .. }));

        let cancelled = orch
            .transition_request(&req.id, SignatureStatus::Cancelled, Some("withdrawn"), &actor)
            .await
            .unwrap();
        assert_eq!(cancelled.failure_reason.as_deref(), Some("withdrawn"));

        let err = orch
            .transition_request(&req.id, SignatureStatus::Failed, None, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::RequestClosed { .. }));
    }

    #[tokio::test]
    async fn wrong_code_reports_two_remaining_attempts() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Clave).await;

        let challenge = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        assert_eq!(challenge.code.len(), 6);
        assert_eq!(challenge.masked_phone, "+34******000");
        assert_eq!(challenge.expires_at, START + Duration::minutes(5));

        let err = orch
            .verify_otp(&req.id, wrong_code(&challenge.code))
            .await
            .unwrap_err();
        assert!(matches!(err, OtpError::InvalidCode { remaining: 2 }));
        assert_eq!(err.to_string(), "invalid verification code, 2 attempts remaining");
    }

    #[tokio::test]
    async fn fourth_attempt_is_refused_without_checking_the_code() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Clave).await;
        let challenge = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        let wrong = wrong_code(&challenge.code);

        for _ in 0..3 {
            assert!(matches!(
                orch.verify_otp(&req.id, wrong).await,
                Err(OtpError::InvalidCode { .. })
            ));
        }
        assert!(matches!(
            orch.verify_otp(&req.id, &challenge.code).await,
            Err(OtpError::AttemptsExceeded)
        ));

        let (record, _) = orch
            .store
            .load::<OtpRecord>(OTP_CODES, &req.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.attempts, 3);
        assert!(!record.verified);
    }

    #[tokio::test]
    async fn verified_code_moves_request_to_signing() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Clave).await;
        let challenge = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        assert_eq!(
            orch.request(&req.id).await.unwrap().status,
            SignatureStatus::AwaitingOtp
        );

        let verification = orch.verify_otp(&req.id, &challenge.code).await.unwrap();
        assert_eq!(verification.verified_at, START);
        assert_eq!(orch.request(&req.id).await.unwrap().status, SignatureStatus::Signing);

        assert!(matches!(
            orch.verify_otp(&req.id, &challenge.code).await,
            Err(OtpError::AlreadyVerified)
        ));

        let actions: Vec<_> = orch
            .audit()
            .entries_for(AuditEntityType::OtpVerification, &req.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::OtpGenerated, AuditAction::OtpVerified]);
    }

    #[tokio::test]
    async fn otp_edge_cases() {
        let (orch, clock) = setup();
        assert!(matches!(
            orch.verify_otp("missing", "123456").await,
            Err(OtpError::NotFound { .. })
        ));

        let req = open(&orch, SignatureProvider::Clave).await;
        let first = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        let second = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        if first.code != second.code {
            assert!(matches!(
                orch.verify_otp(&req.id, &first.code).await,
                Err(OtpError::InvalidCode { remaining: 2 })
            ));
        }

        clock.advance(Duration::minutes(5) + Duration::seconds(1));
        assert!(matches!(
            orch.verify_otp(&req.id, &second.code).await,
            Err(OtpError::Expired)
        ));
    }

    #[tokio::test]
    async fn concurrent_attempts_are_all_counted() {
        let (orch, _) = setup();
        let orch = Arc::new(orch);
        let req = open(&orch, SignatureProvider::Clave).await;
        let challenge = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        let wrong = wrong_code(&challenge.code);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let orch = orch.clone();
            let id = req.id.clone();
            handles.push(tokio::spawn(async move { orch.verify_otp(&id, wrong).await }));
        }
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Err(OtpError::InvalidCode { .. })
            ));
        }

        let (record, _) = orch
            .store
            .load::<OtpRecord>(OTP_CODES, &req.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test]
    async fn clave_initiation_opens_short_session() {
        let (orch, clock) = setup();
        let req = open(&orch, SignatureProvider::Clave).await;

        let redirect = orch
            .initiate_clave(&req.id, ClaveAuthMethod::PinCode)
            .await
            .unwrap();
        assert_eq!(redirect.url, "https://broker.example/sp");
        assert_eq!(redirect.binding, "HTTP-POST");

        let session = orch.clave_session(&req.id).await.unwrap();
        assert_eq!(session.id, redirect.relay_state);
        assert_eq!(session.expires_at, START + Duration::minutes(15));
        assert_eq!(
            orch.request(&req.id).await.unwrap().auth_method,
            Some(ClaveAuthMethod::PinCode)
        );

        clock.advance(Duration::minutes(16));
        assert!(matches!(
            orch.clave_session(&req.id).await,
            Err(SignatureError::Expired { .. })
        ));
    }

    #[tokio::test]
    async fn provider_mismatch_is_a_provider_error() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Viafirma).await;
        assert!(matches!(
            orch.initiate_clave(&req.id, ClaveAuthMethod::Dnie).await,
            Err(SignatureError::Provider {
                provider: SignatureProvider::Clave,
                ..
            })
        ));

        let bare = SignatureOrchestrator::new(
            Arc::new(InMemoryStorage::new()),
            SystemClock,
            &SignflowConfig::default(),
        );
        let req = bare
            .create_request(new_request_for(SignatureProvider::Clave), &Actor::system())
            .await
            .unwrap();
        let err = bare
            .initiate_clave(&req.id, ClaveAuthMethod::Dnie)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn viafirma_job_carries_request_deadline() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Viafirma).await;

        let missing = ViafirmaCredentials {
            api_key: String::new(),
            api_secret: "secret".into(),
        };
        assert!(matches!(
            orch.initiate_viafirma(&req.id, &missing, None).await,
            Err(SignatureError::Provider { .. })
        ));

        let creds = ViafirmaCredentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
        };
        let init = orch
            .initiate_viafirma(&req.id, &creds, Some("wf-3"))
            .await
            .unwrap();
        assert_eq!(
            init.signing_url,
            format!("https://viafirma.example/sign/{}", init.job_id)
        );

        let job = orch.signature_job(&req.id).await.unwrap();
        assert_eq!(job.expires_at, req.expires_at);
        assert_eq!(job.workflow_id.as_deref(), Some("wf-3"));
        assert_eq!(job.callback_url, "https://signflow.example/viafirma");
    }

    #[tokio::test]
    async fn simulated_signature_completes_request() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Clave).await;
        let challenge = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        orch.verify_otp(&req.id, &challenge.code).await.unwrap();

        let metadata = orch.simulate_signature(&req.id, "drawn-signature").await.unwrap();
        assert_eq!(metadata.format, crate::signature::SignatureFormat::Xades);
        assert_eq!(orch.request(&req.id).await.unwrap().status, SignatureStatus::Signing);

        let signed = orch
            .complete_signature(&req.id, &metadata, &Actor::new("u1", "Ana García"))
            .await
            .unwrap();
        assert_eq!(signed.status, SignatureStatus::Signed);
        assert_eq!(signed.signed_at, Some(START));
        assert_eq!(signed.metadata.as_ref(), Some(&metadata));

        let actions: Vec<_> = orch
            .audit()
            .entries_for(AuditEntityType::SignatureRequest, &req.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::RequestCreated,
                AuditAction::RequestStatusChanged,
                AuditAction::RequestStatusChanged,
                AuditAction::RequestStatusChanged,
                AuditAction::SignatureCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn internal_signature_completes_from_pending() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Internal).await;

        let metadata = orch.simulate_signature(&req.id, "typed-name").await.unwrap();
        assert_eq!(metadata.format, crate::signature::SignatureFormat::Pades);
        let signed = orch
            .complete_signature(&req.id, &metadata, &Actor::new("u1", "Ana García"))
            .await
            .unwrap();
        assert_eq!(signed.status, SignatureStatus::Signed);
    }

    #[tokio::test]
    async fn clave_request_cannot_sign_before_code_is_verified() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Clave).await;
        let owner = Actor::new("owner", "Owner");
        let metadata = orch.simulate_signature(&req.id, "drawn-signature").await.unwrap();

        assert!(matches!(
            orch.transition_request(&req.id, SignatureStatus::Signing, None, &owner)
                .await,
            Err(SignatureError::OtpRequired { .. })
        ));
        assert!(matches!(
            orch.complete_signature(&req.id, &metadata, &owner).await,
            Err(SignatureError::OtpRequired { .. })
        ));
        assert_eq!(orch.request(&req.id).await.unwrap().status, SignatureStatus::Pending);

        // A code has been sent but not verified yet.
        let challenge = orch.generate_otp(&req.id, "+34600000000").await.unwrap();
        assert!(matches!(
            orch.apply_provider_callback(&req.id, &ProviderCallback::Authenticated)
                .await,
            Err(SignatureError::OtpRequired { .. })
        ));
        assert!(matches!(
            orch.apply_provider_callback(
                &req.id,
                &ProviderCallback::Signed {
                    metadata: metadata.clone()
                }
            )
            .await,
            Err(SignatureError::OtpRequired { .. })
        ));
        assert!(orch.verify_otp(&req.id, wrong_code(&challenge.code)).await.is_err());
        assert!(matches!(
            orch.complete_signature(&req.id, &metadata, &owner).await,
            Err(SignatureError::OtpRequired { .. })
        ));
        assert_eq!(
            orch.request(&req.id).await.unwrap().status,
            SignatureStatus::AwaitingOtp
        );

        orch.verify_otp(&req.id, &challenge.code).await.unwrap();
        let signed = orch.complete_signature(&req.id, &metadata, &owner).await.unwrap();
        assert_eq!(signed.status, SignatureStatus::Signed);
    }

    #[tokio::test]
    async fn callbacks_drive_the_request() {
        let (orch, _) = setup();
        let req = open(&orch, SignatureProvider::Viafirma).await;

        let authed = orch
            .apply_provider_callback(&req.id, &ProviderCallback::Authenticated)
            .await
            .unwrap();
        assert_eq!(authed.status, SignatureStatus::Signing);

        let rejected = ProviderCallback::Rejected {
            reason: "signer declined".into(),
        };
        let closed = orch.apply_provider_callback(&req.id, &rejected).await.unwrap();
        assert_eq!(closed.status, SignatureStatus::Rejected);
        assert_eq!(closed.failure_reason.as_deref(), Some("signer declined"));

        // Redelivery of the same outcome is harmless.
        let again = orch.apply_provider_callback(&req.id, &rejected).await.unwrap();
        assert_eq!(again, closed);

        let err = orch
            .apply_provider_callback(
                &req.id,
                &ProviderCallback::Failed {
                    error: "timeout".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::RequestClosed { .. }));
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let (orch, _) = setup();
        assert!(matches!(
            orch.request("nope").await,
            Err(SignatureError::RequestNotFound { .. })
        ));
        assert!(matches!(
            orch.signature_job("nope").await,
            Err(SignatureError::RecordNotFound { .. })
        ));
    }
}
