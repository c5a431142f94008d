//! signflow-core: document approval flows and qualified electronic signatures.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`FlowEngine`] -- pure approve / reject / cancel transitions
//! - [`FlowRepository`] -- persisted flows with per-flow serialization
//! - [`SignatureOrchestrator`] -- signature requests, providers and OTP
//! - [`AuditLogger`] -- append-only audit trail
//! - [`DocumentHash`] -- content binding for signature requests
//! - [`SignflowConfig`] -- runtime configuration

pub mod audit;
pub mod clock;
pub mod config;
pub mod flow;
pub mod hash;
pub mod notify;
pub mod signature;
pub mod store;

// ── Convenience re-exports: key types ────────────────────────────────

pub use audit::{create_audit_log, Actor, AuditAction, AuditEntityType, AuditLogEntry, AuditLogger};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, FlowSettings, SignatureSettings, SignflowConfig};
pub use flow::{
    ApprovalFlow, ApprovalStep, EngineMode, FlowEngine, FlowError, FlowRepository, FlowStatus,
    FlowType, FlowUpdate, NewFlow, StepSpec, StepStatus,
};
pub use hash::{hash_document, DocumentHash, HashAlgorithm};
pub use notify::{FlowNotification, NotificationKind};
pub use signature::{
    derive_effective_status, is_expired, time_remaining, OtpError, QualifiedSignatureRequest,
    SignatureError, SignatureOrchestrator, SignatureProvider, SignatureStatus,
};
pub use store::{RecordStore, Update};

// ── Convenience re-exports: storage ──────────────────────────────────

pub use signflow_storage::{InMemoryStorage, SignflowStorage, StorageError};
