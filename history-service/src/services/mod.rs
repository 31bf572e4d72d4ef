//! Services layer: business logic for authentication, export grants,
//! auditing, rate limiting, redaction, and mail delivery.

mod audit;
mod auth;
mod database;
mod email;
pub mod error;
mod export;
mod rate_limit;
pub mod redact;

pub use audit::{AuditSink, AuditTrail, LegacyEventSink};
pub use auth::{AuthService, AuthSettings, ChallengeIssued, ConsentDecl, SessionIssued};
pub use database::Database;
pub use email::{Mailer, NullMailer, SmtpMailer};
pub use error::{AuthFlowError, ExportTokenError};
pub use export::{
    decrypt_payload, derive_export_key, encrypt_payload, export_aad, ExportService, IssuedGrant,
    SUPPORTED_RESOURCE_TYPES,
};
pub use rate_limit::RateLimiter;
