//! Export grant store and the full/redacted export paths.
//!
//! Grants are one-time (or few-use), TTL-bound tokens minted by a
//! superadmin. The full export is encrypted with a key derived from the
//! server secret plus a fixed context string, so the secret cannot be
//! replayed as an encryption key for any other purpose.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use service_core::error::AppError;
use sha2::Sha256;
use uuid::Uuid;

use crate::models::{
    Actor, AuditAction, AuditEvent, AuditResult, ExportGrant, ReasonCode, Role,
};
use crate::services::redact::{redact, RedactMode};
use crate::utils::crypto;

use super::audit::AuditTrail;
use super::database::Database;
use super::error::ExportTokenError;

/// Resource types the export surface understands.
pub const SUPPORTED_RESOURCE_TYPES: &[&str] = &["vehicle"];

/// Context string for export-payload key derivation.
const EXPORT_KEY_CONTEXT: &str = "export-grant:v1";

/// Namespace for grant-token hashes.
const EXPORT_TOKEN_PURPOSE: &str = "export-token";

/// A freshly issued grant. The raw token is returned exactly once.
#[derive(Debug)]
pub struct IssuedGrant {
    pub export_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ExportService {
    db: Database,
    audit: AuditTrail,
    secret: String,
}

impl ExportService {
    pub fn new(db: Database, audit: AuditTrail, secret: String) -> Self {
        Self { db, audit, secret }
    }

    fn check_resource_type(resource_type: &str) -> Result<(), AppError> {
        if SUPPORTED_RESOURCE_TYPES.contains(&resource_type) {
            Ok(())
        } else {
            Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown resource type: {}",
                resource_type
            )))
        }
    }

    /// Mint a one-time export grant. RBAC (superadmin only) is enforced by
    /// the route guard, not here; TTL and use-count clamps are enforced
    /// here regardless of caller input.
    pub async fn issue_grant(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        issuer: &Actor,
        ttl_seconds: Option<i64>,
        uses: Option<i32>,
    ) -> Result<IssuedGrant, AppError> {
        Self::check_resource_type(resource_type)?;

        let token = crypto::random_token();
        let token_hmac = crypto::derive(&self.secret, EXPORT_TOKEN_PURPOSE, &token)?;
        let grant = ExportGrant::new(
            resource_type.to_string(),
            resource_id,
            token_hmac,
            issuer.role.as_str().to_string(),
            issuer.user_id,
            ttl_seconds,
            uses,
        );

        let event = AuditEvent::new(
            AuditAction::ExportGrantIssued,
            AuditResult::Success,
            Some(issuer.user_id),
            Some(resource_type),
            Some(resource_id),
            None,
            Some(serde_json::json!({
                "grant_id": grant.grant_id,
                "ttl_seconds": (grant.expires_at - grant.created_at).num_seconds(),
                "uses": grant.remaining_uses,
            })),
        );
        self.db.create_export_grant(&grant, &event).await?;
        self.audit.mirror(&event).await;

        Ok(IssuedGrant {
            export_token: token,
            expires_at: grant.expires_at,
        })
    }

    /// Spend one use of a grant. Consumption is an atomic conditional
    /// decrement; of two callers racing on the last use, exactly one wins.
    pub async fn consume_grant(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        raw_token: &str,
    ) -> Result<ExportGrant, ExportTokenError> {
        Self::check_resource_type(resource_type).map_err(ExportTokenError::Internal)?;

        let token_hmac = crypto::derive(&self.secret, EXPORT_TOKEN_PURPOSE, raw_token)
            .map_err(AppError::InternalError)?;

        let Some(grant) = self
            .db
            .find_export_grant(resource_type, resource_id, &token_hmac)
            .await?
        else {
            self.audit_consume_denied(resource_type, resource_id, None, ReasonCode::TokenInvalid)
                .await?;
            return Err(ExportTokenError::TokenInvalid);
        };

        let now = Utc::now();
        if grant.is_expired(now) {
            self.audit_consume_denied(
                resource_type,
                resource_id,
                Some(grant.grant_id),
                ReasonCode::TokenExpired,
            )
            .await?;
            return Err(ExportTokenError::TokenExpired);
        }

        let event = AuditEvent::new(
            AuditAction::ExportGrantConsumed,
            AuditResult::Success,
            Some(grant.issued_by_user_id),
            Some(resource_type),
            Some(resource_id),
            None,
            Some(serde_json::json!({
                "grant_id": grant.grant_id,
                "remaining_uses": grant.remaining_uses - 1,
            })),
        );
        let consumed = grant.remaining_uses > 0
            && self.db.consume_grant_use(grant.grant_id, &event).await?;
        if !consumed {
            // The conditional update also fails when the grant expired
            // between the read and the write; report the current state.
            let reason = match self
                .db
                .find_export_grant(resource_type, resource_id, &token_hmac)
                .await?
            {
                Some(fresh) if fresh.is_expired(Utc::now()) => ReasonCode::TokenExpired,
                _ => ReasonCode::TokenUsed,
            };
            self.audit_consume_denied(resource_type, resource_id, Some(grant.grant_id), reason)
                .await?;
            return Err(match reason {
                ReasonCode::TokenExpired => ExportTokenError::TokenExpired,
                _ => ExportTokenError::TokenUsed,
            });
        }
        self.audit.mirror(&event).await;

        Ok(grant)
    }

    /// Consume a grant and return the full (unredacted) resource row,
    /// encrypted under the derived export key. The caller decrypts with
    /// knowledge of the same derivation.
    pub async fn full_export(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        raw_token: &str,
        actor: &Actor,
    ) -> Result<String, ExportTokenError> {
        let grant = self
            .consume_grant(resource_type, resource_id, raw_token)
            .await?;

        let vehicle = self
            .db
            .find_vehicle_by_id(resource_id)
            .await?
            .ok_or_else(|| {
                ExportTokenError::Internal(AppError::NotFound(anyhow::anyhow!(
                    "No such {}: {}",
                    resource_type,
                    resource_id
                )))
            })?;

        let plaintext = vehicle.to_full_json().to_string();
        let key = derive_export_key(&self.secret).map_err(AppError::InternalError)?;
        let aad = export_aad(resource_type, resource_id);
        let ciphertext =
            encrypt_payload(&key, plaintext.as_bytes(), &aad).map_err(AppError::InternalError)?;

        let event = AuditEvent::new(
            AuditAction::ExportServed,
            AuditResult::Success,
            Some(actor.user_id),
            Some(resource_type),
            Some(resource_id),
            None,
            Some(serde_json::json!({ "grant_id": grant.grant_id })),
        );
        self.audit.record(&event).await?;

        Ok(URL_SAFE_NO_PAD.encode(ciphertext))
    }

    /// Redacted read path: the shape every non-privileged role sees.
    pub async fn redacted_export(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        actor: &Actor,
    ) -> Result<serde_json::Value, AppError> {
        Self::check_resource_type(resource_type)?;

        let vehicle = self
            .db
            .find_vehicle_by_id(resource_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("No such {}: {}", resource_type, resource_id))
            })?;

        let data = redact(
            &vehicle.to_full_json(),
            RedactMode::DenylistBySubstring,
            &self.secret,
        )
        .map_err(AppError::InternalError)?;

        let event = AuditEvent::new(
            AuditAction::ExportServed,
            AuditResult::Success,
            Some(actor.user_id),
            Some(resource_type),
            Some(resource_id),
            None,
            Some(serde_json::json!({ "mode": "redacted" })),
        );
        self.audit.record(&event).await?;

        Ok(data)
    }

    /// Roles allowed to read the redacted view of a resource type.
    /// Moderator is excluded everywhere by the blanket guard; it is not
    /// re-listed here.
    pub fn allowed_roles_for(resource_type: &str) -> &'static [Role] {
        match resource_type {
            "vehicle" => &[
                Role::User,
                Role::Vip,
                Role::Dealer,
                Role::Admin,
                Role::Superadmin,
            ],
            _ => &[],
        }
    }

    async fn audit_consume_denied(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        grant_id: Option<Uuid>,
        reason: ReasonCode,
    ) -> Result<(), AppError> {
        let event = AuditEvent::new(
            AuditAction::ExportGrantConsumed,
            AuditResult::Denied,
            None,
            Some(resource_type),
            Some(resource_id),
            Some(reason),
            grant_id.map(|id| serde_json::json!({ "grant_id": id })),
        );
        self.audit.record(&event).await
    }
}

/// Derive the 32-byte export encryption key from the server secret and the
/// fixed context string.
pub fn derive_export_key(secret: &str) -> Result<[u8; 32], anyhow::Error> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(EXPORT_KEY_CONTEXT.as_bytes());
    Ok(mac.finalize().into_bytes().into())
}

/// AAD binding a ciphertext to its resource.
pub fn export_aad(resource_type: &str, resource_id: Uuid) -> Vec<u8> {
    format!("export:{}:{}", resource_type, resource_id).into_bytes()
}

/// Encrypt with ChaCha20-Poly1305. Returns `nonce (12 bytes) || ciphertext`.
pub fn encrypt_payload(
    key: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, anyhow::Error> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt `nonce || ciphertext` produced by `encrypt_payload`.
pub fn decrypt_payload(
    key: &[u8; 32],
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, anyhow::Error> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("Decryption failure: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "export-test-secret-with-plenty-of-entropy";

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = derive_export_key(SECRET).unwrap();
        let aad = export_aad("vehicle", Uuid::new_v4());
        let plaintext = br#"{"vin":"WVWZZZ1JZXW000001"}"#;

        let encrypted = encrypt_payload(&key, plaintext, &aad).unwrap();
        assert_ne!(&encrypted[12..], plaintext.as_slice());

        let decrypted = decrypt_payload(&key, &encrypted, &aad).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_fails_with_wrong_resource_binding() {
        let key = derive_export_key(SECRET).unwrap();
        let encrypted =
            encrypt_payload(&key, b"payload", &export_aad("vehicle", Uuid::new_v4())).unwrap();

        let result = decrypt_payload(&key, &encrypted, &export_aad("vehicle", Uuid::new_v4()));
        assert!(result.is_err());
    }

    #[test]
    fn export_key_differs_from_plain_secret_hash() {
        // The derived key must not equal a keyed hash minted for another
        // purpose with the same secret.
        let key = derive_export_key(SECRET).unwrap();
        let other = crypto::keyed_hash(SECRET, "something-else").unwrap();
        assert_ne!(URL_SAFE_NO_PAD.encode(key), other);
    }

    #[test]
    fn moderator_never_appears_in_resource_role_sets() {
        for resource_type in SUPPORTED_RESOURCE_TYPES {
            assert!(!ExportService::allowed_roles_for(resource_type).contains(&Role::Moderator));
        }
    }
}
