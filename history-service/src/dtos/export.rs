use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IssueGrantRequest {
    /// Clamped to the bounded grant window regardless of the value supplied.
    #[schema(example = 600)]
    pub ttl_seconds: Option<i64>,
    /// Clamped to 1..=3; defaults to a true one-time token.
    #[schema(example = 1)]
    pub uses: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IssueGrantResponse {
    pub export_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FullExportResponse {
    /// base64url(nonce || ChaCha20-Poly1305 ciphertext) of the full row.
    pub ciphertext: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RedactedExportResponse {
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}
