use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RequestChallengeRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
}

/// Always 200 with this shape, issued or not: the response must not reveal
/// whether the email exists or the caller was rate limited.
#[derive(Debug, Serialize, ToSchema)]
pub struct RequestChallengeResponse {
    pub ok: bool,
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub challenge_id: Uuid,
    #[schema(example = "If the address is valid, a sign-in code is on its way.")]
    pub message: String,
    /// Populated only when the dev-only exposure flag is on.
    pub dev_otp: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentDeclDto {
    #[schema(example = "terms_of_service")]
    pub doc_type: String,
    #[schema(example = "2024-01")]
    pub version: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyChallengeRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    pub challenge_id: Uuid,

    #[validate(length(min = 6, max = 6, message = "OTP must be 6 digits"))]
    #[schema(example = "042099")]
    pub otp: String,

    #[serde(default)]
    pub consents: Vec<ConsentDeclDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub access_token: String,
    #[schema(example = "bearer")]
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: Uuid,
    #[schema(example = "user")]
    pub role: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub ok: bool,
}
