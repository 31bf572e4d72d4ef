pub mod admin;
pub mod auth;
pub mod export;

use serde::Serialize;
use utoipa::ToSchema;

/// Generic error body rendered by the shared error type.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "forbidden")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
