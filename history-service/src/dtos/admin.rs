use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeRoleRequest {
    #[schema(example = "vip")]
    pub role: String,
    #[schema(example = "support escalation #4821")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChangeRoleResponse {
    pub ok: bool,
    pub user_id: Uuid,
    #[schema(example = "user")]
    pub old_role: String,
    #[schema(example = "vip")]
    pub new_role: String,
    pub at: DateTime<Utc>,
}
