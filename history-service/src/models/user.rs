//! User model - pseudonymous accounts keyed by email HMAC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// The closed role set. There is no way to add roles at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Public,
    User,
    Vip,
    Dealer,
    Moderator,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Public => "public",
            Role::User => "user",
            Role::Vip => "vip",
            Role::Dealer => "dealer",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }

    /// Every assignable role, in escalation order.
    pub const ALL: [Role; 7] = [
        Role::Public,
        Role::User,
        Role::Vip,
        Role::Dealer,
        Role::Moderator,
        Role::Admin,
        Role::Superadmin,
    ];
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Role::Public),
            "user" => Ok(Role::User),
            "vip" => Ok(Role::Vip),
            "dealer" => Ok(Role::Dealer),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller, resolved once at the authentication boundary
/// and passed by value from there on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

/// User state codes. Accounts are never physically deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

/// User entity. Holds only the keyed hash of the normalized email; the raw
/// address never reaches storage.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email_hmac: String,
    pub role_code: String,
    pub status_code: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with the default role.
    pub fn new(email_hmac: String) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email_hmac,
            role_code: Role::User.as_str().to_string(),
            status_code: UserStatus::Active.as_str().to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Result<Role, String> {
        self.role_code.parse()
    }

    pub fn is_active(&self) -> bool {
        self.status_code == UserStatus::Active.as_str()
    }
}
