//! Vehicle record model - the resource behind the export endpoints.
//!
//! Vehicle CRUD lives outside this service; rows here are read-only inputs
//! to the redaction engine and the full-export path.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct VehicleRecord {
    pub vehicle_id: Uuid,
    pub org_id: Uuid,
    pub vin: String,
    pub owner_email: String,
    pub mileage_km: i32,
    pub service_notes: String,
    pub created_at: DateTime<Utc>,
}

impl VehicleRecord {
    /// Full (unredacted) serialization. Only the export-grant path may send
    /// this shape past the trust boundary, and only encrypted.
    pub fn to_full_json(&self) -> serde_json::Value {
        serde_json::json!({
            "vehicle_id": self.vehicle_id,
            "org_id": self.org_id,
            "vin": self.vin,
            "owner_email": self.owner_email,
            "mileage_km": self.mileage_km,
            "service_notes": self.service_notes,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}
