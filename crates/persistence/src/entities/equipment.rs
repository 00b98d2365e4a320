//! Equipment entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the equipment table.
#[derive(Debug, Clone, FromRow)]
pub struct EquipmentEntity {
    pub id: i32,
    pub model: String,
    pub category: String,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EquipmentEntity> for domain::models::Equipment {
    fn from(entity: EquipmentEntity) -> Self {
        Self {
            id: entity.id,
            model: entity.model,
            category: entity.category,
            available: entity.available,
        }
    }
}
