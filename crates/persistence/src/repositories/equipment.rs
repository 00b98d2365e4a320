//! Equipment repository for database operations.

use domain::models::Equipment;
use sqlx::PgPool;

use crate::entities::EquipmentEntity;
use crate::metrics::QueryTimer;

/// Repository for equipment-related database operations.
#[derive(Clone)]
pub struct EquipmentRepository {
    pool: PgPool,
}

impl EquipmentRepository {
    /// Creates a new EquipmentRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new piece of equipment.
    pub async fn insert(&self, equipment: &Equipment) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("insert_equipment");
        let result = sqlx::query(
            r#"
            INSERT INTO equipment (id, model, category, available)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(equipment.id)
        .bind(&equipment.model)
        .bind(&equipment.category)
        .bind(equipment.available)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Set the availability flag. Returns the number of rows updated.
    pub async fn set_availability(&self, id: i32, available: bool) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("set_equipment_availability");
        let result = sqlx::query(
            r#"
            UPDATE equipment
            SET available = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(available)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|r| r.rows_affected())
    }

    /// List all equipment ordered by id.
    pub async fn list_all(&self) -> Result<Vec<EquipmentEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_equipment");
        let result = sqlx::query_as::<_, EquipmentEntity>(
            r#"
            SELECT id, model, category, available, created_at, updated_at
            FROM equipment
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}
