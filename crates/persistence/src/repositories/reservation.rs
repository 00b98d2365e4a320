//! Reservation repository for database operations.

use domain::models::{Reservation, ReservationStatus};
use sqlx::PgPool;

use crate::entities::reservation::StatusColumns;
use crate::entities::{ReservationEntity, ReservationStatusDb};
use crate::metrics::QueryTimer;

/// Repository for reservation-related database operations.
#[derive(Clone)]
pub struct ReservationRepository {
    pool: PgPool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a newly created reservation.
    pub async fn insert(&self, reservation: &Reservation) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("insert_reservation");
        let columns = StatusColumns::from(&reservation.status);
        let result = sqlx::query(
            r#"
            INSERT INTO reservations (id, rentee, equipment_id, reservation_date, rented_for,
                                      status, approved_at, approved_by, rejected_at, rejected_by,
                                      rejection_reason, returned_at, expired_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(reservation.id)
        .bind(&reservation.rentee)
        .bind(reservation.equipment_id)
        .bind(reservation.reservation_date)
        .bind(reservation.rented_for)
        .bind(ReservationStatusDb::from(reservation.kind()))
        .bind(columns.approved_at)
        .bind(columns.approved_by)
        .bind(columns.rejected_at)
        .bind(columns.rejected_by)
        .bind(columns.rejection_reason)
        .bind(columns.returned_at)
        .bind(columns.expired_at)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Overwrite status and status columns. Returns the number of rows updated.
    pub async fn update_status(
        &self,
        id: i32,
        status: &ReservationStatus,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("update_reservation_status");
        let columns = StatusColumns::from(status);
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, approved_at = $3, approved_by = $4, rejected_at = $5,
                rejected_by = $6, rejection_reason = $7, returned_at = $8, expired_at = $9,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ReservationStatusDb::from(status.kind()))
        .bind(columns.approved_at)
        .bind(columns.approved_by)
        .bind(columns.rejected_at)
        .bind(columns.rejected_by)
        .bind(columns.rejection_reason)
        .bind(columns.returned_at)
        .bind(columns.expired_at)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|r| r.rows_affected())
    }

    /// List all reservations ordered by id.
    pub async fn list_all(&self) -> Result<Vec<ReservationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_reservations");
        let result = sqlx::query_as::<_, ReservationEntity>(
            r#"
            SELECT id, rentee, equipment_id, reservation_date, rented_for, status,
                   approved_at, approved_by, rejected_at, rejected_by, rejection_reason,
                   returned_at, expired_at, updated_at
            FROM reservations
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}
