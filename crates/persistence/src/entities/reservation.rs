//! Reservation entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{Reservation, ReservationStatus, StatusKind};
use domain::StorageError;
use sqlx::FromRow;

/// Database enum for reservation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
pub enum ReservationStatusDb {
    Unapproved,
    Approved,
    Rejected,
    Returned,
    Expired,
}

impl From<StatusKind> for ReservationStatusDb {
    fn from(kind: StatusKind) -> Self {
        match kind {
            StatusKind::Unapproved => ReservationStatusDb::Unapproved,
            StatusKind::Approved => ReservationStatusDb::Approved,
            StatusKind::Rejected => ReservationStatusDb::Rejected,
            StatusKind::Returned => ReservationStatusDb::Returned,
            StatusKind::Expired => ReservationStatusDb::Expired,
        }
    }
}

/// Status columns of a reservation row, flattened from `ReservationStatus`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusColumns {
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub returned_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl From<&ReservationStatus> for StatusColumns {
    fn from(status: &ReservationStatus) -> Self {
        match status {
            ReservationStatus::Unapproved => StatusColumns::default(),
            ReservationStatus::Approved {
                approved_at,
                approved_by,
            } => StatusColumns {
                approved_at: Some(*approved_at),
                approved_by: Some(approved_by.clone()),
                ..Default::default()
            },
            ReservationStatus::Rejected {
                rejected_at,
                rejected_by,
                reason,
            } => StatusColumns {
                rejected_at: Some(*rejected_at),
                rejected_by: Some(rejected_by.clone()),
                rejection_reason: Some(reason.clone()),
                ..Default::default()
            },
            ReservationStatus::Returned {
                approved_at,
                approved_by,
                returned_at,
            } => StatusColumns {
                approved_at: Some(*approved_at),
                approved_by: Some(approved_by.clone()),
                returned_at: Some(*returned_at),
                ..Default::default()
            },
            ReservationStatus::Expired { expired_at } => StatusColumns {
                expired_at: Some(*expired_at),
                ..Default::default()
            },
        }
    }
}

/// Database row mapping for the reservations table.
#[derive(Debug, Clone, FromRow)]
pub struct ReservationEntity {
    pub id: i32,
    pub rentee: String,
    pub equipment_id: i32,
    pub reservation_date: DateTime<Utc>,
    pub rented_for: DateTime<Utc>,
    pub status: ReservationStatusDb,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub returned_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationEntity {
    fn status(&self) -> Option<ReservationStatus> {
        let status = match self.status {
            ReservationStatusDb::Unapproved => ReservationStatus::Unapproved,
            ReservationStatusDb::Approved => ReservationStatus::Approved {
                approved_at: self.approved_at?,
                approved_by: self.approved_by.clone()?,
            },
            ReservationStatusDb::Rejected => ReservationStatus::Rejected {
                rejected_at: self.rejected_at?,
                rejected_by: self.rejected_by.clone()?,
                reason: self.rejection_reason.clone().unwrap_or_default(),
            },
            ReservationStatusDb::Returned => ReservationStatus::Returned {
                approved_at: self.approved_at?,
                approved_by: self.approved_by.clone()?,
                returned_at: self.returned_at?,
            },
            ReservationStatusDb::Expired => ReservationStatus::Expired {
                expired_at: self.expired_at?,
            },
        };
        Some(status)
    }
}

impl TryFrom<ReservationEntity> for Reservation {
    type Error = StorageError;

    fn try_from(entity: ReservationEntity) -> Result<Self, Self::Error> {
        let status = entity.status().ok_or_else(|| {
            StorageError::Database(format!(
                "Reservation {} is {:?} but its status columns are incomplete",
                entity.id, entity.status
            ))
        })?;
        Ok(Reservation {
            id: entity.id,
            rentee: entity.rentee,
            equipment_id: entity.equipment_id,
            reservation_date: entity.reservation_date,
            rented_for: entity.rented_for,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(status: ReservationStatusDb, columns: StatusColumns) -> ReservationEntity {
        let now = Utc::now();
        ReservationEntity {
            id: 9,
            rentee: "john".to_string(),
            equipment_id: 7,
            reservation_date: now,
            rented_for: now,
            status,
            approved_at: columns.approved_at,
            approved_by: columns.approved_by,
            rejected_at: columns.rejected_at,
            rejected_by: columns.rejected_by,
            rejection_reason: columns.rejection_reason,
            returned_at: columns.returned_at,
            expired_at: columns.expired_at,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_columns_for_returned() {
        let now = Utc::now();
        let status = ReservationStatus::Returned {
            approved_at: now,
            approved_by: "mgr1".to_string(),
            returned_at: now,
        };
        let columns = StatusColumns::from(&status);
        assert_eq!(columns.approved_by.as_deref(), Some("mgr1"));
        assert_eq!(columns.returned_at, Some(now));
        assert!(columns.rejected_at.is_none());
        assert!(columns.expired_at.is_none());
    }

    #[test]
    fn test_entity_to_reservation() {
        let now = Utc::now();
        let status = ReservationStatus::Rejected {
            rejected_at: now,
            rejected_by: "mgr1".to_string(),
            reason: "damaged".to_string(),
        };
        let row = entity(ReservationStatusDb::Rejected, StatusColumns::from(&status));
        let reservation = Reservation::try_from(row).unwrap();
        assert_eq!(reservation.status, status);
        assert_eq!(reservation.equipment_id, 7);
    }

    #[test]
    fn test_entity_with_missing_columns_is_rejected() {
        let row = entity(ReservationStatusDb::Approved, StatusColumns::default());
        let err = Reservation::try_from(row).unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));
    }

    #[test]
    fn test_status_db_from_kind() {
        assert_eq!(
            ReservationStatusDb::from(StatusKind::Expired),
            ReservationStatusDb::Expired
        );
    }
}
