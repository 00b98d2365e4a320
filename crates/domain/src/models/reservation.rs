//! Reservation domain models and the reservation lifecycle state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::equipment::EquipmentId;

/// Identifier of a reservation, assigned monotonically by the store.
pub type ReservationId = i32;

/// Discriminant of a reservation's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Unapproved,
    Approved,
    Rejected,
    Returned,
    Expired,
}

impl StatusKind {
    /// Every lifecycle state, in workflow order.
    pub const ALL: [StatusKind; 5] = [
        StatusKind::Unapproved,
        StatusKind::Approved,
        StatusKind::Rejected,
        StatusKind::Returned,
        StatusKind::Expired,
    ];

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusKind::Rejected | StatusKind::Returned | StatusKind::Expired
        )
    }

    /// Whether a reservation in this state keeps its equipment unavailable.
    pub fn holds_equipment(self) -> bool {
        matches!(self, StatusKind::Unapproved | StatusKind::Approved)
    }

    /// Edges of the lifecycle graph.
    ///
    /// `Unapproved -> {Approved, Rejected, Expired}`, `Approved -> {Returned}`.
    pub fn can_transition_to(self, target: StatusKind) -> bool {
        matches!(
            (self, target),
            (StatusKind::Unapproved, StatusKind::Approved)
                | (StatusKind::Unapproved, StatusKind::Rejected)
                | (StatusKind::Unapproved, StatusKind::Expired)
                | (StatusKind::Approved, StatusKind::Returned)
        )
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusKind::Unapproved => write!(f, "unapproved"),
            StatusKind::Approved => write!(f, "approved"),
            StatusKind::Rejected => write!(f, "rejected"),
            StatusKind::Returned => write!(f, "returned"),
            StatusKind::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for StatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unapproved" => Ok(StatusKind::Unapproved),
            "approved" => Ok(StatusKind::Approved),
            "rejected" => Ok(StatusKind::Rejected),
            "returned" => Ok(StatusKind::Returned),
            "expired" => Ok(StatusKind::Expired),
            other => Err(format!("Unknown reservation status: {}", other)),
        }
    }
}

/// Current lifecycle state together with the fields that only exist in that state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ReservationStatus {
    Unapproved,
    Approved {
        approved_at: DateTime<Utc>,
        approved_by: String,
    },
    Rejected {
        rejected_at: DateTime<Utc>,
        rejected_by: String,
        reason: String,
    },
    Returned {
        approved_at: DateTime<Utc>,
        approved_by: String,
        returned_at: DateTime<Utc>,
    },
    Expired {
        expired_at: DateTime<Utc>,
    },
}

impl ReservationStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            ReservationStatus::Unapproved => StatusKind::Unapproved,
            ReservationStatus::Approved { .. } => StatusKind::Approved,
            ReservationStatus::Rejected { .. } => StatusKind::Rejected,
            ReservationStatus::Returned { .. } => StatusKind::Returned,
            ReservationStatus::Expired { .. } => StatusKind::Expired,
        }
    }
}

/// A requested state change, carrying the fields the target state records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Approve {
        manager_id: String,
        at: DateTime<Utc>,
    },
    Reject {
        manager_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    Return {
        at: DateTime<Utc>,
    },
    Expire {
        at: DateTime<Utc>,
    },
}

impl Transition {
    /// The state this transition moves a reservation into.
    pub fn target(&self) -> StatusKind {
        match self {
            Transition::Approve { .. } => StatusKind::Approved,
            Transition::Reject { .. } => StatusKind::Rejected,
            Transition::Return { .. } => StatusKind::Returned,
            Transition::Expire { .. } => StatusKind::Expired,
        }
    }

    /// Computes the next status, or `None` when the lifecycle graph has no such edge.
    pub fn apply(self, current: &ReservationStatus) -> Option<ReservationStatus> {
        match (current, self) {
            (ReservationStatus::Unapproved, Transition::Approve { manager_id, at }) => {
                Some(ReservationStatus::Approved {
                    approved_at: at,
                    approved_by: manager_id,
                })
            }
            (
                ReservationStatus::Unapproved,
                Transition::Reject {
                    manager_id,
                    reason,
                    at,
                },
            ) => Some(ReservationStatus::Rejected {
                rejected_at: at,
                rejected_by: manager_id,
                reason,
            }),
            (ReservationStatus::Unapproved, Transition::Expire { at }) => {
                Some(ReservationStatus::Expired { expired_at: at })
            }
            (
                ReservationStatus::Approved {
                    approved_at,
                    approved_by,
                },
                Transition::Return { at },
            ) => Some(ReservationStatus::Returned {
                approved_at: *approved_at,
                approved_by: approved_by.clone(),
                returned_at: at,
            }),
            _ => None,
        }
    }
}

/// An equipment reservation.
///
/// Only `status` changes after creation; rentee and equipment references are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Reservation {
    pub id: ReservationId,
    pub rentee: String,
    pub equipment_id: EquipmentId,
    pub reservation_date: DateTime<Utc>,
    pub rented_for: DateTime<Utc>,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }

    /// Instant at which an unapproved reservation expires under `timeout_secs`.
    pub fn expires_at(&self, timeout_secs: u64) -> DateTime<Utc> {
        i64::try_from(timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|timeout| self.reservation_date.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whole days past the agreed end of the rental.
    ///
    /// Only meaningful while the equipment is out, so `None` unless Approved.
    pub fn days_overdue(&self, now: DateTime<Utc>) -> Option<i64> {
        match self.status {
            ReservationStatus::Approved { .. } => {
                Some(shared::time::days_between(self.rented_for, now))
            }
            _ => None,
        }
    }

    /// Approved and past its agreed end date.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.kind() == StatusKind::Approved && self.rented_for < now
    }
}

/// Request to reserve a piece of equipment.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateReservationRequest {
    pub equipment_id: EquipmentId,

    #[validate(custom(function = "validate_user_id"))]
    pub rentee_id: String,

    pub rented_for: DateTime<Utc>,
}

/// Response after creating a reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateReservationResponse {
    pub id: ReservationId,
    pub status: StatusKind,
    pub expires_at: DateTime<Utc>,
}

/// Request to approve a reservation.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct ApproveReservationRequest {
    #[validate(custom(function = "validate_user_id"))]
    pub manager_id: String,
}

/// Request to reject a reservation.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct RejectReservationRequest {
    #[validate(custom(function = "validate_user_id"))]
    pub manager_id: String,

    #[validate(length(
        min = 1,
        max = 500,
        message = "Reason must be between 1 and 500 characters"
    ))]
    pub reason: String,
}

/// Query parameters for listing reservations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListReservationsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub rentee: Option<String>,
}

/// Response for listing reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListReservationsResponse {
    pub data: Vec<Reservation>,
    pub total: usize,
}

/// Body for reading or updating the expiration timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExpirationTimeoutBody {
    pub seconds: u64,
}

/// Number of overdue rentals held by a rentee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OverdueResponse {
    pub rentee: String,
    pub overdue: usize,
}

/// Outcome of a manual expiration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExpireReservationResponse {
    pub id: ReservationId,
    /// False when the reservation had already left the unapproved state.
    pub expired: bool,
    pub status: StatusKind,
}

fn validate_user_id(id: &str) -> Result<(), validator::ValidationError> {
    shared::validation::validate_user_id(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
    }

    fn unapproved() -> Reservation {
        Reservation {
            id: 1,
            rentee: "john".to_string(),
            equipment_id: 7,
            reservation_date: created_at(),
            rented_for: created_at() + Duration::days(3),
            status: ReservationStatus::Unapproved,
        }
    }

    #[test]
    fn test_status_kind_display() {
        assert_eq!(StatusKind::Unapproved.to_string(), "unapproved");
        assert_eq!(StatusKind::Approved.to_string(), "approved");
        assert_eq!(StatusKind::Rejected.to_string(), "rejected");
        assert_eq!(StatusKind::Returned.to_string(), "returned");
        assert_eq!(StatusKind::Expired.to_string(), "expired");
    }

    #[test]
    fn test_status_kind_parse() {
        for kind in StatusKind::ALL {
            assert_eq!(kind.to_string().parse::<StatusKind>(), Ok(kind));
        }
        assert!("pending".parse::<StatusKind>().is_err());
    }

    #[test]
    fn test_lifecycle_graph() {
        use StatusKind::*;
        let allowed = [
            (Unapproved, Approved),
            (Unapproved, Rejected),
            (Unapproved, Expired),
            (Approved, Returned),
        ];
        for from in StatusKind::ALL {
            for to in StatusKind::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_hold_no_equipment() {
        for kind in StatusKind::ALL {
            assert_eq!(kind.is_terminal(), !kind.holds_equipment());
            if kind.is_terminal() {
                assert!(StatusKind::ALL.iter().all(|t| !kind.can_transition_to(*t)));
            }
        }
    }

    #[test]
    fn test_apply_matches_graph() {
        let at = created_at();
        let statuses = [
            ReservationStatus::Unapproved,
            ReservationStatus::Approved {
                approved_at: at,
                approved_by: "mgr1".to_string(),
            },
            ReservationStatus::Rejected {
                rejected_at: at,
                rejected_by: "mgr1".to_string(),
                reason: "damaged".to_string(),
            },
            ReservationStatus::Returned {
                approved_at: at,
                approved_by: "mgr1".to_string(),
                returned_at: at,
            },
            ReservationStatus::Expired { expired_at: at },
        ];
        let transitions = [
            Transition::Approve {
                manager_id: "mgr1".to_string(),
                at,
            },
            Transition::Reject {
                manager_id: "mgr1".to_string(),
                reason: "damaged".to_string(),
                at,
            },
            Transition::Return { at },
            Transition::Expire { at },
        ];

        for status in &statuses {
            for transition in &transitions {
                let target = transition.target();
                let next = transition.clone().apply(status);
                assert_eq!(next.is_some(), status.kind().can_transition_to(target));
                if let Some(next) = next {
                    assert_eq!(next.kind(), target);
                }
            }
        }
    }

    #[test]
    fn test_return_keeps_approval_fields() {
        let approved_at = created_at() + Duration::hours(1);
        let approved = ReservationStatus::Approved {
            approved_at,
            approved_by: "mgr1".to_string(),
        };
        let returned_at = created_at() + Duration::days(2);
        let next = Transition::Return { at: returned_at }.apply(&approved).unwrap();
        assert_eq!(
            next,
            ReservationStatus::Returned {
                approved_at,
                approved_by: "mgr1".to_string(),
                returned_at,
            }
        );
    }

    #[test]
    fn test_expires_at() {
        let reservation = unapproved();
        assert_eq!(
            reservation.expires_at(90),
            created_at() + Duration::seconds(90)
        );
    }

    #[test]
    fn test_days_overdue_only_when_approved() {
        let mut reservation = unapproved();
        let now = reservation.rented_for + Duration::days(4) + Duration::hours(2);
        assert_eq!(reservation.days_overdue(now), None);
        assert!(!reservation.is_overdue(now));

        reservation.status = ReservationStatus::Approved {
            approved_at: created_at(),
            approved_by: "mgr1".to_string(),
        };
        assert_eq!(reservation.days_overdue(now), Some(4));
        assert!(reservation.is_overdue(now));
        assert!(!reservation.is_overdue(reservation.rented_for - Duration::hours(1)));
    }

    #[test]
    fn test_reservation_serialization_includes_state_fields() {
        let mut reservation = unapproved();
        reservation.status = ReservationStatus::Rejected {
            rejected_at: created_at(),
            rejected_by: "mgr1".to_string(),
            reason: "damaged".to_string(),
        };
        let json = serde_json::to_value(&reservation).unwrap();
        assert_eq!(json["status"]["state"], "rejected");
        assert_eq!(json["status"]["reason"], "damaged");
        assert_eq!(json["equipment_id"], 7);
    }

    #[test]
    fn test_create_reservation_request_validation() {
        let json = r#"{"equipment_id":7,"rentee_id":"john","rented_for":"2030-01-01T00:00:00Z"}"#;
        let req: CreateReservationRequest = serde_json::from_str(json).unwrap();
        assert!(req.validate().is_ok());

        let blank = CreateReservationRequest {
            rentee_id: " ".to_string(),
            ..req
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_reject_request_requires_reason() {
        let req = RejectReservationRequest {
            manager_id: "mgr1".to_string(),
            reason: String::new(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_list_query_defaults() {
        let query: ListReservationsQuery = serde_json::from_str("{}").unwrap();
        assert!(query.status.is_none());
        assert!(query.rentee.is_none());
    }
}
