//! Equipment domain model.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Identifier of a piece of rentable equipment.
pub type EquipmentId = i32;

/// A piece of rentable equipment.
///
/// `available` is derived from the reservations that reference the equipment:
/// it is false exactly while an Unapproved or Approved reservation holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Equipment {
    pub id: EquipmentId,
    pub model: String,
    pub category: String,
    pub available: bool,
}

impl std::fmt::Display for Equipment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.model, self.category)
    }
}

/// Request payload for registering new equipment.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateEquipmentRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Model must be between 1 and 100 characters"
    ))]
    pub model: String,

    #[validate(length(
        min = 1,
        max = 50,
        message = "Category must be between 1 and 50 characters"
    ))]
    pub category: String,

    /// Accepted for compatibility; must be true since only an active
    /// reservation makes equipment unavailable.
    #[serde(default = "default_available")]
    #[validate(custom(function = "validate_new_equipment_available"))]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

fn validate_new_equipment_available(available: &bool) -> Result<(), validator::ValidationError> {
    if *available {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("equipment_unavailable");
        err.message = Some("New equipment must be available".into());
        Err(err)
    }
}
