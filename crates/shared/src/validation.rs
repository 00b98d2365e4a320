//! Common validation utilities.

use chrono::{DateTime, Utc};
use validator::ValidationError;

/// Maximum length of a rentee or manager identifier.
const MAX_USER_ID_LENGTH: usize = 100;

/// Upper bound for the reservation expiration timeout (30 days).
pub const MAX_EXPIRATION_TIMEOUT_SECS: u64 = 30 * 24 * 3600;

/// Validates that a user identifier (rentee or manager) is present and not overly long.
pub fn validate_user_id(id: &str) -> Result<(), ValidationError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("user_id_blank");
        err.message = Some("User id must not be blank".into());
        return Err(err);
    }
    if trimmed.len() > MAX_USER_ID_LENGTH {
        let mut err = ValidationError::new("user_id_length");
        err.message = Some("User id must be at most 100 characters".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that the requested end of a rental lies after `now`.
pub fn validate_rented_for(
    rented_for: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if rented_for > now {
        Ok(())
    } else {
        let mut err = ValidationError::new("rented_for_past");
        err.message = Some("Rental end date must be in the future".into());
        Err(err)
    }
}

/// Validates an expiration timeout in seconds.
pub fn validate_expiration_timeout(seconds: u64) -> Result<(), ValidationError> {
    if seconds == 0 {
        let mut err = ValidationError::new("timeout_zero");
        err.message = Some("Expiration timeout must be at least one second".into());
        return Err(err);
    }
    if seconds > MAX_EXPIRATION_TIMEOUT_SECS {
        let mut err = ValidationError::new("timeout_range");
        err.message = Some("Expiration timeout must not exceed 30 days".into());
        return Err(err);
    }
    Ok(())
}
