use crate::error::{EampError, EampResult};

/// Maximum length of a resource identifier, in bytes.
pub const MAX_RESOURCE_ID_LENGTH: usize = 255;

/// Validate a resource identifier.
///
/// Rules:
/// - Must not be empty
/// - Must not exceed 255 bytes
/// - Must not contain control characters
pub fn validate_resource_id(id: &str) -> EampResult<()> {
    if id.is_empty() {
        return Err(EampError::validation_field(
            "Resource ID is required",
            "resource_id",
        ));
    }

    if id.len() > MAX_RESOURCE_ID_LENGTH {
        return Err(EampError::validation_field(
            format!("Resource ID cannot exceed {MAX_RESOURCE_ID_LENGTH} characters"),
            "resource_id",
        ));
    }

    if let Some((i, c)) = id.char_indices().find(|(_, c)| c.is_control()) {
        return Err(EampError::validation_field(
            format!("Resource ID contains control character {c:?} at position {i}"),
            "resource_id",
        ));
    }

    Ok(())
}
