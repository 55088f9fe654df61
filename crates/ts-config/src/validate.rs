//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::settings::Settings;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

fn require_positive(field: &str, value: u64) -> ValidationResult<()> {
    if value == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: "Must be positive, got 0".to_string(),
        });
    }
    Ok(())
}

/// Validate settings semantically.
pub fn validate_settings(settings: &Settings) -> ValidationResult<()> {
    if settings.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: settings.schema_version.clone(),
        });
    }

    let storage = &settings.storage;
    require_positive("storage.max_size_bytes", storage.max_size_bytes)?;
    require_positive("storage.retention_secs", storage.retention_secs)?;
    require_positive("storage.write_timeout_secs", storage.write_timeout_secs)?;
    if storage.retention_secs <= storage.write_timeout_secs {
        return Err(ValidationError::SemanticError(format!(
            "storage.retention_secs ({}) must exceed storage.write_timeout_secs ({})",
            storage.retention_secs, storage.write_timeout_secs
        )));
    }

    let backoff = &settings.backoff;
    require_positive("backoff.slot_secs", backoff.slot_secs)?;
    if backoff.max_delay_secs < backoff.slot_secs {
        return Err(ValidationError::InvalidValue {
            field: "backoff.max_delay_secs".to_string(),
            message: format!(
                "Must be at least backoff.slot_secs ({}), got {}",
                backoff.slot_secs, backoff.max_delay_secs
            ),
        });
    }

    let maintenance = &settings.maintenance;
    require_positive("maintenance.interval_ms", maintenance.interval_ms)?;
    require_positive("maintenance.lease_secs", maintenance.lease_secs)?;

    Ok(())
}
