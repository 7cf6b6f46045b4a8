//! Error types for voxpanel

use std::fmt;

use thiserror::Error;

/// Result type alias for voxpanel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voxpanel
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration parsed but failed validation
    #[error("invalid configuration: {0}")]
    Validation(ValidationErrors),

    /// A display variant could not be brought up
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Writing to an active display failed
    #[error("display error: {0}")]
    Display(String),

    /// Transcript source failure
    #[error("transcript source error: {0}")]
    Transcript(String),

    /// Display-arbitration service could not be stopped or started
    #[error("service error: {0}")]
    Service(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

/// One rejected configuration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the offending field (e.g. `commands.show_ip.action`)
    pub field: String,
    /// Why the field was rejected
    pub reason: String,
}

impl FieldError {
    /// Create a field error
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Every validation failure found in one configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Create an empty error list
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a rejected field
    pub fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.push(FieldError::new(field, reason));
    }

    /// True when nothing was rejected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of rejected fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The rejected fields, in discovery order
    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// True if any error names this exact field
    #[must_use]
    pub fn contains_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// Convert into `Ok(value)` when empty, `Err` otherwise
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one field was rejected
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
