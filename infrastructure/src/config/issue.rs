//! Structured configuration warnings.
//!
//! Validation never aborts startup: each invalid value is replaced by its
//! default and reported as a [`ConfigIssue`].

/// Severity level of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The value was discarded.
    Error,
    /// The value works but may not behave as expected.
    Warning,
}

/// Identifies a specific configuration issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssueCode {
    EmptyModelName {
        field: String,
    },
    InvalidEnumValue {
        field: String,
        value: String,
        valid_values: Vec<String>,
    },
    InvalidConstraint {
        field: String,
    },
    /// An API key written into a config file.
    PlaintextSecret {
        field: String,
    },
}

/// A detected issue in the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub code: ConfigIssueCode,
    pub message: String,
}

impl ConfigIssue {
    pub fn constraint(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: ConfigIssueCode::InvalidConstraint {
                field: field.to_string(),
            },
            message: message.into(),
        }
    }

    pub fn empty_model(field: &str) -> Self {
        Self {
            severity: Severity::Error,
            code: ConfigIssueCode::EmptyModelName {
                field: field.to_string(),
            },
            message: format!("{}: model name cannot be empty", field),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}", level, self.message)
    }
}
