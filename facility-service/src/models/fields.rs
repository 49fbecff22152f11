//! Declarative field constraints checked on every assignment.

use serde::Serialize;

use crate::services::ServiceError;
use validator::ValidateEmail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    Creating,
    Loaded,
    Changed,
    Saved,
    Deleted,
}

impl EntityState {
    /// State after a successful setter call.
    pub fn touched(self) -> Self {
        match self {
            EntityState::Loaded | EntityState::Saved => EntityState::Changed,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// `[A-Za-z0-9_-]+`
    Slug,
    Email,
    Phone,
    Integer,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub read_only: bool,
    pub required: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            min_len: None,
            max_len: None,
            min_value: None,
            max_value: None,
            read_only: false,
            required: false,
        }
    }

    pub const fn length(self, min: usize, max: usize) -> Self {
        Self {
            min_len: Some(min),
            max_len: Some(max),
            ..self
        }
    }

    pub const fn range(self, min: i64, max: i64) -> Self {
        Self {
            min_value: Some(min),
            max_value: Some(max),
            ..self
        }
    }

    pub const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    pub const fn read_only(self) -> Self {
        Self {
            read_only: true,
            ..self
        }
    }

    pub fn check_text(&self, value: &str) -> Result<(), ServiceError> {
        let chars = value.chars().count();
        if let Some(min) = self.min_len {
            if chars < min {
                return Err(self.invalid(format!("must be at least {} characters", min)));
            }
        }
        if let Some(max) = self.max_len {
            if chars > max {
                return Err(self.invalid(format!("must be at most {} characters", max)));
            }
        }

        match self.kind {
            FieldKind::Slug => {
                if !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(self.invalid(
                        "may contain only letters, digits, underscores and hyphens",
                    ));
                }
            }
            FieldKind::Email => {
                if !value.validate_email() {
                    return Err(self.invalid("is not a valid e-mail address"));
                }
            }
            FieldKind::Phone => {
                if !value
                    .chars()
                    .all(|c| c.is_ascii_digit() || "+-() ".contains(c))
                {
                    return Err(self.invalid("is not a valid phone number"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn check_opt_text(&self, value: Option<&str>) -> Result<(), ServiceError> {
        match value {
            Some(v) => self.check_text(v),
            None => Ok(()),
        }
    }

    pub fn check_int(&self, value: i64) -> Result<(), ServiceError> {
        if let Some(min) = self.min_value {
            if value < min {
                return Err(self.invalid(format!("must be at least {}", min)));
            }
        }
        if let Some(max) = self.max_value {
            if value > max {
                return Err(self.invalid(format!("must be at most {}", max)));
            }
        }
        Ok(())
    }

    /// Guard used by public setters of reconciler- or system-owned fields.
    pub fn check_writable(&self) -> Result<(), ServiceError> {
        if self.read_only {
            return Err(self.invalid("is read-only"));
        }
        Ok(())
    }

    fn invalid(&self, message: impl Into<String>) -> ServiceError {
        ServiceError::invalid(self.name, message)
    }
}

/// Names of required fields that are still unset.
pub fn missing_required(specs: &[(&FieldSpec, bool)]) -> Vec<String> {
    specs
        .iter()
        .filter(|(spec, is_set)| spec.required && !is_set)
        .map(|(spec, _)| spec.name.to_string())
        .collect()
}

/// Trims and maps empty strings to `None`.
pub fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: FieldSpec = FieldSpec::new("login", FieldKind::Slug).length(1, 100).required();
    const EMAIL: FieldSpec = FieldSpec::new("email", FieldKind::Email).length(3, 254);
    const POSITION: FieldSpec = FieldSpec::new("position", FieldKind::Integer).range(0, 1000);

    #[test]
    fn test_slug_rules() {
        assert!(LOGIN.check_text("alice_01-x").is_ok());
        assert!(LOGIN.check_text("").is_err());
        assert!(LOGIN.check_text("al ice").is_err());
        assert!(LOGIN.check_text(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(EMAIL.check_text("alice@example.org").is_ok());
        assert!(EMAIL.check_text("alice").is_err());
    }

    #[test]
    fn test_integer_range() {
        assert!(POSITION.check_int(0).is_ok());
        assert!(POSITION.check_int(-1).is_err());
        assert!(POSITION.check_int(1001).is_err());
    }

    #[test]
    fn test_error_names_field() {
        match LOGIN.check_text("bad login") {
            Err(ServiceError::FieldInvalid { field, .. }) => assert_eq!(field, "login"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(EntityState::Loaded.touched(), EntityState::Changed);
        assert_eq!(EntityState::Saved.touched(), EntityState::Changed);
        assert_eq!(EntityState::Creating.touched(), EntityState::Creating);
    }

    #[test]
    fn test_missing_required() {
        assert_eq!(missing_required(&[(&LOGIN, false), (&EMAIL, false)]), vec!["login"]);
        assert!(missing_required(&[(&LOGIN, true)]).is_empty());
    }
}
