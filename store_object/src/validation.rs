//! Identifier validation
//!
//! Table and column names reach the SQL text by interpolation, so every one
//! of them passes through these types first. Validated names are rendered
//! double-quoted, which keeps reserved words usable as column names.

use std::fmt;

/// Validation errors for database identifiers
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Name contains invalid characters (only alphanumeric and underscore allowed)
    InvalidCharacters(String),
    /// Name is too long (PostgreSQL limit is 63 characters)
    TooLong {
        name: String,
        length: usize,
        max_length: usize,
    },
    /// Name is empty
    Empty,
    /// Name starts with invalid character (must start with letter or underscore)
    InvalidStartCharacter(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidCharacters(name) => {
                write!(f, "Invalid characters in name '{}': only alphanumeric characters and underscores are allowed", name)
            }
            ValidationError::TooLong {
                name,
                length,
                max_length,
            } => {
                write!(
                    f,
                    "Name '{}' is too long: {} characters (max {})",
                    name, length, max_length
                )
            }
            ValidationError::Empty => {
                write!(f, "Name cannot be empty")
            }
            ValidationError::InvalidStartCharacter(name) => {
                write!(f, "Name '{}' must start with a letter or underscore", name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// PostgreSQL identifier length limit
const MAX_IDENTIFIER_LENGTH: usize = 63;

fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    let first_char = name.chars().next().ok_or(ValidationError::Empty)?;

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            name: name.to_string(),
            length: name.len(),
            max_length: MAX_IDENTIFIER_LENGTH,
        });
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ValidationError::InvalidStartCharacter(name.to_string()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidCharacters(name.to_string()));
    }

    Ok(())
}

/// A validated table name that is safe to use in SQL queries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedTableName(String);

impl ValidatedTableName {
    /// Create a new validated table name
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    /// Get the validated name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as it appears in SQL text
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for ValidatedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated field name that is safe to use in SQL queries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedFieldName(String);

impl ValidatedFieldName {
    /// Create a new validated field name
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    /// Get the validated name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as it appears in SQL text
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a select/returning list (`*` or comma separated column names)
pub fn parse_column_list(list: Option<&str>) -> Result<Option<Vec<ValidatedFieldName>>, ValidationError> {
    let list = match list.map(str::trim) {
        None | Some("") | Some("*") => return Ok(None),
        Some(list) => list,
    };

    list.split(',')
        .map(|column| ValidatedFieldName::new(column.trim()))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(ValidatedTableName::new("equipment").is_ok());
        assert!(ValidatedTableName::new("_audit_2024").is_ok());
        assert_eq!(ValidatedFieldName::new("order").unwrap().quoted(), "\"order\"");
    }

    #[test]
    fn test_invalid_names() {
        assert_eq!(ValidatedTableName::new(""), Err(ValidationError::Empty));
        assert!(matches!(
            ValidatedTableName::new("1table"),
            Err(ValidationError::InvalidStartCharacter(_))
        ));
        assert!(matches!(
            ValidatedFieldName::new("name; DROP TABLE users"),
            Err(ValidationError::InvalidCharacters(_))
        ));
        assert!(matches!(
            ValidatedFieldName::new(&"a".repeat(64)),
            Err(ValidationError::TooLong { length: 64, .. })
        ));
    }

    #[test]
    fn test_parse_column_list() {
        assert_eq!(parse_column_list(None).unwrap(), None);
        assert_eq!(parse_column_list(Some(" * ")).unwrap(), None);

        let columns = parse_column_list(Some("id, name ,status")).unwrap().unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "status"]);

        assert!(parse_column_list(Some("id, name)")).is_err());
    }
}
