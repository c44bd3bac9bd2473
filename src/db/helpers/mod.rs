use std::fmt;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;

use crate::error::ValidationError;

/// Stored timestamp layout. Fixed width, so text comparison in SQL matches
/// chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest comment the `comment` column accepts, in characters.
pub const MAX_COMMENT_CHARS: usize = 250;

const MAX_TABLE_NAME_LEN: usize = 64;

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored or operator-supplied timestamp.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, the same with a `T` separator, a trailing
/// fractional part (dropped) and `YYYY-MM-DD HH:MM`. The year must have four
/// digits: range queries compare timestamps as text.
pub fn parse_timestamp(value: &str, field: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    let whole_seconds = trimmed.split('.').next().unwrap_or(trimmed);

    // %Y happily reads "24" as the year 24.
    let four_digit_year = whole_seconds.split('-').next().map(str::len) == Some(4);
    let formats: &[&str] = if four_digit_year {
        &[TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
    } else {
        &[]
    };

    formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(whole_seconds, format).ok())
        .ok_or_else(|| anyhow!("expected YYYY-MM-DD HH:MM:SS, got '{value}'"))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_timestamp(
    value: Option<String>,
    field: &str,
) -> Result<Option<NaiveDateTime>> {
    match value {
        Some(raw) => parse_timestamp(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn validate_comment(comment: &str) -> Result<(), ValidationError> {
    let length = comment.chars().count();
    if length > MAX_COMMENT_CHARS {
        return Err(ValidationError::CommentTooLong {
            length,
            max: MAX_COMMENT_CHARS,
        });
    }
    Ok(())
}

/// A table identifier that is safe to place into SQL text.
///
/// Table names come from the settings file, so they are operator-controlled;
/// statements only ever interpolate a value that passed [`TableName::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidTableName(raw.to_string());

        let mut chars = raw.chars();
        let first = chars.next().ok_or_else(invalid)?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(invalid());
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
        if raw.len() > MAX_TABLE_NAME_LEN || raw.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(invalid());
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}
