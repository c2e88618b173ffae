use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{CoreError, Result};

const MAX_DOCTYPE_LENGTH: usize = 140;

fn doctype_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9 _-]*$").expect("valid doctype regex"))
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Returns true when `value` may be used as a bare SQL identifier
/// (column name, alias or savepoint name).
pub fn is_valid_identifier(value: &str) -> bool {
    value.len() <= 64 && identifier_pattern().is_match(value)
}

/// Checks `value` against the identifier allow-list.
pub fn validate_identifier(value: &str) -> Result<()> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("Invalid identifier: {:?}", value)))
    }
}

/// Name of a document type, e.g. `Note` or `GP Discussion`.
///
/// Every doctype is backed by a table named `tab<Doctype>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Doctype(String);

impl Doctype {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();

        if trimmed.is_empty() {
            return Err(CoreError::Validation("doctype is required".to_string()));
        }
        if trimmed.len() > MAX_DOCTYPE_LENGTH {
            return Err(CoreError::Validation(format!(
                "doctype name longer than {} characters",
                MAX_DOCTYPE_LENGTH
            )));
        }
        if !doctype_pattern().is_match(trimmed) {
            return Err(CoreError::Validation(format!("Invalid doctype: {:?}", trimmed)));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn table_name(&self) -> String {
        format!("tab{}", self.0)
    }
}

impl fmt::Display for Doctype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Doctype {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Doctype {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Doctype> for String {
    fn from(doctype: Doctype) -> Self {
        doctype.0
    }
}
