use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::doctype::validate_identifier;
use crate::error::Result;

/// Name of a savepoint inside a transaction. Always a safe SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SavepointName(String);

impl SavepointName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self(name))
    }

    /// Savepoint guarding the `index`-th request of a batch.
    pub fn for_batch_request(index: usize) -> Self {
        Self(format!("batch_request_{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SavepointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
