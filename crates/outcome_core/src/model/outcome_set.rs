//! Outcome set domain model.

use super::{require_text, ModelValidationError, OutcomeSetId};
use serde::{Deserialize, Serialize};

/// Named grouping of outcomes, usually one published standard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSet {
    pub id: Option<OutcomeSetId>,
    /// Externally assigned unique identifier.
    pub idnumber: String,
    pub name: String,
    pub description: Option<String>,
    /// Publisher of the standard.
    pub provider: Option<String>,
    /// Region the standard applies to.
    pub region: Option<String>,
    /// Soft delete tombstone.
    pub deleted: bool,
}

impl OutcomeSet {
    /// Creates an unsaved outcome set.
    pub fn new(idnumber: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            idnumber: idnumber.into(),
            name: name.into(),
            description: None,
            provider: None,
            region: None,
            deleted: false,
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_text("outcome_set", "idnumber", &self.idnumber)?;
        require_text("outcome_set", "name", &self.name)?;
        Ok(())
    }
}
