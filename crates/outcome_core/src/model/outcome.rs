//! Outcome domain model.
//!
//! # Responsibility
//! - Describe one gradable competency definition and its classification tags.
//!
//! # Invariants
//! - `idnumber` is unique across all outcomes and never reused.
//! - Outcomes are immutable once created except for `deleted`.
//! - Only outcomes with `deleted == false` and `assessable == true` are
//!   eligible for new mappings through course filters.

use super::{
    require_reference, require_text, ModelValidationError, OutcomeId, OutcomeSetId,
};
use serde::{Deserialize, Serialize};

/// Gradable competency definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// `None` until saved.
    pub id: Option<OutcomeId>,
    /// Owning outcome set.
    #[serde(rename = "outcomesetid")]
    pub outcome_set_id: OutcomeSetId,
    /// Parent outcome for hierarchical standards.
    #[serde(rename = "parentid")]
    pub parent_id: Option<OutcomeId>,
    /// Externally assigned unique identifier.
    pub idnumber: String,
    /// Human-facing document number, e.g. `CCSS.MATH.1`.
    pub docnum: Option<String>,
    pub description: String,
    /// Whether the outcome can be graded against.
    pub assessable: bool,
    /// Soft delete tombstone.
    pub deleted: bool,
    #[serde(rename = "sortorder")]
    pub sort_order: i64,
    /// Education levels the outcome applies to.
    #[serde(rename = "edulevels")]
    pub edu_levels: Vec<String>,
    /// Subjects the outcome belongs to.
    pub subjects: Vec<String>,
}

impl Outcome {
    /// Creates an unsaved, assessable outcome in the given set.
    pub fn new(
        outcome_set_id: OutcomeSetId,
        idnumber: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            outcome_set_id,
            parent_id: None,
            idnumber: idnumber.into(),
            docnum: None,
            description: description.into(),
            assessable: true,
            deleted: false,
            sort_order: 0,
            edu_levels: Vec::new(),
            subjects: Vec::new(),
        }
    }

    /// Sets education level tags, replacing any existing ones.
    pub fn with_edu_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edu_levels = levels.into_iter().map(Into::into).collect();
        self
    }

    /// Sets subject tags, replacing any existing ones.
    pub fn with_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects = subjects.into_iter().map(Into::into).collect();
        self
    }

    /// Returns whether the outcome may be offered for new mappings.
    pub fn is_mappable(&self) -> bool {
        !self.deleted && self.assessable
    }

    /// Case-insensitive membership test against `edu_levels`.
    pub fn has_edu_level(&self, level: &str) -> bool {
        contains_ignore_case(&self.edu_levels, level)
    }

    /// Case-insensitive membership test against `subjects`.
    pub fn has_subject(&self, subject: &str) -> bool {
        contains_ignore_case(&self.subjects, subject)
    }

    /// Checks field-level rules before persistence.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_reference("outcome", "outcome_set_id", self.outcome_set_id)?;
        require_text("outcome", "idnumber", &self.idnumber)?;
        require_text("outcome", "description", &self.description)?;
        if let Some(parent_id) = self.parent_id {
            require_reference("outcome", "parent_id", parent_id)?;
            if self.id == Some(parent_id) {
                return Err(ModelValidationError::SelfParent(parent_id));
            }
        }
        for level in &self.edu_levels {
            require_text("outcome", "edu_levels", level)?;
        }
        for subject in &self.subjects {
            require_text("outcome", "subjects", subject)?;
        }
        Ok(())
    }
}

fn contains_ignore_case(values: &[String], needle: &str) -> bool {
    let needle = needle.trim();
    values
        .iter()
        .any(|value| value.trim().eq_ignore_ascii_case(needle))
}
