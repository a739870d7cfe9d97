//! Domain model for outcome mapping.
//!
//! # Responsibility
//! - Define the records exchanged between repositories, the mapper service
//!   and presentation callers.
//! - Own field-level validation shared by every write path.
//!
//! # Invariants
//! - A record with `id == None` has never been persisted.
//! - Outcomes and outcome sets are removed by soft delete only.

pub mod area;
pub mod filter;
pub mod outcome;
pub mod outcome_set;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Row id of a persisted area.
pub type AreaId = i64;
/// Row id of a persisted outcome.
pub type OutcomeId = i64;
/// Row id of a persisted outcome set.
pub type OutcomeSetId = i64;
/// Row id of a persisted course filter.
pub type FilterId = i64;
/// Course identifier owned by the host application.
pub type CourseId = i64;

/// Field-level validation failure for model records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValidationError {
    /// A required text field is empty or whitespace only.
    EmptyField {
        entity: &'static str,
        field: &'static str,
    },
    /// An id reference is not a valid row id.
    InvalidReference {
        entity: &'static str,
        field: &'static str,
        value: i64,
    },
    /// An outcome names itself as its parent.
    SelfParent(OutcomeId),
}

impl Display for ModelValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField { entity, field } => {
                write!(f, "{entity}.{field} must not be empty")
            }
            Self::InvalidReference {
                entity,
                field,
                value,
            } => write!(f, "{entity}.{field} references invalid id {value}"),
            Self::SelfParent(id) => write!(f, "outcome {id} cannot be its own parent"),
        }
    }
}

impl Error for ModelValidationError {}

pub(crate) fn require_text(
    entity: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ModelValidationError> {
    if value.trim().is_empty() {
        return Err(ModelValidationError::EmptyField { entity, field });
    }
    Ok(())
}

pub(crate) fn require_reference(
    entity: &'static str,
    field: &'static str,
    value: i64,
) -> Result<(), ModelValidationError> {
    if value <= 0 {
        return Err(ModelValidationError::InvalidReference {
            entity,
            field,
            value,
        });
    }
    Ok(())
}
