//! Course filter domain model.
//!
//! # Responsibility
//! - Bind one outcome set to a course with optional inclusion criteria.
//! - Decide whether an outcome passes the filter.
//!
//! # Invariants
//! - An empty criteria list admits every outcome of the bound set.
//! - A criterion field set to `None` does not constrain that dimension.
//! - An outcome passes when at least one criterion admits it.

use super::outcome::Outcome;
use super::{require_reference, CourseId, FilterId, ModelValidationError, OutcomeSetId};
use serde::{Deserialize, Serialize};

/// One inclusion rule inside a filter.
///
/// Deserialized values go through the same trimming as `new`, so a blank
/// `"edulevels": ""` from a form post means "any level".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFilterCriterion")]
pub struct FilterCriterion {
    /// Required education level, if any.
    #[serde(rename = "edulevels")]
    pub edu_levels: Option<String>,
    /// Required subject, if any.
    pub subjects: Option<String>,
}

/// Wire shape of a criterion before normalization.
#[derive(Deserialize)]
struct RawFilterCriterion {
    #[serde(rename = "edulevels", default)]
    edu_levels: Option<String>,
    #[serde(default)]
    subjects: Option<String>,
}

impl From<RawFilterCriterion> for FilterCriterion {
    fn from(raw: RawFilterCriterion) -> Self {
        Self::new(raw.edu_levels.as_deref(), raw.subjects.as_deref())
    }
}

impl FilterCriterion {
    pub fn new(edu_levels: Option<&str>, subjects: Option<&str>) -> Self {
        Self {
            edu_levels: normalize_criterion_value(edu_levels),
            subjects: normalize_criterion_value(subjects),
        }
    }

    /// Re-applies trimming to values set through the public fields.
    pub fn normalized(self) -> Self {
        Self::new(self.edu_levels.as_deref(), self.subjects.as_deref())
    }

    /// Returns whether this criterion admits the outcome.
    pub fn admits(&self, outcome: &Outcome) -> bool {
        let level_ok = self
            .edu_levels
            .as_deref()
            .map_or(true, |level| outcome.has_edu_level(level));
        let subject_ok = self
            .subjects
            .as_deref()
            .map_or(true, |subject| outcome.has_subject(subject));
        level_ok && subject_ok
    }
}

/// Course-scoped rule making one outcome set eligible for mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub id: Option<FilterId>,
    #[serde(rename = "courseid")]
    pub course_id: CourseId,
    #[serde(rename = "outcomesetid")]
    pub outcome_set_id: OutcomeSetId,
    #[serde(rename = "filter", default)]
    pub criteria: Vec<FilterCriterion>,
}

impl Filter {
    /// Creates an unsaved filter admitting every outcome of the set.
    pub fn new(course_id: CourseId, outcome_set_id: OutcomeSetId) -> Self {
        Self {
            id: None,
            course_id,
            outcome_set_id,
            criteria: Vec::new(),
        }
    }

    /// Appends one criterion.
    pub fn with_criterion(mut self, criterion: FilterCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Returns whether the outcome belongs to the bound set and passes the
    /// criteria. Deleted and non-assessable outcomes never pass.
    pub fn matches(&self, outcome: &Outcome) -> bool {
        if outcome.outcome_set_id != self.outcome_set_id || !outcome.is_mappable() {
            return false;
        }
        self.criteria.is_empty() || self.criteria.iter().any(|c| c.admits(outcome))
    }

    /// Trims criterion values and unsets blank ones.
    pub fn normalize_criteria(&mut self) {
        self.criteria = std::mem::take(&mut self.criteria)
            .into_iter()
            .map(FilterCriterion::normalized)
            .collect();
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_reference("filter", "outcome_set_id", self.outcome_set_id)?;
        Ok(())
    }
}

fn normalize_criterion_value(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
