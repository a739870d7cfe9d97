//! Payloads handed to the outcome list UI.
//!
//! # Responsibility
//! - Shape resolved mappings into plain serializable records.
//! - Render them as the JSON documents the list renderer consumes.
//!
//! # Invariants
//! - `OutcomeChoices` serializes as `{"outcomesets": [...], "outcomes": [...]}`.
//! - Every outcome and outcome set appears at most once per payload.

use crate::model::outcome::Outcome;
use crate::model::outcome_set::OutcomeSet;
use crate::model::{OutcomeId, OutcomeSetId};
use serde::Serialize;
use std::collections::BTreeSet;

/// Outcome sets and outcomes eligible for one area within one course.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeChoices {
    #[serde(rename = "outcomesets")]
    pub outcome_sets: Vec<OutcomeSet>,
    pub outcomes: Vec<Outcome>,
}

impl OutcomeChoices {
    /// Adds the set unless a set with the same id is already present.
    pub(crate) fn push_outcome_set(&mut self, outcome_set: OutcomeSet) {
        if !self
            .outcome_sets
            .iter()
            .any(|existing| existing.id == outcome_set.id)
        {
            self.outcome_sets.push(outcome_set);
        }
    }

    /// Adds outcomes not yet present, keeping first-seen order.
    pub(crate) fn union_outcomes(&mut self, outcomes: impl IntoIterator<Item = Outcome>) {
        let mut seen = self.outcome_ids();
        for outcome in outcomes {
            if let Some(id) = outcome.id {
                if seen.insert(id) {
                    self.outcomes.push(outcome);
                }
            }
        }
    }

    /// Ids of all contained outcomes.
    pub fn outcome_ids(&self) -> BTreeSet<OutcomeId> {
        self.outcomes.iter().filter_map(|outcome| outcome.id).collect()
    }

    /// Ids of all contained outcome sets.
    pub fn outcome_set_ids(&self) -> BTreeSet<OutcomeSetId> {
        self.outcome_sets.iter().filter_map(|set| set.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.outcome_sets.is_empty() && self.outcomes.is_empty()
    }

    /// Renders `{"outcomesets": [...], "outcomes": [...]}`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One row of a course's outcome set mapping summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSetMapping {
    #[serde(rename = "outcomesetid")]
    pub outcome_set_id: OutcomeSetId,
    pub name: String,
    pub edulevels: Option<String>,
    pub subjects: Option<String>,
}

/// Renders the course summary rows as a JSON array.
///
/// Returns `None` for an empty summary so callers can skip the widget.
pub fn outcome_set_mappings_json(
    mappings: &[OutcomeSetMapping],
) -> serde_json::Result<Option<String>> {
    if mappings.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(mappings).map(Some)
}

#[cfg(test)]
mod tests {
    use super::{outcome_set_mappings_json, OutcomeChoices, OutcomeSetMapping};
    use crate::model::outcome::Outcome;
    use crate::model::outcome_set::OutcomeSet;
    use serde_json::Value;

    fn saved_outcome(id: i64) -> Outcome {
        let mut outcome = Outcome::new(1, format!("O.{id}"), "desc");
        outcome.id = Some(id);
        outcome
    }

    #[test]
    fn union_keeps_first_seen_order_without_duplicates() {
        let mut choices = OutcomeChoices::default();
        choices.union_outcomes([saved_outcome(3), saved_outcome(1)]);
        choices.union_outcomes([saved_outcome(1), saved_outcome(2)]);

        let ids: Vec<_> = choices.outcomes.iter().filter_map(|o| o.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn outcome_sets_are_recorded_once() {
        let mut set = OutcomeSet::new("CCSS", "Common Core");
        set.id = Some(5);
        let mut choices = OutcomeChoices::default();
        choices.push_outcome_set(set.clone());
        choices.push_outcome_set(set);
        assert_eq!(choices.outcome_sets.len(), 1);
    }

    #[test]
    fn choices_json_uses_list_renderer_keys() {
        let mut set = OutcomeSet::new("CCSS", "Common Core");
        set.id = Some(5);
        let mut choices = OutcomeChoices::default();
        choices.push_outcome_set(set);
        choices.union_outcomes([saved_outcome(9)]);

        let json: Value = serde_json::from_str(&choices.to_json().unwrap()).unwrap();
        assert_eq!(json["outcomesets"][0]["id"], 5);
        assert_eq!(json["outcomes"][0]["id"], 9);
        assert_eq!(json["outcomes"][0]["outcomesetid"], 1);
    }

    #[test]
    fn empty_summary_renders_nothing() {
        assert_eq!(outcome_set_mappings_json(&[]).unwrap(), None);

        let rows = vec![OutcomeSetMapping {
            outcome_set_id: 2,
            name: "Science".to_string(),
            edulevels: Some("9".to_string()),
            subjects: None,
        }];
        let json = outcome_set_mappings_json(&rows).unwrap().unwrap();
        assert_eq!(
            json,
            r#"[{"outcomesetid":2,"name":"Science","edulevels":"9","subjects":null}]"#
        );
    }
}
