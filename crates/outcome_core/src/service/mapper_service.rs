//! Outcome mapper use-case service.
//!
//! # Responsibility
//! - Resolve which outcomes of an area are eligible under a course's filters.
//! - Persist single and multi-outcome selections for an area.
//! - Remove areas and course filters.
//!
//! # Invariants
//! - An area row exists iff it has at least one outcome link. Every
//!   mutating path re-checks and deletes the area when links reach zero.
//! - Every mutating use-case runs in one `UnitOfWork::write` scope. A
//!   failure at any step rolls back the whole operation, including a
//!   freshly created area.
//! - The course is always an explicit argument.

use crate::model::area::Area;
use crate::model::filter::Filter;
use crate::model::outcome::Outcome;
use crate::model::{CourseId, OutcomeId, OutcomeSetId};
use crate::presentation::{OutcomeChoices, OutcomeSetMapping};
use crate::repo::area_repo::{AreaRepository, SqliteAreaRepository};
use crate::repo::filter_repo::{FilterRepository, SqliteFilterRepository};
use crate::repo::outcome_repo::{OutcomeRepository, SqliteOutcomeRepository};
use crate::repo::outcome_set_repo::{OutcomeSetRepository, SqliteOutcomeSetRepository};
use crate::repo::{EntityKind, RepoError, RepoResult};
use crate::service::unit_of_work::{SqliteUnitOfWork, UnitOfWork};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MapperResult<T> = Result<T, MapperError>;

/// Service error for mapper use-cases.
#[derive(Debug)]
pub enum MapperError {
    /// A referenced outcome id does not exist.
    OutcomeNotFound(OutcomeId),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for MapperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutcomeNotFound(id) => write!(f, "outcome not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MapperError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::OutcomeNotFound(_) => None,
        }
    }
}

impl From<RepoError> for MapperError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                entity: EntityKind::Outcome,
                id,
            } => Self::OutcomeNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Mapper service over the four outcome repositories.
pub struct MapperService<O, S, F, A, U> {
    outcomes: O,
    outcome_sets: S,
    filters: F,
    areas: A,
    unit_of_work: U,
}

/// Mapper service wired to SQLite repositories sharing one connection.
pub type SqliteMapperService<'conn> = MapperService<
    SqliteOutcomeRepository<'conn>,
    SqliteOutcomeSetRepository<'conn>,
    SqliteFilterRepository<'conn>,
    SqliteAreaRepository<'conn>,
    SqliteUnitOfWork<'conn>,
>;

impl<'conn> SqliteMapperService<'conn> {
    /// Builds all SQLite repositories on one migrated connection.
    pub fn from_connection(conn: &'conn Connection) -> RepoResult<Self> {
        Ok(Self::new(
            SqliteOutcomeRepository::try_new(conn)?,
            SqliteOutcomeSetRepository::try_new(conn)?,
            SqliteFilterRepository::try_new(conn)?,
            SqliteAreaRepository::try_new(conn)?,
            SqliteUnitOfWork::new(conn),
        ))
    }
}

impl<O, S, F, A, U> MapperService<O, S, F, A, U>
where
    O: OutcomeRepository,
    S: OutcomeSetRepository,
    F: FilterRepository,
    A: AreaRepository,
    U: UnitOfWork,
{
    /// Creates a service from explicit repository implementations.
    ///
    /// `unit_of_work` must scope the same storage the repositories write to.
    pub fn new(outcomes: O, outcome_sets: S, filters: F, areas: A, unit_of_work: U) -> Self {
        Self {
            outcomes,
            outcome_sets,
            filters,
            areas,
            unit_of_work,
        }
    }

    /// Resolves the outcome sets and outcomes of `area` that the course's
    /// filters make eligible.
    ///
    /// # Contract
    /// - A set is eligible only if at least one course filter references it.
    /// - Outcomes are unioned across matching filters, first-seen order.
    /// - Sets without a filter contribute nothing; this is not an error.
    pub fn resolve_eligible_outcomes(
        &self,
        area: &Area,
        course_id: CourseId,
    ) -> MapperResult<OutcomeChoices> {
        self.unit_of_work
            .read(|| self.resolve_in_scope(area, course_id))
    }

    fn resolve_in_scope(&self, area: &Area, course_id: CourseId) -> MapperResult<OutcomeChoices> {
        let filters = self.filters.find_by_course(course_id)?;
        let area_sets = self.outcome_sets.find_by_area(area)?;

        let mut choices = OutcomeChoices::default();
        for outcome_set in area_sets {
            let matching: Vec<&Filter> = filters
                .iter()
                .filter(|filter| Some(filter.outcome_set_id) == outcome_set.id)
                .collect();
            if matching.is_empty() {
                continue;
            }
            for filter in matching {
                choices.union_outcomes(self.outcomes.find_by_area_and_filter(area, filter)?);
            }
            choices.push_outcome_set(outcome_set);
        }

        debug!(
            "event=eligible_resolve module=mapper status=ok area_id={:?} course_id={} sets={} outcomes={}",
            area.id,
            course_id,
            choices.outcome_sets.len(),
            choices.outcomes.len()
        );
        Ok(choices)
    }

    /// Returns the eligible choices of an existing area for the list UI.
    ///
    /// Returns `None` when the area has never been mapped.
    pub fn get_outcome_mappings_for_form(
        &self,
        component: &str,
        area: &str,
        item_id: i64,
        course_id: CourseId,
    ) -> MapperResult<Option<OutcomeChoices>> {
        self.unit_of_work.read(|| {
            match self.areas.find_one(component, area, item_id)? {
                Some(model) => Ok(Some(self.resolve_in_scope(&model, course_id)?)),
                None => Ok(None),
            }
        })
    }

    /// Lists outcomes currently mapped to one area.
    pub fn get_outcome_mappings(
        &self,
        component: &str,
        area: &str,
        item_id: i64,
    ) -> MapperResult<Vec<Outcome>> {
        let mut mapped = self
            .outcomes
            .find_by_area_item_ids(component, area, &[item_id])?;
        Ok(mapped.remove(&item_id).unwrap_or_default())
    }

    /// Lists mapped outcomes for several items of one component area.
    ///
    /// Item ids that are not mapped to any outcome are absent from the map.
    pub fn get_many_outcome_mappings(
        &self,
        component: &str,
        area: &str,
        item_ids: &[i64],
    ) -> MapperResult<BTreeMap<i64, Vec<Outcome>>> {
        Ok(self
            .outcomes
            .find_by_area_item_ids(component, area, item_ids)?)
    }

    /// Summarizes the course's filters as one row per criterion.
    ///
    /// Filters whose set is deleted are skipped. A filter without criteria
    /// yields a single row with both criterion fields unset.
    pub fn get_outcome_set_mappings(
        &self,
        course_id: CourseId,
    ) -> MapperResult<Vec<OutcomeSetMapping>> {
        let (used_sets, filters) = self.unit_of_work.read(|| {
            Ok::<_, MapperError>((
                self.outcome_sets.find_used_by_course(course_id)?,
                self.filters.find_by_course(course_id)?,
            ))
        })?;

        let mut rows = Vec::new();
        for filter in &filters {
            let Some(outcome_set) = used_sets.get(&filter.outcome_set_id) else {
                continue;
            };
            if filter.criteria.is_empty() {
                rows.push(summary_row(filter.outcome_set_id, &outcome_set.name, None, None));
                continue;
            }
            for criterion in &filter.criteria {
                rows.push(summary_row(
                    filter.outcome_set_id,
                    &outcome_set.name,
                    criterion.edu_levels.clone(),
                    criterion.subjects.clone(),
                ));
            }
        }
        Ok(rows)
    }

    /// Replaces the course's filters with `filters`, stamping each with the
    /// course id. Returns the persisted filters.
    pub fn save_outcome_set_mappings(
        &self,
        course_id: CourseId,
        filters: Vec<Filter>,
    ) -> MapperResult<Vec<Filter>> {
        let filters: Vec<Filter> = filters
            .into_iter()
            .map(|mut filter| {
                filter.course_id = course_id;
                filter
            })
            .collect();
        self.unit_of_work
            .write(|| Ok(self.filters.sync(course_id, &filters)?))
    }

    /// Maps exactly one outcome to the area, or unmaps everything.
    ///
    /// # Contract
    /// - `outcome_id == None` with no existing area: nothing to save, `None`.
    /// - `outcome_id == None` with an existing area: links and area removed,
    ///   `None`.
    /// - `Some(id)`: area created when missing, every other link removed,
    ///   `id` linked; the area is returned.
    ///
    /// # Errors
    /// - `MapperError::OutcomeNotFound` when `id` does not exist.
    /// - Any error leaves the stored mapping as it was.
    pub fn save_single_mapping(
        &self,
        component: &str,
        area: &str,
        item_id: i64,
        outcome_id: Option<OutcomeId>,
    ) -> MapperResult<Option<Area>> {
        self.unit_of_work
            .write(|| self.save_single_in_scope(component, area, item_id, outcome_id))
    }

    fn save_single_in_scope(
        &self,
        component: &str,
        area: &str,
        item_id: i64,
        outcome_id: Option<OutcomeId>,
    ) -> MapperResult<Option<Area>> {
        let existing = self.areas.find_one(component, area, item_id)?;

        let Some(outcome_id) = outcome_id else {
            if let Some(model) = existing {
                self.areas.remove(&model)?;
                info!(
                    "event=mapping_save module=mapper status=ok mode=single action=area_removed area_id={:?}",
                    model.id
                );
            }
            return Ok(None);
        };

        let outcome = self
            .outcomes
            .find(outcome_id)?
            .ok_or(MapperError::OutcomeNotFound(outcome_id))?;

        let model = match existing {
            Some(model) => model,
            None => self.create_area(component, area, item_id)?,
        };

        let others: Vec<Outcome> = self
            .outcomes
            .find_by_area(&model)?
            .into_iter()
            .filter(|mapped| mapped.id != Some(outcome_id))
            .collect();
        self.areas.remove_area_outcomes(&model, &others)?;
        self.areas
            .save_area_outcomes(&model, std::slice::from_ref(&outcome))?;

        info!(
            "event=mapping_save module=mapper status=ok mode=single area_id={:?} outcome_id={} unmapped={}",
            model.id,
            outcome_id,
            others.len()
        );
        Ok(Some(model))
    }

    /// Saves an operator's multi-outcome selection for the area.
    ///
    /// # Contract
    /// - Requested outcomes are looked up by id and always linked, even when
    ///   outside the course's eligible set.
    /// - Eligible outcomes that were not requested are unlinked. Links
    ///   outside the eligible set are left untouched.
    /// - When no links remain the area is removed and `None` returned.
    ///
    /// # Errors
    /// - `MapperError::OutcomeNotFound` for the first unknown id.
    /// - Any error leaves the stored mapping as it was.
    pub fn save_multi_mapping(
        &self,
        component: &str,
        area: &str,
        item_id: i64,
        outcome_ids: &[OutcomeId],
        course_id: CourseId,
    ) -> MapperResult<Option<Area>> {
        self.unit_of_work.write(|| {
            self.save_multi_in_scope(component, area, item_id, outcome_ids, course_id)
        })
    }

    fn save_multi_in_scope(
        &self,
        component: &str,
        area: &str,
        item_id: i64,
        outcome_ids: &[OutcomeId],
        course_id: CourseId,
    ) -> MapperResult<Option<Area>> {
        let targets = self.outcomes.find_by_ids(outcome_ids)?;
        let target_ids: BTreeSet<OutcomeId> =
            targets.iter().filter_map(|outcome| outcome.id).collect();
        if let Some(missing) = outcome_ids.iter().find(|id| !target_ids.contains(*id)) {
            return Err(MapperError::OutcomeNotFound(*missing));
        }

        let model = match self.areas.find_one(component, area, item_id)? {
            Some(model) => model,
            None if targets.is_empty() => return Ok(None),
            None => self.create_area(component, area, item_id)?,
        };

        let choices = self.resolve_in_scope(&model, course_id)?;
        let stale: Vec<Outcome> = choices
            .outcomes
            .into_iter()
            .filter(|choice| choice.id.map_or(false, |id| !target_ids.contains(&id)))
            .collect();
        self.areas.remove_area_outcomes(&model, &stale)?;
        self.areas.save_area_outcomes(&model, &targets)?;

        if self.areas.count_area_outcomes(&model)? == 0 {
            self.areas.remove(&model)?;
            info!(
                "event=mapping_save module=mapper status=ok mode=multi action=area_removed area_id={:?} course_id={}",
                model.id, course_id
            );
            return Ok(None);
        }

        info!(
            "event=mapping_save module=mapper status=ok mode=multi area_id={:?} course_id={} mapped={} unmapped={}",
            model.id,
            course_id,
            targets.len(),
            stale.len()
        );
        Ok(Some(model))
    }

    /// Removes the area and all of its outcome links. Idempotent.
    pub fn remove_area(&self, area: &Area) -> MapperResult<()> {
        self.unit_of_work
            .write(|| Ok::<_, MapperError>(self.areas.remove(area)?))?;
        info!(
            "event=area_remove module=mapper status=ok area_id={:?}",
            area.id
        );
        Ok(())
    }

    /// Deletes every filter of the course. Other courses are untouched.
    pub fn remove_course_filters(&self, course_id: CourseId) -> MapperResult<usize> {
        let removed = self
            .unit_of_work
            .write(|| Ok::<_, MapperError>(self.filters.remove_by_course(course_id)?))?;
        info!(
            "event=filters_remove module=mapper status=ok course_id={} removed={}",
            course_id, removed
        );
        Ok(removed)
    }

    fn create_area(&self, component: &str, area: &str, item_id: i64) -> MapperResult<Area> {
        let mut model = Area::new(component, area, item_id);
        self.areas.save(&mut model)?;
        debug!(
            "event=area_create module=mapper status=ok area_id={:?} component={} area={} item_id={}",
            model.id, component, area, item_id
        );
        Ok(model)
    }
}

fn summary_row(
    outcome_set_id: OutcomeSetId,
    name: &str,
    edulevels: Option<String>,
    subjects: Option<String>,
) -> OutcomeSetMapping {
    OutcomeSetMapping {
        outcome_set_id,
        name: name.to_string(),
        edulevels,
        subjects,
    }
}
