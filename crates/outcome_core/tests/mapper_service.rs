use outcome_core::db::open_db_in_memory;
use outcome_core::{
    Area, AreaId, AreaQuery, AreaRepository, Filter, FilterCriterion, FilterRepository,
    MapperError, MapperService, Outcome, OutcomeId, OutcomeRepository, OutcomeSet,
    OutcomeSetRepository, RepoError, RepoResult, SqliteAreaRepository, SqliteFilterRepository,
    SqliteMapperService, SqliteOutcomeRepository, SqliteOutcomeSetRepository, SqliteUnitOfWork,
};
use rusqlite::Connection;
use std::collections::BTreeSet;

const COURSE: i64 = 10;
const OTHER_COURSE: i64 = 20;

struct Fixture {
    math_set: i64,
    science_set: i64,
    algebra: OutcomeId,
    geometry: OutcomeId,
    biology: OutcomeId,
    retired: OutcomeId,
}

fn seed(conn: &Connection) -> Fixture {
    let sets = SqliteOutcomeSetRepository::try_new(conn).unwrap();
    let outcomes = SqliteOutcomeRepository::try_new(conn).unwrap();

    let math_set = sets.save(&mut OutcomeSet::new("MATH", "Math")).unwrap();
    let science_set = sets.save(&mut OutcomeSet::new("SCI", "Science")).unwrap();

    let save = |outcome: Outcome| {
        let mut outcome = outcome;
        outcomes.save(&mut outcome).unwrap()
    };
    let algebra = save(
        Outcome::new(math_set, "MATH.ALG", "Solve linear equations")
            .with_edu_levels(["9"])
            .with_subjects(["Algebra"]),
    );
    let geometry = save(
        Outcome::new(math_set, "MATH.GEO", "Prove triangle congruence")
            .with_edu_levels(["10"])
            .with_subjects(["Geometry"]),
    );
    let biology = save(
        Outcome::new(science_set, "SCI.BIO", "Describe cell structure")
            .with_edu_levels(["9"])
            .with_subjects(["Biology"]),
    );
    let mut retired_outcome = Outcome::new(math_set, "MATH.OLD", "Retired standard");
    retired_outcome.deleted = true;
    let retired = save(retired_outcome);

    Fixture {
        math_set,
        science_set,
        algebra,
        geometry,
        biology,
        retired,
    }
}

fn set_filters(conn: &Connection, course_id: i64, filters: &[Filter]) {
    let repo = SqliteFilterRepository::try_new(conn).unwrap();
    repo.sync(course_id, filters).unwrap();
}

fn mapped_ids(conn: &Connection, item_id: i64) -> BTreeSet<OutcomeId> {
    let service = SqliteMapperService::from_connection(conn).unwrap();
    service
        .get_outcome_mappings("mod_forum", "forum", item_id)
        .unwrap()
        .into_iter()
        .filter_map(|outcome| outcome.id)
        .collect()
}

fn assert_area_invariant(conn: &Connection) {
    let orphaned: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM outcome_areas a
             WHERE NOT EXISTS (
                 SELECT 1 FROM outcome_area_outcomes ao WHERE ao.area_id = a.id
             );",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphaned, 0, "area rows without outcome links found");
}

fn ids(values: &[OutcomeId]) -> BTreeSet<OutcomeId> {
    values.iter().copied().collect()
}

#[test]
fn single_save_without_outcome_on_missing_area_is_noop() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let result = service
        .save_single_mapping("mod_forum", "forum", 1, None)
        .unwrap();
    assert!(result.is_none());

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 1).unwrap().is_none());
}

#[test]
fn single_save_creates_area_and_replaces_previous_outcome() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let area = service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.algebra))
        .unwrap()
        .unwrap();
    assert!(area.id.is_some());
    assert_eq!(mapped_ids(&conn, 1), ids(&[fx.algebra]));

    let again = service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.geometry))
        .unwrap()
        .unwrap();
    assert_eq!(again.id, area.id);
    assert_eq!(mapped_ids(&conn, 1), ids(&[fx.geometry]));

    service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.geometry))
        .unwrap();
    assert_eq!(mapped_ids(&conn, 1), ids(&[fx.geometry]));
    assert_area_invariant(&conn);
}

#[test]
fn single_save_with_none_removes_existing_area() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.algebra))
        .unwrap();
    let result = service
        .save_single_mapping("mod_forum", "forum", 1, None)
        .unwrap();
    assert!(result.is_none());

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 1).unwrap().is_none());
    assert!(mapped_ids(&conn, 1).is_empty());
}

#[test]
fn single_save_with_unknown_outcome_fails_without_writing() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let err = service
        .save_single_mapping("mod_forum", "forum", 1, Some(9999))
        .unwrap_err();
    assert!(matches!(err, MapperError::OutcomeNotFound(9999)));

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 1).unwrap().is_none());
}

#[test]
fn resolve_only_returns_sets_referenced_by_course_filters() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    set_filters(&conn, OTHER_COURSE, &[Filter::new(OTHER_COURSE, fx.science_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let area = service
        .save_multi_mapping(
            "mod_forum",
            "forum",
            1,
            &[fx.algebra, fx.geometry, fx.biology],
            COURSE,
        )
        .unwrap()
        .unwrap();

    let choices = service.resolve_eligible_outcomes(&area, COURSE).unwrap();
    assert_eq!(choices.outcome_set_ids(), ids(&[fx.math_set]));
    assert_eq!(choices.outcome_ids(), ids(&[fx.algebra, fx.geometry]));

    let other = service
        .resolve_eligible_outcomes(&area, OTHER_COURSE)
        .unwrap();
    assert_eq!(other.outcome_set_ids(), ids(&[fx.science_set]));
    assert_eq!(other.outcome_ids(), ids(&[fx.biology]));

    let unfiltered = service.resolve_eligible_outcomes(&area, 999).unwrap();
    assert!(unfiltered.is_empty());
}

#[test]
fn resolve_applies_criteria_and_unions_across_filters() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(
        &conn,
        COURSE,
        &[
            Filter::new(COURSE, fx.math_set)
                .with_criterion(FilterCriterion::new(Some("9"), None)),
            Filter::new(COURSE, fx.math_set)
                .with_criterion(FilterCriterion::new(Some("9"), Some("Algebra"))),
        ],
    );
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let area = service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.algebra, fx.geometry], COURSE)
        .unwrap()
        .unwrap();

    let choices = service.resolve_eligible_outcomes(&area, COURSE).unwrap();
    assert_eq!(choices.outcome_sets.len(), 1);
    assert_eq!(choices.outcome_ids(), ids(&[fx.algebra]));
}

#[test]
fn resolve_skips_deleted_outcomes() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let area = service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.algebra, fx.retired], COURSE)
        .unwrap()
        .unwrap();

    let choices = service.resolve_eligible_outcomes(&area, COURSE).unwrap();
    assert_eq!(choices.outcome_ids(), ids(&[fx.algebra]));
}

#[test]
fn multi_save_unmaps_eligible_outcomes_not_selected() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.algebra, fx.geometry], COURSE)
        .unwrap();
    service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.geometry], COURSE)
        .unwrap();

    assert_eq!(mapped_ids(&conn, 1), ids(&[fx.geometry]));
    assert_area_invariant(&conn);
}

#[test]
fn multi_save_keeps_links_outside_course_filters() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.algebra, fx.biology], COURSE)
        .unwrap();
    service
        .save_multi_mapping("mod_forum", "forum", 1, &[], COURSE)
        .unwrap();

    assert_eq!(mapped_ids(&conn, 1), ids(&[fx.biology]));
}

#[test]
fn multi_save_maps_requested_outcomes_outside_eligible_set() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let area = service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.biology], COURSE)
        .unwrap();
    assert!(area.is_some());
    assert!(service
        .resolve_eligible_outcomes(area.as_ref().unwrap(), COURSE)
        .unwrap()
        .is_empty());
    assert_eq!(mapped_ids(&conn, 1), ids(&[fx.biology]));
}

#[test]
fn multi_save_removes_area_when_selection_empties_it() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.algebra], COURSE)
        .unwrap();
    let result = service
        .save_multi_mapping("mod_forum", "forum", 1, &[], COURSE)
        .unwrap();
    assert!(result.is_none());

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 1).unwrap().is_none());
    assert_area_invariant(&conn);
}

#[test]
fn multi_save_with_nothing_to_save_is_noop() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let result = service
        .save_multi_mapping("mod_forum", "forum", 1, &[], COURSE)
        .unwrap();
    assert!(result.is_none());
    assert_area_invariant(&conn);
}

#[test]
fn multi_save_with_unknown_outcome_fails_without_writing() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let err = service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.algebra, 4242], COURSE)
        .unwrap_err();
    assert!(matches!(err, MapperError::OutcomeNotFound(4242)));

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 1).unwrap().is_none());
}

/// Area repository whose link inserts fail after every other write went through.
struct RejectingLinkInserts<'conn> {
    inner: SqliteAreaRepository<'conn>,
}

impl AreaRepository for RejectingLinkInserts<'_> {
    fn find(&self, id: AreaId) -> RepoResult<Option<Area>> {
        self.inner.find(id)
    }

    fn find_one(&self, component: &str, area: &str, item_id: i64) -> RepoResult<Option<Area>> {
        self.inner.find_one(component, area, item_id)
    }

    fn find_by(&self, query: &AreaQuery) -> RepoResult<Vec<Area>> {
        self.inner.find_by(query)
    }

    fn save(&self, area: &mut Area) -> RepoResult<AreaId> {
        self.inner.save(area)
    }

    fn remove(&self, area: &Area) -> RepoResult<()> {
        self.inner.remove(area)
    }

    fn save_area_outcomes(&self, _area: &Area, _outcomes: &[Outcome]) -> RepoResult<()> {
        Err(RepoError::InvalidData("link insert rejected".to_string()))
    }

    fn remove_area_outcomes(&self, area: &Area, outcomes: &[Outcome]) -> RepoResult<()> {
        self.inner.remove_area_outcomes(area, outcomes)
    }

    fn count_area_outcomes(&self, area: &Area) -> RepoResult<u64> {
        self.inner.count_area_outcomes(area)
    }
}

fn rejecting_service(
    conn: &Connection,
) -> MapperService<
    SqliteOutcomeRepository<'_>,
    SqliteOutcomeSetRepository<'_>,
    SqliteFilterRepository<'_>,
    RejectingLinkInserts<'_>,
    SqliteUnitOfWork<'_>,
> {
    MapperService::new(
        SqliteOutcomeRepository::try_new(conn).unwrap(),
        SqliteOutcomeSetRepository::try_new(conn).unwrap(),
        SqliteFilterRepository::try_new(conn).unwrap(),
        RejectingLinkInserts {
            inner: SqliteAreaRepository::try_new(conn).unwrap(),
        },
        SqliteUnitOfWork::new(conn),
    )
}

#[test]
fn failed_single_save_keeps_previous_mapping() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();
    service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.algebra))
        .unwrap();

    let failing = rejecting_service(&conn);
    let err = failing
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.geometry))
        .unwrap_err();
    assert!(matches!(err, MapperError::Repo(RepoError::InvalidData(_))));

    assert_eq!(mapped_ids(&conn, 1), ids(&[fx.algebra]));
    assert_area_invariant(&conn);
    assert!(conn.is_autocommit());
}

#[test]
fn failed_single_save_on_new_item_creates_no_area() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);

    let failing = rejecting_service(&conn);
    assert!(failing
        .save_single_mapping("mod_forum", "forum", 3, Some(fx.algebra))
        .is_err());

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 3).unwrap().is_none());
    assert_area_invariant(&conn);
}

#[test]
fn failed_multi_save_on_new_item_creates_no_area() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);

    let failing = rejecting_service(&conn);
    let err = failing
        .save_multi_mapping("mod_forum", "forum", 2, &[fx.algebra, fx.geometry], COURSE)
        .unwrap_err();
    assert!(matches!(err, MapperError::Repo(RepoError::InvalidData(_))));

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 2).unwrap().is_none());
    assert!(mapped_ids(&conn, 2).is_empty());
    assert_area_invariant(&conn);
}

#[test]
fn failed_multi_save_keeps_previous_selection() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();
    service
        .save_multi_mapping("mod_forum", "forum", 2, &[fx.algebra], COURSE)
        .unwrap();

    let failing = rejecting_service(&conn);
    assert!(failing
        .save_multi_mapping("mod_forum", "forum", 2, &[fx.geometry], COURSE)
        .is_err());

    assert_eq!(mapped_ids(&conn, 2), ids(&[fx.algebra]));
    assert_area_invariant(&conn);
}

#[test]
fn remove_area_is_unconditional_and_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let area = service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.algebra))
        .unwrap()
        .unwrap();
    service.remove_area(&area).unwrap();
    service.remove_area(&area).unwrap();
    service
        .remove_area(&Area::new("mod_forum", "forum", 2))
        .unwrap();

    assert!(mapped_ids(&conn, 1).is_empty());
    let linked: i64 = conn
        .query_row("SELECT COUNT(*) FROM outcome_area_outcomes;", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(linked, 0);
}

#[test]
fn remove_course_filters_only_affects_that_course() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(
        &conn,
        COURSE,
        &[
            Filter::new(COURSE, fx.math_set),
            Filter::new(COURSE, fx.science_set),
        ],
    );
    set_filters(&conn, OTHER_COURSE, &[Filter::new(OTHER_COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    assert_eq!(service.remove_course_filters(COURSE).unwrap(), 2);

    let filters = SqliteFilterRepository::try_new(&conn).unwrap();
    assert!(filters.find_by_course(COURSE).unwrap().is_empty());
    assert_eq!(filters.find_by_course(OTHER_COURSE).unwrap().len(), 1);
}

#[test]
fn form_payload_is_none_for_unmapped_area_and_json_otherwise() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    assert!(service
        .get_outcome_mappings_for_form("mod_forum", "forum", 1, COURSE)
        .unwrap()
        .is_none());

    service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.algebra))
        .unwrap();
    let choices = service
        .get_outcome_mappings_for_form("mod_forum", "forum", 1, COURSE)
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&choices.to_json().unwrap()).unwrap();
    assert_eq!(json["outcomesets"][0]["name"], "Math");
    assert_eq!(json["outcomes"][0]["idnumber"], "MATH.ALG");
    assert_eq!(json["outcomes"][0]["edulevels"][0], "9");
}

#[test]
fn many_mappings_are_keyed_by_item_id() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.algebra))
        .unwrap();
    service
        .save_single_mapping("mod_forum", "forum", 3, Some(fx.biology))
        .unwrap();

    let mapped = service
        .get_many_outcome_mappings("mod_forum", "forum", &[1, 2, 3])
        .unwrap();
    let keys: Vec<_> = mapped.keys().copied().collect();
    assert_eq!(keys, vec![1, 3]);
    assert_eq!(mapped[&3][0].id, Some(fx.biology));
}

#[test]
fn outcome_set_mappings_roundtrip_through_course_sync() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let saved = service
        .save_outcome_set_mappings(
            COURSE,
            vec![
                Filter::new(OTHER_COURSE, fx.math_set)
                    .with_criterion(FilterCriterion::new(Some("9"), Some("Algebra")))
                    .with_criterion(FilterCriterion::new(Some("10"), None)),
                Filter::new(COURSE, fx.science_set),
            ],
        )
        .unwrap();
    assert!(saved.iter().all(|filter| filter.course_id == COURSE));

    let rows = service.get_outcome_set_mappings(COURSE).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].outcome_set_id, fx.math_set);
    assert_eq!(rows[0].name, "Math");
    assert_eq!(rows[0].edulevels.as_deref(), Some("9"));
    assert_eq!(rows[0].subjects.as_deref(), Some("Algebra"));
    assert_eq!(rows[1].subjects, None);
    assert_eq!(rows[2].outcome_set_id, fx.science_set);
    assert_eq!(rows[2].edulevels, None);

    assert!(service.get_outcome_set_mappings(OTHER_COURSE).unwrap().is_empty());
}

#[test]
fn outcome_set_mappings_skip_deleted_sets() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(
        &conn,
        COURSE,
        &[
            Filter::new(COURSE, fx.math_set),
            Filter::new(COURSE, fx.science_set),
        ],
    );
    SqliteOutcomeSetRepository::try_new(&conn)
        .unwrap()
        .remove(fx.science_set)
        .unwrap();
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    let rows = service.get_outcome_set_mappings(COURSE).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome_set_id, fx.math_set);
}

#[test]
fn area_invariant_holds_across_mixed_operations() {
    let conn = open_db_in_memory().unwrap();
    let fx = seed(&conn);
    set_filters(&conn, COURSE, &[Filter::new(COURSE, fx.math_set)]);
    let service = SqliteMapperService::from_connection(&conn).unwrap();

    service
        .save_single_mapping("mod_forum", "forum", 1, Some(fx.algebra))
        .unwrap();
    assert_area_invariant(&conn);
    service
        .save_multi_mapping("mod_forum", "forum", 1, &[fx.geometry], COURSE)
        .unwrap();
    assert_area_invariant(&conn);
    service
        .save_multi_mapping("mod_forum", "forum", 2, &[fx.algebra], COURSE)
        .unwrap();
    service
        .save_single_mapping("mod_forum", "forum", 2, None)
        .unwrap();
    assert_area_invariant(&conn);
    service
        .save_multi_mapping("mod_forum", "forum", 1, &[], COURSE)
        .unwrap();
    assert_area_invariant(&conn);

    let areas = SqliteAreaRepository::try_new(&conn).unwrap();
    assert!(areas.find_one("mod_forum", "forum", 1).unwrap().is_none());
    assert!(areas.find_one("mod_forum", "forum", 2).unwrap().is_none());
}
