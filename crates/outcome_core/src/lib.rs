//! Outcome mapping core.
//!
//! Maps content areas to gradable outcomes, constrained by course-level
//! outcome set filters. This crate owns the area/mapping invariants; hosts
//! call it through `MapperService` and render the returned payloads.

pub mod db;
pub mod logging;
pub mod model;
pub mod presentation;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::area::Area;
pub use model::filter::{Filter, FilterCriterion};
pub use model::outcome::Outcome;
pub use model::outcome_set::OutcomeSet;
pub use model::{
    AreaId, CourseId, FilterId, ModelValidationError, OutcomeId, OutcomeSetId,
};
pub use presentation::{outcome_set_mappings_json, OutcomeChoices, OutcomeSetMapping};
pub use repo::area_repo::{AreaQuery, AreaRepository, SqliteAreaRepository};
pub use repo::filter_repo::{FilterQuery, FilterRepository, SqliteFilterRepository};
pub use repo::outcome_repo::{OutcomeQuery, OutcomeRepository, SqliteOutcomeRepository};
pub use repo::outcome_set_repo::{
    OutcomeSetQuery, OutcomeSetRepository, SqliteOutcomeSetRepository,
};
pub use repo::{EntityKind, RepoError, RepoResult};
pub use service::mapper_service::{
    MapperError, MapperResult, MapperService, SqliteMapperService,
};
pub use service::unit_of_work::{SqliteUnitOfWork, UnitOfWork};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
