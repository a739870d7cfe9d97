//! Mappable content area.
//!
//! An area is the `(component, area, item_id)` triple that outcomes can be
//! attached to. A persisted area always carries at least one outcome mapping;
//! the mapper service deletes the row when the last mapping goes away.

use super::{require_text, AreaId, ModelValidationError};
use serde::{Deserialize, Serialize};

/// Content area outcomes are mapped onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// `None` until the area row is saved.
    pub id: Option<AreaId>,
    /// Owning plugin/component, e.g. `mod_forum`.
    pub component: String,
    /// Area name within the component.
    pub area: String,
    /// Item id within the component area.
    #[serde(rename = "itemid")]
    pub item_id: i64,
}

impl Area {
    /// Creates an unsaved area for the given triple.
    pub fn new(component: impl Into<String>, area: impl Into<String>, item_id: i64) -> Self {
        Self {
            id: None,
            component: component.into(),
            area: area.into(),
            item_id,
        }
    }

    /// Checks field-level rules before persistence.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_text("area", "component", &self.component)?;
        require_text("area", "area", &self.area)?;
        Ok(())
    }
}
