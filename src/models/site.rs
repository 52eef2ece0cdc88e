// src/models/site.rs

//! Site adapter: declarative description of one catalog front-end.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A cascading dropdown on the search form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormControl {
    Location,
    Make,
    Model,
}

impl FormControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormControl::Location => "location",
            FormControl::Make => "make",
            FormControl::Model => "model",
        }
    }

    /// Controls whose option lists depend on this one.
    pub fn downstream(&self) -> &'static [FormControl] {
        match self {
            FormControl::Location => &[FormControl::Make, FormControl::Model],
            FormControl::Make => &[FormControl::Model],
            FormControl::Model => &[],
        }
    }
}

/// CSS selectors needed to drive a site's search form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSelectors {
    /// Location select, absent on single-location sites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_select: Option<String>,

    /// Make select
    pub make_select: String,

    /// Model select
    pub model_select: String,

    /// The search form element
    pub search_form: String,

    /// Results table rendered after a submit
    pub results_table: String,
}

impl FormSelectors {
    /// Selector for a given control, if the site has it.
    pub fn control(&self, control: FormControl) -> Option<&str> {
        match control {
            FormControl::Location => self.location_select.as_deref(),
            FormControl::Make => Some(&self.make_select),
            FormControl::Model => Some(&self.model_select),
        }
    }
}

/// One catalog site. Pure configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteAdapter {
    /// Short name used in logs and on the CLI
    pub name: String,

    /// Inventory page hosting the search form
    pub base_url: String,

    /// Whether the form offers a location dropdown
    #[serde(default)]
    pub has_multiple_locations: bool,

    /// Fixed location id for single-location sites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<u32>,

    /// Form selectors
    pub selectors: FormSelectors,
}

impl SiteAdapter {
    /// Check that the adapter is internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("site name is empty"));
        }
        url::Url::parse(&self.base_url)?;
        if self.has_multiple_locations && self.selectors.location_select.is_none() {
            return Err(AppError::validation(format!(
                "site '{}' has multiple locations but no location_select",
                self.name
            )));
        }
        if !self.has_multiple_locations && self.location_id.is_none() {
            return Err(AppError::validation(format!(
                "single-location site '{}' needs a location_id",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> FormSelectors {
        FormSelectors {
            location_select: Some("#yard-id".into()),
            make_select: "#car-make".into(),
            model_select: "#car-model".into(),
            search_form: "#searchinventory".into(),
            results_table: ".table-responsive table".into(),
        }
    }

    #[test]
    fn test_multi_location_requires_location_select() {
        let mut site = SiteAdapter {
            name: "jungle".into(),
            base_url: "https://inventory.example.com/".into(),
            has_multiple_locations: true,
            location_id: None,
            selectors: selectors(),
        };
        assert!(site.validate().is_ok());

        site.selectors.location_select = None;
        assert!(site.validate().is_err());
    }

    #[test]
    fn test_single_location_requires_id() {
        let mut site = SiteAdapter {
            name: "trusty".into(),
            base_url: "https://inventory.example.com/".into(),
            has_multiple_locations: false,
            location_id: None,
            selectors: selectors(),
        };
        assert!(site.validate().is_err());

        site.location_id = Some(999999);
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_downstream_cascade() {
        assert_eq!(
            FormControl::Location.downstream(),
            &[FormControl::Make, FormControl::Model]
        );
        assert!(FormControl::Model.downstream().is_empty());
    }
}
