// src/models/subscription.rs

//! Saved searches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Loose, user-entered search criteria.
///
/// `None` fields mean "ANY". Strings are resolved by the query resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// `ALL`, a region name, a location name, or comma-separated ids
    pub location: String,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Comma-separated years and `start-end` ranges
    #[serde(default)]
    pub year: Option<String>,
    /// `ACTIVE` (default), `NEW` or `INACTIVE`
    #[serde(default)]
    pub status: Option<String>,
}

impl SearchCriteria {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    pub fn make(mut self, make: impl Into<String>) -> Self {
        self.make = Some(make.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Treat blank and `ANY` inputs as unconstrained.
pub(crate) fn constrained(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("ANY"))
}

/// A standing saved search.
///
/// Filter fields are stored normalized: `location` is the resolved scope
/// (`ALL` or comma-separated ids), `make` is canonical, `model` is upper-case,
/// `year` has whitespace removed and `status` is one of the filter names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub owner: String,
    pub location: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub status: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_notified: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Criteria to re-run through the resolver.
    pub fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            location: self.location.clone(),
            make: self.make.clone(),
            model: self.model.clone(),
            year: self.year.clone(),
            status: Some(self.status.clone()),
        }
    }

    /// Human-readable summary used in notification titles.
    pub fn describe(&self, location_label: &str) -> String {
        format!(
            "{} {} ({}) at {} with {} status",
            self.make.as_deref().unwrap_or("ANY"),
            self.model.as_deref().unwrap_or("ANY"),
            self.year.as_deref().unwrap_or("ANY"),
            location_label,
            self.status
        )
    }
}

/// Normalized subscription ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub owner: String,
    pub location: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub status: String,
    pub notes: String,
}
