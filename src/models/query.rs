// src/models/query.rs

//! Canonical filter predicates evaluated by the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ItemStatus;

/// Status membership filter.
///
/// `ACTIVE` means "still listed" and includes `NEW`; the others are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusFilter {
    #[default]
    Active,
    New,
    Inactive,
}

impl StatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::Active => "ACTIVE",
            StatusFilter::New => "NEW",
            StatusFilter::Inactive => "INACTIVE",
        }
    }

    /// Statuses admitted by this filter.
    pub fn statuses(&self) -> &'static [ItemStatus] {
        match self {
            StatusFilter::Active => &[ItemStatus::New, ItemStatus::Active],
            StatusFilter::New => &[ItemStatus::New],
            StatusFilter::Inactive => &[ItemStatus::Inactive],
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(StatusFilter::Active),
            "NEW" => Ok(StatusFilter::New),
            "INACTIVE" => Ok(StatusFilter::Inactive),
            other => Err(AppError::validation(format!(
                "unknown status '{other}' (expected ACTIVE, NEW or INACTIVE)"
            ))),
        }
    }
}

/// Which locations a query covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationScope {
    All,
    Ids(Vec<u32>),
}

impl fmt::Display for LocationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationScope::All => f.write_str("ALL"),
            LocationScope::Ids(ids) => {
                let joined: Vec<String> = ids.iter().map(u32::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// A single year or an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YearPredicate {
    Exact(i32),
    Range(i32, i32),
}

/// Case-insensitive substring pattern in SQL `LIKE` syntax (escape char `\`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LikePattern(String);

impl LikePattern {
    /// Build a pattern from a free-text fragment.
    ///
    /// Runs of whitespace become a wildcard gap, so `3 series` matches `3Series`.
    pub fn from_fragment(fragment: &str) -> Self {
        let parts: Vec<String> = fragment
            .split_whitespace()
            .map(|part| {
                let mut escaped = String::with_capacity(part.len());
                for c in part.chars() {
                    if matches!(c, '%' | '_' | '\\') {
                        escaped.push('\\');
                    }
                    escaped.push(c);
                }
                escaped
            })
            .collect();
        Self(format!("%{}%", parts.join("%")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Fully resolved inventory query.
///
/// Empty pattern/year lists impose no constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryQuery {
    pub locations: LocationScope,
    pub status: StatusFilter,
    pub make_patterns: Vec<LikePattern>,
    pub model_patterns: Vec<LikePattern>,
    pub years: Vec<YearPredicate>,
    /// Only items first seen strictly after this instant
    pub first_seen_after: Option<DateTime<Utc>>,
}

impl Default for InventoryQuery {
    fn default() -> Self {
        Self {
            locations: LocationScope::All,
            status: StatusFilter::Active,
            make_patterns: Vec::new(),
            model_patterns: Vec::new(),
            years: Vec::new(),
            first_seen_after: None,
        }
    }
}
