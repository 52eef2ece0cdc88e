// src/models/session.rs

//! Crawl session identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Opaque id scoping one full walk of the parameter space.
///
/// Ids produced by [`SessionId::today`] start with `YYYYMMDD`; that prefix
/// defines the session's date window. Other ids use the observation date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id, rejecting blank input.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(AppError::validation("session id must not be empty"));
        }
        Ok(Self(id))
    }

    /// Date-derived id for the current UTC day.
    pub fn today() -> Self {
        Self::for_date(Utc::now().date_naive())
    }

    /// Date-derived id for a given day.
    pub fn for_date(date: NaiveDate) -> Self {
        Self(date.format("%Y%m%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calendar day an item must have been first seen on to stay NEW.
    pub fn window(&self, now: DateTime<Utc>) -> NaiveDate {
        self.0
            .get(..8)
            .filter(|prefix| prefix.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y%m%d").ok())
            .unwrap_or_else(|| now.date_naive())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
