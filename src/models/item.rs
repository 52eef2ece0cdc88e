// src/models/item.rs

//! Observed and reconciled inventory items.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::SessionId;

/// Liveness of an inventory slot.
///
/// Transitions:
/// - insert: `NEW`
/// - re-observed in the same session: unchanged
/// - re-observed in a later session: `NEW` if first seen inside the session's
///   date window, otherwise `ACTIVE`
/// - swept: `INACTIVE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    New,
    Active,
    Inactive,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::New => "NEW",
            ItemStatus::Active => "ACTIVE",
            ItemStatus::Inactive => "INACTIVE",
        }
    }

    /// Status after the slot is seen again.
    pub fn reobserved(self, same_session: bool, first_seen_in_window: bool) -> Self {
        if same_session {
            return self;
        }
        if first_seen_in_window {
            ItemStatus::New
        } else {
            ItemStatus::Active
        }
    }

    /// Status after a sweep finds the slot missing from the latest session.
    pub fn swept(self) -> Self {
        ItemStatus::Inactive
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(ItemStatus::New),
            "ACTIVE" => Ok(ItemStatus::Active),
            "INACTIVE" => Ok(ItemStatus::Inactive),
            other => Err(AppError::validation(format!("unknown status '{other}'"))),
        }
    }
}

/// One results-table row, tagged with where and when it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedItem {
    pub location_id: u32,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub row_number: i64,
    pub session_id: SessionId,
}

/// Reconciled record of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: i64,
    pub location_id: u32,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub row_number: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: ItemStatus,
    pub session_id: String,
    pub notes: String,
}

impl InventoryItem {
    /// Short display label, e.g. `FORD F150 (2004)`.
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.make, self.model, self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reobserved_later_session() {
        assert_eq!(
            ItemStatus::New.reobserved(false, true),
            ItemStatus::New
        );
        assert_eq!(
            ItemStatus::New.reobserved(false, false),
            ItemStatus::Active
        );
        assert_eq!(
            ItemStatus::Inactive.reobserved(false, false),
            ItemStatus::Active
        );
    }

    #[test]
    fn test_reobserved_same_session_is_stable() {
        for status in [ItemStatus::New, ItemStatus::Active] {
            assert_eq!(status.reobserved(true, false), status);
            assert_eq!(status.reobserved(true, true), status);
        }
    }

    #[test]
    fn test_swept() {
        assert_eq!(ItemStatus::New.swept(), ItemStatus::Inactive);
        assert_eq!(ItemStatus::Inactive.swept(), ItemStatus::Inactive);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!("active".parse::<ItemStatus>().unwrap(), ItemStatus::Active);
        assert_eq!(" NEW ".parse::<ItemStatus>().unwrap(), ItemStatus::New);
        assert!("gone".parse::<ItemStatus>().is_err());
    }
}
