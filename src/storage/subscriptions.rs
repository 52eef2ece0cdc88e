// src/storage/subscriptions.rs

//! Saved-search persistence.
//!
//! Optional filter fields are stored as the literal `ANY` so that the
//! UNIQUE constraint covers unconstrained columns too (SQLite treats NULLs
//! as distinct).

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{InventoryStore, from_db_time, is_constraint_violation, to_db_time};
use crate::error::{AppError, Result};
use crate::models::{NewSubscription, Subscription};

const BROADCAST_MARKER: &str = "new_broadcast";

const ANY: &str = "ANY";

const SUBSCRIPTION_COLUMNS: &str = "id, owner, location, make, model, year_filter, status, \
                                    notes, created_at, updated_at, last_notified";

fn to_column(value: Option<&str>) -> &str {
    value.unwrap_or(ANY)
}

fn from_column(value: String) -> Option<String> {
    if value == ANY { None } else { Some(value) }
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let last_notified: Option<String> = row.get(10)?;
    Ok(Subscription {
        id: row.get(0)?,
        owner: row.get(1)?,
        location: row.get(2)?,
        make: from_column(row.get(3)?),
        model: from_column(row.get(4)?),
        year: from_column(row.get(5)?),
        status: row.get(6)?,
        notes: row.get(7)?,
        created_at: from_db_time(8, &created_at)?,
        updated_at: from_db_time(9, &updated_at)?,
        last_notified: last_notified
            .map(|raw| from_db_time(10, &raw))
            .transpose()?,
    })
}

impl InventoryStore {
    /// Insert a normalized subscription, rejecting exact duplicates.
    pub fn insert_subscription(
        &self,
        sub: &NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        if sub.owner.trim().is_empty() {
            return Err(AppError::validation("subscription owner must not be empty"));
        }
        let now_text = to_db_time(now);
        let make = to_column(sub.make.as_deref());
        let model = to_column(sub.model.as_deref());
        let year = to_column(sub.year.as_deref());

        let id = self.with_conn("insert_subscription", |conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM subscriptions
                     WHERE owner = ?1 AND location = ?2 AND make = ?3
                       AND model = ?4 AND year_filter = ?5 AND status = ?6",
                    params![sub.owner, sub.location, make, model, year, sub.status],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(AppError::AlreadyExists);
            }

            match conn.execute(
                "INSERT INTO subscriptions (owner, location, make, model, year_filter, status,
                                            notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    sub.owner,
                    sub.location,
                    make,
                    model,
                    year,
                    sub.status,
                    sub.notes,
                    now_text
                ],
            ) {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(err) if is_constraint_violation(&err) => Err(AppError::AlreadyExists),
                Err(err) => Err(err.into()),
            }
        })?;

        log::info!("Saved subscription {} for {}", id, sub.owner);
        self.get_subscription(id)
    }

    /// Delete a subscription by id.
    pub fn delete_subscription(&self, id: i64) -> Result<()> {
        let removed = self.with_conn("delete_subscription", |conn| {
            Ok(conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?)
        })?;
        if removed == 0 {
            return Err(AppError::NotFound { id });
        }
        log::info!("Deleted subscription {id}");
        Ok(())
    }

    pub fn get_subscription(&self, id: i64) -> Result<Subscription> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1");
        self.with_conn("get_subscription", |conn| {
            Ok(conn
                .query_row(&sql, params![id], subscription_from_row)
                .optional()?)
        })?
        .ok_or(AppError::NotFound { id })
    }

    /// Subscriptions of one owner, optionally limited to one stored location filter.
    pub fn subscriptions_for(&self, owner: &str, location: Option<&str>) -> Result<Vec<Subscription>> {
        let mut sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE owner = ?1");
        if location.is_some() {
            sql.push_str(" AND location = ?2");
        }
        sql.push_str(" ORDER BY id ASC");

        self.with_conn("subscriptions_for", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = match location {
                Some(location) => stmt.query_map(params![owner, location], subscription_from_row)?,
                None => stmt.query_map(params![owner], subscription_from_row)?,
            };
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Every subscription, in creation order.
    pub fn all_subscriptions(&self) -> Result<Vec<Subscription>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY id ASC");
        self.with_conn("all_subscriptions", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], subscription_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Record a successful delivery.
    pub fn mark_notified(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let at = to_db_time(at);
        let updated = self.with_conn("mark_notified", |conn| {
            Ok(conn.execute(
                "UPDATE subscriptions SET last_notified = ?1 WHERE id = ?2",
                params![at, id],
            )?)
        })?;
        if updated == 0 {
            return Err(AppError::NotFound { id });
        }
        Ok(())
    }

    /// When the NEW broadcast last went out, if ever.
    pub fn last_broadcast(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.with_conn("last_broadcast", |conn| {
            Ok(conn
                .query_row(
                    "SELECT at FROM job_state WHERE name = ?1",
                    params![BROADCAST_MARKER],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        raw.map(|s| from_db_time(0, &s).map_err(AppError::from))
            .transpose()
    }

    pub fn record_broadcast(&self, at: DateTime<Utc>) -> Result<()> {
        let at = to_db_time(at);
        self.with_conn("record_broadcast", |conn| {
            conn.execute(
                "INSERT INTO job_state (name, at) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET at = excluded.at",
                params![BROADCAST_MARKER, at],
            )?;
            Ok(())
        })
    }
}
