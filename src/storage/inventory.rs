// src/storage/inventory.rs

//! Upsert, sweep and query over the `items` table.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{InventoryStore, from_db_time, to_db_time};
use crate::error::{AppError, Result};
use crate::models::{
    InventoryItem, InventoryQuery, ItemStatus, LikePattern, LocationScope, ObservedItem,
    SessionId, YearPredicate,
};

/// What an upsert did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Refreshed(ItemStatus),
}

/// Rows a sweep is allowed to touch.
///
/// A sweep only ever covers one location. `only_make` narrows it to a
/// targeted walk; `except_makes` protects makes whose combination failed
/// to render in this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepScope {
    pub location_id: u32,
    pub session_id: SessionId,
    pub only_make: Option<String>,
    pub except_makes: Vec<String>,
}

impl SweepScope {
    /// Whole-location sweep.
    pub fn location(location_id: u32, session_id: SessionId) -> Self {
        Self {
            location_id,
            session_id,
            only_make: None,
            except_makes: Vec::new(),
        }
    }
}

const ITEM_COLUMNS: &str = "id, location_id, make, model, year, row_number, \
                            first_seen, last_seen, status, session_id, notes";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    let first_seen: String = row.get(6)?;
    let last_seen: String = row.get(7)?;
    let status: String = row.get(8)?;
    Ok(InventoryItem {
        id: row.get(0)?,
        location_id: row.get(1)?,
        make: row.get(2)?,
        model: row.get(3)?,
        year: row.get(4)?,
        row_number: row.get(5)?,
        first_seen: from_db_time(6, &first_seen)?,
        last_seen: from_db_time(7, &last_seen)?,
        status: status.parse().map_err(|e: AppError| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?,
        session_id: row.get(9)?,
        notes: row.get(10)?,
    })
}

fn push_like(sql: &mut String, params: &mut Vec<Value>, column: &str, patterns: &[LikePattern]) {
    if patterns.is_empty() {
        return;
    }
    let clauses: Vec<String> = patterns
        .iter()
        .map(|p| {
            params.push(Value::Text(p.as_str().to_string()));
            format!("{column} LIKE ? ESCAPE '\\'")
        })
        .collect();
    sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
}

fn push_years(sql: &mut String, params: &mut Vec<Value>, years: &[YearPredicate]) {
    if years.is_empty() {
        return;
    }
    let clauses: Vec<&str> = years
        .iter()
        .map(|year| match *year {
            YearPredicate::Exact(y) => {
                params.push(Value::Integer(y.into()));
                "year = ?"
            }
            YearPredicate::Range(start, end) => {
                params.push(Value::Integer(start.into()));
                params.push(Value::Integer(end.into()));
                "year BETWEEN ? AND ?"
            }
        })
        .collect();
    sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl InventoryStore {
    /// Insert a newly observed slot or refresh an existing one.
    pub fn upsert(&self, item: &ObservedItem, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let session = item.session_id.as_str();
        let window = item.session_id.window(now);
        let now_text = to_db_time(now);

        self.with_conn("upsert", |conn| {
            let tx = conn.unchecked_transaction()?;

            let existing = tx
                .query_row(
                    "SELECT id, status, session_id, first_seen FROM items
                     WHERE location_id = ?1 AND make = ?2 AND model = ?3
                       AND year = ?4 AND row_number = ?5",
                    params![
                        item.location_id,
                        item.make,
                        item.model,
                        item.year,
                        item.row_number
                    ],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            let outcome = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO items (location_id, make, model, year, row_number,
                                            first_seen, last_seen, status, session_id)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)",
                        params![
                            item.location_id,
                            item.make,
                            item.model,
                            item.year,
                            item.row_number,
                            now_text,
                            ItemStatus::New.as_str(),
                            session
                        ],
                    )?;
                    UpsertOutcome::Inserted
                }
                Some((id, status, previous_session, first_seen)) => {
                    let status: ItemStatus = status.parse()?;
                    let first_seen = from_db_time(3, &first_seen)?;
                    let next = status.reobserved(
                        previous_session == session,
                        first_seen.date_naive() == window,
                    );
                    tx.execute(
                        "UPDATE items SET last_seen = ?1, session_id = ?2, status = ?3
                         WHERE id = ?4",
                        params![now_text, session, next.as_str(), id],
                    )?;
                    UpsertOutcome::Refreshed(next)
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Mark every in-scope row not confirmed by `scope.session_id` as INACTIVE.
    ///
    /// Returns the number of rows that changed; a repeat call returns 0.
    pub fn sweep_inactive(&self, scope: &SweepScope) -> Result<usize> {
        let mut sql = String::from(
            "UPDATE items SET status = ? WHERE location_id = ? AND session_id != ? AND status != ?",
        );
        let inactive = ItemStatus::Active.swept().as_str();
        let mut params = vec![
            Value::Text(inactive.to_string()),
            Value::Integer(scope.location_id.into()),
            Value::Text(scope.session_id.as_str().to_string()),
            Value::Text(inactive.to_string()),
        ];

        if let Some(make) = &scope.only_make {
            sql.push_str(" AND UPPER(make) = UPPER(?)");
            params.push(Value::Text(make.clone()));
        }
        if !scope.except_makes.is_empty() {
            sql.push_str(&format!(
                " AND UPPER(make) NOT IN ({})",
                vec!["UPPER(?)"; scope.except_makes.len()].join(", ")
            ));
            params.extend(scope.except_makes.iter().cloned().map(Value::Text));
        }

        let changed = self.with_conn("sweep", |conn| {
            Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
        })?;

        log::info!(
            "Sweep location {} (session {}): {} item(s) marked INACTIVE",
            scope.location_id,
            scope.session_id,
            changed
        );
        Ok(changed)
    }

    /// Items matching `query`, newest discoveries first, then by model.
    pub fn query(&self, query: &InventoryQuery) -> Result<Vec<InventoryItem>> {
        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE 1 = 1");
        let mut params: Vec<Value> = Vec::new();

        if let LocationScope::Ids(ids) = &query.locations {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND location_id IN ({})", placeholders(ids.len())));
            params.extend(ids.iter().map(|id| Value::Integer((*id).into())));
        }

        let statuses = query.status.statuses();
        sql.push_str(&format!(" AND status IN ({})", placeholders(statuses.len())));
        params.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));

        push_like(&mut sql, &mut params, "make", &query.make_patterns);
        push_like(&mut sql, &mut params, "model", &query.model_patterns);
        push_years(&mut sql, &mut params, &query.years);

        if let Some(after) = query.first_seen_after {
            sql.push_str(" AND first_seen > ?");
            params.push(Value::Text(to_db_time(after)));
        }

        sql.push_str(" ORDER BY first_seen DESC, model COLLATE NOCASE ASC, id ASC");
        log::debug!("Inventory query: {sql} {params:?}");

        self.with_conn("query", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), item_from_row)?;
            let mut items = Vec::new();
            for item in rows {
                items.push(item?);
            }
            Ok(items)
        })
    }

    /// Most recent `last_seen` across all items.
    pub fn latest_refresh(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.with_conn("latest_refresh", |conn| {
            Ok(conn.query_row("SELECT MAX(last_seen) FROM items", [], |row| row.get(0))?)
        })?;
        raw.map(|s| from_db_time(0, &s).map_err(AppError::from))
            .transpose()
    }

    /// Item counts per status.
    pub fn status_counts(&self) -> Result<Vec<(ItemStatus, usize)>> {
        self.with_conn("status_counts", |conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM items GROUP BY status ORDER BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = Vec::new();
            for row in rows {
                let (status, count) = row?;
                counts.push((status.parse::<ItemStatus>()?, count as usize));
            }
            Ok(counts)
        })
    }
}
