// src/services/resolver.rs

//! Fuzzy query resolution.
//!
//! Turns loose user input (make/model spellings, year lists, yard names)
//! into an [`InventoryQuery`]. Make resolution is strict; everything else
//! is lenient.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{
    Config, InventoryQuery, LikePattern, LocationScope, SearchCriteria, StatusFilter,
    YearPredicate, constrained,
};

/// Makes offered by the supported catalogs.
pub const CANONICAL_MAKES: &[&str] = &[
    "ACURA", "ALFA ROMEO", "AMC", "AUDI", "BMW", "BUICK", "CADILLAC", "CHEVROLET", "CHRYSLER",
    "DATSUN", "DODGE", "EAGLE", "FIAT", "FORD", "GEO", "GMC", "HONDA", "HUMMER", "HYUNDAI",
    "INFINITI", "ISUZU", "JAGUAR", "JEEP", "KIA", "LAND ROVER", "LEXUS", "LINCOLN", "MAZDA",
    "MERCEDES-BENZ", "MERCURY", "MG", "MINI", "MITSUBISHI", "NASH", "NISSAN", "OLDSMOBILE",
    "PACKARD", "PLYMOUTH", "PONTIAC", "PORSCHE", "RAM", "SAAB", "SATURN", "SCION", "SMART",
    "SUBARU", "SUZUKI", "TOYOTA", "TRIUMPH", "VOLKSWAGEN", "VOLVO",
];

/// Accepted alternate spellings, keyed by canonical make.
pub const MAKE_ALIASES: &[(&str, &[&str])] = &[
    ("CHEVROLET", &["CHEVY", "CHEV"]),
    (
        "MERCEDES-BENZ",
        &["MERCEDES", "MERCEDES BENZ", "BENZ", "MERCEDESBENZ"],
    ),
    ("VOLKSWAGEN", &["VW"]),
    ("LAND ROVER", &["LANDROVER"]),
    ("MINI", &["MINI COOPER"]),
    ("BMW", &["BIMMER"]),
];

/// Model families and the spellings each one expands to.
pub const MODEL_ALIASES: &[(&str, &[&str])] = &[
    ("1500", &["1500", "C1500", "K1500"]),
    ("2500", &["2500", "C2500", "K2500"]),
    ("3500", &["3500", "C3500", "K3500"]),
    (
        "3 SERIES",
        &[
            "3 series", "3-series", "3series", "318", "320", "323", "325", "328", "330", "335",
        ],
    ),
    (
        "5 SERIES",
        &[
            "5 series", "5-series", "5series", "525", "528", "530", "535", "540", "545", "550",
        ],
    ),
    (
        "7 SERIES",
        &["7 series", "7-series", "7series", "740", "745", "750", "760"],
    ),
    ("X", &["x3", "x5", "x6"]),
    (
        "E CLASS",
        &[
            "e class", "e-class", "eclass", "e320", "e350", "e500", "e550", "e63",
        ],
    ),
    (
        "C CLASS",
        &[
            "c class", "c-class", "cclass", "c230", "c240", "c250", "c280", "c300", "c320", "c350",
            "c63",
        ],
    ),
    (
        "S CLASS",
        &[
            "s class", "s-class", "sclass", "s430", "s500", "s550", "s600", "s63",
        ],
    ),
    ("F150", &["f150", "f-150", "f 150"]),
    ("F250", &["f250", "f-250", "f 250"]),
    ("F350", &["f350", "f-350", "f 350"]),
];

static YEAR_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{4})(?:\s*-\s*(\d{4}))?$").ok());

fn normalize_key(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

/// Canonical make for an input, or `None` if it is neither canonical nor an alias.
pub fn resolve_make(input: &str) -> Option<&'static str> {
    let key = normalize_key(input);
    if key.is_empty() {
        return None;
    }
    CANONICAL_MAKES
        .iter()
        .copied()
        .find(|make| *make == key)
        .or_else(|| {
            MAKE_ALIASES
                .iter()
                .find(|(_, aliases)| aliases.contains(&key.as_str()))
                .map(|(canonical, _)| *canonical)
        })
}

/// Error for input that matches no make; carries the canonical list.
pub fn unrecognized_make(input: &str) -> AppError {
    AppError::UnrecognizedMake {
        input: input.trim().to_string(),
        valid: CANONICAL_MAKES.iter().map(|m| m.to_string()).collect(),
    }
}

/// Substring patterns matching a canonical make under any of its spellings.
pub fn make_patterns(canonical: &str) -> Vec<LikePattern> {
    let mut spellings = vec![canonical];
    if let Some((_, aliases)) = MAKE_ALIASES.iter().find(|(c, _)| *c == canonical) {
        spellings.extend(aliases.iter().copied());
    }
    spellings.into_iter().map(LikePattern::from_fragment).collect()
}

/// Uppercase with spaces and hyphens removed, so `3-series` and `3 SERIES` compare equal.
fn compact_key(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

/// Substring patterns for a model.
///
/// Only a family name expands to all of its spellings. A sub-model code such
/// as `x5` or `c1500` stays a single pattern so siblings never match.
pub fn resolve_model(input: &str) -> Vec<LikePattern> {
    let key = compact_key(input);
    let family = MODEL_ALIASES
        .iter()
        .find(|(family, _)| !key.is_empty() && compact_key(family) == key);

    match family {
        Some((_, variants)) => variants
            .iter()
            .map(|v| LikePattern::from_fragment(v))
            .collect(),
        None => vec![LikePattern::from_fragment(input)],
    }
}

/// Parse `1999,2005-2008` style input. Malformed tokens are dropped.
pub fn resolve_year(input: &str) -> Vec<YearPredicate> {
    let Some(pattern) = YEAR_TOKEN.as_ref() else {
        return Vec::new();
    };

    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let predicate = pattern.captures(token).and_then(|caps| {
                let start: i32 = caps.get(1)?.as_str().parse().ok()?;
                match caps.get(2) {
                    None => Some(YearPredicate::Exact(start)),
                    Some(end) => {
                        let end: i32 = end.as_str().parse().ok()?;
                        Some(YearPredicate::Range(start.min(end), start.max(end)))
                    }
                }
            });
            if predicate.is_none() {
                log::debug!("Dropping malformed year token '{token}'");
            }
            predicate
        })
        .collect()
}

/// Known yards and named yard groups.
#[derive(Debug, Clone)]
pub struct LocationRegistry {
    by_name: HashMap<String, u32>,
    names: Vec<(u32, String)>,
    regions: HashMap<String, Vec<u32>>,
}

fn location_key(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

impl LocationRegistry {
    pub fn from_config(config: &Config) -> Self {
        Self {
            by_name: config
                .locations
                .iter()
                .map(|l| (location_key(&l.name), l.id))
                .collect(),
            names: config
                .locations
                .iter()
                .map(|l| (l.id, l.name.clone()))
                .collect(),
            regions: config
                .regions
                .iter()
                .map(|r| (location_key(&r.name), r.members.clone()))
                .collect(),
        }
    }

    /// Resolve a location filter. Unknown input widens to every location.
    pub fn resolve_location(&self, input: &str) -> LocationScope {
        let key = location_key(input);
        if key.is_empty() || key == "ALL" {
            return LocationScope::All;
        }
        if let Some(members) = self.regions.get(&key) {
            return LocationScope::Ids(members.clone());
        }
        if let Some(id) = self.by_name.get(&key) {
            return LocationScope::Ids(vec![*id]);
        }

        let ids: Option<Vec<u32>> = key.split(',').map(|part| part.parse().ok()).collect();
        if let Some(ids) = ids.filter(|ids| ids.iter().all(|id| self.name(*id).is_some())) {
            return LocationScope::Ids(ids);
        }

        log::warn!("Unrecognized location '{}', searching all locations", input.trim());
        LocationScope::All
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, name)| name.as_str())
    }

    /// Human-readable names for a scope.
    pub fn label(&self, scope: &LocationScope) -> String {
        match scope {
            LocationScope::All => "ALL".to_string(),
            LocationScope::Ids(ids) => ids
                .iter()
                .map(|id| self.name(*id).unwrap_or("Unknown Yard"))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Resolves [`SearchCriteria`] into a canonical query.
#[derive(Debug, Clone)]
pub struct QueryResolver {
    registry: LocationRegistry,
}

impl QueryResolver {
    pub fn new(registry: LocationRegistry) -> Self {
        Self { registry }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(LocationRegistry::from_config(config))
    }

    pub fn registry(&self) -> &LocationRegistry {
        &self.registry
    }

    /// Canonical make, or an [`AppError::UnrecognizedMake`] listing the valid ones.
    pub fn canonical_make(&self, input: Option<&str>) -> Result<Option<&'static str>> {
        constrained(input)
            .map(|make| resolve_make(make).ok_or_else(|| unrecognized_make(make)))
            .transpose()
    }

    /// Status filter; a missing value means ACTIVE, an unknown one is rejected.
    pub fn status(&self, input: Option<&str>) -> Result<StatusFilter> {
        constrained(input)
            .map(str::parse::<StatusFilter>)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn resolve(&self, criteria: &SearchCriteria) -> Result<InventoryQuery> {
        let make_patterns = self
            .canonical_make(criteria.make.as_deref())?
            .map(make_patterns)
            .unwrap_or_default();

        let model_patterns = constrained(criteria.model.as_deref())
            .map(resolve_model)
            .unwrap_or_default();

        let years = match constrained(criteria.year.as_deref()) {
            Some(raw) => {
                let years = resolve_year(raw);
                if years.is_empty() {
                    log::warn!("No usable year in '{raw}', ignoring the year filter");
                }
                years
            }
            None => Vec::new(),
        };

        Ok(InventoryQuery {
            locations: self.registry.resolve_location(&criteria.location),
            status: self.status(criteria.status.as_deref())?,
            make_patterns,
            model_patterns,
            years,
            first_seen_after: None,
        })
    }
}
