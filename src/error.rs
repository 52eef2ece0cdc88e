// src/error.rs

//! Unified error handling for the inventory tracker.

use std::fmt;

use thiserror::Error;

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed (navigation timeout, connection refused, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// SQLite statement failed
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Store-level failure that is not a plain SQL error
    #[error("Storage error: {0}")]
    Storage(String),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Make input matched neither a canonical make nor an alias
    #[error("Unrecognized make '{input}'. Valid makes: {}", valid.join(", "))]
    UnrecognizedMake { input: String, valid: Vec<String> },

    /// A form control was not present on the current page
    #[error("Form control '{control}' not found")]
    ElementMissing { control: String },

    /// The results table did not render for one combination
    #[error("Results table unavailable for {context}")]
    ResultsUnavailable { context: String },

    /// Browsing session could not be created or died mid-walk
    #[error("Session error: {0}")]
    Session(String),

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },

    /// Notification channel rejected a delivery
    #[error("Delivery to {target} failed: {message}")]
    Delivery { target: String, message: String },

    /// An identical subscription is already saved
    #[error("Subscription already exists")]
    AlreadyExists,

    /// Subscription id does not exist
    #[error("Subscription {id} not found")]
    NotFound { id: i64 },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a session (resource) error.
    pub fn session(message: impl fmt::Display) -> Self {
        Self::Session(message.to_string())
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a delivery error for a notification target.
    pub fn delivery(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Delivery {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error only affects a single combination of the walk.
    ///
    /// Recoverable errors are logged and skipped by the crawl driver;
    /// everything else aborts the walk and goes to the retry wrapper.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ElementMissing { .. } | Self::ResultsUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(
            AppError::ResultsUnavailable {
                context: "1020/FORD".into()
            }
            .is_recoverable()
        );
        assert!(
            AppError::ElementMissing {
                control: "#car-make".into()
            }
            .is_recoverable()
        );
        assert!(!AppError::session("driver crashed").is_recoverable());
        assert!(!AppError::crawl("site", "boom").is_recoverable());
    }

    #[test]
    fn test_unrecognized_make_lists_canon() {
        let err = AppError::UnrecognizedMake {
            input: "FOORD".into(),
            valid: vec!["FORD".into(), "HONDA".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unrecognized make 'FOORD'. Valid makes: FORD, HONDA"
        );
    }
}
