//! Domain types, validation gate, and the closed error taxonomy shared by the
//! store and service crates.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};

/// Closed failure taxonomy for every ledger operation.
///
/// The service boundary matches this exhaustively when assigning HTTP status
/// codes: `NotFound` -> 404, `Conflict` and `InvalidAmount` -> 400,
/// `Internal` -> 500. `Internal` keeps the underlying store diagnostic for
/// in-process inspection; callers must never render it verbatim to clients.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("Not found: {identifier}")]
    NotFound { identifier: String },
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("internal store failure: {0}")]
    Internal(String),
}

impl LedgerError {
    #[must_use]
    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound { identifier: identifier.into() }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Company {
    pub code: String,
    pub name: String,
    pub description: String,
}

/// Listing shape for `GET /companies`: code and name only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanySummary {
    pub code: String,
    pub name: String,
}

/// Full invoice row as returned by invoice create/update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: i64,
    pub comp_code: String,
    pub amt: f64,
    pub paid: bool,
    pub add_date: String,
    pub paid_date: Option<String>,
}

/// Listing shape for `GET /invoices`: id and owning company code only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceSummary {
    pub id: i64,
    pub comp_code: String,
}

/// Composite read: a company together with the ids of its invoices.
/// Assembled from two statements with no joint atomicity; a momentarily
/// stale id list is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyDetail {
    #[serde(flatten)]
    pub company: Company,
    pub invoices: Vec<i64>,
}

/// Composite read: an invoice joined with its owning company. The foreign-key
/// constraint guarantees the company exists, so `comp_code` is dropped in
/// favor of the embedded company object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceDetail {
    pub id: i64,
    pub amt: f64,
    pub paid: bool,
    pub add_date: String,
    pub paid_date: Option<String>,
    pub company: Company,
}

/// Validates a monetary field taken verbatim from a request body.
///
/// Accepts a JSON number or a numeric string; the parsed value must be finite
/// and strictly positive. Everything else (zero, negatives, non-numeric text,
/// booleans, nulls, structured values) is rejected.
///
/// # Errors
/// Returns [`LedgerError::InvalidAmount`] carrying the raw input rendered for
/// the client-facing message.
pub fn validate_amount(raw: &Value) -> Result<f64, LedgerError> {
    let parsed = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(amount) if amount.is_finite() && amount > 0.0 => Ok(amount),
        _ => Err(LedgerError::InvalidAmount(render_amount(raw))),
    }
}

fn render_amount(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Converts an absent row into the canonical `Not found: <identifier>`
/// failure. Applied to reads-by-identifier and to zero-row update/delete
/// outcomes.
///
/// # Errors
/// Returns [`LedgerError::NotFound`] when `found` is `None`.
pub fn require_found<T>(found: Option<T>, identifier: &str) -> Result<T, LedgerError> {
    found.ok_or_else(|| LedgerError::not_found(identifier))
}

/// # Errors
/// Returns [`LedgerError::Internal`] when the timestamp cannot be rendered.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, LedgerError> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| LedgerError::internal(format!("failed to format timestamp: {err}")))
}

/// # Errors
/// Returns [`LedgerError::Internal`] when the value is not RFC 3339.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, LedgerError> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map(|parsed| parsed.to_offset(UtcOffset::UTC))
        .map_err(|err| LedgerError::internal(format!("invalid RFC 3339 timestamp {value}: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}
