//! Raw records as they arrive from the feed.
//!
//! Writers publish the accident location as `{lat, long, timestamp}` with the
//! coordinates encoded as numeric strings. Nothing about that shape is
//! enforced by the feed, so a [`RawRecord`] is kept as untyped JSON until it
//! is validated into a [`Location`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::location::Location;

/// Field holding the latitude.
pub const LAT_FIELD: &str = "lat";

/// Field holding the longitude.
pub const LONG_FIELD: &str = "long";

/// Field holding the observation time in epoch milliseconds.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Why a raw record was not accepted as a location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The record is not a JSON object.
    #[error("record is not an object")]
    NotAnObject,

    /// A required field is missing or null.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A coordinate does not parse as a number.
    #[error("field '{field}' is not numeric: {value}")]
    NotNumeric {
        /// Name of the offending field.
        field: &'static str,
        /// The value as received.
        value: String,
    },

    /// A coordinate parsed to NaN or an infinity.
    #[error("field '{0}' is not a finite number")]
    NotFinite(&'static str),

    /// The timestamp is not an integer.
    #[error("timestamp is not an integer: {0}")]
    TimestampNotInteger(String),

    /// The timestamp is before the epoch.
    #[error("timestamp is negative: {0}")]
    NegativeTimestamp(i64),
}

/// An untrusted record snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Value);

impl RawRecord {
    /// Wrap an arbitrary JSON value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Build a record the way location writers publish it, with the
    /// coordinates as strings.
    #[must_use]
    pub fn from_parts(lat: &str, long: &str, timestamp: i64) -> Self {
        Self(json!({
            LAT_FIELD: lat,
            LONG_FIELD: long,
            TIMESTAMP_FIELD: timestamp,
        }))
    }

    /// Parse stored JSON text.
    ///
    /// Text that is not JSON is kept as a string value so that it surfaces as
    /// a malformed record instead of a backend failure.
    #[must_use]
    pub fn parse_lenient(text: &str) -> Self {
        Self(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned())))
    }

    /// Serialize to compact JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    /// Borrow the underlying JSON value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Validate and coerce the record into a [`Location`].
    ///
    /// `lat` and `long` must parse as finite numbers (numeric strings or JSON
    /// numbers) and `timestamp` must be a non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns the first [`Rejection`] found.
    pub fn validate(&self) -> Result<Location, Rejection> {
        let Value::Object(fields) = &self.0 else {
            return Err(Rejection::NotAnObject);
        };

        let latitude = coordinate(fields, LAT_FIELD)?;
        let longitude = coordinate(fields, LONG_FIELD)?;
        let observed_at = timestamp(fields)?;

        Location::new(latitude, longitude, observed_at)
    }
}

impl From<Location> for RawRecord {
    fn from(location: Location) -> Self {
        Self::from_parts(
            &location.latitude().to_string(),
            &location.longitude().to_string(),
            location.observed_at(),
        )
    }
}

fn field<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, Rejection> {
    fields
        .get(name)
        .filter(|value| !value.is_null())
        .ok_or(Rejection::MissingField(name))
}

fn coordinate(fields: &Map<String, Value>, name: &'static str) -> Result<f64, Rejection> {
    let parsed = match field(fields, name)? {
        Value::String(text) => text.trim().parse::<f64>().map_err(|_| Rejection::NotNumeric {
            field: name,
            value: text.clone(),
        })?,
        Value::Number(number) => number.as_f64().ok_or_else(|| Rejection::NotNumeric {
            field: name,
            value: number.to_string(),
        })?,
        other => {
            return Err(Rejection::NotNumeric {
                field: name,
                value: other.to_string(),
            })
        }
    };

    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(Rejection::NotFinite(name))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn timestamp(fields: &Map<String, Value>) -> Result<i64, Rejection> {
    let value = field(fields, TIMESTAMP_FIELD)?;
    let Value::Number(number) = value else {
        return Err(Rejection::TimestampNotInteger(value.to_string()));
    };

    if let Some(millis) = number.as_i64() {
        return Ok(millis);
    }

    // Whole floats such as `1000.0` still count as integers.
    match number.as_f64() {
        Some(millis)
            if millis.fract() == 0.0 && millis >= i64::MIN as f64 && millis < i64::MAX as f64 =>
        {
            Ok(millis as i64)
        }
        _ => Err(Rejection::TimestampNotInteger(number.to_string())),
    }
}
