//! The validated accident location.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::record::{Rejection, LAT_FIELD, LONG_FIELD};

/// Base URL used to hand a location to an external maps application.
const MAPS_SEARCH_URL: &str = "https://www.google.com/maps/search/?api=1&query=";

/// A validated location observation.
///
/// Coordinates are always finite and `observed_at` is never negative. Values
/// are immutable; every update produces a new `Location`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    latitude: f64,
    longitude: f64,
    observed_at: i64,
}

impl Location {
    /// Placeholder coordinate written when the feed holds no usable record.
    pub const FALLBACK: Self = Self {
        latitude: 19.097_19,
        longitude: 72.882_58,
        observed_at: 0,
    };

    /// Create a location.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] if a coordinate is not finite or `observed_at`
    /// is negative.
    pub fn new(latitude: f64, longitude: f64, observed_at: i64) -> Result<Self, Rejection> {
        if !latitude.is_finite() {
            return Err(Rejection::NotFinite(LAT_FIELD));
        }
        if !longitude.is_finite() {
            return Err(Rejection::NotFinite(LONG_FIELD));
        }
        if observed_at < 0 {
            return Err(Rejection::NegativeTimestamp(observed_at));
        }
        Ok(Self {
            latitude,
            longitude,
            observed_at,
        })
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Observation time in milliseconds since the epoch.
    #[must_use]
    pub fn observed_at(&self) -> i64 {
        self.observed_at
    }

    /// Same coordinates, observed at a different time. Negative times clamp to
    /// the epoch.
    #[must_use]
    pub fn restamped(self, observed_at: i64) -> Self {
        Self {
            observed_at: observed_at.max(0),
            ..self
        }
    }

    /// Exact comparison of the parsed coordinates.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn same_coordinates(&self, other: &Self) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }

    /// Observation time as a UTC timestamp.
    #[must_use]
    pub fn observed_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.observed_at)
    }

    /// Observation time rendered in the local timezone.
    #[must_use]
    pub fn observed_at_local(&self) -> String {
        self.observed_at_utc().map_or_else(
            || "Unknown".to_string(),
            |at| {
                at.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            },
        )
    }

    /// URL that opens this location in an external maps application.
    #[must_use]
    pub fn maps_url(&self) -> String {
        format!("{MAPS_SEARCH_URL}{},{}", self.latitude, self.longitude)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_valid() {
        let location = Location::new(10.0, 20.0, 5000).unwrap();
        assert!((location.latitude() - 10.0).abs() < f64::EPSILON);
        assert!((location.longitude() - 20.0).abs() < f64::EPSILON);
        assert_eq!(location.observed_at(), 5000);
    }

    #[test]
    fn test_new_rejects_non_finite() {
        assert_eq!(
            Location::new(f64::NAN, 20.0, 0),
            Err(Rejection::NotFinite("lat"))
        );
        assert_eq!(
            Location::new(10.0, f64::NEG_INFINITY, 0),
            Err(Rejection::NotFinite("long"))
        );
    }

    #[test]
    fn test_new_rejects_negative_timestamp() {
        assert_eq!(
            Location::new(10.0, 20.0, -1),
            Err(Rejection::NegativeTimestamp(-1))
        );
    }

    #[test]
    fn test_same_coordinates_ignores_time() {
        let a = Location::new(10.0, 20.0, 5000).unwrap();
        let b = Location::new(10.0, 20.0, 6000).unwrap();
        let c = Location::new(10.0, 20.000_001, 5000).unwrap();

        assert!(a.same_coordinates(&b));
        assert!(!a.same_coordinates(&c));
    }

    #[test]
    fn test_restamped() {
        let placeholder = Location::FALLBACK.restamped(1_700_000_000_000);
        assert!(placeholder.same_coordinates(&Location::FALLBACK));
        assert_eq!(placeholder.observed_at(), 1_700_000_000_000);

        assert_eq!(Location::FALLBACK.restamped(-10).observed_at(), 0);
    }

    #[test]
    fn test_display_six_decimals() {
        let location = Location::new(19.09719, 72.88258, 0).unwrap();
        assert_eq!(location.to_string(), "19.097190, 72.882580");
    }

    #[test]
    fn test_maps_url() {
        let location = Location::new(19.09719, 72.88258, 0).unwrap();
        assert_eq!(
            location.maps_url(),
            "https://www.google.com/maps/search/?api=1&query=19.09719,72.88258"
        );
    }

    #[test]
    fn test_observed_at_utc() {
        let location = Location::new(0.0, 0.0, 1000).unwrap();
        let at = location.observed_at_utc().unwrap();
        assert_eq!(at.timestamp_millis(), 1000);
    }

    #[test]
    fn test_serialize() {
        let location = Location::new(1.5, 2.5, 3).unwrap();
        let json = serde_json::to_string(&location).unwrap();
        assert!(json.contains("\"latitude\":1.5"));
        assert!(json.contains("\"observed_at\":3"));
    }
}
