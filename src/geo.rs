//! GeoJSON points and radius-search parameters.

use serde::{Deserialize, Serialize};

use crate::validation::Issues;

pub const DEFAULT_RADIUS_KM: f64 = 10.0;
pub const MAX_RADIUS_KM: f64 = 50.0;

/// GeoJSON point as stored under a 2dsphere index: `[lng, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: PointKind,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointKind {
    Point,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            kind: PointKind::Point,
            coordinates: [lng, lat],
        }
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn lng(&self) -> f64 {
        self.coordinates[0]
    }
}

pub fn valid_lat(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn valid_lng(lng: f64) -> bool {
    lng.is_finite() && (-180.0..=180.0).contains(&lng)
}

/// Builds a point from optional coordinates; both or neither must be given.
pub fn point_from_parts(lat: Option<f64>, lng: Option<f64>, issues: &mut Issues) -> Option<GeoPoint> {
    match (lat, lng) {
        (None, None) => None,
        (Some(lat), Some(lng)) => {
            issues.check(valid_lat(lat), "lat", "must be between -90 and 90");
            issues.check(valid_lng(lng), "lng", "must be between -180 and 180");
            Some(GeoPoint::new(lat, lng))
        }
        (Some(_), None) => {
            issues.push("lng", "is required when lat is given");
            None
        }
        (None, Some(_)) => {
            issues.push("lat", "is required when lng is given");
            None
        }
    }
}

/// Radius in meters for `$geoNear`, capped at [`MAX_RADIUS_KM`].
pub fn radius_meters(radius_km: Option<f64>, issues: &mut Issues) -> f64 {
    let km = radius_km.unwrap_or(DEFAULT_RADIUS_KM);
    if !km.is_finite() || km < 0.0 {
        issues.push("radiusKm", "must be a non-negative number");
        return 0.0;
    }
    km.min(MAX_RADIUS_KM) * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_stores_lng_first() {
        let point = GeoPoint::new(52.5, 13.4);
        assert_eq!(point.coordinates, [13.4, 52.5]);
        assert_eq!(point.lat(), 52.5);
        assert_eq!(point.lng(), 13.4);
    }

    #[test]
    fn point_serializes_as_geojson() {
        let json = serde_json::to_value(GeoPoint::new(1.0, 2.0)).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"][0], 2.0);
    }

    #[test]
    fn half_a_coordinate_pair_is_rejected() {
        let mut issues = Issues::new();
        assert!(point_from_parts(Some(10.0), None, &mut issues).is_none());
        assert!(!issues.is_empty());
    }

    #[test]
    fn out_of_range_coordinates_are_reported() {
        let mut issues = Issues::new();
        point_from_parts(Some(91.0), Some(181.0), &mut issues);
        assert!(issues.finish().is_err());
    }

    #[test]
    fn radius_defaults_caps_and_allows_zero() {
        let mut issues = Issues::new();
        assert_eq!(radius_meters(None, &mut issues), DEFAULT_RADIUS_KM * 1000.0);
        assert_eq!(radius_meters(Some(500.0), &mut issues), MAX_RADIUS_KM * 1000.0);
        assert_eq!(radius_meters(Some(0.0), &mut issues), 0.0);
        assert!(issues.is_empty());

        radius_meters(Some(-1.0), &mut issues);
        assert!(!issues.is_empty());
    }
}
