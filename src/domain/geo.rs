//! Great-circle distance and bounding-box helpers.

use super::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlng = (dlng * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Axis-aligned lat/lng box, used for coarse store queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Box enclosing a circle of `radius_km` around `center` (1° lat ≈ 111 km).
    ///
    /// A box that would cross the antimeridian or reach a pole spans every
    /// longitude instead of wrapping, so it may be wider than the circle.
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let lat_delta = radius_km / 111.0;
        let cos_lat = center.lat.to_radians().cos().abs().max(1e-6);
        let lng_delta = radius_km / (111.0 * cos_lat);
        let min_lat = (center.lat - lat_delta).max(-90.0);
        let max_lat = (center.lat + lat_delta).min(90.0);
        let (mut min_lng, mut max_lng) = (center.lng - lng_delta, center.lng + lng_delta);
        if min_lng < -180.0 || max_lng > 180.0 || min_lat <= -90.0 || max_lat >= 90.0 {
            min_lng = -180.0;
            max_lng = 180.0;
        }
        BoundingBox {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}
