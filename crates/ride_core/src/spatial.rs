//! Distance approximations: great-circle distance between coordinates and the
//! duration/progress figures derived from it.

use serde::Serialize;

use crate::ecs::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average city speed used for duration and ETA estimates.
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 30.0;

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Sum of the legs along `waypoints`, in meters.
pub fn path_length_m(waypoints: &[GeoPoint]) -> f64 {
    waypoints
        .windows(2)
        .map(|pair| haversine_km(pair[0], pair[1]) * 1000.0)
        .sum()
}

/// Travel time in seconds at `speed_kmh`.
pub fn travel_secs(distance_km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh <= 0.0 {
        return 0.0;
    }
    distance_km / speed_kmh * 3600.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedDuration {
    pub minutes: u64,
    pub formatted: String,
    /// Kilometres, rounded to one decimal.
    pub distance: f64,
}

pub fn format_minutes(minutes: u64) -> String {
    format!("{}h {}m", minutes / 60, minutes % 60)
}

pub fn estimate_duration(pickup: GeoPoint, destination: GeoPoint, speed_kmh: f64) -> EstimatedDuration {
    let distance_km = haversine_km(pickup, destination);
    let minutes = (travel_secs(distance_km, speed_kmh) / 60.0).round() as u64;
    EstimatedDuration {
        minutes,
        formatted: format_minutes(minutes),
        distance: (distance_km * 10.0).round() / 10.0,
    }
}

/// Share of the pickup-to-destination distance already covered, 0-100.
pub fn progress_percent(pickup: GeoPoint, destination: GeoPoint, current: GeoPoint) -> u8 {
    let total = haversine_km(pickup, destination);
    if total <= f64::EPSILON {
        return 100;
    }
    let remaining = haversine_km(current, destination);
    let covered = ((total - remaining) / total * 100.0).round();
    covered.clamp(0.0, 100.0) as u8
}

/// Minutes to `destination` from `current` at `speed_kmh`, rounded up.
pub fn eta_minutes(current: GeoPoint, destination: GeoPoint, speed_kmh: f64) -> u64 {
    (travel_secs(haversine_km(current, destination), speed_kmh) / 60.0).ceil() as u64
}
