use serde::{Deserialize, Serialize};

/// 地球の平均半径 (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// 緯度経度 (度)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Haversine 公式による大円距離 (km)
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // 丸め誤差で 1 をわずかに超えることがある
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// 開始可能判定。位置が取れていない (None) 場合は常に false。
pub fn within_radius(current_distance_km: Option<f64>, unlock_radius_km: f64) -> bool {
    match current_distance_km {
        Some(d) => d <= unlock_radius_km,
        None => false,
    }
}
