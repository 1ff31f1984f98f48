use serde::Deserialize;

/// Mean earth radius used for great-circle distances, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Haversine distance to `other` in kilometres.
    pub fn distance_km(&self, other: &GeoLocation) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

/// Body of the backend `geo-lookup` API answer, tunnelled through the daemon.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeoLookup {
    pub ip_address: String,
    pub isp: String,
    pub organization: String,
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "isIvpnServer")]
    pub is_vpn_server: bool,
}

impl GeoLookup {
    /// The lookup's coordinates, if the backend supplied any.
    pub fn location(&self) -> Option<GeoLocation> {
        if self.latitude == 0.0 || self.longitude == 0.0 {
            return None;
        }
        Some(GeoLocation::new(self.latitude, self.longitude))
    }
}
