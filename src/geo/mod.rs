use serde::{Deserialize, Serialize};

/// Mean earth radius in feet, matching the radius baked into the tile
/// grids and the spherical geometry below.
pub const EARTH_RADIUS_FT: f64 = 20_902_230.97;

pub const FEET_PER_MILE: f64 = 5_280.0;
pub const METERS_PER_MILE: f64 = 1_609.344;
pub const METERS_PER_FOOT: f64 = 0.3048;
pub const FEET_PER_METER: f64 = 3.28084;
pub const KM_PER_MILE: f64 = 1.609344;

/// A transmitter or receiver location.
///
/// Longitudes are stored west-positive in [0, 360): 74.1 means 74.1°W.
/// `alt` is the antenna height above ground in feet; ground elevation
/// comes from the tile store at evaluation time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Site {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    #[serde(default)]
    pub name: String,
}

impl Site {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self {
            lat,
            lon: normalize_lon(lon),
            alt,
            name: String::new(),
        }
    }
}

/// Maps any longitude onto the internal west-positive [0, 360) range.
pub fn normalize_lon(lon: f64) -> f64 {
    let mut lon = lon % 360.0;
    if lon < 0.0 {
        lon += 360.0;
    }
    lon
}

/// Shortest signed difference `lon1 - lon2` in (-180, 180] degrees,
/// positive when `lon1` is west of `lon2`.
pub fn lon_diff(lon1: f64, lon2: f64) -> f64 {
    let mut diff = lon1 - lon2;
    if diff <= -180.0 {
        diff += 360.0;
    }
    if diff > 180.0 {
        diff -= 360.0;
    }
    diff
}

/// Great-circle distance between two sites in statute miles, via the
/// spherical law of cosines.
pub fn distance(a: &Site, b: &Site) -> f64 {
    // The cosine product rounds to just under 1.0 at zero separation,
    // and acos turns that into a spurious fraction of a mile.
    if a.lat == b.lat && a.lon == b.lon {
        return 0.0;
    }

    let lat1 = a.lat.to_radians();
    let lon1 = a.lon.to_radians();
    let lat2 = b.lat.to_radians();
    let lon2 = b.lon.to_radians();

    let arc = (lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lon1 - lon2).cos())
        .clamp(-1.0, 1.0)
        .acos();
    (EARTH_RADIUS_FT / FEET_PER_MILE) * arc
}

/// Bearing from `source` to `destination` in degrees, 0-360 referenced
/// to true north.
pub fn azimuth(source: &Site, destination: &Site) -> f64 {
    let src_lat = source.lat.to_radians();
    let src_lon = source.lon.to_radians();
    let dest_lat = destination.lat.to_radians();
    let dest_lon = destination.lon.to_radians();

    let beta = (src_lat.sin() * dest_lat.sin()
        + src_lat.cos() * dest_lat.cos() * (src_lon - dest_lon).cos())
    .clamp(-1.0, 1.0)
    .acos();

    let num = dest_lat.sin() - src_lat.sin() * beta.cos();
    let den = src_lat.cos() * beta.sin();

    let mut azimuth = if den == 0.0 {
        0.0
    } else {
        (num / den).clamp(-1.0, 1.0).acos()
    };

    // Longitudes are west-positive, so a positive wrapped difference
    // means the destination lies east of the source; mirror the angle.
    let mut diff = dest_lon - src_lon;
    if diff <= -std::f64::consts::PI {
        diff += 2.0 * std::f64::consts::PI;
    }
    if diff >= std::f64::consts::PI {
        diff -= 2.0 * std::f64::consts::PI;
    }
    if diff > 0.0 {
        azimuth = 2.0 * std::f64::consts::PI - azimuth;
    }

    azimuth.to_degrees()
}

/// Angle of elevation in degrees from a transmitter at `tx_asl_ft` above
/// sea level to a receiver at `rx_asl_ft`, `distance_mi` miles away along
/// the surface. The law-of-cosines triangle over the earth chord folds
/// the curvature correction in.
pub fn elevation_angle_from(tx_asl_ft: f64, rx_asl_ft: f64, distance_mi: f64) -> f64 {
    let a = EARTH_RADIUS_FT + rx_asl_ft;
    let b = EARTH_RADIUS_FT + tx_asl_ft;
    let dx = FEET_PER_MILE * distance_mi;
    if dx == 0.0 {
        return 0.0;
    }

    let cos = ((b * b + dx * dx - a * a) / (2.0 * b * dx)).clamp(-1.0, 1.0);
    cos.acos().to_degrees() - 90.0
}

/// Quadrant-aware arc cosine of x/y, used by the path sampler's
/// longitude solve.
pub(crate) fn arccos(x: f64, y: f64) -> f64 {
    if y > 0.0 {
        (x / y).clamp(-1.0, 1.0).acos()
    } else if y < 0.0 {
        std::f64::consts::PI + (x / y).clamp(-1.0, 1.0).acos()
    } else {
        0.0
    }
}
