use std::f64::consts::{FRAC_PI_2, PI, TAU};

use tracing::warn;

use crate::geo::{self, EARTH_RADIUS_FT, FEET_PER_MILE, Site};
use crate::terrain::TileStore;

/// Hard cap on samples per path. Long enough for a multi-degree scan at
/// 1200 points per degree; anything past it is dropped with a warning.
pub const MAX_PATH_SAMPLES: usize = 64_810;

/// One point along a great-circle path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSample {
    pub lat: f64,
    pub lon: f64,
    /// Ground elevation in feet.
    pub elevation: f64,
    /// Cumulative distance from the source in statute miles.
    pub distance: f64,
}

/// Fixed-step sample sequence between two sites.
#[derive(Debug, Clone, Default)]
pub struct PathProfile {
    samples: Vec<PathSample>,
    truncated: bool,
}

impl PathProfile {
    pub fn samples(&self) -> &[PathSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PathSample> {
        self.samples.get(index)
    }

    pub fn last(&self) -> Option<&PathSample> {
        self.samples.last()
    }

    /// True when the sample cap cut the walk short of the destination.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn push(&mut self, sample: PathSample) -> bool {
        if self.samples.len() >= MAX_PATH_SAMPLES {
            self.truncated = true;
            return false;
        }
        self.samples.push(sample);
        true
    }
}

/// Walks the great circle from `source` to `destination` in equal
/// angular increments sized to the store's grid resolution, sampling
/// ground elevation at each step.
///
/// Separations below ~30/ppd degrees collapse to a two-point path, since
/// the step solve degenerates there. The destination's exact coordinates
/// are always the final sample (unless the cap truncates the walk, which
/// is logged and not fatal). A zero elevation sample directly after a
/// sample above 10 ft is treated as a seam between adjacent tiles and
/// carried forward rather than taken at face value.
pub fn read_path(store: &TileStore, source: &Site, destination: &Site) -> PathProfile {
    let ppd = store.resolution() as f64;
    let samples_per_radian = ppd * 57.295833;

    let lat1 = source.lat.to_radians();
    let lon1 = source.lon.to_radians();
    let lat2 = destination.lat.to_radians();
    let lon2 = destination.lon.to_radians();

    let azimuth = geo::azimuth(source, destination).to_radians();
    let total_distance = geo::distance(source, destination);

    let mut path = PathProfile::default();

    if total_distance > 30.0 / ppd {
        let dx = samples_per_radian * (lon1 - lon2).cos().clamp(-1.0, 1.0).acos();
        let dy = samples_per_radian * (lat1 - lat2).cos().clamp(-1.0, 1.0).acos();
        let path_length = (dx * dx + dy * dy).sqrt();
        let miles_per_sample = total_distance / path_length;

        let mut distance = 0.0;
        while distance <= total_distance {
            let beta = distance / (EARTH_RADIUS_FT / FEET_PER_MILE);
            let step_lat =
                (lat1.sin() * beta.cos() + azimuth.cos() * beta.sin() * lat1.cos()).asin();
            let num = beta.cos() - lat1.sin() * step_lat.sin();
            let den = lat1.cos() * step_lat.cos();

            let mut step_lon = if azimuth == 0.0 && beta > FRAC_PI_2 - lat1 {
                lon1 + PI
            } else if azimuth == FRAC_PI_2 && beta > FRAC_PI_2 + lat1 {
                lon1 + PI
            } else if den != 0.0 && (num / den).abs() > 1.0 {
                lon1
            } else if (PI - azimuth) >= 0.0 {
                lon1 - geo::arccos(num, den)
            } else {
                lon1 + geo::arccos(num, den)
            };

            while step_lon < 0.0 {
                step_lon += TAU;
            }
            while step_lon > TAU {
                step_lon -= TAU;
            }

            let lat_deg = step_lat.to_degrees();
            let lon_deg = step_lon.to_degrees();
            let mut elevation = store.elevation_ft(lat_deg, lon_deg);

            // A zero reading right after real terrain is almost always a
            // tile seam, not the shoreline.
            if let Some(prev) = path.samples.last()
                && elevation == 0.0
                && prev.elevation > 10.0
            {
                elevation = prev.elevation;
            }

            if !path.push(PathSample {
                lat: lat_deg,
                lon: lon_deg,
                elevation,
                distance,
            }) {
                break;
            }
            distance += miles_per_sample;
        }
    } else {
        path.push(PathSample {
            lat: source.lat,
            lon: source.lon,
            elevation: store.elevation_ft(source.lat, source.lon),
            distance: 0.0,
        });
    }

    // The step walk rounds past the endpoint; pin the exact destination
    // as the last sample.
    if !path.push(PathSample {
        lat: destination.lat,
        lon: destination.lon,
        elevation: store.elevation_ft(destination.lat, destination.lon),
        distance: total_distance,
    }) {
        warn!(
            from = %source.name,
            to = %destination.name,
            cap = MAX_PATH_SAMPLES,
            "path sample cap reached, truncating"
        );
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::DEFAULT_IPPD;

    #[test]
    fn tiny_separation_collapses_to_two_points() {
        let store = TileStore::with_resolution(None, DEFAULT_IPPD);
        let a = Site::new(40.0, 74.0, 10.0);
        let b = Site::new(40.0, 74.0003, 10.0);

        let path = read_path(&store, &a, &b);
        assert_eq!(path.len(), 2);
        assert_eq!(path.get(0).unwrap().distance, 0.0);
        let last = path.last().unwrap();
        assert_eq!(last.lat, b.lat);
        assert_eq!(last.lon, b.lon);
        assert!(!path.truncated());
    }

    #[test]
    fn distances_increase_monotonically() {
        let store = TileStore::with_resolution(None, DEFAULT_IPPD);
        let a = Site::new(40.0, 74.0, 10.0);
        let b = Site::new(40.3, 74.4, 10.0);

        let path = read_path(&store, &a, &b);
        assert!(path.len() > 100);
        for pair in path.samples().windows(2) {
            assert!(pair[1].distance >= pair[0].distance);
        }
        let last = path.last().unwrap();
        assert_eq!(last.lat, b.lat);
        assert_eq!(last.lon, b.lon);
    }
}
