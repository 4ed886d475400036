//! Radial coverage sweeps.
//!
//! A pass walks four rectangular edge sectors around the scan box
//! (north edge east-west, east edge north-south, south edge east-west,
//! west edge north-south). Every grid point on an edge becomes the far
//! end of a great-circle path from the transmitter, and the evaluator
//! walks that path marking visibility or accumulating model loss into
//! the coverage buffers. Sector workers write to private buffer shards
//! that are merged after the pass, so no horizon or dedup state is ever
//! shared mid-sweep.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::geo::{self, EARTH_RADIUS_FT, FEET_PER_MILE, METERS_PER_FOOT, METERS_PER_MILE, Site};
use crate::io::{LinkParams, SignalMode};
use crate::models::{
    self, ElevationProfile, Environment, ModelCode, ModelError, PointToPointModel,
    PointToPointParams,
};
use crate::output::{CoverageMap, MaskMerge};
use crate::path::read_path;
use crate::terrain::TileStore;

/// Visibility ceiling for the line-of-sight early-exit test: 10,000 m
/// in feet. Terrain above this cannot exist, so once even a peak that
/// tall could not clear the horizon the scan stops.
const ALTITUDE_CEILING_FT: f64 = 32_808.0;

const FOUR_THIRDS: f64 = 4.0 / 3.0;

/// Geographic box a sweep covers, west-positive longitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepBounds {
    pub min_north: f64,
    pub max_north: f64,
    pub min_west: f64,
    pub max_west: f64,
}

impl SweepBounds {
    /// Box reaching `max_range_mi` out from the source in every
    /// direction. Longitude span widens with latitude; near the poles
    /// it saturates to the full circle.
    pub fn around(source: &Site, max_range_mi: f64) -> Self {
        let miles_per_degree = EARTH_RADIUS_FT * std::f64::consts::TAU / 360.0 / FEET_PER_MILE;
        let dlat = max_range_mi / miles_per_degree;
        let cos_lat = source.lat.to_radians().cos().abs();
        let dlon = if cos_lat > 1e-6 {
            (dlat / cos_lat).min(180.0)
        } else {
            180.0
        };

        Self {
            min_north: source.lat - dlat,
            max_north: source.lat + dlat,
            min_west: geo::normalize_lon(source.lon - dlon),
            max_west: geo::normalize_lon(source.lon + dlon),
        }
    }
}

/// Restricts a propagation pass to two of the four sectors, for
/// split/batched processing. `First` keeps the north and east edge
/// sweeps, `Second` the south and west.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HalfPlane {
    #[default]
    Both,
    First,
    Second,
}

/// Model selection for a propagation pass.
pub struct PropagationOptions<'a> {
    pub model: ModelCode,
    pub environment: Environment,
    pub knife_edge: bool,
    /// Profile-based model implementation; required for ITM/ITWOM codes
    /// (and the dispatch fallback).
    pub point_to_point: Option<&'a dyn PointToPointModel>,
}

#[derive(Clone, Copy)]
struct Sector {
    min_west: f64,
    max_west: f64,
    min_north: f64,
    max_north: f64,
    eastwest: bool,
}

fn sectors(b: &SweepBounds) -> [Sector; 4] {
    // North edge east-west, east edge north-south, south edge
    // east-west, west edge north-south.
    let min_west = [b.min_west, b.min_west, b.min_west, b.max_west];
    let min_north = [b.max_north, b.min_north, b.min_north, b.min_north];
    let max_west = [b.max_west, b.min_west, b.max_west, b.max_west];
    let max_north = [b.max_north, b.max_north, b.min_north, b.max_north];

    std::array::from_fn(|i| Sector {
        min_west: min_west[i],
        max_west: max_west[i],
        min_north: min_north[i],
        max_north: max_north[i],
        eastwest: min_west[i] != max_west[i],
    })
}

enum SectorJob<'a> {
    Los,
    Propagation(&'a PropagationOptions<'a>),
}

/// Drives coverage passes for one or more transmitters over a shared
/// tile store and scan box. The pass marker rotates 1, 8, 16, 32
/// (capped) so up to four transmitters can be told apart in one mask.
pub struct CoverageSweep<'a> {
    store: &'a TileStore,
    bounds: SweepBounds,
    params: &'a LinkParams,
    marker: u8,
}

impl<'a> CoverageSweep<'a> {
    pub fn new(store: &'a TileStore, bounds: SweepBounds, params: &'a LinkParams) -> Self {
        Self {
            store,
            bounds,
            params,
            marker: 1,
        }
    }

    /// The mask bit the next pass will mark with.
    pub fn marker(&self) -> u8 {
        self.marker
    }

    fn rotate_marker(&mut self) {
        self.marker = match self.marker {
            1 => 8,
            8 => 16,
            _ => 32,
        };
    }

    /// 360° line-of-sight pass: marks every cell with an unobstructed
    /// ray from the source (receiver at `altitude_ft` AGL) into the map
    /// under the current pass marker.
    pub fn plot_los(
        &mut self,
        source: &Site,
        altitude_ft: f64,
        parallel: bool,
        map: &mut CoverageMap,
    ) {
        debug!(source = %source.name, marker = self.marker, "line-of-sight pass");
        self.run_sectors(
            source,
            altitude_ft,
            &SectorJob::Los,
            HalfPlane::Both,
            parallel,
            map,
        );
        self.rotate_marker();
    }

    /// 360° path-loss pass with the configured model. Fails fast when a
    /// profile-based model code has no implementation plugged in;
    /// per-point model diagnostics are logged and never abort the pass.
    pub fn plot_propagation(
        &mut self,
        source: &Site,
        altitude_ft: f64,
        options: &PropagationOptions<'_>,
        half: HalfPlane,
        parallel: bool,
        map: &mut CoverageMap,
    ) -> Result<(), ModelError> {
        if needs_point_to_point(options.model) && options.point_to_point.is_none() {
            return Err(ModelError::MissingPointToPoint(options.model));
        }

        debug!(
            source = %source.name,
            model = options.model.code(),
            marker = self.marker,
            "propagation pass"
        );
        self.run_sectors(
            source,
            altitude_ft,
            &SectorJob::Propagation(options),
            half,
            parallel,
            map,
        );
        self.rotate_marker();
        Ok(())
    }

    fn run_sectors(
        &self,
        source: &Site,
        altitude_ft: f64,
        job: &SectorJob<'_>,
        half: HalfPlane,
        parallel: bool,
        map: &mut CoverageMap,
    ) {
        let all = sectors(&self.bounds);
        let kept: Vec<Sector> = all
            .iter()
            .enumerate()
            .filter(|(i, _)| match half {
                HalfPlane::Both => true,
                HalfPlane::First => *i < 2,
                HalfPlane::Second => *i >= 2,
            })
            .map(|(_, s)| *s)
            .collect();

        let shards: Vec<CoverageMap> = if parallel {
            kept.par_iter()
                .map(|sector| {
                    let mut shard = CoverageMap::new(self.store);
                    self.run_sector(sector, source, altitude_ft, job, &mut shard);
                    shard
                })
                .collect()
        } else {
            kept.iter()
                .map(|sector| {
                    let mut shard = CoverageMap::new(self.store);
                    self.run_sector(sector, source, altitude_ft, job, &mut shard);
                    shard
                })
                .collect()
        };

        let mode = self.params.signal_mode();
        let masks = match job {
            SectorJob::Los => MaskMerge::Union,
            SectorJob::Propagation(_) => MaskMerge::ReplaceMarkers,
        };
        for shard in &shards {
            map.merge(shard, mode, masks);
        }
    }

    /// Walks one edge sector at the grid step, evaluating the path to
    /// every edge point. The east-west sectors start one step past the
    /// western bound and run until the edge point passes the eastern
    /// bound, wrapping through 360°.
    fn run_sector(
        &self,
        sector: &Sector,
        source: &Site,
        altitude_ft: f64,
        job: &SectorJob<'_>,
        shard: &mut CoverageMap,
    ) {
        let dpp = 1.0 / self.store.resolution() as f64;
        let minwest = dpp + sector.min_west;
        let mut lon = if sector.eastwest {
            minwest
        } else {
            sector.min_west
        };
        let mut lat = sector.min_north;
        let mut step = 0u64;

        loop {
            if lon >= 360.0 {
                lon -= 360.0;
            }

            let edge = Site {
                lat,
                lon,
                alt: altitude_ft,
                name: String::new(),
            };
            match job {
                SectorJob::Los => self.plot_los_path(source, &edge, shard),
                SectorJob::Propagation(options) => {
                    self.plot_prop_path(source, &edge, options, shard)
                }
            }

            step += 1;
            if sector.eastwest {
                lon = minwest + dpp * step as f64;
            } else {
                lat = sector.min_north + dpp * step as f64;
            }

            let more = if sector.eastwest {
                geo::lon_diff(lon, sector.max_west) <= 0.0
            } else {
                lat < sector.max_north
            };
            if !more {
                break;
            }
        }
    }

    /// Marks the line-of-sight visible points along one path.
    ///
    /// Tracks the cosine of the lowest horizon angle seen so far; a
    /// sample is visible while its angle cosine stays above it. Cosines
    /// invert the comparison sense relative to the angles themselves.
    fn plot_los_path(&self, source: &Site, destination: &Site, shard: &mut CoverageMap) {
        let lr = self.params;
        let path = read_path(self.store, source, destination);
        if path.is_empty() {
            return;
        }

        let limit_alt = EARTH_RADIUS_FT + ALTITUDE_CEILING_FT;
        let limit_alt2 = limit_alt * limit_alt;

        let tx_alt = EARTH_RADIUS_FT + source.alt + path.get(0).map(|s| s.elevation).unwrap_or(0.0);
        let tx_alt2 = tx_alt * tx_alt;

        let mut cos_horizon = 1.0f64;
        let mut counter = 0u32;
        let mut distance = 0.0;
        let mut distance2 = 0.0;

        for x in 0..path.len().saturating_sub(1) {
            let sample = *path.get(x).unwrap();
            if sample.distance > lr.max_range {
                break;
            }

            let (cos_angle, cos_test_angle) = if x > 0 {
                distance = FEET_PER_MILE * sample.distance;
                distance2 = distance * distance;

                let rx_alt = EARTH_RADIUS_FT + destination.alt + sample.elevation;
                let cos_angle = ((distance2 + tx_alt2 - rx_alt * rx_alt)
                    / (2.0 * distance * tx_alt))
                    .clamp(-1.0, 1.0);

                // Clutter sits on terrain, never on open water.
                let test_elevation = if sample.elevation == 0.0 {
                    sample.elevation
                } else {
                    sample.elevation + lr.clutter
                };
                let test_alt = EARTH_RADIUS_FT + test_elevation;
                let cos_test_angle =
                    (distance2 + tx_alt2 - test_alt * test_alt) / (2.0 * distance * tx_alt);

                (cos_angle, cos_test_angle)
            } else {
                (-1.0, 1.0)
            };

            if cos_horizon >= cos_angle && shard.mask_at(sample.lat, sample.lon) & self.marker == 0
            {
                shard.or_mask(sample.lat, sample.lon, self.marker);
            }

            if cos_test_angle < cos_horizon {
                cos_horizon = cos_test_angle;
            }

            // Once the horizon dips below the horizontal, periodically
            // test whether terrain at the altitude ceiling could still
            // clear it. If not, nothing further out can be visible.
            if x > 0 && cos_horizon < 0.0 {
                if counter > 10 {
                    let cos_limit = ((distance2 + tx_alt2 - limit_alt2)
                        / (2.0 * distance * tx_alt))
                        .clamp(-1.0, 1.0);
                    if cos_limit > cos_horizon {
                        break;
                    }
                    counter = 0;
                } else {
                    counter += 1;
                }
            }
        }
    }

    /// Evaluates model loss at every not-yet-evaluated point along one
    /// path and accumulates the encoded result.
    fn plot_prop_path(
        &self,
        source: &Site,
        destination: &Site,
        options: &PropagationOptions<'_>,
        shard: &mut CoverageMap,
    ) {
        let lr = self.params;
        let path = read_path(self.store, source, destination);
        let len = path.len();
        if len < 3 {
            return;
        }

        let mut elevations: Vec<f64> = path.samples().iter().map(|s| s.elevation).collect();

        // Profile array in the irregular-terrain layout: header in the
        // first two slots, heights in meters after, clutter on interior
        // terrain only and the endpoints bare.
        let mut elev = vec![0.0f64; len + 2];
        for x in 1..len - 1 {
            elev[x + 2] = if elevations[x] == 0.0 {
                0.0
            } else {
                (lr.clutter + elevations[x]) * METERS_PER_FOOT
            };
        }
        elev[2] = elevations[0] * METERS_PER_FOOT;
        elev[len + 1] = elevations[len - 1] * METERS_PER_FOOT;

        let four_thirds_earth = FOUR_THIRDS * EARTH_RADIUS_FT;
        let xmtr_alt = four_thirds_earth + source.alt + elevations[0];
        let xmtr_alt2 = xmtr_alt * xmtr_alt;

        let want_elevation_angle = lr
            .antenna_pattern
            .as_ref()
            .is_some_and(|p| p.has_elevation());
        let mode = lr.signal_mode();

        for y in 2..len - 1 {
            let point = *path.get(y).unwrap();
            if point.distance > lr.max_range {
                break;
            }
            if !shard.needs_evaluation(point.lat, point.lon, self.marker) {
                continue;
            }

            let distance = FEET_PER_MILE * point.distance;
            let dest_alt = four_thirds_earth + destination.alt + elevations[y];
            let cos_rcvr_angle = ((xmtr_alt2 + distance * distance - dest_alt * dest_alt)
                / (2.0 * xmtr_alt * distance))
                .clamp(-1.0, 1.0);

            // Elevation angle toward the receiver, or toward the first
            // obstruction if one blocks the direct ray; only needed to
            // index an elevation gain pattern.
            let mut elevation_deg = 0.0;
            if want_elevation_angle {
                let mut cos_blocked = None;
                for x in 2..y {
                    let obstacle = path.get(x).unwrap();
                    let obstacle_distance = FEET_PER_MILE * obstacle.distance;
                    let test_elevation = if elevations[x] == 0.0 {
                        elevations[x]
                    } else {
                        elevations[x] + lr.clutter
                    };
                    let test_alt = four_thirds_earth + test_elevation;
                    let cos_test_angle = ((xmtr_alt2 + obstacle_distance * obstacle_distance
                        - test_alt * test_alt)
                        / (2.0 * xmtr_alt * obstacle_distance))
                        .clamp(-1.0, 1.0);
                    if cos_rcvr_angle >= cos_test_angle {
                        cos_blocked = Some(cos_test_angle);
                        break;
                    }
                }
                let cos = cos_blocked.unwrap_or(cos_rcvr_angle);
                elevation_deg = cos.acos().to_degrees() - 90.0;
            }

            // Header for this point's profile: interval count and
            // sample spacing in meters.
            elev[0] = (y - 1) as f64;
            elev[1] = METERS_PER_MILE
                * (point.distance - path.get(y - 1).map(|s| s.distance).unwrap_or(0.0));

            // Terrain the model sees is never below 1 ft; a receiver in
            // a tidal flat still stands on ground.
            if elevations[y] < 1.0 {
                elevations[y] = 1.0;
            }

            let dkm = (elev[1] * elev[0]) / 1000.0;

            let loss = match models::empirical_loss(
                options.model,
                options.environment,
                lr.frq_mhz,
                source.alt * METERS_PER_FOOT,
                elevations[y] * METERS_PER_FOOT + destination.alt * METERS_PER_FOOT,
                dkm,
                lr.eps_dielect,
            ) {
                Some(loss) => loss,
                None => {
                    let Some(profile) = ElevationProfile::new(&elev[..y + 2]) else {
                        warn!(
                            lat = point.lat,
                            lon = point.lon,
                            "degenerate profile, skipping point"
                        );
                        shard.mark_evaluated(point.lat, point.lon, self.marker);
                        continue;
                    };
                    let params = PointToPointParams {
                        tx_height_m: source.alt * METERS_PER_FOOT,
                        rx_height_m: destination.alt * METERS_PER_FOOT,
                        eps_dielect: lr.eps_dielect,
                        sgm_conductivity: lr.sgm_conductivity,
                        eno_ns_surfref: lr.eno_ns_surfref,
                        frq_mhz: lr.frq_mhz,
                        climate: lr.climate,
                        polarization: lr.polarization,
                        conf: lr.conf,
                        rel: lr.rel,
                        profile,
                    };
                    // Checked for presence before the sweep started.
                    let model = options.point_to_point.unwrap();
                    match model.loss(&params) {
                        Ok(result) => {
                            if result.error_code != 0 {
                                warn!(
                                    lat = point.lat,
                                    lon = point.lon,
                                    code = result.error_code,
                                    mode = %result.mode,
                                    "model diagnostic"
                                );
                            }
                            result.loss_db
                        }
                        Err(e) => {
                            warn!(lat = point.lat, lon = point.lon, error = %e, "model failed");
                            shard.mark_evaluated(point.lat, point.lon, self.marker);
                            continue;
                        }
                    }
                }
            };

            let mut loss = loss;
            if options.knife_edge && options.model.code() > ModelCode::Itm.code() {
                loss += knife_edge_diffraction(
                    lr.frq_mhz,
                    destination.alt * METERS_PER_FOOT,
                    dkm,
                    &elev[..y + 2],
                );
            }

            if let Some(pattern) = &lr.antenna_pattern {
                let point_site = Site {
                    lat: point.lat,
                    lon: point.lon,
                    alt: 0.0,
                    name: String::new(),
                };
                let azimuth = geo::azimuth(source, &point_site);
                let gain = pattern.gain(azimuth, elevation_deg);
                if gain != 0.0 {
                    loss -= 20.0 * gain.log10();
                }
            }

            let encoded = encode_signal(loss, mode, lr);
            shard.hold_signal(point.lat, point.lon, encoded, mode);
            shard.mark_evaluated(point.lat, point.lon, self.marker);
        }
    }
}

fn needs_point_to_point(model: ModelCode) -> bool {
    // Anything without an empirical closed form dispatches to the
    // profile model, including the nominally LOS-only code.
    model.is_point_to_point() || model == ModelCode::LineOfSight
}

fn encode_signal(loss: f64, mode: SignalMode, lr: &LinkParams) -> u8 {
    match mode {
        SignalMode::PathLoss => {
            if loss > 255.0 {
                255
            } else {
                loss.round().clamp(0.0, 255.0) as u8
            }
        }
        SignalMode::ReceivedPower => {
            // dBm referenced to EIRP (ERP + 2.14 dB).
            let rxp = lr.erp / 10.0f64.powf((loss - 2.14) / 10.0);
            let dbm = 10.0 * (rxp * 1000.0).log10();
            (200 + dbm.round() as i64).clamp(0, 255) as u8
        }
        SignalMode::FieldStrength => {
            let field_strength =
                139.4 + 20.0 * lr.frq_mhz.log10() - loss + 10.0 * (lr.erp / 1000.0).log10();
            (100 + field_strength.round() as i64).clamp(0, 255) as u8
        }
    }
}

/// Fast knife-edge diffraction penalty: walks the profile for the
/// tallest obstruction, takes the incidence angle from the receiver to
/// it, and scales by wavelength. Floors at 3 dB when any obstruction
/// was seen at all.
fn knife_edge_diffraction(frq_mhz: f64, rx_height_m: f64, dkm: f64, elev: &[f64]) -> f64 {
    let d_total_m = dkm * 1000.0;
    let spacing = elev[1];
    if spacing <= 0.0 {
        return 1.0;
    }

    let mut obstacle_height = 0.0f64;
    let mut obstacle_distance = 0.0f64;
    let mut incidence = 0.0f64;

    let mut n = 2usize;
    while (n as f64) < d_total_m / spacing && n < elev.len() {
        let d = (n - 2) as f64 * spacing;
        if elev[n] < obstacle_height {
            incidence = (obstacle_height - (elev[n] + rx_height_m))
                .atan2(d - obstacle_distance)
                .to_degrees();
        } else {
            incidence = 0.0;
        }
        if elev[n] > obstacle_height {
            obstacle_height = elev[n];
            obstacle_distance = d;
        }
        n += 1;
    }

    if incidence >= 0.0 {
        incidence / (300.0 / frq_mhz) + 3.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_edge_sectors() {
        let bounds = SweepBounds {
            min_north: 40.0,
            max_north: 41.0,
            min_west: 74.0,
            max_west: 75.0,
        };
        let s = sectors(&bounds);

        // North and south edges sweep east-west at a fixed latitude.
        assert!(s[0].eastwest && s[0].min_north == 41.0 && s[0].max_north == 41.0);
        assert!(s[2].eastwest && s[2].min_north == 40.0 && s[2].max_north == 40.0);
        // East and west edges sweep north-south at a fixed longitude.
        assert!(!s[1].eastwest && s[1].min_west == 74.0 && s[1].max_west == 74.0);
        assert!(!s[3].eastwest && s[3].min_west == 75.0 && s[3].max_west == 75.0);
    }

    #[test]
    fn bounds_widen_with_latitude() {
        let equator = SweepBounds::around(&Site::new(0.0, 74.0, 0.0), 30.0);
        let north = SweepBounds::around(&Site::new(60.0, 74.0, 0.0), 30.0);

        let span = |b: &SweepBounds| geo::lon_diff(b.max_west, b.min_west).abs();
        assert!(span(&north) > span(&equator));
        assert!((equator.max_north - equator.min_north - 2.0 * 30.0 / 69.09).abs() < 0.01);
    }

    #[test]
    fn knife_edge_floor_and_growth() {
        // Flat profile: no dip after a peak, floor of 3 dB applies.
        let flat = [10.0, 90.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(knife_edge_diffraction(900.0, 2.0, 0.9, &flat), 3.0);

        // A tall obstacle followed by a dip produces a larger penalty.
        let ridge = [
            10.0, 90.0, 0.0, 0.0, 0.0, 200.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        assert!(knife_edge_diffraction(900.0, 2.0, 0.9, &ridge) > 3.0);
    }

    #[test]
    fn marker_rotation_caps_at_32() {
        let store = TileStore::with_resolution(None, 60);
        let params = LinkParams::default();
        let bounds = SweepBounds {
            min_north: 40.0,
            max_north: 40.1,
            min_west: 74.0,
            max_west: 74.1,
        };
        let mut sweep = CoverageSweep::new(&store, bounds, &params);
        assert_eq!(sweep.marker(), 1);
        for expected in [8, 16, 32, 32] {
            sweep.rotate_marker();
            assert_eq!(sweep.marker(), expected);
        }
    }

    #[test]
    fn missing_point_to_point_model_is_rejected() {
        let store = TileStore::with_resolution(None, 60);
        store.load_area(40, 40, 74, 74).unwrap();
        let params = LinkParams::default();
        let bounds = SweepBounds::around(&Site::new(40.5, 74.5, 50.0), 5.0);
        let mut sweep = CoverageSweep::new(&store, bounds, &params);
        let mut map = CoverageMap::new(&store);

        let options = PropagationOptions {
            model: ModelCode::Itm,
            environment: Environment::Urban,
            knife_edge: false,
            point_to_point: None,
        };
        let source = Site::new(40.5, 74.5, 50.0);
        let err = sweep
            .plot_propagation(&source, 30.0, &options, HalfPlane::Both, false, &mut map)
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingPointToPoint(_)));
        // A failed pass must not burn a marker.
        assert_eq!(sweep.marker(), 1);
    }
}
