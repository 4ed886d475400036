use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::geo::Site;
use crate::models::{Climate, Environment, ModelCode, Polarization};

/// Azimuth rows in a gain table, one per degree plus the 360° wrap row.
pub const PATTERN_AZIMUTHS: usize = 361;
/// Tilt columns in a gain table, 0.1° steps over +10°..-90°.
pub const PATTERN_TILTS: usize = 1001;

/// How per-cell signal bytes are encoded, derived from the request's
/// power settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// No radiated power given: encode rounded path loss, lower wins.
    PathLoss,
    /// Field strength in dBµV/m referenced to the ERP, higher wins.
    FieldStrength,
    /// Received power in dBm referenced to the EIRP, higher wins.
    ReceivedPower,
}

/// Normalized antenna gain table, indexed by whole-degree azimuth and
/// 0.1° downtilt. Whether elevation data was actually supplied travels
/// with the table, since it changes how the evaluator derives the
/// lookup angle.
#[derive(Debug, Clone)]
pub struct AntennaPattern {
    gains: Vec<f32>,
    has_elevation: bool,
}

impl AntennaPattern {
    /// Wraps a full gain table. `None` unless exactly 361×1001 entries.
    pub fn new(gains: Vec<f32>, has_elevation: bool) -> Option<Self> {
        if gains.len() != PATTERN_AZIMUTHS * PATTERN_TILTS {
            return None;
        }
        Some(Self {
            gains,
            has_elevation,
        })
    }

    pub fn has_elevation(&self) -> bool {
        self.has_elevation
    }

    /// Normalized gain toward an azimuth and elevation angle (degrees,
    /// elevation positive above the horizontal). 0.0 when the elevation
    /// falls outside the +10°..-90° table window.
    pub fn gain(&self, azimuth_deg: f64, elevation_deg: f64) -> f64 {
        let tilt = (10.0 * (10.0 - elevation_deg)).round();
        if tilt < 0.0 || tilt > (PATTERN_TILTS - 1) as f64 {
            return 0.0;
        }
        let az = (azimuth_deg.round() as i64).rem_euclid(360) as usize;
        f64::from(self.gains[az * PATTERN_TILTS + tilt as usize])
    }
}

/// Link budget and ground constants for one coverage pass.
#[derive(Debug, Clone)]
pub struct LinkParams {
    pub eps_dielect: f64,
    pub sgm_conductivity: f64,
    pub eno_ns_surfref: f64,
    pub frq_mhz: f64,
    pub climate: Climate,
    pub polarization: Polarization,
    pub conf: f64,
    pub rel: f64,
    /// Effective radiated power in watts; 0 selects plain loss output.
    pub erp: f64,
    /// Encode received power instead of field strength when ERP is set.
    pub dbm: bool,
    /// Evaluation radius in statute miles.
    pub max_range: f64,
    /// Ground clutter height in feet, added to nonzero terrain samples.
    pub clutter: f64,
    pub antenna_pattern: Option<AntennaPattern>,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            eps_dielect: 15.0,
            sgm_conductivity: 0.005,
            eno_ns_surfref: 301.0,
            frq_mhz: 450.0,
            climate: Climate::default(),
            polarization: Polarization::default(),
            conf: 0.50,
            rel: 0.50,
            erp: 0.0,
            dbm: false,
            max_range: 50.0,
            clutter: 0.0,
            antenna_pattern: None,
        }
    }
}

impl LinkParams {
    pub fn signal_mode(&self) -> SignalMode {
        if self.erp == 0.0 {
            SignalMode::PathLoss
        } else if self.dbm {
            SignalMode::ReceivedPower
        } else {
            SignalMode::FieldStrength
        }
    }
}

fn default_model_code() -> u8 {
    ModelCode::Itm.code()
}

fn default_environment_code() -> u8 {
    1
}

fn default_climate_code() -> u8 {
    5
}

fn default_eps_dielect() -> f64 {
    15.0
}

fn default_sgm_conductivity() -> f64 {
    0.005
}

fn default_eno_ns_surfref() -> f64 {
    301.0
}

fn default_confidence() -> f64 {
    0.50
}

/// One coverage computation as requested over the wire or from a batch
/// file. Heights are feet above ground, range is statute miles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRequest {
    pub transmitter: Site,
    pub receiver_height: f64,
    pub max_range: f64,
    pub frequency_mhz: f64,
    #[serde(default)]
    pub erp: f64,
    #[serde(default)]
    pub dbm: bool,
    #[serde(default = "default_model_code")]
    pub model: u8,
    #[serde(default = "default_environment_code")]
    pub environment: u8,
    #[serde(default = "default_climate_code")]
    pub climate: u8,
    #[serde(default)]
    pub vertical_polarization: bool,
    #[serde(default)]
    pub knife_edge: bool,
    /// Ground clutter height in feet, added to nonzero terrain.
    #[serde(default)]
    pub clutter: f64,
    #[serde(default = "default_eps_dielect")]
    pub eps_dielect: f64,
    #[serde(default = "default_sgm_conductivity")]
    pub sgm_conductivity: f64,
    #[serde(default = "default_eno_ns_surfref")]
    pub eno_ns_surfref: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_confidence")]
    pub reliability: f64,
    /// Run the four sweep sectors on one thread instead of a pool.
    #[serde(default)]
    pub sequential: bool,
}

impl SweepRequest {
    pub fn model(&self) -> anyhow::Result<ModelCode> {
        ModelCode::from_code(self.model)
            .with_context(|| format!("unknown propagation model code {}", self.model))
    }

    pub fn environment(&self) -> anyhow::Result<Environment> {
        Environment::from_code(self.environment)
            .with_context(|| format!("unknown environment code {}", self.environment))
    }

    pub fn climate(&self) -> anyhow::Result<Climate> {
        Climate::from_code(self.climate)
            .with_context(|| format!("unknown radio climate code {}", self.climate))
    }

    pub fn polarization(&self) -> Polarization {
        if self.vertical_polarization {
            Polarization::Vertical
        } else {
            Polarization::Horizontal
        }
    }

    /// Folds the request's link budget fields into evaluator parameters.
    /// The antenna pattern is attached separately, since patterns come
    /// from their own files.
    pub fn link_params(&self) -> anyhow::Result<LinkParams> {
        self.climate().map(|climate| LinkParams {
            eps_dielect: self.eps_dielect,
            sgm_conductivity: self.sgm_conductivity,
            eno_ns_surfref: self.eno_ns_surfref,
            frq_mhz: self.frequency_mhz,
            climate,
            polarization: self.polarization(),
            conf: self.confidence,
            rel: self.reliability,
            erp: self.erp,
            dbm: self.dbm,
            max_range: self.max_range,
            clutter: self.clutter,
            antenna_pattern: None,
        })
    }
}

pub fn load_requests_from_json(path: impl AsRef<Path>) -> anyhow::Result<Vec<SweepRequest>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("opening request file {}", path.display()))?;
    let reader = BufReader::new(file);
    let requests: Vec<SweepRequest> = serde_json::from_reader(reader)
        .with_context(|| format!("parsing request file {}", path.display()))?;
    Ok(requests)
}
