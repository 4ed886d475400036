//! Path-loss model plumbing.
//!
//! The empirical models are small pure functions over frequency, antenna
//! heights and distance. ITM/ITWOM-class models consume a full terrain
//! profile and are plugged in through [`PointToPointModel`]; this crate
//! carries the dispatch and the profile layout but no irregular-terrain
//! implementation of its own.

pub mod empirical;

use thiserror::Error;

/// Propagation model selector, matching the request-level integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCode {
    Itm,
    LineOfSight,
    Hata,
    Ecc33,
    Sui,
    Cost231,
    Fspl,
    Itwom,
    Ericsson,
    PlaneEarth,
    Egli,
    Soil,
}

impl ModelCode {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Itm,
            2 => Self::LineOfSight,
            3 => Self::Hata,
            4 => Self::Ecc33,
            5 => Self::Sui,
            6 => Self::Cost231,
            7 => Self::Fspl,
            8 => Self::Itwom,
            9 => Self::Ericsson,
            10 => Self::PlaneEarth,
            11 => Self::Egli,
            12 => Self::Soil,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Itm => 1,
            Self::LineOfSight => 2,
            Self::Hata => 3,
            Self::Ecc33 => 4,
            Self::Sui => 5,
            Self::Cost231 => 6,
            Self::Fspl => 7,
            Self::Itwom => 8,
            Self::Ericsson => 9,
            Self::PlaneEarth => 10,
            Self::Egli => 11,
            Self::Soil => 12,
        }
    }

    /// True for the profile-consuming irregular-terrain models.
    pub fn is_point_to_point(self) -> bool {
        matches!(self, Self::Itm | Self::Itwom)
    }
}

/// Environment class shared by the Hata-family and SUI models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Urban,
    Suburban,
    Open,
}

impl Environment {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Urban,
            2 => Self::Suburban,
            3 => Self::Open,
            _ => return None,
        })
    }
}

/// ITM radio climate codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Climate {
    Equatorial,
    ContinentalSubtropical,
    MaritimeSubtropical,
    Desert,
    #[default]
    ContinentalTemperate,
    MaritimeTemperateLand,
    MaritimeTemperateSea,
}

impl Climate {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Equatorial,
            2 => Self::ContinentalSubtropical,
            3 => Self::MaritimeSubtropical,
            4 => Self::Desert,
            5 => Self::ContinentalTemperate,
            6 => Self::MaritimeTemperateLand,
            7 => Self::MaritimeTemperateSea,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Equatorial => 1,
            Self::ContinentalSubtropical => 2,
            Self::MaritimeSubtropical => 3,
            Self::Desert => 4,
            Self::ContinentalTemperate => 5,
            Self::MaritimeTemperateLand => 6,
            Self::MaritimeTemperateSea => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarization {
    Horizontal,
    #[default]
    Vertical,
}

impl Polarization {
    pub fn code(self) -> i32 {
        match self {
            Self::Horizontal => 0,
            Self::Vertical => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model {} requires a point-to-point implementation and none is configured", .0.code())]
    MissingPointToPoint(ModelCode),
    #[error("model parameter out of range (code {0})")]
    Domain(i32),
}

/// Terrain profile in the irregular-terrain-model array layout:
/// `raw[0]` is the number of intervals (points − 1), `raw[1]` the sample
/// spacing in meters, and `raw[2..]` the height samples in meters.
#[derive(Debug, Clone, Copy)]
pub struct ElevationProfile<'a> {
    raw: &'a [f64],
}

impl<'a> ElevationProfile<'a> {
    /// Wraps a raw profile array. `None` if the header is inconsistent
    /// with the slice length.
    pub fn new(raw: &'a [f64]) -> Option<Self> {
        if raw.len() < 4 {
            return None;
        }
        let intervals = raw[0];
        if !(intervals >= 1.0 && intervals.fract() == 0.0) || raw[1] <= 0.0 {
            return None;
        }
        if raw.len() < intervals as usize + 3 {
            return None;
        }
        Some(Self { raw })
    }

    pub fn raw(&self) -> &[f64] {
        self.raw
    }

    pub fn points(&self) -> usize {
        self.raw[0] as usize + 1
    }

    pub fn spacing_m(&self) -> f64 {
        self.raw[1]
    }

    pub fn heights(&self) -> &[f64] {
        &self.raw[2..2 + self.points()]
    }

    pub fn distance_km(&self) -> f64 {
        self.raw[0] * self.raw[1] / 1000.0
    }
}

/// Inputs for a profile-based point-to-point model invocation.
#[derive(Debug, Clone, Copy)]
pub struct PointToPointParams<'a> {
    pub tx_height_m: f64,
    pub rx_height_m: f64,
    pub eps_dielect: f64,
    pub sgm_conductivity: f64,
    pub eno_ns_surfref: f64,
    pub frq_mhz: f64,
    pub climate: Climate,
    pub polarization: Polarization,
    pub conf: f64,
    pub rel: f64,
    pub profile: ElevationProfile<'a>,
}

/// A point-to-point model result. `error_code` carries the model's own
/// out-of-range diagnostic; nonzero codes annotate the point but do not
/// abort a sweep.
#[derive(Debug, Clone)]
pub struct PointToPointLoss {
    pub loss_db: f64,
    pub mode: String,
    pub error_code: i32,
}

/// Profile-consuming model plug-in (ITM, ITWOM). Implementations must be
/// callable from concurrent sector workers.
pub trait PointToPointModel: Send + Sync {
    fn loss(&self, params: &PointToPointParams<'_>) -> Result<PointToPointLoss, ModelError>;
}

/// Dispatches the empirical models by code. Returns `None` for the
/// profile-based and line-of-sight-only codes, which are not expressible
/// as a height/distance formula.
pub fn empirical_loss(
    model: ModelCode,
    environment: Environment,
    frq_mhz: f64,
    tx_height_m: f64,
    rx_height_m: f64,
    distance_km: f64,
    eps_dielect: f64,
) -> Option<f64> {
    Some(match model {
        ModelCode::Hata => empirical::hata(frq_mhz, tx_height_m, rx_height_m, distance_km, environment),
        ModelCode::Ecc33 => {
            empirical::ecc33(frq_mhz, tx_height_m, rx_height_m, distance_km, environment)
        }
        ModelCode::Sui => empirical::sui(frq_mhz, tx_height_m, rx_height_m, distance_km, environment),
        ModelCode::Cost231 => {
            empirical::cost231(frq_mhz, tx_height_m, rx_height_m, distance_km, environment)
        }
        ModelCode::Fspl => empirical::fspl(frq_mhz, distance_km),
        ModelCode::Ericsson => {
            empirical::ericsson(frq_mhz, tx_height_m, rx_height_m, distance_km, environment)
        }
        ModelCode::PlaneEarth => empirical::plane_earth(distance_km, tx_height_m, rx_height_m),
        ModelCode::Egli => empirical::egli(frq_mhz, tx_height_m, rx_height_m, distance_km),
        ModelCode::Soil => empirical::soil(frq_mhz, distance_km, eps_dielect),
        ModelCode::Itm | ModelCode::Itwom | ModelCode::LineOfSight => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_codes_round_trip() {
        for code in 1..=12 {
            let model = ModelCode::from_code(code).unwrap();
            assert_eq!(model.code(), code);
        }
        assert!(ModelCode::from_code(0).is_none());
        assert!(ModelCode::from_code(13).is_none());
    }

    #[test]
    fn profile_header_is_validated() {
        let good = [3.0, 90.0, 5.0, 6.0, 7.0, 8.0];
        let p = ElevationProfile::new(&good).unwrap();
        assert_eq!(p.points(), 4);
        assert_eq!(p.heights(), &[5.0, 6.0, 7.0, 8.0]);
        assert!((p.distance_km() - 0.27).abs() < 1e-12);

        // Claims more points than the slice holds.
        let short = [9.0, 90.0, 5.0, 6.0];
        assert!(ElevationProfile::new(&short).is_none());
    }

    #[test]
    fn point_to_point_codes_have_no_empirical_form() {
        for model in [ModelCode::Itm, ModelCode::Itwom, ModelCode::LineOfSight] {
            assert!(
                empirical_loss(model, Environment::Urban, 900.0, 30.0, 1.5, 5.0, 15.0).is_none()
            );
        }
    }
}
