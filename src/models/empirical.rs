//! Empirical path-loss formulas.
//!
//! All take frequency in MHz, antenna heights in meters and distance in
//! kilometers, and return median path loss in dB. Each model is only
//! meaningful inside its published frequency/height/distance envelope;
//! callers get the raw formula value outside it.

use super::Environment;

/// ITU-R P.525 free-space path loss.
pub fn fspl(frq_mhz: f64, distance_km: f64) -> f64 {
    32.44 + 20.0 * frq_mhz.log10() + 20.0 * distance_km.log10()
}

/// Okumura-Hata, large-city mobile correction, 150-1500 MHz.
pub fn hata(
    frq_mhz: f64,
    tx_height_m: f64,
    rx_height_m: f64,
    distance_km: f64,
    environment: Environment,
) -> f64 {
    let logf = frq_mhz.log10();

    let c_h = if frq_mhz < 200.0 {
        let lh = (1.54 * rx_height_m).log10();
        8.29 * lh * lh - 1.1
    } else {
        let lh = (11.75 * rx_height_m).log10();
        3.2 * lh * lh - 4.97
    };

    let l_urban = 69.55 + 26.16 * logf - 13.82 * tx_height_m.log10() - c_h
        + (44.9 - 6.55 * tx_height_m.log10()) * distance_km.log10();

    match environment {
        Environment::Urban => l_urban,
        Environment::Suburban => {
            let lf = (frq_mhz / 28.0).log10();
            l_urban - 2.0 * lf * lf - 5.4
        }
        Environment::Open => l_urban - 4.78 * logf * logf + 18.33 * logf - 40.94,
    }
}

/// COST231-Hata extension, 1500-2000 MHz (falls back to the Hata
/// coefficients below 1500).
pub fn cost231(
    frq_mhz: f64,
    tx_height_m: f64,
    rx_height_m: f64,
    distance_km: f64,
    environment: Environment,
) -> f64 {
    let (c0, cf) = if frq_mhz > 1500.0 {
        (46.3, 33.9)
    } else {
        (69.55, 26.16)
    };
    let c = match environment {
        Environment::Urban => 3.0,
        Environment::Suburban => 0.0,
        Environment::Open => -3.0,
    };

    let lh = (11.75 * rx_height_m).log10();
    let c_h = 3.2 * lh * lh - 4.97;

    c0 + cf * frq_mhz.log10() - 13.82 * tx_height_m.log10() - c_h
        + (44.9 - 6.55 * tx_height_m.log10()) * distance_km.log10()
        + c
}

/// ECC-33 (ITU-R P.529), 700 MHz-3.5 GHz fixed wireless.
pub fn ecc33(
    frq_mhz: f64,
    tx_height_m: f64,
    rx_height_m: f64,
    distance_km: f64,
    environment: Environment,
) -> f64 {
    let f_ghz = frq_mhz / 1000.0;
    let logf = f_ghz.log10();
    let logd = distance_km.log10();

    let afs = 92.4 + 20.0 * logd + 20.0 * logf;
    let abm = 20.41 + 9.83 * logd + 7.894 * logf + 9.56 * logf * logf;
    let gb = (tx_height_m / 200.0).log10() * (13.958 + 5.8 * logd * logd);
    let gr = match environment {
        // High-rise city receiver gain.
        Environment::Urban => 0.759 * rx_height_m - 1.862,
        Environment::Suburban | Environment::Open => {
            (42.57 + 13.7 * logf) * (rx_height_m.log10() - 0.585)
        }
    };

    afs + abm - gb - gr
}

/// Stanford University Interim model, 1.9-11 GHz.
pub fn sui(
    frq_mhz: f64,
    tx_height_m: f64,
    rx_height_m: f64,
    distance_km: f64,
    environment: Environment,
) -> f64 {
    let d_m = distance_km * 1000.0;

    // Terrain category coefficients: A = hilly/dense, B = flat/light
    // trees, C = open.
    let (a, b, c, xh_cf) = match environment {
        Environment::Urban => (4.6, 0.0075, 12.6, -10.8),
        Environment::Suburban => (4.0, 0.0065, 17.1, -10.8),
        Environment::Open => (3.6, 0.005, 20.0, -20.0),
    };
    let s = 8.2; // shadow fading margin

    let d0 = 100.0;
    let lambda = 300.0 / frq_mhz;
    let a0 = 20.0 * (4.0 * std::f64::consts::PI * d0 / lambda).log10();
    let gamma = a - b * tx_height_m + c / tx_height_m;
    let xf = 6.0 * (frq_mhz / 2000.0).log10();
    let xh = xh_cf * (rx_height_m / 2.0).log10();

    a0 + 10.0 * gamma * (d_m / d0).log10() + xf + xh + s
}

/// Ericsson 9999 model.
pub fn ericsson(
    frq_mhz: f64,
    tx_height_m: f64,
    rx_height_m: f64,
    distance_km: f64,
    environment: Environment,
) -> f64 {
    let (a0, a1) = match environment {
        Environment::Urban => (36.2, 30.2),
        Environment::Suburban => (43.2, 68.93),
        Environment::Open => (45.95, 100.6),
    };
    let (a2, a3) = (12.0, 0.1);

    let logd = distance_km.log10();
    let logh = tx_height_m.log10();
    let lh = (11.75 * rx_height_m).log10();
    let g_f = 44.49 * frq_mhz.log10() - 4.78 * frq_mhz.log10() * frq_mhz.log10();

    a0 + a1 * logd - a2 * logh + a3 * logh * logd - 3.2 * lh * lh + g_f
}

/// Plane-earth (two-ray) loss; frequency-independent.
pub fn plane_earth(distance_km: f64, tx_height_m: f64, rx_height_m: f64) -> f64 {
    let d_m = distance_km * 1000.0;
    40.0 * d_m.log10() - 20.0 * tx_height_m.log10() - 20.0 * rx_height_m.log10()
}

/// Egli VHF/UHF median loss.
pub fn egli(frq_mhz: f64, tx_height_m: f64, rx_height_m: f64, distance_km: f64) -> f64 {
    let mobile_term = if rx_height_m > 10.0 {
        85.9 - 20.0 * rx_height_m.log10()
    } else {
        76.3 - 10.0 * rx_height_m.log10()
    };
    mobile_term + 20.0 * frq_mhz.log10() + 40.0 * distance_km.log10() - 20.0 * tx_height_m.log10()
}

/// Free-space loss plus a ground-coupling penalty scaled by the soil's
/// relative permittivity (lower permittivity, drier soil, higher loss).
pub fn soil(frq_mhz: f64, distance_km: f64, eps_dielect: f64) -> f64 {
    let soil_factor = 120.0 / eps_dielect;
    6.4 + 20.0 * (distance_km * 1000.0).log10() + 20.0 * frq_mhz.log10() + 8.69 * soil_factor
}
