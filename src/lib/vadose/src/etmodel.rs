//! FAO-56 Penman-Monteith reference evapotranspiration and the crop
//! coefficient module that turns it into soil evaporation and transpiration
//! maps for the solver.
//!
//! Scalar helpers work in the FAO units (kPa, degC, mm/day); the module
//! hands (E, Tp) to the core in m/s.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Energy flux conversion: MJ/m2/day -> mm/day of evaporated water.
pub fn mj_per_m2_to_mm(e: f64) -> f64 {
    0.408 * e
}

/// Psychrometric constant gamma [kPa/degC] from air pressure P [kPa].
pub fn psychrometric_constant(p: f64) -> f64 {
    6.65e-4 * p
}

/// Saturation vapour pressure e0 [kPa] at air temperature T [degC].
pub fn saturation_vapour_pressure(t: f64) -> f64 {
    0.6108 * (17.27 * t / (t + 237.3)).exp()
}

/// Actual vapour pressure ea [kPa] from temperature [degC] and relative
/// humidity [%].
pub fn vapour_pressure(t: f64, rh: f64) -> f64 {
    saturation_vapour_pressure(t) * (rh / 100.0)
}

/// Slope of the saturation vapour pressure curve Delta [kPa/degC].
pub fn vapour_pressure_slope(t: f64) -> f64 {
    2503.0 * (17.27 * t / (t + 237.3)).exp() / ((t + 237.3) * (t + 237.3))
}

/// Wind speed at 2 m [m/s] from a measurement u_z [m/s] at height z [m].
pub fn wind_speed_2m(uz: f64, z: f64) -> f64 {
    4.87 * uz / (67.8 * z - 5.42).ln()
}

/// Net radiation Rn [mm/day equivalent].
///
/// `day_of_year` counts from January 1st (1..=366), `latitude` in degrees,
/// `sunshine_hours` is the measured bright-sunshine duration [h], `ea` the
/// actual vapour pressure [kPa], `t_max`/`t_min` the daily extremes [degC].
pub fn net_radiation(
    day_of_year: f64,
    latitude: f64,
    sunshine_hours: f64,
    ea: f64,
    t_max: f64,
    t_min: f64,
) -> f64 {
    use std::f64::consts::PI;

    // inverse relative Earth-Sun distance and solar declination [rad]
    let dr = 1.0 + 0.033 * (2.0 * PI / 365.0 * day_of_year).cos();
    let delta = 0.409 * (2.0 * PI / 365.0 * day_of_year - 1.39).sin();
    let varphi = latitude * PI / 180.0;
    let omega_s = (-varphi.tan() * delta.tan()).acos();

    // extraterrestrial radiation [MJ/m2/day] -> [mm/day]
    let ra = 0.082
        * (24.0 * 60.0 / PI)
        * dr
        * (omega_s * varphi.sin() * delta.sin() + varphi.cos() * delta.cos() * omega_s.sin());
    let ra = mj_per_m2_to_mm(ra);

    let daylight_hours = 24.0 * omega_s / PI;
    let rs = (0.25 + 0.5 * sunshine_hours / daylight_hours) * ra;
    let rns = (1.0 - 0.23) * rs;
    let rso = 0.75 * ra;

    let t_mean4 = (t_max + 273.0).powi(4) + (t_min + 273.0).powi(4);
    let rnl = 4.903e-9 * t_mean4 * (0.34 - 0.14 * ea.sqrt()) * (1.35 * rs / rso - 0.35);
    let rnl = mj_per_m2_to_mm(rnl);

    rns - rnl
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayPhase {
    Daylight,
    Nighttime,
}

/// Soil heat flux G [mm/day] from net radiation.
pub fn soil_heat_flux(rn: f64, phase: DayPhase) -> f64 {
    match phase {
        DayPhase::Daylight => 0.1 * rn,
        DayPhase::Nighttime => 0.5 * rn,
    }
}

/// Crop coefficient: a single value, or the four-stage FAO curve
/// (FAO-56 tables 11/12) interpolated over the growing season.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum KcCurve {
    Constant {
        kc: f64,
    },
    Staged {
        kc_ini: f64,
        kc_mid: f64,
        kc_end: f64,
        /// Stage durations [day]: initial, development, mid-season, late.
        l_ini: f64,
        l_dev: f64,
        l_mid: f64,
        l_late: f64,
    },
}

/// Crop evapotranspiration module. Immutable after construction; produces
/// (E, Tp) maps [m/s] from a reference evapotranspiration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EtcModule {
    kc: KcCurve,
    /// Crop height [m], feeds the wind/humidity correction.
    crop_height: f64,
    /// Leaf area index distribution over the surface grid.
    lai: Array2<f64>,
}

impl EtcModule {
    pub fn new(kc: KcCurve, crop_height: f64, lai: Array2<f64>) -> Self {
        EtcModule {
            kc,
            crop_height,
            lai,
        }
    }

    pub fn lai(&self) -> &Array2<f64> {
        &self.lai
    }

    /// Crop coefficient for the day, with the FAO wind/humidity correction
    /// `(0.04 (u2 - 2) - 0.004 (RHmin - 45)) (h/3)^0.3` applied to the
    /// constant value and to Kc_mid / Kc_end.
    ///
    /// `elapsed` is the number of days since planting; `None` with a staged
    /// curve evaluates to the pre-season Kc_ini.
    pub fn kc(&self, u2: f64, rh_min: f64, elapsed: Option<f64>) -> f64 {
        let correction =
            (0.04 * (u2 - 2.0) - 0.004 * (rh_min - 45.0)) * (self.crop_height / 3.0).powf(0.3);
        match &self.kc {
            KcCurve::Constant { kc } => kc + correction,
            KcCurve::Staged {
                kc_ini,
                kc_mid,
                kc_end,
                l_ini,
                l_dev,
                l_mid,
                l_late,
            } => {
                let Some(mut elapsed) = elapsed else {
                    return *kc_ini;
                };
                if elapsed < *l_ini {
                    return *kc_ini;
                }
                elapsed -= l_ini;
                let kc_mid = kc_mid + correction;
                if elapsed < *l_dev {
                    return kc_ini + (kc_mid - kc_ini) * elapsed / l_dev;
                }
                elapsed -= l_dev;
                if elapsed < *l_mid {
                    return kc_mid;
                }
                elapsed -= l_mid;
                let kc_end = kc_end + correction;
                if elapsed > *l_late {
                    kc_end
                } else {
                    kc_mid + (kc_end - kc_mid) * elapsed / l_late
                }
            }
        }
    }

    /// Split crop evapotranspiration [m/s] into soil evaporation and
    /// transpiration by Campbell's law:
    /// Tp = ETc (1 - exp(-0.463 LAI)), E = ETc - Tp.
    pub fn campbell(&self, etc: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let tp = etc * &self.lai.mapv(|lai| 1.0 - (-0.463 * lai).exp());
        let e = etc - &tp;
        (e, tp)
    }

    /// (E, Tp) maps [m/s] from a known reference evapotranspiration map
    /// ET0 [m/s].
    pub fn evapotranspiration(
        &self,
        et0: &Array2<f64>,
        u2: f64,
        rh_min: f64,
        elapsed: Option<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let etc = et0 * self.kc(u2, rh_min, elapsed);
        self.campbell(&etc)
    }

    /// (E, Tp) maps [m/s] from the full FAO-56 Penman-Monteith equation
    /// ET0 = (Delta (Rn - G) + 900 gamma u2 (es - ea)/(T + 273))
    ///       / (Delta + gamma (1 + 0.34 u2))  [mm/day],
    /// converted to m/s before the Kc scaling and the Campbell split.
    #[allow(clippy::too_many_arguments)]
    pub fn fao_penman_monteith(
        &self,
        delta: f64,
        rn: f64,
        es: f64,
        ea: f64,
        gamma: f64,
        t: f64,
        g: f64,
        u2: f64,
        rh_min: f64,
        elapsed: Option<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let et0 = (delta * (rn - g) + 900.0 * gamma * u2 * (es - ea) / (t + 273.0))
            / (delta + gamma * (1.0 + 0.34 * u2));
        let etc = self.kc(u2, rh_min, elapsed) * et0 / (1000.0 * 24.0 * 60.0 * 60.0);
        self.campbell(&Array2::from_elem(self.lai.dim(), etc))
    }
}
