//! Pointwise constitutive closures: the van Genuchten retention/conductivity
//! model and the two root water-stress response functions.
//!
//! Every function here is a pure scalar map; the field layer broadcasts them
//! over the active region and keeps the void sentinel out of their inputs.

/// Effective saturation [dimensionless, 0-1] from the van Genuchten model
/// Se(h) = (1 + |alpha*h|^n)^(-m)
/// h: matric potential [m] (<= 0), alpha [1/m], n, m dimensionless
pub fn effective_saturation(h: f64, alpha: f64, n: f64, m: f64) -> f64 {
    (1.0 + (alpha * h).abs().powf(n)).powf(-m)
}

/// Water content [dimensionless] theta = (theta_s - theta_r) * Se + theta_r
pub fn water_content(h: f64, alpha: f64, n: f64, m: f64, theta_s: f64, theta_r: f64) -> f64 {
    (theta_s - theta_r) * effective_saturation(h, alpha, n, m) + theta_r
}

/// Matric potential [m] from water content: the inverse of `water_content`.
/// Returns 0 at full saturation and -1e10 at residual (the retention curve
/// is unbounded there).
pub fn matric_potential(
    theta: f64,
    alpha: f64,
    n: f64,
    m: f64,
    theta_s: f64,
    theta_r: f64,
) -> f64 {
    let se = (theta - theta_r) / (theta_s - theta_r);
    if se == 1.0 {
        0.0
    } else if se == 0.0 {
        -1e10
    } else {
        -((se.powf(-1.0 / m) - 1.0).powf(1.0 / n)) / alpha
    }
}

/// Unsaturated hydraulic conductivity [m/s] using the Mualem-van Genuchten
/// correlation
/// K(h) = k * Se^l * (1 - (1 - Se^(1/m))^m)^2
/// k: saturated conductivity [m/s], l: tortuosity exponent [dimensionless]
pub fn conductivity(h: f64, k: f64, alpha: f64, n: f64, m: f64, l: f64) -> f64 {
    let se = effective_saturation(h, alpha, n, m);
    k * se.powf(l) * (1.0 - (1.0 - se.powf(1.0 / m)).powf(m)).powi(2)
}

/// Specific moisture capacity [1/m]
/// Cw(h) = alpha^n * (theta_s - theta_r) * (n - 1) * (-h)^(n-1)
///         / (1 + (-alpha*h)^n)^(2 - 1/n)
/// Defined for h < 0; evaluates to 0 at h = 0.
pub fn moisture_capacity(alpha: f64, n: f64, theta_s: f64, theta_r: f64, h: f64) -> f64 {
    let cw = alpha.powf(n) * (theta_s - theta_r) * (n - 1.0) * (-h).powf(n - 1.0);
    cw / (1.0 + (-alpha * h).powf(n)).powf(2.0 - 1.0 / n)
}

/// Feddes root-stress response [dimensionless, 0-1]: piecewise-linear ramp on
/// four breakpoints a0 > a1 > a2 > a3 [m].
/// Zero outside [a3, a0], unity on [a2, a1], linear on both shoulders.
pub fn feddes_stress(h: f64, a0: f64, a1: f64, a2: f64, a3: f64) -> f64 {
    if h > a1 && h < a0 {
        (a0 - h) / (a0 - a1)
    } else if h <= a1 && h >= a2 {
        1.0
    } else if h > a3 && h < a2 {
        (h - a3) / (a2 - a3)
    } else {
        0.0
    }
}

/// S-shaped root-stress response [dimensionless, 0-1]
/// F(h) = 1 / (1 + |h/h50|^p)
/// h50: matric potential at which F = 0.5 [m], p: shape exponent
pub fn s_shaped_stress(h: f64, h50: f64, p: f64) -> f64 {
    1.0 / (1.0 + (h / h50).abs().powf(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAND: (f64, f64, f64, f64) = (14.5, 2.68, 0.045, 0.43); // alpha, n, theta_r, theta_s

    #[test]
    fn water_content_round_trips_through_matric_potential() {
        let (alpha, n, theta_r, theta_s) = SAND;
        let m = 1.0 - 1.0 / n;
        for i in 0..=100 {
            let h = -10.0 * (i as f64) / 100.0;
            let theta = water_content(h, alpha, n, m, theta_s, theta_r);
            let back = matric_potential(theta, alpha, n, m, theta_s, theta_r);
            assert!(
                (back - h).abs() <= 1e-9 * h.abs().max(1.0),
                "round trip failed at h={h}: got {back}"
            );
        }
    }

    #[test]
    fn saturation_and_conductivity_are_monotone_in_h() {
        let (alpha, n, _, _) = SAND;
        let m = 1.0 - 1.0 / n;
        let mut prev_se = 0.0;
        let mut prev_k = 0.0;
        for i in 0..=200 {
            let h = -20.0 + 20.0 * (i as f64) / 200.0;
            let se = effective_saturation(h, alpha, n, m);
            let k = conductivity(h, 8.25e-5, alpha, n, m, 0.5);
            assert!(se >= prev_se - 1e-15, "Se not monotone at h={h}");
            assert!(k >= prev_k - 1e-20, "K not monotone at h={h}");
            prev_se = se;
            prev_k = k;
        }
    }

    #[test]
    fn saturated_limits() {
        let (alpha, n, theta_r, theta_s) = SAND;
        let m = 1.0 - 1.0 / n;
        assert_eq!(effective_saturation(0.0, alpha, n, m), 1.0);
        assert_eq!(water_content(0.0, alpha, n, m, theta_s, theta_r), theta_s);
        assert_eq!(conductivity(0.0, 8.25e-5, alpha, n, m, 0.5), 8.25e-5);
        assert_eq!(moisture_capacity(alpha, n, theta_s, theta_r, 0.0), 0.0);
    }

    #[test]
    fn feddes_ramp_shape() {
        let (a0, a1, a2, a3) = (-0.1, -0.25, -3.0, -8.0);
        assert_eq!(feddes_stress(-0.05, a0, a1, a2, a3), 0.0);
        assert_eq!(feddes_stress(-1.0, a0, a1, a2, a3), 1.0);
        assert_eq!(feddes_stress(-9.0, a0, a1, a2, a3), 0.0);
        // shoulders are linear and hit 1/2 at the midpoints
        let upper_mid = feddes_stress((a0 + a1) / 2.0, a0, a1, a2, a3);
        let lower_mid = feddes_stress((a2 + a3) / 2.0, a0, a1, a2, a3);
        assert!((upper_mid - 0.5).abs() < 1e-12);
        assert!((lower_mid - 0.5).abs() < 1e-12);
    }

    #[test]
    fn s_shaped_is_half_at_h50() {
        let f = s_shaped_stress(-2.0, -2.0, 3.0);
        assert!((f - 0.5).abs() < 1e-12);
        assert!(s_shaped_stress(-20.0, -2.0, 3.0) < 0.01);
        assert!(s_shaped_stress(-0.02, -2.0, 3.0) > 0.99);
    }
}
