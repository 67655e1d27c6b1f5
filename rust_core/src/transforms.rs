//! Bijections between a distribution's support and the real line.
//!
//! | support    | constrained `x`          | unconstrained `y`         | log-Jacobian `log|dx/dy|`          |
//! |------------|--------------------------|---------------------------|------------------------------------|
//! | real       | `y`                      | `x`                       | `0`                                |
//! | positive   | `exp(y)`                 | `ln x`                    | `y`                                |
//! | `(lo, hi)` | `lo + (hi - lo) σ(y)`    | `ln(x - lo) - ln(hi - x)` | `ln(hi - lo) + ln σ(y) + ln σ(-y)` |

use crate::distributions::Distribution;

/// Support of a distribution once its parameters are known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Support {
    Real,
    Positive,
    Interval { lower: f64, upper: f64 },
    /// Integer-valued; has no smooth bijection to the reals.
    Discrete,
}

impl Support {
    pub fn contains(&self, x: f64) -> bool {
        match *self {
            Support::Real => x.is_finite(),
            Support::Positive => x > 0.0 && x.is_finite(),
            Support::Interval { lower, upper } => x > lower && x < upper,
            Support::Discrete => x.is_finite() && x.fract() == 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Identity,
    Log,
    ScaledLogit { lower: f64, upper: f64 },
}

/// Partial derivatives of a transform output with respect to the raw value
/// and the interval bounds (zero for transforms without bounds).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransformPartials {
    pub d_raw: f64,
    pub d_lower: f64,
    pub d_upper: f64,
}

impl Transform {
    /// The bijection used for `support`; `None` for discrete supports.
    pub fn for_support(support: Support) -> Option<Self> {
        match support {
            Support::Real => Some(Transform::Identity),
            Support::Positive => Some(Transform::Log),
            Support::Interval { lower, upper } => Some(Transform::ScaledLogit { lower, upper }),
            Support::Discrete => None,
        }
    }

    pub fn to_unconstrained(&self, x: f64) -> f64 {
        match *self {
            Transform::Identity => x,
            Transform::Log => x.ln(),
            Transform::ScaledLogit { lower, upper } => (x - lower).ln() - (upper - x).ln(),
        }
    }

    /// Map `y` back to the support, returning `(x, log|dx/dy|)`.
    pub fn to_constrained(&self, y: f64) -> (f64, f64) {
        match *self {
            Transform::Identity => (y, 0.0),
            Transform::Log => (y.exp(), y),
            Transform::ScaledLogit { lower, upper } => {
                let range = upper - lower;
                let x = lower + range * sigmoid(y);
                let log_jac = range.ln() - softplus(-y) - softplus(y);
                (x, log_jac)
            }
        }
    }

    /// Partials of the constrained value `x(y, lower, upper)`.
    pub fn value_partials(&self, y: f64) -> TransformPartials {
        match *self {
            Transform::Identity => TransformPartials {
                d_raw: 1.0,
                ..Default::default()
            },
            Transform::Log => TransformPartials {
                d_raw: y.exp(),
                ..Default::default()
            },
            Transform::ScaledLogit { lower, upper } => {
                let s = sigmoid(y);
                TransformPartials {
                    d_raw: (upper - lower) * s * (1.0 - s),
                    d_lower: 1.0 - s,
                    d_upper: s,
                }
            }
        }
    }

    /// Partials of the log-Jacobian term.
    pub fn log_jacobian_partials(&self, y: f64) -> TransformPartials {
        match *self {
            Transform::Identity => TransformPartials::default(),
            Transform::Log => TransformPartials {
                d_raw: 1.0,
                ..Default::default()
            },
            Transform::ScaledLogit { lower, upper } => {
                let range = upper - lower;
                TransformPartials {
                    d_raw: 1.0 - 2.0 * sigmoid(y),
                    d_lower: -1.0 / range,
                    d_upper: 1.0 / range,
                }
            }
        }
    }
}

/// Unconstrained image of `value` under the transform for `dist`'s support.
///
/// Discrete distributions have no transform; their value passes through.
pub fn to_unconstrained(dist: &Distribution, value: f64) -> f64 {
    match Transform::for_support(dist.support()) {
        Some(t) => t.to_unconstrained(value),
        None => value,
    }
}

/// Constrained value and log-Jacobian for `real` under `dist`'s transform.
pub fn to_constrained(dist: &Distribution, real: f64) -> (f64, f64) {
    match Transform::for_support(dist.support()) {
        Some(t) => t.to_constrained(real),
        None => (real, 0.0),
    }
}

pub fn sigmoid(y: f64) -> f64 {
    if y >= 0.0 {
        1.0 / (1.0 + (-y).exp())
    } else {
        let e = y.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + exp(x))` without overflow.
pub fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Family;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn numeric_log_abs_derivative(t: Transform, y: f64) -> f64 {
        let h = 1e-6;
        let (xp, _) = t.to_constrained(y + h);
        let (xm, _) = t.to_constrained(y - h);
        ((xp - xm) / (2.0 * h)).abs().ln()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn log_roundtrip(x in 1e-3f64..1e3) {
            let t = Transform::Log;
            let (back, _) = t.to_constrained(t.to_unconstrained(x));
            prop_assert!((back - x).abs() <= 1e-12 * x.max(1.0));
        }

        #[test]
        fn scaled_logit_roundtrip(lower in -10.0f64..10.0, width in 0.1f64..20.0, u in 0.01f64..0.99) {
            let t = Transform::ScaledLogit { lower, upper: lower + width };
            let x = lower + width * u;
            let (back, _) = t.to_constrained(t.to_unconstrained(x));
            prop_assert!((back - x).abs() <= 1e-9 * (1.0 + x.abs()));
        }

        #[test]
        fn log_jacobian_matches_numeric_derivative(y in -5.0f64..5.0, lower in -3.0f64..3.0, width in 0.5f64..5.0) {
            for t in [Transform::Log, Transform::ScaledLogit { lower, upper: lower + width }] {
                let (_, log_jac) = t.to_constrained(y);
                let numeric = numeric_log_abs_derivative(t, y);
                prop_assert!((log_jac - numeric).abs() < 1e-5, "{:?}: {} vs {}", t, log_jac, numeric);
            }
        }
    }

    #[test]
    fn test_identity_has_zero_jacobian() {
        let (x, log_jac) = Transform::Identity.to_constrained(-3.5);
        assert_eq!(x, -3.5);
        assert_eq!(log_jac, 0.0);
    }

    #[test]
    fn test_scaled_logit_bound_partials() {
        let (lower, upper, y) = (1.0, 4.0, 0.3);
        let h = 1e-6;
        let t = Transform::ScaledLogit { lower, upper };
        let p = t.value_partials(y);
        let x = |lo: f64, hi: f64| Transform::ScaledLogit { lower: lo, upper: hi }.to_constrained(y).0;
        assert_relative_eq!(p.d_lower, (x(lower + h, upper) - x(lower - h, upper)) / (2.0 * h), epsilon = 1e-7);
        assert_relative_eq!(p.d_upper, (x(lower, upper + h) - x(lower, upper - h)) / (2.0 * h), epsilon = 1e-7);

        let j = t.log_jacobian_partials(y);
        let jac = |lo: f64, hi: f64| Transform::ScaledLogit { lower: lo, upper: hi }.to_constrained(y).1;
        assert_relative_eq!(j.d_lower, (jac(lower + h, upper) - jac(lower - h, upper)) / (2.0 * h), epsilon = 1e-6);
        assert_relative_eq!(j.d_upper, (jac(lower, upper + h) - jac(lower, upper - h)) / (2.0 * h), epsilon = 1e-6);
    }

    #[test]
    fn test_distribution_level_contract() {
        let gamma = Distribution::new(Family::Gamma, vec![2.0, 1.0]);
        let y = to_unconstrained(&gamma, 0.5);
        assert_relative_eq!(y, 0.5f64.ln());
        let (x, log_jac) = to_constrained(&gamma, y);
        assert_relative_eq!(x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(log_jac, y);

        let unif = Distribution::new(Family::Uniform, vec![-1.0, 3.0]);
        let (x, _) = to_constrained(&unif, to_unconstrained(&unif, 2.0));
        assert_relative_eq!(x, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_support_membership() {
        assert!(Support::Positive.contains(1e-300));
        assert!(!Support::Positive.contains(0.0));
        assert!(!Support::Interval { lower: 0.0, upper: 1.0 }.contains(1.0));
        assert!(Support::Discrete.contains(3.0));
        assert!(!Support::Discrete.contains(2.5));
    }
}
