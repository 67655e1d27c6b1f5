use crate::transforms::Support;
use rand::Rng;
use rand_distr::Distribution as RandDistribution;
use statrs::function::factorial::ln_binomial;
use statrs::function::gamma::{digamma, ln_gamma};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Support shape of a family, before parameter values are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportKind {
    Real,
    Positive,
    UnitInterval,
    /// `(params[lower], params[upper])`, e.g. `dunif(a, b)`.
    ParamInterval { lower: usize, upper: usize },
    Discrete,
}

/// Log-density of a user distribution: `(x, params) -> log p(x | params)`.
pub type LogPdfFn = fn(f64, &[f64]) -> f64;

/// Gradient of a user distribution: fills `d_params`, returns `d/dx`.
pub type LogPdfGradFn = fn(f64, &[f64], &mut [f64]) -> f64;

/// A distribution supplied by the caller through the registry.
#[derive(Debug, Clone, Copy)]
pub struct CustomDistribution {
    pub arity: usize,
    pub support: SupportKind,
    pub log_pdf: LogPdfFn,
    /// Falls back to central finite differences when absent.
    pub grad: Option<LogPdfGradFn>,
}

/// Distribution families, in BUGS parameterisation.
#[derive(Debug, Clone, Copy)]
pub enum Family {
    /// `dnorm(mu, tau)`, tau is a precision.
    Normal,
    /// `dlnorm(mu, tau)`
    LogNormal,
    /// `dt(mu, tau, k)`
    StudentT,
    /// `dlogis(mu, tau)`
    Logistic,
    /// `ddexp(mu, tau)`
    DoubleExponential,
    /// `dgamma(r, mu)`, shape and rate.
    Gamma,
    /// `dexp(lambda)`
    Exponential,
    /// `dweib(v, lambda)`: density `v λ x^(v-1) exp(-λ x^v)`.
    Weibull,
    /// `dbeta(a, b)`
    Beta,
    /// `dunif(a, b)`
    Uniform,
    /// `dbin(p, n)`
    Binomial,
    /// `dbern(p)`
    Bernoulli,
    /// `dpois(lambda)`
    Poisson,
    Custom(CustomDistribution),
}

/// Built-in families under their BUGS names.
pub const BUILTIN_FAMILIES: &[(&str, Family)] = &[
    ("dnorm", Family::Normal),
    ("dlnorm", Family::LogNormal),
    ("dt", Family::StudentT),
    ("dlogis", Family::Logistic),
    ("ddexp", Family::DoubleExponential),
    ("dgamma", Family::Gamma),
    ("dexp", Family::Exponential),
    ("dweib", Family::Weibull),
    ("dbeta", Family::Beta),
    ("dunif", Family::Uniform),
    ("dbin", Family::Binomial),
    ("dbern", Family::Bernoulli),
    ("dpois", Family::Poisson),
];

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Custom(_) => "custom",
            builtin => BUILTIN_FAMILIES
                .iter()
                .find(|(_, f)| std::mem::discriminant(f) == std::mem::discriminant(builtin))
                .map(|(n, _)| *n)
                .unwrap_or("unknown"),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Family::Exponential | Family::Bernoulli | Family::Poisson => 1,
            Family::StudentT => 3,
            Family::Custom(c) => c.arity,
            _ => 2,
        }
    }

    pub fn support_kind(&self) -> SupportKind {
        match self {
            Family::Normal | Family::StudentT | Family::Logistic | Family::DoubleExponential => {
                SupportKind::Real
            }
            Family::LogNormal | Family::Gamma | Family::Exponential | Family::Weibull => {
                SupportKind::Positive
            }
            Family::Beta => SupportKind::UnitInterval,
            Family::Uniform => SupportKind::ParamInterval { lower: 0, upper: 1 },
            Family::Binomial | Family::Bernoulli | Family::Poisson => SupportKind::Discrete,
            Family::Custom(c) => c.support,
        }
    }

    pub fn is_discrete(&self) -> bool {
        self.support_kind() == SupportKind::Discrete
    }

    /// Log-density (or log-mass) of `x`. Out-of-support values and invalid
    /// parameters give `-inf`.
    pub fn log_pdf(&self, x: f64, p: &[f64]) -> f64 {
        let lp = match *self {
            Family::Normal => {
                let (mu, tau) = (p[0], p[1]);
                if !(tau > 0.0) {
                    return f64::NEG_INFINITY;
                }
                let z = x - mu;
                0.5 * (tau.ln() - LN_2PI) - 0.5 * tau * z * z
            }
            Family::LogNormal => {
                let (mu, tau) = (p[0], p[1]);
                if !(tau > 0.0) || x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                let z = x.ln() - mu;
                0.5 * (tau.ln() - LN_2PI) - x.ln() - 0.5 * tau * z * z
            }
            Family::StudentT => {
                let (mu, tau, k) = (p[0], p[1], p[2]);
                if !(tau > 0.0) || !(k > 0.0) {
                    return f64::NEG_INFINITY;
                }
                let z = x - mu;
                ln_gamma(0.5 * (k + 1.0)) - ln_gamma(0.5 * k)
                    + 0.5 * (tau / (k * std::f64::consts::PI)).ln()
                    - 0.5 * (k + 1.0) * (tau * z * z / k).ln_1p()
            }
            Family::Logistic => {
                let (mu, tau) = (p[0], p[1]);
                if !(tau > 0.0) {
                    return f64::NEG_INFINITY;
                }
                let u = tau * (x - mu);
                tau.ln() + u - 2.0 * crate::transforms::softplus(u)
            }
            Family::DoubleExponential => {
                let (mu, tau) = (p[0], p[1]);
                if !(tau > 0.0) {
                    return f64::NEG_INFINITY;
                }
                (0.5 * tau).ln() - tau * (x - mu).abs()
            }
            Family::Gamma => {
                let (r, rate) = (p[0], p[1]);
                if !(r > 0.0) || !(rate > 0.0) || x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                r * rate.ln() + xlogy(r - 1.0, x) - rate * x - ln_gamma(r)
            }
            Family::Exponential => {
                let lambda = p[0];
                if !(lambda > 0.0) || x < 0.0 {
                    return f64::NEG_INFINITY;
                }
                lambda.ln() - lambda * x
            }
            Family::Weibull => {
                let (v, lambda) = (p[0], p[1]);
                if !(v > 0.0) || !(lambda > 0.0) || x < 0.0 {
                    return f64::NEG_INFINITY;
                }
                v.ln() + lambda.ln() + xlogy(v - 1.0, x) - lambda * x.powf(v)
            }
            Family::Beta => {
                let (a, b) = (p[0], p[1]);
                if !(a > 0.0) || !(b > 0.0) || x <= 0.0 || x >= 1.0 {
                    return f64::NEG_INFINITY;
                }
                xlogy(a - 1.0, x) + xlogy(b - 1.0, 1.0 - x) - ln_beta(a, b)
            }
            Family::Uniform => {
                let (a, b) = (p[0], p[1]);
                if !(a < b) || x < a || x > b {
                    return f64::NEG_INFINITY;
                }
                -(b - a).ln()
            }
            Family::Binomial => {
                let (prob, n) = (p[0], p[1]);
                if !(0.0..=1.0).contains(&prob) || !is_count(n) || !is_count(x) || x > n {
                    return f64::NEG_INFINITY;
                }
                ln_binomial(n as u64, x as u64) + xlogy(x, prob) + xlogy(n - x, 1.0 - prob)
            }
            Family::Bernoulli => {
                let prob = p[0];
                if !(0.0..=1.0).contains(&prob) || !(x == 0.0 || x == 1.0) {
                    return f64::NEG_INFINITY;
                }
                xlogy(x, prob) + xlogy(1.0 - x, 1.0 - prob)
            }
            Family::Poisson => {
                let lambda = p[0];
                if !(lambda >= 0.0) || !is_count(x) {
                    return f64::NEG_INFINITY;
                }
                xlogy(x, lambda) - lambda - ln_gamma(x + 1.0)
            }
            Family::Custom(c) => (c.log_pdf)(x, p),
        };
        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }

    /// Partial derivatives of `log_pdf`: writes `d/dparams[i]` into `d_params`
    /// and returns `d/dx`. Derivatives with respect to integer-valued
    /// quantities (counts, trial sizes) are zero.
    pub fn grad_log_pdf(&self, x: f64, p: &[f64], d_params: &mut [f64]) -> f64 {
        d_params.iter_mut().for_each(|d| *d = 0.0);
        if let Family::Custom(c) = *self {
            return match c.grad {
                Some(g) => g(x, p, d_params),
                None => finite_diff_grad(c.log_pdf, x, p, d_params),
            };
        }
        if !self.log_pdf(x, p).is_finite() {
            return 0.0;
        }
        match *self {
            Family::Normal => {
                let (mu, tau) = (p[0], p[1]);
                let z = x - mu;
                d_params[0] = tau * z;
                d_params[1] = 0.5 / tau - 0.5 * z * z;
                -tau * z
            }
            Family::LogNormal => {
                let (mu, tau) = (p[0], p[1]);
                let z = x.ln() - mu;
                d_params[0] = tau * z;
                d_params[1] = 0.5 / tau - 0.5 * z * z;
                -(1.0 + tau * z) / x
            }
            Family::StudentT => {
                let (mu, tau, k) = (p[0], p[1], p[2]);
                let z = x - mu;
                let q = 1.0 + tau * z * z / k;
                let dx = -(k + 1.0) * tau * z / (k * q);
                d_params[0] = -dx;
                d_params[1] = 0.5 / tau - 0.5 * (k + 1.0) * z * z / (k * q);
                d_params[2] = 0.5 * digamma(0.5 * (k + 1.0)) - 0.5 * digamma(0.5 * k) - 0.5 / k
                    - 0.5 * q.ln()
                    + 0.5 * (k + 1.0) * tau * z * z / (k * k * q);
                dx
            }
            Family::Logistic => {
                let (mu, tau) = (p[0], p[1]);
                let g = 1.0 - 2.0 * crate::transforms::sigmoid(tau * (x - mu));
                d_params[0] = -tau * g;
                d_params[1] = 1.0 / tau + (x - mu) * g;
                tau * g
            }
            Family::DoubleExponential => {
                let (mu, tau) = (p[0], p[1]);
                let sign = sign(x - mu);
                d_params[0] = tau * sign;
                d_params[1] = 1.0 / tau - (x - mu).abs();
                -tau * sign
            }
            Family::Gamma => {
                let (r, rate) = (p[0], p[1]);
                d_params[0] = rate.ln() + x.ln() - digamma(r);
                d_params[1] = r / rate - x;
                (r - 1.0) / x - rate
            }
            Family::Exponential => {
                let lambda = p[0];
                d_params[0] = 1.0 / lambda - x;
                -lambda
            }
            Family::Weibull => {
                let (v, lambda) = (p[0], p[1]);
                let xv = x.powf(v);
                d_params[0] = 1.0 / v + x.ln() - lambda * xv * x.ln();
                d_params[1] = 1.0 / lambda - xv;
                ratio(v - 1.0, x) - lambda * v * x.powf(v - 1.0)
            }
            Family::Beta => {
                let (a, b) = (p[0], p[1]);
                let dab = digamma(a + b);
                d_params[0] = x.ln() - digamma(a) + dab;
                d_params[1] = (1.0 - x).ln() - digamma(b) + dab;
                ratio(a - 1.0, x) - ratio(b - 1.0, 1.0 - x)
            }
            Family::Uniform => {
                let width = p[1] - p[0];
                d_params[0] = 1.0 / width;
                d_params[1] = -1.0 / width;
                0.0
            }
            Family::Binomial => {
                let (prob, n) = (p[0], p[1]);
                d_params[0] = ratio(x, prob) - ratio(n - x, 1.0 - prob);
                0.0
            }
            Family::Bernoulli => {
                let prob = p[0];
                d_params[0] = ratio(x, prob) - ratio(1.0 - x, 1.0 - prob);
                0.0
            }
            Family::Poisson => {
                d_params[0] = ratio(x, p[0]) - 1.0;
                0.0
            }
            Family::Custom(_) => unreachable!("handled above"),
        }
    }

    /// Draw from the family, used to seed initial values. `None` when the
    /// parameters are invalid or the family has no sampler.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, p: &[f64]) -> Option<f64> {
        let draw = match *self {
            Family::Normal => rand_distr::Normal::new(p[0], precision_to_sd(p[1])?)
                .ok()?
                .sample(rng),
            Family::LogNormal => rand_distr::LogNormal::new(p[0], precision_to_sd(p[1])?)
                .ok()?
                .sample(rng),
            Family::StudentT => {
                let t: f64 = rand_distr::StudentT::new(p[2]).ok()?.sample(rng);
                p[0] + t * precision_to_sd(p[1])?
            }
            Family::Logistic => {
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                p[0] + (u / (1.0 - u)).ln() / p[1]
            }
            Family::DoubleExponential => {
                let u: f64 = rng.gen_range(-0.5..0.5);
                p[0] - sign(u) * (1.0 - 2.0 * u.abs()).ln() / p[1]
            }
            Family::Gamma => rand_distr::Gamma::new(p[0], 1.0 / p[1]).ok()?.sample(rng),
            Family::Exponential => rand_distr::Exp::new(p[0]).ok()?.sample(rng),
            Family::Weibull => {
                let scale = p[1].powf(-1.0 / p[0]);
                rand_distr::Weibull::new(scale, p[0]).ok()?.sample(rng)
            }
            Family::Beta => rand_distr::Beta::new(p[0], p[1]).ok()?.sample(rng),
            Family::Uniform => {
                if !(p[0] < p[1]) {
                    return None;
                }
                rng.gen_range(p[0]..p[1])
            }
            Family::Binomial => {
                if !is_count(p[1]) {
                    return None;
                }
                rand_distr::Binomial::new(p[1] as u64, p[0]).ok()?.sample(rng) as f64
            }
            Family::Bernoulli => {
                let hit = rand_distr::Bernoulli::new(p[0]).ok()?.sample(rng);
                if hit {
                    1.0
                } else {
                    0.0
                }
            }
            Family::Poisson => rand_distr::Poisson::new(p[0]).ok()?.sample(rng),
            Family::Custom(_) => return None,
        };
        draw.is_finite().then_some(draw)
    }
}

/// A family together with resolved parameter values.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub family: Family,
    pub params: Vec<f64>,
}

impl Distribution {
    pub fn new(family: Family, params: Vec<f64>) -> Self {
        Self { family, params }
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        self.family.log_pdf(x, &self.params)
    }

    pub fn support(&self) -> Support {
        match self.family.support_kind() {
            SupportKind::Real => Support::Real,
            SupportKind::Positive => Support::Positive,
            SupportKind::UnitInterval => Support::Interval {
                lower: 0.0,
                upper: 1.0,
            },
            SupportKind::ParamInterval { lower, upper } => Support::Interval {
                lower: self.params[lower],
                upper: self.params[upper],
            },
            SupportKind::Discrete => Support::Discrete,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<f64> {
        self.family.sample(rng, &self.params)
    }
}

fn finite_diff_grad(f: LogPdfFn, x: f64, p: &[f64], d_params: &mut [f64]) -> f64 {
    let step = |v: f64| 1e-6 * v.abs().max(1.0);
    let mut scratch = p.to_vec();
    for i in 0..p.len() {
        let h = step(p[i]);
        scratch[i] = p[i] + h;
        let up = f(x, &scratch);
        scratch[i] = p[i] - h;
        let down = f(x, &scratch);
        scratch[i] = p[i];
        d_params[i] = (up - down) / (2.0 * h);
    }
    let h = step(x);
    (f(x + h, p) - f(x - h, p)) / (2.0 * h)
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// `a * ln(y)` with the convention `0 * ln(0) = 0`.
fn xlogy(a: f64, y: f64) -> f64 {
    if a == 0.0 {
        0.0
    } else {
        a * y.ln()
    }
}

/// `a / b` with `0 / 0 = 0`.
fn ratio(a: f64, b: f64) -> f64 {
    if a == 0.0 {
        0.0
    } else {
        a / b
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn is_count(v: f64) -> bool {
    v >= 0.0 && v.fract() == 0.0 && v.is_finite()
}

fn precision_to_sd(tau: f64) -> Option<f64> {
    (tau > 0.0).then(|| 1.0 / tau.sqrt())
}
