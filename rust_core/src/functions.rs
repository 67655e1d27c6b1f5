use crate::transforms::sigmoid;
use statrs::function::erf::{erf_inv, erfc};
use statrs::function::gamma::{digamma, ln_gamma};
use std::f64::consts::{PI, SQRT_2};

/// User scalar function: `args -> value`.
pub type ScalarFn = fn(&[f64]) -> f64;

/// Gradient of a user scalar function, written into the output slice.
pub type ScalarGradFn = fn(&[f64], &mut [f64]);

#[derive(Debug, Clone, Copy)]
pub struct CustomFunction {
    pub arity: usize,
    pub eval: ScalarFn,
    /// Falls back to central finite differences when absent.
    pub grad: Option<ScalarGradFn>,
}

impl CustomFunction {
    pub fn gradient(&self, args: &[f64], out: &mut [f64]) {
        if let Some(g) = self.grad {
            g(args, out);
            return;
        }
        let mut scratch = args.to_vec();
        for i in 0..args.len() {
            let h = 1e-6 * args[i].abs().max(1.0);
            scratch[i] = args[i] + h;
            let up = (self.eval)(&scratch);
            scratch[i] = args[i] - h;
            let down = (self.eval)(&scratch);
            scratch[i] = args[i];
            out[i] = (up - down) / (2.0 * h);
        }
    }
}

/// Elementwise functions of one argument, evaluated directly by the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    Sqrt,
    Abs,
    Logit,
    /// Inverse logit, `ilogit`.
    Logistic,
    /// Standard normal CDF.
    Phi,
    /// Inverse standard normal CDF.
    Probit,
    Cloglog,
    InvCloglog,
    Sin,
    Cos,
    LogGamma,
    /// `1` when `x >= 0`, else `0`.
    Step,
}

impl UnaryFn {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            UnaryFn::Sqrt => x.sqrt(),
            UnaryFn::Abs => x.abs(),
            UnaryFn::Logit => (x / (1.0 - x)).ln(),
            UnaryFn::Logistic => sigmoid(x),
            UnaryFn::Phi => 0.5 * erfc(-x / SQRT_2),
            UnaryFn::Probit => {
                if (0.0..=1.0).contains(&x) {
                    SQRT_2 * erf_inv(2.0 * x - 1.0)
                } else {
                    f64::NAN
                }
            }
            UnaryFn::Cloglog => (-(-x).ln_1p()).ln(),
            UnaryFn::InvCloglog => -(-x.exp()).exp_m1(),
            UnaryFn::Sin => x.sin(),
            UnaryFn::Cos => x.cos(),
            UnaryFn::LogGamma => {
                if x > 0.0 {
                    ln_gamma(x)
                } else {
                    f64::NAN
                }
            }
            UnaryFn::Step => {
                if x >= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// `d apply(x) / dx`, given the already computed output `y`.
    pub fn derivative(&self, x: f64, y: f64) -> f64 {
        match self {
            UnaryFn::Sqrt => 0.5 / y,
            UnaryFn::Abs => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            UnaryFn::Logit => 1.0 / (x * (1.0 - x)),
            UnaryFn::Logistic => y * (1.0 - y),
            UnaryFn::Phi => std_normal_pdf(x),
            UnaryFn::Probit => 1.0 / std_normal_pdf(y),
            UnaryFn::Cloglog => -1.0 / ((1.0 - x) * (-x).ln_1p()),
            UnaryFn::InvCloglog => (x - x.exp()).exp(),
            UnaryFn::Sin => x.cos(),
            UnaryFn::Cos => -x.sin(),
            UnaryFn::LogGamma => digamma(x),
            UnaryFn::Step => 0.0,
        }
    }
}

fn std_normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// How many arguments a function takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Any number of scalars or slices, at least one element overall.
    Variadic,
}

#[derive(Debug, Clone, Copy)]
pub enum Function {
    Exp,
    Log,
    Pow,
    Min,
    Max,
    /// `1` when both arguments are equal, else `0`.
    Equals,
    /// `ifelse(cond, a, b)`: `a` when `cond != 0`.
    IfElse,
    Sum,
    Mean,
    /// Inner product of two equally sized slices.
    Inprod,
    Unary(UnaryFn),
    Custom(CustomFunction),
}

impl Function {
    pub fn arity(&self) -> Arity {
        match self {
            Function::Exp | Function::Log | Function::Unary(_) => Arity::Exact(1),
            Function::Pow | Function::Min | Function::Max | Function::Equals | Function::Inprod => {
                Arity::Exact(2)
            }
            Function::IfElse => Arity::Exact(3),
            Function::Sum | Function::Mean => Arity::Variadic,
            Function::Custom(c) => Arity::Exact(c.arity),
        }
    }

    /// Whether the function accepts slice (vector) arguments.
    pub fn takes_slices(&self) -> bool {
        matches!(self, Function::Sum | Function::Mean | Function::Inprod)
    }
}

/// Built-in functions under their BUGS names.
pub const BUILTIN_FUNCTIONS: &[(&str, Function)] = &[
    ("exp", Function::Exp),
    ("log", Function::Log),
    ("pow", Function::Pow),
    ("sqrt", Function::Unary(UnaryFn::Sqrt)),
    ("abs", Function::Unary(UnaryFn::Abs)),
    ("logit", Function::Unary(UnaryFn::Logit)),
    ("ilogit", Function::Unary(UnaryFn::Logistic)),
    ("phi", Function::Unary(UnaryFn::Phi)),
    ("probit", Function::Unary(UnaryFn::Probit)),
    ("cloglog", Function::Unary(UnaryFn::Cloglog)),
    ("icloglog", Function::Unary(UnaryFn::InvCloglog)),
    ("sin", Function::Unary(UnaryFn::Sin)),
    ("cos", Function::Unary(UnaryFn::Cos)),
    ("loggam", Function::Unary(UnaryFn::LogGamma)),
    ("step", Function::Unary(UnaryFn::Step)),
    ("equals", Function::Equals),
    ("min", Function::Min),
    ("max", Function::Max),
    ("ifelse", Function::IfElse),
    ("sum", Function::Sum),
    ("mean", Function::Mean),
    ("inprod", Function::Inprod),
];

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unary_derivatives_match_finite_differences() {
        let cases = [
            (UnaryFn::Sqrt, 2.0),
            (UnaryFn::Abs, -1.5),
            (UnaryFn::Logit, 0.3),
            (UnaryFn::Logistic, 0.4),
            (UnaryFn::Phi, -0.7),
            (UnaryFn::Probit, 0.8),
            (UnaryFn::Cloglog, 0.6),
            (UnaryFn::InvCloglog, 0.2),
            (UnaryFn::Sin, 1.1),
            (UnaryFn::Cos, 1.1),
            (UnaryFn::LogGamma, 3.5),
            (UnaryFn::Step, 0.5),
        ];
        let h = 1e-6;
        for (f, x) in cases {
            let numeric = (f.apply(x + h) - f.apply(x - h)) / (2.0 * h);
            assert_relative_eq!(f.derivative(x, f.apply(x)), numeric, epsilon = 1e-6, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_link_pairs_invert() {
        for x in [0.05, 0.3, 0.5, 0.9] {
            assert_relative_eq!(UnaryFn::Logistic.apply(UnaryFn::Logit.apply(x)), x, epsilon = 1e-12);
            assert_relative_eq!(UnaryFn::Phi.apply(UnaryFn::Probit.apply(x)), x, epsilon = 1e-9);
            assert_relative_eq!(UnaryFn::InvCloglog.apply(UnaryFn::Cloglog.apply(x)), x, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_domain_violations_are_nan() {
        assert!(UnaryFn::Sqrt.apply(-1.0).is_nan());
        assert!(UnaryFn::Probit.apply(1.5).is_nan());
        assert!(UnaryFn::LogGamma.apply(-2.0).is_nan());
    }

    #[test]
    fn test_custom_function_numeric_gradient() {
        fn hypot(args: &[f64]) -> f64 {
            (args[0] * args[0] + args[1] * args[1]).sqrt()
        }
        let f = CustomFunction { arity: 2, eval: hypot, grad: None };
        let mut g = [0.0; 2];
        f.gradient(&[3.0, 4.0], &mut g);
        assert_relative_eq!(g[0], 0.6, epsilon = 1e-7);
        assert_relative_eq!(g[1], 0.8, epsilon = 1e-7);
    }

    #[test]
    fn test_arity_table() {
        assert_eq!(Function::IfElse.arity(), Arity::Exact(3));
        assert_eq!(Function::Sum.arity(), Arity::Variadic);
        assert!(Function::Inprod.takes_slices());
        assert!(!Function::Pow.takes_slices());
    }
}
