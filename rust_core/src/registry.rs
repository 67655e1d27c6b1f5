use crate::distributions::{CustomDistribution, Family, SupportKind, BUILTIN_FAMILIES};
use crate::error::{CompileError, CompileResult};
use crate::functions::{CustomFunction, Function, BUILTIN_FUNCTIONS};
use indexmap::IndexMap;

const PROBE_POINTS: [f64; 3] = [0.25, 0.75, 1.5];

#[derive(Debug, Clone)]
pub struct Registry {
    distributions: IndexMap<String, Family>,
    functions: IndexMap<String, Function>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl Registry {
    pub fn with_builtins() -> Self {
        Self {
            distributions: BUILTIN_FAMILIES
                .iter()
                .map(|(name, f)| (name.to_string(), *f))
                .collect(),
            functions: BUILTIN_FUNCTIONS
                .iter()
                .map(|(name, f)| (name.to_string(), *f))
                .collect(),
        }
    }

    pub fn distribution(&self, name: &str) -> Option<Family> {
        self.distributions.get(name).copied()
    }

    pub fn function(&self, name: &str) -> Option<Function> {
        self.functions.get(name).copied()
    }

    pub fn distribution_names(&self) -> impl Iterator<Item = &str> {
        self.distributions.keys().map(String::as_str)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn register_distribution(&mut self, name: &str, dist: CustomDistribution) -> CompileResult<()> {
        check_name(name, self.distributions.contains_key(name))?;
        if let SupportKind::ParamInterval { lower, upper } = dist.support {
            if lower >= dist.arity || upper >= dist.arity || lower == upper {
                return Err(CompileError::Registry(format!(
                    "`{name}`: interval support refers to parameters {lower} and {upper} of {}",
                    dist.arity
                )));
            }
        }
        let params = sample_args(dist.arity);
        for x in PROBE_POINTS {
            let first = (dist.log_pdf)(x, &params);
            let second = (dist.log_pdf)(x, &params);
            if first.to_bits() != second.to_bits() {
                return Err(impure(name));
            }
        }
        self.distributions.insert(name.to_string(), Family::Custom(dist));
        Ok(())
    }

    pub fn register_function(&mut self, name: &str, func: CustomFunction) -> CompileResult<()> {
        check_name(name, self.functions.contains_key(name))?;
        if func.arity == 0 {
            return Err(CompileError::Registry(format!("`{name}` must take at least one argument")));
        }
        for shift in PROBE_POINTS {
            let args: Vec<f64> = sample_args(func.arity).iter().map(|a| a + shift).collect();
            if (func.eval)(&args).to_bits() != (func.eval)(&args).to_bits() {
                return Err(impure(name));
            }
        }
        self.functions.insert(name.to_string(), Function::Custom(func));
        Ok(())
    }
}

fn check_name(name: &str, taken: bool) -> CompileResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return Err(CompileError::Registry(format!("invalid name `{name}`")));
    }
    if taken {
        return Err(CompileError::Registry(format!("`{name}` is already registered")));
    }
    Ok(())
}

fn sample_args(arity: usize) -> Vec<f64> {
    (0..arity).map(|i| 0.5 + i as f64).collect()
}

fn impure(name: &str) -> CompileError {
    CompileError::Registry(format!(
        "`{name}` returned different results for identical inputs; registered functions must be pure"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn flat(_x: f64, _p: &[f64]) -> f64 {
        0.0
    }

    fn twice(args: &[f64]) -> f64 {
        2.0 * args[0]
    }

    static CALLS: AtomicU64 = AtomicU64::new(0);

    fn counter(args: &[f64]) -> f64 {
        args[0] + CALLS.fetch_add(1, Ordering::SeqCst) as f64
    }

    #[test]
    fn test_builtins_present() {
        let reg = Registry::with_builtins();
        assert!(matches!(reg.distribution("dnorm"), Some(Family::Normal)));
        assert!(matches!(reg.function("inprod"), Some(Function::Inprod)));
        assert!(reg.distribution("dmnorm").is_none());
        assert!(reg.distribution_names().any(|n| n == "dbin"));
    }

    #[test]
    fn test_register_custom_entries() {
        let mut reg = Registry::with_builtins();
        reg.register_distribution(
            "dflat",
            CustomDistribution { arity: 0, support: SupportKind::Real, log_pdf: flat, grad: None },
        )
        .unwrap();
        reg.register_function("twice", CustomFunction { arity: 1, eval: twice, grad: None }).unwrap();
        assert!(matches!(reg.distribution("dflat"), Some(Family::Custom(_))));
        assert!(matches!(reg.function("twice"), Some(Function::Custom(_))));
    }

    #[test]
    fn test_registration_rejects_duplicates_and_bad_support() {
        let mut reg = Registry::with_builtins();
        let dup = reg.register_distribution(
            "dnorm",
            CustomDistribution { arity: 2, support: SupportKind::Real, log_pdf: flat, grad: None },
        );
        assert!(matches!(dup, Err(CompileError::Registry(_))));

        let bad = reg.register_distribution(
            "dbox",
            CustomDistribution {
                arity: 1,
                support: SupportKind::ParamInterval { lower: 0, upper: 1 },
                log_pdf: flat,
                grad: None,
            },
        );
        assert!(matches!(bad, Err(CompileError::Registry(_))));
    }

    #[test]
    fn test_registration_rejects_impure_function() {
        let mut reg = Registry::with_builtins();
        let err = reg
            .register_function("counter", CustomFunction { arity: 1, eval: counter, grad: None })
            .unwrap_err();
        assert!(err.to_string().contains("pure"));
        assert!(reg.function("counter").is_none());
    }
}
