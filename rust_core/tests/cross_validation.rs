use approx::assert_relative_eq;
use ndarray::arr2;
use rustbugs_core::ir::{Expr as E, Link, Statement as S, VarRef as V};
use rustbugs_core::{compile, Bindings, CompileError, Model, VarId};
use statrs::distribution::{Binomial, Continuous, Discrete, Normal, Uniform};

const N: [[u64; 3]; 2] = [[10, 12, 8], [9, 11, 10]];
const R: [[u64; 3]; 2] = [[3, 5, 2], [7, 6, 8]];

/// Hierarchical binomial model, 2 groups x 3 units:
///
/// ```text
/// mu ~ dnorm(0, 0.01)
/// sigma ~ dunif(0, 10)
/// tau <- 1 / pow(sigma, 2)
/// for (g in 1:2) {
///   theta[g] ~ dnorm(mu, tau)
///   for (j in 1:3) {
///     logit(p[g, j]) <- theta[g]
///     r[g, j] ~ dbin(p[g, j], n[g, j])
///   }
/// }
/// ```
fn hierarchical_binomial() -> (Model, Bindings) {
    let gj = || vec![E::var("g"), E::var("j")];
    let model = Model::new(vec![
        S::stochastic(V::scalar("mu"), "dnorm", vec![E::num(0.0), E::num(0.01)]),
        S::stochastic(V::scalar("sigma"), "dunif", vec![E::num(0.0), E::num(10.0)]),
        S::logical(
            V::scalar("tau"),
            E::div(E::num(1.0), E::call("pow", vec![E::var("sigma"), E::num(2.0)])),
        ),
        S::for_loop(
            "g",
            E::num(1.0),
            E::num(2.0),
            vec![
                S::stochastic(
                    V::indexed("theta", vec![E::var("g")]),
                    "dnorm",
                    vec![E::var("mu"), E::var("tau")],
                ),
                S::for_loop(
                    "j",
                    E::num(1.0),
                    E::num(3.0),
                    vec![
                        S::linked(Link::Logit, V::indexed("p", gj()), E::index("theta", vec![E::var("g")])),
                        S::stochastic(
                            V::indexed("r", gj()),
                            "dbin",
                            vec![E::index("p", gj()), E::index("n", gj())],
                        ),
                    ],
                ),
            ],
        ),
    ]);
    let to_f64 = |m: [[u64; 3]; 2]| arr2(&m.map(|row| row.map(|v| v as f64))).into_dyn();
    let data = Bindings::new().array("n", to_f64(N)).array("r", to_f64(R));
    (model, data)
}

fn sigmoid(y: f64) -> f64 {
    1.0 / (1.0 + (-y).exp())
}

/// The same model written directly, over `[mu, logit(sigma / 10), theta1, theta2]`.
fn reference_log_density(theta: &[f64]) -> f64 {
    let (mu, raw_sigma) = (theta[0], theta[1]);
    let s = sigmoid(raw_sigma);
    let sigma = 10.0 * s;
    let log_jacobian = (10.0 * s * (1.0 - s)).ln();

    let mut lp = Normal::new(0.0, 10.0).unwrap().ln_pdf(mu)
        + Uniform::new(0.0, 10.0).unwrap().ln_pdf(sigma)
        + log_jacobian;
    let group = Normal::new(mu, sigma).unwrap();
    for g in 0..2 {
        let th = theta[2 + g];
        lp += group.ln_pdf(th);
        for j in 0..3 {
            lp += Binomial::new(sigmoid(th), N[g][j]).unwrap().ln_pmf(R[g][j]);
        }
    }
    lp
}

fn reference_gradient(theta: &[f64]) -> Vec<f64> {
    let h = 1e-5;
    (0..theta.len())
        .map(|k| {
            let mut up = theta.to_vec();
            let mut down = theta.to_vec();
            up[k] += h;
            down[k] -= h;
            (reference_log_density(&up) - reference_log_density(&down)) / (2.0 * h)
        })
        .collect()
}

const POINTS: [[f64; 4]; 3] = [
    [0.1, -0.5, 0.3, -0.2],
    [-1.2, 0.4, -0.8, 0.9],
    [0.6, 1.3, 1.5, 0.05],
];

#[test]
fn test_parameter_layout() {
    let (model, data) = hierarchical_binomial();
    let compiled = compile(&model, &data, None).unwrap();
    assert_eq!(compiled.dimension(), 4);
    assert_eq!(
        compiled.parameter_names(),
        &[
            VarId::scalar("mu"),
            VarId::scalar("sigma"),
            VarId::new("theta", vec![1]),
            VarId::new("theta", vec![2]),
        ]
    );
    assert!(compiled.warnings().is_empty());
}

#[test]
fn test_log_density_matches_reference() {
    let (model, data) = hierarchical_binomial();
    let compiled = compile(&model, &data, None).unwrap();
    for theta in POINTS {
        let lp = compiled.log_density(&theta).unwrap();
        assert_relative_eq!(lp, reference_log_density(&theta), max_relative = 1e-6);
    }
}

#[test]
fn test_gradient_matches_reference() {
    let (model, data) = hierarchical_binomial();
    let compiled = compile(&model, &data, None).unwrap();
    for theta in POINTS {
        let (lp, grad) = compiled.log_density_and_gradient(&theta).unwrap();
        assert_relative_eq!(lp, reference_log_density(&theta), max_relative = 1e-6);
        for (analytic, numeric) in grad.iter().zip(reference_gradient(&theta)) {
            assert_relative_eq!(*analytic, numeric, epsilon = 1e-6, max_relative = 1e-6);
        }
    }
}

#[test]
fn test_identical_inits_give_identical_density() {
    let (model, data) = hierarchical_binomial();
    let inits = Bindings::new()
        .scalar("mu", 0.2)
        .scalar("sigma", 2.5)
        .vector("theta", vec![-0.4, 0.7]);
    let compiled = compile(&model, &data, Some(&inits)).unwrap();
    let theta = compiled.initial_parameters();

    let raw_sigma = (2.5_f64 / 7.5).ln();
    let expected = [0.2, raw_sigma, -0.4, 0.7];
    for (a, b) in theta.iter().zip(expected) {
        assert_relative_eq!(*a, b, epsilon = 1e-12);
    }
    assert_relative_eq!(
        compiled.log_density(&theta).unwrap(),
        reference_log_density(&expected),
        max_relative = 1e-6
    );

    let samples = compiled.transform_samples(&theta).unwrap();
    assert_relative_eq!(samples[&VarId::scalar("sigma")], 2.5, epsilon = 1e-12);
    assert_relative_eq!(samples[&VarId::new("p", vec![2, 3])], sigmoid(0.7), epsilon = 1e-12);
}

#[test]
fn test_evaluation_is_deterministic() {
    let (model, data) = hierarchical_binomial();
    let first = compile(&model, &data, None).unwrap();
    let second = compile(&model, &data, None).unwrap();
    assert_eq!(first.initial_parameters(), second.initial_parameters());
    assert_eq!(first.dimension(), second.dimension());
    for theta in POINTS {
        let a = first.log_density_and_gradient(&theta).unwrap();
        let b = first.log_density_and_gradient(&theta).unwrap();
        let c = second.log_density_and_gradient(&theta).unwrap();
        assert_eq!(a.0.to_bits(), b.0.to_bits());
        assert_eq!(a, c);
    }
}

#[test]
fn test_domain_error_gives_negative_infinity() {
    // x ~ dnorm(0, 1); m <- ifelse(step(x), x, log(x)); y ~ dnorm(m, 1)
    let model = Model::new(vec![
        S::stochastic(V::scalar("x"), "dnorm", vec![E::num(0.0), E::num(1.0)]),
        S::logical(
            V::scalar("m"),
            E::call(
                "ifelse",
                vec![
                    E::call("step", vec![E::var("x")]),
                    E::var("x"),
                    E::call("log", vec![E::var("x")]),
                ],
            ),
        ),
        S::stochastic(V::scalar("y"), "dnorm", vec![E::var("m"), E::num(1.0)]),
    ]);
    let data = Bindings::new().scalar("y", 0.5);
    let compiled = compile(&model, &data, None).unwrap();

    assert!(compiled.log_density(&[1.0]).unwrap().is_finite());
    assert_eq!(compiled.log_density(&[-1.0]).unwrap(), f64::NEG_INFINITY);
    let (lp, grad) = compiled.log_density_and_gradient(&[-1.0]).unwrap();
    assert_eq!(lp, f64::NEG_INFINITY);
    assert_eq!(grad, vec![0.0]);
    assert!(compiled.try_log_density(&[-1.0]).is_err());
}

#[test]
fn test_nan_swallowed_by_max_gives_negative_infinity() {
    // x ~ dnorm(0, 1); z <- max(log(x), 0); y ~ dnorm(z, 1)
    let model = Model::new(vec![
        S::stochastic(V::scalar("x"), "dnorm", vec![E::num(0.0), E::num(1.0)]),
        S::logical(
            V::scalar("z"),
            E::call("max", vec![E::call("log", vec![E::var("x")]), E::num(0.0)]),
        ),
        S::stochastic(V::scalar("y"), "dnorm", vec![E::var("z"), E::num(1.0)]),
    ]);
    let data = Bindings::new().scalar("y", 0.5);
    let compiled = compile(&model, &data, None).unwrap();

    assert!(compiled.log_density(&[2.0]).unwrap().is_finite());
    assert_eq!(compiled.log_density(&[-1.0]).unwrap(), f64::NEG_INFINITY);
    assert!(compiled.try_log_density(&[-1.0]).is_err());
}

#[test]
fn test_nan_in_unscored_deterministic_node_gives_negative_infinity() {
    // x ~ dnorm(0, 1); z <- log(x)
    let model = Model::new(vec![
        S::stochastic(V::scalar("x"), "dnorm", vec![E::num(0.0), E::num(1.0)]),
        S::logical(V::scalar("z"), E::call("log", vec![E::var("x")])),
    ]);
    let compiled = compile(&model, &Bindings::new(), None).unwrap();

    let expected = Normal::new(0.0, 1.0).unwrap().ln_pdf(1.0);
    assert_relative_eq!(compiled.log_density(&[1.0]).unwrap(), expected, max_relative = 1e-12);
    assert_eq!(compiled.log_density(&[-1.0]).unwrap(), f64::NEG_INFINITY);
    let (lp, grad) = compiled.log_density_and_gradient(&[-1.0]).unwrap();
    assert_eq!(lp, f64::NEG_INFINITY);
    assert_eq!(grad, vec![0.0]);
}

#[test]
fn test_mutual_dependency_is_rejected() {
    let model = Model::new(vec![
        S::logical(V::scalar("a"), E::add(E::var("b"), E::num(1.0))),
        S::logical(V::scalar("b"), E::mul(E::var("a"), E::num(2.0))),
    ]);
    match compile(&model, &Bindings::new(), None) {
        Err(CompileError::CyclicDependency { path }) => assert_eq!(path, vec!["a", "b", "a"]),
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn test_partially_observed_array() {
    let model = Model::new(vec![
        S::stochastic(V::scalar("mu"), "dnorm", vec![E::num(0.0), E::num(1.0)]),
        S::for_loop(
            "i",
            E::num(1.0),
            E::num(3.0),
            vec![S::stochastic(
                V::indexed("y", vec![E::var("i")]),
                "dnorm",
                vec![E::var("mu"), E::num(1.0)],
            )],
        ),
    ]);
    let data = Bindings::new().vector("y", vec![1.0, f64::NAN, 2.0]);
    let compiled = compile(&model, &data, None).unwrap();
    assert_eq!(
        compiled.parameter_names(),
        &[VarId::scalar("mu"), VarId::new("y", vec![2])]
    );

    let std = Normal::new(0.0, 1.0).unwrap();
    let theta = [0.4, 1.7];
    let expected = std.ln_pdf(0.4)
        + Normal::new(0.4, 1.0).unwrap().ln_pdf(1.0)
        + Normal::new(0.4, 1.0).unwrap().ln_pdf(1.7)
        + Normal::new(0.4, 1.0).unwrap().ln_pdf(2.0);
    assert_relative_eq!(compiled.log_density(&theta).unwrap(), expected, max_relative = 1e-12);
}

#[test]
fn test_json_documents_compile() {
    let model = Model::from_json(
        r#"{
            "statements": [
                { "kind": "stochastic", "lhs": { "name": "lambda" }, "dist": "dgamma",
                  "args": [ { "type": "number", "value": 2.0 }, { "type": "number", "value": 1.0 } ] },
                { "kind": "for", "var": "i",
                  "lo": { "type": "number", "value": 1.0 },
                  "hi": { "type": "var", "name": "N" },
                  "body": [
                    { "kind": "stochastic",
                      "lhs": { "name": "k", "indices": [ { "at": { "type": "var", "name": "i" } } ] },
                      "dist": "dpois",
                      "args": [ { "type": "var", "name": "lambda" } ] } ] }
            ]
        }"#,
    )
    .unwrap();
    let data = Bindings::from_json(r#"{ "N": 3, "k": [1, 4, 2] }"#).unwrap();
    let compiled = compile(&model, &data, None).unwrap();
    assert_eq!(compiled.dimension(), 1);

    // lambda = exp(0) = 1: Gamma(2, 1) prior, Jacobian 0, three Poisson(1) terms.
    let expected = (-1.0f64) + [1.0f64, 4.0, 2.0].iter().map(|k| -1.0 - statrs::function::gamma::ln_gamma(k + 1.0)).sum::<f64>();
    assert_relative_eq!(compiled.log_density(&[0.0]).unwrap(), expected, max_relative = 1e-10);
}
