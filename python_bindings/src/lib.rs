use ndarray::Array1;
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1, PyReadonlyArray2, PyReadonlyArrayDyn};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use rustbugs_core::{
    compile_with, Bindings, CompileOptions, CompiledModel, DataValue, InitStrategy, Model, Registry,
};
use std::fmt::Display;

fn value_error(e: impl Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Convert a `{name: float | list | ndarray}` dict into bindings. `nan`
/// entries mark missing values.
fn bindings_from_dict(dict: Option<&Bound<'_, PyDict>>) -> PyResult<Bindings> {
    let mut bindings = Bindings::new();
    let Some(dict) = dict else {
        return Ok(bindings);
    };
    for (key, value) in dict.iter() {
        let name: String = key.extract()?;
        let data = if let Ok(x) = value.extract::<f64>() {
            DataValue::Scalar(x)
        } else if let Ok(arr) = value.extract::<PyReadonlyArrayDyn<'_, f64>>() {
            DataValue::Array(arr.as_array().to_owned())
        } else if let Ok(list) = value.extract::<Vec<f64>>() {
            DataValue::Array(Array1::from_vec(list).into_dyn())
        } else {
            return Err(PyValueError::new_err(format!(
                "data for `{name}` must be a number, a list of numbers or a float64 array"
            )));
        };
        bindings.insert(&name, data);
    }
    Ok(bindings)
}

fn init_strategy(name: &str, radius: f64) -> PyResult<InitStrategy> {
    match name {
        "prior" => Ok(InitStrategy::Prior),
        "uniform" => Ok(InitStrategy::Uniform { radius }),
        "zero" => Ok(InitStrategy::Zero),
        other => Err(PyValueError::new_err(format!(
            "unknown init strategy `{other}` (expected prior, uniform or zero)"
        ))),
    }
}

/// A compiled model exposing the log-density over unconstrained parameters.
#[pyclass(name = "CompiledModel", frozen)]
struct PyCompiledModel {
    inner: CompiledModel,
}

#[pymethods]
impl PyCompiledModel {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn log_density(&self, theta: PyReadonlyArray1<'_, f64>) -> PyResult<f64> {
        self.inner.log_density(theta.as_slice()?).map_err(value_error)
    }

    fn log_density_and_gradient<'py>(
        &self,
        py: Python<'py>,
        theta: PyReadonlyArray1<'py, f64>,
    ) -> PyResult<(f64, Bound<'py, PyArray1<f64>>)> {
        let (lp, grad) = self
            .inner
            .log_density_and_gradient(theta.as_slice()?)
            .map_err(value_error)?;
        Ok((lp, PyArray1::from_vec(py, grad)))
    }

    /// Log-density of every row of a `(draws, dimension)` array, evaluated
    /// in parallel with the GIL released.
    fn log_density_batch<'py>(
        &self,
        py: Python<'py>,
        draws: PyReadonlyArray2<'py, f64>,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let rows: Vec<Vec<f64>> = draws.as_array().rows().into_iter().map(|r| r.to_vec()).collect();
        let model = &self.inner;
        let results = py.allow_threads(|| model.log_density_batch(&rows));
        let values = results.into_iter().collect::<Result<Vec<f64>, _>>().map_err(value_error)?;
        Ok(Array1::from_vec(values).into_pyarray(py))
    }

    fn initial_parameters<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        PyArray1::from_vec(py, self.inner.initial_parameters())
    }

    fn parameter_names(&self) -> Vec<String> {
        self.inner.parameter_names().iter().map(|v| v.to_string()).collect()
    }

    /// `{name: value}` for every parameter and deterministic node.
    fn transform_samples<'py>(
        &self,
        py: Python<'py>,
        theta: PyReadonlyArray1<'py, f64>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let samples = self.inner.transform_samples(theta.as_slice()?).map_err(value_error)?;
        let dict = PyDict::new(py);
        for (var, value) in samples {
            dict.set_item(var.to_string(), value)?;
        }
        Ok(dict)
    }

    fn warnings(&self) -> Vec<String> {
        self.inner.warnings().to_vec()
    }

    fn __repr__(&self) -> String {
        let names = self.parameter_names();
        format!(
            "rustbugs CompiledModel (dimension {})\n  parameters: {}",
            self.inner.dimension(),
            names.join(", ")
        )
    }
}

/// Compile a model from its JSON IR.
#[pyfunction]
#[pyo3(signature = (model_json, data=None, inits=None, seed=42, strict=false, init="prior", init_radius=2.0))]
#[allow(clippy::too_many_arguments)]
fn compile(
    py: Python<'_>,
    model_json: &str,
    data: Option<&Bound<'_, PyDict>>,
    inits: Option<&Bound<'_, PyDict>>,
    seed: u64,
    strict: bool,
    init: &str,
    init_radius: f64,
) -> PyResult<PyCompiledModel> {
    let model = Model::from_json(model_json).map_err(value_error)?;
    let data = bindings_from_dict(data)?;
    let inits = match inits {
        Some(d) => Some(bindings_from_dict(Some(d))?),
        None => None,
    };
    let options = CompileOptions {
        strict,
        init: init_strategy(init, init_radius)?,
        seed,
    };

    let inner = py
        .allow_threads(|| compile_with(&model, &data, inits.as_ref(), &Registry::with_builtins(), &options))
        .map_err(value_error)?;
    Ok(PyCompiledModel { inner })
}

#[pymodule]
fn rustbugs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyCompiledModel>()?;
    m.add_function(wrap_pyfunction!(compile, m)?)?;
    Ok(())
}
