//! Python bindings
//!
//! Parameter sets cross the boundary as `dict`s of numpy arrays keyed by
//! parameter name (`xcab`, `xlai`, ... for internal values). Surrogates are
//! arbitrary Python objects with a `predict(inputs)` method returning
//! `(mean, variance, gradient)`. Canopy simulators are Python callables
//! taking the flat argument list of
//! [`CanopyState::call_arguments`](crate::forward::CanopyState::call_arguments) and
//! returning a spectrum.

use crate::errors::{RSAILError, RSAILResult};
use crate::forward::{self, Angles, Bandpass, FnSimulator, ForwardRun, Geometry, LutConfig};
use crate::interpolate;
use crate::parameters::{FloatValue, Internal, ParameterSet, Physical, Space};
use crate::reconstruct::{self, Prediction, SpectralBasis, Surrogate};
use crate::sampler;
use crate::transform::{self, ScalingTable};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTuple};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

impl From<RSAILError> for PyErr {
    fn from(err: RSAILError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn values_from_py(value: &Bound<'_, PyAny>) -> PyResult<Array1<FloatValue>> {
    if let Ok(array) = value.extract::<PyReadonlyArray1<FloatValue>>() {
        return Ok(array.as_array().to_owned());
    }
    if let Ok(scalar) = value.extract::<FloatValue>() {
        return Ok(Array1::from_elem(1, scalar));
    }
    let values: Vec<FloatValue> = value.extract()?;
    Ok(Array1::from(values))
}

fn named_from_dict(dict: &Bound<'_, PyDict>) -> PyResult<Vec<(String, Array1<FloatValue>)>> {
    let mut entries = Vec::with_capacity(dict.len());
    for (key, value) in dict.iter() {
        let name: String = key.extract()?;
        entries.push((name, values_from_py(&value)?));
    }
    Ok(entries)
}

fn named_to_dict<'py, K: ToPyObject>(
    py: Python<'py>,
    entries: Vec<(K, Array1<FloatValue>)>,
) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    for (name, values) in entries {
        dict.set_item(name, values.into_pyarray_bound(py))?;
    }
    Ok(dict)
}

fn set_from_dict<S: Space>(dict: &Bound<'_, PyDict>) -> PyResult<ParameterSet<S>> {
    Ok(ParameterSet::from_named(named_from_dict(dict)?)?)
}

fn set_to_dict<'py, S: Space>(
    py: Python<'py>,
    set: &ParameterSet<S>,
) -> PyResult<Bound<'py, PyDict>> {
    named_to_dict(py, set.to_named())
}

fn angles_from_py(value: &Bound<'_, PyAny>) -> PyResult<Angles> {
    if let Ok(scalar) = value.extract::<FloatValue>() {
        return Ok(Angles::Scalar(scalar));
    }
    Ok(Angles::PerSample(values_from_py(value)?.to_vec()))
}

fn angles_to_py(py: Python<'_>, angles: &Angles) -> PyObject {
    match angles {
        Angles::Scalar(value) => value.to_object(py),
        Angles::PerSample(values) => values.to_pyarray_bound(py).into_py(py),
    }
}

type PyForwardRun<'py> = (
    (PyObject, PyObject, PyObject),
    Bound<'py, PyDict>,
    Bound<'py, PyArray2<FloatValue>>,
    Bound<'py, PyArray1<FloatValue>>,
);

/// `((vza, sza, raa), state, reflectance, wavelengths)`
fn forward_run_to_py(py: Python<'_>, run: ForwardRun) -> PyResult<PyForwardRun<'_>> {
    let geometry = (
        angles_to_py(py, &run.geometry.vza),
        angles_to_py(py, &run.geometry.sza),
        angles_to_py(py, &run.geometry.raa),
    );
    Ok((
        geometry,
        set_to_dict(py, &run.state)?,
        run.reflectance.into_pyarray_bound(py),
        run.wavelengths.into_pyarray_bound(py),
    ))
}

/// Call a Python canopy simulator with the flat argument list
///
/// Runs on rayon worker threads, so the GIL is taken per call.
fn call_simulator(
    simulator: &Py<PyAny>,
    arguments: &[FloatValue],
) -> RSAILResult<Array1<FloatValue>> {
    Python::with_gil(|py| {
        let arguments = PyTuple::new_bound(py, arguments.iter().copied());
        let spectrum = simulator.bind(py).call1(arguments)?;
        values_from_py(&spectrum)
    })
    .map_err(|e| RSAILError::Simulator(e.to_string()))
}

fn scaling_table(scaling: Option<&Bound<'_, PyAny>>, total: bool) -> PyResult<ScalingTable> {
    let table = match scaling {
        Some(scaling) => pythonize::depythonize_bound::<ScalingTable>(scaling.clone())?,
        None => ScalingTable::default(),
    };
    Ok(table.scaled(total))
}

/// Accept a single point or a `[n_samples, n_params]` matrix
fn inputs_2d(inputs: &Bound<'_, PyAny>) -> PyResult<Array2<FloatValue>> {
    if let Ok(matrix) = inputs.extract::<PyReadonlyArray2<FloatValue>>() {
        return Ok(matrix.as_array().to_owned());
    }
    Ok(values_from_py(inputs)?.insert_axis(Axis(0)))
}

/// A Python object with a `predict` method
struct PySurrogate<'py>(Bound<'py, PyAny>);

impl Surrogate for PySurrogate<'_> {
    fn predict(&self, inputs: ArrayView2<FloatValue>) -> RSAILResult<Prediction> {
        let py = self.0.py();
        let surrogate_err = |e: PyErr| RSAILError::Surrogate(e.to_string());

        let result = self
            .0
            .call_method1("predict", (inputs.to_pyarray_bound(py),))
            .map_err(surrogate_err)?;
        let (mean, variance, gradient): (
            PyReadonlyArray1<FloatValue>,
            PyReadonlyArray1<FloatValue>,
            PyReadonlyArray2<FloatValue>,
        ) = result.extract().map_err(surrogate_err)?;

        Ok(Prediction {
            mean: mean.as_array().to_owned(),
            variance: variance.as_array().to_owned(),
            gradient: gradient.as_array().to_owned(),
        })
    }
}

/// Transform physical parameters into internal space.
///
/// Keys that are not physical parameter names are copied unchanged. Constants
/// missing from a given `scaling` table leave their parameter untransformed.
///
/// Example:
///     transform({"cab": 40.0, "lai": 2.0})  # {"xcab": [...], "xlai": [...]}
#[pyfunction]
#[pyo3(name = "transform", signature = (params, total=false, scaling=None))]
fn py_transform<'py>(
    py: Python<'py>,
    params: &Bound<'py, PyDict>,
    total: bool,
    scaling: Option<&Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyDict>> {
    let table = scaling_table(scaling, total)?;
    named_to_dict(py, transform::transform_named(named_from_dict(params)?, &table))
}

/// Transform internal parameters back into physical space.
#[pyfunction]
#[pyo3(name = "inverse_transform", signature = (params, total=false, scaling=None))]
fn py_inverse_transform<'py>(
    py: Python<'py>,
    params: &Bound<'py, PyDict>,
    total: bool,
    scaling: Option<&Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyDict>> {
    let table = scaling_table(scaling, total)?;
    named_to_dict(
        py,
        transform::inverse_transform_named(named_from_dict(params)?, &table),
    )
}

/// Scale constants used for the given mode, as a dict.
#[pyfunction]
#[pyo3(signature = (total=false))]
fn scaling_constants(py: Python<'_>, total: bool) -> PyResult<PyObject> {
    Ok(pythonize::pythonize(py, &ScalingTable::for_mode(total))?)
}

/// Internal space bounds as a `(pmin, pmax)` pair of dicts.
#[pyfunction]
#[pyo3(name = "limits", signature = (total=false))]
fn py_limits(py: Python<'_>, total: bool) -> PyResult<(Bound<'_, PyDict>, Bound<'_, PyDict>)> {
    let bounds = transform::limits(total);
    Ok((
        set_to_dict(py, &bounds.lower())?,
        set_to_dict(py, &bounds.upper())?,
    ))
}

/// Draw `n` random physical parameter sets.
#[pyfunction]
#[pyo3(name = "samples", signature = (n=2, seed=None))]
fn py_samples(py: Python<'_>, n: usize, seed: Option<u64>) -> PyResult<Bound<'_, PyDict>> {
    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    set_to_dict(py, &sampler::samples(n, &mut rng))
}

/// Interpolate over non-finite values in each row of a 2-D array.
#[pyfunction]
#[pyo3(name = "fix_nan")]
fn py_fix_nan<'py>(
    py: Python<'py>,
    x: PyReadonlyArray2<'py, FloatValue>,
) -> Bound<'py, PyArray2<FloatValue>> {
    interpolate::fix_nan(x.as_array().to_owned()).into_pyarray_bound(py)
}

/// Reconstruct spectra from per-band surrogates and a spectral basis.
#[pyfunction]
#[pyo3(name = "reconstruct")]
fn py_reconstruct<'py>(
    py: Python<'py>,
    gps: Vec<Bound<'py, PyAny>>,
    basis: PyReadonlyArray2<'py, FloatValue>,
    inputs: &Bound<'py, PyAny>,
) -> PyResult<Bound<'py, PyArray2<FloatValue>>> {
    let surrogates: Vec<PySurrogate<'py>> = gps.into_iter().map(PySurrogate).collect();
    let basis = SpectralBasis::new(basis.as_array().to_owned());
    let inputs = inputs_2d(inputs)?;
    let spectra = reconstruct::reconstruct(&surrogates, &basis, inputs.view())?;
    Ok(spectra.into_pyarray_bound(py))
}

/// Reconstruct the first spectrum and its derivative with respect to the inputs.
#[pyfunction]
#[pyo3(name = "reconstruct_with_gradient")]
fn py_reconstruct_with_gradient<'py>(
    py: Python<'py>,
    gps: Vec<Bound<'py, PyAny>>,
    basis: PyReadonlyArray2<'py, FloatValue>,
    inputs: &Bound<'py, PyAny>,
) -> PyResult<(Bound<'py, PyArray1<FloatValue>>, Bound<'py, PyArray2<FloatValue>>)> {
    let surrogates: Vec<PySurrogate<'py>> = gps.into_iter().map(PySurrogate).collect();
    let basis = SpectralBasis::new(basis.as_array().to_owned());
    let inputs = inputs_2d(inputs)?;
    let (spectrum, gradient) =
        reconstruct::reconstruct_with_gradient(&surrogates, &basis, inputs.view())?;
    Ok((
        spectrum.into_pyarray_bound(py),
        gradient.into_pyarray_bound(py),
    ))
}

/// Flatten an internal parameter dict into `(inputs, keys)`, keys sorted.
#[pyfunction]
#[pyo3(name = "unpack")]
fn py_unpack<'py>(
    py: Python<'py>,
    params: &Bound<'py, PyDict>,
) -> PyResult<(Bound<'py, PyArray2<FloatValue>>, Vec<&'static str>)> {
    let (inputs, keys) = set_from_dict::<Internal>(params)?.unpack()?;
    Ok((inputs.into_pyarray_bound(py), keys))
}

/// Inverse of `unpack`: one column of `inputs` per key.
#[pyfunction]
#[pyo3(name = "pack")]
fn py_pack<'py>(
    py: Python<'py>,
    inputs: PyReadonlyArray2<'py, FloatValue>,
    keys: Vec<String>,
) -> PyResult<Bound<'py, PyDict>> {
    let params = ParameterSet::<Internal>::pack(inputs.as_array(), keys.as_slice())?;
    set_to_dict(py, &params)
}

/// Run `simulator` for every sample of a physical `state` dict.
///
/// Angles are scalars or one value per sample. Returns
/// `((vza, sza, raa), internal_state, reflectance, wavelengths)`.
#[pyfunction]
#[pyo3(name = "run_forward", signature = (state, vza, sza, raa, simulator, bandpass=None))]
fn py_run_forward<'py>(
    py: Python<'py>,
    state: &Bound<'py, PyDict>,
    vza: &Bound<'py, PyAny>,
    sza: &Bound<'py, PyAny>,
    raa: &Bound<'py, PyAny>,
    simulator: &Bound<'py, PyAny>,
    bandpass: Option<PyReadonlyArray2<'py, FloatValue>>,
) -> PyResult<PyForwardRun<'py>> {
    let state = set_from_dict::<Physical>(state)?;
    let geometry = Geometry::new(
        angles_from_py(vza)?,
        angles_from_py(sza)?,
        angles_from_py(raa)?,
    );
    let bandpass = bandpass
        .map(|b| Bandpass::new(b.as_array().to_owned()))
        .transpose()?;
    let callable = simulator.clone().unbind();
    let simulator = FnSimulator(move |args: &[FloatValue]| call_simulator(&callable, args));

    let run = py.allow_threads(|| {
        forward::run_forward(&state, geometry, &simulator, bandpass.as_ref())
    })?;
    forward_run_to_py(py, run)
}

/// Simulate a random look-up table.
///
/// `config` is a dict with any of `n_samples`, `vza`, `sza`, `raa` and `seed`.
/// Angles are floats or lists with one value per sample.
#[pyfunction]
#[pyo3(name = "lut", signature = (simulator, config=None))]
fn py_lut<'py>(
    py: Python<'py>,
    simulator: &Bound<'py, PyAny>,
    config: Option<&Bound<'py, PyAny>>,
) -> PyResult<PyForwardRun<'py>> {
    let config = match config {
        Some(config) => pythonize::depythonize_bound::<LutConfig>(config.clone())?,
        None => LutConfig::default(),
    };
    let callable = simulator.clone().unbind();
    let simulator = FnSimulator(move |args: &[FloatValue]| call_simulator(&callable, args));

    let run = py.allow_threads(|| forward::generate_lut(&config, &simulator))?;
    forward_run_to_py(py, run)
}

#[pymodule]
pub fn core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(py_transform, m)?)?;
    m.add_function(wrap_pyfunction!(py_inverse_transform, m)?)?;
    m.add_function(wrap_pyfunction!(scaling_constants, m)?)?;
    m.add_function(wrap_pyfunction!(py_limits, m)?)?;
    m.add_function(wrap_pyfunction!(py_samples, m)?)?;
    m.add_function(wrap_pyfunction!(py_fix_nan, m)?)?;
    m.add_function(wrap_pyfunction!(py_reconstruct, m)?)?;
    m.add_function(wrap_pyfunction!(py_reconstruct_with_gradient, m)?)?;
    m.add_function(wrap_pyfunction!(py_unpack, m)?)?;
    m.add_function(wrap_pyfunction!(py_pack, m)?)?;
    m.add_function(wrap_pyfunction!(py_run_forward, m)?)?;
    m.add_function(wrap_pyfunction!(py_lut, m)?)?;
    Ok(())
}
