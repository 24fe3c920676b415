//! Canopy parameter vocabulary and typed parameter sets
//!
//! The canopy reflectance model is driven by eleven parameters. Six of them
//! (`cab`, `car`, `cw`, `cm`, `ala`, `lai`) are rescaled into a bounded
//! internal representation before sampling or optimisation. In string form
//! the internal names carry an `x` prefix (`xcab`, `xlai`, ...), the other
//! five keep their bare name in both representations.
//!
//! [`ParameterSet`] is tagged with the space it lives in ([`Physical`] or
//! [`Internal`]) so the two representations can not be mixed by accident.
//!
//! ```rust
//! use rsail_core::parameters::{Parameter, ParameterSet, Physical};
//!
//! let params = ParameterSet::<Physical>::new()
//!     .with(Parameter::Cab, 40.0)
//!     .with(Parameter::Lai, 2.0);
//! assert_eq!(params.scalar(Parameter::Cab), Some(40.0));
//! assert_eq!(params.n_samples().unwrap(), 1);
//! ```

use crate::errors::{RSAILError, RSAILResult};
use log::trace;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

pub type FloatValue = f64;

/// Number of parameters understood by the canopy model
pub const N_PARAMETERS: usize = 11;

/// Canopy model parameter
///
/// The discriminants define the canonical order, which is also the order
/// in which bounds are defined and random draws are made.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    /// Leaf structure coefficient
    N = 0,
    /// Chlorophyll a+b content (µg/cm²)
    Cab = 1,
    /// Carotenoid content (µg/cm²)
    Car = 2,
    /// Brown pigment fraction
    Cbrown = 3,
    /// Equivalent water thickness (cm)
    Cw = 4,
    /// Dry matter content (g/cm²)
    Cm = 5,
    /// Average leaf angle (degrees)
    Ala = 6,
    /// Soil brightness
    Bsoil = 7,
    /// Soil wetness
    Psoil = 8,
    /// Hotspot size parameter
    Hspot = 9,
    /// Leaf area index
    Lai = 10,
}

impl Parameter {
    pub const ALL: [Parameter; N_PARAMETERS] = [
        Parameter::N,
        Parameter::Cab,
        Parameter::Car,
        Parameter::Cbrown,
        Parameter::Cw,
        Parameter::Cm,
        Parameter::Ala,
        Parameter::Bsoil,
        Parameter::Psoil,
        Parameter::Hspot,
        Parameter::Lai,
    ];

    /// Parameters that have a distinct internal representation
    pub const TRANSFORMED: [Parameter; 6] = [
        Parameter::Cab,
        Parameter::Car,
        Parameter::Cw,
        Parameter::Cm,
        Parameter::Ala,
        Parameter::Lai,
    ];

    /// Physical (bare) name
    pub fn name(self) -> &'static str {
        match self {
            Parameter::N => "n",
            Parameter::Cab => "cab",
            Parameter::Car => "car",
            Parameter::Cbrown => "cbrown",
            Parameter::Cw => "cw",
            Parameter::Cm => "cm",
            Parameter::Ala => "ala",
            Parameter::Bsoil => "bsoil",
            Parameter::Psoil => "psoil",
            Parameter::Hspot => "hspot",
            Parameter::Lai => "lai",
        }
    }

    /// Internal name, `x`-prefixed for transformed parameters
    pub fn internal_name(self) -> &'static str {
        match self {
            Parameter::Cab => "xcab",
            Parameter::Car => "xcar",
            Parameter::Cw => "xcw",
            Parameter::Cm => "xcm",
            Parameter::Ala => "xala",
            Parameter::Lai => "xlai",
            other => other.name(),
        }
    }

    pub fn is_transformed(self) -> bool {
        Parameter::TRANSFORMED.contains(&self)
    }

    /// Look up a parameter by either its physical or its internal name
    pub fn from_name(name: &str) -> RSAILResult<Self> {
        Parameter::ALL
            .iter()
            .copied()
            .find(|p| p.name() == name || p.internal_name() == name)
            .ok_or_else(|| RSAILError::UnknownParameter(name.to_string()))
    }
}

impl From<Parameter> for usize {
    fn from(p: Parameter) -> usize {
        p as usize
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker for the space a [`ParameterSet`] lives in
pub trait Space: Copy + Clone + fmt::Debug + Default + PartialEq + Send + Sync + 'static {
    /// Human readable name of the space
    const NAME: &'static str;

    /// String key used for `parameter` in this space
    fn key(parameter: Parameter) -> &'static str;

    /// Whether `name` is an acceptable spelling of a parameter in this space
    fn accepts(name: &str, parameter: Parameter) -> bool;
}

/// Biophysical units
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Physical;

/// Bounded/rescaled representation used for sampling and optimisation
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Internal;

impl Space for Physical {
    const NAME: &'static str = "physical";

    fn key(parameter: Parameter) -> &'static str {
        parameter.name()
    }

    fn accepts(name: &str, parameter: Parameter) -> bool {
        name == parameter.name()
    }
}

impl Space for Internal {
    const NAME: &'static str = "internal";

    fn key(parameter: Parameter) -> &'static str {
        parameter.internal_name()
    }

    // Bare names are promoted to their internal spelling
    fn accepts(name: &str, parameter: Parameter) -> bool {
        name == parameter.internal_name() || name == parameter.name()
    }
}

/// A (possibly partial, possibly batched) set of canopy parameters
///
/// Each present parameter holds a 1-D array of values. A scalar is stored as
/// an array of length one. A batch is a set where all present parameters
/// share the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet<S: Space> {
    values: [Option<Array1<FloatValue>>; N_PARAMETERS],
    space: PhantomData<S>,
}

impl<S: Space> Default for ParameterSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Space> ParameterSet<S> {
    pub fn new() -> Self {
        Self {
            values: std::array::from_fn(|_| None),
            space: PhantomData,
        }
    }

    /// Builder style setter for a single scalar value
    pub fn with(mut self, parameter: Parameter, value: FloatValue) -> Self {
        self.set(parameter, Array1::from_elem(1, value));
        self
    }

    /// Builder style setter for an array of values
    pub fn with_values(mut self, parameter: Parameter, values: Array1<FloatValue>) -> Self {
        self.set(parameter, values);
        self
    }

    pub fn set(&mut self, parameter: Parameter, values: Array1<FloatValue>) {
        self.values[usize::from(parameter)] = Some(values);
    }

    pub fn get(&self, parameter: Parameter) -> Option<&Array1<FloatValue>> {
        self.values[usize::from(parameter)].as_ref()
    }

    /// First value of a parameter
    pub fn scalar(&self, parameter: Parameter) -> Option<FloatValue> {
        self.get(parameter).and_then(|v| v.first().copied())
    }

    pub fn remove(&mut self, parameter: Parameter) -> Option<Array1<FloatValue>> {
        self.values[usize::from(parameter)].take()
    }

    pub fn contains(&self, parameter: Parameter) -> bool {
        self.get(parameter).is_some()
    }

    /// Whether every one of the eleven parameters is present
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Present parameters with their values, in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, &Array1<FloatValue>)> {
        Parameter::ALL
            .iter()
            .zip(self.values.iter())
            .filter_map(|(p, v)| v.as_ref().map(|v| (*p, v)))
    }

    /// Number of samples held by the set
    ///
    /// Returns 0 for an empty set and an error if the present parameters
    /// disagree on their length.
    pub fn n_samples(&self) -> RSAILResult<usize> {
        let mut n_samples = None;
        for (p, values) in self.iter() {
            match n_samples {
                None => n_samples = Some(values.len()),
                Some(n) if n != values.len() => {
                    return Err(RSAILError::shape(
                        &format!("{} parameter set ({})", S::NAME, S::key(p)),
                        n,
                        values.len(),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(n_samples.unwrap_or(0))
    }

    /// Overwrite values with those present in `other`
    pub fn merge(&mut self, other: ParameterSet<S>) {
        for (slot, value) in self.values.iter_mut().zip(other.values) {
            if value.is_some() {
                *slot = value;
            }
        }
    }

    /// Concatenate the values of `other` onto the values held here
    ///
    /// Parameters that are not yet present are created.
    pub fn append(&mut self, other: &ParameterSet<S>) {
        for (p, values) in other.iter() {
            let slot = &mut self.values[usize::from(p)];
            *slot = Some(match slot.take() {
                Some(existing) => existing.iter().chain(values.iter()).copied().collect(),
                None => values.clone(),
            });
        }
    }

    /// The `index`-th sample of every present parameter, as scalars
    pub fn sample(&self, index: usize) -> RSAILResult<ParameterSet<S>> {
        let mut out = ParameterSet::new();
        for (p, values) in self.iter() {
            let value = values.get(index).copied().ok_or_else(|| {
                RSAILError::shape(
                    &format!("sample index into {}", S::key(p)),
                    format!("fewer than {} values", values.len()),
                    index,
                )
            })?;
            out.set(p, Array1::from_elem(1, value));
        }
        Ok(out)
    }

    /// Build a set from string keyed values
    ///
    /// In internal space bare names of transformed parameters are accepted
    /// and mapped onto their `x`-prefixed key. In physical space only the
    /// bare names are valid.
    pub fn from_named<I, K>(entries: I) -> RSAILResult<Self>
    where
        I: IntoIterator<Item = (K, Array1<FloatValue>)>,
        K: AsRef<str>,
    {
        let mut out = ParameterSet::new();
        for (name, values) in entries {
            let name = name.as_ref();
            let parameter = Parameter::from_name(name)?;
            if !S::accepts(name, parameter) {
                return Err(RSAILError::Error(format!(
                    "{} is not a valid name in a {} parameter set",
                    name,
                    S::NAME
                )));
            }
            out.set(parameter, values);
        }
        Ok(out)
    }

    /// Like [`ParameterSet::from_named`], but entries that do not name a
    /// parameter of this space are returned alongside instead of failing
    pub fn from_named_partial<I, K>(entries: I) -> (Self, Vec<(String, Array1<FloatValue>)>)
    where
        I: IntoIterator<Item = (K, Array1<FloatValue>)>,
        K: AsRef<str>,
    {
        let mut out = ParameterSet::new();
        let mut unknown = Vec::new();
        for (name, values) in entries {
            let name = name.as_ref();
            match Parameter::from_name(name) {
                Ok(parameter) if S::accepts(name, parameter) => out.set(parameter, values),
                _ => {
                    trace!("{} is not a {} parameter, keeping it as is", name, S::NAME);
                    unknown.push((name.to_string(), values));
                }
            }
        }
        (out, unknown)
    }

    /// Present values keyed by their name in this space
    pub fn to_named(&self) -> Vec<(&'static str, Array1<FloatValue>)> {
        self.iter().map(|(p, v)| (S::key(p), v.clone())).collect()
    }

    /// Flatten into an input matrix of shape `[n_samples, n_present]`
    ///
    /// Columns are ordered by key name, which is the layout the surrogate
    /// models are trained on. The sorted keys are returned alongside.
    pub fn unpack(&self) -> RSAILResult<(Array2<FloatValue>, Vec<&'static str>)> {
        let n_samples = self.n_samples()?;
        let mut columns: Vec<(&'static str, &Array1<FloatValue>)> =
            self.iter().map(|(p, v)| (S::key(p), v)).collect();
        columns.sort_by_key(|(key, _)| *key);

        let mut inputs = Array2::zeros((n_samples, columns.len()));
        for (mut column, (_, values)) in inputs.axis_iter_mut(Axis(1)).zip(columns.iter()) {
            column.assign(*values);
        }
        Ok((inputs, columns.into_iter().map(|(key, _)| key).collect()))
    }

    /// Inverse of [`ParameterSet::unpack`]: one column per key
    pub fn pack<K: AsRef<str>>(inputs: ArrayView2<FloatValue>, keys: &[K]) -> RSAILResult<Self> {
        if inputs.ncols() != keys.len() {
            return Err(RSAILError::shape(
                "packing parameter columns",
                keys.len(),
                inputs.ncols(),
            ));
        }
        Self::from_named(
            keys.iter()
                .zip(inputs.axis_iter(Axis(1)))
                .map(|(key, column)| (key.as_ref().to_string(), column.to_owned())),
        )
    }
}
