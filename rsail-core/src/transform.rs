//! Bidirectional parameter transforms and parameter bounds
//!
//! Six canopy parameters are mapped into an internal representation that is
//! roughly uniform on `(0, 1)`. Each one has a signed scale constant `c`:
//!
//! - `c < 0` (logarithmic): $x = e^{p / c}$ and $p = c \ln x$
//! - `c > 0` (linear): $x = p / c$ and $p = x c$
//!
//! Pigments, water and dry matter have skewed physical ranges and use the
//! logarithmic form. Leaf angle is expressed as a fraction of 90°.
//!
//! A parameter whose constant is missing from the [`ScalingTable`] is passed
//! through unchanged in both directions. This lets partial tables be used
//! without failing.
//!
//! ```rust
//! use rsail_core::parameters::{Parameter, ParameterSet, Physical};
//! use rsail_core::transform::{inverse_transform, transform};
//!
//! let physical = ParameterSet::<Physical>::new().with(Parameter::Lai, 2.0);
//! let internal = transform(&physical, false);
//! assert!((internal.scalar(Parameter::Lai).unwrap() - (-1.0f64).exp()).abs() < 1e-12);
//!
//! let back = inverse_transform(&internal, false);
//! assert!((back.scalar(Parameter::Lai).unwrap() - 2.0).abs() < 1e-12);
//! ```

use crate::errors::{RSAILError, RSAILResult};
use crate::parameters::{FloatValue, Internal, Parameter, ParameterSet, Physical, N_PARAMETERS};
use log::{debug, trace, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Lower bound given to every internal parameter before specific limits apply
pub const DEFAULT_LOWER_BOUND: FloatValue = 0.001;
/// Upper bound given to every internal parameter before specific limits apply
pub const DEFAULT_UPPER_BOUND: FloatValue = 1.0 - 0.001;

/// Multiplier applied to leaf level maxima when working with canopy totals
pub const TOTAL_LAI_MULTIPLIER: FloatValue = 15.0;

/// How a single parameter is rescaled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scaling {
    Logarithmic(FloatValue),
    Linear(FloatValue),
}

impl Scaling {
    /// Interpret a signed scale constant
    ///
    /// Negative constants are logarithmic, everything else is linear.
    pub fn from_constant(constant: FloatValue) -> Self {
        if constant < 0.0 {
            Scaling::Logarithmic(constant)
        } else {
            Scaling::Linear(constant)
        }
    }

    /// Physical to internal
    pub fn forward(&self, value: FloatValue) -> FloatValue {
        match *self {
            Scaling::Logarithmic(c) => (value / c).exp(),
            Scaling::Linear(c) => value / c,
        }
    }

    /// Internal to physical
    pub fn inverse(&self, value: FloatValue) -> FloatValue {
        match *self {
            Scaling::Logarithmic(c) => c * value.ln(),
            Scaling::Linear(c) => value * c,
        }
    }
}

/// Signed scale constants for the transformed parameters
///
/// A `None` entry means the parameter is passed through untransformed.
/// A deserialised table holds only the constants it names: missing entries
/// are `None`, not the standard values of [`ScalingTable::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingTable {
    /// Average leaf angle
    /// unit: degrees
    /// default: 90.0
    pub ala: Option<FloatValue>,

    /// Leaf area index
    /// default: -2.0
    pub lai: Option<FloatValue>,

    /// Chlorophyll a+b
    /// unit: µg/cm²
    /// default: -100.0
    pub cab: Option<FloatValue>,

    /// Carotenoids
    /// unit: µg/cm²
    /// default: -100.0
    pub car: Option<FloatValue>,

    /// Equivalent water thickness
    /// unit: cm
    /// default: -1/50
    pub cw: Option<FloatValue>,

    /// Dry matter
    /// unit: g/cm²
    /// default: -1/100
    pub cm: Option<FloatValue>,

    /// Brown pigments. Only set by total mode and never consulted, as
    /// `cbrown` has no internal representation.
    /// default: unset
    pub cbrown: Option<FloatValue>,
}

impl Default for ScalingTable {
    fn default() -> Self {
        Self {
            ala: Some(90.0),
            lai: Some(-2.0),
            cab: Some(-100.0),
            car: Some(-100.0),
            cw: Some(-1.0 / 50.0),
            cm: Some(-1.0 / 100.0),
            cbrown: None,
        }
    }
}

impl ScalingTable {
    /// A fresh default table, scaled for canopy totals when `total` is set
    pub fn for_mode(total: bool) -> Self {
        Self::default().scaled(total)
    }

    /// Copy of this table, scaled for canopy totals when `total` is set
    pub fn scaled(&self, total: bool) -> Self {
        let mut table = self.clone();
        if total {
            table.apply_total_in_place();
        }
        table
    }

    /// Double the leaf quantity constants and set the brown pigment constant
    ///
    /// Applying this repeatedly compounds the doubling.
    pub fn apply_total_in_place(&mut self) {
        for constant in [&mut self.cab, &mut self.car, &mut self.cw, &mut self.cm] {
            if let Some(c) = constant.as_mut() {
                *c *= 2.0;
            }
        }
        self.cbrown = Some(15.0);
    }

    pub fn constant(&self, parameter: Parameter) -> Option<FloatValue> {
        match parameter {
            Parameter::Ala => self.ala,
            Parameter::Lai => self.lai,
            Parameter::Cab => self.cab,
            Parameter::Car => self.car,
            Parameter::Cw => self.cw,
            Parameter::Cm => self.cm,
            Parameter::Cbrown => self.cbrown,
            _ => None,
        }
    }

    /// Scaling used for `parameter`, if it is transformed and has a constant
    pub fn scaling(&self, parameter: Parameter) -> Option<Scaling> {
        if !parameter.is_transformed() {
            return None;
        }
        let scaling = self.constant(parameter).map(Scaling::from_constant);
        if scaling.is_none() {
            trace!("No scale constant for {}, passing through", parameter);
        }
        scaling
    }

    pub fn from_toml_str(contents: &str) -> RSAILResult<Self> {
        toml::from_str(contents).map_err(|e| RSAILError::Config(e.to_string()))
    }
}

/// Transform physical parameters into internal space
pub fn transform(params: &ParameterSet<Physical>, total: bool) -> ParameterSet<Internal> {
    transform_with(params, &ScalingTable::for_mode(total))
}

/// Transform internal parameters back into physical space
pub fn inverse_transform(params: &ParameterSet<Internal>, total: bool) -> ParameterSet<Physical> {
    inverse_transform_with(params, &ScalingTable::for_mode(total))
}

/// [`transform`] with an explicit scaling table
pub fn transform_with(
    params: &ParameterSet<Physical>,
    table: &ScalingTable,
) -> ParameterSet<Internal> {
    let mut out = ParameterSet::new();
    for (parameter, values) in params.iter() {
        let values = match table.scaling(parameter) {
            Some(scaling) => values.mapv(|v| scaling.forward(v)),
            None => values.clone(),
        };
        out.set(parameter, values);
    }
    out
}

/// [`inverse_transform`] with an explicit scaling table
pub fn inverse_transform_with(
    params: &ParameterSet<Internal>,
    table: &ScalingTable,
) -> ParameterSet<Physical> {
    let mut out = ParameterSet::new();
    for (parameter, values) in params.iter() {
        let values = match table.scaling(parameter) {
            Some(scaling) => values.mapv(|v| scaling.inverse(v)),
            None => values.clone(),
        };
        out.set(parameter, values);
    }
    out
}

/// String keyed [`transform_with`]
///
/// Entries that do not name a physical parameter (including names that are
/// already `x`-prefixed) are passed through unchanged after the known ones.
pub fn transform_named<I, K>(entries: I, table: &ScalingTable) -> Vec<(String, Array1<FloatValue>)>
where
    I: IntoIterator<Item = (K, Array1<FloatValue>)>,
    K: AsRef<str>,
{
    let (params, unknown) = ParameterSet::<Physical>::from_named_partial(entries);
    named(transform_with(&params, table).to_named(), unknown)
}

/// String keyed [`inverse_transform_with`]
///
/// Entries that do not name an internal parameter are passed through unchanged.
pub fn inverse_transform_named<I, K>(
    entries: I,
    table: &ScalingTable,
) -> Vec<(String, Array1<FloatValue>)>
where
    I: IntoIterator<Item = (K, Array1<FloatValue>)>,
    K: AsRef<str>,
{
    let (params, unknown) = ParameterSet::<Internal>::from_named_partial(entries);
    named(inverse_transform_with(&params, table).to_named(), unknown)
}

fn named(
    known: Vec<(&'static str, Array1<FloatValue>)>,
    unknown: Vec<(String, Array1<FloatValue>)>,
) -> Vec<(String, Array1<FloatValue>)> {
    known
        .into_iter()
        .map(|(key, values)| (key.to_string(), values))
        .chain(unknown)
        .collect()
}

/// Transformer that owns and mutates its scaling table
///
/// Every call made with `total = true` doubles the leaf constants of the
/// owned table again, so repeated calls give different results. Use the
/// free functions [`transform`] and [`inverse_transform`] unless results
/// must match code that relied on this behaviour.
#[derive(Debug, Clone, Default)]
pub struct CompoundingTransformer {
    table: ScalingTable,
    total_calls: usize,
}

impl CompoundingTransformer {
    pub fn new(table: ScalingTable) -> Self {
        Self {
            table,
            total_calls: 0,
        }
    }

    pub fn table(&self) -> &ScalingTable {
        &self.table
    }

    fn prepare(&mut self, total: bool) {
        if total {
            self.total_calls += 1;
            if self.total_calls > 1 {
                warn!(
                    "Total mode scaling applied {} times to the same table",
                    self.total_calls
                );
            }
            self.table.apply_total_in_place();
        }
    }

    pub fn transform(
        &mut self,
        params: &ParameterSet<Physical>,
        total: bool,
    ) -> ParameterSet<Internal> {
        self.prepare(total);
        transform_with(params, &self.table)
    }

    pub fn inverse_transform(
        &mut self,
        params: &ParameterSet<Internal>,
        total: bool,
    ) -> ParameterSet<Physical> {
        self.prepare(total);
        inverse_transform_with(params, &self.table)
    }
}

/// Per-parameter bounds in internal space
///
/// Invariant: `min(p) <= max(p)` for every parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoundsRepr")]
pub struct Bounds {
    pmin: [FloatValue; N_PARAMETERS],
    pmax: [FloatValue; N_PARAMETERS],
}

#[derive(Deserialize)]
struct BoundsRepr {
    pmin: [FloatValue; N_PARAMETERS],
    pmax: [FloatValue; N_PARAMETERS],
}

impl From<BoundsRepr> for Bounds {
    fn from(repr: BoundsRepr) -> Self {
        Bounds::new(repr.pmin, repr.pmax)
    }
}

impl Bounds {
    /// Create bounds, swapping any pair given in the wrong order
    pub fn new(pmin: [FloatValue; N_PARAMETERS], pmax: [FloatValue; N_PARAMETERS]) -> Self {
        let mut bounds = Self { pmin, pmax };
        for i in 0..N_PARAMETERS {
            if bounds.pmin[i] > bounds.pmax[i] {
                std::mem::swap(&mut bounds.pmin[i], &mut bounds.pmax[i]);
            }
        }
        bounds
    }

    pub fn min(&self, parameter: Parameter) -> FloatValue {
        self.pmin[usize::from(parameter)]
    }

    pub fn max(&self, parameter: Parameter) -> FloatValue {
        self.pmax[usize::from(parameter)]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Parameter, FloatValue, FloatValue)> + '_ {
        Parameter::ALL
            .iter()
            .map(move |p| (*p, self.min(*p), self.max(*p)))
    }

    /// Lower bounds as an internal parameter set
    pub fn lower(&self) -> ParameterSet<Internal> {
        self.iter()
            .fold(ParameterSet::new(), |set, (p, min, _)| set.with(p, min))
    }

    /// Upper bounds as an internal parameter set
    pub fn upper(&self) -> ParameterSet<Internal> {
        self.iter()
            .fold(ParameterSet::new(), |set, (p, _, max)| set.with(p, max))
    }

    /// Whether every value in `params` lies within the bounds, widened by `tolerance`
    pub fn contains(&self, params: &ParameterSet<Internal>, tolerance: FloatValue) -> bool {
        params.iter().all(|(p, values)| {
            values
                .iter()
                .all(|v| *v >= self.min(p) - tolerance && *v <= self.max(p) + tolerance)
        })
    }
}

/// Bounds of every parameter in internal space
///
/// Physical limits (Feret et al.) are pushed through the leaf level forward
/// transform. With `total` set, the maxima of the leaf quantities are
/// multiplied by [`TOTAL_LAI_MULTIPLIER`] but the scaling itself stays leaf
/// level.
pub fn limits(total: bool) -> Bounds {
    let table = ScalingTable::default();
    let lai_mult = if total { TOTAL_LAI_MULTIPLIER } else { 1.0 };
    let internal = |parameter: Parameter, physical: FloatValue| match table.scaling(parameter) {
        Some(scaling) => scaling.forward(physical),
        None => physical,
    };

    let mut pmin = [DEFAULT_LOWER_BOUND; N_PARAMETERS];
    let mut pmax = [DEFAULT_UPPER_BOUND; N_PARAMETERS];
    let mut set = |parameter: Parameter, min: FloatValue, max: Option<FloatValue>| {
        pmin[usize::from(parameter)] = min;
        if let Some(max) = max {
            pmax[usize::from(parameter)] = max;
        }
    };

    set(Parameter::Lai, internal(Parameter::Lai, 15.0), None);
    set(
        Parameter::Cab,
        internal(Parameter::Cab, 0.2),
        Some(internal(Parameter::Cab, 76.8 * lai_mult)),
    );
    set(
        Parameter::Car,
        internal(Parameter::Car, 25.3 * lai_mult),
        Some(internal(Parameter::Car, 0.0)),
    );
    set(Parameter::Cbrown, lai_mult, Some(0.0));
    set(
        Parameter::Cm,
        internal(Parameter::Cm, 0.0017),
        Some(internal(Parameter::Cm, 0.0331 * lai_mult)),
    );
    set(
        Parameter::Cw,
        internal(Parameter::Cw, 0.0043),
        Some(internal(Parameter::Cw, 0.0713 * lai_mult)),
    );
    set(Parameter::N, 0.8, Some(2.5));
    set(Parameter::Bsoil, 0.0, Some(2.0));
    set(Parameter::Psoil, 0.0, Some(1.0));
    set(
        Parameter::Ala,
        internal(Parameter::Ala, 90.0),
        Some(internal(Parameter::Ala, 0.0)),
    );

    let bounds = Bounds::new(pmin, pmax);
    debug!("Parameter limits (total={}): {:?}", total, bounds);
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use ndarray::array;

    #[test]
    fn test_scaling_direction() {
        assert_eq!(Scaling::from_constant(-2.0), Scaling::Logarithmic(-2.0));
        assert_eq!(Scaling::from_constant(90.0), Scaling::Linear(90.0));
        assert!(is_close!(Scaling::Linear(90.0).forward(45.0), 0.5));
        assert!(is_close!(Scaling::Logarithmic(-100.0).inverse(1.0), 0.0));
    }

    #[test]
    fn test_transform_values() {
        let physical = ParameterSet::<Physical>::new()
            .with(Parameter::Cab, 40.0)
            .with(Parameter::Ala, 45.0)
            .with(Parameter::N, 1.5);
        let internal = transform(&physical, false);

        assert!(is_close!(internal.scalar(Parameter::Cab).unwrap(), (-0.4f64).exp()));
        assert!(is_close!(internal.scalar(Parameter::Ala).unwrap(), 0.5));
        // identity mapped
        assert_eq!(internal.scalar(Parameter::N), Some(1.5));
        assert_eq!(internal.to_named()[1].0, "xcab");
    }

    #[test]
    fn test_total_doubles_leaf_constants() {
        let physical = ParameterSet::<Physical>::new().with(Parameter::Cw, 0.02);
        let leaf = transform(&physical, false);
        let total = transform(&physical, true);
        assert!(is_close!(leaf.scalar(Parameter::Cw).unwrap(), (-1.0f64).exp()));
        assert!(is_close!(total.scalar(Parameter::Cw).unwrap(), (-0.5f64).exp()));
    }

    #[test]
    fn test_total_mode_table() {
        let table = ScalingTable::for_mode(true);
        assert_eq!(table.cab, Some(-200.0));
        assert_eq!(table.cbrown, Some(15.0));
        assert_eq!(table.ala, Some(90.0));
        // cbrown has a constant but no internal representation
        assert!(table.scaling(Parameter::Cbrown).is_none());
    }

    #[test]
    fn test_missing_constant_passes_through() {
        let table = ScalingTable {
            cab: None,
            ..ScalingTable::default()
        };
        let physical = ParameterSet::<Physical>::new().with(Parameter::Cab, 40.0);
        let internal = transform_with(&physical, &table);
        assert_eq!(internal.scalar(Parameter::Cab), Some(40.0));

        let back = inverse_transform_with(&internal, &table);
        assert_eq!(back.scalar(Parameter::Cab), Some(40.0));
    }

    #[test]
    fn test_round_trip() {
        for total in [false, true] {
            for p in Parameter::TRANSFORMED {
                for v in [0.01, 0.25, 0.5, 0.75, 0.99] {
                    let internal = ParameterSet::<Internal>::new().with(p, v);
                    let physical = inverse_transform(&internal, total);
                    let again = transform(&physical, total);
                    assert!(
                        is_close!(again.scalar(p).unwrap(), v),
                        "{} total={} {} != {}",
                        p,
                        total,
                        again.scalar(p).unwrap(),
                        v
                    );
                }
            }
        }
    }

    #[test]
    fn test_named_transform_keeps_unknown_keys() {
        let entries = vec![("cab", array![40.0]), ("tts", array![30.0])];
        let internal = transform_named(entries, &ScalingTable::default());
        assert_eq!(internal.len(), 2);
        assert_eq!(internal[0].0, "xcab");
        assert!(is_close!(internal[0].1[0], (-0.4f64).exp()));
        assert_eq!(internal[1], ("tts".to_string(), array![30.0]));

        let physical = inverse_transform_named(internal, &ScalingTable::default());
        assert_eq!(physical[0].0, "cab");
        assert!(is_close!(physical[0].1[0], 40.0));
        assert_eq!(physical[1], ("tts".to_string(), array![30.0]));
    }

    #[test]
    fn test_fresh_table_does_not_compound() {
        let physical = ParameterSet::<Physical>::new().with(Parameter::Cab, 10.0);
        let first = transform(&physical, true);
        let second = transform(&physical, true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_compounding_transformer() {
        let physical = ParameterSet::<Physical>::new().with(Parameter::Cab, 10.0);
        let mut transformer = CompoundingTransformer::default();

        let first = transformer.transform(&physical, true);
        let second = transformer.transform(&physical, true);

        assert!(is_close!(first.scalar(Parameter::Cab).unwrap(), (-0.05f64).exp()));
        assert!(is_close!(second.scalar(Parameter::Cab).unwrap(), (-0.025f64).exp()));
        assert_ne!(first, second);
        assert_eq!(transformer.table().cab, Some(-400.0));
    }

    #[test]
    fn test_compounding_transformer_leaf_mode_is_stable() {
        let physical = ParameterSet::<Physical>::new().with(Parameter::Cab, 10.0);
        let mut transformer = CompoundingTransformer::default();
        let first = transformer.transform(&physical, false);
        let second = transformer.transform(&physical, false);
        assert_eq!(first, second);
    }

    #[test]
    fn test_limits_ordering() {
        for total in [false, true] {
            let bounds = limits(total);
            for (p, min, max) in bounds.iter() {
                assert!(min <= max, "{} has min {} > max {}", p, min, max);
            }
        }
    }

    #[test]
    fn test_limits_values() {
        let bounds = limits(false);
        assert!(is_close!(bounds.min(Parameter::Ala), 0.0));
        assert!(is_close!(bounds.max(Parameter::Ala), 1.0));
        assert!(is_close!(bounds.min(Parameter::Lai), (-7.5f64).exp()));
        assert!(is_close!(bounds.max(Parameter::Lai), DEFAULT_UPPER_BOUND));
        assert!(is_close!(bounds.min(Parameter::Cab), (-0.768f64).exp()));
        assert!(is_close!(bounds.max(Parameter::Cab), (-0.002f64).exp()));
        assert!(is_close!(bounds.min(Parameter::N), 0.8));
        assert!(is_close!(bounds.max(Parameter::N), 2.5));
        assert!(is_close!(bounds.min(Parameter::Hspot), DEFAULT_LOWER_BOUND));
        assert!(is_close!(bounds.max(Parameter::Cbrown), 1.0));
        assert!(is_close!(bounds.max(Parameter::Car), 1.0));
    }

    #[test]
    fn test_limits_total_widens_leaf_quantities() {
        let leaf = limits(false);
        let total = limits(true);
        assert!(is_close!(total.max(Parameter::Cbrown), 15.0));
        assert!(is_close!(total.min(Parameter::Cab), (-0.768f64 * 15.0).exp()));
        assert!(total.min(Parameter::Cab) < leaf.min(Parameter::Cab));
        // log scaled, so the larger physical maximum lowers the internal minimum
        assert!(total.min(Parameter::Cm) < leaf.min(Parameter::Cm));
        assert_eq!(total.max(Parameter::Cm), leaf.max(Parameter::Cm));
        assert_eq!(total.min(Parameter::Lai), leaf.min(Parameter::Lai));
    }

    #[test]
    fn test_bounds_new_swaps() {
        let mut pmin = [0.0; N_PARAMETERS];
        let mut pmax = [1.0; N_PARAMETERS];
        pmin[0] = 2.0;
        pmax[0] = -1.0;
        let bounds = Bounds::new(pmin, pmax);
        assert_eq!(bounds.min(Parameter::N), -1.0);
        assert_eq!(bounds.max(Parameter::N), 2.0);
    }

    #[test]
    fn test_bounds_deserialise_swaps() {
        let mut pmin = vec![0.0; N_PARAMETERS];
        let mut pmax = vec![1.0; N_PARAMETERS];
        pmin[1] = 0.9;
        pmax[1] = 0.1;
        let json = serde_json::json!({ "pmin": pmin, "pmax": pmax });
        let bounds: Bounds = serde_json::from_value(json).unwrap();
        assert_eq!(bounds.min(Parameter::Cab), 0.1);
        assert_eq!(bounds.max(Parameter::Cab), 0.9);
    }

    #[test]
    fn test_scaling_table_from_toml() {
        let table = ScalingTable::from_toml_str("lai = -3.0\ncab = -100.0\n").unwrap();
        assert_eq!(table.lai, Some(-3.0));
        assert_eq!(table.cab, Some(-100.0));
        assert_eq!(table.cw, None);
        assert!(ScalingTable::from_toml_str("lai = \"steep\"").is_err());
    }

    #[test]
    fn test_partial_table_passes_missing_through() {
        let table: ScalingTable = serde_json::from_str(r#"{"lai": -2.0}"#).unwrap();
        assert_eq!(table.cab, None);
        assert_eq!(table.ala, None);

        let physical = ParameterSet::<Physical>::new()
            .with(Parameter::Cab, 40.0)
            .with(Parameter::Lai, 2.0);
        let internal = transform_with(&physical, &table);
        assert_eq!(internal.scalar(Parameter::Cab), Some(40.0));
        assert!(is_close!(internal.scalar(Parameter::Lai).unwrap(), (-1.0f64).exp()));

        let back = inverse_transform_with(&internal, &table);
        assert_eq!(back.scalar(Parameter::Cab), Some(40.0));
    }

    #[test]
    fn test_partial_table_total_mode() {
        let table: ScalingTable = serde_json::from_str(r#"{"cw": -0.02, "cab": null}"#).unwrap();
        let total = table.scaled(true);
        assert_eq!(total.cw, Some(-0.04));
        assert_eq!(total.cab, None);
        assert_eq!(total.cbrown, Some(15.0));
    }
}
