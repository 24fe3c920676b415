//! Forward model driver
//!
//! Runs an external canopy reflectance simulator over a batch of physical
//! parameter sets and collects the spectra. The simulator itself is provided
//! by the caller through [`CanopySimulator`].
//!
//! The sun-view geometry can be given either as a single value for the whole
//! batch or as one value per sample ([`Angles`]). Which form applies is
//! decided up front from the batch size, not by retrying a failed call.

use crate::errors::{RSAILError, RSAILResult};
use crate::interpolate::fix_nan;
use crate::parameters::{FloatValue, Internal, Parameter, ParameterSet, Physical};
use crate::sampler::Sampler;
use crate::transform::transform;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// First simulated wavelength (nm)
pub const WAVELENGTH_START: FloatValue = 400.0;
/// Last simulated wavelength (nm)
pub const WAVELENGTH_END: FloatValue = 2500.0;
/// Number of simulated wavelengths (1 nm steps)
pub const N_WAVELENGTHS: usize = 2101;

/// Wavelengths of the simulator output (nm)
pub fn wavelengths() -> Array1<FloatValue> {
    Array1::linspace(WAVELENGTH_START, WAVELENGTH_END, N_WAVELENGTHS)
}

/// Physical canopy parameters of a single simulation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanopyState {
    pub n: FloatValue,
    pub cab: FloatValue,
    pub car: FloatValue,
    pub cbrown: FloatValue,
    pub cw: FloatValue,
    pub cm: FloatValue,
    pub ala: FloatValue,
    pub bsoil: FloatValue,
    pub psoil: FloatValue,
    pub hspot: FloatValue,
    pub lai: FloatValue,
}

impl CanopyState {
    /// Extract sample `index` from a batch
    ///
    /// All eleven parameters must be present.
    pub fn from_sample(batch: &ParameterSet<Physical>, index: usize) -> RSAILResult<Self> {
        let value = |parameter: Parameter| -> RSAILResult<FloatValue> {
            let values = batch.get(parameter).ok_or_else(|| {
                RSAILError::Error(format!("Parameter {} missing from state", parameter))
            })?;
            values.get(index).copied().ok_or_else(|| {
                RSAILError::shape(
                    &format!("state parameter {}", parameter),
                    format!("more than {} values", index),
                    values.len(),
                )
            })
        };

        Ok(Self {
            n: value(Parameter::N)?,
            cab: value(Parameter::Cab)?,
            car: value(Parameter::Car)?,
            cbrown: value(Parameter::Cbrown)?,
            cw: value(Parameter::Cw)?,
            cm: value(Parameter::Cm)?,
            ala: value(Parameter::Ala)?,
            bsoil: value(Parameter::Bsoil)?,
            psoil: value(Parameter::Psoil)?,
            hspot: value(Parameter::Hspot)?,
            lai: value(Parameter::Lai)?,
        })
    }

    /// Leaf and canopy arguments in the order the simulator expects
    ///
    /// The ninth slot is an unused placeholder and is always zero.
    pub fn simulator_arguments(&self) -> [FloatValue; 12] {
        [
            self.n,
            self.cab,
            self.car,
            self.cbrown,
            self.cw,
            self.cm,
            self.lai,
            self.ala,
            0.0,
            self.bsoil,
            self.psoil,
            self.hspot,
        ]
    }
}

/// Number of values in [`CanopyState::call_arguments`]
pub const N_CALL_ARGUMENTS: usize = 15;

impl CanopyState {
    /// Simulator arguments followed by `vza`, `sza` and `raa`
    pub fn call_arguments(&self, geometry: &SunViewGeometry) -> [FloatValue; N_CALL_ARGUMENTS] {
        let mut arguments = [0.0; N_CALL_ARGUMENTS];
        arguments[..12].copy_from_slice(&self.simulator_arguments());
        arguments[12] = geometry.vza;
        arguments[13] = geometry.sza;
        arguments[14] = geometry.raa;
        arguments
    }
}

/// Sun-view geometry of a single simulation (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunViewGeometry {
    /// View zenith angle
    pub vza: FloatValue,
    /// Solar zenith angle
    pub sza: FloatValue,
    /// Relative azimuth angle
    pub raa: FloatValue,
}

/// External leaf/canopy reflectance model
///
/// Implementations return reflectance over [`wavelengths`]. Non-finite
/// values are tolerated and are interpolated over by the driver.
pub trait CanopySimulator: Sync {
    fn simulate(
        &self,
        state: &CanopyState,
        geometry: &SunViewGeometry,
    ) -> RSAILResult<Array1<FloatValue>>;
}

/// Simulator backed by a function of the flat argument list
///
/// The function receives [`CanopyState::call_arguments`], the calling
/// convention of compiled canopy models.
pub struct FnSimulator<F>(pub F);

impl<F> CanopySimulator for FnSimulator<F>
where
    F: Fn(&[FloatValue]) -> RSAILResult<Array1<FloatValue>> + Sync,
{
    fn simulate(
        &self,
        state: &CanopyState,
        geometry: &SunViewGeometry,
    ) -> RSAILResult<Array1<FloatValue>> {
        (self.0)(&state.call_arguments(geometry))
    }
}

/// One viewing/illumination angle for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Angles {
    /// Same value for every sample
    Scalar(FloatValue),
    /// One value per sample
    PerSample(Vec<FloatValue>),
}

impl From<FloatValue> for Angles {
    fn from(value: FloatValue) -> Self {
        Angles::Scalar(value)
    }
}

impl From<Vec<FloatValue>> for Angles {
    fn from(values: Vec<FloatValue>) -> Self {
        Angles::PerSample(values)
    }
}

impl Angles {
    /// Value for sample `index` of a batch of `n_samples`
    ///
    /// Per-sample values are indexed when there is one per sample. Scalars
    /// and single element arrays are broadcast.
    pub fn at(&self, name: &str, index: usize, n_samples: usize) -> RSAILResult<FloatValue> {
        match self {
            Angles::Scalar(value) => Ok(*value),
            Angles::PerSample(values) if values.len() == 1 => Ok(values[0]),
            Angles::PerSample(values) if values.len() == n_samples => Ok(values[index]),
            Angles::PerSample(values) => Err(RSAILError::GeometryMismatch {
                angle: name.to_string(),
                len: values.len(),
                n_samples,
            }),
        }
    }
}

/// Sun-view geometry for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub vza: Angles,
    pub sza: Angles,
    pub raa: Angles,
}

impl Geometry {
    pub fn new(vza: impl Into<Angles>, sza: impl Into<Angles>, raa: impl Into<Angles>) -> Self {
        Self {
            vza: vza.into(),
            sza: sza.into(),
            raa: raa.into(),
        }
    }

    /// Geometry of sample `index`
    pub fn resolve(&self, index: usize, n_samples: usize) -> RSAILResult<SunViewGeometry> {
        Ok(SunViewGeometry {
            vza: self.vza.at("vza", index, n_samples)?,
            sza: self.sza.at("sza", index, n_samples)?,
            raa: self.raa.at("raa", index, n_samples)?,
        })
    }

    /// Check that every angle can be resolved for a batch of `n_samples`
    pub fn validate(&self, n_samples: usize) -> RSAILResult<()> {
        if n_samples > 0 {
            self.resolve(0, n_samples)?;
        }
        Ok(())
    }
}

/// Spectral response functions, shape `[n_bands, n_wavelengths]`
///
/// Each row is integrated against a spectrum by a weighted sum, so rows are
/// expected to be normalised to unit sum.
#[derive(Debug, Clone, PartialEq)]
pub struct Bandpass(Array2<FloatValue>);

impl Bandpass {
    pub fn new(responses: Array2<FloatValue>) -> RSAILResult<Self> {
        if responses.ncols() != N_WAVELENGTHS {
            return Err(RSAILError::shape(
                "bandpass wavelengths",
                N_WAVELENGTHS,
                responses.ncols(),
            ));
        }
        Ok(Self(responses))
    }

    pub fn n_bands(&self) -> usize {
        self.0.nrows()
    }

    /// Integrate a spectrum over every band
    pub fn apply(&self, spectrum: ArrayView1<FloatValue>) -> Array1<FloatValue> {
        self.0.dot(&spectrum)
    }

    /// Integrate every row of a `[n_samples, n_wavelengths]` batch
    pub fn apply_batch(&self, spectra: &Array2<FloatValue>) -> Array2<FloatValue> {
        spectra.dot(&self.0.t())
    }
}

/// Result of a forward run
#[derive(Debug, Clone)]
pub struct ForwardRun {
    /// Geometry the batch was run at, as given
    pub geometry: Geometry,
    /// Input state in internal space
    pub state: ParameterSet<Internal>,
    /// Repaired reflectance, shape `[n_samples, n_wavelengths]` or `[n_samples, n_bands]`
    pub reflectance: Array2<FloatValue>,
    /// Wavelength (or band-integrated wavelength) axis
    pub wavelengths: Array1<FloatValue>,
}

/// Run the simulator for every sample of `state`
///
/// Samples are simulated in parallel and stacked in sample order.
/// Non-finite values are repaired at full spectral resolution, then spectra
/// are band integrated when `bandpass` is given. The first simulator error
/// is returned.
pub fn run_forward<M: CanopySimulator>(
    state: &ParameterSet<Physical>,
    geometry: Geometry,
    simulator: &M,
    bandpass: Option<&Bandpass>,
) -> RSAILResult<ForwardRun> {
    let n_samples = state.n_samples()?;
    geometry.validate(n_samples)?;
    debug!("Running canopy simulator for {} samples", n_samples);

    let spectra = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let canopy = CanopyState::from_sample(state, i)?;
            let sun_view = geometry.resolve(i, n_samples)?;
            let spectrum = simulator.simulate(&canopy, &sun_view)?;
            if spectrum.len() != N_WAVELENGTHS {
                return Err(RSAILError::shape(
                    &format!("simulated spectrum {}", i),
                    N_WAVELENGTHS,
                    spectrum.len(),
                ));
            }
            Ok(spectrum)
        })
        .collect::<RSAILResult<Vec<_>>>()?;

    let mut reflectance = Array2::zeros((n_samples, N_WAVELENGTHS));
    for (mut row, spectrum) in reflectance.outer_iter_mut().zip(spectra.iter()) {
        row.assign(spectrum);
    }
    let reflectance = fix_nan(reflectance);

    let (reflectance, wavelengths) = match bandpass {
        Some(bandpass) => (
            bandpass.apply_batch(&reflectance),
            bandpass.apply(wavelengths().view()),
        ),
        None => (reflectance, wavelengths()),
    };

    Ok(ForwardRun {
        geometry,
        state: transform(state, false),
        reflectance,
        wavelengths,
    })
}

/// Configuration of a random look-up table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LutConfig {
    /// Number of random parameter samples
    /// default: 2
    pub n_samples: usize,

    /// View zenith angle
    /// unit: degrees
    /// default: 0.0
    pub vza: Angles,

    /// Solar zenith angle
    /// unit: degrees
    /// default: 45.0
    pub sza: Angles,

    /// Relative azimuth angle
    /// unit: degrees
    /// default: 0.0
    pub raa: Angles,

    /// Seed for the sampler. Drawn from system entropy when unset.
    /// default: unset
    pub seed: Option<u64>,
}

impl Default for LutConfig {
    fn default() -> Self {
        Self {
            n_samples: 2,
            vza: Angles::Scalar(0.0),
            sza: Angles::Scalar(45.0),
            raa: Angles::Scalar(0.0),
            seed: None,
        }
    }
}

impl LutConfig {
    pub fn from_toml_str(contents: &str) -> RSAILResult<Self> {
        toml::from_str(contents).map_err(|e| RSAILError::Config(e.to_string()))
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            vza: self.vza.clone(),
            sza: self.sza.clone(),
            raa: self.raa.clone(),
        }
    }

    pub fn rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }
}

/// Simulate a random look-up table at a fixed geometry
pub fn generate_lut<M: CanopySimulator>(
    config: &LutConfig,
    simulator: &M,
) -> RSAILResult<ForwardRun> {
    generate_lut_with_rng(config, simulator, &mut config.rng())
}

/// [`generate_lut`] with an explicit random number generator
pub fn generate_lut_with_rng<M: CanopySimulator, R: Rng + ?Sized>(
    config: &LutConfig,
    simulator: &M,
    rng: &mut R,
) -> RSAILResult<ForwardRun> {
    info!("Generating look-up table with {} samples", config.n_samples);
    let state = Sampler::from_limits(false).sample_batch(config.n_samples, rng);
    run_forward(&state, config.geometry(), simulator, None)
}
