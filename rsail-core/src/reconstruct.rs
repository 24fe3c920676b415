//! Spectral reconstruction from per-band surrogate models
//!
//! A full spectrum is approximated by a small spectral basis, one basis
//! vector per band, and a surrogate model (typically a Gaussian process)
//! per band that predicts the basis coefficient from canopy parameters:
//!
//! $$\rho(\lambda) = \sum_i \mu_i(x)\, B_i(\lambda)$$
//!
//! The derivative of the spectrum with respect to the inputs follows from
//! the surrogate gradients in the same way:
//!
//! $$\frac{\partial \rho(\lambda)}{\partial x_j} = \sum_i \frac{\partial \mu_i}{\partial x_j} B_i(\lambda)$$
//!
//! Bands are always accumulated in ascending index order so results are
//! reproducible.

use crate::errors::{RSAILError, RSAILResult};
use crate::parameters::FloatValue;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Output of a surrogate prediction
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Predicted mean, shape `[n_samples]`
    pub mean: Array1<FloatValue>,
    /// Predicted variance, shape `[n_samples]`
    pub variance: Array1<FloatValue>,
    /// Gradient of the mean with respect to the inputs, shape `[n_samples, n_params]`
    pub gradient: Array2<FloatValue>,
}

/// A trained regression model for one basis band
pub trait Surrogate {
    /// Predict for inputs of shape `[n_samples, n_params]`
    fn predict(&self, inputs: ArrayView2<FloatValue>) -> RSAILResult<Prediction>;
}

impl<T: Surrogate + ?Sized> Surrogate for Box<T> {
    fn predict(&self, inputs: ArrayView2<FloatValue>) -> RSAILResult<Prediction> {
        (**self).predict(inputs)
    }
}

impl<T: Surrogate + ?Sized> Surrogate for &T {
    fn predict(&self, inputs: ArrayView2<FloatValue>) -> RSAILResult<Prediction> {
        (**self).predict(inputs)
    }
}

/// Ordered spectral basis, shape `[n_bands, n_wavelengths]`
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralBasis(Array2<FloatValue>);

impl SpectralBasis {
    pub fn new(basis: Array2<FloatValue>) -> Self {
        Self(basis)
    }

    /// Stack equally sized band vectors
    pub fn from_bands(bands: &[Array1<FloatValue>]) -> RSAILResult<Self> {
        let n_wavelengths = bands.first().map_or(0, |b| b.len());
        let mut basis = Array2::zeros((bands.len(), n_wavelengths));
        for (i, (mut row, band)) in basis.outer_iter_mut().zip(bands).enumerate() {
            if band.len() != n_wavelengths {
                return Err(RSAILError::shape(
                    &format!("spectral basis band {}", i),
                    n_wavelengths,
                    band.len(),
                ));
            }
            row.assign(band);
        }
        Ok(Self(basis))
    }

    pub fn n_bands(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_wavelengths(&self) -> usize {
        self.0.ncols()
    }

    pub fn band(&self, index: usize) -> ArrayView1<FloatValue> {
        self.0.row(index)
    }

    pub fn bands(&self) -> impl Iterator<Item = ArrayView1<FloatValue>> {
        self.0.outer_iter()
    }

    pub fn as_array(&self) -> &Array2<FloatValue> {
        &self.0
    }
}

fn check_surrogate_count<S>(surrogates: &[S], basis: &SpectralBasis) -> RSAILResult<()> {
    if surrogates.len() < basis.n_bands() {
        return Err(RSAILError::shape(
            "surrogate count",
            format!("at least {} (one per basis band)", basis.n_bands()),
            surrogates.len(),
        ));
    }
    Ok(())
}

fn check_prediction(
    prediction: &Prediction,
    inputs: ArrayView2<FloatValue>,
    band: usize,
    with_gradient: bool,
) -> RSAILResult<()> {
    let (n_samples, n_params) = inputs.dim();
    if prediction.mean.len() != n_samples {
        return Err(RSAILError::shape(
            &format!("predicted mean of band {}", band),
            n_samples,
            prediction.mean.len(),
        ));
    }
    if with_gradient && prediction.gradient.dim() != (n_samples, n_params) {
        return Err(RSAILError::shape(
            &format!("predicted gradient of band {}", band),
            format!("{:?}", (n_samples, n_params)),
            format!("{:?}", prediction.gradient.dim()),
        ));
    }
    Ok(())
}

/// Reconstruct spectra for every input row
///
/// Returns an array of shape `[n_samples, n_wavelengths]`. Errors raised
/// by a surrogate are returned unchanged.
pub fn reconstruct<S: Surrogate>(
    surrogates: &[S],
    basis: &SpectralBasis,
    inputs: ArrayView2<FloatValue>,
) -> RSAILResult<Array2<FloatValue>> {
    check_surrogate_count(surrogates, basis)?;

    let mut spectra = Array2::zeros((inputs.nrows(), basis.n_wavelengths()));
    for (i, (surrogate, band)) in surrogates.iter().zip(basis.bands()).enumerate() {
        let prediction = surrogate.predict(inputs)?;
        check_prediction(&prediction, inputs, i, false)?;

        for (mut spectrum, mean) in spectra.outer_iter_mut().zip(prediction.mean.iter()) {
            spectrum.scaled_add(*mean, &band);
        }
    }
    Ok(spectra)
}

/// Reconstruct the spectrum of the first input row and its Jacobian
///
/// Returns the spectrum, shape `[n_wavelengths]`, and the derivative of it
/// with respect to each input dimension, shape `[n_params, n_wavelengths]`.
/// Each surrogate is evaluated once and that prediction feeds both.
pub fn reconstruct_with_gradient<S: Surrogate>(
    surrogates: &[S],
    basis: &SpectralBasis,
    inputs: ArrayView2<FloatValue>,
) -> RSAILResult<(Array1<FloatValue>, Array2<FloatValue>)> {
    check_surrogate_count(surrogates, basis)?;
    if inputs.nrows() == 0 {
        return Err(RSAILError::shape("reconstruction inputs", "at least 1 row", 0));
    }

    let mut spectrum = Array1::zeros(basis.n_wavelengths());
    let mut gradient = Array2::zeros((inputs.ncols(), basis.n_wavelengths()));
    for (i, (surrogate, band)) in surrogates.iter().zip(basis.bands()).enumerate() {
        let prediction = surrogate.predict(inputs)?;
        check_prediction(&prediction, inputs, i, true)?;

        spectrum.scaled_add(prediction.mean[0], &band);
        let d_means = prediction.gradient.row(0);
        for (mut row, d_mean) in gradient.outer_iter_mut().zip(d_means.iter()) {
            row.scaled_add(*d_mean, &band);
        }
    }
    Ok((spectrum, gradient))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::cell::Cell;

    /// Surrogate with a mean that is linear in the inputs
    struct LinearSurrogate {
        weights: Array1<FloatValue>,
        offset: FloatValue,
        calls: Cell<usize>,
    }

    impl LinearSurrogate {
        fn new(weights: Array1<FloatValue>, offset: FloatValue) -> Self {
            Self {
                weights,
                offset,
                calls: Cell::new(0),
            }
        }

        fn constant(value: FloatValue, n_params: usize) -> Self {
            Self::new(Array1::zeros(n_params), value)
        }
    }

    impl Surrogate for LinearSurrogate {
        fn predict(&self, inputs: ArrayView2<FloatValue>) -> RSAILResult<Prediction> {
            self.calls.set(self.calls.get() + 1);
            let n = inputs.nrows();
            let mean = inputs.dot(&self.weights) + self.offset;
            let gradient = Array2::from_shape_fn((n, self.weights.len()), |(_, j)| self.weights[j]);
            Ok(Prediction {
                mean,
                variance: Array1::zeros(n),
                gradient,
            })
        }
    }

    struct FailingSurrogate;

    impl Surrogate for FailingSurrogate {
        fn predict(&self, _inputs: ArrayView2<FloatValue>) -> RSAILResult<Prediction> {
            Err(RSAILError::Surrogate("model not trained".to_string()))
        }
    }

    #[test]
    fn test_single_band() {
        let gps = [LinearSurrogate::constant(2.5, 2)];
        let basis = SpectralBasis::new(array![[1.0, 0.0, 0.0]]);
        let inputs = array![[0.1, 0.2]];

        let spectra = reconstruct(&gps, &basis, inputs.view()).unwrap();
        assert_eq!(spectra, array![[2.5, 0.0, 0.0]]);
    }

    #[test]
    fn test_disjoint_bands_sum() {
        let gps = [
            LinearSurrogate::constant(5.0, 1),
            LinearSurrogate::constant(3.0, 1),
        ];
        let basis = SpectralBasis::from_bands(&[array![1.0, 0.0], array![0.0, 1.0]]).unwrap();
        let inputs = array![[0.3], [0.7]];

        let spectra = reconstruct(&gps, &basis, inputs.view()).unwrap();
        assert_eq!(spectra, array![[5.0, 3.0], [5.0, 3.0]]);
    }

    #[test]
    fn test_gradient_matches_linear_model() {
        let gps = [
            LinearSurrogate::new(array![1.0, 2.0], 0.0),
            LinearSurrogate::new(array![0.5, -1.0], 1.0),
        ];
        let basis = SpectralBasis::new(array![[1.0, 1.0, 0.0], [0.0, 2.0, 1.0]]);
        let inputs = array![[1.0, 1.0]];

        let (spectrum, gradient) = reconstruct_with_gradient(&gps, &basis, inputs.view()).unwrap();

        // means: 3.0 and 0.5
        assert_eq!(spectrum, array![3.0, 4.0, 0.5]);
        assert_eq!(gradient, array![[1.0, 2.0, 0.5], [2.0, 0.0, -1.0]]);
        assert!(gps.iter().all(|gp| gp.calls.get() == 1));

        let spectra = reconstruct(&gps, &basis, inputs.view()).unwrap();
        assert_eq!(spectra.row(0), spectrum);
    }

    #[test]
    fn test_gradient_uses_first_sample() {
        let gps = [LinearSurrogate::new(array![2.0], 0.0)];
        let basis = SpectralBasis::new(array![[1.0, 0.5]]);
        let inputs = array![[1.0], [3.0]];

        let (spectrum, gradient) = reconstruct_with_gradient(&gps, &basis, inputs.view()).unwrap();
        assert_eq!(spectrum, array![2.0, 1.0]);
        assert_eq!(gradient, array![[2.0, 1.0]]);
    }

    #[test]
    fn test_too_few_surrogates() {
        let gps = [LinearSurrogate::constant(1.0, 1)];
        let basis = SpectralBasis::new(array![[1.0], [1.0]]);
        let result = reconstruct(&gps, &basis, array![[0.0]].view());
        assert!(matches!(result, Err(RSAILError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_surrogate_errors_propagate() {
        let gps: Vec<Box<dyn Surrogate>> = vec![
            Box::new(LinearSurrogate::constant(1.0, 1)),
            Box::new(FailingSurrogate),
        ];
        let basis = SpectralBasis::new(array![[1.0], [1.0]]);
        let result = reconstruct(&gps, &basis, array![[0.0]].view());
        assert!(matches!(result, Err(RSAILError::Surrogate(_))));
    }

    #[test]
    fn test_ragged_bands_rejected() {
        let result = SpectralBasis::from_bands(&[array![1.0, 0.0], array![1.0]]);
        assert!(result.is_err());
    }
}
