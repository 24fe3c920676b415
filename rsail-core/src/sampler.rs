//! Uniform random sampling of canopy parameters
//!
//! Draws are uniform in internal space between the [`Bounds`] and are mapped
//! back into physical space with the leaf level inverse transform, which is
//! the scaling the bounds were built with.

use crate::parameters::{FloatValue, Parameter, ParameterSet, Physical, N_PARAMETERS};
use crate::transform::{inverse_transform, limits, Bounds};
use log::debug;
use ndarray::Array1;
use rand::Rng;

/// Sampler over a fixed set of internal space bounds
#[derive(Debug, Clone)]
pub struct Sampler {
    bounds: Bounds,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::from_limits(false)
    }
}

impl Sampler {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    /// Sampler over the bounds returned by [`limits`]
    pub fn from_limits(total: bool) -> Self {
        Self::new(limits(total))
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Draw one internal space point
    ///
    /// One uniform variate is consumed per parameter, in canonical order.
    pub fn draw_internal<R: Rng + ?Sized>(&self, rng: &mut R) -> [FloatValue; N_PARAMETERS] {
        let mut point = [0.0; N_PARAMETERS];
        for (value, (_, min, max)) in point.iter_mut().zip(self.bounds.iter()) {
            let u: FloatValue = rng.gen();
            *value = min + u * (max - min);
        }
        point
    }

    /// Draw one complete physical parameter set
    pub fn sample_one<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterSet<Physical> {
        let point = self.draw_internal(rng);
        let mut params = ParameterSet::new();
        for (parameter, value) in Parameter::ALL.iter().zip(point) {
            params.merge(inverse_transform(
                &ParameterSet::new().with(*parameter, value),
                false,
            ));
        }
        params
    }

    /// Draw `n` independent samples into a batch
    ///
    /// Each parameter holds `n` values in draw order.
    pub fn sample_batch<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> ParameterSet<Physical> {
        let mut columns: [Array1<FloatValue>; N_PARAMETERS] =
            std::array::from_fn(|_| Array1::zeros(n));

        for i in 0..n {
            let sample = self.sample_one(rng);
            for (parameter, values) in sample.iter() {
                columns[usize::from(parameter)][i] = values[0];
            }
        }
        debug!("Drew {} parameter samples", n);

        Parameter::ALL
            .iter()
            .zip(columns)
            .fold(ParameterSet::new(), |batch, (parameter, values)| {
                batch.with_values(*parameter, values)
            })
    }
}

/// Draw `n` samples over the leaf level limits
pub fn samples<R: Rng + ?Sized>(n: usize, rng: &mut R) -> ParameterSet<Physical> {
    Sampler::from_limits(false).sample_batch(n, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::transform;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_sample_one_is_complete() {
        let sampler = Sampler::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let sample = sampler.sample_one(&mut rng);

        assert!(sample.is_complete());
        assert_eq!(sample.n_samples().unwrap(), 1);
    }

    #[test]
    fn test_samples_within_bounds() {
        for total in [false, true] {
            let sampler = Sampler::from_limits(total);
            let mut rng = ChaCha8Rng::seed_from_u64(7);

            for _ in 0..1000 {
                let sample = sampler.sample_one(&mut rng);
                let internal = transform(&sample, false);
                assert!(sampler.bounds().contains(&internal, 1e-9));
            }
        }
    }

    #[test]
    fn test_physical_ranges() {
        let sampler = Sampler::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let batch = sampler.sample_batch(500, &mut rng);

        let within = |p: Parameter, lo: f64, hi: f64| {
            batch
                .get(p)
                .unwrap()
                .iter()
                .all(|v| *v >= lo - 1e-9 && *v <= hi + 1e-9)
        };
        assert!(within(Parameter::Lai, 0.0, 15.0));
        assert!(within(Parameter::Cab, 0.2, 76.8));
        assert!(within(Parameter::Ala, 0.0, 90.0));
        assert!(within(Parameter::N, 0.8, 2.5));
        assert!(within(Parameter::Psoil, 0.0, 1.0));
    }

    #[test]
    fn test_batch_matches_sequential_draws() {
        let sampler = Sampler::default();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let batch = sampler.sample_batch(4, &mut rng);

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut grown = ParameterSet::<Physical>::new();
        for _ in 0..4 {
            grown.append(&sampler.sample_one(&mut rng));
        }

        assert_eq!(batch, grown);
        assert_eq!(batch.n_samples().unwrap(), 4);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let a = samples(5, &mut ChaCha8Rng::seed_from_u64(11));
        let b = samples(5, &mut ChaCha8Rng::seed_from_u64(11));
        let c = samples(5, &mut ChaCha8Rng::seed_from_u64(12));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_batch() {
        let batch = samples(0, &mut ChaCha8Rng::seed_from_u64(0));
        assert_eq!(batch.n_samples().unwrap(), 0);
        assert!(batch.is_complete());
    }
}
