//! Parameter transforms, sampling and spectral reconstruction around a
//! leaf/canopy radiative transfer model.
//!
//! - [`transform`]: physical <-> internal parameter mapping and bounds
//! - [`sampler`]: uniform sampling in internal space
//! - [`interpolate`]: repair of non-finite simulator output
//! - [`reconstruct`]: spectra from per-band surrogates and a spectral basis
//! - [`forward`]: driver for an external canopy reflectance simulator

pub mod forward;
pub mod interpolate;
pub mod parameters;
pub mod python;
pub mod reconstruct;
pub mod sampler;
pub mod transform;

pub mod errors;
