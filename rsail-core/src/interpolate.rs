//! Linear interpolation and repair of failed simulator output
//!
//! The radiative transfer model occasionally returns non-finite reflectance
//! for some wavelengths. Each spectrum is repaired independently by linear
//! interpolation between its finite values, with the outermost finite
//! values held constant beyond the ends.

use crate::parameters::FloatValue;
use log::warn;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayViewMut1, Axis};
use num::Float;

/// Piecewise linear interpolation of `(xp, fp)` at `x`
///
/// `xp` must be increasing. Values of `x` outside `[xp[0], xp[last]]` are
/// clamped to the end values. Returns `None` when there are no knots or the
/// knot arrays differ in length.
pub fn interp<T: Float>(x: T, xp: &[T], fp: &[T]) -> Option<T> {
    if xp.is_empty() || xp.len() != fp.len() {
        return None;
    }
    let last = xp.len() - 1;
    if x <= xp[0] {
        return Some(fp[0]);
    }
    if x >= xp[last] {
        return Some(fp[last]);
    }

    // First knot strictly greater than x; 1 <= upper <= last here
    let upper = xp.partition_point(|&knot| knot <= x);
    let (x0, x1) = (xp[upper - 1], xp[upper]);
    let (f0, f1) = (fp[upper - 1], fp[upper]);
    Some(f0 + (x - x0) * (f1 - f0) / (x1 - x0))
}

/// Replace the non-finite values of one spectrum in place
///
/// Returns `false` if the row has non-finite values but no finite value to
/// interpolate from. Such rows are left untouched.
pub fn fix_nan_row(mut row: ArrayViewMut1<FloatValue>) -> bool {
    let (xp, fp): (Vec<FloatValue>, Vec<FloatValue>) = row
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, v)| (i as FloatValue, *v))
        .unzip();

    if xp.len() == row.len() {
        return true;
    }
    if xp.is_empty() {
        return false;
    }

    for (i, value) in row.iter_mut().enumerate() {
        if !value.is_finite() {
            if let Some(repaired) = interp(i as FloatValue, &xp, &fp) {
                *value = repaired;
            }
        }
    }
    true
}

/// Repair every row of a `[samples, wavelengths]` batch in place
///
/// Rows are independent and are processed in parallel. Returns the number of
/// rows that could not be repaired because they had no finite values.
pub fn fix_nan_in_place(x: &mut Array2<FloatValue>) -> usize {
    let unrepaired = x
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .map(fix_nan_row)
        .filter(|repaired| !repaired)
        .count();
    if unrepaired > 0 {
        warn!(
            "{} of {} spectra have no finite values and were left unrepaired",
            unrepaired,
            x.nrows()
        );
    }
    unrepaired
}

/// Owned variant of [`fix_nan_in_place`]
pub fn fix_nan(mut x: Array2<FloatValue>) -> Array2<FloatValue> {
    fix_nan_in_place(&mut x);
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use ndarray::array;

    #[test]
    fn test_interp_inside() {
        let xp = [0.0, 2.0, 4.0];
        let fp = [0.0, 1.0, 5.0];
        assert!(is_close!(interp(1.0, &xp, &fp).unwrap(), 0.5));
        assert!(is_close!(interp(3.0, &xp, &fp).unwrap(), 3.0));
        assert!(is_close!(interp(2.0, &xp, &fp).unwrap(), 1.0));
    }

    #[test]
    fn test_interp_clamps() {
        let xp = [1.0, 2.0];
        let fp = [10.0, 20.0];
        assert_eq!(interp(-5.0, &xp, &fp), Some(10.0));
        assert_eq!(interp(7.0, &xp, &fp), Some(20.0));
        assert_eq!(interp(0.0, &[], &[]), None);
        assert_eq!(interp(0.0, &[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_fix_nan_interior_and_edges() {
        let x = array![
            [f64::NAN, 1.0, f64::NAN, 3.0, f64::NAN],
            [0.5, 0.5, 0.5, 0.5, 0.5],
        ];
        let fixed = fix_nan(x);
        assert_eq!(fixed.row(0).to_vec(), vec![1.0, 1.0, 2.0, 3.0, 3.0]);
        assert_eq!(fixed.row(1).to_vec(), vec![0.5; 5]);
    }

    #[test]
    fn test_fix_nan_treats_infinity_as_missing() {
        let fixed = fix_nan(array![[0.0, f64::INFINITY, 2.0]]);
        assert_eq!(fixed.row(0).to_vec(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_fix_nan_idempotent() {
        let x = array![
            [0.1, f64::NAN, f64::NAN, 0.4, 0.2, f64::NAN],
            [f64::NAN, f64::NAN, 0.3, 0.3, f64::NAN, 0.9],
        ];
        let once = fix_nan(x);
        assert!(once.iter().all(|v| v.is_finite()));
        let twice = fix_nan(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fix_nan_all_missing_row() {
        let mut x = array![[f64::NAN, f64::NAN], [1.0, f64::NAN]];
        let unrepaired = fix_nan_in_place(&mut x);
        assert_eq!(unrepaired, 1);
        assert!(x.row(0).iter().all(|v| v.is_nan()));
        assert_eq!(x.row(1).to_vec(), vec![1.0, 1.0]);
    }
}
