//! Small array helpers shared by the clustering, filtering and bracketing stages.
use std::cmp::Ordering;
use std::iter::Sum;

use num_traits::Float;

/// The relative difference of `a` from `b` in parts-per-million, `(a - b) / b * 1e6`
#[inline]
pub fn ppm_deviation<T: Float>(a: T, b: T) -> T {
    (a - b) / b * T::from(1e6).unwrap()
}

/// The spread of a mass window relative to its mean, `(max - min) / mean * 1e6`
#[inline]
pub fn ppm_spread<T: Float>(min: T, max: T, mean: T) -> T {
    (max - min) / mean * T::from(1e6).unwrap()
}

pub fn minmax<T: Float>(values: &[T]) -> (T, T) {
    let mut max = -T::infinity();
    let mut min = T::infinity();

    for v in values.iter() {
        if *v > max {
            max = *v;
        }
        if *v < min {
            min = *v
        }
    }
    (min, max)
}

pub fn mean<T: Float + Sum>(values: &[T]) -> T {
    if values.is_empty() {
        return T::nan();
    }
    values.iter().copied().sum::<T>() / T::from(values.len()).unwrap()
}

/// Sample variance with one degree of freedom removed. Returns NaN for fewer
/// than two values.
pub fn variance<T: Float + Sum>(values: &[T]) -> T {
    let n = values.len();
    if n < 2 {
        return T::nan();
    }
    let m = mean(values);
    values.iter().map(|v| (*v - m).powi(2)).sum::<T>() / T::from(n - 1).unwrap()
}

/// Population standard deviation, matching the default `ddof = 0` convention.
pub fn std_dev<T: Float + Sum>(values: &[T]) -> T {
    if values.is_empty() {
        return T::nan();
    }
    let m = mean(values);
    (values.iter().map(|v| (*v - m).powi(2)).sum::<T>() / T::from(values.len()).unwrap()).sqrt()
}

/// Intensity weighted mean of `values`. Returns `None` when the weights sum to zero.
pub fn weighted_mean<T: Float>(values: &[T], weights: &[T]) -> Option<T> {
    let (acc, total) = values
        .iter()
        .zip(weights.iter())
        .fold((T::zero(), T::zero()), |(acc, total), (v, w)| {
            (acc + *v * *w, total + *w)
        });
    if total == T::zero() {
        None
    } else {
        Some(acc / total)
    }
}

/// Weighted standard deviation using reliability weights, the unbiased
/// estimator `sum(w * (x - mu)^2) / (V1 - V2 / V1)` where `V1 = sum(w)`
/// and `V2 = sum(w^2)`.
///
/// A single value, or weights concentrated on one value, has no
/// remaining degrees of freedom and yields NaN. Returns `None` when the
/// weights sum to zero.
pub fn weighted_std_dev<T: Float>(values: &[T], weights: &[T]) -> Option<T> {
    let mu = weighted_mean(values, weights)?;
    let (ss, v1, v2) = values.iter().zip(weights.iter()).fold(
        (T::zero(), T::zero(), T::zero()),
        |(ss, v1, v2), (x, w)| (ss + *w * (*x - mu).powi(2), v1 + *w, v2 + *w * *w),
    );
    let factor = v1 - v2 / v1;
    if factor <= T::zero() {
        return Some(T::nan());
    }
    Some((ss / factor).sqrt())
}

/// Pearson's correlation coefficient. A constant input has no defined
/// correlation and yields NaN.
pub fn pearson_correlation<T: Float + Sum>(x: &[T], y: &[T]) -> T {
    let n = x.len().min(y.len());
    if n == 0 {
        return T::nan();
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    let (sxy, sxx, syy) = x[..n].iter().zip(y[..n].iter()).fold(
        (T::zero(), T::zero(), T::zero()),
        |(sxy, sxx, syy), (a, b)| {
            let da = *a - mx;
            let db = *b - my;
            (sxy + da * db, sxx + da * da, syy + db * db)
        },
    );
    let denom = (sxx * syy).sqrt();
    if denom == T::zero() {
        return T::nan();
    }
    sxy / denom
}

/// Stable ascending argsort. Equal values keep their original relative order,
/// NaN sorts last.
pub fn argsort<T: Float>(values: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| total_cmp(values[*a], values[*b]));
    order
}

/// Stable descending argsort. Equal values keep their original relative order,
/// so the lowest index of a tie comes first.
pub fn argsort_descending<T: Float>(values: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| total_cmp(values[*b], values[*a]));
    order
}

#[inline]
fn total_cmp<T: Float>(a: T, b: T) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ord) => ord,
        None => match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            _ => Ordering::Less,
        },
    }
}

/// Relative standard deviation in percent, `std / mean * 100`.
pub fn relative_std_dev<T: Float + Sum>(values: &[T]) -> T {
    std_dev(values) / mean(values) * T::from(100.0).unwrap()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ppm() {
        assert!((ppm_deviation(100.001, 100.0) - 10.0).abs() < 1e-6);
        assert!((ppm_spread(100.0, 100.001, 100.0005) - 9.99995).abs() < 1e-4);
    }

    #[test]
    fn test_weighted_mean() {
        let mz = [100.0, 100.0002];
        let inten = [1.0, 3.0];
        let mu = weighted_mean(&mz, &inten).unwrap();
        assert!((mu - 100.00015).abs() < 1e-9);
        assert!(weighted_mean(&mz, &[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_weighted_std_dev() {
        // Equal weights reduce to the ordinary sample standard deviation
        let values = [1.0, 2.0, 3.0, 4.0];
        let weights = [1.0, 1.0, 1.0, 1.0];
        let sd = weighted_std_dev(&values, &weights).unwrap();
        assert!((sd - variance(&values).sqrt()).abs() < 1e-12);

        let single = weighted_std_dev(&[5.0], &[2.0]).unwrap();
        assert!(single.is_nan());
    }

    #[test]
    fn test_pearson() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson_correlation(&x, &y) - 1.0).abs() < 1e-12);
        let z = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson_correlation(&x, &z) + 1.0).abs() < 1e-12);
        assert!(pearson_correlation(&x, &[1.0, 1.0, 1.0, 1.0]).is_nan());
    }

    #[test]
    fn test_argsort_stable() {
        let values = [3.0, 1.0, 3.0, 2.0, 1.0];
        assert_eq!(argsort(&values), vec![1, 4, 3, 0, 2]);
        assert_eq!(argsort_descending(&values), vec![0, 2, 3, 1, 4]);
    }

    #[test]
    fn test_minmax() {
        let (lo, hi) = minmax(&[4.0, -1.0, 7.5]);
        assert_eq!(lo, -1.0);
        assert_eq!(hi, 7.5);
    }
}
