use num_traits::Float;

/// Find the first index whose value is not less than `q`
pub fn lower_bound<T: Float>(array: &[T], q: T) -> usize {
    array.partition_point(|x| *x < q)
}

/// Find the first index whose value is greater than `q`
pub fn upper_bound<T: Float>(array: &[T], q: T) -> usize {
    array.partition_point(|x| *x <= q)
}

/// Find the half-open index range of `array` whose values lie in the closed
/// interval `[lo, hi]`. `array` must be sorted ascending.
pub fn find_between<T: Float>(array: &[T], lo: T, hi: T) -> (usize, usize) {
    let lo_i = lower_bound(array, lo);
    let hi_i = upper_bound(array, hi);
    if lo_i > hi_i {
        return (lo_i, lo_i);
    }
    (lo_i, hi_i)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_between() {
        let xs = [100.0, 100.5, 101.0, 101.0, 102.0];
        assert_eq!(find_between(&xs, 100.5, 101.0), (1, 4));
        assert_eq!(find_between(&xs, 101.1, 101.9), (4, 4));
        assert_eq!(find_between(&xs, 99.0, 99.5), (0, 0));
        assert_eq!(find_between(&xs, 103.0, 104.0), (5, 5));
    }
}
