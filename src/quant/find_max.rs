/// Find the maximum value of a slice and its index.
///
/// Ties resolve to the first occurrence. Returns `None` for an empty slice.
/// Incomparable elements (such as NaN) never replace the current maximum.
/// A slice with no comparable element yields its first element.
pub fn find_max<T: PartialOrd + Copy>(values: &[T]) -> Option<(usize, T)> {
    let first = *values.first()?;
    // Seed from the first element that compares equal to itself
    let Some(seed) = values.iter().position(|v| v.partial_cmp(v).is_some()) else {
        return Some((0, first));
    };
    let mut max_idx = seed;
    let mut max_val = values[seed];

    for (i, &val) in values.iter().enumerate().skip(seed + 1) {
        if val > max_val {
            max_idx = i;
            max_val = val;
        }
    }
    Some((max_idx, max_val))
}

/// `find_max` specialised for 32-bit accumulators (e.g. raw classifier scores).
pub fn find_max_int32(values: &[i32]) -> Option<(usize, i32)> {
    find_max(values)
}

/// Find the element with the largest magnitude, returning its index and
/// absolute value. Used to pick dynamic scaling shifts.
pub fn find_max_magnitude(values: &[i64]) -> Option<(usize, u64)> {
    let (first, rest) = values.split_first()?;
    let mut max_idx = 0;
    let mut max_mag = first.unsigned_abs();

    for (i, val) in rest.iter().enumerate() {
        let mag = val.unsigned_abs();
        if mag > max_mag {
            max_idx = i + 1;
            max_mag = mag;
        }
    }
    Some((max_idx, max_mag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_max_unique() {
        assert_eq!(find_max(&[3i16, -7, 12, 5]), Some((2, 12)));
        assert_eq!(find_max(&[-3i8]), Some((0, -3)));
    }

    #[test]
    fn test_find_max_ties_pick_first() {
        assert_eq!(find_max(&[1i8, 9, 4, 9, 9]), Some((1, 9)));
        assert_eq!(find_max_int32(&[-5, -5, -5]), Some((0, -5)));
    }

    #[test]
    fn test_find_max_empty() {
        assert_eq!(find_max::<i16>(&[]), None);
        assert_eq!(find_max_int32(&[]), None);
        assert_eq!(find_max_magnitude(&[]), None);
    }

    #[test]
    fn test_find_max_floats_skip_nan() {
        assert_eq!(find_max(&[0.5f32, f32::NAN, 0.75]), Some((2, 0.75)));
        assert_eq!(find_max(&[f32::NAN, 0.5, 0.75]), Some((2, 0.75)));
        assert_eq!(find_max(&[f32::NAN, f32::NAN, -1.0, -2.0]), Some((2, -1.0)));
        let (idx, val) = find_max(&[f32::NAN, f32::NAN]).unwrap();
        assert_eq!(idx, 0);
        assert!(val.is_nan());
    }

    #[test]
    fn test_find_max_magnitude_uses_absolute_value() {
        assert_eq!(find_max_magnitude(&[10, -400, 399]), Some((1, 400)));
        assert_eq!(find_max_magnitude(&[i64::MIN, 1]), Some((0, 1u64 << 63)));
    }
}
