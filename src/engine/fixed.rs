// Q-format arithmetic on widened i64 words
use crate::quant::find_max_magnitude;

/// Inclusive value range of a signed activation of `bits` width
#[inline]
pub fn activation_bounds(bits: u32) -> (i64, i64) {
    let max = (1i64 << (bits - 1)) - 1;
    (-max - 1, max)
}

#[inline]
pub fn saturate(value: i64, bits: u32) -> i64 {
    let (min, max) = activation_bounds(bits);
    value.clamp(min, max)
}

/// Arithmetic right shift with round-half-up.
#[inline]
pub fn round_shift(value: i64, shift: u32) -> i64 {
    match shift {
        0 => value,
        s if s >= 63 => {
            if value < 0 {
                -1
            } else {
                0
            }
        }
        s => value.saturating_add(1i64 << (s - 1)) >> s,
    }
}

/// Move `value` from `from` fraction bits to `to` fraction bits.
/// `None` if scaling up overflows.
#[inline]
pub fn align_q(value: i64, from: u32, to: u32) -> Option<i64> {
    if to >= from {
        let up = to - from;
        if up >= 63 {
            return if value == 0 { Some(0) } else { None };
        }
        value.checked_mul(1i64 << up)
    } else {
        Some(round_shift(value, from - to))
    }
}

/// Fraction bits of the domain the nonlinearities are evaluated in
pub const UNIT_Q: u32 = 30;
const UNIT: i64 = 1 << UNIT_Q;
/// ln 2 at Q30
const LN2: i64 = 744_261_118;
/// Inputs beyond +-32 saturate every nonlinearity at Q30
const RANGE: i64 = 32;
const EXP_TERMS: i64 = 10;

/// Move a word at `q` fraction bits into Q30, clamped to +-32.
pub fn to_unit_q(value: i64, q: u32) -> i64 {
    if q >= UNIT_Q {
        round_shift(value, q - UNIT_Q).clamp(-RANGE * UNIT, RANGE * UNIT)
    } else {
        let limit = RANGE << q;
        value.clamp(-limit, limit) << (UNIT_Q - q)
    }
}

/// Rounded quotient of a non-negative numerator and a positive divisor
#[inline]
pub fn div_round(numerator: i64, divisor: i64) -> i64 {
    (numerator + divisor / 2) / divisor
}

/// `e^x` for `x <= 0`, both at Q30.
///
/// Splits `x = r - k ln2` with `r` in `(-ln2, 0]`, evaluates `e^r` with a
/// Horner-form Taylor series and shifts the result down by `k`.
pub fn exp_neg(x: i64) -> i64 {
    let x = x.clamp(-2 * RANGE * UNIT, 0);
    let k = -x / LN2;
    let r = x + k * LN2;
    let mut p = UNIT;
    for i in (1..=EXP_TERMS).rev() {
        p = UNIT + round_shift(p * r, UNIT_Q) / i;
    }
    round_shift(p, k as u32)
}

/// Logistic function, Q30 in and out
pub fn sigmoid_unit(x: i64) -> i64 {
    let e = exp_neg(-x.abs());
    let positive = div_round(UNIT << UNIT_Q, UNIT + e);
    if x >= 0 {
        positive
    } else {
        UNIT - positive
    }
}

/// Hyperbolic tangent, Q30 in and out
pub fn tanh_unit(x: i64) -> i64 {
    let e = exp_neg(-2 * x.abs());
    let t = div_round((UNIT - e) << UNIT_Q, UNIT + e);
    if x >= 0 {
        t
    } else {
        -t
    }
}

/// Encode a Q30 value in `[-1, 1]` at Q(bits - 1), saturating.
#[inline]
pub fn from_unit(value: i64, bits: u32) -> i64 {
    let scaled = align_q(value, UNIT_Q, bits - 1).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX });
    saturate(scaled, bits)
}

/// Scale accumulators at `q_acc` fraction bits into activations of `bits`
/// width, writing them to `out` and returning the output fraction bits.
///
/// The shift is the smallest that makes the largest magnitude fit, raised
/// so the output Q never exceeds `bits - 1`. When even shifting out every
/// fraction bit is not enough, values saturate at Q0.
pub fn requantize(acc: &[i64], q_acc: u32, bits: u32, out: &mut [i64]) -> u8 {
    let (_, max) = activation_bounds(bits);
    let max_q = bits - 1;
    let magnitude = find_max_magnitude(acc).map(|(_, m)| m).unwrap_or(0);

    let mut shift = 0u32;
    while shift < 63 && round_shift_magnitude(magnitude, shift) > max as u64 {
        shift += 1;
    }
    if q_acc > max_q + shift {
        shift = q_acc - max_q;
    }
    let shift = shift.min(q_acc);

    for (dst, &v) in out.iter_mut().zip(acc) {
        *dst = saturate(round_shift(v, shift), bits);
    }
    (q_acc - shift) as u8
}

#[inline]
fn round_shift_magnitude(magnitude: u64, shift: u32) -> u64 {
    if shift == 0 {
        magnitude
    } else {
        magnitude.saturating_add(1u64 << (shift - 1)) >> shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_shift() {
        assert_eq!(round_shift(5, 1), 3);
        assert_eq!(round_shift(4, 1), 2);
        assert_eq!(round_shift(-5, 1), -2);
        assert_eq!(round_shift(-6, 2), -1);
        assert_eq!(round_shift(i64::MAX, 70), 0);
    }

    #[test]
    fn test_align_q() {
        assert_eq!(align_q(3, 2, 5), Some(24));
        assert_eq!(align_q(24, 5, 2), Some(3));
        assert_eq!(align_q(i64::MAX / 2, 0, 2), None);
        assert_eq!(align_q(0, 0, 80), Some(0));
    }

    #[test]
    fn test_requantize_keeps_precision_when_values_fit() {
        let mut out = [0i64; 2];
        // 0.5 and -0.25 at Q10 fit an i16 at Q10 unchanged
        let q = requantize(&[512, -256], 10, 16, &mut out);
        assert_eq!(q, 10);
        assert_eq!(out, [512, -256]);
    }

    #[test]
    fn test_requantize_caps_output_q() {
        let mut out = [0i64; 1];
        // Q20 would exceed the i8 maximum of Q7
        let q = requantize(&[1 << 19], 20, 8, &mut out);
        assert_eq!(q, 7);
        assert_eq!(out, [64]);
    }

    #[test]
    fn test_requantize_shifts_large_values() {
        let mut out = [0i64; 2];
        // 300 does not fit i8, one bit of shift brings it to 150 -> still too
        // large, two bits gives 75
        let q = requantize(&[300, -20], 4, 8, &mut out);
        assert_eq!(q, 2);
        assert_eq!(out, [75, -5]);
    }

    #[test]
    fn test_requantize_saturates_at_q0() {
        let mut out = [0i64; 1];
        let q = requantize(&[100_000], 2, 8, &mut out);
        assert_eq!(q, 0);
        assert_eq!(out, [127]);
    }

    #[test]
    fn test_from_unit() {
        assert_eq!(from_unit(UNIT / 2, 8), 64);
        assert_eq!(from_unit(UNIT, 8), 127);
        assert_eq!(from_unit(-UNIT, 16), -32768);
    }

    #[test]
    fn test_to_unit_q_clamps() {
        assert_eq!(to_unit_q(3, 1), 3 << 29);
        assert_eq!(to_unit_q(1 << 40, 40), UNIT);
        assert_eq!(to_unit_q(i64::MIN, 0), -RANGE * UNIT);
        assert_eq!(to_unit_q(40 << 40, 40), RANGE * UNIT);
    }

    fn unit(v: f64) -> i64 {
        (v * UNIT as f64).round() as i64
    }

    #[test]
    fn test_exp_neg_tracks_exp() {
        assert_eq!(exp_neg(0), UNIT);
        assert_eq!(exp_neg(5), UNIT);
        for x in [-0.001, -0.5, -0.6931, -1.0, -2.75, -7.0, -15.5] {
            let got = exp_neg(unit(x)) as f64 / UNIT as f64;
            assert!((got - x.exp()).abs() < 1e-7, "exp({}) = {}", x, got);
        }
        assert_eq!(exp_neg(-40 * UNIT), 0);
        assert_eq!(exp_neg(i64::MIN), 0);
    }

    #[test]
    fn test_sigmoid_and_tanh_unit() {
        assert_eq!(sigmoid_unit(0), UNIT / 2);
        assert_eq!(tanh_unit(0), 0);
        for x in [0.25, 1.0, 3.5, 9.0] {
            let s = sigmoid_unit(unit(x)) as f64 / UNIT as f64;
            assert!((s - 1.0 / (1.0 + (-x).exp())).abs() < 1e-7, "sigmoid({})", x);
            assert_eq!(sigmoid_unit(unit(x)) + sigmoid_unit(-unit(x)), UNIT);

            let t = tanh_unit(unit(x)) as f64 / UNIT as f64;
            assert!((t - x.tanh()).abs() < 1e-7, "tanh({})", x);
            assert_eq!(tanh_unit(-unit(x)), -tanh_unit(unit(x)));
        }
        assert_eq!(tanh_unit(RANGE * UNIT), UNIT);
    }
}
