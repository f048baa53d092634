/// Conversions between floating point and Q-format fixed point
use crate::error::{MlError, Result};
use super::data::MlData;

/// Check the common preconditions of every array conversion.
fn check_args(in_len: usize, out_len: usize, q: u8, max_q: u8) -> Result<()> {
    if in_len == 0 {
        return Err(MlError::InvalidArgument("conversion input is empty".into()));
    }
    if in_len != out_len {
        return Err(MlError::InvalidArgument(format!(
            "conversion length mismatch: input {} vs output {}",
            in_len, out_len
        )));
    }
    if q > max_q {
        return Err(MlError::InvalidArgument(format!(
            "Q-fraction bits {} exceed the maximum of {}",
            q, max_q
        )));
    }
    Ok(())
}

/// Quantize a single value: scale, round half away from zero, saturate.
#[inline]
pub fn quantize_value<T: MlData>(value: f32, norm: f32) -> T {
    let mut val = value * norm;
    val += if val > 0.0 { 0.5 } else { -0.5 };
    // float-to-int `as` casts saturate, so this never wraps
    T::saturate_from(val as i64)
}

/// Convert floats to Q-format integers of type `T` with `q` fraction bits.
pub fn convert_flt_to_int<T: MlData>(input: &[f32], output: &mut [T], q: u8) -> Result<()> {
    check_args(input.len(), output.len(), q, T::MAX_Q)?;

    let norm = (1u32 << q) as f32;
    for (dst, &src) in output.iter_mut().zip(input) {
        *dst = quantize_value(src, norm);
    }
    Ok(())
}

/// Convert floats to 8-bit Q-format integers (`q` in 0..=7).
pub fn convert_flt_to_int8(input: &[f32], output: &mut [i8], q: u8) -> Result<()> {
    convert_flt_to_int(input, output, q)
}

/// Convert floats to 16-bit Q-format integers (`q` in 0..=15).
pub fn convert_flt_to_int16(input: &[f32], output: &mut [i16], q: u8) -> Result<()> {
    convert_flt_to_int(input, output, q)
}

/// Convert Q-format integers back to floats.
pub fn convert_int_to_flt<T: MlData>(input: &[T], output: &mut [f32], q: u8) -> Result<()> {
    check_args(input.len(), output.len(), q, T::MAX_Q)?;

    let norm = (1u32 << q) as f32;
    for (dst, &src) in output.iter_mut().zip(input) {
        *dst = src.to_i64() as f32 / norm;
    }
    Ok(())
}

/// Affine (scale / zero-point) quantization to int8, as used by
/// TFLite-converted models.
pub fn convert_flt_to_int8_affine(
    input: &[f32],
    output: &mut [i8],
    scale: f32,
    zero_point: i32,
) -> Result<()> {
    check_args(input.len(), output.len(), 0, 0)?;
    if !(scale > 0.0) {
        return Err(MlError::InvalidArgument(format!("scale must be positive, got {}", scale)));
    }

    for (dst, &src) in output.iter_mut().zip(input) {
        let mut val = src / scale + zero_point as f32;
        val += if val > 0.0 { 0.5 } else { -0.5 };
        *dst = i8::saturate_from(val as i64);
    }
    Ok(())
}

/// Inverse of [`convert_flt_to_int8_affine`].
pub fn convert_int8_to_flt_affine(
    input: &[i8],
    output: &mut [f32],
    scale: f32,
    zero_point: i32,
) -> Result<()> {
    check_args(input.len(), output.len(), 0, 0)?;
    if !(scale > 0.0) {
        return Err(MlError::InvalidArgument(format!("scale must be positive, got {}", scale)));
    }

    for (dst, &src) in output.iter_mut().zip(input) {
        *dst = (src as i32 - zero_point) as f32 * scale;
    }
    Ok(())
}
