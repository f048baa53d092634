//! Layer kernels.
//!
//! Each kernel reads a tensor of widened words carrying `q` fraction bits
//! and writes its result into `out`, returning the fraction bits of the
//! result. Kernels never allocate.

use ndarray::{ArrayView1, ArrayView2};
use crate::error::InferenceFault;
use super::fixed::{
    align_q, div_round, exp_neg, from_unit, requantize, round_shift, saturate, sigmoid_unit, tanh_unit,
    to_unit_q, UNIT_Q,
};

/// Deepest accumulator Q a kernel accepts
const MAX_ACC_Q: u32 = 62;

fn dot(row: ArrayView1<i32>, x: &[i64]) -> Result<i64, InferenceFault> {
    row.iter().zip(x).try_fold(0i64, |sum, (&w, &v)| {
        (w as i64)
            .checked_mul(v)
            .and_then(|p| sum.checked_add(p))
            .ok_or(InferenceFault::AccumulatorOverflow)
    })
}

/// Fully connected layer with dynamic output scaling.
#[allow(clippy::too_many_arguments)]
pub fn dense(
    weights: ArrayView2<i32>,
    bias: &[i32],
    weight_q: u32,
    bias_q: u32,
    x: &[i64],
    q_in: u32,
    acc: &mut [i64],
    out: &mut [i64],
    bits: u32,
) -> Result<u8, InferenceFault> {
    let (rows, cols) = weights.dim();
    if x.len() != cols || acc.len() != rows || out.len() != rows || bias.len() != rows {
        return Err(InferenceFault::ShapeMismatch);
    }
    let q_acc = q_in + weight_q;
    if q_acc > MAX_ACC_Q {
        return Err(InferenceFault::QFormatRange);
    }

    for ((dst, row), &b) in acc.iter_mut().zip(weights.outer_iter()).zip(bias) {
        let b = align_q(b as i64, bias_q, q_acc).ok_or(InferenceFault::BiasAlignment)?;
        *dst = dot(row, x)?
            .checked_add(b)
            .ok_or(InferenceFault::AccumulatorOverflow)?;
    }
    Ok(requantize(acc, q_acc, bits, out))
}

pub fn relu(x: &[i64], q_in: u32, out: &mut [i64]) -> u8 {
    for (dst, &v) in out.iter_mut().zip(x) {
        *dst = v.max(0);
    }
    q_in as u8
}

pub fn sigmoid(x: &[i64], q_in: u32, out: &mut [i64], bits: u32) -> u8 {
    for (dst, &v) in out.iter_mut().zip(x) {
        *dst = from_unit(sigmoid_unit(to_unit_q(v, q_in)), bits);
    }
    (bits - 1) as u8
}

pub fn tanh(x: &[i64], q_in: u32, out: &mut [i64], bits: u32) -> u8 {
    for (dst, &v) in out.iter_mut().zip(x) {
        *dst = from_unit(tanh_unit(to_unit_q(v, q_in)), bits);
    }
    (bits - 1) as u8
}

/// Softmax over the whole tensor; the maximum is subtracted before `exp`.
pub fn softmax(x: &[i64], q_in: u32, out: &mut [i64], bits: u32) -> u8 {
    let max = x.iter().copied().max().unwrap_or(0);
    // The maximum contributes exactly one unit, so the sum is never zero
    let mut sum = 0i64;
    for (dst, &v) in out.iter_mut().zip(x) {
        *dst = exp_neg(to_unit_q(v.saturating_sub(max), q_in));
        sum += *dst;
    }
    for dst in out.iter_mut().take(x.len()) {
        *dst = from_unit(div_round(*dst << UNIT_Q, sum), bits);
    }
    (bits - 1) as u8
}

/// Borrowed parameters of a GRU layer
pub struct GruWeights<'a> {
    pub w: ArrayView2<'a, i32>,
    pub u: ArrayView2<'a, i32>,
    pub bias: &'a [i32],
    pub weight_q: u32,
    pub bias_q: u32,
}

impl GruWeights<'_> {
    fn hidden(&self) -> usize {
        self.u.dim().1
    }

    /// Pre-activation of gate row `row` at Q30.
    fn preactivation(
        &self,
        row: usize,
        x: &[i64],
        q_x: u32,
        h: &[i64],
        q_h: u32,
    ) -> Result<i64, InferenceFault> {
        let q_wx = q_x + self.weight_q;
        let q_uh = q_h + self.weight_q;
        let q_common = q_wx.min(q_uh);
        if q_wx.max(q_uh) > MAX_ACC_Q {
            return Err(InferenceFault::QFormatRange);
        }

        let wx = dot(self.w.row(row), x)?;
        let uh = dot(self.u.row(row), h)?;
        let bias = align_q(self.bias[row] as i64, self.bias_q, q_common)
            .ok_or(InferenceFault::BiasAlignment)?;

        let sum = round_shift(wx, q_wx - q_common)
            .checked_add(round_shift(uh, q_uh - q_common))
            .and_then(|s| s.checked_add(bias))
            .ok_or(InferenceFault::AccumulatorOverflow)?;
        Ok(to_unit_q(sum, q_common))
    }
}

/// One GRU time step.
///
/// `h` holds the hidden state at Q(bits - 1) and is updated in place;
/// `gates` needs room for `3 * hidden` words. The new state is also
/// copied to `out`.
pub fn gru_step(
    p: &GruWeights,
    x: &[i64],
    q_x: u32,
    h: &mut [i64],
    gates: &mut [i64],
    out: &mut [i64],
    bits: u32,
) -> Result<u8, InferenceFault> {
    let hidden = p.hidden();
    if h.len() != hidden
        || out.len() != hidden
        || gates.len() < 3 * hidden
        || p.w.dim() != (3 * hidden, x.len())
        || p.bias.len() != 3 * hidden
    {
        return Err(InferenceFault::ShapeMismatch);
    }
    let q_h = bits - 1;
    let one = 1i64 << q_h;
    let (z, rest) = gates.split_at_mut(hidden);
    let (r, rest) = rest.split_at_mut(hidden);
    let rh = &mut rest[..hidden];

    for j in 0..hidden {
        z[j] = from_unit(sigmoid_unit(p.preactivation(j, x, q_x, h, q_h)?), bits);
        r[j] = from_unit(sigmoid_unit(p.preactivation(hidden + j, x, q_x, h, q_h)?), bits);
    }
    for k in 0..hidden {
        rh[k] = round_shift(r[k] * h[k], q_h);
    }
    for j in 0..hidden {
        let n = from_unit(tanh_unit(p.preactivation(2 * hidden + j, x, q_x, rh, q_h)?), bits);
        let mixed = (one - z[j]) * n + z[j] * h[j];
        h[j] = saturate(round_shift(mixed, q_h), bits);
        out[j] = h[j];
    }
    Ok(q_h as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_dense_identity() {
        // Identity at Q6, input at Q5: accumulator Q11 is shifted back to Q7
        let w = Array2::from_shape_vec((2, 2), vec![64, 0, 0, 64]).unwrap();
        let mut acc = [0i64; 2];
        let mut out = [0i64; 2];
        let q = dense(w.view(), &[0, 0], 6, 0, &[16, -8], 5, &mut acc, &mut out, 8).unwrap();
        assert_eq!(q, 7);
        assert_eq!(out, [64, -32]); // 0.5, -0.25
    }

    #[test]
    fn test_dense_bias_alignment() {
        let w = Array2::from_shape_vec((1, 1), vec![1]).unwrap();
        let mut acc = [0i64; 1];
        let mut out = [0i64; 1];
        // bias 1.0 at Q2 added to 0 at Q4
        let q = dense(w.view(), &[4], 0, 2, &[0], 4, &mut acc, &mut out, 16).unwrap();
        assert_eq!(q, 4);
        assert_eq!(out, [16]);
    }

    #[test]
    fn test_dense_shape_mismatch() {
        let w = Array2::from_shape_vec((1, 2), vec![1, 1]).unwrap();
        let mut acc = [0i64; 1];
        let mut out = [0i64; 1];
        let err = dense(w.view(), &[0], 0, 0, &[1], 0, &mut acc, &mut out, 8).unwrap_err();
        assert_eq!(err, InferenceFault::ShapeMismatch);
    }

    #[test]
    fn test_dense_overflow() {
        let w = Array2::from_shape_vec((1, 2), vec![i32::MAX, i32::MAX]).unwrap();
        let mut acc = [0i64; 1];
        let mut out = [0i64; 1];
        let x = [i64::MAX / 4, i64::MAX / 4];
        let err = dense(w.view(), &[0], 0, 0, &x, 0, &mut acc, &mut out, 16).unwrap_err();
        assert_eq!(err, InferenceFault::AccumulatorOverflow);
    }

    #[test]
    fn test_activations() {
        let mut out = [0i64; 3];
        assert_eq!(relu(&[-5, 0, 7], 3, &mut out), 3);
        assert_eq!(out, [0, 0, 7]);

        assert_eq!(sigmoid(&[0, 0, 0], 4, &mut out, 8), 7);
        assert_eq!(out, [64, 64, 64]);

        tanh(&[0, 1 << 20, -(1 << 20)], 4, &mut out, 16);
        assert_eq!(out, [0, 32767, -32768]);
    }

    #[test]
    fn test_softmax_uniform_and_peaked() {
        let mut out = [0i64; 4];
        softmax(&[5, 5, 5, 5], 2, &mut out, 16);
        assert_eq!(out, [8192; 4]);

        softmax(&[0, 0, 1 << 12], 4, &mut out[..3], 8);
        assert_eq!(&out[..3], &[0, 0, 127]);
    }

    #[test]
    fn test_gru_zero_weights_halves_state() {
        // All-zero parameters: z = r = 0.5, n = 0, so h' = h / 2
        let hidden = 2;
        let w = Array2::<i32>::zeros((3 * hidden, 1));
        let u = Array2::<i32>::zeros((3 * hidden, hidden));
        let bias = vec![0; 3 * hidden];
        let p = GruWeights { w: w.view(), u: u.view(), bias: &bias, weight_q: 7, bias_q: 0 };

        let mut h = [64i64, -64];
        let mut gates = [0i64; 6];
        let mut out = [0i64; 2];
        let q = gru_step(&p, &[10], 3, &mut h, &mut gates, &mut out, 8).unwrap();
        assert_eq!(q, 7);
        assert_eq!(h, [32, -32]);
        assert_eq!(out, h);
    }
}
