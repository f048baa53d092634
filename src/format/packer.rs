//! Float model descriptions and their quantization into model binaries.
//!
//! A float model is a JSON document listing layers with `f32` parameters.
//! Packing picks, per layer, the largest weight Q that represents every
//! weight without clipping, and the largest bias Q (at most 24) that keeps
//! every bias inside `i32`.

use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{MlError, Result};
use super::types::{
    DataKind, DenseParams, GruParams, LayerDescriptor, ModelDescriptor, ModelHeader, WeightType,
};

/// Upper bound on the bias Q chosen by the packer
const PACK_MAX_BIAS_Q: u8 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FloatLayer {
    Dense {
        /// `[output][input]`
        weights: Vec<Vec<f32>>,
        bias: Vec<f32>,
    },
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Gru {
        /// `[3 * hidden][input]`, gates z, r, n
        w: Vec<Vec<f32>>,
        /// `[3 * hidden][hidden]`
        u: Vec<Vec<f32>>,
        bias: Vec<f32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatModel {
    pub name: String,
    pub data_kind: DataKind,
    pub input_size: usize,
    /// Default input Q-fraction bits
    pub input_q: u8,
    #[serde(default)]
    pub recurrent_ts: usize,
    pub layers: Vec<FloatLayer>,
}

impl FloatModel {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| MlError::InvalidFormat(format!("Invalid float model JSON: {}", e)))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Quantize every layer and build a validated descriptor.
    pub fn quantize(&self) -> Result<ModelDescriptor> {
        let weight_type = self.data_kind.weight_type();
        let mut layers = Vec::with_capacity(self.layers.len());
        let mut width = self.input_size;

        for (index, layer) in self.layers.iter().enumerate() {
            let descriptor = match layer {
                FloatLayer::Dense { weights, bias } => {
                    let flat = flatten(index, weights, width)?;
                    let weight_q = choose_q(&flat, weight_type.max_value(), weight_type.max_q());
                    let bias_q = choose_q(bias, i32::MAX as i64, PACK_MAX_BIAS_Q);
                    debug!("Layer {} dense: weight_q={} bias_q={}", index, weight_q, bias_q);
                    LayerDescriptor::Dense(DenseParams {
                        input: width,
                        output: weights.len(),
                        weight_q,
                        bias_q,
                        weights: quantize_all(&flat, weight_q, weight_type),
                        bias: quantize_all(bias, bias_q, WeightType::Int32),
                    })
                }
                FloatLayer::Gru { w, u, bias } => {
                    if w.len() % 3 != 0 || w.is_empty() {
                        return Err(MlError::InvalidFormat(format!(
                            "Layer {} GRU input weights need 3 * hidden rows, found {}",
                            index,
                            w.len()
                        )));
                    }
                    let hidden = w.len() / 3;
                    let flat_w = flatten(index, w, width)?;
                    let flat_u = flatten(index, u, hidden)?;
                    let mut both = flat_w.clone();
                    both.extend_from_slice(&flat_u);
                    let weight_q = choose_q(&both, weight_type.max_value(), weight_type.max_q());
                    let bias_q = choose_q(bias, i32::MAX as i64, PACK_MAX_BIAS_Q);
                    LayerDescriptor::Gru(GruParams {
                        input: width,
                        hidden,
                        weight_q,
                        bias_q,
                        w: quantize_all(&flat_w, weight_q, weight_type),
                        u: quantize_all(&flat_u, weight_q, weight_type),
                        bias: quantize_all(bias, bias_q, WeightType::Int32),
                    })
                }
                FloatLayer::Relu => LayerDescriptor::Relu,
                FloatLayer::Sigmoid => LayerDescriptor::Sigmoid,
                FloatLayer::Tanh => LayerDescriptor::Tanh,
                FloatLayer::Softmax => LayerDescriptor::Softmax,
            };
            width = descriptor.output_width(width);
            layers.push(descriptor);
        }

        let model = ModelDescriptor {
            header: ModelHeader {
                name: self.name.clone(),
                data_kind: self.data_kind,
                input_size: self.input_size,
                output_size: width,
                input_q: self.input_q,
                recurrent_ts: self.recurrent_ts,
                layer_count: layers.len(),
            },
            layers,
        };
        model.validate()?;
        Ok(model)
    }

    /// Evaluate the model in `f64`, carrying GRU state in `hidden`.
    ///
    /// `hidden` holds one vector per GRU layer, in layer order; pass an empty
    /// vector to start from zero state.
    pub fn reference_forward(&self, input: &[f32], hidden: &mut Vec<Vec<f64>>) -> Result<Vec<f32>> {
        if input.len() != self.input_size {
            return Err(MlError::InvalidArgument(format!(
                "input holds {} values, model expects {}",
                input.len(),
                self.input_size
            )));
        }
        let mut x: Vec<f64> = input.iter().map(|&v| v as f64).collect();
        let mut gru_index = 0;

        for layer in &self.layers {
            x = match layer {
                FloatLayer::Dense { weights, bias } => weights
                    .iter()
                    .zip(bias)
                    .map(|(row, &b)| dot(row, &x) + b as f64)
                    .collect(),
                FloatLayer::Relu => x.iter().map(|&v| v.max(0.0)).collect(),
                FloatLayer::Sigmoid => x.iter().map(|&v| sigmoid(v)).collect(),
                FloatLayer::Tanh => x.iter().map(|&v| v.tanh()).collect(),
                FloatLayer::Softmax => {
                    let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    let exps: Vec<f64> = x.iter().map(|&v| (v - max).exp()).collect();
                    let sum: f64 = exps.iter().sum();
                    exps.iter().map(|&e| e / sum).collect()
                }
                FloatLayer::Gru { w, u, bias } => {
                    let h_len = w.len() / 3;
                    if hidden.len() <= gru_index {
                        hidden.push(vec![0.0; h_len]);
                    }
                    let h = &mut hidden[gru_index];
                    gru_index += 1;

                    let gate = |g: usize, j: usize, h_in: &[f64]| {
                        let row = g * h_len + j;
                        dot(&w[row], &x) + dot(&u[row], h_in) + bias[row] as f64
                    };
                    let z: Vec<f64> = (0..h_len).map(|j| sigmoid(gate(0, j, h))).collect();
                    let r: Vec<f64> = (0..h_len).map(|j| sigmoid(gate(1, j, h))).collect();
                    let rh: Vec<f64> = r.iter().zip(h.iter()).map(|(a, b)| a * b).collect();
                    let next: Vec<f64> = (0..h_len)
                        .map(|j| {
                            let n = gate(2, j, &rh).tanh();
                            (1.0 - z[j]) * n + z[j] * h[j]
                        })
                        .collect();
                    *h = next.clone();
                    next
                }
            };
        }
        Ok(x.iter().map(|&v| v as f32).collect())
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn dot(row: &[f32], x: &[f64]) -> f64 {
    row.iter().zip(x).map(|(&w, &v)| w as f64 * v).sum()
}

fn flatten(index: usize, rows: &[Vec<f32>], width: usize) -> Result<Vec<f32>> {
    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        if row.len() != width {
            return Err(MlError::InvalidFormat(format!(
                "Layer {} row holds {} values, expected {}",
                index,
                row.len(),
                width
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(flat)
}

/// Largest Q in `0..=max_q` that keeps every value within `max_value`.
pub fn choose_q(values: &[f32], max_value: i64, max_q: u8) -> u8 {
    let max_abs = values.iter().fold(0f64, |m, &v| m.max((v as f64).abs()));
    (0..=max_q)
        .rev()
        .find(|&q| (max_abs * (1u64 << q) as f64).round() <= max_value as f64)
        .unwrap_or(0)
}

fn quantize_all(values: &[f32], q: u8, weight_type: WeightType) -> Vec<i32> {
    let scale = (1u64 << q) as f64;
    let max = weight_type.max_value();
    let min = -max - 1;
    values
        .iter()
        .map(|&v| ((v as f64 * scale).round() as i64).clamp(min, max) as i32)
        .collect()
}
