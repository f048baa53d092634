#![allow(dead_code)]

use tinyinfer::format::{
    write_model, DataKind, DenseParams, GruParams, LayerDescriptor, ModelDescriptor, ModelHeader,
};

/// Small deterministic parameter pattern in `-8..=8` times `scale`.
pub fn pattern(n: usize, seed: usize, scale: i32) -> Vec<i32> {
    (0..n).map(|i| (((i + seed) * 37 % 17) as i32 - 8) * scale).collect()
}

/// 4 inputs -> dense 3 -> relu -> dense 3 -> softmax, int8 activations.
pub fn classifier() -> ModelDescriptor {
    ModelDescriptor {
        header: ModelHeader {
            name: "classifier".into(),
            data_kind: DataKind::Int8x8,
            input_size: 4,
            output_size: 3,
            input_q: 6,
            recurrent_ts: 0,
            layer_count: 4,
        },
        layers: vec![
            LayerDescriptor::Dense(DenseParams {
                input: 4,
                output: 3,
                weight_q: 6,
                bias_q: 6,
                weights: pattern(12, 1, 6),
                bias: pattern(3, 2, 4),
            }),
            LayerDescriptor::Relu,
            LayerDescriptor::Dense(DenseParams {
                input: 3,
                output: 3,
                weight_q: 6,
                bias_q: 6,
                weights: pattern(9, 3, 7),
                bias: vec![0, 8, -8],
            }),
            LayerDescriptor::Softmax,
        ],
    }
}

/// 2 inputs -> GRU 3 -> dense 2, int16 activations and weights, windows of 4.
pub fn recurrent() -> ModelDescriptor {
    ModelDescriptor {
        header: ModelHeader {
            name: "recurrent".into(),
            data_kind: DataKind::Int16x16,
            input_size: 2,
            output_size: 2,
            input_q: 12,
            recurrent_ts: 4,
            layer_count: 2,
        },
        layers: vec![
            LayerDescriptor::Gru(GruParams {
                input: 2,
                hidden: 3,
                weight_q: 12,
                bias_q: 12,
                w: pattern(18, 0, 200),
                u: pattern(27, 5, 150),
                bias: pattern(9, 7, 100),
            }),
            LayerDescriptor::Dense(DenseParams {
                input: 3,
                output: 2,
                weight_q: 12,
                bias_q: 12,
                weights: pattern(6, 4, 400),
                bias: vec![100, -100],
            }),
        ],
    }
}

pub fn classifier_bytes() -> Vec<u8> {
    write_model(&classifier()).expect("classifier model is valid")
}

pub fn recurrent_bytes() -> Vec<u8> {
    write_model(&recurrent()).expect("recurrent model is valid")
}

/// `frames * size` int16 inputs covering roughly -0.5..0.5 at Q12.
pub fn recurrent_frames(frames: usize, size: usize) -> Vec<i16> {
    pattern(frames * size, 11, 250).into_iter().map(|v| v as i16).collect()
}
