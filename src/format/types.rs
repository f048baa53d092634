use std::fmt;
use serde::{Deserialize, Serialize};
use crate::error::{MlError, Result};

/// The magic number that identifies model binaries
pub const MODEL_MAGIC: u32 = 0x4E4E5154; // "TQNN" in ASCII

/// Only version understood by this reader
pub const FORMAT_VERSION: u32 = 1;

/// Longest model name stored in a binary, in bytes
pub const MODEL_NAME_LEN: usize = 64;

/// Largest Q-fraction bit count accepted for an i32 bias
pub const MAX_BIAS_Q: u8 = 31;

/// Activation / weight width combination of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// 8-bit activations, 8-bit weights
    Int8x8 = 1,
    /// 16-bit activations, 8-bit weights
    Int16x8 = 2,
    /// 16-bit activations, 16-bit weights
    Int16x16 = 3,
}

impl DataKind {
    /// Width in bits of the model's input and output elements
    pub fn activation_bits(&self) -> u32 {
        match self {
            DataKind::Int8x8 => 8,
            DataKind::Int16x8 | DataKind::Int16x16 => 16,
        }
    }

    /// Name of the activation element type, matching `MlData::NAME`
    pub fn activation_name(&self) -> &'static str {
        match self {
            DataKind::Int8x8 => "int8",
            DataKind::Int16x8 | DataKind::Int16x16 => "int16",
        }
    }

    /// Storage type of the layer weights
    pub fn weight_type(&self) -> WeightType {
        match self {
            DataKind::Int8x8 | DataKind::Int16x8 => WeightType::Int8,
            DataKind::Int16x16 => WeightType::Int16,
        }
    }

    pub fn type_string(&self) -> &'static str {
        match self {
            DataKind::Int8x8 => "INT8x8",
            DataKind::Int16x8 => "INT16x8",
            DataKind::Int16x16 => "INT16x16",
        }
    }
}

impl TryFrom<u32> for DataKind {
    type Error = MlError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(DataKind::Int8x8),
            2 => Ok(DataKind::Int16x8),
            3 => Ok(DataKind::Int16x16),
            _ => Err(MlError::InvalidFormat(format!("Unknown data kind: {}", value))),
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.type_string())
    }
}

/// Stored element type of a weight or bias run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightType {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
}

impl WeightType {
    pub fn bits(&self) -> u32 {
        match self {
            WeightType::Int8 => 8,
            WeightType::Int16 => 16,
            WeightType::Int32 => 32,
        }
    }

    /// Largest Q-fraction bit count the type can carry
    pub fn max_q(&self) -> u8 {
        (self.bits() - 1) as u8
    }

    /// Largest stored magnitude
    pub fn max_value(&self) -> i64 {
        (1i64 << (self.bits() - 1)) - 1
    }
}

/// Layer kind identifiers as stored in the layer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Dense = 1,
    Relu = 2,
    Sigmoid = 3,
    Tanh = 4,
    Softmax = 5,
    Gru = 6,
}

impl LayerKind {
    pub fn type_string(&self) -> &'static str {
        match self {
            LayerKind::Dense => "Dense",
            LayerKind::Relu => "ReLU",
            LayerKind::Sigmoid => "Sigmoid",
            LayerKind::Tanh => "Tanh",
            LayerKind::Softmax => "Softmax",
            LayerKind::Gru => "GRU",
        }
    }
}

impl TryFrom<u32> for LayerKind {
    type Error = MlError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(LayerKind::Dense),
            2 => Ok(LayerKind::Relu),
            3 => Ok(LayerKind::Sigmoid),
            4 => Ok(LayerKind::Tanh),
            5 => Ok(LayerKind::Softmax),
            6 => Ok(LayerKind::Gru),
            _ => Err(MlError::InvalidFormat(format!("Unknown layer kind: {}", value))),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.type_string())
    }
}

/// Fixed part of a model binary, readable without touching the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHeader {
    pub name: String,
    pub data_kind: DataKind,
    pub input_size: usize,
    pub output_size: usize,
    /// Default Q-fraction bits of the model input
    pub input_q: u8,
    /// Frames per recurrent window, 0 when the model is not recurrent
    pub recurrent_ts: usize,
    pub layer_count: usize,
}

/// Fully connected layer: `y = W x + b`
#[derive(Debug, Clone, PartialEq)]
pub struct DenseParams {
    pub input: usize,
    pub output: usize,
    pub weight_q: u8,
    pub bias_q: u8,
    /// Row-major `[output][input]`
    pub weights: Vec<i32>,
    pub bias: Vec<i32>,
}

/// Gated recurrent unit with gates stacked in z, r, n order
#[derive(Debug, Clone, PartialEq)]
pub struct GruParams {
    pub input: usize,
    pub hidden: usize,
    pub weight_q: u8,
    pub bias_q: u8,
    /// Input weights, row-major `[3 * hidden][input]`
    pub w: Vec<i32>,
    /// Recurrent weights, row-major `[3 * hidden][hidden]`
    pub u: Vec<i32>,
    pub bias: Vec<i32>,
}

/// One entry of the layer table
#[derive(Debug, Clone, PartialEq)]
pub enum LayerDescriptor {
    Dense(DenseParams),
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Gru(GruParams),
}

impl LayerDescriptor {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerDescriptor::Dense(_) => LayerKind::Dense,
            LayerDescriptor::Relu => LayerKind::Relu,
            LayerDescriptor::Sigmoid => LayerKind::Sigmoid,
            LayerDescriptor::Tanh => LayerKind::Tanh,
            LayerDescriptor::Softmax => LayerKind::Softmax,
            LayerDescriptor::Gru(_) => LayerKind::Gru,
        }
    }

    /// Width this layer expects, or `None` for width-preserving activations
    pub fn input_width(&self) -> Option<usize> {
        match self {
            LayerDescriptor::Dense(p) => Some(p.input),
            LayerDescriptor::Gru(p) => Some(p.input),
            _ => None,
        }
    }

    /// Width this layer produces given the width it receives
    pub fn output_width(&self, input: usize) -> usize {
        match self {
            LayerDescriptor::Dense(p) => p.output,
            LayerDescriptor::Gru(p) => p.hidden,
            _ => input,
        }
    }

    /// Stored weight and bias elements
    pub fn parameter_count(&self) -> usize {
        match self {
            LayerDescriptor::Dense(p) => p.weights.len() + p.bias.len(),
            LayerDescriptor::Gru(p) => p.w.len() + p.u.len() + p.bias.len(),
            _ => 0,
        }
    }
}

/// A parsed model binary
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub header: ModelHeader,
    pub layers: Vec<LayerDescriptor>,
}

impl ModelDescriptor {
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    pub fn is_recurrent(&self) -> bool {
        self.layers.iter().any(|l| matches!(l, LayerDescriptor::Gru(_)))
    }

    /// Check the structural invariants shared by the reader and the writer.
    pub fn validate(&self) -> Result<()> {
        let header = &self.header;
        if header.name.len() > MODEL_NAME_LEN {
            return Err(MlError::InvalidFormat(format!(
                "Model name is {} bytes, limit is {}",
                header.name.len(),
                MODEL_NAME_LEN
            )));
        }
        if header.input_size == 0 || header.output_size == 0 {
            return Err(MlError::InvalidFormat("Model input and output sizes must be non-zero".into()));
        }
        if header.layer_count != self.layers.len() {
            return Err(MlError::InvalidFormat(format!(
                "Header declares {} layers, found {}",
                header.layer_count,
                self.layers.len()
            )));
        }
        if header.input_q > (header.data_kind.activation_bits() - 1) as u8 {
            return Err(MlError::InvalidFormat(format!(
                "Input Q {} does not fit {} activations",
                header.input_q, header.data_kind
            )));
        }

        let weight_type = header.data_kind.weight_type();
        let mut width = header.input_size;
        for (index, layer) in self.layers.iter().enumerate() {
            if let Some(expected) = layer.input_width() {
                if expected != width {
                    return Err(MlError::InvalidFormat(format!(
                        "Layer {} ({}) expects width {}, previous layer produces {}",
                        index,
                        layer.kind(),
                        expected,
                        width
                    )));
                }
            }
            match layer {
                LayerDescriptor::Dense(p) => {
                    check_layer_q(index, p.weight_q, p.bias_q, weight_type)?;
                    check_len(index, "weights", p.weights.len(), p.output * p.input)?;
                    check_len(index, "bias", p.bias.len(), p.output)?;
                    if p.output == 0 {
                        return Err(MlError::InvalidFormat(format!("Layer {} has zero outputs", index)));
                    }
                }
                LayerDescriptor::Gru(p) => {
                    check_layer_q(index, p.weight_q, p.bias_q, weight_type)?;
                    check_len(index, "W", p.w.len(), 3 * p.hidden * p.input)?;
                    check_len(index, "U", p.u.len(), 3 * p.hidden * p.hidden)?;
                    check_len(index, "bias", p.bias.len(), 3 * p.hidden)?;
                    if p.hidden == 0 {
                        return Err(MlError::InvalidFormat(format!("Layer {} has zero hidden units", index)));
                    }
                }
                _ => {}
            }
            width = layer.output_width(width);
        }

        if width != header.output_size {
            return Err(MlError::InvalidFormat(format!(
                "Last layer produces width {}, header declares output size {}",
                width, header.output_size
            )));
        }
        if header.recurrent_ts > 0 && !self.is_recurrent() {
            return Err(MlError::InvalidFormat(
                "Recurrent window set on a model without recurrent layers".into(),
            ));
        }
        Ok(())
    }
}

fn check_layer_q(index: usize, weight_q: u8, bias_q: u8, weight_type: WeightType) -> Result<()> {
    if weight_q > weight_type.max_q() {
        return Err(MlError::InvalidFormat(format!(
            "Layer {} weight Q {} exceeds {} for {:?} weights",
            index,
            weight_q,
            weight_type.max_q(),
            weight_type
        )));
    }
    if bias_q > MAX_BIAS_Q {
        return Err(MlError::InvalidFormat(format!(
            "Layer {} bias Q {} exceeds {}",
            index, bias_q, MAX_BIAS_Q
        )));
    }
    Ok(())
}

fn check_len(index: usize, what: &str, found: usize, expected: usize) -> Result<()> {
    if found != expected {
        return Err(MlError::InvalidFormat(format!(
            "Layer {} {} holds {} values, expected {}",
            index, what, found, expected
        )));
    }
    Ok(())
}
