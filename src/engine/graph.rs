use std::ops::Range;
use ndarray::Array2;
use tracing::debug;
use crate::error::{InferenceFault, MlError, Result};
use crate::format::{LayerDescriptor, LayerKind, ModelDescriptor};
use crate::quant::MlData;
use super::arena::Arena;
use super::kernels::{self, GruWeights};

/// An executable layer with its weights laid out for the kernels
#[derive(Debug, Clone)]
pub enum Layer {
    Dense {
        weights: Array2<i32>,
        bias: Vec<i32>,
        weight_q: u8,
        bias_q: u8,
    },
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Gru {
        w: Array2<i32>,
        u: Array2<i32>,
        bias: Vec<i32>,
        weight_q: u8,
        bias_q: u8,
        /// Hidden state words in the persistent arena
        state: Range<usize>,
    },
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Dense { .. } => LayerKind::Dense,
            Layer::Relu => LayerKind::Relu,
            Layer::Sigmoid => LayerKind::Sigmoid,
            Layer::Tanh => LayerKind::Tanh,
            Layer::Softmax => LayerKind::Softmax,
            Layer::Gru { .. } => LayerKind::Gru,
        }
    }
}

/// Arena sizes a graph needs, in words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaPlan {
    pub persistent_words: usize,
    pub scratch_words: usize,
    /// Widest tensor flowing between layers
    pub max_width: usize,
    pub max_hidden: usize,
}

impl ArenaPlan {
    /// Total bytes of both arenas
    pub fn bytes(&self) -> usize {
        (self.persistent_words + self.scratch_words) * std::mem::size_of::<i64>()
    }
}

/// The executable form of a model
#[derive(Debug, Clone)]
pub struct Graph {
    layers: Vec<Layer>,
    /// Output width of each layer
    widths: Vec<usize>,
    input_size: usize,
    output_size: usize,
    activation_bits: u32,
    plan: ArenaPlan,
}

fn matrix(rows: usize, cols: usize, values: &[i32], index: usize) -> Result<Array2<i32>> {
    Array2::from_shape_vec((rows, cols), values.to_vec()).map_err(|e| {
        MlError::InvalidFormat(format!("Layer {} weights do not form a {}x{} matrix: {}", index, rows, cols, e))
    })
}

impl Graph {
    /// Build the executable graph and its arena plan from a parsed model.
    pub fn from_descriptor(model: &ModelDescriptor) -> Result<Self> {
        model.validate()?;
        let header = &model.header;

        let mut layers = Vec::with_capacity(model.layers.len());
        let mut widths = Vec::with_capacity(model.layers.len());
        let mut width = header.input_size;
        let mut max_width = width;
        let mut max_hidden = 0;
        let mut persistent = 0;

        for (index, layer) in model.layers.iter().enumerate() {
            let built = match layer {
                LayerDescriptor::Dense(p) => Layer::Dense {
                    weights: matrix(p.output, p.input, &p.weights, index)?,
                    bias: p.bias.clone(),
                    weight_q: p.weight_q,
                    bias_q: p.bias_q,
                },
                LayerDescriptor::Gru(p) => {
                    let state = persistent..persistent + p.hidden;
                    persistent += p.hidden;
                    max_hidden = max_hidden.max(p.hidden);
                    Layer::Gru {
                        w: matrix(3 * p.hidden, p.input, &p.w, index)?,
                        u: matrix(3 * p.hidden, p.hidden, &p.u, index)?,
                        bias: p.bias.clone(),
                        weight_q: p.weight_q,
                        bias_q: p.bias_q,
                        state,
                    }
                }
                LayerDescriptor::Relu => Layer::Relu,
                LayerDescriptor::Sigmoid => Layer::Sigmoid,
                LayerDescriptor::Tanh => Layer::Tanh,
                LayerDescriptor::Softmax => Layer::Softmax,
            };
            width = layer.output_width(width);
            max_width = max_width.max(width);
            widths.push(width);
            layers.push(built);
        }

        // ping, pong, accumulator, gate work area
        let plan = ArenaPlan {
            persistent_words: persistent,
            scratch_words: 3 * max_width + 3 * max_hidden,
            max_width,
            max_hidden,
        };
        debug!(
            "Planned '{}': {} layers, persistent={} scratch={} words",
            header.name,
            layers.len(),
            plan.persistent_words,
            plan.scratch_words
        );

        Ok(Self {
            layers,
            widths,
            input_size: header.input_size,
            output_size: header.output_size,
            activation_bits: header.data_kind.activation_bits(),
            plan,
        })
    }

    /// Carve the planned regions out of fresh arenas.
    ///
    /// Fails with `OutOfMemory` if either arena is too small.
    pub fn bind(&self, persistent: &mut Arena, scratch: &mut Arena) -> Result<()> {
        persistent.reset();
        scratch.reset();
        persistent.alloc(self.plan.persistent_words).ok_or_else(|| {
            MlError::OutOfMemory(format!(
                "persistent arena holds {} words, model needs {}",
                persistent.capacity(),
                self.plan.persistent_words
            ))
        })?;
        scratch.alloc(self.plan.scratch_words).ok_or_else(|| {
            MlError::OutOfMemory(format!(
                "scratch arena holds {} words, model needs {}",
                scratch.capacity(),
                self.plan.scratch_words
            ))
        })?;
        persistent.clear();
        scratch.clear();
        Ok(())
    }

    /// Zero every recurrent hidden state.
    pub fn reset_state(&self, persistent: &mut Arena) {
        persistent.clear();
    }

    /// Run one frame through every layer.
    ///
    /// # Arguments
    ///
    /// * `input` - One frame of `input_size` elements at `q_in` fraction bits
    /// * `output` - Receives `output_size` elements
    /// * `on_layer` - Called after each layer with its index
    ///
    /// # Returns
    ///
    /// The fraction bits of the output
    pub fn execute<T: MlData>(
        &self,
        input: &[T],
        q_in: u8,
        persistent: &mut Arena,
        scratch: &mut Arena,
        output: &mut [T],
        on_layer: &mut dyn FnMut(usize) -> Result<()>,
    ) -> Result<u8> {
        let bits = self.activation_bits;
        let max_width = self.plan.max_width;
        if input.len() != self.input_size || output.len() != self.output_size {
            return Err(MlError::Inference { layer: 0, fault: InferenceFault::ShapeMismatch });
        }
        if scratch.used() < self.plan.scratch_words || persistent.used() < self.plan.persistent_words {
            return Err(MlError::Inference { layer: 0, fault: InferenceFault::ShapeMismatch });
        }

        let words = scratch.words_mut();
        let (ping, rest) = words.split_at_mut(max_width);
        let (pong, rest) = rest.split_at_mut(max_width);
        let (acc, gates) = rest.split_at_mut(max_width);

        for (dst, &v) in ping.iter_mut().zip(input) {
            *dst = v.to_i64();
        }

        let mut src: &mut [i64] = ping;
        let mut dst: &mut [i64] = pong;
        let mut width = self.input_size;
        let mut q = q_in as u32;

        for (index, layer) in self.layers.iter().enumerate() {
            let out_width = self.widths[index];
            let x = &src[..width];
            let out = &mut dst[..out_width];

            let result = match layer {
                Layer::Dense { weights, bias, weight_q, bias_q } => kernels::dense(
                    weights.view(),
                    bias,
                    *weight_q as u32,
                    *bias_q as u32,
                    x,
                    q,
                    &mut acc[..out_width],
                    out,
                    bits,
                ),
                Layer::Relu => Ok(kernels::relu(x, q, out)),
                Layer::Sigmoid => Ok(kernels::sigmoid(x, q, out, bits)),
                Layer::Tanh => Ok(kernels::tanh(x, q, out, bits)),
                Layer::Softmax => Ok(kernels::softmax(x, q, out, bits)),
                Layer::Gru { w, u, bias, weight_q, bias_q, state } => {
                    let weights = GruWeights {
                        w: w.view(),
                        u: u.view(),
                        bias,
                        weight_q: *weight_q as u32,
                        bias_q: *bias_q as u32,
                    };
                    let h = persistent.slice_mut(state.clone());
                    kernels::gru_step(&weights, x, q, h, gates, out, bits)
                }
            };
            q = result.map_err(|fault| MlError::Inference { layer: index, fault })? as u32;

            std::mem::swap(&mut src, &mut dst);
            width = out_width;
            on_layer(index)?;
        }

        for (dst, &v) in output.iter_mut().zip(src.iter()) {
            *dst = T::saturate_from(v);
        }
        Ok(q as u8)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Output width of each layer
    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn activation_bits(&self) -> u32 {
        self.activation_bits
    }

    pub fn plan(&self) -> ArenaPlan {
        self.plan
    }

    pub fn is_recurrent(&self) -> bool {
        self.plan.persistent_words > 0
    }
}
