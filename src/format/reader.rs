use std::io::Cursor;
use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;
use crate::error::{MlError, Result};
use crate::quant::formats::decode_weights;
use super::format_utils::{read_name, truncated};
use super::types::{
    DataKind, DenseParams, GruParams, LayerDescriptor, LayerKind, ModelDescriptor, ModelHeader,
    WeightType, FORMAT_VERSION, MODEL_MAGIC,
};

/// Parses model binaries held in memory.
pub struct ModelReader<'a> {
    cursor: Cursor<&'a [u8]>,
    weight_type: WeightType,
}

impl<'a> ModelReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            weight_type: WeightType::Int8,
        }
    }

    /// Read the magic, version and fixed header fields.
    pub fn read_header(&mut self) -> Result<ModelHeader> {
        if self.cursor.get_ref().is_empty() {
            return Err(MlError::InvalidArgument("model binary is empty".into()));
        }

        // Read magic
        let magic = self.read_u32("magic")?;
        if magic != MODEL_MAGIC {
            return Err(MlError::InvalidFormat(format!("Invalid magic number: {:#010x}", magic)));
        }

        // Read version
        let version = self.read_u32("version")?;
        if version != FORMAT_VERSION {
            return Err(MlError::InvalidFormat(format!(
                "Unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let name = read_name(&mut self.cursor)?;
        let data_kind = DataKind::try_from(self.read_u32("data kind")?)?;
        let input_size = self.read_u32("input size")? as usize;
        let output_size = self.read_u32("output size")? as usize;
        let input_q = self.cursor.read_u8().map_err(|e| truncated(e, "input q"))?;
        let recurrent_ts = self.read_u32("recurrent window")? as usize;
        let layer_count = self.read_u32("layer count")? as usize;

        self.weight_type = data_kind.weight_type();

        debug!(
            "Model header: '{}' {} in={} out={} q={} ts={} layers={}",
            name, data_kind, input_size, output_size, input_q, recurrent_ts, layer_count
        );

        Ok(ModelHeader {
            name,
            data_kind,
            input_size,
            output_size,
            input_q,
            recurrent_ts,
            layer_count,
        })
    }

    /// Read one layer record.
    pub fn read_layer(&mut self) -> Result<LayerDescriptor> {
        let kind = LayerKind::try_from(self.read_u32("layer kind")?)?;
        let layer = match kind {
            LayerKind::Dense => {
                let input = self.read_u32("dense input")? as usize;
                let output = self.read_u32("dense output")? as usize;
                let weight_q = self.cursor.read_u8().map_err(|e| truncated(e, "weight q"))?;
                let bias_q = self.cursor.read_u8().map_err(|e| truncated(e, "bias q"))?;
                let weights = self.read_weights(self.weight_type, count(&[output, input])?)?;
                let bias = self.read_weights(WeightType::Int32, output)?;
                LayerDescriptor::Dense(DenseParams {
                    input,
                    output,
                    weight_q,
                    bias_q,
                    weights,
                    bias,
                })
            }
            LayerKind::Gru => {
                let input = self.read_u32("gru input")? as usize;
                let hidden = self.read_u32("gru hidden")? as usize;
                let weight_q = self.cursor.read_u8().map_err(|e| truncated(e, "weight q"))?;
                let bias_q = self.cursor.read_u8().map_err(|e| truncated(e, "bias q"))?;
                let w = self.read_weights(self.weight_type, count(&[3, hidden, input])?)?;
                let u = self.read_weights(self.weight_type, count(&[3, hidden, hidden])?)?;
                let bias = self.read_weights(WeightType::Int32, count(&[3, hidden])?)?;
                LayerDescriptor::Gru(GruParams {
                    input,
                    hidden,
                    weight_q,
                    bias_q,
                    w,
                    u,
                    bias,
                })
            }
            LayerKind::Relu => LayerDescriptor::Relu,
            LayerKind::Sigmoid => LayerDescriptor::Sigmoid,
            LayerKind::Tanh => LayerDescriptor::Tanh,
            LayerKind::Softmax => LayerDescriptor::Softmax,
        };
        Ok(layer)
    }

    /// Bytes left after the current position
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(|e| truncated(e, what))
    }

    fn read_weights(&mut self, weight_type: WeightType, num_elements: usize) -> Result<Vec<i32>> {
        let data = *self.cursor.get_ref();
        let mut offset = self.cursor.position() as usize;
        let values = decode_weights(weight_type, data, &mut offset, num_elements)?;
        self.cursor.set_position(offset as u64);
        Ok(values)
    }
}

fn count(dims: &[usize]) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).ok_or_else(|| {
        MlError::InvalidFormat(format!("Layer dimensions {:?} overflow", dims))
    })
}

/// Read only the header of a model binary
pub fn read_header(data: &[u8]) -> Result<ModelHeader> {
    ModelReader::new(data).read_header()
}

/// Parse and validate a complete model binary.
///
/// # Arguments
///
/// * `data` - The serialized model
///
/// # Returns
///
/// The descriptor, or `InvalidFormat` if the binary is malformed, truncated,
/// or followed by trailing bytes
pub fn parse_model(data: &[u8]) -> Result<ModelDescriptor> {
    let mut reader = ModelReader::new(data);
    let header = reader.read_header()?;

    let mut layers = Vec::new();
    for index in 0..header.layer_count {
        let layer = reader.read_layer().map_err(|e| match e {
            MlError::InvalidFormat(msg) => MlError::InvalidFormat(format!("layer {}: {}", index, msg)),
            other => other,
        })?;
        layers.push(layer);
    }

    let remaining = reader.remaining();
    if remaining != 0 {
        return Err(MlError::InvalidFormat(format!(
            "{} trailing bytes after the layer table",
            remaining
        )));
    }

    let descriptor = ModelDescriptor { header, layers };
    descriptor.validate()?;
    Ok(descriptor)
}
