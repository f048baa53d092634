use std::fs;
use std::path::Path;
use byteorder::{LittleEndian, WriteBytesExt};
use tracing::info;
use crate::error::{MlError, Result};
use crate::quant::formats::get_format;
use super::format_utils::write_name;
use super::types::{LayerDescriptor, ModelDescriptor, WeightType, FORMAT_VERSION, MODEL_MAGIC};

/// Serializes a descriptor into the model binary layout.
pub struct ModelWriter {
    buf: Vec<u8>,
}

impl ModelWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Serialize a validated descriptor.
    pub fn write(mut self, model: &ModelDescriptor) -> Result<Vec<u8>> {
        model.validate()?;
        let header = &model.header;
        let weight_type = header.data_kind.weight_type();

        self.buf.write_u32::<LittleEndian>(MODEL_MAGIC)?;
        self.buf.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        write_name(&mut self.buf, &header.name)?;
        self.buf.write_u32::<LittleEndian>(header.data_kind as u32)?;
        self.write_len(header.input_size)?;
        self.write_len(header.output_size)?;
        self.buf.write_u8(header.input_q)?;
        self.write_len(header.recurrent_ts)?;
        self.write_len(model.layers.len())?;

        for layer in &model.layers {
            self.buf.write_u32::<LittleEndian>(layer.kind() as u32)?;
            match layer {
                LayerDescriptor::Dense(p) => {
                    self.write_len(p.input)?;
                    self.write_len(p.output)?;
                    self.buf.write_u8(p.weight_q)?;
                    self.buf.write_u8(p.bias_q)?;
                    self.write_values(weight_type, &p.weights)?;
                    self.write_values(WeightType::Int32, &p.bias)?;
                }
                LayerDescriptor::Gru(p) => {
                    self.write_len(p.input)?;
                    self.write_len(p.hidden)?;
                    self.buf.write_u8(p.weight_q)?;
                    self.buf.write_u8(p.bias_q)?;
                    self.write_values(weight_type, &p.w)?;
                    self.write_values(weight_type, &p.u)?;
                    self.write_values(WeightType::Int32, &p.bias)?;
                }
                _ => {}
            }
        }
        Ok(self.buf)
    }

    fn write_len(&mut self, value: usize) -> Result<()> {
        let value = u32::try_from(value)
            .map_err(|_| MlError::InvalidArgument(format!("{} does not fit a u32 field", value)))?;
        self.buf.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_values(&mut self, weight_type: WeightType, values: &[i32]) -> Result<()> {
        let format = get_format(weight_type).ok_or_else(|| {
            MlError::InvalidArgument(format!("No codec for {:?}", weight_type))
        })?;
        format.encode(values, &mut self.buf)
    }
}

impl Default for ModelWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a descriptor to bytes
pub fn write_model(model: &ModelDescriptor) -> Result<Vec<u8>> {
    ModelWriter::new().write(model)
}

/// Serialize a descriptor and write it to `path`
pub fn write_model_file<P: AsRef<Path>>(model: &ModelDescriptor, path: P) -> Result<usize> {
    let bytes = write_model(model)?;
    fs::write(path.as_ref(), &bytes)?;
    info!(
        "Wrote model '{}' ({} bytes) to {}",
        model.header.name,
        bytes.len(),
        path.as_ref().display()
    );
    Ok(bytes.len())
}
