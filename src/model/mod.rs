mod binary;
mod info;
#[allow(clippy::module_inception)]
mod model;

pub use binary::{ModelBinary, ModelBuffer};
pub use info::{model_info_table, ModelInfo};
pub use model::{LibError, Model, RnnStateControl};

use crate::engine::{ArenaPlan, Graph};
use crate::error::{MlError, Result};
use crate::format::parse_model;
use crate::quant::{convert_flt_to_int, convert_int_to_flt, MlData};

/// Arena sizes a binary needs, so callers can size a [`ModelBuffer`].
pub fn plan_buffers(binary: &ModelBinary) -> Result<ArenaPlan> {
    if binary.is_empty() {
        return Err(binary::empty_binary());
    }
    let descriptor = parse_model(binary.as_bytes())?;
    Ok(Graph::from_descriptor(&descriptor)?.plan())
}

/// Quantize float input for `model` at its input Q-fraction bits.
pub fn model_quantize<T: MlData>(model: &Model<T>, input: &[f32], output: &mut [T]) -> Result<()> {
    if input.len() != model.input_size() {
        return Err(MlError::InvalidArgument(format!(
            "input holds {} values, model expects {}",
            input.len(),
            model.input_size()
        )));
    }
    convert_flt_to_int(input, output, model.input_q_fraction_bits())
}

/// Dequantize the model's latest output at its output Q-fraction bits.
pub fn model_dequantize<T: MlData>(model: &Model<T>, output: &mut [f32]) -> Result<()> {
    convert_int_to_flt(model.output(), output, model.output_q_fraction_bits())
}
