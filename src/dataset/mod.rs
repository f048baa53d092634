//! Sample/reference data files and model validation against them.

mod file;

pub use file::{Dataset, DatasetType, DatasetValues, Recurrence};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use crate::error::{MlError, Result};
use crate::model::{model_dequantize, Model, RnnStateControl};
use crate::profiler::ProfileReport;
use crate::quant::{find_max, MlData};

/// Result of running a model over a sample file and comparing to references
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub model: String,
    /// Frames fed to the model
    pub frames: usize,
    /// Outputs compared with a reference sample
    pub outputs: usize,
    /// Outputs whose largest element matches the reference's
    pub correct: usize,
    pub accuracy: f64,
    pub max_abs_error: f64,
    pub mse: f64,
    pub profile: ProfileReport,
    pub generated_at: DateTime<Utc>,
}

/// Frames consumed per compared output.
fn frames_per_output<T: MlData>(model: &Model<T>, x: &Dataset) -> Result<usize> {
    if !model.is_recurrent() {
        return Ok(1);
    }
    let window = model.recurrent_time_series_frames().max(1);
    match x.recurrence {
        Recurrence::Steps(n) if n != window => Err(MlError::InvalidArgument(format!(
            "samples are grouped in windows of {} frames, model expects {}",
            n, window
        ))),
        _ => Ok(window),
    }
}

/// Run every sample of `x` through `model` and score the outputs against `y`.
///
/// # Arguments
///
/// * `model` - Initialized model; recurrent models are switched to windowed state
/// * `x` - Input samples, one frame each
/// * `y` - Reference outputs, one per frame (or one per recurrent window)
/// * `progress` - Called with the number of frames processed so far
///
/// # Returns
///
/// A [`ValidationReport`], or `InvalidArgument` when the files do not fit the model
pub fn validate_model<T: MlData>(
    model: &mut Model<T>,
    x: &Dataset,
    y: &Dataset,
    progress: &mut dyn FnMut(usize),
) -> Result<ValidationReport> {
    if x.sample_size != model.input_size() {
        return Err(MlError::InvalidArgument(format!(
            "sample size {} does not match model input size {}",
            x.sample_size,
            model.input_size()
        )));
    }
    if y.sample_size != model.output_size() {
        return Err(MlError::InvalidArgument(format!(
            "reference size {} does not match model output size {}",
            y.sample_size,
            model.output_size()
        )));
    }
    let window = frames_per_output(model, x)?;
    let frames = x.num_samples();
    if frames % window != 0 || frames / window != y.num_samples() {
        return Err(MlError::InvalidArgument(format!(
            "{} samples in windows of {} do not match {} references",
            frames,
            window,
            y.num_samples()
        )));
    }
    if model.is_recurrent() {
        model.rnn_state_control(RnnStateControl::Window(window))?;
    }

    let inputs = x.to_fixed::<T>(model.input_q_fraction_bits())?;
    let mut output = vec![0f32; model.output_size()];
    let mut outputs = 0;
    let mut correct = 0;
    let mut max_abs_error = 0f64;
    let mut squared = 0f64;

    for (index, frame) in inputs.chunks_exact(x.sample_size).enumerate() {
        model.run(frame)?;
        progress(index + 1);
        if (index + 1) % window != 0 {
            continue;
        }

        model_dequantize(model, &mut output)?;
        let reference = y
            .sample_f32(outputs, model.output_q_fraction_bits())
            .ok_or_else(|| MlError::InvalidArgument(format!("missing reference sample {}", outputs)))?;
        for (&got, &want) in output.iter().zip(&reference) {
            let err = (got as f64 - want as f64).abs();
            max_abs_error = max_abs_error.max(err);
            squared += err * err;
        }
        let predicted = find_max(&output).map(|(i, _)| i);
        let expected = find_max(&reference).map(|(i, _)| i);
        if predicted == expected {
            correct += 1;
        }
        debug!("Output {}: predicted {:?}, expected {:?}", outputs, predicted, expected);
        outputs += 1;
    }

    let values = (outputs * model.output_size()).max(1) as f64;
    let report = ValidationReport {
        model: model.name().to_string(),
        frames,
        outputs,
        correct,
        accuracy: if outputs == 0 { 0.0 } else { correct as f64 / outputs as f64 },
        max_abs_error,
        mse: squared / values,
        profile: model.profile_report(),
        generated_at: Utc::now(),
    };
    info!(
        "Validated '{}': {}/{} correct, max error {:.6}, mse {:.6}",
        report.model, report.correct, report.outputs, report.max_abs_error, report.mse
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{write_model, DataKind, DenseParams, LayerDescriptor, ModelDescriptor, ModelHeader};
    use crate::model::ModelBinary;

    fn swap_binary() -> Vec<u8> {
        // y = [x1, x0] at Q6 weights
        let model = ModelDescriptor {
            header: ModelHeader {
                name: "swap".into(),
                data_kind: DataKind::Int16x8,
                input_size: 2,
                output_size: 2,
                input_q: 8,
                recurrent_ts: 0,
                layer_count: 1,
            },
            layers: vec![LayerDescriptor::Dense(DenseParams {
                input: 2,
                output: 2,
                weight_q: 6,
                bias_q: 0,
                weights: vec![0, 64, 64, 0],
                bias: vec![0, 0],
            })],
        };
        write_model(&model).unwrap()
    }

    #[test]
    fn test_validate_swap_model() {
        let bytes = swap_binary();
        let mut model = Model::<i16>::init(&ModelBinary::from_slice(&bytes), None).unwrap();
        let x = Dataset::new(2, Recurrence::None, DatasetValues::Float32(vec![0.5, 0.25, -0.5, 0.125])).unwrap();
        let y = Dataset::new(2, Recurrence::None, DatasetValues::Float32(vec![0.25, 0.5, 0.125, -0.5])).unwrap();

        let mut seen = 0;
        let report = validate_model(&mut model, &x, &y, &mut |n| seen = n).unwrap();
        assert_eq!(seen, 2);
        assert_eq!(report.outputs, 2);
        assert_eq!(report.correct, 2);
        assert!(report.max_abs_error < 1e-2);
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let bytes = swap_binary();
        let mut model = Model::<i16>::init(&ModelBinary::from_slice(&bytes), None).unwrap();
        let x = Dataset::new(1, Recurrence::None, DatasetValues::Float32(vec![0.5, 0.25])).unwrap();
        let y = Dataset::new(2, Recurrence::None, DatasetValues::Float32(vec![0.25, 0.5])).unwrap();
        assert!(matches!(
            validate_model(&mut model, &x, &y, &mut |_| {}),
            Err(MlError::InvalidArgument(_))
        ));

        let x = Dataset::new(2, Recurrence::None, DatasetValues::Float32(vec![0.5, 0.25, 0.1, 0.1])).unwrap();
        assert!(validate_model(&mut model, &x, &y, &mut |_| {}).is_err());
    }
}
