mod common;

use tinyinfer::format::{write_model_file, FloatModel};
use tinyinfer::model::{model_dequantize, model_quantize, plan_buffers, Model, ModelBinary, ModelBuffer};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tinyinfer::profiler::{ManualTsc, ProfileConfig, TscSource};
use tinyinfer::quant::{convert_flt_to_int16, convert_int_to_flt};
use tinyinfer::{MlError, RnnStateControl};

#[test]
fn repeated_runs_are_bit_identical() {
    let bytes = common::classifier_bytes();
    let binary = ModelBinary::from_slice(&bytes);
    let mut model = Model::<i8>::init(&binary, None).unwrap();

    let input = [32i8, -16, 8, 63];
    model.run(&input).unwrap();
    let first = model.output().to_vec();
    let first_q = model.output_q_fraction_bits();

    model.run(&[-64, 0, 0, 0]).unwrap();
    model.run(&input).unwrap();
    assert_eq!(model.output(), first.as_slice());
    assert_eq!(model.output_q_fraction_bits(), first_q);

    // A separate handle on the same binary agrees
    let mut other = Model::<i8>::init(&binary, None).unwrap();
    other.run(&input).unwrap();
    assert_eq!(other.output(), first.as_slice());
}

#[test]
fn softmax_output_sums_to_about_one() {
    let bytes = common::classifier_bytes();
    let mut model = Model::<i8>::init(&ModelBinary::from_slice(&bytes), None).unwrap();
    let mut input = [0i8; 4];
    model_quantize(&model, &[0.5, -0.25, 0.75, 0.1], &mut input).unwrap();
    model.run(&input).unwrap();

    let mut probs = [0f32; 3];
    model_dequantize(&model, &mut probs).unwrap();
    let sum: f32 = probs.iter().sum();
    assert!((sum - 1.0).abs() < 0.05, "softmax sum {}", sum);
    assert!(probs.iter().all(|&p| p >= 0.0));
}

#[test]
fn model_profiling_sums_per_run_deltas() {
    let bytes = common::recurrent_bytes();
    let mut model = Model::<i16>::init(&ModelBinary::from_slice(&bytes), None).unwrap();
    model.set_tsc_source(Box::new(ManualTsc::with_step(7)));
    model.profile_config(ProfileConfig::ENABLE_MODEL | ProfileConfig::ENABLE_LAYER);

    let frames = common::recurrent_frames(6, 2);
    let mut deltas = Vec::new();
    for frame in frames.chunks_exact(2) {
        model.run(frame).unwrap();
        deltas.push(model.profiler().last_cycles().unwrap());
    }

    let report = model.profile_log();
    assert_eq!(report.frames, 6);
    assert_eq!(report.sum_cycles, deltas.iter().sum::<u64>());
    assert_eq!(report.peak_cycles, *deltas.iter().max().unwrap());
    assert_eq!(report.layers.len(), 2);
    // Reading the report does not change it
    assert_eq!(model.profile_report().sum_cycles, report.sum_cycles);

    // Reconfiguring clears the counters
    model.profile_config(ProfileConfig::ENABLE_MODEL);
    assert_eq!(model.profile_report().frames, 0);
}

/// Counter that replays fixed readings, then holds the last one.
struct ScriptedTsc(Arc<Mutex<VecDeque<u64>>>);

impl TscSource for ScriptedTsc {
    fn read(&self) -> u64 {
        let mut readings = self.0.lock().unwrap();
        if readings.len() > 1 {
            readings.pop_front().unwrap()
        } else {
            readings.front().copied().unwrap_or(0)
        }
    }
}

#[test]
fn sum_cycles_matches_tsc_bracketed_runs() {
    let bytes = common::classifier_bytes();
    let mut model = Model::<i8>::init(&ModelBinary::from_slice(&bytes), None).unwrap();
    model.profile_config(ProfileConfig::ENABLE_MODEL);

    // Per run: caller read, frame start, frame end, caller read
    let costs = [120u64, 45, 300, 7];
    let mut readings = VecDeque::new();
    let mut now = 1_000u64;
    for cost in costs {
        readings.extend([now, now, now + cost, now + cost]);
        now += cost + 13;
    }
    model.set_tsc_source(Box::new(ScriptedTsc(Arc::new(Mutex::new(readings)))));

    let mut bracketed = 0;
    for frame in [[1i8, 2, 3, 4], [-8, 0, 8, 16], [0, 0, 0, 0], [64, -64, 32, -32]] {
        let before = model.profile_get_tsc();
        model.run(&frame).unwrap();
        let after = model.profile_get_tsc();
        bracketed += after - before;
    }

    let report = model.profile_report();
    assert_eq!(report.frames, costs.len() as u64);
    assert_eq!(report.sum_cycles, bracketed);
    assert_eq!(report.sum_cycles, costs.iter().sum::<u64>());
    assert_eq!(report.peak_cycles, 300);
    assert_eq!(report.peak_frame, 2);
}

#[test]
fn disabled_profiling_counts_nothing() {
    let bytes = common::classifier_bytes();
    let mut model = Model::<i8>::init(&ModelBinary::from_slice(&bytes), None).unwrap();
    model.run(&[1, 2, 3, 4]).unwrap();
    assert_eq!(model.profile_report().frames, 0);
    assert_eq!(model.profiler().last_cycles(), None);
}

#[test]
fn caller_buffers_sized_from_plan() {
    let bytes = common::recurrent_bytes();
    let binary = ModelBinary::from_slice(&bytes);
    let plan = plan_buffers(&binary).unwrap();
    assert_eq!(plan.persistent_words, 3);

    let buffer = ModelBuffer::for_plan(&plan).unwrap();
    let mut model = Model::<i16>::init(&binary, Some(buffer)).unwrap();
    assert_eq!(model.buffer_size(), plan.bytes());
    model.run_sequence(&common::recurrent_frames(4, 2)).unwrap();

    let back = model.deinit();
    assert_eq!(back.persistent.map(|a| a.capacity()), Some(plan.persistent_words));
    assert_eq!(back.scratch.map(|a| a.capacity()), Some(plan.scratch_words));
}

#[test]
fn windowed_state_matches_fresh_sequences() {
    let bytes = common::recurrent_bytes();
    let binary = ModelBinary::from_slice(&bytes);
    let frames = common::recurrent_frames(8, 2);

    let mut windowed = Model::<i16>::init(&binary, None).unwrap();
    windowed.rnn_state_control(RnnStateControl::Window(4)).unwrap();
    let mut outputs = Vec::new();
    for (i, frame) in frames.chunks_exact(2).enumerate() {
        windowed.run(frame).unwrap();
        if (i + 1) % 4 == 0 {
            outputs.push(windowed.output().to_vec());
        }
    }

    for (window, expected) in frames.chunks_exact(8).zip(&outputs) {
        let mut fresh = Model::<i16>::init(&binary, None).unwrap();
        fresh.run_sequence(window).unwrap();
        assert_eq!(fresh.output(), expected.as_slice());
    }
}

#[test]
fn mapped_model_file_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("classifier.bin");
    let written = write_model_file(&common::classifier(), &path).unwrap();

    let binary = ModelBinary::from_file(&path).unwrap();
    assert_eq!(binary.len(), written);
    let model = Model::<i8>::init(&binary, None).unwrap();
    drop(binary);
    let info = model.info();
    assert_eq!(info.name, "classifier");
    assert_eq!(info.model_size, written);
    assert_eq!(info.layer_count, 4);
}

#[test]
fn wrong_activation_type_is_rejected() {
    let bytes = common::recurrent_bytes();
    let err = Model::<i8>::init(&ModelBinary::from_slice(&bytes), None).err().unwrap();
    assert!(matches!(err, MlError::MismatchDataType { .. }));
}

#[test]
fn quantize_round_trip_within_one_step() {
    let input = [0.5f32, -0.3, 0.123, -0.999, 0.0];
    for q in [4u8, 10, 15] {
        let mut fixed = [0i16; 5];
        convert_flt_to_int16(&input, &mut fixed, q).unwrap();
        let mut back = [0f32; 5];
        convert_int_to_flt(&fixed, &mut back, q).unwrap();
        let step = 1.0 / (1u32 << q) as f32;
        for (a, b) in input.iter().zip(&back) {
            assert!((a - b).abs() <= step, "q={} {} vs {}", q, a, b);
        }
    }
}

#[test]
fn packed_float_model_tracks_reference() {
    let json = r#"{
        "name": "packed",
        "data_kind": "int16x16",
        "input_size": 2,
        "input_q": 12,
        "layers": [
            { "type": "dense", "weights": [[0.5, -0.25], [0.75, 0.125], [-0.5, 0.5]], "bias": [0.1, 0.0, -0.1] },
            { "type": "tanh" },
            { "type": "dense", "weights": [[1.0, -0.5, 0.25]], "bias": [0.05] }
        ]
    }"#;
    let float_model = FloatModel::from_json(json).unwrap();
    let bytes = tinyinfer::format::write_model(&float_model.quantize().unwrap()).unwrap();
    let mut model = Model::<i16>::init(&ModelBinary::from_slice(&bytes), None).unwrap();

    for input in [[0.5f32, -0.5], [0.1, 0.9], [-0.8, 0.3]] {
        let mut frame = [0i16; 2];
        model_quantize(&model, &input, &mut frame).unwrap();
        model.run(&frame).unwrap();
        let mut got = [0f32; 1];
        model_dequantize(&model, &mut got).unwrap();
        let want = float_model.reference_forward(&input, &mut Vec::new()).unwrap();
        assert!((got[0] - want[0]).abs() < 0.01, "{} vs {}", got[0], want[0]);
    }
}
