use std::net::TcpListener;
use std::path::Path;
use std::time::{Duration, Instant};
use anyhow::{bail, Context};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};
use crate::config::Settings;
use crate::dataset::{validate_model, Dataset};
use crate::format::{is_model_file, write_model_file, FloatModel};
use crate::model::{model_dequantize, model_quantize, Model, ModelBinary, RnnStateControl};
use crate::profiler::ProfileConfig;
use crate::quant::{convert_int_to_flt, MlData};
use crate::stream::{host_session_bytes, parse_device_transcript, HostLink, LoopbackLink, Stream};
use super::display::{
    display_model_info, display_output, display_pack_summary, display_profile, display_stream_summary,
    display_validation, print_json,
};

/// Shared inputs of every command handler
///
/// # Fields
///
/// * `settings` - Loaded configuration
/// * `profile` - Profiling flags applied to each model
/// * `input_q` - Input Q-fraction bits overriding the model default
/// * `json` - Print machine-readable reports instead of tables
pub(super) struct CommandContext<'a> {
    pub settings: &'a Settings,
    pub profile: ProfileConfig,
    pub input_q: Option<u8>,
    pub json: bool,
}

/// Run `$handler::<T>` with `T` matching the model's activation width.
macro_rules! dispatch {
    ($binary:expr, $handler:ident ( $($arg:expr),* )) => {{
        let header = $binary.header().context("reading model header")?;
        match header.data_kind.activation_bits() {
            8 => $handler::<i8>($($arg),*),
            _ => $handler::<i16>($($arg),*),
        }
    }};
}

fn load_binary(ctx: &CommandContext<'_>, path: &Path) -> anyhow::Result<ModelBinary<'static>> {
    let path = ctx.settings.model_path(path);
    if path.is_file() && !is_model_file(&path) {
        bail!("{} is not a tinyinfer model binary (bad magic)", path.display());
    }
    ModelBinary::from_file(&path).with_context(|| format!("loading model {}", path.display()))
}

fn init_model<T: MlData>(ctx: &CommandContext<'_>, binary: &ModelBinary) -> anyhow::Result<Model<T>> {
    let mut model = Model::<T>::init(binary, None).context("initializing model")?;
    model.profile_config(ctx.profile);
    if let Some(q) = ctx.input_q {
        model.set_input_q_fraction_bits(q)?;
    }
    Ok(model)
}

pub(super) fn handle_info(ctx: &CommandContext<'_>, model: &Path) -> anyhow::Result<()> {
    let binary = load_binary(ctx, model)?;
    dispatch!(binary, info_model(ctx, &binary))
}

fn info_model<T: MlData>(ctx: &CommandContext<'_>, binary: &ModelBinary) -> anyhow::Result<()> {
    let model = init_model::<T>(ctx, binary)?;
    let info = model.info();
    if ctx.json {
        return print_json(&info);
    }
    display_model_info(&info);
    Ok(())
}

#[derive(Serialize)]
struct RunOutput {
    frame: usize,
    q: u8,
    raw: Vec<i64>,
    values: Vec<f32>,
}

pub(super) fn handle_run(
    ctx: &CommandContext<'_>,
    model: &Path,
    input: Option<&Path>,
    values: &[f32],
) -> anyhow::Result<()> {
    let binary = load_binary(ctx, model)?;
    let samples = match input {
        Some(path) => Some(Dataset::from_file(path).with_context(|| format!("reading {}", path.display()))?),
        None if values.is_empty() => bail!("provide --input <dataset> or --values"),
        None => None,
    };
    dispatch!(binary, run_model(ctx, &binary, samples.as_ref(), values))
}

fn run_model<T: MlData>(
    ctx: &CommandContext<'_>,
    binary: &ModelBinary,
    samples: Option<&Dataset>,
    values: &[f32],
) -> anyhow::Result<()> {
    let mut model = init_model::<T>(ctx, binary)?;
    let size = model.input_size();
    let frames: Vec<T> = match samples {
        Some(ds) => ds.to_fixed::<T>(model.input_q_fraction_bits())?,
        None => {
            if values.len() % size != 0 {
                bail!("{} values do not split into frames of {}", values.len(), size);
            }
            let mut frames = vec![T::default(); values.len()];
            quantize_frames(&model, values, &mut frames)?;
            frames
        }
    };

    let window = model.recurrent_time_series_frames();
    if window > 0 {
        model.rnn_state_control(RnnStateControl::Window(window))?;
    }
    let window = window.max(1);

    let mut outputs = Vec::new();
    let mut dequantized = vec![0f32; model.output_size()];
    for (i, frame) in frames.chunks_exact(size).enumerate() {
        model.run(frame)?;
        if (i + 1) % window != 0 {
            continue;
        }
        model_dequantize(&model, &mut dequantized)?;
        outputs.push(RunOutput {
            frame: i,
            q: model.output_q_fraction_bits(),
            raw: model.output().iter().map(|v| v.to_i64()).collect(),
            values: dequantized.clone(),
        });
    }

    if ctx.json {
        return print_json(&outputs);
    }
    for out in &outputs {
        println!("{}", format!("Frame {}", out.frame).bold());
        display_output(&out.raw, &out.values, out.q);
    }
    display_profile(&model.profile_log());
    Ok(())
}

pub(super) fn handle_validate(ctx: &CommandContext<'_>, model: &Path, x: &Path, y: &Path) -> anyhow::Result<()> {
    let binary = load_binary(ctx, model)?;
    let x = Dataset::from_file(x).with_context(|| format!("reading samples {}", x.display()))?;
    let y = Dataset::from_file(y).with_context(|| format!("reading references {}", y.display()))?;
    dispatch!(binary, validate(ctx, &binary, &x, &y))
}

fn validate<T: MlData>(ctx: &CommandContext<'_>, binary: &ModelBinary, x: &Dataset, y: &Dataset) -> anyhow::Result<()> {
    let mut model = init_model::<T>(ctx, binary)?;

    let pb = ProgressBar::new(x.num_samples() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})")?
            .progress_chars("=>-"),
    );
    let report = validate_model(&mut model, x, y, &mut |n| pb.set_position(n as u64));
    pb.finish_and_clear();
    let report = report?;

    if ctx.json {
        return print_json(&report);
    }
    display_validation(&report);
    display_profile(&report.profile);
    Ok(())
}

pub(super) fn handle_pack(
    ctx: &CommandContext<'_>,
    spec: &Path,
    output: &Path,
    samples: Option<&Path>,
) -> anyhow::Result<()> {
    let float_model = FloatModel::from_file(spec).with_context(|| format!("reading {}", spec.display()))?;
    let descriptor = float_model.quantize().context("quantizing model")?;
    let written = write_model_file(&descriptor, output).with_context(|| format!("writing {}", output.display()))?;
    info!("Packed {} into {} ({} bytes)", spec.display(), output.display(), written);
    if !ctx.json {
        display_pack_summary(&descriptor, written);
    }

    if let Some(path) = samples {
        let ds = Dataset::from_file(path).with_context(|| format!("reading {}", path.display()))?;
        let binary = ModelBinary::from_file(output)?;
        let error = dispatch!(binary, compare_packed(ctx, &binary, &float_model, &ds))?;
        if ctx.json {
            return print_json(&serde_json::json!({ "bytes": written, "max_abs_error": error }));
        }
        println!("{}", format!("Max abs error against float model: {:.6}", error).bright_green());
    } else if ctx.json {
        return print_json(&serde_json::json!({ "bytes": written }));
    }
    Ok(())
}

/// Largest difference between the packed model and its float source.
fn compare_packed<T: MlData>(
    ctx: &CommandContext<'_>,
    binary: &ModelBinary,
    float_model: &FloatModel,
    samples: &Dataset,
) -> anyhow::Result<f64> {
    let mut model = init_model::<T>(ctx, binary)?;
    let window = model.recurrent_time_series_frames();
    if window > 0 {
        model.rnn_state_control(RnnStateControl::Window(window))?;
    }

    let q = model.input_q_fraction_bits();
    let mut hidden = Vec::new();
    let mut frame = vec![T::default(); model.input_size()];
    let mut output = vec![0f32; model.output_size()];
    let mut max_error = 0f64;

    for i in 0..samples.num_samples() {
        if window > 0 && i % window == 0 {
            hidden.clear();
        }
        let input = samples
            .sample_f32(i, q)
            .with_context(|| format!("reading sample {}", i))?;
        model_quantize(&model, &input, &mut frame)?;
        model.run(&frame)?;
        model_dequantize(&model, &mut output)?;
        let expected = float_model.reference_forward(&input, &mut hidden)?;
        for (&got, &want) in output.iter().zip(&expected) {
            max_error = max_error.max((got as f64 - want as f64).abs());
        }
    }
    Ok(max_error)
}

pub(super) fn handle_stream(
    ctx: &CommandContext<'_>,
    model: &Path,
    dataset: Option<&Path>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let binary = load_binary(ctx, model)?;
    match dataset {
        Some(path) => {
            let ds = Dataset::from_file(path).with_context(|| format!("reading {}", path.display()))?;
            dispatch!(binary, stream_loopback(ctx, &binary, &ds))
        }
        None => dispatch!(binary, stream_tcp(ctx, &binary, port))
    }
}

fn stream_tcp<T: MlData>(ctx: &CommandContext<'_>, binary: &ModelBinary, port: Option<u16>) -> anyhow::Result<()> {
    let cfg = &ctx.settings.stream;
    let addr = (cfg.host.as_str(), port.unwrap_or(cfg.port));
    let listener = TcpListener::bind(addr).with_context(|| format!("binding {}:{}", addr.0, addr.1))?;
    println!("{}", format!("Waiting for host on {}:{}", addr.0, addr.1).yellow());

    let (socket, peer) = listener.accept().context("accepting host connection")?;
    info!("Host connected from {}", peer);
    let timeout = (cfg.timeout_ms > 0).then(|| Duration::from_millis(cfg.timeout_ms));
    socket.set_read_timeout(timeout)?;
    socket.set_write_timeout(timeout)?;
    socket.set_nodelay(true)?;

    let mut stream = Stream::<T, _>::init(HostLink::new(socket), ctx.profile, binary)?;
    let summary = stream.run()?;
    stream.deinit();

    if ctx.json {
        return print_json(&summary);
    }
    display_stream_summary(&summary);
    Ok(())
}

fn stream_loopback<T: MlData>(ctx: &CommandContext<'_>, binary: &ModelBinary, samples: &Dataset) -> anyhow::Result<()> {
    let header = binary.header()?;
    let q = ctx.input_q.unwrap_or(header.input_q);
    let frames = samples.to_fixed::<T>(q)?;
    let incoming = host_session_bytes(&frames, samples.sample_size, q)?;

    let mut stream = Stream::<T, _>::init(HostLink::new(LoopbackLink::new(incoming)), ctx.profile, binary)?;
    let summary = stream.run()?;
    let (link, _) = stream.deinit();
    let transcript = parse_device_transcript::<T>(link.into_inner().sent(), header.output_size)?;
    if transcript.results.len() != summary.outputs {
        warn!("Transcript holds {} results, stream published {}", transcript.results.len(), summary.outputs);
    }

    if ctx.json {
        return print_json(&summary);
    }
    let mut values = vec![0f32; header.output_size];
    for (i, result) in transcript.results.iter().enumerate() {
        convert_int_to_flt(&result.output, &mut values, result.q_fraction_bits)?;
        let raw: Vec<i64> = result.output.iter().map(|v| v.to_i64()).collect();
        println!("{}", format!("Result {}", i).bold());
        display_output(&raw, &values, result.q_fraction_bits);
    }
    display_stream_summary(&summary);
    Ok(())
}

pub(super) fn handle_bench(
    ctx: &CommandContext<'_>,
    model: &Path,
    frames: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let binary = load_binary(ctx, model)?;
    let frames = frames.unwrap_or(ctx.settings.runtime.bench_frames);
    if frames == 0 {
        bail!("frame count must be greater than 0");
    }
    dispatch!(binary, bench(ctx, &binary, frames, seed))
}

#[derive(Serialize)]
struct BenchReport {
    frames: usize,
    elapsed_ms: f64,
    frames_per_second: f64,
    profile: crate::profiler::ProfileReport,
}

fn bench<T: MlData>(ctx: &CommandContext<'_>, binary: &ModelBinary, frames: usize, seed: Option<u64>) -> anyhow::Result<()> {
    let mut model = init_model::<T>(ctx, binary)?;
    model.profile_config(ctx.profile | ProfileConfig::ENABLE_MODEL | ProfileConfig::ENABLE_LAYER);

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };
    let input: Vec<f32> = (0..model.input_size() * frames)
        .map(|_| rng.random_range(-1.0f32..1.0))
        .collect();
    let mut quantized = vec![T::default(); input.len()];
    quantize_frames(&model, &input, &mut quantized)?;

    let start = Instant::now();
    model.run_sequence(&quantized)?;
    let elapsed = start.elapsed();

    let report = BenchReport {
        frames,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        frames_per_second: frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        profile: model.profile_log(),
    };
    if ctx.json {
        return print_json(&report);
    }
    println!(
        "{}",
        format!(
            "{} frames in {:.3} ms ({:.0} frames/s)",
            report.frames, report.elapsed_ms, report.frames_per_second
        )
        .bright_green()
    );
    display_profile(&report.profile);
    Ok(())
}

fn quantize_frames<T: MlData>(model: &Model<T>, input: &[f32], out: &mut [T]) -> anyhow::Result<()> {
    let size = model.input_size();
    for (src, dst) in input.chunks_exact(size).zip(out.chunks_exact_mut(size)) {
        model_quantize(model, src, dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{DataKind, LayerDescriptor, ModelDescriptor, ModelHeader};

    fn context(settings: &Settings) -> CommandContext<'_> {
        CommandContext {
            settings,
            profile: ProfileConfig::DISABLE,
            input_q: None,
            json: true,
        }
    }

    #[test]
    fn test_load_binary_checks_magic() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        let ctx = context(&settings);

        let foreign = dir.path().join("weights.gguf");
        std::fs::write(&foreign, b"GGUF\x03\x00\x00\x00").unwrap();
        let err = load_binary(&ctx, &foreign).unwrap_err();
        assert!(err.to_string().contains("not a tinyinfer model binary"), "got {}", err);

        let model = ModelDescriptor {
            header: ModelHeader {
                name: "relu".into(),
                data_kind: DataKind::Int8x8,
                input_size: 4,
                output_size: 4,
                input_q: 7,
                recurrent_ts: 0,
                layer_count: 1,
            },
            layers: vec![LayerDescriptor::Relu],
        };
        let good = dir.path().join("relu.tqnn");
        write_model_file(&model, &good).unwrap();
        let binary = load_binary(&ctx, &good).unwrap();
        assert_eq!(binary.header().unwrap().name, "relu");
    }
}
