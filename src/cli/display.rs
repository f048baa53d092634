use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;
use crate::dataset::ValidationReport;
use crate::format::{LayerDescriptor, ModelDescriptor};
use crate::model::{model_info_table, ModelInfo};
use crate::profiler::ProfileReport;
use crate::quant::find_max;
use crate::stream::StreamSummary;

fn header_cell(text: &str) -> Cell {
    Cell::new(text).fg(comfy_table::Color::Cyan).add_attribute(Attribute::Bold)
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_header(headers.iter().map(|h| header_cell(h)).collect::<Vec<_>>())
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print any report as pretty JSON.
pub fn print_json<S: Serialize>(value: &S) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn display_model_info(info: &ModelInfo) {
    println!("\n{}", model_info_table(info));
}

/// Displays one model output with the largest element highlighted.
///
/// # Arguments
///
/// * `raw` - Output in fixed point
/// * `values` - The same output dequantized
/// * `q` - Output Q-fraction bits
pub fn display_output(raw: &[i64], values: &[f32], q: u8) {
    let best = find_max(values).map(|(i, _)| i);
    let mut table = new_table(&["#", "Raw", "Value"]);
    for (i, (&r, &v)) in raw.iter().zip(values).enumerate() {
        let color = if Some(i) == best {
            comfy_table::Color::Green
        } else {
            comfy_table::Color::White
        };
        table.add_row(vec![
            Cell::new(i).fg(comfy_table::Color::Yellow).set_alignment(CellAlignment::Center),
            Cell::new(r).fg(color).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.6}", v)).fg(color).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("\n{}", table);
    println!("{}", format!("Output Q: {}", q).bright_black());
}

pub fn display_profile(report: &ProfileReport) {
    if report.config.is_disabled() {
        println!("{}", "Profiling disabled".yellow());
        return;
    }
    println!(
        "\n{} {}  frames={}  avg={}  peak={} (frame {})",
        "Profile".bold(),
        report.model.green(),
        report.frames,
        report.avg_cycles,
        report.peak_cycles,
        report.peak_frame
    );
    if report.layers.is_empty() {
        return;
    }

    let mut table = new_table(&["Layer", "Type", "Sum", "Avg", "Peak", "Peak frame"]);
    for layer in &report.layers {
        table.add_row(vec![
            Cell::new(layer.index).set_alignment(CellAlignment::Center),
            Cell::new(layer.kind.type_string()).fg(comfy_table::Color::Magenta),
            Cell::new(layer.sum_cycles).set_alignment(CellAlignment::Right),
            Cell::new(layer.avg_cycles).set_alignment(CellAlignment::Right),
            Cell::new(layer.peak_cycles).fg(comfy_table::Color::Yellow).set_alignment(CellAlignment::Right),
            Cell::new(layer.peak_frame).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{}", table);
}

pub fn display_validation(report: &ValidationReport) {
    let mut table = new_table(&["Metric", "Value"]);
    let rows: Vec<(&str, String)> = vec![
        ("Model", report.model.clone()),
        ("Frames", report.frames.to_string()),
        ("Outputs", report.outputs.to_string()),
        ("Correct", report.correct.to_string()),
        ("Accuracy", format!("{:.2}%", report.accuracy * 100.0)),
        ("Max abs error", format!("{:.6}", report.max_abs_error)),
        ("MSE", format!("{:.8}", report.mse)),
    ];
    for (key, value) in rows {
        table.add_row(vec![
            Cell::new(key).fg(comfy_table::Color::Yellow),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("\n{}", table);

    let verdict = format!("{}/{} outputs match", report.correct, report.outputs);
    if report.correct == report.outputs {
        println!("{}", verdict.bright_green());
    } else {
        println!("{}", verdict.bright_red());
    }
}

/// Displays the layer table of a freshly packed model.
pub fn display_pack_summary(model: &ModelDescriptor, bytes: usize) {
    let mut table = new_table(&["#", "Type", "In", "Out", "Weight Q", "Bias Q", "Params"]);
    let mut width = model.header.input_size;
    for (i, layer) in model.layers.iter().enumerate() {
        let out = layer.output_width(width);
        let (wq, bq) = match layer {
            LayerDescriptor::Dense(p) => (p.weight_q.to_string(), p.bias_q.to_string()),
            LayerDescriptor::Gru(p) => (p.weight_q.to_string(), p.bias_q.to_string()),
            _ => ("-".to_string(), "-".to_string()),
        };
        table.add_row(vec![
            Cell::new(i).set_alignment(CellAlignment::Center),
            Cell::new(layer.kind().type_string()).fg(comfy_table::Color::Magenta),
            Cell::new(width).set_alignment(CellAlignment::Right),
            Cell::new(out).set_alignment(CellAlignment::Right),
            Cell::new(wq).fg(comfy_table::Color::Cyan).set_alignment(CellAlignment::Center),
            Cell::new(bq).fg(comfy_table::Color::Cyan).set_alignment(CellAlignment::Center),
            Cell::new(layer.parameter_count()).set_alignment(CellAlignment::Right),
        ]);
        width = out;
    }
    println!("\n{}", table);
    println!(
        "{}",
        format!(
            "Packed '{}' ({}): {} parameters, {} bytes",
            model.header.name,
            model.header.data_kind,
            model.parameter_count(),
            bytes
        )
        .bright_green()
    );
}

pub fn display_stream_summary(summary: &StreamSummary) {
    println!(
        "{} {}: {} frames, {} outputs",
        "Stream".bold(),
        summary.session.to_string().bright_black(),
        summary.frames,
        summary.outputs
    );
    display_profile(&summary.profile);
}
