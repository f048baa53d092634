use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use crate::format::DataKind;

/// Descriptive metadata of an initialized model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub data_kind: DataKind,
    /// Size of the serialized model in bytes
    pub model_size: usize,
    /// Size of the persistent and scratch arenas in bytes
    pub buffer_size: usize,
    /// Bytes of recurrent state
    pub persistent_mem: usize,
    /// Bytes of per-frame working memory
    pub scratch_mem: usize,
    pub input_size: usize,
    pub output_size: usize,
    pub input_q: u8,
    pub output_q: u8,
    /// Frames per recurrent window, 0 when not recurrent
    pub recurrent_ts: usize,
    pub layer_count: usize,
    pub parameter_count: usize,
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text).fg(comfy_table::Color::Cyan).add_attribute(Attribute::Bold)
}

/// Render model metadata as a two-column table.
pub fn model_info_table(info: &ModelInfo) -> Table {
    let mut table = Table::new();
    table
        .set_header(vec![header_cell("Property"), header_cell("Value")])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let recurrent = if info.recurrent_ts == 0 {
        "no".to_string()
    } else {
        format!("{} frames", info.recurrent_ts)
    };
    let rows: Vec<(&str, String)> = vec![
        ("Name", info.name.clone()),
        ("Data type", info.data_kind.to_string()),
        ("Model size", format!("{} bytes", info.model_size)),
        ("Buffer size", format!("{} bytes", info.buffer_size)),
        ("Input size", info.input_size.to_string()),
        ("Output size", info.output_size.to_string()),
        ("Input Q", info.input_q.to_string()),
        ("Output Q", info.output_q.to_string()),
        ("Recurrent", recurrent),
        ("Layers", info.layer_count.to_string()),
        ("Parameters", info.parameter_count.to_string()),
    ];
    for (key, value) in rows {
        table.add_row(vec![
            Cell::new(key).fg(comfy_table::Color::Yellow),
            Cell::new(value).fg(comfy_table::Color::White).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
