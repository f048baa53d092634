mod format_utils;
mod packer;
mod reader;
mod types;
mod writer;

// Re-export from types
pub use types::{
    DataKind, DenseParams, GruParams, LayerDescriptor, LayerKind, ModelDescriptor, ModelHeader,
    WeightType, FORMAT_VERSION, MAX_BIAS_Q, MODEL_MAGIC, MODEL_NAME_LEN,
};
// Re-export from reader
pub use reader::{parse_model, read_header, ModelReader};
// Re-export from writer
pub use writer::{write_model, write_model_file, ModelWriter};
// Re-export from packer
pub use packer::{choose_q, FloatLayer, FloatModel};
// Re-export from format_utils
pub use format_utils::is_model_file;
