//! Fixed-point quantized neural network inference.
//!
//! Models are loaded from a compact binary, run frame by frame with integer
//! arithmetic and optionally profiled or streamed over a host link.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod format;
pub mod model;
pub mod profiler;
pub mod quant;
pub mod stream;

pub use error::{InferenceFault, MlError, Result};
pub use model::{Model, ModelBinary, ModelBuffer, ModelInfo, RnnStateControl};
pub use profiler::{ProfileConfig, ProfileReport};
pub use stream::{Stream, StreamInterface};
