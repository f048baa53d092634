use std::fmt;
use thiserror::Error;

/// Fault raised by a layer kernel while a frame is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceFault {
    /// An accumulator left the representable i64 range
    AccumulatorOverflow,
    /// A bias could not be aligned to the accumulator Q-format
    BiasAlignment,
    /// Tensor widths disagree with the planned graph
    ShapeMismatch,
    /// A tensor carried more fraction bits than the kernel supports
    QFormatRange,
}

impl InferenceFault {
    /// Numeric code reported alongside the layer index.
    pub fn code(&self) -> u32 {
        match self {
            InferenceFault::AccumulatorOverflow => 1,
            InferenceFault::BiasAlignment => 2,
            InferenceFault::ShapeMismatch => 3,
            InferenceFault::QFormatRange => 4,
        }
    }
}

impl fmt::Display for InferenceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InferenceFault::AccumulatorOverflow => "accumulator overflow",
            InferenceFault::BiasAlignment => "bias alignment overflow",
            InferenceFault::ShapeMismatch => "tensor shape mismatch",
            InferenceFault::QFormatRange => "Q-format out of range",
        };
        write!(f, "{} (code {:#x})", text, self.code())
    }
}

/// Errors returned by every fallible operation of the crate.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("invalid model format: {0}")]
    InvalidFormat(String),

    #[error("data type mismatch: model uses {expected}, caller requested {found}")]
    MismatchDataType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("inference error at layer {layer}: {fault}")]
    Inference { layer: usize, fault: InferenceFault },

    #[error("communication error: {0}")]
    Communication(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cycle counter error: {0}")]
    CycleCount(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MlError>;
