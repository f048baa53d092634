//! Fixed-point inference engine: arenas, Q-format arithmetic, layer kernels
//! and the executable graph.

pub mod arena;
pub mod fixed;
pub mod graph;
pub mod kernels;

pub use arena::Arena;
pub use graph::{ArenaPlan, Graph, Layer};
