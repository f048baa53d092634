// Quantization helpers shared by the loader, the engine and the CLI
pub mod convert;
pub mod data;
pub mod find_max;
pub mod formats;

pub use convert::{
    convert_flt_to_int, convert_flt_to_int16, convert_flt_to_int8, convert_flt_to_int8_affine,
    convert_int8_to_flt_affine, convert_int_to_flt, quantize_value,
};
pub use data::MlData;
pub use find_max::{find_max, find_max_int32, find_max_magnitude};
