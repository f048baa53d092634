use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crate::error::{MlError, Result};
use crate::format::WeightType;
use super::{ensure_available, FormatImpl};

/// INT16 format - 16-bit signed little-endian weights
#[derive(Clone)]
pub struct Int16Format;

impl Int16Format {
    pub fn new() -> Self {
        Self {}
    }
}

impl FormatImpl for Int16Format {
    fn weight_type(&self) -> WeightType {
        WeightType::Int16
    }

    fn name(&self) -> &'static str {
        "INT16"
    }

    fn element_size(&self) -> usize {
        2
    }

    fn decode(
        &self,
        data: &[u8],
        offset: &mut usize,
        num_elements: usize,
        result: &mut Vec<i32>,
    ) -> Result<()> {
        let bytes_needed = ensure_available(self.name(), data, *offset, num_elements, 2)?;

        let bytes = &data[*offset..*offset + bytes_needed];
        result.extend(bytes.chunks_exact(2).map(|c| LittleEndian::read_i16(c) as i32));
        *offset += bytes_needed;
        Ok(())
    }

    fn encode(&self, values: &[i32], out: &mut Vec<u8>) -> Result<()> {
        for &v in values {
            let narrow = i16::try_from(v).map_err(|_| {
                MlError::InvalidArgument(format!("weight {} does not fit INT16", v))
            })?;
            out.write_i16::<LittleEndian>(narrow)?;
        }
        Ok(())
    }
}

/// Create a new boxed instance of this format
pub fn create_format() -> Box<dyn FormatImpl> {
    Box::new(Int16Format::new())
}
