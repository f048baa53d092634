use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crate::error::Result;
use crate::format::WeightType;
use super::{ensure_available, FormatImpl};

/// INT32 format - used for biases, which are kept at accumulator precision
#[derive(Clone)]
pub struct Int32Format;

impl Int32Format {
    pub fn new() -> Self {
        Self {}
    }
}

impl FormatImpl for Int32Format {
    fn weight_type(&self) -> WeightType {
        WeightType::Int32
    }

    fn name(&self) -> &'static str {
        "INT32"
    }

    fn element_size(&self) -> usize {
        4
    }

    fn decode(
        &self,
        data: &[u8],
        offset: &mut usize,
        num_elements: usize,
        result: &mut Vec<i32>,
    ) -> Result<()> {
        let bytes_needed = ensure_available(self.name(), data, *offset, num_elements, 4)?;

        let bytes = &data[*offset..*offset + bytes_needed];
        result.extend(bytes.chunks_exact(4).map(LittleEndian::read_i32));
        *offset += bytes_needed;
        Ok(())
    }

    fn encode(&self, values: &[i32], out: &mut Vec<u8>) -> Result<()> {
        for &v in values {
            out.write_i32::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

/// Create a new boxed instance of this format
pub fn create_format() -> Box<dyn FormatImpl> {
    Box::new(Int32Format::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_encode_decode() {
        let format = Int32Format::new();
        let mut bytes = Vec::new();
        format.encode(&[i32::MIN, -1, 0, 70_000], &mut bytes).unwrap();
        assert_eq!(bytes.len(), 16);

        let mut result = Vec::new();
        let mut offset = 0;
        format.decode(&bytes, &mut offset, 4, &mut result).unwrap();
        assert_eq!(result, vec![i32::MIN, -1, 0, 70_000]);
    }
}
