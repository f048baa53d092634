use crate::error::{MlError, Result};
use crate::format::WeightType;
use super::{ensure_available, FormatImpl};

/// INT8 format - 8-bit signed weights
#[derive(Clone)]
pub struct Int8Format;

impl Int8Format {
    pub fn new() -> Self {
        Self {}
    }
}

impl FormatImpl for Int8Format {
    fn weight_type(&self) -> WeightType {
        WeightType::Int8
    }

    fn name(&self) -> &'static str {
        "INT8"
    }

    fn element_size(&self) -> usize {
        1
    }

    fn decode(
        &self,
        data: &[u8],
        offset: &mut usize,
        num_elements: usize,
        result: &mut Vec<i32>,
    ) -> Result<()> {
        let bytes_needed = ensure_available(self.name(), data, *offset, num_elements, 1)?;

        result.extend(data[*offset..*offset + bytes_needed].iter().map(|&b| b as i8 as i32));
        *offset += bytes_needed;
        Ok(())
    }

    fn encode(&self, values: &[i32], out: &mut Vec<u8>) -> Result<()> {
        for &v in values {
            let narrow = i8::try_from(v).map_err(|_| {
                MlError::InvalidArgument(format!("weight {} does not fit INT8", v))
            })?;
            out.push(narrow as u8);
        }
        Ok(())
    }
}

/// Create a new boxed instance of this format
pub fn create_format() -> Box<dyn FormatImpl> {
    Box::new(Int8Format::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int8_format() {
        let format = Int8Format::new();
        assert_eq!(format.name(), "INT8");

        // Positive values, then -1, -2, -128
        let mut data = vec![0, 1, 2, 3, 127];
        data.extend_from_slice(&[255, 254, 128]);

        let mut result = Vec::new();
        let mut offset = 0;
        format.decode(&data, &mut offset, 8, &mut result).unwrap();

        assert_eq!(result, vec![0, 1, 2, 3, 127, -1, -2, -128]);
        assert_eq!(offset, 8);
    }

    #[test]
    fn test_int8_encode_rejects_wide_values() {
        let format = Int8Format::new();
        let mut out = Vec::new();
        format.encode(&[-128, 127], &mut out).unwrap();
        assert_eq!(out, vec![128, 127]);
        assert!(format.encode(&[128], &mut out).is_err());
    }
}
