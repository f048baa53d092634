// Weight codecs, one file per stored element type
pub mod int8;
pub mod int16;
pub mod int32;

use once_cell::sync::Lazy;
use crate::error::{MlError, Result};
use crate::format::WeightType;

/// Trait that all weight format implementations must implement
pub trait FormatImpl: Send + Sync + 'static {
    /// Returns the stored weight type this implementation handles
    fn weight_type(&self) -> WeightType;

    /// Name of the format
    fn name(&self) -> &'static str;

    /// Bytes per stored element
    fn element_size(&self) -> usize;

    /// Decode `num_elements` values starting at `offset`, widening them to i32.
    /// Advances `offset` past the consumed bytes.
    fn decode(
        &self,
        data: &[u8],
        offset: &mut usize,
        num_elements: usize,
        result: &mut Vec<i32>,
    ) -> Result<()>;

    /// Encode values, failing if any value does not fit the stored type.
    fn encode(&self, values: &[i32], out: &mut Vec<u8>) -> Result<()>;
}

/// Check that `num_elements` values of `element_size` bytes are available.
pub(crate) fn ensure_available(
    name: &str,
    data: &[u8],
    offset: usize,
    num_elements: usize,
    element_size: usize,
) -> Result<usize> {
    let bytes_needed = num_elements
        .checked_mul(element_size)
        .ok_or_else(|| MlError::InvalidFormat(format!("{} element count overflows", name)))?;
    let available = data.len().saturating_sub(offset);
    if bytes_needed > available {
        return Err(MlError::InvalidFormat(format!(
            "Not enough data to read {} values. Need {} bytes, but only have {}",
            name, bytes_needed, available
        )));
    }
    Ok(bytes_needed)
}

// When adding a new format:
// 1. Create the codec file
// 2. Add it as a pub mod above
// 3. Register it below

static FORMAT_REGISTRY: Lazy<Vec<Box<dyn FormatImpl>>> = Lazy::new(|| {
    vec![
        int8::create_format(),
        int16::create_format(),
        int32::create_format(),
    ]
});

/// Get a format implementation by stored weight type
pub fn get_format(weight_type: WeightType) -> Option<&'static dyn FormatImpl> {
    FORMAT_REGISTRY
        .iter()
        .find(|format| format.weight_type() == weight_type)
        .map(|format| format.as_ref())
}

/// Decode a run of weights of the given type.
pub fn decode_weights(
    weight_type: WeightType,
    data: &[u8],
    offset: &mut usize,
    num_elements: usize,
) -> Result<Vec<i32>> {
    let format = get_format(weight_type).ok_or_else(|| {
        MlError::InvalidFormat(format!("Unsupported weight type: {:?}", weight_type))
    })?;
    ensure_available(format.name(), data, *offset, num_elements, format.element_size())?;
    let mut result = Vec::new();
    result
        .try_reserve_exact(num_elements)
        .map_err(|e| MlError::OutOfMemory(format!("weight buffer of {} elements: {}", num_elements, e)))?;
    format.decode(data, offset, num_elements, &mut result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_weight_type() {
        for ty in [WeightType::Int8, WeightType::Int16, WeightType::Int32] {
            let format = get_format(ty).expect("registered");
            assert_eq!(format.weight_type(), ty);
        }
    }

    #[test]
    fn test_decode_weights_not_enough_data() {
        let mut offset = 0;
        let err = decode_weights(WeightType::Int16, &[1, 2, 3], &mut offset, 2).unwrap_err();
        assert!(err.to_string().contains("Not enough data"));
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_decode_weights_checks_length_before_allocating() {
        let mut offset = 0;
        let err = decode_weights(WeightType::Int8, &[0u8; 8], &mut offset, 1 << 60).unwrap_err();
        assert!(matches!(err, MlError::InvalidFormat(_)));
        assert_eq!(offset, 0);
    }
}
