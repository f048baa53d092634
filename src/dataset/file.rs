use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{MlError, Result};
use crate::quant::{convert_flt_to_int, MlData};

/// Element type tag stored in a dataset header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetType {
    Unknown = 0,
    Float32 = 1,
    Int8 = 2,
    Int16 = 3,
}

impl DatasetType {
    pub fn element_size(&self) -> usize {
        match self {
            DatasetType::Unknown => 0,
            DatasetType::Float32 => 4,
            DatasetType::Int8 => 1,
            DatasetType::Int16 => 2,
        }
    }
}

impl TryFrom<i32> for DatasetType {
    type Error = MlError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(DatasetType::Unknown),
            1 => Ok(DatasetType::Float32),
            2 => Ok(DatasetType::Int8),
            3 => Ok(DatasetType::Int16),
            _ => Err(MlError::InvalidFormat(format!("Unknown dataset type: {}", value))),
        }
    }
}

/// Recurrent layout recorded in a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    /// -1: samples are independent
    None,
    /// 1: a recurrent model fed whole sequences at once
    NonStreaming,
    /// Samples form windows of this many time steps
    Steps(usize),
}

impl Recurrence {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            -1 => Ok(Recurrence::None),
            1 => Ok(Recurrence::NonStreaming),
            n if n > 1 => Ok(Recurrence::Steps(n as usize)),
            n => Err(MlError::InvalidFormat(format!("Invalid recurrent_ts_size: {}", n))),
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Recurrence::None => -1,
            Recurrence::NonStreaming => 1,
            Recurrence::Steps(n) => n as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetValues {
    Float32(Vec<f32>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
}

impl DatasetValues {
    pub fn data_type(&self) -> DatasetType {
        match self {
            DatasetValues::Float32(_) => DatasetType::Float32,
            DatasetValues::Int8(_) => DatasetType::Int8,
            DatasetValues::Int16(_) => DatasetType::Int16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DatasetValues::Float32(v) => v.len(),
            DatasetValues::Int8(v) => v.len(),
            DatasetValues::Int16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sample (x) or reference (y) data file.
///
/// Layout, little-endian: `i32 data_type`, `i32 num_of_samples`,
/// `i32 input_size`, `i32 recurrent_ts_size`, then
/// `num_of_samples * input_size` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub sample_size: usize,
    pub recurrence: Recurrence,
    pub values: DatasetValues,
}

fn read_i32<R: Read>(r: &mut R, what: &str) -> Result<i32> {
    r.read_i32::<LittleEndian>().map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            MlError::InvalidFormat(format!("Dataset truncated while reading {}", what))
        } else {
            MlError::Io(e)
        }
    })
}

fn non_negative(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| MlError::InvalidFormat(format!("Negative {}: {}", what, value)))
}

impl Dataset {
    pub fn new(sample_size: usize, recurrence: Recurrence, values: DatasetValues) -> Result<Self> {
        if sample_size == 0 || values.len() % sample_size != 0 {
            return Err(MlError::InvalidArgument(format!(
                "{} values do not split into samples of {}",
                values.len(),
                sample_size
            )));
        }
        Ok(Self { sample_size, recurrence, values })
    }

    pub fn num_samples(&self) -> usize {
        self.values.len() / self.sample_size
    }

    pub fn data_type(&self) -> DatasetType {
        self.values.data_type()
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let data_type = DatasetType::try_from(read_i32(reader, "data type")?)?;
        let num_samples = non_negative(read_i32(reader, "sample count")?, "sample count")?;
        let sample_size = non_negative(read_i32(reader, "input size")?, "input size")?;
        let recurrence = Recurrence::from_raw(read_i32(reader, "recurrent_ts_size")?)?;
        let count = num_samples
            .checked_mul(sample_size)
            .ok_or_else(|| MlError::InvalidFormat("Dataset dimensions overflow".into()))?;
        let bytes = count
            .checked_mul(data_type.element_size())
            .filter(|&b| b <= isize::MAX as usize)
            .ok_or_else(|| MlError::InvalidFormat(format!("Dataset of {} values is too large", count)))?;

        // Read what is actually there so a lying header cannot force a huge allocation
        let mut raw = Vec::new();
        reader.by_ref().take(bytes as u64).read_to_end(&mut raw)?;
        if raw.len() != bytes {
            return Err(MlError::InvalidFormat(format!(
                "Dataset truncated: expected {} values, found {} bytes",
                count,
                raw.len()
            )));
        }

        let values = match data_type {
            DatasetType::Unknown => {
                return Err(MlError::InvalidFormat("Dataset element type is unknown".into()));
            }
            DatasetType::Float32 => {
                let mut v = vec![0f32; count];
                LittleEndian::read_f32_into(&raw, &mut v);
                DatasetValues::Float32(v)
            }
            DatasetType::Int8 => DatasetValues::Int8(raw.into_iter().map(|b| b as i8).collect()),
            DatasetType::Int16 => {
                let mut v = vec![0i16; count];
                LittleEndian::read_i16_into(&raw, &mut v);
                DatasetValues::Int16(v)
            }
        };
        debug!("Read dataset: {:?} {} x {}", data_type, num_samples, sample_size);
        Self::new(sample_size.max(1), recurrence, values)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<LittleEndian>(self.data_type() as i32)?;
        writer.write_i32::<LittleEndian>(self.num_samples() as i32)?;
        writer.write_i32::<LittleEndian>(self.sample_size as i32)?;
        writer.write_i32::<LittleEndian>(self.recurrence.to_raw())?;
        match &self.values {
            DatasetValues::Float32(v) => {
                for &x in v {
                    writer.write_f32::<LittleEndian>(x)?;
                }
            }
            DatasetValues::Int8(v) => {
                for &x in v {
                    writer.write_i8(x)?;
                }
            }
            DatasetValues::Int16(v) => {
                for &x in v {
                    writer.write_i16::<LittleEndian>(x)?;
                }
            }
        }
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Sample `index` as floats. Integer data is read at `q` fraction bits.
    pub fn sample_f32(&self, index: usize, q: u8) -> Option<Vec<f32>> {
        let range = index * self.sample_size..(index + 1) * self.sample_size;
        let norm = (1u64 << q) as f32;
        match &self.values {
            DatasetValues::Float32(v) => v.get(range).map(|s| s.to_vec()),
            DatasetValues::Int8(v) => v.get(range).map(|s| s.iter().map(|&x| x as f32 / norm).collect()),
            DatasetValues::Int16(v) => v.get(range).map(|s| s.iter().map(|&x| x as f32 / norm).collect()),
        }
    }

    /// Every value in fixed point of type `T`.
    ///
    /// Float data is quantized at `q` fraction bits; integer data must
    /// already have the width of `T`.
    pub fn to_fixed<T: MlData>(&self, q: u8) -> Result<Vec<T>> {
        let widen = |bits: u32, name: &'static str, v: Vec<i64>| -> Result<Vec<T>> {
            if bits != T::BITS {
                return Err(MlError::MismatchDataType { expected: T::NAME, found: name });
            }
            Ok(v.into_iter().map(T::saturate_from).collect())
        };
        match &self.values {
            DatasetValues::Float32(v) => {
                let mut out = vec![T::default(); v.len()];
                if !v.is_empty() {
                    convert_flt_to_int(v, &mut out, q)?;
                }
                Ok(out)
            }
            DatasetValues::Int8(v) => widen(8, "int8", v.iter().map(|&x| x as i64).collect()),
            DatasetValues::Int16(v) => widen(16, "int16", v.iter().map(|&x| x as i64).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_write_float_dataset() {
        let ds = Dataset::new(
            3,
            Recurrence::Steps(4),
            DatasetValues::Float32(vec![0.5, -1.0, 2.0, 0.25, 0.0, 1.5]),
        )
        .unwrap();
        let mut bytes = Vec::new();
        ds.write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &4i32.to_le_bytes());

        let back = Dataset::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back, ds);
        assert_eq!(back.num_samples(), 2);
        assert_eq!(back.sample_f32(1, 0), Some(vec![0.25, 0.0, 1.5]));
        assert_eq!(back.sample_f32(2, 0), None);
    }

    #[test]
    fn test_truncated_and_unknown() {
        let ds = Dataset::new(2, Recurrence::None, DatasetValues::Int16(vec![1, 2, 3, 4])).unwrap();
        let mut bytes = Vec::new();
        ds.write_to(&mut bytes).unwrap();
        bytes.pop();
        assert!(matches!(Dataset::read_from(&mut Cursor::new(bytes)), Err(MlError::InvalidFormat(_))));

        let mut unknown = Vec::new();
        for v in [0i32, 1, 1, -1] {
            unknown.extend_from_slice(&v.to_le_bytes());
        }
        assert!(Dataset::read_from(&mut Cursor::new(unknown)).is_err());
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let header = |fields: [i32; 4]| fields.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();

        let bytes = header([1, i32::MAX, i32::MAX, -1]);
        assert!(matches!(Dataset::read_from(&mut Cursor::new(bytes)), Err(MlError::InvalidFormat(_))));

        // Fits in memory on paper, but the file holds only two values
        let mut bytes = header([3, 1 << 20, 1 << 10, -1]);
        bytes.extend_from_slice(&[1, 0, 2, 0]);
        let err = Dataset::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("truncated"), "got {}", err);
    }

    #[test]
    fn test_to_fixed() {
        let ds = Dataset::new(2, Recurrence::None, DatasetValues::Float32(vec![0.5, -0.25])).unwrap();
        assert_eq!(ds.to_fixed::<i8>(6).unwrap(), vec![32, -16]);

        let ds = Dataset::new(1, Recurrence::None, DatasetValues::Int8(vec![5, -5])).unwrap();
        assert_eq!(ds.to_fixed::<i8>(0).unwrap(), vec![5, -5]);
        assert!(matches!(ds.to_fixed::<i16>(0), Err(MlError::MismatchDataType { .. })));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        let ds = Dataset::new(1, Recurrence::NonStreaming, DatasetValues::Int8(vec![1, -1, 7])).unwrap();
        ds.to_file(&path).unwrap();
        assert_eq!(Dataset::from_file(&path).unwrap(), ds);
    }
}
