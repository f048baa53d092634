use std::fmt::Debug;
use std::io::{Read, Write};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Element type of model input and output buffers.
///
/// Implemented for the two activation widths the engine supports. The
/// engine widens every element to `i64` internally and saturates back
/// when it writes the output buffer.
pub trait MlData: Copy + Default + PartialOrd + Debug + Send + Sync + 'static {
    /// Width of the type in bits
    const BITS: u32;
    /// Human-readable type name
    const NAME: &'static str;
    /// Largest Q-fraction bit count the type can carry
    const MAX_Q: u8 = (Self::BITS - 1) as u8;
    /// Smallest representable value, widened
    const MIN_I64: i64;
    /// Largest representable value, widened
    const MAX_I64: i64;

    fn to_i64(self) -> i64;

    /// Narrow a wide value, clamping it to the representable range.
    fn saturate_from(value: i64) -> Self;

    fn read_le<R: Read>(reader: &mut R) -> std::io::Result<Self>;

    fn write_le<W: Write>(self, writer: &mut W) -> std::io::Result<()>;
}

impl MlData for i8 {
    const BITS: u32 = 8;
    const NAME: &'static str = "int8";
    const MIN_I64: i64 = i8::MIN as i64;
    const MAX_I64: i64 = i8::MAX as i64;

    fn to_i64(self) -> i64 {
        self as i64
    }

    fn saturate_from(value: i64) -> Self {
        value.clamp(Self::MIN_I64, Self::MAX_I64) as i8
    }

    fn read_le<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        reader.read_i8()
    }

    fn write_le<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        writer.write_i8(self)
    }
}

impl MlData for i16 {
    const BITS: u32 = 16;
    const NAME: &'static str = "int16";
    const MIN_I64: i64 = i16::MIN as i64;
    const MAX_I64: i64 = i16::MAX as i64;

    fn to_i64(self) -> i64 {
        self as i64
    }

    fn saturate_from(value: i64) -> Self {
        value.clamp(Self::MIN_I64, Self::MAX_I64) as i16
    }

    fn read_le<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        reader.read_i16::<LittleEndian>()
    }

    fn write_le<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        writer.write_i16::<LittleEndian>(self)
    }
}
