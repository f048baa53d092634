use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::error::{MlError, Result};
use super::types::{MODEL_MAGIC, MODEL_NAME_LEN};

/// Map a short read to a format error, keep every other I/O failure as is.
pub fn truncated(e: std::io::Error, what: &str) -> MlError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        MlError::InvalidFormat(format!("Model binary truncated while reading {}", what))
    } else {
        MlError::Io(e)
    }
}

/// Read a length-prefixed UTF-8 model name
pub fn read_name<R: Read>(reader: &mut R) -> Result<String> {
    // Read name length
    let name_len = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| truncated(e, "name length"))? as usize;
    if name_len > MODEL_NAME_LEN {
        return Err(MlError::InvalidFormat(format!(
            "Model name length {} exceeds {}",
            name_len, MODEL_NAME_LEN
        )));
    }

    let mut buffer = vec![0u8; name_len];
    reader.read_exact(&mut buffer).map_err(|e| truncated(e, "name"))?;

    String::from_utf8(buffer)
        .map_err(|e| MlError::InvalidFormat(format!("Invalid UTF-8 in model name: {}", e)))
}

/// Write a length-prefixed model name
pub fn write_name<W: Write>(writer: &mut W, name: &str) -> Result<()> {
    if name.len() > MODEL_NAME_LEN {
        return Err(MlError::InvalidArgument(format!(
            "Model name '{}' is longer than {} bytes",
            name, MODEL_NAME_LEN
        )));
    }
    writer.write_u32::<LittleEndian>(name.len() as u32)?;
    writer.write_all(name.as_bytes())?;
    Ok(())
}

/// Checks if a file at the given path is a model binary by verifying its magic number.
///
/// # Arguments
///
/// * `path` - Path to the file to check
///
/// # Returns
///
/// `true` if the file exists and starts with the model magic number, `false` otherwise
pub fn is_model_file<P: AsRef<Path>>(path: P) -> bool {
    if let Ok(mut file) = File::open(path) {
        if let Ok(magic) = file.read_u32::<LittleEndian>() {
            return magic == MODEL_MAGIC;
        }
    }
    false
}
