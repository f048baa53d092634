//! Frame streaming to and from a host over any byte transport.
//!
//! The device side is [`HostLink`]. Control strings travel NUL-terminated,
//! numbers little-endian:
//!
//! ```text
//! host                       device
//! ML_START           ->
//!                    <-      ML_READY
//! ML_MODEL_DATA_REQ  ->
//!                    <-      ML_MODEL_DATA + regression info
//! ML_DATASET_SENDREQ ->
//!                    <-      ML_READY
//! dataset header     ->
//!                    <-      ML_FRAME            (per frame)
//! frame bytes        ->
//!                    <-      ML_RESULT + output + i32 output Q
//! ML_COMPLETED       ->
//!                    <-      ML_DONE
//! ```

use std::io::{Cursor, ErrorKind, Read, Write};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};
use crate::error::{MlError, Result};
use crate::model::ModelInfo;
use crate::quant::MlData;
use super::interface::{FrameStatus, StreamInterface, StreamSetup};
use super::queue::StreamResult;

pub const ML_START: &str = "ML_START";
pub const ML_READY: &str = "ML_READY";
pub const ML_MODEL_DATA_REQ: &str = "ML_MODEL_DATA_REQ";
pub const ML_MODEL_DATA: &str = "ML_MODEL_DATA";
pub const ML_DATASET_SENDREQ: &str = "ML_DATASET_SENDREQ";
pub const ML_FRAME: &str = "ML_FRAME";
pub const ML_RESULT: &str = "ML_RESULT";
pub const ML_COMPLETED: &str = "ML_COMPLETED";
pub const ML_DONE: &str = "ML_DONE";

/// Default link speed announced by hosts
pub const DEFAULT_BAUD_RATE: i32 = 1_000_000;

/// Model facts the device reports after `ML_MODEL_DATA`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegressionInfo {
    pub n_out_classes: i32,
    pub scratch_mem: i32,
    pub persistent_mem: i32,
    pub recurrent_ts_size: i32,
    pub model_sz: u32,
}

impl RegressionInfo {
    pub const SIZE: usize = 20;

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_i32::<LittleEndian>(self.n_out_classes)?;
        w.write_i32::<LittleEndian>(self.scratch_mem)?;
        w.write_i32::<LittleEndian>(self.persistent_mem)?;
        w.write_i32::<LittleEndian>(self.recurrent_ts_size)?;
        w.write_u32::<LittleEndian>(self.model_sz)
    }

    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            n_out_classes: r.read_i32::<LittleEndian>()?,
            scratch_mem: r.read_i32::<LittleEndian>()?,
            persistent_mem: r.read_i32::<LittleEndian>()?,
            recurrent_ts_size: r.read_i32::<LittleEndian>()?,
            model_sz: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Dataset description the host sends before the first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDatasetHeader {
    /// Number of frames
    pub n_ex: i32,
    /// Frame size in elements
    pub in_sz: i32,
    /// Q-fraction bits of the frames
    pub q_fixed: i32,
    /// Bytes per input element
    pub input_size: i32,
    /// Bytes per output element
    pub output_size: i32,
    pub baud_rate: i32,
}

impl LinkDatasetHeader {
    pub const SIZE: usize = 24;

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for v in [self.n_ex, self.in_sz, self.q_fixed, self.input_size, self.output_size, self.baud_rate] {
            w.write_i32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            n_ex: r.read_i32::<LittleEndian>()?,
            in_sz: r.read_i32::<LittleEndian>()?,
            q_fixed: r.read_i32::<LittleEndian>()?,
            input_size: r.read_i32::<LittleEndian>()?,
            output_size: r.read_i32::<LittleEndian>()?,
            baud_rate: r.read_i32::<LittleEndian>()?,
        })
    }
}

/// Map transport failures onto stream errors.
pub fn link_error(e: std::io::Error, what: &str) -> MlError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            MlError::Timeout(format!("timed out while {}", what))
        }
        ErrorKind::UnexpectedEof => MlError::Communication(format!("link closed while {}", what)),
        _ => MlError::Communication(format!("{} failed: {}", what, e)),
    }
}

fn send_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    w.write_all(s.as_bytes())
        .and_then(|_| w.write_all(&[0]))
        .map_err(|e| link_error(e, &format!("sending {}", s)))
}

/// Consume bytes until the NUL-terminated `s` has been seen.
fn wait_for_string<R: Read>(r: &mut R, s: &str) -> Result<()> {
    let mut pattern = s.as_bytes().to_vec();
    pattern.push(0);
    let mut position = 0;
    while position < pattern.len() {
        let byte = r.read_u8().map_err(|e| link_error(e, &format!("waiting for {}", s)))?;
        if byte == pattern[position] {
            position += 1;
        } else {
            position = usize::from(byte == pattern[0]);
        }
    }
    Ok(())
}

/// Device side of the host link
pub struct HostLink<S: Read + Write> {
    link: S,
    header: Option<LinkDatasetHeader>,
    frames_sent: usize,
    bytes: Vec<u8>,
}

impl<S: Read + Write> HostLink<S> {
    pub fn new(link: S) -> Self {
        Self {
            link,
            header: None,
            frames_sent: 0,
            bytes: Vec::new(),
        }
    }

    /// Dataset header received during the handshake
    pub fn dataset_header(&self) -> Option<LinkDatasetHeader> {
        self.header
    }

    pub fn into_inner(self) -> S {
        self.link
    }
}

impl<T: MlData, S: Read + Write> StreamInterface<T> for HostLink<S> {
    fn open(&mut self, info: &ModelInfo) -> Result<StreamSetup> {
        wait_for_string(&mut self.link, ML_START)?;
        send_string(&mut self.link, ML_READY)?;

        wait_for_string(&mut self.link, ML_MODEL_DATA_REQ)?;
        send_string(&mut self.link, ML_MODEL_DATA)?;
        let clamp = |v: usize| i32::try_from(v).unwrap_or(i32::MAX);
        let record = RegressionInfo {
            n_out_classes: clamp(info.output_size),
            scratch_mem: clamp(info.scratch_mem),
            persistent_mem: clamp(info.persistent_mem),
            recurrent_ts_size: clamp(info.recurrent_ts),
            model_sz: u32::try_from(info.model_size).unwrap_or(u32::MAX),
        };
        record
            .write_to(&mut self.link)
            .map_err(|e| link_error(e, "sending model info"))?;

        wait_for_string(&mut self.link, ML_DATASET_SENDREQ)?;
        send_string(&mut self.link, ML_READY)?;
        self.link.flush().map_err(|e| link_error(e, "flushing"))?;
        let header = LinkDatasetHeader::read_from(&mut self.link)
            .map_err(|e| link_error(e, "receiving dataset header"))?;
        info!(
            "Received: num frames:{} frame size:{} in_size:{} out_size:{} in_q_fixed:{}",
            header.n_ex, header.in_sz, header.input_size, header.output_size, header.q_fixed
        );

        let element = std::mem::size_of::<T>() as i32;
        if header.in_sz < 0 || header.in_sz as usize != info.input_size {
            return Err(MlError::InvalidArgument(format!(
                "input frame size {} differs from model input size {}",
                header.in_sz, info.input_size
            )));
        }
        if header.input_size != element || header.output_size != element {
            return Err(MlError::InvalidArgument(format!(
                "host element sizes {}/{} differ from {} bytes",
                header.input_size, header.output_size, element
            )));
        }
        if header.n_ex < 0 || !(0..=T::MAX_Q as i32).contains(&header.q_fixed) {
            return Err(MlError::InvalidArgument(format!(
                "invalid dataset header: frames={} q={}",
                header.n_ex, header.q_fixed
            )));
        }

        self.header = Some(header);
        self.frames_sent = 0;
        self.bytes = vec![0; info.input_size * element as usize];
        Ok(StreamSetup {
            input_q_fraction_bits: Some(header.q_fixed as u8),
            frame_count: Some(header.n_ex as usize),
        })
    }

    fn read_frame(&mut self, frame: &mut [T]) -> Result<FrameStatus> {
        let header = self
            .header
            .ok_or_else(|| MlError::Communication("host link used before open".into()))?;
        if self.frames_sent >= header.n_ex as usize {
            return Ok(FrameStatus::Finished);
        }

        send_string(&mut self.link, ML_FRAME)?;
        self.link.flush().map_err(|e| link_error(e, "flushing"))?;
        self.link
            .read_exact(&mut self.bytes)
            .map_err(|e| link_error(e, "receiving frame data"))?;

        let mut cursor = Cursor::new(&self.bytes);
        for dst in frame.iter_mut() {
            *dst = T::read_le(&mut cursor).map_err(|e| link_error(e, "decoding frame"))?;
        }
        self.frames_sent += 1;
        Ok(FrameStatus::Ready)
    }

    fn write_result(&mut self, output: &[T], q_fraction_bits: u8) -> Result<()> {
        send_string(&mut self.link, ML_RESULT)?;
        for &v in output {
            v.write_le(&mut self.link).map_err(|e| link_error(e, "sending output data"))?;
        }
        self.link
            .write_i32::<LittleEndian>(q_fraction_bits as i32)
            .map_err(|e| link_error(e, "sending q-fraction bits"))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.link.flush().map_err(|e| link_error(e, "flushing"))?;
        wait_for_string(&mut self.link, ML_COMPLETED)?;
        send_string(&mut self.link, ML_DONE)?;
        self.link.flush().map_err(|e| link_error(e, "flushing"))?;
        debug!("Host link session complete after {} frames", self.frames_sent);
        Ok(())
    }
}

/// A transport whose incoming bytes are scripted up front and whose
/// outgoing bytes are recorded.
#[derive(Debug, Default)]
pub struct LoopbackLink {
    rx: Cursor<Vec<u8>>,
    tx: Vec<u8>,
}

impl LoopbackLink {
    pub fn new(incoming: Vec<u8>) -> Self {
        Self {
            rx: Cursor::new(incoming),
            tx: Vec::new(),
        }
    }

    /// Everything the device wrote
    pub fn sent(&self) -> &[u8] {
        &self.tx
    }
}

impl Read for LoopbackLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.rx.read(buf)
    }
}

impl Write for LoopbackLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Everything a host sends for one session, in order.
pub fn host_session_bytes<T: MlData>(frames: &[T], frame_size: usize, q_fixed: u8) -> Result<Vec<u8>> {
    if frame_size == 0 || frames.len() % frame_size != 0 {
        return Err(MlError::InvalidArgument(format!(
            "{} elements do not split into frames of {}",
            frames.len(),
            frame_size
        )));
    }
    let element = std::mem::size_of::<T>() as i32;
    let header = LinkDatasetHeader {
        n_ex: (frames.len() / frame_size) as i32,
        in_sz: frame_size as i32,
        q_fixed: q_fixed as i32,
        input_size: element,
        output_size: element,
        baud_rate: DEFAULT_BAUD_RATE,
    };

    let mut out = Vec::new();
    send_string(&mut out, ML_START)?;
    send_string(&mut out, ML_MODEL_DATA_REQ)?;
    send_string(&mut out, ML_DATASET_SENDREQ)?;
    header.write_to(&mut out)?;
    for &v in frames {
        v.write_le(&mut out)?;
    }
    send_string(&mut out, ML_COMPLETED)?;
    Ok(out)
}

/// What the host received from the device during one session
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTranscript<T> {
    pub info: RegressionInfo,
    pub frame_requests: usize,
    pub results: Vec<StreamResult<T>>,
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let b = r.read_u8().map_err(|e| link_error(e, "reading device string"))?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    String::from_utf8(bytes).map_err(|e| MlError::Communication(format!("invalid device string: {}", e)))
}

fn expect_string<R: Read>(r: &mut R, expected: &str) -> Result<()> {
    let got = read_string(r)?;
    if got != expected {
        return Err(MlError::Communication(format!("expected {}, device sent {}", expected, got)));
    }
    Ok(())
}

/// Decode the bytes a device sent during one host-link session.
pub fn parse_device_transcript<T: MlData>(bytes: &[u8], output_size: usize) -> Result<DeviceTranscript<T>> {
    let mut r = Cursor::new(bytes);
    expect_string(&mut r, ML_READY)?;
    expect_string(&mut r, ML_MODEL_DATA)?;
    let info = RegressionInfo::read_from(&mut r).map_err(|e| link_error(e, "reading model info"))?;
    expect_string(&mut r, ML_READY)?;

    let mut frame_requests = 0;
    let mut results = Vec::new();
    loop {
        match read_string(&mut r)?.as_str() {
            ML_FRAME => frame_requests += 1,
            ML_RESULT => {
                let mut output = Vec::with_capacity(output_size);
                for _ in 0..output_size {
                    output.push(T::read_le(&mut r).map_err(|e| link_error(e, "reading output"))?);
                }
                let q = r
                    .read_i32::<LittleEndian>()
                    .map_err(|e| link_error(e, "reading output q"))?;
                results.push(StreamResult {
                    output,
                    q_fraction_bits: q as u8,
                });
            }
            ML_DONE => break,
            other => {
                return Err(MlError::Communication(format!("unexpected device string {}", other)));
            }
        }
    }
    Ok(DeviceTranscript {
        info,
        frame_requests,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_for_string_skips_noise() {
        let mut input = Cursor::new(b"xxML_MML_START\0rest".to_vec());
        wait_for_string(&mut input, ML_START).unwrap();
        assert_eq!(input.position(), 15);
    }

    #[test]
    fn test_wait_for_string_eof_is_communication_error() {
        let mut input = Cursor::new(b"ML_STA".to_vec());
        assert!(matches!(wait_for_string(&mut input, ML_START), Err(MlError::Communication(_))));
    }

    #[test]
    fn test_timeout_mapping() {
        let err = link_error(std::io::Error::new(ErrorKind::TimedOut, "t"), "reading");
        assert!(matches!(err, MlError::Timeout(_)));
    }

    #[test]
    fn test_header_layout() {
        let header = LinkDatasetHeader {
            n_ex: 2,
            in_sz: 3,
            q_fixed: 7,
            input_size: 1,
            output_size: 1,
            baud_rate: DEFAULT_BAUD_RATE,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), LinkDatasetHeader::SIZE);
        assert_eq!(&bytes[8..12], &7i32.to_le_bytes());
    }
}
