use std::collections::VecDeque;
use crate::error::{MlError, Result};
use crate::model::ModelInfo;
use crate::quant::MlData;
use super::interface::{FrameStatus, StreamInterface, StreamSetup};

/// A published model output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResult<T> {
    pub output: Vec<T>,
    pub q_fraction_bits: u8,
}

/// In-memory stream interface: frames are pushed by the caller, results
/// collect in a list.
#[derive(Debug)]
pub struct QueueInterface<T> {
    frames: VecDeque<Vec<T>>,
    input_closed: bool,
    input_q: Option<u8>,
    results: Vec<StreamResult<T>>,
    opened: bool,
    closed: bool,
}

impl<T: MlData> QueueInterface<T> {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            input_closed: false,
            input_q: None,
            results: Vec::new(),
            opened: false,
            closed: false,
        }
    }

    /// Announce the Q-fraction bits of pushed frames.
    pub fn with_input_q(mut self, q: u8) -> Self {
        self.input_q = Some(q);
        self
    }

    pub fn push_frame(&mut self, frame: &[T]) {
        self.frames.push_back(frame.to_vec());
    }

    /// Push every frame of a back-to-back sequence.
    pub fn push_frames(&mut self, frames: &[T], frame_size: usize) {
        for frame in frames.chunks(frame_size.max(1)) {
            self.push_frame(frame);
        }
    }

    /// No more frames will be pushed.
    pub fn close_input(&mut self) {
        self.input_closed = true;
    }

    pub fn results(&self) -> &[StreamResult<T>] {
        &self.results
    }

    pub fn take_results(&mut self) -> Vec<StreamResult<T>> {
        std::mem::take(&mut self.results)
    }

    pub fn is_open(&self) -> bool {
        self.opened && !self.closed
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }
}

impl<T: MlData> Default for QueueInterface<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MlData> StreamInterface<T> for QueueInterface<T> {
    fn open(&mut self, _info: &ModelInfo) -> Result<StreamSetup> {
        self.opened = true;
        Ok(StreamSetup {
            input_q_fraction_bits: self.input_q,
            frame_count: None,
        })
    }

    fn read_frame(&mut self, frame: &mut [T]) -> Result<FrameStatus> {
        match self.frames.pop_front() {
            Some(next) => {
                if next.len() != frame.len() {
                    return Err(MlError::InvalidArgument(format!(
                        "queued frame holds {} elements, model expects {}",
                        next.len(),
                        frame.len()
                    )));
                }
                frame.copy_from_slice(&next);
                Ok(FrameStatus::Ready)
            }
            None if self.input_closed => Ok(FrameStatus::Finished),
            None => Ok(FrameStatus::Pending),
        }
    }

    fn write_result(&mut self, output: &[T], q_fraction_bits: u8) -> Result<()> {
        self.results.push(StreamResult {
            output: output.to_vec(),
            q_fraction_bits,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
