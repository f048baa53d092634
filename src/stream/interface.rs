use crate::error::Result;
use crate::model::ModelInfo;
use crate::quant::MlData;

/// What an interface learned while opening
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSetup {
    /// Q-fraction bits of the incoming frames, if the source announces them
    pub input_q_fraction_bits: Option<u8>,
    /// Number of frames the source will send, if known
    pub frame_count: Option<usize>,
}

/// Outcome of polling for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was written into the caller's buffer
    Ready,
    /// No frame yet; poll again later
    Pending,
    /// The source has no more frames
    Finished,
}

/// Binds a model to a source of time-ordered frames and a result sink.
pub trait StreamInterface<T: MlData> {
    /// Called once before the first frame.
    fn open(&mut self, info: &ModelInfo) -> Result<StreamSetup>;

    /// Fill `frame` with the next input frame.
    fn read_frame(&mut self, frame: &mut [T]) -> Result<FrameStatus>;

    /// Publish a model output with its Q-fraction bits.
    fn write_result(&mut self, output: &[T], q_fraction_bits: u8) -> Result<()>;

    /// Called once after the last frame.
    fn close(&mut self) -> Result<()>;
}
