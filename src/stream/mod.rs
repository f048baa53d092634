//! Frame-by-frame streaming of a model over a [`StreamInterface`].

mod host_link;
mod interface;
mod queue;

pub use host_link::{
    host_session_bytes, link_error, parse_device_transcript, DeviceTranscript, HostLink,
    LinkDatasetHeader, LoopbackLink, RegressionInfo, DEFAULT_BAUD_RATE,
};
pub use interface::{FrameStatus, StreamInterface, StreamSetup};
pub use queue::{QueueInterface, StreamResult};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::error::Result;
use crate::model::{Model, ModelBinary, ModelBuffer, RnnStateControl};
use crate::profiler::{ProfileConfig, ProfileReport};
use crate::quant::MlData;

/// What one call to [`Stream::task`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStep {
    /// No frame was available
    Idle,
    /// A frame ran but its recurrent window is still open
    Consumed,
    /// A frame ran and its output was published
    Output,
    /// The source is exhausted and the interface closed
    Finished,
}

/// Totals of a finished stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub session: Uuid,
    pub frames: usize,
    pub outputs: usize,
    pub profile: ProfileReport,
}

/// Drives a model with frames pulled from an interface.
pub struct Stream<T: MlData, I: StreamInterface<T>> {
    session: Uuid,
    model: Model<T>,
    interface: I,
    frame: Vec<T>,
    /// Frames per published output, 0 to publish every frame
    window: usize,
    frames_in_window: usize,
    frame_limit: Option<usize>,
    frames: usize,
    outputs: usize,
    finished: bool,
}

impl<T: MlData, I: StreamInterface<T>> Stream<T, I> {
    /// Initialize a model from `binary` and open `interface` for it.
    pub fn init(interface: I, profile_config: ProfileConfig, binary: &ModelBinary) -> Result<Self> {
        Self::init_with_buffer(interface, profile_config, binary, None)
    }

    pub fn init_with_buffer(
        mut interface: I,
        profile_config: ProfileConfig,
        binary: &ModelBinary,
        buffer: Option<ModelBuffer>,
    ) -> Result<Self> {
        let mut model = Model::<T>::init(binary, buffer)?;
        model.profile_config(profile_config);
        let session = Uuid::new_v4();

        let setup = interface.open(&model.info())?;
        if let Some(q) = setup.input_q_fraction_bits {
            model.set_input_q_fraction_bits(q)?;
        }

        let window = model.recurrent_time_series_frames();
        if window > 0 {
            model.rnn_state_control(RnnStateControl::Window(window))?;
        }
        let frame = vec![T::default(); model.input_size()];

        info!(
            "Stream {} opened for '{}': input q={} window={} frames={:?}",
            session,
            model.name(),
            model.input_q_fraction_bits(),
            window,
            setup.frame_count
        );
        Ok(Self {
            session,
            model,
            interface,
            frame,
            window,
            frames_in_window: 0,
            frame_limit: setup.frame_count,
            frames: 0,
            outputs: 0,
            finished: false,
        })
    }

    /// Poll for one frame and process it.
    pub fn task(&mut self) -> Result<StreamStep> {
        if self.finished {
            return Ok(StreamStep::Finished);
        }
        if self.frame_limit.is_some_and(|limit| self.frames >= limit) {
            return self.finish();
        }

        match self.interface.read_frame(&mut self.frame)? {
            FrameStatus::Pending => Ok(StreamStep::Idle),
            FrameStatus::Finished => self.finish(),
            FrameStatus::Ready => {
                self.model.run(&self.frame)?;
                self.frames += 1;

                if self.window > 0 {
                    self.frames_in_window += 1;
                    if self.frames_in_window < self.window {
                        return Ok(StreamStep::Consumed);
                    }
                    self.frames_in_window = 0;
                }
                self.interface
                    .write_result(self.model.output(), self.model.output_q_fraction_bits())?;
                self.outputs += 1;
                Ok(StreamStep::Output)
            }
        }
    }

    fn finish(&mut self) -> Result<StreamStep> {
        if self.window > 0 && self.frames_in_window > 0 {
            warn!(
                "Stream {} ended inside a recurrent window ({} of {} frames)",
                self.session, self.frames_in_window, self.window
            );
        }
        self.model.profile_log();
        self.interface.close()?;
        self.finished = true;
        debug!("Stream {} finished: {} frames, {} outputs", self.session, self.frames, self.outputs);
        Ok(StreamStep::Finished)
    }

    /// Drive [`Stream::task`] until the source is exhausted.
    ///
    /// An interface that keeps reporting `Pending` keeps this loop spinning;
    /// in-memory queues must be closed first.
    pub fn run(&mut self) -> Result<StreamSummary> {
        loop {
            match self.task()? {
                StreamStep::Finished => break,
                StreamStep::Idle => std::thread::yield_now(),
                StreamStep::Consumed | StreamStep::Output => {}
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            session: self.session,
            frames: self.frames,
            outputs: self.outputs,
            profile: self.model.profile_report(),
        }
    }

    /// Release the model, returning the interface and any caller arenas.
    pub fn deinit(self) -> (I, ModelBuffer) {
        let buffer = self.model.deinit();
        (self.interface, buffer)
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn model(&self) -> &Model<T> {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model<T> {
        &mut self.model
    }

    pub fn interface(&self) -> &I {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut I {
        &mut self.interface
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
