use tracing::{debug, info};
use crate::engine::{Arena, Graph};
use crate::error::{InferenceFault, MlError, Result};
use crate::format::{parse_model, DataKind};
use crate::profiler::{ProfileConfig, ProfileReport, Profiler, TscSource};
use crate::quant::MlData;
use super::binary::{adopt_or_allocate, empty_binary, ModelBinary, ModelBuffer};
use super::info::ModelInfo;

/// How recurrent hidden state is managed across runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RnnStateControl {
    /// Clear the hidden state now; the current policy is kept
    Reset,
    /// Keep state across runs, never reset automatically
    Hold,
    /// Clear now, then again before every `n`-th frame
    Window(usize),
    /// Clear before every run
    Disable,
}

/// Last fault raised by a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibError {
    pub layer: usize,
    pub fault: InferenceFault,
}

/// An initialized model ready to run frames of `T`.
pub struct Model<T: MlData> {
    name: String,
    data_kind: DataKind,
    model_size: usize,
    parameter_count: usize,
    graph: Graph,
    persistent: Arena,
    scratch: Arena,
    persistent_lent: bool,
    scratch_lent: bool,
    output: Vec<T>,
    input_q: u8,
    output_q: u8,
    recurrent_ts: usize,
    rnn_control: RnnStateControl,
    frames_in_window: usize,
    profiler: Profiler,
    lib_error: Option<LibError>,
}

impl<T: MlData> Model<T> {
    /// Parse a model binary and prepare it for inference.
    ///
    /// # Arguments
    ///
    /// * `binary` - Serialized model; it is not referenced after `init` returns
    /// * `buffer` - Optional caller arenas, returned by [`Model::deinit`]
    ///
    /// # Returns
    ///
    /// The model, or `MismatchDataType` when the binary's activation width
    /// differs from `T`, `InvalidFormat` for malformed binaries and
    /// `OutOfMemory` when an arena cannot be allocated or is too small
    pub fn init(binary: &ModelBinary, buffer: Option<ModelBuffer>) -> Result<Self> {
        if binary.is_empty() {
            return Err(empty_binary());
        }
        let descriptor = parse_model(binary.as_bytes())?;
        let header = &descriptor.header;
        if header.data_kind.activation_bits() != T::BITS {
            return Err(MlError::MismatchDataType {
                expected: header.data_kind.activation_name(),
                found: T::NAME,
            });
        }

        let graph = Graph::from_descriptor(&descriptor)?;
        let plan = graph.plan();
        let buffer = buffer.unwrap_or_default();
        let (mut persistent, persistent_lent) = adopt_or_allocate(buffer.persistent, plan.persistent_words)?;
        let (mut scratch, scratch_lent) = adopt_or_allocate(buffer.scratch, plan.scratch_words)?;
        graph.bind(&mut persistent, &mut scratch)?;

        let mut output = Vec::new();
        output.try_reserve_exact(header.output_size).map_err(|e| {
            MlError::OutOfMemory(format!("output buffer of {} elements: {}", header.output_size, e))
        })?;
        output.resize(header.output_size, T::default());

        let kinds = graph.layers().iter().map(|l| l.kind()).collect();
        info!(
            "Initialized model '{}' ({}, {} bytes, buffers {} bytes)",
            header.name,
            header.data_kind,
            binary.len(),
            plan.bytes()
        );

        Ok(Self {
            name: header.name.clone(),
            data_kind: header.data_kind,
            model_size: binary.len(),
            parameter_count: descriptor.parameter_count(),
            graph,
            persistent,
            scratch,
            persistent_lent,
            scratch_lent,
            output,
            input_q: header.input_q,
            output_q: 0,
            recurrent_ts: header.recurrent_ts,
            rnn_control: RnnStateControl::Hold,
            frames_in_window: 0,
            profiler: Profiler::new(kinds),
            lib_error: None,
        })
    }

    /// Release engine-owned memory and hand caller arenas back.
    pub fn deinit(self) -> ModelBuffer {
        debug!("Releasing model '{}'", self.name);
        let give_back = |mut arena: Arena, lent: bool| {
            if lent {
                arena.reset();
                Some(arena)
            } else {
                None
            }
        };
        ModelBuffer {
            persistent: give_back(self.persistent, self.persistent_lent),
            scratch: give_back(self.scratch, self.scratch_lent),
        }
    }

    /// Run one frame.
    ///
    /// `input` must hold exactly `input_size` elements at the current input Q.
    /// The result is read back with [`Model::output`] and
    /// [`Model::output_q_fraction_bits`].
    pub fn run(&mut self, input: &[T]) -> Result<()> {
        if input.len() != self.graph.input_size() {
            return Err(MlError::InvalidArgument(format!(
                "input holds {} elements, model expects {}",
                input.len(),
                self.graph.input_size()
            )));
        }
        self.apply_rnn_policy();

        self.profiler.begin_frame();
        let profiler = &mut self.profiler;
        let result = self.graph.execute(
            input,
            self.input_q,
            &mut self.persistent,
            &mut self.scratch,
            &mut self.output,
            &mut |index| profiler.layer_done(index),
        );
        let q = match result {
            Ok(q) => q,
            Err(e) => {
                if let MlError::Inference { layer, fault } = &e {
                    self.lib_error = Some(LibError { layer: *layer, fault: *fault });
                }
                return Err(e);
            }
        };
        self.output_q = q;
        self.frames_in_window += 1;
        self.profiler.end_frame()?;

        if self.profiler.config().contains(ProfileConfig::LOG_ENABLE_MODEL_LOG) {
            info!(" output: {:?} q={}", self.output, self.output_q);
        }
        Ok(())
    }

    /// Run consecutive frames packed back to back, returning how many ran.
    pub fn run_sequence(&mut self, frames: &[T]) -> Result<usize> {
        let size = self.graph.input_size();
        if frames.is_empty() || frames.len() % size != 0 {
            return Err(MlError::InvalidArgument(format!(
                "sequence of {} elements is not a whole number of {}-element frames",
                frames.len(),
                size
            )));
        }
        for frame in frames.chunks_exact(size) {
            self.run(frame)?;
        }
        Ok(frames.len() / size)
    }

    fn apply_rnn_policy(&mut self) {
        match self.rnn_control {
            RnnStateControl::Disable => self.reset_state(),
            RnnStateControl::Window(n) if self.frames_in_window >= n => self.reset_state(),
            _ => {}
        }
    }

    fn reset_state(&mut self) {
        self.graph.reset_state(&mut self.persistent);
        self.frames_in_window = 0;
    }

    /// Change how recurrent state is handled. `Window(0)` is rejected.
    pub fn rnn_state_control(&mut self, control: RnnStateControl) -> Result<()> {
        match control {
            RnnStateControl::Window(0) => {
                return Err(MlError::InvalidArgument("recurrent window must be at least one frame".into()));
            }
            RnnStateControl::Reset => {}
            RnnStateControl::Hold | RnnStateControl::Window(_) | RnnStateControl::Disable => {
                self.rnn_control = control;
            }
        }
        if control != RnnStateControl::Hold {
            self.reset_state();
        }
        debug!("Model '{}' recurrent state control: {:?}", self.name, control);
        Ok(())
    }

    pub fn rnn_control(&self) -> RnnStateControl {
        self.rnn_control
    }

    pub fn input_size(&self) -> usize {
        self.graph.input_size()
    }

    pub fn output_size(&self) -> usize {
        self.output.len()
    }

    /// Output of the most recent run
    pub fn output(&self) -> &[T] {
        &self.output
    }

    pub fn output_q_fraction_bits(&self) -> u8 {
        self.output_q
    }

    pub fn input_q_fraction_bits(&self) -> u8 {
        self.input_q
    }

    pub fn set_input_q_fraction_bits(&mut self, bits: u8) -> Result<()> {
        if bits > T::MAX_Q {
            return Err(MlError::InvalidArgument(format!(
                "{} fraction bits exceed the {} maximum of {}",
                bits,
                T::NAME,
                T::MAX_Q
            )));
        }
        self.input_q = bits;
        Ok(())
    }

    /// Frames per recurrent window, 0 when the model is not recurrent
    pub fn recurrent_time_series_frames(&self) -> usize {
        self.recurrent_ts
    }

    pub fn is_recurrent(&self) -> bool {
        self.graph.is_recurrent()
    }

    pub fn inference_object(&self) -> &Graph {
        &self.graph
    }

    /// Most recent kernel fault, kept until another fault replaces it
    pub fn lib_error(&self) -> Option<LibError> {
        self.lib_error
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_size(&self) -> usize {
        self.model_size
    }

    pub fn buffer_size(&self) -> usize {
        self.graph.plan().bytes()
    }

    pub fn info(&self) -> ModelInfo {
        let plan = self.graph.plan();
        ModelInfo {
            name: self.name.clone(),
            data_kind: self.data_kind,
            model_size: self.model_size,
            buffer_size: self.buffer_size(),
            persistent_mem: plan.persistent_words * std::mem::size_of::<i64>(),
            scratch_mem: plan.scratch_words * std::mem::size_of::<i64>(),
            input_size: self.input_size(),
            output_size: self.output_size(),
            input_q: self.input_q,
            output_q: self.output_q,
            recurrent_ts: self.recurrent_ts,
            layer_count: self.graph.layers().len(),
            parameter_count: self.parameter_count,
        }
    }

    /// Set profiling flags. Any config other than `DISABLE` clears the counters.
    pub fn profile_config(&mut self, config: ProfileConfig) {
        self.profiler.configure(config);
    }

    pub fn profile_get_tsc(&self) -> u64 {
        self.profiler.get_tsc()
    }

    pub fn set_tsc_source(&mut self, tsc: Box<dyn TscSource>) {
        self.profiler.set_tsc_source(tsc);
    }

    /// Log the profiling summary and return it.
    pub fn profile_log(&self) -> ProfileReport {
        self.profiler.log(&self.name)
    }

    pub fn profile_report(&self) -> ProfileReport {
        self.profiler.report(&self.name)
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }
}
