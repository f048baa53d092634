//! Cycle-count profiling of model runs.

mod config;
mod tsc;

pub use config::ProfileConfig;
pub use tsc::{ManualTsc, MonotonicTsc, TscSource};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::error::{MlError, Result};
use crate::format::LayerKind;

/// Aggregated cycles of one layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LayerStats {
    sum_cycles: u64,
    peak_cycles: u64,
    peak_frame: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerReport {
    pub index: usize,
    pub kind: LayerKind,
    pub sum_cycles: u64,
    pub avg_cycles: u64,
    pub peak_cycles: u64,
    pub peak_frame: u64,
}

/// Snapshot of the profiling counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub model: String,
    pub config: ProfileConfig,
    pub frames: u64,
    pub sum_cycles: u64,
    pub avg_cycles: u64,
    pub peak_cycles: u64,
    /// Zero-based index of the slowest frame
    pub peak_frame: u64,
    pub layers: Vec<LayerReport>,
    pub generated_at: DateTime<Utc>,
}

/// Counters attached to one model
pub struct Profiler {
    config: ProfileConfig,
    tsc: Box<dyn TscSource>,
    kinds: Vec<LayerKind>,
    frames: u64,
    sum_cycles: u64,
    peak_cycles: u64,
    peak_frame: u64,
    last_cycles: Option<u64>,
    layers: Vec<LayerStats>,
    frame_start: u64,
    layer_mark: u64,
}

fn elapsed(from: u64, to: u64) -> Result<u64> {
    to.checked_sub(from).ok_or_else(|| {
        MlError::CycleCount(format!("counter went backwards from {} to {}", from, to))
    })
}

impl Profiler {
    pub fn new(kinds: Vec<LayerKind>) -> Self {
        let layers = vec![LayerStats::default(); kinds.len()];
        Self {
            config: ProfileConfig::DISABLE,
            tsc: Box::new(MonotonicTsc::new()),
            kinds,
            frames: 0,
            sum_cycles: 0,
            peak_cycles: 0,
            peak_frame: 0,
            last_cycles: None,
            layers,
            frame_start: 0,
            layer_mark: 0,
        }
    }

    /// Apply new flags. Any config other than `DISABLE` clears the counters.
    pub fn configure(&mut self, config: ProfileConfig) {
        self.config = config;
        if !config.is_disabled() {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.frames = 0;
        self.sum_cycles = 0;
        self.peak_cycles = 0;
        self.peak_frame = 0;
        self.last_cycles = None;
        self.layers.iter_mut().for_each(|l| *l = LayerStats::default());
    }

    pub fn config(&self) -> ProfileConfig {
        self.config
    }

    pub fn set_tsc_source(&mut self, tsc: Box<dyn TscSource>) {
        self.tsc = tsc;
    }

    pub fn get_tsc(&self) -> u64 {
        self.tsc.read()
    }

    /// Cycles of the most recent profiled run
    pub fn last_cycles(&self) -> Option<u64> {
        self.last_cycles
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn begin_frame(&mut self) {
        if self.config.counts_cycles() {
            self.frame_start = self.tsc.read();
            self.layer_mark = self.frame_start;
        }
    }

    pub fn layer_done(&mut self, index: usize) -> Result<()> {
        if !self.config.contains(ProfileConfig::ENABLE_LAYER) {
            return Ok(());
        }
        let now = self.tsc.read();
        let cycles = elapsed(self.layer_mark, now)?;
        self.layer_mark = now;

        let frame = self.frames;
        if let Some(stats) = self.layers.get_mut(index) {
            stats.sum_cycles += cycles;
            if cycles > stats.peak_cycles {
                stats.peak_cycles = cycles;
                stats.peak_frame = frame;
            }
        }
        if self.config.contains(ProfileConfig::ENABLE_LAYER_PER_FRAME) {
            debug!("PROFILE_INFO, frame={} layer={} cpu_cyc={}", frame, index, cycles);
        }
        Ok(())
    }

    /// Close the current frame, returning its cycles when model profiling is on.
    pub fn end_frame(&mut self) -> Result<Option<u64>> {
        if !self.config.counts_cycles() {
            return Ok(None);
        }
        let frame = self.frames;
        self.frames += 1;
        if !self.config.contains(ProfileConfig::ENABLE_MODEL) {
            return Ok(None);
        }

        let cycles = elapsed(self.frame_start, self.tsc.read())?;
        self.sum_cycles += cycles;
        if cycles > self.peak_cycles || frame == 0 {
            self.peak_cycles = cycles;
            self.peak_frame = frame;
        }
        self.last_cycles = Some(cycles);
        if self.config.contains(ProfileConfig::ENABLE_MODEL_PER_FRAME) {
            info!("PROFILE_INFO, frame={} cpu_cyc={}", frame, cycles);
        }
        Ok(Some(cycles))
    }

    /// Snapshot the counters without changing them.
    pub fn report(&self, model: &str) -> ProfileReport {
        let avg = |sum: u64| if self.frames == 0 { 0 } else { sum / self.frames };
        let layers = if self.config.contains(ProfileConfig::ENABLE_LAYER) {
            self.layers
                .iter()
                .zip(&self.kinds)
                .enumerate()
                .map(|(index, (stats, kind))| LayerReport {
                    index,
                    kind: *kind,
                    sum_cycles: stats.sum_cycles,
                    avg_cycles: avg(stats.sum_cycles),
                    peak_cycles: stats.peak_cycles,
                    peak_frame: stats.peak_frame,
                })
                .collect()
        } else {
            Vec::new()
        };

        ProfileReport {
            model: model.to_string(),
            config: self.config,
            frames: self.frames,
            sum_cycles: self.sum_cycles,
            avg_cycles: avg(self.sum_cycles),
            peak_cycles: self.peak_cycles,
            peak_frame: self.peak_frame,
            layers,
            generated_at: Utc::now(),
        }
    }

    /// Emit the `PROFILE_INFO` summary and return the same data.
    pub fn log(&self, model: &str) -> ProfileReport {
        let report = self.report(model);
        if self.config.contains(ProfileConfig::ENABLE_MODEL) {
            info!(
                "PROFILE_INFO, {} frames={} avg_cpu_cyc={} peak_cpu_cyc={} peak_cpu_frame={}",
                report.model, report.frames, report.avg_cycles, report.peak_cycles, report.peak_frame
            );
        }
        for layer in &report.layers {
            info!(
                "PROFILE_INFO, {} layer={} ({}) avg_cpu_cyc={} peak_cpu_cyc={} peak_cpu_frame={}",
                report.model, layer.index, layer.kind, layer.avg_cycles, layer.peak_cycles, layer.peak_frame
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::Arc;

    /// Replays a fixed list of readings
    struct Script(Arc<Mutex<Vec<u64>>>);

    impl TscSource for Script {
        fn read(&self) -> u64 {
            let mut values = self.0.lock().unwrap();
            if values.is_empty() { 0 } else { values.remove(0) }
        }
    }

    fn profiler_with(readings: Vec<u64>, config: ProfileConfig) -> Profiler {
        let mut profiler = Profiler::new(vec![LayerKind::Dense, LayerKind::Relu]);
        profiler.set_tsc_source(Box::new(Script(Arc::new(Mutex::new(readings)))));
        profiler.configure(config);
        profiler
    }

    #[test]
    fn test_model_counters() {
        let mut profiler = profiler_with(vec![0, 10, 10, 40, 40, 45], ProfileConfig::ENABLE_MODEL);
        for expected in [10, 30, 5] {
            profiler.begin_frame();
            assert_eq!(profiler.end_frame().unwrap(), Some(expected));
        }
        let report = profiler.report("m");
        assert_eq!(report.frames, 3);
        assert_eq!(report.sum_cycles, 45);
        assert_eq!(report.avg_cycles, 15);
        assert_eq!(report.peak_cycles, 30);
        assert_eq!(report.peak_frame, 1);
        assert!(report.layers.is_empty());
    }

    #[test]
    fn test_layer_counters() {
        let config = ProfileConfig::ENABLE_MODEL | ProfileConfig::ENABLE_LAYER;
        let mut profiler = profiler_with(vec![100, 103, 110, 110], config);
        profiler.begin_frame();
        profiler.layer_done(0).unwrap();
        profiler.layer_done(1).unwrap();
        profiler.end_frame().unwrap();

        let report = profiler.log("m");
        assert_eq!(report.layers.len(), 2);
        assert_eq!(report.layers[0].sum_cycles, 3);
        assert_eq!(report.layers[1].sum_cycles, 7);
        assert_eq!(report.layers[1].kind, LayerKind::Relu);
        assert_eq!(report.sum_cycles, 10);
    }

    #[test]
    fn test_backwards_counter_is_an_error() {
        let mut profiler = profiler_with(vec![50, 20], ProfileConfig::ENABLE_MODEL);
        profiler.begin_frame();
        assert!(matches!(profiler.end_frame(), Err(MlError::CycleCount(_))));
    }

    #[test]
    fn test_configure_resets_unless_disabling() {
        let mut profiler = profiler_with(vec![0, 5, 5, 9], ProfileConfig::ENABLE_MODEL);
        profiler.begin_frame();
        profiler.end_frame().unwrap();

        profiler.configure(ProfileConfig::DISABLE);
        assert_eq!(profiler.report("m").frames, 1);

        profiler.configure(ProfileConfig::ENABLE_MODEL);
        assert_eq!(profiler.report("m").frames, 0);
        assert_eq!(profiler.last_cycles(), None);
    }

    #[test]
    fn test_disabled_profiler_reads_nothing() {
        let mut profiler = profiler_with(vec![], ProfileConfig::DISABLE);
        profiler.begin_frame();
        assert_eq!(profiler.end_frame().unwrap(), None);
        assert_eq!(profiler.report("m").frames, 0);
    }
}
