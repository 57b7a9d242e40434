//! Frame Statistics
//!
//! Atomic counters incremented from any pipeline thread and read as a
//! consistent snapshot at frame end. Printing goes through `log` so the
//! host application controls the destination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Verbosity of the end-of-frame report, from the
/// `"statistics" "endofframe"` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StatsVerbosity {
    #[default]
    None,
    Summary,
    Full,
}

impl StatsVerbosity {
    #[must_use]
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Self::None,
            1 => Self::Summary,
            _ => Self::Full,
        }
    }
}

/// Pipeline phases timed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Splitting,
    Dicing,
    Shading,
    Sampling,
    Filtering,
    TextureIo,
}

const PHASES: usize = 6;

/// All frame counters. One instance lives on the renderer and is shared
/// with the worker pool; additions are relaxed atomics, reads happen only
/// when the frame is complete.
#[derive(Default)]
pub struct Statistics {
    pub surfaces_posted: AtomicU64,
    pub surfaces_culled: AtomicU64,
    pub surfaces_occlusion_culled: AtomicU64,
    pub surfaces_split: AtomicU64,
    pub grids_diced: AtomicU64,
    pub micropolygons: AtomicU64,
    pub samples_tested: AtomicU64,
    pub sample_bound_hits: AtomicU64,
    pub sample_hits: AtomicU64,
    pub texture_hits: AtomicU64,
    pub texture_misses: AtomicU64,
    pub texture_evictions: AtomicU64,
    phase_nanos: [AtomicU64; PHASES],
    timers: Mutex<()>,
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulates wall time against a pipeline phase.
    pub fn add_phase_time(&self, phase: Phase, elapsed: Duration) {
        let idx = phase as usize;
        self.phase_nanos[idx].fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn phase_time(&self, phase: Phase) -> Duration {
        Duration::from_nanos(self.phase_nanos[phase as usize].load(Ordering::Relaxed))
    }

    /// Logs the end-of-frame report at the requested verbosity.
    pub fn report(&self, verbosity: StatsVerbosity) {
        // Snapshot must not interleave with a concurrent report.
        let _guard = self.timers.lock();
        if verbosity == StatsVerbosity::None {
            return;
        }
        let posted = self.surfaces_posted.load(Ordering::Relaxed);
        let culled = self.surfaces_culled.load(Ordering::Relaxed);
        let occl = self.surfaces_occlusion_culled.load(Ordering::Relaxed);
        let split = self.surfaces_split.load(Ordering::Relaxed);
        let grids = self.grids_diced.load(Ordering::Relaxed);
        let mpgs = self.micropolygons.load(Ordering::Relaxed);
        log::info!(
            "surfaces: {posted} posted, {culled} culled ({occl} by occlusion), {split} split"
        );
        log::info!("grids: {grids} diced, {mpgs} micropolygons");
        if verbosity < StatsVerbosity::Full {
            return;
        }
        let tested = self.samples_tested.load(Ordering::Relaxed);
        let bound_hits = self.sample_bound_hits.load(Ordering::Relaxed);
        let hits = self.sample_hits.load(Ordering::Relaxed);
        log::info!("samples: {tested} tested, {bound_hits} bound hits, {hits} hits");
        let t_hits = self.texture_hits.load(Ordering::Relaxed);
        let t_miss = self.texture_misses.load(Ordering::Relaxed);
        let t_evict = self.texture_evictions.load(Ordering::Relaxed);
        log::info!("texture cache: {t_hits} hits, {t_miss} misses, {t_evict} evictions");
        for (phase, label) in [
            (Phase::Splitting, "splitting"),
            (Phase::Dicing, "dicing"),
            (Phase::Shading, "shading"),
            (Phase::Sampling, "sampling"),
            (Phase::Filtering, "filtering"),
            (Phase::TextureIo, "texture i/o"),
        ] {
            log::info!("time in {label}: {:.3}s", self.phase_time(phase).as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Statistics::new();
        Statistics::add(&stats.samples_tested, 10);
        Statistics::inc(&stats.samples_tested);
        assert_eq!(stats.samples_tested.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn phase_times_accumulate() {
        let stats = Statistics::new();
        stats.add_phase_time(Phase::Shading, Duration::from_millis(5));
        stats.add_phase_time(Phase::Shading, Duration::from_millis(7));
        assert_eq!(stats.phase_time(Phase::Shading), Duration::from_millis(12));
    }

    #[test]
    fn verbosity_from_level() {
        assert_eq!(StatsVerbosity::from_level(0), StatsVerbosity::None);
        assert_eq!(StatsVerbosity::from_level(1), StatsVerbosity::Summary);
        assert_eq!(StatsVerbosity::from_level(3), StatsVerbosity::Full);
    }
}
