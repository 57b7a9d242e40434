//! Texture Subsystem
//!
//! Texture, environment and shadow maps share a reference-counted segment
//! cache: each segment is one mip level (or cube face level) of floating
//! point texels, loaded lazily and evicted least-recently-used when the
//! soft memory limit is exceeded. A segment held by a sampling thread is
//! pinned by its `Arc` and survives eviction until released.

pub mod environment;
pub mod file;
pub mod shadowmap;
pub mod texturemap;

pub use environment::EnvironmentMap;
pub use shadowmap::{ShadowMap, ShadowSample, ShadowSampleParams};
pub use texturemap::TextureMap;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::stats::Statistics;

/// Per-axis boundary behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Black,
    Periodic,
    Clamp,
}

impl WrapMode {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "black" => Some(Self::Black),
            "periodic" => Some(Self::Periodic),
            "clamp" => Some(Self::Clamp),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::Periodic => "periodic",
            Self::Clamp => "clamp",
        }
    }

    /// Applies the wrap to a texel coordinate. Returns `None` when the
    /// sample falls off a black-wrapped edge.
    #[must_use]
    pub fn apply(self, i: i64, size: u32) -> Option<u32> {
        let size_i = i64::from(size);
        match self {
            Self::Black => {
                if (0..size_i).contains(&i) {
                    Some(i as u32)
                } else {
                    None
                }
            }
            Self::Periodic => Some(i.rem_euclid(size_i) as u32),
            Self::Clamp => Some(i.clamp(0, size_i - 1) as u32),
        }
    }
}

/// One cached mip level: a dense float texel array.
#[derive(Debug)]
pub struct Segment {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub texels: Vec<f32>,
}

impl Segment {
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        (self.texels.len() * size_of::<f32>()) as u64
    }

    /// Texel fetch without wrapping; callers resolve coordinates first.
    #[must_use]
    pub fn texel(&self, x: u32, y: u32) -> &[f32] {
        let c = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * c;
        &self.texels[idx..idx + c]
    }
}

/// Key of a cached segment: owning map, cube face, mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub map_id: u64,
    pub face: u32,
    pub level: u32,
}

struct SegmentSlot {
    data: Arc<Segment>,
    last_used: u64,
}

/// The shared cache. One instance lives on the renderer and is handed to
/// every sampling site.
pub struct TextureCache {
    limit_bytes: AtomicU64,
    used_bytes: AtomicU64,
    tick: AtomicU64,
    next_map_id: AtomicU64,
    segments: Mutex<FxHashMap<SegmentKey, SegmentSlot>>,
    stats: Arc<Statistics>,
}

impl TextureCache {
    #[must_use]
    pub fn new(limit_kb: u64, stats: Arc<Statistics>) -> Self {
        Self {
            limit_bytes: AtomicU64::new(limit_kb * 1024),
            used_bytes: AtomicU64::new(0),
            tick: AtomicU64::new(0),
            next_map_id: AtomicU64::new(1),
            segments: Mutex::new(FxHashMap::default()),
            stats,
        }
    }

    pub fn set_limit_kb(&self, limit_kb: u64) {
        self.limit_bytes.store(limit_kb * 1024, Ordering::Relaxed);
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Allocates an id for a newly opened map.
    pub(crate) fn allocate_map_id(&self) -> u64 {
        self.next_map_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fetches a segment, loading it through `load` on a miss. The
    /// returned `Arc` pins the data for the duration of the sample even
    /// if the segment is evicted concurrently.
    pub fn segment(
        &self,
        key: SegmentKey,
        load: impl FnOnce() -> Result<Segment>,
    ) -> Result<Arc<Segment>> {
        let now = self.tick.fetch_add(1, Ordering::Relaxed);
        {
            let mut segments = self.segments.lock();
            if let Some(slot) = segments.get_mut(&key) {
                slot.last_used = now;
                Statistics::inc(&self.stats.texture_hits);
                return Ok(Arc::clone(&slot.data));
            }
        }
        Statistics::inc(&self.stats.texture_misses);
        let data = Arc::new(load()?);
        self.used_bytes.fetch_add(data.byte_size(), Ordering::Relaxed);
        self.segments.lock().insert(
            key,
            SegmentSlot {
                data: Arc::clone(&data),
                last_used: now,
            },
        );
        self.critical_measure();
        Ok(data)
    }

    /// Evicts least-recently-used segments while the soft limit is
    /// exceeded.
    pub fn critical_measure(&self) {
        let limit = self.limit_bytes.load(Ordering::Relaxed);
        if self.used_bytes.load(Ordering::Relaxed) <= limit {
            return;
        }
        let mut segments = self.segments.lock();
        while self.used_bytes.load(Ordering::Relaxed) > limit && !segments.is_empty() {
            let oldest = segments
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| *k);
            let Some(key) = oldest else { break };
            if let Some(slot) = segments.remove(&key) {
                self.used_bytes
                    .fetch_sub(slot.data.byte_size(), Ordering::Relaxed);
                Statistics::inc(&self.stats.texture_evictions);
            }
        }
    }

    /// Drops every segment belonging to a map.
    pub fn purge_map(&self, map_id: u64) {
        let mut segments = self.segments.lock();
        let keys: Vec<SegmentKey> = segments
            .keys()
            .filter(|k| k.map_id == map_id)
            .copied()
            .collect();
        for key in keys {
            if let Some(slot) = segments.remove(&key) {
                self.used_bytes
                    .fetch_sub(slot.data.byte_size(), Ordering::Relaxed);
            }
        }
    }
}

/// The renderer-facing texture subsystem: the shared cache plus the
/// registry of opened maps, keyed by name. Shadow maps rendered in
/// memory register here so later lookups find them without a file round
/// trip.
pub struct TextureSystem {
    pub cache: TextureCache,
    search_paths: Mutex<Vec<String>>,
    textures: Mutex<FxHashMap<String, Arc<TextureMap>>>,
    environments: Mutex<FxHashMap<String, Arc<EnvironmentMap>>>,
    shadows: Mutex<FxHashMap<String, Arc<ShadowMap>>>,
}

impl TextureSystem {
    #[must_use]
    pub fn new(limit_kb: u64, stats: Arc<Statistics>) -> Self {
        Self {
            cache: TextureCache::new(limit_kb, stats),
            search_paths: Mutex::new(vec![".".to_string()]),
            textures: Mutex::new(FxHashMap::default()),
            environments: Mutex::new(FxHashMap::default()),
            shadows: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn set_search_paths(&self, paths: Vec<String>) {
        *self.search_paths.lock() = paths;
    }

    /// Opens (or returns the already-open) plain texture map.
    pub fn texture(&self, name: &str) -> Result<Arc<TextureMap>> {
        if let Some(map) = self.textures.lock().get(name) {
            return Ok(Arc::clone(map));
        }
        let paths = self.search_paths.lock().clone();
        let map = TextureMap::open(name, &paths, &self.cache)?;
        if map.missing_wrapmodes {
            log::warn!("texture missing wrap modes: \"{name}\", defaulting to black/box");
        }
        self.textures
            .lock()
            .insert(name.to_string(), Arc::clone(&map));
        Ok(map)
    }

    pub fn environment(&self, name: &str) -> Result<Arc<EnvironmentMap>> {
        if let Some(map) = self.environments.lock().get(name) {
            return Ok(Arc::clone(map));
        }
        let paths = self.search_paths.lock().clone();
        let map = EnvironmentMap::open(name, &paths, &self.cache)?;
        self.environments
            .lock()
            .insert(name.to_string(), Arc::clone(&map));
        Ok(map)
    }

    pub fn shadow(&self, name: &str) -> Result<Arc<ShadowMap>> {
        if let Some(map) = self.shadows.lock().get(name) {
            return Ok(Arc::clone(map));
        }
        let paths = self.search_paths.lock().clone();
        let map = ShadowMap::open(name, &paths, &self.cache)?;
        self.shadows
            .lock()
            .insert(name.to_string(), Arc::clone(&map));
        Ok(map)
    }

    /// Registers an in-memory shadow map under its output name.
    pub fn register_shadow(&self, map: Arc<ShadowMap>) {
        self.shadows.lock().insert(map.name().to_string(), map);
    }
}

/// Searches the texture paths for an existing file.
pub fn locate(name: &str, search_paths: &[String]) -> Option<std::path::PathBuf> {
    let direct = std::path::Path::new(name);
    if direct.exists() {
        return Some(direct.to_path_buf());
    }
    if direct.is_absolute() {
        return None;
    }
    search_paths
        .iter()
        .map(|dir| std::path::Path::new(dir).join(name))
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(w: u32, h: u32) -> Segment {
        Segment {
            width: w,
            height: h,
            channels: 1,
            texels: vec![0.5; (w * h) as usize],
        }
    }

    fn key(map: u64, level: u32) -> SegmentKey {
        SegmentKey {
            map_id: map,
            face: 0,
            level,
        }
    }

    #[test]
    fn hit_after_load() {
        let cache = TextureCache::new(1024, Arc::new(Statistics::new()));
        cache.segment(key(1, 0), || Ok(segment(8, 8))).unwrap();
        cache.segment(key(1, 0), || panic!("should hit")).unwrap();
    }

    #[test]
    fn eviction_keeps_usage_under_limit() {
        // 1 KB limit; each 16x16 single-channel segment is 1 KiB.
        let cache = TextureCache::new(1, Arc::new(Statistics::new()));
        for level in 0..4 {
            cache.segment(key(1, level), || Ok(segment(16, 16))).unwrap();
        }
        assert!(cache.used_bytes() <= 1024);
    }

    #[test]
    fn pinned_segment_survives_eviction() {
        let cache = TextureCache::new(1, Arc::new(Statistics::new()));
        let pinned = cache.segment(key(1, 0), || Ok(segment(16, 16))).unwrap();
        for level in 1..4 {
            cache.segment(key(1, level), || Ok(segment(16, 16))).unwrap();
        }
        // The cache may have dropped its reference; ours still reads.
        assert!((pinned.texel(3, 3)[0] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn wrap_modes() {
        assert_eq!(WrapMode::Black.apply(-1, 4), None);
        assert_eq!(WrapMode::Periodic.apply(-1, 4), Some(3));
        assert_eq!(WrapMode::Clamp.apply(9, 4), Some(3));
    }
}
