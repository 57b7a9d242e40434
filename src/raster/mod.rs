//! Image Buffer and Bucket Engine
//!
//! The heart of the renderer. Primitives posted at world end are culled,
//! bound to buckets, and processed in raster bucket order: split until
//! diceable, diced to grids, shaded, projected and broken into
//! micropolygons, which are distributed to every bucket they touch.
//! Completed buckets resolve (sample, combine, filter, expose, quantise)
//! on a worker pool and stream to the display manager.
//!
//! Geometry processing is raster-order sequential because forwarding and
//! occlusion feedback flow strictly forward; resolving is
//! bucket-parallel. All jitter derives from (bucket, pixel) keyed seeds,
//! so the image never depends on worker count.

pub mod bucket;
pub mod occlusion;
pub mod pixel;

pub use bucket::BucketFrame;
pub use occlusion::OcclusionGrid;
pub use pixel::{ImageSample, Pixel, SampleData, SampleFlags};

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use glam::Mat4;
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::csg::CsgTree;
use crate::display::DisplayManager;
use crate::errors::{Diagnostics, RenderError, Result, Severity};
use crate::filters;
use crate::geometry::{DiceContext, Primitive};
use crate::math::{Bound, Color, mat4_from_rows};
use crate::micropoly::{MicroPolygon, ShadeContext};
use crate::shading::{LightKey, LightSource};
use crate::state::{DepthFilter, DisplayMode, Options, Projection, Quantize};
use crate::stats::{Phase, Statistics};
use crate::texture::TextureSystem;

/// Camera-space depth at which the eye-split plane sits.
const EYE_SPLIT_EPSILON: f32 = f32::EPSILON * 4.0;

/// The camera projection chain frozen at world begin.
#[derive(Debug, Clone, Copy)]
pub struct CameraMatrices {
    pub camera_to_screen: Mat4,
    pub camera_to_ndc: Mat4,
    pub camera_to_raster: Mat4,
}

/// Builds screen, NDC and raster matrices from the frozen options.
#[must_use]
pub fn build_camera_matrices(options: &Options) -> CameraMatrices {
    let camera_to_screen = match options.projection {
        Projection::Perspective => {
            let f = 1.0 / (options.field_of_view.to_radians() * 0.5).tan();
            mat4_from_rows([
                [f, 0.0, 0.0, 0.0],
                [0.0, f, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ])
        }
        Projection::Orthographic | Projection::User(_) => Mat4::IDENTITY,
    };
    let [left, right, bottom, top] = options.screen_window;
    let sx = 1.0 / (right - left);
    let sy = 1.0 / (top - bottom);
    let screen_to_ndc = mat4_from_rows([
        [sx, 0.0, 0.0, -left * sx],
        [0.0, -sy, 0.0, top * sy],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);
    let ndc_to_raster = Mat4::from_scale(glam::Vec3::new(
        options.x_resolution as f32,
        options.y_resolution as f32,
        1.0,
    ));
    let camera_to_ndc = screen_to_ndc * camera_to_screen;
    CameraMatrices {
        camera_to_screen,
        camera_to_ndc,
        camera_to_raster: ndc_to_raster * camera_to_ndc,
    }
}

/// Everything the bucket pipeline needs, frozen for the frame and shared
/// immutably with the workers.
pub struct FrameConfig {
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub crop_x_min: u32,
    pub crop_x_max: u32,
    pub crop_y_min: u32,
    pub crop_y_max: u32,
    pub bucket_width: u32,
    pub bucket_height: u32,
    pub x_buckets: u32,
    pub y_buckets: u32,
    pub margin_x: u32,
    pub margin_y: u32,
    pub x_samples: u32,
    pub y_samples: u32,
    pub shutter_open: f32,
    pub shutter_close: f32,
    pub jitter: bool,
    pub filter_x_width: f32,
    pub filter_y_width: f32,
    /// Kernel weights over (pixel offset, sub-cell), see
    /// [`FrameConfig::filter_table_index`].
    pub filter_table: Vec<f32>,
    pub near_clip: f32,
    pub far_clip: f32,
    pub depth_filter: DepthFilter,
    pub z_threshold: Color,
    pub mode: DisplayMode,
    pub color_quantize: Quantize,
    pub depth_quantize: Quantize,
    pub exposure_gain: f32,
    pub exposure_gamma: f32,
    pub imager_background: Option<Color>,
    pub dof_active: bool,
    f_stop: f32,
    focal_length: f32,
    focal_distance: f32,
    pixels_per_screen: f32,
    pub camera_to_raster: Mat4,
    pub camera_to_world: Mat4,
    pub world_to_camera: Mat4,
    pub grid_limit: u32,
    pub max_eye_splits: u32,
    pub csg: CsgTree,
}

impl FrameConfig {
    pub fn new(
        options: &Options,
        matrices: &CameraMatrices,
        camera_to_world: Mat4,
        csg: CsgTree,
    ) -> Result<Self> {
        let (crop_x_min, crop_x_max, crop_y_min, crop_y_max) = options.crop_pixels();
        if crop_x_max <= crop_x_min || crop_y_max <= crop_y_min {
            return Err(RenderError::InvalidData(
                "crop window leaves no pixels".to_string(),
            ));
        }
        let (bucket_width, bucket_height) = options.bucket_size();
        let x_buckets = (crop_x_max - crop_x_min).div_ceil(bucket_width);
        let y_buckets = (crop_y_max - crop_y_min).div_ceil(bucket_height);
        let margin_x = ((options.filter_x_width - 1.0) * 0.5).ceil().max(0.0) as u32;
        let margin_y = ((options.filter_y_width - 1.0) * 0.5).ceil().max(0.0) as u32;

        let filter = filters::by_name(&options.filter_name)?;
        let x_samples = options.pixel_x_samples.max(1);
        let y_samples = options.pixel_y_samples.max(1);
        let filter_table = build_filter_table(
            filter,
            options.filter_x_width,
            options.filter_y_width,
            margin_x,
            margin_y,
            x_samples,
            y_samples,
        );

        let [left, right, ..] = options.screen_window;
        let pixels_per_screen = options.x_resolution as f32 / (right - left).abs().max(1e-6);

        let imager_background = if options.imager_name == "background" {
            Some(
                options
                    .user
                    .get("imager")
                    .and_then(|p| p.color("background"))
                    .unwrap_or(Color::BLACK),
            )
        } else {
            None
        };

        Ok(Self {
            x_resolution: options.x_resolution,
            y_resolution: options.y_resolution,
            crop_x_min,
            crop_x_max,
            crop_y_min,
            crop_y_max,
            bucket_width,
            bucket_height,
            x_buckets,
            y_buckets,
            margin_x,
            margin_y,
            x_samples,
            y_samples,
            shutter_open: options.shutter_open,
            shutter_close: options.shutter_close,
            jitter: options.jitter(),
            filter_x_width: options.filter_x_width,
            filter_y_width: options.filter_y_width,
            filter_table,
            near_clip: options.near_clip,
            far_clip: options.far_clip,
            depth_filter: options.depth_filter(),
            z_threshold: options.z_threshold(),
            mode: options.display_mode,
            color_quantize: options.color_quantize,
            depth_quantize: options.depth_quantize,
            exposure_gain: options.exposure_gain,
            exposure_gamma: options.exposure_gamma,
            imager_background,
            dof_active: options.depth_of_field_active(),
            f_stop: options.f_stop,
            focal_length: options.focal_length,
            focal_distance: options.focal_distance,
            pixels_per_screen,
            camera_to_raster: matrices.camera_to_raster,
            camera_to_world,
            world_to_camera: camera_to_world.inverse(),
            grid_limit: options.grid_size(),
            max_eye_splits: options.max_eye_splits(),
            csg,
        })
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        (self.x_buckets * self.y_buckets) as usize
    }

    #[must_use]
    pub fn bucket_coords(&self, index: usize) -> (u32, u32) {
        (
            index as u32 % self.x_buckets,
            index as u32 / self.x_buckets,
        )
    }

    /// Circle-of-confusion radius in pixels at camera depth `z`.
    #[must_use]
    pub fn coc_radius_pixels(&self, z: f32) -> f32 {
        if !self.dof_active || z.abs() <= f32::EPSILON {
            return 0.0;
        }
        let fl = self.focal_length;
        let fd = self.focal_distance;
        let diameter =
            (fl * fl / self.f_stop) * ((fd - z).abs() / (z * (fd - fl).abs().max(f32::EPSILON)));
        0.5 * diameter * self.pixels_per_screen
    }

    /// Buckets covered by a raster bound (already margin-expanded).
    fn bucket_range(&self, bound: &Bound) -> (u32, u32, u32, u32) {
        let to_bucket = |raster: f32, origin: u32, size: u32, count: u32| -> u32 {
            let rel = raster - origin as f32;
            if rel <= 0.0 {
                0
            } else {
                ((rel / size as f32) as u32).min(count.saturating_sub(1))
            }
        };
        (
            to_bucket(
                bound.min.x - self.margin_x as f32,
                self.crop_x_min,
                self.bucket_width,
                self.x_buckets,
            ),
            to_bucket(
                bound.min.y - self.margin_y as f32,
                self.crop_y_min,
                self.bucket_height,
                self.y_buckets,
            ),
            to_bucket(
                bound.max.x + self.margin_x as f32,
                self.crop_x_min,
                self.bucket_width,
                self.x_buckets,
            ),
            to_bucket(
                bound.max.y + self.margin_y as f32,
                self.crop_y_min,
                self.bucket_height,
                self.y_buckets,
            ),
        )
    }
}

/// Kernel table over the sub-pixel grid: for every neighbour pixel
/// offset and sub-cell, the filter evaluated at that offset from the
/// output pixel centre.
fn build_filter_table(
    filter: filters::FilterFunc,
    xwidth: f32,
    ywidth: f32,
    margin_x: u32,
    margin_y: u32,
    x_samples: u32,
    y_samples: u32,
) -> Vec<f32> {
    let nx = (2 * margin_x + 1) as usize;
    let ny = (2 * margin_y + 1) as usize;
    let subs = (x_samples * y_samples) as usize;
    let mut table = vec![0.0f32; nx * ny * subs];
    for dy in 0..ny {
        for dx in 0..nx {
            for sy in 0..y_samples as usize {
                for sx in 0..x_samples as usize {
                    let sub = sy * x_samples as usize + sx;
                    let offset_x = dx as f32 - margin_x as f32 + (sx as f32 + 0.5)
                        / x_samples as f32
                        - 0.5;
                    let offset_y = dy as f32 - margin_y as f32 + (sy as f32 + 0.5)
                        / y_samples as f32
                        - 0.5;
                    let w = if offset_x.abs() > xwidth * 0.5 || offset_y.abs() > ywidth * 0.5 {
                        0.0
                    } else {
                        filter(offset_x, offset_y, xwidth, ywidth)
                    };
                    table[(dy * nx + dx) * subs + sub] = w;
                }
            }
        }
    }
    table
}

/// A queued primitive, ordered so the nearest (smallest max z) pops
/// first and occluders accumulate early.
struct PrimEntry {
    max_z: f32,
    min_z: f32,
    raster_bound: Bound,
    prim: Box<dyn Primitive>,
}

impl PartialEq for PrimEntry {
    fn eq(&self, other: &Self) -> bool {
        self.max_z == other.max_z
    }
}

impl Eq for PrimEntry {}

impl PartialOrd for PrimEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrimEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap pops the greatest; reverse so nearest comes first.
        other.max_z.total_cmp(&self.max_z)
    }
}

#[derive(Default)]
struct BucketQueue {
    prims: BinaryHeap<PrimEntry>,
    mpgs: Vec<Arc<MicroPolygon>>,
}

/// Shared services the render loop draws on.
pub struct RenderResources<'a> {
    pub textures: &'a TextureSystem,
    pub lights: &'a SlotMap<LightKey, LightSource>,
    pub stats: &'a Statistics,
    pub diagnostics: &'a Diagnostics,
}

/// The frame's bucket grid and work queues.
pub struct ImageBuffer {
    config: Arc<FrameConfig>,
    queues: Vec<BucketQueue>,
    occlusion: Arc<OcclusionGrid>,
    quit: Arc<AtomicBool>,
}

impl ImageBuffer {
    #[must_use]
    pub fn new(config: FrameConfig) -> Self {
        let buckets = config.bucket_count();
        let occlusion = Arc::new(OcclusionGrid::new(
            config.x_buckets as usize,
            config.y_buckets as usize,
        ));
        let mut queues = Vec::with_capacity(buckets);
        queues.resize_with(buckets, BucketQueue::default);
        Self {
            config: Arc::new(config),
            queues,
            occlusion,
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<FrameConfig> {
        &self.config
    }

    /// The cancellation flag, observed at bucket boundaries.
    #[must_use]
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    /// Culls and binds a primitive, or drops it. `min_bucket` keeps
    /// split children from landing behind the bucket being processed.
    pub fn post_primitive(
        &mut self,
        mut prim: Box<dyn Primitive>,
        min_bucket: usize,
        res: &RenderResources<'_>,
    ) -> Result<()> {
        Statistics::inc(&res.stats.surfaces_posted);
        let config = Arc::clone(&self.config);
        let bound = prim.bound();

        // Hither/yon cull.
        if bound.max.z < config.near_clip || bound.min.z > config.far_clip {
            Statistics::inc(&res.stats.surfaces_culled);
            return Ok(());
        }

        // Epsilon-spanning: force splitting and count eye splits.
        if bound.min.z <= EYE_SPLIT_EPSILON && bound.max.z >= EYE_SPLIT_EPSILON {
            let count = crate::geometry::mark_eye_split(prim.as_mut());
            if count > config.max_eye_splits {
                let scope = prim.base().attributes.id;
                res.diagnostics
                    .report_once(Severity::Error, scope, &RenderError::MaxEyeSplits)?;
                Statistics::inc(&res.stats.surfaces_culled);
                return Ok(());
            }
        }

        // Raster cull against the margin-expanded frame.
        let raster_bound = bound.transform(&config.camera_to_raster);
        let fx = config.filter_x_width * 0.5;
        let fy = config.filter_y_width * 0.5;
        if raster_bound.min.x > config.crop_x_max as f32 + fx
            || raster_bound.min.y > config.crop_y_max as f32 + fy
            || raster_bound.max.x < config.crop_x_min as f32 - fx
            || raster_bound.max.y < config.crop_y_min as f32 - fy
        {
            Statistics::inc(&res.stats.surfaces_culled);
            return Ok(());
        }

        // Bind to the bucket holding the expanded top-left corner.
        let (bx, by, _, _) = config.bucket_range(&raster_bound);
        let index = ((by * config.x_buckets) + bx) as usize;
        let index = index.max(min_bucket);
        self.queues[index].prims.push(PrimEntry {
            max_z: bound.max.z,
            min_z: bound.min.z,
            raster_bound,
            prim,
        });
        Ok(())
    }

    /// Dices, shades and scatters one primitive's micropolygons.
    fn dice_and_distribute(
        &mut self,
        entry: PrimEntry,
        bucket_index: usize,
        res: &RenderResources<'_>,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);
        let dice_ctx = DiceContext {
            camera_to_raster: config.camera_to_raster,
            grid_limit: config.grid_limit,
        };
        let dice_start = Instant::now();
        let mut grid = entry.prim.dice(&dice_ctx)?;
        res.stats.add_phase_time(Phase::Dicing, dice_start.elapsed());
        Statistics::inc(&res.stats.grids_diced);

        if config.mode.contains(DisplayMode::RGB) {
            let (bx, by) = config.bucket_coords(bucket_index);
            let shade_ctx = ShadeContext {
                textures: res.textures,
                lights: res.lights,
                camera_to_world: config.camera_to_world,
                world_to_camera: config.world_to_camera,
                seed: pixel::sample_seed(bx, by, 0x5ade, 0x5ade),
            };
            let shade_start = Instant::now();
            grid.shade(&shade_ctx)?;
            res.stats.add_phase_time(Phase::Shading, shade_start.elapsed());
        }

        grid.project(&config.camera_to_raster);
        let mut mpgs = Vec::new();
        grid.split(config.z_threshold, &mut mpgs);
        Statistics::add(&res.stats.micropolygons, mpgs.len() as u64);

        for mpg in mpgs {
            let mpg = Arc::new(mpg);
            let (bx0, by0, bx1, by1) = config.bucket_range(&mpg.bound);
            for by in by0..=by1 {
                for bx in bx0..=bx1 {
                    let target = ((by * config.x_buckets) + bx) as usize;
                    if target >= bucket_index {
                        self.queues[target].mpgs.push(Arc::clone(&mpg));
                    }
                }
            }
        }
        Ok(())
    }

    /// Drains one bucket's primitive queue: occlusion-cull, dice or
    /// split until only micropolygons remain.
    fn process_bucket_geometry(
        &mut self,
        bucket_index: usize,
        res: &RenderResources<'_>,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);
        let dice_ctx = DiceContext {
            camera_to_raster: config.camera_to_raster,
            grid_limit: config.grid_limit,
        };
        while let Some(entry) = self.queues[bucket_index].prims.pop() {
            if entry.prim.base().discard {
                continue;
            }
            // Occlusion cull: hidden behind proven occluders everywhere.
            let (bx0, by0, bx1, by1) = config.bucket_range(&entry.raster_bound);
            if self.occlusion.occluded(
                bx0 as usize,
                by0 as usize,
                bx1 as usize,
                by1 as usize,
                entry.min_z,
            ) {
                Statistics::inc(&res.stats.surfaces_occlusion_culled);
                Statistics::inc(&res.stats.surfaces_culled);
                continue;
            }

            let bound = entry.prim.bound();
            let spans_eye = bound.min.z <= EYE_SPLIT_EPSILON && bound.max.z >= EYE_SPLIT_EPSILON;
            let diceable = !spans_eye && entry.prim.diceable(&dice_ctx);
            if diceable {
                if let Err(err) = self.dice_and_distribute(entry, bucket_index, res) {
                    // A bad primitive drops; rendering continues.
                    res.diagnostics.report(Severity::Error, &err)?;
                }
            } else {
                let split_start = Instant::now();
                let children = match entry.prim.split(&dice_ctx) {
                    Ok(children) => children,
                    Err(err) => {
                        res.diagnostics.report(Severity::Error, &err)?;
                        continue;
                    }
                };
                res.stats.add_phase_time(Phase::Splitting, split_start.elapsed());
                Statistics::inc(&res.stats.surfaces_split);
                for mut child in children {
                    if spans_eye {
                        child.base_mut().eye_splits = entry.prim.base().eye_splits;
                    }
                    self.post_primitive(child, bucket_index, res)?;
                }
            }
        }
        Ok(())
    }

    /// Renders every bucket. Geometry runs on the calling thread in
    /// raster order; resolve jobs fan out over `worker_count` workers.
    pub fn render(
        &mut self,
        res: &RenderResources<'_>,
        display: &DisplayManager,
        worker_count: usize,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);
        let total = config.bucket_count();
        let workers = worker_count.max(1);
        let errors: Mutex<Vec<RenderError>> = Mutex::new(Vec::new());

        struct ResolveJob {
            frame: BucketFrame,
            mpgs: Vec<Arc<MicroPolygon>>,
        }

        let occlusion = Arc::clone(&self.occlusion);
        std::thread::scope(|scope| -> Result<()> {
            let (sender, receiver) = flume::bounded::<ResolveJob>(workers * 2);
            let errors_ref = &errors;
            let config_ref = &config;
            let stats = res.stats;
            for _ in 0..workers {
                let receiver = receiver.clone();
                let occlusion = Arc::clone(&occlusion);
                scope.spawn(move || {
                    while let Ok(mut job) = receiver.recv() {
                        let start = Instant::now();
                        job.frame.resolve(config_ref, &job.mpgs, stats);
                        stats.add_phase_time(Phase::Sampling, start.elapsed());
                        occlusion.update(
                            job.frame.bucket_x as usize,
                            job.frame.bucket_y as usize,
                            job.frame.max_occluder_depth(),
                        );
                        if let Err(err) = display.write_bucket(&job.frame, config_ref.mode) {
                            errors_ref.lock().push(err);
                        }
                    }
                });
            }
            drop(receiver);

            for bucket_index in 0..total {
                // Cancellation: in-flight buckets finish and flush.
                if self.quit.load(Ordering::Relaxed) {
                    break;
                }
                self.process_bucket_geometry(bucket_index, res)?;
                let (bx, by) = config.bucket_coords(bucket_index);
                let frame = BucketFrame::new(&config, bx, by);
                let mpgs = std::mem::take(&mut self.queues[bucket_index].mpgs);
                if sender.send(ResolveJob { frame, mpgs }).is_err() {
                    break;
                }
            }
            drop(sender);
            Ok(())
        })?;

        let mut collected = errors.into_inner();
        if let Some(err) = collected.drain(..).next() {
            res.diagnostics.report(
                Severity::Error,
                &RenderError::DisplayDriverFailure(err.to_string()),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_160x120() -> Options {
        let mut options = Options::default();
        options.x_resolution = 160;
        options.y_resolution = 120;
        options.projection = Projection::Orthographic;
        options.screen_window = [0.0, 1.0, 1.0, 0.0];
        options
    }

    #[test]
    fn camera_matrices_map_screen_to_raster() {
        let options = options_160x120();
        let m = build_camera_matrices(&options);
        // Screen window (0,1,1,0): screen origin maps to raster (0, 0);
        // screen (1, 1) maps to (160, 0) with the y flip conventions of
        // this window.
        let p = crate::math::transform_point(&m.camera_to_raster, glam::Vec3::new(0.0, 0.0, 1.0));
        assert!((p.x - 0.0).abs() < 1e-3);
        let q = crate::math::transform_point(&m.camera_to_raster, glam::Vec3::new(1.0, 0.0, 1.0));
        assert!((q.x - 160.0).abs() < 1e-3);
    }

    #[test]
    fn perspective_divides_by_depth() {
        let mut options = options_160x120();
        options.projection = Projection::Perspective;
        options.field_of_view = 90.0;
        options.screen_window = [-1.0, 1.0, -1.0, 1.0];
        let m = build_camera_matrices(&options);
        let near = crate::math::transform_point(&m.camera_to_raster, glam::Vec3::new(0.5, 0.0, 1.0));
        let far = crate::math::transform_point(&m.camera_to_raster, glam::Vec3::new(0.5, 0.0, 2.0));
        assert!(far.x < near.x, "projected x shrinks with depth");
    }

    #[test]
    fn frame_config_bucket_grid() {
        let options = options_160x120();
        let matrices = build_camera_matrices(&options);
        let config =
            FrameConfig::new(&options, &matrices, Mat4::IDENTITY, CsgTree::new()).unwrap();
        assert_eq!(config.bucket_count(), 10 * 8);
        assert_eq!(config.bucket_coords(11), (1, 1));
    }

    #[test]
    fn filter_table_centre_weight_largest() {
        let table = build_filter_table(filters::gaussian_filter, 2.0, 2.0, 1, 1, 2, 2);
        // 3x3 pixel offsets, 4 sub-cells each.
        assert_eq!(table.len(), 9 * 4);
        let centre_avg: f32 = table[4 * 4..5 * 4].iter().sum();
        let corner_avg: f32 = table[0..4].iter().sum();
        assert!(centre_avg > corner_avg);
    }

    #[test]
    fn crop_window_shrinks_grid() {
        let mut options = options_160x120();
        options.crop_window = [0.5, 1.0, 0.0, 0.5];
        let matrices = build_camera_matrices(&options);
        let config =
            FrameConfig::new(&options, &matrices, Mat4::IDENTITY, CsgTree::new()).unwrap();
        assert_eq!(config.crop_x_min, 80);
        assert_eq!(config.crop_y_max, 60);
        assert_eq!(config.bucket_count(), 5 * 4);
    }
}
