//! Display Manager
//!
//! The narrow hand-off between the bucket engine and display drivers:
//! one frame-setup call, one call per completed bucket with the packed
//! pixel block, and a completion call when the last bucket lands. Driver
//! calls are serialised; when the final bucket is written the manager
//! closes the driver and announces the image complete.

use std::path::PathBuf;
use std::sync::Arc;

use glam::Mat4;
use parking_lot::Mutex;

use crate::errors::{RenderError, Result};
use crate::raster::BucketFrame;
use crate::state::{DisplayMode, Quantize};
use crate::texture::{ShadowMap, TextureSystem};

/// Frame-wide information a driver receives at open time.
#[derive(Debug, Clone)]
pub struct DisplaySetup {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub mode: DisplayMode,
    pub color_quantize: Quantize,
    pub depth_quantize: Quantize,
    /// Light matrices, carried through for depth outputs.
    pub world_to_camera: Mat4,
    pub world_to_screen: Mat4,
}

/// A display sink. One call per completed bucket; pixel data arrives
/// channel-interleaved in the setup's mode order (RGB, A, Z).
pub trait DisplayDriver: Send {
    fn open(&mut self, setup: &DisplaySetup) -> Result<()>;

    fn write_bucket(
        &mut self,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        data: &[f32],
    ) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Resolves a driver by display type name.
pub fn create_driver(
    display_type: &str,
    textures: &Arc<TextureSystem>,
) -> Result<Box<dyn DisplayDriver>> {
    match display_type {
        // The framebuffer target renders to the same file sink here; a
        // windowed viewer plugs in through `DisplayManager::with_driver`.
        "file" | "framebuffer" | "tiff" => Ok(Box::new(FileDriver::default())),
        "zfile" => Ok(Box::new(ZFileDriver {
            textures: Arc::clone(textures),
            setup: None,
            depths: Vec::new(),
        })),
        "shadow" | "shadowmap" => Ok(Box::new(ShadowDriver {
            textures: Arc::clone(textures),
            setup: None,
            depths: Vec::new(),
        })),
        "null" => Ok(Box::new(NullDriver)),
        other => Err(RenderError::DisplayDriverFailure(format!(
            "unknown display type \"{other}\""
        ))),
    }
}

struct ManagerInner {
    driver: Box<dyn DisplayDriver>,
    remaining: usize,
    closed: bool,
}

/// Serialises driver access and tracks outstanding buckets.
pub struct DisplayManager {
    setup: DisplaySetup,
    inner: Mutex<ManagerInner>,
}

impl DisplayManager {
    pub fn new(
        mut driver: Box<dyn DisplayDriver>,
        setup: DisplaySetup,
        total_buckets: usize,
    ) -> Result<Self> {
        driver.open(&setup)?;
        Ok(Self {
            setup,
            inner: Mutex::new(ManagerInner {
                driver,
                remaining: total_buckets,
                closed: false,
            }),
        })
    }

    #[must_use]
    pub fn setup(&self) -> &DisplaySetup {
        &self.setup
    }

    /// Hands one completed bucket to the driver. Closes the frame after
    /// the last bucket.
    pub fn write_bucket(&self, frame: &BucketFrame, mode: DisplayMode) -> Result<()> {
        let data = frame.pack(mode);
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner
            .driver
            .write_bucket(frame.x0, frame.y0, frame.width, frame.height, &data)?;
        inner.remaining = inner.remaining.saturating_sub(1);
        if inner.remaining == 0 {
            inner.driver.close()?;
            inner.closed = true;
            log::info!("image complete: {}", self.setup.name);
        }
        Ok(())
    }

    /// Flushes a cancelled frame: closes the driver without waiting for
    /// the missing buckets.
    pub fn finish(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.driver.close()?;
            inner.closed = true;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Built-in drivers
// ----------------------------------------------------------------------

/// Accumulates the frame and writes a PNG on close.
#[derive(Default)]
struct FileDriver {
    setup: Option<DisplaySetup>,
    /// RGBA accumulation, one slot per pixel.
    pixels: Vec<[f32; 4]>,
}

impl DisplayDriver for FileDriver {
    fn open(&mut self, setup: &DisplaySetup) -> Result<()> {
        if !setup.mode.contains(DisplayMode::RGB) {
            return Err(RenderError::DisplayDriverFailure(
                "file display needs rgb output".to_string(),
            ));
        }
        self.pixels = vec![[0.0, 0.0, 0.0, 1.0]; (setup.width * setup.height) as usize];
        self.setup = Some(setup.clone());
        Ok(())
    }

    fn write_bucket(
        &mut self,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        data: &[f32],
    ) -> Result<()> {
        let setup = self
            .setup
            .as_ref()
            .ok_or_else(|| RenderError::DisplayDriverFailure("bucket before open".into()))?;
        let channels = setup.mode.channel_count();
        let has_alpha = setup.mode.contains(DisplayMode::A);
        for row in 0..height {
            for col in 0..width {
                let src = ((row * width + col) as usize) * channels;
                let gx = x0 + col;
                let gy = y0 + row;
                if gx >= setup.width || gy >= setup.height {
                    continue;
                }
                let dst = (gy * setup.width + gx) as usize;
                self.pixels[dst][0] = data[src];
                self.pixels[dst][1] = data[src + 1];
                self.pixels[dst][2] = data[src + 2];
                self.pixels[dst][3] = if has_alpha { data[src + 3] } else { 1.0 };
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(setup) = self.setup.take() else {
            return Ok(());
        };
        let q = setup.color_quantize;
        // Pre-quantised data is already integral; otherwise scale by the
        // quantisation "one" level.
        let convert = |v: f32| -> u8 {
            let scaled = if q.dither == 0.0 { v * q.one as f32 } else { v };
            scaled.clamp(0.0, 255.0) as u8
        };
        let mut out = image::RgbaImage::new(setup.width, setup.height);
        for (i, px) in self.pixels.iter().enumerate() {
            let x = i as u32 % setup.width;
            let y = i as u32 / setup.width;
            out.put_pixel(
                x,
                y,
                image::Rgba([
                    convert(px[0]),
                    convert(px[1]),
                    convert(px[2]),
                    convert(px[3]),
                ]),
            );
        }
        let path = PathBuf::from(&setup.name);
        out.save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| RenderError::DisplayDriverFailure(format!("{}: {e}", setup.name)))?;
        Ok(())
    }
}

/// Collects depths and writes the legacy ZFile on close.
struct ZFileDriver {
    textures: Arc<TextureSystem>,
    setup: Option<DisplaySetup>,
    depths: Vec<f32>,
}

impl DisplayDriver for ZFileDriver {
    fn open(&mut self, setup: &DisplaySetup) -> Result<()> {
        if !setup.mode.contains(DisplayMode::Z) {
            return Err(RenderError::DisplayDriverFailure(
                "zfile display needs z output".to_string(),
            ));
        }
        self.depths = vec![f32::INFINITY; (setup.width * setup.height) as usize];
        self.setup = Some(setup.clone());
        Ok(())
    }

    fn write_bucket(
        &mut self,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        data: &[f32],
    ) -> Result<()> {
        let setup = self
            .setup
            .as_ref()
            .ok_or_else(|| RenderError::DisplayDriverFailure("bucket before open".into()))?;
        let channels = setup.mode.channel_count();
        // Z is always the last channel in the packing order.
        let z_offset = channels - 1;
        for row in 0..height {
            for col in 0..width {
                let gx = x0 + col;
                let gy = y0 + row;
                if gx >= setup.width || gy >= setup.height {
                    continue;
                }
                let src = ((row * width + col) as usize) * channels + z_offset;
                self.depths[(gy * setup.width + gx) as usize] = data[src];
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(setup) = self.setup.take() else {
            return Ok(());
        };
        let map = ShadowMap::from_depths(
            &setup.name,
            &self.textures.cache,
            setup.width,
            setup.height,
            std::mem::take(&mut self.depths),
            setup.world_to_camera,
            setup.world_to_screen,
        );
        map.save_zfile(std::path::Path::new(&setup.name), &self.textures.cache)?;
        self.textures.register_shadow(Arc::new(map));
        Ok(())
    }
}

/// Collects depths and writes the tiled float shadow TIFF on close,
/// registering the map for lookups in the same session.
struct ShadowDriver {
    textures: Arc<TextureSystem>,
    setup: Option<DisplaySetup>,
    depths: Vec<f32>,
}

impl DisplayDriver for ShadowDriver {
    fn open(&mut self, setup: &DisplaySetup) -> Result<()> {
        if !setup.mode.contains(DisplayMode::Z) {
            return Err(RenderError::DisplayDriverFailure(
                "shadow display needs z output".to_string(),
            ));
        }
        self.depths = vec![f32::INFINITY; (setup.width * setup.height) as usize];
        self.setup = Some(setup.clone());
        Ok(())
    }

    fn write_bucket(
        &mut self,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        data: &[f32],
    ) -> Result<()> {
        let setup = self
            .setup
            .as_ref()
            .ok_or_else(|| RenderError::DisplayDriverFailure("bucket before open".into()))?;
        let channels = setup.mode.channel_count();
        let z_offset = channels - 1;
        for row in 0..height {
            for col in 0..width {
                let gx = x0 + col;
                let gy = y0 + row;
                if gx >= setup.width || gy >= setup.height {
                    continue;
                }
                let src = ((row * width + col) as usize) * channels + z_offset;
                self.depths[(gy * setup.width + gx) as usize] = data[src];
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(setup) = self.setup.take() else {
            return Ok(());
        };
        let map = ShadowMap::from_depths(
            &setup.name,
            &self.textures.cache,
            setup.width,
            setup.height,
            std::mem::take(&mut self.depths),
            setup.world_to_camera,
            setup.world_to_screen,
        );
        map.save(std::path::Path::new(&setup.name), &self.textures.cache)?;
        self.textures.register_shadow(Arc::new(map));
        Ok(())
    }
}

/// Discards everything; used by tests and dry runs.
struct NullDriver;

impl DisplayDriver for NullDriver {
    fn open(&mut self, _setup: &DisplaySetup) -> Result<()> {
        Ok(())
    }

    fn write_bucket(
        &mut self,
        _x0: u32,
        _y0: u32,
        _width: u32,
        _height: u32,
        _data: &[f32],
    ) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A test driver capturing everything it receives.
pub struct CaptureDriver {
    pub frame: Arc<Mutex<CapturedFrame>>,
}

/// The full-resolution channels a [`CaptureDriver`] assembles.
#[derive(Default)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub mode: Option<DisplayMode>,
    pub data: Vec<f32>,
    pub complete: bool,
}

impl CaptureDriver {
    #[must_use]
    pub fn new() -> (Self, Arc<Mutex<CapturedFrame>>) {
        let frame = Arc::new(Mutex::new(CapturedFrame::default()));
        (
            Self {
                frame: Arc::clone(&frame),
            },
            frame,
        )
    }
}

impl DisplayDriver for CaptureDriver {
    fn open(&mut self, setup: &DisplaySetup) -> Result<()> {
        let mut frame = self.frame.lock();
        frame.width = setup.width;
        frame.height = setup.height;
        frame.channels = setup.mode.channel_count();
        frame.mode = Some(setup.mode);
        frame.data = vec![0.0; (setup.width * setup.height) as usize * frame.channels];
        Ok(())
    }

    fn write_bucket(
        &mut self,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        data: &[f32],
    ) -> Result<()> {
        let mut frame = self.frame.lock();
        let channels = frame.channels;
        let fw = frame.width;
        let fh = frame.height;
        for row in 0..height {
            for col in 0..width {
                let gx = x0 + col;
                let gy = y0 + row;
                if gx >= fw || gy >= fh {
                    continue;
                }
                let src = ((row * width + col) as usize) * channels;
                let dst = ((gy * fw + gx) as usize) * channels;
                frame.data[dst..dst + channels].copy_from_slice(&data[src..src + channels]);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.frame.lock().complete = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Statistics;

    fn setup(mode: DisplayMode) -> DisplaySetup {
        DisplaySetup {
            name: "test.png".to_string(),
            width: 8,
            height: 8,
            mode,
            color_quantize: Quantize {
                one: 255,
                min: 0,
                max: 255,
                dither: 0.0,
            },
            depth_quantize: Quantize {
                one: 0,
                min: 0,
                max: 0,
                dither: 0.0,
            },
            world_to_camera: Mat4::IDENTITY,
            world_to_screen: Mat4::IDENTITY,
        }
    }

    #[test]
    fn unknown_driver_type_fails() {
        let textures = Arc::new(TextureSystem::new(1024, Arc::new(Statistics::new())));
        assert!(create_driver("holodeck", &textures).is_err());
    }

    #[test]
    fn capture_driver_assembles_buckets() {
        let (mut driver, frame) = CaptureDriver::new();
        driver.open(&setup(DisplayMode::RGB)).unwrap();
        // One 2x2 bucket at (2, 2), all red.
        let data = [[1.0f32, 0.0, 0.0]; 4].concat();
        driver.write_bucket(2, 2, 2, 2, &data).unwrap();
        driver.close().unwrap();
        let frame = frame.lock();
        assert!(frame.complete);
        let idx = ((3 * 8 + 3) * 3) as usize;
        assert_eq!(frame.data[idx], 1.0);
        assert_eq!(frame.data[idx + 1], 0.0);
    }

    #[test]
    fn zfile_driver_requires_depth() {
        let textures = Arc::new(TextureSystem::new(1024, Arc::new(Statistics::new())));
        let mut driver = create_driver("zfile", &textures).unwrap();
        assert!(driver.open(&setup(DisplayMode::RGB)).is_err());
        assert!(driver.open(&setup(DisplayMode::Z)).is_ok());
    }
}
