//! Per-frame context handed to every stage.

use prism_core::{PixelFormat, RenderResult, RenderSettings};

use crate::image::Image;
use crate::profiler::{ProfileEvent, ProfileScope, Profiler};
use crate::render_targets::{RenderTarget, RenderTargetManager};

/// Counters collected while a frame is submitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Kernel dispatches issued
    pub dispatches: u32,
    /// Writes into the accumulation buffer
    pub composite_writes: u32,
    /// Bounce-tree nodes produced, in visit order
    pub visited_paths: Vec<Vec<bool>>,
    /// Render targets leased when the frame finished submitting
    pub leased_targets: usize,
}

/// Mutable frame state shared by the stages of one frame.
///
/// Everything here is touched only by the rendering thread; kernels inside
/// a dispatch read images through a shared borrow of the manager.
pub struct FrameContext<'a> {
    pub settings: &'a RenderSettings,
    pub targets: &'a mut RenderTargetManager,
    pub profiler: &'a dyn Profiler,
    pub stats: &'a mut FrameStats,
}

impl<'a> FrameContext<'a> {
    pub fn new(
        settings: &'a RenderSettings,
        targets: &'a mut RenderTargetManager,
        profiler: &'a dyn Profiler,
        stats: &'a mut FrameStats,
    ) -> Self {
        Self {
            settings,
            targets,
            profiler,
            stats,
        }
    }

    /// Lease an image at the frame resolution.
    pub fn lease(&mut self, format: PixelFormat) -> RenderResult<RenderTarget> {
        self.targets
            .lease(format, self.settings.width, self.settings.height)
    }

    /// Open a profiler scope. The scope borrows the profiler, not the context.
    pub fn scope(&self, event: ProfileEvent) -> ProfileScope<'a> {
        ProfileScope::new(self.profiler, event)
    }

    /// Run a kernel that writes `output` while reading other leased images.
    pub fn dispatch<F>(&mut self, output: RenderTarget, kernel: F) -> RenderResult<()>
    where
        F: FnOnce(&RenderTargetManager, &mut Image) -> RenderResult<()>,
    {
        self.dispatch_many([output], |targets, [image]| kernel(targets, image))
    }

    /// Run a kernel that writes several outputs at once.
    pub fn dispatch_many<const N: usize, F>(&mut self, outputs: [RenderTarget; N], kernel: F) -> RenderResult<()>
    where
        F: FnOnce(&RenderTargetManager, &mut [Image; N]) -> RenderResult<()>,
    {
        // Unfilled entries are empty placeholders and never restored.
        let mut images: [Image; N] = std::array::from_fn(|_| Image::new(PixelFormat::R8Unorm, 0, 0));
        for (i, target) in outputs.iter().enumerate() {
            match self.targets.take(*target) {
                Ok(image) => images[i] = image,
                Err(err) => {
                    for (target, image) in outputs.iter().zip(images).take(i) {
                        self.targets.restore(*target, image)?;
                    }
                    return Err(err);
                }
            }
        }

        let result = kernel(self.targets, &mut images);
        for (target, image) in outputs.iter().zip(images) {
            self.targets.restore(*target, image)?;
        }
        self.stats.dispatches += 1;
        result
    }

    /// Copy one leased image into another of the same shape.
    pub fn copy(&mut self, source: RenderTarget, destination: RenderTarget) -> RenderResult<()> {
        self.dispatch(destination, |targets, out| {
            out.copy_from(targets.image(source)?);
            Ok(())
        })
    }

    /// Fill an image with a constant.
    pub fn clear(&mut self, target: RenderTarget, value: prism_math::Vec4) -> RenderResult<()> {
        self.dispatch(target, |_, out| {
            out.clear(value);
            Ok(())
        })
    }
}
