//! CPU-resident device images and the per-texel kernel helpers stages
//! dispatch on them.

use prism_core::PixelFormat;
use prism_math::{UVec2, Vec4};
use rayon::prelude::*;

/// Distance value of texels with no valid hit or occluder.
pub const NO_DISTANCE: f32 = -1.0;

/// Whether a distance texel holds a real distance.
#[inline]
pub fn is_valid_distance(d: f32) -> bool {
    d >= 0.0
}

/// A 2-D image with texels stored as `Vec4` and quantized on write
/// according to its pixel format.
#[derive(Clone, Debug)]
pub struct Image {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    texels: Vec<Vec4>,
}

impl Image {
    /// Create a zero-filled image.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            texels: vec![Vec4::ZERO; (width * height) as usize],
        }
    }

    pub fn dimensions(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Device memory the image occupies.
    pub fn size_bytes(&self) -> usize {
        self.texels.len() * self.format.bytes_per_texel()
    }

    /// Raw texel memory (always `Vec4` per texel on the CPU).
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Apply the format's storage precision to a value.
    pub fn quantize(format: PixelFormat, v: Vec4) -> Vec4 {
        let v = if format.channels() == 1 {
            Vec4::new(v.x, 0.0, 0.0, 0.0)
        } else {
            v
        };
        if format.is_unorm8() {
            (v.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
        } else {
            v
        }
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    /// Texel at (x, y).
    #[inline]
    pub fn load(&self, x: u32, y: u32) -> Vec4 {
        self.texels[self.index(x, y)]
    }

    /// First channel at (x, y).
    #[inline]
    pub fn load_x(&self, x: u32, y: u32) -> f32 {
        self.load(x, y).x
    }

    /// Texel with coordinates clamped to the image edge.
    #[inline]
    pub fn load_clamped(&self, x: i32, y: i32) -> Vec4 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.load(x, y)
    }

    /// Sample the `fill` region of this image for pixel (x, y) of a
    /// `target`-sized image, scaling and clamping coordinates.
    pub fn sample_fill(&self, x: u32, y: u32, target: UVec2, fill: UVec2) -> Vec4 {
        let fill = fill.min(self.dimensions()).max(UVec2::ONE);
        let sx = ((x as u64 * fill.x as u64) / target.x.max(1) as u64) as u32;
        let sy = ((y as u64 * fill.y as u64) / target.y.max(1) as u64) as u32;
        self.load(sx.min(fill.x - 1), sy.min(fill.y - 1))
    }

    pub fn store(&mut self, x: u32, y: u32, v: Vec4) {
        let i = self.index(x, y);
        self.texels[i] = Self::quantize(self.format, v);
    }

    pub fn clear(&mut self, v: Vec4) {
        let v = Self::quantize(self.format, v);
        self.texels.fill(v);
    }

    pub fn copy_from(&mut self, other: &Image) {
        let format = self.format;
        for (dst, src) in self.texels.iter_mut().zip(&other.texels) {
            *dst = Self::quantize(format, *src);
        }
    }

    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }

    /// Write every texel from `kernel(x, y)`, rows in parallel.
    pub fn fill_par<F>(&mut self, kernel: F)
    where
        F: Fn(u32, u32) -> Vec4 + Sync + Send,
    {
        self.update_par(|x, y, _| kernel(x, y));
    }

    /// Replace every texel with `kernel(x, y, current)`, rows in parallel.
    pub fn update_par<F>(&mut self, kernel: F)
    where
        F: Fn(u32, u32, Vec4) -> Vec4 + Sync + Send,
    {
        let (width, format) = (self.width as usize, self.format);
        if width == 0 {
            return;
        }
        self.texels
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    *texel = Self::quantize(format, kernel(x as u32, y as u32, *texel));
                }
            });
    }
}

/// Update several equally-sized images from one kernel evaluation per texel.
///
/// The kernel receives the current value of every output and returns all
/// new values, so expensive work (ray casts) runs once per texel.
pub fn update_many<const N: usize, F>(images: &mut [Image; N], kernel: F)
where
    F: Fn(u32, u32, [Vec4; N]) -> [Vec4; N] + Sync + Send,
{
    if N == 0 {
        return;
    }
    let width = images[0].width;
    let count = (images[0].width * images[0].height) as usize;
    let current = &*images;
    let results: Vec<[Vec4; N]> = (0..count)
        .into_par_iter()
        .map(|i| {
            let values = std::array::from_fn(|k| current[k].texels[i]);
            kernel(i as u32 % width, i as u32 / width, values)
        })
        .collect();

    for (i, values) in results.into_iter().enumerate() {
        for (image, v) in images.iter_mut().zip(values) {
            image.texels[i] = Image::quantize(image.format, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unorm_quantization() {
        let mut image = Image::new(PixelFormat::R8Unorm, 2, 1);
        image.store(0, 0, Vec4::new(0.5, 0.7, 0.0, 1.0));
        image.store(1, 0, Vec4::splat(3.0));

        assert!((image.load_x(0, 0) - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(image.load(0, 0).y, 0.0);
        assert_eq!(image.load_x(1, 0), 1.0);
    }

    #[test]
    fn test_float_keeps_hdr() {
        let mut image = Image::new(PixelFormat::Rgba32Float, 1, 1);
        image.store(0, 0, Vec4::new(4.0, -1.0, 0.25, 1.0));
        assert_eq!(image.load(0, 0), Vec4::new(4.0, -1.0, 0.25, 1.0));
    }

    #[test]
    fn test_fill_par_coordinates() {
        let mut image = Image::new(PixelFormat::Rgba32Float, 3, 2);
        image.fill_par(|x, y| Vec4::new(x as f32, y as f32, 0.0, 0.0));
        assert_eq!(image.load(2, 1), Vec4::new(2.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn test_sample_fill_scales_into_region() {
        let mut source = Image::new(PixelFormat::R32Float, 4, 4);
        source.fill_par(|x, y| Vec4::splat((y * 4 + x) as f32));

        // Only the top-left 2x2 holds data; an 8x8 target maps onto it.
        let target = UVec2::new(8, 8);
        let fill = UVec2::new(2, 2);
        assert_eq!(source.sample_fill(0, 0, target, fill).x, 0.0);
        assert_eq!(source.sample_fill(7, 0, target, fill).x, 1.0);
        assert_eq!(source.sample_fill(7, 7, target, fill).x, 5.0);
    }

    #[test]
    fn test_update_many_writes_all_outputs() {
        let mut images = [
            Image::new(PixelFormat::R32Float, 2, 2),
            Image::new(PixelFormat::Rgba8Unorm, 2, 2),
        ];
        update_many(&mut images, |x, y, [a, _]| {
            [a + Vec4::splat((x + y) as f32), Vec4::splat(0.5)]
        });

        assert_eq!(images[0].load_x(1, 1), 2.0);
        assert!((images[1].load(0, 1).w - 128.0 / 255.0).abs() < 1e-6);
    }
}
