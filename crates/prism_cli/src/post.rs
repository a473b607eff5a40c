//! Display post chain: HDR frame to 8-bit RGBA.

use std::path::Path;

use anyhow::{Context, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use prism_core::DebugBuffer;
use prism_math::{Vec3, Vec4};
use prism_render::{FrameImage, Image, NO_DISTANCE};
use rayon::prelude::*;

/// Luminance contrast above which a pixel is treated as an edge.
const EDGE_THRESHOLD: f32 = 0.1;

const GAMMA: f32 = 2.2;

fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Exposure, Reinhard and display gamma.
pub fn tone_map(hdr: Vec3, exposure: f32) -> Vec3 {
    let c = (hdr * exposure).max(Vec3::ZERO);
    (c / (Vec3::ONE + c)).powf(1.0 / GAMMA)
}

/// Blend high-contrast pixels with their neighborhood.
///
/// Works on tone mapped colors so edges against bright highlights are
/// weighted the way they are displayed.
pub fn edge_aa(colors: &[Vec3], width: u32, height: u32) -> Vec<Vec3> {
    let at = |x: i32, y: i32| {
        let x = x.clamp(0, width as i32 - 1) as u32;
        let y = y.clamp(0, height as i32 - 1) as u32;
        colors[(y * width + x) as usize]
    };
    (0..width * height)
        .into_par_iter()
        .map(|i| {
            let (x, y) = ((i % width) as i32, (i / width) as i32);
            let center = at(x, y);
            let cross = [at(x - 1, y), at(x + 1, y), at(x, y - 1), at(x, y + 1)];
            let l = luminance(center);
            let (min, max) = cross
                .iter()
                .map(|&c| luminance(c))
                .fold((l, l), |(lo, hi), v| (lo.min(v), hi.max(v)));
            if max - min < EDGE_THRESHOLD {
                return center;
            }
            let blend = ((max - min) / max.max(1.0e-4)).min(0.5);
            let neighborhood = cross.iter().copied().sum::<Vec3>() / 4.0;
            center.lerp(neighborhood, blend)
        })
        .collect()
}

/// Map a debug buffer into displayable [0, 1] colors.
pub fn visualize(buffer: DebugBuffer, image: &Image) -> Vec<Vec3> {
    let texels = image.texels();
    match buffer {
        DebugBuffer::HitNormal | DebugBuffer::RayDirection => {
            texels.iter().map(|t| t.truncate() * 0.5 + Vec3::splat(0.5)).collect()
        }
        DebugBuffer::HitDistance
        | DebugBuffer::HitDistanceFiltered
        | DebugBuffer::HitDistanceToCamera
        | DebugBuffer::DistanceToOccluder
        | DebugBuffer::DistanceToOccluderReduced
        | DebugBuffer::DistanceToOccluderSearched
        | DebugBuffer::CurrentRefractiveIndex
        | DebugBuffer::RayOrigin
        | DebugBuffer::HitPosition => normalized(texels, image.format.channels() == 1),
        _ => texels
            .iter()
            .map(|t| if image.format.channels() == 1 { Vec3::splat(t.x) } else { t.truncate() })
            .collect(),
    }
}

/// Scale non-negative values by the largest one; sentinels become black.
fn normalized(texels: &[Vec4], single_channel: bool) -> Vec<Vec3> {
    let value = |t: &Vec4| if single_channel { Vec3::splat(t.x) } else { t.truncate() };
    let max = texels
        .iter()
        .flat_map(|t| value(t).to_array())
        .filter(|v| v.is_finite() && *v != NO_DISTANCE)
        .fold(0.0f32, |m, v| m.max(v.abs()));
    let scale = if max > 0.0 { 1.0 / max } else { 0.0 };
    texels
        .iter()
        .map(|t| {
            let v = value(t);
            if v.x == NO_DISTANCE || !v.is_finite() {
                Vec3::ZERO
            } else {
                (v.abs() * scale).min(Vec3::ONE)
            }
        })
        .collect()
}

/// Run the post chain and produce an 8-bit image.
pub fn to_rgba(frame: &FrameImage, exposure: f32, antialiasing: bool) -> Result<RgbaImage> {
    let (width, height) = (frame.image.width, frame.image.height);
    let colors = if frame.buffer == DebugBuffer::Final {
        let mapped: Vec<Vec3> = frame
            .image
            .texels()
            .par_iter()
            .map(|t| tone_map(t.truncate(), exposure))
            .collect();
        if antialiasing {
            edge_aa(&mapped, width, height)
        } else {
            mapped
        }
    } else {
        visualize(frame.buffer, &frame.image)
    };

    let pixels: Vec<u8> = colors
        .iter()
        .flat_map(|c| {
            let c = (c.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
            [c.x as u8, c.y as u8, c.z as u8, 255]
        })
        .collect();
    ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, pixels).context("failed to build output image")
}

pub fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::PixelFormat;

    #[test]
    fn test_tone_map_is_bounded_and_monotonic() {
        let mut last = -1.0;
        for v in [0.0, 0.1, 1.0, 10.0, 1000.0] {
            let c = tone_map(Vec3::splat(v), 1.0).x;
            assert!(c > last && c < 1.0);
            last = c;
        }
        assert_eq!(tone_map(Vec3::splat(-4.0), 1.0), Vec3::ZERO);
    }

    #[test]
    fn test_edge_aa_leaves_flat_regions_alone() {
        let flat = vec![Vec3::splat(0.5); 9];
        assert_eq!(edge_aa(&flat, 3, 3), flat);

        let mut edge = flat.clone();
        edge[4] = Vec3::ONE;
        let smoothed = edge_aa(&edge, 3, 3);
        assert!(smoothed[4].x < 1.0);
    }

    #[test]
    fn test_distance_visualization_hides_sentinel() {
        let mut image = Image::new(PixelFormat::R32Float, 2, 1);
        image.store(0, 0, Vec4::splat(NO_DISTANCE));
        image.store(1, 0, Vec4::splat(4.0));
        let colors = visualize(DebugBuffer::HitDistance, &image);
        assert_eq!(colors[0], Vec3::ZERO);
        assert_eq!(colors[1], Vec3::ONE);
    }

    #[test]
    fn test_final_frame_converts_to_rgba() {
        let mut image = Image::new(PixelFormat::Rgba32Float, 4, 2);
        image.clear(Vec4::new(1.0, 0.0, 0.0, 1.0));
        let frame = FrameImage {
            buffer: DebugBuffer::Final,
            image,
        };
        let rgba = to_rgba(&frame, 1.0, true).unwrap();
        assert_eq!(rgba.dimensions(), (4, 2));
        let p = rgba.get_pixel(1, 1);
        assert!(p[0] > 150 && p[1] == 0 && p[3] == 255);
    }
}
