//! Min reductions that reject sentinel texels.
//!
//! Distance buffers mark "nothing here" with [`NO_DISTANCE`]. Reductions skip
//! those texels instead of folding them in, so empty background never drags
//! an estimate towards zero.

use prism_math::{IVec2, UVec2};

use crate::image::{is_valid_distance, Image, NO_DISTANCE};

/// Size of the next coarser pyramid level.
pub fn reduced_dimensions(dimensions: UVec2) -> UVec2 {
    ((dimensions + UVec2::ONE) / 2).max(UVec2::ONE)
}

/// Fold a distance into a running minimum, ignoring sentinels.
#[inline]
pub fn min_valid(acc: f32, d: f32) -> f32 {
    match (is_valid_distance(acc), is_valid_distance(d)) {
        (true, true) => acc.min(d),
        (false, true) => d,
        _ => acc,
    }
}

/// Write the 2x2 valid minimum of `source` into the half-sized `out`.
pub fn reduce_min_with_rejection(source: &Image, out: &mut Image) {
    let (width, height) = (source.width, source.height);
    out.fill_par(|x, y| {
        let mut d = NO_DISTANCE;
        for sy in (y * 2)..(y * 2 + 2).min(height) {
            for sx in (x * 2)..(x * 2 + 2).min(width) {
                d = min_valid(d, source.load_x(sx, sy));
            }
        }
        prism_math::Vec4::splat(d)
    });
}

/// Valid minimum over the square window of `radius` texels around `center`,
/// clamped to the image.
pub fn min_valid_window(image: &Image, center: IVec2, radius: i32) -> f32 {
    let min = (center - IVec2::splat(radius)).max(IVec2::ZERO);
    let max = (center + IVec2::splat(radius)).min(IVec2::new(image.width as i32 - 1, image.height as i32 - 1));
    let mut d = NO_DISTANCE;
    for y in min.y..=max.y {
        for x in min.x..=max.x {
            d = min_valid(d, image.load_x(x as u32, y as u32));
        }
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::PixelFormat;
    use prism_math::Vec4;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn distances(width: u32, height: u32, values: &[f32]) -> Image {
        let mut image = Image::new(PixelFormat::R32Float, width, height);
        for (i, &v) in values.iter().enumerate() {
            image.store(i as u32 % width, i as u32 / width, Vec4::splat(v));
        }
        image
    }

    #[test]
    fn test_all_sentinel_stays_sentinel() {
        let source = distances(4, 4, &[NO_DISTANCE; 16]);
        let mut out = Image::new(PixelFormat::R32Float, 2, 2);
        reduce_min_with_rejection(&source, &mut out);
        assert!(out.texels().iter().all(|t| t.x == NO_DISTANCE));
    }

    #[test]
    fn test_mixed_keeps_min_of_valid() {
        #[rustfmt::skip]
        let source = distances(4, 2, &[
            NO_DISTANCE, 3.0, NO_DISTANCE, NO_DISTANCE,
            2.5, NO_DISTANCE, NO_DISTANCE, 0.0,
        ]);
        let mut out = Image::new(PixelFormat::R32Float, 2, 1);
        reduce_min_with_rejection(&source, &mut out);
        assert_eq!(out.load_x(0, 0), 2.5);
        // Zero is a valid distance, not a sentinel.
        assert_eq!(out.load_x(1, 0), 0.0);
    }

    #[test]
    fn test_reduction_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<f32> = (0..5 * 3)
            .map(|_| if rng.gen_bool(0.4) { NO_DISTANCE } else { rng.gen_range(0.0..10.0) })
            .collect();
        let source = distances(5, 3, &values);
        let dims = reduced_dimensions(source.dimensions());
        assert_eq!(dims, UVec2::new(3, 2));

        let mut out = Image::new(PixelFormat::R32Float, dims.x, dims.y);
        reduce_min_with_rejection(&source, &mut out);
        for y in 0..dims.y {
            for x in 0..dims.x {
                let valid: Vec<f32> = (0..2)
                    .flat_map(|dy| (0..2).map(move |dx| (x * 2 + dx, y * 2 + dy)))
                    .filter(|&(sx, sy)| sx < 5 && sy < 3)
                    .map(|(sx, sy)| values[(sy * 5 + sx) as usize])
                    .filter(|&d| d >= 0.0)
                    .collect();
                let expected = valid.iter().copied().fold(f32::INFINITY, f32::min);
                let got = out.load_x(x, y);
                if valid.is_empty() {
                    assert_eq!(got, NO_DISTANCE);
                } else {
                    assert_eq!(got, expected);
                }
            }
        }
    }

    #[test]
    fn test_window_clamps_to_edges() {
        let source = distances(3, 1, &[4.0, NO_DISTANCE, 1.0]);
        assert_eq!(min_valid_window(&source, IVec2::new(0, 0), 1), 4.0);
        assert_eq!(min_valid_window(&source, IVec2::new(1, 0), 1), 1.0);
        assert_eq!(min_valid_window(&source, IVec2::new(1, 0), 0), NO_DISTANCE);
    }
}
