//! Image orientation as a 2x2 linear map
//!
//! An orientation is a signed permutation matrix with entries in {-1, 0, 1}
//! encoding a rotation and/or flip. The same matrix serves two views:
//! applying it to a size computes the post-orientation dimensions, and
//! applying it to pixel coordinates (with an offset keeping the projection
//! non-negative) walks the destination buffer.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// 2x2 orientation matrix `[[a, c], [b, d]]` acting on column vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation {
    pub a: i8,
    pub b: i8,
    pub c: i8,
    pub d: i8,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}

impl Orientation {
    pub const fn new(a: i8, b: i8, c: i8, d: i8) -> Self {
        Self { a, b, c, d }
    }

    pub const fn identity() -> Self {
        Self::new(1, 0, 0, 1)
    }

    /// Build from an 8-value EXIF orientation code
    ///
    /// Out-of-range codes fall back to identity: the value usually comes from
    /// an untrusted decoder and a bad code is not worth failing a preview over.
    pub fn from_exif(code: u8) -> Self {
        match code {
            1 => Self::new(1, 0, 0, 1),
            2 => Self::new(-1, 0, 0, 1),
            3 => Self::new(-1, 0, 0, -1),
            4 => Self::new(1, 0, 0, -1),
            5 => Self::new(0, 1, 1, 0),
            6 => Self::new(0, 1, -1, 0),
            7 => Self::new(0, -1, -1, 0),
            8 => Self::new(0, -1, 1, 0),
            _ => Self::identity(),
        }
    }

    /// Build from a clockwise quarter-turn count (mod 4, negatives allowed)
    pub fn from_clockwise_rotation(quarter_turns: i32) -> Self {
        match quarter_turns.rem_euclid(4) {
            0 => Self::identity(),
            1 => Self::new(0, 1, -1, 0),
            2 => Self::new(-1, 0, 0, -1),
            3 => Self::new(0, -1, 1, 0),
            _ => unreachable!(),
        }
    }

    /// Compose independent X/Y flips with a clockwise quarter-turn count.
    ///
    /// The flip is applied first, then the rotation; the order is fixed since
    /// the two do not commute in general.
    pub fn from_flips_and_rotation(flip_x: bool, flip_y: bool, quarter_turns: i32) -> Self {
        let flip = Self::new(if flip_x { -1 } else { 1 }, 0, 0, if flip_y { -1 } else { 1 });
        Self::from_clockwise_rotation(quarter_turns).compose(&flip)
    }

    /// Matrix product `self * other`: `other` is applied first
    pub fn compose(&self, other: &Orientation) -> Self {
        Self::new(
            self.a * other.a + self.c * other.b,
            self.b * other.a + self.d * other.b,
            self.a * other.c + self.c * other.d,
            self.b * other.c + self.d * other.d,
        )
    }

    /// Inverse map. Our matrices are signed permutations, so the inverse is
    /// the transpose.
    pub fn inverse(&self) -> Self {
        Self::new(self.a, self.c, self.b, self.d)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// True when the orientation exchanges the two axes (90°/270° rotations
    /// and the diagonal flips)
    pub fn swaps_dimensions(&self) -> bool {
        self.a == 0
    }

    /// Dimensions of a `width` x `height` image after applying this
    /// orientation: `(|a·w + c·h|, |b·w + d·h|)`
    pub fn apply_to_size(&self, width: u32, height: u32) -> (u32, u32) {
        let w = i64::from(width);
        let h = i64::from(height);
        let out_w = (i64::from(self.a) * w + i64::from(self.c) * h).unsigned_abs() as u32;
        let out_h = (i64::from(self.b) * w + i64::from(self.d) * h).unsigned_abs() as u32;
        (out_w, out_h)
    }

    /// Destination coordinate of source pixel `(x, y)` in a `width` x
    /// `height` image. The translation keeps the projected output
    /// non-negative, so results fall within the `apply_to_size` bounds.
    pub fn apply_to_point(&self, x: u32, y: u32, width: u32, height: u32) -> (u32, u32) {
        let (x, y) = (x as i64, y as i64);
        let (w, h) = (i64::from(width), i64::from(height));

        let tx = if self.a < 0 { w - 1 } else { 0 } + if self.c < 0 { h - 1 } else { 0 };
        let ty = if self.b < 0 { w - 1 } else { 0 } + if self.d < 0 { h - 1 } else { 0 };

        let dx = i64::from(self.a) * x + i64::from(self.c) * y + tx;
        let dy = i64::from(self.b) * x + i64::from(self.d) * y + ty;
        (dx as u32, dy as u32)
    }

    /// Apply this orientation to decoded pixels
    pub fn apply_to_image(&self, img: &DynamicImage) -> DynamicImage {
        match (self.a, self.b, self.c, self.d) {
            (1, 0, 0, 1) => img.clone(),
            (-1, 0, 0, 1) => img.fliph(),
            (-1, 0, 0, -1) => img.rotate180(),
            (1, 0, 0, -1) => img.flipv(),
            (0, 1, 1, 0) => img.rotate90().fliph(),
            (0, 1, -1, 0) => img.rotate90(),
            (0, -1, -1, 0) => img.rotate90().flipv(),
            (0, -1, 1, 0) => img.rotate270(),
            _ => img.clone(),
        }
    }

    /// Undo this orientation on decoded pixels (the usual direction in the
    /// pipeline: sources arrive pre-rotated and the request orientation is
    /// cancelled before painting)
    pub fn cancel_on_image(&self, img: &DynamicImage) -> DynamicImage {
        self.inverse().apply_to_image(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let o = Orientation::identity();
        assert!(o.is_identity());
        assert!(!o.swaps_dimensions());
        assert_eq!(o.apply_to_size(200, 50), (200, 50));
        assert_eq!(o.apply_to_point(3, 4, 10, 10), (3, 4));
    }

    #[test]
    fn test_exif_codes_cover_all_eight() {
        for code in 1..=8u8 {
            let o = Orientation::from_exif(code);
            // Every EXIF orientation is a signed permutation: exactly one
            // non-zero entry per row and column.
            assert_eq!(o.a.abs() + o.c.abs(), 1);
            assert_eq!(o.b.abs() + o.d.abs(), 1);
            assert_eq!(o.a.abs() + o.b.abs(), 1);
        }
        assert_eq!(Orientation::from_exif(0), Orientation::identity());
        assert_eq!(Orientation::from_exif(9), Orientation::identity());
    }

    #[test]
    fn test_rotation_swaps_size() {
        let rot = Orientation::from_clockwise_rotation(1);
        assert!(rot.swaps_dimensions());
        assert_eq!(rot.apply_to_size(200, 50), (50, 200));
    }

    #[test]
    fn test_rotation_mod_four() {
        assert_eq!(
            Orientation::from_clockwise_rotation(5),
            Orientation::from_clockwise_rotation(1)
        );
        assert_eq!(
            Orientation::from_clockwise_rotation(-1),
            Orientation::from_clockwise_rotation(3)
        );
        assert_eq!(
            Orientation::from_clockwise_rotation(4),
            Orientation::identity()
        );
    }

    #[test]
    fn test_rotate90_point_mapping() {
        // 90° clockwise on a 4x2 image: (x, y) -> (h-1-y, x)
        let rot = Orientation::from_clockwise_rotation(1);
        assert_eq!(rot.apply_to_point(0, 0, 4, 2), (1, 0));
        assert_eq!(rot.apply_to_point(3, 1, 4, 2), (0, 3));
    }

    #[test]
    fn test_inverse_round_trip() {
        for code in 1..=8u8 {
            let o = Orientation::from_exif(code);
            assert_eq!(o.compose(&o.inverse()), Orientation::identity());
            assert_eq!(o.inverse().compose(&o), Orientation::identity());
        }
    }

    #[test]
    fn test_inverse_of_rotation() {
        let rot90 = Orientation::from_clockwise_rotation(1);
        assert_eq!(rot90.inverse(), Orientation::from_clockwise_rotation(3));
    }

    #[test]
    fn test_flip_then_rotate_order() {
        // Flip X then rotate 90° CW is transpose (EXIF 5), not transverse.
        let o = Orientation::from_flips_and_rotation(true, false, 1);
        assert_eq!(o, Orientation::from_exif(5));
        // The other order would give a different matrix.
        let flip = Orientation::new(-1, 0, 0, 1);
        let other_order = flip.compose(&Orientation::from_clockwise_rotation(1));
        assert_ne!(o, other_order);
    }

    #[test]
    fn test_point_mapping_stays_in_bounds() {
        let (w, h) = (5u32, 3u32);
        for code in 1..=8u8 {
            let o = Orientation::from_exif(code);
            let (dw, dh) = o.apply_to_size(w, h);
            for y in 0..h {
                for x in 0..w {
                    let (dx, dy) = o.apply_to_point(x, y, w, h);
                    assert!(dx < dw, "exif {}: ({}, {}) -> x {} >= {}", code, x, y, dx, dw);
                    assert!(dy < dh, "exif {}: ({}, {}) -> y {} >= {}", code, x, y, dy, dh);
                }
            }
        }
    }

    #[test]
    fn test_point_mapping_is_bijective() {
        let (w, h) = (4u32, 3u32);
        for code in 1..=8u8 {
            let o = Orientation::from_exif(code);
            let mut seen = std::collections::HashSet::new();
            for y in 0..h {
                for x in 0..w {
                    assert!(seen.insert(o.apply_to_point(x, y, w, h)));
                }
            }
            assert_eq!(seen.len(), (w * h) as usize);
        }
    }

    #[test]
    fn test_apply_to_image_matches_point_mapping() {
        use image::{GenericImageView, Rgba, RgbaImage};

        let mut img = RgbaImage::new(3, 2);
        for y in 0..2 {
            for x in 0..3 {
                img.put_pixel(x, y, Rgba([(x * 10 + y) as u8, 0, 0, 255]));
            }
        }
        let src = DynamicImage::ImageRgba8(img);

        for code in 1..=8u8 {
            let o = Orientation::from_exif(code);
            let out = o.apply_to_image(&src);
            let (dw, dh) = o.apply_to_size(3, 2);
            assert_eq!((out.width(), out.height()), (dw, dh));
            for y in 0..2 {
                for x in 0..3 {
                    let (dx, dy) = o.apply_to_point(x, y, 3, 2);
                    assert_eq!(
                        src.get_pixel(x, y),
                        out.get_pixel(dx, dy),
                        "exif {} pixel ({}, {})",
                        code,
                        x,
                        y
                    );
                }
            }
        }
    }
}
