//! Bitmap synthesis for RGB-triple thumbnails
//!
//! Some RAW files carry a thumbnail as bare RGB triples rather than a JPEG.
//! Those are synthesized into a minimal 24bpp BMP container, remapping the
//! pixels through the same 8-way orientation convention as the geometry
//! engine so the output is already upright.

use crate::error::LoaderError;
use crate::geometry::Orientation;

const FILE_HEADER_SIZE: usize = 14;
const INFO_HEADER_SIZE: usize = 40;
/// 72 DPI in pixels per meter
const RESOLUTION_PPM: u32 = 2835;

/// Synthesize a bottom-up 24bpp BMP from packed RGB triples, applying
/// `orientation` while walking the destination buffer
pub fn synthesize_bmp(
    rgb: &[u8],
    width: u32,
    height: u32,
    orientation: Orientation,
) -> Result<Vec<u8>, LoaderError> {
    if width == 0 || height == 0 {
        return Err(LoaderError::decode_failed("thumbnail has zero dimension"));
    }
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|p| p.checked_mul(3))
        .ok_or_else(|| LoaderError::decode_failed("thumbnail dimensions overflow"))?;
    if rgb.len() < expected {
        return Err(LoaderError::RegionOutOfBounds {
            offset: 0,
            length: expected,
            buffer_size: rgb.len(),
        });
    }

    let (out_width, out_height) = orientation.apply_to_size(width, height);
    // Rows are padded to a 4-byte stride.
    let stride = ((out_width as usize * 3) + 3) / 4 * 4;
    let pixel_bytes = stride * out_height as usize;
    let file_size = FILE_HEADER_SIZE + INFO_HEADER_SIZE + pixel_bytes;

    let mut out = vec![0u8; file_size];

    // BITMAPFILEHEADER
    out[0] = b'B';
    out[1] = b'M';
    out[2..6].copy_from_slice(&(file_size as u32).to_le_bytes());
    out[10..14].copy_from_slice(&((FILE_HEADER_SIZE + INFO_HEADER_SIZE) as u32).to_le_bytes());

    // BITMAPINFOHEADER
    out[14..18].copy_from_slice(&(INFO_HEADER_SIZE as u32).to_le_bytes());
    out[18..22].copy_from_slice(&out_width.to_le_bytes());
    out[22..26].copy_from_slice(&out_height.to_le_bytes());
    out[26..28].copy_from_slice(&1u16.to_le_bytes()); // planes
    out[28..30].copy_from_slice(&24u16.to_le_bytes()); // bits per pixel
    out[34..38].copy_from_slice(&(pixel_bytes as u32).to_le_bytes());
    out[38..42].copy_from_slice(&RESOLUTION_PPM.to_le_bytes());
    out[42..46].copy_from_slice(&RESOLUTION_PPM.to_le_bytes());

    let pixels = &mut out[FILE_HEADER_SIZE + INFO_HEADER_SIZE..];
    for y in 0..height {
        for x in 0..width {
            let src = ((y * width + x) * 3) as usize;
            let (dx, dy) = orientation.apply_to_point(x, y, width, height);
            // Bottom-up row order.
            let row = (out_height - 1 - dy) as usize;
            let dst = row * stride + dx as usize * 3;
            // BGR byte order.
            pixels[dst] = rgb[src + 2];
            pixels[dst + 1] = rgb[src + 1];
            pixels[dst + 2] = rgb[src];
        }
    }

    Ok(out)
}
