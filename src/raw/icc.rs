//! Color-profile re-wrapping for RAW preview JPEGs
//!
//! RAW previews are often encoded in Adobe RGB but carry no profile, so
//! renderers would display them as sRGB. Rather than re-encoding, the JPEG
//! stream is re-wrapped with an APP2 ICC_PROFILE segment containing a
//! compact monitor-class Adobe RGB (1998)-compatible profile built here
//! field by field.

use crate::error::LoaderError;

/// Adobe RGB (1998) primaries and white point, D65, from the published
/// specification (columns of the RGB -> XYZ matrix)
const RED_XYZ: [f64; 3] = [0.57667, 0.29734, 0.02703];
const GREEN_XYZ: [f64; 3] = [0.18556, 0.62736, 0.07069];
const BLUE_XYZ: [f64; 3] = [0.18823, 0.07529, 0.99134];
const WHITE_XYZ: [f64; 3] = [0.95047, 1.00000, 1.08883];

/// Gamma 2.2 as u8Fixed8
const GAMMA_U8_FIXED8: u16 = (2.2 * 256.0) as u16;

const PROFILE_DESCRIPTION: &str = "Compatible with Adobe RGB (1998)";
const PROFILE_COPYRIGHT: &str = "Public Domain";

fn s15_fixed16(value: f64) -> i32 {
    (value * 65536.0).round() as i32
}

fn xyz_tag(xyz: &[f64; 3]) -> Vec<u8> {
    let mut tag = Vec::with_capacity(20);
    tag.extend_from_slice(b"XYZ ");
    tag.extend_from_slice(&[0u8; 4]);
    for component in xyz {
        tag.extend_from_slice(&s15_fixed16(*component).to_be_bytes());
    }
    tag
}

fn curv_tag(gamma: u16) -> Vec<u8> {
    let mut tag = Vec::with_capacity(14);
    tag.extend_from_slice(b"curv");
    tag.extend_from_slice(&[0u8; 4]);
    tag.extend_from_slice(&1u32.to_be_bytes());
    tag.extend_from_slice(&gamma.to_be_bytes());
    tag
}

fn desc_tag(text: &str) -> Vec<u8> {
    // textDescriptionType: ASCII description plus empty Unicode and
    // ScriptCode blocks.
    let ascii = text.as_bytes();
    let mut tag = Vec::new();
    tag.extend_from_slice(b"desc");
    tag.extend_from_slice(&[0u8; 4]);
    tag.extend_from_slice(&((ascii.len() + 1) as u32).to_be_bytes());
    tag.extend_from_slice(ascii);
    tag.push(0);
    tag.extend_from_slice(&0u32.to_be_bytes()); // Unicode language code
    tag.extend_from_slice(&0u32.to_be_bytes()); // Unicode count
    tag.extend_from_slice(&0u16.to_be_bytes()); // ScriptCode code
    tag.push(0); // ScriptCode count
    tag.extend_from_slice(&[0u8; 67]); // ScriptCode description
    tag
}

fn text_tag(text: &str) -> Vec<u8> {
    let mut tag = Vec::new();
    tag.extend_from_slice(b"text");
    tag.extend_from_slice(&[0u8; 4]);
    tag.extend_from_slice(text.as_bytes());
    tag.push(0);
    tag
}

/// Build the compact Adobe RGB-compatible profile
pub fn adobe_rgb_profile() -> Vec<u8> {
    let gamma = curv_tag(GAMMA_U8_FIXED8);
    let tags: Vec<(&[u8; 4], Vec<u8>)> = vec![
        (b"desc", desc_tag(PROFILE_DESCRIPTION)),
        (b"cprt", text_tag(PROFILE_COPYRIGHT)),
        (b"wtpt", xyz_tag(&WHITE_XYZ)),
        (b"rXYZ", xyz_tag(&RED_XYZ)),
        (b"gXYZ", xyz_tag(&GREEN_XYZ)),
        (b"bXYZ", xyz_tag(&BLUE_XYZ)),
        (b"rTRC", gamma.clone()),
        (b"gTRC", gamma.clone()),
        (b"bTRC", gamma),
    ];

    let header_size = 128;
    let table_size = 4 + tags.len() * 12;
    let mut offset = header_size + table_size;

    // Tag table with element offsets, then the elements themselves.
    let mut table = Vec::with_capacity(table_size);
    table.extend_from_slice(&(tags.len() as u32).to_be_bytes());
    let mut elements = Vec::new();
    for (signature, element) in &tags {
        table.extend_from_slice(*signature);
        table.extend_from_slice(&(offset as u32).to_be_bytes());
        table.extend_from_slice(&(element.len() as u32).to_be_bytes());
        offset += element.len();
        elements.extend_from_slice(element);
    }

    let total_size = header_size + table.len() + elements.len();

    let mut profile = Vec::with_capacity(total_size);
    profile.extend_from_slice(&(total_size as u32).to_be_bytes());
    profile.extend_from_slice(&[0u8; 4]); // preferred CMM: none
    profile.extend_from_slice(&0x0210_0000u32.to_be_bytes()); // version 2.1
    profile.extend_from_slice(b"mntr"); // display device profile
    profile.extend_from_slice(b"RGB ");
    profile.extend_from_slice(b"XYZ ");
    profile.extend_from_slice(&[0u8; 12]); // creation date: unset
    profile.extend_from_slice(b"acsp");
    profile.extend_from_slice(&[0u8; 4]); // platform: none
    profile.extend_from_slice(&[0u8; 4]); // flags
    profile.extend_from_slice(&[0u8; 4]); // device manufacturer
    profile.extend_from_slice(&[0u8; 4]); // device model
    profile.extend_from_slice(&[0u8; 8]); // device attributes
    profile.extend_from_slice(&0u32.to_be_bytes()); // rendering intent: perceptual
    // PCS illuminant is always D50 in ICC v2, regardless of white point.
    profile.extend_from_slice(&s15_fixed16(0.9642).to_be_bytes());
    profile.extend_from_slice(&s15_fixed16(1.0).to_be_bytes());
    profile.extend_from_slice(&s15_fixed16(0.8249).to_be_bytes());
    profile.extend_from_slice(&[0u8; 4]); // creator
    profile.extend_from_slice(&[0u8; 44]); // reserved
    debug_assert_eq!(profile.len(), header_size);

    profile.extend_from_slice(&table);
    profile.extend_from_slice(&elements);
    profile
}

/// Insert an APP2 ICC_PROFILE segment right after the JPEG SOI marker,
/// leaving the compressed image data untouched
pub fn embed_adobe_rgb_profile(jpeg: &[u8]) -> Result<Vec<u8>, LoaderError> {
    if jpeg.len() < 2 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return Err(LoaderError::decode_failed("preview region is not a JPEG"));
    }

    let profile = adobe_rgb_profile();
    // Segment payload: "ICC_PROFILE\0" + chunk 1 of 1 + profile bytes.
    let payload_len = 12 + 2 + profile.len();
    let segment_len = payload_len + 2;
    if segment_len > u16::MAX as usize {
        return Err(LoaderError::encode_failed("jpeg", "ICC profile too large"));
    }

    let mut out = Vec::with_capacity(jpeg.len() + segment_len + 2);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE2]);
    out.extend_from_slice(&(segment_len as u16).to_be_bytes());
    out.extend_from_slice(b"ICC_PROFILE\0");
    out.push(1); // chunk sequence number
    out.push(1); // chunk count
    out.extend_from_slice(&profile);
    out.extend_from_slice(&jpeg[2..]);
    Ok(out)
}
