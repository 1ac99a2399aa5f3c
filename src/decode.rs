//! JPEG decoding for detection sources that need pixels.

use anyhow::{Context, Result};
use image::GenericImageView;

/// Decode an encoded frame into packed RGB888 pixels.
pub fn decode_rgb(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_rgb(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]).is_err());
    }
}
