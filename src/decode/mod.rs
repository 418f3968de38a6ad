//! Decoded image payloads.
//!
//! Bytes read from a transport are decoded with the [`image`] crate into
//! RGBA8 pixels. The pixel buffer length is the payload's byte footprint,
//! which is what the cache charges against its capacity.

use std::fmt;

use bytes::Bytes;

use crate::cache::ByteSize;

/// A decoded image held as tightly packed RGBA8 pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    pixels: Bytes,
}

impl DecodedImage {
    /// Builds an image from raw RGBA8 pixels.
    ///
    /// Returns `None` when `pixels` is not exactly `width * height * 4` bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use urlimage::DecodedImage;
    ///
    /// let image = DecodedImage::from_rgba(2, 1, vec![0u8; 8]).unwrap();
    /// assert_eq!(image.byte_size(), 8);
    /// assert!(DecodedImage::from_rgba(2, 2, vec![0u8; 8]).is_none());
    /// ```
    pub fn from_rgba(width: u32, height: u32, pixels: impl Into<Bytes>) -> Option<Self> {
        let pixels = pixels.into();
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the RGBA8 pixel buffer, row-major.
    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// Returns the in-memory footprint of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

impl ByteSize for DecodedImage {
    fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decodes encoded image bytes, sniffing the format from its magic number.
///
/// Returns `None` when the bytes are not a decodable image. Callers treat
/// that as an empty payload rather than as a failure.
pub fn decode(bytes: &[u8]) -> Option<DecodedImage> {
    match image::load_from_memory(bytes) {
        Ok(decoded) => {
            let rgba = decoded.into_rgba8();
            let (width, height) = rgba.dimensions();
            Some(DecodedImage {
                width,
                height,
                pixels: Bytes::from(rgba.into_raw()),
            })
        }
        Err(e) => {
            tracing::debug!(error = %e, len = bytes.len(), "image bytes did not decode");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encodes a solid `width` x `height` PNG.
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn decodes_png_to_rgba() {
        let image = decode(&png_bytes(3, 2)).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.byte_size(), 3 * 2 * 4);
        assert_eq!(&image.pixels()[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn corrupt_bytes_yield_none() {
        assert!(decode(b"definitely not an image").is_none());
        assert!(decode(&[]).is_none());
    }

    #[test]
    fn truncated_png_yields_none() {
        let png = png_bytes(4, 4);
        assert!(decode(&png[..png.len() / 2]).is_none());
    }
}
