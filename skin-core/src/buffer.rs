//! Raw RGBA pixel buffers and PNG encode/decode.

use std::io::Cursor;

use image::ImageEncoder;

use crate::error::{SkinError, SkinResult};

/// PNG magic bytes.
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Decoded 8-bit RGBA pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGBA bytes (4 per pixel).
    pub data: Vec<u8>,
}

impl RgbaBuffer {
    /// Create a buffer from raw bytes, validating the length.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::BufferLength`] if `data` is not `width * height * 4` bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> SkinResult<Self> {
        let expected = byte_len(width, height);
        if data.len() != expected {
            return Err(SkinError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Create a fully transparent buffer.
    #[must_use]
    pub fn transparent(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    /// Create a buffer filled with one colour.
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixel_count = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Whether either dimension is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Get a pixel, or `None` when out of bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    /// Set a pixel. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    /// Iterate over the alpha channel.
    pub fn alpha_values(&self) -> impl Iterator<Item = u8> + '_ {
        self.data.chunks_exact(4).map(|px| px[3])
    }

    /// Decode PNG bytes into an RGBA buffer.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Decode`] if the bytes are not a well-formed PNG.
    pub fn decode_png(bytes: &[u8]) -> SkinResult<Self> {
        if !bytes.starts_with(&PNG_SIGNATURE) {
            return Err(SkinError::Decode(format!(
                "not a PNG container ({} bytes)",
                bytes.len()
            )));
        }
        let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
            .map_err(|e| SkinError::Decode(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            data: rgba.into_raw(),
        })
    }

    /// Decode any image format supported by the image crate build.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::Decode`] if the bytes cannot be decoded.
    pub fn decode(bytes: &[u8]) -> SkinResult<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| SkinError::Decode(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            data: rgba.into_raw(),
        })
    }

    /// Encode as a PNG with an alpha channel.
    ///
    /// # Errors
    ///
    /// Returns [`SkinError::BufferLength`] for a malformed buffer or
    /// [`SkinError::Encode`] if PNG encoding fails.
    pub fn encode_png(&self) -> SkinResult<Vec<u8>> {
        let expected = byte_len(self.width, self.height);
        if self.data.len() != expected {
            return Err(SkinError::BufferLength {
                expected,
                actual: self.data.len(),
            });
        }
        let mut buf = Cursor::new(Vec::new());
        image::codecs::png::PngEncoder::new(&mut buf)
            .write_image(
                &self.data,
                self.width,
                self.height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| SkinError::Encode(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    (width as usize) * (height as usize) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_validates_length() {
        assert!(RgbaBuffer::from_raw(2, 2, vec![0; 16]).is_ok());
        let err = RgbaBuffer::from_raw(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            SkinError::BufferLength {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn test_png_roundtrip_preserves_pixels() {
        let mut buffer = RgbaBuffer::transparent(3, 2);
        buffer.set_pixel(1, 1, [10, 20, 30, 40]);
        let png = buffer.encode_png().expect("encode");
        assert_eq!(&png[0..4], &[137, 80, 78, 71]);

        let decoded = RgbaBuffer::decode_png(&png).expect("decode");
        assert_eq!(decoded, buffer);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = RgbaBuffer::decode_png(b"definitely not a png").unwrap_err();
        assert!(matches!(err, SkinError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_png() {
        let png = RgbaBuffer::filled(8, 8, [1, 2, 3, 4])
            .encode_png()
            .expect("encode");
        let err = RgbaBuffer::decode_png(&png[..png.len() / 2]).unwrap_err();
        assert!(matches!(err, SkinError::Decode(_)));
    }

    #[test]
    fn test_pixel_out_of_bounds() {
        let buffer = RgbaBuffer::transparent(2, 2);
        assert_eq!(buffer.pixel(1, 1), Some([0, 0, 0, 0]));
        assert_eq!(buffer.pixel(2, 0), None);
    }
}
