//! Immutable RGBA pixel buffers.

use crate::hash::{self, ContentKey};

/// One immutable pixel buffer at one fixed size.
///
/// Pixels are 32-bit non-premultiplied RGBA words, laid out `0xAABBGGRR`
/// (RGBA byte order in little-endian memory), row-major, no padding. The
/// checksum is computed once at construction and never changes; neither do
/// the pixels.
#[derive(Debug)]
pub struct Picture {
    width: u32,
    height: u32,
    pixels: Box<[u32]>,
    checksum: u32,
}

impl Picture {
    /// Builds a picture by copying `pixels`.
    ///
    /// # Panics
    ///
    /// Panics on a zero dimension or on a pixel count that does not match
    /// `width * height`; both indicate a caller bug.
    #[must_use]
    pub fn from_pixels(width: u32, height: u32, pixels: &[u32]) -> Self {
        Self::from_vec(width, height, pixels.to_vec())
    }

    /// Builds a picture taking ownership of an existing buffer.
    #[must_use]
    pub(crate) fn from_vec(width: u32, height: u32, pixels: Vec<u32>) -> Self {
        assert!(width > 0 && height > 0, "zero-sized picture {width}x{height}");
        assert_eq!(
            pixels.len(),
            width as usize * height as usize,
            "pixel buffer length does not match {width}x{height}"
        );
        let checksum = hash::checksum(&pixels);
        Self {
            width,
            height,
            pixels: pixels.into_boxed_slice(),
            checksum,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The dominant axis, used when matching cached sizes.
    #[must_use]
    pub fn max_dim(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Content identity of this picture in the cache's content index.
    #[must_use]
    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.width, self.height, self.checksum)
    }
}
