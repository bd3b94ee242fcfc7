//! The decoding seam between the cache and the surrounding engine.
//!
//! This crate never parses image files. Decoders (raster or vector) are
//! injected by the caller behind the [`ImageDecoder`] trait; the cache only
//! ever sees decoded pixel buffers.

use log::debug;

use crate::cache::{ImageHandle, PictureCache};
use crate::error::CacheError;

/// What kind of source a decoder consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderKind {
    Raster,
    Vector,
}

/// Raw RGBA output of an external decoder.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// An external image decoder capability.
pub trait ImageDecoder {
    fn kind(&self) -> DecoderKind;

    /// Decodes encoded bytes into a non-premultiplied RGBA buffer.
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<DecodedImage>;
}

impl PictureCache {
    /// Resolves `name` from the cache, decoding and registering it on a
    /// miss. This is the lookup sequence the surrounding engine performs:
    /// `fetch_by_name`, then on [`CacheError::NotFound`] decode externally,
    /// submit via `fetch_by_data` and attach the name.
    pub fn fetch_or_decode(
        &self,
        name: &str,
        bytes: &[u8],
        decoder: &dyn ImageDecoder,
    ) -> Result<ImageHandle, CacheError> {
        match self.fetch_by_name(name) {
            Ok(handle) => Ok(handle),
            Err(CacheError::NotFound { .. }) => {
                debug!("cache miss for {name:?}, decoding ({:?})", decoder.kind());
                let image = decoder
                    .decode(bytes)
                    .map_err(|source| CacheError::Decode {
                        name: name.to_owned(),
                        source,
                    })?;
                let handle = self.fetch_by_data(image.width, image.height, &image.pixels);
                self.register_name(&handle, name);
                Ok(handle)
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// Fake decoder yielding a solid 2x2 image; counts invocations.
    struct SolidDecoder(std::cell::Cell<usize>);

    impl ImageDecoder for SolidDecoder {
        fn kind(&self) -> DecoderKind {
            DecoderKind::Raster
        }

        fn decode(&self, bytes: &[u8]) -> anyhow::Result<DecodedImage> {
            if bytes.is_empty() {
                bail!("empty input");
            }
            self.0.set(self.0.get() + 1);
            Ok(DecodedImage {
                width: 2,
                height: 2,
                pixels: vec![u32::from(bytes[0]); 4],
            })
        }
    }

    #[test]
    fn decodes_once_then_hits_by_name() {
        let cache = PictureCache::new(2);
        let decoder = SolidDecoder(std::cell::Cell::new(0));

        let a = cache.fetch_or_decode("border", &[7], &decoder).unwrap();
        let b = cache.fetch_or_decode("border", &[7], &decoder).unwrap();

        assert!(a.same_set(&b));
        assert_eq!(decoder.0.get(), 1);
    }

    #[test]
    fn decode_failure_is_reported_with_the_name() {
        let cache = PictureCache::new(2);
        let decoder = SolidDecoder(std::cell::Cell::new(0));
        let err = cache.fetch_or_decode("broken", &[], &decoder).unwrap_err();
        assert!(matches!(err, CacheError::Decode { ref name, .. } if name == "broken"));
    }
}
