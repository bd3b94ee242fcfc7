//! Multi-resolution, content-addressable image cache and scaler.
//!
//! A theming engine submits decoded RGBA buffers under logical names; this
//! crate deduplicates identical content, groups every size of a logical
//! image into one image set, keeps an LRU-bounded list of derived sizes,
//! and composites the best-fitting version into a caller buffer through a
//! fixed-point area-averaging resampler.
//!
//! The cache is single-threaded and explicitly instantiated; see
//! [`PictureCache`].

pub mod cache;
pub mod decoder;
pub mod error;
pub mod hash;
pub mod image_set;
pub mod picture;
pub mod rect;
pub mod scaler;

pub use cache::{ImageHandle, PictureCache};
pub use decoder::{DecodedImage, DecoderKind, ImageDecoder};
pub use error::CacheError;
pub use image_set::SetStats;
pub use picture::Picture;
pub use rect::Rect;
pub use scaler::{fit_size, resample};
