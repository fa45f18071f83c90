//! Core building blocks for AVIF gain map images.
//!
//! This crate provides the pieces of an AVIF reader/writer that do not depend on
//! an AV1 codec:
//! - Bit-level stream reading and writing, including ISOBMFF box headers with
//!   backpatched sizes
//! - Exact rational gain map metadata (ISO 21496-1) and its conversion to and
//!   from floating point
//! - Outlier-robust range estimation used when authoring a gain map
//! - Tone mapping: combining a base image and a gain map at a target headroom
//! - Color primitives (transfer curves, primaries matrices, YUV conversion)
//!
//! Container items, image grids and codec integration live in the `avifgain`
//! crate.
//!
//! # Example
//!
//! ```ignore
//! use avifgain_core::{
//!     gainmap::{apply_gainmap, compute_gainmap, GainMapConfig},
//!     RgbFormat, RgbImage, TransferCharacteristics,
//! };
//!
//! // Author a gain map from an SDR base and an HDR alternate rendition.
//! let gain_map = compute_gainmap(&sdr, &hdr, &GainMapConfig::default())?;
//!
//! // Reconstruct the HDR rendition on a display with 3 stops of headroom.
//! let mut out = RgbImage::new(sdr.width, sdr.height, 10, RgbFormat::Rgba, false)?;
//! out.transfer_characteristics = TransferCharacteristics::Pq;
//! let clli = apply_gainmap(&sdr, &gain_map, 3.0, &mut out)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod color;
pub mod fraction;
pub mod gainmap;
pub mod metadata;
pub mod stream;
mod types;

pub use fraction::{Fraction, UFraction};
pub use metadata::{GainMapMetadata, GainMapMetadataDouble};
pub use types::{
    ColorPrimaries, ContentLightLevel, Error, GainMap, GainMapState, Image, MatrixCoefficients,
    Plane, Result, RgbFormat, RgbImage, TransferCharacteristics, YuvFormat,
};

pub use gainmap::{apply_gainmap, compute_gainmap, compute_weight, GainMapConfig};
pub use metadata::tmap::{parse_tmap, serialize_tmap};

/// Safety limits for parsing and allocation.
pub mod limits {
    /// Maximum image dimension (width or height), including grid output sizes.
    pub const MAX_IMAGE_DIMENSION: u32 = 1 << 18;

    /// Maximum total pixels (width * height), 16384 x 16384.
    pub const MAX_TOTAL_PIXELS: u64 = 16384 * 16384;

    /// Maximum number of items in a container.
    pub const MAX_ITEM_COUNT: usize = 4096;

    /// Maximum size of a gain map metadata payload.
    pub const MAX_TMAP_PAYLOAD: usize = 1 << 20;

    /// Maximum number of histogram buckets used by outlier detection.
    pub const MAX_HISTOGRAM_BUCKETS: usize = 10_000;
}
