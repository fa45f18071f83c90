//! AVIF images with ISO 21496-1 gain maps.
//!
//! An AVIF file with a gain map stores a base rendition (usually SDR) as the
//! primary image and a `tmap` derived item that combines it with a gain map
//! image. Readers that do not understand `tmap` show the base rendition;
//! readers that do can reconstruct any rendition between the base and the
//! alternate (usually HDR) one at display time.
//!
//! # Crate Structure
//!
//! - [`avifgain_core`] - Bit streams, box headers, exact gain map metadata,
//!   authoring and tone mapping (no container, no codec)
//! - `avifgain` (this crate) - Container items, image grids, the AV1 codec
//!   boundary, [`Encoder`] and [`Decoder`]
//!
//! # File Layout
//!
//! ```text
//! ftyp  avif mif1 miaf tmap
//! meta
//!   item 1  av01 or grid   primary color image
//!   item 2  av01 or grid   alpha (auxl -> 1), optional
//!   item 3  av01 or grid   gain map, hidden
//!   item 4  tmap           dimg -> [1, 3], ISO 21496-1 metadata
//!   altr    [4, 1]
//! mdat
//! ```
//!
//! # Example
//!
//! ```ignore
//! use avifgain::{Decoder, DecoderSettings, Encoder};
//!
//! // The codec types implement `Av1Encoder` / `Av1Decoder`.
//! let avif = Encoder::new(av1_encoder).encode(&image_with_gain_map)?;
//!
//! let settings = DecoderSettings::default().with_gainmap_pixels(true);
//! let decoded = Decoder::with_settings(av1_decoder, settings).decode(&avif)?;
//! let gain_map = decoded.gain_map.as_deref().and_then(|gm| gm.pixels());
//! ```
//!
//! # Standards
//!
//! - ISO/IEC 23000-22 (MIAF) and ISO/IEC 23008-12 (HEIF) item structure
//! - AV1 Image File Format (AVIF) v1.1
//! - ISO 21496-1 (gain map metadata)

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export everything from avifgain-core
pub use avifgain_core::color;
pub use avifgain_core::gainmap;
pub use avifgain_core::metadata;
pub use avifgain_core::stream;

// Re-export core types at crate root
pub use avifgain_core::{
    apply_gainmap, compute_gainmap, compute_weight, limits, parse_tmap, serialize_tmap,
    ColorPrimaries, ContentLightLevel, Error, Fraction, GainMap, GainMapConfig, GainMapMetadata,
    GainMapMetadataDouble, GainMapState, Image, MatrixCoefficients, Plane, Result, RgbFormat,
    RgbImage, TransferCharacteristics, UFraction, YuvFormat,
};

// This crate's additional modules
pub mod codec;
pub mod container;
pub mod grid;

mod decode;
mod encode;

// Re-export encoder/decoder
pub use codec::{Av1Decoder, Av1Encoder, Category, DecodeSample, EncodedSample};
pub use decode::{Decoder, DecoderSettings};
pub use encode::{Encoder, EncoderSettings};
