//! Core types for AVIF gain map reading, writing and tone mapping.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use thiserror::Error;

use crate::limits;
use crate::metadata::GainMapMetadata;

/// Errors that can occur during AVIF gain map operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Fewer bytes remain than a read requires.
    #[error("truncated data: {0}")]
    Truncated(String),

    /// A box or item structure is malformed.
    #[error("BMFF parsing error: {0}")]
    BmffParse(String),

    /// A byte-aligned stream operation was attempted mid-byte.
    #[error("stream cursor is not byte aligned ({0} bits used in the current byte)")]
    Misaligned(u8),

    /// An argument is outside of its documented domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Image dimensions are invalid (zero or too large).
    #[error("invalid image dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    /// Two images that must share a size do not.
    #[error("dimension mismatch: base is {base_w}x{base_h}, other is {other_w}x{other_h}")]
    DimensionMismatch {
        /// Base image width.
        base_w: u32,
        /// Base image height.
        base_h: u32,
        /// Other image width.
        other_w: u32,
        /// Other image height.
        other_h: u32,
    },

    /// The bit depth is not supported for this operation.
    #[error("unsupported bit depth: {0}")]
    UnsupportedDepth(u32),

    /// The pixel format is not supported for this operation.
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Gain map metadata is invalid or malformed.
    #[error("invalid gain map metadata: {0}")]
    InvalidMetadata(String),

    /// Grid cells disagree on geometry, format or gain map metadata.
    #[error("invalid image grid: {0}")]
    InvalidImageGrid(String),

    /// Pixels were required but are absent.
    #[error("no content: {0}")]
    NoContent(String),

    /// Rational arithmetic would overflow.
    #[error("fraction overflow: {0}")]
    FractionOverflow(String),

    /// Input exceeds safety limits.
    #[error("input exceeds safety limit: {0}")]
    LimitExceeded(String),

    /// Allocation failed.
    #[error("allocation failed: requested {0} bytes")]
    AllocationFailed(usize),

    /// The AV1 encoder reported a failure.
    #[error("encoding error: {0}")]
    EncodeError(String),

    /// The AV1 decoder reported a failure.
    #[error("decoding error: {0}")]
    DecodeError(String),
}

/// Result type for AVIF gain map operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
pub(crate) fn try_alloc_zeroed<T: Copy + Default>(len: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailed(len.saturating_mul(core::mem::size_of::<T>())))?;
    data.resize(len, T::default());
    Ok(data)
}

/// Validate dimensions against safety limits.
pub(crate) fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions(width, height));
    }

    if width > limits::MAX_IMAGE_DIMENSION || height > limits::MAX_IMAGE_DIMENSION {
        return Err(Error::LimitExceeded(format!(
            "dimension {} exceeds maximum {}",
            width.max(height),
            limits::MAX_IMAGE_DIMENSION
        )));
    }

    let total_pixels = width as u64 * height as u64;
    if total_pixels > limits::MAX_TOTAL_PIXELS {
        return Err(Error::LimitExceeded(format!(
            "total pixels {} exceeds maximum {}",
            total_pixels,
            limits::MAX_TOTAL_PIXELS
        )));
    }

    Ok(())
}

// ============================================================================
// Color description (ITU-T H.273 code points)
// ============================================================================

/// Color primaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPrimaries {
    /// BT.709 / sRGB (1)
    Bt709,
    /// Not specified (2)
    #[default]
    Unspecified,
    /// BT.470 System B, G (5)
    Bt470Bg,
    /// BT.601 / SMPTE 170M (6)
    Bt601,
    /// BT.2020 / BT.2100 (9)
    Bt2020,
    /// SMPTE RP 431-2, DCI-P3 (11)
    Smpte431,
    /// SMPTE EG 432-1, Display P3 (12)
    Smpte432,
    /// Any other code point, carried through unchanged.
    Other(u16),
}

impl ColorPrimaries {
    /// Map an H.273 code point.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Bt709,
            2 => Self::Unspecified,
            5 => Self::Bt470Bg,
            6 => Self::Bt601,
            9 => Self::Bt2020,
            11 => Self::Smpte431,
            12 => Self::Smpte432,
            other => Self::Other(other),
        }
    }

    /// The H.273 code point.
    pub fn code(self) -> u16 {
        match self {
            Self::Bt709 => 1,
            Self::Unspecified => 2,
            Self::Bt470Bg => 5,
            Self::Bt601 => 6,
            Self::Bt2020 => 9,
            Self::Smpte431 => 11,
            Self::Smpte432 => 12,
            Self::Other(code) => code,
        }
    }
}

/// Transfer characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferCharacteristics {
    /// BT.709 (1)
    Bt709,
    /// Not specified (2), treated as sRGB
    #[default]
    Unspecified,
    /// Gamma 2.2, BT.470 System M (4)
    Gamma22,
    /// Gamma 2.8, BT.470 System B, G (5)
    Gamma28,
    /// BT.601 (6)
    Bt601,
    /// SMPTE 240M (7)
    Smpte240,
    /// Linear (8)
    Linear,
    /// sRGB, IEC 61966-2-1 (13)
    Srgb,
    /// BT.2020 10-bit (14)
    Bt2020Ten,
    /// BT.2020 12-bit (15)
    Bt2020Twelve,
    /// Perceptual Quantizer, SMPTE ST 2084 (16)
    Pq,
    /// Hybrid Log-Gamma, ARIB STD-B67 (18)
    Hlg,
    /// Any other code point, carried through unchanged.
    Other(u16),
}

impl TransferCharacteristics {
    /// Map an H.273 code point.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Bt709,
            2 => Self::Unspecified,
            4 => Self::Gamma22,
            5 => Self::Gamma28,
            6 => Self::Bt601,
            7 => Self::Smpte240,
            8 => Self::Linear,
            13 => Self::Srgb,
            14 => Self::Bt2020Ten,
            15 => Self::Bt2020Twelve,
            16 => Self::Pq,
            18 => Self::Hlg,
            other => Self::Other(other),
        }
    }

    /// The H.273 code point.
    pub fn code(self) -> u16 {
        match self {
            Self::Bt709 => 1,
            Self::Unspecified => 2,
            Self::Gamma22 => 4,
            Self::Gamma28 => 5,
            Self::Bt601 => 6,
            Self::Smpte240 => 7,
            Self::Linear => 8,
            Self::Srgb => 13,
            Self::Bt2020Ten => 14,
            Self::Bt2020Twelve => 15,
            Self::Pq => 16,
            Self::Hlg => 18,
            Self::Other(code) => code,
        }
    }

    /// True for PQ and HLG.
    pub fn is_hdr(self) -> bool {
        matches!(self, Self::Pq | Self::Hlg)
    }
}

/// Matrix coefficients used for YUV to RGB conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixCoefficients {
    /// Identity, GBR (0)
    Identity,
    /// BT.709 (1)
    Bt709,
    /// Not specified (2)
    Unspecified,
    /// BT.470 System B, G (5)
    Bt470Bg,
    /// BT.601 (6)
    #[default]
    Bt601,
    /// BT.2020 non-constant luminance (9)
    Bt2020Ncl,
    /// Any other code point, carried through unchanged.
    Other(u16),
}

impl MatrixCoefficients {
    /// Map an H.273 code point.
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Identity,
            1 => Self::Bt709,
            2 => Self::Unspecified,
            5 => Self::Bt470Bg,
            6 => Self::Bt601,
            9 => Self::Bt2020Ncl,
            other => Self::Other(other),
        }
    }

    /// The H.273 code point.
    pub fn code(self) -> u16 {
        match self {
            Self::Identity => 0,
            Self::Bt709 => 1,
            Self::Unspecified => 2,
            Self::Bt470Bg => 5,
            Self::Bt601 => 6,
            Self::Bt2020Ncl => 9,
            Self::Other(code) => code,
        }
    }
}

/// Content light level information, in cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    /// Maximum content light level.
    pub max_cll: u16,
    /// Maximum picture-average light level.
    pub max_pall: u16,
}

// ============================================================================
// Planar (YUV) images
// ============================================================================

/// Chroma subsampling of a planar image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YuvFormat {
    /// No subsampling.
    #[default]
    Yuv444,
    /// Horizontal subsampling.
    Yuv422,
    /// Horizontal and vertical subsampling.
    Yuv420,
    /// Luma only.
    Yuv400,
}

impl YuvFormat {
    /// Horizontal and vertical chroma shift.
    pub fn chroma_shift(self) -> (u32, u32) {
        match self {
            Self::Yuv444 | Self::Yuv400 => (0, 0),
            Self::Yuv422 => (1, 0),
            Self::Yuv420 => (1, 1),
        }
    }

    /// Number of color planes (1 or 3).
    pub fn plane_count(self) -> usize {
        if self == Self::Yuv400 {
            1
        } else {
            3
        }
    }
}

/// One plane of samples, row-major with a stride equal to its width.
///
/// Samples are stored as `u16` regardless of bit depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    /// Plane width in samples.
    pub width: u32,
    /// Plane height in samples.
    pub height: u32,
    /// Sample data.
    pub data: Vec<u16>,
}

impl Plane {
    /// Allocate a zeroed plane.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| Error::LimitExceeded("plane size overflow".into()))?;
        Ok(Self {
            width,
            height,
            data: try_alloc_zeroed(len)?,
        })
    }

    /// Sample at `(x, y)`.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Set the sample at `(x, y)`.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u16) {
        self.data[y as usize * self.width as usize + x as usize] = value;
    }
}

/// A planar image as produced or consumed by an AV1 codec.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per sample (8, 10, 12, or 16 for intermediate results).
    pub depth: u8,
    /// Chroma subsampling.
    pub yuv_format: YuvFormat,
    /// Full (true) or limited (false) sample range.
    pub full_range: bool,
    /// Color primaries.
    pub color_primaries: ColorPrimaries,
    /// Transfer characteristics.
    pub transfer_characteristics: TransferCharacteristics,
    /// Matrix coefficients.
    pub matrix_coefficients: MatrixCoefficients,
    /// Content light level, if known.
    pub clli: Option<ContentLightLevel>,
    /// Y, U, V planes (only Y for 4:0:0). Empty until pixels are allocated or decoded.
    pub planes: Vec<Plane>,
    /// Alpha plane.
    pub alpha: Option<Plane>,
    /// Gain map; `None` when no gain map was parsed or attached.
    pub gain_map: Option<Box<GainMap>>,
}

impl Image {
    /// Create an image description without pixels.
    pub fn new(width: u32, height: u32, depth: u8, yuv_format: YuvFormat) -> Result<Self> {
        validate_dimensions(width, height)?;
        if !matches!(depth, 8 | 10 | 12 | 16) {
            return Err(Error::UnsupportedDepth(depth as u32));
        }

        Ok(Self {
            width,
            height,
            depth,
            yuv_format,
            full_range: true,
            color_primaries: ColorPrimaries::default(),
            transfer_characteristics: TransferCharacteristics::default(),
            matrix_coefficients: MatrixCoefficients::default(),
            clli: None,
            planes: Vec::new(),
            alpha: None,
            gain_map: None,
        })
    }

    /// Allocate zeroed Y/U/V planes according to the subsampling.
    pub fn allocate_planes(&mut self) -> Result<()> {
        let (shift_x, shift_y) = self.yuv_format.chroma_shift();
        let chroma_w = (self.width + shift_x) >> shift_x;
        let chroma_h = (self.height + shift_y) >> shift_y;

        let mut planes = Vec::with_capacity(self.yuv_format.plane_count());
        planes.push(Plane::new(self.width, self.height)?);
        if self.yuv_format != YuvFormat::Yuv400 {
            planes.push(Plane::new(chroma_w, chroma_h)?);
            planes.push(Plane::new(chroma_w, chroma_h)?);
        }
        self.planes = planes;
        Ok(())
    }

    /// Allocate a zeroed alpha plane.
    pub fn allocate_alpha(&mut self) -> Result<()> {
        self.alpha = Some(Plane::new(self.width, self.height)?);
        Ok(())
    }

    /// True once Y (and chroma, if any) planes are present.
    pub fn has_pixels(&self) -> bool {
        self.planes.len() == self.yuv_format.plane_count()
    }

    /// Largest sample value for this depth.
    pub fn max_sample_value(&self) -> u16 {
        ((1u32 << self.depth) - 1) as u16
    }

    /// State of the gain map attached to this image.
    pub fn gain_map_state(&self) -> GainMapState {
        self.gain_map
            .as_ref()
            .map_or(GainMapState::NotParsed, |gm| gm.state())
    }

    /// Check that planes match the declared geometry.
    pub fn validate_planes(&self) -> Result<()> {
        if !self.has_pixels() {
            return Err(Error::NoContent(format!(
                "{}x{} image has {} of {} planes",
                self.width,
                self.height,
                self.planes.len(),
                self.yuv_format.plane_count()
            )));
        }
        let (shift_x, shift_y) = self.yuv_format.chroma_shift();
        for (index, plane) in self.planes.iter().enumerate() {
            let (w, h) = if index == 0 {
                (self.width, self.height)
            } else {
                ((self.width + shift_x) >> shift_x, (self.height + shift_y) >> shift_y)
            };
            if plane.width != w || plane.height != h || plane.data.len() != w as usize * h as usize
            {
                return Err(Error::InvalidArgument(format!(
                    "plane {} is {}x{}, expected {}x{}",
                    index, plane.width, plane.height, w, h
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Interleaved RGB images
// ============================================================================

/// Channel layout of an interleaved RGB image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RgbFormat {
    /// Three channels.
    Rgb,
    /// Four channels, alpha last.
    #[default]
    Rgba,
}

impl RgbFormat {
    /// Number of interleaved channels.
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    /// True when an alpha channel is present.
    pub fn has_alpha(self) -> bool {
        self == Self::Rgba
    }
}

/// An interleaved RGB(A) image.
///
/// Integer images store samples in `[0, 2^depth - 1]`. Float images have
/// depth 16 and store the bits of an IEEE half float per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per sample.
    pub depth: u8,
    /// Channel layout.
    pub format: RgbFormat,
    /// Half-float samples.
    pub is_float: bool,
    /// Color primaries of the samples.
    pub color_primaries: ColorPrimaries,
    /// Transfer characteristics of the samples.
    pub transfer_characteristics: TransferCharacteristics,
    /// Interleaved samples.
    pub data: Vec<u16>,
}

impl RgbImage {
    /// Allocate a zeroed RGB image.
    pub fn new(width: u32, height: u32, depth: u8, format: RgbFormat, is_float: bool) -> Result<Self> {
        validate_dimensions(width, height)?;
        if !matches!(depth, 8 | 10 | 12 | 16) {
            return Err(Error::UnsupportedDepth(depth as u32));
        }
        if is_float && depth != 16 {
            return Err(Error::UnsupportedFormat(format!(
                "float samples require depth 16, got {}",
                depth
            )));
        }

        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.channels()))
            .ok_or_else(|| Error::LimitExceeded("RGB image size overflow".into()))?;

        Ok(Self {
            width,
            height,
            depth,
            format,
            is_float,
            color_primaries: ColorPrimaries::Bt709,
            transfer_characteristics: TransferCharacteristics::Srgb,
            data: try_alloc_zeroed(len)?,
        })
    }

    /// Largest integer sample value.
    pub fn max_value(&self) -> f32 {
        ((1u32 << self.depth) - 1) as f32
    }

    /// True when both images share depth, channel layout and sample type.
    pub fn same_layout(&self, other: &RgbImage) -> bool {
        self.depth == other.depth && self.format == other.format && self.is_float == other.is_float
    }

    /// Read a pixel as normalized floats. Missing alpha reads as 1.0.
    ///
    /// Integer samples map to `[0, 1]`; float samples are returned as stored.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let channels = self.format.channels();
        let idx = (y as usize * self.width as usize + x as usize) * channels;
        let mut out = [1.0f32; 4];
        if self.is_float {
            for (c, value) in out.iter_mut().enumerate().take(channels) {
                *value = half::f16::from_bits(self.data[idx + c]).to_f32();
            }
        } else {
            let max = self.max_value();
            for (c, value) in out.iter_mut().enumerate().take(channels) {
                *value = self.data[idx + c] as f32 / max;
            }
        }
        out
    }

    /// Write a pixel from normalized floats. Alpha is ignored for RGB images.
    ///
    /// Integer images round and clamp to the sample range.
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        let channels = self.format.channels();
        let idx = (y as usize * self.width as usize + x as usize) * channels;
        if self.is_float {
            for (c, value) in rgba.iter().enumerate().take(channels) {
                self.data[idx + c] = half::f16::from_f32(*value).to_bits();
            }
        } else {
            let max = self.max_value();
            for (c, value) in rgba.iter().enumerate().take(channels) {
                self.data[idx + c] = (value * max).round().clamp(0.0, max) as u16;
            }
        }
    }
}

// ============================================================================
// Gain map entity
// ============================================================================

/// How far a gain map has been consumed during decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainMapState {
    /// No gain map metadata was read.
    NotParsed,
    /// Metadata is available, pixels are not.
    MetadataParsed,
    /// Metadata and pixels are available.
    PixelsDecoded,
}

/// A gain map: metadata, optional pixels and a description of the alternate
/// rendition it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct GainMap {
    /// Gain map pixels; `None` until decoded or attached.
    pub image: Option<Image>,
    /// Exact gain map metadata.
    pub metadata: GainMapMetadata,
    /// Color primaries of the alternate rendition.
    pub alt_color_primaries: ColorPrimaries,
    /// Transfer characteristics of the alternate rendition.
    pub alt_transfer_characteristics: TransferCharacteristics,
    /// Matrix coefficients of the alternate rendition.
    pub alt_matrix_coefficients: MatrixCoefficients,
    /// Sample range of the alternate rendition.
    pub alt_full_range: bool,
    /// Bit depth of the alternate rendition, 0 if unknown.
    pub alt_depth: u8,
    /// Plane count of the alternate rendition, 0 if unknown.
    pub alt_plane_count: u8,
    /// Content light level of the alternate rendition.
    pub alt_clli: Option<ContentLightLevel>,
}

impl Default for GainMap {
    fn default() -> Self {
        Self::new()
    }
}

impl GainMap {
    /// Create an empty gain map with default metadata.
    pub fn new() -> Self {
        Self {
            image: None,
            metadata: GainMapMetadata::default(),
            alt_color_primaries: ColorPrimaries::Unspecified,
            alt_transfer_characteristics: TransferCharacteristics::Unspecified,
            alt_matrix_coefficients: MatrixCoefficients::Unspecified,
            alt_full_range: true,
            alt_depth: 0,
            alt_plane_count: 0,
            alt_clli: None,
        }
    }

    /// Gain map pixels, or `None` when only metadata was read.
    pub fn pixels(&self) -> Option<&Image> {
        self.image.as_ref().filter(|img| img.has_pixels())
    }

    /// Current consumption state.
    pub fn state(&self) -> GainMapState {
        if self.pixels().is_some() {
            GainMapState::PixelsDecoded
        } else {
            GainMapState::MetadataParsed
        }
    }

    /// True when both gain maps describe the same alternate rendition.
    pub fn same_alt_description(&self, other: &GainMap) -> bool {
        self.alt_color_primaries == other.alt_color_primaries
            && self.alt_transfer_characteristics == other.alt_transfer_characteristics
            && self.alt_matrix_coefficients == other.alt_matrix_coefficients
            && self.alt_full_range == other.alt_full_range
            && self.alt_depth == other.alt_depth
            && self.alt_plane_count == other.alt_plane_count
            && self.alt_clli == other.alt_clli
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_points_roundtrip() {
        for code in 0..=20u16 {
            assert_eq!(ColorPrimaries::from_code(code).code(), code);
            assert_eq!(TransferCharacteristics::from_code(code).code(), code);
            assert_eq!(MatrixCoefficients::from_code(code).code(), code);
        }
        assert_eq!(TransferCharacteristics::from_code(16), TransferCharacteristics::Pq);
        assert!(TransferCharacteristics::Hlg.is_hdr());
        assert!(!TransferCharacteristics::Srgb.is_hdr());
    }

    #[test]
    fn test_image_dimension_limits() {
        assert!(matches!(
            Image::new(0, 10, 8, YuvFormat::Yuv420),
            Err(Error::InvalidDimensions(0, 10))
        ));
        assert!(matches!(
            Image::new(limits::MAX_IMAGE_DIMENSION + 1, 1, 8, YuvFormat::Yuv420),
            Err(Error::LimitExceeded(_))
        ));
        assert!(matches!(
            Image::new(16, 16, 9, YuvFormat::Yuv420),
            Err(Error::UnsupportedDepth(9))
        ));
    }

    #[test]
    fn test_allocate_planes_subsampling() {
        let mut img = Image::new(5, 3, 10, YuvFormat::Yuv420).unwrap();
        assert!(!img.has_pixels());
        img.allocate_planes().unwrap();
        assert_eq!(img.planes.len(), 3);
        assert_eq!((img.planes[1].width, img.planes[1].height), (3, 2));
        img.validate_planes().unwrap();
        assert_eq!(img.max_sample_value(), 1023);

        let mut mono = Image::new(5, 3, 8, YuvFormat::Yuv400).unwrap();
        mono.allocate_planes().unwrap();
        assert_eq!(mono.planes.len(), 1);
    }

    #[test]
    fn test_validate_planes_without_pixels() {
        let img = Image::new(4, 4, 8, YuvFormat::Yuv444).unwrap();
        let err = img.validate_planes().unwrap_err();
        assert!(matches!(err, Error::NoContent(_)), "{err}");
    }

    #[test]
    fn test_rgb_image_float_requires_depth_16() {
        assert!(RgbImage::new(2, 2, 10, RgbFormat::Rgb, true).is_err());
        assert!(RgbImage::new(2, 2, 16, RgbFormat::Rgb, true).is_ok());
    }

    #[test]
    fn test_rgb_image_pixel_roundtrip() {
        let mut img = RgbImage::new(2, 1, 10, RgbFormat::Rgba, false).unwrap();
        img.set_pixel(1, 0, [1.0, 0.5, 0.0, 1.5]);
        let px = img.pixel(1, 0);
        assert_eq!(img.data[4..8], [1023, 512, 0, 1023]);
        assert!((px[1] - 512.0 / 1023.0).abs() < 1e-6);

        let mut float = RgbImage::new(1, 1, 16, RgbFormat::Rgb, true).unwrap();
        float.set_pixel(0, 0, [4.5, 0.25, -1.0, 0.0]);
        assert_eq!(float.pixel(0, 0), [4.5, 0.25, -1.0, 1.0]);
    }

    #[test]
    fn test_gain_map_state() {
        let mut img = Image::new(4, 4, 8, YuvFormat::Yuv420).unwrap();
        assert_eq!(img.gain_map_state(), GainMapState::NotParsed);

        let mut gm = GainMap::new();
        gm.image = Some(Image::new(2, 2, 8, YuvFormat::Yuv400).unwrap());
        assert!(gm.pixels().is_none());
        img.gain_map = Some(Box::new(gm));
        assert_eq!(img.gain_map_state(), GainMapState::MetadataParsed);

        if let Some(gm) = img.gain_map.as_mut() {
            if let Some(gm_img) = gm.image.as_mut() {
                gm_img.allocate_planes().unwrap();
            }
        }
        assert_eq!(img.gain_map_state(), GainMapState::PixelsDecoded);
    }
}
