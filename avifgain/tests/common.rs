//! Common test utilities: a lossless stand-in codec and synthetic images.
//!
//! The raw codec stores planes verbatim, so every pixel that goes into the
//! encoder comes back out of the decoder. That lets the tests check the
//! container, grid and gain map plumbing exactly, without an AV1 library.

#![allow(dead_code)]

use avifgain::codec::{Av1Decoder, Av1Encoder, Category, DecodeSample, EncodedSample};
use avifgain::color::transfer::srgb_eotf;
use avifgain::color::yuv::rgb_to_yuv;
use avifgain::stream::{StreamReader, StreamWriter};
use avifgain::{
    ColorPrimaries, Error, GainMap, Image, MatrixCoefficients, Plane, Result, RgbFormat, RgbImage,
    TransferCharacteristics, YuvFormat,
};

// ============================================================================
// Raw codec
// ============================================================================

/// Lossless codec that serializes planes as 16-bit samples.
#[derive(Default)]
pub struct RawCodec {
    /// Categories passed to `encode`, in call order.
    pub encoded: Vec<Category>,
    /// Categories passed to `decode`, in call order.
    pub decoded: Vec<Category>,
    /// `av1C` payload to report for every sample, instead of letting the
    /// container derive one.
    pub av1c: Option<Vec<u8>>,
}

impl RawCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn format_code(format: YuvFormat) -> u8 {
    match format {
        YuvFormat::Yuv444 => 0,
        YuvFormat::Yuv422 => 1,
        YuvFormat::Yuv420 => 2,
        YuvFormat::Yuv400 => 3,
    }
}

fn format_from_code(code: u8) -> Result<YuvFormat> {
    match code {
        0 => Ok(YuvFormat::Yuv444),
        1 => Ok(YuvFormat::Yuv422),
        2 => Ok(YuvFormat::Yuv420),
        3 => Ok(YuvFormat::Yuv400),
        _ => Err(Error::DecodeError(format!("bad format code {}", code))),
    }
}

impl Av1Encoder for RawCodec {
    fn encode(&mut self, image: &Image, category: Category) -> Result<EncodedSample> {
        self.encoded.push(category);
        image.validate_planes()?;
        let mut w = StreamWriter::new();
        w.write_u32(image.width)?;
        w.write_u32(image.height)?;
        w.write_u8(image.depth)?;
        w.write_u8(format_code(image.yuv_format))?;
        for plane in &image.planes {
            for &sample in &plane.data {
                w.write_u16(sample)?;
            }
        }
        Ok(EncodedSample {
            data: w.finish_write(),
            keyframe: true,
            av1c: self.av1c.clone(),
        })
    }
}

impl Av1Decoder for RawCodec {
    fn decode(&mut self, sample: &DecodeSample<'_>, category: Category) -> Result<Image> {
        self.decoded.push(category);
        let mut r = StreamReader::new(sample.data, "raw sample");
        let width = r.read_u32()?;
        let height = r.read_u32()?;
        let depth = r.read_u8()?;
        let format = format_from_code(r.read_u8()?)?;
        let mut image = Image::new(width, height, depth, format)?;
        image.allocate_planes()?;
        for plane in &mut image.planes {
            for sample in &mut plane.data {
                *sample = r.read_u16()?;
            }
        }
        Ok(image)
    }
}

// ============================================================================
// Planar images
// ============================================================================

/// Create a planar image whose samples vary with position and plane.
pub fn create_yuv_pattern(width: u32, height: u32, depth: u8, format: YuvFormat) -> Image {
    let mut image = Image::new(width, height, depth, format).unwrap();
    image.color_primaries = ColorPrimaries::Bt709;
    image.transfer_characteristics = TransferCharacteristics::Srgb;
    image.matrix_coefficients = MatrixCoefficients::Bt709;
    image.allocate_planes().unwrap();
    let max = image.max_sample_value() as u32;
    for (index, plane) in image.planes.iter_mut().enumerate() {
        for y in 0..plane.height {
            for x in 0..plane.width {
                let value = (x * 7 + y * 13 + index as u32 * 101) % (max + 1);
                plane.set(x, y, value as u16);
            }
        }
    }
    image
}

/// Add an alpha plane with a horizontal ramp.
pub fn add_alpha_ramp(image: &mut Image) {
    image.allocate_alpha().unwrap();
    let max = image.max_sample_value() as u32;
    let width = image.width;
    if let Some(alpha) = image.alpha.as_mut() {
        for y in 0..alpha.height {
            for x in 0..alpha.width {
                alpha.set(x, y, (x * max / (width - 1).max(1)) as u16);
            }
        }
    }
}

/// Create a single-channel gain map with a diagonal ramp and simple
/// metadata: gains from 0 to 2 stops, SDR base, 2 stops of alternate
/// headroom.
pub fn create_gain_map(width: u32, height: u32, depth: u8) -> GainMap {
    use avifgain::{Fraction, GainMapMetadata, UFraction};

    let mut image = create_yuv_pattern(width, height, depth, YuvFormat::Yuv400);
    image.color_primaries = ColorPrimaries::Unspecified;
    image.transfer_characteristics = TransferCharacteristics::Unspecified;
    image.matrix_coefficients = MatrixCoefficients::Unspecified;

    let mut gain_map = GainMap::new();
    gain_map.image = Some(image);
    gain_map.metadata = GainMapMetadata {
        gain_map_min: [Fraction::new(0, 1); 3],
        gain_map_max: [Fraction::new(2, 1); 3],
        gain_map_gamma: [UFraction::new(1, 1); 3],
        base_offset: [Fraction::new(1, 64); 3],
        alternate_offset: [Fraction::new(1, 64); 3],
        base_hdr_headroom: UFraction::new(0, 1),
        alternate_hdr_headroom: UFraction::new(2, 1),
        use_base_color_space: true,
        backward_direction: false,
    };
    gain_map.alt_color_primaries = ColorPrimaries::Bt2020;
    gain_map.alt_transfer_characteristics = TransferCharacteristics::Pq;
    gain_map.alt_matrix_coefficients = MatrixCoefficients::Bt2020Ncl;
    gain_map.alt_full_range = false;
    gain_map.alt_depth = 10;
    gain_map.alt_plane_count = 3;
    gain_map.alt_clli = Some(avifgain::ContentLightLevel {
        max_cll: 812,
        max_pall: 203,
    });
    gain_map
}

/// Copy the `width` x `height` region at `(x0, y0)` out of `image`,
/// including chroma, alpha and color description.
pub fn crop(image: &Image, x0: u32, y0: u32, width: u32, height: u32) -> Image {
    let mut out = Image::new(width, height, image.depth, image.yuv_format).unwrap();
    out.full_range = image.full_range;
    out.color_primaries = image.color_primaries;
    out.transfer_characteristics = image.transfer_characteristics;
    out.matrix_coefficients = image.matrix_coefficients;
    out.clli = image.clli;
    out.allocate_planes().unwrap();
    let (shift_x, shift_y) = image.yuv_format.chroma_shift();
    for (index, (dst, src)) in out.planes.iter_mut().zip(&image.planes).enumerate() {
        let (sx, sy) = if index == 0 { (0, 0) } else { (shift_x, shift_y) };
        copy_region(src, dst, x0 >> sx, y0 >> sy);
    }
    if let Some(alpha) = &image.alpha {
        out.allocate_alpha().unwrap();
        copy_region(alpha, out.alpha.as_mut().unwrap(), x0, y0);
    }
    out
}

fn copy_region(src: &Plane, dst: &mut Plane, x0: u32, y0: u32) {
    for y in 0..dst.height {
        for x in 0..dst.width {
            dst.set(x, y, src.get(x0 + x, y0 + y));
        }
    }
}

/// Split `image` into row-major cells of `tile_w` x `tile_h`; the last
/// column and row take what is left.
pub fn split_into_cells(image: &Image, tile_w: u32, tile_h: u32) -> (Vec<Image>, u32, u32) {
    let columns = image.width.div_ceil(tile_w);
    let rows = image.height.div_ceil(tile_h);
    let mut cells = Vec::new();
    for row in 0..rows {
        for col in 0..columns {
            let (x0, y0) = (col * tile_w, row * tile_h);
            let w = tile_w.min(image.width - x0);
            let h = tile_h.min(image.height - y0);
            cells.push(crop(image, x0, y0, w, h));
        }
    }
    (cells, columns, rows)
}

// ============================================================================
// RGB renditions
// ============================================================================

/// SDR base rendition: a warm horizontal gradient in sRGB.
pub fn create_sdr_gradient(width: u32, height: u32, depth: u8) -> RgbImage {
    let mut image = RgbImage::new(width, height, depth, RgbFormat::Rgb, false).unwrap();
    for y in 0..height {
        for x in 0..width {
            let t = x as f32 / (width - 1).max(1) as f32;
            image.set_pixel(x, y, [t, t * 0.9, t * 0.8, 1.0]);
        }
    }
    image
}

/// HDR alternate rendition of [`create_sdr_gradient`]: the linear base
/// boosted by up to 4x from top to bottom, stored as linear half floats.
pub fn create_hdr_alternate(sdr: &RgbImage) -> RgbImage {
    let mut image = RgbImage::new(sdr.width, sdr.height, 16, RgbFormat::Rgb, true).unwrap();
    image.transfer_characteristics = TransferCharacteristics::Linear;
    for y in 0..sdr.height {
        let boost = 1.0 + 3.0 * y as f32 / (sdr.height - 1).max(1) as f32;
        for x in 0..sdr.width {
            let p = sdr.pixel(x, y);
            let linear = [srgb_eotf(p[0]), srgb_eotf(p[1]), srgb_eotf(p[2])];
            image.set_pixel(
                x,
                y,
                [linear[0] * boost, linear[1] * boost, linear[2] * boost, 1.0],
            );
        }
    }
    image
}

/// Convert an RGB rendition to a full range BT.709 planar image.
pub fn to_planar(rgb: &RgbImage, depth: u8, format: YuvFormat) -> Image {
    let mut image = Image::new(rgb.width, rgb.height, depth, format).unwrap();
    image.color_primaries = rgb.color_primaries;
    image.transfer_characteristics = rgb.transfer_characteristics;
    image.matrix_coefficients = MatrixCoefficients::Bt709;
    image.full_range = true;
    rgb_to_yuv(rgb, &mut image).unwrap();
    image
}

/// PSNR over the RGB channels, with `peak` as the signal maximum.
pub fn psnr(a: &RgbImage, b: &RgbImage, peak: f64) -> f64 {
    assert_eq!((a.width, a.height), (b.width, b.height));
    let mut sum = 0.0f64;
    for y in 0..a.height {
        for x in 0..a.width {
            let pa = a.pixel(x, y);
            let pb = b.pixel(x, y);
            for c in 0..3 {
                let d = (pa[c] - pb[c]) as f64;
                sum += d * d;
            }
        }
    }
    let mse = sum / (a.width as f64 * a.height as f64 * 3.0);
    if mse == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (peak * peak / mse).log10()
}
