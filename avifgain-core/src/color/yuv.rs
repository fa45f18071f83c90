//! YUV to RGB conversion for planar images.
//!
//! Supports BT.601, BT.709 and BT.2020 (non-constant luminance) matrices and
//! the identity (GBR) matrix, full and limited range, and all four chroma
//! layouts. Chroma is upsampled by nearest neighbour and downsampled by box
//! averaging.

use alloc::format;
use alloc::vec::Vec;

use crate::types::{Error, Image, MatrixCoefficients, Result, RgbImage, YuvFormat};

/// Luma weights for red and blue; green is `1 - kr - kb`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YuvCoefficients {
    /// Red weight.
    pub kr: f32,
    /// Blue weight.
    pub kb: f32,
}

impl YuvCoefficients {
    /// Weights for a matrix, or `None` for the identity matrix.
    pub fn for_matrix(matrix: MatrixCoefficients) -> Option<Self> {
        let (kr, kb) = match matrix {
            MatrixCoefficients::Identity => return None,
            MatrixCoefficients::Bt709 => (0.2126, 0.0722),
            MatrixCoefficients::Bt2020Ncl => (0.2627, 0.0593),
            MatrixCoefficients::Bt601 | MatrixCoefficients::Bt470Bg | MatrixCoefficients::Unspecified => {
                (0.299, 0.114)
            }
            MatrixCoefficients::Other(code) => {
                tracing::warn!(code, "unsupported matrix coefficients, using BT.601");
                (0.299, 0.114)
            }
        };
        Some(Self { kr, kb })
    }

    /// Green weight.
    #[inline]
    pub fn kg(&self) -> f32 {
        1.0 - self.kr - self.kb
    }

    /// Normalized YCbCr (Cb/Cr centered on 0) to RGB.
    #[inline]
    pub fn to_rgb(&self, y: f32, cb: f32, cr: f32) -> [f32; 3] {
        let r = y + 2.0 * (1.0 - self.kr) * cr;
        let b = y + 2.0 * (1.0 - self.kb) * cb;
        let g = (y - self.kr * r - self.kb * b) / self.kg();
        [r, g, b]
    }

    /// RGB to normalized YCbCr.
    #[inline]
    pub fn from_rgb(&self, rgb: [f32; 3]) -> [f32; 3] {
        let y = self.kr * rgb[0] + self.kg() * rgb[1] + self.kb * rgb[2];
        let cb = (rgb[2] - y) / (2.0 * (1.0 - self.kb));
        let cr = (rgb[0] - y) / (2.0 * (1.0 - self.kr));
        [y, cb, cr]
    }
}

/// Offsets and scales mapping integer samples to normalized values.
#[derive(Debug, Clone, Copy)]
struct SampleRange {
    luma_offset: f32,
    luma_scale: f32,
    chroma_offset: f32,
    chroma_scale: f32,
    max: f32,
}

impl SampleRange {
    fn new(depth: u8, full_range: bool) -> Self {
        let max = ((1u32 << depth) - 1) as f32;
        let half = (1u32 << (depth - 1)) as f32;
        if full_range {
            Self {
                luma_offset: 0.0,
                luma_scale: max,
                chroma_offset: half,
                chroma_scale: max,
                max,
            }
        } else {
            let unit = (1u32 << (depth - 8)) as f32;
            Self {
                luma_offset: 16.0 * unit,
                luma_scale: 219.0 * unit,
                chroma_offset: half,
                chroma_scale: 224.0 * unit,
                max,
            }
        }
    }

    #[inline]
    fn luma(&self, sample: u16) -> f32 {
        (sample as f32 - self.luma_offset) / self.luma_scale
    }

    #[inline]
    fn chroma(&self, sample: u16) -> f32 {
        (sample as f32 - self.chroma_offset) / self.chroma_scale
    }

    #[inline]
    fn encode_luma(&self, v: f32) -> u16 {
        (v * self.luma_scale + self.luma_offset).round().clamp(0.0, self.max) as u16
    }

    #[inline]
    fn encode_chroma(&self, v: f32) -> u16 {
        (v * self.chroma_scale + self.chroma_offset).round().clamp(0.0, self.max) as u16
    }
}

/// Per-pixel RGB view over a planar image.
#[derive(Debug)]
pub struct YuvReader<'a> {
    image: &'a Image,
    coefficients: Option<YuvCoefficients>,
    range: SampleRange,
    shift: (u32, u32),
    alpha_max: f32,
}

impl<'a> YuvReader<'a> {
    /// Prepare to read `image`, which must have pixels.
    pub fn new(image: &'a Image) -> Result<Self> {
        image.validate_planes()?;
        let coefficients = YuvCoefficients::for_matrix(image.matrix_coefficients);
        if coefficients.is_none() && image.yuv_format != YuvFormat::Yuv444 && image.yuv_format != YuvFormat::Yuv400
        {
            return Err(Error::UnsupportedFormat(format!(
                "identity matrix requires 4:4:4, got {:?}",
                image.yuv_format
            )));
        }
        Ok(Self {
            image,
            coefficients,
            range: SampleRange::new(image.depth, image.full_range),
            shift: image.yuv_format.chroma_shift(),
            alpha_max: image.max_sample_value() as f32,
        })
    }

    /// Normalized RGBA at `(x, y)`. Alpha reads as 1.0 when absent.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let planes = &self.image.planes;
        let luma = self.range.luma(planes[0].get(x, y));
        let rgb = if self.image.yuv_format == YuvFormat::Yuv400 {
            [luma; 3]
        } else {
            let (cx, cy) = (x >> self.shift.0, y >> self.shift.1);
            let u = planes[1].get(cx, cy);
            let v = planes[2].get(cx, cy);
            match &self.coefficients {
                Some(k) => k.to_rgb(luma, self.range.chroma(u), self.range.chroma(v)),
                // GBR: Y carries green, U blue, V red.
                None => [self.range.luma(v), luma, self.range.luma(u)],
            }
        };
        let alpha = self
            .image
            .alpha
            .as_ref()
            .map_or(1.0, |a| a.get(x, y) as f32 / self.alpha_max);
        [rgb[0], rgb[1], rgb[2], alpha]
    }
}

/// Convert a planar image into an RGB image of the same size.
///
/// The RGB image takes over the color description of `image`.
pub fn yuv_to_rgb(image: &Image, rgb: &mut RgbImage) -> Result<()> {
    if image.width != rgb.width || image.height != rgb.height {
        return Err(Error::DimensionMismatch {
            base_w: image.width,
            base_h: image.height,
            other_w: rgb.width,
            other_h: rgb.height,
        });
    }
    let reader = YuvReader::new(image)?;
    for y in 0..image.height {
        for x in 0..image.width {
            rgb.set_pixel(x, y, reader.pixel(x, y));
        }
    }
    rgb.color_primaries = image.color_primaries;
    rgb.transfer_characteristics = image.transfer_characteristics;
    Ok(())
}

/// Fill the planes of `image` from an RGB image of the same size.
///
/// Uses the depth, range, layout and matrix already set on `image`. An
/// alpha plane is written when the RGB image has alpha.
pub fn rgb_to_yuv(rgb: &RgbImage, image: &mut Image) -> Result<()> {
    if image.width != rgb.width || image.height != rgb.height {
        return Err(Error::DimensionMismatch {
            base_w: image.width,
            base_h: image.height,
            other_w: rgb.width,
            other_h: rgb.height,
        });
    }
    let coefficients = YuvCoefficients::for_matrix(image.matrix_coefficients);
    if coefficients.is_none() && image.yuv_format != YuvFormat::Yuv444 && image.yuv_format != YuvFormat::Yuv400
    {
        return Err(Error::UnsupportedFormat(format!(
            "identity matrix requires 4:4:4, got {:?}",
            image.yuv_format
        )));
    }
    let range = SampleRange::new(image.depth, image.full_range);
    image.allocate_planes()?;
    if rgb.format.has_alpha() {
        image.allocate_alpha()?;
    } else {
        image.alpha = None;
    }

    let (width, height) = (image.width, image.height);
    let alpha_max = image.max_sample_value() as f32;
    let (shift_x, shift_y) = image.yuv_format.chroma_shift();
    let chroma_w = image.planes.get(1).map_or(0, |p| p.width) as usize;
    let mut chroma_sums: Vec<[f32; 3]> = if image.yuv_format == YuvFormat::Yuv400 {
        Vec::new()
    } else {
        let len = image.planes[1].data.len();
        crate::types::try_alloc_zeroed::<[f32; 3]>(len)?
    };

    for y in 0..height {
        for x in 0..width {
            let p = rgb.pixel(x, y);
            let ycc = match &coefficients {
                Some(k) => k.from_rgb([p[0], p[1], p[2]]),
                None => [p[1], p[2], p[0]],
            };
            image.planes[0].set(x, y, range.encode_luma(ycc[0]));
            if !chroma_sums.is_empty() {
                let idx = (y >> shift_y) as usize * chroma_w + (x >> shift_x) as usize;
                let sum = &mut chroma_sums[idx];
                sum[0] += ycc[1];
                sum[1] += ycc[2];
                sum[2] += 1.0;
            }
            if let Some(alpha) = image.alpha.as_mut() {
                alpha.set(x, y, (p[3] * alpha_max).round().clamp(0.0, alpha_max) as u16);
            }
        }
    }

    if !chroma_sums.is_empty() {
        for (i, sum) in chroma_sums.iter().enumerate() {
            let (u, v) = (sum[0] / sum[2], sum[1] / sum[2]);
            let (u, v) = if coefficients.is_some() {
                (range.encode_chroma(u), range.encode_chroma(v))
            } else {
                (range.encode_luma(u), range.encode_luma(v))
            };
            image.planes[1].data[i] = u;
            image.planes[2].data[i] = v;
        }
    }

    image.color_primaries = rgb.color_primaries;
    image.transfer_characteristics = rgb.transfer_characteristics;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RgbFormat;

    fn gradient_rgb(width: u32, height: u32, depth: u8) -> RgbImage {
        let mut rgb = RgbImage::new(width, height, depth, RgbFormat::Rgba, false).unwrap();
        for y in 0..height {
            for x in 0..width {
                let r = x as f32 / (width - 1) as f32;
                let g = y as f32 / (height - 1) as f32;
                rgb.set_pixel(x, y, [r, g, 0.5, 0.75]);
            }
        }
        rgb
    }

    fn max_error(a: &RgbImage, b: &RgbImage) -> f32 {
        let mut err = 0.0f32;
        for y in 0..a.height {
            for x in 0..a.width {
                let (pa, pb) = (a.pixel(x, y), b.pixel(x, y));
                for c in 0..4 {
                    err = err.max((pa[c] - pb[c]).abs());
                }
            }
        }
        err
    }

    fn roundtrip(rgb: &RgbImage, format: YuvFormat, matrix: MatrixCoefficients, full_range: bool, depth: u8) -> RgbImage {
        let mut image = Image::new(rgb.width, rgb.height, depth, format).unwrap();
        image.matrix_coefficients = matrix;
        image.full_range = full_range;
        rgb_to_yuv(rgb, &mut image).unwrap();
        let mut out = RgbImage::new(rgb.width, rgb.height, rgb.depth, rgb.format, false).unwrap();
        yuv_to_rgb(&image, &mut out).unwrap();
        out
    }

    #[test]
    fn test_444_roundtrip_all_matrices() {
        let rgb = gradient_rgb(16, 8, 8);
        for matrix in [
            MatrixCoefficients::Bt601,
            MatrixCoefficients::Bt709,
            MatrixCoefficients::Bt2020Ncl,
            MatrixCoefficients::Identity,
        ] {
            for full_range in [true, false] {
                let out = roundtrip(&rgb, YuvFormat::Yuv444, matrix, full_range, 10);
                let err = max_error(&rgb, &out);
                assert!(err < 2.5 / 255.0, "{:?} full={} error {}", matrix, full_range, err);
            }
        }
    }

    #[test]
    fn test_identity_is_lossless_at_same_depth() {
        let rgb = gradient_rgb(8, 8, 8);
        let out = roundtrip(&rgb, YuvFormat::Yuv444, MatrixCoefficients::Identity, true, 8);
        assert_eq!(rgb.data, out.data);
    }

    #[test]
    fn test_subsampled_flat_color_is_exact() {
        let mut rgb = RgbImage::new(7, 5, 8, RgbFormat::Rgb, false).unwrap();
        for y in 0..5 {
            for x in 0..7 {
                rgb.set_pixel(x, y, [0.2, 0.6, 0.4, 1.0]);
            }
        }
        for format in [YuvFormat::Yuv420, YuvFormat::Yuv422] {
            let out = roundtrip(&rgb, format, MatrixCoefficients::Bt709, true, 10);
            assert!(max_error(&rgb, &out) < 1.5 / 255.0, "{:?}", format);
        }
    }

    #[test]
    fn test_monochrome() {
        let mut rgb = RgbImage::new(4, 4, 8, RgbFormat::Rgb, false).unwrap();
        rgb.set_pixel(1, 1, [1.0, 1.0, 1.0, 1.0]);
        let out = roundtrip(&rgb, YuvFormat::Yuv400, MatrixCoefficients::Bt601, true, 8);
        assert_eq!(out.pixel(1, 1)[..3], [1.0, 1.0, 1.0]);
        assert_eq!(out.pixel(0, 0)[..3], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_limited_range_levels() {
        let range = SampleRange::new(8, false);
        assert_eq!(range.encode_luma(0.0), 16);
        assert_eq!(range.encode_luma(1.0), 235);
        assert_eq!(range.encode_chroma(0.5), 240);
        let range = SampleRange::new(10, false);
        assert_eq!(range.encode_luma(0.0), 64);
        assert_eq!(range.encode_luma(1.0), 940);
    }

    #[test]
    fn test_identity_rejects_subsampling() {
        let rgb = gradient_rgb(4, 4, 8);
        let mut image = Image::new(4, 4, 8, YuvFormat::Yuv420).unwrap();
        image.matrix_coefficients = MatrixCoefficients::Identity;
        assert!(matches!(rgb_to_yuv(&rgb, &mut image), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_reader_requires_pixels() {
        let image = Image::new(4, 4, 8, YuvFormat::Yuv444).unwrap();
        assert!(matches!(YuvReader::new(&image), Err(Error::NoContent(_))));
    }

    #[test]
    fn test_dimension_mismatch() {
        let rgb = gradient_rgb(4, 4, 8);
        let mut image = Image::new(4, 2, 8, YuvFormat::Yuv444).unwrap();
        assert!(matches!(
            rgb_to_yuv(&rgb, &mut image),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
