//! Gain map authoring from a base image and an alternate rendition.

use alloc::format;
use alloc::vec::Vec;

use super::stats::find_min_max_without_outliers;
use super::LinearReader;
use crate::color::gamut::{conversion_matrix, luma_coefficients, luminance};
use crate::color::transfer::SDR_WHITE_NITS;
use crate::metadata::GainMapMetadataDouble;
use crate::types::{
    ColorPrimaries, ContentLightLevel, Error, GainMap, Image, MatrixCoefficients, Result, RgbImage,
    TransferCharacteristics, YuvFormat,
};

const EPSILON: f32 = 1e-10;

/// Configuration for gain map computation.
#[derive(Debug, Clone)]
pub struct GainMapConfig {
    /// Bit depth of the gain map image (8, 10 or 12).
    pub depth: u8,
    /// Use a per-channel (RGB) gain map instead of a single luminance channel.
    pub multi_channel: bool,
    /// Gamma applied to the normalized gain before quantization.
    pub gamma: f32,
    /// Offset added to base linear values.
    pub base_offset: f32,
    /// Offset added to alternate linear values.
    pub alternate_offset: f32,
    /// Downscale factor (1 = same size as the image, 4 = quarter size).
    pub scale_factor: u8,
}

impl Default for GainMapConfig {
    fn default() -> Self {
        Self {
            depth: 8,
            multi_channel: false,
            gamma: 1.0,
            base_offset: 1.0 / 64.0,
            alternate_offset: 1.0 / 64.0,
            scale_factor: 1,
        }
    }
}

impl GainMapConfig {
    /// Set the gain map bit depth.
    pub fn with_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    /// Choose between an RGB and a luminance gain map.
    pub fn with_multi_channel(mut self, multi_channel: bool) -> Self {
        self.multi_channel = multi_channel;
        self
    }

    /// Set the encoding gamma.
    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    /// Set the base and alternate offsets.
    pub fn with_offsets(mut self, base_offset: f32, alternate_offset: f32) -> Self {
        self.base_offset = base_offset;
        self.alternate_offset = alternate_offset;
        self
    }

    /// Set the downscale factor.
    pub fn with_scale_factor(mut self, scale_factor: u8) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.depth, 8 | 10 | 12) {
            return Err(Error::UnsupportedDepth(self.depth as u32));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "gain map gamma must be positive, got {}",
                self.gamma
            )));
        }
        if !self.base_offset.is_finite() || !self.alternate_offset.is_finite() {
            return Err(Error::InvalidArgument("gain map offsets must be finite".into()));
        }
        if self.scale_factor == 0 {
            return Err(Error::InvalidArgument("scale factor must be at least 1".into()));
        }
        Ok(())
    }
}

/// Peak and average-of-pixel-max linear light of one rendition.
#[derive(Default)]
struct LightStats {
    peak: f32,
    sum: f64,
}

impl LightStats {
    fn add(&mut self, rgb: [f32; 3]) {
        let m = rgb[0].max(rgb[1]).max(rgb[2]).max(0.0);
        self.peak = self.peak.max(m);
        self.sum += m as f64;
    }

    fn headroom(&self) -> f64 {
        (self.peak.max(1.0) as f64).log2()
    }

    fn clli(&self, count: usize) -> ContentLightLevel {
        let nits = |v: f64| (v * SDR_WHITE_NITS as f64).round().min(u16::MAX as f64) as u16;
        ContentLightLevel {
            max_cll: nits(self.peak as f64),
            max_pall: nits(self.sum / count.max(1) as f64),
        }
    }
}

/// Compute a gain map that maps `base` to `alternate`.
///
/// Both images must have the same size. The alternate rendition is converted
/// into the base primaries before the ratio is taken. The result carries the
/// gain map pixels, exact metadata and a description of the alternate
/// rendition.
pub fn compute_gainmap(base: &RgbImage, alternate: &RgbImage, config: &GainMapConfig) -> Result<GainMap> {
    config.validate()?;
    if base.width != alternate.width || base.height != alternate.height {
        return Err(Error::DimensionMismatch {
            base_w: base.width,
            base_h: base.height,
            other_w: alternate.width,
            other_h: alternate.height,
        });
    }

    let (width, height) = (base.width, base.height);
    let channels = if config.multi_channel { 3 } else { 1 };
    let scale = config.scale_factor as u32;
    let gm_width = width.div_ceil(scale);
    let gm_height = height.div_ceil(scale);
    let cell_count = gm_width as usize * gm_height as usize;

    let base_reader = LinearReader::new(base)?;
    let alt_reader = LinearReader::new(alternate)?;
    let alt_to_base = conversion_matrix(alternate.color_primaries, base.color_primaries)?;
    let luma = luma_coefficients(base.color_primaries)?;

    // Log2 ratios summed per gain map cell, per channel.
    let mut sums = crate::types::try_alloc_zeroed::<f32>(cell_count * channels)?;
    let mut counts = crate::types::try_alloc_zeroed::<u32>(cell_count)?;
    let mut base_light = LightStats::default();
    let mut alt_light = LightStats::default();

    for y in 0..height {
        for x in 0..width {
            let (base_rgb, _) = base_reader.read(base, x, y);
            let (alt_rgb, _) = alt_reader.read(alternate, x, y);
            let alt_rgb = match &alt_to_base {
                Some(m) => m.transform(alt_rgb),
                None => alt_rgb,
            };
            base_light.add(base_rgb);
            alt_light.add(alt_rgb);

            let cell = (y / scale) as usize * gm_width as usize + (x / scale) as usize;
            counts[cell] += 1;
            if channels == 1 {
                let b = luminance(base_rgb, luma);
                let a = luminance(alt_rgb, luma);
                sums[cell] += log2_ratio(b, a, config);
            } else {
                for c in 0..3 {
                    sums[cell * 3 + c] += log2_ratio(base_rgb[c], alt_rgb[c], config);
                }
            }
        }
    }

    // The map always stores log2(HDR / SDR). When the base is the HDR
    // rendition the ratio is inverted and the weight is negated on apply.
    let base_hdr_headroom = base_light.headroom();
    let alternate_hdr_headroom = alt_light.headroom();
    let backward_direction = base_hdr_headroom > alternate_hdr_headroom;
    let sign = if backward_direction { -1.0 } else { 1.0 };

    let mut per_channel: Vec<Vec<f32>> = Vec::with_capacity(channels);
    for c in 0..channels {
        let mut values = crate::types::try_alloc_zeroed::<f32>(cell_count)?;
        for (cell, value) in values.iter_mut().enumerate() {
            *value = sign * sums[cell * channels + c] / counts[cell] as f32;
        }
        per_channel.push(values);
    }

    let mut metadata = GainMapMetadataDouble {
        base_hdr_headroom,
        alternate_hdr_headroom,
        gain_map_gamma: [config.gamma as f64; 3],
        base_offset: [config.base_offset as f64; 3],
        alternate_offset: [config.alternate_offset as f64; 3],
        use_base_color_space: true,
        backward_direction,
        ..Default::default()
    };

    let yuv_format = if channels == 1 {
        YuvFormat::Yuv400
    } else {
        YuvFormat::Yuv444
    };
    let mut image = Image::new(gm_width, gm_height, config.depth, yuv_format)?;
    image.full_range = true;
    image.color_primaries = ColorPrimaries::Unspecified;
    image.transfer_characteristics = TransferCharacteristics::Unspecified;
    // Identity requires 4:4:4; a single plane has no matrix to speak of.
    image.matrix_coefficients = if channels == 1 {
        MatrixCoefficients::Unspecified
    } else {
        MatrixCoefficients::Identity
    };
    image.allocate_planes()?;
    let max_sample = image.max_sample_value() as f32;

    for (c, values) in per_channel.iter().enumerate() {
        let (min, max) = find_min_max_without_outliers(values)?;
        let range = max - min;
        // Identity matrix planes are ordered G, B, R.
        let plane = match (channels, c) {
            (1, _) => 0,
            (_, 0) => 2,
            (_, 1) => 0,
            _ => 1,
        };
        for (i, &v) in values.iter().enumerate() {
            let normalized = if range > 0.0 {
                ((v.clamp(min, max) - min) / range).powf(config.gamma)
            } else {
                0.0
            };
            image.planes[plane].data[i] = (normalized * max_sample).round() as u16;
        }
        if channels == 1 {
            metadata.gain_map_min = [min as f64; 3];
            metadata.gain_map_max = [max as f64; 3];
        } else {
            metadata.gain_map_min[c] = min as f64;
            metadata.gain_map_max[c] = max as f64;
        }
    }

    tracing::debug!(
        gm_width,
        gm_height,
        channels,
        base_headroom = metadata.base_hdr_headroom,
        alternate_headroom = metadata.alternate_hdr_headroom,
        backward_direction,
        "computed gain map"
    );

    let pixel_count = width as usize * height as usize;
    let mut gain_map = GainMap::new();
    gain_map.metadata = metadata.to_fractions()?;
    gain_map.image = Some(image);
    gain_map.alt_color_primaries = alternate.color_primaries;
    gain_map.alt_transfer_characteristics = alternate.transfer_characteristics;
    gain_map.alt_matrix_coefficients = MatrixCoefficients::Unspecified;
    gain_map.alt_full_range = true;
    gain_map.alt_depth = alternate.depth;
    gain_map.alt_plane_count = 3;
    gain_map.alt_clli = Some(alt_light.clli(pixel_count));
    Ok(gain_map)
}

#[inline]
fn log2_ratio(base: f32, alternate: f32, config: &GainMapConfig) -> f32 {
    let numerator = (alternate + config.alternate_offset).max(0.0);
    let denominator = (base + config.base_offset).max(EPSILON);
    (numerator / denominator).max(EPSILON).log2()
}
