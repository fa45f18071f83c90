//! Gain map application: tone mapping a base image to a target headroom.

use alloc::format;
use alloc::vec::Vec;

use super::LinearReader;
use crate::color::gamut::conversion_matrix;
use crate::color::transfer::{TransferCurve, SDR_WHITE_NITS};
use crate::color::yuv::YuvReader;
use crate::color::Matrix3x3;
use crate::metadata::GainMapMetadataDouble;
use crate::types::{ColorPrimaries, ContentLightLevel, Error, GainMap, Image, Result, RgbImage};

/// Weight of the gain map at display headroom `hdr_headroom` (log2 stops).
///
/// Interpolates between the base headroom (weight 0) and the alternate
/// headroom (weight 1). The result is negated for backward-direction gain
/// maps and is 0 when both headrooms are equal.
pub fn compute_weight(hdr_headroom: f32, metadata: &GainMapMetadataDouble) -> f32 {
    let base = metadata.base_hdr_headroom as f32;
    let alternate = metadata.alternate_hdr_headroom as f32;
    if base == alternate {
        return 0.0;
    }
    let w = ((hdr_headroom - base) / (alternate - base)).clamp(0.0, 1.0);
    if metadata.backward_direction {
        -w
    } else {
        w
    }
}

/// Per-channel constants derived from metadata.
#[derive(Debug, Clone, Copy)]
struct ChannelParams {
    min: f32,
    max: f32,
    inv_gamma: f32,
    base_offset: f32,
    alternate_offset: f32,
}

impl ChannelParams {
    fn from_metadata(md: &GainMapMetadataDouble) -> [Self; 3] {
        core::array::from_fn(|c| Self {
            min: md.gain_map_min[c] as f32,
            max: md.gain_map_max[c] as f32,
            inv_gamma: 1.0 / md.gain_map_gamma[c] as f32,
            base_offset: md.base_offset[c] as f32,
            alternate_offset: md.alternate_offset[c] as f32,
        })
    }

    #[inline]
    fn apply(&self, base_linear: f32, gain_sample: f32, weight: f32) -> f32 {
        let g = if self.inv_gamma == 1.0 {
            gain_sample
        } else {
            gain_sample.powf(self.inv_gamma)
        };
        let gain_log2 = self.min + (self.max - self.min) * g;
        (base_linear + self.base_offset) * (gain_log2 * weight).exp2() - self.alternate_offset
    }
}

/// Gain map samples normalized to `[0, 1]`, with bilinear resampling.
struct GainMapSampler {
    width: u32,
    height: u32,
    scale_x: f32,
    scale_y: f32,
    values: Vec<[f32; 3]>,
}

impl GainMapSampler {
    fn new(image: &Image, target_width: u32, target_height: u32) -> Result<Self> {
        let reader = YuvReader::new(image)?;
        let mut values = Vec::new();
        let len = image.width as usize * image.height as usize;
        values
            .try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailed(len * 12))?;
        for y in 0..image.height {
            for x in 0..image.width {
                let p = reader.pixel(x, y);
                values.push([p[0].clamp(0.0, 1.0), p[1].clamp(0.0, 1.0), p[2].clamp(0.0, 1.0)]);
            }
        }
        Ok(Self {
            width: image.width,
            height: image.height,
            scale_x: image.width as f32 / target_width as f32,
            scale_y: image.height as f32 / target_height as f32,
            values,
        })
    }

    #[inline]
    fn at(&self, x: u32, y: u32) -> [f32; 3] {
        self.values[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    fn sample(&self, x: u32, y: u32) -> [f32; 3] {
        if self.scale_x == 1.0 && self.scale_y == 1.0 {
            return self.at(x, y);
        }
        // Align pixel centers.
        let gx = ((x as f32 + 0.5) * self.scale_x - 0.5).max(0.0);
        let gy = ((y as f32 + 0.5) * self.scale_y - 0.5).max(0.0);
        let x0 = (gx.floor() as u32).min(self.width - 1);
        let y0 = (gy.floor() as u32).min(self.height - 1);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = gx - x0 as f32;
        let fy = gy - y0 as f32;
        let (v00, v10, v01, v11) = (self.at(x0, y0), self.at(x1, y0), self.at(x0, y1), self.at(x1, y1));
        core::array::from_fn(|c| bilinear(v00[c], v10[c], v01[c], v11[c], fx, fy))
    }
}

/// Bilinear interpolation.
#[inline(always)]
fn bilinear(v00: f32, v10: f32, v01: f32, v11: f32, fx: f32, fy: f32) -> f32 {
    let top = v00 * (1.0 - fx) + v10 * fx;
    let bottom = v01 * (1.0 - fx) + v11 * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Accumulates content light level over linear output pixels.
#[derive(Default)]
struct ClliAccumulator {
    max: f32,
    sum_of_pixel_max: f64,
    count: u64,
}

impl ClliAccumulator {
    #[inline]
    fn add(&mut self, rgb: [f32; 3]) {
        let pixel_max = rgb[0].max(rgb[1]).max(rgb[2]).max(0.0);
        self.max = self.max.max(pixel_max);
        self.sum_of_pixel_max += pixel_max as f64;
        self.count += 1;
    }

    fn finish(&self) -> ContentLightLevel {
        let to_nits = |v: f64| (v * SDR_WHITE_NITS as f64).round().min(u16::MAX as f64) as u16;
        let average = if self.count == 0 {
            0.0
        } else {
            self.sum_of_pixel_max / self.count as f64
        };
        ContentLightLevel {
            max_cll: to_nits(self.max as f64),
            max_pall: to_nits(average),
        }
    }
}

/// Tone map `base` to `hdr_headroom` (log2 stops above SDR white) using
/// `gain_map`, writing into `output`.
///
/// `output` must already be allocated with the size of `base`; its depth,
/// channel layout, sample type, primaries and transfer characteristics select
/// the output encoding. The gain map is resampled when its size differs from
/// the base image. Alpha is carried over from `base`.
///
/// Returns the content light level of the tone-mapped pixels.
pub fn apply_gainmap(
    base: &RgbImage,
    gain_map: &GainMap,
    hdr_headroom: f32,
    output: &mut RgbImage,
) -> Result<ContentLightLevel> {
    if hdr_headroom.is_nan() || hdr_headroom < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "target headroom must be non-negative, got {}",
            hdr_headroom
        )));
    }
    if base.width != output.width || base.height != output.height {
        return Err(Error::DimensionMismatch {
            base_w: base.width,
            base_h: base.height,
            other_w: output.width,
            other_h: output.height,
        });
    }
    let gain_image = gain_map
        .pixels()
        .ok_or_else(|| Error::NoContent("gain map pixels are not available".into()))?;
    gain_map.metadata.validate()?;
    let metadata = gain_map.metadata.to_double()?;

    let weight = compute_weight(hdr_headroom, &metadata);
    let base_reader = LinearReader::new(base)?;

    if weight == 0.0 {
        let same_description = base.color_primaries == output.color_primaries
            && base.transfer_characteristics == output.transfer_characteristics;
        if base.same_layout(output) && same_description {
            tracing::trace!("gain map weight is 0, copying base pixels");
            output.data.copy_from_slice(&base.data);
            let mut clli = ClliAccumulator::default();
            for y in 0..base.height {
                for x in 0..base.width {
                    clli.add(base_reader.read(base, x, y).0);
                }
            }
            return Ok(clli.finish());
        }
        tracing::trace!("gain map weight is 0, converting base pixels");
    }

    let math_primaries = if metadata.use_base_color_space
        || gain_map.alt_color_primaries == ColorPrimaries::Unspecified
    {
        base.color_primaries
    } else {
        gain_map.alt_color_primaries
    };
    let to_math = conversion_matrix(base.color_primaries, math_primaries)?;
    let to_output = conversion_matrix(math_primaries, output.color_primaries)?;

    let params = ChannelParams::from_metadata(&metadata);
    let sampler = if weight == 0.0 {
        None
    } else {
        Some(GainMapSampler::new(gain_image, base.width, base.height)?)
    };
    let out_curve = TransferCurve::from_characteristics(output.transfer_characteristics);
    let unbounded = output.is_float && out_curve.is_unbounded();

    tracing::trace!(
        weight,
        hdr_headroom,
        gain_map_width = gain_image.width,
        gain_map_height = gain_image.height,
        "applying gain map"
    );

    let mut clli = ClliAccumulator::default();
    for y in 0..base.height {
        for x in 0..base.width {
            let (linear, alpha) = base_reader.read(base, x, y);
            let linear = transform(to_math.as_ref(), linear);

            let mapped = match &sampler {
                Some(sampler) => {
                    let g = sampler.sample(x, y);
                    core::array::from_fn(|c| params[c].apply(linear[c], g[c], weight))
                }
                None => linear,
            };

            let mapped = transform(to_output.as_ref(), mapped);
            clli.add(mapped);

            let encoded: [f32; 3] = core::array::from_fn(|c| {
                let v = out_curve.from_linear(mapped[c].max(0.0));
                if unbounded {
                    v.max(0.0)
                } else {
                    v.clamp(0.0, 1.0)
                }
            });
            output.set_pixel(x, y, [encoded[0], encoded[1], encoded[2], alpha]);
        }
    }

    Ok(clli.finish())
}

#[inline]
fn transform(matrix: Option<&Matrix3x3>, rgb: [f32; 3]) -> [f32; 3] {
    match matrix {
        Some(m) => m.transform(rgb),
        None => rgb,
    }
}
