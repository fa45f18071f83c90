//! Gain map metadata in exact (rational) and floating-point form.
//!
//! The exact form is what is stored in files. The floating-point form is what
//! authoring tools and the tone mapper reason in. Conversions go through the
//! fraction engine and fail instead of clamping.

pub mod tmap;

use alloc::format;

use crate::fraction::{Fraction, UFraction};
use crate::types::{Error, Result};

/// Gain map metadata as stored in the container (ISO 21496-1).
///
/// `gain_map_min`/`gain_map_max` and the headrooms are in log2 space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainMapMetadata {
    /// Per-channel log2 of the smallest gain.
    pub gain_map_min: [Fraction; 3],
    /// Per-channel log2 of the largest gain.
    pub gain_map_max: [Fraction; 3],
    /// Per-channel gamma applied to the encoded gain map values.
    pub gain_map_gamma: [UFraction; 3],
    /// Per-channel offset added to base samples.
    pub base_offset: [Fraction; 3],
    /// Per-channel offset added to alternate samples.
    pub alternate_offset: [Fraction; 3],
    /// Headroom of the base rendition, in log2 stops.
    pub base_hdr_headroom: UFraction,
    /// Headroom of the alternate rendition, in log2 stops.
    pub alternate_hdr_headroom: UFraction,
    /// Gain map math happens in the base image's color space.
    pub use_base_color_space: bool,
    /// The base rendition is the HDR one.
    pub backward_direction: bool,
}

impl Default for GainMapMetadata {
    fn default() -> Self {
        Self {
            gain_map_min: [Fraction::new(1, 1); 3],
            gain_map_max: [Fraction::new(1, 1); 3],
            gain_map_gamma: [UFraction::new(1, 1); 3],
            base_offset: [Fraction::new(1, 64); 3],
            alternate_offset: [Fraction::new(1, 64); 3],
            base_hdr_headroom: UFraction::new(0, 1),
            alternate_hdr_headroom: UFraction::new(1, 1),
            use_base_color_space: true,
            backward_direction: false,
        }
    }
}

/// Gain map metadata with plain floating-point fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMapMetadataDouble {
    /// Per-channel log2 of the smallest gain.
    pub gain_map_min: [f64; 3],
    /// Per-channel log2 of the largest gain.
    pub gain_map_max: [f64; 3],
    /// Per-channel gamma; must not be negative.
    pub gain_map_gamma: [f64; 3],
    /// Per-channel offset added to base samples.
    pub base_offset: [f64; 3],
    /// Per-channel offset added to alternate samples.
    pub alternate_offset: [f64; 3],
    /// Headroom of the base rendition, in log2 stops.
    pub base_hdr_headroom: f64,
    /// Headroom of the alternate rendition, in log2 stops.
    pub alternate_hdr_headroom: f64,
    /// Gain map math happens in the base image's color space.
    pub use_base_color_space: bool,
    /// The base rendition is the HDR one.
    pub backward_direction: bool,
}

impl Default for GainMapMetadataDouble {
    fn default() -> Self {
        Self {
            gain_map_min: [0.0; 3],
            gain_map_max: [0.0; 3],
            gain_map_gamma: [1.0; 3],
            base_offset: [1.0 / 64.0; 3],
            alternate_offset: [1.0 / 64.0; 3],
            base_hdr_headroom: 0.0,
            alternate_hdr_headroom: 1.0,
            use_base_color_space: true,
            backward_direction: false,
        }
    }
}

fn field_error(field: &str, channel: Option<usize>, err: Error) -> Error {
    let name = match channel {
        Some(c) => format!("{}[{}]", field, c),
        None => field.into(),
    };
    Error::InvalidMetadata(format!("{}: {}", name, err))
}

impl GainMapMetadata {
    /// Check that the metadata can be used for tone mapping.
    ///
    /// Rejects zero denominators, `max < min`, and zero gamma.
    pub fn validate(&self) -> Result<()> {
        for c in 0..3 {
            if self.gain_map_min[c].denominator == 0
                || self.gain_map_max[c].denominator == 0
                || self.gain_map_gamma[c].denominator == 0
                || self.base_offset[c].denominator == 0
                || self.alternate_offset[c].denominator == 0
            {
                return Err(Error::InvalidMetadata(format!(
                    "channel {} has a zero denominator",
                    c
                )));
            }
            // Cross-multiplied in i64 so no precision is lost.
            let max = self.gain_map_max[c];
            let min = self.gain_map_min[c];
            if (max.numerator as i64) * (min.denominator as i64)
                < (min.numerator as i64) * (max.denominator as i64)
            {
                return Err(Error::InvalidMetadata(format!(
                    "channel {} gain map max {}/{} is less than min {}/{}",
                    c, max.numerator, max.denominator, min.numerator, min.denominator
                )));
            }
            if self.gain_map_gamma[c].numerator == 0 {
                return Err(Error::InvalidMetadata(format!("channel {} gamma is 0", c)));
            }
        }
        if self.base_hdr_headroom.denominator == 0 || self.alternate_hdr_headroom.denominator == 0 {
            return Err(Error::InvalidMetadata("headroom has a zero denominator".into()));
        }
        Ok(())
    }

    /// True when all three channels carry bit-identical values.
    pub fn channels_identical(&self) -> bool {
        (1..3).all(|c| {
            self.gain_map_min[c] == self.gain_map_min[0]
                && self.gain_map_max[c] == self.gain_map_max[0]
                && self.gain_map_gamma[c] == self.gain_map_gamma[0]
                && self.base_offset[c] == self.base_offset[0]
                && self.alternate_offset[c] == self.alternate_offset[0]
        })
    }

    /// Convert to floating point, failing on the first zero denominator.
    pub fn to_double(&self) -> Result<GainMapMetadataDouble> {
        let mut out = GainMapMetadataDouble {
            use_base_color_space: self.use_base_color_space,
            backward_direction: self.backward_direction,
            ..Default::default()
        };
        for c in 0..3 {
            out.gain_map_min[c] = self.gain_map_min[c]
                .to_f64()
                .map_err(|e| field_error("gain_map_min", Some(c), e))?;
            out.gain_map_max[c] = self.gain_map_max[c]
                .to_f64()
                .map_err(|e| field_error("gain_map_max", Some(c), e))?;
            out.gain_map_gamma[c] = self.gain_map_gamma[c]
                .to_f64()
                .map_err(|e| field_error("gain_map_gamma", Some(c), e))?;
            out.base_offset[c] = self.base_offset[c]
                .to_f64()
                .map_err(|e| field_error("base_offset", Some(c), e))?;
            out.alternate_offset[c] = self.alternate_offset[c]
                .to_f64()
                .map_err(|e| field_error("alternate_offset", Some(c), e))?;
        }
        out.base_hdr_headroom = self
            .base_hdr_headroom
            .to_f64()
            .map_err(|e| field_error("base_hdr_headroom", None, e))?;
        out.alternate_hdr_headroom = self
            .alternate_hdr_headroom
            .to_f64()
            .map_err(|e| field_error("alternate_hdr_headroom", None, e))?;
        Ok(out)
    }

    /// Convert from floating point, failing on the first field that has no
    /// fraction representation (for example a negative gamma or headroom).
    pub fn from_double(m: &GainMapMetadataDouble) -> Result<Self> {
        let mut out = Self {
            use_base_color_space: m.use_base_color_space,
            backward_direction: m.backward_direction,
            ..Default::default()
        };
        for c in 0..3 {
            out.gain_map_min[c] = Fraction::from_f64(m.gain_map_min[c])
                .map_err(|e| field_error("gain_map_min", Some(c), e))?;
            out.gain_map_max[c] = Fraction::from_f64(m.gain_map_max[c])
                .map_err(|e| field_error("gain_map_max", Some(c), e))?;
            out.gain_map_gamma[c] = UFraction::from_f64(m.gain_map_gamma[c])
                .map_err(|e| field_error("gain_map_gamma", Some(c), e))?;
            out.base_offset[c] = Fraction::from_f64(m.base_offset[c])
                .map_err(|e| field_error("base_offset", Some(c), e))?;
            out.alternate_offset[c] = Fraction::from_f64(m.alternate_offset[c])
                .map_err(|e| field_error("alternate_offset", Some(c), e))?;
        }
        out.base_hdr_headroom = UFraction::from_f64(m.base_hdr_headroom)
            .map_err(|e| field_error("base_hdr_headroom", None, e))?;
        out.alternate_hdr_headroom = UFraction::from_f64(m.alternate_hdr_headroom)
            .map_err(|e| field_error("alternate_hdr_headroom", None, e))?;
        Ok(out)
    }
}

impl GainMapMetadataDouble {
    /// Convert to the exact form. See [`GainMapMetadata::from_double`].
    pub fn to_fractions(&self) -> Result<GainMapMetadata> {
        GainMapMetadata::from_double(self)
    }
}
