//! Gain map authoring, range estimation and tone mapping.
//!
//! A gain map stores, per pixel, the log2 ratio between an alternate
//! rendition and the base image. Applying it with a weight derived from the
//! display headroom reconstructs anything between the two renditions.

pub mod apply;
pub mod compute;
pub mod stats;

pub use apply::{apply_gainmap, compute_weight};
pub use compute::{compute_gainmap, GainMapConfig};
pub use stats::find_min_max_without_outliers;

use crate::color::transfer::{LinearLut, TransferCurve};
use crate::types::{Result, RgbImage};

/// Reads RGB pixels as extended SDR linear light.
pub(crate) struct LinearReader {
    curve: TransferCurve,
    lut: Option<LinearLut>,
}

impl LinearReader {
    pub(crate) fn new(image: &RgbImage) -> Result<Self> {
        let curve = TransferCurve::from_characteristics(image.transfer_characteristics);
        let lut = if image.is_float {
            None
        } else {
            Some(LinearLut::new(curve, image.depth)?)
        };
        Ok(Self { curve, lut })
    }

    /// Linear RGB and normalized alpha at `(x, y)`.
    #[inline]
    pub(crate) fn read(&self, image: &RgbImage, x: u32, y: u32) -> ([f32; 3], f32) {
        let p = image.pixel(x, y);
        let rgb = match &self.lut {
            Some(lut) => {
                let max = image.max_value();
                core::array::from_fn(|c| lut.lookup((p[c] * max).round() as u16))
            }
            None => core::array::from_fn(|c| self.curve.to_linear(p[c])),
        };
        (rgb, p[3])
    }
}
