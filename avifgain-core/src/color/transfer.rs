//! Transfer functions between encoded samples and linear light.
//!
//! Linear values are expressed in "extended SDR" units: 1.0 is SDR reference
//! white (203 cd/m²). SDR curves therefore top out at 1.0, PQ at 10000/203 and
//! HLG at 1000/203 (nominal 1000 cd/m² display).
//!
//! Reference standards:
//! - sRGB: IEC 61966-2-1
//! - BT.709 / BT.601 / BT.2020: ITU-R BT.709-6
//! - PQ: SMPTE ST 2084, ITU-R BT.2100
//! - HLG: ITU-R BT.2100, ARIB STD-B67

#![allow(clippy::excessive_precision)]

use alloc::vec::Vec;

use crate::types::{Result, TransferCharacteristics};

/// SDR reference white in cd/m².
pub const SDR_WHITE_NITS: f32 = 203.0;

/// Peak luminance of PQ content in cd/m².
pub const PQ_MAX_NITS: f32 = 10000.0;

/// Nominal peak luminance of HLG content in cd/m².
pub const HLG_PEAK_NITS: f32 = 1000.0;

// HLG system gamma for a 1000 cd/m² display.
const HLG_SYSTEM_GAMMA: f32 = 1.2;

// ============================================================================
// sRGB (IEC 61966-2-1)
// ============================================================================

/// sRGB OETF: linear `[0,1]` to encoded `[0,1]`.
#[inline]
pub fn srgb_oetf(linear: f32) -> f32 {
    if linear <= 0.0031308 {
        linear * 12.92
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    }
}

/// sRGB EOTF: encoded `[0,1]` to linear `[0,1]`.
#[inline]
pub fn srgb_eotf(encoded: f32) -> f32 {
    if encoded <= 0.04045 {
        encoded / 12.92
    } else {
        ((encoded + 0.055) / 1.055).powf(2.4)
    }
}

// ============================================================================
// BT.709 family and SMPTE 240M
// ============================================================================

/// BT.709 OETF (also BT.601 and BT.2020).
#[inline]
pub fn bt709_oetf(linear: f32) -> f32 {
    if linear < 0.018 {
        linear * 4.5
    } else {
        1.099 * linear.powf(0.45) - 0.099
    }
}

/// Inverse of [`bt709_oetf`].
#[inline]
pub fn bt709_oetf_inv(encoded: f32) -> f32 {
    if encoded < 0.081 {
        encoded / 4.5
    } else {
        ((encoded + 0.099) / 1.099).powf(1.0 / 0.45)
    }
}

/// SMPTE 240M OETF.
#[inline]
pub fn smpte240_oetf(linear: f32) -> f32 {
    if linear < 0.0228 {
        linear * 4.0
    } else {
        1.1115 * linear.powf(0.45) - 0.1115
    }
}

/// Inverse of [`smpte240_oetf`].
#[inline]
pub fn smpte240_oetf_inv(encoded: f32) -> f32 {
    if encoded < 0.0912 {
        encoded / 4.0
    } else {
        ((encoded + 0.1115) / 1.1115).powf(1.0 / 0.45)
    }
}

// ============================================================================
// PQ (SMPTE ST 2084)
// ============================================================================

const PQ_M1: f32 = 2610.0 / 16384.0;
const PQ_M2: f32 = 2523.0 / 4096.0 * 128.0;
const PQ_C1: f32 = 3424.0 / 4096.0;
const PQ_C2: f32 = 2413.0 / 4096.0 * 32.0;
const PQ_C3: f32 = 2392.0 / 4096.0 * 32.0;

/// PQ inverse EOTF: linear `[0,1]` (1.0 = 10000 cd/m²) to encoded `[0,1]`.
#[inline]
pub fn pq_oetf(linear: f32) -> f32 {
    if linear <= 0.0 {
        return 0.0;
    }
    let y_m1 = linear.min(1.0).powf(PQ_M1);
    ((PQ_C1 + PQ_C2 * y_m1) / (1.0 + PQ_C3 * y_m1)).powf(PQ_M2)
}

/// PQ EOTF: encoded `[0,1]` to linear `[0,1]` (1.0 = 10000 cd/m²).
#[inline]
pub fn pq_eotf(encoded: f32) -> f32 {
    if encoded <= 0.0 {
        return 0.0;
    }
    let e = encoded.min(1.0).powf(1.0 / PQ_M2);
    let numerator = (e - PQ_C1).max(0.0);
    let denominator = PQ_C2 - PQ_C3 * e;
    if denominator <= 0.0 {
        return 0.0;
    }
    (numerator / denominator).powf(1.0 / PQ_M1)
}

// ============================================================================
// HLG (ARIB STD-B67)
// ============================================================================

const HLG_A: f32 = 0.17883277;
const HLG_B: f32 = 0.28466892;
const HLG_C: f32 = 0.55991073;

/// HLG OETF: scene linear `[0,1]` to encoded `[0,1]`.
#[inline]
pub fn hlg_oetf(linear: f32) -> f32 {
    if linear <= 0.0 {
        0.0
    } else if linear <= 1.0 / 12.0 {
        (3.0 * linear).sqrt()
    } else {
        HLG_A * (12.0 * linear - HLG_B).ln() + HLG_C
    }
}

/// HLG inverse OETF: encoded `[0,1]` to scene linear `[0,1]`.
#[inline]
pub fn hlg_oetf_inv(encoded: f32) -> f32 {
    if encoded <= 0.0 {
        0.0
    } else if encoded <= 0.5 {
        encoded * encoded / 3.0
    } else {
        (((encoded - HLG_C) / HLG_A).exp() + HLG_B) / 12.0
    }
}

// ============================================================================
// Curve selection
// ============================================================================

/// A resolved transfer curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferCurve {
    /// IEC 61966-2-1.
    Srgb,
    /// No curve.
    Linear,
    /// BT.709, BT.601, BT.2020.
    Bt709,
    /// SMPTE 240M.
    Smpte240,
    /// Pure power law with the given exponent.
    Gamma(f32),
    /// SMPTE ST 2084.
    Pq,
    /// ARIB STD-B67 with a 1000 cd/m² nominal display.
    Hlg,
}

impl TransferCurve {
    /// Resolve transfer characteristics to a curve.
    ///
    /// Unspecified content is treated as sRGB. Curves without an
    /// implementation also fall back to sRGB, with a warning.
    pub fn from_characteristics(tc: TransferCharacteristics) -> Self {
        match tc {
            TransferCharacteristics::Srgb | TransferCharacteristics::Unspecified => Self::Srgb,
            TransferCharacteristics::Linear => Self::Linear,
            TransferCharacteristics::Bt709
            | TransferCharacteristics::Bt601
            | TransferCharacteristics::Bt2020Ten
            | TransferCharacteristics::Bt2020Twelve => Self::Bt709,
            TransferCharacteristics::Smpte240 => Self::Smpte240,
            TransferCharacteristics::Gamma22 => Self::Gamma(2.2),
            TransferCharacteristics::Gamma28 => Self::Gamma(2.8),
            TransferCharacteristics::Pq => Self::Pq,
            TransferCharacteristics::Hlg => Self::Hlg,
            TransferCharacteristics::Other(code) => {
                tracing::warn!(code, "unsupported transfer characteristics, using sRGB");
                Self::Srgb
            }
        }
    }

    /// Encoded `[0,1]` to extended SDR linear.
    #[inline]
    pub fn to_linear(self, encoded: f32) -> f32 {
        match self {
            Self::Srgb => srgb_eotf(encoded),
            Self::Linear => encoded,
            Self::Bt709 => bt709_oetf_inv(encoded),
            Self::Smpte240 => smpte240_oetf_inv(encoded),
            Self::Gamma(g) => encoded.max(0.0).powf(g),
            Self::Pq => pq_eotf(encoded) * (PQ_MAX_NITS / SDR_WHITE_NITS),
            Self::Hlg => {
                hlg_oetf_inv(encoded).powf(HLG_SYSTEM_GAMMA) * (HLG_PEAK_NITS / SDR_WHITE_NITS)
            }
        }
    }

    /// Extended SDR linear to encoded. Not clamped above for [`Self::Linear`].
    #[inline]
    pub fn from_linear(self, linear: f32) -> f32 {
        match self {
            Self::Srgb => srgb_oetf(linear),
            Self::Linear => linear,
            Self::Bt709 => bt709_oetf(linear),
            Self::Smpte240 => smpte240_oetf(linear),
            Self::Gamma(g) => linear.max(0.0).powf(1.0 / g),
            Self::Pq => pq_oetf(linear * (SDR_WHITE_NITS / PQ_MAX_NITS)),
            Self::Hlg => {
                let display = (linear * (SDR_WHITE_NITS / HLG_PEAK_NITS)).max(0.0);
                hlg_oetf(display.powf(1.0 / HLG_SYSTEM_GAMMA))
            }
        }
    }

    /// Largest linear value an encoded `1.0` maps to.
    pub fn peak_linear(self) -> f32 {
        match self {
            Self::Pq => PQ_MAX_NITS / SDR_WHITE_NITS,
            Self::Hlg => HLG_PEAK_NITS / SDR_WHITE_NITS,
            _ => 1.0,
        }
    }

    /// True when re-encoded output needs no upper clamp.
    pub fn is_unbounded(self) -> bool {
        self == Self::Linear
    }
}

/// Encoded-to-linear lookup table for integer samples of one bit depth.
#[derive(Debug, Clone)]
pub struct LinearLut {
    table: Vec<f32>,
}

impl LinearLut {
    /// Build the table for `depth`-bit samples (8 to 16 bits).
    pub fn new(curve: TransferCurve, depth: u8) -> Result<Self> {
        let len = 1usize << depth;
        let mut table = crate::types::try_alloc_zeroed::<f32>(len)?;
        let max = (len - 1) as f32;
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = curve.to_linear(i as f32 / max);
        }
        Ok(Self { table })
    }

    /// Linear value for an integer sample.
    #[inline]
    pub fn lookup(&self, sample: u16) -> f32 {
        self.table[(sample as usize).min(self.table.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON || (a - b).abs() / a.abs().max(b.abs()).max(1e-10) < EPSILON
    }

    fn check_roundtrip(curve: TransferCurve) {
        for i in 0..=100 {
            let encoded = i as f32 / 100.0;
            let linear = curve.to_linear(encoded);
            let back = curve.from_linear(linear);
            assert!(
                (encoded - back).abs() < 1e-3,
                "{:?} roundtrip failed for {}: got {}",
                curve,
                encoded,
                back
            );
        }
    }

    #[test]
    fn test_all_curves_roundtrip() {
        for curve in [
            TransferCurve::Srgb,
            TransferCurve::Linear,
            TransferCurve::Bt709,
            TransferCurve::Smpte240,
            TransferCurve::Gamma(2.2),
            TransferCurve::Gamma(2.8),
            TransferCurve::Pq,
            TransferCurve::Hlg,
        ] {
            check_roundtrip(curve);
        }
    }

    #[test]
    fn test_srgb_known_values() {
        assert!(approx_eq(srgb_eotf(0.0), 0.0));
        assert!(approx_eq(srgb_eotf(1.0), 1.0));
        let mid_gray = srgb_oetf(0.18);
        assert!(
            mid_gray > 0.4 && mid_gray < 0.5,
            "mid-gray should encode to ~0.46, got {}",
            mid_gray
        );
    }

    #[test]
    fn test_pq_extended_sdr_scale() {
        let pq = TransferCurve::Pq;
        assert!(approx_eq(pq.to_linear(1.0), 10000.0 / 203.0));
        // SDR white lands around 0.58 in PQ.
        let white = pq.from_linear(1.0);
        assert!(white > 0.55 && white < 0.6, "got {}", white);
        assert!(approx_eq(pq.to_linear(white), 1.0));
    }

    #[test]
    fn test_hlg_extended_sdr_scale() {
        let hlg = TransferCurve::Hlg;
        assert!(approx_eq(hlg.to_linear(1.0), 1000.0 / 203.0));
        assert_eq!(hlg.peak_linear(), 1000.0 / 203.0);
        assert_eq!(hlg.to_linear(0.0), 0.0);
    }

    #[test]
    fn test_characteristics_mapping() {
        assert_eq!(
            TransferCurve::from_characteristics(TransferCharacteristics::Unspecified),
            TransferCurve::Srgb
        );
        assert_eq!(
            TransferCurve::from_characteristics(TransferCharacteristics::Bt2020Ten),
            TransferCurve::Bt709
        );
        assert_eq!(
            TransferCurve::from_characteristics(TransferCharacteristics::Other(17)),
            TransferCurve::Srgb
        );
        assert!(TransferCurve::Linear.is_unbounded());
        assert!(!TransferCurve::Pq.is_unbounded());
    }

    #[test]
    fn test_lut_matches_curve() {
        let lut = LinearLut::new(TransferCurve::Pq, 10).unwrap();
        for sample in [0u16, 1, 512, 700, 1023] {
            let expected = TransferCurve::Pq.to_linear(sample as f32 / 1023.0);
            assert!(approx_eq(lut.lookup(sample), expected));
        }
        // Out-of-range samples clamp to the last entry.
        assert_eq!(lut.lookup(4000), lut.lookup(1023));
    }
}
