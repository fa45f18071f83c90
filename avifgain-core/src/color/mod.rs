//! Color handling: transfer curves, primaries matrices, YUV conversion.

pub mod gamut;
pub mod transfer;
pub mod yuv;

pub use gamut::{conversion_matrix, luma_coefficients, luminance, rgb_to_xyz, Matrix3x3};
pub use transfer::{LinearLut, TransferCurve, SDR_WHITE_NITS};
pub use yuv::{rgb_to_yuv, yuv_to_rgb, YuvCoefficients, YuvReader};
