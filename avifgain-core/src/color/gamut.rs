//! Color primaries: RGB to XYZ matrices and gamut conversion.
//!
//! Matrices are derived from the H.273 chromaticities rather than tabulated,
//! so every supported primaries pair converts through the same code path.

use alloc::format;

use crate::types::{ColorPrimaries, Error, Result};

/// 3x3 matrix for color transformations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3x3(pub [[f32; 3]; 3]);

impl Matrix3x3 {
    /// Identity matrix.
    pub const IDENTITY: Self = Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Multiply matrix by RGB vector: [R', G', B'] = M * [R, G, B]
    #[inline]
    pub fn transform(&self, rgb: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        [
            m[0][0] * rgb[0] + m[0][1] * rgb[1] + m[0][2] * rgb[2],
            m[1][0] * rgb[0] + m[1][1] * rgb[1] + m[1][2] * rgb[2],
            m[2][0] * rgb[0] + m[2][1] * rgb[1] + m[2][2] * rgb[2],
        ]
    }

    /// Matrix multiplication: self * other
    pub fn multiply(&self, other: &Self) -> Self {
        let a = &self.0;
        let b = &other.0;
        let mut result = [[0.0f32; 3]; 3];
        for (i, row) in result.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
            }
        }
        Self(result)
    }

    /// Inverse, or `None` for a singular matrix.
    pub fn inverse(&self) -> Option<Self> {
        let m = self.0.map(|row| row.map(|v| v as f64));
        invert_f64(&m).map(|inv| Self(inv.map(|row| row.map(|v| v as f32))))
    }
}

fn invert_f64(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
    let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
    let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            c00 * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            c01 * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            c02 * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

const D65: [f64; 2] = [0.3127, 0.3290];

/// Chromaticities `[red, green, blue, white]` as `(x, y)` pairs.
///
/// Unspecified primaries are treated as BT.709. Unknown code points also
/// resolve to BT.709, with a warning.
pub fn chromaticities(primaries: ColorPrimaries) -> [[f64; 2]; 4] {
    match primaries {
        ColorPrimaries::Bt709 | ColorPrimaries::Unspecified => {
            [[0.64, 0.33], [0.30, 0.60], [0.15, 0.06], D65]
        }
        ColorPrimaries::Bt470Bg => [[0.64, 0.33], [0.29, 0.60], [0.15, 0.06], D65],
        ColorPrimaries::Bt601 => [[0.630, 0.340], [0.310, 0.595], [0.155, 0.070], D65],
        ColorPrimaries::Bt2020 => [[0.708, 0.292], [0.170, 0.797], [0.131, 0.046], D65],
        ColorPrimaries::Smpte431 => [[0.680, 0.320], [0.265, 0.690], [0.150, 0.060], [0.314, 0.351]],
        ColorPrimaries::Smpte432 => [[0.680, 0.320], [0.265, 0.690], [0.150, 0.060], D65],
        ColorPrimaries::Other(code) => {
            tracing::warn!(code, "unsupported color primaries, using BT.709");
            [[0.64, 0.33], [0.30, 0.60], [0.15, 0.06], D65]
        }
    }
}

fn xyz_from_xy(xy: [f64; 2]) -> [f64; 3] {
    [xy[0] / xy[1], 1.0, (1.0 - xy[0] - xy[1]) / xy[1]]
}

fn rgb_to_xyz_f64(primaries: ColorPrimaries) -> Result<[[f64; 3]; 3]> {
    let [r, g, b, w] = chromaticities(primaries);
    let (r, g, b) = (xyz_from_xy(r), xyz_from_xy(g), xyz_from_xy(b));
    let p = [[r[0], g[0], b[0]], [r[1], g[1], b[1]], [r[2], g[2], b[2]]];
    let p_inv = invert_f64(&p).ok_or_else(|| {
        Error::UnsupportedFormat(format!("degenerate primaries {:?}", primaries))
    })?;
    let white = xyz_from_xy(w);
    let s: [f64; 3] = core::array::from_fn(|i| {
        p_inv[i][0] * white[0] + p_inv[i][1] * white[1] + p_inv[i][2] * white[2]
    });
    Ok(core::array::from_fn(|i| core::array::from_fn(|j| p[i][j] * s[j])))
}

/// Linear RGB to CIE XYZ for the given primaries (Y of white = 1).
pub fn rgb_to_xyz(primaries: ColorPrimaries) -> Result<Matrix3x3> {
    let m = rgb_to_xyz_f64(primaries)?;
    Ok(Matrix3x3(m.map(|row| row.map(|v| v as f32))))
}

/// Matrix converting linear RGB in `from` primaries to `to` primaries, or
/// `None` when no conversion is needed.
///
/// No chromatic adaptation is applied between differing white points.
pub fn conversion_matrix(from: ColorPrimaries, to: ColorPrimaries) -> Result<Option<Matrix3x3>> {
    if chromaticities(from) == chromaticities(to) {
        return Ok(None);
    }
    let src = rgb_to_xyz_f64(from)?;
    let dst = rgb_to_xyz_f64(to)?;
    let dst_inv = invert_f64(&dst)
        .ok_or_else(|| Error::UnsupportedFormat(format!("degenerate primaries {:?}", to)))?;
    let m: [[f64; 3]; 3] = core::array::from_fn(|i| {
        core::array::from_fn(|j| (0..3).map(|k| dst_inv[i][k] * src[k][j]).sum())
    });
    Ok(Some(Matrix3x3(m.map(|row| row.map(|v| v as f32)))))
}

/// Luminance coefficients (the Y row of the RGB to XYZ matrix).
pub fn luma_coefficients(primaries: ColorPrimaries) -> Result<[f32; 3]> {
    Ok(rgb_to_xyz(primaries)?.0[1])
}

/// Relative luminance of a linear RGB triple.
#[inline]
pub fn luminance(rgb: [f32; 3], coefficients: [f32; 3]) -> f32 {
    rgb[0] * coefficients[0] + rgb[1] * coefficients[1] + rgb[2] * coefficients[2]
}
