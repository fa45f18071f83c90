//! Image grids (ISO/IEC 23008-12 `grid` derived items).
//!
//! A grid item stitches equally sized coded tiles into one output image. On
//! encode, the right column and bottom row may be smaller than the others;
//! they are padded to the tile size before coding and cropped again through
//! the grid's output size.

use avifgain_core::limits::MAX_IMAGE_DIMENSION;
use avifgain_core::stream::{StreamReader, StreamWriter};
use avifgain_core::{Error, Image, MatrixCoefficients, Plane, Result, YuvFormat};

/// Smallest tile edge allowed in a multi-cell grid.
pub const MIN_TILE_SIZE: u32 = 64;

/// Largest row or column count an `ImageGrid` payload can express.
pub const MAX_GRID_SIDE: u32 = 256;

/// Payload of a `grid` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGrid {
    /// Number of tile rows.
    pub rows: u32,
    /// Number of tile columns.
    pub columns: u32,
    /// Width of the stitched image.
    pub output_width: u32,
    /// Height of the stitched image.
    pub output_height: u32,
}

impl ImageGrid {
    /// Create a grid description, checking its bounds.
    pub fn new(columns: u32, rows: u32, output_width: u32, output_height: u32) -> Result<Self> {
        if columns == 0 || rows == 0 || columns > MAX_GRID_SIDE || rows > MAX_GRID_SIDE {
            return Err(Error::InvalidImageGrid(format!(
                "{}x{} cells is outside 1..={} per side",
                columns, rows, MAX_GRID_SIDE
            )));
        }
        if output_width == 0 || output_height == 0 {
            return Err(Error::InvalidImageGrid(format!(
                "empty output size {}x{}",
                output_width, output_height
            )));
        }
        if output_width > MAX_IMAGE_DIMENSION || output_height > MAX_IMAGE_DIMENSION {
            return Err(Error::LimitExceeded(format!(
                "grid output {}x{} exceeds maximum dimension {}",
                output_width, output_height, MAX_IMAGE_DIMENSION
            )));
        }
        Ok(Self {
            rows,
            columns,
            output_width,
            output_height,
        })
    }

    /// Number of cells.
    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    /// Serialize as a `grid` item payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let large = self.output_width > u16::MAX as u32 || self.output_height > u16::MAX as u32;
        let mut w = StreamWriter::new();
        w.write_u8(0)?; // version
        w.write_u8(large as u8)?; // flags
        w.write_u8((self.rows - 1) as u8)?;
        w.write_u8((self.columns - 1) as u8)?;
        if large {
            w.write_u32(self.output_width)?;
            w.write_u32(self.output_height)?;
        } else {
            w.write_u16(self.output_width as u16)?;
            w.write_u16(self.output_height as u16)?;
        }
        Ok(w.finish_write())
    }

    /// Parse a `grid` item payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = StreamReader::new(data, "grid");
        let version = r.read_u8()?;
        if version != 0 {
            return Err(Error::InvalidImageGrid(format!("unsupported version {}", version)));
        }
        let flags = r.read_u8()?;
        let rows = r.read_u8()? as u32 + 1;
        let columns = r.read_u8()? as u32 + 1;
        let (output_width, output_height) = if flags & 1 != 0 {
            (r.read_u32()?, r.read_u32()?)
        } else {
            (r.read_u16()? as u32, r.read_u16()? as u32)
        };
        if r.remaining_bytes() != 0 {
            return Err(Error::InvalidImageGrid(format!(
                "{} trailing bytes after payload",
                r.remaining_bytes()
            )));
        }
        Self::new(columns, rows, output_width, output_height)
    }
}

/// Grids checked for encoding: the color grid and, if present, the gain map
/// grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    /// Layout of the color cells.
    pub color: ImageGrid,
    /// Layout of the gain map cells, when the cells carry gain maps.
    pub gain_map: Option<ImageGrid>,
}

/// Check that `cells` (row-major) can be encoded as one grid image.
///
/// With `include_gain_map`, the cells must either all carry a gain map or
/// none may, and gain maps must agree on metadata, alternate description and
/// geometry.
pub fn validate_grid(cells: &[Image], columns: u32, rows: u32, include_gain_map: bool) -> Result<GridLayout> {
    let cell_count = columns as usize * rows as usize;
    if cell_count == 0 || cells.is_empty() {
        return Err(Error::InvalidImageGrid("grid has no cells".into()));
    }
    if cells.len() != cell_count {
        return Err(Error::InvalidImageGrid(format!(
            "{}x{} grid needs {} cells, got {}",
            columns,
            rows,
            cell_count,
            cells.len()
        )));
    }

    let color = validate_cells(cells.iter(), columns, rows, "image")?;
    if !include_gain_map {
        return Ok(GridLayout { color, gain_map: None });
    }

    let first = cells[0].gain_map.as_deref();
    for (index, cell) in cells.iter().enumerate() {
        match (first, cell.gain_map.as_deref()) {
            (None, None) => {}
            (Some(expected), Some(gm)) => {
                if !expected.same_alt_description(gm) {
                    return Err(Error::InvalidImageGrid(format!(
                        "cell {} gain map describes a different alternate image",
                        index
                    )));
                }
                if expected.metadata != gm.metadata {
                    return Err(Error::InvalidImageGrid(format!(
                        "cell {} has different gain map metadata",
                        index
                    )));
                }
            }
            _ => {
                return Err(Error::InvalidImageGrid(
                    "cells must either all have a gain map or none".into(),
                ))
            }
        }
    }
    let Some(first) = first else {
        return Ok(GridLayout { color, gain_map: None });
    };

    let gm_images = cells
        .iter()
        .map(|cell| {
            cell.gain_map
                .as_deref()
                .and_then(|gm| gm.image.as_ref())
                .ok_or_else(|| Error::NoContent("gain map has metadata but no image".into()))
        })
        .collect::<Result<Vec<&Image>>>()?;
    let depth = gm_images[0].depth;
    if !matches!(depth, 8 | 10 | 12) {
        return Err(Error::UnsupportedDepth(depth as u32));
    }
    first.metadata.validate()?;
    let gain_map = validate_cells(gm_images.iter().copied(), columns, rows, "gain map")?;
    if gm_images[0].color_primaries != avifgain_core::ColorPrimaries::Unspecified
        || gm_images[0].transfer_characteristics != avifgain_core::TransferCharacteristics::Unspecified
    {
        return Err(Error::InvalidArgument(
            "gain map images must have unspecified primaries and transfer".into(),
        ));
    }
    Ok(GridLayout {
        color,
        gain_map: Some(gain_map),
    })
}

/// Geometry and format checks shared by color and gain map cells.
fn validate_cells<'a>(
    cells: impl Iterator<Item = &'a Image> + Clone,
    columns: u32,
    rows: u32,
    what: &str,
) -> Result<ImageGrid> {
    let cells: Vec<&Image> = cells.collect();
    let first = cells[0];
    let last = cells[cells.len() - 1];
    let (tile_w, tile_h) = (first.width, first.height);

    for (index, cell) in cells.iter().enumerate() {
        let (col, row) = (index as u32 % columns, index as u32 / columns);
        let expected_w = if col + 1 < columns { tile_w } else { last.width };
        let expected_h = if row + 1 < rows { tile_h } else { last.height };
        if cell.width != expected_w || cell.height != expected_h {
            tracing::debug!(index, what, "grid cell size mismatch");
            return Err(Error::InvalidImageGrid(format!(
                "{} cell {} is {}x{}, expected {}x{}",
                what, index, cell.width, cell.height, expected_w, expected_h
            )));
        }
        if cell.depth != first.depth
            || cell.yuv_format != first.yuv_format
            || cell.full_range != first.full_range
            || cell.color_primaries != first.color_primaries
            || cell.transfer_characteristics != first.transfer_characteristics
            || cell.matrix_coefficients != first.matrix_coefficients
            || cell.alpha.is_some() != first.alpha.is_some()
        {
            return Err(Error::InvalidImageGrid(format!(
                "{} cell {} differs from the first cell in depth, format, range, color description or alpha",
                what, index
            )));
        }
        if cell.matrix_coefficients == MatrixCoefficients::Identity && cell.yuv_format != YuvFormat::Yuv444 {
            return Err(Error::InvalidArgument(
                "identity matrix coefficients require 4:4:4".into(),
            ));
        }
        if !cell.has_pixels() {
            return Err(Error::NoContent(format!("{} cell {} has no planes", what, index)));
        }
    }

    if last.width > tile_w || last.height > tile_h {
        return Err(Error::InvalidImageGrid(format!(
            "the last {} cell can be smaller but not larger than {}x{}, found {}x{}",
            what, tile_w, tile_h, last.width, last.height
        )));
    }

    let output_width = (columns - 1) * tile_w + last.width;
    let output_height = (rows - 1) * tile_h + last.height;
    if cells.len() > 1 {
        if tile_w < MIN_TILE_SIZE || tile_h < MIN_TILE_SIZE {
            return Err(Error::InvalidImageGrid(format!(
                "{} tiles must be at least {}x{}, found {}x{}",
                what, MIN_TILE_SIZE, MIN_TILE_SIZE, tile_w, tile_h
            )));
        }
        let (shift_x, shift_y) = first.yuv_format.chroma_shift();
        if (shift_x == 1 && tile_w % 2 != 0) || (shift_y == 1 && tile_h % 2 != 0) {
            return Err(Error::InvalidImageGrid(format!(
                "{:?} {} tiles need even dimensions, found {}x{}",
                first.yuv_format, what, tile_w, tile_h
            )));
        }
    }
    ImageGrid::new(columns, rows, output_width, output_height)
}

/// Copy `cell` into a `tile_w` x `tile_h` image, replicating the last row and
/// column into the padding.
pub(crate) fn pad_cell(cell: &Image, tile_w: u32, tile_h: u32) -> Result<Image> {
    if cell.width == tile_w && cell.height == tile_h {
        return Ok(cell.clone());
    }
    let mut padded = Image::new(tile_w, tile_h, cell.depth, cell.yuv_format)?;
    padded.full_range = cell.full_range;
    padded.color_primaries = cell.color_primaries;
    padded.transfer_characteristics = cell.transfer_characteristics;
    padded.matrix_coefficients = cell.matrix_coefficients;
    padded.clli = cell.clli;
    padded.allocate_planes()?;
    for (dst, src) in padded.planes.iter_mut().zip(&cell.planes) {
        pad_plane(src, dst);
    }
    if let Some(alpha) = &cell.alpha {
        padded.allocate_alpha()?;
        if let Some(dst) = padded.alpha.as_mut() {
            pad_plane(alpha, dst);
        }
    }
    Ok(padded)
}

fn pad_plane(src: &Plane, dst: &mut Plane) {
    for y in 0..dst.height {
        let sy = y.min(src.height - 1);
        for x in 0..dst.width {
            dst.set(x, y, src.get(x.min(src.width - 1), sy));
        }
    }
}

/// Stitch decoded tiles (row-major) into the grid's output image.
///
/// All tiles must share the size and format of the first; the right column
/// and bottom row are cropped to the output size.
pub(crate) fn stitch_cells(grid: &ImageGrid, tiles: &[Image]) -> Result<Image> {
    if tiles.len() != grid.cell_count() {
        return Err(Error::InvalidImageGrid(format!(
            "grid needs {} tiles, found {}",
            grid.cell_count(),
            tiles.len()
        )));
    }
    let first = &tiles[0];
    let (tile_w, tile_h) = (first.width, first.height);
    if (tile_w as u64 * grid.columns as u64) < grid.output_width as u64
        || (tile_h as u64 * grid.rows as u64) < grid.output_height as u64
        || (tile_w as u64 * (grid.columns as u64 - 1)) >= grid.output_width as u64
        || (tile_h as u64 * (grid.rows as u64 - 1)) >= grid.output_height as u64
    {
        return Err(Error::InvalidImageGrid(format!(
            "{}x{} tiles of {}x{} cannot form a {}x{} image",
            grid.columns, grid.rows, tile_w, tile_h, grid.output_width, grid.output_height
        )));
    }

    let mut out = Image::new(grid.output_width, grid.output_height, first.depth, first.yuv_format)?;
    out.full_range = first.full_range;
    out.color_primaries = first.color_primaries;
    out.transfer_characteristics = first.transfer_characteristics;
    out.matrix_coefficients = first.matrix_coefficients;
    out.allocate_planes()?;
    if first.alpha.is_some() {
        out.allocate_alpha()?;
    }
    let (shift_x, shift_y) = first.yuv_format.chroma_shift();

    for (index, tile) in tiles.iter().enumerate() {
        if tile.width != tile_w
            || tile.height != tile_h
            || tile.depth != first.depth
            || tile.yuv_format != first.yuv_format
            || tile.alpha.is_some() != first.alpha.is_some()
        {
            return Err(Error::InvalidImageGrid(format!(
                "tile {} does not match the first tile",
                index
            )));
        }
        tile.validate_planes()?;
        let col = index as u32 % grid.columns;
        let row = index as u32 / grid.columns;
        for (plane_index, (dst, src)) in out.planes.iter_mut().zip(&tile.planes).enumerate() {
            let (sx, sy) = if plane_index == 0 { (0, 0) } else { (shift_x, shift_y) };
            blit(src, dst, (col * tile_w) >> sx, (row * tile_h) >> sy);
        }
        if let (Some(src), Some(dst)) = (&tile.alpha, out.alpha.as_mut()) {
            blit(src, dst, col * tile_w, row * tile_h);
        }
    }
    Ok(out)
}

fn blit(src: &Plane, dst: &mut Plane, x0: u32, y0: u32) {
    let w = src.width.min(dst.width.saturating_sub(x0));
    let h = src.height.min(dst.height.saturating_sub(y0));
    for y in 0..h {
        let s = (y * src.width) as usize;
        let d = ((y0 + y) * dst.width + x0) as usize;
        dst.data[d..d + w as usize].copy_from_slice(&src.data[s..s + w as usize]);
    }
}
