//! AVIF decoder.

use avifgain_core::stream::fourcc_str;
use avifgain_core::{parse_tmap, Error, GainMap, Image, Result, YuvFormat};

use crate::codec::{Av1Config, Av1Decoder, Category, DecodeSample};
use crate::container::{Container, Item};
use crate::grid::{stitch_cells, ImageGrid};

/// What the decoder does with a gain map, if the file has one.
///
/// Both flags default to `false`: the gain map is ignored and its payload is
/// never handed to the AV1 decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderSettings {
    /// Parse gain map metadata and the alternate image description.
    pub parse_gainmap_metadata: bool,
    /// Decode gain map pixels. Implies parsing the metadata.
    pub decode_gainmap_pixels: bool,
}

impl DecoderSettings {
    /// Parse gain map metadata.
    pub fn with_gainmap_metadata(mut self, enabled: bool) -> Self {
        self.parse_gainmap_metadata = enabled;
        self
    }

    /// Decode gain map pixels.
    pub fn with_gainmap_pixels(mut self, enabled: bool) -> Self {
        self.decode_gainmap_pixels = enabled;
        self
    }

    /// True when the gain map item must be looked at.
    pub fn wants_gainmap_metadata(&self) -> bool {
        self.parse_gainmap_metadata || self.decode_gainmap_pixels
    }
}

/// AVIF decoder.
///
/// Reads the container, hands every coded item to an [`Av1Decoder`] and
/// assembles the primary image, its alpha plane and, depending on
/// [`DecoderSettings`], its gain map.
///
/// # Example
///
/// ```ignore
/// use avifgain::{Decoder, DecoderSettings, GainMapState};
///
/// let settings = DecoderSettings::default().with_gainmap_metadata(true);
/// let mut decoder = Decoder::with_settings(my_av1_decoder, settings);
/// let image = decoder.decode(&avif_bytes)?;
/// assert_eq!(image.gain_map_state(), GainMapState::MetadataParsed);
/// ```
pub struct Decoder<D: Av1Decoder> {
    codec: D,
    settings: DecoderSettings,
}

impl<D: Av1Decoder> Decoder<D> {
    /// Create a decoder that ignores gain maps.
    pub fn new(codec: D) -> Self {
        Self::with_settings(codec, DecoderSettings::default())
    }

    /// Create a decoder with explicit settings.
    pub fn with_settings(codec: D, settings: DecoderSettings) -> Self {
        Self { codec, settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &DecoderSettings {
        &self.settings
    }

    /// Replace the settings for subsequent calls.
    pub fn set_settings(&mut self, settings: DecoderSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Give back the AV1 decoder.
    pub fn into_codec(self) -> D {
        self.codec
    }

    /// Decode an AVIF file.
    pub fn decode(&mut self, data: &[u8]) -> Result<Image> {
        let container = Container::parse(data)?;
        if !container.has_brand(b"avif") {
            return Err(Error::UnsupportedFormat(format!(
                "major brand [{}] without a compatible avif brand",
                fourcc_str(&container.major_brand)
            )));
        }

        let primary = container.primary()?;
        let mut image = self.decode_item(&container, primary, Category::Color)?;
        apply_properties(&container, primary, &mut image)?;

        if let Some(alpha_item) = container.alpha_item(primary.id) {
            let alpha = self.decode_item(&container, alpha_item, Category::Alpha)?;
            attach_alpha(&mut image, alpha)?;
        }

        if self.settings.wants_gainmap_metadata() {
            if let Some(gain_map) = self.read_gain_map(&container, &image)? {
                image.gain_map = Some(Box::new(gain_map));
            }
        }

        tracing::debug!(
            width = image.width,
            height = image.height,
            depth = image.depth,
            alpha = image.alpha.is_some(),
            gain_map = ?image.gain_map_state(),
            "decoded image"
        );
        Ok(image)
    }

    /// Parse the `tmap` item and, when requested, decode the gain map pixels.
    ///
    /// Returns `Ok(None)` when the file has no usable gain map.
    fn read_gain_map(&mut self, container: &Container, base: &Image) -> Result<Option<GainMap>> {
        let Some((tmap_id, gain_map_id)) = container.gain_map_items() else {
            return Ok(None);
        };
        if !container.has_brand(b"tmap") {
            tracing::warn!("tmap item present without the tmap brand, ignoring gain map");
            return Ok(None);
        }
        let tmap = container
            .item(tmap_id)
            .ok_or_else(|| Error::BmffParse(format!("tmap item {} does not exist", tmap_id)))?;
        let gain_map_item = container.item(gain_map_id).ok_or_else(|| {
            Error::BmffParse(format!("gain map item {} does not exist", gain_map_id))
        })?;

        let Some(metadata) = parse_tmap(&tmap.data)? else {
            tracing::debug!(item = tmap_id, "unsupported gain map metadata version, ignoring gain map");
            return Ok(None);
        };
        if let Some((w, h)) = tmap.spatial_extents() {
            if (w, h) != (base.width, base.height) {
                return Err(Error::BmffParse(format!(
                    "tmap item is {}x{} but the base image is {}x{}",
                    w, h, base.width, base.height
                )));
            }
        }

        let mut gain_map = GainMap::new();
        gain_map.metadata = metadata;
        if let Some((primaries, transfer, matrix, full_range)) = tmap.color() {
            gain_map.alt_color_primaries = primaries;
            gain_map.alt_transfer_characteristics = transfer;
            gain_map.alt_matrix_coefficients = matrix;
            gain_map.alt_full_range = full_range;
        }
        if let Some(depths) = tmap.pixel_depths() {
            gain_map.alt_depth = depths.first().copied().unwrap_or(0);
            gain_map.alt_plane_count = depths.len() as u8;
        }
        gain_map.alt_clli = tmap.content_light_level();

        gain_map.image = if self.settings.decode_gainmap_pixels {
            let mut pixels = self.decode_item(container, gain_map_item, Category::GainMap)?;
            apply_properties(container, gain_map_item, &mut pixels)?;
            Some(pixels)
        } else {
            describe_item(container, gain_map_item)?
        };

        tracing::debug!(
            item = gain_map_id,
            state = ?gain_map.state(),
            multi_channel = !gain_map.metadata.channels_identical(),
            "read gain map"
        );
        Ok(Some(gain_map))
    }

    /// Decode an `av01` item or a `grid` of `av01` items.
    fn decode_item(&mut self, container: &Container, item: &Item, category: Category) -> Result<Image> {
        match &item.item_type {
            b"av01" => self.decode_coded_item(item, category),
            b"grid" => {
                let grid = ImageGrid::parse(&item.data)?;
                let cell_ids = item.referenced(b"dimg");
                if cell_ids.len() != grid.cell_count() {
                    return Err(Error::InvalidImageGrid(format!(
                        "grid item {} declares {} cells but references {}",
                        item.id,
                        grid.cell_count(),
                        cell_ids.len()
                    )));
                }
                let mut tiles = Vec::with_capacity(cell_ids.len());
                for &id in cell_ids {
                    let cell = container
                        .item(id)
                        .ok_or_else(|| Error::BmffParse(format!("grid cell item {} does not exist", id)))?;
                    if &cell.item_type != b"av01" {
                        return Err(Error::InvalidImageGrid(format!(
                            "grid cell item {} has type [{}]",
                            id,
                            fourcc_str(&cell.item_type)
                        )));
                    }
                    tiles.push(self.decode_coded_item(cell, category)?);
                }
                let image = stitch_cells(&grid, &tiles)?;
                check_extents(item, &image)?;
                Ok(image)
            }
            other => Err(Error::UnsupportedFormat(format!(
                "item {} has unsupported type [{}]",
                item.id,
                fourcc_str(other)
            ))),
        }
    }

    fn decode_coded_item(&mut self, item: &Item, category: Category) -> Result<Image> {
        if let Some(property) = item.unsupported_essential() {
            return Err(Error::UnsupportedFormat(format!(
                "item {} has unsupported essential property [{}]",
                item.id,
                fourcc_str(&property)
            )));
        }
        let config = item
            .av1_config()
            .ok_or_else(|| Error::BmffParse(format!("item {} has no av1C property", item.id)))
            .and_then(Av1Config::parse)?;
        let spatial_id = item
            .layer_selector()
            .map(|layer| {
                u8::try_from(layer)
                    .map_err(|_| Error::BmffParse(format!("item {} selects layer {}", item.id, layer)))
            })
            .transpose()?;

        let sample = DecodeSample {
            data: &item.data,
            item_id: item.id,
            keyframe: true,
            spatial_id,
        };
        tracing::trace!(item = item.id, ?category, bytes = item.data.len(), "decoding sample");
        let image = self.codec.decode(&sample, category)?;
        image.validate_planes()?;
        config.check_decoded(&image)?;
        check_extents(item, &image)?;
        Ok(image)
    }
}

/// The decoded size must match the item's `ispe`.
fn check_extents(item: &Item, image: &Image) -> Result<()> {
    let (width, height) = item
        .spatial_extents()
        .ok_or_else(|| Error::BmffParse(format!("item {} has no ispe property", item.id)))?;
    if (width, height) != (image.width, image.height) {
        return Err(Error::BmffParse(format!(
            "item {} declares {}x{} but decoded to {}x{}",
            item.id, width, height, image.width, image.height
        )));
    }
    Ok(())
}

/// Copy `colr` and `clli` from `item` (or the first cell of a grid) onto
/// `image`.
fn apply_properties(container: &Container, item: &Item, image: &mut Image) -> Result<()> {
    let first_cell = item
        .referenced(b"dimg")
        .first()
        .and_then(|&id| container.item(id))
        .filter(|_| &item.item_type == b"grid");
    let color = item.color().or_else(|| first_cell.and_then(Item::color));
    if let Some((primaries, transfer, matrix, full_range)) = color {
        image.color_primaries = primaries;
        image.transfer_characteristics = transfer;
        image.matrix_coefficients = matrix;
        image.full_range = full_range;
    }
    if let Some(clli) = item.content_light_level() {
        image.clli = Some(clli);
    }
    if image.matrix_coefficients == avifgain_core::MatrixCoefficients::Identity
        && image.yuv_format != YuvFormat::Yuv444
    {
        return Err(Error::BmffParse(format!(
            "item {} uses identity matrix coefficients with {:?}",
            item.id, image.yuv_format
        )));
    }
    Ok(())
}

/// Move the luma plane of a decoded auxiliary image into `image.alpha`.
fn attach_alpha(image: &mut Image, alpha: Image) -> Result<()> {
    if (alpha.width, alpha.height) != (image.width, image.height) {
        return Err(Error::DimensionMismatch {
            base_w: image.width,
            base_h: image.height,
            other_w: alpha.width,
            other_h: alpha.height,
        });
    }
    if alpha.depth != image.depth {
        return Err(Error::DecodeError(format!(
            "{}-bit alpha plane for a {}-bit image",
            alpha.depth, image.depth
        )));
    }
    image.alpha = alpha.planes.into_iter().next();
    Ok(())
}

/// Describe a gain map item without decoding it: size from `ispe`, depth and
/// chroma layout from `av1C` (of the item or the first grid cell).
fn describe_item(container: &Container, item: &Item) -> Result<Option<Image>> {
    let Some((width, height)) = item.spatial_extents() else {
        return Ok(None);
    };
    let coded = if &item.item_type == b"grid" {
        item.referenced(b"dimg").first().and_then(|&id| container.item(id))
    } else {
        Some(item)
    };
    let Some(config) = coded.and_then(Item::av1_config) else {
        return Ok(None);
    };
    let config = Av1Config::parse(config)?;
    let mut image = Image::new(width, height, config.depth(), config.yuv_format())?;
    if let Some((primaries, transfer, matrix, full_range)) = item.color() {
        image.color_primaries = primaries;
        image.transfer_characteristics = transfer;
        image.matrix_coefficients = matrix;
        image.full_range = full_range;
    }
    Ok(Some(image))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCodec;

    impl Av1Decoder for NoCodec {
        fn decode(&mut self, _: &DecodeSample<'_>, _: Category) -> Result<Image> {
            Err(Error::DecodeError("no codec".into()))
        }
    }

    #[test]
    fn test_settings() {
        let settings = DecoderSettings::default();
        assert!(!settings.wants_gainmap_metadata());
        assert!(settings.with_gainmap_pixels(true).wants_gainmap_metadata());
        assert!(settings.with_gainmap_metadata(true).wants_gainmap_metadata());

        let mut decoder = Decoder::new(NoCodec);
        decoder.set_settings(settings.with_gainmap_metadata(true));
        assert!(decoder.settings().parse_gainmap_metadata);
    }

    #[test]
    fn test_not_an_avif() {
        let mut decoder = Decoder::new(NoCodec);
        assert!(decoder.decode(b"\xff\xd8\xff\xe0").is_err());

        let container = Container {
            major_brand: *b"heic",
            compatible_brands: vec![*b"mif1", *b"heic"],
            ..Container::default()
        };
        let mut item = Item::new(1, b"av01", "");
        item.data = vec![0];
        let container = Container {
            items: vec![item],
            ..container
        };
        let bytes = container.to_bytes().unwrap();
        assert!(matches!(decoder.decode(&bytes), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_av1c() {
        let mut item = Item::new(1, b"av01", "");
        item.data = vec![0];
        let container = Container {
            items: vec![item],
            ..Container::default()
        };
        let bytes = container.to_bytes().unwrap();
        let mut decoder = Decoder::new(NoCodec);
        assert!(matches!(decoder.decode(&bytes), Err(Error::BmffParse(_))));
    }

    #[test]
    fn test_attach_alpha_checks() {
        let mut image = Image::new(8, 8, 8, YuvFormat::Yuv420).unwrap();
        let mut alpha = Image::new(8, 4, 8, YuvFormat::Yuv400).unwrap();
        alpha.allocate_planes().unwrap();
        assert!(matches!(
            attach_alpha(&mut image, alpha),
            Err(Error::DimensionMismatch { .. })
        ));

        let mut alpha = Image::new(8, 8, 10, YuvFormat::Yuv400).unwrap();
        alpha.allocate_planes().unwrap();
        assert!(attach_alpha(&mut image, alpha).is_err());

        let mut alpha = Image::new(8, 8, 8, YuvFormat::Yuv400).unwrap();
        alpha.allocate_planes().unwrap();
        attach_alpha(&mut image, alpha).unwrap();
        assert_eq!(image.alpha.as_ref().map(|a| a.data.len()), Some(64));
    }
}
