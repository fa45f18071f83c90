//! AVIF encoder.

use std::borrow::Cow;

use avifgain_core::{serialize_tmap, ColorPrimaries, Error, GainMap, Image, Result, TransferCharacteristics};

use crate::codec::{Av1Config, Av1Encoder, Category};
use crate::container::{AlternativeGroup, Container, Item, ItemId, ItemReference, Property, ALPHA_URN};
use crate::grid::{pad_cell, validate_grid, ImageGrid};

/// Grid layout and gain map handling for [`Encoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Columns used by [`Encoder::encode_grid`].
    pub grid_columns: u32,
    /// Rows used by [`Encoder::encode_grid`].
    pub grid_rows: u32,
    /// Write the gain map attached to the input, if any.
    pub include_gain_map: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            grid_columns: 1,
            grid_rows: 1,
            include_gain_map: true,
        }
    }
}

impl EncoderSettings {
    /// Set the grid layout.
    pub fn with_grid(mut self, columns: u32, rows: u32) -> Self {
        self.grid_columns = columns;
        self.grid_rows = rows;
        self
    }

    /// Write or drop gain maps.
    pub fn with_gain_map(mut self, enabled: bool) -> Self {
        self.include_gain_map = enabled;
        self
    }
}

/// AVIF encoder.
///
/// Validates the input, hands every plane group to an [`Av1Encoder`] and
/// writes the container. A gain map attached to the input image becomes a
/// `tmap` item that derives the alternate rendition from the color item and
/// the gain map item.
///
/// # Example
///
/// ```ignore
/// use avifgain::{Encoder, EncoderSettings};
///
/// let mut encoder = Encoder::new(my_av1_encoder);
/// let avif = encoder.encode(&image)?;
///
/// // Four 512x512 cells as one 1024x1024 image.
/// let mut encoder = Encoder::with_settings(my_av1_encoder, EncoderSettings::default().with_grid(2, 2));
/// let avif = encoder.encode_grid(&cells)?;
/// ```
pub struct Encoder<E: Av1Encoder> {
    codec: E,
    settings: EncoderSettings,
}

impl<E: Av1Encoder> Encoder<E> {
    /// Create an encoder with default settings.
    pub fn new(codec: E) -> Self {
        Self::with_settings(codec, EncoderSettings::default())
    }

    /// Create an encoder with explicit settings.
    pub fn with_settings(codec: E, settings: EncoderSettings) -> Self {
        Self { codec, settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Set the grid layout used by [`Encoder::encode_grid`].
    pub fn set_grid(&mut self, columns: u32, rows: u32) -> &mut Self {
        self.settings.grid_columns = columns;
        self.settings.grid_rows = rows;
        self
    }

    /// Write or drop gain maps.
    pub fn set_gain_map(&mut self, enabled: bool) -> &mut Self {
        self.settings.include_gain_map = enabled;
        self
    }

    /// Give back the AV1 encoder.
    pub fn into_codec(self) -> E {
        self.codec
    }

    /// Encode a single image.
    pub fn encode(&mut self, image: &Image) -> Result<Vec<u8>> {
        self.encode_cells(std::slice::from_ref(image), 1, 1)
    }

    /// Encode row-major `cells` as one grid image using the configured
    /// layout.
    pub fn encode_grid(&mut self, cells: &[Image]) -> Result<Vec<u8>> {
        self.encode_cells(cells, self.settings.grid_columns, self.settings.grid_rows)
    }

    fn encode_cells(&mut self, cells: &[Image], columns: u32, rows: u32) -> Result<Vec<u8>> {
        let layout = validate_grid(cells, columns, rows, self.settings.include_gain_map)?;
        let first = &cells[0];
        let mut builder = ItemBuilder::default();

        let color_tiles: Vec<&Image> = cells.iter().collect();
        let color_id = self.add_image(&mut builder, &color_tiles, &layout.color, Category::Color)?;

        if first.alpha.is_some() {
            let alpha_cells = cells.iter().map(alpha_image).collect::<Result<Vec<_>>>()?;
            let alpha_tiles: Vec<&Image> = alpha_cells.iter().collect();
            let alpha_id = self.add_image(&mut builder, &alpha_tiles, &layout.color, Category::Alpha)?;
            builder.add_reference(alpha_id, b"auxl", vec![color_id]);
        }

        let gain_map = first.gain_map.as_deref().zip(layout.gain_map);
        if let Some((gain_map, gm_grid)) = gain_map {
            let gm_tiles = cells
                .iter()
                .map(|cell| {
                    cell.gain_map
                        .as_deref()
                        .and_then(GainMap::pixels)
                        .ok_or_else(|| Error::NoContent("gain map has no pixels".into()))
                })
                .collect::<Result<Vec<&Image>>>()?;
            let gm_id = self.add_image(&mut builder, &gm_tiles, &gm_grid, Category::GainMap)?;
            builder.set_hidden(gm_id);

            let tmap_id = builder.next_id();
            let mut tmap = Item::new(tmap_id, b"tmap", "GMap");
            tmap.data = serialize_tmap(&gain_map.metadata)?;
            tmap.properties.push(Property::ImageSpatialExtents {
                width: layout.color.output_width,
                height: layout.color.output_height,
            });
            tmap.properties.push(Property::ColorNclx {
                primaries: gain_map.alt_color_primaries,
                transfer: gain_map.alt_transfer_characteristics,
                matrix: gain_map.alt_matrix_coefficients,
                full_range: gain_map.alt_full_range,
            });
            if gain_map.alt_depth > 0 && gain_map.alt_plane_count > 0 {
                tmap.properties.push(Property::PixelInformation(vec![
                    gain_map.alt_depth;
                    gain_map.alt_plane_count as usize
                ]));
            }
            if let Some(clli) = gain_map.alt_clli {
                tmap.properties.push(Property::ContentLightLevel(clli));
            }
            tmap.references.push(ItemReference {
                reference_type: *b"dimg",
                to: vec![color_id, gm_id],
            });
            builder.push(tmap);

            let group_id = builder.next_id();
            builder.container.alternative_groups.push(AlternativeGroup {
                group_id,
                entities: vec![tmap_id, color_id],
            });
            builder.container.compatible_brands.push(*b"tmap");
            tracing::debug!(tmap = tmap_id, gain_map = gm_id, "added gain map");
        } else if first.gain_map.is_some() {
            tracing::debug!("gain map dropped by settings");
        }

        builder.container.primary_item = color_id;
        let bytes = builder.container.to_bytes()?;
        tracing::debug!(
            cells = cells.len(),
            width = layout.color.output_width,
            height = layout.color.output_height,
            bytes = bytes.len(),
            "encoded image"
        );
        Ok(bytes)
    }

    /// Encode `tiles` as one `av01` item, or as a `grid` item with one hidden
    /// `av01` item per cell. Returns the id of the item that represents the
    /// whole image.
    fn add_image(
        &mut self,
        builder: &mut ItemBuilder,
        tiles: &[&Image],
        grid: &ImageGrid,
        category: Category,
    ) -> Result<ItemId> {
        let first = tiles[0];
        let name = match category {
            Category::Color => "Color",
            Category::Alpha => "Alpha",
            Category::GainMap => "GMap",
        };

        if tiles.len() == 1 {
            let id = builder.next_id();
            let mut item = self.encode_item(id, first, category, name)?;
            item.properties.extend(description_properties(first, category));
            builder.push(item);
            return Ok(id);
        }

        let grid_id = builder.next_id();
        let mut grid_item = Item::new(grid_id, b"grid", name);
        grid_item.data = grid.to_bytes()?;
        grid_item.properties.push(Property::ImageSpatialExtents {
            width: grid.output_width,
            height: grid.output_height,
        });
        grid_item.properties.push(pixel_information(first));
        grid_item.properties.extend(description_properties(first, category));
        builder.push(grid_item);

        let (tile_w, tile_h) = (first.width, first.height);
        let mut cell_ids = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let padded: Cow<'_, Image> = if (tile.width, tile.height) == (tile_w, tile_h) {
                Cow::Borrowed(*tile)
            } else {
                Cow::Owned(pad_cell(tile, tile_w, tile_h)?)
            };
            let id = builder.next_id();
            let mut item = self.encode_item(id, &padded, category, "")?;
            item.hidden = true;
            builder.push(item);
            cell_ids.push(id);
        }
        builder.add_reference(grid_id, b"dimg", cell_ids);
        tracing::trace!(item = grid_id, ?category, cells = tiles.len(), "added grid");
        Ok(grid_id)
    }

    /// Encode one tile into an `av01` item carrying `ispe`, `pixi` and `av1C`.
    fn encode_item(&mut self, id: ItemId, image: &Image, category: Category, name: &str) -> Result<Item> {
        let sample = self.codec.encode(image, category)?;
        if !sample.keyframe {
            return Err(Error::EncodeError(format!(
                "{:?} sample for item {} is not a keyframe",
                category, id
            )));
        }
        let av1c = match sample.av1c {
            Some(av1c) => av1c,
            None => Av1Config::for_image(image)?.to_bytes()?,
        };

        let mut item = Item::new(id, b"av01", name);
        item.data = sample.data;
        item.properties.push(Property::ImageSpatialExtents {
            width: image.width,
            height: image.height,
        });
        item.properties.push(pixel_information(image));
        item.properties.push(Property::Av1Config(av1c));
        tracing::trace!(item = id, ?category, bytes = item.data.len(), "encoded sample");
        Ok(item)
    }
}

/// Items under construction and the last id handed out.
#[derive(Default)]
struct ItemBuilder {
    container: Container,
    last_id: ItemId,
}

impl ItemBuilder {
    fn next_id(&mut self) -> ItemId {
        self.last_id += 1;
        self.last_id
    }

    fn push(&mut self, item: Item) {
        self.container.items.push(item);
    }

    fn item_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.container.items.iter_mut().find(|item| item.id == id)
    }

    fn set_hidden(&mut self, id: ItemId) {
        if let Some(item) = self.item_mut(id) {
            item.hidden = true;
        }
    }

    fn add_reference(&mut self, from: ItemId, reference_type: &[u8; 4], to: Vec<ItemId>) {
        if let Some(item) = self.item_mut(from) {
            item.references.push(ItemReference {
                reference_type: *reference_type,
                to,
            });
        }
    }
}

fn pixel_information(image: &Image) -> Property {
    Property::PixelInformation(vec![image.depth; image.yuv_format.plane_count()])
}

/// Properties that describe the whole image rather than one coded tile.
fn description_properties(image: &Image, category: Category) -> Vec<Property> {
    match category {
        Category::Alpha => vec![Property::AuxiliaryType(ALPHA_URN.into())],
        Category::Color | Category::GainMap => {
            let mut properties = vec![Property::ColorNclx {
                primaries: image.color_primaries,
                transfer: image.transfer_characteristics,
                matrix: image.matrix_coefficients,
                full_range: image.full_range,
            }];
            if category == Category::Color {
                if let Some(clli) = image.clli {
                    properties.push(Property::ContentLightLevel(clli));
                }
            }
            properties
        }
    }
}

/// Wrap the alpha plane of `cell` as a monochrome image.
fn alpha_image(cell: &Image) -> Result<Image> {
    let plane = cell
        .alpha
        .as_ref()
        .ok_or_else(|| Error::InvalidImageGrid("cells must either all have alpha or none".into()))?;
    let mut alpha = Image::new(cell.width, cell.height, cell.depth, avifgain_core::YuvFormat::Yuv400)?;
    alpha.color_primaries = ColorPrimaries::Unspecified;
    alpha.transfer_characteristics = TransferCharacteristics::Unspecified;
    alpha.matrix_coefficients = avifgain_core::MatrixCoefficients::Unspecified;
    alpha.planes = vec![plane.clone()];
    Ok(alpha)
}
