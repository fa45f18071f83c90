//! HEIF item container for AVIF still images.
//!
//! A [`Container`] is the item-level view of a file: which items exist, what
//! bytes they carry, which properties describe them and how they reference
//! each other. [`Container::to_bytes`] lays it out as `ftyp`, `meta` and
//! `mdat`; [`Container::parse`] reads it back.
//!
//! # Layout written
//!
//! ```text
//! ftyp
//! meta
//!   hdlr (pict)
//!   pitm
//!   iloc (v0, 32-bit offsets patched after mdat is written)
//!   iinf / infe (v2)
//!   iref (dimg, auxl)
//!   iprp / ipco + ipma
//!   grpl / altr
//! mdat
//! ```

use avifgain_core::limits::MAX_ITEM_COUNT;
use avifgain_core::stream::{fourcc_str, BoxHeader, FourCC, StreamReader, StreamWriter};
use avifgain_core::{
    ColorPrimaries, ContentLightLevel, Error, MatrixCoefficients, Result, TransferCharacteristics,
};

/// Item identifier. Zero is reserved.
pub type ItemId = u32;

/// Auxiliary type URN of an alpha plane.
pub const ALPHA_URN: &str = "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha";

/// `lsel` value meaning "no layer selected".
const LAYER_ID_ABSENT: u16 = 0xFFFF;

/// Descriptive or transformative item property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// `ispe`: image size.
    ImageSpatialExtents {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// `pixi`: bits per channel.
    PixelInformation(Vec<u8>),
    /// `colr` with colour type `nclx`.
    ColorNclx {
        /// Color primaries.
        primaries: ColorPrimaries,
        /// Transfer characteristics.
        transfer: TransferCharacteristics,
        /// Matrix coefficients.
        matrix: MatrixCoefficients,
        /// Full (true) or limited range.
        full_range: bool,
    },
    /// `clli`: content light level.
    ContentLightLevel(ContentLightLevel),
    /// `av1C`: AV1 configuration record, kept as raw bytes.
    Av1Config(Vec<u8>),
    /// `lsel`: layer selector.
    LayerSelector(u16),
    /// `auxC`: auxiliary image type URN.
    AuxiliaryType(String),
    /// Any property this crate does not interpret.
    Other {
        /// Box type of the property.
        box_type: FourCC,
        /// Whether some item marks it essential.
        essential: bool,
    },
}

impl Property {
    /// Box type of the property.
    pub fn box_type(&self) -> FourCC {
        match self {
            Property::ImageSpatialExtents { .. } => *b"ispe",
            Property::PixelInformation(_) => *b"pixi",
            Property::ColorNclx { .. } => *b"colr",
            Property::ContentLightLevel(_) => *b"clli",
            Property::Av1Config(_) => *b"av1C",
            Property::LayerSelector(_) => *b"lsel",
            Property::AuxiliaryType(_) => *b"auxC",
            Property::Other { box_type, .. } => *box_type,
        }
    }

    /// Properties a reader must understand to use the item.
    fn is_essential(&self) -> bool {
        match self {
            Property::Av1Config(_) | Property::LayerSelector(_) => true,
            Property::Other { essential, .. } => *essential,
            _ => false,
        }
    }

    fn write(&self, w: &mut StreamWriter) -> Result<()> {
        match self {
            Property::ImageSpatialExtents { width, height } => {
                let b = w.write_full_box(b"ispe", 0, 0)?;
                w.write_u32(*width)?;
                w.write_u32(*height)?;
                w.finish_box(b)
            }
            Property::PixelInformation(depths) => {
                let count = u8::try_from(depths.len())
                    .map_err(|_| Error::InvalidArgument(format!("{} pixi channels", depths.len())))?;
                let b = w.write_full_box(b"pixi", 0, 0)?;
                w.write_u8(count)?;
                w.write(depths)?;
                w.finish_box(b)
            }
            Property::ColorNclx {
                primaries,
                transfer,
                matrix,
                full_range,
            } => {
                let b = w.write_box(b"colr")?;
                w.write_chars("nclx")?;
                w.write_u16(primaries.code())?;
                w.write_u16(transfer.code())?;
                w.write_u16(matrix.code())?;
                w.write_bits(*full_range as u32, 1)?;
                w.write_bits(0, 7)?;
                w.finish_box(b)
            }
            Property::ContentLightLevel(clli) => {
                let b = w.write_box(b"clli")?;
                w.write_u16(clli.max_cll)?;
                w.write_u16(clli.max_pall)?;
                w.finish_box(b)
            }
            Property::Av1Config(payload) => {
                let b = w.write_box(b"av1C")?;
                w.write(payload)?;
                w.finish_box(b)
            }
            Property::LayerSelector(layer) => {
                let b = w.write_box(b"lsel")?;
                w.write_u16(*layer)?;
                w.finish_box(b)
            }
            Property::AuxiliaryType(urn) => {
                let b = w.write_full_box(b"auxC", 0, 0)?;
                w.write_string(urn)?;
                w.finish_box(b)
            }
            Property::Other { box_type, .. } => Err(Error::InvalidArgument(format!(
                "cannot serialize uninterpreted property [{}]",
                fourcc_str(box_type)
            ))),
        }
    }

    fn parse(header: &BoxHeader, r: &mut StreamReader<'_>) -> Result<Self> {
        let property = match &header.box_type {
            b"ispe" => {
                r.read_and_enforce_version(0)?;
                Property::ImageSpatialExtents {
                    width: r.read_u32()?,
                    height: r.read_u32()?,
                }
            }
            b"pixi" => {
                r.read_and_enforce_version(0)?;
                let count = r.read_u8()? as usize;
                Property::PixelInformation(r.read(count)?.to_vec())
            }
            b"colr" => {
                let colour_type = r.read_fourcc()?;
                if &colour_type != b"nclx" {
                    tracing::trace!(colour_type = %fourcc_str(&colour_type), "ignoring colr");
                    return Ok(Property::Other {
                        box_type: header.box_type,
                        essential: false,
                    });
                }
                let primaries = ColorPrimaries::from_code(r.read_u16()?);
                let transfer = TransferCharacteristics::from_code(r.read_u16()?);
                let matrix = MatrixCoefficients::from_code(r.read_u16()?);
                let full_range = r.read_bool()?;
                r.skip_bits(7)?;
                Property::ColorNclx {
                    primaries,
                    transfer,
                    matrix,
                    full_range,
                }
            }
            b"clli" => Property::ContentLightLevel(ContentLightLevel {
                max_cll: r.read_u16()?,
                max_pall: r.read_u16()?,
            }),
            b"av1C" => Property::Av1Config(r.current().to_vec()),
            b"lsel" => Property::LayerSelector(r.read_u16()?),
            b"auxC" => {
                r.read_and_enforce_version(0)?;
                let remaining = r.remaining_bytes();
                Property::AuxiliaryType(r.read_string(remaining)?)
            }
            _ => Property::Other {
                box_type: header.box_type,
                essential: false,
            },
        };
        Ok(property)
    }
}

/// References of one type from an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReference {
    /// Reference type (`dimg`, `auxl`, ...).
    pub reference_type: FourCC,
    /// Referenced items, in order.
    pub to: Vec<ItemId>,
}

/// One item of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Item identifier.
    pub id: ItemId,
    /// Item type (`av01`, `grid`, `tmap`, ...).
    pub item_type: FourCC,
    /// Item name.
    pub name: String,
    /// Hidden items are not meant to be displayed on their own.
    pub hidden: bool,
    /// Item payload.
    pub data: Vec<u8>,
    /// Associated properties.
    pub properties: Vec<Property>,
    /// Outgoing references.
    pub references: Vec<ItemReference>,
}

impl Item {
    /// Create an item with no data, properties or references.
    pub fn new(id: ItemId, item_type: &FourCC, name: &str) -> Self {
        Self {
            id,
            item_type: *item_type,
            name: name.into(),
            hidden: false,
            data: Vec::new(),
            properties: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Items referenced with `reference_type`, empty if none.
    pub fn referenced(&self, reference_type: &FourCC) -> &[ItemId] {
        self.references
            .iter()
            .find(|r| &r.reference_type == reference_type)
            .map_or(&[], |r| r.to.as_slice())
    }

    /// `ispe` size.
    pub fn spatial_extents(&self) -> Option<(u32, u32)> {
        self.properties.iter().find_map(|p| match p {
            Property::ImageSpatialExtents { width, height } => Some((*width, *height)),
            _ => None,
        })
    }

    /// `pixi` channel depths.
    pub fn pixel_depths(&self) -> Option<&[u8]> {
        self.properties.iter().find_map(|p| match p {
            Property::PixelInformation(depths) => Some(depths.as_slice()),
            _ => None,
        })
    }

    /// `colr nclx` as `(primaries, transfer, matrix, full_range)`.
    pub fn color(&self) -> Option<(ColorPrimaries, TransferCharacteristics, MatrixCoefficients, bool)> {
        self.properties.iter().find_map(|p| match p {
            Property::ColorNclx {
                primaries,
                transfer,
                matrix,
                full_range,
            } => Some((*primaries, *transfer, *matrix, *full_range)),
            _ => None,
        })
    }

    /// `clli` content light level.
    pub fn content_light_level(&self) -> Option<ContentLightLevel> {
        self.properties.iter().find_map(|p| match p {
            Property::ContentLightLevel(clli) => Some(*clli),
            _ => None,
        })
    }

    /// Raw `av1C` payload.
    pub fn av1_config(&self) -> Option<&[u8]> {
        self.properties.iter().find_map(|p| match p {
            Property::Av1Config(payload) => Some(payload.as_slice()),
            _ => None,
        })
    }

    /// Selected layer, `None` when absent or set to "all layers".
    pub fn layer_selector(&self) -> Option<u16> {
        self.properties.iter().find_map(|p| match p {
            Property::LayerSelector(layer) if *layer != LAYER_ID_ABSENT => Some(*layer),
            _ => None,
        })
    }

    /// `auxC` type URN.
    pub fn auxiliary_type(&self) -> Option<&str> {
        self.properties.iter().find_map(|p| match p {
            Property::AuxiliaryType(urn) => Some(urn.as_str()),
            _ => None,
        })
    }

    /// Essential properties this crate cannot interpret.
    pub fn unsupported_essential(&self) -> Option<FourCC> {
        self.properties.iter().find_map(|p| match p {
            Property::Other {
                box_type,
                essential: true,
            } => Some(*box_type),
            _ => None,
        })
    }
}

/// An `altr` entity group: alternatives, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeGroup {
    /// Group identifier (shares the item id space).
    pub group_id: u32,
    /// Member entities.
    pub entities: Vec<ItemId>,
}

/// Item-level view of an AVIF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// `ftyp` major brand.
    pub major_brand: FourCC,
    /// `ftyp` compatible brands.
    pub compatible_brands: Vec<FourCC>,
    /// Primary item.
    pub primary_item: ItemId,
    /// Items in `iinf` order.
    pub items: Vec<Item>,
    /// `altr` groups.
    pub alternative_groups: Vec<AlternativeGroup>,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            major_brand: *b"avif",
            compatible_brands: vec![*b"avif", *b"mif1", *b"miaf"],
            primary_item: 1,
            items: Vec::new(),
            alternative_groups: Vec::new(),
        }
    }
}

impl Container {
    /// Look up an item.
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    /// The primary item.
    pub fn primary(&self) -> Result<&Item> {
        self.item(self.primary_item).ok_or_else(|| {
            Error::BmffParse(format!("primary item {} does not exist", self.primary_item))
        })
    }

    /// True when `brand` is the major or a compatible brand.
    pub fn has_brand(&self, brand: &FourCC) -> bool {
        &self.major_brand == brand || self.compatible_brands.contains(brand)
    }

    /// Find the gain map of the primary item.
    ///
    /// Returns `(tmap item, gain map item)` for the first `tmap` item whose
    /// `dimg` inputs are the primary item followed by the gain map.
    pub fn gain_map_items(&self) -> Option<(ItemId, ItemId)> {
        self.items
            .iter()
            .filter(|item| &item.item_type == b"tmap")
            .find_map(|item| match item.referenced(b"dimg") {
                [base, gain_map] if *base == self.primary_item => Some((item.id, *gain_map)),
                _ => None,
            })
    }

    /// Find the alpha auxiliary item of `id`.
    pub fn alpha_item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| {
            item.referenced(b"auxl").contains(&id) && item.auxiliary_type() == Some(ALPHA_URN)
        })
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Serialize the container.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload: usize = self.items.iter().map(|item| item.data.len()).sum();
        let mut w = StreamWriter::with_capacity(payload + 1024)?;

        let ftyp = w.write_box(b"ftyp")?;
        w.write(&self.major_brand)?;
        w.write_u32(0)?; // minor version
        for brand in &self.compatible_brands {
            w.write(brand)?;
        }
        w.finish_box(ftyp)?;

        let meta = w.write_full_box(b"meta", 0, 0)?;
        self.write_hdlr(&mut w)?;

        let pitm = w.write_full_box(b"pitm", 0, 0)?;
        w.write_u16(short_id(self.primary_item)?)?;
        w.finish_box(pitm)?;

        let extent_offsets = self.write_iloc(&mut w)?;
        self.write_iinf(&mut w)?;
        self.write_iref(&mut w)?;
        self.write_iprp(&mut w)?;
        self.write_grpl(&mut w)?;
        w.finish_box(meta)?;

        let mdat = w.write_box(b"mdat")?;
        let mut data_offsets = Vec::with_capacity(self.items.len());
        for item in &self.items {
            data_offsets.push(w.offset());
            w.write(&item.data)?;
        }
        w.finish_box(mdat)?;

        let end = w.offset();
        for (patch_at, data_offset) in extent_offsets.into_iter().zip(data_offsets) {
            let offset = u32::try_from(data_offset)
                .map_err(|_| Error::LimitExceeded(format!("item offset {} needs 64 bits", data_offset)))?;
            w.set_offset(patch_at)?;
            w.write_u32(offset)?;
        }
        w.set_offset(end)?;

        tracing::debug!(items = self.items.len(), bytes = end, "wrote container");
        Ok(w.finish_write())
    }

    fn write_hdlr(&self, w: &mut StreamWriter) -> Result<()> {
        let hdlr = w.write_full_box(b"hdlr", 0, 0)?;
        w.write_u32(0)?; // pre_defined
        w.write_chars("pict")?;
        w.write_zeros(12)?; // reserved
        w.write_string("")?;
        w.finish_box(hdlr)
    }

    /// Write `iloc` with placeholder offsets, returning where each item's
    /// offset must be patched.
    fn write_iloc(&self, w: &mut StreamWriter) -> Result<Vec<usize>> {
        let count = u16::try_from(self.items.len())
            .map_err(|_| Error::LimitExceeded(format!("{} items", self.items.len())))?;
        let iloc = w.write_full_box(b"iloc", 0, 0)?;
        w.write_bits(4, 4)?; // offset_size
        w.write_bits(4, 4)?; // length_size
        w.write_bits(0, 4)?; // base_offset_size
        w.write_bits(0, 4)?; // reserved
        w.write_u16(count)?;
        let mut patches = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let length = u32::try_from(item.data.len())
                .map_err(|_| Error::LimitExceeded(format!("item of {} bytes", item.data.len())))?;
            w.write_u16(short_id(item.id)?)?;
            w.write_u16(0)?; // data_reference_index
            w.write_u16(1)?; // extent_count
            patches.push(w.offset());
            w.write_u32(0)?;
            w.write_u32(length)?;
        }
        w.finish_box(iloc)?;
        Ok(patches)
    }

    fn write_iinf(&self, w: &mut StreamWriter) -> Result<()> {
        let iinf = w.write_full_box(b"iinf", 0, 0)?;
        w.write_u16(self.items.len() as u16)?;
        for item in &self.items {
            let infe = w.write_full_box(b"infe", 2, item.hidden as u32)?;
            w.write_u16(short_id(item.id)?)?;
            w.write_u16(0)?; // item_protection_index
            w.write(&item.item_type)?;
            w.write_string(&item.name)?;
            w.finish_box(infe)?;
        }
        w.finish_box(iinf)
    }

    fn write_iref(&self, w: &mut StreamWriter) -> Result<()> {
        if self.items.iter().all(|item| item.references.is_empty()) {
            return Ok(());
        }
        let iref = w.write_full_box(b"iref", 0, 0)?;
        for item in &self.items {
            for reference in &item.references {
                let count = u16::try_from(reference.to.len())
                    .map_err(|_| Error::LimitExceeded(format!("{} references", reference.to.len())))?;
                let b = w.write_box(&reference.reference_type)?;
                w.write_u16(short_id(item.id)?)?;
                w.write_u16(count)?;
                for &to in &reference.to {
                    w.write_u16(short_id(to)?)?;
                }
                w.finish_box(b)?;
            }
        }
        w.finish_box(iref)
    }

    fn write_iprp(&self, w: &mut StreamWriter) -> Result<()> {
        // Identical properties are stored once and shared.
        let mut unique: Vec<&Property> = Vec::new();
        let mut associations: Vec<Vec<(usize, bool)>> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let mut item_assoc = Vec::with_capacity(item.properties.len());
            for property in &item.properties {
                let index = match unique.iter().position(|p| *p == property) {
                    Some(index) => index,
                    None => {
                        unique.push(property);
                        unique.len() - 1
                    }
                };
                item_assoc.push((index + 1, property.is_essential()));
            }
            associations.push(item_assoc);
        }

        let iprp = w.write_box(b"iprp")?;
        let ipco = w.write_box(b"ipco")?;
        for property in &unique {
            property.write(w)?;
        }
        w.finish_box(ipco)?;

        let large_indices = unique.len() > 0x7f;
        if unique.len() > 0x7fff {
            return Err(Error::LimitExceeded(format!("{} properties", unique.len())));
        }
        let ipma = w.write_full_box(b"ipma", 0, large_indices as u32)?;
        let with_props = self
            .items
            .iter()
            .zip(&associations)
            .filter(|(_, assoc)| !assoc.is_empty());
        w.write_u32(with_props.clone().count() as u32)?;
        for (item, assoc) in with_props {
            let count = u8::try_from(assoc.len())
                .map_err(|_| Error::LimitExceeded(format!("{} properties on one item", assoc.len())))?;
            w.write_u16(short_id(item.id)?)?;
            w.write_u8(count)?;
            for &(index, essential) in assoc {
                w.write_bits(essential as u32, 1)?;
                w.write_bits(index as u32, if large_indices { 15 } else { 7 })?;
            }
        }
        w.finish_box(ipma)?;
        w.finish_box(iprp)
    }

    fn write_grpl(&self, w: &mut StreamWriter) -> Result<()> {
        if self.alternative_groups.is_empty() {
            return Ok(());
        }
        let grpl = w.write_box(b"grpl")?;
        for group in &self.alternative_groups {
            let altr = w.write_full_box(b"altr", 0, 0)?;
            w.write_u32(group.group_id)?;
            w.write_u32(group.entities.len() as u32)?;
            for &entity in &group.entities {
                w.write_u32(entity)?;
            }
            w.finish_box(altr)?;
        }
        w.finish_box(grpl)
    }

    // ------------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------------

    /// Parse a complete file.
    ///
    /// Top-level boxes may extend to the end of the file (size 0); nested
    /// boxes must fit inside their parent.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = StreamReader::new(data, "file");
        let mut ftyp: Option<(FourCC, Vec<FourCC>)> = None;
        let mut meta: Option<MetaBox<'_>> = None;

        while r.remaining_bytes() > 0 {
            let header = r.read_box_header_partial(true)?;
            let mut content = r.box_content(&header)?;
            match &header.box_type {
                b"ftyp" => ftyp = Some(parse_ftyp(&mut content)?),
                b"meta" => {
                    if meta.is_some() {
                        return Err(Error::BmffParse("multiple top-level meta boxes".into()));
                    }
                    meta = Some(MetaBox::parse(&mut content)?);
                }
                _ => {
                    tracing::trace!(box_type = %header.type_str(), unbounded = header.is_unbounded(), "skipping top-level box");
                }
            }
        }

        let (major_brand, compatible_brands) =
            ftyp.ok_or_else(|| Error::BmffParse("missing ftyp box".into()))?;
        let meta = meta.ok_or_else(|| Error::BmffParse("missing meta box".into()))?;
        let container = meta.into_container(data, major_brand, compatible_brands)?;
        tracing::debug!(
            items = container.items.len(),
            primary = container.primary_item,
            "parsed container"
        );
        Ok(container)
    }
}

fn short_id(id: ItemId) -> Result<u16> {
    match u16::try_from(id) {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(Error::InvalidArgument(format!("item id {} is not in 1..=65535", id))),
    }
}

fn parse_ftyp(r: &mut StreamReader<'_>) -> Result<(FourCC, Vec<FourCC>)> {
    let major = r.read_fourcc()?;
    r.skip(4)?; // minor version
    let mut compatible = Vec::with_capacity(r.remaining_bytes() / 4);
    while r.remaining_bytes() >= 4 {
        compatible.push(r.read_fourcc()?);
    }
    Ok((major, compatible))
}

/// Location of an item's bytes.
struct ItemLocation {
    id: ItemId,
    construction_method: u8,
    extents: Vec<(u64, u64)>,
}

struct ItemInfo {
    id: ItemId,
    item_type: FourCC,
    name: String,
    hidden: bool,
}

/// Raw contents of a `meta` box before items are assembled.
#[derive(Default)]
struct MetaBox<'a> {
    primary_item: Option<ItemId>,
    locations: Vec<ItemLocation>,
    infos: Vec<ItemInfo>,
    references: Vec<(ItemId, ItemReference)>,
    properties: Vec<Property>,
    associations: Vec<(ItemId, Vec<(usize, bool)>)>,
    groups: Vec<AlternativeGroup>,
    idat: Option<&'a [u8]>,
}

impl<'a> MetaBox<'a> {
    fn parse(r: &mut StreamReader<'a>) -> Result<Self> {
        r.read_and_enforce_version(0)?;
        let mut meta = MetaBox::default();
        let mut seen_hdlr = false;
        while r.remaining_bytes() > 0 {
            let header = r.read_box_header()?;
            let mut content = r.box_content(&header)?;
            match &header.box_type {
                b"hdlr" => {
                    parse_hdlr(&mut content)?;
                    seen_hdlr = true;
                }
                b"pitm" => {
                    let (version, _) = content.read_version_and_flags()?;
                    let id = if version == 0 {
                        content.read_u16()? as u32
                    } else {
                        content.read_u32()?
                    };
                    meta.primary_item = Some(id);
                }
                b"iloc" => meta.locations = parse_iloc(&mut content)?,
                b"iinf" => meta.infos = parse_iinf(&mut content)?,
                b"iref" => meta.references = parse_iref(&mut content)?,
                b"iprp" => meta.parse_iprp(&mut content)?,
                b"grpl" => meta.groups = parse_grpl(&mut content)?,
                b"idat" => meta.idat = Some(content.current()),
                _ => tracing::trace!(box_type = %header.type_str(), "skipping meta child"),
            }
        }
        if !seen_hdlr {
            return Err(Error::BmffParse("meta box has no hdlr".into()));
        }
        Ok(meta)
    }

    fn parse_iprp(&mut self, r: &mut StreamReader<'a>) -> Result<()> {
        while r.remaining_bytes() > 0 {
            let header = r.read_box_header()?;
            let mut content = r.box_content(&header)?;
            match &header.box_type {
                b"ipco" => {
                    while content.remaining_bytes() > 0 {
                        let prop_header = content.read_box_header()?;
                        let mut prop = content.box_content(&prop_header)?;
                        self.properties.push(Property::parse(&prop_header, &mut prop)?);
                    }
                }
                b"ipma" => {
                    let (version, flags) = content.read_version_and_flags()?;
                    let entry_count = content.read_u32()?;
                    for _ in 0..entry_count {
                        let id = if version < 1 {
                            content.read_u16()? as u32
                        } else {
                            content.read_u32()?
                        };
                        let count = content.read_u8()?;
                        let mut assoc = Vec::with_capacity(count as usize);
                        for _ in 0..count {
                            let essential = content.read_bool()?;
                            let index = if flags & 1 != 0 {
                                content.read_bits_u16(15)? as usize
                            } else {
                                content.read_bits_u8(7)? as usize
                            };
                            assoc.push((index, essential));
                        }
                        self.associations.push((id, assoc));
                    }
                }
                _ => tracing::trace!(box_type = %header.type_str(), "skipping iprp child"),
            }
        }
        Ok(())
    }

    fn into_container(self, file: &[u8], major_brand: FourCC, compatible_brands: Vec<FourCC>) -> Result<Container> {
        let primary_item = self
            .primary_item
            .ok_or_else(|| Error::BmffParse("meta box has no pitm".into()))?;

        let mut items: Vec<Item> = Vec::with_capacity(self.infos.len());
        for info in self.infos {
            if info.id == 0 || items.iter().any(|item| item.id == info.id) {
                return Err(Error::BmffParse(format!("invalid or duplicate item id {}", info.id)));
            }
            let mut item = Item::new(info.id, &info.item_type, &info.name);
            item.hidden = info.hidden;
            items.push(item);
        }

        // Extents may not reference more bytes in total than the file holds,
        // so overlapping extents cannot amplify a small input.
        let mut assembled = 0usize;
        for location in &self.locations {
            let Some(item) = items.iter_mut().find(|item| item.id == location.id) else {
                continue;
            };
            let source = match location.construction_method {
                0 => file,
                1 => self
                    .idat
                    .ok_or_else(|| Error::BmffParse(format!("item {} uses a missing idat", item.id)))?,
                method => {
                    return Err(Error::BmffParse(format!(
                        "item {} uses unsupported construction method {}",
                        item.id, method
                    )))
                }
            };
            for &(offset, length) in &location.extents {
                let range = usize::try_from(offset)
                    .ok()
                    .zip(usize::try_from(length).ok())
                    .and_then(|(start, len)| Some(start..start.checked_add(len)?))
                    .filter(|range| range.end <= source.len())
                    .ok_or_else(|| {
                        Error::Truncated(format!(
                            "item {} extent {}+{} is outside the {} available bytes",
                            item.id,
                            offset,
                            length,
                            source.len()
                        ))
                    })?;
                assembled = assembled.saturating_add(range.len());
                if assembled > file.len() {
                    return Err(Error::LimitExceeded(format!(
                        "item extents reference {} bytes in a {} byte file",
                        assembled,
                        file.len()
                    )));
                }
                item.data
                    .try_reserve(range.len())
                    .map_err(|_| Error::AllocationFailed(range.len()))?;
                item.data.extend_from_slice(&source[range]);
            }
        }

        for (from, reference) in self.references {
            if let Some(item) = items.iter_mut().find(|item| item.id == from) {
                item.references.push(reference);
            }
        }

        for (id, assoc) in self.associations {
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                continue;
            };
            for (index, essential) in assoc {
                if index == 0 {
                    continue;
                }
                let property = self.properties.get(index - 1).ok_or_else(|| {
                    Error::BmffParse(format!(
                        "item {} references property {} of {}",
                        id,
                        index,
                        self.properties.len()
                    ))
                })?;
                let property = match property {
                    Property::Other { box_type, .. } => Property::Other {
                        box_type: *box_type,
                        essential,
                    },
                    known => known.clone(),
                };
                item.properties.push(property);
            }
        }

        Ok(Container {
            major_brand,
            compatible_brands,
            primary_item,
            items,
            alternative_groups: self.groups,
        })
    }
}

fn parse_hdlr(r: &mut StreamReader<'_>) -> Result<()> {
    r.read_and_enforce_version(0)?;
    r.skip(4)?; // pre_defined
    let handler = r.read_fourcc()?;
    if &handler != b"pict" {
        return Err(Error::BmffParse(format!(
            "handler type [{}] is not pict",
            fourcc_str(&handler)
        )));
    }
    Ok(())
}

fn parse_iloc(r: &mut StreamReader<'_>) -> Result<Vec<ItemLocation>> {
    let (version, _) = r.read_version_and_flags()?;
    if version > 2 {
        return Err(Error::BmffParse(format!("unsupported iloc version {}", version)));
    }
    let offset_size = r.read_bits_u8(4)?;
    let length_size = r.read_bits_u8(4)?;
    let base_offset_size = r.read_bits_u8(4)?;
    let index_size = if version >= 1 {
        r.read_bits_u8(4)?
    } else {
        r.skip_bits(4)?; // reserved
        0
    };
    for size in [offset_size, length_size, base_offset_size, index_size] {
        if !matches!(size, 0 | 4 | 8) {
            return Err(Error::BmffParse(format!("invalid iloc field size {}", size)));
        }
    }

    let item_count = if version < 2 { r.read_u16()? as u32 } else { r.read_u32()? };
    if item_count as usize > MAX_ITEM_COUNT {
        return Err(Error::LimitExceeded(format!("{} iloc items", item_count)));
    }
    let mut locations = Vec::with_capacity(item_count as usize);
    for _ in 0..item_count {
        let id = if version < 2 { r.read_u16()? as u32 } else { r.read_u32()? };
        let construction_method = if version >= 1 {
            r.skip_bits(12)?;
            r.read_bits_u8(4)?
        } else {
            0
        };
        r.skip(2)?; // data_reference_index
        let base_offset = r.read_ux8(base_offset_size)?;
        let extent_count = r.read_u16()?;
        let mut extents = Vec::with_capacity(extent_count as usize);
        for _ in 0..extent_count {
            if version >= 1 && index_size > 0 {
                r.read_ux8(index_size)?;
            }
            let offset = r.read_ux8(offset_size)?;
            let length = r.read_ux8(length_size)?;
            let start = base_offset
                .checked_add(offset)
                .ok_or_else(|| Error::BmffParse(format!("item {} offset overflows", id)))?;
            extents.push((start, length));
        }
        locations.push(ItemLocation {
            id,
            construction_method,
            extents,
        });
    }
    Ok(locations)
}

fn parse_iinf(r: &mut StreamReader<'_>) -> Result<Vec<ItemInfo>> {
    let (version, _) = r.read_version_and_flags()?;
    let entry_count = if version == 0 { r.read_u16()? as u32 } else { r.read_u32()? };
    if entry_count as usize > MAX_ITEM_COUNT {
        return Err(Error::LimitExceeded(format!(
            "{} items exceeds maximum {}",
            entry_count, MAX_ITEM_COUNT
        )));
    }
    let mut infos = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let header = r.read_box_header()?;
        let mut infe = r.box_content(&header)?;
        if &header.box_type != b"infe" {
            return Err(Error::BmffParse(format!(
                "unexpected [{}] in iinf",
                header.type_str()
            )));
        }
        let (version, flags) = infe.read_version_and_flags()?;
        if version < 2 {
            return Err(Error::BmffParse(format!("unsupported infe version {}", version)));
        }
        let id = if version == 2 { infe.read_u16()? as u32 } else { infe.read_u32()? };
        infe.skip(2)?; // item_protection_index
        let item_type = infe.read_fourcc()?;
        let remaining = infe.remaining_bytes();
        let name = infe.read_string(remaining)?;
        infos.push(ItemInfo {
            id,
            item_type,
            name,
            hidden: flags & 1 != 0,
        });
    }
    Ok(infos)
}

fn parse_iref(r: &mut StreamReader<'_>) -> Result<Vec<(ItemId, ItemReference)>> {
    let (version, _) = r.read_version_and_flags()?;
    let read_id = |r: &mut StreamReader<'_>| -> Result<ItemId> {
        if version == 0 {
            Ok(r.read_u16()? as u32)
        } else {
            r.read_u32()
        }
    };
    let mut references = Vec::new();
    while r.remaining_bytes() > 0 {
        let header = r.read_box_header()?;
        let mut content = r.box_content(&header)?;
        let from = read_id(&mut content)?;
        let count = content.read_u16()?;
        let mut to = Vec::with_capacity(count as usize);
        for _ in 0..count {
            to.push(read_id(&mut content)?);
        }
        references.push((
            from,
            ItemReference {
                reference_type: header.box_type,
                to,
            },
        ));
    }
    Ok(references)
}

fn parse_grpl(r: &mut StreamReader<'_>) -> Result<Vec<AlternativeGroup>> {
    let mut groups = Vec::new();
    while r.remaining_bytes() > 0 {
        let header = r.read_box_header()?;
        let mut content = r.box_content(&header)?;
        if &header.box_type != b"altr" {
            continue;
        }
        content.read_and_enforce_version(0)?;
        let group_id = content.read_u32()?;
        let count = content.read_u32()?;
        if count as usize > MAX_ITEM_COUNT {
            return Err(Error::LimitExceeded(format!("{} entities in one group", count)));
        }
        let mut entities = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entities.push(content.read_u32()?);
        }
        groups.push(AlternativeGroup { group_id, entities });
    }
    Ok(groups)
}
