//! ISO 21496-1 gain map metadata, as carried in the payload of a `tmap` item.
//!
//! The writer picks the most compact encoding: a single channel when all three
//! channels are bit-identical, and a shared denominator when every written
//! denominator is equal. The reader accepts any combination.

use alloc::format;
use alloc::vec::Vec;

use super::GainMapMetadata;
use crate::fraction::{Fraction, UFraction};
use crate::limits;
use crate::stream::{StreamReader, StreamWriter};
use crate::types::{Error, Result};

/// Payload version understood by this implementation.
pub const TMAP_VERSION: u8 = 0;
/// Oldest reader version able to parse what we write.
pub const TMAP_MINIMUM_VERSION: u16 = 0;
/// Version of the writer that produced the payload.
pub const TMAP_WRITER_VERSION: u16 = 0;

/// Every denominator that will be written, in write order.
fn written_denominators(metadata: &GainMapMetadata, channels: usize) -> Vec<u32> {
    let mut dens = Vec::with_capacity(2 + channels * 5);
    dens.push(metadata.base_hdr_headroom.denominator);
    dens.push(metadata.alternate_hdr_headroom.denominator);
    for c in 0..channels {
        dens.push(metadata.gain_map_min[c].denominator);
        dens.push(metadata.gain_map_max[c].denominator);
        dens.push(metadata.gain_map_gamma[c].denominator);
        dens.push(metadata.base_offset[c].denominator);
        dens.push(metadata.alternate_offset[c].denominator);
    }
    dens
}

/// Append the metadata payload to `writer`.
pub fn write_gainmap_metadata(writer: &mut StreamWriter, metadata: &GainMapMetadata) -> Result<()> {
    metadata.validate()?;

    let channels = if metadata.channels_identical() { 1 } else { 3 };
    let dens = written_denominators(metadata, channels);
    let common_denominator = dens.iter().all(|&d| d == dens[0]);

    writer.write_u8(TMAP_VERSION)?;
    writer.write_u16(TMAP_MINIMUM_VERSION)?;
    writer.write_u16(TMAP_WRITER_VERSION)?;

    writer.write_bits((channels == 3) as u32, 1)?;
    writer.write_bits(metadata.use_base_color_space as u32, 1)?;
    writer.write_bits(metadata.backward_direction as u32, 1)?;
    writer.write_bits(common_denominator as u32, 1)?;
    writer.write_bits(0, 4)?;

    if common_denominator {
        writer.write_u32(dens[0])?;
        writer.write_u32(metadata.base_hdr_headroom.numerator)?;
        writer.write_u32(metadata.alternate_hdr_headroom.numerator)?;
        for c in 0..channels {
            writer.write_i32(metadata.gain_map_min[c].numerator)?;
            writer.write_i32(metadata.gain_map_max[c].numerator)?;
            writer.write_u32(metadata.gain_map_gamma[c].numerator)?;
            writer.write_i32(metadata.base_offset[c].numerator)?;
            writer.write_i32(metadata.alternate_offset[c].numerator)?;
        }
    } else {
        writer.write_ufraction(metadata.base_hdr_headroom)?;
        writer.write_ufraction(metadata.alternate_hdr_headroom)?;
        for c in 0..channels {
            writer.write_fraction(metadata.gain_map_min[c])?;
            writer.write_fraction(metadata.gain_map_max[c])?;
            writer.write_ufraction(metadata.gain_map_gamma[c])?;
            writer.write_fraction(metadata.base_offset[c])?;
            writer.write_fraction(metadata.alternate_offset[c])?;
        }
    }

    tracing::trace!(channels, common_denominator, "wrote gain map metadata");
    Ok(())
}

/// Serialize metadata to a standalone `tmap` payload.
pub fn serialize_tmap(metadata: &GainMapMetadata) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::with_capacity(64)?;
    write_gainmap_metadata(&mut writer, metadata)?;
    Ok(writer.finish_write())
}

/// Parse the metadata payload from `reader`.
///
/// Returns `Ok(None)` when the payload uses a version this implementation does
/// not understand; such gain maps are ignored rather than treated as errors.
pub fn read_gainmap_metadata(reader: &mut StreamReader<'_>) -> Result<Option<GainMapMetadata>> {
    let version = reader.read_u8()?;
    if version != TMAP_VERSION {
        tracing::debug!(version, "ignoring gain map metadata with unsupported version");
        return Ok(None);
    }
    let minimum_version = reader.read_u16()?;
    if minimum_version > TMAP_MINIMUM_VERSION {
        tracing::debug!(
            minimum_version,
            "ignoring gain map metadata that requires a newer reader"
        );
        return Ok(None);
    }
    let writer_version = reader.read_u16()?;
    if writer_version < minimum_version {
        return Err(Error::InvalidMetadata(format!(
            "writer version {} is older than minimum version {}",
            writer_version, minimum_version
        )));
    }

    let is_multichannel = reader.read_bool()?;
    let use_base_color_space = reader.read_bool()?;
    let backward_direction = reader.read_bool()?;
    let use_common_denominator = reader.read_bool()?;
    reader.skip_bits(4)?;

    let channels = if is_multichannel { 3 } else { 1 };
    let mut metadata = GainMapMetadata {
        use_base_color_space,
        backward_direction,
        ..Default::default()
    };

    if use_common_denominator {
        let d = reader.read_u32()?;
        metadata.base_hdr_headroom = UFraction::new(reader.read_u32()?, d);
        metadata.alternate_hdr_headroom = UFraction::new(reader.read_u32()?, d);
        for c in 0..channels {
            metadata.gain_map_min[c] = Fraction::new(reader.read_i32()?, d);
            metadata.gain_map_max[c] = Fraction::new(reader.read_i32()?, d);
            metadata.gain_map_gamma[c] = UFraction::new(reader.read_u32()?, d);
            metadata.base_offset[c] = Fraction::new(reader.read_i32()?, d);
            metadata.alternate_offset[c] = Fraction::new(reader.read_i32()?, d);
        }
    } else {
        metadata.base_hdr_headroom = reader.read_ufraction()?;
        metadata.alternate_hdr_headroom = reader.read_ufraction()?;
        for c in 0..channels {
            metadata.gain_map_min[c] = reader.read_fraction()?;
            metadata.gain_map_max[c] = reader.read_fraction()?;
            metadata.gain_map_gamma[c] = reader.read_ufraction()?;
            metadata.base_offset[c] = reader.read_fraction()?;
            metadata.alternate_offset[c] = reader.read_fraction()?;
        }
    }

    if channels == 1 {
        for c in 1..3 {
            metadata.gain_map_min[c] = metadata.gain_map_min[0];
            metadata.gain_map_max[c] = metadata.gain_map_max[0];
            metadata.gain_map_gamma[c] = metadata.gain_map_gamma[0];
            metadata.base_offset[c] = metadata.base_offset[0];
            metadata.alternate_offset[c] = metadata.alternate_offset[0];
        }
    }

    // A newer writer may append fields we do not know about.
    if writer_version <= TMAP_WRITER_VERSION && reader.has_bytes_left(1) {
        return Err(Error::InvalidMetadata(format!(
            "{} unexpected trailing bytes",
            reader.remaining_bytes()
        )));
    }

    metadata.validate()?;
    Ok(Some(metadata))
}

/// Parse a standalone `tmap` payload.
pub fn parse_tmap(data: &[u8]) -> Result<Option<GainMapMetadata>> {
    if data.len() > limits::MAX_TMAP_PAYLOAD {
        return Err(Error::LimitExceeded(format!(
            "tmap payload of {} bytes exceeds {}",
            data.len(),
            limits::MAX_TMAP_PAYLOAD
        )));
    }
    let mut reader = StreamReader::new(data, "tmap");
    read_gainmap_metadata(&mut reader)
}
