//! Bit-exact reading and writing of ISOBMFF structures.
//!
//! [`StreamReader`] parses an immutable byte slice and [`StreamWriter`] emits
//! into a growable buffer. Both track position with a [`BitCursor`], so
//! byte-aligned fields and sub-byte bit fields can be mixed freely as long as
//! byte-aligned calls happen on a byte boundary.
//!
//! Boxes whose size is not known up front are written with a
//! [`BoxMarker`]: the header is emitted with a placeholder size and patched
//! once the body is complete.

mod reader;
mod writer;

pub use reader::StreamReader;
pub use writer::{BoxMarker, StreamWriter};

use crate::types::{Error, Result};

/// A four-character box or item type.
pub type FourCC = [u8; 4];

/// Size of a compact box header (32-bit size + type).
pub const BOX_HEADER_SIZE: usize = 8;

/// Size of a full box header (compact header + version + flags).
pub const FULL_BOX_HEADER_SIZE: usize = 12;

/// Position within a stream: a byte offset plus the number of bits already
/// used in the byte just before it.
///
/// When `partial_bits` is 0 the cursor sits on a byte boundary. Otherwise the
/// byte at `offset - 1` is partially consumed (or emitted).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitCursor {
    offset: usize,
    partial_bits: u8,
}

impl BitCursor {
    /// Byte offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bits used in the current partial byte (0..=7).
    #[inline]
    pub fn partial_bits(&self) -> u8 {
        self.partial_bits
    }

    /// True on a byte boundary.
    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.partial_bits == 0
    }

    /// Fail unless on a byte boundary.
    ///
    /// Mid-byte byte operations are a caller bug, so debug builds assert.
    #[inline]
    pub(crate) fn require_aligned(&self) -> Result<()> {
        debug_assert!(
            self.partial_bits == 0,
            "byte-aligned stream operation with {} bits pending",
            self.partial_bits
        );
        if self.partial_bits != 0 {
            return Err(Error::Misaligned(self.partial_bits));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
        self.partial_bits = 0;
    }

    /// Account for `bits` bits consumed from the current partial byte.
    /// Returns the shift that places those bits at the bottom of the byte.
    #[inline]
    pub(crate) fn consume_bits(&mut self, bits: u8) -> u8 {
        debug_assert!(bits >= 1 && self.partial_bits + bits <= 8);
        self.partial_bits += bits;
        let shift = 8 - self.partial_bits;
        if self.partial_bits == 8 {
            self.partial_bits = 0;
        }
        shift
    }
}

/// Declared extent of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxSize {
    /// Content size in bytes, excluding the header.
    Fixed(usize),
    /// The box extends to the end of the enclosing stream. Only valid at top level.
    UntilEndOfStream,
}

/// A parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type.
    pub box_type: FourCC,
    /// Extended type, present only for `uuid` boxes.
    pub extended_type: Option<[u8; 16]>,
    /// Content extent.
    pub size: BoxSize,
}

impl BoxHeader {
    /// True when the box extends to the end of the stream.
    pub fn is_unbounded(&self) -> bool {
        self.size == BoxSize::UntilEndOfStream
    }

    /// Content size, resolving an unbounded box against `remaining` bytes.
    pub fn content_size(&self, remaining: usize) -> usize {
        match self.size {
            BoxSize::Fixed(size) => size,
            BoxSize::UntilEndOfStream => remaining,
        }
    }

    /// Type as a printable string, for diagnostics.
    pub fn type_str(&self) -> alloc::string::String {
        fourcc_str(&self.box_type)
    }
}

/// Render a FourCC for diagnostics, replacing non-printable bytes.
pub fn fourcc_str(fourcc: &FourCC) -> alloc::string::String {
    fourcc
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraction::{Fraction, UFraction};

    #[test]
    fn test_cursor_consume_bits() {
        let mut cursor = BitCursor::default();
        cursor.set_offset(1);
        assert_eq!(cursor.consume_bits(3), 5);
        assert_eq!(cursor.partial_bits(), 3);
        assert!(!cursor.is_aligned());
        assert_eq!(cursor.consume_bits(5), 0);
        assert!(cursor.is_aligned());
    }

    #[test]
    fn test_bits_straddling_byte_boundaries() {
        let mut writer = StreamWriter::new();
        writer.write_bits(0b101, 3).unwrap();
        writer.write_bits(0x1abc, 13).unwrap();
        writer.write_bits(0x3, 2).unwrap();
        writer.write_bits(0x2aaaa, 18).unwrap();
        writer.write_bits(0, 4).unwrap();
        let data = writer.finish_write();
        assert_eq!(data.len(), 5);

        let mut reader = StreamReader::new(&data, "bits");
        assert_eq!(reader.read_bits_u8(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits_u16(13).unwrap(), 0x1abc);
        assert_eq!(reader.read_bits_u8(2).unwrap(), 0x3);
        assert_eq!(reader.read_bits_u32(18).unwrap(), 0x2aaaa);
        reader.skip_bits(4).unwrap();
        assert!(!reader.has_bytes_left(1));
    }

    #[test]
    fn test_bits_msb_first_layout() {
        let mut writer = StreamWriter::new();
        writer.write_bits(1, 1).unwrap();
        writer.write_bits(0, 1).unwrap();
        writer.write_bits(1, 1).unwrap();
        writer.write_bits(0, 5).unwrap();
        writer.write_u8(0x7f).unwrap();
        assert_eq!(writer.finish_write(), [0xa0, 0x7f]);
    }

    #[test]
    fn test_nested_boxes_sizes() {
        let mut writer = StreamWriter::new();
        let outer = writer.write_box(b"moov").unwrap();
        let middle = writer.write_full_box(b"meta", 0, 0).unwrap();
        let inner = writer.write_box(b"free").unwrap();
        writer.write_zeros(5).unwrap();
        writer.finish_box(inner).unwrap();
        let leaf = writer.write_full_box(b"pitm", 1, 0x000102).unwrap();
        writer.write_u32(7).unwrap();
        writer.finish_box(leaf).unwrap();
        writer.finish_box(middle).unwrap();
        writer.write_chars("tail").unwrap();
        writer.finish_box(outer).unwrap();
        let data = writer.finish_write();

        let mut reader = StreamReader::new(&data, "file");
        let moov = reader.read_box_header().unwrap();
        assert_eq!(&moov.box_type, b"moov");
        assert_eq!(moov.size, BoxSize::Fixed(data.len() - BOX_HEADER_SIZE));

        let mut moov_content = reader.box_content(&moov).unwrap();
        let meta = moov_content.read_box_header().unwrap();
        assert_eq!(&meta.box_type, b"meta");
        // version/flags + free(8 + 5) + pitm(12 + 4)
        assert_eq!(meta.size, BoxSize::Fixed(4 + 13 + 16));

        let mut meta_content = moov_content.box_content(&meta).unwrap();
        assert_eq!(meta_content.read_version_and_flags().unwrap(), (0, 0));
        let free = meta_content.read_box_header().unwrap();
        assert_eq!(free.size, BoxSize::Fixed(5));
        meta_content.skip(5).unwrap();
        let pitm = meta_content.read_box_header().unwrap();
        assert_eq!(&pitm.box_type, b"pitm");
        let mut pitm_content = meta_content.box_content(&pitm).unwrap();
        assert_eq!(pitm_content.read_and_enforce_version(1).unwrap(), 0x000102);
        assert_eq!(pitm_content.read_u32().unwrap(), 7);
        assert!(!meta_content.has_bytes_left(1));

        let mut tail = [0u8; 4];
        moov_content.read_into(&mut tail).unwrap();
        assert_eq!(&tail, b"tail");
    }

    #[test]
    fn test_fraction_fields_roundtrip() {
        let mut writer = StreamWriter::new();
        writer.write_fraction(Fraction::new(-7, 3)).unwrap();
        writer.write_ufraction(UFraction::new(u32::MAX, 2)).unwrap();
        let data = writer.finish_write();

        let mut reader = StreamReader::new(&data, "fractions");
        assert_eq!(reader.read_fraction().unwrap(), Fraction::new(-7, 3));
        assert_eq!(reader.read_ufraction().unwrap(), UFraction::new(u32::MAX, 2));
    }

    #[test]
    fn test_fourcc_str() {
        assert_eq!(fourcc_str(b"tmap"), "tmap");
        assert_eq!(fourcc_str(&[0x61, 0x00, 0x62, 0xff]), "a?b?");
    }
}
