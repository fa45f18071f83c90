//! Bounds-checked reading of byte-aligned fields, bit fields and box headers.

use alloc::format;
use alloc::string::String;

use super::{BitCursor, BoxHeader, BoxSize, FourCC};
use crate::fraction::{Fraction, UFraction};
use crate::types::{Error, Result};

/// Sequential reader over an immutable byte slice.
///
/// Every failing read leaves a descriptive error naming the stream context
/// (usually the enclosing box) and never reads out of bounds.
#[derive(Debug, Clone)]
pub struct StreamReader<'a> {
    data: &'a [u8],
    cursor: BitCursor,
    context: String,
}

impl<'a> StreamReader<'a> {
    /// Create a reader. `context` names the stream in error messages.
    pub fn new(data: &'a [u8], context: impl Into<String>) -> Self {
        Self {
            data,
            cursor: BitCursor::default(),
            context: context.into(),
        }
    }

    /// The whole underlying slice.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Current cursor.
    pub fn cursor(&self) -> BitCursor {
        self.cursor
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        self.cursor.offset()
    }

    /// Unread bytes, starting at the current offset.
    pub fn current(&self) -> &'a [u8] {
        &self.data[self.cursor.offset()..]
    }

    /// True if at least `n` bytes remain.
    pub fn has_bytes_left(&self, n: usize) -> bool {
        n <= self.remaining_bytes()
    }

    /// Number of bytes after the current offset.
    pub fn remaining_bytes(&self) -> usize {
        self.data.len() - self.cursor.offset()
    }

    fn truncated(&self, what: &str, needed: usize) -> Error {
        Error::Truncated(format!(
            "{}: failed to read {} ({} bytes needed, {} left)",
            self.context,
            what,
            needed,
            self.remaining_bytes()
        ))
    }

    /// Take `n` bytes, advancing past them.
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.cursor.require_aligned()?;
        if !self.has_bytes_left(n) {
            return Err(self.truncated(what, n));
        }
        let start = self.cursor.offset();
        self.cursor.set_offset(start + n);
        Ok(&self.data[start..start + n])
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let bytes = self.take(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n, "skipped bytes").map(|_| ())
    }

    /// Borrow the next `n` bytes.
    pub fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n, "bytes")
    }

    /// Fill `out` with the next `out.len()` bytes.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<()> {
        let bytes = self.take(out.len(), "bytes")?;
        out.copy_from_slice(bytes);
        Ok(())
    }

    /// Read a `u8`.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>("u8")?[0])
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array("u16")?))
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array("u16")?))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array("u32")?))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array("u32")?))
    }

    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array("u64")?))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array("i32")?))
    }

    /// Read `factor * 8` bits as a big-endian integer. A factor of 0 yields 0
    /// without consuming anything.
    ///
    /// Used for the variable-width offset/length fields of `iloc`.
    pub fn read_ux8(&mut self, factor: u8) -> Result<u64> {
        match factor {
            0 => Ok(0),
            1 => Ok(self.read_u8()? as u64),
            2 => Ok(self.read_u16()? as u64),
            4 => Ok(self.read_u32()? as u64),
            8 => self.read_u64(),
            3 | 5..=7 => {
                let bytes = self.take(factor as usize, "variable width integer")?;
                Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
            }
            _ => Err(Error::BmffParse(format!(
                "{}: unsupported integer width of {} bytes",
                self.context, factor
            ))),
        }
    }

    /// Read a string ending at a NUL byte (consumed, not returned), at the
    /// end of the stream, or after `max_len` bytes, whichever comes first.
    pub fn read_string(&mut self, max_len: usize) -> Result<String> {
        self.cursor.require_aligned()?;
        let start = self.cursor.offset();
        let limit = self.remaining_bytes().min(max_len);
        let window = &self.data[start..start + limit];
        let (text, consumed) = match window.iter().position(|&b| b == 0) {
            Some(nul) => (&window[..nul], nul + 1),
            None => (window, window.len()),
        };
        let text = core::str::from_utf8(text).map_err(|_| {
            Error::BmffParse(format!("{}: string is not valid UTF-8", self.context))
        })?;
        self.cursor.set_offset(start + consumed);
        Ok(String::from(text))
    }

    /// Read a four-character code.
    pub fn read_fourcc(&mut self) -> Result<FourCC> {
        self.take_array("four-character code")
    }

    /// Read a signed fraction (`i32` numerator, `u32` denominator).
    pub fn read_fraction(&mut self) -> Result<Fraction> {
        let numerator = self.read_i32()?;
        let denominator = self.read_u32()?;
        Ok(Fraction::new(numerator, denominator))
    }

    /// Read an unsigned fraction (`u32` numerator, `u32` denominator).
    pub fn read_ufraction(&mut self) -> Result<UFraction> {
        let numerator = self.read_u32()?;
        let denominator = self.read_u32()?;
        Ok(UFraction::new(numerator, denominator))
    }

    // ------------------------------------------------------------------------
    // Bit fields
    // ------------------------------------------------------------------------

    /// Read up to 32 bits, most significant bit first.
    pub fn read_bits_u32(&mut self, bit_count: u32) -> Result<u32> {
        if bit_count > 32 {
            return Err(Error::InvalidArgument(format!(
                "cannot read {} bits into a u32",
                bit_count
            )));
        }

        let mut value = 0u32;
        let mut remaining = bit_count;
        while remaining > 0 {
            if self.cursor.is_aligned() {
                if !self.has_bytes_left(1) {
                    return Err(self.truncated("bit field", 1));
                }
                let next = self.cursor.offset() + 1;
                self.cursor.set_offset(next);
            }
            let packed = self.data[self.cursor.offset() - 1];
            let available = 8 - self.cursor.partial_bits() as u32;
            let n = remaining.min(available);
            remaining -= n;
            let shift = self.cursor.consume_bits(n as u8);
            let bits = (packed as u32 >> shift) & ((1u32 << n) - 1);
            value |= bits << remaining;
        }
        Ok(value)
    }

    /// Read up to 16 bits.
    pub fn read_bits_u16(&mut self, bit_count: u32) -> Result<u16> {
        if bit_count > 16 {
            return Err(Error::InvalidArgument(format!(
                "cannot read {} bits into a u16",
                bit_count
            )));
        }
        Ok(self.read_bits_u32(bit_count)? as u16)
    }

    /// Read up to 8 bits.
    pub fn read_bits_u8(&mut self, bit_count: u32) -> Result<u8> {
        if bit_count > 8 {
            return Err(Error::InvalidArgument(format!(
                "cannot read {} bits into a u8",
                bit_count
            )));
        }
        Ok(self.read_bits_u32(bit_count)? as u8)
    }

    /// Read one bit as a boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits_u8(1)? == 1)
    }

    /// Skip `bit_count` bits.
    pub fn skip_bits(&mut self, mut bit_count: u32) -> Result<()> {
        while bit_count > 0 {
            let n = bit_count.min(32);
            self.read_bits_u32(n)?;
            bit_count -= n;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Boxes
    // ------------------------------------------------------------------------

    /// Read a box header once the header itself is available, even if the
    /// declared content is not (yet) in the buffer.
    ///
    /// A size of 0 means "until end of stream" and is only accepted when
    /// `top_level` is set.
    pub fn read_box_header_partial(&mut self, top_level: bool) -> Result<BoxHeader> {
        let start = self.cursor.offset();

        let size32 = self.read_u32()?;
        let box_type = self.read_fourcc()?;
        let wire_size = if size32 == 1 { self.read_u64()? } else { size32 as u64 };
        let extended_type = if &box_type == b"uuid" {
            Some(self.take_array::<16>("extended type")?)
        } else {
            None
        };

        let header_size = (self.cursor.offset() - start) as u64;
        let size = if size32 == 0 {
            if !top_level {
                return Err(Error::BmffParse(format!(
                    "{}: box [{}] has size 0 but is not a top-level box",
                    self.context,
                    super::fourcc_str(&box_type)
                )));
            }
            BoxSize::UntilEndOfStream
        } else {
            if wire_size < header_size {
                return Err(Error::BmffParse(format!(
                    "{}: box [{}] size {} is smaller than its {} byte header",
                    self.context,
                    super::fourcc_str(&box_type),
                    wire_size,
                    header_size
                )));
            }
            let content = usize::try_from(wire_size - header_size).map_err(|_| {
                Error::BmffParse(format!(
                    "{}: box [{}] size {} does not fit in memory",
                    self.context,
                    super::fourcc_str(&box_type),
                    wire_size
                ))
            })?;
            if self.cursor.offset().checked_add(content).is_none() {
                return Err(Error::BmffParse(format!(
                    "{}: box [{}] size {} overflows the stream offset",
                    self.context,
                    super::fourcc_str(&box_type),
                    wire_size
                )));
            }
            BoxSize::Fixed(content)
        };

        Ok(BoxHeader {
            box_type,
            extended_type,
            size,
        })
    }

    /// Read a box header whose declared content must fit in the remaining
    /// bytes of this stream.
    pub fn read_box_header(&mut self) -> Result<BoxHeader> {
        let header = self.read_box_header_partial(false)?;
        if let BoxSize::Fixed(size) = header.size {
            if !self.has_bytes_left(size) {
                return Err(Error::BmffParse(format!(
                    "{}: box [{}] declares {} content bytes but only {} remain",
                    self.context,
                    header.type_str(),
                    size,
                    self.remaining_bytes()
                )));
            }
        }
        Ok(header)
    }

    /// Split off a reader over the content of `header`, advancing past it.
    ///
    /// An unbounded box takes everything that remains.
    pub fn box_content(&mut self, header: &BoxHeader) -> Result<StreamReader<'a>> {
        let size = header.content_size(self.remaining_bytes());
        let context = format!("Box[{}]", header.type_str());
        self.sub_reader(size, context)
    }

    /// Split off a reader over the next `size` bytes, advancing past them.
    pub fn sub_reader(&mut self, size: usize, context: impl Into<String>) -> Result<StreamReader<'a>> {
        let context = context.into();
        if !self.has_bytes_left(size) {
            return Err(Error::Truncated(format!(
                "{}: {} needs {} bytes, {} left",
                self.context,
                context,
                size,
                self.remaining_bytes()
            )));
        }
        let bytes = self.take(size, "box content")?;
        Ok(StreamReader::new(bytes, context))
    }

    /// Read the version and 24-bit flags of a full box.
    pub fn read_version_and_flags(&mut self) -> Result<(u8, u32)> {
        let version = self.read_u8()?;
        let flags = self.take_array::<3>("flags")?;
        Ok((
            version,
            (flags[0] as u32) << 16 | (flags[1] as u32) << 8 | flags[2] as u32,
        ))
    }

    /// Read the version and flags of a full box, requiring `expected` version.
    /// Returns the flags.
    pub fn read_and_enforce_version(&mut self, expected: u8) -> Result<u32> {
        let (version, flags) = self.read_version_and_flags()?;
        if version != expected {
            return Err(Error::BmffParse(format!(
                "{}: expected box version {}, got {}",
                self.context, expected, version
            )));
        }
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_fixed_width_reads() {
        let data = [
            0x12, 0x34, 0x34, 0x12, 0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 0, 0, 1, 0,
        ];
        let mut r = StreamReader::new(&data, "ints");
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u16_le().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(r.read_u64().unwrap(), 256);
        assert_eq!(r.remaining_bytes(), 0);
    }

    #[test]
    fn test_truncated_read_does_not_advance() {
        let data = [1, 2, 3];
        let mut r = StreamReader::new(&data, "short");
        let err = r.read_u32().unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
        assert!(err.to_string().contains("short"), "{err}");
        assert_eq!(r.offset(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert!(r.skip(2).is_err());
        assert!(r.skip(1).is_ok());
    }

    #[test]
    fn test_read_ux8() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut r = StreamReader::new(&data, "ux8");
        assert_eq!(r.read_ux8(0).unwrap(), 0);
        assert_eq!(r.offset(), 0);
        assert_eq!(r.read_ux8(3).unwrap(), 0x010203);
        assert_eq!(r.read_ux8(4).unwrap(), 0x04050607);
        assert!(r.read_ux8(9).is_err());
    }

    #[test]
    fn test_read_string() {
        let data = b"pict\0rest";
        let mut r = StreamReader::new(data, "hdlr");
        assert_eq!(r.read_string(64).unwrap(), "pict");
        assert_eq!(r.remaining_bytes(), 4);
        assert_eq!(r.read_string(2).unwrap(), "re");
        assert_eq!(r.read_string(64).unwrap(), "st");
        assert_eq!(r.remaining_bytes(), 0);
        assert_eq!(r.read_string(64).unwrap(), "");
    }

    #[test]
    fn test_read_string_rejects_invalid_utf8() {
        let data = [b'a', 0xff, 0xfe, 0];
        let mut r = StreamReader::new(&data, "infe");
        assert!(matches!(r.read_string(16), Err(Error::BmffParse(_))));
        assert_eq!(r.offset(), 0);
    }

    #[test]
    fn test_bit_field_at_offset_five() {
        // 3-bit field starting at bit 5 of the first byte, spilling into the second.
        let data = [0b0000_0101, 0b1000_0000];
        let mut r = StreamReader::new(&data, "bits");
        r.skip_bits(5).unwrap();
        assert_eq!(r.read_bits_u8(3).unwrap(), 0b101);
        assert_eq!(r.read_bits_u8(1).unwrap(), 1);
        assert_eq!(r.cursor().partial_bits(), 1);
        assert!(r.read_bits_u8(9).is_err());
    }

    #[test]
    fn test_bits_past_end() {
        let data = [0xff];
        let mut r = StreamReader::new(&data, "bits");
        assert_eq!(r.read_bits_u8(6).unwrap(), 0x3f);
        assert!(matches!(r.read_bits_u8(3), Err(Error::Truncated(_))));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_misaligned_byte_read_fails_in_release() {
        let data = [0xff, 0x00];
        let mut r = StreamReader::new(&data, "bits");
        r.read_bits_u8(4).unwrap();
        assert!(matches!(r.read_u8(), Err(Error::Misaligned(4))));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "byte-aligned")]
    fn test_misaligned_byte_read_asserts_in_debug() {
        let data = [0xff, 0x00];
        let mut r = StreamReader::new(&data, "bits");
        r.read_bits_u8(4).unwrap();
        let _ = r.read_u8();
    }

    fn header_bytes(size: u32, box_type: &[u8; 4]) -> Vec<u8> {
        let mut v = size.to_be_bytes().to_vec();
        v.extend_from_slice(box_type);
        v
    }

    #[test]
    fn test_box_header_largesize_and_uuid() {
        let mut data = header_bytes(1, b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0xaa; 4]);
        let mut r = StreamReader::new(&data, "file");
        let h = r.read_box_header().unwrap();
        assert_eq!(h.size, BoxSize::Fixed(4));

        let mut data = header_bytes(8 + 16 + 2, b"uuid");
        data.extend_from_slice(&[7u8; 16]);
        data.extend_from_slice(&[1, 2]);
        let mut r = StreamReader::new(&data, "file");
        let h = r.read_box_header().unwrap();
        assert_eq!(h.extended_type, Some([7u8; 16]));
        assert_eq!(h.size, BoxSize::Fixed(2));
    }

    #[test]
    fn test_box_header_size_zero() {
        let mut data = header_bytes(0, b"mdat");
        data.extend_from_slice(&[1, 2, 3]);

        let mut r = StreamReader::new(&data, "file");
        let h = r.read_box_header_partial(true).unwrap();
        assert!(h.is_unbounded());
        assert_eq!(h.content_size(r.remaining_bytes()), 3);
        let content = r.box_content(&h).unwrap();
        assert_eq!(content.remaining_bytes(), 3);

        let mut r = StreamReader::new(&data, "meta");
        assert!(matches!(r.read_box_header(), Err(Error::BmffParse(_))));
    }

    #[test]
    fn test_box_header_strict_vs_partial() {
        let mut data = header_bytes(100, b"mdat");
        data.extend_from_slice(&[0; 10]);

        let mut r = StreamReader::new(&data, "file");
        let h = r.read_box_header_partial(true).unwrap();
        assert_eq!(h.size, BoxSize::Fixed(92));

        let mut r = StreamReader::new(&data, "file");
        let err = r.read_box_header().unwrap_err();
        assert!(err.to_string().contains("mdat"), "{err}");
    }

    #[test]
    fn test_box_header_too_small() {
        let data = header_bytes(4, b"free");
        let mut r = StreamReader::new(&data, "file");
        assert!(matches!(r.read_box_header_partial(true), Err(Error::BmffParse(_))));
    }

    #[test]
    fn test_box_header_largesize_overflow() {
        let mut data = alloc::vec![0u8; 8];
        data.extend_from_slice(&header_bytes(1, b"mdat"));
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        let mut r = StreamReader::new(&data, "file");
        r.skip(8).unwrap();
        assert!(matches!(r.read_box_header_partial(true), Err(Error::BmffParse(_))));
    }

    #[test]
    fn test_enforce_version() {
        let data = [1, 0, 0, 5];
        let mut r = StreamReader::new(&data, "pitm");
        assert!(r.clone().read_and_enforce_version(0).is_err());
        assert_eq!(r.read_and_enforce_version(1).unwrap(), 5);
    }
}
