//! Growable stream writer with backpatched box sizes.

use alloc::format;
use alloc::vec::Vec;

use super::{BitCursor, FourCC, BOX_HEADER_SIZE};
use crate::fraction::{Fraction, UFraction};
use crate::types::{Error, Result};

/// Position of an open box whose size field is still a placeholder.
///
/// Returned by [`StreamWriter::write_box`] and consumed by
/// [`StreamWriter::finish_box`]. Markers must be finished in reverse order of
/// creation.
#[must_use = "an open box must be closed with StreamWriter::finish_box"]
#[derive(Debug, PartialEq, Eq)]
pub struct BoxMarker {
    offset: usize,
}

impl BoxMarker {
    /// Offset of the box's size field.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Sequential writer into an owned, growable buffer.
#[derive(Debug, Default)]
pub struct StreamWriter {
    data: Vec<u8>,
    cursor: BitCursor,
    open_boxes: Vec<usize>,
}

impl StreamWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut writer = Self::new();
        writer
            .data
            .try_reserve(capacity)
            .map_err(|_| Error::AllocationFailed(capacity))?;
        Ok(writer)
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        self.cursor.offset()
    }

    /// Current cursor.
    pub fn cursor(&self) -> BitCursor {
        self.cursor
    }

    /// Move the cursor to a byte offset at or before the end of the written
    /// data, so that fixed-width fields can be patched in place.
    pub fn set_offset(&mut self, offset: usize) -> Result<()> {
        self.cursor.require_aligned()?;
        if offset > self.data.len() {
            return Err(Error::InvalidArgument(format!(
                "offset {} is past the {} bytes written",
                offset,
                self.data.len()
            )));
        }
        self.cursor.set_offset(offset);
        Ok(())
    }

    /// Number of bytes written so far (the high-water mark).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Make sure the buffer covers `end` bytes, growing geometrically.
    fn make_room(&mut self, end: usize) -> Result<()> {
        if end > self.data.len() {
            let additional = end - self.data.len();
            self.data
                .try_reserve(additional)
                .map_err(|_| Error::AllocationFailed(additional))?;
            self.data.resize(end, 0);
        }
        Ok(())
    }

    /// Write raw bytes.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.cursor.require_aligned()?;
        let start = self.cursor.offset();
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| Error::LimitExceeded("stream offset overflow".into()))?;
        self.make_room(end)?;
        self.data[start..end].copy_from_slice(bytes);
        self.cursor.set_offset(end);
        Ok(())
    }

    /// Write the bytes of a string without a terminator.
    pub fn write_chars(&mut self, chars: &str) -> Result<()> {
        self.write(chars.as_bytes())
    }

    /// Write a string followed by a NUL terminator.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write(s.as_bytes())?;
        self.write_u8(0)
    }

    /// Write a `u8`.
    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write(&[v])
    }

    /// Write a big-endian `u16`.
    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Write a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Write a big-endian `u64`.
    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Write a big-endian `i32`.
    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Write `n` zero bytes.
    pub fn write_zeros(&mut self, n: usize) -> Result<()> {
        self.cursor.require_aligned()?;
        let start = self.cursor.offset();
        let end = start
            .checked_add(n)
            .ok_or_else(|| Error::LimitExceeded("stream offset overflow".into()))?;
        self.make_room(end)?;
        self.data[start..end].fill(0);
        self.cursor.set_offset(end);
        Ok(())
    }

    /// Write a signed fraction (`i32` numerator, `u32` denominator).
    pub fn write_fraction(&mut self, f: Fraction) -> Result<()> {
        self.write_i32(f.numerator)?;
        self.write_u32(f.denominator)
    }

    /// Write an unsigned fraction (`u32` numerator, `u32` denominator).
    pub fn write_ufraction(&mut self, f: UFraction) -> Result<()> {
        self.write_u32(f.numerator)?;
        self.write_u32(f.denominator)
    }

    /// Write the `bit_count` least significant bits of `value`, most
    /// significant first, starting at the current bit position.
    pub fn write_bits(&mut self, value: u32, bit_count: u32) -> Result<()> {
        if bit_count > 32 {
            return Err(Error::InvalidArgument(format!(
                "cannot write {} bits from a u32",
                bit_count
            )));
        }
        debug_assert!(
            bit_count == 32 || value >> bit_count == 0,
            "value {value:#x} does not fit in {bit_count} bits"
        );

        let mut remaining = bit_count;
        while remaining > 0 {
            if self.cursor.is_aligned() {
                let start = self.cursor.offset();
                self.make_room(start + 1)?;
                self.data[start] = 0;
                self.cursor.set_offset(start + 1);
            }
            let available = 8 - self.cursor.partial_bits() as u32;
            let n = remaining.min(available);
            remaining -= n;
            let bits = ((value >> remaining) & ((1u32 << n) - 1)) as u8;
            let index = self.cursor.offset() - 1;
            let shift = self.cursor.consume_bits(n as u8);
            self.data[index] |= bits << shift;
        }
        Ok(())
    }

    /// Open a box with a placeholder size.
    pub fn write_box(&mut self, box_type: &FourCC) -> Result<BoxMarker> {
        self.cursor.require_aligned()?;
        let offset = self.cursor.offset();
        self.write_u32(0)?;
        self.write(box_type)?;
        self.open_boxes.push(offset);
        Ok(BoxMarker { offset })
    }

    /// Open a full box (version + 24-bit flags) with a placeholder size.
    pub fn write_full_box(&mut self, box_type: &FourCC, version: u8, flags: u32) -> Result<BoxMarker> {
        if flags > 0x00ff_ffff {
            return Err(Error::InvalidArgument(format!(
                "box flags {:#x} do not fit in 24 bits",
                flags
            )));
        }
        let marker = self.write_box(box_type)?;
        self.write_u8(version)?;
        self.write(&flags.to_be_bytes()[1..])?;
        Ok(marker)
    }

    /// Close a box, patching its size field with everything written since
    /// it was opened (header included).
    pub fn finish_box(&mut self, marker: BoxMarker) -> Result<()> {
        self.cursor.require_aligned()?;
        debug_assert_eq!(
            self.open_boxes.last(),
            Some(&marker.offset),
            "box markers must be finished in LIFO order"
        );
        if let Some(pos) = self.open_boxes.iter().rposition(|&o| o == marker.offset) {
            self.open_boxes.remove(pos);
        }

        let end = self.cursor.offset();
        let size = end - marker.offset;
        debug_assert!(size >= BOX_HEADER_SIZE);
        let size = u32::try_from(size)
            .map_err(|_| Error::LimitExceeded(format!("box of {} bytes needs a 64-bit size", size)))?;
        self.data[marker.offset..marker.offset + 4].copy_from_slice(&size.to_be_bytes());
        Ok(())
    }

    /// Number of boxes opened but not finished.
    pub fn open_box_count(&self) -> usize {
        self.open_boxes.len()
    }

    /// Finish writing, returning the bytes up to the current offset.
    pub fn finish_write(mut self) -> Vec<u8> {
        debug_assert!(self.open_boxes.is_empty(), "unfinished boxes at end of stream");
        self.data.truncate(self.cursor.offset());
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_integers_big_endian() {
        let mut w = StreamWriter::new();
        w.write_u8(0x01).unwrap();
        w.write_u16(0x0203).unwrap();
        w.write_u32(0x04050607).unwrap();
        w.write_u64(0x08).unwrap();
        w.write_i32(-2).unwrap();
        assert_eq!(
            w.finish_write(),
            [1, 2, 3, 4, 5, 6, 7, 0, 0, 0, 0, 0, 0, 0, 8, 0xff, 0xff, 0xff, 0xfe]
        );
    }

    #[test]
    fn test_write_string_and_zeros() {
        let mut w = StreamWriter::new();
        w.write_string("av01").unwrap();
        w.write_zeros(3).unwrap();
        w.write_chars("ab").unwrap();
        assert_eq!(w.finish_write(), b"av01\0\0\0\0ab");
    }

    #[test]
    fn test_set_offset_patches_in_place() {
        let mut w = StreamWriter::new();
        w.write_u32(0).unwrap();
        w.write_u32(0xaaaa_aaaa).unwrap();
        let end = w.offset();
        w.set_offset(0).unwrap();
        w.write_u32(0x1234_5678).unwrap();
        w.set_offset(end).unwrap();
        w.write_u8(1).unwrap();
        assert!(w.set_offset(100).is_err());
        assert_eq!(
            w.finish_write(),
            [0x12, 0x34, 0x56, 0x78, 0xaa, 0xaa, 0xaa, 0xaa, 1]
        );
    }

    #[test]
    fn test_full_box_header_layout() {
        let mut w = StreamWriter::new();
        let marker = w.write_full_box(b"pixi", 0, 0x010203).unwrap();
        assert_eq!(marker.offset(), 0);
        w.write_u8(3).unwrap();
        w.finish_box(marker).unwrap();
        assert_eq!(
            w.finish_write(),
            [0, 0, 0, 13, b'p', b'i', b'x', b'i', 0, 1, 2, 3, 3]
        );
    }

    #[test]
    fn test_full_box_rejects_wide_flags() {
        let mut w = StreamWriter::new();
        assert!(matches!(
            w.write_full_box(b"meta", 0, 0x0100_0000),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_open_box_tracking() {
        let mut w = StreamWriter::new();
        let a = w.write_box(b"aaaa").unwrap();
        let b = w.write_box(b"bbbb").unwrap();
        assert_eq!(w.open_box_count(), 2);
        w.finish_box(b).unwrap();
        w.finish_box(a).unwrap();
        assert_eq!(w.open_box_count(), 0);
        assert_eq!(w.finish_write().len(), 16);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "LIFO")]
    fn test_out_of_order_finish_asserts() {
        let mut w = StreamWriter::new();
        let a = w.write_box(b"aaaa").unwrap();
        let _b = w.write_box(b"bbbb").unwrap();
        let _ = w.finish_box(a);
    }

    #[test]
    fn test_write_bits_then_bytes_requires_alignment() {
        let mut w = StreamWriter::new();
        w.write_bits(0x5, 3).unwrap();
        w.write_bits(0, 5).unwrap();
        w.write_u8(0xff).unwrap();
        assert_eq!(w.finish_write(), [0xa0, 0xff]);
    }

    #[test]
    fn test_write_bits_width_limit() {
        let mut w = StreamWriter::new();
        assert!(w.write_bits(0, 33).is_err());
        w.write_bits(u32::MAX, 32).unwrap();
        assert_eq!(w.finish_write(), [0xff; 4]);
    }
}
