//! Boundary between the container layer and an AV1 codec.
//!
//! The container never touches AV1 bitstreams itself. Callers plug in an
//! encoder and a decoder through [`Av1Encoder`] and [`Av1Decoder`]; each call
//! handles exactly one coded sample.

use avifgain_core::stream::{StreamReader, StreamWriter};
use avifgain_core::{Error, Image, Result, YuvFormat};

/// Which plane group a coded sample carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Color (YUV) planes of the primary image.
    Color,
    /// Alpha plane, coded as a monochrome image.
    Alpha,
    /// Gain map planes.
    GainMap,
}

/// Output of an encoder for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// Coded AV1 data (a sequence of OBUs).
    pub data: Vec<u8>,
    /// True when the sample is a keyframe.
    pub keyframe: bool,
    /// `av1C` configuration payload, if the encoder produced one.
    ///
    /// When absent the container derives one from the image description.
    pub av1c: Option<Vec<u8>>,
}

/// Input of a decoder for one coded item.
#[derive(Debug, Clone, Copy)]
pub struct DecodeSample<'a> {
    /// Coded AV1 data.
    pub data: &'a [u8],
    /// Item the data belongs to.
    pub item_id: u32,
    /// True when the sample is a keyframe.
    pub keyframe: bool,
    /// Only output frames of this spatial layer, if set.
    pub spatial_id: Option<u8>,
}

/// Encodes one image into one AV1 sample.
pub trait Av1Encoder {
    /// Encode `image`. Alpha samples receive a monochrome image.
    fn encode(&mut self, image: &Image, category: Category) -> Result<EncodedSample>;
}

/// Decodes one AV1 sample into planes.
pub trait Av1Decoder {
    /// Decode `sample`. The returned image must carry allocated planes.
    fn decode(&mut self, sample: &DecodeSample<'_>, category: Category) -> Result<Image>;
}

impl<T: Av1Encoder + ?Sized> Av1Encoder for &mut T {
    fn encode(&mut self, image: &Image, category: Category) -> Result<EncodedSample> {
        (**self).encode(image, category)
    }
}

impl<T: Av1Decoder + ?Sized> Av1Decoder for &mut T {
    fn decode(&mut self, sample: &DecodeSample<'_>, category: Category) -> Result<Image> {
        (**self).decode(sample, category)
    }
}

/// AV1 codec configuration record, the payload of an `av1C` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Av1Config {
    /// `seq_profile` (0 main, 1 high, 2 professional).
    pub seq_profile: u8,
    /// `seq_level_idx[0]`.
    pub seq_level_idx_0: u8,
    /// `seq_tier[0]`.
    pub seq_tier_0: bool,
    /// More than 8 bits per sample.
    pub high_bitdepth: bool,
    /// 12 bits per sample (requires `high_bitdepth`).
    pub twelve_bit: bool,
    /// Luma only.
    pub monochrome: bool,
    /// Horizontal chroma subsampling.
    pub chroma_subsampling_x: bool,
    /// Vertical chroma subsampling.
    pub chroma_subsampling_y: bool,
    /// `chroma_sample_position`.
    pub chroma_sample_position: u8,
    /// Configuration OBUs following the fixed fields.
    pub config_obus: Vec<u8>,
}

/// Level 31 means "maximum parameters" and places no constraint on size.
const SEQ_LEVEL_MAX_PARAMETERS: u8 = 31;

impl Av1Config {
    /// Derive a configuration record from an image description.
    pub fn for_image(image: &Image) -> Result<Self> {
        if !matches!(image.depth, 8 | 10 | 12) {
            return Err(Error::UnsupportedDepth(image.depth as u32));
        }
        let twelve_bit = image.depth == 12;
        let seq_profile = match image.yuv_format {
            _ if twelve_bit => 2,
            YuvFormat::Yuv422 => 2,
            YuvFormat::Yuv444 => 1,
            YuvFormat::Yuv420 | YuvFormat::Yuv400 => 0,
        };
        let (shift_x, shift_y) = match image.yuv_format {
            // Monochrome streams signal 4:2:0 subsampling.
            YuvFormat::Yuv400 => (1, 1),
            format => format.chroma_shift(),
        };
        Ok(Self {
            seq_profile,
            seq_level_idx_0: SEQ_LEVEL_MAX_PARAMETERS,
            seq_tier_0: false,
            high_bitdepth: image.depth > 8,
            twelve_bit,
            monochrome: image.yuv_format == YuvFormat::Yuv400,
            chroma_subsampling_x: shift_x == 1,
            chroma_subsampling_y: shift_y == 1,
            chroma_sample_position: 0,
            config_obus: Vec::new(),
        })
    }

    /// Bits per sample.
    pub fn depth(&self) -> u8 {
        match (self.high_bitdepth, self.twelve_bit) {
            (false, _) => 8,
            (true, false) => 10,
            (true, true) => 12,
        }
    }

    /// Chroma layout described by the record.
    pub fn yuv_format(&self) -> YuvFormat {
        match (self.monochrome, self.chroma_subsampling_x, self.chroma_subsampling_y) {
            (true, _, _) => YuvFormat::Yuv400,
            (false, true, true) => YuvFormat::Yuv420,
            (false, true, false) => YuvFormat::Yuv422,
            (false, false, _) => YuvFormat::Yuv444,
        }
    }

    /// Serialize as an `av1C` payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = StreamWriter::with_capacity(4 + self.config_obus.len())?;
        w.write_bits(1, 1)?; // marker
        w.write_bits(1, 7)?; // version
        w.write_bits(self.seq_profile as u32, 3)?;
        w.write_bits(self.seq_level_idx_0 as u32, 5)?;
        w.write_bits(self.seq_tier_0 as u32, 1)?;
        w.write_bits(self.high_bitdepth as u32, 1)?;
        w.write_bits(self.twelve_bit as u32, 1)?;
        w.write_bits(self.monochrome as u32, 1)?;
        w.write_bits(self.chroma_subsampling_x as u32, 1)?;
        w.write_bits(self.chroma_subsampling_y as u32, 1)?;
        w.write_bits(self.chroma_sample_position as u32, 2)?;
        w.write_bits(0, 3)?; // reserved
        w.write_bits(0, 1)?; // initial_presentation_delay_present
        w.write_bits(0, 4)?; // reserved
        w.write(&self.config_obus)?;
        Ok(w.finish_write())
    }

    /// Parse an `av1C` payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = StreamReader::new(data, "av1C");
        let marker = r.read_bits_u8(1)?;
        let version = r.read_bits_u8(7)?;
        if marker != 1 || version != 1 {
            return Err(Error::BmffParse(format!(
                "av1C: unsupported marker {} / version {}",
                marker, version
            )));
        }
        let seq_profile = r.read_bits_u8(3)?;
        let seq_level_idx_0 = r.read_bits_u8(5)?;
        let seq_tier_0 = r.read_bool()?;
        let high_bitdepth = r.read_bool()?;
        let twelve_bit = r.read_bool()?;
        let monochrome = r.read_bool()?;
        let chroma_subsampling_x = r.read_bool()?;
        let chroma_subsampling_y = r.read_bool()?;
        let chroma_sample_position = r.read_bits_u8(2)?;
        r.skip_bits(8)?; // reserved + initial_presentation_delay
        if twelve_bit && !high_bitdepth {
            return Err(Error::BmffParse("av1C: twelve_bit without high_bitdepth".into()));
        }
        let config_obus = r.current().to_vec();
        Ok(Self {
            seq_profile,
            seq_level_idx_0,
            seq_tier_0,
            high_bitdepth,
            twelve_bit,
            monochrome,
            chroma_subsampling_x,
            chroma_subsampling_y,
            chroma_sample_position,
            config_obus,
        })
    }

    /// Check that a decoded image matches this record.
    pub(crate) fn check_decoded(&self, image: &Image) -> Result<()> {
        if image.depth != self.depth() || image.yuv_format != self.yuv_format() {
            return Err(Error::DecodeError(format!(
                "decoded {}-bit {:?} image, av1C declares {}-bit {:?}",
                image.depth,
                image.yuv_format,
                self.depth(),
                self.yuv_format()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(depth: u8, format: YuvFormat) -> Image {
        Image::new(16, 16, depth, format).unwrap()
    }

    #[test]
    fn test_profile_selection() {
        let cases = [
            (8, YuvFormat::Yuv420, 0),
            (10, YuvFormat::Yuv400, 0),
            (8, YuvFormat::Yuv444, 1),
            (10, YuvFormat::Yuv422, 2),
            (12, YuvFormat::Yuv420, 2),
        ];
        for (depth, format, profile) in cases {
            let config = Av1Config::for_image(&image(depth, format)).unwrap();
            assert_eq!(config.seq_profile, profile, "{} {:?}", depth, format);
            assert_eq!(config.depth(), depth);
            assert_eq!(config.yuv_format(), format);
        }
    }

    #[test]
    fn test_sixteen_bit_rejected() {
        assert!(matches!(
            Av1Config::for_image(&image(16, YuvFormat::Yuv444)),
            Err(Error::UnsupportedDepth(16))
        ));
    }

    #[test]
    fn test_known_bytes() {
        // 8-bit 4:2:0, profile 0, level 31.
        let config = Av1Config::for_image(&image(8, YuvFormat::Yuv420)).unwrap();
        assert_eq!(config.to_bytes().unwrap(), [0x81, 0x1f, 0x0c, 0x00]);

        let parsed = Av1Config::parse(&[0x81, 0x1f, 0x0c, 0x00, 0x0a, 0x0b]).unwrap();
        assert_eq!(parsed.yuv_format(), YuvFormat::Yuv420);
        assert_eq!(parsed.config_obus, [0x0a, 0x0b]);
    }

    #[test]
    fn test_parse_rejects_bad_marker() {
        assert!(Av1Config::parse(&[0x01, 0x1f, 0x0c, 0x00]).is_err());
        assert!(Av1Config::parse(&[0x81, 0x1f]).is_err());
    }

    #[test]
    fn test_check_decoded() {
        let config = Av1Config::for_image(&image(10, YuvFormat::Yuv444)).unwrap();
        assert!(config.check_decoded(&image(10, YuvFormat::Yuv444)).is_ok());
        assert!(matches!(
            config.check_decoded(&image(8, YuvFormat::Yuv444)),
            Err(Error::DecodeError(_))
        ));
    }
}
