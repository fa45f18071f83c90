//! Round-trip encoding/decoding tests.
//!
//! Every test encodes with the lossless raw codec and decodes the result, so
//! the decoded planes must match the input exactly.

mod common;

use avifgain::codec::Category;
use avifgain::color::yuv_to_rgb;
use avifgain::{
    apply_gainmap, compute_gainmap, Decoder, DecoderSettings, Encoder, EncoderSettings,
    GainMapConfig, GainMapState, RgbFormat, RgbImage, TransferCharacteristics, YuvFormat,
};
use common::{
    add_alpha_ramp, create_gain_map, create_hdr_alternate, create_sdr_gradient,
    create_yuv_pattern, psnr, split_into_cells, to_planar, RawCodec,
};

fn all_gain_map_settings() -> DecoderSettings {
    DecoderSettings::default()
        .with_gainmap_metadata(true)
        .with_gainmap_pixels(true)
}

// ============================================================================
// Single images
// ============================================================================

/// Test that planes and color description survive for every chroma layout.
#[test]
fn test_roundtrip_formats() {
    let formats = [
        (8, YuvFormat::Yuv420),
        (8, YuvFormat::Yuv422),
        (10, YuvFormat::Yuv444),
        (12, YuvFormat::Yuv400),
    ];
    for (depth, format) in formats {
        let mut image = create_yuv_pattern(33, 17, depth, format);
        image.full_range = false;
        image.clli = Some(avifgain::ContentLightLevel {
            max_cll: 400,
            max_pall: 100,
        });
        let bytes = Encoder::new(RawCodec::new()).encode(&image).unwrap();
        let decoded = Decoder::new(RawCodec::new()).decode(&bytes).unwrap();
        assert_eq!(decoded, image, "{}-bit {:?}", depth, format);
    }
}

/// Test that the alpha plane comes back unchanged.
#[test]
fn test_roundtrip_alpha() {
    let mut image = create_yuv_pattern(48, 32, 10, YuvFormat::Yuv420);
    add_alpha_ramp(&mut image);

    let mut codec = RawCodec::new();
    let bytes = Encoder::new(&mut codec).encode(&image).unwrap();
    assert_eq!(codec.encoded, [Category::Color, Category::Alpha]);

    let decoded = Decoder::new(&mut codec).decode(&bytes).unwrap();
    assert_eq!(codec.decoded, [Category::Color, Category::Alpha]);
    assert_eq!(decoded.alpha, image.alpha);
    assert_eq!(decoded.planes, image.planes);
}

// ============================================================================
// Grids
// ============================================================================

/// Test a 3x2 grid whose last column and row are smaller than the tiles.
#[test]
fn test_roundtrip_grid_with_partial_cells() {
    let image = create_yuv_pattern(168, 114, 8, YuvFormat::Yuv420);
    let (cells, columns, rows) = split_into_cells(&image, 64, 64);
    assert_eq!((columns, rows), (3, 2));

    let settings = EncoderSettings::default().with_grid(columns, rows);
    let bytes = Encoder::with_settings(RawCodec::new(), settings)
        .encode_grid(&cells)
        .unwrap();
    let decoded = Decoder::new(RawCodec::new()).decode(&bytes).unwrap();

    assert_eq!((decoded.width, decoded.height), (168, 114));
    assert_eq!(decoded.planes, image.planes);
    assert_eq!(decoded.matrix_coefficients, image.matrix_coefficients);
}

/// Test a grid with alpha in every cell.
#[test]
fn test_roundtrip_grid_with_alpha() {
    let mut image = create_yuv_pattern(128, 100, 10, YuvFormat::Yuv444);
    add_alpha_ramp(&mut image);
    let (cells, columns, rows) = split_into_cells(&image, 64, 64);

    let mut encoder = Encoder::new(RawCodec::new());
    encoder.set_grid(columns, rows);
    let bytes = encoder.encode_grid(&cells).unwrap();
    let decoded = Decoder::new(RawCodec::new()).decode(&bytes).unwrap();

    assert_eq!(decoded.planes, image.planes);
    assert_eq!(decoded.alpha, image.alpha);
}

// ============================================================================
// Gain maps
// ============================================================================

/// Test that gain map pixels, metadata and the alternate description survive.
#[test]
fn test_roundtrip_gain_map() {
    let mut image = create_yuv_pattern(64, 48, 8, YuvFormat::Yuv420);
    let gain_map = create_gain_map(32, 24, 8);
    image.gain_map = Some(Box::new(gain_map.clone()));

    let mut codec = RawCodec::new();
    let bytes = Encoder::new(&mut codec).encode(&image).unwrap();
    assert_eq!(codec.encoded, [Category::Color, Category::GainMap]);

    let decoded = Decoder::with_settings(&mut codec, all_gain_map_settings())
        .decode(&bytes)
        .unwrap();
    assert_eq!(decoded.gain_map_state(), GainMapState::PixelsDecoded);
    let decoded_gm = decoded.gain_map.as_deref().unwrap();
    assert_eq!(decoded_gm.metadata, gain_map.metadata);
    assert!(decoded_gm.same_alt_description(&gain_map));
    assert_eq!(decoded_gm.pixels(), gain_map.pixels());
    assert_eq!(decoded.planes, image.planes);
}

/// Test that metadata-only decoding never hands the gain map to the codec.
#[test]
fn test_metadata_only_decode() {
    let mut image = create_yuv_pattern(64, 48, 8, YuvFormat::Yuv420);
    let gain_map = create_gain_map(32, 24, 10);
    image.gain_map = Some(Box::new(gain_map.clone()));
    let bytes = Encoder::new(RawCodec::new()).encode(&image).unwrap();

    let mut codec = RawCodec::new();
    let settings = DecoderSettings::default().with_gainmap_metadata(true);
    let decoded = Decoder::with_settings(&mut codec, settings).decode(&bytes).unwrap();

    assert_eq!(codec.decoded, [Category::Color]);
    assert_eq!(decoded.gain_map_state(), GainMapState::MetadataParsed);
    let gm = decoded.gain_map.as_deref().unwrap();
    assert_eq!(gm.metadata, gain_map.metadata);
    assert!(gm.pixels().is_none());

    // The size and format are still described.
    let description = gm.image.as_ref().unwrap();
    assert_eq!((description.width, description.height), (32, 24));
    assert_eq!(description.depth, 10);
    assert_eq!(description.yuv_format, YuvFormat::Yuv400);
    assert!(!description.has_pixels());
}

/// Test that the default settings ignore the gain map entirely.
#[test]
fn test_default_decode_ignores_gain_map() {
    let mut image = create_yuv_pattern(64, 48, 8, YuvFormat::Yuv420);
    image.gain_map = Some(Box::new(create_gain_map(16, 12, 8)));
    let bytes = Encoder::new(RawCodec::new()).encode(&image).unwrap();

    let mut codec = RawCodec::new();
    let decoded = Decoder::new(&mut codec).decode(&bytes).unwrap();
    assert_eq!(codec.decoded, [Category::Color]);
    assert_eq!(decoded.gain_map_state(), GainMapState::NotParsed);
    assert!(decoded.gain_map.is_none());
}

/// Test that a gain map can be left out at encode time.
#[test]
fn test_encode_without_gain_map() {
    let mut image = create_yuv_pattern(64, 48, 8, YuvFormat::Yuv420);
    image.gain_map = Some(Box::new(create_gain_map(16, 12, 8)));

    let mut encoder = Encoder::new(RawCodec::new());
    encoder.set_gain_map(false);
    let bytes = encoder.encode(&image).unwrap();
    assert_eq!(encoder.into_codec().encoded, [Category::Color]);

    let decoded = Decoder::with_settings(RawCodec::new(), all_gain_map_settings())
        .decode(&bytes)
        .unwrap();
    assert!(decoded.gain_map.is_none());
}

/// Test a 2x2 grid where every cell carries a gain map tile.
#[test]
fn test_roundtrip_grid_with_gain_maps() {
    let image = create_yuv_pattern(128, 128, 8, YuvFormat::Yuv420);
    let (mut cells, columns, rows) = split_into_cells(&image, 64, 64);

    let full_gain_map = create_gain_map(128, 100, 8);
    let gm_image = full_gain_map.image.clone().unwrap();
    let (gm_cells, _, _) = split_into_cells(&gm_image, 64, 64);
    for (cell, gm_cell) in cells.iter_mut().zip(gm_cells) {
        let mut gm = full_gain_map.clone();
        gm.image = Some(gm_cell);
        cell.gain_map = Some(Box::new(gm));
    }

    let settings = EncoderSettings::default().with_grid(columns, rows);
    let bytes = Encoder::with_settings(RawCodec::new(), settings)
        .encode_grid(&cells)
        .unwrap();
    let decoded = Decoder::with_settings(RawCodec::new(), all_gain_map_settings())
        .decode(&bytes)
        .unwrap();

    assert_eq!(decoded.planes, image.planes);
    let gm = decoded.gain_map.as_deref().unwrap();
    assert_eq!(gm.metadata, full_gain_map.metadata);
    let pixels = gm.pixels().unwrap();
    assert_eq!((pixels.width, pixels.height), (128, 100));
    assert_eq!(pixels.planes, gm_image.planes);
}

// ============================================================================
// Full tone mapping pipeline
// ============================================================================

/// Test author → encode → decode → tone map against the HDR reference.
#[test]
fn test_tone_map_pipeline_psnr() {
    let (width, height) = (64, 48);
    let sdr = create_sdr_gradient(width, height, 10);
    let hdr = create_hdr_alternate(&sdr);

    let config = GainMapConfig::default().with_depth(10).with_multi_channel(true);
    let gain_map = compute_gainmap(&sdr, &hdr, &config).unwrap();
    let mut base = to_planar(&sdr, 10, YuvFormat::Yuv444);
    base.gain_map = Some(Box::new(gain_map));

    let bytes = Encoder::new(RawCodec::new()).encode(&base).unwrap();
    let decoded = Decoder::with_settings(RawCodec::new(), all_gain_map_settings())
        .decode(&bytes)
        .unwrap();
    let gm = decoded.gain_map.as_deref().unwrap();
    assert_eq!(gm.alt_transfer_characteristics, TransferCharacteristics::Linear);

    let mut base_rgb = RgbImage::new(width, height, 10, RgbFormat::Rgb, false).unwrap();
    yuv_to_rgb(&decoded, &mut base_rgb).unwrap();
    let headroom = gm.metadata.to_double().unwrap().alternate_hdr_headroom as f32;

    let mut out = RgbImage::new(width, height, 16, RgbFormat::Rgb, true).unwrap();
    out.transfer_characteristics = TransferCharacteristics::Linear;
    let clli = apply_gainmap(&base_rgb, gm, headroom, &mut out).unwrap();

    let score = psnr(&out, &hdr, 4.0);
    assert!(score >= 40.0, "PSNR {:.1} dB is below 40 dB", score);
    assert!(clli.max_cll > 700, "max_cll {}", clli.max_cll);

    // At zero headroom the base comes back.
    let mut sdr_out = RgbImage::new(width, height, 10, RgbFormat::Rgb, false).unwrap();
    apply_gainmap(&base_rgb, gm, 0.0, &mut sdr_out).unwrap();
    assert_eq!(sdr_out.data, base_rgb.data);
}
