use std::io::{BufReader, Cursor};

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use tracing::debug;

pub const DEFAULT_MAX_DIMENSION: u32 = 1200;
pub const DEFAULT_JPEG_QUALITY: f32 = 0.8;

/// Source image re-encoded for transmission.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decodes `source`, caps its longer side at `max_dimension` and re-encodes
/// it as JPEG at `quality` (0..=1). Applied to every upload, whatever its size.
pub fn prepare_upload(
    source: &[u8],
    mime_hint: Option<&str>,
    max_dimension: u32,
    quality: f32,
) -> Result<PreparedUpload> {
    let rgba = decode_oriented(source, mime_hint)?;
    let (width, height) = capped_dimensions(rgba.width(), rgba.height(), max_dimension);
    if width == 0 || height == 0 {
        anyhow::bail!("source image has no pixels");
    }
    let resized = downscale(rgba, width, height)?;
    let bytes = encode_jpeg(resized, quality)?;
    debug!(
        source_bytes = source.len(),
        encoded_bytes = bytes.len(),
        width,
        height,
        "prepared upload"
    );
    Ok(PreparedUpload {
        bytes,
        width,
        height,
    })
}

/// Scales `(width, height)` so the longer side equals `max_dimension`,
/// keeping the aspect ratio; smaller images are returned unchanged.
pub fn capped_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dimension || longer == 0 {
        return (width, height);
    }
    let scale = max_dimension as f64 / longer as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max_dimension);
    if width >= height {
        (max_dimension, scaled(height))
    } else {
        (scaled(width), max_dimension)
    }
}

fn decode_oriented(source: &[u8], mime_hint: Option<&str>) -> Result<RgbaImage> {
    let mut reader = ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .context("failed to sniff source image format")?;
    if reader.format().is_none() {
        if let Some(format) = mime_hint.and_then(ImageFormat::from_mime_type) {
            reader.set_format(format);
        }
    }
    let mut img = reader.decode().context("failed to decode source image")?;
    if let Some(orientation) = read_orientation(source) {
        img.apply_orientation(orientation);
    }
    Ok(img.into_rgba8())
}

fn read_orientation(source: &[u8]) -> Option<Orientation> {
    let mut buf = BufReader::new(Cursor::new(source));
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = u8::try_from(field.value.get_uint(0)?).ok()?;
    debug!(orientation = value, "exif orientation");
    Orientation::from_exif(value)
}

/// Shrinks `image` to `width` x `height`, reusing its pixel buffer as the
/// resize source. Returns the image untouched when the size already matches.
fn downscale(image: RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    if image.dimensions() == (width, height) {
        return Ok(image);
    }
    let (src_w, src_h) = image.dimensions();
    let src = fir::images::Image::from_vec_u8(src_w, src_h, image.into_raw(), fir::PixelType::U8x4)
        .with_context(|| format!("cannot view {src_w}x{src_h} upload as RGBA"))?;
    let mut dst = fir::images::Image::new(width, height, fir::PixelType::U8x4);
    fir::Resizer::new()
        .resize(
            &src,
            &mut dst,
            Some(
                &fir::ResizeOptions::new()
                    .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3)),
            ),
        )
        .with_context(|| format!("failed to shrink upload to {width}x{height}"))?;
    RgbaImage::from_raw(width, height, dst.into_vec())
        .context("resized buffer does not match the target size")
}

fn encode_jpeg(image: RgbaImage, quality: f32) -> Result<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
    let quality = (quality.clamp(0.01, 1.0) * 100.0).round() as u8;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .context("failed to encode upload as JPEG")?;
    Ok(out)
}
