//! Decode evidence images into a form the PDF writer can embed.
//!
//! The decoder is chosen by declared MIME type, not by sniffing: PNG for
//! types containing `png`, JPEG for the `jpeg`/`jpg` family. Anything else
//! is rejected, and bytes that fail to decode as their declared format fail
//! the whole composition. A packet with a silently missing page is worse
//! than no packet.
//!
//! Baseline grayscale and RGB JPEGs are passed through untouched as
//! `DCTDecode` streams. Everything else is flattened to 8-bit samples, with
//! any alpha channel split into a soft mask.

use crate::error::PacketError;
use crate::model::EvidenceFile;
use image::{ColorType, DynamicImage, ImageFormat};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
}

impl ColorSpace {
    pub fn pdf_name(&self) -> &'static str {
        match self {
            ColorSpace::Gray => "DeviceGray",
            ColorSpace::Rgb => "DeviceRGB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    /// Original JPEG bytes.
    Dct(Vec<u8>),
    /// Uncompressed 8-bit samples, row-major, plus an optional 8-bit alpha plane.
    Raw { samples: Vec<u8>, alpha: Option<Vec<u8>> },
}

/// A decoded image ready to be written as an image XObject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub data: ImageData,
}

fn format_for_mime(mime: &str) -> Option<ImageFormat> {
    let mime = mime.to_ascii_lowercase();
    if mime.contains("png") {
        Some(ImageFormat::Png)
    } else if mime.contains("jpeg") || mime.contains("jpg") {
        Some(ImageFormat::Jpeg)
    } else {
        None
    }
}

fn format_label(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "PNG",
        _ => "JPEG",
    }
}

/// Decode `bytes` according to the file's declared MIME type.
pub fn decode_evidence_image(file: &EvidenceFile, bytes: &[u8]) -> Result<EmbeddedImage, PacketError> {
    let name = file.display_name().unwrap_or(&file.storage_path).to_string();
    let mime = file.mime_type.clone().unwrap_or_default();
    let format = format_for_mime(&mime).ok_or_else(|| PacketError::UnsupportedImage {
        name: name.clone(),
        mime_type: mime.clone(),
    })?;

    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| PacketError::CorruptImage {
        name: name.clone(),
        format: format_label(format).to_string(),
        detail: e.to_string(),
    })?;

    if img.width() == 0 || img.height() == 0 {
        return Err(PacketError::CorruptImage {
            name,
            format: format_label(format).to_string(),
            detail: "image has no pixels".to_string(),
        });
    }

    let embedded = if format == ImageFormat::Jpeg {
        passthrough_jpeg(&img, bytes).unwrap_or_else(|| flatten(&img))
    } else {
        flatten(&img)
    };
    debug!(
        "Decoded {} as {}x{} {:?} ({})",
        name,
        embedded.width,
        embedded.height,
        embedded.color_space,
        if matches!(embedded.data, ImageData::Dct(_)) { "dct" } else { "raw" }
    );
    Ok(embedded)
}

fn passthrough_jpeg(img: &DynamicImage, bytes: &[u8]) -> Option<EmbeddedImage> {
    let color_space = match (img.color(), jpeg_components(bytes)?) {
        (ColorType::L8, 1) => ColorSpace::Gray,
        (ColorType::Rgb8, 3) => ColorSpace::Rgb,
        _ => return None,
    };
    Some(EmbeddedImage {
        width: img.width(),
        height: img.height(),
        color_space,
        data: ImageData::Dct(bytes.to_vec()),
    })
}

/// Component count from the first start-of-frame marker.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // length(2) precision(1) height(2) width(2) components(1)
            return bytes.get(pos + 9).copied();
        }
        pos += 2 + len;
    }
    None
}

fn flatten(img: &DynamicImage) -> EmbeddedImage {
    let (width, height) = (img.width(), img.height());
    let color = img.color();
    let is_gray = matches!(color, ColorType::L8 | ColorType::L16);

    if is_gray {
        return EmbeddedImage {
            width,
            height,
            color_space: ColorSpace::Gray,
            data: ImageData::Raw {
                samples: img.to_luma8().into_raw(),
                alpha: None,
            },
        };
    }

    if !color.has_alpha() {
        return EmbeddedImage {
            width,
            height,
            color_space: ColorSpace::Rgb,
            data: ImageData::Raw {
                samples: img.to_rgb8().into_raw(),
                alpha: None,
            },
        };
    }

    let rgba = img.to_rgba8();
    let mut samples = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for px in rgba.pixels() {
        samples.extend_from_slice(&px.0[..3]);
        alpha.push(px.0[3]);
    }
    let alpha = alpha.iter().any(|&a| a != u8::MAX).then_some(alpha);
    EmbeddedImage {
        width,
        height,
        color_space: ColorSpace::Rgb,
        data: ImageData::Raw { samples, alpha },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::EvidenceKind;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;
    use uuid::Uuid;

    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([180, 40, 40]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    pub(crate) fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn file(mime: &str) -> EvidenceFile {
        EvidenceFile {
            id: Uuid::nil(),
            claim_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            kind: EvidenceKind::DamagePhoto,
            storage_path: "u/c/damage_photo/x".into(),
            original_name: Some("box.jpg".into()),
            mime_type: Some(mime.into()),
            size_bytes: None,
            created_at: None,
        }
    }

    #[test]
    fn rgb_jpeg_passes_through() {
        let bytes = jpeg_bytes(200, 100);
        let img = decode_evidence_image(&file("image/jpeg"), &bytes).unwrap();
        assert_eq!((img.width, img.height), (200, 100));
        assert_eq!(img.color_space, ColorSpace::Rgb);
        assert_eq!(img.data, ImageData::Dct(bytes));
    }

    #[test]
    fn jpg_and_pjpeg_use_jpeg_decoder() {
        let bytes = jpeg_bytes(8, 8);
        assert!(decode_evidence_image(&file("image/jpg"), &bytes).is_ok());
        assert!(decode_evidence_image(&file("image/pjpeg"), &bytes).is_ok());
    }

    #[test]
    fn opaque_png_has_no_mask() {
        let bytes = png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]))));
        let img = decode_evidence_image(&file("image/png"), &bytes).unwrap();
        match img.data {
            ImageData::Raw { samples, alpha } => {
                assert_eq!(samples.len(), 3 * 2 * 3);
                assert!(alpha.is_none());
            }
            other => panic!("expected raw data, got {other:?}"),
        }
    }

    #[test]
    fn translucent_png_keeps_alpha() {
        let bytes = png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 128]))));
        let img = decode_evidence_image(&file("image/png"), &bytes).unwrap();
        let ImageData::Raw { alpha, .. } = img.data else {
            panic!("expected raw data");
        };
        assert_eq!(alpha, Some(vec![128; 4]));
    }

    #[test]
    fn gray_png_stays_gray() {
        let bytes = png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([77]))));
        let img = decode_evidence_image(&file("image/png"), &bytes).unwrap();
        assert_eq!(img.color_space, ColorSpace::Gray);
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let err = decode_evidence_image(&file("image/gif"), b"GIF89a").unwrap_err();
        assert!(matches!(err, PacketError::UnsupportedImage { .. }));
    }

    #[test]
    fn corrupt_bytes_name_the_file() {
        let err = decode_evidence_image(&file("image/jpeg"), b"definitely not a jpeg").unwrap_err();
        match err {
            PacketError::CorruptImage { name, format, .. } => {
                assert_eq!(name, "box.jpg");
                assert_eq!(format, "JPEG");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn png_declared_as_jpeg_is_corrupt() {
        let bytes = png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([0]))));
        assert!(matches!(
            decode_evidence_image(&file("image/jpeg"), &bytes),
            Err(PacketError::CorruptImage { .. })
        ));
    }

    #[test]
    fn reads_sof_component_count() {
        assert_eq!(jpeg_components(&jpeg_bytes(4, 4)), Some(3));
        assert_eq!(jpeg_components(b"nope"), None);
    }
}
