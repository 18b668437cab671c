//! Serialize a [`RenderedDocument`] to PDF bytes.
//!
//! Output is deterministic: object numbering follows page order, streams
//! are compressed with a fixed level, and the info dictionary carries no
//! timestamps. Text uses the standard Helvetica font in WinAnsi encoding,
//! so no font program is embedded.

use crate::error::PacketError;
use crate::pipeline::compose::{ImagePage, Page, RenderedDocument, TextLine};
use crate::pipeline::image::{EmbeddedImage, ImageData};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;
use tracing::debug;

pub const PRODUCER: &str = concat!("claimpack ", env!("CARGO_PKG_VERSION"));
const FONT_NAME: &str = "F1";
const IMAGE_NAME: &str = "Im1";

/// Write the document as a complete PDF file.
pub fn write_pdf(doc: &RenderedDocument) -> Result<Vec<u8>, PacketError> {
    let mut pdf = Document::with_version("1.5");
    let pages_id = pdf.new_object_id();

    let font_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::with_capacity(doc.pages.len());
    for page in &doc.pages {
        let (operations, xobject) = match page {
            Page::Text(text) => (text_operations(&text.lines), None),
            Page::Image(image) => {
                let image_id = add_image(&mut pdf, &image.image)?;
                (image_operations(image), Some(image_id))
            }
        };

        let content = Content { operations }
            .encode()
            .map_err(|e| PacketError::Serialization(format!("content stream: {e}")))?;
        let content_id = pdf.add_object(flate_stream(dictionary! {}, &content)?);

        let mut resources = dictionary! {
            "Font" => dictionary! { FONT_NAME => font_id },
        };
        if let Some(image_id) = xobject {
            resources.set("XObject", dictionary! { IMAGE_NAME => image_id });
        }

        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), doc.page_width.into(), doc.page_height.into()],
            "Resources" => resources,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
        }),
    );

    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = pdf.add_object(dictionary! {
        "Title" => Object::string_literal(encode_win_ansi(&doc.title)),
        "Producer" => Object::string_literal(PRODUCER),
    });
    pdf.trailer.set("Root", catalog_id);
    pdf.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    pdf.save_to(&mut bytes)
        .map_err(|e| PacketError::Serialization(format!("write: {e}")))?;
    debug!("Serialized {} pages into {} bytes", page_count, bytes.len());
    Ok(bytes)
}

fn text_operations(lines: &[TextLine]) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(lines.len() * 4);
    for line in lines {
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![FONT_NAME.into(), line.size.into()]));
        ops.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
        ops.push(Operation::new("Tj", vec![Object::string_literal(encode_win_ansi(&line.text))]));
        ops.push(Operation::new("ET", vec![]));
    }
    ops
}

fn image_operations(page: &ImagePage) -> Vec<Operation> {
    let p = &page.placement;
    let mut ops = text_operations(std::slice::from_ref(&page.caption));
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "cm",
        vec![p.width.into(), 0.into(), 0.into(), p.height.into(), p.x.into(), p.y.into()],
    ));
    ops.push(Operation::new("Do", vec![IMAGE_NAME.into()]));
    ops.push(Operation::new("Q", vec![]));
    ops
}

fn add_image(pdf: &mut Document, image: &EmbeddedImage) -> Result<ObjectId, PacketError> {
    let base = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(image.width),
        "Height" => i64::from(image.height),
        "ColorSpace" => image.color_space.pdf_name(),
        "BitsPerComponent" => 8,
    };

    let stream = match &image.data {
        ImageData::Dct(bytes) => {
            let mut dict = base;
            dict.set("Filter", "DCTDecode");
            Stream::new(dict, bytes.clone()).with_compression(false)
        }
        ImageData::Raw { samples, alpha } => {
            let mut dict = base;
            if let Some(alpha) = alpha {
                let mask = flate_stream(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => i64::from(image.width),
                        "Height" => i64::from(image.height),
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                    },
                    alpha,
                )?;
                let mask_id = pdf.add_object(mask);
                dict.set("SMask", mask_id);
            }
            flate_stream(dict, samples)?
        }
    };
    Ok(pdf.add_object(stream))
}

fn flate_stream(mut dict: lopdf::Dictionary, data: &[u8]) -> Result<Stream, PacketError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PacketError::Serialization(format!("compress: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| PacketError::Serialization(format!("compress: {e}")))?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compressed).with_compression(false))
}

/// Map text to WinAnsi (CP-1252) bytes. Characters outside the code page
/// become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars().map(win_ansi_byte).collect()
}

fn win_ansi_byte(c: char) -> u8 {
    let code = c as u32;
    match code {
        0x20..=0x7E | 0xA0..=0xFF => code as u8,
        _ => match c {
            '€' => 0x80,
            '‚' => 0x82,
            'ƒ' => 0x83,
            '„' => 0x84,
            '…' => 0x85,
            '†' => 0x86,
            '‡' => 0x87,
            'ˆ' => 0x88,
            '‰' => 0x89,
            'Š' => 0x8A,
            '‹' => 0x8B,
            'Œ' => 0x8C,
            'Ž' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '•' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '˜' => 0x98,
            '™' => 0x99,
            'š' => 0x9A,
            '›' => 0x9B,
            'œ' => 0x9C,
            'ž' => 0x9E,
            'Ÿ' => 0x9F,
            '\t' => b' ',
            _ => b'?',
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageLayout;
    use crate::model::{Carrier, ClaimRecord, EvidenceFile, EvidenceKind, IssueType};
    use crate::pipeline::compose::compose;
    use crate::pipeline::image::tests::{jpeg_bytes, png_bytes};
    use crate::pipeline::resolve::FetchedImage;
    use image::{DynamicImage, Rgba, RgbaImage};
    use uuid::Uuid;

    fn photo(name: &str, mime: &str) -> EvidenceFile {
        EvidenceFile {
            id: Uuid::new_v4(),
            claim_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            kind: EvidenceKind::DamagePhoto,
            storage_path: format!("u/c/{name}"),
            original_name: Some(name.into()),
            mime_type: Some(mime.into()),
            size_bytes: None,
            created_at: None,
        }
    }

    fn document() -> RenderedDocument {
        let claim = ClaimRecord::draft(Uuid::nil(), Uuid::nil(), Carrier::Fedex, IssueType::Lost);
        let jpeg = photo("a.jpg", "image/jpeg");
        let png = photo("b.png", "image/png");
        let images = vec![
            FetchedImage {
                file: jpeg.clone(),
                bytes: jpeg_bytes(200, 100),
            },
            FetchedImage {
                file: png.clone(),
                bytes: png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 10])))),
            },
        ];
        compose(&claim, "Narrative – with “quotes”.", &[jpeg, png], &images, &PageLayout::default()).unwrap()
    }

    #[test]
    fn writes_loadable_pdf_with_every_page() {
        let bytes = write_pdf(&document()).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let loaded = Document::load_mem(&bytes).unwrap();
        assert_eq!(loaded.get_pages().len(), 4);
    }

    #[test]
    fn output_is_byte_identical() {
        let doc = document();
        assert_eq!(write_pdf(&doc).unwrap(), write_pdf(&doc).unwrap());
    }

    #[test]
    fn text_is_extractable() {
        let bytes = write_pdf(&document()).unwrap();
        let loaded = Document::load_mem(&bytes).unwrap();
        let text = loaded.extract_text(&[2]).unwrap();
        assert!(text.contains("Evidence Index"), "got: {text}");
    }

    #[test]
    fn win_ansi_mapping() {
        assert_eq!(encode_win_ansi("A é"), vec![b'A', b' ', 0xE9]);
        assert_eq!(encode_win_ansi("\u{2014}\u{201C}€"), vec![0x97, 0x93, 0x80]);
        assert_eq!(encode_win_ansi("日本"), b"??".to_vec());
    }
}
