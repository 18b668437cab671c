//! Document compositor: lay a claim out as an ordered sequence of pages.
//!
//! Composition is pure. The same claim, narrative, manifest and image bytes
//! always produce the same [`RenderedDocument`], which is what makes the
//! serialized packet byte-for-byte reproducible.
//!
//! ## Page sequence
//!
//! ```text
//! [summary + narrative]+  [evidence index]+  [image]*
//! ```
//!
//! Text blocks flow top to bottom. Before each line is drawn the cursor is
//! checked; once it has dropped below the bottom margin a new page starts
//! at the top margin. The evidence index always starts on a fresh page and
//! its continuation pages carry no repeated header. Each resolved image
//! gets a page of its own, in manifest order.

use crate::config::PageLayout;
use crate::error::PacketError;
use crate::model::{ClaimRecord, EvidenceFile, EvidenceKind};
use crate::pipeline::image::{decode_evidence_image, EmbeddedImage};
use crate::pipeline::resolve::FetchedImage;
use crate::pipeline::wrap::wrap_text;

pub const TITLE: &str = "Claim Packet";
const TITLE_SIZE: f32 = 22.0;
const FIELD_SIZE: f32 = 12.0;
const HEADING_SIZE: f32 = 14.0;
const BODY_SIZE: f32 = 11.0;
const INDEX_HEADING_SIZE: f32 = 18.0;
const CAPTION_SIZE: f32 = 14.0;
/// Vertical band reserved for the caption above an image.
const CAPTION_BAND: f32 = 30.0;
const INDEX_ENTRY_GAP: f32 = 4.0;

/// One line of text at an absolute position (PDF user space, origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextPage {
    pub lines: Vec<TextLine>,
}

/// Where an image is drawn, and at what scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePlacement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePage {
    pub caption: TextLine,
    pub placement: ImagePlacement,
    pub image: EmbeddedImage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Text(TextPage),
    Image(ImagePage),
}

/// The composed packet, ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub title: String,
    pub page_width: f32,
    pub page_height: f32,
    pub pages: Vec<Page>,
}

impl RenderedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn image_page_count(&self) -> usize {
        self.pages.iter().filter(|p| matches!(p, Page::Image(_))).count()
    }
}

/// Lay out the packet.
///
/// `images` must already be in manifest order and restricted to image
/// files. Fails if any image cannot be decoded.
///
/// Paragraph breaks (`\n\n`) in the narrative are kept as a blank line
/// rather than flowed into one stream. The claim's `packet_pdf` row is left
/// out of the evidence index, so a regenerated packet lays out exactly like
/// the first one.
pub fn compose(
    claim: &ClaimRecord,
    narrative: &str,
    manifest: &[EvidenceFile],
    images: &[FetchedImage],
    layout: &PageLayout,
) -> Result<RenderedDocument, PacketError> {
    let mut flow = TextFlow::new(layout);

    summary_block(&mut flow, claim);
    narrative_block(&mut flow, narrative);

    flow.break_page();
    index_block(&mut flow, manifest);

    let mut pages: Vec<Page> = flow.finish().into_iter().map(Page::Text).collect();

    for fetched in images {
        let image = decode_evidence_image(&fetched.file, &fetched.bytes)?;
        let caption = fetched.file.display_name().unwrap_or("Evidence image").to_string();
        pages.push(Page::Image(image_page(caption, image, layout)));
    }

    Ok(RenderedDocument {
        title: format!("{TITLE} {}", claim.id),
        page_width: layout.page_width,
        page_height: layout.page_height,
        pages,
    })
}

/// Paginate pre-wrapped body lines starting at the top of a fresh page.
pub fn paginate(lines: &[String], layout: &PageLayout) -> Vec<TextPage> {
    let mut flow = TextFlow::new(layout);
    for line in lines {
        flow.line(line, BODY_SIZE);
    }
    flow.finish()
}

/// Scale `width`×`height` into the area below the caption band.
pub fn place_image(width: u32, height: u32, layout: &PageLayout) -> ImagePlacement {
    let (w, h) = (width as f32, height as f32);
    let max_w = layout.printable_width();
    let max_h = layout.page_height - 2.0 * layout.margin - CAPTION_BAND;
    let scale = 1.0f32.min(max_w / w).min(max_h / h);
    let (draw_w, draw_h) = (w * scale, h * scale);
    ImagePlacement {
        x: layout.margin + (max_w - draw_w) / 2.0,
        y: layout.top() - CAPTION_BAND - draw_h,
        width: draw_w,
        height: draw_h,
        scale,
    }
}

fn image_page(caption: String, image: EmbeddedImage, layout: &PageLayout) -> ImagePage {
    ImagePage {
        caption: TextLine {
            text: caption,
            x: layout.margin,
            y: layout.top(),
            size: CAPTION_SIZE,
        },
        placement: place_image(image.width, image.height, layout),
        image,
    }
}

fn summary_block(flow: &mut TextFlow<'_>, claim: &ClaimRecord) {
    let tracking = match claim.tracking_number.trim() {
        "" => "not provided",
        t => t,
    };
    flow.put(TITLE, TITLE_SIZE);
    flow.advance(30.0);
    flow.put(&format!("Tracking: {tracking}"), FIELD_SIZE);
    flow.advance(20.0);
    flow.put(&format!("Carrier: {}", claim.carrier.label()), FIELD_SIZE);
    flow.advance(18.0);
    flow.put(&format!("Issue: {}", claim.issue_type.label()), FIELD_SIZE);
    flow.advance(18.0);
    flow.put(&format!("Requested: ${:.2}", claim.requested_amount), FIELD_SIZE);
    flow.advance(30.0);
    flow.put("Narrative", HEADING_SIZE);
    flow.advance(20.0);
}

fn narrative_block(flow: &mut TextFlow<'_>, narrative: &str) {
    let wrap = flow.layout.narrative_wrap;
    let paragraphs: Vec<Vec<String>> = narrative
        .split("\n\n")
        .map(|p| wrap_text(p, wrap))
        .filter(|lines| !lines.is_empty())
        .collect();

    for (i, lines) in paragraphs.iter().enumerate() {
        if i > 0 {
            flow.advance(flow.layout.line_height);
        }
        for line in lines {
            flow.line(line, BODY_SIZE);
        }
    }
}

fn index_block(flow: &mut TextFlow<'_>, manifest: &[EvidenceFile]) {
    flow.put("Evidence Index", INDEX_HEADING_SIZE);
    flow.advance(24.0);

    // The packet is evidence of nothing; listing it would also make the
    // index of a regenerated packet differ from the first one.
    let entries: Vec<&EvidenceFile> = manifest.iter().filter(|f| f.kind != EvidenceKind::PacketPdf).collect();
    if entries.is_empty() {
        flow.line("No evidence files uploaded.", FIELD_SIZE);
        return;
    }

    let wrap = flow.layout.index_wrap;
    for file in entries {
        let entry = format!("{}: {}", file.kind.as_str(), file.display_name().unwrap_or("Untitled file"));
        for line in wrap_text(&entry, wrap) {
            flow.line(&line, BODY_SIZE);
        }
        flow.advance(INDEX_ENTRY_GAP);
    }
}

/// Cursor over a run of text pages.
struct TextFlow<'a> {
    layout: &'a PageLayout,
    done: Vec<TextPage>,
    current: TextPage,
    y: f32,
}

impl<'a> TextFlow<'a> {
    fn new(layout: &'a PageLayout) -> Self {
        Self {
            layout,
            done: Vec::new(),
            current: TextPage::default(),
            y: layout.top(),
        }
    }

    /// Draw at the cursor without moving it or checking overflow.
    fn put(&mut self, text: &str, size: f32) {
        self.current.lines.push(TextLine {
            text: text.to_string(),
            x: self.layout.margin,
            y: self.y,
            size,
        });
    }

    /// Draw one flowing line, starting a new page first if the cursor is
    /// below the bottom margin.
    fn line(&mut self, text: &str, size: f32) {
        if self.y < self.layout.margin {
            self.break_page();
        }
        self.put(text, size);
        self.y -= self.layout.line_height;
    }

    fn advance(&mut self, dy: f32) {
        self.y -= dy;
    }

    fn break_page(&mut self) {
        if !self.current.lines.is_empty() {
            self.done.push(std::mem::take(&mut self.current));
        }
        self.y = self.layout.top();
    }

    fn finish(mut self) -> Vec<TextPage> {
        if !self.current.lines.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Carrier, IssueType};
    use crate::pipeline::image::tests::jpeg_bytes;
    use uuid::Uuid;

    fn claim() -> ClaimRecord {
        let mut c = ClaimRecord::draft(Uuid::nil(), Uuid::nil(), Carrier::Ups, IssueType::Damaged);
        c.tracking_number = "1Z999".into();
        c.requested_amount = 129.0;
        c
    }

    fn evidence(name: Option<&str>, kind: EvidenceKind, mime: &str) -> EvidenceFile {
        EvidenceFile {
            id: Uuid::new_v4(),
            claim_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            kind,
            storage_path: "u/c/x".into(),
            original_name: name.map(String::from),
            mime_type: Some(mime.into()),
            size_bytes: None,
            created_at: None,
        }
    }

    fn text(page: &Page) -> Vec<&str> {
        match page {
            Page::Text(t) => t.lines.iter().map(|l| l.text.as_str()).collect(),
            Page::Image(_) => panic!("expected text page"),
        }
    }

    #[test]
    fn summary_then_index_then_images() {
        let layout = PageLayout::default();
        let photo = evidence(Some("box.jpg"), EvidenceKind::DamagePhoto, "image/jpeg");
        let manifest = vec![photo.clone()];
        let images = vec![FetchedImage {
            file: photo,
            bytes: jpeg_bytes(200, 100),
        }];

        let doc = compose(&claim(), "Short narrative.", &manifest, &images, &layout).unwrap();
        assert_eq!(doc.page_count(), 3);

        let first = text(&doc.pages[0]);
        assert_eq!(
            &first[..6],
            &["Claim Packet", "Tracking: 1Z999", "Carrier: UPS", "Issue: Damaged", "Requested: $129.00", "Narrative"]
        );
        assert_eq!(first[6], "Short narrative.");
        assert_eq!(text(&doc.pages[1]), vec!["Evidence Index", "damage_photo: box.jpg"]);

        let Page::Image(img) = &doc.pages[2] else {
            panic!("expected image page");
        };
        assert_eq!(img.caption.text, "box.jpg");
        assert_eq!(img.placement.scale, 1.0);
        assert!((img.placement.x - 197.64).abs() < 0.01);
        assert!((img.placement.y - 661.89).abs() < 0.01);
    }

    #[test]
    fn summary_positions() {
        let layout = PageLayout::default();
        let doc = compose(&claim(), "x", &[], &[], &layout).unwrap();
        let Page::Text(page) = &doc.pages[0] else {
            panic!("expected text page");
        };
        let ys: Vec<f32> = page.lines.iter().map(|l| l.y).collect();
        let top = layout.top();
        let expected = [top, top - 30.0, top - 50.0, top - 68.0, top - 86.0, top - 116.0, top - 136.0];
        for (got, want) in ys.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "got {got}, want {want}");
        }
        assert_eq!(page.lines[0].size, 22.0);
    }

    #[test]
    fn empty_manifest_says_so() {
        let doc = compose(&claim(), "x", &[], &[], &PageLayout::default()).unwrap();
        assert_eq!(doc.page_count(), 2);
        assert_eq!(text(&doc.pages[1]), vec!["Evidence Index", "No evidence files uploaded."]);
    }

    #[test]
    fn index_lists_untitled_and_skips_packet() {
        let manifest = vec![
            evidence(None, EvidenceKind::ProofOfValue, "application/pdf"),
            evidence(Some("packet.pdf"), EvidenceKind::PacketPdf, "application/pdf"),
            evidence(Some("  "), EvidenceKind::OtherSupporting, "text/plain"),
        ];
        let doc = compose(&claim(), "x", &manifest, &[], &PageLayout::default()).unwrap();
        assert_eq!(
            text(&doc.pages[1]),
            vec!["Evidence Index", "proof_of_value: Untitled file", "other_supporting: Untitled file"]
        );
    }

    #[test]
    fn long_index_continues_without_repeating_header() {
        let layout = PageLayout::default();
        let manifest: Vec<EvidenceFile> = (0..80)
            .map(|i| {
                let name = format!("receipt-{i:02}.pdf");
                evidence(Some(&name), EvidenceKind::OtherSupporting, "application/pdf")
            })
            .collect();
        let doc = compose(&claim(), "x", &manifest, &[], &layout).unwrap();
        assert!(doc.page_count() >= 3, "index should spill onto a second page");

        let index_pages: Vec<&TextPage> = doc.pages[1..]
            .iter()
            .map(|p| match p {
                Page::Text(t) => t,
                Page::Image(_) => panic!("expected text page"),
            })
            .collect();
        let headers = index_pages
            .iter()
            .flat_map(|p| p.lines.iter())
            .filter(|l| l.text == "Evidence Index")
            .count();
        assert_eq!(headers, 1);

        let continuation = index_pages[1];
        assert_eq!(continuation.lines[0].y, layout.top());
        assert!(continuation.lines[0].text.starts_with("other_supporting: receipt-"));

        for page in &index_pages {
            assert!(page.lines.iter().all(|l| l.y >= layout.margin));
        }
        let entries: Vec<&str> = index_pages
            .iter()
            .flat_map(|p| p.lines.iter())
            .filter(|l| l.text.starts_with("other_supporting: "))
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(entries.len(), 80);
        assert_eq!(entries[0], "other_supporting: receipt-00.pdf");
        assert_eq!(entries[79], "other_supporting: receipt-79.pdf");
    }

    #[test]
    fn paragraphs_are_separated_by_a_blank_line() {
        let layout = PageLayout::default();
        let doc = compose(&claim(), "First.\n\nSecond.", &[], &[], &layout).unwrap();
        let Page::Text(page) = &doc.pages[0] else {
            panic!("expected text page");
        };
        let first = &page.lines[6];
        let second = &page.lines[7];
        assert_eq!(second.text, "Second.");
        assert!((first.y - second.y - 2.0 * layout.line_height).abs() < 1e-3);
    }

    #[test]
    fn paginate_fills_pages_exactly() {
        let layout = PageLayout::default();
        let per_page = layout.lines_per_page();
        for n in [1, per_page, per_page + 1, 120] {
            let lines: Vec<String> = (0..n).map(|i| format!("line {i}")).collect();
            let pages = paginate(&lines, &layout);
            assert_eq!(pages.len(), n.div_ceil(per_page), "n = {n}");
            assert!(pages.iter().all(|p| p.lines.iter().all(|l| l.y >= layout.margin)));
            assert_eq!(pages.iter().map(|p| p.lines.len()).sum::<usize>(), n);
        }
    }

    #[test]
    fn long_narrative_overflows_without_splitting_words() {
        let layout = PageLayout::default();
        let narrative = "lorem ipsum dolor sit amet ".repeat(400);
        let doc = compose(&claim(), &narrative, &[], &[], &layout).unwrap();
        assert!(doc.page_count() > 3);
        let body: Vec<&TextLine> = doc
            .pages
            .iter()
            .filter_map(|p| match p {
                Page::Text(t) => Some(t.lines.iter().filter(|l| l.size == BODY_SIZE)),
                Page::Image(_) => None,
            })
            .flatten()
            .collect();
        assert!(!body.is_empty());
        for line in body {
            assert!(line.text.chars().count() <= layout.narrative_wrap);
            assert!(line.y >= layout.margin);
            for word in line.text.split(' ') {
                assert!(matches!(word, "lorem" | "ipsum" | "dolor" | "sit" | "amet"), "split word {word:?}");
            }
        }
        // Continuation pages start at the top margin.
        let Page::Text(second) = &doc.pages[1] else {
            panic!("expected text page");
        };
        assert_eq!(second.lines[0].y, layout.top());
    }

    #[test]
    fn large_images_are_scaled_to_fit() {
        let layout = PageLayout::default();
        let p = place_image(4000, 3000, &layout);
        assert!(p.scale < 1.0);
        assert!(p.width <= layout.printable_width() + 1e-3);
        assert!(p.height <= layout.page_height - 2.0 * layout.margin - CAPTION_BAND + 1e-3);
        assert!((p.width / p.height - 4000.0 / 3000.0).abs() < 1e-3);
        assert!(p.y >= layout.margin - 1e-3);

        let tall = place_image(100, 5000, &layout);
        assert!((tall.height - (layout.page_height - 2.0 * layout.margin - CAPTION_BAND)).abs() < 1e-2);
        assert!((tall.x + tall.width / 2.0 - layout.page_width / 2.0).abs() < 1e-2);
    }

    #[test]
    fn undecodable_image_fails_composition() {
        let photo = evidence(Some("bad.jpg"), EvidenceKind::DamagePhoto, "image/jpeg");
        let images = vec![FetchedImage {
            file: photo.clone(),
            bytes: b"garbage".to_vec(),
        }];
        let err = compose(&claim(), "x", &[photo], &images, &PageLayout::default()).unwrap_err();
        assert!(matches!(err, PacketError::CorruptImage { .. }));
    }

    #[test]
    fn composition_is_deterministic() {
        let photo = evidence(Some("box.jpg"), EvidenceKind::DamagePhoto, "image/jpeg");
        let images = vec![FetchedImage {
            file: photo.clone(),
            bytes: jpeg_bytes(64, 64),
        }];
        let layout = PageLayout::default();
        let a = compose(&claim(), "n", &[photo.clone()], &images, &layout).unwrap();
        let b = compose(&claim(), "n", &[photo], &images, &layout).unwrap();
        assert_eq!(a, b);
    }
}
