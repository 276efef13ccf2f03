//! PDF renderer – takes a [`LayoutConfig`] and produces PDF bytes using
//! `printpdf` (v0.8 ops-based API).

use std::collections::{BTreeSet, HashMap, HashSet};

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use printpdf::*;

use crate::fonts::{FontData, FontManager};
use crate::layout_config::*;
use crate::theme::{self, Background};

/// Horizontal bands used to approximate a vertical gradient.
const GRADIENT_BANDS: usize = 32;
/// Light margin around a QR code, in modules.
const QR_QUIET_ZONE: usize = 4;

/// A printpdf XObject together with the pixel dimensions of the source image.
struct ImageResource {
    xobj_id: XObjectId,
    px_width: u32,
    px_height: u32,
}

#[derive(Clone)]
enum PdfFont {
    Builtin(BuiltinFont),
    Embedded(FontId),
}

/// A registered face plus what it can draw.
struct Face<'a> {
    font: PdfFont,
    /// Glyph table of an embedded face; `None` means WinAnsi coverage.
    glyphs: Option<ttf_parser::Face<'a>>,
}

impl Face<'_> {
    fn covers(&self, c: char) -> bool {
        if c.is_control() {
            return true;
        }
        match &self.glyphs {
            Some(face) => face.glyph_index(c).is_some(),
            None => winansi_byte(c).is_some(),
        }
    }
}

struct Faces<'a> {
    regular: Face<'a>,
    bold: Face<'a>,
}

impl<'a> Faces<'a> {
    fn get(&self, bold: bool) -> &Face<'a> {
        if bold {
            &self.bold
        } else {
            &self.regular
        }
    }

    /// Every character in the layout that its face has no glyph for.
    fn missing(&self, config: &LayoutConfig) -> BTreeSet<char> {
        let mut missing = BTreeSet::new();
        for text in config
            .pages
            .iter()
            .flat_map(|p| p.boxes.iter())
            .filter_map(|b| b.text.as_ref())
        {
            let face = self.get(text.bold);
            for line in &text.lines {
                missing.extend(line.text.chars().filter(|c| !face.covers(*c)));
            }
            if let Some(marker) = &text.list_marker {
                missing.extend(marker.chars().filter(|c| !self.regular.covers(*c)));
            }
        }
        missing
    }
}

/// Render a LayoutConfig into PDF bytes.
///
/// Images whose `src` is not a base64 data URI, or whose bytes cannot be
/// decoded, are skipped with a warning. Text is never substituted: a
/// character the chosen face cannot draw fails the render.
pub fn render_pdf(config: &LayoutConfig, fonts: &FontManager) -> Result<Vec<u8>, String> {
    let page_w = Mm(config.page_width_pt * 0.352778); // pt → mm
    let page_h = Mm(config.page_height_pt * 0.352778);

    let mut doc = PdfDocument::new(&config.title);

    let faces = Faces {
        regular: register_font(&mut doc, fonts.get(false), BuiltinFont::Helvetica),
        bold: register_font(&mut doc, fonts.get(true), BuiltinFont::HelveticaBold),
    };
    let missing = faces.missing(config);
    if !missing.is_empty() {
        let chars: String = missing.into_iter().collect();
        log::warn!("Font '{}' has no glyphs for {chars:?}", fonts.family());
        return Err(format!(
            "font '{}' cannot draw {chars:?}; configure a fonts directory with a face that covers them",
            fonts.family()
        ));
    }

    // ── Pre-register all images ────────────────────────────────────────────
    let all_srcs: HashSet<&str> = config
        .pages
        .iter()
        .flat_map(|p| p.boxes.iter())
        .filter_map(|b| b.image.as_ref())
        .map(|img| img.src.as_str())
        .collect();

    let mut image_resources: HashMap<String, ImageResource> = HashMap::new();
    let mut img_warnings: Vec<PdfWarnMsg> = Vec::new();

    for src in all_srcs {
        let bytes = match parse_data_uri(src) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Skipping image: {e}");
                continue;
            }
        };

        let (px_width, px_height) = match image_dimensions(&bytes) {
            Ok(dims) => dims,
            Err(e) => {
                log::warn!("Skipping image: {e}");
                continue;
            }
        };

        let raw = match RawImage::decode_from_bytes(&bytes, &mut img_warnings) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Skipping image: PDF encode error: {e}");
                continue;
            }
        };
        let xobj_id = doc.add_image(&raw);

        image_resources.insert(
            src.to_string(),
            ImageResource {
                xobj_id,
                px_width,
                px_height,
            },
        );
    }

    // ── Render pages ──────────────────────────────────────────────────────
    let mut pages = Vec::new();

    for page_layout in &config.pages {
        let mut ops = Vec::new();

        if page_layout.kind != PageKind::Cover {
            paint_background(&mut ops, &config.background, config.page_width_pt, config.page_height_pt);
        }
        for lbox in &page_layout.boxes {
            render_box(&mut ops, lbox, config.page_height_pt, &image_resources, &faces);
        }

        pages.push(PdfPage::new(page_w, page_h, ops));
    }

    if pages.is_empty() {
        pages.push(PdfPage::new(page_w, page_h, Vec::new()));
    }

    doc.with_pages(pages);
    // Built-in text is written as raw `Tj` operands, which `secure` would drop.
    let options = PdfSaveOptions {
        secure: false,
        ..PdfSaveOptions::default()
    };
    let bytes = doc.save(&options, &mut Vec::new());

    Ok(bytes)
}

fn register_font<'a>(doc: &mut PdfDocument, data: &'a FontData, fallback: BuiltinFont) -> Face<'a> {
    let builtin = Face {
        font: PdfFont::Builtin(fallback),
        glyphs: None,
    };
    if !data.is_embedded() {
        return builtin;
    }
    let mut warnings = Vec::new();
    let Some(parsed) = ParsedFont::from_bytes(&data.bytes, 0, &mut warnings) else {
        log::warn!("Font could not be embedded; using {fallback:?}");
        return builtin;
    };
    match ttf_parser::Face::parse(&data.bytes, 0) {
        Ok(glyphs) => Face {
            font: PdfFont::Embedded(doc.add_font(&parsed)),
            glyphs: Some(glyphs),
        },
        Err(e) => {
            log::warn!("Font tables unreadable ({e}); using {fallback:?}");
            builtin
        }
    }
}

fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    let img = ::image::load_from_memory(bytes).map_err(|e| format!("decode error: {e}"))?;
    Ok((img.width(), img.height()))
}

/// The WinAnsiEncoding byte for `c`, if the built-in fonts can draw it.
fn winansi_byte(c: char) -> Option<u8> {
    let byte = match c {
        '\u{20AC}' => 0x80,
        '\u{201A}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201E}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02C6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017D}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02DC}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203A}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017E}' => 0x9E,
        '\u{0178}' => 0x9F,
        // 0x80-0x9F are taken by the table above.
        c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
        _ => return None,
    };
    Some(byte)
}

/// Encode `s` for a built-in font. Callers have already checked coverage.
fn to_winansi(s: &str) -> Vec<u8> {
    s.chars().filter_map(winansi_byte).collect()
}

/// Parse a `data:<mime>;base64,<data>` URI and return the raw decoded bytes.
pub(crate) fn parse_data_uri(src: &str) -> Result<Vec<u8>, String> {
    let Some(rest) = src.strip_prefix("data:") else {
        let preview: String = src.chars().take(80).collect();
        return Err(format!(
            "image src must be a base64 data URI (e.g. `data:image/png;base64,...`), got {preview:?}"
        ));
    };
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| "invalid data URI: missing `,` separator".to_string())?;
    if !header.contains(";base64") {
        return Err("only base64-encoded data URIs are supported".to_string());
    }
    BASE64_STD
        .decode(data.trim())
        .map_err(|e| format!("base64 decode error: {e}"))
}

fn rgb(color: [f32; 4]) -> printpdf::Color {
    printpdf::Color::Rgb(Rgb {
        r: color[0],
        g: color[1],
        b: color[2],
        icc_profile: None,
    })
}

/// Filled rectangle; `top` is measured from the top of the page.
fn fill_rect(ops: &mut Vec<Op>, page_height: f32, x: f32, top: f32, w: f32, h: f32, color: [f32; 4]) {
    let y2 = page_height - top;
    let y1 = y2 - h;
    let (x1, x2) = (x, x + w);
    let point = |x: f32, y: f32| LinePoint {
        p: Point { x: Pt(x), y: Pt(y) },
        bezier: false,
    };

    ops.push(Op::SetFillColor { col: rgb(color) });
    ops.push(Op::DrawPolygon {
        polygon: Polygon {
            rings: vec![PolygonRing {
                points: vec![point(x1, y1), point(x2, y1), point(x2, y2), point(x1, y2)],
            }],
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        },
    });
}

fn paint_background(ops: &mut Vec<Op>, background: &Background, width: f32, height: f32) {
    match background {
        Background::Solid(c) => {
            // White is the paper colour already.
            if *c != theme::Color::WHITE {
                fill_rect(ops, height, 0.0, 0.0, width, height, c.to_array());
            }
        }
        Background::Gradient { from, to } => {
            let band = height / GRADIENT_BANDS as f32;
            for i in 0..GRADIENT_BANDS {
                let t = i as f32 / (GRADIENT_BANDS - 1) as f32;
                let color = from.lerp(*to, t).to_array();
                // Overlap bands slightly so no seams show.
                fill_rect(ops, height, 0.0, i as f32 * band, width, band + 0.5, color);
            }
        }
    }
}

fn write_text(ops: &mut Vec<Op>, font: &PdfFont, size: f32, x: f32, y: f32, color: [f32; 4], text: &str) {
    ops.push(Op::StartTextSection);
    ops.push(Op::SetTextCursor {
        pos: Point { x: Pt(x), y: Pt(y) },
    });
    ops.push(Op::SetFillColor { col: rgb(color) });
    match font {
        PdfFont::Builtin(f) => {
            ops.push(Op::SetFontSizeBuiltinFont {
                size: Pt(size),
                font: *f,
            });
            // printpdf copies a builtin run's UTF-8 bytes verbatim, so the
            // WinAnsi bytes go out as a raw operand. The empty run registers
            // the font resource.
            ops.push(Op::WriteTextBuiltinFont {
                items: Vec::new(),
                font: *f,
            });
            ops.push(Op::Unknown {
                key: "Tj".to_string(),
                value: vec![DictItem::String {
                    data: to_winansi(text),
                    literal: true,
                }],
            });
        }
        PdfFont::Embedded(id) => {
            ops.push(Op::SetFontSize {
                size: Pt(size),
                font: id.clone(),
            });
            ops.push(Op::WriteText {
                items: vec![TextItem::Text(text.to_string())],
                font: id.clone(),
            });
        }
    }
    ops.push(Op::EndTextSection);
}

fn render_box(
    ops: &mut Vec<Op>,
    lbox: &LayoutBox,
    page_height: f32,
    images: &HashMap<String, ImageResource>,
    faces: &Faces,
) {
    // PDF coordinate system: origin at bottom-left.
    // Our layout uses origin at top-left. Convert:
    let pdf_y = page_height - lbox.y;

    if let Some(text) = &lbox.text {
        let font = &faces.get(text.bold).font;
        // Baseline ≈ top of line + ascender (approx 0.75 × font_size)
        let ascender_offset = text.font_size * 0.75;

        for tline in text.lines.iter().filter(|l| !l.text.is_empty()) {
            let text_y = pdf_y - tline.y_offset - ascender_offset;
            write_text(
                ops,
                font,
                text.font_size,
                lbox.x + tline.x_offset,
                text_y,
                text.color,
                &tline.text,
            );
        }

        if let Some(marker) = &text.list_marker {
            write_text(
                ops,
                &faces.get(false).font,
                text.font_size,
                lbox.x - text.font_size * 1.2,
                pdf_y - ascender_offset,
                text.color,
                marker,
            );
        }
    }

    if let Some(img) = &lbox.image {
        if let Some(res) = images.get(&img.src) {
            let img_bottom_y = page_height - lbox.y - lbox.height;
            // At dpi=72 printpdf renders 1 px = 1 pt, so
            // scale = desired_pt / px_dim.
            let scale_x = lbox.width / res.px_width.max(1) as f32;
            let scale_y = lbox.height / res.px_height.max(1) as f32;

            ops.push(Op::UseXobject {
                id: res.xobj_id.clone(),
                transform: XObjectTransform {
                    translate_x: Some(Pt(lbox.x)),
                    translate_y: Some(Pt(img_bottom_y)),
                    dpi: Some(72.0),
                    scale_x: Some(scale_x),
                    scale_y: Some(scale_y),
                    rotate: None,
                },
            });
        }
    }

    if let Some(qr) = &lbox.qr {
        render_qr(ops, lbox, qr, page_height);
    }
}

fn render_qr(ops: &mut Vec<Op>, lbox: &LayoutBox, qr: &QrContent, page_height: f32) {
    if qr.modules == 0 || qr.dark.len() != qr.modules * qr.modules {
        log::warn!("Skipping malformed QR code ({} modules)", qr.modules);
        return;
    }
    let side = lbox.width.min(lbox.height);
    let module = side / (qr.modules + 2 * QR_QUIET_ZONE) as f32;
    let origin_x = lbox.x + module * QR_QUIET_ZONE as f32;
    let origin_top = lbox.y + module * QR_QUIET_ZONE as f32;

    fill_rect(ops, page_height, lbox.x, lbox.y, side, side, [1.0, 1.0, 1.0, 1.0]);
    for (i, _) in qr.dark.iter().enumerate().filter(|(_, dark)| **dark) {
        let (row, col) = (i / qr.modules, i % qr.modules);
        fill_rect(
            ops,
            page_height,
            origin_x + col as f32 * module,
            origin_top + row as f32 * module,
            module,
            module,
            qr.color,
        );
    }
}
