//! Pagination – flows front matter, content blocks and back matter onto
//! fixed-size pages.
//!
//! Handles:
//! - one page container per content block (each block starts a new page)
//! - line-level splitting of paragraphs across page boundaries
//! - keeping a heading together with the first line that follows it
//! - centred title and call-to-action pages

use crate::content::{ContentBlock, Element};
use crate::fonts::{wrap_text, FontManager};
use crate::layout_config::*;
use crate::theme::{Background, Palette};

/// Default page margins in points.
pub const PAGE_MARGIN_PT: f32 = 54.0;

const LINE_HEIGHT: f32 = 1.4;
const BODY_SIZE: f32 = 12.0;
const LIST_INDENT: f32 = 18.0;
const QR_SIZE_PT: f32 = 160.0;

#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
}

impl PageGeometry {
    pub fn content_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    pub fn content_height(&self) -> f32 {
        self.height - 2.0 * self.margin
    }
}

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    size: f32,
    bold: bool,
    color: [f32; 4],
    space_before: f32,
    space_after: f32,
    indent: f32,
}

fn style_for(element: &Element, palette: &Palette) -> TextStyle {
    let body = TextStyle {
        size: BODY_SIZE,
        bold: false,
        color: palette.text.to_array(),
        space_before: 0.0,
        space_after: 8.0,
        indent: 0.0,
    };
    match element {
        Element::Heading { level, .. } => TextStyle {
            size: match level {
                1 => 24.0,
                2 => 19.0,
                3 => 16.0,
                _ => 14.0,
            },
            bold: true,
            color: palette.accent.to_array(),
            space_before: 14.0,
            space_after: 8.0,
            indent: 0.0,
        },
        Element::Paragraph(_) => body,
        Element::ListItem { depth, .. } => TextStyle {
            space_after: 4.0,
            indent: LIST_INDENT * (*depth as f32 + 1.0),
            ..body
        },
    }
}

pub struct Paginator<'a> {
    geometry: PageGeometry,
    fonts: &'a FontManager,
    palette: Palette,
    pages: Vec<PageLayout>,
    current: Option<PageLayout>,
    /// Distance from the top of the content area on the current page.
    cursor: f32,
}

impl<'a> Paginator<'a> {
    pub fn new(geometry: PageGeometry, fonts: &'a FontManager, palette: Palette) -> Self {
        Self {
            geometry,
            fonts,
            palette,
            pages: Vec::new(),
            current: None,
            cursor: 0.0,
        }
    }

    fn open_page(&mut self, kind: PageKind) {
        self.close_page();
        self.current = Some(PageLayout {
            page_index: self.pages.len(),
            kind,
            boxes: Vec::new(),
        });
        self.cursor = 0.0;
    }

    fn close_page(&mut self) {
        if let Some(page) = self.current.take() {
            self.pages.push(page);
        }
    }

    fn push_box(&mut self, lbox: LayoutBox) {
        if self.current.is_none() {
            self.open_page(PageKind::Body);
        }
        if let Some(page) = self.current.as_mut() {
            page.boxes.push(lbox);
        }
    }

    /// Full-bleed cover image, scaled to fit and centred.
    pub fn cover(&mut self, src: String, px_width: u32, px_height: u32) {
        if px_width == 0 || px_height == 0 {
            return;
        }
        let (w, h) = (px_width as f32, px_height as f32);
        let scale = (self.geometry.width / w).min(self.geometry.height / h);
        let (width, height) = (w * scale, h * scale);
        self.open_page(PageKind::Cover);
        let mut lbox = LayoutBox::new(
            (self.geometry.width - width) / 2.0,
            (self.geometry.height - height) / 2.0,
            width,
            height,
        );
        lbox.image = Some(ImageContent { src });
        self.push_box(lbox);
        self.close_page();
    }

    /// Title, optional part subtitle, and author, centred in the upper third.
    pub fn title_page(&mut self, title: &str, subtitle: Option<&str>, author: &str) {
        self.open_page(PageKind::Title);
        self.cursor = self.geometry.content_height() / 3.0;
        let accent = self.palette.accent.to_array();
        let text = self.palette.text.to_array();
        self.centered(title, 30.0, true, accent);
        if let Some(subtitle) = subtitle.filter(|s| !s.trim().is_empty()) {
            self.cursor += 12.0;
            self.centered(subtitle, 18.0, false, text);
        }
        if !author.trim().is_empty() {
            self.cursor += 28.0;
            self.centered(&format!("by {author}"), 15.0, false, text);
        }
        self.close_page();
    }

    /// Closing page with the call-to-action text, the link and its QR code.
    pub fn call_to_action(&mut self, text: Option<&str>, link: Option<&str>, qr: Option<QrContent>) {
        self.open_page(PageKind::CallToAction);
        self.cursor = self.geometry.content_height() / 4.0;
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            self.centered(text, 22.0, true, self.palette.accent.to_array());
            self.cursor += 18.0;
        }
        if let Some(link) = link.filter(|l| !l.trim().is_empty()) {
            self.centered(link, 12.0, false, self.palette.text.to_array());
            self.cursor += 24.0;
        }
        if let Some(qr) = qr {
            let size = QR_SIZE_PT.min(self.geometry.content_width());
            let mut lbox = LayoutBox::new(
                (self.geometry.width - size) / 2.0,
                self.geometry.margin + self.cursor,
                size,
                size,
            );
            lbox.qr = Some(qr);
            self.push_box(lbox);
        }
        self.close_page();
    }

    fn centered(&mut self, text: &str, size: f32, bold: bool, color: [f32; 4]) {
        let width = self.geometry.content_width();
        let line_h = self.fonts.line_height(size, LINE_HEIGHT);
        let lines: Vec<TextLine> = wrap_text(text, size, bold, width, self.fonts)
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let w = self.fonts.measure_text_width(&line, size, bold);
                TextLine {
                    x_offset: ((width - w) / 2.0).max(0.0),
                    y_offset: i as f32 * line_h,
                    text: line,
                }
            })
            .collect();
        let height = lines.len() as f32 * line_h;
        let mut lbox = LayoutBox::new(
            self.geometry.margin,
            self.geometry.margin + self.cursor,
            width,
            height,
        );
        lbox.text = Some(TextContent {
            lines,
            font_size: size,
            bold,
            color,
            line_height: line_h,
            list_marker: None,
        });
        self.push_box(lbox);
        self.cursor += height;
    }

    /// Lay out one content block starting on a fresh page.
    pub fn block(&mut self, block: &ContentBlock) {
        if block.is_empty() {
            return;
        }
        self.open_page(PageKind::Body);
        let content_h = self.geometry.content_height();

        for (i, element) in block.elements.iter().enumerate() {
            let style = style_for(element, &self.palette);
            let width = self.geometry.content_width() - style.indent;
            let lines = wrap_text(element.text(), style.size, style.bold, width, self.fonts);
            let line_h = self.fonts.line_height(style.size, LINE_HEIGHT);

            if self.cursor > 0.0 {
                self.cursor += style.space_before;
            }

            // Never strand a heading at the bottom of a page.
            if matches!(element, Element::Heading { .. }) && self.cursor > 0.0 {
                let next_line = block
                    .elements
                    .get(i + 1)
                    .map(|next| {
                        let s = style_for(next, &self.palette);
                        s.space_before + self.fonts.line_height(s.size, LINE_HEIGHT)
                    })
                    .unwrap_or(0.0);
                let needed = lines.len() as f32 * line_h + style.space_after + next_line;
                if self.cursor + needed > content_h {
                    self.open_page(PageKind::Body);
                }
            }

            let marker = match element {
                Element::ListItem { marker, .. } => Some(marker.clone()),
                _ => None,
            };
            self.place_lines(lines, style, line_h, marker);
            self.cursor += style.space_after;
        }
        self.close_page();
    }

    fn place_lines(
        &mut self,
        lines: Vec<String>,
        style: TextStyle,
        line_h: f32,
        mut marker: Option<String>,
    ) {
        let content_h = self.geometry.content_height();
        let mut pending: Vec<TextLine> = Vec::new();
        let mut box_top = self.cursor;

        for line in lines {
            if self.cursor + line_h > content_h && self.cursor > 0.0 {
                self.flush_lines(&mut pending, box_top, style, line_h, &mut marker);
                self.open_page(PageKind::Body);
                box_top = self.cursor;
            }
            pending.push(TextLine {
                text: line,
                x_offset: 0.0,
                y_offset: self.cursor - box_top,
            });
            self.cursor += line_h;
        }
        self.flush_lines(&mut pending, box_top, style, line_h, &mut marker);
    }

    fn flush_lines(
        &mut self,
        pending: &mut Vec<TextLine>,
        box_top: f32,
        style: TextStyle,
        line_h: f32,
        marker: &mut Option<String>,
    ) {
        if pending.is_empty() {
            return;
        }
        let lines = std::mem::take(pending);
        let height = lines.len() as f32 * line_h;
        let mut lbox = LayoutBox::new(
            self.geometry.margin + style.indent,
            self.geometry.margin + box_top,
            self.geometry.content_width() - style.indent,
            height,
        );
        lbox.text = Some(TextContent {
            lines,
            font_size: style.size,
            bold: style.bold,
            color: style.color,
            line_height: line_h,
            list_marker: marker.take(),
        });
        self.push_box(lbox);
    }

    /// Close the last page and produce the layout.
    pub fn finish(mut self, title: &str, background: Background) -> LayoutConfig {
        self.close_page();
        if self.pages.is_empty() {
            self.pages.push(PageLayout {
                page_index: 0,
                kind: PageKind::Body,
                boxes: Vec::new(),
            });
        }
        LayoutConfig {
            title: title.to_string(),
            page_width_pt: self.geometry.width,
            page_height_pt: self.geometry.height,
            background,
            pages: self.pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::parse_block;
    use crate::theme::{Color, Theme, ThemeRegistry};

    fn a4() -> PageGeometry {
        PageGeometry {
            width: 595.0,
            height: 842.0,
            margin: PAGE_MARGIN_PT,
        }
    }

    fn classic() -> Theme {
        ThemeRegistry::default().resolve("classic")
    }

    #[test]
    fn short_block_fits_one_page() {
        let fonts = FontManager::default();
        let mut p = Paginator::new(a4(), &fonts, classic().palette());
        p.block(&parse_block("# Title\n\nShort text"));
        let config = p.finish("t", Background::Solid(Color::WHITE));
        assert_eq!(config.pages.len(), 1);
        assert_eq!(config.pages[0].kind, PageKind::Body);
    }

    #[test]
    fn each_block_starts_a_new_page() {
        let fonts = FontManager::default();
        let mut p = Paginator::new(a4(), &fonts, classic().palette());
        p.block(&parse_block("one"));
        p.block(&parse_block("two"));
        p.block(&parse_block("three"));
        let config = p.finish("t", Background::Solid(Color::WHITE));
        assert_eq!(config.count(PageKind::Body), 3);
        assert_eq!(
            config.pages.iter().map(|p| p.page_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn long_block_flows_across_pages_without_losing_lines() {
        let fonts = FontManager::default();
        let mut p = Paginator::new(a4(), &fonts, classic().palette());
        let paragraph = "lorem ipsum dolor sit amet ".repeat(400);
        p.block(&parse_block(&paragraph));
        let config = p.finish("t", Background::Solid(Color::WHITE));
        assert!(config.pages.len() > 1, "got {} pages", config.pages.len());
        assert_eq!(config.text_lines(PageKind::Body).join(" "), paragraph.trim());
        let limit = a4().height - PAGE_MARGIN_PT;
        for page in &config.pages {
            for b in &page.boxes {
                assert!(b.y + b.height <= limit + 0.01, "box overflows page");
            }
        }
    }

    #[test]
    fn heading_is_not_stranded() {
        let fonts = FontManager::default();
        let mut p = Paginator::new(a4(), &fonts, classic().palette());
        // 27 one-line paragraphs leave room for the heading but not for the
        // line after it.
        let filler = (0..27).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n\n");
        p.block(&parse_block(&format!("{filler}\n\n## Next\n\nbody text")));
        let config = p.finish("t", Background::Solid(Color::WHITE));
        assert_eq!(config.pages.len(), 2);
        let texts: Vec<&str> = config.pages[1]
            .boxes
            .iter()
            .flat_map(|b| b.text.iter().flat_map(|t| t.lines.iter().map(|l| l.text.as_str())))
            .collect();
        assert_eq!(texts, vec!["Next", "body text"]);
    }

    #[test]
    fn front_and_back_matter_pages() {
        let fonts = FontManager::default();
        let mut p = Paginator::new(a4(), &fonts, classic().palette());
        p.title_page("My Book", Some("Chapter 1"), "Ada");
        p.block(&parse_block("body"));
        p.call_to_action(
            Some("Get the workbook"),
            Some("https://example.com"),
            Some(QrContent {
                modules: 21,
                dark: vec![false; 441],
                color: [0.0, 0.0, 0.0, 1.0],
            }),
        );
        let config = p.finish("My Book", Background::Solid(Color::WHITE));
        let kinds: Vec<PageKind> = config.pages.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PageKind::Title, PageKind::Body, PageKind::CallToAction]);
        assert!(config.text_lines(PageKind::Title).contains(&"by Ada"));
        assert!(config.pages[2].boxes.iter().any(|b| b.qr.is_some()));
    }

    #[test]
    fn list_marker_only_on_first_box() {
        let fonts = FontManager::default();
        let mut p = Paginator::new(a4(), &fonts, classic().palette());
        p.block(&parse_block("- item"));
        let config = p.finish("t", Background::Solid(Color::WHITE));
        let text = config.pages[0].boxes[0].text.as_ref().unwrap();
        assert_eq!(text.list_marker.as_deref(), Some("\u{2022}"));
        assert_eq!(config.pages[0].boxes[0].x, PAGE_MARGIN_PT + LIST_INDENT);
    }
}
