//! Pipeline – ties together content parsing, pagination, rendering and the
//! page-count read-back into a single call.
//!
//! Rendering is synchronous and CPU-bound; async callers run it on the
//! blocking pool (see [`crate::service`]).

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};

use crate::config::RenderConfig;
use crate::content::{blocks_from_text, ContentBlock};
use crate::error::{ForgeError, Result};
use crate::fonts::FontManager;
use crate::layout_config::{LayoutConfig, QrContent};
use crate::model::{AssetRef, DocumentKind, RenderSettings};
use crate::pagination::{PageGeometry, Paginator};
use crate::render::{parse_data_uri, render_pdf};
use crate::theme::{Theme, ThemeRegistry};

/// Document-level facts printed on the front matter.
#[derive(Debug, Clone, Default)]
pub struct RenderMetadata {
    pub title: String,
    pub author: String,
    pub kind: DocumentKind,
    /// Shown under the title on a book's title page.
    pub part_title: Option<String>,
}

/// A rendered part ready for upload.
#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    pub bytes: Vec<u8>,
    /// Page count read back from the PDF itself.
    pub page_count: u32,
    pub layout: LayoutConfig,
}

pub struct Renderer {
    config: RenderConfig,
    themes: ThemeRegistry,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        let themes = ThemeRegistry::with_extra(&config.themes);
        Self { config, themes }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Resolve a theme by name, falling back to the default theme.
    pub fn theme(&self, name: &str) -> Theme {
        self.themes.resolve(name)
    }

    /// Split generated text into blocks and render them.
    pub fn render_text(
        &self,
        text: &str,
        settings: &RenderSettings,
        metadata: &RenderMetadata,
    ) -> Result<RenderedArtifact> {
        self.render(blocks_from_text(text), settings, metadata)
    }

    pub fn render(
        &self,
        blocks: Vec<ContentBlock>,
        settings: &RenderSettings,
        metadata: &RenderMetadata,
    ) -> Result<RenderedArtifact> {
        let theme = self.theme(&settings.theme);
        let family = settings.font.as_deref().or(theme.font.as_deref());
        let fonts = FontManager::for_family(self.config.fonts_dir.as_deref(), family);

        let layout = self.layout(blocks, &theme, &fonts, settings, metadata);
        let bytes = render_pdf(&layout, &fonts).map_err(ForgeError::Render)?;
        let page_count = count_pages(&bytes)?;
        if page_count as usize != layout.pages.len() {
            log::warn!(
                "Layout planned {} page(s) but the PDF has {page_count}; using the PDF count",
                layout.pages.len()
            );
        }
        log::debug!(
            "Rendered '{}' with theme '{}' and font '{}': {page_count} page(s), {} bytes",
            metadata.title,
            theme.name,
            fonts.family(),
            bytes.len()
        );

        Ok(RenderedArtifact {
            bytes,
            page_count,
            layout,
        })
    }

    /// Paginate without rendering.
    pub fn layout(
        &self,
        mut blocks: Vec<ContentBlock>,
        theme: &Theme,
        fonts: &FontManager,
        settings: &RenderSettings,
        metadata: &RenderMetadata,
    ) -> LayoutConfig {
        let geometry = PageGeometry {
            width: self.config.page_width,
            height: self.config.page_height,
            margin: self.config.page_margin,
        };
        let palette = theme.palette();
        let mut paginator = Paginator::new(geometry, fonts, palette);

        if let Some(cover) = &settings.cover {
            match load_cover(cover) {
                Ok((src, w, h)) => paginator.cover(src, w, h),
                Err(e) => log::warn!("Cover image skipped: {e}"),
            }
        }
        if metadata.kind == DocumentKind::Book {
            paginator.title_page(
                &metadata.title,
                metadata.part_title.as_deref(),
                &metadata.author,
            );
        }

        let cta_text = settings.cta_text.as_deref().filter(|s| !s.trim().is_empty());
        let link = settings.link.as_deref().filter(|s| !s.trim().is_empty());
        let has_back_matter = cta_text.is_some() || link.is_some();

        // The back-matter page owns the CTA and link; keep them out of the body.
        if has_back_matter {
            let literals: Vec<&str> = cta_text.into_iter().chain(link).collect();
            for block in &mut blocks {
                block.strip_literals(&literals);
            }
        }
        for block in blocks.iter().filter(|b| !b.is_empty()) {
            paginator.block(block);
        }

        if has_back_matter {
            paginator.call_to_action(cta_text, link, link.and_then(qr_for));
        }

        paginator.finish(&metadata.title, theme.background)
    }
}

/// Run [`Renderer::render_text`] on the blocking pool under `deadline`.
pub async fn render_off_thread(
    renderer: Arc<Renderer>,
    text: String,
    settings: RenderSettings,
    metadata: RenderMetadata,
    deadline: Duration,
) -> Result<RenderedArtifact> {
    let task =
        tokio::task::spawn_blocking(move || renderer.render_text(&text, &settings, &metadata));
    tokio::time::timeout(deadline, task)
        .await
        .map_err(|_| ForgeError::Timeout {
            stage: "render",
            seconds: deadline.as_secs(),
        })?
        .map_err(|e| ForgeError::Render(format!("render task failed: {e}")))?
}

/// Authoritative page count of a rendered PDF.
pub fn count_pages(bytes: &[u8]) -> Result<u32> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ForgeError::Render(format!("rendered PDF is unreadable: {e}")))?;
    Ok(doc.get_pages().len() as u32)
}

fn qr_for(link: &str) -> Option<QrContent> {
    match qrcode::QrCode::new(link.as_bytes()) {
        Ok(code) => Some(QrContent {
            modules: code.width(),
            dark: code
                .to_colors()
                .into_iter()
                .map(|c| c == qrcode::Color::Dark)
                .collect(),
            color: [0.0, 0.0, 0.0, 1.0],
        }),
        Err(e) => {
            log::warn!("No QR code for '{link}': {e}");
            None
        }
    }
}

/// Resolve a cover reference into a data URI plus its pixel dimensions.
fn load_cover(asset: &AssetRef) -> std::result::Result<(String, u32, u32), String> {
    let (uri, bytes) = match asset {
        AssetRef::DataUri(uri) => (uri.clone(), parse_data_uri(uri)?),
        AssetRef::Path(path) => {
            let bytes = std::fs::read(path)
                .map_err(|e| format!("cannot read '{}': {e}", path.display()))?;
            let mime = match ::image::guess_format(&bytes) {
                Ok(::image::ImageFormat::Png) => "image/png",
                Ok(::image::ImageFormat::Jpeg) => "image/jpeg",
                _ => return Err(format!("'{}' is not a PNG or JPEG image", path.display())),
            };
            (format!("data:{mime};base64,{}", BASE64_STD.encode(&bytes)), bytes)
        }
    };
    let img = ::image::load_from_memory(&bytes).map_err(|e| format!("decode error: {e}"))?;
    Ok((uri, img.width(), img.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout_config::PageKind;

    fn renderer() -> Renderer {
        Renderer::new(RenderConfig::default())
    }

    fn png_data_uri() -> String {
        let img = ::image::RgbImage::from_pixel(4, 6, ::image::Rgb([200, 40, 40]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, ::image::ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", BASE64_STD.encode(bytes.into_inner()))
    }

    #[test]
    fn guide_has_no_title_page() {
        let meta = RenderMetadata {
            title: "Guide".into(),
            author: "Ann".into(),
            kind: DocumentKind::Guide,
            part_title: None,
        };
        let artifact = renderer()
            .render_text("# One\n\nHello", &RenderSettings::default(), &meta)
            .unwrap();
        assert_eq!(artifact.page_count, 1);
        assert_eq!(artifact.layout.count(PageKind::Title), 0);
        assert_eq!(&artifact.bytes[0..5], b"%PDF-");
    }

    #[test]
    fn book_with_cover_and_back_matter() {
        let settings = RenderSettings {
            theme: "midnight".into(),
            font: None,
            cover: Some(AssetRef::DataUri(png_data_uri())),
            cta_text: Some("Join the list".into()),
            link: Some("https://example.com/join".into()),
        };
        let meta = RenderMetadata {
            title: "Book".into(),
            author: "Ann".into(),
            kind: DocumentKind::Book,
            part_title: Some("Part 1".into()),
        };
        let text = "Intro. Join the list at https://example.com/join now.\n\n<!-- section-break -->\n\nMore.";
        let artifact = renderer().render_text(text, &settings, &meta).unwrap();

        let kinds: Vec<PageKind> = artifact.layout.pages.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PageKind::Cover,
                PageKind::Title,
                PageKind::Body,
                PageKind::Body,
                PageKind::CallToAction
            ]
        );
        assert_eq!(artifact.page_count, 5);
        let body = artifact.layout.text_lines(PageKind::Body).join(" ");
        assert!(!body.contains("https://example.com/join"));
        assert!(!body.contains("Join the list"));
        assert!(artifact.layout.pages[4].boxes.iter().any(|b| b.qr.is_some()));
    }

    #[test]
    fn unreadable_cover_is_skipped() {
        let settings = RenderSettings {
            cover: Some(AssetRef::Path("/definitely/not/here.png".into())),
            ..RenderSettings::default()
        };
        let meta = RenderMetadata {
            kind: DocumentKind::Guide,
            ..RenderMetadata::default()
        };
        let artifact = renderer().render_text("body", &settings, &meta).unwrap();
        assert_eq!(artifact.layout.count(PageKind::Cover), 0);
    }

    #[test]
    fn count_pages_rejects_garbage() {
        assert!(matches!(count_pages(b"not a pdf"), Err(ForgeError::Render(_))));
    }
}
