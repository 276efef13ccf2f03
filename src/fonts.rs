//! Font loading and text measurement using `ttf-parser`.
//!
//! A theme or document names a font family; the regular and bold faces are
//! read from `<fonts_dir>/<family>.ttf` and `<fonts_dir>/<family>-Bold.ttf`
//! and later embedded in the PDF. When a face cannot be loaded we fall back
//! to the built-in Helvetica metrics and keep going.

use std::collections::HashMap;
use std::path::Path;

/// A loaded font face with metrics.
#[derive(Clone)]
pub struct FontData {
    /// Raw font bytes; empty for the built-in fallback.
    pub bytes: Vec<u8>,
    pub units_per_em: f32,
    pub ascender: f32,
    pub descender: f32,
}

impl FontData {
    fn builtin() -> Self {
        Self {
            bytes: Vec::new(),
            units_per_em: 1000.0,
            ascender: 750.0,
            descender: -250.0,
        }
    }

    fn parse(bytes: Vec<u8>) -> Result<Self, String> {
        let face =
            ttf_parser::Face::parse(&bytes, 0).map_err(|e| format!("Failed to parse font: {e}"))?;
        Ok(Self {
            units_per_em: face.units_per_em() as f32,
            ascender: face.ascender() as f32,
            descender: face.descender() as f32,
            bytes,
        })
    }

    pub fn is_embedded(&self) -> bool {
        !self.bytes.is_empty()
    }
}

/// Regular and bold faces of one family.
pub struct FontManager {
    family: String,
    faces: HashMap<bool, FontData>,
}

impl FontManager {
    /// Built-in Helvetica only.
    pub fn builtin() -> Self {
        let mut faces = HashMap::new();
        faces.insert(false, FontData::builtin());
        faces.insert(true, FontData::builtin());
        Self {
            family: "Helvetica".to_string(),
            faces,
        }
    }

    /// Load `family` from `fonts_dir`, degrading to Helvetica per face.
    pub fn for_family(fonts_dir: Option<&Path>, family: Option<&str>) -> Self {
        let mut mgr = Self::builtin();
        let Some(family) = family.filter(|f| !f.trim().is_empty()) else {
            return mgr;
        };
        let Some(dir) = fonts_dir else {
            log::warn!("Font '{family}' requested but no fonts directory is configured; using Helvetica");
            return mgr;
        };

        let regular = dir.join(format!("{family}.ttf"));
        match std::fs::read(&regular).map_err(|e| e.to_string()).and_then(FontData::parse) {
            Ok(data) => {
                mgr.family = family.to_string();
                mgr.faces.insert(false, data.clone());
                // Until a bold face turns up, headings use the regular one.
                mgr.faces.insert(true, data);
            }
            Err(e) => {
                log::warn!("Font '{}' unavailable ({e}); using Helvetica", regular.display());
                return mgr;
            }
        }

        let bold = dir.join(format!("{family}-Bold.ttf"));
        if bold.exists() {
            match std::fs::read(&bold).map_err(|e| e.to_string()).and_then(FontData::parse) {
                Ok(data) => {
                    mgr.faces.insert(true, data);
                }
                Err(e) => log::warn!("Bold face '{}' unusable: {e}", bold.display()),
            }
        }
        mgr
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn get(&self, bold: bool) -> &FontData {
        // Both keys are inserted on construction.
        &self.faces[&bold]
    }

    /// Measure the width of a string at a given font size (in pt).
    /// With real font bytes we sum glyph advances; otherwise we use an
    /// average character width heuristic (0.5 × font_size per char).
    pub fn measure_text_width(&self, text: &str, font_size: f32, bold: bool) -> f32 {
        let data = self.get(bold);

        if !data.is_embedded() {
            // Bold is ~10 % wider.
            let avg = if bold { 0.55 } else { 0.5 };
            return text.chars().count() as f32 * font_size * avg;
        }

        match ttf_parser::Face::parse(&data.bytes, 0) {
            Ok(face) => {
                let scale = font_size / data.units_per_em;
                text.chars()
                    .map(|ch| match face.glyph_index(ch) {
                        Some(gid) => face.glyph_hor_advance(gid).unwrap_or(0) as f32 * scale,
                        None => font_size * 0.5,
                    })
                    .sum()
            }
            Err(_) => text.chars().count() as f32 * font_size * 0.5,
        }
    }

    pub fn line_height(&self, font_size: f32, factor: f32) -> f32 {
        font_size * factor
    }

    pub fn ascender(&self, font_size: f32, bold: bool) -> f32 {
        let data = self.get(bold);
        data.ascender * font_size / data.units_per_em
    }
}

impl Default for FontManager {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Word-wrap text to fit within `max_width` points. Existing newlines are
/// kept as hard breaks.
pub fn wrap_text(
    text: &str,
    font_size: f32,
    bold: bool,
    max_width: f32,
    fonts: &FontManager,
) -> Vec<String> {
    if max_width <= 0.0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let mut lines: Vec<String> = Vec::new();
    for paragraph in text.split('\n') {
        let mut current_line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current_line.is_empty() {
                word.to_string()
            } else {
                format!("{current_line} {word}")
            };
            let w = fonts.measure_text_width(&candidate, font_size, bold);
            if w > max_width && !current_line.is_empty() {
                lines.push(std::mem::replace(&mut current_line, word.to_string()));
            } else {
                current_line = candidate;
            }
        }
        lines.push(current_line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_text_width() {
        let mgr = FontManager::default();
        let w = mgr.measure_text_width("Hello", 16.0, false);
        // 5 chars × 16 × 0.5 = 40
        assert!((w - 40.0).abs() < 0.1);
    }

    #[test]
    fn word_wrap_basic() {
        let mgr = FontManager::default();
        let lines = wrap_text("Hello world foo bar", 16.0, false, 60.0, &mgr);
        assert!(lines.len() >= 2, "Expected wrapping, got {:?}", lines);
        assert_eq!(lines.join(" "), "Hello world foo bar");
    }

    #[test]
    fn hard_breaks_are_kept() {
        let mgr = FontManager::default();
        let lines = wrap_text("a\nb", 12.0, false, 500.0, &mgr);
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn missing_font_degrades_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = FontManager::for_family(Some(dir.path()), Some("Nope"));
        assert_eq!(mgr.family(), "Helvetica");
        assert!(!mgr.get(false).is_embedded());

        let garbage = dir.path().join("Broken.ttf");
        std::fs::write(&garbage, b"not a font").unwrap();
        let mgr = FontManager::for_family(Some(dir.path()), Some("Broken"));
        assert_eq!(mgr.family(), "Helvetica");
    }
}
