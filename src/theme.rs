//! Rendering themes and the background/text contrast rule.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_THEME: &str = "classic";

/// RGBA colour with components in `0.0..=1.0`. Serialised as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn gray(level: f32) -> Self {
        Self::rgb(level, level, level)
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| v as f32 / 255.0);
        match hex.len() {
            6 => Some(Self::rgb(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => Some(Self::rgb(
                channel(&hex[0..1].repeat(2))?,
                channel(&hex[1..2].repeat(2))?,
                channel(&hex[2..3].repeat(2))?,
            )),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", byte(self.r), byte(self.g), byte(self.b))
    }

    /// Perceived luminance in `0.0..=1.0`.
    pub fn luminance(self) -> f32 {
        0.299 * self.r + 0.587 * self.g + 0.114 * self.b
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        let mix = |a: f32, b: f32| a + (b - a) * t;
        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid colour '{value}'"))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_hex()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Background {
    Solid(Color),
    /// Vertical gradient, `from` at the top of the page.
    Gradient { from: Color, to: Color },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTone {
    Light,
    Dark,
}

impl Background {
    /// Dark solid backgrounds and every gradient get light text.
    pub fn text_tone(&self) -> TextTone {
        match self {
            Background::Solid(c) if c.luminance() < 0.5 => TextTone::Light,
            Background::Solid(_) => TextTone::Dark,
            Background::Gradient { .. } => TextTone::Light,
        }
    }
}

/// Colours derived from a theme for text drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub text: Color,
    pub accent: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub background: Background,
    /// Font family, looked up as `<fonts_dir>/<font>.ttf`.
    #[serde(default)]
    pub font: Option<String>,
    /// Heading colour; defaults to the text colour.
    #[serde(default)]
    pub accent: Option<Color>,
}

impl Theme {
    pub fn palette(&self) -> Palette {
        let text = match self.background.text_tone() {
            TextTone::Light => Color::gray(0.96),
            TextTone::Dark => Color::gray(0.1),
        };
        Palette {
            text,
            accent: self.accent.unwrap_or(text),
        }
    }

    fn builtin(name: &str, background: Background, accent: &str) -> Self {
        Self {
            name: name.to_string(),
            background,
            font: None,
            accent: Color::from_hex(accent),
        }
    }
}

/// Built-in themes plus any declared in configuration.
#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    themes: HashMap<String, Theme>,
}

impl ThemeRegistry {
    pub fn with_extra(extra: &[Theme]) -> Self {
        let hex = |s: &str| Color::from_hex(s).unwrap_or(Color::WHITE);
        let mut themes: HashMap<String, Theme> = [
            Theme::builtin("classic", Background::Solid(Color::WHITE), "#1a365d"),
            Theme::builtin("parchment", Background::Solid(hex("#f4ecd8")), "#7a4e2d"),
            Theme::builtin("midnight", Background::Solid(hex("#14213d")), "#fca311"),
            Theme::builtin(
                "sunset",
                Background::Gradient {
                    from: hex("#ff7e5f"),
                    to: hex("#2e1a47"),
                },
                "#ffd166",
            ),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();
        for theme in extra {
            themes.insert(theme.name.clone(), theme.clone());
        }
        Self { themes }
    }

    /// Look up a theme by name, falling back to the default theme.
    pub fn resolve(&self, name: &str) -> Theme {
        if let Some(theme) = self.themes.get(name) {
            return theme.clone();
        }
        log::warn!("Unknown theme '{name}', using '{DEFAULT_THEME}'");
        self.themes
            .get(DEFAULT_THEME)
            .cloned()
            .unwrap_or_else(|| Theme::builtin(DEFAULT_THEME, Background::Solid(Color::WHITE), "#000"))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.themes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ThemeRegistry {
    fn default() -> Self {
        Self::with_extra(&[])
    }
}
