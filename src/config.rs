//! Runtime configuration, loaded from a TOML file.
//!
//! Every section is optional; omitted keys take the defaults below.
//!
//! ```toml
//! [generation]
//! words_per_page = 250
//! max_pages_per_call = 5
//!
//! [budget]
//! page_cap = 750
//!
//! [[render.themes]]
//! name = "forest"
//! background = { solid = "#1b3a2b" }
//! font = "Lora"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::pagination::PAGE_MARGIN_PT;
use crate::theme::Theme;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub generation: GenerationConfig,
    pub budget: BudgetConfig,
    pub render: RenderConfig,
    pub completion: CompletionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Conversion ratio from a page target to a target word count.
    pub words_per_page: u32,
    /// Largest page count a single completion call may be asked for.
    pub max_pages_per_call: u32,
    /// Source text above this word count is rejected before any call.
    pub max_source_words: usize,
    /// Pause between consecutive sub-calls of one chunked generation.
    pub inter_call_delay_ms: u64,
    /// Deadline for each completion call.
    pub call_timeout_secs: u64,
    /// Size of the trailing window passed as continuity context.
    pub continuity_words: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            words_per_page: 250,
            max_pages_per_call: 5,
            max_source_words: 3000,
            inter_call_delay_ms: 2000,
            call_timeout_secs: 120,
            continuity_words: 400,
        }
    }
}

impl GenerationConfig {
    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum cumulative page count for one document.
    pub page_cap: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { page_cap: 750 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Page width in points (default: A4 = 595.28).
    pub page_width: f32,
    /// Page height in points (default: A4 = 841.89).
    pub page_height: f32,
    /// Page margin in points.
    pub page_margin: f32,
    /// Directory searched for `<family>.ttf` / `<family>-Bold.ttf`.
    pub fonts_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Themes in addition to the built-in set; same-named entries win.
    pub themes: Vec<Theme>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            page_margin: PAGE_MARGIN_PT,
            fonts_dir: None,
            timeout_secs: 60,
            themes: Vec::new(),
        }
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 8192,
            temperature: Some(0.7),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("artifacts"),
            public_base_url: "file://artifacts".to_string(),
        }
    }
}

impl ForgeConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ForgeError::Config(e.to_string()))
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at '{}', using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ForgeError::Config(format!(
                "cannot read '{}': {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = ForgeConfig::from_toml("").unwrap();
        assert_eq!(config.budget.page_cap, 750);
        assert_eq!(config.generation.max_pages_per_call, 5);
        assert_eq!(config.generation.inter_call_delay(), Duration::from_secs(2));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ForgeConfig::from_toml(
            r##"
[budget]
page_cap = 40

[generation]
words_per_page = 300

[[render.themes]]
name = "forest"
background = { solid = "#1b3a2b" }
"##,
        )
        .unwrap();
        assert_eq!(config.budget.page_cap, 40);
        assert_eq!(config.generation.words_per_page, 300);
        assert_eq!(config.generation.max_source_words, 3000);
        assert_eq!(config.render.themes.len(), 1);
        assert_eq!(config.render.themes[0].name, "forest");
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = ForgeConfig::from_toml("[budget\npage_cap = ").unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ForgeConfig::load(Path::new("/definitely/not/here/forge.toml")).unwrap();
        assert_eq!(config.render.page_margin, PAGE_MARGIN_PT);
    }
}
