//! Generation profiles: persona, rewriting latitude, and whether literal
//! spans must survive verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Fiction; free to invent scenes and dialogue.
    Narrative,
    /// First-person life writing; events and quotations stay as given.
    Memoir,
    /// Instructional material; edit for clarity only, never add claims.
    Nonfiction,
    #[default]
    Generic,
}

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::Narrative,
        Profile::Memoir,
        Profile::Nonfiction,
        Profile::Generic,
    ];

    /// Resolve a profile name; unknown names fall back to [`Profile::Generic`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "narrative" | "fiction" | "novel" => Profile::Narrative,
            "memoir" | "faithful-memoir" | "faithful_memoir" => Profile::Memoir,
            "nonfiction" | "non-fiction" | "instructional" | "guide" => Profile::Nonfiction,
            "generic" => Profile::Generic,
            other => {
                log::warn!("Unknown profile '{other}', using generic");
                Profile::Generic
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Profile::Narrative => "narrative",
            Profile::Memoir => "memoir",
            Profile::Nonfiction => "nonfiction",
            Profile::Generic => "generic",
        }
    }

    /// Profiles that must hand quoted material back untouched.
    pub fn requires_protection(self) -> bool {
        matches!(self, Profile::Memoir | Profile::Nonfiction)
    }

    fn persona(self) -> &'static str {
        match self {
            Profile::Narrative => {
                "You are a novelist. Expand the author's material into vivid, \
                 well-paced prose with scenes, dialogue and sensory detail."
            }
            Profile::Memoir => {
                "You are a ghostwriter for a memoir. Write in the author's first-person \
                 voice, keep every event, name and date exactly as given, and do not \
                 invent experiences."
            }
            Profile::Nonfiction => {
                "You are an editor of instructional material. Improve clarity, \
                 structure and flow only. Do not add facts, claims or advice that are \
                 not in the source."
            }
            Profile::Generic => {
                "You are a professional writer. Turn the author's material into clear, \
                 engaging long-form prose."
            }
        }
    }

    /// The primary instruction block for one completion call.
    ///
    /// `placeholder` is the shape of the protection tokens in the user
    /// content, e.g. `__PROTECTED_N__`; without one no token hint is given.
    pub fn instructions(
        self,
        target_words: u32,
        section: Option<(usize, usize)>,
        placeholder: Option<&str>,
    ) -> String {
        let mut text = String::from(self.persona());
        text.push_str(&format!(
            "\n\nWrite approximately {target_words} words. Use Markdown headings for \
             section titles and plain paragraphs for body text."
        ));
        if let Some((index, total)) = section {
            text.push_str(&format!(
                "\nThis is section {} of {}; continue the material rather than \
                 starting over, and do not summarise earlier sections.",
                index + 1,
                total
            ));
        }
        if let Some(shape) = placeholder {
            text.push_str(&format!(
                "\nPlaceholders of the form {shape} stand for quoted material. \
                 Copy every placeholder into your output exactly once, unchanged."
            ));
        }
        text
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
