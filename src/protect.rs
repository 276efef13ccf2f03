//! Verbatim-span protection.
//!
//! Quoted and bracketed spans are swapped for opaque placeholders before
//! the text goes to a rewriting model, then swapped back afterwards. The
//! placeholder prefix is picked per call so that it never occurs in the
//! input, which keeps `decode(encode(x)) == x` for every input.
//!
//! Recognised spans (delimiters included):
//! - `"…"` and `“…”`
//! - `[…]`
//! - `{…}`
//!
//! An opener with no matching closer is left as literal text. Nesting is
//! not tracked: a span ends at the first matching closer.

use std::sync::LazyLock;

use regex::{Captures, Regex};

const BASE_PREFIX: &str = "__PROTECTED";

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(__PROTECTEDX*)_(\d+)__").expect("valid token pattern"));

/// Request-scoped mapping from placeholder index to the original span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionMap {
    prefix: String,
    spans: Vec<String>,
}

impl ProtectionMap {
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// The placeholder standing in for span `index`.
    pub fn token(&self, index: usize) -> String {
        format!("{}_{}__", self.prefix, index)
    }

    /// Generic form of this map's placeholders, for telling a model what
    /// to preserve.
    pub fn token_shape(&self) -> String {
        format!("{}_N__", self.prefix)
    }

    pub fn spans(&self) -> &[String] {
        &self.spans
    }

    /// A map over the same placeholders whose spans are replaced by `f`.
    /// Decoding with it substitutes `f(span)` for each original span.
    pub fn map_spans(&self, mut f: impl FnMut(&str) -> String) -> ProtectionMap {
        ProtectionMap {
            prefix: self.prefix.clone(),
            spans: self.spans.iter().map(|s| f(s)).collect(),
        }
    }

    /// Indices of spans whose placeholder does not appear in `text`.
    pub fn missing_in(&self, text: &str) -> Vec<usize> {
        (0..self.spans.len())
            .filter(|i| !text.contains(&self.token(*i)))
            .collect()
    }
}

fn closer_for(open: char) -> Option<char> {
    match open {
        '"' => Some('"'),
        '\u{201C}' => Some('\u{201D}'),
        '[' => Some(']'),
        '{' => Some('}'),
        _ => None,
    }
}

fn choose_prefix(text: &str) -> String {
    let mut prefix = BASE_PREFIX.to_string();
    while text.contains(&prefix) {
        prefix.push('X');
    }
    prefix
}

/// Replace every protected span with a placeholder.
pub fn encode(text: &str) -> (String, ProtectionMap) {
    let mut map = ProtectionMap {
        prefix: choose_prefix(text),
        spans: Vec::new(),
    };
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut search_from = 0usize;

    while let Some((start, open, close)) = next_opener(text, search_from) {
        let body_start = start + open.len_utf8();
        match text[body_start..].find(close) {
            Some(rel) => {
                let end = body_start + rel + close.len_utf8();
                out.push_str(&text[cursor..start]);
                out.push_str(&map.token(map.spans.len()));
                map.spans.push(text[start..end].to_string());
                cursor = end;
                search_from = end;
            }
            // Unbalanced: keep the opener as ordinary text.
            None => search_from = body_start,
        }
    }
    out.push_str(&text[cursor..]);
    (out, map)
}

fn next_opener(text: &str, from: usize) -> Option<(usize, char, char)> {
    text[from..]
        .char_indices()
        .find_map(|(i, c)| closer_for(c).map(|close| (from + i, c, close)))
}

/// Put the original spans back. Placeholders with an unknown index or a
/// foreign prefix are left untouched.
pub fn decode(text: &str, map: &ProtectionMap) -> String {
    if map.is_empty() {
        return text.to_string();
    }
    TOKEN_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let span = (&caps[1] == map.prefix.as_str())
                .then(|| caps[2].parse::<usize>().ok())
                .flatten()
                .and_then(|i| map.spans.get(i));
            match span {
                Some(original) => original.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
