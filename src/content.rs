//! Generated text → content blocks.
//!
//! The text is cut on [`SECTION_MARKER`]; every resulting block is laid out
//! starting on a fresh page. Inside a block, Markdown is reduced to the
//! few element kinds the paginator knows how to place.
//!
//! Quoted and bracketed spans are not Markdown: they are hidden from the
//! parser behind plain tokens and put back into the element text, so
//! emphasis markers, escapes and link syntax inside them print as written.

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

use crate::generation::SECTION_MARKER;
use crate::protect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Heading { level: u8, text: String },
    Paragraph(String),
    ListItem { marker: String, depth: usize, text: String },
}

impl Element {
    pub fn text(&self) -> &str {
        match self {
            Element::Heading { text, .. }
            | Element::Paragraph(text)
            | Element::ListItem { text, .. } => text,
        }
    }

    fn text_mut(&mut self) -> &mut String {
        match self {
            Element::Heading { text, .. }
            | Element::Paragraph(text)
            | Element::ListItem { text, .. } => text,
        }
    }
}

/// One logical page container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentBlock {
    pub elements: Vec<Element>,
}

impl ContentBlock {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Remove every literal occurrence of the given strings from the text
    /// of each element, dropping elements left empty.
    pub fn strip_literals(&mut self, needles: &[&str]) {
        for element in &mut self.elements {
            let text = element.text_mut();
            for needle in needles.iter().filter(|n| !n.is_empty()) {
                if text.contains(needle) {
                    *text = text.replace(needle, "");
                }
            }
        }
        self.elements.retain(|e| !e.text().trim().is_empty());
    }
}

/// Split generated text into trimmed, non-empty sections.
pub fn split_sections(text: &str) -> Vec<&str> {
    text.split(SECTION_MARKER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split on section markers and parse each section.
pub fn blocks_from_text(text: &str) -> Vec<ContentBlock> {
    split_sections(text)
        .into_iter()
        .map(parse_block)
        .filter(|b| !b.is_empty())
        .collect()
}

/// Verbatim spans of one section, keyed by alphanumeric tokens the
/// Markdown parser passes through as ordinary text.
#[derive(Debug, Default)]
struct Shielded {
    prefix: String,
    spans: Vec<String>,
}

impl Shielded {
    fn new(markdown: &str) -> (String, Self) {
        let (encoded, map) = protect::encode(markdown);
        if map.is_empty() {
            return (markdown.to_string(), Self::default());
        }
        let mut prefix = String::from("VERBATIM");
        while markdown.contains(&prefix) {
            prefix.push('Q');
        }
        let mut shielded = Self {
            prefix,
            spans: Vec::new(),
        };
        // A span across a blank line is more likely a stray quote than a
        // quotation; leave it to the parser.
        let tokens = map.map_spans(|span| {
            if span.contains("\n\n") {
                span.to_string()
            } else {
                shielded.spans.push(span.to_string());
                shielded.token(shielded.spans.len() - 1)
            }
        });
        (protect::decode(&encoded, &tokens), shielded)
    }

    fn token(&self, index: usize) -> String {
        format!("{}{index}Z", self.prefix)
    }

    fn restore(&self, text: &str) -> String {
        if self.spans.is_empty() || !text.contains(&self.prefix) {
            return text.to_string();
        }
        self.spans
            .iter()
            .enumerate()
            .fold(text.to_string(), |acc, (i, span)| acc.replace(&self.token(i), span))
    }
}

enum Open {
    Heading(u8),
    Paragraph,
    Item { marker: String, depth: usize },
}

#[derive(Default)]
struct BlockBuilder {
    elements: Vec<Element>,
    open: Option<Open>,
    buffer: String,
    /// Next number for each open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    shielded: Shielded,
}

impl BlockBuilder {
    fn flush(&mut self) {
        let text = std::mem::take(&mut self.buffer);
        let text = text.trim();
        let Some(open) = self.open.take() else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let text = self.shielded.restore(text);
        self.elements.push(match open {
            Open::Heading(level) => Element::Heading { level, text },
            Open::Paragraph => Element::Paragraph(text),
            Open::Item { marker, depth } => Element::ListItem {
                marker,
                depth,
                text,
            },
        });
    }

    fn push_text(&mut self, text: &str) {
        if self.open.is_none() {
            self.open = Some(Open::Paragraph);
        }
        self.buffer.push_str(text);
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Parse one section of Markdown.
pub fn parse_block(markdown: &str) -> ContentBlock {
    let (markdown, shielded) = Shielded::new(markdown);
    let mut b = BlockBuilder {
        shielded,
        ..BlockBuilder::default()
    };

    for event in Parser::new(&markdown) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                b.flush();
                b.open = Some(Open::Heading(heading_level(level)));
            }
            Event::Start(Tag::Paragraph) | Event::Start(Tag::CodeBlock(_)) => {
                // Paragraphs inside a list item extend the item.
                if matches!(b.open, Some(Open::Item { .. })) {
                    if !b.buffer.is_empty() {
                        b.buffer.push(' ');
                    }
                } else {
                    b.flush();
                    b.open = Some(Open::Paragraph);
                }
            }
            Event::Start(Tag::List(start)) => {
                b.flush();
                b.lists.push(start);
            }
            Event::Start(Tag::Item) => {
                b.flush();
                let depth = b.lists.len().saturating_sub(1);
                let marker = match b.lists.last_mut() {
                    Some(Some(n)) => {
                        let m = format!("{n}.");
                        *n += 1;
                        m
                    }
                    _ => "\u{2022}".to_string(),
                };
                b.open = Some(Open::Item { marker, depth });
            }
            Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock) => b.flush(),
            Event::End(TagEnd::Paragraph) => {
                if !matches!(b.open, Some(Open::Item { .. })) {
                    b.flush();
                }
            }
            Event::End(TagEnd::List(_)) => {
                b.flush();
                b.lists.pop();
            }
            Event::Text(t) | Event::Code(t) | Event::InlineHtml(t) | Event::Html(t) => {
                b.push_text(&t)
            }
            Event::SoftBreak => b.push_text(" "),
            Event::HardBreak => b.push_text("\n"),
            _ => {}
        }
    }
    b.flush();

    ContentBlock {
        elements: b.elements,
    }
}
