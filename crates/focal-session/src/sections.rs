//! Section extraction and display helpers.
//!
//! The model marks each requested section with a literal `### <label>`
//! header. [`extract_sections`] splits the accumulated answer text on those
//! headers for the section set that produced the request. It works on
//! in-progress text too, so callers can re-run it after every chunk.

use focal_tutor::{SectionKind, SectionSet};
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches a header line for any of the four canonical labels.
///
/// Case-insensitive, anchored to a whole line, tolerant of surrounding
/// whitespace and a trailing colon.
static HEADER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*#{1,6}[ \t]*(summary|guidance|explanation|answer)[ \t]*:?[ \t]*\r?$")
        .ok()
});

/// Title of the catch-all section used when no section is enabled.
pub const CATCH_ALL_TITLE: &str = "Response";

/// Display icon for a section kind.
#[must_use]
pub const fn icon(kind: SectionKind) -> &'static str {
    match kind {
        SectionKind::Summary => "📝",
        SectionKind::Guidance => "🧭",
        SectionKind::Explanation => "📖",
        SectionKind::Answer => "✅",
    }
}

/// How the extracted sections relate to the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionLayout {
    /// At least one enabled header was found.
    Marked,
    /// No enabled header was found; the whole text went to the first section.
    Fallback,
    /// No section was enabled; a single catch-all section holds the text.
    CatchAll,
}

/// One display section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSection {
    /// The section kind, or `None` for the catch-all section.
    pub kind: Option<SectionKind>,
    /// Trimmed body text. Empty when the section was not found.
    pub text: String,
    /// Whether the section's own header appeared in the text.
    pub marked: bool,
}

impl ExtractedSection {
    /// Display title.
    #[must_use]
    pub fn title(&self) -> &'static str {
        self.kind.map_or(CATCH_ALL_TITLE, SectionKind::title)
    }

    /// Display icon.
    #[must_use]
    pub fn icon(&self) -> &'static str {
        self.kind.map_or("💬", icon)
    }
}

/// The result of splitting an answer into sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// How the text was split.
    pub layout: SectionLayout,
    /// Sections in canonical order, one per enabled kind.
    pub sections: Vec<ExtractedSection>,
    /// The enabled section whose body runs to the end of the text and may
    /// still grow. Every other marked section is final.
    pub open: Option<SectionKind>,
}

impl Extraction {
    /// The section of `kind`, if it is enabled.
    #[must_use]
    pub fn get(&self, kind: SectionKind) -> Option<&ExtractedSection> {
        self.sections.iter().find(|s| s.kind == Some(kind))
    }
}

/// A header occurrence in the text.
#[derive(Debug, Clone, Copy)]
struct Marker {
    kind: SectionKind,
    start: usize,
    end: usize,
}

fn find_markers(text: &str) -> Vec<Marker> {
    let Some(re) = HEADER.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = SectionKind::from_label(caps.get(1)?.as_str())?;
            Some(Marker {
                kind,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Splits `text` into display sections for `enabled`.
///
/// - A section's body runs from its first header to the next header of any
///   canonical label, or to the end of the text. Bodies are trimmed.
/// - Enabled sections whose header is missing are empty.
/// - If no enabled header appears at all, the whole text is assigned to the
///   first enabled section and the rest stay empty.
/// - If no section is enabled, a single catch-all section holds the text.
///
/// # Examples
///
/// ```
/// use focal_session::sections::{extract_sections, SectionLayout};
/// use focal_tutor::{SectionKind, SectionSet};
///
/// let enabled = SectionSet::of(&[SectionKind::Summary, SectionKind::Answer]);
/// let extraction = extract_sections("### summary\nLinear.\n### answer\nx = 2", &enabled);
///
/// assert_eq!(extraction.layout, SectionLayout::Marked);
/// assert_eq!(extraction.sections[0].text, "Linear.");
/// assert_eq!(extraction.sections[1].text, "x = 2");
/// ```
#[must_use]
pub fn extract_sections(text: &str, enabled: &SectionSet) -> Extraction {
    if enabled.is_empty() {
        return Extraction {
            layout: SectionLayout::CatchAll,
            sections: vec![ExtractedSection {
                kind: None,
                text: text.trim().to_string(),
                marked: false,
            }],
            open: None,
        };
    }

    let markers = find_markers(text);
    let any_enabled = markers.iter().any(|m| enabled.contains(m.kind));

    if !any_enabled {
        let first = enabled.first();
        return Extraction {
            layout: SectionLayout::Fallback,
            sections: enabled
                .iter()
                .map(|kind| ExtractedSection {
                    kind: Some(kind),
                    text: if Some(kind) == first {
                        text.trim().to_string()
                    } else {
                        String::new()
                    },
                    marked: false,
                })
                .collect(),
            open: first,
        };
    }

    let sections = enabled
        .iter()
        .map(|kind| {
            let position = markers.iter().position(|m| m.kind == kind);
            let body = position
                .map(|index| {
                    let start = markers[index].end;
                    let end = markers.get(index + 1).map_or(text.len(), |next| next.start);
                    text[start..end].trim().to_string()
                })
                .unwrap_or_default();
            ExtractedSection {
                kind: Some(kind),
                text: body,
                marked: position.is_some(),
            }
        })
        .collect();

    // Text after a repeated header belongs to no section.
    let open = markers
        .last()
        .filter(|last| {
            enabled.contains(last.kind)
                && markers.iter().position(|m| m.kind == last.kind) == Some(markers.len() - 1)
        })
        .map(|last| last.kind);

    Extraction {
        layout: SectionLayout::Marked,
        sections,
        open,
    }
}

// ============================================================================
// Loading phrases
// ============================================================================

/// Phrases shown while a section waits for its first text.
pub const LOADING_PHRASES: [&str; 6] = [
    "Preparing the answer...",
    "Thinking...",
    "Pondering...",
    "Planning the structure...",
    "Organizing the information...",
    "Generating the answer...",
];

/// Phrase shown instead when the submission carried images.
pub const IMAGE_LOADING_PHRASE: &str = "Analyzing the attached images...";

/// Interval between phrase rotations.
pub const LOADING_TICK: std::time::Duration = std::time::Duration::from_millis(2500);

/// The placeholder phrase for the section at `section_index` after `tick`
/// rotations.
#[must_use]
pub const fn loading_phrase(section_index: usize, tick: usize, has_images: bool) -> &'static str {
    if has_images {
        return IMAGE_LOADING_PHRASE;
    }
    LOADING_PHRASES[section_index.wrapping_add(tick) % LOADING_PHRASES.len()]
}
