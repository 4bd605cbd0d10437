//! Response options: the section toggles and tone sliders of one request.
//!
//! A [`ResponseOptions`] value is immutable per request. It is copied into the
//! resulting turn so that redisplay uses the same section set even if the
//! learner changes their settings later.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

// ============================================================================
// SectionKind
// ============================================================================

/// One of the four canonical output sections.
///
/// The declaration order is the canonical order: prompts request sections in
/// this order and extractors report them in this order. Each kind maps to
/// exactly one header label, used identically by producer and consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Key points of the problem.
    Summary,
    /// Hints and the approach to take.
    Guidance,
    /// Step-by-step derivation of the answer.
    Explanation,
    /// The concise final answer.
    Answer,
}

impl SectionKind {
    /// All section kinds in canonical order.
    pub const ALL: [Self; 4] = [Self::Summary, Self::Guidance, Self::Explanation, Self::Answer];

    /// The literal label used in `### <label>` header markers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Guidance => "guidance",
            Self::Explanation => "explanation",
            Self::Answer => "answer",
        }
    }

    /// Human-readable title for display.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Summary => "Summary",
            Self::Guidance => "Guidance",
            Self::Explanation => "Explanation",
            Self::Answer => "Answer",
        }
    }

    /// Parses a header label case-insensitively.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(label))
    }

    /// Position of this kind in canonical order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for SectionKind {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s).ok_or_else(|| {
            TutorError::validation(format!(
                "unknown section '{s}': expected one of 'summary', 'guidance', 'explanation', 'answer'"
            ))
        })
    }
}

// ============================================================================
// SectionSet
// ============================================================================

/// The set of enabled sections.
///
/// Serializes as the `options` object of the wire request:
/// `{"summary": bool, "guidance": bool, "explanation": bool, "answer": bool}`.
/// Toggles missing from the object are `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SectionSet {
    /// Whether the summary section is requested.
    #[serde(default)]
    pub summary: bool,
    /// Whether the guidance section is requested.
    #[serde(default)]
    pub guidance: bool,
    /// Whether the explanation section is requested.
    #[serde(default)]
    pub explanation: bool,
    /// Whether the answer section is requested.
    #[serde(default)]
    pub answer: bool,
}

impl Default for SectionSet {
    fn default() -> Self {
        Self::of(&[SectionKind::Summary, SectionKind::Answer])
    }
}

impl SectionSet {
    /// A set with no section enabled.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            summary: false,
            guidance: false,
            explanation: false,
            answer: false,
        }
    }

    /// A set with all four sections enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            summary: true,
            guidance: true,
            explanation: true,
            answer: true,
        }
    }

    /// Builds a set from the given kinds.
    #[must_use]
    pub fn of(kinds: &[SectionKind]) -> Self {
        let mut set = Self::empty();
        for kind in kinds {
            set.insert(*kind);
        }
        set
    }

    /// Returns `true` if `kind` is enabled.
    #[must_use]
    pub const fn contains(&self, kind: SectionKind) -> bool {
        match kind {
            SectionKind::Summary => self.summary,
            SectionKind::Guidance => self.guidance,
            SectionKind::Explanation => self.explanation,
            SectionKind::Answer => self.answer,
        }
    }

    /// Enables `kind`.
    pub fn insert(&mut self, kind: SectionKind) {
        self.set(kind, true);
    }

    /// Disables `kind`.
    pub fn remove(&mut self, kind: SectionKind) {
        self.set(kind, false);
    }

    fn set(&mut self, kind: SectionKind, enabled: bool) {
        match kind {
            SectionKind::Summary => self.summary = enabled,
            SectionKind::Guidance => self.guidance = enabled,
            SectionKind::Explanation => self.explanation = enabled,
            SectionKind::Answer => self.answer = enabled,
        }
    }

    /// Iterates the enabled kinds in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = SectionKind> + '_ {
        SectionKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    /// The first enabled kind in canonical order.
    #[must_use]
    pub fn first(&self) -> Option<SectionKind> {
        self.iter().next()
    }

    /// Number of enabled sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if no section is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }
}

// ============================================================================
// Sliders and tiers
// ============================================================================

const fn default_slider() -> f64 {
    0.5
}

/// The two continuous tone sliders, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sliders {
    /// How well the learner already understands the topic.
    #[serde(default = "default_slider")]
    pub understanding: f64,
    /// How thorough and courteous the reply should be.
    #[serde(default = "default_slider")]
    pub politeness: f64,
}

impl Default for Sliders {
    fn default() -> Self {
        Self {
            understanding: default_slider(),
            politeness: default_slider(),
        }
    }
}

impl Sliders {
    /// Checks that both sliders are finite and within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("understanding", self.understanding),
            ("politeness", self.politeness),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(TutorError::validation(format!(
                    "{name} must be between 0 and 1 (got {value})"
                )));
            }
        }
        Ok(())
    }
}

/// Three-way bucketing shared by both sliders.
fn tier_index(value: f64) -> u8 {
    if value <= 0.33 {
        0
    } else if value <= 0.66 {
        1
    } else {
        2
    }
}

/// Depth of the learner's existing understanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderstandingTier {
    /// `value <= 0.33`.
    Shallow,
    /// `0.33 < value <= 0.66`.
    Average,
    /// `value > 0.66`.
    Deep,
}

impl UnderstandingTier {
    /// Buckets a slider value.
    #[must_use]
    pub fn from_value(value: f64) -> Self {
        match tier_index(value) {
            0 => Self::Shallow,
            1 => Self::Average,
            _ => Self::Deep,
        }
    }
}

/// How terse or thorough the reply should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolitenessTier {
    /// Exam-style, no unnecessary words (`value <= 0.33`).
    Terse,
    /// Plain explanation with the formulas used (`0.33 < value <= 0.66`).
    Plain,
    /// Maximally thorough, deriving every formula (`value > 0.66`).
    Thorough,
}

impl PolitenessTier {
    /// Buckets a slider value.
    #[must_use]
    pub fn from_value(value: f64) -> Self {
        match tier_index(value) {
            0 => Self::Terse,
            1 => Self::Plain,
            _ => Self::Thorough,
        }
    }
}

// ============================================================================
// ResponseOptions
// ============================================================================

/// The full configuration governing a single request.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseOptions {
    /// Enabled output sections.
    #[serde(default)]
    pub sections: SectionSet,
    /// Tone sliders.
    #[serde(default)]
    pub sliders: Sliders,
}

impl ResponseOptions {
    /// Creates options from a section set and sliders.
    #[must_use]
    pub const fn new(sections: SectionSet, sliders: Sliders) -> Self {
        Self { sections, sliders }
    }

    /// Validates the slider ranges.
    pub fn validate(&self) -> Result<()> {
        self.sliders.validate()
    }

    /// Understanding tier derived from the slider.
    #[must_use]
    pub fn understanding_tier(&self) -> UnderstandingTier {
        UnderstandingTier::from_value(self.sliders.understanding)
    }

    /// Politeness tier derived from the slider.
    #[must_use]
    pub fn politeness_tier(&self) -> PolitenessTier {
        PolitenessTier::from_value(self.sliders.politeness)
    }
}
