//! Subject classification of the raw question.
//!
//! The classifier asks the model for exactly one of seven labels and maps the
//! reply tolerantly: the reply is lower-cased and matched by substring
//! against ordered keywords, so verbose or slightly malformed replies still
//! land in the right category.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TutorError};
use crate::model::LanguageModel;

/// The subject a question belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Mathematics.
    Math,
    /// Physics.
    Physics,
    /// Chemistry.
    Chemistry,
    /// Biology.
    Biology,
    /// Earth science (geology, meteorology, astronomy).
    EarthScience,
    /// English language.
    English,
    /// Anything else.
    #[default]
    Other,
}

impl Category {
    /// All categories, in the order presented to the classifier.
    pub const ALL: [Self; 7] = [
        Self::Math,
        Self::Physics,
        Self::Chemistry,
        Self::Biology,
        Self::EarthScience,
        Self::English,
        Self::Other,
    ];

    /// The wire label of this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Physics => "physics",
            Self::Chemistry => "chemistry",
            Self::Biology => "biology",
            Self::EarthScience => "earth_science",
            Self::English => "english",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TutorError::validation(format!("unknown category '{s}'")))
    }
}

/// Keyword table; first match wins.
const KEYWORDS: &[(&str, Category)] = &[
    ("math", Category::Math),
    ("phys", Category::Physics),
    ("chem", Category::Chemistry),
    ("bio", Category::Biology),
    ("earth", Category::EarthScience),
    ("geo", Category::EarthScience),
    ("eng", Category::English),
];

/// Maps a raw classifier reply to a category.
///
/// # Examples
///
/// ```
/// use focal_tutor::{parse_category, Category};
///
/// assert_eq!(parse_category("The subject is MATH."), Category::Math);
/// assert_eq!(parse_category("earth_science"), Category::EarthScience);
/// assert_eq!(parse_category("history"), Category::Other);
/// ```
#[must_use]
pub fn parse_category(reply: &str) -> Category {
    let reply = reply.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| reply.contains(keyword))
        .map_or(Category::Other, |(_, category)| *category)
}

/// Builds the fixed classification instruction for `question`.
#[must_use]
pub fn classification_prompt(question: &str) -> String {
    let labels = Category::ALL
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Decide which school subject the following question belongs to.\n\
         Candidates: {labels}\n\
         Output exactly one of these seven labels and nothing else.\n\
         Question: {question}"
    )
}

/// Classifies `question` with a single model call.
///
/// # Errors
///
/// Returns `TutorError::ClassificationError` when the model call fails. The
/// caller is expected to degrade to [`Category::Other`].
pub async fn classify(model: &dyn LanguageModel, question: &str) -> Result<Category> {
    let reply = model
        .complete(classification_prompt(question))
        .await
        .map_err(|e| TutorError::classification(e.kind, e.message))?;
    let category = parse_category(&reply);
    debug!(reply_len = reply.len(), %category, "Classified question");
    Ok(category)
}
