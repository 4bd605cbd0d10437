//! Tutoring prompt assembly.
//!
//! [`assemble_prompt`] is a pure template render: the same category,
//! options and question always produce byte-identical text.

use crate::classifier::Category;
use crate::options::{PolitenessTier, ResponseOptions, SectionKind, UnderstandingTier};

/// Separator between prompt blocks.
const BLOCK_SEPARATOR: &str = "\n\n";

/// Rules shared by every section.
const FORMATTING_RULES: &str = "Rules for every section:\n\
- Write every formula in LaTeX display math ($$ ... $$) on its own line.\n\
- Do not embed formulas inside sentences.\n\
- Keep the layout organized and easy to read; bullet points are allowed.\n\
- Answer in the same language as the question, at textbook level.";

/// Persona line for each category.
#[must_use]
pub const fn persona(category: Category) -> &'static str {
    match category {
        Category::Math => "You are a high school mathematics teacher.",
        Category::Physics => "You are a high school physics teacher.",
        Category::Chemistry => "You are a high school chemistry teacher.",
        Category::Biology => "You are a high school biology teacher.",
        Category::EarthScience => "You are a high school earth science teacher.",
        Category::English => "You are a high school English teacher.",
        Category::Other => "You are a friendly teacher for high school students.",
    }
}

/// Instruction for the learner's level of understanding.
#[must_use]
pub const fn understanding_instruction(tier: UnderstandingTier) -> &'static str {
    match tier {
        UnderstandingTier::Shallow => {
            "The learner has a shallow understanding of this topic: start from the basics and do not skip steps."
        }
        UnderstandingTier::Average => {
            "The learner has an average understanding of this topic: explain at a standard textbook level."
        }
        UnderstandingTier::Deep => {
            "The learner has a deep understanding of this topic: keep the basics brief and focus on the key insight."
        }
    }
}

/// Instruction for the reply's tone and thoroughness.
#[must_use]
pub const fn politeness_instruction(tier: PolitenessTier) -> &'static str {
    match tier {
        PolitenessTier::Terse => {
            "Reply tersely, like a model answer on an exam, without unnecessary words."
        }
        PolitenessTier::Plain => {
            "Reply plainly and clearly, showing the formulas you use."
        }
        PolitenessTier::Thorough => {
            "Reply in a maximally thorough way that anyone can follow, deriving every formula you use."
        }
    }
}

/// What the model should put under each section header.
const fn section_instruction(kind: SectionKind) -> &'static str {
    match kind {
        SectionKind::Summary => {
            "Only summarize the key points of the problem. Do not give guidance, an explanation, or the answer."
        }
        SectionKind::Guidance => {
            "Only give hints and the approach for solving the problem. Do not summarize, explain, or answer."
        }
        SectionKind::Explanation => {
            "Only explain the steps that lead to the answer, then list the definitions and formulas you used."
        }
        SectionKind::Answer => {
            "Only give the final answer, written concisely as on an exam."
        }
    }
}

/// Renders the header block for one section.
fn section_block(kind: SectionKind) -> String {
    format!("### {}\n{}", kind.label(), section_instruction(kind))
}

/// Builds the tutoring prompt for `question`.
///
/// Blocks, in order: persona, understanding tier, politeness tier, shared
/// formatting rules, one header block per enabled section in canonical
/// order, and finally the verbatim question.
///
/// # Examples
///
/// ```
/// use focal_tutor::{assemble_prompt, Category, ResponseOptions};
///
/// let options = ResponseOptions::default();
/// let a = assemble_prompt(Category::Math, &options, "2x+3=7");
/// let b = assemble_prompt(Category::Math, &options, "2x+3=7");
/// assert_eq!(a, b);
/// assert!(a.ends_with("Question: 2x+3=7"));
/// ```
#[must_use]
pub fn assemble_prompt(category: Category, options: &ResponseOptions, question: &str) -> String {
    let mut blocks: Vec<String> = vec![
        persona(category).to_string(),
        understanding_instruction(options.understanding_tier()).to_string(),
        politeness_instruction(options.politeness_tier()).to_string(),
        FORMATTING_RULES.to_string(),
    ];

    if !options.sections.is_empty() {
        blocks.push(
            "Each section below is independent of the others. Do not add separator lines.\n\
             Reply using exactly the following format, with each header on its own line:"
                .to_string(),
        );
        blocks.extend(options.sections.iter().map(section_block));
    }

    blocks.push(format!("Question: {question}"));
    blocks.join(BLOCK_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{SectionSet, Sliders};

    fn options(kinds: &[SectionKind], understanding: f64, politeness: f64) -> ResponseOptions {
        ResponseOptions::new(
            SectionSet::of(kinds),
            Sliders {
                understanding,
                politeness,
            },
        )
    }

    fn header_count(prompt: &str) -> usize {
        prompt.lines().filter(|line| line.starts_with("### ")).count()
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let opts = options(&SectionKind::ALL, 0.4, 0.7);
        let first = assemble_prompt(Category::Physics, &opts, "Why do objects fall?");
        let second = assemble_prompt(Category::Physics, &opts, "Why do objects fall?");
        assert_eq!(first, second);
    }

    #[test]
    fn test_assemble_math_scenario() {
        let opts = options(&[SectionKind::Summary, SectionKind::Answer], 0.2, 0.9);
        let prompt = assemble_prompt(Category::Math, &opts, "2x+3=7を解いて");

        assert!(prompt.starts_with(persona(Category::Math)));
        assert!(prompt.contains("shallow understanding"));
        assert!(prompt.contains("maximally thorough"));
        assert_eq!(header_count(&prompt), 2);
        assert!(prompt.contains("### summary\n"));
        assert!(prompt.contains("### answer\n"));
        assert!(prompt.ends_with("Question: 2x+3=7を解いて"));
    }

    #[test]
    fn test_sections_follow_canonical_order() {
        let opts = options(&[SectionKind::Answer, SectionKind::Guidance], 0.5, 0.5);
        let prompt = assemble_prompt(Category::Other, &opts, "q");
        let guidance = prompt.find("### guidance").unwrap_or(usize::MAX);
        let answer = prompt.find("### answer").unwrap_or(0);
        assert!(guidance < answer);
    }

    #[test]
    fn test_no_sections_means_no_header_blocks() {
        let opts = options(&[], 0.5, 0.5);
        let prompt = assemble_prompt(Category::English, &opts, "What is a gerund?");
        assert_eq!(header_count(&prompt), 0);
        assert!(!prompt.contains("following format"));
        assert!(prompt.ends_with("Question: What is a gerund?"));
    }

    #[test]
    fn test_tier_instructions_selected() {
        let prompt = assemble_prompt(Category::Biology, &options(&[], 0.9, 0.1), "q");
        assert!(prompt.contains("deep understanding"));
        assert!(prompt.contains("like a model answer on an exam"));

        let prompt = assemble_prompt(Category::Biology, &options(&[], 0.5, 0.5), "q");
        assert!(prompt.contains("average understanding"));
        assert!(prompt.contains("showing the formulas you use"));
    }

    #[test]
    fn test_every_category_has_a_distinct_persona() {
        let personas: std::collections::HashSet<_> =
            Category::ALL.iter().map(|c| persona(*c)).collect();
        assert_eq!(personas.len(), Category::ALL.len());
    }

    #[test]
    fn test_question_is_verbatim() {
        let question = "  ### answer\nsneaky  ";
        let prompt = assemble_prompt(Category::Other, &options(&[], 0.5, 0.5), question);
        assert!(prompt.ends_with(&format!("Question: {question}")));
    }
}
