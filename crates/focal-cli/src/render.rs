//! Progressive terminal rendering of an answer.

use std::io::{self, Write};

use clap::ValueEnum;
use focal_session::{extract_sections, ExtractedSection, SectionLayout};
use focal_tutor::SectionSet;

/// How answers are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum View {
    /// Print each section once it is complete.
    Sections,
    /// Stream the raw model text as it arrives.
    Raw,
}

/// Prints one answer as it streams in.
pub struct Renderer<W: Write> {
    out: W,
    view: View,
    sections: SectionSet,
    text: String,
    printed: SectionSet,
    printed_catch_all: bool,
}

impl<W: Write> Renderer<W> {
    pub const fn new(out: W, view: View, sections: SectionSet) -> Self {
        Self {
            out,
            view,
            sections,
            text: String::new(),
            printed: SectionSet::empty(),
            printed_catch_all: false,
        }
    }

    /// Returns `true` once any answer text has arrived.
    pub fn has_output(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn chunk(&mut self, text: &str) -> io::Result<()> {
        self.text.push_str(text);
        match self.view {
            View::Raw => {
                write!(self.out, "{text}")?;
                self.out.flush()
            }
            View::Sections => self.print_ready(false),
        }
    }

    /// Prints whatever is left. Called on completion, failure and abort.
    pub fn finish(&mut self) -> io::Result<()> {
        match self.view {
            View::Raw => {
                if self.has_output() {
                    writeln!(self.out)?;
                }
                self.out.flush()
            }
            View::Sections => self.print_ready(true),
        }
    }

    /// Prints every section that can no longer change and has not been
    /// printed yet.
    ///
    /// A marked section is final once a later header has appeared. On finish
    /// every remaining section with text is printed.
    fn print_ready(&mut self, finished: bool) -> io::Result<()> {
        let extraction = extract_sections(&self.text, &self.sections);
        for section in &extraction.sections {
            let ready = finished
                || (extraction.layout == SectionLayout::Marked
                    && section.marked
                    && section.kind != extraction.open);
            if ready && !section.text.is_empty() && !self.is_printed(section) {
                writeln!(self.out, "{} {}", section.icon(), section.title())?;
                writeln!(self.out, "{}", section.text)?;
                writeln!(self.out)?;
                self.mark_printed(section);
            }
        }
        self.out.flush()
    }

    fn is_printed(&self, section: &ExtractedSection) -> bool {
        section
            .kind
            .map_or(self.printed_catch_all, |kind| self.printed.contains(kind))
    }

    fn mark_printed(&mut self, section: &ExtractedSection) {
        match section.kind {
            Some(kind) => self.printed.insert(kind),
            None => self.printed_catch_all = true,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
