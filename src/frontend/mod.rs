//! Everything the compiler core knows about source text. Lexing and parsing
//! happen outside of this crate; the parser hands over an [`ast::Program`]
//! whose nodes carry byte [`Span`]s into the original [`SourceFile`].

use std::path::PathBuf;

use colored::Colorize;
use serde::{Deserialize, Serialize};

pub mod ast;

/// A byte range within a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Used for synthesized nodes which have no location in the source
    pub const DUMMY: Self = Self { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn value_of_span(&self, span: Span) -> &str {
        self.contents.get(span.start..span.end).unwrap_or("")
    }

    /// 1-based line number of the byte position
    pub fn row_for_position(&self, position: usize) -> usize {
        let position = self.clamp_position(position);
        self.contents[..position].matches('\n').count() + 1
    }

    /// 1-based column of the byte position
    pub fn column_for_position(&self, position: usize) -> usize {
        let position = self.clamp_position(position);
        let line_start = self.contents[..position]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        self.contents[line_start..position].chars().count() + 1
    }

    pub fn format_span_position(&self, span: Span) -> String {
        format!(
            "{}:{}:{}",
            self.origin,
            self.row_for_position(span.start),
            self.column_for_position(span.start)
        )
    }

    /// Renders the line containing the start of the span with the span
    /// underlined
    pub fn highlight_span(&self, span: Span) -> String {
        let row = self.row_for_position(span.start);
        let Some(line) = self.contents.lines().nth(row - 1) else {
            return String::new();
        };

        let column = self.column_for_position(span.start);
        let width = self
            .value_of_span(span)
            .lines()
            .next()
            .map(|s| s.chars().count())
            .unwrap_or(0)
            .max(1);

        let gutter = format!("{row} | ");
        format!(
            "{}{}\n{}{}",
            gutter.blue(),
            line,
            " ".repeat(gutter.len() + column - 1),
            "^".repeat(width).red()
        )
    }

    /// Moves a position past the end, or inside a multi-byte character, back
    /// to the closest character boundary before it
    fn clamp_position(&self, position: usize) -> usize {
        let mut position = position.min(self.contents.len());
        while !self.contents.is_char_boundary(position) {
            position -= 1;
        }
        position
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(contents: &str) -> SourceFile {
        SourceFile {
            contents: contents.to_string(),
            origin: SourceFileOrigin::Memory,
        }
    }

    #[test]
    fn rows_and_columns_are_one_based() {
        let file = source("program p;\nbegin\n  x := 1\nend.");
        let position = file.contents.find("x :=").unwrap();

        assert_eq!(file.row_for_position(position), 3);
        assert_eq!(file.column_for_position(position), 3);
        assert_eq!(file.format_span_position(Span::new(position, position + 1)), "<memory>:3:3");
    }

    #[test]
    fn positions_inside_a_character_are_clamped() {
        let file = source("x := 'é';\ny");
        let inside = file.contents.find('é').unwrap() + 1;

        assert_eq!(file.row_for_position(inside), 1);
        assert_eq!(file.column_for_position(inside), 7);
        assert_eq!(file.format_span_position(Span::new(inside, inside + 1)), "<memory>:1:7");
        assert_eq!(file.row_for_position(usize::MAX), 2);
    }

    #[test]
    fn highlight_underlines_the_span() {
        colored::control::set_override(false);
        let file = source("begin\n  x := y\nend.");
        let start = file.contents.find('y').unwrap();

        let highlighted = file.highlight_span(Span::new(start, start + 1));
        assert_eq!(highlighted, "2 |   x := y\n           ^");
    }
}
