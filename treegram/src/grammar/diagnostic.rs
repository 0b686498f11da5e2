//! Source ranges and error reports.

use std::fmt::{
    self,
    Display,
    Write,
};

use super::Error;

/// A byte range into the grammar source.
///
/// An empty range means the item has no location in the source, e.g. the
/// implicit token rules.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
}

impl SourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Range of `fragment` inside `source`. `fragment` has to be a subslice
    /// of `source`, otherwise the empty range is returned.
    pub fn locate(source: &str, fragment: &str) -> Self {
        let base = source.as_ptr() as usize;
        let start = fragment.as_ptr() as usize;
        match start.checked_sub(base) {
            Some(offset) if offset + fragment.len() <= source.len() => {
                Self::new(offset, offset + fragment.len())
            }
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// 1-based line and column of a byte offset.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

fn floor_char_boundary(source: &str, mut offset: usize) -> usize {
    while !source.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// An [`Error`] rendered against the source it was produced from.
///
/// ```text
/// error: there are multiple rules named 'expr'
///  --> 1:1
///   |
/// 1 | expr = "a"
///   | ^^^^
///  --> 2:1
///   |
/// 2 | expr = "b"
///   | ^^^^
/// ```
pub struct Report<'a> {
    error: &'a Error,
    source: &'a str,
    origin: Option<&'a str>,
}

impl<'a> Report<'a> {
    pub fn new(error: &'a Error, source: &'a str) -> Self {
        Self {
            error,
            source,
            origin: None,
        }
    }

    /// Prefixes locations with `origin`, usually the file name.
    pub fn with_origin(mut self, origin: &'a str) -> Self {
        self.origin = Some(origin);
        self
    }

    fn write_range(&self, f: &mut fmt::Formatter<'_>, range: SourceRange) -> fmt::Result {
        let (line, column) = line_column(self.source, range.start);
        let start = floor_char_boundary(self.source, range.start.min(self.source.len()));
        let line_start = self.source[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = self.source[start..]
            .find('\n')
            .map_or(self.source.len(), |i| start + i);
        let text = self.source[line_start..line_end].trim_end_matches('\r');

        let end = floor_char_boundary(self.source, range.end.min(line_end)).max(start);
        let width = self.source[start..end].chars().count().max(1);
        let gutter = " ".repeat(line.to_string().len());

        match self.origin {
            Some(origin) => writeln!(f, "{gutter}--> {origin}:{line}:{column}")?,
            None => writeln!(f, "{gutter}--> {line}:{column}")?,
        }
        writeln!(f, "{gutter} |")?;
        writeln!(f, "{line} | {text}")?;

        let mut underline = String::new();
        for c in self.source[line_start..start].chars() {
            underline.push(if c == '\t' { '\t' } else { ' ' });
        }
        for _ in 0..width {
            underline.push('^');
        }
        writeln!(f, "{gutter} | {underline}")
    }
}

impl<'a> Display for Report<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.error.kind)?;
        for range in self.error.ranges.iter().filter(|range| !range.is_empty()) {
            self.write_range(f, *range)?;
        }
        Ok(())
    }
}

/// Renders `error` to a string, see [`Report`].
pub fn report(error: &Error, source: &str, origin: Option<&str>) -> String {
    let mut report = Report::new(error, source);
    if let Some(origin) = origin {
        report = report.with_origin(origin);
    }
    let mut output = String::new();
    // writing into a String can't fail
    let _ = write!(output, "{report}");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::ErrorKind;

    #[test]
    fn it_locates_subslices() {
        let source = "expr = a b";
        assert_eq!(SourceRange::locate(source, &source[7..8]), SourceRange::new(7, 8));
        let elsewhere = String::from("a");
        assert_eq!(SourceRange::locate(source, &elsewhere), SourceRange::default());
        assert!(SourceRange::default().is_empty());
    }

    #[test]
    fn it_computes_lines_and_columns() {
        let source = "a = b\nbb = \"ä\" c\n";
        assert_eq!(line_column(source, 0), (1, 1));
        assert_eq!(line_column(source, 4), (1, 5));
        assert_eq!(line_column(source, 6), (2, 1));
        // column counts characters, not bytes
        assert_eq!(line_column(source, 16), (2, 10));
    }

    #[test]
    fn it_renders_every_range() {
        let source = "expr = \"a\"\nexpr = \"b\"\n";
        let error = Error::new(ErrorKind::DuplicateRule("expr".to_owned()))
            .with_range(SourceRange::new(0, 4))
            .with_range(SourceRange::new(11, 15));

        let rendered = report(&error, source, Some("test.grammar"));
        assert_eq!(
            rendered,
            "error: there are multiple rules named 'expr'\n \
             --> test.grammar:1:1\n  |\n\
             1 | expr = \"a\"\n  | ^^^^\n \
             --> test.grammar:2:1\n  |\n\
             2 | expr = \"b\"\n  | ^^^^\n"
        );
    }

    #[test]
    fn it_skips_empty_ranges() {
        let error = Error::new(ErrorKind::EmptyGrammar).with_range(SourceRange::default());
        assert_eq!(
            report(&error, "", None),
            "error: a grammar needs at least one rule of the form 'rule_name = ...'\n"
        );
    }
}
