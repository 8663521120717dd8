//! Line classification for the dump format.
//!
//! A dump is scanned in two states. Before the `# DML` marker every non-comment line is the
//! schema command; after it, lines are context directives or data. There is no lookahead: a
//! line is classified only by its own content and the state the scanner is in.
//!
//! Lines are raw bytes. Data lines are forwarded without checking their encoding; only the
//! directive prefixes are matched.

/// Ends the schema section of the dump.
pub const DATA_SECTION_MARKER: &[u8] = b"# DML";

/// Sets the database for the data lines that follow.
pub const CONTEXT_DATABASE: &[u8] = b"# CONTEXT-DATABASE:";

/// Sets the retention policy for the data lines that follow.
pub const CONTEXT_RETENTION_POLICY: &[u8] = b"# CONTEXT-RETENTION-POLICY:";

const COMMENT: &[u8] = b"#";

/// Which section of the dump the scanner is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanState {
    /// Looking for the schema command, until the data section marker is seen.
    #[default]
    Schema,
    /// Routing context directives and data lines.
    Data,
}

/// What a single line of the dump means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive<'a> {
    Blank,
    Comment,
    /// A candidate schema command; the last one before the marker is used.
    SchemaCommand(&'a [u8]),
    /// The data section marker; the scanner is now in [`ScanState::Data`].
    DataSection,
    ContextDatabase(&'a [u8]),
    ContextRetentionPolicy(&'a [u8]),
    Data(&'a [u8]),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveScanner {
    state: ScanState,
}

impl DirectiveScanner {
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Classify `line`, which must not include its line ending.
    pub fn classify<'a>(&mut self, line: &'a [u8]) -> Directive<'a> {
        match self.state {
            ScanState::Schema => {
                if line.starts_with(DATA_SECTION_MARKER) {
                    self.state = ScanState::Data;
                    Directive::DataSection
                } else if line.starts_with(COMMENT) {
                    Directive::Comment
                } else if line.trim_ascii().is_empty() {
                    Directive::Blank
                } else {
                    Directive::SchemaCommand(line)
                }
            }
            ScanState::Data => {
                if let Some(db) = context_value(line, CONTEXT_DATABASE) {
                    Directive::ContextDatabase(db)
                } else if let Some(rp) = context_value(line, CONTEXT_RETENTION_POLICY) {
                    Directive::ContextRetentionPolicy(rp)
                } else if line.starts_with(COMMENT) {
                    Directive::Comment
                } else if line.trim_ascii().is_empty() {
                    Directive::Blank
                } else {
                    Directive::Data(line)
                }
            }
        }
    }
}

/// The trimmed text after the first colon of a line starting with `prefix`.
fn context_value<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if !line.starts_with(prefix) {
        return None;
    }
    let colon = line.iter().position(|&b| b == b':')?;
    Some(line[colon + 1..].trim_ascii())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_all(input: &[u8]) -> (DirectiveScanner, Vec<Directive<'_>>) {
        let mut scanner = DirectiveScanner::default();
        let directives = input
            .split(|&b| b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| scanner.classify(l))
            .collect();
        (scanner, directives)
    }

    #[test]
    fn two_sections() {
        let input = b"\
# DDL
CREATE DATABASE foo

# DML
# CONTEXT-DATABASE: foo
# CONTEXT-RETENTION-POLICY:  autogen
# some other comment

m,t=1 v=1 0";
        let (scanner, directives) = classify_all(input);
        assert_eq!(scanner.state(), ScanState::Data);
        assert_eq!(
            directives,
            vec![
                Directive::Comment,
                Directive::SchemaCommand(b"CREATE DATABASE foo"),
                Directive::DataSection,
                Directive::ContextDatabase(b"foo"),
                Directive::ContextRetentionPolicy(b"autogen"),
                Directive::Comment,
                Directive::Data(b"m,t=1 v=1 0"),
            ]
        );
    }

    #[test]
    fn context_lines_are_comments_before_the_marker() {
        let (scanner, directives) = classify_all(b"# CONTEXT-DATABASE: foo\nm v=1 0");
        assert_eq!(scanner.state(), ScanState::Schema);
        assert_eq!(
            directives,
            vec![Directive::Comment, Directive::SchemaCommand(b"m v=1 0")]
        );
    }

    #[test]
    fn marker_never_found() {
        let (scanner, directives) = classify_all(b"CREATE DATABASE a\nCREATE DATABASE b\n");
        assert_eq!(scanner.state(), ScanState::Schema);
        assert!(
            directives
                .iter()
                .all(|d| matches!(d, Directive::SchemaCommand(_)))
        );
    }

    #[test]
    fn marker_matches_by_prefix() {
        let mut scanner = DirectiveScanner::default();
        assert_eq!(scanner.classify(b"# DML section"), Directive::DataSection);
        // a second marker is just a comment
        assert_eq!(scanner.classify(b"# DML"), Directive::Comment);
    }

    #[test]
    fn context_value_keeps_text_after_first_colon() {
        let mut scanner = DirectiveScanner::default();
        scanner.classify(DATA_SECTION_MARKER);
        assert_eq!(
            scanner.classify(b"# CONTEXT-DATABASE: db:with:colons "),
            Directive::ContextDatabase(b"db:with:colons")
        );
        assert_eq!(
            scanner.classify(b"# CONTEXT-RETENTION-POLICY:"),
            Directive::ContextRetentionPolicy(b"")
        );
    }

    #[test]
    fn whitespace_only_lines_are_blank() {
        let mut scanner = DirectiveScanner::default();
        assert_eq!(scanner.classify(b" \t "), Directive::Blank);
        scanner.classify(DATA_SECTION_MARKER);
        assert_eq!(scanner.classify(b"   "), Directive::Blank);
        assert_eq!(scanner.classify(b" m v=1"), Directive::Data(b" m v=1"));
    }

    #[test]
    fn data_lines_are_not_decoded() {
        let mut scanner = DirectiveScanner::default();
        scanner.classify(DATA_SECTION_MARKER);
        assert_eq!(
            scanner.classify(b"m,city=M\xfcnchen v=1 1"),
            Directive::Data(b"m,city=M\xfcnchen v=1 1")
        );
    }
}
