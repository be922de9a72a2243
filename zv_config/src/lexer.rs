//! Line-oriented tokenizer for the `key = value` config format.
//!
//! Each non-blank line holds exactly one `key = value` pair. Whitespace
//! around `=` is tolerated; there is no comment syntax, no quoting, and no
//! line continuation. A line with no `=` is a syntax error.

use crate::{ConfigError, Loc};

/// One raw `key = value` pair as it appeared in the source, plus its
/// originating line number for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub loc: Loc,
}

/// Split `input` into a flat list of [`Entry`] values.
///
/// Blank lines (after trimming trailing `\r`, spaces and tabs) are skipped.
/// Everything else must contain a top-level `=`; the key is the trimmed text
/// before it, the value is the trimmed text after it.
pub fn lex(input: &str) -> Result<Vec<Entry>, ConfigError> {
    let mut entries = Vec::new();

    for (idx, raw_line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end_matches(['\r', ' ', '\t']);
        if line.trim().is_empty() {
            continue;
        }

        let eq_pos = line.find('=').ok_or_else(|| ConfigError::Syntax {
            loc: Loc::new(line_no),
            message: format!("expected 'key = value', found '{}'", line.trim()),
        })?;

        let key = line[..eq_pos].trim();
        let value = line[eq_pos + 1..].trim();

        if key.is_empty() {
            return Err(ConfigError::Syntax {
                loc: Loc::new(line_no),
                message: "empty key before '='".into(),
            });
        }

        entries.push(Entry {
            key: key.to_string(),
            value: value.to_string(),
            loc: Loc::new(line_no),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_pairs() {
        let entries = lex("root = /var/www\nport=8080\n").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "root");
        assert_eq!(entries[0].value, "/var/www");
        assert_eq!(entries[1].key, "port");
        assert_eq!(entries[1].value, "8080");
    }

    #[test]
    fn tolerates_whitespace_around_equals() {
        let entries = lex("workers    =    4   \n").unwrap();
        assert_eq!(entries[0].key, "workers");
        assert_eq!(entries[0].value, "4");
    }

    #[test]
    fn skips_blank_lines() {
        let entries = lex("\n\nroot = /var/www\n\n\nport = 80\n").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].loc.line, 6);
    }

    #[test]
    fn rejects_line_without_equals() {
        let err = lex("not-a-pair\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn rejects_empty_key() {
        let err = lex(" = value\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn reports_line_number_on_error() {
        let err = lex("root = /var/www\nbroken\n").unwrap_err();
        match err {
            ConfigError::Syntax { loc, .. } => assert_eq!(loc.line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
