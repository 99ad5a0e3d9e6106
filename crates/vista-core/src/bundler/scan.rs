//! Lexical helpers for the rewrite passes: which bytes are code, and which
//! names a `const`/`let`/`var` declaration binds.
//!
//! This is a scanner, not a parser. A `/` is taken as a regex literal only
//! after punctuation that cannot end an expression; template literals are
//! treated as opaque, including their `${...}` substitutions.

use std::ops::Range;

/// Byte ranges of comments and string, template and regex literals.
pub(super) fn literal_ranges(src: &str) -> Vec<Range<usize>> {
    let b = src.as_bytes();
    let mut ranges = Vec::new();
    let mut prev: Option<u8> = None;
    let mut i = 0;
    while i < b.len() {
        let start = i;
        match b[i] {
            b'/' if b.get(i + 1) == Some(&b'/') => {
                i = find_from(b, i + 2, b"\n").unwrap_or(b.len());
                ranges.push(start..i);
                continue;
            }
            b'/' if b.get(i + 1) == Some(&b'*') => {
                i = find_from(b, i + 2, b"*/").map_or(b.len(), |p| p + 2);
                ranges.push(start..i);
                continue;
            }
            q @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(b, i, q);
                ranges.push(start..i);
                prev = Some(q);
                continue;
            }
            b'/' if regex_allowed(prev) => {
                i = skip_regex(b, i);
                ranges.push(start..i);
                prev = Some(b'/');
                continue;
            }
            c if !c.is_ascii_whitespace() => prev = Some(c),
            _ => {}
        }
        i += 1;
    }
    ranges
}

/// Whether byte `pos` lies outside every range in `literals`.
pub(super) fn in_code(literals: &[Range<usize>], pos: usize) -> bool {
    let idx = literals.partition_point(|r| r.end <= pos);
    !literals.get(idx).is_some_and(|r| r.start <= pos)
}

/// Why a declaration's bindings could not be listed.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum DeclError {
    Destructuring,
    Malformed,
}

/// Names bound by the declarator list that starts `rest`, e.g.
/// ` a = f(1, 2), b;` yields `[a, b]`.
///
/// The list ends at a top-level `;`, or at a top-level line break when the
/// declarator so far is complete (not ending in `,` or `=`).
pub(super) fn declared_names(rest: &str) -> Result<Vec<String>, DeclError> {
    let b = rest.as_bytes();
    let mut segments: Vec<&str> = Vec::new();
    let mut depth: i32 = 0;
    let mut seg_start = 0;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            q @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(b, i, q);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b',' if depth == 0 => {
                segments.push(&rest[seg_start..i]);
                seg_start = i + 1;
            }
            b';' if depth == 0 => break,
            b'\n' if depth == 0 => {
                let pending = rest[seg_start..i].trim_end();
                if !pending.trim().is_empty() && !pending.ends_with(&['=', ','][..]) {
                    break;
                }
            }
            _ => {}
        }
        if depth < 0 {
            break;
        }
        i += 1;
    }
    segments.push(&rest[seg_start..i.min(b.len())]);

    segments
        .into_iter()
        .map(|segment| {
            let segment = segment.trim_start();
            if segment.starts_with(&['{', '['][..]) {
                return Err(DeclError::Destructuring);
            }
            let name: String = segment
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(DeclError::Malformed);
            }
            Ok(name)
        })
        .collect()
}

fn find_from(b: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    b.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Index just past the literal opened by `quote` at `i`. Unterminated
/// string literals stop at the end of their line.
fn skip_quoted(b: &[u8], i: usize, quote: u8) -> usize {
    let mut j = i + 1;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            c if c == quote => return j + 1,
            b'\n' if quote != b'`' => return j,
            _ => j += 1,
        }
    }
    b.len()
}

fn skip_regex(b: &[u8], i: usize) -> usize {
    let mut j = i + 1;
    let mut in_class = false;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            b'[' => {
                in_class = true;
                j += 1;
            }
            b']' => {
                in_class = false;
                j += 1;
            }
            b'/' if !in_class => {
                j += 1;
                while j < b.len() && b[j].is_ascii_alphabetic() {
                    j += 1;
                }
                return j;
            }
            b'\n' => return j,
            _ => j += 1,
        }
    }
    b.len()
}

fn regex_allowed(prev: Option<u8>) -> bool {
    match prev {
        None => true,
        Some(c) => b"(,=:[!&|?{};+-*%<>~^".contains(&c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked<'a>(src: &'a str) -> Vec<&'a str> {
        literal_ranges(src).into_iter().map(|r| &src[r]).collect()
    }

    #[test]
    fn test_comments_and_strings_are_literals() {
        let src = "a(); // require('./x')\n/* import './y' */ b('s\\'q', \"d\", `t\n${u}`);";
        assert_eq!(
            masked(src),
            vec![
                "// require('./x')",
                "/* import './y' */",
                "'s\\'q'",
                "\"d\"",
                "`t\n${u}`",
            ]
        );
    }

    #[test]
    fn test_regex_versus_division() {
        assert_eq!(masked("x = /'[/]/g; y = a / b / c;"), vec!["/'[/]/g"]);
    }

    #[test]
    fn test_in_code() {
        let src = "a // c\nb";
        let lits = literal_ranges(src);
        assert!(in_code(&lits, 0));
        assert!(!in_code(&lits, 3));
        assert!(in_code(&lits, src.len() - 1));
    }

    #[test]
    fn test_declared_names_multi() {
        assert_eq!(
            declared_names(" b = 1, c = f(2, 3), d;\nnext(e, f);").unwrap(),
            vec!["b", "c", "d"]
        );
        assert_eq!(
            declared_names(" a = 1,\n  b = { k: [1, 2] }\nlater, x").unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(declared_names(" s = 'a,b';").unwrap(), vec!["s"]);
    }

    #[test]
    fn test_declared_names_rejects_patterns() {
        assert_eq!(declared_names(" { a } = o;"), Err(DeclError::Destructuring));
        assert_eq!(declared_names(" x = 1, [y] = z;"), Err(DeclError::Destructuring));
        assert_eq!(declared_names(" = 1;"), Err(DeclError::Malformed));
    }
}
