//! Textual docstring insertion.
//!
//! All mutation goes through [`insert_docstring`] and [`upsert_docstring`],
//! which locate a signature by structural matching and splice the docstring
//! in after it. Both are total: any signature shape the matcher does not
//! anticipate results in the input being returned unchanged, never an error.

use regex::Regex;

use crate::types::MutationTarget;

/// Insert `docstring` after the target's signature. No-op when the target
/// cannot be located or already has a docstring.
pub fn insert_docstring(source: &str, target: &MutationTarget, docstring: &str) -> String {
    apply(source, target, docstring, false)
}

/// Like [`insert_docstring`], but an existing docstring directly after the
/// signature is replaced instead of left alone. Used by the refinement pass.
pub fn upsert_docstring(source: &str, target: &MutationTarget, docstring: &str) -> String {
    apply(source, target, docstring, true)
}

fn apply(source: &str, target: &MutationTarget, docstring: &str, replace: bool) -> String {
    let lines: Vec<&str> = source.split('\n').collect();

    let Some(sig) = locate_signature(&lines, target) else {
        return source.to_string();
    };

    let body_indent = body_indent(&lines, &sig);
    let existing = existing_docstring_span(&lines, &sig);

    match (existing, replace) {
        (Some(_), false) => source.to_string(),
        (Some((start, end)), true) => {
            let mut out: Vec<String> = Vec::with_capacity(lines.len());
            out.extend(lines[..start].iter().map(|l| l.to_string()));
            out.extend(indent_docstring(docstring, body_indent));
            out.extend(lines[end + 1..].iter().map(|l| l.to_string()));
            out.join("\n")
        }
        (None, _) => {
            let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
            out.extend(lines[..=sig.colon_line].iter().map(|l| l.to_string()));
            out.extend(indent_docstring(docstring, body_indent));
            out.extend(lines[sig.colon_line + 1..].iter().map(|l| l.to_string()));
            out.join("\n")
        }
    }
}

#[derive(Debug)]
struct Signature {
    /// Line holding the colon that terminates the signature.
    colon_line: usize,
    /// Indentation of the `def`/`class` line itself.
    def_indent: usize,
}

/// Locate the signature of the target and scan to its terminating colon.
///
/// This is the single place that knows what a signature looks like:
/// decorators above the line are irrelevant, `async def` and plain `def`
/// both match, argument lists may span lines and contain nested parens,
/// brackets, string defaults, and comments.
fn locate_signature(lines: &[&str], target: &MutationTarget) -> Option<Signature> {
    let (start_line, def_indent) = match target {
        MutationTarget::Class { name } => find_def_line(lines, 0, None, &class_re(name))?,
        MutationTarget::Function {
            name,
            owning_class: None,
        } => find_def_line(lines, 0, None, &def_re(name))?,
        MutationTarget::Function {
            name,
            owning_class: Some(class),
        } => {
            let (class_line, class_indent) = find_def_line(lines, 0, None, &class_re(class))?;
            find_def_line(lines, class_line + 1, Some(class_indent), &def_re(name))?
        }
    };

    let colon_line = scan_to_colon(lines, start_line)?;
    Some(Signature {
        colon_line,
        def_indent,
    })
}

fn def_re(name: &str) -> Regex {
    Regex::new(&format!(
        r"^(\s*)(?:async\s+)?def\s+{}\s*\(",
        regex::escape(name)
    ))
    .expect("valid signature pattern")
}

fn class_re(name: &str) -> Regex {
    Regex::new(&format!(r"^(\s*)class\s+{}\s*[:(]", regex::escape(name)))
        .expect("valid signature pattern")
}

/// First line at or after `from` matching `pattern`. With `inside_indent`
/// set, the search is confined to the block indented past that level and
/// stops at the first line that dedents out of it.
fn find_def_line(
    lines: &[&str],
    from: usize,
    inside_indent: Option<usize>,
    pattern: &Regex,
) -> Option<(usize, usize)> {
    for (offset, line) in lines[from..].iter().enumerate() {
        if let Some(block_indent) = inside_indent {
            let trimmed = line.trim_start();
            if !trimmed.is_empty() && indent_of(line) <= block_indent {
                return None;
            }
        }
        if let Some(captures) = pattern.captures(line) {
            let indent = captures.get(1).map(|m| m.as_str().len()).unwrap_or(0);
            return Some((from + offset, indent));
        }
    }
    None
}

/// Walk from the signature line to the colon that ends it, skipping over
/// nested parens/brackets/braces, string literals, and comments. Returns
/// `None` when the scan runs off the end of the file or when statements
/// follow the colon on the same line (a one-line body the inserter does not
/// handle).
fn scan_to_colon(lines: &[&str], start_line: usize) -> Option<usize> {
    let mut depth: i32 = 0;

    for (offset, line) in lines[start_line..].iter().enumerate() {
        let mut chars = line.char_indices().peekable();
        let mut in_string: Option<char> = None;

        while let Some((idx, c)) = chars.next() {
            if let Some(quote) = in_string {
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    in_string = None;
                }
                continue;
            }
            match c {
                '\'' | '"' => in_string = Some(c),
                '#' => break,
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ':' if depth == 0 => {
                    let rest = line[idx + 1..].trim();
                    if !rest.is_empty() && !rest.starts_with('#') {
                        return None;
                    }
                    return Some(start_line + offset);
                }
                _ => {}
            }
        }
    }
    None
}

/// Indentation of the first statement after the signature; falls back to
/// one level past the `def` when the body is missing or malformed.
fn body_indent(lines: &[&str], sig: &Signature) -> usize {
    for line in lines.iter().skip(sig.colon_line + 1) {
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        if indent > sig.def_indent {
            return indent;
        }
        break;
    }
    sig.def_indent + 4
}

/// Span (start line, end line inclusive) of a docstring sitting as the first
/// statement after the signature, if there is one.
fn existing_docstring_span(lines: &[&str], sig: &Signature) -> Option<(usize, usize)> {
    let mut start = None;
    for (offset, line) in lines.iter().enumerate().skip(sig.colon_line + 1) {
        if line.trim().is_empty() {
            continue;
        }
        start = Some(offset);
        break;
    }
    let start = start?;

    let trimmed = lines[start]
        .trim_start()
        .trim_start_matches(|c: char| "rubfRUBF".contains(c));
    let delim = if trimmed.starts_with("\"\"\"") {
        "\"\"\""
    } else if trimmed.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    // Single-line docstring: a closing delimiter on the opening line.
    let after_open = &trimmed[delim.len()..];
    if let Some(close) = after_open.find(delim) {
        let rest = after_open[close + delim.len()..].trim();
        if rest.is_empty() || rest.starts_with('#') {
            return Some((start, start));
        }
        return None;
    }

    for (offset, line) in lines.iter().enumerate().skip(start + 1) {
        if let Some(close) = line.find(delim) {
            let rest = line[close + delim.len()..].trim();
            if rest.is_empty() || rest.starts_with('#') {
                return Some((start, offset));
            }
            return None;
        }
    }
    None
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn indent_docstring(docstring: &str, indent: usize) -> Vec<String> {
    let pad = " ".repeat(indent);
    docstring
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect()
}
