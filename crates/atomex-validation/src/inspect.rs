//! Lightweight, language-aware inspection of generated source text
//!
//! These are heuristics over text, not parsers: generated atoms are small
//! single-method units and the checks only need definitions, signatures,
//! imports and delimiter balance.

use atomex_core::Language;
use once_cell::sync::Lazy;
use regex::Regex;

static PY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("valid regex"));
static RS_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)")
        .expect("valid regex")
});
static JS_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)|^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
    )
    .expect("valid regex")
});
static GO_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*[\[(]").expect("valid regex")
});

static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:from\s+([\w.]+)\s+import\b|import\s+([\w., ]+))").expect("valid regex"));
static RS_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub\s+)?use\s+(?:::)?([A-Za-z_]\w*)").expect("valid regex"));
static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^\s*import\b[^'"]*['"]([^'"]+)['"])|(?:\brequire\(\s*['"]([^'"]+)['"]\s*\))"#)
        .expect("valid regex")
});
static GO_IMPORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*(?:import\s+)?(?:[\w.]+\s+)?"([^"]+)"\s*$"#).expect("valid regex"));

static DOUBLE_QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""(?:\\.|[^"\\])*""#).expect("valid regex"));
static SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"'(?:\\.|[^'\\\n])*'").expect("valid regex"));
static BACKTICK: Lazy<Regex> = Lazy::new(|| Regex::new(r"`(?:\\.|[^`\\])*`").expect("valid regex"));

/// A function or method definition found in source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    /// Defined name
    pub name: String,
    /// 0-based line of the definition keyword
    pub line: usize,
}

/// Whether a line is blank or a pure comment
#[must_use]
pub fn is_noise_line(line: &str, language: Language) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.starts_with(language.comment_prefix()) {
        return true;
    }
    !language.indentation_blocks()
        && (trimmed.starts_with("/*") || trimmed.starts_with("*/") || trimmed.starts_with('*'))
}

/// Non-blank, non-comment line count
#[must_use]
pub fn count_loc(code: &str, language: Language) -> u32 {
    let n = code.lines().filter(|l| !is_noise_line(l, language)).count();
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Blank out string literals so their contents cannot confuse later scans
#[must_use]
pub fn strip_strings(code: &str, language: Language) -> String {
    let blank = |caps: &regex::Captures<'_>| {
        let text = &caps[0];
        let mut out = String::with_capacity(text.len());
        out.push(text.chars().next().unwrap_or('"'));
        out.extend(text.chars().skip(1).take(text.chars().count().saturating_sub(2)).map(|c| {
            if c == '\n' {
                '\n'
            } else {
                ' '
            }
        }));
        out.push(text.chars().last().unwrap_or('"'));
        out
    };
    let mut stripped = DOUBLE_QUOTED.replace_all(code, blank).into_owned();
    // Rust uses `'` for lifetimes and chars; skipping it avoids false literals
    if language != Language::Rust {
        stripped = SINGLE_QUOTED.replace_all(&stripped, blank).into_owned();
    }
    if matches!(language, Language::TypeScript | Language::JavaScript | Language::Go) {
        stripped = BACKTICK.replace_all(&stripped, blank).into_owned();
    }
    stripped
}

/// Drop the trailing line comment, if any
#[must_use]
pub fn strip_line_comment(line: &str, language: Language) -> &str {
    line.find(language.comment_prefix()).map_or(line, |at| &line[..at])
}

/// Function definitions, in source order
#[must_use]
pub fn definitions(code: &str, language: Language) -> Vec<Definition> {
    code.lines()
        .enumerate()
        .filter_map(|(line, text)| {
            let caps = match language {
                Language::Python => PY_DEF.captures(text),
                Language::Rust => RS_FN.captures(text),
                Language::TypeScript | Language::JavaScript => JS_FN.captures(text),
                Language::Go => GO_FUNC.captures(text),
            }?;
            let name = caps.get(1).or_else(|| caps.get(2))?.as_str().to_string();
            Some(Definition { name, line })
        })
        .collect()
}

/// The primary definition: the one named `preferred`, else the first
#[must_use]
pub fn primary_definition(code: &str, language: Language, preferred: &str) -> Option<Definition> {
    let defs = definitions(code, language);
    defs.iter()
        .find(|d| d.name == preferred)
        .cloned()
        .or_else(|| defs.into_iter().next())
}

/// Signature text from the definition through its closing parameter paren
/// and return annotation, plus the 0-based line where the body opens
#[must_use]
pub fn signature(code: &str, language: Language, definition: &Definition) -> (String, usize) {
    let lines: Vec<&str> = code.lines().collect();
    let mut text = String::new();
    let mut depth = 0i32;
    let mut opened = false;
    for (idx, line) in lines.iter().enumerate().skip(definition.line) {
        let line = strip_line_comment(line, language);
        text.push_str(line);
        text.push('\n');
        for c in line.chars() {
            match c {
                '(' => {
                    depth += 1;
                    opened = true;
                }
                ')' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            let trimmed = line.trim_end();
            let body_opens = if language.indentation_blocks() {
                trimmed.ends_with(':')
            } else {
                trimmed.ends_with('{') || trimmed.ends_with("=>")
            };
            if body_opens {
                return (text, idx);
            }
        }
    }
    (text, definition.line)
}

/// Imported module roots, with 1-based line numbers
#[must_use]
pub fn imports(code: &str, language: Language) -> Vec<(String, usize)> {
    let mut found = Vec::new();
    let mut in_go_block = false;
    for (idx, line) in code.lines().enumerate() {
        let lineno = idx + 1;
        match language {
            Language::Python => {
                if let Some(caps) = PY_IMPORT.captures(line) {
                    if let Some(from) = caps.get(1) {
                        found.push((root_segment(from.as_str(), '.'), lineno));
                    } else if let Some(list) = caps.get(2) {
                        for part in list.as_str().split(',') {
                            let module = part.split_whitespace().next().unwrap_or_default();
                            if !module.is_empty() {
                                found.push((root_segment(module, '.'), lineno));
                            }
                        }
                    }
                }
            }
            Language::Rust => {
                if let Some(caps) = RS_USE.captures(line) {
                    found.push((caps[1].to_string(), lineno));
                }
            }
            Language::TypeScript | Language::JavaScript => {
                if let Some(caps) = JS_IMPORT.captures(line) {
                    if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                        found.push((js_module_name(m.as_str()), lineno));
                    }
                }
            }
            Language::Go => {
                let trimmed = line.trim();
                if trimmed.starts_with("import (") {
                    in_go_block = true;
                    continue;
                }
                if in_go_block && trimmed.starts_with(')') {
                    in_go_block = false;
                    continue;
                }
                if in_go_block || trimmed.starts_with("import ") {
                    if let Some(caps) = GO_IMPORT_LINE.captures(line) {
                        found.push((caps[1].to_string(), lineno));
                    }
                }
            }
        }
    }
    found
}

/// Normalize a declared import to the same form [`imports`] reports
#[must_use]
pub fn normalize_import(import: &str, language: Language) -> String {
    match language {
        Language::Python => root_segment(import, '.'),
        Language::Rust => root_segment(import.trim_start_matches("::"), ':'),
        Language::TypeScript | Language::JavaScript => js_module_name(import),
        Language::Go => import.to_string(),
    }
}

fn root_segment(path: &str, sep: char) -> String {
    path.split(sep).next().unwrap_or(path).trim().to_string()
}

fn js_module_name(spec: &str) -> String {
    if spec.starts_with('.') || spec.starts_with('/') {
        let file = spec.rsplit('/').next().unwrap_or(spec);
        return file.split('.').next().unwrap_or(file).to_string();
    }
    let spec = spec.trim_start_matches("node:");
    if let Some(scoped) = spec.strip_prefix('@') {
        let mut parts = scoped.splitn(3, '/');
        let scope = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        return format!("@{scope}/{name}");
    }
    root_segment(spec, '/')
}

/// Whole-identifier occurrence
#[must_use]
pub fn mentions_identifier(code: &str, ident: &str) -> bool {
    if ident.is_empty() {
        return false;
    }
    let bytes = code.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    code.match_indices(ident).any(|(at, _)| {
        let before = at.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(at + ident.len()).copied();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

/// First unbalanced delimiter, as `(1-based line, description)`
#[must_use]
pub fn unbalanced_delimiter(code: &str, language: Language) -> Option<(usize, String)> {
    let stripped = strip_strings(code, language);
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (idx, line) in stripped.lines().enumerate() {
        let lineno = idx + 1;
        for c in strip_line_comment(line, language).chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, lineno)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, at)) => {
                            return Some((lineno, format!("'{c}' closes '{open}' opened on line {at}")));
                        }
                        None => return Some((lineno, format!("unmatched '{c}'"))),
                    }
                }
                _ => {}
            }
        }
    }
    stack
        .pop()
        .map(|(open, at)| (at, format!("'{open}' is never closed")))
}

/// Leading whitespace of a line
#[must_use]
pub fn indentation(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const PY: &str = "import math\nfrom typing import List\n\ndef area(radius: float) -> float:\n    # circle\n    return math.pi * radius ** 2\n";

    #[test]
    fn loc_skips_blank_and_comment_lines() {
        assert_eq!(count_loc(PY, Language::Python), 4);
        let rs = "/// doc\nfn f() -> u32 {\n    // note\n    1\n}\n";
        assert_eq!(count_loc(rs, Language::Rust), 3);
    }

    #[test]
    fn finds_definitions_per_language() {
        assert_eq!(definitions(PY, Language::Python)[0].name, "area");
        let rs = "pub async fn load(id: u64) -> Result<(), E> {\n}";
        assert_eq!(definitions(rs, Language::Rust)[0].name, "load");
        let ts = "export const total = (items: Item[]): number => {\n};";
        assert_eq!(definitions(ts, Language::TypeScript)[0].name, "total");
        let go = "func (s *Svc) Charge(amount int) error {\n}";
        assert_eq!(definitions(go, Language::Go)[0].name, "Charge");
    }

    #[test]
    fn signature_spans_multiple_lines() {
        let code = "def pay(\n    order,\n    amount,\n) -> bool:\n    return True\n";
        let def = primary_definition(code, Language::Python, "pay").unwrap();
        let (sig, body_line) = signature(code, Language::Python, &def);
        assert!(sig.contains("amount"));
        assert_eq!(body_line, 3);
    }

    #[test]
    fn collects_imports() {
        let roots: Vec<String> = imports(PY, Language::Python).into_iter().map(|(m, _)| m).collect();
        assert_eq!(roots, vec!["math", "typing"]);

        let go = "import (\n    \"fmt\"\n    str \"strings\"\n)\n";
        let roots: Vec<String> = imports(go, Language::Go).into_iter().map(|(m, _)| m).collect();
        assert_eq!(roots, vec!["fmt", "strings"]);

        let ts = "import { a } from './helpers/math.ts';\nconst x = require('lodash/fp');\n";
        let roots: Vec<String> = imports(ts, Language::TypeScript).into_iter().map(|(m, _)| m).collect();
        assert_eq!(roots, vec!["math", "lodash"]);
    }

    #[test]
    fn delimiters_inside_strings_are_ignored() {
        assert!(unbalanced_delimiter("print(\"(\")\n", Language::Python).is_none());
        let (line, _) = unbalanced_delimiter("fn f() {\n    g(\n}\n", Language::Rust).unwrap();
        assert_eq!(line, 3);
        assert!(unbalanced_delimiter("def f(:\n", Language::Python).is_some());
    }

    #[test]
    fn identifier_match_is_whole_word() {
        assert!(mentions_identifier("x = parse(y)", "parse"));
        assert!(!mentions_identifier("x = parser(y)", "parse"));
    }
}
