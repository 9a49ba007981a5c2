//! Structural completeness check for candidate file content.
//!
//! Backends sometimes stop mid-file or echo markdown around the code. A
//! candidate that fails this check is treated like an unparsable response.
//! The check is lexical only: brackets must balance outside string literals
//! and line comments, and no markdown fence line may remain.

use std::path::Path;

/// Lexical rules for one file type.
#[derive(Debug, Clone, Copy, Default)]
struct Syntax {
    comment: Option<&'static str>,
    /// Track string literals at all. Off for prose and unknown formats.
    quotes: bool,
    triple_quotes: bool,
    multiline_strings: bool,
    /// `'a` is a lifetime unless it forms a char literal.
    lifetimes: bool,
}

impl Syntax {
    fn code(comment: &'static str) -> Self {
        Self {
            comment: Some(comment),
            quotes: true,
            ..Self::default()
        }
    }
}

fn syntax_for(path: &Path) -> Syntax {
    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match ext {
        "py" => Syntax {
            triple_quotes: true,
            ..Syntax::code("#")
        },
        "sh" | "rb" | "toml" | "yaml" | "yml" => Syntax::code("#"),
        "rs" => Syntax {
            multiline_strings: true,
            lifetimes: true,
            ..Syntax::code("//")
        },
        "js" | "ts" | "c" | "h" | "cc" | "cpp" | "go" | "java" | "kt" | "swift" => {
            Syntax::code("//")
        }
        "sql" | "lua" => Syntax::code("--"),
        _ => Syntax::default(),
    }
}

/// Return a description of the first structural problem, or `None` if `content` looks complete.
pub fn check_completeness(path: &Path, content: &str) -> Option<String> {
    if content.trim().is_empty() {
        return Some("content is empty".to_string());
    }
    if let Some((idx, _)) = content
        .lines()
        .enumerate()
        .find(|(_, line)| line.trim_start().starts_with("```"))
    {
        return Some(format!("markdown fence left at line {}", idx + 1));
    }
    check_brackets(content, syntax_for(path))
}

fn check_brackets(content: &str, syntax: Syntax) -> Option<String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut quote: Option<(char, bool)> = None;
    let mut line = 1usize;
    let mut rest = content;

    while let Some(ch) = rest.chars().next() {
        let mut advance = ch.len_utf8();
        if ch == '\n' {
            line += 1;
        }

        match quote {
            Some((q, triple)) => {
                if ch == '\\' {
                    advance += rest[1..].chars().next().map_or(0, char::len_utf8);
                    if rest[1..].starts_with('\n') {
                        line += 1;
                    }
                } else if triple && rest.starts_with(&String::from(q).repeat(3)) {
                    quote = None;
                    advance = 3;
                } else if !triple && ch == q {
                    quote = None;
                } else if !triple && ch == '\n' && q != '`' && !syntax.multiline_strings {
                    return Some(format!("unterminated string literal at line {}", line - 1));
                }
            }
            None => {
                if let Some(marker) = syntax.comment
                    && rest.starts_with(marker)
                {
                    advance = rest.find('\n').unwrap_or(rest.len());
                } else if ch == '\'' && syntax.lifetimes && !is_char_literal(rest) {
                    // lifetime or label
                } else if syntax.quotes && matches!(ch, '"' | '\'' | '`') {
                    let triple =
                        syntax.triple_quotes && rest.starts_with(&String::from(ch).repeat(3));
                    quote = Some((ch, triple));
                    if triple {
                        advance = 3;
                    }
                } else if matches!(ch, '(' | '[' | '{') {
                    stack.push((ch, line));
                } else if let Some(open) = opener_for(ch) {
                    match stack.pop() {
                        Some((top, _)) if top == open => {}
                        Some((top, top_line)) => {
                            return Some(format!(
                                "`{ch}` at line {line} does not close `{top}` from line {top_line}"
                            ));
                        }
                        None => return Some(format!("unmatched `{ch}` at line {line}")),
                    }
                }
            }
        }
        rest = &rest[advance..];
    }

    if quote.is_some() {
        return Some("unterminated string literal at end of content".to_string());
    }
    stack
        .last()
        .map(|(open, open_line)| format!("`{open}` from line {open_line} is never closed"))
}

/// `rest` starts with `'`; true for `'x'` and escapes such as `'\n'`.
fn is_char_literal(rest: &str) -> bool {
    let mut chars = rest[1..].chars();
    match chars.next() {
        Some('\\') => true,
        Some(_) => chars.next() == Some('\''),
        None => false,
    }
}

fn opener_for(close: char) -> Option<char> {
    match close {
        ')' => Some('('),
        ']' => Some('['),
        '}' => Some('{'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn py(content: &str) -> Option<String> {
        check_completeness(Path::new("calc.py"), content)
    }

    #[test]
    fn complete_python_passes() {
        let content = "def add(a, b):\n    return [a, b][0] + {'k': b}['k']\n";
        assert_eq!(py(content), None);
    }

    #[test]
    fn empty_content_fails() {
        assert_eq!(py("  \n\t"), Some("content is empty".to_string()));
    }

    #[test]
    fn leftover_fence_fails() {
        let problem = py("```python\ndef f():\n    pass\n```\n").expect("fence");
        assert!(problem.contains("line 1"), "{problem}");
    }

    #[test]
    fn truncated_call_fails() {
        let problem = py("def f(x):\n    return g(x,\n").expect("unclosed");
        assert!(problem.contains("never closed"), "{problem}");
    }

    #[test]
    fn mismatched_bracket_fails() {
        let problem = py("x = [1, 2)\n").expect("mismatch");
        assert!(problem.contains("does not close"), "{problem}");
    }

    #[test]
    fn brackets_in_strings_and_comments_are_ignored() {
        let content = "s = \"(\"  # closes later )\nt = '[{'\ndoc = \"\"\"\n  ( multi\n\"\"\"\n";
        assert_eq!(py(content), None);
    }

    #[test]
    fn escaped_quote_stays_inside_string() {
        assert_eq!(py("s = 'it\\'s (fine'\n"), None);
    }

    #[test]
    fn unterminated_single_line_string_fails() {
        let problem = py("s = 'oops\nx = 1\n").expect("unterminated");
        assert!(problem.contains("line 1"), "{problem}");
    }

    #[test]
    fn rust_line_comments_use_double_slash() {
        let content = "fn main() {\n    // stray ) in comment\n    let v = vec![1];\n}\n";
        assert_eq!(check_completeness(Path::new("main.rs"), content), None);
    }

    #[test]
    fn rust_lifetimes_are_not_char_literals() {
        let content = "fn first<'a>(items: &'a [u8]) -> &'a u8 {\n    let c = '(';\n    &items[0]\n}\n";
        assert_eq!(check_completeness(Path::new("lib.rs"), content), None);
    }

    #[test]
    fn rust_strings_may_span_lines() {
        let content = "const HELP: &str = \"usage: (\n  run\";\n";
        assert_eq!(check_completeness(Path::new("lib.rs"), content), None);
    }

    #[test]
    fn unknown_extension_checks_brackets_but_not_quotes() {
        assert!(check_completeness(Path::new("notes.txt"), "(a").is_some());
        assert_eq!(
            check_completeness(Path::new("notes.txt"), "don't (panic)\n"),
            None
        );
    }
}
