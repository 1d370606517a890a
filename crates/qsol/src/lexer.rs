use crate::diagnostics::{Diagnostic, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Symbol,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

/// Multi-character symbols, longest first so the scanner matches greedily.
const SYMBOLS: &[&str] = &[
    "=>", "->", "<=", ">=", "!=", "..", "(", ")", "[", "]", "{", "}", ";", ",", ":", ".", "+",
    "-", "*", "/", "<", ">", "=",
];

pub fn lex(content: &str, file: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();

    let chars: Vec<char> = content.chars().collect();
    let mut index = 0usize;
    let mut line = 1usize;
    let mut col = 1usize;

    while index < chars.len() {
        let ch = chars[index];

        if ch == '\n' {
            index += 1;
            line += 1;
            col = 1;
            continue;
        }

        if ch == ' ' || ch == '\t' || ch == '\r' {
            index += 1;
            col += 1;
            continue;
        }

        // Line comments run to end-of-line.
        if ch == '/' && index + 1 < chars.len() && chars[index + 1] == '/' {
            while index < chars.len() && chars[index] != '\n' {
                index += 1;
                col += 1;
            }
            continue;
        }

        // Block comments may span lines.
        if ch == '/' && index + 1 < chars.len() && chars[index + 1] == '*' {
            let start_line = line;
            let start_col = col;
            let start_offset = index;
            index += 2;
            col += 2;
            let mut closed = false;
            while index < chars.len() {
                if chars[index] == '*' && index + 1 < chars.len() && chars[index + 1] == '/' {
                    index += 2;
                    col += 2;
                    closed = true;
                    break;
                }
                if chars[index] == '\n' {
                    line += 1;
                    col = 1;
                } else {
                    col += 1;
                }
                index += 1;
            }
            if !closed {
                diagnostics.push(Diagnostic::error(
                    "QSOL1001",
                    "unterminated block comment",
                    Span {
                        start_offset,
                        end_offset: index,
                        line: start_line,
                        col: start_col,
                        end_line: line,
                        end_col: col,
                        file: file.to_string(),
                    },
                ));
            }
            continue;
        }

        if ch == '"' {
            let start = index;
            let start_col = col;
            index += 1;
            col += 1;
            let mut value = String::new();
            let mut closed = false;
            while index < chars.len() {
                let c = chars[index];
                if c == '\n' {
                    break;
                }
                if c == '\\' && index + 1 < chars.len() {
                    let esc = chars[index + 1];
                    value.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    index += 2;
                    col += 2;
                    continue;
                }
                if c == '"' {
                    index += 1;
                    col += 1;
                    closed = true;
                    break;
                }
                value.push(c);
                index += 1;
                col += 1;
            }
            let span = Span {
                start_offset: start,
                end_offset: index,
                line,
                col: start_col,
                end_line: line,
                end_col: col,
                file: file.to_string(),
            };
            if !closed {
                diagnostics.push(Diagnostic::error(
                    "QSOL1001",
                    "unterminated string literal",
                    span.clone(),
                ));
            }
            tokens.push(Token {
                kind: TokenKind::Str,
                text: value,
                span,
            });
            continue;
        }

        if ch.is_ascii_digit() {
            let start = index;
            let start_col = col;
            while index < chars.len() && chars[index].is_ascii_digit() {
                index += 1;
                col += 1;
            }
            // A fractional part, but not the `..` of an integer range.
            if index + 1 < chars.len() && chars[index] == '.' && chars[index + 1].is_ascii_digit() {
                index += 1;
                col += 1;
                while index < chars.len() && chars[index].is_ascii_digit() {
                    index += 1;
                    col += 1;
                }
            }
            if index < chars.len() && (chars[index] == 'e' || chars[index] == 'E') {
                let mut probe = index + 1;
                if probe < chars.len() && (chars[probe] == '+' || chars[probe] == '-') {
                    probe += 1;
                }
                if probe < chars.len() && chars[probe].is_ascii_digit() {
                    col += probe - index;
                    index = probe;
                    while index < chars.len() && chars[index].is_ascii_digit() {
                        index += 1;
                        col += 1;
                    }
                }
            }
            let text: String = chars[start..index].iter().collect();
            tokens.push(Token {
                kind: TokenKind::Number,
                text,
                span: Span {
                    start_offset: start,
                    end_offset: index,
                    line,
                    col: start_col,
                    end_line: line,
                    end_col: col,
                    file: file.to_string(),
                },
            });
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = index;
            let start_col = col;
            while index < chars.len() && (chars[index].is_ascii_alphanumeric() || chars[index] == '_')
            {
                index += 1;
                col += 1;
            }
            let text: String = chars[start..index].iter().collect();
            tokens.push(Token {
                kind: TokenKind::Ident,
                text,
                span: Span {
                    start_offset: start,
                    end_offset: index,
                    line,
                    col: start_col,
                    end_line: line,
                    end_col: col,
                    file: file.to_string(),
                },
            });
            continue;
        }

        let rest: String = chars[index..(index + 2).min(chars.len())].iter().collect();
        let matched = SYMBOLS.iter().find(|sym| rest.starts_with(**sym));
        if let Some(sym) = matched {
            let len = sym.chars().count();
            tokens.push(Token {
                kind: TokenKind::Symbol,
                text: (*sym).to_string(),
                span: Span {
                    start_offset: index,
                    end_offset: index + len,
                    line,
                    col,
                    end_line: line,
                    end_col: col + len,
                    file: file.to_string(),
                },
            });
            index += len;
            col += len;
            continue;
        }

        diagnostics.push(Diagnostic::error(
            "QSOL1001",
            format!("unexpected character `{ch}`"),
            Span::point(file, index, line, col),
        ));
        index += 1;
        col += 1;
    }

    (tokens, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_symbols_and_idents() {
        let (tokens, diags) = lex("must x <= 3; // trailing", "t.qsol");
        assert!(diags.is_empty());
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["must", "x", "<=", "3", ";"]);
    }

    #[test]
    fn lexes_int_range_dots() {
        let (tokens, diags) = lex("Int[0..5]", "t.qsol");
        assert!(diags.is_empty());
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Int", "[", "0", "..", "5", "]"]);
    }

    #[test]
    fn reports_unterminated_string() {
        let (_, diags) = lex("\"abc", "t.qsol");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "QSOL1001");
    }

    #[test]
    fn block_comments_span_lines() {
        let (tokens, diags) = lex("/* a\n b */ x", "t.qsol");
        assert!(diags.is_empty());
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "x");
        assert_eq!(tokens[0].span.line, 2);
    }
}
