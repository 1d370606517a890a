use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub start_offset: usize,
    pub end_offset: usize,
    pub line: usize,
    pub col: usize,
    pub end_line: usize,
    pub end_col: usize,
    pub file: String,
}

impl Span {
    pub fn point(file: &str, offset: usize, line: usize, col: usize) -> Self {
        Span {
            start_offset: offset,
            end_offset: offset + 1,
            line,
            col,
            end_line: line,
            end_col: col + 1,
            file: file.to_string(),
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(&self, other: &Span) -> Span {
        Span {
            start_offset: self.start_offset.min(other.start_offset),
            end_offset: self.end_offset.max(other.end_offset),
            line: self.line,
            col: self.col,
            end_line: other.end_line.max(self.end_line),
            end_col: if other.end_line >= self.end_line {
                other.end_col
            } else {
                self.end_col
            },
            file: self.file.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: &str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            span,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    pub fn warning(code: &str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
            span,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Source text indexed by line, used to render excerpts under diagnostics.
pub struct SourceText {
    pub text: String,
    pub file: String,
    line_starts: Vec<usize>,
}

impl SourceText {
    pub fn new(text: impl Into<String>, file: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0usize];
        for (idx, ch) in text.char_indices() {
            if ch == '\n' {
                line_starts.push(idx + 1);
            }
        }
        SourceText {
            text,
            file: file.into(),
            line_starts,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn line_text(&self, line: usize) -> &str {
        if line < 1 || line > self.line_starts.len() {
            return "";
        }
        let start = self.line_starts[line - 1];
        let end = if line == self.line_starts.len() {
            self.text.len()
        } else {
            self.line_starts[line] - 1
        };
        &self.text[start..end]
    }
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

pub fn render_diagnostic(source: Option<&SourceText>, diag: &Diagnostic) -> String {
    let line = diag.span.line.max(1);
    let col = diag.span.col.max(1);
    let mut out = format!(
        "{}[{}]: {}\n  --> {}:{}:{}\n",
        severity_tag(diag.severity),
        diag.code,
        diag.message,
        diag.span.file,
        line,
        col
    );

    match source {
        Some(src) if src.file == diag.span.file => {
            out.push_str("   |\n");
            let excerpt = src.line_text(line);
            let start = col.min(excerpt.chars().count() + 1);
            let end = if diag.span.end_line == line {
                diag.span.end_col.max(start + 1)
            } else {
                excerpt.chars().count() + 1
            };
            let width = (end.min(excerpt.chars().count() + 1)).saturating_sub(start).max(1);
            out.push_str(&format!("{line:>3} | {excerpt}\n"));
            out.push_str(&format!("   | {}{}\n", " ".repeat(start - 1), "^".repeat(width)));
        }
        _ => out.push_str("   = note: source is unavailable for this diagnostic span\n"),
    }

    for note in &diag.notes {
        out.push_str(&format!("   = note: {note}\n"));
    }
    for help in &diag.help {
        out.push_str(&format!("   = help: {help}\n"));
    }
    out.trim_end().to_string()
}

pub fn render_diagnostics(source: Option<&SourceText>, diagnostics: &[Diagnostic]) -> String {
    let mut ordered: Vec<(usize, &Diagnostic)> = diagnostics.iter().enumerate().collect();
    ordered.sort_by(|(ia, a), (ib, b)| {
        (a.span.file.as_str(), a.span.line, a.span.col, *ia)
            .cmp(&(b.span.file.as_str(), b.span.line, b.span.col, *ib))
    });

    let mut out = String::new();
    for (_, diag) in &ordered {
        out.push_str(&render_diagnostic(source, diag));
        out.push_str("\n\n");
    }
    if !diagnostics.is_empty() {
        out.push_str(&render_summary(diagnostics));
    }
    out.trim_end().to_string()
}

pub fn render_summary(diagnostics: &[Diagnostic]) -> String {
    let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let warnings = diagnostics.iter().filter(|d| d.severity == Severity::Warning).count();
    let infos = diagnostics.iter().filter(|d| d.severity == Severity::Info).count();
    if errors > 0 {
        format!("aborting due to {errors} error(s), {warnings} warning(s), {infos} info message(s)")
    } else {
        format!("finished with {errors} error(s), {warnings} warning(s), {infos} info message(s)")
    }
}
