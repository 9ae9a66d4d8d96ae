use crate::location::Location;

/// A lowering diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub loc: Location,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, loc: Location) -> Self {
        Self {
            severity: Severity::Error,
            message,
            loc,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String, loc: Location) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            loc,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne.
    ///
    /// Without a known location the report carries no label and points at
    /// the start of `source`.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let range = self.loc.byte_range(source);
        let offset = range.as_ref().map_or(0, |r| r.start);
        let mut report = Report::build(kind, filename, offset).with_message(&self.message);

        if let Some(range) = range {
            report = report.with_label(
                Label::new((filename, range))
                    .with_message(&self.message)
                    .with_color(color),
            );
        }

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        if let Err(err) = report.finish().eprint((filename, Source::from(source))) {
            eprintln!("error: cannot render diagnostic: {}", err);
        }
    }

    /// One-line rendering for output without source text.
    pub fn summary(&self) -> String {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let mut out = if self.loc.is_known() {
            format!("{}: {}: {}", self.loc, level, self.message)
        } else {
            format!("{}: {}", level, self.message)
        };
        for note in &self.notes {
            out.push_str("\n  note: ");
            out.push_str(note);
        }
        if let Some(help) = &self.help {
            out.push_str("\n  help: ");
            out.push_str(help);
        }
        out
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}
