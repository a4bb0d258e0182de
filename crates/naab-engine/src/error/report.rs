//! Human-readable error reports with source context.

use super::{ErrorKind, NaabError};

/// Render `error` against the program source for terminal display.
///
/// Produces the file/line/column header, the offending source line with a
/// caret, recorded stack frames, and suggestions. `redact` enables the
/// production-mode sanitizer (paths scrubbed in addition to secrets).
pub fn render_report(error: &NaabError, source: &str, file: &str, redact: bool) -> String {
    let mut out = String::new();

    let header = if error.kind == ErrorKind::Throw {
        format!("uncaught throw: {}", error.message)
    } else {
        format!("{}: {}", error.kind.name(), error.message)
    };
    out.push_str(&super::sanitize_message(&header, redact));
    out.push('\n');

    if let Some(span) = error.span {
        out.push_str(&format!("  --> {}:{}:{}\n", file, span.line, span.column));
        if span.line > 0 {
            if let Some(line) = source.lines().nth(span.line as usize - 1) {
                out.push_str(&format!("   | {line}\n"));
                let pad = span.column.max(1) as usize - 1;
                out.push_str(&format!("   | {}^\n", " ".repeat(pad)));
            }
        }
    }

    for frame in &error.frames {
        out.push_str(&format!(
            "  in {} ({}:{})\n",
            frame.function, frame.file, frame.span.line
        ));
    }

    if !error.suggestions.is_empty() {
        out.push_str(&format!(
            "  help: did you mean {}?\n",
            error
                .suggestions
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(" or ")
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    #[test]
    fn test_report_has_caret_and_suggestion() {
        let source = "let total = 1\nprint(totl)\n";
        let mut err = NaabError::name_error("totl", &["total".to_string()]);
        err.span = Some(Span::new(2, 7));
        let report = render_report(&err, source, "main.naab", false);

        assert!(report.contains("NameError"));
        assert!(report.contains("main.naab:2:7"));
        assert!(report.contains("print(totl)"));
        assert!(report.contains("      ^"));
        assert!(report.contains("did you mean 'total'?"));
    }

    #[test]
    fn test_report_lists_frames() {
        let mut err = NaabError::runtime("division by zero");
        err.span = Some(Span::new(1, 1));
        err.push_frame("inner", "main.naab", Span::new(4, 2));
        err.push_frame("<main>", "main.naab", Span::new(9, 1));
        let report = render_report(&err, "1 / 0", "main.naab", false);
        let inner_at = report.find("in inner").unwrap();
        let main_at = report.find("in <main>").unwrap();
        assert!(inner_at < main_at);
    }
}
