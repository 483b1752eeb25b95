//! Diagnostics for invalid callback declarations.

use std::io::Cursor;

use anyhow::Result;
use ariadne::{Config, Label, Report, ReportKind, Source};
use callflow::GraphError;

/// Render graph errors as text. Output specification syntax errors point at
/// the offending span of the output string.
pub fn graph_errors(errors: &[GraphError]) -> Result<String> {
    let mut text = String::new();
    for error in errors {
        match error {
            GraphError::OutputSyntax { callback, source, errors } => {
                let name = format!("callbacks[{callback}].output");
                let start = errors.first().map(|error| error.span.clone()).unwrap_or(0..0);
                let mut report = Report::build(ReportKind::Error, (name.as_str(), start))
                    .with_config(Config::default().with_color(false))
                    .with_message(format!("cannot parse output `{source}`"));
                for span in errors {
                    report = report.with_label(Label::new((name.as_str(), span.span.clone())).with_message(&span.message));
                }
                let mut bytes = Cursor::new(Vec::new());
                report
                    .finish()
                    .write((name.as_str(), Source::from(source.as_str())), &mut bytes)?;
                text.push_str(&String::from_utf8_lossy(&bytes.into_inner()));
            }
            other => {
                text.push_str(&format!("Error: {other}\n"));
            }
        }
    }
    Ok(text)
}
