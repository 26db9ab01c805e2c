//! Report rendering: ordered [`ReportEntry`] list → one self-contained HTML page.
//!
//! Images are embedded as `data:` URIs straight from the base64 payload
//! (no re-decoding), so the report is a single file that can be mailed or
//! archived. Every string that came from outside the program (filenames,
//! subject ids, model output, error text) is HTML-escaped before it is
//! written; the analysis keeps its line breaks through `white-space: pre-wrap`.

use crate::config::DEFAULT_REPORT_TITLE;
use crate::error::ReportError;
use crate::output::ReportEntry;
use crate::pipeline::encode::PAYLOAD_MIME_TYPE;
use crate::prompts::REPORT_DISCLAIMER;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use tracing::debug;

/// Page-level settings for [`compose`].
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub title: String,
    pub generated_at: DateTime<Local>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            title: DEFAULT_REPORT_TITLE.to_string(),
            generated_at: Local::now(),
        }
    }
}

const STYLE: &str = r#"        body { font-family: Arial, sans-serif; max-width: 1200px; margin: 0 auto; padding: 20px; background: #f5f5f5; }
        .header { text-align: center; background: linear-gradient(135deg, #667eea, #764ba2); color: white; padding: 30px; border-radius: 10px; margin-bottom: 30px; }
        .card { background: white; border-radius: 10px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); margin-bottom: 30px; overflow: hidden; }
        .card-header { background: #4a5568; color: white; padding: 15px 20px; }
        .card-content { display: flex; flex-wrap: wrap; }
        .image-section { flex: 1; min-width: 300px; padding: 20px; background: #1a1a2e; text-align: center; color: #cbd5e0; }
        .image-section img { max-width: 100%; max-height: 500px; border-radius: 5px; }
        .analysis-section { flex: 1; min-width: 300px; padding: 20px; white-space: pre-wrap; font-family: inherit; margin: 0; }
        .analysis-section.unavailable { color: #9b2c2c; background: #fff5f5; }
        .disclaimer { background: #fff3cd; border: 1px solid #ffc107; border-radius: 10px; padding: 20px; margin-top: 30px; }
"#;

/// Render the report.
///
/// Cards appear in the order of `entries`; the count in the banner is
/// `entries.len()`. An empty slice yields a valid page with no cards.
pub fn compose(entries: &[ReportEntry], options: &ReportOptions) -> Result<String, ReportError> {
    let mut html = String::with_capacity(4096 + entries.len() * 1024);
    write_document(&mut html, entries, options)
        .map_err(|e| ReportError::Render(format!("formatting failed: {e}")))?;
    debug!("Rendered report: {} cards, {} bytes", entries.len(), html.len());
    Ok(html)
}

fn write_document(
    out: &mut String,
    entries: &[ReportEntry],
    options: &ReportOptions,
) -> std::fmt::Result {
    let title = escape_html(&options.title);

    write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n    <meta charset=\"UTF-8\">\n    <title>{title}</title>\n    <style>\n{STYLE}    </style>\n</head>\n<body>\n"
    )?;
    write!(
        out,
        "    <div class=\"header\">\n        <h1>{title}</h1>\n        <p>Generated: {}</p>\n        <p>Total Images: {}</p>\n    </div>\n",
        options.generated_at.format("%Y-%m-%d %H:%M"),
        entries.len()
    )?;

    for (i, entry) in entries.iter().enumerate() {
        write_card(out, i + 1, entry)?;
    }

    write!(
        out,
        "\n    <div class=\"disclaimer\">\n        <h3>Disclaimer</h3>\n        <p>{}</p>\n    </div>\n</body>\n</html>\n",
        escape_html(REPORT_DISCLAIMER)
    )
}

fn write_card(out: &mut String, number: usize, entry: &ReportEntry) -> std::fmt::Result {
    let filename = escape_html(entry.filename());

    write!(
        out,
        "\n    <div class=\"card\">\n        <div class=\"card-header\"><h2>Image {number}: {filename}</h2><small>Patient: {}</small></div>\n        <div class=\"card-content\">\n",
        escape_html(entry.subject_id())
    )?;

    match entry.encoded_image() {
        Some(b64) => write!(
            out,
            "            <div class=\"image-section\"><img src=\"data:{PAYLOAD_MIME_TYPE};base64,{}\" alt=\"{filename}\"></div>\n",
            escape_html(b64)
        )?,
        None => out.push_str("            <div class=\"image-section\"><p>image unavailable</p></div>\n"),
    }

    match entry {
        ReportEntry::Analysed(record) => write!(
            out,
            "            <pre class=\"analysis-section\">{}</pre>\n",
            escape_html(&record.analysis_text)
        )?,
        ReportEntry::Unavailable { reason, .. } => write!(
            out,
            "            <pre class=\"analysis-section unavailable\">analysis unavailable: {}</pre>\n",
            escape_html(&reason.to_string())
        )?,
    }

    out.push_str("        </div>\n    </div>\n");
    Ok(())
}

/// Escape the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
