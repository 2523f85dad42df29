//! Report generation
//!
//! Renders a static HTML gallery over the capture artifacts and, when
//! metadata collection is on, a `metadata.csv` next to it. Reporting is a
//! best-effort tail step: failures are logged and never affect the run's
//! exit status.

use std::path::PathBuf;

use crate::{artifact_filename, OutputFormat, RotatorError, Session};

pub const REPORT_FILENAME: &str = "report.html";
pub const CSV_FILENAME: &str = "metadata.csv";

pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write the HTML gallery and return its path.
    pub fn render_html(
        &self,
        session: &Session,
        format: &OutputFormat,
    ) -> Result<PathBuf, RotatorError> {
        let title = self
            .output_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshots".to_string());

        let mut tiles = String::new();
        for target in &session.successful_domains_order {
            let file = artifact_filename(target, format);
            let link = session
                .domain_urls
                .get(target)
                .cloned()
                .unwrap_or_else(|| format!("http://{target}"));
            let tooltip = session
                .domain_titles
                .get(target)
                .map(String::as_str)
                .unwrap_or(target);
            let label = truncate(target, 24);
            tiles.push_str(&format!(
                r#"            <div>
                <a href="{link}" target="_blank"><img src="{file}" alt="{target}" title="{tooltip}"></a>
                <a class="domain" href="{link}" title="{target}" target="_blank">{label}</a>
            </div>
"#,
                link = escape_html(&link),
                file = escape_html(&file),
                target = escape_html(target),
                tooltip = escape_html(tooltip),
                label = escape_html(&label),
            ));
        }

        let generated = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC");
        let html = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Screenshot Report - {title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 0; background-color: #f4f4f4; }}
        .header {{ position: sticky; top: 0; background-color: #fff; padding: 10px;
                   box-shadow: 0 2px 4px rgba(0, 0, 0, 0.1); text-align: center; }}
        .header small {{ color: #777; }}
        .container {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(150px, 1fr));
                      gap: 10px; padding: 10px; }}
        .container div {{ text-align: center; }}
        .container img {{ width: 100%; max-height: 150px; object-fit: contain;
                          border: 2px solid #ddd; border-radius: 4px; }}
        .container img:hover {{ border-color: #007BFF; }}
        .domain {{ display: block; font-size: 0.85em; color: #333; text-decoration: none;
                   overflow: hidden; text-overflow: ellipsis; white-space: nowrap; }}
        .domain:hover {{ text-decoration: underline; }}
    </style>
</head>
<body>
    <div class="header">
        <h1>Screenshot Report - {title}</h1>
        <small>{count} capture(s), generated {generated}</small>
    </div>
    <div class="container">
{tiles}    </div>
</body>
</html>
"#,
            title = escape_html(&title),
            count = session.successful_domains_order.len(),
        );

        let path = self.output_dir.join(REPORT_FILENAME);
        std::fs::write(&path, html)
            .map_err(|e| RotatorError::ReportFailed(format!("{}: {e}", path.display())))?;
        Ok(path)
    }

    /// Write the metadata CSV and return its path.
    pub fn write_csv(&self, session: &Session) -> Result<PathBuf, RotatorError> {
        let path = self.output_dir.join(CSV_FILENAME);
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| RotatorError::ReportFailed(e.to_string()))?;

        writer
            .write_record(["target", "url", "title", "status_code", "body_excerpt"])
            .map_err(|e| RotatorError::ReportFailed(e.to_string()))?;

        for target in &session.successful_domains_order {
            let status = session
                .domain_status_codes
                .get(target)
                .map(|code| code.to_string())
                .unwrap_or_default();
            writer
                .write_record([
                    target.as_str(),
                    session
                        .domain_urls
                        .get(target)
                        .map(String::as_str)
                        .unwrap_or(""),
                    session
                        .domain_titles
                        .get(target)
                        .map(String::as_str)
                        .unwrap_or(""),
                    status.as_str(),
                    session
                        .domain_body_excerpts
                        .get(target)
                        .map(String::as_str)
                        .unwrap_or(""),
                ])
                .map_err(|e| RotatorError::ReportFailed(e.to_string()))?;
        }

        writer
            .flush()
            .map_err(|e| RotatorError::ReportFailed(e.to_string()))?;
        Ok(path)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
