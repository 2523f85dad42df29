use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::OutputFormat;

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// File name of the capture artifact for a target.
///
/// One artifact per target, named by the target itself (not the candidate
/// URL that happened to work) so a resumed run can recount artifacts
/// against the target set.
pub fn artifact_filename(target: &str, format: &OutputFormat) -> String {
    let stripped = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))
        .unwrap_or(target);
    format!("{}.{}", sanitize_filename(stripped), format.extension())
}

pub fn artifact_path(output_dir: &Path, target: &str, format: &OutputFormat) -> PathBuf {
    output_dir.join(artifact_filename(target, format))
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}
