//! Extraction tool output parsing
//!
//! Output is newline-delimited JSON. Each line is parsed on its own; a bad
//! line is logged and skipped so one corrupt record only shrinks the batch.

use crate::error::ExtractError;

use super::models::RawVideo;

/// Result of parsing one batch of tool output
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub videos: Vec<RawVideo>,
    /// Non-fatal per-line failures
    pub warnings: Vec<ExtractError>,
}

/// Parse newline-delimited JSON records
pub fn parse_json_lines(output: &str) -> ParsedBatch {
    let mut batch = ParsedBatch::default();

    for (index, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawVideo>(line) {
            Ok(video) => batch.videos.push(video),
            Err(e) => {
                let warning = ExtractError::Parse {
                    line: index + 1,
                    reason: e.to_string(),
                };
                tracing::warn!("Skipping extraction record: {}", warning);
                batch.warnings.push(warning);
            }
        }
    }

    batch
}

/// Parse output that must contain exactly one JSON record
pub fn parse_single(output: &str) -> Result<RawVideo, ExtractError> {
    let mut batch = parse_json_lines(output);
    if batch.videos.is_empty() {
        return Err(batch.warnings.pop().unwrap_or(ExtractError::EmptyOutput));
    }
    Ok(batch.videos.swap_remove(0))
}

/// Parse `--get-url` output: one bare URL per line
pub fn parse_urls(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_line_is_skipped() {
        let output = [
            r#"{"id":"v1","title":"one"}"#,
            r#"{"id":"v2","title":"two"}"#,
            r#"{"id":"v3","title": broken"#,
            r#"{"id":"v4","title":"four"}"#,
            r#"{"id":"v5","title":"five"}"#,
        ]
        .join("\n");

        let batch = parse_json_lines(&output);

        assert_eq!(batch.videos.len(), 4);
        let ids: Vec<_> = batch.videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["v1", "v2", "v4", "v5"]);
        assert_eq!(batch.warnings.len(), 1);
        assert!(matches!(batch.warnings[0], ExtractError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_record_without_id_is_a_warning() {
        let batch = parse_json_lines("{\"title\":\"no id\"}\n\n{\"id\":\"ok\"}\n");
        assert_eq!(batch.videos.len(), 1);
        assert_eq!(batch.warnings.len(), 1);
    }

    #[test]
    fn test_parse_single_empty() {
        assert!(matches!(parse_single("\n  \n"), Err(ExtractError::EmptyOutput)));
        assert!(matches!(parse_single("garbage"), Err(ExtractError::Parse { .. })));
        assert_eq!(parse_single("{\"id\":\"a\"}").unwrap().id, "a");
    }

    #[test]
    fn test_parse_urls() {
        let urls = parse_urls("https://cdn/v.mp4\nhttps://cdn/a.m4a\nWARNING: something\n");
        assert_eq!(urls, vec!["https://cdn/v.mp4", "https://cdn/a.m4a"]);
    }
}
