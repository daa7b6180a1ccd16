use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

fn issue_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9_]*-[1-9][0-9]*$").expect("valid issue key regex"))
}

/// Check if a string looks like a tracker issue key (`PROJ-123`).
pub fn is_issue_key(s: &str) -> bool {
    issue_key_regex().is_match(s)
}

/// Extract the issue key from a tracker URL.
///
/// Supported URL patterns:
/// - `https://<site>/browse/<KEY>`
/// - `https://<site>/jira/software/projects/<P>/boards/<n>?selectedIssue=<KEY>`
/// - `https://<site>/...?...&selectedIssue=<KEY>` on any path
pub fn parse_issue_url(input: &str) -> Result<String> {
    let url = url::Url::parse(input).map_err(|e| Error::IssueRef(format!("{input}: {e}")))?;

    if let Some((_, key)) = url.query_pairs().find(|(k, _)| k == "selectedIssue") {
        let key = key.to_uppercase();
        if is_issue_key(&key) {
            return Ok(key);
        }
        return Err(Error::IssueRef(format!("malformed selectedIssue in URL: {input}")));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.iter().position(|s| *s == "browse") {
        Some(i) => {
            let key = segments
                .get(i + 1)
                .map(|s| s.to_uppercase())
                .filter(|s| is_issue_key(s))
                .ok_or_else(|| Error::IssueRef(format!("missing issue key in URL: {input}")))?;
            Ok(key)
        }
        None => Err(Error::IssueRef(format!("could not find an issue in URL: {input}"))),
    }
}

/// Resolve either a bare issue key or a tracker URL to a normalized key.
pub fn resolve_issue_key(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return parse_issue_url(trimmed);
    }
    let key = trimmed.to_uppercase();
    if is_issue_key(&key) {
        Ok(key)
    } else {
        Err(Error::IssueRef(format!("not an issue key: {input}")))
    }
}

/// Browse URL for an issue on the given site.
pub fn issue_browse_url(base_url: &str, issue_key: &str) -> String {
    format!("{}/browse/{issue_key}", base_url.trim_end_matches('/'))
}
