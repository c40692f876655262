//! Host set resolution
//!
//! Turns the user's host input into an ordered, de-duplicated list of
//! targets. Input comes either from the lines of an uploaded hosts file or
//! from a comma-separated range string such as `192.168.1.10-12,db01`.

use std::collections::HashSet;

use multiexec_api::DispatchRequest;

use crate::error::CoreError;

/// Raw host input as supplied with a dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    /// Comma-separated hosts and ranges
    pub range: String,
    /// Lines of a hosts file; when any is non-blank they are used exclusively
    pub file_lines: Vec<String>,
}

impl HostSpec {
    pub fn from_range(range: impl Into<String>) -> Self {
        Self {
            range: range.into(),
            file_lines: Vec::new(),
        }
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            range: String::new(),
            file_lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<&DispatchRequest> for HostSpec {
    fn from(request: &DispatchRequest) -> Self {
        Self {
            range: request.host_range.clone(),
            file_lines: request.hosts_file_lines.clone(),
        }
    }
}

/// Resolve a host spec into the run's target list
///
/// File lines win over the range string. File lines are taken literally;
/// range items are expanded. Order of first appearance is kept and
/// duplicates are dropped.
///
/// # Errors
/// `InvalidSpec` when nothing usable was given, `InvalidRange` when a
/// numeric range is malformed.
pub fn resolve(spec: &HostSpec) -> Result<Vec<String>, CoreError> {
    let file_hosts: Vec<String> = spec
        .file_lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    let hosts = if file_hosts.is_empty() {
        expand_items(spec.range.split(','))?
    } else {
        file_hosts
    };

    if hosts.is_empty() {
        return Err(CoreError::InvalidSpec("no hosts given".to_string()));
    }

    Ok(dedup(hosts))
}

/// Expand free text with comma or newline separated items
///
/// Used to preview what a range string resolves to.
///
/// # Errors
/// Same as [`resolve`].
pub fn expand_ranges(text: &str) -> Result<Vec<String>, CoreError> {
    let hosts = expand_items(text.split([',', '\n']))?;
    if hosts.is_empty() {
        return Err(CoreError::InvalidSpec("no hosts given".to_string()));
    }
    Ok(dedup(hosts))
}

fn expand_items<'a>(items: impl Iterator<Item = &'a str>) -> Result<Vec<String>, CoreError> {
    let mut hosts = Vec::new();
    for item in items.map(str::trim).filter(|item| !item.is_empty()) {
        match expand_range(item)? {
            Some(range) => hosts.extend(range),
            None => hosts.push(item.to_string()),
        }
    }
    Ok(hosts)
}

/// Expand `a.b.c.s-e` or `a.b.c.s-a.b.c.e`
///
/// Returns `None` when the item is not a numeric range at all, so names
/// like `web-01.example.com` pass through untouched.
fn expand_range(item: &str) -> Result<Option<Vec<String>>, CoreError> {
    let Some((start_addr, end)) = item.split_once('-') else {
        return Ok(None);
    };
    let Some((prefix, start)) = start_addr.trim().rsplit_once('.') else {
        return Ok(None);
    };
    if !is_numeric_prefix(prefix) {
        return Ok(None);
    }

    let invalid = |reason: &str| CoreError::InvalidRange {
        range: item.to_string(),
        reason: reason.to_string(),
    };

    let end = end.trim();
    let end = match end.rsplit_once('.') {
        Some((end_prefix, last)) if end_prefix == prefix => last,
        Some(_) => return Err(invalid("start and end differ before the last octet")),
        None => end,
    };

    let start: u16 = start
        .parse()
        .map_err(|_| invalid("start is not a number"))?;
    let end: u16 = end.parse().map_err(|_| invalid("end is not a number"))?;

    if end < start {
        return Err(invalid("end is before start"));
    }
    if end > 255 {
        return Err(invalid("octet above 255"));
    }

    Ok(Some(
        (start..=end).map(|octet| format!("{prefix}.{octet}")).collect(),
    ))
}

fn is_numeric_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

fn dedup(hosts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .into_iter()
        .filter(|host| seen.insert(host.clone()))
        .collect()
}
