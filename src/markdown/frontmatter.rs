use crate::{error::MnemeError, timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Recognized frontmatter keys. Everything else passes through to
/// [`Frontmatter::metadata`] as a stringified value.
const RECOGNIZED_KEYS: &[&str] = &["title", "type", "permalink", "created", "modified", "tags"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub entity_type: Option<String>,
    pub permalink: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    /// Unrecognized keys, preserved verbatim (values stringified).
    pub metadata: BTreeMap<String, String>,
}

/// Split a document into its frontmatter block and body.
///
/// The block is a leading `---` line followed by YAML and a closing `---`
/// line. Returns `(None, content)` when there is no block, and an error when
/// an opening delimiter is never closed.
pub fn split_frontmatter(content: &str) -> Result<(Option<&str>, &str), MnemeError> {
    let mut lines = content.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok((None, content));
    };
    if first.trim_end() != "---" {
        return Ok((None, content));
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == "---" {
            let yaml = &content[yaml_start..offset];
            let body = &content[offset + line.len()..];
            return Ok((Some(yaml), body));
        }
        offset += line.len();
    }
    Err(MnemeError::Parse(
        "frontmatter block opened with '---' but never closed".to_string(),
    ))
}

/// Parse the YAML inside a frontmatter block.
pub fn parse_frontmatter(yaml: &str) -> Result<Frontmatter, MnemeError> {
    let value: Value = serde_yaml::from_str(yaml)?;
    let Value::Mapping(mapping) = value else {
        // An empty block parses to Null; anything else non-mapping is noise.
        if matches!(value, Value::Null) {
            return Ok(Frontmatter::default());
        }
        return Err(MnemeError::Parse(
            "frontmatter is not a key/value mapping".to_string(),
        ));
    };

    let mut fm = Frontmatter::default();
    for (key, val) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            continue;
        };
        match key.as_str() {
            "title" => fm.title = non_empty(value_to_string(&val)),
            "type" => fm.entity_type = non_empty(value_to_string(&val)),
            "permalink" => fm.permalink = non_empty(value_to_string(&val)),
            "created" => fm.created = parse_date_value(&val),
            "modified" => fm.modified = parse_date_value(&val),
            "tags" => fm.tags = parse_tags(&val),
            _ => {
                fm.metadata.insert(key, value_to_string(&val));
            }
        }
    }
    Ok(fm)
}

/// Tags accept either a comma-separated string or a YAML sequence. Values are
/// trimmed and empties dropped.
pub fn parse_tags(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Sequence(seq) => seq
            .iter()
            .map(|v| value_to_string(v).trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_date_value(value: &Value) -> Option<DateTime<Utc>> {
    timeframe::parse_date(value_to_string(value).trim())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// True iff this key is one the parser models directly.
pub fn is_recognized_key(key: &str) -> bool {
    RECOGNIZED_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_no_frontmatter() {
        let (yaml, body) = split_frontmatter("# Title\n\nprose\n").unwrap();
        assert!(yaml.is_none());
        assert_eq!(body, "# Title\n\nprose\n");
    }

    #[test]
    fn test_split_with_frontmatter() {
        let content = "---\ntitle: Auth\n---\n\nBody here.\n";
        let (yaml, body) = split_frontmatter(content).unwrap();
        assert_eq!(yaml.unwrap(), "title: Auth\n");
        assert_eq!(body, "\nBody here.\n");
    }

    #[test]
    fn test_split_unclosed_is_error() {
        let content = "---\ntitle: Auth\n\nBody here.\n";
        assert!(split_frontmatter(content).is_err());
    }

    #[test]
    fn test_parse_recognized_and_passthrough() {
        let fm = parse_frontmatter(
            "title: Auth Service\ntype: design\npermalink: design/auth-service\nstatus: draft\npriority: 3\n",
        )
        .unwrap();
        assert_eq!(fm.title.as_deref(), Some("Auth Service"));
        assert_eq!(fm.entity_type.as_deref(), Some("design"));
        assert_eq!(fm.permalink.as_deref(), Some("design/auth-service"));
        assert_eq!(fm.metadata.get("status").map(String::as_str), Some("draft"));
        assert_eq!(fm.metadata.get("priority").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_tags_comma_string_and_sequence() {
        let fm = parse_frontmatter("tags: security, rfc, , auth\n").unwrap();
        assert_eq!(fm.tags, vec!["security", "rfc", "auth"]);

        let fm = parse_frontmatter("tags: [security, rfc]\n").unwrap();
        assert_eq!(fm.tags, vec!["security", "rfc"]);
    }

    #[test]
    fn test_dates_flexible() {
        let fm = parse_frontmatter("created: 2024-01-15\nmodified: yesterday\n").unwrap();
        assert!(fm.created.is_some());
        assert!(fm.modified.is_some());
    }
}
