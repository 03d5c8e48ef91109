use crate::{
    markdown::{
        frontmatter::is_recognized_key,
        parser::{scan_constructs, InlineConstruct},
        ParsedObservation, ParsedRelation,
    },
    models::Entity,
};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Render an entity back to markdown.
///
/// The output is frontmatter carrying the recognized keys (plus preserved
/// metadata), followed by `body` with two adjustments that make
/// `parse(render(entity)) == entity` hold:
///
/// - inline observations/relations that are NOT in the given store sets are
///   removed from the body, and
/// - store observations/relations that do NOT already appear inline are
///   appended as bullet lines.
pub fn render_entity(
    entity: &Entity,
    observations: &[ParsedObservation],
    relations: &[ParsedRelation],
    body: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    let _ = writeln!(out, "title: {}", yaml_scalar(&entity.title));
    let _ = writeln!(out, "type: {}", yaml_scalar(&entity.entity_type));
    let _ = writeln!(out, "permalink: {}", yaml_scalar(&entity.permalink));
    let _ = writeln!(out, "created: {}", entity.created_at.to_rfc3339());
    let _ = writeln!(out, "modified: {}", entity.updated_at.to_rfc3339());
    for (key, value) in &entity.metadata {
        if !is_recognized_key(key) || key.as_str() == "tags" {
            let _ = writeln!(out, "{key}: {}", yaml_scalar(value));
        }
    }
    out.push_str("---\n");

    // Rewrite the body: keep prose, drop constructs the store no longer has,
    // remember which store items are already present inline.
    let mut inline_obs: Vec<&ParsedObservation> = Vec::new();
    let mut inline_rels: Vec<&ParsedRelation> = Vec::new();
    let mut dropped_lines: BTreeSet<usize> = BTreeSet::new();

    let body = body.unwrap_or("");
    for (line, scanned) in scan_constructs(body) {
        match scanned {
            Ok(InlineConstruct::Observation(obs)) => {
                if let Some(found) = observations.iter().find(|o| **o == obs) {
                    inline_obs.push(found);
                } else {
                    dropped_lines.insert(line);
                }
            }
            Ok(InlineConstruct::Relation(rel)) => {
                if let Some(found) = relations.iter().find(|r| **r == rel) {
                    inline_rels.push(found);
                } else {
                    dropped_lines.insert(line);
                }
            }
            // Malformed lines are left alone; they are prose as far as the
            // store is concerned.
            Err(_) => {}
        }
    }

    let mut kept_body = String::new();
    for (idx, line) in body.lines().enumerate() {
        if dropped_lines.contains(&(idx + 1)) {
            continue;
        }
        kept_body.push_str(line);
        kept_body.push('\n');
    }
    if body.is_empty() {
        kept_body.push('\n');
    }
    out.push_str(&kept_body);

    let missing_obs: Vec<&ParsedObservation> = observations
        .iter()
        .filter(|o| !inline_obs.iter().any(|i| i == o))
        .collect();
    let missing_rels: Vec<&ParsedRelation> = relations
        .iter()
        .filter(|r| !inline_rels.iter().any(|i| i == r))
        .collect();

    if !missing_obs.is_empty() || !missing_rels.is_empty() {
        if !out.ends_with("\n\n") {
            out.push('\n');
        }
        for obs in missing_obs {
            out.push_str(&observation_line(obs));
            out.push('\n');
        }
        for rel in missing_rels {
            out.push_str(&relation_line(rel));
            out.push('\n');
        }
    }

    out
}

/// `- [category] content #tag1 #tag2 (context)`
pub fn observation_line(obs: &ParsedObservation) -> String {
    let mut line = format!("- [{}] {}", obs.category, obs.content);
    for tag in &obs.tags {
        let _ = write!(line, " #{tag}");
    }
    if let Some(ctx) = &obs.context {
        let _ = write!(line, " ({ctx})");
    }
    line
}

/// `- relation_type [[target]] (context)`
pub fn relation_line(rel: &ParsedRelation) -> String {
    let mut line = format!("- {} [[{}]]", rel.relation_type, rel.target);
    if let Some(ctx) = &rel.context {
        let _ = write!(line, " ({ctx})");
    }
    line
}

/// Quote a scalar when plain YAML would reinterpret it.
fn yaml_scalar(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.contains(':')
        || value.contains('#')
        || value.contains('\'')
        || value.contains('"')
        || value.starts_with(['[', '{', '*', '&', '!', '|', '>', '%', '@', '-', '?']);
    if needs_quoting {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse_content;
    use crate::models::ObservationCategory;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn entity() -> Entity {
        Entity {
            id: 1,
            permalink: "design/auth-service".to_string(),
            file_path: "design/auth-service.md".to_string(),
            title: "Auth Service".to_string(),
            entity_type: "design".to_string(),
            content_type: "text/markdown".to_string(),
            checksum: Some("abc".to_string()),
            metadata: BTreeMap::from([("status".to_string(), "draft".to_string())]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn obs(content: &str) -> ParsedObservation {
        ParsedObservation {
            category: ObservationCategory::Design,
            content: content.to_string(),
            tags: vec!["crypto".to_string()],
            context: None,
        }
    }

    fn rel(target: &str) -> ParsedRelation {
        ParsedRelation {
            relation_type: "implements".to_string(),
            target: target.to_string(),
            context: Some("Section 4.1".to_string()),
        }
    }

    #[test]
    fn test_render_appends_missing_constructs() {
        let rendered = render_entity(
            &entity(),
            &[obs("Tokens are opaque")],
            &[rel("OAuth2 Spec")],
            Some("Some prose.\n"),
        );
        assert!(rendered.contains("- [design] Tokens are opaque #crypto"));
        assert!(rendered.contains("- implements [[OAuth2 Spec]] (Section 4.1)"));
        assert!(rendered.contains("Some prose."));
        assert!(rendered.starts_with("---\ntitle: Auth Service\n"));
        assert!(rendered.contains("status: draft"));
    }

    #[test]
    fn test_render_removes_stale_inline_constructs() {
        let body = "Prose.\n\n- [design] Old fact #crypto\n- implements [[Gone]] (Section 4.1)\n";
        let rendered = render_entity(&entity(), &[obs("New fact")], &[], Some(body));
        assert!(!rendered.contains("Old fact"));
        assert!(!rendered.contains("[[Gone]]"));
        assert!(rendered.contains("- [design] New fact #crypto"));
        assert!(rendered.contains("Prose."));
    }

    #[test]
    fn test_render_keeps_inline_constructs_once() {
        let observations = vec![obs("Tokens are opaque")];
        let body = "- [design] Tokens are opaque #crypto\n";
        let rendered = render_entity(&entity(), &observations, &[], Some(body));
        assert_eq!(rendered.matches("Tokens are opaque").count(), 1);
    }

    #[test]
    fn test_round_trip_parse_of_render() {
        let observations = vec![obs("Tokens are opaque")];
        let relations = vec![rel("OAuth2 Spec")];
        let rendered = render_entity(&entity(), &observations, &relations, Some("Prose.\n"));

        let (yaml, body) =
            crate::markdown::frontmatter::split_frontmatter(&rendered).unwrap();
        assert!(yaml.is_some());
        let parsed = parse_content(body);
        assert_eq!(parsed.observations, observations);
        assert_eq!(parsed.relations, relations);
    }
}
