use crate::{
    error::MnemeError,
    markdown::{
        frontmatter::{parse_frontmatter, split_frontmatter, Frontmatter},
        EntityMarkdown, ParseIssue, ParsedObservation, ParsedRelation,
    },
    models::ObservationCategory,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use pulldown_cmark::{Event as MdEvent, Options, Parser as MdParser, Tag as MdTag};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Markdown options for knowledge files. Extensions are enabled explicitly
/// instead of `Options::all()` for reproduceability.
pub fn mneme_md_options() -> Options {
    let mut md_options = Options::empty();
    md_options.insert(Options::ENABLE_FOOTNOTES);
    md_options.insert(Options::ENABLE_STRIKETHROUGH);
    md_options.insert(Options::ENABLE_TABLES);
    md_options.insert(Options::ENABLE_TASKLISTS);
    md_options
}

/// `- <relation_type> [[<target>]] (<optional context>)`
static RELATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<rtype>[^\[]+?)\s*\[\[(?P<target>[^\[\]]+)\]\]\s*(?:\((?P<ctx>.*)\))?\s*$")
        .expect("static regex")
});

/// Leading `[<category>]` marker of an observation.
static CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(?P<cat>[^\]]*)\]\s*(?P<rest>.*)$").expect("static regex"));

/// Trailing `(<context>)` group of an observation.
static CONTEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<rest>.*?)\s*\((?P<ctx>[^()]*)\)\s*$").expect("static regex"));

/// One trailing `#tag` token.
static TRAILING_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<rest>.*\S)\s+#(?P<tag>[^\s#]+)\s*$").expect("static regex"));

/// An inline construct extracted from one list-item line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InlineConstruct {
    Observation(ParsedObservation),
    Relation(ParsedRelation),
}

/// Observations and relations extracted from a markdown body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedContent {
    pub observations: Vec<ParsedObservation>,
    pub relations: Vec<ParsedRelation>,
    pub issues: Vec<ParseIssue>,
}

/// Walk the body as markdown and scan every list item's first source line
/// for an inline construct. Returns `(line_number, construct-or-error)`
/// pairs in document order.
pub(crate) fn scan_constructs(body: &str) -> Vec<(usize, Result<InlineConstruct, String>)> {
    let mut out = Vec::new();
    let parser = MdParser::new_ext(body, mneme_md_options());
    for (event, range) in parser.into_offset_iter() {
        let MdEvent::Start(MdTag::Item) = event else {
            continue;
        };
        let slice = &body[range.clone()];
        let Some(first_line) = slice.lines().next() else {
            continue;
        };
        let trimmed = first_line.trim_start();
        // Constructs only live on dash bullets; other list markers are prose.
        let Some(text) = trimmed.strip_prefix("- ").or_else(|| {
            (trimmed == "-").then_some("")
        }) else {
            continue;
        };
        let line_no = body[..range.start].matches('\n').count() + 1;
        if let Some(scanned) = scan_item_text(text.trim()) {
            out.push((line_no, scanned));
        }
    }
    out
}

/// Parse markdown content into its observations and relations. Line-scoped
/// errors are collected as issues; everything else still parses.
pub fn parse_content(body: &str) -> ParsedContent {
    let mut parsed = ParsedContent::default();
    for (line, scanned) in scan_constructs(body) {
        match scanned {
            Ok(InlineConstruct::Observation(obs)) => parsed.observations.push(obs),
            Ok(InlineConstruct::Relation(rel)) => parsed.relations.push(rel),
            Err(message) => parsed.issues.push(ParseIssue { line, message }),
        }
    }
    parsed
}

/// Scan the text of one dash bullet (marker already stripped). Returns None
/// for empty bullets, an error string for malformed relation syntax, and a
/// construct otherwise.
fn scan_item_text(text: &str) -> Option<Result<InlineConstruct, String>> {
    if text.is_empty() {
        return None;
    }

    if text.contains("[[") || text.contains("]]") {
        return Some(scan_relation(text).map(InlineConstruct::Relation));
    }

    scan_observation(text).map(|obs| Ok(InlineConstruct::Observation(obs)))
}

fn scan_relation(text: &str) -> Result<ParsedRelation, String> {
    if !text.contains("[[") {
        return Err("relation missing [[".to_string());
    }
    if !text.contains("]]") {
        return Err("relation missing ]]".to_string());
    }
    let caps = RELATION_RE
        .captures(text)
        .ok_or_else(|| "malformed relation".to_string())?;
    let relation_type = caps["rtype"].trim().to_string();
    if relation_type.is_empty() {
        return Err("relation missing type before [[..]]".to_string());
    }
    let target = caps["target"].trim().to_string();
    if target.is_empty() {
        return Err("relation target is empty".to_string());
    }
    let context = caps
        .name("ctx")
        .map(|m| m.as_str().trim().to_string())
        .filter(|c| !c.is_empty());
    Ok(ParsedRelation {
        relation_type,
        target,
        context,
    })
}

fn scan_observation(text: &str) -> Option<ParsedObservation> {
    let (category, rest) = match CATEGORY_RE.captures(text) {
        Some(caps) => (
            ObservationCategory::from_marker(&caps["cat"]),
            caps["rest"].to_string(),
        ),
        None => (ObservationCategory::Note, text.to_string()),
    };

    let (rest, context) = match CONTEXT_RE.captures(&rest) {
        Some(caps) => (
            caps["rest"].to_string(),
            Some(caps["ctx"].trim().to_string()).filter(|c| !c.is_empty()),
        ),
        None => (rest, None),
    };

    let mut content = rest.trim().to_string();
    let mut tags = Vec::new();
    while let Some(caps) = TRAILING_TAG_RE.captures(&content) {
        tags.push(caps["tag"].to_string());
        content = caps["rest"].trim().to_string();
    }
    tags.reverse();

    if content.is_empty() {
        return None;
    }
    Some(ParsedObservation {
        category,
        content,
        tags,
        context,
    })
}

/// Parser for markdown files rooted at a repository directory.
#[derive(Debug, Clone)]
pub struct EntityParser {
    root: PathBuf,
}

impl EntityParser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        EntityParser { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse the repo-relative `file_path` into an [`EntityMarkdown`].
    ///
    /// Frontmatter defaults: missing title → file stem, missing type →
    /// `note`, missing dates → filesystem ctime/mtime. A broken frontmatter
    /// block is recorded as an issue and the whole file is treated as body.
    pub async fn parse_file(&self, file_path: &str) -> Result<EntityMarkdown, MnemeError> {
        let absolute = self.root.join(file_path);
        let content = tokio::fs::read_to_string(&absolute).await.map_err(|e| {
            MnemeError::Io(format!("failed to read {file_path}: {e}"))
        })?;
        let meta = tokio::fs::metadata(&absolute).await?;

        let mut issues = Vec::new();
        let (mut fm, body) = match split_frontmatter(&content) {
            Ok((Some(yaml), body)) => match parse_frontmatter(yaml) {
                Ok(fm) => (fm, body.to_string()),
                Err(e) => {
                    issues.push(ParseIssue {
                        line: 1,
                        message: e.to_string(),
                    });
                    (Frontmatter::default(), body.to_string())
                }
            },
            Ok((None, body)) => (Frontmatter::default(), body.to_string()),
            Err(e) => {
                issues.push(ParseIssue {
                    line: 1,
                    message: e.to_string(),
                });
                (Frontmatter::default(), content.clone())
            }
        };

        if fm.title.is_none() {
            fm.title = Path::new(file_path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string());
        }
        if fm.entity_type.is_none() {
            fm.entity_type = Some("note".to_string());
        }
        let fs_modified: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::<Utc>::from);
        let fs_created: Option<DateTime<Utc>> = meta
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .or(fs_modified);
        if fm.created.is_none() {
            fm.created = fs_created;
        }
        if fm.modified.is_none() {
            fm.modified = fs_modified;
        }

        let mut parsed = parse_content(&body);
        issues.append(&mut parsed.issues);

        Ok(EntityMarkdown {
            frontmatter: fm,
            body,
            observations: parsed.observations,
            relations: parsed.relations,
            issues,
        })
    }
}
