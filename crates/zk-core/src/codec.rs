//! Note document codec.
//!
//! A note is stored as markdown with a YAML header, a body, and a trailing
//! links section:
//! ```markdown
//! ---
//! id: 20251016T0930121234560000
//! title: Atomic notes
//! type: permanent
//! tags:
//! - method
//! created: 2025-10-16T09:30:12.123456Z
//! updated: 2025-10-16T09:30:12.123456Z
//! ---
//!
//! # Atomic notes
//!
//! One idea per note.
//!
//! ## Links
//! - extends [[20251016T0930000000000000]] builds on the slip box
//! ```
//!
//! Decoding tolerates hand edits: missing optional fields fall back to
//! defaults and malformed link lines are skipped with a warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::link::{LinkType, NoteLink};
use crate::note::{normalize_tags, normalize_title, Note, NoteType};

const LINKS_HEADING: &str = "## Links";

/// Fallback values for fields a hand-edited document may omit.
#[derive(Debug, Clone, Default)]
pub struct DecodeDefaults {
    /// Used when the header has no `id` (the file store passes the file stem).
    pub id: Option<String>,
    /// Used when the header has no timestamps (the file store passes the mtime).
    pub timestamp: DateTime<Utc>,
}

/// A decoded note plus any non-fatal problems found along the way.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub note: Note,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    note_type: Option<String>,
    #[serde(default, skip_serializing_if = "TagList::is_empty")]
    tags: TagList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated: Option<DateTime<Utc>>,
}

/// Tags may be written as a YAML list or, by hand, as `tags: a, b`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum TagList {
    List(Vec<String>),
    Inline(String),
}

impl Default for TagList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl TagList {
    fn is_empty(&self) -> bool {
        match self {
            Self::List(tags) => tags.is_empty(),
            Self::Inline(s) => s.trim().is_empty(),
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Self::List(tags) => tags,
            Self::Inline(s) => s.split(',').map(str::to_string).collect(),
        }
    }
}

/// Split a document into the raw YAML header and the remaining body.
///
/// # Errors
///
/// Returns [`DecodeError::MissingHeader`] or [`DecodeError::UnterminatedHeader`]
/// when the `---` delimiters are absent.
pub fn split_header(content: &str) -> Result<(&str, &str), DecodeError> {
    let content = content.trim_start_matches('\u{feff}').trim_start();

    let Some(after_first) = content.strip_prefix("---") else {
        return Err(DecodeError::MissingHeader);
    };
    let after_first = after_first.trim_start_matches(['\r', '\n']);

    let (yaml, rest) = if let Some(rest) = after_first.strip_prefix("---") {
        ("", rest)
    } else {
        let close_pos = after_first
            .find("\n---")
            .ok_or(DecodeError::UnterminatedHeader)?;
        (&after_first[..close_pos], &after_first[close_pos + 4..])
    };

    let body = rest.strip_prefix('\r').unwrap_or(rest);
    let body = body.strip_prefix('\n').unwrap_or(body);
    Ok((yaml, body))
}

/// Render a note as a markdown document.
#[must_use]
pub fn encode(note: &Note) -> String {
    let header = Header {
        id: Some(note.id.clone()),
        title: Some(note.title.clone()),
        note_type: Some(note.note_type.as_str().to_string()),
        tags: TagList::List(note.tags.iter().cloned().collect()),
        created: Some(note.created_at),
        updated: Some(note.updated_at),
    };
    // A struct of strings, timestamps and a string list always serializes.
    let yaml = serde_yaml::to_string(&header).unwrap_or_default();

    let content = note.content.trim();
    let mut out = String::with_capacity(yaml.len() + content.len() + 64 * (note.links.len() + 1));
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n\n# ");
    out.push_str(&note.title);
    out.push_str("\n\n");
    if !content.is_empty() {
        out.push_str(content);
        out.push_str("\n\n");
    }
    out.push_str(LINKS_HEADING);
    out.push('\n');
    for link in &note.links {
        out.push_str(&format!("- {} [[{}]]", link.link_type, link.target));
        if let Some(desc) = &link.description {
            out.push(' ');
            out.push_str(desc);
        }
        out.push('\n');
    }
    out
}

/// Decode a document with no fallback id and the Unix epoch as fallback time.
///
/// # Errors
///
/// See [`decode_with`].
pub fn decode(content: &str) -> Result<Decoded, DecodeError> {
    decode_with(content, &DecodeDefaults::default())
}

/// Decode a document, filling omitted fields from `defaults`.
///
/// # Errors
///
/// Returns [`DecodeError`] when the header is missing or unparsable, the
/// note type is unknown, or the id or title cannot be determined.
pub fn decode_with(content: &str, defaults: &DecodeDefaults) -> Result<Decoded, DecodeError> {
    let (yaml, body) = split_header(content)?;

    let header: Header = if yaml.trim().is_empty() {
        Header::default()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| DecodeError::Malformed(e.to_string()))?
    };

    let id = header
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .or_else(|| defaults.id.clone())
        .ok_or(DecodeError::MissingField("id"))?;

    let title = header
        .title
        .as_deref()
        .and_then(normalize_title)
        .ok_or(DecodeError::MissingField("title"))?;

    let note_type = match header.note_type {
        Some(raw) => raw
            .parse::<NoteType>()
            .map_err(|_| DecodeError::InvalidType(raw))?,
        None => NoteType::default(),
    };

    let created_at = header.created.or(header.updated).unwrap_or(defaults.timestamp);
    let updated_at = header.updated.unwrap_or(created_at);

    let (text, links_block) = split_links_section(body);
    let mut warnings = Vec::new();
    let links = links_block
        .map(|block| parse_links(block, &mut warnings))
        .unwrap_or_default();

    let note = Note {
        id,
        content: strip_title_heading(text, &title).trim().to_string(),
        title,
        note_type,
        created_at,
        updated_at,
        tags: normalize_tags(header.tags.into_vec()),
        links,
    };

    Ok(Decoded { note, warnings })
}

/// Split the body at the last `## Links` heading.
fn split_links_section(body: &str) -> (&str, Option<&str>) {
    let mut found = None;
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim_end() == LINKS_HEADING {
            found = Some((offset, offset + line.len()));
        }
        offset += line.len();
    }
    match found {
        Some((start, end)) => (&body[..start], Some(&body[end..])),
        None => (body, None),
    }
}

fn strip_title_heading<'a>(text: &'a str, title: &str) -> &'a str {
    let trimmed = text.trim_start();
    let first_line_end = trimmed.find('\n').unwrap_or(trimmed.len());
    let first = trimmed[..first_line_end].trim_end();
    if first.strip_prefix("# ").map(str::trim) == Some(title) {
        &trimmed[first_line_end..]
    } else {
        text
    }
}

fn parse_links(block: &str, warnings: &mut Vec<String>) -> Vec<NoteLink> {
    let mut links: Vec<NoteLink> = Vec::new();
    for (n, raw) in block.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match parse_link_line(line) {
            Ok(link) => {
                if links
                    .iter()
                    .any(|l| l.target == link.target && l.link_type == link.link_type)
                {
                    warnings.push(format!("links line {}: duplicate link '{line}'", n + 1));
                } else {
                    links.push(link);
                }
            }
            Err(reason) => warnings.push(format!("links line {}: {reason}: '{line}'", n + 1)),
        }
    }
    links
}

/// Parse `- <type> [[<target>]] <description>`.
fn parse_link_line(line: &str) -> Result<NoteLink, String> {
    let rest = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .ok_or_else(|| "expected a '- ' list item".to_string())?;

    let open = rest
        .find("[[")
        .ok_or_else(|| "missing '[[target]]'".to_string())?;
    let close = rest[open..]
        .find("]]")
        .map(|i| open + i)
        .ok_or_else(|| "unterminated '[[target'".to_string())?;

    let type_part = rest[..open].trim();
    let link_type = if type_part.is_empty() {
        LinkType::Reference
    } else {
        type_part.parse::<LinkType>().map_err(|e| e.to_string())?
    };

    let target = rest[open + 2..close].trim();
    if target.is_empty() {
        return Err("empty link target".to_string());
    }

    let description = rest[close + 2..].trim();
    Ok(NoteLink::new(link_type, target)
        .with_description((!description.is_empty()).then(|| description.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn sample_note() -> Note {
        let mut note = Note::new(
            "20250210T0000000000000000".to_string(),
            "Atomic notes",
            "One idea per note.\n\nKeep it small.",
            NoteType::Permanent,
            ["method", "writing"],
            utc(2025, 2, 10),
        )
        .unwrap();
        note.updated_at = utc(2025, 2, 11);
        note.add_link(
            NoteLink::new(LinkType::Extends, "20250101T0000000000000000")
                .with_description(Some("builds on the slip box".to_string())),
        );
        note.add_link(NoteLink::new(LinkType::Related, "20250102T0000000000000000"));
        note
    }

    #[test]
    fn split_header_extracts_yaml_and_body() {
        let content = "---\nid: test\ntitle: T\n---\n\n# T\n";
        let (yaml, body) = split_header(content).unwrap();
        assert!(yaml.contains("id: test"));
        assert!(body.contains("# T"));
    }

    #[test]
    fn split_header_rejects_missing_delimiters() {
        assert_eq!(split_header("id: x\n"), Err(DecodeError::MissingHeader));
        assert_eq!(
            split_header("---\nid: x\ntitle: y\n"),
            Err(DecodeError::UnterminatedHeader)
        );
    }

    #[test]
    fn encode_writes_header_body_and_links() {
        let out = encode(&sample_note());
        assert!(out.starts_with("---\n"));
        assert!(out.contains("type: permanent"));
        assert!(out.contains("# Atomic notes\n\nOne idea per note."));
        assert!(out.contains("## Links\n- extends [[20250101T0000000000000000]] builds on the slip box\n"));
        assert!(out.contains("- related [[20250102T0000000000000000]]\n"));
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let note = sample_note();
        let decoded = decode(&encode(&note)).unwrap();
        assert!(decoded.warnings.is_empty());
        assert_eq!(decoded.note, note);
    }

    #[test]
    fn hand_edited_document_gets_defaults() {
        let content = "---\ntitle: Scratch\ntags: Rust, zettel\n---\nJust a thought.\n";
        let defaults = DecodeDefaults {
            id: Some("scratch".to_string()),
            timestamp: utc(2024, 5, 1),
        };
        let note = decode_with(content, &defaults).unwrap().note;
        assert_eq!(note.id, "scratch");
        assert_eq!(note.note_type, NoteType::Permanent);
        assert_eq!(note.created_at, utc(2024, 5, 1));
        assert_eq!(note.updated_at, utc(2024, 5, 1));
        assert_eq!(note.content, "Just a thought.");
        assert!(note.tags.contains("rust") && note.tags.contains("zettel"));
        assert!(note.links.is_empty());
    }

    #[test]
    fn malformed_link_lines_are_skipped_with_warnings() {
        let content = "---\nid: a\ntitle: A\n---\n\n## Links\n\
            - extends [[b]]\n\
            - cites [[c]]\n\
            - supports [[d\n\
            not a list item\n\
            - [[e]] plain reference\n";
        let decoded = decode(content).unwrap();
        let targets: Vec<&str> = decoded.note.links.iter().map(|l| l.target.as_str()).collect();
        assert_eq!(targets, vec!["b", "e"]);
        assert_eq!(decoded.note.links[1].link_type, LinkType::Reference);
        assert_eq!(decoded.warnings.len(), 3);
    }

    #[test]
    fn unknown_note_type_fails() {
        let content = "---\nid: a\ntitle: A\ntype: memo\n---\nbody\n";
        assert_eq!(
            decode(content).unwrap_err(),
            DecodeError::InvalidType("memo".to_string())
        );
    }

    #[test]
    fn multi_line_header_title_is_folded() {
        let content = "---\nid: a\ntitle: \"Slip\\nbox\"\n---\n\n# Slip box\n\nBody.\n";
        let decoded = decode(content).unwrap();
        assert_eq!(decoded.note.title, "Slip box");
        assert_eq!(decoded.note.content, "Body.");

        let again = decode(&encode(&decoded.note)).unwrap();
        assert_eq!(again.note, decoded.note);
    }

    #[test]
    fn missing_title_fails() {
        let content = "---\nid: a\n---\nbody\n";
        assert_eq!(decode(content).unwrap_err(), DecodeError::MissingField("title"));
    }

    #[test]
    fn missing_id_without_default_fails() {
        let content = "---\ntitle: A\n---\n";
        assert_eq!(decode(content).unwrap_err(), DecodeError::MissingField("id"));
    }

    #[test]
    fn content_with_its_own_heading_survives() {
        let mut note = sample_note();
        note.content = "# Another heading\n\ntext".to_string();
        let decoded = decode(&encode(&note)).unwrap().note;
        assert_eq!(decoded.content, note.content);
    }

    fn arb_note() -> impl Strategy<Value = Note> {
        (
            "[0-9]{25}",
            "[A-Za-z][A-Za-z0-9 ,.()?\n\r\t-]{0,40}",
            "[A-Za-z0-9 .,;:()\n-]{0,200}",
            prop::sample::select(NoteType::ALL.to_vec()),
            prop::collection::vec("[a-z][a-z0-9-]{0,10}", 0..5),
            0i64..4_000_000_000_000_000,
            0i64..1_000_000_000_000,
            prop::collection::vec(
                (
                    prop::sample::select(LinkType::ALL.to_vec()),
                    "[0-9]{25}",
                    "[a-z ]{0,20}",
                ),
                0..4,
            ),
        )
            .prop_map(|(id, title, content, note_type, tags, created, delta, links)| {
                let created = DateTime::<Utc>::from_timestamp_micros(created).unwrap_or_default();
                let mut note = Note::new(id, &title, &content, note_type, tags, created)
                    .expect("generated title is non-empty");
                note.updated_at = created + chrono::Duration::microseconds(delta);
                for (link_type, target, desc) in links {
                    note.add_link(NoteLink::new(link_type, target).with_description(Some(desc)));
                }
                note
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(note in arb_note()) {
            let decoded = decode(&encode(&note)).expect("encoded note decodes");
            prop_assert!(decoded.warnings.is_empty());
            prop_assert_eq!(decoded.note, note);
        }
    }
}
