//! Graph queries: neighbours, similarity, centrality, orphans, date ranges.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use zk_core::error::{Result, ValidationError, ZkError};
use zk_core::link::LinkType;
use zk_core::note::Note;
use zk_index::{DateField, IndexConn};

/// Which edges of a note to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outgoing" | "out" => Ok(Self::Outgoing),
            "incoming" | "in" => Ok(Self::Incoming),
            "both" => Ok(Self::Both),
            _ => Err(ValidationError::UnknownDirection(s.to_string())),
        }
    }
}

/// A note reached from another note, with the relation seen from the
/// queried note.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedNote {
    pub note: Note,
    pub link_type: LinkType,
    /// `Outgoing` or `Incoming`, never `Both`.
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A note ranked by overlap with another note.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredNote {
    pub note: Note,
    pub score: u32,
    pub shared_tags: Vec<String>,
    pub shared_neighbors: Vec<String>,
}

/// A note ranked by how many edges touch it.
#[derive(Debug, Clone, Serialize)]
pub struct CentralNote {
    pub note: Note,
    pub degree: u64,
}

/// Notes linked to `id`.
///
/// Outgoing edges report their stored type. Incoming edges report the
/// inverse of the stored type, so after `a extends b`, `b` sees `a` via
/// `extended_by`. Since every edge is stored twice, `Both` drops incoming
/// entries that repeat an outgoing one. Ordered by note id, then type.
///
/// # Errors
///
/// Returns [`ZkError::NotFound`] if `id` is not indexed.
pub fn linked_notes(
    conn: &IndexConn<'_>,
    id: &str,
    direction: Direction,
    link_type: Option<LinkType>,
) -> Result<Vec<LinkedNote>> {
    if !conn.note_exists(id)? {
        return Err(ZkError::note_not_found(id));
    }

    // (neighbour id, perspective type) -> (direction, description)
    let mut edges: BTreeMap<(String, LinkType), (Direction, Option<String>)> = BTreeMap::new();
    if direction != Direction::Incoming {
        for row in conn.links_from(id)? {
            edges.insert(
                (row.target_id, row.link_type),
                (Direction::Outgoing, row.description),
            );
        }
    }
    if direction != Direction::Outgoing {
        for row in conn.links_to(id)? {
            edges
                .entry((row.source_id, row.link_type.inverse()))
                .or_insert((Direction::Incoming, row.description));
        }
    }

    let mut cache: HashMap<String, Note> = HashMap::new();
    let mut out = Vec::new();
    for ((other, perspective), (dir, description)) in edges {
        if link_type.is_some_and(|t| t != perspective) {
            continue;
        }
        let note = match cache.get(&other) {
            Some(note) => note.clone(),
            None => {
                let Some(note) = conn.get_note(&other)? else {
                    continue;
                };
                cache.insert(other.clone(), note.clone());
                note
            }
        };
        out.push(LinkedNote {
            note,
            link_type: perspective,
            direction: dir,
            description,
        });
    }
    Ok(out)
}

/// Notes sharing tags or neighbours with `id`, best first.
///
/// Score is the number of shared tags plus the number of shared
/// neighbours. Zero scores are left out. Ties go to the more recently
/// updated note, then the smaller id.
///
/// # Errors
///
/// Returns [`ZkError::NotFound`] if `id` is not indexed.
pub fn find_similar(conn: &IndexConn<'_>, id: &str, limit: usize) -> Result<Vec<ScoredNote>> {
    let Some(origin) = conn.get_note(id)? else {
        return Err(ZkError::note_not_found(id));
    };

    let mut overlap: BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();
    for tag in &origin.tags {
        for other in conn.notes_for_tag(tag)? {
            if other != id {
                overlap.entry(other).or_default().0.insert(tag.clone());
            }
        }
    }
    for neighbor in conn.neighbors(id)? {
        for other in conn.neighbors(&neighbor)? {
            if other != id {
                overlap.entry(other).or_default().1.insert(neighbor.clone());
            }
        }
    }

    let mut scored = Vec::with_capacity(overlap.len());
    for (other, (tags, neighbors)) in overlap {
        let score = u32::try_from(tags.len() + neighbors.len()).unwrap_or(u32::MAX);
        if score == 0 {
            continue;
        }
        if let Some(note) = conn.get_note(&other)? {
            scored.push(ScoredNote {
                note,
                score,
                shared_tags: tags.into_iter().collect(),
                shared_neighbors: neighbors.into_iter().collect(),
            });
        }
    }
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.note.updated_at.cmp(&a.note.updated_at))
            .then(a.note.id.cmp(&b.note.id))
    });
    scored.truncate(limit);
    Ok(scored)
}

/// The most connected notes. Degree counts incoming and outgoing edges;
/// unlinked notes are left out. Ties go to the smaller id.
///
/// # Errors
///
/// Returns [`ZkError::Index`] if a query fails.
pub fn find_central(conn: &IndexConn<'_>, limit: usize) -> Result<Vec<CentralNote>> {
    let mut degrees: Vec<(String, u64)> = conn
        .degrees()?
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .collect();
    degrees.sort_by_key(|(id, degree)| (Reverse(*degree), id.clone()));
    degrees.truncate(limit);

    let mut out = Vec::with_capacity(degrees.len());
    for (id, degree) in degrees {
        if let Some(note) = conn.get_note(&id)? {
            out.push(CentralNote { note, degree });
        }
    }
    Ok(out)
}

/// Notes with no edges at all, ordered by id.
///
/// # Errors
///
/// Returns [`ZkError::Index`] if a query fails.
pub fn find_orphaned(conn: &IndexConn<'_>) -> Result<Vec<Note>> {
    let mut out = Vec::new();
    for (id, degree) in conn.degrees()? {
        if degree > 0 {
            continue;
        }
        if let Some(note) = conn.get_note(&id)? {
            out.push(note);
        }
    }
    Ok(out)
}

/// Notes whose `field` lies in `[start, end]`, oldest first.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidDateRange`] when `start > end`.
pub fn list_by_date(
    conn: &IndexConn<'_>,
    field: DateField,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
) -> Result<Vec<Note>> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(ValidationError::InvalidDateRange {
                start: s.to_rfc3339(),
                end: e.to_rfc3339(),
            }
            .into());
        }
    }
    conn.notes_in_range(field, start.as_ref(), end.as_ref(), limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::connect;
    use chrono::TimeZone;
    use zk_core::note::NoteType;
    use zk_index::IndexStore;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, 12, 0, 0).unwrap()
    }

    fn setup(notes: &[(&str, &str, u32)]) -> IndexStore {
        let index = IndexStore::in_memory().unwrap();
        index
            .write(|tx| {
                for (id, tags, d) in notes {
                    let note = Note::new(
                        id.to_string(),
                        &format!("Note {id}"),
                        "",
                        NoteType::Permanent,
                        tags.split_whitespace(),
                        day(*d),
                    )?;
                    tx.upsert_note(&note, None)?;
                }
                Ok(())
            })
            .unwrap();
        index
    }

    fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
        items.iter().map(|i| id(i).to_string()).collect()
    }

    #[test]
    fn direction_parses_aliases() {
        assert_eq!("OUT".parse::<Direction>().unwrap(), Direction::Outgoing);
        assert_eq!("incoming".parse::<Direction>().unwrap(), Direction::Incoming);
        assert_eq!(" both ".parse::<Direction>().unwrap(), Direction::Both);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(ValidationError::UnknownDirection(_))
        ));
    }

    #[test]
    fn incoming_view_reports_inverse_type() {
        let index = setup(&[("a", "", 1), ("b", "", 2)]);
        index
            .write(|tx| connect(tx, "a", "b", LinkType::Extends, None))
            .unwrap();

        let incoming = index
            .read(|c| linked_notes(c, "b", Direction::Incoming, None))
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].note.id, "a");
        assert_eq!(incoming[0].link_type, LinkType::ExtendedBy);
        assert_eq!(incoming[0].direction, Direction::Incoming);

        let outgoing = index
            .read(|c| linked_notes(c, "a", Direction::Outgoing, Some(LinkType::Extends)))
            .unwrap();
        assert_eq!(ids(&outgoing, |l| l.note.id.as_str()), vec!["b"]);

        let both = index
            .read(|c| linked_notes(c, "a", Direction::Both, None))
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].direction, Direction::Outgoing);
    }

    #[test]
    fn linked_notes_filters_by_perspective_type() {
        let index = setup(&[("a", "", 1), ("b", "", 2), ("c", "", 3)]);
        index
            .write(|tx| {
                connect(tx, "a", "b", LinkType::Supports, None)?;
                connect(tx, "c", "b", LinkType::Contradicts, None)
            })
            .unwrap();

        let supported = index
            .read(|c| linked_notes(c, "b", Direction::Both, Some(LinkType::SupportedBy)))
            .unwrap();
        assert_eq!(ids(&supported, |l| l.note.id.as_str()), vec!["a"]);

        let all = index
            .read(|c| linked_notes(c, "b", Direction::Both, None))
            .unwrap();
        assert_eq!(ids(&all, |l| l.note.id.as_str()), vec!["a", "c"]);

        let err = index
            .read(|c| linked_notes(c, "ghost", Direction::Both, None))
            .unwrap_err();
        assert!(matches!(err, ZkError::NotFound(_)));
    }

    #[test]
    fn similar_ranks_shared_tags_first() {
        let index = setup(&[
            ("a", "rust db graph", 1),
            ("b", "rust db graph", 2),
            ("c", "rust", 3),
            ("d", "cooking", 4),
        ]);

        let similar = index.read(|c| find_similar(c, "a", 10)).unwrap();
        assert_eq!(ids(&similar, |s| s.note.id.as_str()), vec!["b", "c"]);
        assert_eq!(similar[0].score, 3);
        assert_eq!(similar[0].shared_tags, vec!["db", "graph", "rust"]);
    }

    #[test]
    fn similar_counts_shared_neighbors_and_breaks_ties_by_recency() {
        let index = setup(&[("a", "", 1), ("hub", "", 2), ("x", "", 3), ("y", "", 4)]);
        index
            .write(|tx| {
                connect(tx, "a", "hub", LinkType::Related, None)?;
                connect(tx, "x", "hub", LinkType::Related, None)?;
                connect(tx, "y", "hub", LinkType::Reference, None)
            })
            .unwrap();

        let similar = index.read(|c| find_similar(c, "a", 10)).unwrap();
        assert_eq!(ids(&similar, |s| s.note.id.as_str()), vec!["y", "x"]);
        assert_eq!(similar[0].shared_neighbors, vec!["hub"]);

        let limited = index.read(|c| find_similar(c, "a", 1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn central_orders_by_degree_then_id() {
        let index = setup(&[("a", "", 1), ("b", "", 2), ("c", "", 3), ("d", "", 4)]);
        index
            .write(|tx| {
                connect(tx, "a", "b", LinkType::Extends, None)?;
                connect(tx, "a", "c", LinkType::Related, None)
            })
            .unwrap();

        let central = index.read(|c| find_central(c, 10)).unwrap();
        assert_eq!(ids(&central, |n| n.note.id.as_str()), vec!["a", "b", "c"]);
        assert_eq!(central[0].degree, 4);
        assert_eq!(central[1].degree, 2);

        let top = index.read(|c| find_central(c, 1)).unwrap();
        assert_eq!(ids(&top, |n| n.note.id.as_str()), vec!["a"]);
    }

    #[test]
    fn orphans_are_notes_without_edges() {
        let index = setup(&[("a", "", 1), ("b", "", 2), ("c", "", 3)]);
        index
            .write(|tx| connect(tx, "a", "b", LinkType::Questions, None))
            .unwrap();
        let orphans = index.read(|c| find_orphaned(c)).unwrap();
        assert_eq!(ids(&orphans, |n| n.id.as_str()), vec!["c"]);
    }

    #[test]
    fn list_by_date_validates_range() {
        let index = setup(&[("a", "", 1), ("b", "", 5), ("c", "", 9)]);
        let notes = index
            .read(|c| list_by_date(c, DateField::Created, Some(day(2)), Some(day(9)), None))
            .unwrap();
        assert_eq!(ids(&notes, |n| n.id.as_str()), vec!["b", "c"]);

        let err = index
            .read(|c| list_by_date(c, DateField::Updated, Some(day(9)), Some(day(2)), None))
            .unwrap_err();
        assert!(matches!(
            err,
            ZkError::Validation(ValidationError::InvalidDateRange { .. })
        ));
    }
}
