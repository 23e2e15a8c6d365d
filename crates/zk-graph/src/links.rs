//! Symmetric link maintenance.
//!
//! Every edge `(a, b, t)` in the index is paired with `(b, a, t.inverse())`.
//! Both halves are written or removed through the same [`IndexConn`], so
//! inside [`zk_index::IndexStore::write`] they commit together.

use tracing::debug;

use zk_core::error::{Result, ValidationError, ZkError};
use zk_core::link::LinkType;
use zk_index::IndexConn;

/// Create a validated link and its inverse.
///
/// # Errors
///
/// - [`ValidationError::SelfLink`] when `source == target`
/// - [`ZkError::NotFound`] when either endpoint is not indexed
/// - [`ValidationError::DuplicateLink`] when the triple already exists
pub fn connect(
    tx: &IndexConn<'_>,
    source: &str,
    target: &str,
    link_type: LinkType,
    description: Option<&str>,
) -> Result<()> {
    if source == target {
        return Err(ValidationError::SelfLink(source.to_string()).into());
    }
    for id in [source, target] {
        if !tx.note_exists(id)? {
            return Err(ZkError::note_not_found(id));
        }
    }
    if tx.link_exists(source, target, link_type)? {
        return Err(ValidationError::DuplicateLink {
            source_id: source.to_string(),
            target_id: target.to_string(),
            link_type: link_type.to_string(),
        }
        .into());
    }
    mirror(tx, source, target, link_type, description)?;
    debug!(source, target, %link_type, "linked notes");
    Ok(())
}

/// Insert an edge and its inverse without validation, ignoring halves that
/// already exist. Returns `true` if anything was inserted.
///
/// # Errors
///
/// Returns [`ZkError::Index`] if either endpoint is not indexed.
pub fn mirror(
    tx: &IndexConn<'_>,
    source: &str,
    target: &str,
    link_type: LinkType,
    description: Option<&str>,
) -> Result<bool> {
    let forward = tx.insert_link(source, target, link_type, description)?;
    let backward = tx.insert_link(target, source, link_type.inverse(), description)?;
    Ok(forward || backward)
}

/// Remove links from `source` to `target` together with their inverses.
/// With `link_type == None` every type is removed. Returns the removed
/// types as seen from `source`.
///
/// # Errors
///
/// Returns [`ZkError::NotFound`] when no matching link exists.
pub fn disconnect(
    tx: &IndexConn<'_>,
    source: &str,
    target: &str,
    link_type: Option<LinkType>,
) -> Result<Vec<LinkType>> {
    let candidates: Vec<LinkType> = match link_type {
        Some(t) => vec![t],
        None => {
            let mut types: Vec<LinkType> = tx
                .links_from(source)?
                .into_iter()
                .filter(|row| row.target_id == target)
                .map(|row| row.link_type)
                .collect();
            types.extend(
                tx.links_to(source)?
                    .into_iter()
                    .filter(|row| row.source_id == target)
                    .map(|row| row.link_type.inverse()),
            );
            types.sort();
            types.dedup();
            types
        }
    };

    let mut removed = Vec::new();
    for t in candidates {
        let forward = tx.delete_link(source, target, t)?;
        let backward = tx.delete_link(target, source, t.inverse())?;
        if forward || backward {
            removed.push(t);
        }
    }

    if removed.is_empty() {
        let what = link_type.map_or_else(|| "any".to_string(), |t| t.to_string());
        return Err(ZkError::NotFound(format!(
            "link {source} -[{what}]-> {target}"
        )));
    }
    debug!(source, target, removed = removed.len(), "unlinked notes");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use zk_core::note::{Note, NoteType};
    use zk_index::IndexStore;

    fn index_with(ids: &[&str]) -> IndexStore {
        let index = IndexStore::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap();
        index
            .write(|tx| {
                for id in ids {
                    let note = Note::new(
                        id.to_string(),
                        &format!("Note {id}"),
                        "",
                        NoteType::Permanent,
                        Vec::<String>::new(),
                        now,
                    )?;
                    tx.upsert_note(&note, None)?;
                }
                Ok(())
            })
            .unwrap();
        index
    }

    #[test]
    fn connect_writes_both_directions() {
        let index = index_with(&["a", "b"]);
        index
            .write(|tx| connect(tx, "a", "b", LinkType::Extends, Some("builds on")))
            .unwrap();

        let rows = index.read(|c| c.all_links()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source_id, "a");
        assert_eq!(rows[0].link_type, LinkType::Extends);
        assert_eq!(rows[1].source_id, "b");
        assert_eq!(rows[1].link_type, LinkType::ExtendedBy);
        assert_eq!(rows[1].description.as_deref(), Some("builds on"));
    }

    #[test]
    fn connect_rejects_bad_links() {
        let index = index_with(&["a", "b"]);

        let err = index
            .write(|tx| connect(tx, "a", "a", LinkType::Related, None))
            .unwrap_err();
        assert!(matches!(err, ZkError::Validation(ValidationError::SelfLink(_))));

        let err = index
            .write(|tx| connect(tx, "a", "ghost", LinkType::Related, None))
            .unwrap_err();
        assert!(matches!(err, ZkError::NotFound(_)));

        index
            .write(|tx| connect(tx, "a", "b", LinkType::Supports, None))
            .unwrap();
        let err = index
            .write(|tx| connect(tx, "a", "b", LinkType::Supports, None))
            .unwrap_err();
        assert!(matches!(
            err,
            ZkError::Validation(ValidationError::DuplicateLink { .. })
        ));
        assert_eq!(index.read(|c| c.link_count()).unwrap(), 2);
    }

    #[test]
    fn symmetric_type_pairs_with_itself() {
        let index = index_with(&["a", "b"]);
        index
            .write(|tx| connect(tx, "a", "b", LinkType::Related, None))
            .unwrap();
        index
            .read(|c| {
                assert!(c.link_exists("a", "b", LinkType::Related)?);
                assert!(c.link_exists("b", "a", LinkType::Related)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn disconnect_removes_both_halves() {
        let index = index_with(&["a", "b"]);
        index
            .write(|tx| {
                connect(tx, "a", "b", LinkType::Extends, None)?;
                connect(tx, "a", "b", LinkType::Questions, None)
            })
            .unwrap();

        let removed = index
            .write(|tx| disconnect(tx, "a", "b", Some(LinkType::Extends)))
            .unwrap();
        assert_eq!(removed, vec![LinkType::Extends]);
        assert_eq!(index.read(|c| c.link_count()).unwrap(), 2);

        let removed = index.write(|tx| disconnect(tx, "b", "a", None)).unwrap();
        assert_eq!(removed, vec![LinkType::QuestionedBy]);
        assert_eq!(index.read(|c| c.link_count()).unwrap(), 0);
    }

    #[test]
    fn disconnect_missing_link_is_not_found() {
        let index = index_with(&["a", "b"]);
        let err = index
            .write(|tx| disconnect(tx, "a", "b", Some(LinkType::Refines)))
            .unwrap_err();
        assert!(matches!(err, ZkError::NotFound(msg) if msg.contains("refines")));
        let err = index.write(|tx| disconnect(tx, "a", "b", None)).unwrap_err();
        assert!(matches!(err, ZkError::NotFound(_)));
    }

    #[test]
    fn mirror_is_idempotent() {
        let index = index_with(&["a", "b"]);
        assert!(index
            .write(|tx| mirror(tx, "a", "b", LinkType::Refines, None))
            .unwrap());
        assert!(!index
            .write(|tx| mirror(tx, "b", "a", LinkType::RefinedBy, None))
            .unwrap());
        assert_eq!(index.read(|c| c.link_count()).unwrap(), 2);
    }
}
