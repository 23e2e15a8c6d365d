//! End-to-end scenarios over a real notes directory and SQLite file.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::thread;

use zk_core::link::LinkType;
use zk_core::note::Note;
use zk_core::ZkError;
use zk_graph::Direction;
use zk_index::NoteFilter;
use zk_service::{Config, NewNote, ZettelService};

fn open(dir: &tempfile::TempDir) -> ZettelService {
    ZettelService::open(&Config::for_base_dir(dir.path())).unwrap()
}

fn add(service: &ZettelService, title: &str, tags: &[&str]) -> Note {
    service
        .create_note(NewNote {
            title: title.to_string(),
            content: format!("Thoughts on {title}."),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..NewNote::default()
        })
        .unwrap()
}

fn ids(notes: &[Note]) -> Vec<String> {
    notes.iter().map(|n| n.id.clone()).collect()
}

#[test]
fn concurrent_creates_get_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(open(&dir));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                (0..10)
                    .map(|i| add(&service, &format!("note {t}-{i}"), &[]).id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for handle in handles {
        let ids = handle.join().unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids from one thread increase");
        all.extend(ids);
    }
    assert_eq!(all.len(), 80);
    assert_eq!(service.status().unwrap().indexed, 80);
}

#[test]
fn concurrent_links_on_one_hub_are_all_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(open(&dir));
    let hub = add(&service, "Hub", &[]);
    let spokes: Vec<Note> = (0..6).map(|i| add(&service, &format!("Spoke {i}"), &[])).collect();

    let handles: Vec<_> = spokes
        .iter()
        .map(|spoke| {
            let service = Arc::clone(&service);
            let (hub, spoke) = (hub.id.clone(), spoke.id.clone());
            thread::spawn(move || {
                service
                    .create_link(&spoke, &hub, LinkType::Refines, None)
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let hub_doc = service.get_note(&hub.id).unwrap();
    assert_eq!(hub_doc.links.len(), 6);
    assert!(hub_doc.links.iter().all(|l| l.link_type == LinkType::RefinedBy));
    let incoming = service
        .linked_notes(&hub.id, Direction::Incoming, Some(LinkType::RefinedBy))
        .unwrap();
    assert_eq!(incoming.len(), 6);
}

#[test]
fn extends_is_seen_as_extended_by_from_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let a = add(&service, "Slip box", &[]);
    let b = add(&service, "Index cards", &[]);

    service.create_link(&a.id, &b.id, LinkType::Extends, None).unwrap();
    let incoming = service.linked_notes(&b.id, Direction::Incoming, None).unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].note.id, a.id);
    assert_eq!(incoming[0].link_type, LinkType::ExtendedBy);

    service.remove_link(&a.id, &b.id, Some(LinkType::Extends)).unwrap();
    assert!(service.linked_notes(&a.id, Direction::Both, None).unwrap().is_empty());
    assert!(service.linked_notes(&b.id, Direction::Both, None).unwrap().is_empty());
}

#[test]
fn deleting_a_supporter_empties_the_incoming_view() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let a = add(&service, "Evidence", &[]);
    let b = add(&service, "Claim", &[]);
    service.create_link(&a.id, &b.id, LinkType::Supports, None).unwrap();

    service.delete_note(&a.id).unwrap();
    assert!(service.linked_notes(&b.id, Direction::Incoming, None).unwrap().is_empty());
    assert!(service.get_note(&b.id).unwrap().links.is_empty());
}

#[test]
fn out_of_band_deletes_are_reconciled() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let notes: Vec<Note> = (0..5).map(|i| add(&service, &format!("N{i}"), &["shared"])).collect();
    for pair in notes.windows(2) {
        service.create_link(&pair[0].id, &pair[1].id, LinkType::Related, None).unwrap();
    }

    let notes_dir = dir.path().join("data/notes");
    for note in &notes[2..] {
        fs::remove_file(notes_dir.join(format!("{}.md", note.id))).unwrap();
    }

    // Count mismatch triggers a rebuild on the next read.
    let remaining = service.all_notes().unwrap();
    assert_eq!(ids(&remaining), ids(&notes[..2]));
    assert_eq!(service.status().unwrap().indexed, 2);

    let central = service.find_central(10).unwrap();
    assert_eq!(central.len(), 2);
    assert!(central.iter().all(|c| c.degree == 2));
    let tags = service.all_tags().unwrap();
    assert_eq!(tags[0].count, 2);
}

#[test]
fn orphans_track_link_changes() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let a = add(&service, "A", &[]);
    let b = add(&service, "B", &[]);
    let c = add(&service, "C", &[]);

    assert_eq!(ids(&service.find_orphaned().unwrap()), vec![a.id.clone(), b.id.clone(), c.id.clone()]);
    service.create_link(&a.id, &b.id, LinkType::Questions, None).unwrap();
    assert_eq!(ids(&service.find_orphaned().unwrap()), vec![c.id.clone()]);
    service.create_link(&c.id, &a.id, LinkType::Reference, None).unwrap();
    assert!(service.find_orphaned().unwrap().is_empty());
    service.remove_link(&a.id, &b.id, None).unwrap();
    assert_eq!(ids(&service.find_orphaned().unwrap()), vec![b.id.clone()]);
}

#[test]
fn shared_tags_rank_above_unrelated_notes() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let a = add(&service, "Rust ownership", &["rust", "memory", "safety"]);
    let b = add(&service, "Borrow checker", &["rust", "memory", "safety"]);
    let c = add(&service, "Sourdough", &["baking"]);
    let d = add(&service, "Rust async", &["rust"]);

    let similar = service.find_similar(&a.id, 10).unwrap();
    let ranked: Vec<&str> = similar.iter().map(|s| s.note.id.as_str()).collect();
    assert_eq!(ranked, vec![b.id.as_str(), d.id.as_str()]);
    assert!(!ranked.contains(&c.id.as_str()));
    assert_eq!(similar[0].score, 3);
}

#[test]
fn hand_edited_documents_are_picked_up_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let target_id = {
        let service = open(&dir);
        let target = add(&service, "Zettelkasten", &[]);
        target.id
    };

    let notes_dir = dir.path().join("data/notes");
    fs::write(
        notes_dir.join("handwritten.md"),
        "---\ntitle: Written by hand\ntags: method, Writing\n---\n\nBody.\n\n## Links\n- supports [[Zettelkasten]] by title\n- bogus [[nowhere]]\n",
    )
    .unwrap();

    let service = open(&dir);
    let note = service.get_note("handwritten").unwrap();
    assert_eq!(note.title, "Written by hand");
    assert_eq!(note.tags.iter().collect::<Vec<_>>(), vec!["method", "writing"]);

    let incoming = service.linked_notes(&target_id, Direction::Incoming, None).unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].note.id, "handwritten");
    assert_eq!(incoming[0].link_type, LinkType::SupportedBy);
    assert_eq!(incoming[0].description.as_deref(), Some("by title"));

    let found = service
        .search_notes(&NoteFilter {
            tags: vec!["writing".into()],
            ..NoteFilter::default()
        })
        .unwrap();
    assert_eq!(ids(&found), vec!["handwritten".to_string()]);
}

#[test]
fn corrupt_document_is_reported_once_and_index_settles() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let a = add(&service, "A", &[]);
    fs::write(
        dir.path().join("data/notes/broken.md"),
        "---\ntitle: [unterminated\n",
    )
    .unwrap();

    let report = service.rebuild_index().unwrap();
    assert_eq!(report.notes, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].source.ends_with("broken.md"));

    let status = service.status().unwrap();
    assert_eq!(status.files, 2);
    assert_eq!(status.unreadable, 1);
    assert_eq!(status.indexed, 1);
    assert!(!status.stale);

    assert_eq!(ids(&service.all_notes().unwrap()), vec![a.id.clone()]);
    assert!(service.synchronizer().ensure_fresh().unwrap().is_none());

    // New notes keep the counts in step.
    add(&service, "B", &[]);
    assert!(!service.status().unwrap().stale);
}

#[test]
fn rebuild_twice_gives_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let a = add(&service, "A", &["x", "y"]);
    let b = add(&service, "B", &["y"]);
    service.create_link(&a.id, &b.id, LinkType::Contradicts, Some("tension")).unwrap();

    let first = service.rebuild_index().unwrap();
    let before = (service.all_notes().unwrap(), service.all_tags().unwrap());
    let second = service.rebuild_index().unwrap();
    let after = (service.all_notes().unwrap(), service.all_tags().unwrap());

    assert_eq!(first.notes, second.notes);
    assert_eq!(first.links, 2);
    assert_eq!(before, after);
}

#[test]
fn unknown_notes_and_bad_input_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let service = open(&dir);
    let a = add(&service, "A", &[]);

    assert!(matches!(service.get_note("nope"), Err(ZkError::NotFound(_))));
    assert!(matches!(
        service.linked_notes("nope", Direction::Both, None),
        Err(ZkError::NotFound(_))
    ));
    assert!(matches!(
        service.create_link(&a.id, &a.id, LinkType::Related, None),
        Err(ZkError::Validation(_))
    ));
    assert!(matches!(service.delete_note("nope"), Err(ZkError::NotFound(_))));
}
