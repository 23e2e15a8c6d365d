//! # zk-core
//!
//! Core types for the Zettelkasten knowledge base.
//!
//! This crate defines the foundational types used across all other zk crates:
//! - [`Note`] — the atomic knowledge unit ("zettel")
//! - [`NoteType`] and [`LinkType`] — closed sets of note kinds and relations
//! - [`NoteLink`] — an outbound, typed link declared by a note
//! - [`IdGenerator`] — collision-free, time-ordered note identifiers
//! - Document codec ([`codec`]) — markdown with a YAML header and a links section
//! - Error hierarchy ([`ZkError`], [`ValidationError`], [`DecodeError`])

pub mod codec;
pub mod error;
pub mod id;
pub mod link;
pub mod note;

pub use codec::{decode, decode_with, encode, DecodeDefaults, Decoded};
pub use error::{DecodeError, ErrorKind, Result, ValidationError, ZkError};
pub use id::IdGenerator;
pub use link::{LinkType, NoteLink};
pub use note::{normalize_tag, normalize_tags, normalize_title, Note, NoteType};
