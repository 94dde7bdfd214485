//! In-memory databases, documents and change log.
//!
//! # Design
//! Every write goes through `Database::commit`, which bumps the revision,
//! appends a row to the change log and broadcasts it to live `_changes`
//! subscribers. Deleted documents stay in the map as tombstones so a later
//! write continues their revision history.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANGE_CHANNEL: usize = 256;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub content_type: String,
    pub data: Vec<u8>,
    pub revpos: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StoredDoc {
    pub rev: String,
    pub fields: Map<String, Value>,
    pub deleted: bool,
    pub attachments: BTreeMap<String, Attachment>,
}

impl StoredDoc {
    /// Build from a request body, dropping the underscore fields the store owns.
    pub fn from_body(body: Map<String, Value>) -> Self {
        let deleted = body.get("_deleted").and_then(Value::as_bool).unwrap_or(false);
        let fields = body
            .into_iter()
            .filter(|(key, _)| !matches!(key.as_str(), "_id" | "_rev" | "_attachments" | "_deleted"))
            .collect();
        Self {
            fields,
            deleted,
            ..Self::default()
        }
    }

    pub fn to_json(&self, id: &str) -> Value {
        let mut doc = self.fields.clone();
        doc.insert("_id".to_string(), json!(id));
        doc.insert("_rev".to_string(), json!(self.rev));
        if self.deleted {
            doc.insert("_deleted".to_string(), json!(true));
        }
        if !self.attachments.is_empty() {
            let stubs: Map<String, Value> = self
                .attachments
                .iter()
                .map(|(name, att)| {
                    (
                        name.clone(),
                        json!({
                            "content_type": att.content_type,
                            "length": att.data.len(),
                            "revpos": att.revpos,
                            "stub": true,
                        }),
                    )
                })
                .collect();
            doc.insert("_attachments".to_string(), Value::Object(stubs));
        }
        Value::Object(doc)
    }
}

/// Why a revision check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevError {
    Missing,
    Conflict,
}

#[derive(Debug)]
pub struct Database {
    pub docs: BTreeMap<String, StoredDoc>,
    pub seq: u64,
    pub log: Vec<Value>,
    pub changes: broadcast::Sender<Value>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            docs: BTreeMap::new(),
            seq: 0,
            log: Vec::new(),
            changes: broadcast::channel(CHANGE_CHANNEL).0,
        }
    }
}

impl Database {
    /// The document unless it is missing or deleted.
    pub fn live(&self, id: &str) -> Option<&StoredDoc> {
        self.docs.get(id).filter(|doc| !doc.deleted)
    }

    /// A write with `rev` must name the current revision; a write without one
    /// may only create.
    pub fn check_rev(&self, id: &str, rev: Option<&str>) -> Result<Option<&StoredDoc>, RevError> {
        match (self.live(id), rev) {
            (Some(doc), Some(rev)) if doc.rev == rev => Ok(Some(doc)),
            (Some(_), _) => Err(RevError::Conflict),
            (None, None) => Ok(None),
            (None, Some(_)) => Err(RevError::Conflict),
        }
    }

    /// Like `check_rev`, for operations that need an existing document.
    pub fn require_rev(&self, id: &str, rev: Option<&str>) -> Result<&StoredDoc, RevError> {
        let doc = self.live(id).ok_or(RevError::Missing)?;
        if rev == Some(doc.rev.as_str()) {
            Ok(doc)
        } else {
            Err(RevError::Conflict)
        }
    }

    /// Store `doc` under `id` with a fresh revision and record the change.
    pub fn commit(&mut self, id: &str, mut doc: StoredDoc) -> String {
        let generation = self.docs.get(id).map(|d| generation(&d.rev)).unwrap_or(0) + 1;
        doc.rev = format!("{generation}-{}", Uuid::new_v4().simple());
        self.seq += 1;

        let mut row = json!({
            "seq": self.seq,
            "id": id,
            "changes": [{"rev": doc.rev}],
            "doc": doc.to_json(id),
        });
        if doc.deleted {
            row["deleted"] = json!(true);
        }
        self.log.push(row.clone());
        let _ = self.changes.send(row);

        let rev = doc.rev.clone();
        self.docs.insert(id.to_string(), doc);
        rev
    }

    pub fn doc_count(&self) -> usize {
        self.docs.values().filter(|doc| !doc.deleted).count()
    }

    pub fn deleted_count(&self) -> usize {
        self.docs.len() - self.doc_count()
    }
}

pub fn generation(rev: &str) -> u64 {
    rev.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

/// Database names follow CouchDB's rules: lowercase letter first, then
/// lowercase letters, digits and `_$()+-/`.
pub fn valid_db_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+-/".contains(c))
}

pub fn new_uuid() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_bumps_generation_and_logs() {
        let mut db = Database::default();
        let first = db.commit("a", StoredDoc::default());
        let second = db.commit("a", StoredDoc::default());
        assert!(first.starts_with("1-"));
        assert!(second.starts_with("2-"));
        assert_eq!(db.seq, 2);
        assert_eq!(db.log.len(), 2);
        assert_eq!(db.log[1]["changes"][0]["rev"], json!(second));
    }

    #[test]
    fn check_rev_rules() {
        let mut db = Database::default();
        assert_eq!(db.check_rev("a", None).map(|d| d.is_none()), Ok(true));
        assert_eq!(db.check_rev("a", Some("1-x")).err(), Some(RevError::Conflict));

        let rev = db.commit("a", StoredDoc::default());
        assert!(db.check_rev("a", Some(&rev)).is_ok());
        assert_eq!(db.check_rev("a", None).err(), Some(RevError::Conflict));
        assert_eq!(db.require_rev("b", None).err(), Some(RevError::Missing));
    }

    #[test]
    fn from_body_strips_reserved_fields() {
        let body = json!({"_id": "a", "_rev": "1-x", "_deleted": true, "name": "n"});
        let doc = StoredDoc::from_body(body.as_object().cloned().unwrap());
        assert!(doc.deleted);
        assert_eq!(doc.fields.len(), 1);
        assert_eq!(doc.fields["name"], "n");
    }

    #[test]
    fn db_name_rules() {
        assert!(valid_db_name("albums"));
        assert!(valid_db_name("a1_$()+-/"));
        assert!(!valid_db_name("Albums"));
        assert!(!valid_db_name("1albums"));
        assert!(!valid_db_name(""));
    }
}
