//! The reverse-reference index.
//!
//! One document per referenced node, unique on `targetuuid`, holding the
//! `refs` list of referencing property ids. A record whose reference set
//! becomes empty is deleted rather than stored.

use std::collections::BTreeMap;

use arbor_store::{Connection, Document, FieldValue};
use arbor_types::{NodeId, PropertyId, ReferenceRecord};
use tracing::debug;

use crate::error::{PersistError, Result};

pub(crate) const TARGET: &str = "targetuuid";
pub(crate) const REFS: &str = "refs";
pub(crate) const REF: &str = "ref";

/// A pending change to the index, queued while bundles are written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReferenceDelta {
    Added { target: NodeId, property: PropertyId },
    Removed { target: NodeId, property: PropertyId },
}

impl ReferenceDelta {
    pub fn target(&self) -> NodeId {
        match self {
            Self::Added { target, .. } | Self::Removed { target, .. } => *target,
        }
    }
}

/// Reference index operations against the refs class `class`.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceIndex<'a> {
    class: &'a str,
}

impl<'a> ReferenceIndex<'a> {
    pub fn new(class: &'a str) -> Self {
        Self { class }
    }

    pub fn load(&self, conn: &dyn Connection, target: NodeId) -> Result<Option<ReferenceRecord>> {
        let Some(rid) = conn.lookup(self.class, &target.to_string())? else {
            return Ok(None);
        };
        match conn.load(rid)? {
            Some(doc) => decode(&doc).map(Some),
            None => Ok(None),
        }
    }

    /// Upsert `record`, replacing the stored set. An empty record deletes.
    pub fn store(&self, conn: &mut dyn Connection, record: &ReferenceRecord) -> Result<()> {
        if record.is_empty() {
            self.delete(conn, record.target)?;
            return Ok(());
        }
        let doc = self.encode(record);
        match conn.lookup(self.class, &record.target.to_string())? {
            Some(rid) => conn.update(rid, doc)?,
            None => {
                conn.create(doc)?;
            }
        }
        Ok(())
    }

    /// Delete the record for `target`. Returns `true` if one existed.
    pub fn delete(&self, conn: &mut dyn Connection, target: NodeId) -> Result<bool> {
        match conn.lookup(self.class, &target.to_string())? {
            Some(rid) => Ok(conn.delete(rid)?),
            None => Ok(false),
        }
    }

    pub fn exists(&self, conn: &dyn Connection, target: NodeId) -> Result<bool> {
        Ok(conn.lookup(self.class, &target.to_string())?.is_some())
    }

    /// Apply queued deltas in order, one read-modify-write per target.
    /// Returns the number of records touched.
    pub fn apply(&self, conn: &mut dyn Connection, deltas: &[ReferenceDelta]) -> Result<usize> {
        let mut by_target: BTreeMap<NodeId, Vec<&ReferenceDelta>> = BTreeMap::new();
        for delta in deltas {
            by_target.entry(delta.target()).or_default().push(delta);
        }

        for (&target, changes) in &by_target {
            let mut record = self
                .load(&*conn, target)?
                .unwrap_or_else(|| ReferenceRecord::new(target));
            for change in changes {
                match change {
                    ReferenceDelta::Added { property, .. } => record.add(property.clone()),
                    ReferenceDelta::Removed { property, .. } => record.remove(property),
                };
            }
            self.store(conn, &record)?;
        }

        if !by_target.is_empty() {
            debug!(deltas = deltas.len(), targets = by_target.len(), "reference index updated");
        }
        Ok(by_target.len())
    }

    fn encode(&self, record: &ReferenceRecord) -> Document {
        let refs: Vec<FieldValue> = record
            .references()
            .map(|pid| Document::new().with(REF, pid.to_string()).into())
            .collect();
        Document::of_class(self.class)
            .with(TARGET, record.target.to_string())
            .with(REFS, refs)
    }
}

fn decode(doc: &Document) -> Result<ReferenceRecord> {
    let target = doc
        .get_str(TARGET)
        .ok_or_else(|| PersistError::corrupt("reference record lacks `targetuuid`"))?;
    let target = NodeId::parse(target).map_err(|e| PersistError::corrupt(e.to_string()))?;
    let refs = match doc.get(REFS) {
        None => &[][..],
        Some(value) => value
            .as_list()
            .ok_or_else(|| PersistError::corrupt("`refs` is not a list"))?,
    };
    let properties = refs
        .iter()
        .map(|entry| {
            let raw = entry
                .as_document()
                .and_then(|d| d.get_str(REF))
                .ok_or_else(|| PersistError::corrupt("reference entry lacks `ref`"))?;
            raw.parse::<PropertyId>()
                .map_err(|e| PersistError::corrupt(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ReferenceRecord::with_references(target, properties))
}
