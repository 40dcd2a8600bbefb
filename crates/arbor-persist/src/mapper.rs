//! Mapping between node bundles and bundle documents.
//!
//! A bundle is written in two phases. Phase 1 stores the document itself
//! (identity, types, properties, shared set); phase 2, run once every bundle
//! of the batch has passed phase 1, links the document to its children with
//! one edge per child. Splitting the write lets a batch list parents before
//! the children they point at.

use std::collections::{BTreeSet, HashMap};

use arbor_store::{BlobId, Connection, Document, Edge, FieldValue, RecordId};
use arbor_types::{
    ChildEntry, NodeBundle, NodeId, PropertyEntry, PropertyId, PropertyType, QName,
};
use tracing::debug;

use crate::error::{PersistError, Result};
use crate::name_codec;
use crate::references::ReferenceDelta;
use crate::value_codec::{self, ValueCodec};

pub(crate) const PRIMARY_TYPE: &str = "primaryType";
pub(crate) const PARENT: &str = "parentuuid";
pub(crate) const UUID: &str = "uuid";
pub(crate) const MOD_COUNT: &str = "modCount";
pub(crate) const MIXINS: &str = "mixinTypes";
pub(crate) const PROPERTIES: &str = "properties";
pub(crate) const SHARED_SET: &str = "sharedSet";

pub(crate) const NAME: &str = "name";
pub(crate) const TYPE: &str = "type";
pub(crate) const MULTI_VALUED: &str = "multiValued";
pub(crate) const VALUES: &str = "values";

/// Parent id stored for root bundles.
pub const ROOT_PARENT_SENTINEL: NodeId = NodeId::from_u128(0xbb4e9d10_d857_11df_937b_0800200c9a66);

/// Bundle id to document, for bundles written in phase 1 of the current batch.
pub type BatchIndex = HashMap<NodeId, RecordId>;

/// Side effects of one batch that are settled after commit or rollback.
#[derive(Debug, Default)]
pub struct BatchJournal {
    /// Blobs written by this batch; deleted again if it rolls back.
    pub created_blobs: Vec<BlobId>,
    /// Blobs no longer referenced once this batch commits.
    pub orphaned_blobs: Vec<BlobId>,
    /// Reference index changes applied in phase 3.
    pub reference_deltas: Vec<ReferenceDelta>,
}

impl BatchJournal {
    pub fn absorb(&mut self, other: BatchJournal) {
        self.created_blobs.extend(other.created_blobs);
        self.orphaned_blobs.extend(other.orphaned_blobs);
        self.reference_deltas.extend(other.reference_deltas);
    }
}

/// Reads and writes bundle documents of one bundle class.
pub struct BundleMapper<'a> {
    class: &'a str,
    codec: ValueCodec<'a>,
}

impl<'a> BundleMapper<'a> {
    pub fn new(class: &'a str, codec: ValueCodec<'a>) -> Self {
        Self { class, codec }
    }

    /// Phase 1: create or replace the bundle's document.
    ///
    /// Modified bundles must already be stored (`BundleNotFound` otherwise).
    /// Reference changes relative to the stored document and blobs it no
    /// longer needs are queued on `journal`. Every other failure is reported
    /// as `BundleWriteFailed`.
    pub fn write_phase1(
        &self,
        conn: &mut dyn Connection,
        bundle: &NodeBundle,
        journal: &mut BatchJournal,
    ) -> Result<RecordId> {
        self.phase1(conn, bundle, journal).map_err(|e| match e {
            PersistError::BundleNotFound(_) => e,
            other => PersistError::bundle(bundle.id, other),
        })
    }

    fn phase1(
        &self,
        conn: &mut dyn Connection,
        bundle: &NodeBundle,
        journal: &mut BatchJournal,
    ) -> Result<RecordId> {
        let existing = if bundle.is_new {
            None
        } else {
            Some(self.locate(&*conn, bundle.id)?)
        };

        let doc = self.encode(bundle, &mut journal.created_blobs)?;

        let previous = match &existing {
            Some((_, old)) => references_in(old)?,
            None => BTreeSet::new(),
        };
        let current = bundle.reference_targets();
        journal.reference_deltas.extend(
            previous
                .difference(&current)
                .map(|(property, target)| ReferenceDelta::Removed {
                    target: *target,
                    property: property.clone(),
                }),
        );
        journal.reference_deltas.extend(
            current
                .difference(&previous)
                .map(|(property, target)| ReferenceDelta::Added {
                    target: *target,
                    property: property.clone(),
                }),
        );

        let rid = match existing {
            Some((rid, old)) => {
                journal.orphaned_blobs.extend(referenced_blobs(&old)?);
                conn.update(rid, doc)?;
                rid
            }
            None => conn.create(doc)?,
        };
        debug!(node = %bundle.id, record = %rid, new = bundle.is_new, "bundle document written");
        Ok(rid)
    }

    /// Phase 2: replace the document's outgoing edges with one per child.
    ///
    /// Children are resolved through `index` first, then through the unique
    /// id index. Returns the number of edges written.
    pub fn write_phase2(
        &self,
        conn: &mut dyn Connection,
        bundle: &NodeBundle,
        rid: RecordId,
        index: &BatchIndex,
    ) -> Result<usize> {
        let mut targets = Vec::with_capacity(bundle.children.len());
        for child in &bundle.children {
            let target = match index.get(&child.id) {
                Some(&target) => target,
                None => conn
                    .lookup(self.class, &child.id.to_string())?
                    .ok_or(PersistError::DanglingChildReference {
                        parent: bundle.id,
                        child: child.id,
                    })?,
            };
            targets.push(target);
        }

        conn.clear_out_edges(rid)?;
        for (child, target) in bundle.children.iter().zip(targets) {
            let attributes = Document::new()
                .with(NAME, name_codec::encode(&child.name))
                .with(UUID, child.id.to_string());
            conn.create_edge(rid, Edge::new(target, attributes))?;
        }
        debug!(node = %bundle.id, children = bundle.children.len(), "child edges written");
        Ok(bundle.children.len())
    }

    /// Delete the bundle's document.
    ///
    /// Its externalized blobs are queued as orphans and its outgoing
    /// references as removals.
    pub fn destroy(
        &self,
        conn: &mut dyn Connection,
        id: NodeId,
        journal: &mut BatchJournal,
    ) -> Result<()> {
        let (rid, doc) = self.locate(&*conn, id)?;
        journal.orphaned_blobs.extend(referenced_blobs(&doc)?);
        journal.reference_deltas.extend(
            references_in(&doc)?
                .into_iter()
                .map(|(property, target)| ReferenceDelta::Removed { target, property }),
        );
        conn.delete(rid)?;
        debug!(node = %id, record = %rid, "bundle document deleted");
        Ok(())
    }

    /// Rebuild a bundle from its document and outgoing edges.
    pub fn read(&self, conn: &dyn Connection, rid: RecordId, doc: &Document) -> Result<NodeBundle> {
        let id = node_id_field(doc, UUID)?;
        let parent = node_id_field(doc, PARENT)?;
        let primary_type = name_field(doc, PRIMARY_TYPE)?;
        let mod_count = doc
            .get_long(MOD_COUNT)
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| PersistError::corrupt("bundle lacks a valid `modCount`"))?;

        let mut bundle = NodeBundle::new(id, primary_type);
        bundle.parent_id = (parent != ROOT_PARENT_SENTINEL).then_some(parent);
        bundle.mod_count = mod_count;
        bundle.is_new = false;

        for entry in list_field(doc, MIXINS)? {
            bundle.add_mixin(name_codec::decode(embedded(entry)?)?);
        }
        for entry in list_field(doc, PROPERTIES)? {
            bundle.set_property(self.decode_property(embedded(entry)?)?);
        }
        for entry in list_field(doc, SHARED_SET)? {
            bundle.add_shared(node_id_field(embedded(entry)?, UUID)?);
        }
        for edge in conn.out_edges(rid)? {
            bundle.children.push(ChildEntry::new(
                name_field(&edge.attributes, NAME)?,
                node_id_field(&edge.attributes, UUID)?,
            ));
        }
        Ok(bundle)
    }

    fn locate(&self, conn: &dyn Connection, id: NodeId) -> Result<(RecordId, Document)> {
        let rid = conn
            .lookup(self.class, &id.to_string())?
            .ok_or(PersistError::BundleNotFound(id))?;
        let doc = conn.load(rid)?.ok_or(PersistError::BundleNotFound(id))?;
        Ok((rid, doc))
    }

    fn encode(&self, bundle: &NodeBundle, created: &mut Vec<BlobId>) -> Result<Document> {
        // Validate everything before the first blob is written.
        for entry in bundle.properties.values() {
            entry.validate()?;
        }

        let mut properties = Vec::with_capacity(bundle.properties.len());
        for entry in bundle.properties.values() {
            let values = entry
                .values
                .iter()
                .map(|v| self.codec.encode(v, created).map(FieldValue::from))
                .collect::<Result<Vec<_>>>()?;
            let prop = Document::new()
                .with(NAME, name_codec::encode(&entry.name))
                .with(TYPE, entry.ty.code())
                .with(MULTI_VALUED, entry.multi_valued)
                .with(VALUES, values);
            properties.push(FieldValue::from(prop));
        }

        let mixins: Vec<FieldValue> = bundle
            .mixin_types
            .iter()
            .map(|name| name_codec::encode(name).into())
            .collect();
        let shared: Vec<FieldValue> = bundle
            .shared_set
            .iter()
            .map(|id| Document::new().with(UUID, id.to_string()).into())
            .collect();
        let parent = bundle.parent_id.unwrap_or(ROOT_PARENT_SENTINEL);

        Ok(Document::of_class(self.class)
            .with(UUID, bundle.id.to_string())
            .with(PARENT, parent.to_string())
            .with(PRIMARY_TYPE, name_codec::encode(&bundle.primary_type))
            .with(MOD_COUNT, i64::from(bundle.mod_count))
            .with(MIXINS, mixins)
            .with(PROPERTIES, properties)
            .with(SHARED_SET, shared))
    }

    fn decode_property(&self, doc: &Document) -> Result<PropertyEntry> {
        let name = name_field(doc, NAME)?;
        let code = doc
            .get_long(TYPE)
            .ok_or_else(|| PersistError::corrupt(format!("property {name} lacks `type`")))?;
        let ty = PropertyType::from_code(code).map_err(|e| PersistError::corrupt(e.to_string()))?;
        let multi_valued = doc
            .get_bool(MULTI_VALUED)
            .ok_or_else(|| PersistError::corrupt(format!("property {name} lacks `multiValued`")))?;
        let values = list_field(doc, VALUES)?
            .iter()
            .map(|v| self.codec.decode(embedded(v)?, ty))
            .collect::<Result<Vec<_>>>()?;
        Ok(PropertyEntry {
            name,
            ty,
            multi_valued,
            values,
        })
    }
}

/// Externalized blobs held by a stored bundle document.
pub fn referenced_blobs(doc: &Document) -> Result<Vec<BlobId>> {
    let mut blobs = Vec::new();
    for entry in list_field(doc, PROPERTIES)? {
        for value in list_field(embedded(entry)?, VALUES)? {
            blobs.extend(value_codec::external_blob(embedded(value)?).cloned());
        }
    }
    Ok(blobs)
}

/// `(property, target)` pairs of the reference values in a stored bundle
/// document.
pub fn references_in(doc: &Document) -> Result<BTreeSet<(PropertyId, NodeId)>> {
    let owner = node_id_field(doc, UUID)?;
    let mut refs = BTreeSet::new();
    for entry in list_field(doc, PROPERTIES)? {
        let prop = embedded(entry)?;
        let code = prop
            .get_long(TYPE)
            .ok_or_else(|| PersistError::corrupt("property lacks `type`"))?;
        let ty = PropertyType::from_code(code).map_err(|e| PersistError::corrupt(e.to_string()))?;
        if !ty.is_reference() {
            continue;
        }
        let property = PropertyId::new(owner, name_field(prop, NAME)?);
        for value in list_field(prop, VALUES)? {
            refs.insert((property.clone(), node_id_field(embedded(value)?, value_codec::VALUE)?));
        }
    }
    Ok(refs)
}

/// A list field; absent reads as empty, any other shape is corrupt.
fn list_field<'d>(doc: &'d Document, field: &str) -> Result<&'d [FieldValue]> {
    match doc.get(field) {
        None => Ok(&[]),
        Some(value) => value
            .as_list()
            .ok_or_else(|| PersistError::corrupt(format!("`{field}` is not a list"))),
    }
}

fn embedded(value: &FieldValue) -> Result<&Document> {
    value
        .as_document()
        .ok_or_else(|| PersistError::corrupt("expected an embedded document"))
}

fn node_id_field(doc: &Document, field: &str) -> Result<NodeId> {
    let raw = doc
        .get_str(field)
        .ok_or_else(|| PersistError::corrupt(format!("missing `{field}`")))?;
    NodeId::parse(raw).map_err(|e| PersistError::corrupt(e.to_string()))
}

fn name_field(doc: &Document, field: &str) -> Result<QName> {
    let name = doc
        .get_document(field)
        .ok_or_else(|| PersistError::corrupt(format!("missing `{field}`")))?;
    name_codec::decode(name)
}
