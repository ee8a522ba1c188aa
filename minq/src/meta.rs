//! A process-wide catalog of every derived document type, populated at link
//! time through `inventory`. Built once so index reconciliation and tooling
//! never have to rediscover metadata at query time.

use crate::index::{self, MinqIndex};
use mongodb::{Database, bson::Document};

#[doc(hidden)]
pub struct DocumentMetadataWrapper(pub DocumentMetadata);

inventory::collect!(DocumentMetadataWrapper);

pub struct DocumentMetadata {
    collection_name: &'static str,
    indexes_ptr: fn() -> Vec<MinqIndex>,
    string_fields_ptr: fn() -> Vec<String>,
}

impl DocumentMetadata {
    #[doc(hidden)]
    pub const fn new(
        collection_name: &'static str,
        indexes_ptr: fn() -> Vec<MinqIndex>,
        string_fields_ptr: fn() -> Vec<String>,
    ) -> Self {
        Self {
            collection_name,
            indexes_ptr,
            string_fields_ptr,
        }
    }

    pub fn collection_name(&self) -> &'static str {
        self.collection_name
    }

    /// The combined index descriptors declared on the document type.
    pub fn indexes(&self) -> Vec<MinqIndex> {
        (self.indexes_ptr)()
    }

    /// Storage keys of every string-typed field, the search surface.
    pub fn string_fields(&self) -> Vec<String> {
        (self.string_fields_ptr)()
    }
}

pub fn document_metadata() -> impl Iterator<Item = &'static DocumentMetadata> {
    inventory::iter::<DocumentMetadataWrapper>
        .into_iter()
        .map(|wrapper| &wrapper.0)
}

/// Reconciles the declared indexes of every registered document type
/// against its collection's live catalog. Run this once during startup,
/// before serving traffic; the sequential loop keeps reconciliation
/// serialized per collection.
///
/// Failures on individual descriptors are logged and contained; this call
/// itself never fails.
pub async fn reconcile_all_indexes(db: &Database) {
    for metadata in document_metadata() {
        let collection = db.collection::<Document>(metadata.collection_name());
        index::reconcile(&collection, &metadata.indexes()).await;
    }
}
