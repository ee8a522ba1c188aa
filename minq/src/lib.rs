//! MINQ is a `MongoDB` object-document mapper for Rust.
//!
//! ## Example
//!
//! ```ignore
//! // Define a document
//! #[derive(Serialize, Deserialize, Document)]
//! #[document(collection = "players")]
//! struct Player {
//!   #[serde(flatten)]
//!   base: DocumentBase,
//!   #[minq(indexed, unique)]
//!   name: String,
//!   score: i64,
//! }
//!
//! let players = Minq::<Player>::connect(&db);
//!
//! // Reconcile declared indexes against the live catalog
//! players.reconcile_indexes().await;
//!
//! // Query with a single-shot request chain
//! let top: Vec<Player> = players
//!     .query(|f| { f.greater_than(player::Fields::Score, 100); })
//!     .sort(|s| { s.order_by_descending(player::Fields::Score); })
//!     .limit(10)
//!     .to_vec()
//!     .await?;
//!
//! // Insert documents; creation timestamps are stamped automatically
//! let mut fresh = [Player { base: DocumentBase::default(), name: "piper".into(), score: 0 }];
//! players.insert(&mut fresh).await?;
//!
//! // Update through a typed mutation chain
//! players
//!     .query(|f| { f.equal_to(player::Fields::Name, "piper"); })
//!     .update(|u| { u.increment(player::Fields::Score, 5); })
//!     .await?;
//!
//! // Bind several operations into one transaction
//! let mut trx = players.transaction().await?;
//! players.all().on_transaction(&mut trx).delete().await?;
//! trx.try_abort().await;
//! ```
//!
//! See the [`guides`] module to learn more!

#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc
)]

use chrono::Utc;
use mongodb::{
    Collection, Database,
    bson::{self, doc, oid::ObjectId},
    error::ErrorKind,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::LazyLock;

pub use minq_macros::{Document, Embedded};

pub mod error;
pub mod field;
pub mod filter;
pub mod guides;
pub mod index;
#[cfg(feature = "meta")]
pub mod meta;
pub mod request;
pub mod sort;
pub mod transaction;
pub mod update;

pub use error::{MinqError, Result};
pub use field::{FieldKey, FieldPath};
pub use filter::FilterChain;
pub use index::{IndexChain, IndexFragment, MAX_SCAN_DEPTH, MinqIndex};
pub use request::RequestChain;
pub use sort::SortChain;
pub use transaction::{Transaction, TransactionStatus};
pub use update::UpdateChain;

#[cfg(feature = "meta")]
pub use inventory;

use error::{DUPLICATE_KEY, classify_write_error};

/// The persisted envelope shared by every document: identifier, creation
/// timestamp, and the transient cache-expiration marker.
///
/// Embed it with `#[serde(flatten)]` in a struct deriving
/// [`Document`](minq_macros::Document):
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Document)]
/// struct Player {
///     #[serde(flatten)]
///     base: DocumentBase,
///     name: String,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBase {
    /// Immutable once assigned; the engine assigns one on insert when this
    /// is `None`, and callers may pre-assign their own.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Epoch milliseconds, stamped once by [`Minq::insert`].
    #[serde(rename = "created", default)]
    pub created_on: i64,

    /// Set only when the document is a materialized cache hit. Never
    /// persisted.
    #[serde(skip)]
    pub cached_until: Option<i64>,
}

impl DocumentBase {
    /// Pre-assigns a fresh identifier instead of letting the engine pick
    /// one at insert time.
    pub fn change_id(&mut self) {
        self.id = Some(ObjectId::new());
    }
}

/// A persisted document type, mapped to a collection. Implemented by
/// `#[derive(Document)]`, which also generates the typed field-selector
/// enum and the index/search metadata behind [`FieldScan`].
pub trait Document:
    Projection<Self> + FieldScan + Serialize + Send + Sync + Sized + 'static
{
    /// The typed field selectors of this document, rendering to storage
    /// keys.
    type Fields: FieldKey<Self> + Send + 'static;

    const COLLECTION_NAME: &'static str;

    fn base(&self) -> &DocumentBase;

    fn base_mut(&mut self) -> &mut DocumentBase;

    fn id(&self) -> Option<ObjectId> {
        self.base().id
    }

    fn created_on(&self) -> i64 {
        self.base().created_on
    }

    fn collection(db: &Database) -> Collection<Self> {
        db.collection(Self::COLLECTION_NAME)
    }

    /// The complete index descriptors declared through field attributes,
    /// with compound groups and text fragments merged.
    fn declared_indexes() -> Vec<MinqIndex> {
        let mut fragments = Vec::new();
        Self::scan_indexes(None, MAX_SCAN_DEPTH, &mut fragments);
        index::combine(fragments)
    }

    /// Storage keys of every string-typed field, recursively through
    /// embedded documents. The search surface.
    fn string_fields() -> Vec<String> {
        let mut fields = Vec::new();
        Self::scan_strings(None, MAX_SCAN_DEPTH, &mut fields);
        fields
    }
}

/// Recursive field-metadata discovery, generated by the derives. The depth
/// argument bounds recursion through embedded types so cyclic embeddings
/// cannot loop.
pub trait FieldScan {
    fn scan_indexes(prefix: Option<&str>, depth: u8, out: &mut Vec<IndexFragment>);

    fn scan_strings(prefix: Option<&str>, depth: u8, out: &mut Vec<String>);
}

/// A nested, non-root document type embedded within a [`Document`].
/// Implemented by `#[derive(Embedded)]`.
pub trait Embedded: FieldScan {}

/// A narrowed read of document type `D`, selecting only the storage keys in
/// `FIELDS`. Every document is trivially a projection of itself with no
/// narrowing.
pub trait Projection<D: Document>: DeserializeOwned + Send + Sync + 'static {
    const FIELDS: Option<&'static [&'static str]>;

    fn projection_document() -> Option<bson::Document> {
        static DOCUMENTS: LazyLock<dashmap::DashMap<&'static [&'static str], bson::Document>> =
            LazyLock::new(dashmap::DashMap::new);

        Self::FIELDS.map(|fields| {
            if let Some(document) = DOCUMENTS.get(fields) {
                document.clone()
            } else {
                let mut has_id = false;
                let mut document = doc! {};

                for field in fields {
                    if *field == "_id" {
                        has_id = true;
                    }
                    document.insert(*field, 1);
                }

                // Mongo includes _id unless it is excluded explicitly.
                if !has_id {
                    document.insert("_id", 0);
                }

                DOCUMENTS.insert(fields, document.clone());
                document
            }
        })
    }
}

/// Affirmative proof of the deployment environment, consumed by
/// [`Minq::wipe`]. Destructive operations require a positive local signal,
/// not merely the absence of a production flag.
pub trait Environment {
    fn is_local(&self) -> bool;
}

/// The per-type collection handle: long-lived, shared, and safe for
/// concurrent reads. All mutable state lives in the driver; every query
/// goes through a fresh single-use [`RequestChain`].
pub struct Minq<D: Document> {
    database: Database,
    collection: Collection<D>,
}

impl<D: Document> Minq<D> {
    /// Binds this handle to `D`'s collection on an explicitly-owned
    /// database handle. No global client is consulted.
    pub fn connect(db: &Database) -> Self {
        Self {
            database: db.clone(),
            collection: D::collection(db),
        }
    }

    /// Starts a request chain from a filter built in `build`.
    pub fn query(&self, build: impl FnOnce(&mut FilterChain<D>)) -> RequestChain<'_, D> {
        let mut filter = FilterChain::new();
        build(&mut filter);
        RequestChain::new(&self.collection, filter)
    }

    /// Starts a request chain that explicitly targets every document.
    pub fn all(&self) -> RequestChain<'_, D> {
        RequestChain::new(&self.collection, FilterChain::match_everything())
    }

    /// Bulk-inserts the given models, stamping each creation timestamp.
    /// Identifiers assigned by the engine are written back into the models.
    ///
    /// A violated unique constraint surfaces as
    /// [`MinqError::UniqueConstraint`] with a best-effort suspect: when the
    /// batch produced exactly one write error, the input at that position.
    pub async fn insert(&self, models: &mut [D]) -> Result<()> {
        if models.is_empty() {
            return Err(MinqError::EmptyInsert);
        }

        let now = Utc::now().timestamp_millis();
        for model in models.iter_mut() {
            let base = model.base_mut();
            base.created_on = now;
            base.cached_until = None;
        }

        match self.collection.insert_many(&*models).await {
            Ok(result) => {
                for (position, id) in result.inserted_ids {
                    if let (Some(model), bson::Bson::ObjectId(id)) = (models.get_mut(position), id)
                    {
                        model.base_mut().id = Some(id);
                    }
                }

                Ok(())
            }
            Err(error) => Err(classify_insert_error(error, models)),
        }
    }

    /// Full-document replace by identifier. Fails with
    /// [`MinqError::MissingId`] for a model that was never inserted.
    pub async fn update(&self, model: &D) -> Result<()> {
        self.replace(model, false).await
    }

    /// Like [`update`](Self::update), but inserts the document when no
    /// document with its identifier exists.
    pub async fn upsert(&self, model: &D) -> Result<()> {
        self.replace(model, true).await
    }

    async fn replace(&self, model: &D, upsert: bool) -> Result<()> {
        let id = model.id().ok_or(MinqError::MissingId)?;

        self.collection
            .replace_one(doc! { "_id": id }, model)
            .upsert(upsert)
            .await
            .map_err(classify_write_error)?;

        Ok(())
    }

    /// Point lookup by identifier.
    pub async fn from_id(&self, id: ObjectId) -> Result<Option<D>> {
        self.query(|filter| {
            filter.equal_to(FieldPath::id(), id);
        })
        .limit(1)
        .first()
        .await
    }

    /// Point lookup that inserts and returns a default-constructed
    /// document under the given identifier when none exists.
    pub async fn from_id_upsert(&self, id: ObjectId) -> Result<D>
    where
        D: Default,
    {
        if let Some(existing) = self.from_id(id).await? {
            return Ok(existing);
        }

        let mut fresh = D::default();
        fresh.base_mut().id = Some(id);

        let mut batch = [fresh];
        self.insert(&mut batch).await?;
        let [fresh] = batch;

        Ok(fresh)
    }

    /// Substring search across every string field of `D`; see
    /// [`RequestChain::search`].
    pub async fn search(&self, terms: &[&str]) -> Result<Vec<D>> {
        self.all().search(terms).await
    }

    /// Destructive full-collection delete, gated behind affirmative proof
    /// of a local environment. Outside one, the attempt is logged and
    /// nothing is deleted.
    pub async fn wipe(&self, environment: &dyn Environment) -> Result<u64> {
        if !environment.is_local() {
            tracing::error!(
                collection = %self.collection.namespace(),
                "code attempted to wipe a database outside of a local environment; this is not allowed"
            );
            return Ok(0);
        }

        self.all().delete().await
    }

    /// Declares an index through a builder closure and reconciles it
    /// against the live catalog immediately. Failures are logged, never
    /// raised.
    pub async fn create_index(&self, build: impl FnOnce(&mut IndexChain<D>)) {
        let mut chain = IndexChain::new();
        build(&mut chain);

        if let Some(index) = chain.build() {
            index::reconcile(&self.collection, &[index]).await;
        }
    }

    /// Reconciles every index declared on `D` through field attributes;
    /// see [`Document::declared_indexes`]. Run once at startup.
    pub async fn reconcile_indexes(&self) {
        index::reconcile(&self.collection, &D::declared_indexes()).await;
    }

    /// Opens a session on this handle's client and starts a transaction in
    /// it.
    pub async fn transaction(&self) -> Result<Transaction> {
        Transaction::start(self.database.client()).await
    }
}

fn classify_insert_error<D: Document>(error: mongodb::error::Error, models: &[D]) -> MinqError {
    let mut duplicate_positions = Vec::new();

    if let ErrorKind::InsertMany(failure) = error.kind.as_ref() {
        if let Some(write_errors) = &failure.write_errors {
            duplicate_positions = write_errors
                .iter()
                .filter(|write_error| write_error.code == DUPLICATE_KEY)
                .map(|write_error| write_error.index)
                .collect();
        }
    }

    if duplicate_positions.is_empty() {
        return error.into();
    }

    // Positional inference is only trustworthy when the batch produced a
    // single failure; with more than one, the suspect stays unknown.
    let suspected_position = (duplicate_positions.len() == 1)
        .then(|| duplicate_positions[0])
        .filter(|position| *position < models.len());

    let suspected_failure =
        suspected_position.and_then(|position| bson::to_document(&models[position]).ok());

    MinqError::UniqueConstraint {
        suspected_position,
        suspected_failure,
        source: Box::new(error),
    }
}

/// Dispatches a driver action through an optional session, awaiting it
/// either way.
#[macro_export]
macro_rules! with_session {
    ($query:expr, $session:expr) => {
        match $session {
            Some(session) => $query.session(session).await,
            None => $query.await,
        }
    };
}

/// Registers a derived document type in the process-wide metadata catalog;
/// invoked by `#[derive(Document)]`. A no-op when the `meta` feature is
/// disabled.
#[cfg(feature = "meta")]
#[macro_export]
macro_rules! register_document {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::meta::DocumentMetadataWrapper($crate::meta::DocumentMetadata::new(
                <$ty as $crate::Document>::COLLECTION_NAME,
                <$ty as $crate::Document>::declared_indexes,
                <$ty as $crate::Document>::string_fields,
            ))
        }
    };
}

#[cfg(not(feature = "meta"))]
#[macro_export]
#[doc(hidden)]
macro_rules! register_document {
    ($ty:ty) => {};
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::Client;

    #[derive(Debug, Default, Serialize, Deserialize, Embedded)]
    struct Profile {
        #[serde(rename = "b")]
        #[minq(text)]
        bio: String,
        city: String,
    }

    #[derive(Debug, Default, Serialize, Deserialize, Document)]
    #[document(collection = "players", projections(Ranking(base, score)))]
    struct Player {
        #[serde(flatten)]
        base: DocumentBase,
        #[serde(rename = "n")]
        #[minq(indexed, unique)]
        #[minq(text)]
        name: String,
        #[minq(group = "leaderboard", priority = 1)]
        score: i64,
        #[minq(nested)]
        profile: Profile,
    }

    #[derive(Debug, Default, Serialize, Deserialize, Document)]
    #[document(collection = "counters")]
    struct Counter {
        #[serde(flatten)]
        base: DocumentBase,
        value: i64,
    }

    // Parses the URI only; the driver never dials until an operation runs.
    async fn offline_database() -> Database {
        Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap()
            .database("minq_tests")
    }

    #[test]
    fn fields_render_storage_keys() {
        assert_eq!(player::Fields::Name.to_string(), "n");
        assert_eq!(player::Fields::Score.to_string(), "score");
        assert_eq!(
            player::Fields::Profile(profile::Fields::Bio).to_string(),
            "profile.b"
        );
        assert_eq!(
            player::Fields::Profile(profile::Fields::City).to_string(),
            "profile.city"
        );
    }

    #[test]
    fn declared_indexes_merge_fragments() {
        let indexes = Player::declared_indexes();

        assert_eq!(
            indexes,
            vec![
                MinqIndex::Simple {
                    key: "n".into(),
                    unique: true,
                    ascending: true,
                    name: None,
                },
                MinqIndex::Compound {
                    name: "leaderboard".into(),
                    keys: vec![("score".into(), true)],
                },
                MinqIndex::Text {
                    keys: vec!["n".into(), "profile.b".into()],
                },
            ]
        );
    }

    #[test]
    fn string_fields_recurse_through_embedded_documents() {
        assert_eq!(
            Player::string_fields(),
            vec!["n".to_owned(), "profile.b".into(), "profile.city".into()]
        );
        assert!(Counter::string_fields().is_empty());
    }

    #[test]
    fn projection_narrows_to_declared_fields() {
        assert_eq!(
            player::Ranking::FIELDS,
            Some(&["_id", "created", "score"][..])
        );
        assert_eq!(
            player::Ranking::projection_document(),
            Some(doc! { "_id": 1, "created": 1, "score": 1 })
        );
        assert_eq!(<Player as Projection<Player>>::FIELDS, None);
    }

    #[test]
    fn document_base_serde_shape() {
        let player = Player {
            base: DocumentBase {
                id: None,
                created_on: 1_700_000_000_000,
                cached_until: Some(123),
            },
            name: "piper".into(),
            score: 7,
            profile: Profile::default(),
        };

        let document = bson::to_document(&player).unwrap();

        assert!(!document.contains_key("_id"));
        assert!(!document.contains_key("cachedUntil"));
        assert!(!document.contains_key("cached_until"));
        assert_eq!(document.get_i64("created"), Ok(1_700_000_000_000));
        assert_eq!(document.get_str("n"), Ok("piper"));
    }

    #[test]
    fn document_base_round_trip_resets_transient_field() {
        let mut player = Player::default();
        player.base.created_on = 42;
        player.base.cached_until = Some(99);

        let document = bson::to_document(&player).unwrap();
        let restored: Player = bson::from_document(document).unwrap();

        assert_eq!(restored.base.created_on, 42);
        assert_eq!(restored.base.cached_until, None);
    }

    #[tokio::test]
    async fn unconstrained_chain_fails_before_touching_the_engine() {
        let db = offline_database().await;
        let players = Minq::<Player>::connect(&db);

        let mut chain = players.query(|_| {});
        assert!(matches!(chain.delete().await, Err(MinqError::EmptyFilter)));
    }

    #[tokio::test]
    async fn second_terminal_call_fails_with_consumed_request() {
        let db = offline_database().await;
        let players = Minq::<Player>::connect(&db);

        let mut chain = players.query(|filter| {
            filter.equal_to(player::Fields::Name, "piper");
        });

        // The first terminal fails on the empty update before any engine
        // call, but still consumes the chain.
        assert!(matches!(
            chain.update(|_| {}).await,
            Err(MinqError::EmptyUpdate)
        ));

        match chain.delete().await {
            Err(MinqError::ConsumedRequest { filter }) => {
                assert!(filter.contains("piper"));
            }
            other => panic!("expected ConsumedRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn search_requires_a_string_field() {
        let db = offline_database().await;
        let counters = Minq::<Counter>::connect(&db);

        assert!(matches!(
            counters.all().search(&["foo"]).await,
            Err(MinqError::NotSearchable { .. })
        ));
    }

    #[tokio::test]
    async fn empty_insert_is_rejected() {
        let db = offline_database().await;
        let players = Minq::<Player>::connect(&db);

        let mut nothing: [Player; 0] = [];
        assert!(matches!(
            players.insert(&mut nothing).await,
            Err(MinqError::EmptyInsert)
        ));
    }

    #[tokio::test]
    async fn replace_requires_an_identifier() {
        let db = offline_database().await;
        let players = Minq::<Player>::connect(&db);

        let player = Player::default();
        assert!(matches!(
            players.update(&player).await,
            Err(MinqError::MissingId)
        ));
    }

    #[tokio::test]
    async fn wipe_outside_local_deletes_nothing() {
        struct Production;

        impl Environment for Production {
            fn is_local(&self) -> bool {
                false
            }
        }

        let db = offline_database().await;
        let players = Minq::<Player>::connect(&db);

        assert_eq!(players.wipe(&Production).await.unwrap(), 0);
    }

    #[cfg(feature = "meta")]
    #[test]
    fn derived_documents_are_registered() {
        let names: Vec<_> = meta::document_metadata()
            .map(meta::DocumentMetadata::collection_name)
            .collect();

        assert!(names.contains(&"players"));
        assert!(names.contains(&"counters"));

        let players = meta::document_metadata()
            .find(|metadata| metadata.collection_name() == "players")
            .unwrap();

        assert_eq!(players.indexes(), Player::declared_indexes());
        assert_eq!(players.string_fields(), Player::string_fields());
    }
}
