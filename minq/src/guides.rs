//! Long-form usage guides. Each submodule is a chapter; none contains code.

/// ## Getting started
///
/// The [`Document`](crate::Document) trait maps a Rust type to a `MongoDB`
/// collection, providing a type-safe interface for inserting, querying,
/// updating, and deleting documents.
///
/// A type that derives [`Document`](crate::Document) must:
/// - be a struct with named fields
/// - implement [`Serialize`](serde::Serialize) and
///   [`Deserialize`](serde::Deserialize)
/// - have a field named `base` of type [`DocumentBase`](crate::DocumentBase),
///   annotated with `#[serde(flatten)]`
/// - name its collection with `#[document(collection = "...")]`
///
/// `DocumentBase` carries the identifier, the creation timestamp stamped at
/// insert, and the transient cache-expiration marker. The identifier starts
/// out as `None`; [`Minq::insert`](crate::Minq::insert) writes the
/// engine-assigned one back into your model.
///
/// ### Example
///
/// ```ignore
/// use serde::{Serialize, Deserialize};
/// use minq::{Document, DocumentBase, Minq};
///
/// #[derive(Serialize, Deserialize, Document)]
/// #[document(collection = "players")]
/// struct Player {
///   #[serde(flatten)]
///   base: DocumentBase,
///   name: String,
///   score: i64,
/// }
/// ```
///
/// Alongside the trait implementation, the derive generates a helper module
/// named after the struct (in `snake_case`) containing a `Fields` enum. Each
/// variant renders to the exact storage key serde produces for that field, so
/// a `#[serde(rename = "...")]` on a field is honored everywhere a field is
/// named: filters, updates, sorts, and indexes.
///
/// All database access goes through a [`Minq<D>`](crate::Minq) handle bound
/// to an explicit [`Database`](mongodb::Database):
///
/// ```ignore
/// let client = Client::with_uri_str("mongodb://example.com").await?;
/// let players = Minq::<Player>::connect(&client.database("game"));
///
/// let mut fresh = [Player { base: DocumentBase::default(), name: "piper".into(), score: 0 }];
/// players.insert(&mut fresh).await?;
///
/// let piper = players.from_id(fresh[0].base.id.unwrap()).await?;
/// ```
///
/// ### Method overview
///
/// | Method                       | Description                                                          |
/// |------------------------------|----------------------------------------------------------------------|
/// | `Minq::query`                | Starts a [request chain](super::request_chains) from a typed filter. |
/// | `Minq::all`                  | Starts a request chain that targets every document.                  |
/// | `Minq::insert`               | Bulk-inserts models, stamping timestamps and backfilling ids.        |
/// | `Minq::update` / `upsert`    | Full-document replace by id, optionally inserting when absent.       |
/// | `Minq::from_id`              | Point lookup by id.                                                  |
/// | `Minq::from_id_upsert`       | Point lookup that creates a default document when absent.            |
/// | `Minq::search`               | Substring search across every string field.                          |
/// | `Minq::wipe`                 | Full-collection delete, gated to local environments.                 |
/// | `Minq::reconcile_indexes`    | Reconciles declared indexes against the live catalog.                |
/// | `Minq::transaction`          | Opens a [transaction](super::transactions).                          |
mod getting_started {}

/// ## Request chains
///
/// Every query runs through a [`RequestChain`](crate::RequestChain): a
/// single-use command object created by [`Minq::query`](crate::Minq::query)
/// or [`Minq::all`](crate::Minq::all), configured through chained calls, and
/// executed by exactly one terminal operation.
///
/// ```ignore
/// let top: Vec<Player> = players
///     .query(|f| { f.greater_than(player::Fields::Score, 100); })
///     .sort(|s| { s.order_by_descending(player::Fields::Score); })
///     .limit(10)
///     .to_vec()
///     .await?;
/// ```
///
/// Filters are built inside the closure through
/// [`FilterChain`](crate::FilterChain): `equal_to`, `not_equal_to`,
/// `greater_than`, `less_than_or_equal_to`, `contains`, `is_in`,
/// `not_in`, and nested `and` / `or` / `not` sub-chains. A chain with
/// no predicates matches nothing useful, so executing one fails with
/// [`MinqError::EmptyFilter`](crate::MinqError::EmptyFilter); use
/// [`Minq::all`](crate::Minq::all) to target everything on purpose.
///
/// ### Terminal operations
///
/// `first`, `to_vec`, `count`, `delete`, `update`, `project`, and `search`
/// each consume the chain. A second terminal call on the same chain never
/// reaches the engine; it fails with
/// [`MinqError::ConsumedRequest`](crate::MinqError::ConsumedRequest)
/// carrying the filter that was rendered at first execution, so the log
/// tells you exactly which query someone tried to re-run. A chain whose
/// first terminal failed validation is consumed all the same.
///
/// ### Updates
///
/// The `update` terminal takes an [`UpdateChain`](crate::UpdateChain)
/// closure. Mutations accumulate by operator: `set`, `increment`, `push`,
/// `pull_where`, and `unset`. Mutating the same field twice in one chain is
/// logged, and the engine rejects conflicting operators on the same key with
/// [`MinqError::WriteConflict`](crate::MinqError::WriteConflict).
///
/// ```ignore
/// players
///     .query(|f| { f.equal_to(player::Fields::Name, "piper"); })
///     .update(|u| {
///         u.increment(player::Fields::Score, 5);
///         u.set(player::Fields::Profile(profile::Fields::City), "Boston");
///     })
///     .await?;
/// ```
///
/// ### Projections
///
/// Declare narrowed reads on the document attribute and fetch them with the
/// `project` terminal. Projection structs deserialize only their declared
/// fields; everything else is excluded server-side.
///
/// ```ignore
/// #[document(collection = "players", projections(Ranking(base, score)))]
///
/// let rankings: Vec<Ranking> = players.all().project::<Ranking>().await?;
/// ```
mod request_chains {}

/// ## Indexes
///
/// Indexes are declared on fields and reconciled against the live catalog,
/// usually once at startup via
/// [`Minq::reconcile_indexes`](crate::Minq::reconcile_indexes).
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Document)]
/// #[document(collection = "players")]
/// struct Player {
///   #[serde(flatten)]
///   base: DocumentBase,
///   #[minq(indexed, unique)]
///   name: String,
///   #[minq(group = "leaderboard", priority = 1)]
///   score: i64,
///   #[minq(text)]
///   bio: String,
/// }
/// ```
///
/// - `#[minq(indexed)]` declares a simple single-key index; add `unique` for
///   a uniqueness constraint.
/// - `#[minq(group = "...", priority = N)]` places the field in a named
///   compound index; fields are ordered by ascending priority, and the group
///   name doubles as the index name.
/// - `#[minq(text)]` contributes the field to the collection's single text
///   index (the engine permits at most one per collection).
/// - `#[minq(nested)]` recurses into a field whose type derives
///   [`Embedded`](crate::Embedded); its declarations surface under dotted
///   keys. Recursion is bounded at
///   [`MAX_SCAN_DEPTH`](crate::MAX_SCAN_DEPTH) levels.
///
/// Reconciliation diffs declarations against the live catalog and creates
/// what is missing. A simple index whose uniqueness flag changed is dropped
/// and recreated under its existing name; a compound index whose key set
/// changed is rebuilt under the group name. An existing text index is never
/// altered. Failures are logged and skipped rather than raised, so a startup
/// race between replicas cannot take the service down.
///
/// One-off indexes can also be declared imperatively:
///
/// ```ignore
/// players.create_index(|i| {
///     i.add_descending(player::Fields::Score)
///         .set_name("score_only")
///         .enforce_unique_constraint();
/// }).await;
/// ```
mod indexes {}

/// ## Transactions
///
/// A [`Transaction`](crate::Transaction) wraps a driver session and binds
/// multiple operations into one atomic unit. Obtain one from
/// [`Minq::transaction`](crate::Minq::transaction) and attach it to request
/// chains with
/// [`RequestChain::on_transaction`](crate::RequestChain::on_transaction):
///
/// ```ignore
/// let mut trx = players.transaction().await?;
///
/// players
///     .query(|f| { f.equal_to(player::Fields::Name, "piper"); })
///     .on_transaction(&mut trx)
///     .delete()
///     .await?;
///
/// trx.commit().await?;
/// ```
///
/// A transaction is `Open` until it is committed or aborted, and each
/// transition is permitted exactly once. The strict forms
/// ([`commit`](crate::Transaction::commit) /
/// [`abort`](crate::Transaction::abort)) fail with
/// [`MinqError::TransactionState`](crate::MinqError::TransactionState) on
/// reuse; the soft forms ([`try_commit`](crate::Transaction::try_commit) /
/// [`try_abort`](crate::Transaction::try_abort)) return `false` instead, and
/// move the transaction to `Failed` when the engine itself refuses. The soft
/// forms suit cleanup paths where a second abort attempt is harmless.
///
/// A chain with a transaction attached can also opt into
/// [`abort_on_failure`](crate::RequestChain::abort_on_failure), which
/// soft-aborts the transaction whenever the chain's terminal operation
/// fails, so a `?` on the terminal does not leave the transaction dangling.
mod transactions {}

/// ## Search
///
/// [`Minq::search`](crate::Minq::search) and the `search` terminal run a
/// case-insensitive substring match across every string-typed field of the
/// document, including fields of nested embedded documents. Terms are
/// OR-combined across fields and AND-combined with each other, on top of any
/// predicates already in the chain:
///
/// ```ignore
/// // name or bio containing "pip", AND name or bio containing "bos"
/// let hits = players.search(&["pip", "bos"]).await?;
/// ```
///
/// The searchable fields are discovered at derive time; a document type with
/// no string fields cannot be searched and fails with
/// [`MinqError::NotSearchable`](crate::MinqError::NotSearchable). Terms are
/// escaped before being handed to the engine, so user input cannot smuggle
/// pattern syntax into the query.
mod search {}
