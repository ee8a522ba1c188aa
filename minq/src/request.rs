use crate::{
    Document, Projection,
    error::{MinqError, Result, classify_write_error},
    filter::FilterChain,
    sort::SortChain,
    transaction::Transaction,
    update::UpdateChain,
    with_session,
};
use futures_util::TryStreamExt;
use mongodb::{Collection, bson, bson::doc};

/// A single-use query builder and executor.
///
/// Created by [`Minq::query`](crate::Minq::query) or
/// [`Minq::all`](crate::Minq::all), configured through chained calls, and
/// executed exactly once by a terminal operation. A second terminal call on
/// the same chain fails with [`MinqError::ConsumedRequest`] carrying the
/// filter rendered at first execution: the chain is a single-shot command
/// object, which guards against accidentally re-running a destructive or
/// expensive query through careless chaining.
#[derive(Debug)]
pub struct RequestChain<'a, D: Document> {
    collection: &'a Collection<D>,
    filter: FilterChain<D>,
    sort: Option<SortChain<D>>,
    limit: Option<i64>,
    transaction: Option<&'a mut Transaction>,
    abort_on_failure: bool,
    consumed: bool,
    rendered: Option<String>,
}

impl<'a, D: Document> RequestChain<'a, D> {
    pub(crate) fn new(collection: &'a Collection<D>, filter: FilterChain<D>) -> Self {
        Self {
            collection,
            filter,
            sort: None,
            limit: None,
            transaction: None,
            abort_on_failure: false,
            consumed: false,
            rendered: None,
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, build: impl FnOnce(&mut SortChain<D>)) -> Self {
        let mut chain = SortChain::new();
        build(&mut chain);
        self.sort = Some(chain);
        self
    }

    /// Routes every engine call of this chain through the transaction's
    /// session. A chain never mixes sessions; attaching a different
    /// transaction replaces the previous one wholesale.
    pub fn on_transaction(mut self, transaction: &'a mut Transaction) -> Self {
        if transaction.consumed() {
            tracing::warn!("attaching an already-consumed transaction to a request chain");
        }

        self.transaction = Some(transaction);
        self
    }

    /// Soft-aborts the attached transaction automatically when this chain's
    /// terminal operation fails. Has no effect without a transaction.
    pub fn abort_on_failure(mut self) -> Self {
        self.abort_on_failure = true;
        self
    }

    /// Fetches the first matching document.
    pub async fn first(&mut self) -> Result<Option<D>> {
        let result = self.run_first().await;
        self.guard(result).await
    }

    /// Fetches every matching document, honoring sort and limit.
    pub async fn to_vec(&mut self) -> Result<Vec<D>> {
        let result = self.run_to_vec().await;
        self.guard(result).await
    }

    pub async fn count(&mut self) -> Result<u64> {
        let result = self.run_count().await;
        self.guard(result).await
    }

    /// Deletes every matching document and returns the affected count.
    pub async fn delete(&mut self) -> Result<u64> {
        let result = self.run_delete().await;
        self.guard(result).await
    }

    /// Applies an update chain to every matching document and returns the
    /// modified count. Engine-side rejections of same-field double
    /// mutations surface as [`MinqError::WriteConflict`].
    pub async fn update(&mut self, build: impl FnOnce(&mut UpdateChain<D>)) -> Result<u64> {
        let result = self.run_update(build).await;
        self.guard(result).await
    }

    /// Fetches matching documents narrowed to the fields of projection `P`.
    pub async fn project<P: Projection<D>>(&mut self) -> Result<Vec<P>> {
        let result = self.run_project().await;
        self.guard(result).await
    }

    /// Substring search across every string-typed field of `D`, including
    /// fields of nested embedded documents. Terms are OR-combined across
    /// fields and AND-combined with each other, then executed as a normal
    /// read. A document type without a single string field cannot be
    /// searched.
    pub async fn search(&mut self, terms: &[&str]) -> Result<Vec<D>> {
        let result = self.run_search(terms).await;
        self.guard(result).await
    }

    async fn run_first(&mut self) -> Result<Option<D>> {
        let filter = self.consume()?;

        let mut query = self.collection.find_one(filter);
        if let Some(sort) = &self.sort {
            query = query.sort(sort.build());
        }

        let session = self.transaction.as_mut().map(|txn| txn.session_mut());
        let document = with_session!(query, session)?;

        Ok(document)
    }

    async fn run_to_vec(&mut self) -> Result<Vec<D>> {
        let filter = self.consume()?;
        self.execute_find(filter).await
    }

    async fn run_count(&mut self) -> Result<u64> {
        let filter = self.consume()?;

        let session = self.transaction.as_mut().map(|txn| txn.session_mut());
        let count = with_session!(self.collection.count_documents(filter), session)?;

        Ok(count)
    }

    async fn run_delete(&mut self) -> Result<u64> {
        let filter = self.consume()?;

        let session = self.transaction.as_mut().map(|txn| txn.session_mut());
        let result = with_session!(self.collection.delete_many(filter), session)?;

        Ok(result.deleted_count)
    }

    async fn run_update(&mut self, build: impl FnOnce(&mut UpdateChain<D>)) -> Result<u64> {
        let filter = self.consume()?;

        let mut chain = UpdateChain::new();
        build(&mut chain);

        if let Some(defect) = chain.take_defect() {
            return Err(defect);
        }

        let update = chain.build()?;

        let session = self.transaction.as_mut().map(|txn| txn.session_mut());
        let result = with_session!(self.collection.update_many(filter, update), session)
            .map_err(classify_write_error)?;

        Ok(result.modified_count)
    }

    async fn run_project<P: Projection<D>>(&mut self) -> Result<Vec<P>> {
        let filter = self.consume()?;

        let collection = self.collection.clone_with_type::<P>();
        let mut query = collection.find(filter);

        if let Some(projection) = P::projection_document() {
            query = query.projection(projection);
        }
        if let Some(sort) = &self.sort {
            query = query.sort(sort.build());
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }

        let documents = match self.transaction.as_mut() {
            Some(transaction) => {
                let session = transaction.session_mut();
                query
                    .session(&mut *session)
                    .await?
                    .stream(session)
                    .try_collect()
                    .await
            }
            None => query.await?.try_collect().await,
        }?;

        Ok(documents)
    }

    async fn run_search(&mut self, terms: &[&str]) -> Result<Vec<D>> {
        if self.consumed {
            return Err(self.consumed_error());
        }

        let fields = D::string_fields();
        if fields.is_empty() {
            return Err(MinqError::NotSearchable {
                type_name: std::any::type_name::<D>(),
            });
        }

        self.consumed = true;

        if let Some(defect) = self.filter.take_defect() {
            return Err(defect);
        }

        if terms.is_empty() {
            tracing::warn!("search() called with no terms; returning nothing");
            return Ok(Vec::new());
        }

        let mut clauses: Vec<bson::Document> = self.filter.clause_documents().to_vec();

        for term in terms {
            let pattern = regex::escape(term);
            let per_field: Vec<bson::Document> = fields
                .iter()
                .map(|field| {
                    let key = field.as_str();
                    doc! { key: { "$regex": &pattern, "$options": "i" } }
                })
                .collect();

            clauses.push(doc! { "$or": per_field });
        }

        let filter = match clauses.len() {
            1 => clauses.remove(0),
            _ => doc! { "$and": clauses },
        };

        self.rendered = Some(filter.to_string());
        self.execute_find(filter).await
    }

    async fn execute_find(&mut self, filter: bson::Document) -> Result<Vec<D>> {
        let mut query = self.collection.find(filter);

        if let Some(sort) = &self.sort {
            query = query.sort(sort.build());
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }

        let documents = match self.transaction.as_mut() {
            Some(transaction) => {
                let session = transaction.session_mut();
                query
                    .session(&mut *session)
                    .await?
                    .stream(session)
                    .try_collect()
                    .await
            }
            None => query.await?.try_collect().await,
        }?;

        Ok(documents)
    }

    async fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && self.abort_on_failure {
            if let Some(transaction) = self.transaction.as_mut() {
                transaction.try_abort().await;
            }
        }

        result
    }

    // The consumed check is the first statement of every terminal
    // operation; a chain that fails its filter invariants is still consumed
    // so it can never be retried.
    fn consume(&mut self) -> Result<bson::Document> {
        if self.consumed {
            return Err(self.consumed_error());
        }

        self.consumed = true;

        if let Some(defect) = self.filter.take_defect() {
            return Err(defect);
        }

        if self.filter.is_unconstrained() {
            return Err(MinqError::EmptyFilter);
        }

        let filter = self.filter.build();
        self.rendered = Some(filter.to_string());

        Ok(filter)
    }

    fn consumed_error(&self) -> MinqError {
        MinqError::ConsumedRequest {
            filter: self
                .rendered
                .clone()
                .unwrap_or_else(|| self.filter.rendered()),
        }
    }
}
