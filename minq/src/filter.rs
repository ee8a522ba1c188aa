use crate::{error::MinqError, field::FieldKey};
use mongodb::bson::{self, Bson, Document, doc};
use serde::Serialize;
use std::marker::PhantomData;

/// A composable boolean predicate over the fields of `D`.
///
/// Configured through a closure passed to [`Minq::query`](crate::Minq::query)
/// or to the logical combinators below. Every predicate renders its field
/// selector to the storage key and stores a complete clause document;
/// [`build`](Self::build) combines the clauses with `$and`.
///
/// An unconfigured chain matches nothing: execution refuses it unless
/// [`all`](Self::all) was called, so a forgotten filter can never touch the
/// whole collection by accident.
#[derive(Debug)]
pub struct FilterChain<D> {
    clauses: Vec<Document>,
    match_all: bool,
    defect: Option<MinqError>,
    _marker: PhantomData<fn(D)>,
}

impl<D> Default for FilterChain<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> FilterChain<D> {
    pub(crate) fn new() -> Self {
        Self {
            clauses: Vec::new(),
            match_all: false,
            defect: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn match_everything() -> Self {
        let mut chain = Self::new();
        chain.match_all = true;
        chain
    }

    pub fn equal_to(&mut self, field: impl FieldKey<D>, value: impl Serialize) -> &mut Self {
        self.clause(&field, "$eq", value)
    }

    pub fn not_equal_to(&mut self, field: impl FieldKey<D>, value: impl Serialize) -> &mut Self {
        self.clause(&field, "$ne", value)
    }

    pub fn greater_than(&mut self, field: impl FieldKey<D>, value: impl Serialize) -> &mut Self {
        self.clause(&field, "$gt", value)
    }

    pub fn greater_than_or_equal_to(
        &mut self,
        field: impl FieldKey<D>,
        value: impl Serialize,
    ) -> &mut Self {
        self.clause(&field, "$gte", value)
    }

    pub fn less_than(&mut self, field: impl FieldKey<D>, value: impl Serialize) -> &mut Self {
        self.clause(&field, "$lt", value)
    }

    pub fn less_than_or_equal_to(
        &mut self,
        field: impl FieldKey<D>,
        value: impl Serialize,
    ) -> &mut Self {
        self.clause(&field, "$lte", value)
    }

    /// Matches documents whose field contains `term` as a substring. The
    /// term is escaped, so it is never interpreted as a regex pattern.
    pub fn contains(&mut self, field: impl FieldKey<D>, term: &str) -> &mut Self {
        let key = field.to_string();
        self.clauses
            .push(doc! { key: { "$regex": regex::escape(term) } });
        self
    }

    pub fn is_in<V: Serialize>(&mut self, field: impl FieldKey<D>, values: &[V]) -> &mut Self {
        self.clause(&field, "$in", values)
    }

    pub fn not_in<V: Serialize>(&mut self, field: impl FieldKey<D>, values: &[V]) -> &mut Self {
        self.clause(&field, "$nin", values)
    }

    /// Explicitly matches every document in the collection. Required before
    /// a clause-free chain is allowed to execute.
    pub fn all(&mut self) -> &mut Self {
        self.match_all = true;
        self
    }

    /// Adds a clause matching documents that satisfy every predicate of the
    /// sub-chain.
    pub fn and(&mut self, build: impl FnOnce(&mut FilterChain<D>)) -> &mut Self {
        self.group("$and", build)
    }

    /// Adds a clause matching documents that satisfy at least one predicate
    /// of the sub-chain.
    pub fn or(&mut self, build: impl FnOnce(&mut FilterChain<D>)) -> &mut Self {
        self.group("$or", build)
    }

    /// Adds a clause matching documents that fail every predicate of the
    /// sub-chain.
    pub fn not(&mut self, build: impl FnOnce(&mut FilterChain<D>)) -> &mut Self {
        let sub = self.sub_chain(build);

        if !sub.is_empty() {
            self.clauses.push(doc! { "$nor": [sub.build()] });
        }

        self
    }

    fn group(&mut self, operator: &str, build: impl FnOnce(&mut FilterChain<D>)) -> &mut Self {
        let sub = self.sub_chain(build);

        if !sub.clauses.is_empty() {
            self.clauses.push(doc! { operator: sub.clauses });
        }

        self
    }

    fn sub_chain(&mut self, build: impl FnOnce(&mut FilterChain<D>)) -> FilterChain<D> {
        let mut sub = FilterChain::new();
        build(&mut sub);

        if let Some(defect) = sub.defect.take() {
            self.defect.get_or_insert(defect);
        }

        sub
    }

    fn clause(&mut self, field: &impl FieldKey<D>, operator: &str, value: impl Serialize) -> &mut Self {
        let key = field.to_string();

        match bson::to_bson(&value) {
            Ok(bson) => self.clauses.push(doc! { key: { operator: bson } }),
            Err(error) => {
                self.defect.get_or_insert(error.into());
            }
        }

        self
    }

    /// True when the chain has no clauses and no `all()` flag; such a chain
    /// must be rejected before execution.
    pub(crate) fn is_unconstrained(&self) -> bool {
        self.clauses.is_empty() && !self.match_all
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The first value-serialization failure recorded while building, if
    /// any. Surfaced before any engine call.
    pub(crate) fn take_defect(&mut self) -> Option<MinqError> {
        self.defect.take()
    }

    pub(crate) fn build(&self) -> Document {
        match self.clauses.len() {
            0 => doc! {},
            1 => self.clauses[0].clone(),
            _ => doc! { "$and": self.clauses.clone() },
        }
    }

    /// The clauses as raw documents, for callers that recombine them (the
    /// search terminal).
    pub(crate) fn clause_documents(&self) -> &[Document] {
        &self.clauses
    }

    /// A human-readable rendering of the compiled filter, used for
    /// diagnostics and carried by the consumed-request error.
    pub(crate) fn rendered(&self) -> String {
        self.build().to_string()
    }
}

impl<D> From<&FilterChain<D>> for Bson {
    fn from(chain: &FilterChain<D>) -> Self {
        Bson::Document(chain.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldPath;

    struct Nothing;

    fn path(key: &str) -> FieldPath {
        FieldPath::parse(key).unwrap()
    }

    #[test]
    fn single_clause_builds_bare_document() {
        let mut chain = FilterChain::<Nothing>::new();
        chain.equal_to(path("name"), "piper");

        assert_eq!(chain.build(), doc! { "name": { "$eq": "piper" } });
    }

    #[test]
    fn multiple_clauses_combine_with_and() {
        let mut chain = FilterChain::<Nothing>::new();
        chain.greater_than(path("score"), 10).less_than(path("score"), 50);

        assert_eq!(
            chain.build(),
            doc! { "$and": [
                { "score": { "$gt": 10 } },
                { "score": { "$lt": 50 } },
            ]}
        );
    }

    #[test]
    fn or_group_nests_sub_chain_clauses() {
        let mut chain = FilterChain::<Nothing>::new();
        chain.or(|sub| {
            sub.equal_to(path("name"), "piper")
                .equal_to(path("name"), "dane");
        });

        assert_eq!(
            chain.build(),
            doc! { "$or": [
                { "name": { "$eq": "piper" } },
                { "name": { "$eq": "dane" } },
            ]}
        );
    }

    #[test]
    fn not_group_wraps_in_nor() {
        let mut chain = FilterChain::<Nothing>::new();
        chain.not(|sub| {
            sub.equal_to(path("banned"), true);
        });

        assert_eq!(chain.build(), doc! { "$nor": [{ "banned": { "$eq": true } }] });
    }

    #[test]
    fn contains_escapes_regex_metacharacters() {
        let mut chain = FilterChain::<Nothing>::new();
        chain.contains(path("name"), "a.b");

        assert_eq!(chain.build(), doc! { "name": { "$regex": "a\\.b" } });
    }

    #[test]
    fn unconfigured_chain_is_unconstrained() {
        let chain = FilterChain::<Nothing>::new();
        assert!(chain.is_unconstrained());

        let mut chain = FilterChain::<Nothing>::new();
        chain.all();
        assert!(!chain.is_unconstrained());
        assert_eq!(chain.build(), doc! {});
    }

    #[test]
    fn unserializable_value_is_recorded_as_defect() {
        // BSON map keys must be strings; an integer-keyed map cannot render.
        let bad = std::collections::HashMap::from([(1, "x")]);

        let mut chain = FilterChain::<Nothing>::new();
        chain.equal_to(path("data"), &bad);

        assert!(matches!(chain.take_defect(), Some(MinqError::Render { .. })));
    }

    #[test]
    fn rendered_filter_is_displayable() {
        let mut chain = FilterChain::<Nothing>::new();
        chain.equal_to(path("name"), "piper");

        assert!(chain.rendered().contains("name"));
        assert!(chain.rendered().contains("piper"));
    }
}
